//! Amazon S3 connector.
//!
//! Lists and downloads objects using the S3 REST API with AWS Signature V4
//! authentication. Supports custom endpoints for S3-compatible services
//! (MinIO, LocalStack).
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! provider = "s3"
//!
//! [storage.s3]
//! bucket = "acme-docs"
//! prefix = "shared/"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials / IAM roles)
//!
//! # Paths
//!
//! Object keys are exposed relative to the configured prefix and rooted at
//! `/`, so `shared/team/plan.pdf` with prefix `shared/` becomes
//! `/team/plan.pdf`. Keys ending in `/` are folder markers and skipped.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::S3ConnectorConfig;
use crate::error::{Error, Result};
use crate::models::{parse_timestamp, RemoteFileRecord};
use crate::traits::{ListPage, StorageProvider};

type HmacSha256 = Hmac<Sha256>;

pub struct S3Connector {
    config: S3ConnectorConfig,
    creds: Option<AwsCredentials>,
    client: reqwest::Client,
}

impl S3Connector {
    /// Create a connector. Missing credentials are reported lazily, on the
    /// first call, as [`Error::RemoteUnavailable`].
    pub fn new(config: S3ConnectorConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let creds = match AwsCredentials::from_env() {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        };

        Ok(Self {
            config,
            creds,
            client,
        })
    }

    fn creds(&self) -> Result<&AwsCredentials> {
        self.creds
            .as_ref()
            .ok_or_else(|| Error::RemoteUnavailable("AWS credentials not configured".into()))
    }

    fn key_for(&self, path: &str) -> String {
        let rel = path.trim_start_matches('/');
        let prefix = self.config.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{}", prefix, rel)
        }
    }

    fn path_for(&self, key: &str) -> String {
        let prefix = self.config.prefix.trim_end_matches('/');
        let rel = if prefix.is_empty() {
            key
        } else {
            key.strip_prefix(prefix)
                .map(|s| s.trim_start_matches('/'))
                .unwrap_or(key)
        };
        format!("/{}", rel)
    }

    /// Send a SigV4-signed GET request.
    async fn signed_get(
        &self,
        canonical_uri: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let creds = self.creds()?;
        let host = s3_host(&self.config);
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted_params = query.to_vec();
        sorted_params.sort();
        let canonical_querystring = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");
        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort();

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
        );
        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", s3_scheme(&self.config), host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .get(&url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(ref token) = creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        req.send()
            .await
            .map_err(|e| Error::RemoteTransient(format!("S3 request to {} failed: {}", url, e)))
    }

    /// Canonical URI for object requests. Path-style addressing is used for
    /// custom endpoints, virtual-hosted style for AWS.
    fn object_uri(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        if self.config.endpoint_url.is_some() {
            format!("/{}/{}", self.config.bucket, encoded_key)
        } else {
            format!("/{}", encoded_key)
        }
    }

    fn bucket_uri(&self) -> String {
        if self.config.endpoint_url.is_some() {
            format!("/{}", self.config.bucket)
        } else {
            "/".to_string()
        }
    }
}

#[async_trait]
impl StorageProvider for S3Connector {
    fn name(&self) -> &str {
        "s3"
    }

    async fn list_page(&self, cursor: Option<&str>) -> Result<ListPage> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1000".to_string()),
        ];
        if !self.config.prefix.is_empty() {
            query.push(("prefix".to_string(), self.config.prefix.clone()));
        }
        if let Some(token) = cursor {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let resp = self.signed_get(&self.bucket_uri(), &query).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = format!(
                "S3 ListObjectsV2 on s3://{}/{} failed (HTTP {}): {}",
                self.config.bucket,
                self.config.prefix,
                status,
                body.chars().take(500).collect::<String>()
            );
            return Err(if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
                Error::RemoteUnavailable(detail)
            } else {
                Error::RemoteTransient(detail)
            });
        }

        let xml = resp
            .text()
            .await
            .map_err(|e| Error::RemoteTransient(format!("S3 listing body read failed: {e}")))?;
        let parsed = parse_list_objects_response(&xml)?;

        let entries = parsed
            .objects
            .into_iter()
            .map(|obj| RemoteFileRecord::new(self.path_for(&obj.key), obj.last_modified, obj.size))
            .collect();

        Ok(ListPage {
            entries,
            next_cursor: if parsed.is_truncated {
                parsed.next_token
            } else {
                None
            },
        })
    }

    async fn get_content(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let key = self.key_for(path);
        let resp = self.signed_get(&self.object_uri(&key), &[]).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            tracing::warn!(key = %key, "S3 object not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::RemoteTransient(format!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                status, key
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::RemoteTransient(format!("S3 GetObject body for '{key}': {e}")))?;
        Ok(Some(bytes.to_vec()))
    }
}

// ============ AWS Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            Error::RemoteUnavailable("AWS_ACCESS_KEY_ID environment variable not set".into())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            Error::RemoteUnavailable("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ ListObjectsV2 parsing ============

struct S3Object {
    key: String,
    last_modified: chrono::DateTime<Utc>,
    size: u64,
}

struct ListObjectsPage {
    objects: Vec<S3Object>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` XML document.
fn parse_list_objects_response(xml: &str) -> Result<ListObjectsPage> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListObjectsPage {
        objects: Vec::new(),
        is_truncated: false,
        next_token: None,
    };

    let mut path: Vec<String> = Vec::new();
    let mut key = String::new();
    let mut last_modified = String::new();
    let mut size = 0u64;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Contents" {
                    key.clear();
                    last_modified.clear();
                    size = 0;
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::RemoteTransient(format!("bad S3 listing XML: {e}")))?;
                let in_contents = path.iter().any(|p| p == "Contents");
                match path.last().map(String::as_str) {
                    Some("Key") if in_contents => key = text.into_owned(),
                    Some("LastModified") if in_contents => last_modified = text.into_owned(),
                    Some("Size") if in_contents => size = text.parse().unwrap_or(0),
                    Some("IsTruncated") => page.is_truncated = text == "true",
                    Some("NextContinuationToken") => page.next_token = Some(text.into_owned()),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Contents" && !key.is_empty() && !key.ends_with('/')
                {
                    match parse_timestamp(&last_modified) {
                        Some(ts) => page.objects.push(S3Object {
                            key: std::mem::take(&mut key),
                            last_modified: ts,
                            size,
                        }),
                        None => tracing::warn!(key = %key, "skipping S3 object with bad LastModified"),
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::RemoteTransient(format!("bad S3 listing XML: {e}")));
            }
            _ => {}
        }
    }

    Ok(page)
}

// ============ AWS SigV4 Helpers ============

/// Hostname for the bucket, or the custom endpoint's host.
fn s3_host(config: &S3ConnectorConfig) -> String {
    if let Some(ref endpoint) = config.endpoint_url {
        endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    } else {
        format!("{}.s3.{}.amazonaws.com", config.bucket, config.region)
    }
}

fn s3_scheme(config: &S3ConnectorConfig) -> &'static str {
    match config.endpoint_url {
        Some(ref endpoint) if endpoint.starts_with("http://") => "http",
        _ => "https",
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => unreachable!("HMAC can take key of any size"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
pub(crate) fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>acme-docs</Name>
  <Prefix>shared/</Prefix>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
  <Contents>
    <Key>shared/</Key>
    <LastModified>2024-01-01T00:00:00.000Z</LastModified>
    <Size>0</Size>
  </Contents>
  <Contents>
    <Key>shared/team/plan &amp; budget.pdf</Key>
    <LastModified>2024-03-05T10:20:30.500Z</LastModified>
    <ETag>"abc"</ETag>
    <Size>2048</Size>
  </Contents>
</ListBucketResult>"#;

    fn connector(prefix: &str) -> S3Connector {
        S3Connector {
            config: S3ConnectorConfig {
                bucket: "acme-docs".into(),
                prefix: prefix.into(),
                region: "us-east-1".into(),
                endpoint_url: None,
            },
            creds: None,
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn parses_listing_and_skips_folder_markers() {
        let page = parse_list_objects_response(LISTING).unwrap();
        assert!(page.is_truncated);
        assert_eq!(
            page.next_token.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "shared/team/plan & budget.pdf");
        assert_eq!(page.objects[0].size, 2048);
        assert_eq!(
            crate::models::format_timestamp(&page.objects[0].last_modified),
            "2024-03-05T10:20:30Z"
        );
    }

    #[test]
    fn paths_are_relative_to_prefix() {
        let s3 = connector("shared/");
        assert_eq!(s3.path_for("shared/team/plan.pdf"), "/team/plan.pdf");
        assert_eq!(s3.key_for("/team/plan.pdf"), "shared/team/plan.pdf");

        let bare = connector("");
        assert_eq!(bare.path_for("a/b.txt"), "/a/b.txt");
        assert_eq!(bare.key_for("/a/b.txt"), "a/b.txt");
    }

    #[test]
    fn uri_encode_escapes_reserved() {
        assert_eq!(uri_encode("a b/c~d"), "a%20b%2Fc~d");
    }

    #[tokio::test]
    async fn missing_credentials_report_unavailable() {
        let err = connector("").list_page(None).await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable(_)));
    }
}
