//! # cloud-search
//!
//! Keeps a full-text search index synchronized with the files in a remote
//! cloud storage account, and answers free-text queries against it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │  Provider   │──▶│   Registry   │──▶│ Local cache │──▶│   Extractor   │
//! │ Dropbox/S3  │   │ known files  │   │  downloads  │   │ txt/csv/pdf/  │
//! │ Filesystem  │   └──────────────┘   └─────────────┘   │ image (OCR)   │
//! └─────────────┘                                        └───────┬───────┘
//!                                                                ▼
//!              ┌──────────┐     ┌──────────────┐        ┌───────────────┐
//!              │   HTTP   │────▶│ Query engine │◀───────│ Search index  │
//!              │   / CLI  │     └──────────────┘        │ ES / memory   │
//!              └──────────┘                             └───────────────┘
//! ```
//!
//! With `[cache].enabled = false` the registry and cache are bypassed and
//! bytes go straight from the provider to the extractor.
//!
//! ## Quick Start
//!
//! ```bash
//! cloud-search sync                  # one sync pass
//! cloud-search search "invoice"      # sync, then query
//! cloud-search serve                 # HTTP endpoint
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`traits`] | Provider, backend, and OCR seams |
//! | [`connector_dropbox`] | Dropbox provider |
//! | [`connector_s3`] | Amazon S3 provider |
//! | [`connector_fs`] | Local directory provider |
//! | [`listing`] | Paginated listing with retries |
//! | [`registry`] | Persisted known-file registry |
//! | [`cache`] | Local download cache |
//! | [`extract`] | Format dispatch and text extraction |
//! | [`ocr`] | Tesseract OCR engine |
//! | [`index`] | Index writer and search backends |
//! | [`search`] | Query execution and result shaping |
//! | [`report`] | Per-pass outcome summary |
//! | [`ingest`] | Sync pass orchestration |
//! | [`server`] | HTTP query endpoint |

pub mod cache;
pub mod config;
pub mod connector_dropbox;
pub mod connector_fs;
pub mod connector_s3;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod listing;
pub mod models;
pub mod ocr;
pub mod registry;
pub mod report;
pub mod search;
pub mod server;
pub mod traits;
