//! `zpravy-ingest`: the deduplicating article gate.
//!
//! Every fetched record passes through [`DedupGate::ingest`], which validates
//! it, normalises its URL, fingerprints it and inserts it unless an article
//! with the same fingerprint already exists.

pub mod db;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod types;

pub use db::init_db;
pub use error::{IngestError, Result};
pub use fingerprint::{fingerprint, normalize_url};
pub use gate::DedupGate;
pub use types::{Article, ArticleFilter, IngestReport, RawRecord};
