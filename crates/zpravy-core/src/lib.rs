//! `zpravy-core`: shared configuration, identifiers and lifecycle plumbing
//! for the zpravy scraping service.

pub mod config;
pub mod error;
pub mod service;
pub mod sources;
pub mod time;
pub mod types;

pub use config::ZpravyConfig;
pub use error::{Result, ZpravyError};
pub use service::ServiceHandle;
pub use sources::SourceRegistry;
pub use types::{JobId, Page, TriggerId};
