//! `zpravy-executor`: runs scraping jobs under a concurrency cap, a per-job
//! timeout and cooperative cancellation.

pub mod error;
pub mod executor;
pub mod fetcher;
pub mod intake;
pub mod retry;

pub use error::{ExecutorError, Result};
pub use executor::{CancelOutcome, Executor, ExecutorSettings};
pub use fetcher::{FetchError, FetchErrorKind, FetchRequest, Fetcher, RawRecord};
pub use intake::{Intake, Lane};
pub use retry::RetryPolicy;
