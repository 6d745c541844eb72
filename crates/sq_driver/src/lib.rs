//! Synchronous driver for the asynchronous minification pipeline.
//!
//! The pipeline's one internal asynchronous step is source-map consumption.
//! [`minify_sync`] installs one-shot hooks on a per-invocation interception
//! context, invokes the pipeline once, and polls the returned future exactly
//! once: every hook fires during the pipeline's synchronous setup phase, the
//! map step is substituted with the synchronous composer, and the result is
//! captured before the future would ever suspend.

pub mod contract;
pub mod error;
pub mod sync;

pub use contract::{yield_once, Pipeline, PipelineFailure};
pub use error::{FailureDetail, SyncError, SyncErrorKind};
pub use sync::{minify, minify_sync};
