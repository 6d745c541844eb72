//! The pipeline call contract.
//!
//! The pipeline is opaque to the driver: a function from `(files, options)`
//! to a future, plus four extension points it fires on the interception
//! context during its synchronous setup phase, in a fixed order:
//!
//! 1. validation (no points fire; invalid options reject the future here)
//! 2. `notify_options_cloned` with the defaulted clone of the options
//! 3. `read_format_ast`; when it reads `true`, the pipeline assigns the
//!    program to its result object and fires `notify_result_assigned`
//! 4. `read_source_map`, only when a map is requested and code generation
//!    enabled; a [`MapStep::Substitute`](sq_hooks::MapStep) reply must be
//!    used synchronously, while [`MapStep::Async`](sq_hooks::MapStep) lets
//!    the pipeline await its own map consumption
//!
//! Everything after the last point (code generation, map serialization)
//! stays synchronous unless the pipeline took the async map path.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use sq_hooks::SharedInterceptor;
use sq_model::{Files, MinifyOptions, MinifyResult};
use sq_srcmap::ComposeError;
use thiserror::Error;

/// Failure raised by the pipeline itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineFailure {
    #[error("`{0}` is not a supported option")]
    UnsupportedOption(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },
    #[error("emit failed: {0}")]
    Emit(String),
    #[error(transparent)]
    Map(#[from] ComposeError),
}

/// The external minification pipeline.
pub trait Pipeline {
    /// Run one minification. The future's synchronous prefix (everything up
    /// to its first suspension point) must fire the extension points in the
    /// order documented on this module.
    fn minify(
        &self,
        files: Files,
        options: MinifyOptions,
        icp: SharedInterceptor,
    ) -> LocalBoxFuture<'static, Result<MinifyResult, PipelineFailure>>;
}

/// A future that is pending on its first poll and ready on the second.
///
/// Models the pipeline's asynchronous boundary: awaiting it is the moment a
/// real pipeline would hand control to its async source-map consumer.
#[derive(Debug, Default)]
pub struct YieldOnce {
    yielded: bool,
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Suspend the current future once.
pub fn yield_once() -> YieldOnce {
    YieldOnce::default()
}
