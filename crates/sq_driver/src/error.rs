//! Failure taxonomy of the synchronous driver.
//!
//! All failures are synchronous returns from [`minify_sync`](crate::minify_sync).
//! When the full diagnosis only exists on the asynchronous path, the error
//! carries the still-pending pipeline future; [`SyncError::resolve_detail`]
//! drives it to completion.

use std::fmt;

use futures::future::LocalBoxFuture;
use sq_srcmap::ComposeError;
use thiserror::Error;

use crate::contract::PipelineFailure;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncErrorKind {
    /// The options-clone point never fired: the pipeline rejected before
    /// reaching its cloning step, or its call sequence changed.
    #[error("failed to capture cloned options")]
    CaptureFailed,
    /// A map was requested and code generation enabled, yet the map step was
    /// neither substituted nor trivially handled.
    #[error("failed to substitute synchronous source map step")]
    SubstitutionFailed,
    /// Prior points fired but no result object was captured. Not reachable
    /// through a pipeline honoring the call contract.
    #[error("result not captured; resolve the attached pipeline error for details")]
    ResultMissing,
    /// The composer raised while being constructed or serialized.
    #[error(transparent)]
    Composer(ComposeError),
    /// The pipeline failed after every capture point had fired.
    #[error(transparent)]
    Pipeline(PipelineFailure),
}

/// The asynchronous half of a failure: either the pipeline's error was
/// already available at the single poll, or the pipeline suspended and its
/// future must be driven to completion to learn the outcome.
pub enum FailureDetail {
    Resolved(PipelineFailure),
    Pending(LocalBoxFuture<'static, Option<PipelineFailure>>),
}

impl FailureDetail {
    /// Drive the underlying pipeline to completion. `None` means it finished
    /// without an error of its own.
    pub async fn resolve(self) -> Option<PipelineFailure> {
        match self {
            FailureDetail::Resolved(failure) => Some(failure),
            FailureDetail::Pending(future) => future.await,
        }
    }
}

impl fmt::Debug for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDetail::Resolved(failure) => f.debug_tuple("Resolved").field(failure).finish(),
            FailureDetail::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A failed synchronous minification.
#[derive(Debug)]
pub struct SyncError {
    kind: SyncErrorKind,
    detail: Option<FailureDetail>,
}

impl SyncError {
    pub(crate) fn new(kind: SyncErrorKind, detail: Option<FailureDetail>) -> Self {
        SyncError { kind, detail }
    }

    pub fn kind(&self) -> &SyncErrorKind {
        &self.kind
    }

    /// Split off the attached asynchronous detail, if any.
    pub fn into_parts(self) -> (SyncErrorKind, Option<FailureDetail>) {
        (self.kind, self.detail)
    }

    /// Resolve the underlying pipeline failure, awaiting the pipeline's
    /// future when necessary.
    pub async fn resolve_detail(self) -> Option<PipelineFailure> {
        match self.detail {
            Some(detail) => detail.resolve().await,
            None => match self.kind {
                SyncErrorKind::Pipeline(failure) => Some(failure),
                _ => None,
            },
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}
