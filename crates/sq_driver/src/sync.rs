//! The sync adapter: one pipeline invocation, driven to completion
//! synchronously.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::task::noop_waker;
use futures::FutureExt;
use sq_hooks::{HookError, InterceptPoint, Interceptor, MapStep, SharedInterceptor};
use sq_model::{Files, MinifyOptions, MinifyResult, SharedResult};
use sq_srcmap::ComposeError;
use tracing::{debug, trace};

use crate::contract::{Pipeline, PipelineFailure};
use crate::error::{FailureDetail, SyncError, SyncErrorKind};

/// Capture cells shared between the installed hooks and the post-poll
/// validation.
#[derive(Default)]
struct Capture {
    options: RefCell<Option<MinifyOptions>>,
    result: RefCell<Option<SharedResult>>,
    map_handled: Cell<bool>,
    compose_error: RefCell<Option<ComposeError>>,
}

/// Run the pipeline to completion synchronously.
///
/// Installs the capture hooks on a fresh interception context, invokes the
/// pipeline once, and polls the returned future exactly once with a no-op
/// waker. All hooks fire inside that poll, during the pipeline's synchronous
/// setup phase; the captured result is returned before the future would ever
/// be awaited. The driver never blocks: completion flags are checked
/// immediately after the poll, and any unmet flag is a [`SyncError`].
pub fn minify_sync(
    pipeline: &dyn Pipeline,
    files: impl Into<Files>,
    options: MinifyOptions,
) -> Result<MinifyResult, SyncError> {
    let files = files.into();
    let capture = Rc::new(Capture::default());
    let icp: SharedInterceptor = Interceptor::unhooked();
    install_capture_hooks(&mut icp.borrow_mut(), &capture);

    let mut future = pipeline.minify(files, options, Rc::clone(&icp));
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let poll = future.poll_unpin(&mut cx);

    let detail = match poll {
        Poll::Ready(Ok(_)) => {
            trace!("pipeline future completed synchronously");
            None
        }
        Poll::Ready(Err(failure)) => {
            debug!(%failure, "pipeline future rejected synchronously");
            Some(FailureDetail::Resolved(failure))
        }
        Poll::Pending => {
            debug!("pipeline future suspended past the capture sequence");
            Some(FailureDetail::Pending(
                async move { future.await.err() }.boxed_local(),
            ))
        }
    };

    // Validation order mirrors the capture sequence: a composer error beats
    // the flag checks, which run in hook-installation order.
    if let Some(error) = capture.compose_error.borrow_mut().take() {
        return Err(SyncError::new(SyncErrorKind::Composer(error), detail));
    }
    if !icp.borrow().fired(InterceptPoint::OptionsCloned) {
        return Err(SyncError::new(SyncErrorKind::CaptureFailed, detail));
    }
    if !capture.map_handled.get() {
        return Err(SyncError::new(SyncErrorKind::SubstitutionFailed, detail));
    }
    let Some(shared) = capture.result.borrow_mut().take() else {
        return Err(match detail {
            Some(FailureDetail::Resolved(failure)) => {
                SyncError::new(SyncErrorKind::Pipeline(failure), None)
            }
            other => SyncError::new(SyncErrorKind::ResultMissing, other),
        });
    };
    // An error raised after the capture sequence (e.g. during code
    // generation) fails the sync path exactly as it fails the async one.
    if let Some(FailureDetail::Resolved(failure)) = detail {
        return Err(SyncError::new(SyncErrorKind::Pipeline(failure), None));
    }

    let result = Rc::try_unwrap(shared)
        .map(RefCell::into_inner)
        .unwrap_or_else(|shared| shared.borrow().clone());
    Ok(result)
}

/// Drive the pipeline asynchronously, with no interception. The reference
/// path for equivalence checks.
pub async fn minify(
    pipeline: &dyn Pipeline,
    files: impl Into<Files>,
    options: MinifyOptions,
) -> Result<MinifyResult, PipelineFailure> {
    pipeline
        .minify(files.into(), options, Interceptor::unhooked())
        .await
}

/// Wire the capture sequence onto a fresh context.
///
/// Three stages, each armed from inside the previous one:
///
/// 1. options-cloned: store a clone of the pipeline's defaulted options.
/// 2. format-ast read: reply `true` — forcing the pipeline to assign its
///    result object — and arm the result-assigned hook.
/// 3. result-assigned: capture the shared result, strip the AST again if it
///    was not actually requested, and either mark the map step trivially
///    handled (no map requested, or code generation disabled) or arm the
///    source-map-read hook, which builds the synchronous composer.
fn install_capture_hooks(icp: &mut Interceptor, capture: &Rc<Capture>) {
    let cells = Rc::clone(capture);
    // The context is fresh, so neither install can collide.
    let installed: Result<(), HookError> = (|| {
        icp.on_options_cloned({
            let cells = Rc::clone(&cells);
            move |_, options| {
                trace!("captured cloned options");
                *cells.options.borrow_mut() = Some(options.clone());
            }
        })?;
        icp.on_format_ast_read(move |icp, _default| {
            // Arm the result capture before the assignment that follows.
            let armed = icp.on_result_assigned(move |icp, shared| {
                on_result_assigned(icp, shared, &cells);
            });
            debug_assert!(armed.is_ok());
            true
        })
    })();
    debug_assert!(installed.is_ok());
}

fn on_result_assigned(icp: &mut Interceptor, shared: &SharedResult, cells: &Rc<Capture>) {
    trace!("captured result object");
    *cells.result.borrow_mut() = Some(Rc::clone(shared));

    let (want_ast, map_requested) = match cells.options.borrow().as_ref() {
        Some(options) => (options.format.ast, options.map_requested()),
        None => (false, false),
    };
    // The toggle was forced true only to provoke the assignment; drop the
    // AST again unless the caller asked for it.
    if !want_ast {
        shared.borrow_mut().ast = None;
    }

    if !map_requested {
        debug!("no source map requested; map step trivially handled");
        cells.map_handled.set(true);
        return;
    }

    let cells = Rc::clone(cells);
    let armed = icp.on_source_map_read(move |_, options, files| {
        cells.map_handled.set(true);
        let Some(map_options) = options.source_map.as_ref() else {
            return Ok(MapStep::Async);
        };
        match sq_srcmap::composer_for(map_options, files) {
            Ok(composer) => {
                debug!("substituted synchronous source map composer");
                Ok(MapStep::Substitute(composer))
            }
            Err(error) => {
                *cells.compose_error.borrow_mut() = Some(error.clone());
                Err(error)
            }
        }
    });
    debug_assert!(armed.is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::yield_once;
    use futures::executor::block_on;
    use futures::future::LocalBoxFuture;
    use sq_model::SourceMapOptions;
    use sq_srcmap::MappingRecord;

    /// A pipeline honoring the call contract. "Minifies" by collapsing
    /// whitespace and emits one mapping per input line.
    #[derive(Default)]
    struct StubPipeline {
        /// Suspend after the capture sequence even when substituted.
        suspend_after_capture: bool,
        /// Skip the source-map-read point entirely and go async.
        skip_map_point: bool,
        /// Fail during code generation, after every point has fired.
        fail_emit: bool,
    }

    impl StubPipeline {
        fn squash(source: &str) -> String {
            source.split_whitespace().collect::<Vec<_>>().join(" ")
        }
    }

    impl Pipeline for StubPipeline {
        fn minify(
            &self,
            files: Files,
            options: MinifyOptions,
            icp: SharedInterceptor,
        ) -> LocalBoxFuture<'static, Result<MinifyResult, PipelineFailure>> {
            let suspend_after_capture = self.suspend_after_capture;
            let skip_map_point = self.skip_map_point;
            let fail_emit = self.fail_emit;
            async move {
                if let Some(name) = options.extra.keys().next() {
                    return Err(PipelineFailure::UnsupportedOption(name.clone()));
                }
                let mut opts = options.clone();
                icp.borrow_mut().notify_options_cloned(&mut opts);

                let source = match &files {
                    Files::Source(source) => source.clone(),
                    Files::Named(named) => {
                        named.values().cloned().collect::<Vec<_>>().join("\n")
                    }
                    Files::Parsed(_) => String::new(),
                };

                let result = SharedResult::default();
                if icp.borrow_mut().read_format_ast(opts.format.ast) {
                    icp.borrow_mut().notify_result_assigned(&result);
                }

                let composer = if opts.map_requested() && !skip_map_point {
                    let step = icp.borrow_mut().read_source_map(&opts, &files)?;
                    match step {
                        MapStep::Substitute(composer) => Some(composer),
                        MapStep::Async => {
                            yield_once().await;
                            let map_options = opts.source_map.clone().unwrap_or_default();
                            Some(sq_srcmap::composer_for(&map_options, &files)?)
                        }
                    }
                } else {
                    None
                };
                if skip_map_point && opts.map_requested() {
                    yield_once().await;
                }
                if suspend_after_capture {
                    yield_once().await;
                }
                if fail_emit {
                    return Err(PipelineFailure::Emit("stub emit failure".to_string()));
                }

                if opts.format.code_enabled() {
                    result.borrow_mut().code = Some(Self::squash(&source));
                }
                if let Some(mut composer) = composer {
                    composer.add(&MappingRecord {
                        source: Some(Files::ANONYMOUS.to_string()),
                        ..Default::default()
                    });
                    result.borrow_mut().map = Some(composer.finish()?);
                }
                let out = result.borrow().clone();
                Ok(out)
            }
            .boxed_local()
        }
    }

    fn map_options() -> MinifyOptions {
        MinifyOptions {
            source_map: Some(SourceMapOptions::default()),
            ..Default::default()
        }
    }

    #[test]
    fn returns_result_without_map() {
        let pipeline = StubPipeline::default();
        let result = minify_sync(&pipeline, "const  a =\n1;", MinifyOptions::default()).unwrap();
        assert_eq!(result.code.as_deref(), Some("const a = 1;"));
        assert!(result.map.is_none());
    }

    #[test]
    fn matches_async_path() {
        let pipeline = StubPipeline::default();
        for options in [MinifyOptions::default(), map_options()] {
            let sync = minify_sync(&pipeline, "let x  = 1;", options.clone()).unwrap();
            let asynchronous =
                block_on(minify(&pipeline, "let x  = 1;", options)).unwrap();
            assert_eq!(sync, asynchronous);
        }
    }

    #[test]
    fn substitutes_map_step_without_suspending() {
        let pipeline = StubPipeline::default();
        let result = minify_sync(&pipeline, "let x = 1;", map_options()).unwrap();
        assert!(result.map.is_some());
    }

    #[test]
    fn disabled_code_skips_map_entirely() {
        let pipeline = StubPipeline::default();
        let mut options = map_options();
        options.format.code = Some(false);
        let result = minify_sync(&pipeline, "let x = 1;", options).unwrap();
        assert!(result.code.is_none());
        assert!(result.map.is_none());
    }

    #[test]
    fn validation_failure_surfaces_as_capture_failed() {
        let pipeline = StubPipeline::default();
        let mut options = MinifyOptions::default();
        options
            .extra
            .insert("nonExistentOption".to_string(), serde_json::Value::Bool(true));

        let error = minify_sync(&pipeline, "() => {}", options).unwrap_err();
        assert_eq!(error.kind(), &SyncErrorKind::CaptureFailed);
        assert_eq!(
            block_on(error.resolve_detail()),
            Some(PipelineFailure::UnsupportedOption(
                "nonExistentOption".to_string()
            ))
        );
    }

    #[test]
    fn skipped_map_point_surfaces_as_substitution_failed() {
        let pipeline = StubPipeline {
            skip_map_point: true,
            ..Default::default()
        };
        let error = minify_sync(&pipeline, "let x = 1;", map_options()).unwrap_err();
        assert_eq!(error.kind(), &SyncErrorKind::SubstitutionFailed);
        // The suspended pipeline eventually completes without its own error.
        assert_eq!(block_on(error.resolve_detail()), None);
    }

    #[test]
    fn composer_failure_propagates_synchronously() {
        let pipeline = StubPipeline::default();
        let mut options = map_options();
        if let Some(map) = options.source_map.as_mut() {
            map.include_sources = true;
        }
        let error = minify_sync(&pipeline, "let x = 1;", options).unwrap_err();
        assert_eq!(
            error.kind(),
            &SyncErrorKind::Composer(ComposeError::SourceContentUnavailable)
        );
    }

    #[test]
    fn post_capture_failure_surfaces_as_pipeline_error() {
        let pipeline = StubPipeline {
            fail_emit: true,
            ..Default::default()
        };
        let error = minify_sync(&pipeline, "let x = 1;", MinifyOptions::default()).unwrap_err();
        assert!(matches!(error.kind(), SyncErrorKind::Pipeline(_)));
    }

    #[test]
    fn suspension_after_capture_returns_captured_state() {
        // A nonconforming pipeline that suspends after the capture sequence:
        // the driver still returns deterministically with what was captured.
        let pipeline = StubPipeline {
            suspend_after_capture: true,
            ..Default::default()
        };
        let result = minify_sync(&pipeline, "let x = 1;", MinifyOptions::default()).unwrap();
        assert!(result.code.is_none());
    }

    /// Completes without firing any extension point.
    struct SilentPipeline;

    impl Pipeline for SilentPipeline {
        fn minify(
            &self,
            _files: Files,
            _options: MinifyOptions,
            _icp: SharedInterceptor,
        ) -> LocalBoxFuture<'static, Result<MinifyResult, PipelineFailure>> {
            async { Ok(MinifyResult::default()) }.boxed_local()
        }
    }

    #[test]
    fn silent_pipeline_fails_capture() {
        let error = minify_sync(&SilentPipeline, "x", MinifyOptions::default()).unwrap_err();
        assert_eq!(error.kind(), &SyncErrorKind::CaptureFailed);
        assert_eq!(block_on(error.resolve_detail()), None);
    }

    #[test]
    fn ast_is_stripped_unless_requested() {
        let pipeline = StubPipeline::default();
        let result = minify_sync(&pipeline, "let x = 1;", MinifyOptions::default()).unwrap();
        assert!(result.ast.is_none());
    }
}
