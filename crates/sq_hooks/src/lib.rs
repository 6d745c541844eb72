//! One-shot interception registry.
//!
//! The pipeline is handed a per-invocation [`Interceptor`] and calls out to
//! it at four fixed points of its synchronous setup phase. The driver
//! installs callbacks on those points to observe pipeline-internal state and
//! to substitute the synchronous source-map composer for the pipeline's
//! asynchronous map step.
//!
//! Every slot is one-shot: the callback is taken out of the registry before
//! it runs, so a point fires at most once, recursive triggering is
//! impossible, and nothing leaks past one invocation. Callbacks receive
//! `&mut Interceptor` and may install further hooks while firing (the driver
//! uses this to arm the result capture from inside the format-ast read).

use std::cell::RefCell;
use std::rc::Rc;

use sq_model::{Files, MinifyOptions, SharedResult};
use sq_srcmap::{ComposeError, MapComposer};
use thiserror::Error;

/// Identifier of one extension point in the pipeline's call sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptPoint {
    /// The pipeline finished cloning and defaulting its options object.
    OptionsCloned,
    /// The pipeline reads its `format.ast` toggle.
    FormatAstRead,
    /// The pipeline is about to set up source-map consumption.
    SourceMapRead,
    /// The pipeline assigned its result object.
    ResultAssigned,
}

impl std::fmt::Display for InterceptPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InterceptPoint::OptionsCloned => "options-cloned",
            InterceptPoint::FormatAstRead => "format-ast-read",
            InterceptPoint::SourceMapRead => "source-map-read",
            InterceptPoint::ResultAssigned => "result-assigned",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The point already carries a hook that has not fired yet.
    #[error("a hook is already installed on {0}")]
    AlreadyInstalled(InterceptPoint),
}

/// Reply to the source-map-read point.
pub enum MapStep {
    /// Use this composer synchronously; do not start async consumption.
    Substitute(MapComposer),
    /// No substitution: the pipeline proceeds with its own async step.
    Async,
}

type OptionsClonedHook = Box<dyn FnOnce(&mut Interceptor, &mut MinifyOptions)>;
type FormatAstReadHook = Box<dyn FnOnce(&mut Interceptor, bool) -> bool>;
type SourceMapReadHook =
    Box<dyn FnOnce(&mut Interceptor, &MinifyOptions, &Files) -> Result<MapStep, ComposeError>>;
type ResultAssignedHook = Box<dyn FnOnce(&mut Interceptor, &SharedResult)>;

/// Per-invocation interception context threaded into one pipeline call.
#[derive(Default)]
pub struct Interceptor {
    options_cloned: Option<OptionsClonedHook>,
    format_ast_read: Option<FormatAstReadHook>,
    source_map_read: Option<SourceMapReadHook>,
    result_assigned: Option<ResultAssignedHook>,
    fired: Vec<InterceptPoint>,
}

/// Shared handle passed to the pipeline future.
pub type SharedInterceptor = Rc<RefCell<Interceptor>>;

impl Interceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with no hooks installed; every read returns its default.
    /// This is how the asynchronous path is driven.
    pub fn unhooked() -> SharedInterceptor {
        Rc::new(RefCell::new(Self::new()))
    }

    // -- installation (driver-facing) --

    pub fn on_options_cloned(
        &mut self,
        hook: impl FnOnce(&mut Interceptor, &mut MinifyOptions) + 'static,
    ) -> Result<(), HookError> {
        if self.options_cloned.is_some() {
            return Err(HookError::AlreadyInstalled(InterceptPoint::OptionsCloned));
        }
        self.options_cloned = Some(Box::new(hook));
        Ok(())
    }

    pub fn on_format_ast_read(
        &mut self,
        hook: impl FnOnce(&mut Interceptor, bool) -> bool + 'static,
    ) -> Result<(), HookError> {
        if self.format_ast_read.is_some() {
            return Err(HookError::AlreadyInstalled(InterceptPoint::FormatAstRead));
        }
        self.format_ast_read = Some(Box::new(hook));
        Ok(())
    }

    pub fn on_source_map_read(
        &mut self,
        hook: impl FnOnce(&mut Interceptor, &MinifyOptions, &Files) -> Result<MapStep, ComposeError>
            + 'static,
    ) -> Result<(), HookError> {
        if self.source_map_read.is_some() {
            return Err(HookError::AlreadyInstalled(InterceptPoint::SourceMapRead));
        }
        self.source_map_read = Some(Box::new(hook));
        Ok(())
    }

    pub fn on_result_assigned(
        &mut self,
        hook: impl FnOnce(&mut Interceptor, &SharedResult) + 'static,
    ) -> Result<(), HookError> {
        if self.result_assigned.is_some() {
            return Err(HookError::AlreadyInstalled(InterceptPoint::ResultAssigned));
        }
        self.result_assigned = Some(Box::new(hook));
        Ok(())
    }

    // -- firing (pipeline-facing) --

    /// The pipeline announces its freshly cloned, defaulted options object.
    /// The hook may adjust it in place.
    pub fn notify_options_cloned(&mut self, options: &mut MinifyOptions) {
        self.fired.push(InterceptPoint::OptionsCloned);
        if let Some(hook) = self.options_cloned.take() {
            hook(self, options);
        }
    }

    /// The pipeline reads its `format.ast` toggle; the hook may force the
    /// returned value.
    pub fn read_format_ast(&mut self, default: bool) -> bool {
        self.fired.push(InterceptPoint::FormatAstRead);
        match self.format_ast_read.take() {
            Some(hook) => hook(self, default),
            None => default,
        }
    }

    /// The pipeline asks how to perform its source-map step. Without a hook
    /// the answer is [`MapStep::Async`].
    pub fn read_source_map(
        &mut self,
        options: &MinifyOptions,
        files: &Files,
    ) -> Result<MapStep, ComposeError> {
        self.fired.push(InterceptPoint::SourceMapRead);
        match self.source_map_read.take() {
            Some(hook) => hook(self, options, files),
            None => Ok(MapStep::Async),
        }
    }

    /// The pipeline assigned its result object.
    pub fn notify_result_assigned(&mut self, result: &SharedResult) {
        self.fired.push(InterceptPoint::ResultAssigned);
        if let Some(hook) = self.result_assigned.take() {
            hook(self, result);
        }
    }

    // -- inspection --

    pub fn fired(&self, point: InterceptPoint) -> bool {
        self.fired.contains(&point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn hook_fires_at_most_once() {
        let count = Rc::new(Cell::new(0));
        let mut icp = Interceptor::new();
        let seen = count.clone();
        icp.on_format_ast_read(move |_, _| {
            seen.set(seen.get() + 1);
            true
        })
        .unwrap();

        assert!(icp.read_format_ast(false));
        // Second read falls through to the default: the hook is gone.
        assert!(!icp.read_format_ast(false));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn double_install_is_rejected() {
        let mut icp = Interceptor::new();
        icp.on_options_cloned(|_, _| {}).unwrap();
        let err = icp.on_options_cloned(|_, _| {}).unwrap_err();
        assert_eq!(
            err,
            HookError::AlreadyInstalled(InterceptPoint::OptionsCloned)
        );
    }

    #[test]
    fn nested_install_during_fire() {
        let captured = Rc::new(Cell::new(false));
        let mut icp = Interceptor::new();
        let flag = captured.clone();
        icp.on_format_ast_read(move |icp, default| {
            icp.on_result_assigned(move |_, _| flag.set(true)).unwrap();
            default
        })
        .unwrap();

        icp.read_format_ast(true);
        let result = SharedResult::default();
        icp.notify_result_assigned(&result);
        assert!(captured.get());
    }

    #[test]
    fn unhooked_reads_return_defaults() {
        let icp = Interceptor::unhooked();
        assert!(!icp.borrow_mut().read_format_ast(false));
        let step = icp
            .borrow_mut()
            .read_source_map(&MinifyOptions::default(), &Files::Source(String::new()))
            .unwrap();
        assert!(matches!(step, MapStep::Async));
    }

    #[test]
    fn fired_tracks_points() {
        let mut icp = Interceptor::new();
        icp.on_options_cloned(|_, _| {}).unwrap();
        icp.on_source_map_read(|_, _, _| Ok(MapStep::Async)).unwrap();

        let mut options = MinifyOptions::default();
        icp.notify_options_cloned(&mut options);

        assert!(icp.fired(InterceptPoint::OptionsCloned));
        assert!(!icp.fired(InterceptPoint::SourceMapRead));
    }
}
