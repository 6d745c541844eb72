//! Reference asynchronous minification pipeline.
//!
//! Parses with the standard SWC parser and re-emits with the SWC code
//! generator in minify mode. With `toplevel` set, single-binding literal
//! constants are propagated into their use sites and the emptied
//! declarations dropped before emission (the `compress` module).
//!
//! The pipeline's one asynchronous step is source-map consumption: when the
//! interception context does not substitute a composer, the future yields
//! once before building its own, modelling the async consumer of the real
//! pipeline. Every extension point of the
//! [call contract](sq_driver::contract) fires during the synchronous prefix
//! of the returned future.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use sq_driver::contract::{yield_once, Pipeline, PipelineFailure};
use sq_hooks::{MapStep, SharedInterceptor};
use sq_model::{Files, MinifyOptions, MinifyResult, SharedResult};
use sq_srcmap::{MapComposer, MappingRecord};
use swc_common::source_map::LineCol;
use swc_common::{sync::Lrc, BytePos, FileName, SourceMap, DUMMY_SP};
use swc_ecma_ast::{EsVersion, Module, Program};
use swc_ecma_codegen::{text_writer::JsWriter, Emitter, Node};
use swc_ecma_parser::{EsSyntax, Syntax};
use tracing::debug;

mod compress;

/// The bundled SWC-based pipeline.
#[derive(Debug, Default)]
pub struct SwcPipeline;

impl Pipeline for SwcPipeline {
    fn minify(
        &self,
        files: Files,
        options: MinifyOptions,
        icp: SharedInterceptor,
    ) -> LocalBoxFuture<'static, Result<MinifyResult, PipelineFailure>> {
        run(files, options, icp).boxed_local()
    }
}

async fn run(
    files: Files,
    options: MinifyOptions,
    icp: SharedInterceptor,
) -> Result<MinifyResult, PipelineFailure> {
    // Validation precedes everything, including the options-cloned point.
    if let Some(name) = options.extra.keys().next() {
        return Err(PipelineFailure::UnsupportedOption(name.clone()));
    }
    let structured = matches!(files, Files::Parsed(_));
    if structured != options.parse.structured {
        let message = if structured {
            "pre-parsed input requires `parse.structured`"
        } else {
            "`parse.structured` is set but the input is source text"
        };
        return Err(PipelineFailure::InvalidInput(message.to_string()));
    }

    let mut opts = options.clone();
    icp.borrow_mut().notify_options_cloned(&mut opts);

    let cm: Lrc<SourceMap> = Default::default();
    let mut program = parse(&cm, &files)?;
    debug!(structured, "parsed input");
    if opts.toplevel {
        compress::compress_toplevel(&mut program);
    }

    let result = SharedResult::default();
    if icp.borrow_mut().read_format_ast(opts.format.ast) {
        result.borrow_mut().ast = Some(program.clone());
        icp.borrow_mut().notify_result_assigned(&result);
    }

    let mut composer = if opts.map_requested() {
        let step = icp.borrow_mut().read_source_map(&opts, &files)?;
        match step {
            MapStep::Substitute(composer) => {
                debug!("using substituted synchronous composer");
                Some(composer)
            }
            MapStep::Async => {
                // The asynchronous boundary: a real consumer loads here.
                yield_once().await;
                let map_options = opts.source_map.clone().unwrap_or_default();
                Some(sq_srcmap::composer_for(&map_options, &files)?)
            }
        }
    } else {
        None
    };

    // Pre-parsed input has no source files to attribute positions to, so no
    // mappings are collected for it.
    let collect_mappings = composer.is_some() && !matches!(files, Files::Parsed(_));
    let (code, mappings) = emit(&cm, &program, collect_mappings)?;
    if let Some(composer) = composer.as_mut() {
        commit_mappings(&cm, composer, &mappings);
    }

    let map = match composer {
        Some(composer) => Some(composer.finish()?),
        None => None,
    };

    if opts.format.code_enabled() {
        let mut code = code;
        if let Some(url) = opts.source_map.as_ref().and_then(|m| m.url.as_deref()) {
            let target = if url == "inline" {
                map.as_ref().map(|map| {
                    format!(
                        "data:application/json;charset=utf-8;base64,{}",
                        BASE64.encode(map)
                    )
                })
            } else {
                Some(url.to_string())
            };
            if let Some(target) = target {
                code.push_str("\n//# sourceMappingURL=");
                code.push_str(&target);
            }
        }
        result.borrow_mut().code = Some(code);
    }
    if let Some(map) = map {
        result.borrow_mut().map = Some(map);
    }

    let out = result.borrow().clone();
    Ok(out)
}

fn parse(cm: &Lrc<SourceMap>, files: &Files) -> Result<Program, PipelineFailure> {
    match files {
        Files::Parsed(program) => Ok((**program).clone()),
        Files::Source(source) => {
            let module = parse_module(cm, Files::ANONYMOUS, source)?;
            Ok(Program::Module(module))
        }
        Files::Named(named) => {
            let mut body = Vec::new();
            for (name, content) in named {
                body.extend(parse_module(cm, name, content)?.body);
            }
            Ok(Program::Module(Module {
                span: DUMMY_SP,
                body,
                shebang: None,
            }))
        }
    }
}

fn parse_module(cm: &Lrc<SourceMap>, name: &str, source: &str) -> Result<Module, PipelineFailure> {
    let file = cm.new_source_file(
        Lrc::new(FileName::Custom(name.to_string())),
        source.to_string(),
    );
    swc_ecma_parser::parse_file_as_module(
        &file,
        Syntax::Es(EsSyntax::default()),
        EsVersion::latest(),
        None,
        &mut Vec::new(),
    )
    .map_err(|e| PipelineFailure::Parse {
        file: name.to_string(),
        message: e.kind().msg().to_string(),
    })
}

fn emit(
    cm: &Lrc<SourceMap>,
    program: &Program,
    collect_mappings: bool,
) -> Result<(String, Vec<(BytePos, LineCol)>), PipelineFailure> {
    let mut buf = Vec::new();
    let mut srcmap_buf: Option<Vec<(BytePos, LineCol)>> =
        collect_mappings.then(Vec::new);
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, srcmap_buf.as_mut());
        let mut emitter = Emitter {
            cfg: swc_ecma_codegen::Config::default()
                .with_target(EsVersion::latest())
                .with_minify(true),
            cm: cm.clone(),
            comments: None,
            wr: writer,
        };
        program
            .emit_with(&mut emitter)
            .map_err(|e| PipelineFailure::Emit(e.to_string()))?;
    }
    let code = String::from_utf8(buf).map_err(|e| PipelineFailure::Emit(e.to_string()))?;
    Ok((code, srcmap_buf.unwrap_or_default()))
}

/// Translate the emitter's raw buffer into composer records, in emission
/// order (generated positions are monotonically non-decreasing).
fn commit_mappings(cm: &Lrc<SourceMap>, composer: &mut MapComposer, mappings: &[(BytePos, LineCol)]) {
    for (pos, line_col) in mappings {
        if pos.is_dummy() {
            continue;
        }
        let loc = cm.lookup_char_pos(*pos);
        let source = match &*loc.file.name {
            FileName::Custom(name) => name.clone(),
            other => other.to_string(),
        };
        composer.add(&MappingRecord {
            gen_line: line_col.line,
            gen_col: line_col.col,
            orig_line: loc.line.saturating_sub(1) as u32,
            orig_col: loc.col.0 as u32,
            source: Some(source),
            name: None,
        });
    }
}
