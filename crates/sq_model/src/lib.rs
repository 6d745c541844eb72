//! Shared data model for squish.
//!
//! Mirrors the option and result schema of the asynchronous minification
//! pipeline so the synchronous driver accepts exactly the same inputs:
//!
//! - [`Files`] — source input in its three accepted shapes
//! - [`MinifyOptions`] — nested `format` / `sourceMap` configuration
//! - [`MinifyResult`] — `{ code?, map?, ast? }` depending on options

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use swc_ecma_ast::Program;

/// Source input for one minification run.
///
/// A raw string conforms to `Source`, a name → content mapping to `Named`,
/// and a pre-parsed program (when `parse.structured` is set) to `Parsed`.
#[derive(Debug, Clone, PartialEq)]
pub enum Files {
    /// A single anonymous source string, attributed to source name `"0"`.
    Source(String),
    /// Named sources, minified together in name order.
    Named(BTreeMap<String, String>),
    /// A pre-parsed program; no parsing occurs.
    Parsed(Box<Program>),
}

impl Files {
    /// Source name used for [`Files::Source`] input.
    pub const ANONYMOUS: &'static str = "0";

    pub fn is_named(&self) -> bool {
        matches!(self, Files::Named(_))
    }
}

impl From<&str> for Files {
    fn from(source: &str) -> Self {
        Files::Source(source.to_string())
    }
}

impl From<String> for Files {
    fn from(source: String) -> Self {
        Files::Source(source)
    }
}

impl From<BTreeMap<String, String>> for Files {
    fn from(named: BTreeMap<String, String>) -> Self {
        Files::Named(named)
    }
}

impl From<Program> for Files {
    fn from(program: Program) -> Self {
        Files::Parsed(Box::new(program))
    }
}

/// Options accepted by the pipeline, deserializable from the same camelCase
/// JSON schema the asynchronous pipeline documents.
///
/// Unknown option names are collected into `extra` and rejected by the
/// pipeline during validation, before any extension point fires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MinifyOptions {
    pub parse: ParseOptions,
    pub toplevel: bool,
    pub format: FormatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<SourceMapOptions>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParseOptions {
    /// Input is a single pre-parsed program rather than source text. The
    /// pipeline rejects the call when this does not match the input shape.
    pub structured: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormatOptions {
    /// Emit minified code. `None` means the default (enabled); an explicit
    /// `Some(false)` suppresses code output and the source-map step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<bool>,
    /// Attach the program AST to the result.
    pub ast: bool,
}

impl FormatOptions {
    /// Whether code generation is enabled (the default when unset).
    pub fn code_enabled(&self) -> bool {
        self.code.unwrap_or(true)
    }
}

/// `sourceMap` sub-options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceMapOptions {
    /// `file` field of the produced map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Appended to the code as a `//# sourceMappingURL=` comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// `sourceRoot` field of the produced map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// An existing map (JSON) describing the provenance of the *input*;
    /// composed against, so multi-pass minification traces back to the
    /// original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Embed original source contents into the map.
    pub include_sources: bool,
}

impl MinifyOptions {
    /// Whether a source map should be produced at all: one was requested and
    /// code generation is not disabled.
    pub fn map_requested(&self) -> bool {
        self.source_map.is_some() && self.format.code_enabled()
    }
}

/// Result of one minification run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinifyResult {
    pub code: Option<String>,
    pub map: Option<String>,
    pub ast: Option<Program>,
}

/// The pipeline's result object, shared so the driver can capture it before
/// the pipeline's future resolves.
pub type SharedResult = Rc<RefCell<MinifyResult>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_camel_case() {
        let opts: MinifyOptions = serde_json::from_str(
            r#"{"toplevel": true, "sourceMap": {"filename": "out.js", "includeSources": true}}"#,
        )
        .unwrap();
        assert!(opts.toplevel);
        let map = opts.source_map.unwrap();
        assert_eq!(map.filename.as_deref(), Some("out.js"));
        assert!(map.include_sources);
    }

    #[test]
    fn unknown_options_collect_into_extra() {
        let opts: MinifyOptions =
            serde_json::from_str(r#"{"nonExistentOption": true}"#).unwrap();
        assert!(opts.extra.contains_key("nonExistentOption"));
    }

    #[test]
    fn map_requested_respects_disabled_code() {
        let mut opts = MinifyOptions {
            source_map: Some(SourceMapOptions::default()),
            ..Default::default()
        };
        assert!(opts.map_requested());
        opts.format.code = Some(false);
        assert!(!opts.map_requested());
    }

    #[test]
    fn files_conform_from_string() {
        let files: Files = "const x = 1;".into();
        assert_eq!(files, Files::Source("const x = 1;".to_string()));
        assert!(!files.is_named());
    }
}
