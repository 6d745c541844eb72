//! Synchronous source-map composition.
//!
//! [`MapComposer`] builds the output map for one minification run. When the
//! input itself carries a map (`sourceMap.content`), every generated mapping
//! is translated through it, so positions trace back to the original source
//! across multiple minification passes. This is the synchronous replacement
//! for the pipeline's asynchronous map-consumption step.

use std::collections::BTreeMap;

use sq_model::{Files, SourceMapOptions};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// `sourceMap.content` was present but not a valid source map.
    #[error("invalid input source map: {0}")]
    InvalidOriginalMap(String),
    /// `includeSources` was requested but the input is not a name → content
    /// mapping, so content cannot be attributed to a named source.
    #[error("original source content unavailable")]
    SourceContentUnavailable,
    #[error("failed to serialize source map: {0}")]
    Serialize(String),
}

/// One mapping emitted by the pipeline while printing output.
///
/// Lines and columns are zero-based. `orig_line`/`orig_col` are positions in
/// the pipeline's *input*, which the composer may further translate through
/// the input's own map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingRecord {
    pub gen_line: u32,
    pub gen_col: u32,
    pub orig_line: u32,
    pub orig_col: u32,
    pub source: Option<String>,
    pub name: Option<String>,
}

/// Configuration for [`MapComposer::new`].
#[derive(Debug, Clone, Default)]
pub struct ComposerConfig {
    /// `file` field of the produced map.
    pub file: Option<String>,
    /// `sourceRoot` field of the produced map.
    pub root: Option<String>,
    /// Pre-existing map (JSON) describing the input's provenance.
    pub orig: Option<String>,
    /// Added to original lines on commit, for embedding into a larger file.
    pub orig_line_diff: u32,
    /// Added to generated lines on commit.
    pub dest_line_diff: u32,
}

/// Builder for the composed output map.
pub struct MapComposer {
    builder: sourcemap::SourceMapBuilder,
    orig: Option<sourcemap::SourceMap>,
    orig_line_diff: u32,
    dest_line_diff: u32,
}

impl std::fmt::Debug for MapComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapComposer")
            .field("orig_line_diff", &self.orig_line_diff)
            .field("dest_line_diff", &self.dest_line_diff)
            .finish_non_exhaustive()
    }
}

impl MapComposer {
    /// Parse `config.orig` (if present) into a queryable map and carry its
    /// embedded source contents forward into the output.
    pub fn new(config: ComposerConfig) -> Result<Self, ComposeError> {
        let mut builder = sourcemap::SourceMapBuilder::new(config.file.as_deref());
        builder.set_source_root(config.root);

        let orig = match config.orig {
            Some(json) => {
                let map = sourcemap::SourceMap::from_slice(json.as_bytes())
                    .map_err(|e| ComposeError::InvalidOriginalMap(e.to_string()))?;
                for idx in 0..map.get_source_count() {
                    if let (Some(source), Some(contents)) =
                        (map.get_source(idx), map.get_source_contents(idx))
                    {
                        let src_id = builder.add_source(source);
                        builder.set_source_contents(src_id, Some(contents));
                    }
                }
                Some(map)
            }
            None => None,
        };

        Ok(MapComposer {
            builder,
            orig,
            orig_line_diff: config.orig_line_diff,
            dest_line_diff: config.dest_line_diff,
        })
    }

    /// Commit one mapping.
    ///
    /// With an active original map, the record's input position is looked up
    /// in it first. Positions that resolve to no source (synthetic code, or
    /// regions the original map does not cover) are dropped; otherwise the
    /// looked-up source, line, column, and name replace the record's own,
    /// the name falling back to the record's when the lookup has none.
    pub fn add(&mut self, record: &MappingRecord) {
        let mut source = record.source.clone();
        let mut orig_line = record.orig_line;
        let mut orig_col = record.orig_col;
        let mut name = record.name.clone();

        if let Some(orig) = &self.orig {
            let Some(token) = orig.lookup_token(record.orig_line, record.orig_col) else {
                return;
            };
            let Some(token_source) = token.get_source() else {
                return;
            };
            source = Some(token_source.to_string());
            orig_line = token.get_src_line();
            orig_col = token.get_src_col();
            name = token.get_name().map(str::to_string).or(name);
        }

        self.builder.add(
            record.gen_line + self.dest_line_diff,
            record.gen_col,
            orig_line + self.orig_line_diff,
            orig_col,
            source.as_deref(),
            name.as_deref(),
            false,
        );
    }

    /// Embed original content for a named source.
    pub fn set_source_content(&mut self, name: &str, content: &str) {
        let src_id = self.builder.add_source(name);
        self.builder.set_source_contents(src_id, Some(content));
    }

    /// Release the original map early. Safe to call at any point, including
    /// after a partially failed construction; dropping the composer has the
    /// same effect.
    pub fn dispose(&mut self) {
        self.orig = None;
    }

    /// Serialize the composed map to JSON, releasing all resources.
    pub fn finish(mut self) -> Result<String, ComposeError> {
        self.dispose();
        let map = self.builder.into_sourcemap();
        let mut out = Vec::new();
        map.to_writer(&mut out)
            .map_err(|e| ComposeError::Serialize(e.to_string()))?;
        String::from_utf8(out).map_err(|e| ComposeError::Serialize(e.to_string()))
    }
}

/// Build the composer for one run from the pipeline's `sourceMap` options.
///
/// When `includeSources` is requested the input must be a name → content
/// mapping; a single anonymous source or a pre-parsed program has no named
/// content to embed and fails with [`ComposeError::SourceContentUnavailable`].
pub fn composer_for(
    map_options: &SourceMapOptions,
    files: &Files,
) -> Result<MapComposer, ComposeError> {
    let mut composer = MapComposer::new(ComposerConfig {
        file: map_options.filename.clone(),
        root: map_options.root.clone(),
        orig: map_options.content.clone(),
        ..Default::default()
    })?;

    if map_options.include_sources {
        match files {
            Files::Named(named) => {
                for (name, content) in named {
                    composer.set_source_content(name, content);
                }
            }
            Files::Source(_) | Files::Parsed(_) => {
                return Err(ComposeError::SourceContentUnavailable);
            }
        }
    }

    Ok(composer)
}

/// Convenience for tests and callers that already hold named sources.
pub fn named_files(entries: &[(&str, &str)]) -> Files {
    Files::Named(
        entries
            .iter()
            .map(|(name, content)| (name.to_string(), content.to_string()))
            .collect::<BTreeMap<_, _>>(),
    )
}
