use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::executor::block_on;
use sq_driver::minify_sync;
use sq_model::{Files, FormatOptions, MinifyOptions, SourceMapOptions};
use sq_pipeline::SwcPipeline;

#[derive(Parser)]
#[command(name = "sq", about = "squish — synchronous driver for the async minification pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Minify input files synchronously and emit code (and optionally a map).
    Minify {
        /// Input .js files. A single file is one anonymous source; several
        /// files form a name → content mapping keyed by path.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output file (stdout if omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Generate a source map next to the output.
        #[arg(long)]
        source_map: bool,
        /// Existing source map describing the input's provenance; the
        /// produced map is composed against it.
        #[arg(long)]
        map_content: Option<PathBuf>,
        /// Embed original source contents into the map (named inputs only).
        #[arg(long)]
        include_sources: bool,
        /// Value for the appended sourceMappingURL comment.
        #[arg(long)]
        map_url: Option<String>,
        /// Fold and drop top-level constants.
        #[arg(long)]
        toplevel: bool,
        /// Attach the program AST to the result and dump it as JSON.
        #[arg(long)]
        ast: bool,
        /// Suppress code output.
        #[arg(long)]
        no_code: bool,
        /// Raw options JSON; replaces all option flags when given.
        #[arg(long, conflicts_with_all = ["source_map", "map_content", "include_sources", "map_url", "toplevel", "ast", "no_code"])]
        options: Option<String>,
    },
    /// Parse the input and dump its AST as JSON.
    Parse { input: PathBuf },
    /// Parse and validate the input without emitting code.
    Check { input: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Minify {
            inputs,
            output,
            source_map,
            map_content,
            include_sources,
            map_url,
            toplevel,
            ast,
            no_code,
            options,
        } => {
            let files = read_files(&inputs)?;
            let options = match options {
                Some(json) => {
                    serde_json::from_str(&json).context("failed to parse --options JSON")?
                }
                None => {
                    let mut opts = MinifyOptions {
                        toplevel,
                        format: FormatOptions {
                            code: no_code.then_some(false),
                            ast,
                        },
                        ..Default::default()
                    };
                    if source_map || map_content.is_some() {
                        let content = map_content
                            .map(|path| {
                                std::fs::read_to_string(&path).with_context(|| {
                                    format!("failed to read {}", path.display())
                                })
                            })
                            .transpose()?;
                        opts.source_map = Some(SourceMapOptions {
                            filename: output.as_ref().map(|p| p.display().to_string()),
                            url: map_url,
                            content,
                            include_sources,
                            ..Default::default()
                        });
                    }
                    opts
                }
            };

            let result = run_sync(files, options)?;

            if let Some(code) = &result.code {
                match &output {
                    Some(path) => std::fs::write(path, code)?,
                    None => println!("{code}"),
                }
            }
            if let Some(map) = &result.map {
                let map_path = map_output_path(output.as_deref(), &inputs[0]);
                std::fs::write(&map_path, map)?;
                eprintln!("source map written to {}", map_path.display());
            }
            if let Some(program) = &result.ast {
                let json = serde_json::to_string_pretty(program)?;
                match &output {
                    Some(path) => {
                        let ast_path = format!("{}.ast.json", path.display());
                        std::fs::write(&ast_path, json)?;
                        eprintln!("AST written to {ast_path}");
                    }
                    None => println!("{json}"),
                }
            }
        }
        Commands::Parse { input } => {
            let files = read_files(std::slice::from_ref(&input))?;
            let options = MinifyOptions {
                format: FormatOptions {
                    code: Some(false),
                    ast: true,
                },
                ..Default::default()
            };
            let result = run_sync(files, options)?;
            if let Some(program) = &result.ast {
                println!("{}", serde_json::to_string_pretty(program)?);
            }
        }
        Commands::Check { input } => {
            let files = read_files(std::slice::from_ref(&input))?;
            let options = MinifyOptions {
                format: FormatOptions {
                    code: Some(false),
                    ..Default::default()
                },
                ..Default::default()
            };
            run_sync(files, options)?;
            eprintln!("OK: {}", input.display());
        }
    }

    Ok(())
}

fn read_files(inputs: &[PathBuf]) -> Result<Files> {
    let read = |path: &Path| {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    };
    if let [input] = inputs {
        return Ok(Files::Source(read(input)?));
    }
    let mut named = BTreeMap::new();
    for input in inputs {
        named.insert(input.display().to_string(), read(input)?);
    }
    Ok(Files::Named(named))
}

fn map_output_path(output: Option<&Path>, first_input: &Path) -> PathBuf {
    let base = output.unwrap_or(first_input);
    PathBuf::from(format!("{}.map", base.display()))
}

/// Run the synchronous driver and flatten its failure channel: when the full
/// diagnosis only exists on the asynchronous path, drive the attached
/// pipeline future to completion and report the underlying error.
fn run_sync(files: Files, options: MinifyOptions) -> Result<sq_model::MinifyResult> {
    minify_sync(&SwcPipeline, files, options).or_else(|error| {
        let (kind, detail) = error.into_parts();
        let underlying = detail.and_then(|detail| block_on(detail.resolve()));
        match underlying {
            Some(failure) => Err(anyhow!(failure).context(kind.to_string())),
            None => Err(anyhow!(kind)),
        }
    })
}
