//! Tracectx CLI
//!
//! Turns a trace/log bundle into model-ready context.
//!
//! # Usage
//!
//! ```bash
//! tracectx --help
//! tracectx tree bundle.json --span-feature "span latency"
//! tracectx chunk bundle.json --filter "log level:equal:error" --chunk-size 8000
//! ```
//!
//! A bundle is a JSON document holding either a flat `spans` list (with
//! optional `references`) or a nested `root` span, plus a `logs` list of
//! span-ID-to-entries maps.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use context::config::{ChunkConfig, ChunkOverrides, ChunkStrategy};
use context::feature::{FeatureOp, FeatureSelection, LogFeature, SpanFeature};
use context::filter::{LogFilter, LogPredicate};
use context::hierarchy::{build_span_hierarchy, SpanRecord};
use context::models::{sort_spans_recursively, Span};
use context::pipeline::{build_context, ContextRequest};
use context::tree::LogBatch;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Tracectx CLI - build bounded model context from traces and logs
#[derive(Parser)]
#[command(name = "tracectx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the projected span tree
    Tree(ContextArgs),

    /// Print the projected span tree as size-bounded fragments
    Chunk {
        #[command(flatten)]
        context: ContextArgs,

        #[command(flatten)]
        chunking: ChunkArgs,

        /// Print fragments as a JSON array of strings
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ContextArgs {
    /// Bundle file with spans and logs
    bundle: PathBuf,

    /// Span attribute to include (repeatable, default: all)
    #[arg(long = "span-feature", value_name = "FEATURE")]
    span_features: Vec<SpanFeature>,

    /// Log attribute to include (repeatable, default: all)
    #[arg(long = "log-feature", value_name = "FEATURE")]
    log_features: Vec<LogFeature>,

    /// Keep only logs matching FEATURE:OP:VALUE (repeatable, all must hold)
    #[arg(long = "filter", value_name = "FEATURE:OP:VALUE", value_parser = parse_predicate)]
    filters: Vec<LogPredicate>,

    /// Compare source context lines when filtering on them
    #[arg(long)]
    source_context: bool,
}

#[derive(Args)]
struct ChunkArgs {
    /// Chunking strategy: semantic or sequential
    #[arg(long)]
    strategy: Option<ChunkStrategy>,

    /// Character budget per fragment
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Minimum size of a trailing log batch (semantic)
    #[arg(long)]
    min_chunk_size: Option<usize>,

    /// Characters shared by consecutive windows (sequential)
    #[arg(long)]
    overlap_size: Option<usize>,
}

/// Input document.
#[derive(Debug, Default, Deserialize)]
struct Bundle {
    #[serde(default)]
    root: Option<Span>,
    #[serde(default)]
    spans: Vec<SpanRecord>,
    #[serde(default)]
    logs: Vec<LogBatch>,
}

impl Bundle {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bundle {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid bundle {}", path.display()))
    }

    /// Returns the root span to render and the log batches.
    fn into_parts(self) -> Result<(Span, Vec<LogBatch>)> {
        if let Some(root) = self.root {
            return Ok((root, self.logs));
        }

        let mut roots = build_span_hierarchy(self.spans);
        sort_spans_recursively(&mut roots);
        let mut roots = roots.into_iter();
        let root = roots.next().context("Bundle contains no valid spans")?;

        let ignored: Vec<String> = roots.map(|span| span.id).collect();
        if !ignored.is_empty() {
            tracing::warn!(
                root = %root.id,
                ignored = ?ignored,
                "Bundle has several root spans; using the earliest"
            );
        }
        Ok((root, self.logs))
    }
}

impl ContextArgs {
    fn selection(&self) -> FeatureSelection {
        let defaults = FeatureSelection::all();
        FeatureSelection {
            span_features: if self.span_features.is_empty() {
                defaults.span_features
            } else {
                self.span_features.clone()
            },
            log_features: if self.log_features.is_empty() {
                defaults.log_features
            } else {
                self.log_features.clone()
            },
        }
    }

    fn filter(&self) -> Option<LogFilter> {
        if self.filters.is_empty() {
            return None;
        }
        Some(LogFilter::new(self.filters.clone()).with_source_context(self.source_context))
    }

    fn request(&self, chunk: ChunkConfig) -> ContextRequest {
        let request = ContextRequest::new()
            .with_selection(self.selection())
            .with_chunk_config(chunk);
        match self.filter() {
            Some(filter) => request.with_filter(filter),
            None => request,
        }
    }
}

impl ChunkArgs {
    /// Applies flags on top of the environment configuration.
    fn config(&self) -> Result<ChunkConfig> {
        let config = ChunkConfig::from_env()?.with_overrides(ChunkOverrides {
            strategy: self.strategy,
            chunk_size: self.chunk_size,
            min_chunk_size: self.min_chunk_size,
            overlap_size: self.overlap_size,
        })?;
        Ok(config)
    }
}

/// Parses `FEATURE:OP:VALUE`; the value may itself contain colons.
fn parse_predicate(raw: &str) -> Result<LogPredicate, String> {
    let mut parts = raw.splitn(3, ':');
    let (Some(feature), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected FEATURE:OP:VALUE, got '{raw}'"));
    };
    let feature: LogFeature = feature.parse().map_err(|err| format!("{err}"))?;
    let op: FeatureOp = op.parse().map_err(|err| format!("{err}"))?;
    Ok(LogPredicate::new(feature, op, value))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Tree(args) => {
            let (root, logs) = Bundle::load(&args.bundle)?.into_parts()?;
            let rendered = build_context(&root, &logs, &args.request(ChunkConfig::default()))?;
            writeln!(out, "{}", rendered.text)?;
        }
        Commands::Chunk {
            context,
            chunking,
            json,
        } => {
            let chunk = chunking.config()?;
            let (root, logs) = Bundle::load(&context.bundle)?.into_parts()?;
            let rendered = build_context(&root, &logs, &context.request(chunk))?;

            if json {
                let fragments: Vec<String> = rendered.chunks()?.collect();
                tracing::info!(fragments = fragments.len(), strategy = %chunk.strategy, "Chunked context");
                writeln!(out, "{}", serde_json::to_string_pretty(&fragments)?)?;
            } else {
                let mut count = 0usize;
                for (i, fragment) in rendered.chunks()?.enumerate() {
                    writeln!(
                        out,
                        "--- fragment {} ({} chars) ---",
                        i + 1,
                        fragment.chars().count()
                    )?;
                    writeln!(out, "{fragment}")?;
                    count += 1;
                }
                tracing::info!(fragments = count, strategy = %chunk.strategy, "Chunked context");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_tree_command() {
        let cli = Cli::try_parse_from(["tracectx", "tree", "bundle.json"]).unwrap();
        let Commands::Tree(args) = cli.command else {
            panic!("expected tree command");
        };
        assert_eq!(args.bundle, PathBuf::from("bundle.json"));
        assert!(args.filter().is_none());
        assert_eq!(args.selection(), FeatureSelection::all());
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["tracectx"]).is_err());
    }

    #[test]
    fn test_cli_chunk_flags() {
        let cli = Cli::try_parse_from([
            "tracectx",
            "chunk",
            "bundle.json",
            "--span-feature",
            "span latency",
            "--log-feature",
            "log level",
            "--log-feature",
            "log message value",
            "--filter",
            "log level:equal:error",
            "--strategy",
            "sequential",
            "--chunk-size",
            "1000",
            "--overlap-size",
            "100",
            "--json",
        ])
        .unwrap();

        let Commands::Chunk {
            context,
            chunking,
            json,
        } = cli.command
        else {
            panic!("expected chunk command");
        };
        assert!(json);
        assert_eq!(context.span_features, vec![SpanFeature::Latency]);
        assert_eq!(context.log_features, vec![LogFeature::Level, LogFeature::Message]);
        assert_eq!(
            context.filters,
            vec![LogPredicate::new(LogFeature::Level, FeatureOp::Equal, "error")]
        );
        assert_eq!(chunking.strategy, Some(ChunkStrategy::Sequential));
        assert_eq!(chunking.chunk_size, Some(1000));
        assert_eq!(chunking.overlap_size, Some(100));
    }

    #[test]
    fn test_chunk_flags_override_config() {
        let cli = Cli::try_parse_from([
            "tracectx",
            "chunk",
            "bundle.json",
            "--strategy",
            "sequential",
            "--chunk-size",
            "1000",
            "--overlap-size",
            "100",
        ])
        .unwrap();
        let Commands::Chunk { chunking, .. } = cli.command else {
            panic!("expected chunk command");
        };

        let config = chunking.config().unwrap();
        assert_eq!(config.strategy, ChunkStrategy::Sequential);
        assert_eq!(config.sequential.chunk_size, 1000);
        assert_eq!(config.sequential.overlap_size, 100);
    }

    #[test]
    fn test_cli_rejects_unknown_feature() {
        let result = Cli::try_parse_from(["tracectx", "tree", "b.json", "--span-feature", "color"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_predicate_keeps_colons_in_value() {
        let predicate = parse_predicate("log utc timestamp:contains:12:00").unwrap();
        assert_eq!(predicate.feature, LogFeature::Timestamp);
        assert_eq!(predicate.op, FeatureOp::Contains);
        assert_eq!(predicate.value, "12:00");
    }

    #[test]
    fn test_parse_predicate_errors() {
        assert!(parse_predicate("log level:equal").is_err());
        assert!(parse_predicate("log level:like:x").is_err());
    }

    #[test]
    fn test_bundle_flat_spans_use_earliest_root() {
        let raw = r#"{
            "spans": [
                {"id": "late", "name": "b", "start_time": 5.0, "end_time": 6.0, "duration": 1.0},
                {"id": "early", "name": "a", "start_time": 1.0, "end_time": 3.0, "duration": 2.0},
                {"id": "child", "name": "c", "start_time": 1.5, "end_time": 2.0, "duration": 0.5,
                 "references": [{"ref_type": "CHILD_OF", "span_id": "early"}]}
            ],
            "logs": [{"child": [{"time": 1.6, "level": "ERROR", "message": "boom"}]}]
        }"#;
        let bundle: Bundle = serde_json::from_str(raw).unwrap();
        let (root, logs) = bundle.into_parts().unwrap();

        assert_eq!(root.id, "early");
        assert_eq!(root.spans[0].id, "child");
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn test_bundle_nested_root() {
        let raw = r#"{
            "root": {"id": "r", "name": "main", "start_time": 0, "end_time": 1, "duration": 1,
                     "spans": [{"id": "c", "name": "work", "start_time": 0.1, "end_time": 0.2, "duration": 0.1}]}
        }"#;
        let bundle: Bundle = serde_json::from_str(raw).unwrap();
        let (root, logs) = bundle.into_parts().unwrap();

        assert_eq!(root.spans.len(), 1);
        assert!(logs.is_empty());
    }

    #[test]
    fn test_empty_bundle_is_an_error() {
        assert!(Bundle::default().into_parts().is_err());
    }
}
