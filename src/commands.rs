//! CLI command implementations.
//!
//! Each `run_*` function backs one `mmi` subcommand. Results go to stdout,
//! either human-readable or as JSON with `--json`; logs go to stderr.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::AppContext;
use crate::filter::MetadataFilter;
use crate::models::{RunReport, RunStatus, SearchResultItem, UnitResponse};
use crate::search::Query;
use crate::store::SqliteStore;

/// Creates the database file and schema. Idempotent.
pub async fn run_init(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.db.path, &config.collection.name).await?;
    store.pool().close().await;
    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}

pub async fn run_ingest(
    ctx: &AppContext,
    path: &Path,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let pipeline = ctx.pipeline().await?;
    let report = pipeline.ingest_path(path, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(path, &report);
    }

    if let RunStatus::Aborted { reason } = &report.status {
        bail!("ingestion aborted: {}", reason);
    }
    Ok(())
}

fn print_report(path: &Path, report: &RunReport) {
    println!("ingest {}", path.display());
    println!("  files processed: {}", report.files_processed.len());
    println!("  files failed: {}", report.files_failed.len());
    for failure in &report.files_failed {
        println!("    {}: {}", failure.file, failure.reason);
    }
    println!("  files skipped: {}", report.files_skipped.len());
    println!("  units indexed: {}", report.total_units_indexed);
    let status = match &report.status {
        RunStatus::FullyIndexed => "fully_indexed".to_string(),
        RunStatus::PartiallyIndexed => "partially_indexed".to_string(),
        RunStatus::Aborted { reason } => format!("aborted ({})", reason),
    };
    println!("  status: {}", status);
}

pub struct SearchArgs<'a> {
    pub text: Option<&'a str>,
    pub image: Option<&'a Path>,
    pub k: Option<usize>,
    pub filters: &'a [String],
    pub json: bool,
}

pub async fn run_search(ctx: &AppContext, args: SearchArgs<'_>) -> Result<()> {
    let query = match (args.text, args.image) {
        (Some(text), None) => Query::Text(text.to_string()),
        (None, Some(image)) => Query::Image(
            tokio::fs::read(image)
                .await
                .with_context(|| format!("Failed to read image: {}", image.display()))?,
        ),
        _ => bail!("provide either a query text or --image, not both"),
    };
    let filter = MetadataFilter::parse_cli(args.filters)?;
    let k = args.k.unwrap_or(ctx.config.retrieval.default_k);

    let hits = ctx.retriever().await?.search(&query, k, &filter).await?;
    let results: Vec<SearchResultItem> = hits.iter().map(SearchResultItem::from).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, r) in results.iter().enumerate() {
        let kind = r.metadata.get("type").map(|v| v.to_string()).unwrap_or_default();
        let source = r
            .metadata
            .get("source_file")
            .map(|v| v.to_string())
            .unwrap_or_default();
        println!("{}. [{:.4}] {}  ({}, {})", rank + 1, r.score, r.id, kind, source);
        println!("   {}", snippet(&r.document_text, 160));
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

pub async fn run_get(ctx: &AppContext, id: &str, json: bool) -> Result<()> {
    let unit = ctx.indexer().await?.fetch(id).await?;
    let response = UnitResponse::from(&unit);

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("--- Unit ---");
    println!("id:       {}", response.id);
    println!("dims:     {}", response.dims);
    for (key, value) in &response.metadata {
        println!("{:<9} {}", format!("{}:", key), value);
    }
    println!();
    println!("{}", response.document_text);
    Ok(())
}

pub async fn run_delete(ctx: &AppContext, id: &str) -> Result<()> {
    ctx.indexer().await?.delete(id).await?;
    println!("deleted {}", id);
    Ok(())
}

pub async fn run_count(ctx: &AppContext) -> Result<()> {
    let indexer = ctx.indexer().await?;
    println!("{}", indexer.count().await?);
    Ok(())
}
