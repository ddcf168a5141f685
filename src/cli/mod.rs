//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use crate::config::load_settings;
use crate::models::EntityKind;
use crate::search::{SearchMode, SearchOptions};
use crate::service::{IngestOptions, ScansiftService, SourceSpec};
use crate::worker::{PendingPagesWorker, SiteIngestWorker};

#[derive(Parser)]
#[command(name = "scansift")]
#[command(about = "Ingestion, OCR, and search for scan-quality document corpora")]
#[command(version)]
pub struct Cli {
    /// Data directory (database and blob store)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Crawl a source and list what would be ingested (no downloads)
    Crawl {
        /// "site" for the configured site, or a base URL
        source: Option<String>,
    },

    /// Crawl a source and ingest the discovered files
    Ingest {
        /// "site" for the configured site, or a base URL
        source: Option<String>,
        /// Limit number of downloads (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Leave pages for the worker instead of running OCR inline
        #[arg(long)]
        no_process: bool,
        /// Re-download documents that are already stored
        #[arg(long)]
        refresh: bool,
    },

    /// Ingest a local file
    Enqueue {
        /// Path to a PDF or image file
        file: PathBuf,
        /// Source URL to record for the document
        #[arg(long)]
        url: Option<String>,
        /// Fail if identical bytes were already ingested
        #[arg(long)]
        strict: bool,
    },

    /// Run the background worker loops until interrupted
    Worker {
        /// Only run the pending-pages loop
        #[arg(long)]
        pages_only: bool,
        /// Only run the periodic site-ingest loop
        #[arg(long)]
        site_only: bool,
    },

    /// Search indexed pages
    Search {
        /// keyword | phrase | fuzzy | entity | semantic
        mode: String,
        /// Query text (entity value for entity mode)
        query: String,
        /// Max results
        #[arg(short, long)]
        limit: Option<u32>,
        /// Entity type for entity mode (name|email|phone|date|keyword)
        #[arg(short = 't', long)]
        entity_type: Option<String>,
    },

    /// List detected entities
    Entities {
        /// Filter by type (name|email|phone|date|keyword)
        #[arg(short = 't', long)]
        entity_type: Option<String>,
        /// Filter by document id
        #[arg(long)]
        document: Option<String>,
        /// Max results
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show pipeline counts
    Status,

    /// Return failed pages to the pending queue
    RetryFailed,
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.data.as_deref());

    match cli.command {
        Commands::Init => {
            let service = ScansiftService::open(settings)?;
            println!(
                "Initialized data directory at {}",
                service.settings().data_dir.display()
            );
            println!(
                "OCR engine: {} ({})",
                service.settings().ocr.engine,
                service.pipeline().coordinator().availability_hint()
            );
            Ok(())
        }

        Commands::Crawl { source } => {
            let service = ScansiftService::open(settings)?;
            let source = SourceSpec::resolve(source.as_deref(), service.settings())?;
            let outcome = service.preview_source(&source).await?;

            for descriptor in &outcome.descriptors {
                match &descriptor.exclude_reason {
                    Some(reason) => {
                        println!("EXCLUDED [{reason}] {}", descriptor.url)
                    }
                    None => {
                        let section = if descriptor.section_label.is_empty() {
                            "-"
                        } else {
                            descriptor.section_label.as_str()
                        };
                        println!("{} ({})", descriptor.url, section)
                    }
                }
            }
            let excluded = outcome
                .descriptors
                .iter()
                .filter(|d| d.is_excluded())
                .count();
            println!(
                "\n{} discovered, {} excluded, {} errors",
                outcome.descriptors.len(),
                excluded,
                outcome.errors.len()
            );
            for error in &outcome.errors {
                eprintln!("error: {error}");
            }
            Ok(())
        }

        Commands::Ingest {
            source,
            limit,
            no_process,
            refresh,
        } => {
            let service = ScansiftService::open(settings)?;
            let source = SourceSpec::resolve(source.as_deref(), service.settings())?;
            let opts = IngestOptions {
                limit,
                process_pages: !no_process,
                skip_existing: !refresh,
            };
            let report = service.ingest_from_source(&source, &opts).await?;
            println!(
                "discovered {}, excluded {}, downloaded {}, processed {} pages, {} errors",
                report.discovered,
                report.excluded,
                report.downloaded,
                report.processed,
                report.errors.len()
            );
            for error in &report.errors {
                eprintln!("error: {error}");
            }
            Ok(())
        }

        Commands::Enqueue { file, url, strict } => {
            let service = ScansiftService::open(settings)?;
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", file.display()))?;
            let doc_id = service
                .enqueue_document(bytes, filename, url.as_deref(), strict)
                .await?;
            println!("{doc_id}");
            Ok(())
        }

        Commands::Worker {
            pages_only,
            site_only,
        } => {
            let service = Arc::new(ScansiftService::open(settings)?);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let mut handles = Vec::new();
            if !site_only {
                let worker = PendingPagesWorker::new(
                    service.repo(),
                    service.pipeline(),
                    service.settings(),
                );
                let rx = shutdown_rx.clone();
                handles.push(tokio::spawn(async move { worker.run(rx).await }));
            }
            if !pages_only {
                let worker = SiteIngestWorker::new(service.clone());
                let rx = shutdown_rx.clone();
                handles.push(tokio::spawn(async move { worker.run(rx).await }));
            }

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            for handle in handles {
                let _ = handle.await;
            }
            Ok(())
        }

        Commands::Search {
            mode,
            query,
            limit,
            entity_type,
        } => {
            let service = ScansiftService::open(settings)?;
            let mode = SearchMode::parse(&mode)
                .ok_or_else(|| anyhow::anyhow!("unknown search mode: {mode}"))?;
            let entity_kind = entity_type
                .as_deref()
                .map(|t| {
                    EntityKind::parse(t)
                        .ok_or_else(|| anyhow::anyhow!("unknown entity type: {t}"))
                })
                .transpose()?;
            let opts = SearchOptions {
                limit,
                entity_kind,
                ..SearchOptions::default()
            };
            let hits = service.search(mode, &query, &opts)?;
            for hit in &hits {
                println!(
                    "[{:.2}] doc {} page {}: {}",
                    hit.score,
                    &hit.document_id[..hit.document_id.len().min(12)],
                    hit.page_number,
                    hit.snippet
                );
            }
            println!("\n{} hits", hits.len());
            Ok(())
        }

        Commands::Entities {
            entity_type,
            document,
            limit,
        } => {
            let service = ScansiftService::open(settings)?;
            let kind = entity_type
                .as_deref()
                .map(|t| {
                    EntityKind::parse(t)
                        .ok_or_else(|| anyhow::anyhow!("unknown entity type: {t}"))
                })
                .transpose()?;
            let entities = service.list_entities(kind, document.as_deref(), limit)?;
            for entity in &entities {
                println!(
                    "{}\t{}\t(doc {} page {})",
                    entity.kind,
                    entity.normalized_value.as_deref().unwrap_or(&entity.value),
                    &entity.document_id[..entity.document_id.len().min(12)],
                    entity.page_number
                );
            }
            println!("\n{} entities", entities.len());
            Ok(())
        }

        Commands::Status => {
            let service = ScansiftService::open(settings)?;
            let status = service.status()?;
            println!("documents:        {}", status.documents);
            println!("pages pending:    {}", status.pages_pending);
            println!("pages in flight:  {}", status.pages_in_progress);
            println!("pages done:       {}", status.pages_done);
            println!("pages failed:     {}", status.pages_failed);
            println!("ocr texts:        {}", status.ocr_texts);
            println!("search records:   {}", status.search_records);
            Ok(())
        }

        Commands::RetryFailed => {
            let service = ScansiftService::open(settings)?;
            let reset = service.repo().reset_failed_pages()?;
            println!("returned {reset} pages to pending");
            Ok(())
        }
    }
}
