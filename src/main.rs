mod automation;
mod banner;
mod chrome;
mod config;
mod coordinator;
mod error;
mod partition;
mod record;
mod registry;
mod session;
mod sink;
mod store;
#[cfg(test)]
mod testkit;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, warn};

use crate::chrome::{BannerTabs, Chrome};
use crate::config::Settings;
use crate::coordinator::{RunSettings, RunSummary};
use crate::store::Store;

#[derive(Parser)]
#[command(name = "term_scraper", about = "Course and section scraper for Banner registration search")]
struct Cli {
    /// Terms to scrape, as shown in the term picker (e.g. "Spring 2024")
    #[arg(required = true)]
    terms: Vec<String>,
    /// Settings file (default: ./term_scraper.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Concurrent browser sessions
    #[arg(short = 'n', long)]
    workers: Option<usize>,
    /// Output directory; each term gets a subdirectory
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Show the browser window
    #[arg(long)]
    headful: bool,
    /// Only report the page count and how it would be split
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(n) = cli.workers {
        settings.workers = n;
    }
    if let Some(out) = cli.out {
        settings.out_dir = out;
    }
    if cli.headful {
        settings.headless = false;
    }
    settings.validate()?;

    let chrome = Arc::new(Chrome::launch(settings.headless).await?);
    let mut failed_terms = Vec::new();

    for term in &cli.terms {
        let factory = Arc::new(BannerTabs {
            chrome: Arc::clone(&chrome),
            search_url: settings.search_url.clone(),
            term: term.clone(),
            page_size: settings.page_size,
            timeouts: settings.timeouts(),
        });

        let result = if cli.dry_run {
            dry_run(&factory, &settings).await
        } else {
            scrape_term(factory, &settings, term).await
        };
        if let Err(e) = result {
            error!(term = %term, "{:#}", e);
            failed_terms.push(term.clone());
        }
    }

    match Arc::try_unwrap(chrome) {
        Ok(chrome) => chrome.shutdown().await,
        Err(_) => warn!("Browser still in use at exit; leaving it to the OS"),
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    if !failed_terms.is_empty() {
        bail!("Failed terms: {}", failed_terms.join(", "));
    }
    Ok(())
}

async fn dry_run(factory: &BannerTabs, settings: &Settings) -> anyhow::Result<()> {
    let found = coordinator::discover(factory)
        .await
        .with_context(|| format!("Discovery failed for {}", factory.term))?;
    println!(
        "{}: {} records on {} pages of {}",
        factory.term, found.total_records, found.total_pages, settings.page_size
    );
    for (i, pages) in partition::partition(found.total_pages, settings.workers)
        .iter()
        .enumerate()
    {
        println!("  worker {:>2}: pages {}-{}", i, pages.start(), pages.end());
    }
    Ok(())
}

async fn scrape_term(factory: Arc<BannerTabs>, settings: &Settings, term: &str) -> anyhow::Result<()> {
    let dir = settings.term_dir(term);
    let (store, resume) = Store::open(&dir)?;
    if !resume.section_ids.is_empty() {
        println!(
            "Resuming {}: {} courses and {} sections already in {}",
            term,
            resume.courses.len(),
            resume.section_ids.len(),
            dir.display()
        );
    }

    let run = RunSettings {
        workers: settings.workers,
        page_size: settings.page_size,
        limits: settings.limits(),
        flush_interval: settings.flush_interval(),
        show_progress: true,
    };
    let summary = coordinator::run(factory, store, resume, &run).await?;
    print_summary(term, &summary);
    Ok(())
}

fn print_summary(term: &str, s: &RunSummary) {
    println!(
        "{}: {} new courses, {} new sections ({} of {} records on {} pages)",
        term,
        s.courses,
        s.sections,
        s.sections + s.skipped_rows,
        s.total_records,
        s.total_pages
    );
    println!(
        "Workers: {}/{} completed | rows skipped {}, malformed {}, failed {}",
        s.workers_completed, s.workers_launched, s.skipped_rows, s.malformed_rows, s.failed_rows
    );
    println!("Pages with failures: {:?}", s.failed_pages);
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
