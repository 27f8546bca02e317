//! davsync - upload a directory tree to WebDAV
//!
//! All settings come from the environment; see `config`.

use anyhow::{Context, Result};
use crossterm::style::{Color, Stylize};
use crossterm::tty::IsTty;
use std::sync::Arc;
use std::time::Duration;

use davsync::config::{Config, EndpointConfig};
use davsync::logger::{ConsoleLogger, Logger, TeeLogger, TextLogger};
use davsync::paths;
use davsync::pipeline::Pipeline;
use davsync::progress::{RunSummary, StatusLine};
use davsync::remote::{
    DryRunStore, Endpoint, EndpointPool, RemoteStore, WebDavClient, WebDavSettings,
};
use davsync::state::{JournalStore, MemoryStore, StateStore};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Completed uploads are journaled; rerun to resume.");
        std::process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {}", "error:".with(Color::Red).bold(), e);
            std::process::exit(1);
        }
    };

    match run(config).await {
        Ok(summary) => {
            print_summary(&summary);
            if !summary.is_complete() {
                std::process::exit(2);
            }
        }
        Err(e) => {
            eprintln!("{} {:#}", "error:".with(Color::Red).bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run(mut config: Config) -> Result<RunSummary> {
    let logger = build_logger(&config)?;

    // Keys are derived from crawled paths; keep them stable across working
    // directories.
    config.directory = std::path::absolute(&config.directory)
        .with_context(|| format!("Invalid DIRECTORY_PATH {}", config.directory.display()))?;
    config.ignore = config
        .ignore
        .iter()
        .map(|p| {
            std::path::absolute(p)
                .map(|abs| paths::to_remote(&abs))
                .unwrap_or_else(|_| p.clone())
        })
        .collect();
    // The journal may live inside the tree being uploaded.
    if let Ok(abs) = std::path::absolute(&config.state_file) {
        config.ignore.push(paths::to_remote(&abs));
    }

    let state: Arc<dyn StateStore> = if config.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JournalStore::open(&config.state_file).with_context(|| {
            format!("Failed to open state file {}", config.state_file.display())
        })?)
    };

    let pool = Arc::new(build_pool(&config, &logger)?);
    let pipeline = Pipeline::new(config.pipeline_options(), pool, state, logger);
    pipeline.run().await
}

fn build_logger(config: &Config) -> Result<Arc<dyn Logger>> {
    let interactive = std::io::stdout().is_tty();
    let console = ConsoleLogger::new(config.verbose);
    let mut sinks: Vec<Arc<dyn Logger>> = Vec::new();
    if interactive {
        let status = StatusLine::new();
        sinks.push(Arc::new(console.attach(status.bar())));
        sinks.push(Arc::new(status));
    } else {
        sinks.push(Arc::new(console));
    }
    if let Some(path) = &config.log_file {
        let text = TextLogger::new(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        sinks.push(Arc::new(text));
    }
    Ok(Arc::new(TeeLogger::new(sinks)))
}

fn build_pool(config: &Config, logger: &Arc<dyn Logger>) -> Result<EndpointPool> {
    let endpoints = config
        .endpoints
        .iter()
        .enumerate()
        .map(|(index, ep)| {
            let store = build_store(config, ep, logger)?;
            Ok(Endpoint::new(index, ep.min_size, ep.max_size, store))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(EndpointPool::new(endpoints))
}

fn build_store(
    config: &Config,
    ep: &EndpointConfig,
    logger: &Arc<dyn Logger>,
) -> Result<Arc<dyn RemoteStore>> {
    if config.dry_run {
        return Ok(Arc::new(DryRunStore::new(&ep.url, logger.clone())));
    }
    let client = WebDavClient::new(&WebDavSettings {
        url: ep.url.clone(),
        username: ep.username.clone(),
        password: ep.password.clone(),
        connect_timeout: CONNECT_TIMEOUT,
        request_timeout: config.request_timeout,
    })
    .with_context(|| format!("Invalid WebDAV endpoint {}", ep.url))?;
    Ok(Arc::new(client))
}

fn print_summary(s: &RunSummary) {
    let secs = s.elapsed.as_secs_f64();
    let mb = s.bytes_uploaded as f64 / 1_000_000.0;
    println!();
    println!("{}", "=== Upload Complete ===".with(Color::Green).bold());
    println!(
        "Uploaded: {} units ({} packs), {:.2} MB",
        s.units_uploaded, s.packs_uploaded, mb
    );
    if s.units_existing > 0 {
        println!("Already on remote: {}", s.units_existing);
    }
    println!("Time: {:.2}s", secs);
    if secs > 0.0 {
        println!("Throughput: {:.2} MB/s", mb / secs);
    }
    if s.failed_attempts > 0 {
        println!(
            "{} {} failed attempts, {} units retried",
            "Retries:".with(Color::Yellow),
            s.failed_attempts,
            s.units_retried
        );
    }
    if s.units_rejected > 0 {
        println!(
            "{} {} units not stored by the remote",
            "Rejected:".with(Color::Yellow),
            s.units_rejected
        );
    }
    if s.units_vanished > 0 {
        println!(
            "{} {} files disappeared before upload",
            "Vanished:".with(Color::Yellow),
            s.units_vanished
        );
    }
    if s.units_abandoned > 0 {
        eprintln!(
            "{} {} units could not be uploaded:",
            "Abandoned:".with(Color::Red).bold(),
            s.units_abandoned
        );
        for path in &s.abandoned {
            eprintln!("  - {}", path);
        }
    }
}
