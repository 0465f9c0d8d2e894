//! Library scanning command.

use std::io::Write;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::open_catalog;
use crate::config::Config;
use crate::library::{ScanEvent, ScanOptions, Scanner};

/// Scan every configured library
pub fn cmd_scan(
    rt: &Runtime,
    config: &Config,
    workers: Option<usize>,
    write_sidecars: bool,
) -> anyhow::Result<()> {
    rt.block_on(async {
        if config.libraries.is_empty() {
            println!("No libraries configured. Add one with `shelf-scan add-library`.");
            return Ok(());
        }

        let catalog = open_catalog(config).await?;
        for library in &config.libraries {
            let library = catalog.upsert_library(library).await?;
            info!(target: "shelf_scan::cli::scan", library = %library.name, id = library.id, "Library registered");
        }

        let workers = workers.unwrap_or_else(|| config.scan.effective_workers());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let scanner = Scanner::new(Arc::new(catalog))
            .with_options(ScanOptions {
                workers,
                write_sidecars: write_sidecars && config.scan.write_sidecars,
            })
            .with_events(tx);

        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(target: "shelf_scan::cli::scan", "Interrupted, finishing files in progress");
                ctrl_c.cancel();
            }
        });

        let progress = tokio::spawn(async move {
            let mut total = 0;
            let mut done = 0;
            while let Some(event) = rx.recv().await {
                match event {
                    ScanEvent::LibraryStarted { name, .. } => {
                        println!("Scanning library: {name}");
                    }
                    ScanEvent::DiscoveryComplete { total: n, .. } => {
                        total = n;
                        done = 0;
                        println!("Found {total} files");
                    }
                    ScanEvent::FileProcessed(_) => {
                        done += 1;
                        if done % 25 == 0 || done == total {
                            print!("\rProcessed {done}/{total}");
                            let _ = std::io::stdout().flush();
                        }
                    }
                    ScanEvent::FileSkipped { path, reason } => {
                        done += 1;
                        eprintln!("\nSkipped {}: {reason}", path.display());
                    }
                    ScanEvent::BookOrganized { path, .. } => {
                        println!("\nOrganized into {}", path.display());
                    }
                    ScanEvent::LibraryComplete { .. } => println!(),
                }
            }
        });

        let result = scanner.run(cancel).await;
        drop(scanner);
        let _ = progress.await;

        let report = result?;
        println!(
            "Scan {}: {} cataloged, {} unchanged, {} skipped, {} organized, {} covers recovered",
            if report.cancelled { "cancelled" } else { "complete" },
            report.cataloged,
            report.unchanged,
            report.skipped,
            report.organized,
            report.covers_recovered,
        );
        Ok(())
    })
}
