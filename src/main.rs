use anyhow::Result;
use clap::Parser;
use mediasort::mediasort_core::date::format_log_date;
use mediasort::mediasort_core::{
    BlobBackend, CancellationToken, Cli, Commands, DateResolver, LocalBackend, ObjectBlobStore,
    RunStatus, SortConfig, SortRequest, Sorter, StandardMetadataReader, StorageBackend,
};
use simplelog::{CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, WriteLogger};
use std::fs::File;
use std::process;
use std::sync::Arc;

/// Conventional exit status for a run interrupted by Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize loggers
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        LevelFilter::Warn,
        Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )];

    if cli.log {
        loggers.push(WriteLogger::new(
            cli.log_level,
            Config::default(),
            File::create("mediasort.log")?,
        ));
    }

    CombinedLogger::init(loggers)?;

    let mut config = SortConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Sort {
            source,
            destination,
            prefix,
            r#move,
            log_dir,
            timeout,
            workers,
            no_progress,
            blob,
        } => {
            if timeout.is_some() {
                config.item_timeout_secs = timeout;
            }
            if let Some(count) = workers {
                config.workers = Some(count as usize);
            }

            let token = CancellationToken::new();
            let handler_token = token.clone();
            ctrlc::set_handler(move || {
                log::warn!("Cancellation requested; stopping after the current file");
                handler_token.cancel();
            })?;

            let backend: Arc<dyn StorageBackend> = if blob {
                let Some(service) = &config.blob else {
                    anyhow::bail!("--blob needs a \"blob\" section in the configuration file");
                };
                log::info!("Sorting blob containers via {}", service.url);
                Arc::new(BlobBackend::new(Arc::new(ObjectBlobStore::new(service)?)))
            } else {
                Arc::new(LocalBackend::new())
            };

            let sorter = Sorter::new(backend, config)?
                .with_cancellation(token)
                .with_progress(!no_progress);

            let mut request = SortRequest::new(source.to_string_lossy(), destination.to_string_lossy())
                .moving(r#move);
            if let Some(prefix) = prefix {
                request = request.with_prefix(prefix);
            }
            if let Some(dir) = log_dir {
                request = request.with_log_location(dir.to_string_lossy());
            }

            let summary = match sorter.run(&request) {
                Ok(summary) => summary,
                Err(e) if e.is_fatal() => {
                    eprintln!("Cannot sort {}: {}", source.display(), e);
                    process::exit(2);
                }
                Err(e) => return Err(e.into()),
            };

            match summary.status {
                RunStatus::Completed => println!("\nSort complete!"),
                RunStatus::Cancelled => println!("\nSort cancelled."),
            }
            println!("  {} moved", summary.moved_count);
            println!("  {} skipped", summary.skipped_count);
            println!("  {} errors", summary.error_count);
            match &summary.log_location {
                Some(location) => println!("  Log: {}", location),
                None => println!("  No run log was written"),
            }

            if summary.status == RunStatus::Cancelled {
                process::exit(EXIT_CANCELLED);
            }
        }

        Commands::Inspect { files } => {
            let backend = LocalBackend::new();
            let resolver = DateResolver::new(Arc::new(StandardMetadataReader));
            let mut failures = 0;

            for file in files {
                match LocalBackend::item_for(&file) {
                    Ok(item) => {
                        let resolved = resolver.resolve(&item, &backend);
                        println!(
                            "{}\t{}\t{}",
                            file.display(),
                            format_log_date(&resolved.instant),
                            resolved.source
                        );
                    }
                    Err(e) => {
                        eprintln!("{}: {}", file.display(), e);
                        failures += 1;
                    }
                }
            }

            if failures > 0 {
                anyhow::bail!("{} file(s) could not be inspected", failures);
            }
        }
    }

    Ok(())
}
