mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use sample_cache_core::config::load_configuration;
use sample_cache_core::engine::format_size;
use sample_cache_core::samples::SampleKey;
use sample_cache_core::storage::SampleStore;
use sample_cache_core::{AppConfig, SampleEntry, SamplesCache};
use tracing::{error, info};

fn main() {
    dotenv().ok();

    let args = Cli::parse();

    let _guard = logging::init_logger();

    let config = match load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let result = match args.command {
        Some(Commands::Refresh {
            definitions,
            refresh,
            stage,
            threads,
        }) => run_refresh(&config, &definitions, refresh, stage, threads),
        Some(Commands::Stage {
            definitions,
            remote,
            threads,
        }) => run_stage(&config, &definitions, remote, threads),
        Some(Commands::List) => run_list(&config),
        Some(Commands::Forget { sample }) => run_forget(&config, &sample),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => run_truncate(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn build_cache(config: &AppConfig, threads: Option<usize>) -> Result<SamplesCache> {
    let cache = SamplesCache::new(config.clone())?;
    Ok(match threads {
        Some(threads) => cache.with_threads(threads)?,
        None => cache,
    })
}

fn open_store(config: &AppConfig) -> Result<SampleStore> {
    let store = SampleStore::open(
        config.samples_cache.store_path(),
        config.samples_cache.lock_options(),
    )?;
    Ok(store)
}

fn run_refresh(
    config: &AppConfig,
    definitions: &Path,
    refresh: bool,
    stage: bool,
    threads: Option<usize>,
) -> Result<()> {
    let cache = build_cache(config, threads)?.with_refresh(refresh);
    let cache = if stage { cache.with_stage(true) } else { cache };
    let reporter = CliReporter::new();
    let entries = cache
        .load(definitions, &reporter)
        .with_context(|| format!("loading {}", definitions.display()))?;

    println!();
    print_entries(&entries);
    Ok(())
}

fn run_stage(
    config: &AppConfig,
    definitions: &Path,
    remote: bool,
    threads: Option<usize>,
) -> Result<()> {
    let cache = build_cache(config, threads)?
        .with_remote(remote)
        .with_stage(false);
    let reporter = CliReporter::new();
    let mut entries = cache
        .load(definitions, &reporter)
        .with_context(|| format!("loading {}", definitions.display()))?;
    let report = cache.stage(&mut entries, &reporter)?;

    println!();
    info!(
        "{} files transferred, {} already staged",
        format!("{}", report.transferred).green(),
        format!("{}", report.already_staged).cyan(),
    );
    Ok(())
}

fn print_entries(entries: &[SampleEntry]) {
    for entry in entries {
        let kind = match entry {
            SampleEntry::Sample(_) => "sample",
            SampleEntry::Group(_) => "group",
        };
        println!(
            "{} ({}, {}): {} samples, {} files ({} local), {}",
            entry.key().to_string().bold(),
            entry.title(),
            kind,
            entry.samples_len(),
            format!("{}", entry.len(false)).green(),
            entry.len(true),
            format_size(entry.size()).cyan(),
        );
    }
}

fn run_list(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let samples = store.session()?.list_samples()?;
    for summary in &samples {
        println!(
            "{} [{}] {} files, {}, refreshed {}",
            summary.key.to_string().bold(),
            summary.kind,
            format!("{}", summary.file_count).green(),
            format_size(Some(summary.total_size.max(0) as u64)).cyan(),
            summary.refreshed_at.as_deref().unwrap_or("never"),
        );
    }
    info!("{} samples in store", samples.len());
    Ok(())
}

fn run_forget(config: &AppConfig, sample: &str) -> Result<()> {
    let store = open_store(config)?;
    let key = SampleKey::parse(sample);
    if store.session()?.delete_sample(&key)? {
        info!("Removed {} from the store", key);
    } else {
        info!("{} is not in the store", key);
    }
    Ok(())
}

fn run_truncate(config: &AppConfig) -> Result<()> {
    if !prompt_confirm(
        "Are you SURE you want to COMPLETELY DELETE the sample store?",
        Some(false),
    )? {
        return Ok(());
    }
    let store = open_store(config)?;
    store.session()?.truncate_all()?;
    println!("All tables truncated");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
