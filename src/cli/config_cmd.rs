use anyhow::{Context, Result};

use crate::cli::output::{to_json, OutputFormat, OutputOptions};
use crate::core::config::{AppConfig, KEYS};

pub fn init(_opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Remove it first if you want to regenerate.");
        return Ok(());
    }

    let path = AppConfig::default()
        .save()
        .context("Failed to generate config")?;
    println!("Generated config at {}", path.display());
    Ok(())
}

pub fn show(opts: &OutputOptions) -> Result<()> {
    let config = AppConfig::load()?;
    match opts.format {
        OutputFormat::Json => println!("{}", to_json(&config, opts.pretty)?),
        OutputFormat::Text => {
            for key in KEYS {
                let value = config.get(key)?.unwrap_or_else(|| "(unset)".to_string());
                println!("{:<22} {}", key, value);
            }
        }
    }
    Ok(())
}

pub fn get(key: &str, _opts: &OutputOptions) -> Result<()> {
    let config = AppConfig::load()?;
    match config.get(key)? {
        Some(value) => println!("{}", value),
        None => println!("(unset)"),
    }
    Ok(())
}

pub fn set(key: &str, value: &str, _opts: &OutputOptions) -> Result<()> {
    let mut config = AppConfig::load()?;
    config.set(key, value)?;
    let path = config.save()?;
    tracing::debug!(key, path = %path.display(), "config updated");
    println!("{} = {}", key, config.get(key)?.unwrap_or_else(|| "(unset)".to_string()));
    Ok(())
}

pub fn check(_opts: &OutputOptions) -> Result<()> {
    let path = AppConfig::config_path();
    if !path.exists() {
        eprintln!("No config file found at {}", path.display());
        eprintln!("Run `tally config init` to create one.");
        return Ok(());
    }

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let issues = config.validate();
    if issues.is_empty() {
        println!("Config is valid: {}", path.display());
        match config.refresh_interval() {
            Some(interval) => println!("  Refresh every {}s", interval.as_secs()),
            None => println!("  Timer disabled; refreshing on file changes only."),
        }
    } else {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
        std::process::exit(1);
    }
    Ok(())
}
