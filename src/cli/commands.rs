use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::{
    app::{init_config, load_config, AppState},
    batch::{BatchResult, Outcome},
    geocoding::{AddressQuery, GeocodeResult},
    research::{BatchProgress, ProgressCallback, Property, ResearchReport},
    utils::log_progress,
};

use super::{CacheAction, Cli, Commands, OutputFormat};

/// Handle CLI subcommands. Returns false when some items failed.
pub async fn handle_command(cli: &Cli) -> Result<bool> {
    if let Commands::Init = cli.command {
        println!("Initializing deedscout configuration...");
        for path in init_config()? {
            println!("Created {}", path.display());
        }
        println!("Configuration initialized successfully!");
        return Ok(true);
    }

    let config = load_config(cli.config.as_deref())?;
    let state = AppState::open(config)?;
    let outcome = run(&state, &cli.command, cli.output_format).await;
    state.close();
    outcome
}

async fn run(state: &AppState, command: &Commands, format: OutputFormat) -> Result<bool> {
    match command {
        Commands::Init => Ok(true),
        Commands::Research {
            file,
            depth,
            concurrency,
            force_refresh,
        } => {
            let properties = load_properties(file)?;
            state.store.insert_all(properties.clone());

            let depth = depth.unwrap_or(state.config.research.default_depth);
            let concurrency = concurrency.unwrap_or(state.config.research.concurrency);
            let result = state
                .researcher
                .batch_research_properties(
                    properties,
                    depth,
                    concurrency,
                    *force_refresh,
                    Some(progress_printer()),
                )
                .await;

            emit(&result, format, render_research)?;
            Ok(result.stats.errors == 0)
        }
        Commands::Geocode {
            address,
            city,
            state: region,
            zip,
            provider,
            no_cache,
        } => {
            let query = AddressQuery {
                address: address.clone(),
                city: city.clone(),
                state: region.clone(),
                zip_code: zip.clone(),
            };
            let preferred = provider
                .as_deref()
                .or(state.config.geocoding.preferred_provider.as_deref());
            let result = state
                .geocoder
                .geocode_address(&query, preferred, !no_cache)
                .await?;

            match format {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Text => println!("{}", render_geocode(&result)),
            }
            Ok(true)
        }
        Commands::GeocodeBatch { file, concurrency } => {
            let mut properties = load_properties(file)?;
            state.store.insert_all(properties.clone());

            let concurrency = concurrency.unwrap_or(state.config.geocoding.batch_concurrency);
            let result = state
                .researcher
                .batch_geocode_properties(&mut properties, concurrency, false)
                .await;

            emit(&result, format, render_geocode)?;
            Ok(result.stats.errors == 0)
        }
        Commands::Cache { action } => {
            match action {
                CacheAction::Stats => {
                    let stats = state.cache.get_stats();
                    match format {
                        OutputFormat::Json => print_json(&stats)?,
                        OutputFormat::Text => println!("{}", stats.format()),
                    }
                }
                CacheAction::Clear { data_type } => {
                    let removed = state.cache.clear(data_type.as_deref());
                    match data_type {
                        Some(t) => println!("Removed {} cached '{}' entries", removed, t),
                        None => println!("Removed {} cached entries", removed),
                    }
                }
                CacheAction::Purge => {
                    let removed = state.cache.purge_expired();
                    println!("Purged {} expired entries", removed);
                }
            }
            Ok(true)
        }
    }
}

/// Accepts a JSON array of properties or a single property object
pub fn load_properties(path: &Path) -> Result<Vec<Property>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let properties = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Property>, _>>(),
        single @ Value::Object(_) => serde_json::from_value(single).map(|p| vec![p]),
        _ => anyhow::bail!("{} must contain a property object or an array of them", path.display()),
    };
    properties.with_context(|| format!("Invalid property record in {}", path.display()))
}

fn progress_printer() -> ProgressCallback {
    Arc::new(|progress: &BatchProgress<'_>| {
        let status = match progress.outcome {
            Outcome::Success(report) if report.failed_modules().is_empty() => "done".green(),
            Outcome::Success(_) => "partial".yellow(),
            Outcome::Failure(_) => "failed".red(),
        };
        log_progress(
            progress.completed,
            progress.total,
            format!("{} {}", progress.key.bold(), status),
        );
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn emit<T: Serialize>(result: &BatchResult<T>, format: OutputFormat, render: fn(&T) -> String) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(result),
        OutputFormat::Text => {
            for (key, outcome) in &result.per_item {
                match outcome {
                    Outcome::Success(item) => println!("{} {}: {}", "[OK]".green(), key, render(item)),
                    Outcome::Failure(entry) => println!("{} {}: {}", "[FAIL]".red(), key, entry.error),
                }
            }
            println!(
                "\n{} total, {} succeeded, {} failed ({:.1}%)",
                result.stats.total, result.stats.success, result.stats.errors, result.stats.success_rate
            );
            Ok(())
        }
    }
}

fn render_research(report: &ResearchReport) -> String {
    let failed = report.failed_modules();
    if failed.is_empty() {
        report.executive_summary.clone()
    } else {
        format!(
            "{} ({} failed: {})",
            report.executive_summary,
            failed.len(),
            failed.join(", ")
        )
    }
}

fn render_geocode(result: &GeocodeResult) -> String {
    let source = match (&result.provider, result.approximate) {
        (Some(provider), _) => provider.clone(),
        (None, true) => "approximate".to_string(),
        (None, false) => "unknown".to_string(),
    };
    format!(
        "{:.6}, {:.6} [{:?} via {}]",
        result.latitude, result.longitude, result.confidence, source
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_load_properties_array_and_object() {
        let dir = TempDir::new().unwrap();
        let array = dir.path().join("many.json");
        std::fs::write(
            &array,
            r#"[{"id": "a", "address": "1 Main St"}, {"name": "Oak Court", "units": 12}]"#,
        )
        .unwrap();
        let properties = load_properties(&array).unwrap();
        assert_eq!(properties.len(), 2);
        assert_eq!(properties[1].units, Some(12));

        let single = dir.path().join("one.json");
        std::fs::write(&single, r#"{"city": "Austin", "state": "TX"}"#).unwrap();
        assert_eq!(load_properties(&single).unwrap().len(), 1);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "42").unwrap();
        assert!(load_properties(&bad).is_err());
    }

    #[test]
    fn test_render_geocode_marks_approximations() {
        let result = GeocodeResult {
            latitude: 30.2672,
            longitude: -97.7431,
            confidence: crate::geocoding::Confidence::Low,
            provider: None,
            approximate: true,
            formatted_address: None,
        };
        assert_eq!(render_geocode(&result), "30.267200, -97.743100 [Low via approximate]");
    }
}
