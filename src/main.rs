// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! tagdex CLI - inspect and clean up image tag datasets

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use tagdex::catalog::{Catalog, Scope};
use tagdex::config::AppConfig;
use tagdex::filter::FilterNode;
use tagdex::Result;

/// tagdex CLI - image tag catalog and query engine
#[derive(Parser, Debug)]
#[command(name = "tagdex")]
#[command(version)]
#[command(about = "Inspect and clean up image tag datasets", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "tagdex.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a directory and show catalog statistics
    Scan {
        /// Directory to scan recursively
        directory: PathBuf,
    },

    /// List tags by frequency
    Tags {
        /// Directory to scan recursively
        directory: PathBuf,

        /// Maximum number of tags to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Search captions and paths with a wildcard pattern
    Search {
        /// Directory to scan recursively
        directory: PathBuf,

        /// Pattern to match (`*` and `?` wildcards, matched anywhere)
        query: String,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show native and export dimensions for each image
    Sizes {
        /// Directory to scan recursively
        directory: PathBuf,

        /// Maximum number of images to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Remove duplicate and/or empty tags, rewriting caption files
    Cleanup {
        /// Directory to scan recursively
        directory: PathBuf,

        /// Remove duplicate tags, keeping first occurrences
        #[arg(long)]
        duplicates: bool,

        /// Remove empty and whitespace-only tags
        #[arg(long)]
        empty: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "tagdex.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Scan { directory } => run_scan(&config, &directory),
        Commands::Tags { directory, limit } => run_tags(&config, &directory, limit),
        Commands::Search {
            directory,
            query,
            limit,
        } => run_search(&config, &directory, &query, limit),
        Commands::Sizes { directory, limit } => run_sizes(&config, &directory, limit),
        Commands::Cleanup {
            directory,
            duplicates,
            empty,
        } => run_cleanup(&config, &directory, duplicates, empty),
        Commands::Config { action } => run_config_command(config, action, &cli.config),
    }
}

fn load_catalog(config: &AppConfig, directory: &PathBuf) -> Result<Catalog> {
    let mut catalog = Catalog::new(config.effective_separator(), &config.export);
    catalog.load_directory(directory, &config.image_suffixes())?;
    Ok(catalog)
}

fn run_scan(config: &AppConfig, directory: &PathBuf) -> Result<()> {
    let catalog = load_catalog(config, directory)?;
    let tagged = catalog
        .images()
        .iter()
        .filter(|image| !image.tags.is_empty())
        .count();
    let unreadable = catalog
        .images()
        .iter()
        .filter(|image| image.dimensions.is_none())
        .count();
    println!("Images:     {}", catalog.len());
    println!("Tagged:     {}", tagged);
    println!("Untagged:   {}", catalog.len() - tagged);
    println!("Unreadable: {}", unreadable);
    println!("Distinct tags: {}", catalog.tag_counts().len());
    Ok(())
}

fn run_tags(config: &AppConfig, directory: &PathBuf, limit: usize) -> Result<()> {
    let catalog = load_catalog(config, directory)?;
    let mut counts: Vec<(String, usize)> = catalog.tag_counts().into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (tag, count) in counts.into_iter().take(limit) {
        println!("{:>6}  {}", count, tag);
    }
    Ok(())
}

fn run_search(config: &AppConfig, directory: &PathBuf, query: &str, limit: usize) -> Result<()> {
    let catalog = load_catalog(config, directory)?;
    let filter = FilterNode::FreeText(query.to_string());
    let scope = Scope::Filtered(Some(&filter));
    let mut shown = 0;
    for (index, image) in catalog.images().iter().enumerate() {
        if !catalog.image_in_scope(index, scope) {
            continue;
        }
        println!("{}", image.path.display());
        shown += 1;
        if shown == limit {
            break;
        }
    }
    info!("{} matching images shown", shown);
    Ok(())
}

fn run_sizes(config: &AppConfig, directory: &PathBuf, limit: usize) -> Result<()> {
    let mut catalog = load_catalog(config, directory)?;
    for index in 0..catalog.len().min(limit) {
        let target = catalog.target_dimension(index);
        let image = &catalog.images()[index];
        let native = match image.dimensions {
            Some((width, height)) => format!("{}x{}", width, height),
            None => "?".to_string(),
        };
        let target = match target {
            Some((width, height)) => format!("{}x{}", width, height),
            None => "?".to_string(),
        };
        println!("{:<12} {:>9} -> {:>9}", image.file_name(), native, target);
    }
    Ok(())
}

fn run_cleanup(config: &AppConfig, directory: &PathBuf, duplicates: bool, empty: bool) -> Result<()> {
    if !duplicates && !empty {
        warn!("Nothing to do; pass --duplicates and/or --empty");
        return Ok(());
    }
    let mut catalog = load_catalog(config, directory)?;
    if duplicates {
        let report = catalog.remove_duplicate_tags();
        println!(
            "Removed {} duplicate tags across {} images",
            report.removed_tag_count,
            report.changed_count()
        );
        report_failures(&report.failed_writes);
    }
    if empty {
        let report = catalog.remove_empty_tags();
        println!(
            "Removed {} empty tags across {} images",
            report.removed_tag_count,
            report.changed_count()
        );
        report_failures(&report.failed_writes);
    }
    Ok(())
}

fn report_failures(failed: &[PathBuf]) {
    for path in failed {
        warn!("Caption file for {} could not be written", path.display());
    }
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &PathBuf) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            println!("Configuration at {:?} is valid", config_path);
            println!("  Separator: {:?}", config.effective_separator());
            println!("  Formats: {}", config.image_file_formats);
            println!(
                "  Export: {}px, bucket {}, upscaling {}",
                config.export.resolution, config.export.bucket_size, config.export.upscaling
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_scan_command() {
        let cli = Cli::try_parse_from(["tagdex", "scan", "/tmp/dataset"]).unwrap();
        assert!(!cli.verbose);
        match cli.command {
            Commands::Scan { directory } => {
                assert_eq!(directory, PathBuf::from("/tmp/dataset"));
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_cli_cleanup_flags() {
        let cli = Cli::try_parse_from([
            "tagdex", "cleanup", "/tmp/dataset", "--duplicates", "--empty",
        ])
        .unwrap();
        match cli.command {
            Commands::Cleanup {
                duplicates, empty, ..
            } => {
                assert!(duplicates);
                assert!(empty);
            }
            _ => panic!("Expected Cleanup command"),
        }
    }

    #[test]
    fn test_cli_search_defaults() {
        let cli = Cli::try_parse_from(["tagdex", "search", "/tmp/dataset", "cat*"]).unwrap();
        match cli.command {
            Commands::Search { query, limit, .. } => {
                assert_eq!(query, "cat*");
                assert_eq!(limit, 20);
            }
            _ => panic!("Expected Search command"),
        }
    }
}
