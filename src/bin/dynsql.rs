//! dynsql: render mapper statements without a database.
//!
//! # Usage
//!
//! ```bash
//! # Render a statement with parameters
//! dynsql render blog.find --mapper blog.xml --params '{"id": 7}'
//!
//! # List registered statements
//! dynsql list --mapper blog.xml --mapper user.xml
//!
//! # Load mapper documents and report errors
//! dynsql check mappers/*.xml
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use dynsql::prelude::*;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dynsql")]
#[command(version)]
#[command(about = "Render dynamic SQL mapper statements", long_about = None)]
#[command(after_help = "EXAMPLES:
    dynsql render blog.find -m blog.xml -p '{\"id\": 7}'
    dynsql render findActive -m user.xml --database-id postgres --format json
    dynsql list -m blog.xml
    dynsql check mappers/*.xml")]
struct Cli {
    /// Settings file (default: ./dynsql.toml, then the user config directory)
    #[arg(short, long, global = true, env = "DYNSQL_CONFIG")]
    config: Option<PathBuf>,

    /// Mapper documents to load, in addition to those in the settings
    #[arg(short, long = "mapper", global = true)]
    mappers: Vec<PathBuf>,

    /// Active dialect
    #[arg(long, global = true, env = "DYNSQL_DATABASE_ID")]
    database_id: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a statement's SQL and parameter bindings
    Render {
        /// Statement id, qualified or short
        statement: String,

        /// Parameter value as JSON
        #[arg(short, long)]
        params: Option<String>,

        /// Read the parameter value from a JSON file
        #[arg(long, conflicts_with = "params")]
        params_file: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List registered statements
    List,
    /// Load mapper documents and report compile errors
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Render {
            statement,
            params,
            params_file,
            format,
        } => render(&cli, statement, params.as_deref(), params_file.as_deref(), *format),
        Commands::List => list(&cli),
        Commands::Check { paths } => check(&cli, paths),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings from file, with command-line overrides applied.
fn settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path).with_context(|| format!("reading {}", path.display()))?,
        None => Settings::discover()?,
    };
    settings.mappers.extend(cli.mappers.iter().cloned());
    if let Some(id) = &cli.database_id {
        settings.database_id = Some(id.clone());
    }
    Ok(settings)
}

fn configuration(cli: &Cli) -> Result<std::sync::Arc<Configuration>> {
    let settings = settings(cli)?;
    if settings.mappers.is_empty() {
        anyhow::bail!("No mapper documents. Use --mapper or list them under `mappers` in dynsql.toml");
    }
    Ok(Configuration::from_settings(&settings)?)
}

fn read_params(inline: Option<&str>, file: Option<&Path>) -> Result<Value> {
    let text = match (inline, file) {
        (Some(json), _) => json.to_string(),
        (None, Some(path)) => fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        (None, None) => return Ok(Value::Null),
    };
    serde_json::from_str(&text).context("parameters are not valid JSON")
}

fn render(
    cli: &Cli,
    id: &str,
    params: Option<&str>,
    params_file: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = configuration(cli)?;
    let parameter = read_params(params, params_file)?;
    let statement = config.statement(id)?;
    let bound = statement.bound_sql(&parameter, config.database_id())?;
    let values = bound.parameter_values(config.engine().accessor());

    match format {
        OutputFormat::Json => {
            let parameters: Vec<Value> = bound
                .parameter_mappings
                .iter()
                .zip(&values)
                .map(|(mapping, value)| json!({"mapping": mapping, "value": value}))
                .collect();
            let out = json!({
                "statement": statement.id,
                "command": statement.command,
                "databaseId": statement.database_id,
                "sql": bound.sql,
                "parameters": parameters,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            let dialect = statement
                .database_id
                .as_deref()
                .map(|d| format!(" [{d}]"))
                .unwrap_or_default();
            println!(
                "{} {} {}{}",
                "Statement:".dimmed(),
                statement.id.cyan(),
                statement.command.to_string().yellow(),
                dialect.dimmed()
            );
            println!();
            println!("{}", "Generated SQL:".green().bold());
            println!("  {}", bound.sql.white());

            if !bound.parameter_mappings.is_empty() {
                println!();
                println!("{}", "Bindings:".cyan());
                for (i, (mapping, value)) in bound.parameter_mappings.iter().zip(&values).enumerate() {
                    let jdbc = mapping
                        .jdbc_type
                        .as_deref()
                        .map(|t| format!(" ({t})"))
                        .unwrap_or_default();
                    println!(
                        "  {:>3}  {}{} = {}",
                        i + 1,
                        mapping.property.white(),
                        jdbc.dimmed(),
                        value.to_string().yellow()
                    );
                }
            }
        }
    }
    Ok(())
}

fn list(cli: &Cli) -> Result<()> {
    let config = configuration(cli)?;
    let statements = config.statements();
    if statements.is_empty() {
        println!("{}", "(no statements)".dimmed());
        return Ok(());
    }

    println!(
        "{:40} {:8} {:10} {:18} {}",
        "Statement".white().bold(),
        "Command".white().bold(),
        "Dialect".white().bold(),
        "Keys".white().bold(),
        "Kind".white().bold()
    );
    println!("{}", "─".repeat(90).dimmed());
    for ms in &statements {
        let kind = if ms.source.is_dynamic() { "dynamic" } else { "static" };
        println!(
            "{:40} {:8} {:10} {:18} {}",
            ms.id.cyan(),
            ms.command.to_string().yellow(),
            ms.database_id.as_deref().unwrap_or("-"),
            ms.key_generator.to_string(),
            kind.dimmed()
        );
    }
    println!();
    println!("{} statement(s)", statements.len().to_string().cyan());
    Ok(())
}

fn check(cli: &Cli, paths: &[PathBuf]) -> Result<()> {
    let settings = settings(cli)?;
    let mut builder = ConfigurationBuilder::from_settings(&settings);
    let mut failures = 0;

    for path in paths {
        match builder.load_mapper_file(path) {
            Ok(count) => println!("{} {} ({} statements)", "✓".green(), path.display(), count),
            Err(e) => {
                failures += 1;
                println!("{} {} {}", "✗".red(), path.display(), e.to_string().red());
            }
        }
    }

    match builder.build() {
        Ok(config) => println!(
            "\n{} statement(s) registered",
            config.statements().len().to_string().cyan()
        ),
        Err(e) => {
            failures += 1;
            println!("{} {}", "✗".red(), e.to_string().red());
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} error(s)");
    }
    Ok(())
}
