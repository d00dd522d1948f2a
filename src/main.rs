use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use sqlweave::config::Config;
use sqlweave::expression::FunctionRegistry;
use sqlweave::query::{MapQueryFilter, QueryManager, RowsBulkFilter, StaticQuerySource};
use sqlweave::storage::{ConnectionSource, SqliteConnectionSource};
use sqlweave::transaction::TransactionManager;
use sqlweave::utils::logging;
use sqlweave::Value;

#[derive(Parser)]
#[clap(version = "0.1.0", author = "sqlweave Contributors")]
struct Cli {
    /// Configuration file, defaults are used when it does not exist
    #[clap(short, long, default_value = "sqlweave.toml")]
    config: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the rendered SQL and bound parameters of a query
    Render {
        #[clap(flatten)]
        query: QueryArgs,
    },
    /// Execute a query against the configured database
    Exec {
        #[clap(value_enum)]
        mode: ExecMode,
        #[clap(flatten)]
        query: QueryArgs,
        /// JSON array of row objects, required in bulk mode
        #[clap(long)]
        rows: Option<String>,
    },
    /// Run a SQL script file
    Ddl {
        script: String,
    },
}

#[derive(clap::Args)]
struct QueryArgs {
    /// TOML file with the query definitions
    #[clap(short, long)]
    queries: String,
    /// Query name
    name: String,
    /// Filter property as name=value
    #[clap(long = "set", value_parser = parse_property)]
    properties: Vec<(String, Value)>,
    /// Positional argument bound to a bare `?`
    #[clap(long = "arg")]
    args: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExecMode {
    Update,
    Fetch,
    Bulk,
}

fn parse_property(text: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", text))?;
    Ok((name.trim().to_string(), Value::parse_literal(value)))
}

fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(path).with_context(|| format!("failed to load config {}", path))
    } else {
        Ok(Config::default())
    }
}

fn connection_source(config: &Config) -> Arc<SqliteConnectionSource> {
    Arc::new(SqliteConnectionSource::new(
        &config.database.path,
        config.database.sqlite_options(),
    ))
}

fn query_manager(config: &Config, args: &QueryArgs) -> Result<QueryManager> {
    let source = StaticQuerySource::load(
        &args.queries,
        connection_source(config),
        Arc::new(FunctionRegistry::with_builtins()),
    )?;
    Ok(QueryManager::with_engine(
        Arc::new(source),
        TransactionManager::new(),
        config.engine.clone(),
    ))
}

fn filter(config: &Config, args: &QueryArgs) -> MapQueryFilter {
    let mut filter = MapQueryFilter::new().with_null_string(&config.engine.null_string);
    for (name, value) in &args.properties {
        filter.add_value(name, value.clone());
    }
    filter
}

fn positional(args: &QueryArgs) -> Vec<Value> {
    args.args.iter().map(|a| Value::parse_literal(a)).collect()
}

fn run(config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Render { query } => {
            let manager = query_manager(config, &query)?;
            let rendered = manager.render(&query.name, &filter(config, &query), &positional(&query))?;
            println!("{}", rendered.sql);
            println!("{}", serde_json::to_string(&rendered.params)?);
        }
        Command::Exec { mode, query, rows } => {
            let manager = query_manager(config, &query)?;
            let base = filter(config, &query);
            match mode {
                ExecMode::Update => {
                    let count = manager.execute_update(&query.name, &base, &positional(&query))?;
                    println!("{}", count);
                }
                ExecMode::Fetch => {
                    let records = manager.fetch_records(&query.name, &base, &positional(&query))?;
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }
                ExecMode::Bulk => {
                    let path = rows.ok_or_else(|| anyhow!("bulk mode requires --rows"))?;
                    let content = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read rows file {}", path))?;
                    let rows: Vec<BTreeMap<String, Value>> = serde_json::from_str(&content)?;
                    let mut bulk = RowsBulkFilter::new(rows)
                        .with_commit_count(config.engine.commit_count)
                        .with_base(base);
                    let count = manager.execute_bulk_updates(&query.name, &mut bulk)?;
                    println!("{}", count);
                }
            }
        }
        Command::Ddl { script } => {
            let sql = fs::read_to_string(&script)
                .with_context(|| format!("failed to read script {}", script))?;
            let connection = connection_source(config).connection()?;
            let result = connection
                .execute_batch(&sql)
                .and_then(|_| connection.commit());
            connection.close()?;
            result?;
            println!("ok");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(&config.log)?;

    let result = run(&config, cli.command);
    logging::shutdown();
    result
}
