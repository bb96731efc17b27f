//! Quarry Command-Line Client
//!
//! Translates and runs object queries against a SQLite database described by
//! a JSON mapping file.

mod formatter;
mod params;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use quarry_core::{Database, Metamodel, SessionFactory, SessionFactoryOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Quarry Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(version, about = "Translate and run object queries against SQLite")]
pub struct Args {
    /// JSON mapping file (boot model)
    #[arg(short, long, global = true)]
    pub mapping: Option<PathBuf>,

    /// SQLite database file; an in-memory database when omitted
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// SQL script run before the command, typically DDL and seed data
    #[arg(long, global = true)]
    pub init: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    /// Log every SQL statement
    #[arg(long, global = true)]
    pub show_sql: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the SQL a query translates to, without running it
    Translate {
        query: String,
    },
    /// Run a select, update or delete
    Query {
        query: String,

        /// Parameter binding `name=value` or `1=value`; repeatable
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Skip this many results
        #[arg(long)]
        first: Option<usize>,

        /// Return at most this many results
        #[arg(long)]
        max: Option<usize>,
    },
    /// Check query syntax only
    Parse {
        query: String,
    },
    /// List mapped entities
    Describe {
        /// Only this entity
        entity: Option<String>,
    },
}

/// Errors surfaced to the command line.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Core(#[from] quarry_core::Error),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("a mapping file is required (--mapping)")]
    MissingMapping,

    #[error("invalid parameter '{0}': expected name=value")]
    InvalidParameter(String),
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quarry=warn,quarry_core=warn")),
        )
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(output) => println!("{}", output),
        Err(CliError::Core(e)) => {
            let source = match &args.command {
                Command::Translate { query } | Command::Query { query, .. } | Command::Parse { query } => {
                    query.as_str()
                }
                Command::Describe { .. } => "",
            };
            eprint!("{}", e.format_with_source(source));
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<String, CliError> {
    let formatter = formatter::create_formatter(args.format);

    match &args.command {
        Command::Parse { query } => {
            let statement = quarry_lang::parse(query).map_err(quarry_core::Error::from)?;
            Ok(formatter.format_message(&format!("{:#?}", statement)))
        }
        Command::Translate { query } => {
            let factory = build_factory(args)?;
            let operation = factory.translate(query)?;
            Ok(formatter.format_translation(&operation))
        }
        Command::Query {
            query,
            params,
            first,
            max,
        } => {
            let factory = build_factory(args)?;
            let bindings = params::parse_all(params)?;
            let is_select = factory.interpret(query)?.is_select();
            let mut session = factory.open_session()?;
            let mut prepared = session.create_query(query)?;
            for binding in bindings {
                prepared = binding.apply(prepared);
            }
            if let Some(first) = first {
                prepared = prepared.set_first_result(*first);
            }
            if let Some(max) = max {
                prepared = prepared.set_max_results(*max);
            }
            if is_select {
                let rows = prepared.list()?;
                Ok(formatter.format_rows(&rows))
            } else {
                let affected = prepared.execute_update()?;
                Ok(formatter.format_update(affected))
            }
        }
        Command::Describe { entity } => {
            let factory = build_factory(args)?;
            let metamodel = factory.metamodel();
            let mut entities = Vec::new();
            match entity {
                Some(name) => entities.push(Arc::clone(metamodel.entity_descriptor(name)?)),
                None => metamodel.visit_entity_descriptors(|e| entities.push(Arc::clone(e))),
            }
            entities.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(formatter.format_entities(&entities))
        }
    }
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn build_factory(args: &Args) -> Result<Arc<SessionFactory>, CliError> {
    let mapping = args.mapping.as_deref().ok_or(CliError::MissingMapping)?;
    let metamodel = Metamodel::from_json(&read(mapping)?)?;
    let options = SessionFactoryOptions::default().with_log_sql(args.show_sql);
    let database = match &args.database {
        Some(path) => Database::file(path),
        None => Database::memory(),
    };
    let factory = SessionFactory::builder(metamodel)
        .options(options)
        .database(database)
        .build()?;
    if let Some(init) = &args.init {
        factory.execute_batch(&read(init)?)?;
    }
    Ok(factory)
}
