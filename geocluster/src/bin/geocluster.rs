//! geocluster command line.
//!
//! # Commands
//!
//! - `ingest`: load JSON-lines features into a store location
//! - `run`: run multi-level clustering from a JSON configuration
//! - `hulls`: print the hulls of a batch as JSON

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use geocluster::clustering::jobs::hull_scope;
use geocluster::context::keys;
use geocluster::db::HullStore;
use geocluster::{
    ClusterEnv, ClusterResult, Database, Location, MultiLevelClusteringRunner, RunContext, Scope,
    Stage,
};

#[derive(Parser)]
#[command(name = "geocluster")]
#[command(version)]
#[command(about = "Multi-level k-means|| clustering of geospatial features")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load JSON-lines features into a store location
    Ingest {
        /// Database file
        #[arg(long)]
        db: Option<PathBuf>,
        /// JSON-lines input file
        #[arg(long)]
        input: PathBuf,
        /// Target location, e.g. /raw/roads
        #[arg(long)]
        location: String,
    },
    /// Run multi-level clustering; exits with the pipeline status
    Run {
        #[arg(long)]
        db: Option<PathBuf>,
        /// JSON object of configuration keys
        #[arg(long)]
        config: PathBuf,
        /// Write logs to a daily-rolling file in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Print hull records of a batch as JSON
    Hulls {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        batch_id: String,
        /// Only this zoom level
        #[arg(long)]
        level: Option<u32>,
        /// Hull data type, if the run set hull.data_type_id
        #[arg(long)]
        data_type: Option<String>,
        /// Hull index, if the run set hull.index_id
        #[arg(long)]
        index: Option<String>,
    },
}

fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory on this platform")?;
    Ok(base.join("geocluster").join("geocluster.db"))
}

fn open_db(path: Option<PathBuf>) -> Result<Database> {
    let path = match path {
        Some(path) => path,
        None => default_db_path()?,
    };
    Database::open(&path).with_context(|| format!("failed to open database {}", path.display()))
}

/// Hull scope a listing reads, with the same defaults a run writes under.
fn listing_scope(
    batch_id: String,
    data_type: Option<String>,
    index: Option<String>,
) -> ClusterResult<Scope> {
    let mut ctx = RunContext::new();
    ctx.set(keys::global::BATCH_ID, batch_id);
    if let Some(data_type) = data_type {
        ctx.set(keys::hull::DATA_TYPE_ID, data_type);
    }
    if let Some(index) = index {
        ctx.set(keys::hull::INDEX_ID, index);
    }
    hull_scope(&ctx)
}

async fn run(db: Option<PathBuf>, config: PathBuf) -> Result<ExitCode> {
    let mut ctx = RunContext::load(&config)?;
    let env = ClusterEnv::local(open_db(db)?);
    let runner = MultiLevelClusteringRunner::kmeans_parallel();

    let status = runner.execute(&env, &mut ctx).await?;
    let batch_id = ctx.get_str(keys::global::BATCH_ID, "")?;
    tracing::info!(batch_id = %batch_id, status = %status, trace = ?runner.trace(), "Run finished");
    println!("{}", batch_id);
    Ok(ExitCode::from(status.exit_code()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { db, input, location } => {
            let _guard = geocluster::logging::init_logging(None)?;
            let db = open_db(db)?;
            let count = geocluster::ingest::ingest_file(&db, &input, &Location::new(location))?;
            println!("{}", count);
        }
        Commands::Run { db, config, log_dir } => {
            // held until the run returns so the file writer flushes
            let _guard = geocluster::logging::init_logging(log_dir.as_deref())?;
            return run(db, config).await;
        }
        Commands::Hulls {
            db,
            batch_id,
            level,
            data_type,
            index,
        } => {
            let hulls = HullStore::new(open_db(db)?);
            let scope = listing_scope(batch_id, data_type, index)?;
            let records = match level {
                Some(level) => hulls.list(&scope, level)?,
                None => hulls.list_all(&scope)?,
            };
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hulls_defaults_match_run_defaults() {
        let cli = Cli::try_parse_from(["geocluster", "hulls", "--batch-id", "b1"]).unwrap();
        let Commands::Hulls {
            batch_id,
            data_type,
            index,
            ..
        } = cli.command
        else {
            panic!("expected hulls command");
        };
        assert_eq!(
            listing_scope(batch_id, data_type, index).unwrap(),
            Scope::new(
                keys::hull::DEFAULT_DATA_TYPE_ID,
                keys::centroid::DEFAULT_INDEX_ID,
                "b1"
            )
        );
    }

    #[test]
    fn test_hulls_custom_scope() {
        let cli = Cli::try_parse_from([
            "geocluster",
            "hulls",
            "--batch-id",
            "b1",
            "--data-type",
            "road_hull",
            "--index",
            "mercator",
            "--level",
            "2",
        ])
        .unwrap();
        let Commands::Hulls {
            batch_id,
            level,
            data_type,
            index,
            ..
        } = cli.command
        else {
            panic!("expected hulls command");
        };
        assert_eq!(level, Some(2));
        assert_eq!(
            listing_scope(batch_id, data_type, index).unwrap(),
            Scope::new("road_hull", "mercator", "b1")
        );
    }
}
