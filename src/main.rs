//! taintstore CLI - persist static-analysis runs into a SQLite database

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use taintstore::config::{self, TaintstoreConfig};
use taintstore::input::RunInput;
use taintstore::storage::{RunSummary, SqliteStore};
use taintstore::ui::{self, Icons, Spinner};
use taintstore::{persist, DbId, EntityKind, PrimaryKeyAllocator};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "taintstore")]
#[command(version)]
#[command(about = "Batch persistence for static-analysis runs")]
#[command(long_about = r#"
taintstore stores the issues, trace frames and shared strings of analysis
runs in a SQLite database, deduplicating against what is already stored.

Example usage:
  taintstore init
  taintstore ingest --input run.json
  taintstore stats --json
  taintstore stats --run 3
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and a config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Persist one analysis run
    Ingest {
        /// Run description (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Resync counters to the stored maximum before reserving ids
        #[arg(long)]
        resync: bool,

        /// Parameters bound per key lookup
        #[arg(long)]
        batch_size: Option<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show row counts and counters, or the issue counts of one run
    Stats {
        /// Summarize this run instead of the whole database
        #[arg(short, long)]
        run: Option<i64>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset primary key counters to the largest stored ids
    Resync {
        /// Only this kind (e.g. issue, shared_texts)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    let database = resolve_database(cli.database.as_deref(), &config)?;

    match cli.command {
        Commands::Init { force } => {
            let config_path = cli.config.unwrap_or_else(config::default_config_path);
            config::ensure_db_dir(&database)?;
            SqliteStore::open_with(&database, &config.store_options())?;
            ui::success(&format!("Database ready at {}", database.display()));

            if config_path.exists() && !force {
                ui::info("Config", &format!("keeping {}", config_path.display()));
            } else {
                let written = TaintstoreConfig {
                    database: Some(database.display().to_string()),
                    ..config
                };
                config::write_config(&config_path, &written, force)?;
                ui::success(&format!("Wrote {}", config_path.display()));
            }
        }

        Commands::Ingest {
            input,
            resync,
            batch_size,
            json,
        } => {
            let mut options = config.persist_options();
            options.use_lock |= resync;
            if let Some(batch_size) = batch_size {
                anyhow::ensure!(batch_size > 0, "--batch-size must be at least 1");
                options.batch_size = batch_size;
            }

            config::ensure_db_dir(&database)?;
            let store = SqliteStore::open_with(&database, &config.store_options())?;
            let batch = RunInput::load(&input)?.into_batch()?;

            if !json {
                ui::header(Icons::INBOX, &format!("Ingesting {}", input.display()));
                ui::summary_row("Database:", &database.display().to_string());
                ui::summary_row("Records:", &batch.len().to_string());
            }

            let run_ids: Vec<DbId> = batch.runs.iter().map(|run| run.id.clone()).collect();
            let started = Instant::now();
            let spinner = Spinner::new("Persisting run...");
            let result = persist(&store, batch, &options);
            spinner.finish_and_clear();
            let summary = result?;

            let mut runs = Vec::new();
            for id in &run_ids {
                let run_id = id.resolved()?;
                runs.extend(store.run_summary(run_id)?);
            }

            if json {
                let output = serde_json::json!({ "summary": summary, "runs": runs });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", ui::summary_table(&summary));
                ui::success(&format!(
                    "Inserted {} rows in {:.2?}",
                    summary.total_inserted(),
                    started.elapsed()
                ));
                for run in &runs {
                    print_run_summary(run);
                }
            }
        }

        Commands::Stats { run: Some(run_id), json } => {
            let store = open_existing(&database, &config)?;
            let Some(run) = store.run_summary(run_id)? else {
                anyhow::bail!("no run with id {} in {}", run_id, database.display());
            };
            let new_issues = store.new_issue_instances(run_id)?;

            if json {
                let output = serde_json::json!({ "run": run, "new_issues": new_issues });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_run_summary(&run);
                let table = ui::new_issues_table(&new_issues);
                if !table.is_empty() {
                    println!("{}", table);
                }
            }
        }

        Commands::Stats { run: None, json } => {
            let store = open_existing(&database, &config)?;
            let stats = store.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                ui::header(Icons::STATS, &format!("Statistics for {}", database.display()));
                println!("{}", ui::stats_table(&stats));
            }
        }

        Commands::Resync { kind } => {
            let store = open_existing(&database, &config)?;
            let kinds: Vec<EntityKind> = match kind {
                Some(name) => vec![name.parse()?],
                None => EntityKind::allocator_managed().collect(),
            };

            ui::header(Icons::WRENCH, "Resyncing primary key counters");
            for kind in kinds {
                let current_id = PrimaryKeyAllocator::resync(&store, kind)?;
                ui::summary_row(&format!("{}:", kind.table_name()), &current_id.to_string());
            }
        }
    }

    Ok(())
}

fn print_run_summary(run: &RunSummary) {
    let title = match &run.job_id {
        Some(job_id) => format!("Run {} (job {})", run.id, job_id),
        None => format!("Run {}", run.id),
    };
    ui::header(Icons::RUN, &title);
    ui::summary_row("Status:", &run.status);
    if let Some(commit_hash) = &run.commit_hash {
        ui::summary_row("Commit:", commit_hash);
    }
    ui::summary_row(
        "Issues:",
        &format!("{} ({} new)", run.num_total_issues, run.num_new_issues),
    );
    let table = ui::alarm_table(run);
    if !table.is_empty() {
        println!("{}", table);
    }
}

/// CLI flag, then config file, then the default under the working directory
fn resolve_database(flag: Option<&Path>, config: &TaintstoreConfig) -> anyhow::Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = &config.database {
        return Ok(PathBuf::from(path));
    }
    Ok(config::default_database_path_in(&std::env::current_dir()?))
}

fn open_existing(database: &Path, config: &TaintstoreConfig) -> anyhow::Result<SqliteStore> {
    if !database.exists() {
        anyhow::bail!(
            "no database at {} (run `taintstore init` or `taintstore ingest` first)",
            database.display()
        );
    }
    Ok(SqliteStore::open_with(database, &config.store_options())?)
}
