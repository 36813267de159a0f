use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod db;
mod diff;
mod error;
mod grid;
mod merge;
mod models;
mod notify;
mod sheets;
mod store;
mod sync;

use crate::error::SyncResult;
use crate::grid::Grid;
use crate::models::DepartmentSheet;
use crate::sheets::{FileTokenStore, GoogleSheetSource};
use crate::store::SchoolDirectory;
use crate::sync::SyncService;

#[derive(Parser)]
#[command(name = "timetable-sync")]
#[command(about = "Spreadsheet timetable reconciliation for the campus portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Parse a worksheet exported as CSV and print the merged rows
    Parse {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Sync one department's spreadsheet
    Sync {
        #[arg(long)]
        department: i32,
    },
    /// Sync every enabled department
    SyncAll,
    /// Show the per-department sync-run ledger
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { csv } => parse_preview(&csv).await?,
        Commands::InitDb => {
            db::init_db(&connect_pool().await?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&connect_pool().await?).await?;
            println!("Seed data inserted.");
        }
        Commands::Sync { department } => {
            let pool = connect_pool().await?;
            let store = db::PgStore::new(pool);
            let sheets = connect_sheets().await?;
            let service = SyncService {
                sheets: &sheets,
                directory: &store,
                store: &store,
                ledger: &store,
                notifications: &store,
            };

            let mapping = store
                .list_enabled_spreadsheets()
                .await?
                .into_iter()
                .find(|s: &DepartmentSheet| s.department_id == department)
                .with_context(|| {
                    format!("department {department} has no enabled spreadsheet mapping")
                })?;

            let written = service.sync_department(&mapping).await?;
            println!("Synced {written} rows for department {department}.");
        }
        Commands::SyncAll => {
            let pool = connect_pool().await?;
            let store = db::PgStore::new(pool);
            let sheets = connect_sheets().await?;
            let service = SyncService {
                sheets: &sheets,
                directory: &store,
                store: &store,
                ledger: &store,
                notifications: &store,
            };

            let outcome = service.sync_all().await?;
            println!(
                "Synced {} departments, {} failed.",
                outcome.synced, outcome.failed
            );
        }
        Commands::Status => {
            let pool = connect_pool().await?;
            let runs = db::list_sync_runs(&pool).await?;
            if runs.is_empty() {
                println!("No sync runs recorded.");
            }
            for run in runs {
                println!(
                    "- department {}: {} (last run {}, last success {}){}",
                    run.department_id,
                    run.last_status.as_deref().unwrap_or("unknown"),
                    run.last_run_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string()),
                    run.last_success_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string()),
                    run.last_error
                        .map(|e| format!(" error: {e}"))
                        .unwrap_or_default(),
                );
            }
        }
    }

    Ok(())
}

async fn connect_pool() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the campus Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn connect_sheets() -> anyhow::Result<GoogleSheetSource> {
    let credentials_file = std::env::var("TIMETABLE_SYNC_CREDENTIALS_FILE")
        .unwrap_or_else(|_| "credentials.json".to_string());
    let token_file = std::env::var("TIMETABLE_SYNC_TOKEN_FILE")
        .unwrap_or_else(|_| "token.json".to_string());

    let source = GoogleSheetSource::connect(
        Path::new(&credentials_file),
        Box::new(FileTokenStore::new(token_file)),
    )
    .await?;
    Ok(source)
}

/// Directory stand-in for offline previews: every grade resolves to a class
/// id equal to the grade, and aliases get sequential ids in encounter order.
#[derive(Default)]
struct PreviewDirectory {
    aliases: Mutex<HashMap<String, i32>>,
}

#[async_trait]
impl SchoolDirectory for PreviewDirectory {
    async fn resolve_class_id(&self, _department_id: i32, grade: u8) -> SyncResult<Option<i32>> {
        Ok(Some(grade as i32))
    }

    async fn resolve_major_id(&self, _department_id: i32, alias: &str) -> SyncResult<Option<i32>> {
        let mut aliases = self.aliases.lock().unwrap();
        if let Some(id) = aliases.get(alias) {
            return Ok(Some(*id));
        }
        let id = aliases.len() as i32 + 1;
        aliases.insert(alias.to_string(), id);
        Ok(Some(id))
    }

    async fn list_enabled_spreadsheets(&self) -> SyncResult<Vec<DepartmentSheet>> {
        Ok(Vec::new())
    }
}

async fn parse_preview(csv: &Path) -> anyhow::Result<()> {
    let raw = sheets::load_csv_grid(csv)?;
    let grid = Grid::from_raw(raw);

    let headers = grid::find_block_headers(&grid);
    if headers.is_empty() {
        println!("No grade blocks found in {}.", csv.display());
        return Ok(());
    }

    println!("Detected blocks:");
    for header in &headers {
        let kind = match header.kind {
            models::BlockKind::Subject => "subjects",
            models::BlockKind::Teacher => "teachers",
        };
        let scope = match &header.scope {
            models::MajorScope::Common => "common".to_string(),
            models::MajorScope::Major(alias) => alias.clone(),
        };
        println!(
            "- row {}: grade {} ({scope}, {kind})",
            header.row_index + 1,
            header.grade
        );
    }

    let directory = PreviewDirectory::default();
    let rows = sync::merge_grid(&directory, 0, &grid).await?;

    println!();
    println!("Merged rows ({}):", rows.len());
    for row in rows {
        let major = row
            .major_id
            .map(|id| format!("major {id}"))
            .unwrap_or_else(|| "common".to_string());
        println!(
            "- grade {} {} {} {}限: {}（{}）",
            row.class_id, major, row.date, row.period, row.subject_name, row.teacher_name
        );
    }

    Ok(())
}
