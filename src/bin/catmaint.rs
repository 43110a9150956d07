use anyhow::Result;
use catmaint::cleanup::confirm::StdinConfirm;
use catmaint::cleanup::pace::MinInterval;
use catmaint::cleanup::{
    run_sweep, SweepFilter, SweepOptions, SweepReport, BATCH_SIZE,
};
use catmaint::supabase::rest::CatalogClient;
use catmaint::supabase::storage::{StorageClient, MODEL_BUCKET};
use catmaint::supabase::SupabaseConfig;
use catmaint::util::env as env_util;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Pause between storage delete sub-batches (the bucket API rate limit).
const STORAGE_PAUSE: Duration = Duration::from_millis(300);
/// Pause between catalog pages.
const PAGE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "catmaint", version, about = "Product catalog maintenance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Delete ALL generated 3D model files and clear their catalog links.
    /// Requires typing 'DELETE ALL' at the prompt.
    PurgeModels {
        /// Catalog rows fetched per page
        #[arg(long, default_value_t = BATCH_SIZE)]
        page_size: usize,
        /// Storage bucket holding the model files
        #[arg(long, default_value = MODEL_BUCKET)]
        bucket: String,
        /// Only report what would be deleted, without mutating anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Rehearsal: delete a handful of models from the 7-14 day old window.
    /// Requires typing 'yes' at the prompt.
    TestPurge {
        /// Maximum rows to process in the single batch
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Storage bucket holding the model files
        #[arg(long, default_value = MODEL_BUCKET)]
        bucket: String,
    },
    /// Count products still holding a model URL (non-destructive)
    VerifyModels,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();

    env_util::preflight_check(
        "catmaint",
        &["SUPABASE_URL"],
        &["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY", "SUPABASE_KEY"],
    )?;

    let cli = Cli::parse();

    tokio::select! {
        res = run(cli) => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted by operator; already-processed batches remain applied");
            println!("\nAborted. Progress up to this point has been applied; re-run to resume.");
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = SupabaseConfig::from_env()?;
    let catalog = CatalogClient::new(&cfg)?;

    match cli.command {
        Commands::PurgeModels {
            page_size,
            bucket,
            dry_run,
        } => {
            let store = StorageClient::new(&cfg, &bucket)?;
            println!("Delete ALL 3D models from storage");
            println!("WARNING: this removes every generated model file, not just aged ones.");
            let opts = SweepOptions {
                filter: SweepFilter::default(),
                page_size: page_size.max(1),
                single_batch: false,
                confirmation_phrase: "DELETE ALL".to_string(),
                dry_run,
            };
            let report = run_sweep(
                &catalog,
                &store,
                &StdinConfirm,
                &MinInterval::new(STORAGE_PAUSE),
                &MinInterval::new(PAGE_PAUSE),
                &opts,
            )
            .await?;
            print_report("purge-models", &report);
        }
        Commands::TestPurge { limit, bucket } => {
            let store = StorageClient::new(&cfg, &bucket)?;
            let filter = SweepFilter::aged_window(chrono::Utc::now());
            if let (Some(from), Some(until)) = (filter.updated_from, filter.updated_until) {
                info!(%from, %until, "test-purge: deletion window");
            }
            let opts = SweepOptions {
                filter,
                page_size: limit.max(1),
                single_batch: true,
                confirmation_phrase: "yes".to_string(),
                dry_run: false,
            };
            let report = run_sweep(
                &catalog,
                &store,
                &StdinConfirm,
                &MinInterval::new(STORAGE_PAUSE),
                &MinInterval::new(PAGE_PAUSE),
                &opts,
            )
            .await?;
            print_report("test-purge", &report);
        }
        Commands::VerifyModels => {
            use catmaint::cleanup::Catalog;
            let remaining = catalog.count_matching(&SweepFilter::default()).await?;
            if remaining == 0 {
                println!("No products still hold a model URL.");
            } else {
                println!("Products still holding a model URL: {remaining}");
            }
        }
    }

    Ok(())
}

fn print_report(op: &str, report: &SweepReport) {
    match report {
        SweepReport::NothingToDo => {
            println!("No matching products found; nothing to do.");
        }
        SweepReport::Aborted => {
            println!("Deletion cancelled; no changes were made.");
        }
        SweepReport::Completed { stats, remaining } => {
            println!();
            println!("{op} complete");
            println!("  pages processed:  {}", stats.pages);
            println!("  files deleted:    {}", stats.files_deleted);
            println!("  rows cleared:     {}", stats.rows_cleared);
            println!("  delete failures:  {}", stats.delete_failures);
            println!("  update failures:  {}", stats.update_failures);
            println!("  skipped urls:     {}", stats.skipped_urls);
            if *remaining == 0 {
                println!("Verification: no products still match the cleanup predicate.");
            } else {
                println!("WARNING: {remaining} products still match the cleanup predicate.");
            }
        }
    }
}
