use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "subrec")]
#[command(about = "Reconcile legacy subscribers into the user table")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create users for subscribers that have none, writing conflict reports.
    MigrateSubscribers,
    /// Copy consent from newer subscribers onto existing users.
    BackfillConsent,
    /// Apply the bundled schema migrations.
    Migrate,
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing("info")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateSubscribers => {
            let summary = subrec_jobs::run_creation_from_env().await?;
            for kind in &summary.kinds {
                println!(
                    "{}: scanned={} skipped={} from_subscriber={} from_client={} conflicts={} report={}",
                    kind.kind,
                    kind.scanned,
                    kind.skipped_existing,
                    kind.created_from_subscriber,
                    kind.created_from_client,
                    kind.conflicts,
                    kind.report_path
                );
            }
            println!(
                "user creation complete: run_id={} users_created={}",
                summary.run_id, summary.users_created
            );
        }
        Commands::BackfillConsent => {
            let summary = subrec_jobs::run_backfill_from_env().await?;
            println!(
                "consent backfill complete: run_id={} candidates={} updated={}",
                summary.run_id, summary.candidates, summary.updated
            );
        }
        Commands::Migrate => {
            subrec_jobs::migrate_from_env().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
