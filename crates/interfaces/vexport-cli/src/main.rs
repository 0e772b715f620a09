use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vexport_cli::{commands, ExportRequest};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a VM's disks and files through an export lease
    Export {
        #[arg(long, env = "VEXPORT_ENDPOINT")]
        endpoint: String,
        #[arg(long)]
        vm: String,
        #[arg(long, env = "VEXPORT_TOKEN", hide_env_values = true)]
        token: Option<String>,
        #[arg(long, help = "Accept self-signed endpoint certificates")]
        insecure: bool,
        #[arg(short, long, default_value_t = vexport_config::DEFAULT_CONCURRENT_TRANSFERS)]
        threads: usize,
        #[arg(long)]
        limit_mb: Option<u64>,
        #[arg(long, help = "List the lease's files without downloading them")]
        dry_run: bool,
        destination: Utf8PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(":: Interrupted, aborting export lease...");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Export {
            endpoint,
            vm,
            token,
            insecure,
            threads,
            limit_mb,
            dry_run,
            destination,
        } => {
            let req = ExportRequest {
                endpoint,
                vm,
                token,
                insecure,
                threads,
                limit_mb,
                destination,
            };
            if dry_run {
                commands::cmd_dry_run(req, cancel).await?;
            } else {
                commands::cmd_export(req, cancel).await?;
            }
        }
    }

    Ok(())
}
