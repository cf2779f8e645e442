use chrono::{Duration, Utc};
use clap::Parser;
use ipgate::{IpGateBuilder, IpGateConfig, IpGateError, IpRecordQuery, IpStatus};
use serde::Serialize;

/// Command line administration for ipgate
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Database connection string, overriding the configuration file
    #[arg(long)]
    db_url: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(clap::Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Report whether an IP is currently blocked
    Check { ip: String },
    /// Block an IP
    Block {
        ip: String,
        #[arg(long)]
        reason: String,
        /// Minutes until the block lifts; omit for an indefinite block
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Lift a block on an IP
    Unblock { ip: String },
    /// List IP records
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Show counts by status
    Stats,
    /// Print version information
    Version,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), IpGateError> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| IpGateError::Config(e.to_string()))?;
    println!("{json}");
    Ok(())
}

async fn run(cli: Cli) -> Result<(), IpGateError> {
    if let Commands::Version = cli.command {
        println!("ipgate v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => IpGateConfig::from_file(path)?,
        None => IpGateConfig::default(),
    };
    if let Some(db_url) = cli.db_url {
        config.storage.database_url = db_url;
    }
    if let Commands::Migrate = cli.command {
        config.storage.apply_migrations = true;
    }

    let gate = IpGateBuilder::new(config).build_sqlite().await?;

    match cli.command {
        Commands::Migrate => println!("Migrations applied"),
        Commands::Check { ip } => print_json(&gate.check_status(&ip).await?)?,
        Commands::Block {
            ip,
            reason,
            minutes,
        } => {
            let until = minutes.map(|m| Utc::now() + Duration::minutes(m));
            print_json(&gate.block(&ip, &reason, until).await?)?;
        }
        Commands::Unblock { ip } => print_json(&gate.unblock(&ip).await?)?,
        Commands::List {
            status,
            search,
            page,
            limit,
        } => {
            let mut query = IpRecordQuery::default().with_page(page, limit);
            if let Some(status) = status {
                let status = status
                    .parse::<IpStatus>()
                    .map_err(ipgate::CoreError::from)?;
                query = query.with_status(status);
            }
            if let Some(search) = search {
                query = query.with_search(search);
            }
            print_json(&gate.list(&query).await?)?;
        }
        Commands::Stats => print_json(&gate.statistics().await?)?,
        Commands::Version => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
