//! Netweft command-line entry point
//!
//! One binary, four modes: `queue-server` runs the scheduler/indexer HTTP
//! server and its maintenance loop, `fetcher` runs a crawl worker,
//! `admin` drops an operator message for a running queue-server, and
//! `dry-run` validates a config and prints the crawl plan.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use netweft::config::load_config_with_hash;
use netweft::fetch::FetchCoordinator;
use netweft::schedule::{write_admin_message, AdminMessage, AdminStatus, ServerRole};
use netweft::server::{run_maintenance, serve, AppContext};

#[derive(Parser)]
#[command(name = "netweft")]
#[command(about = "Distributed crawl scheduler and indexer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the queue-server: HTTP surface plus maintenance loop
    QueueServer {
        /// Path to the TOML configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,

        /// Which halves of the server to run
        #[arg(long, default_value = "both", value_parser = parse_role)]
        role: ServerRole,
    },

    /// Run a fetcher worker
    Fetcher {
        /// Path to the TOML configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,

        /// Stable identifier reported with every upload
        #[arg(long, value_name = "ID")]
        machine_id: Option<String>,
    },

    /// Write an operator message for the queue-server maintenance loop
    Admin {
        /// Path to the TOML configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,

        /// One of: new-crawl, stop-crawl, resume-crawl
        #[arg(value_parser = parse_admin_status)]
        status: AdminStatus,

        /// Crawl timestamp for new-crawl; defaults to the current epoch second
        #[arg(long, value_name = "EPOCH")]
        crawl_time: Option<u64>,
    },

    /// Validate the configuration and print the crawl plan
    DryRun {
        /// Path to the TOML configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,
    },
}

fn parse_role(s: &str) -> Result<ServerRole, String> {
    match s {
        "both" => Ok(ServerRole::Both),
        "scheduler" => Ok(ServerRole::Scheduler),
        "indexer" => Ok(ServerRole::Indexer),
        other => Err(format!(
            "unknown role '{}' (expected both, scheduler or indexer)",
            other
        )),
    }
}

fn parse_admin_status(s: &str) -> Result<AdminStatus, String> {
    match s {
        "new-crawl" => Ok(AdminStatus::NewCrawl),
        "stop-crawl" => Ok(AdminStatus::StopCrawl),
        "resume-crawl" => Ok(AdminStatus::ResumeCrawl),
        other => Err(format!(
            "unknown status '{}' (expected new-crawl, stop-crawl or resume-crawl)",
            other
        )),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::QueueServer { config, role } => handle_queue_server(&config, role).await,
        Command::Fetcher { config, machine_id } => handle_fetcher(&config, machine_id).await,
        Command::Admin {
            config,
            status,
            crawl_time,
        } => handle_admin(&config, status, crawl_time),
        Command::DryRun { config } => handle_dry_run(&config),
    }
}

/// Sets up tracing-based logging at the requested verbosity
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("netweft=info,warn"),
            1 => EnvFilter::new("netweft=debug,info"),
            2 => EnvFilter::new("netweft=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

async fn handle_queue_server(
    config_path: &PathBuf,
    role: ServerRole,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config, hash) = match load_config_with_hash(config_path) {
        Ok(loaded) => {
            tracing::info!("Configuration loaded successfully (hash: {})", loaded.1);
            loaded
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let ctx = AppContext::initialize(config, hash, role)?;

    // A saved CONTINUE phase means the last run stopped without an
    // operator stop-crawl; pick the crawl back up from schedule files
    {
        let mut scheduler = ctx
            .scheduler
            .lock()
            .map_err(|_| "scheduler lock poisoned at startup")?;
        let mut store = ctx
            .store
            .lock()
            .map_err(|_| "store lock poisoned at startup")?;
        if store.get_state("crawl_phase")?.as_deref() == Some("CONTINUE") {
            scheduler.resume_crawl(&mut store)?;
        }
    }

    tracing::info!(?role, "Starting queue-server");
    tokio::select! {
        result = serve(ctx.clone()) => result?,
        result = run_maintenance(ctx.clone()) => result?,
    }
    Ok(())
}

async fn handle_fetcher(
    config_path: &PathBuf,
    machine_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config, _hash) = match load_config_with_hash(config_path) {
        Ok(loaded) => {
            tracing::info!("Configuration loaded successfully (hash: {})", loaded.1);
            loaded
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let machine_id =
        machine_id.unwrap_or_else(|| format!("fetcher-{}", std::process::id()));

    let mut coordinator = FetchCoordinator::new(&config, machine_id)?;
    coordinator.run().await?;
    tracing::info!("Fetcher stopped by queue-server");
    Ok(())
}

fn handle_admin(
    config_path: &PathBuf,
    status: AdminStatus,
    crawl_time: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config, _) = load_config_with_hash(config_path)?;

    let crawl_time = match status {
        AdminStatus::NewCrawl => match crawl_time {
            Some(t) => t,
            None => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)?
                .as_secs(),
        },
        _ => crawl_time.unwrap_or(0),
    };

    let schedules_dir = PathBuf::from(&config.paths.work_dir).join("schedules");
    write_admin_message(&schedules_dir, &AdminMessage { status, crawl_time })?;
    println!(
        "Wrote admin message to {}",
        schedules_dir.join(netweft::schedule::MESSAGE_FILE).display()
    );
    Ok(())
}

/// Handles the dry-run mode: validates config and shows the crawl plan
fn handle_dry_run(config_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let (config, hash) = load_config_with_hash(config_path)?;

    println!("=== Netweft Dry Run ===\n");

    println!("Crawl Configuration:");
    println!("  Order: {:?}", config.crawl.crawl_order);
    println!("  Max fetch batch size: {}", config.crawl.max_fetch_size);
    println!(
        "  Slots per burst: {}",
        config.crawl.num_multi_fetch_pages
    );
    println!("  Frontier capacity: {}", config.crawl.max_queue_size);
    println!(
        "  Docs per index generation: {}",
        config.crawl.docs_per_generation
    );
    println!("  Robots TTL: {}h", config.crawl.robots_ttl_hours);
    println!("  Restrict by URL: {}", config.crawl.restrict_by_url);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.user_agent_string());

    println!("\nNetwork:");
    println!("  Bind address: {}", config.network.bind_address);
    println!("  Name server: {}", config.network.name_server);
    println!("  Queue servers ({}):", config.network.queue_servers.len());
    for server in &config.network.queue_servers {
        println!("    - {}", server);
    }

    println!("\nPaths:");
    println!("  Work dir: {}", config.paths.work_dir);
    println!("  Database: {}", config.paths.database_path);

    println!("\nSite Rules:");
    println!("  Allowed patterns: {}", config.sites.allowed.len());
    for pattern in &config.sites.allowed {
        println!("    + {}", pattern);
    }
    println!("  Disallowed patterns: {}", config.sites.disallowed.len());
    for pattern in &config.sites.disallowed {
        println!("    - {}", pattern);
    }
    println!(
        "  Document types: {}",
        config.sites.allowed_doc_types.join(", ")
    );

    println!("\n✓ Configuration is valid (hash: {})", hash);
    Ok(())
}
