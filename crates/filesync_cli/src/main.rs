//! filesync CLI
//!
//! Runs the sync server and manages its users file.
//!
//! # Commands
//!
//! - `serve` - Serve the master file over HTTP
//! - `add-user` - Add a user or replace their password
//! - `list-users` - List registered usernames

mod commands;
mod http;

use clap::{Parser, Subcommand};
use filesync_server::ServerConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Master file synchronization server.
#[derive(Parser)]
#[command(name = "filesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding master.txt, users.json and sync.log
    #[arg(global = true, short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the master file over HTTP
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Seconds before an unfinished sync record expires (0 keeps them forever)
        #[arg(long, default_value = "86400")]
        record_ttl_secs: u64,

        /// Seconds between expiry sweeps
        #[arg(long, default_value = "60")]
        reap_interval_secs: u64,
    },

    /// Add a user or replace their password
    AddUser {
        /// Username
        username: String,

        /// Password
        password: String,
    },

    /// List registered usernames
    ListUsers,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::new(&cli.data_dir);

    match cli.command {
        Commands::Serve {
            host,
            port,
            record_ttl_secs,
            reap_interval_secs,
        } => {
            let ttl = (record_ttl_secs > 0).then(|| Duration::from_secs(record_ttl_secs));
            let config = config
                .with_bind_addr(SocketAddr::new(host, port))
                .with_record_ttl(ttl)
                .with_reap_interval(Duration::from_secs(reap_interval_secs.max(1)));

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::serve::run(config))?;
        }
        Commands::AddUser { username, password } => {
            commands::add_user::run(&config.users_file, &username, &password)?;
        }
        Commands::ListUsers => {
            commands::list_users::run(&config.users_file)?;
        }
    }

    Ok(())
}
