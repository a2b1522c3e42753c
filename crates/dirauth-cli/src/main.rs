//! Dirauth - directory authentication from the command line
//!
//! Logs users in, runs searches and lists group memberships against the
//! configured LDAP servers.

mod commands;

use clap::{Parser, Subcommand};
use dirauth_core::config::LoggingConfig;
use dirauth_core::DirauthConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dirauth")]
#[command(author = "Dirauth Team")]
#[command(version = dirauth_core::VERSION)]
#[command(about = "LDAP authentication, group resolution and claims", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DIRAUTH_CONFIG")]
    config: Option<String>,

    /// Directory servers, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    servers: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "DIRAUTH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate a user and print their identity and claims
    Login {
        username: String,

        #[arg(long, env = "DIRAUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Search every configured base
    Search {
        filter: String,

        /// Attributes to return, comma separated
        #[arg(short, long, value_delimiter = ',')]
        attributes: Vec<String>,
    },

    /// List a user's groups
    Groups {
        username: String,

        /// Include nested groups
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show the group at a distinguished name
    Group { dn: String },

    /// Change a user's own password
    Passwd {
        username: String,

        #[arg(long, env = "DIRAUTH_PASSWORD", hide_env_values = true)]
        old_password: String,

        #[arg(long, env = "DIRAUTH_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },

    /// Validate the configuration and print the effective mapping
    CheckConfig,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = DirauthConfig::from_file(path)?;
            config.apply_env();
            config
        }
        None => DirauthConfig::from_env(),
    };

    if !cli.servers.is_empty() {
        config.directory.servers = cli.servers.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }

    init_logging(&config.logging);

    match cli.command {
        Commands::Login { username, password } => {
            commands::login(&config, &username, &password).await
        }
        Commands::Search { filter, attributes } => {
            commands::search(&config, &filter, &attributes).await
        }
        Commands::Groups {
            username,
            recursive,
        } => commands::groups(&config, &username, recursive).await,
        Commands::Group { dn } => commands::group(&config, &dn).await,
        Commands::Passwd {
            username,
            old_password,
            new_password,
        } => commands::change_password(&config, &username, &old_password, &new_password).await,
        Commands::CheckConfig => commands::check_config(&config),
        Commands::Version => {
            println!("dirauth {}", dirauth_core::VERSION);
            Ok(())
        }
    }
}

/// Logs go to stderr; stdout carries command output
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
