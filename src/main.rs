use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use periscope::{
    WorkerSupervisor,
    config::{GatewayConfigValidator, loader::load_config},
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "periscope.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "periscope.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "periscope.toml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "periscope.toml")]
        config: String,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config), // Default to serve with config from args
    };

    match command {
        "validate" => return validate_config_command(&config_path),
        "init" => return init_config_command(&config_path),
        "serve" => {
            // Continue with normal server startup
        }
        _ => unreachable!(),
    }

    tracing_setup::init_tracing()?;

    tracing::info!("Loading configuration from {config_path}");
    let config =
        load_config(&config_path).with_context(|| format!("Failed to load {config_path}"))?;
    GatewayConfigValidator::validate(&config).context("Invalid configuration")?;

    println!(
        "Periscope gateway listening on {} ({} workers, cache TTL {}s)",
        config.listen_addr,
        config.worker_count(),
        config.cache_ttl_secs
    );

    // The supervisor owns the worker runtimes and blocks until the process
    // is terminated.
    WorkerSupervisor::new(Arc::new(config)).run()
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Public Host: {}", config.public_host);
            println!("   • Workers: {}", config.worker_count());
            println!("   • Cache TTL: {}s", config.cache_ttl_secs);
            println!("   • WebP Quality: {}", config.webp_quality);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Verify listen address format (e.g., '0.0.0.0:3000')");
            println!("   • public_host must be a bare hostname (no scheme or port)");
            println!("   • webp_quality must be between 1 and 100");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Periscope Gateway Configuration

# The address to listen on. Every worker binds it with SO_REUSEPORT.
# The PORT environment variable, when set, overrides the port.
listen_addr = "0.0.0.0:3000"

# The hostname the gateway is reachable at. Targets resolving to this host
# are rejected to prevent the gateway from proxying to itself.
public_host = "localhost"

# Worker threads; 0 means one per available CPU.
workers = 0

# Seconds a transformed response stays cached within one worker.
cache_ttl_secs = 60

# Quality for WebP image transcoding (1-100).
webp_quality = 75.0

# Budget for a single upstream fetch, in seconds.
upstream_timeout_secs = 30

# Maximum upstream redirects followed per request.
max_redirects = 5
"#;

    std::fs::write(path, default_config).context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'periscope serve --config {config_path}' to start the gateway");
    Ok(())
}
