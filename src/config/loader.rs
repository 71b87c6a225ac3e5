use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load configuration from a file using the config crate.
/// Supports multiple formats: YAML, JSON, TOML, etc.
///
/// A missing file is not an error: the gateway then runs with defaults,
/// which matches the zero-config deployment the proxy originally shipped
/// with. The `PORT` environment variable, when set, overrides the port of
/// the listen address after loading.
pub fn load_config(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);

    let mut gateway_config = if path.exists() {
        // Determine file format based on extension
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            Some("toml") => FileFormat::Toml,
            Some("ini") => FileFormat::Ini,
            _ => FileFormat::Toml,
        };

        let settings = Config::builder()
            .add_source(File::new(
                path.to_str()
                    .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
                format,
            ))
            .build()
            .with_context(|| format!("Failed to build config from {}", path.display()))?;

        settings
            .try_deserialize::<GatewayConfig>()
            .with_context(|| format!("Failed to deserialize config from {}", path.display()))?
    } else {
        tracing::info!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        GatewayConfig::default()
    };

    apply_env_overrides(&mut gateway_config)?;
    Ok(gateway_config)
}

/// Apply environment overrides. Currently only `PORT`, which replaces the
/// port of the configured listen address.
fn apply_env_overrides(config: &mut GatewayConfig) -> Result<()> {
    if let Ok(port) = std::env::var("PORT") {
        let port: u16 = port
            .parse()
            .with_context(|| format!("PORT environment variable is not a valid port: {port}"))?;
        let host = config
            .listen_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("0.0.0.0");
        config.listen_addr = format!("{host}:{port}");
        tracing::info!("PORT override applied, listening on {}", config.listen_addr);
    }
    Ok(())
}
