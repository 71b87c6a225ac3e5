use std::net::SocketAddr;

use crate::config::models::GatewayConfig;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.public_host.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "public_host".to_string(),
            });
        } else if config.public_host.contains('/') || config.public_host.contains(':') {
            errors.push(ValidationError::InvalidField {
                field: "public_host".to_string(),
                message: "must be a bare hostname without scheme, port or path".to_string(),
            });
        }

        if config.webp_quality < 1.0 || config.webp_quality > 100.0 {
            errors.push(ValidationError::InvalidField {
                field: "webp_quality".to_string(),
                message: format!("must be between 1 and 100, got {}", config.webp_quality),
            });
        }

        if config.cache_ttl_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "cache_ttl_secs".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        if config.upstream_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "upstream_timeout_secs".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        if config.max_redirects > 16 {
            errors.push(ValidationError::InvalidField {
                field: "max_redirects".to_string(),
                message: format!("must be at most 16, got {}", config.max_redirects),
            });
        }

        if config.workers > 1024 {
            errors.push(ValidationError::InvalidField {
                field: "workers".to_string(),
                message: format!("must be at most 1024, got {}", config.workers),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {}", i + 1, e))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(GatewayConfigValidator::validate(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_listen_address() {
        let config = GatewayConfig {
            listen_addr: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_public_host_with_scheme() {
        let config = GatewayConfig {
            public_host: "https://gateway.example.com".to_string(),
            ..Default::default()
        };
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_webp_quality() {
        let config = GatewayConfig {
            webp_quality: 140.0,
            ..Default::default()
        };
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_ttl() {
        let config = GatewayConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        };
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }
}
