//! Configuration validation logic.

use crate::config::schema::Config;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a Config for semantic correctness.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. Strategy and matcher are fixed at startup and must be known.
    if !matches!(config.proxy.strategy.as_str(), "rnd" | "rr") {
        errors.push(ValidationError(format!(
            "proxy.strategy must be \"rnd\" or \"rr\", got {:?}",
            config.proxy.strategy
        )));
    }
    if !matches!(config.proxy.matcher.as_str(), "prefix" | "glob") {
        errors.push(ValidationError(format!(
            "proxy.matcher must be \"prefix\" or \"glob\", got {:?}",
            config.proxy.matcher
        )));
    }

    // 2. Listener protos and cert source pairing.
    for (i, l) in config.listen.iter().enumerate() {
        match l.proto.as_str() {
            "http" | "tcp+sni" => {
                if l.cert_source.is_some() {
                    errors.push(ValidationError(format!(
                        "listen[{}]: cert_source requires proto \"https\"",
                        i
                    )));
                }
            }
            "https" => {
                if l.cert_source.is_none() {
                    errors.push(ValidationError(format!(
                        "listen[{}]: proto \"https\" requires a cert_source",
                        i
                    )));
                }
            }
            other => {
                errors.push(ValidationError(format!(
                    "listen[{}]: unknown proto {:?}",
                    i, other
                )));
            }
        }
        if l.addr.is_empty() {
            errors.push(ValidationError(format!("listen[{}]: addr is empty", i)));
        }
    }

    // 3. Registry backend.
    match config.registry.backend.as_str() {
        "consul" => {
            if config.registry.consul.addr.is_empty() {
                errors.push(ValidationError(
                    "registry.consul.addr is empty".to_string(),
                ));
            }
        }
        "file" => {
            if config.registry.file.path.is_empty() {
                errors.push(ValidationError("registry.file.path is empty".to_string()));
            }
        }
        "static" => {}
        other => {
            errors.push(ValidationError(format!(
                "unknown registry backend {:?}",
                other
            )));
        }
    }

    // 4. The gzip content-type pattern must compile.
    if !config.proxy.gzip_content_types.is_empty() {
        if let Err(e) = regex::Regex::new(&config.proxy.gzip_content_types) {
            errors.push(ValidationError(format!(
                "proxy.gzip_content_types is not a valid regex: {}",
                e
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
