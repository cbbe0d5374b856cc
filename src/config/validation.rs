//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that interceptor and rewrite rules compile
//! - Check the websocket outbound pattern names exactly one identity segment
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::bus::SubjectPattern;
use crate::config::schema::GatewayConfig;
use crate::interceptor::InterceptorRule;
use crate::routing::RewriteRule;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("interceptor #{index}: {reason}")]
    InvalidInterceptor { index: usize, reason: String },

    #[error("rewrite rule #{index}: {reason}")]
    InvalidRewriteRule { index: usize, reason: String },

    #[error("websocket.outbound_subject {value:?}: {reason}")]
    InvalidOutboundSubject { value: String, reason: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} is not a valid subject")]
    InvalidSubject(&'static str),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    for (value, field) in [
        (config.listener.max_body_size as u64, "listener.max_body_size"),
        (config.http.request_timeout_secs, "http.request_timeout_secs"),
        (config.bus.request_timeout_ms, "bus.request_timeout_ms"),
        (config.bus.http_backend_timeout_ms, "bus.http_backend_timeout_ms"),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(field));
        }
    }

    if config.auth.cookie_name.trim().is_empty() {
        errors.push(ValidationError::Empty("auth.cookie_name"));
    }
    if SubjectPattern::parse(&config.auth.decode_subject).is_err() {
        errors.push(ValidationError::InvalidSubject("auth.decode_subject"));
    }

    for (index, rule) in config.interceptors.iter().enumerate() {
        if let Err(e) = rule.parse::<InterceptorRule>() {
            errors.push(ValidationError::InvalidInterceptor {
                index,
                reason: e.to_string(),
            });
        }
    }

    for (index, rule) in config.rewrite_rules.iter().enumerate() {
        if let Err(e) = rule.parse::<RewriteRule>() {
            errors.push(ValidationError::InvalidRewriteRule {
                index,
                reason: e.to_string(),
            });
        }
    }

    if config.websocket.enabled {
        let outbound = &config.websocket.outbound_subject;
        match SubjectPattern::parse(outbound) {
            Ok(pattern) if pattern.param_names().len() == 1 => {}
            Ok(_) => errors.push(ValidationError::InvalidOutboundSubject {
                value: outbound.clone(),
                reason: "expected exactly one :param segment".to_string(),
            }),
            Err(e) => errors.push(ValidationError::InvalidOutboundSubject {
                value: outbound.clone(),
                reason: e.to_string(),
            }),
        }
        if SubjectPattern::parse(&config.websocket.unregister_subject).is_err() {
            errors.push(ValidationError::InvalidSubject("websocket.unregister_subject"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.bus.request_timeout_ms = 0;
        config.interceptors = vec!["x;http.*;target".into()];
        config.rewrite_rules = vec!["broken".into()];
        config.websocket.outbound_subject = "ws.out.>".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ZeroValue("bus.request_timeout_ms"))));
    }

    #[test]
    fn outbound_subject_ignored_when_websocket_disabled() {
        let mut config = GatewayConfig::default();
        config.websocket.enabled = false;
        config.websocket.outbound_subject = "nonsense..".into();
        assert!(validate_config(&config).is_ok());
    }
}
