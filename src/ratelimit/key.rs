//! Rate limit key generation.
//!
//! Keys follow the `<namespace>:<rule>:<business key>` scheme, e.g.
//! `smsService:sendLimit:register-user`. The business key is derived from the
//! arguments of an intercepted call by a [`KeyBuilder`], which is supplied per
//! guarded operation.

use std::fmt;
use std::net::SocketAddr;

use serde_json::Value;
use tracing::debug;

use crate::error::{GatekeeperError, Result};

/// A key that uniquely identifies the resource being throttled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Create a key from its namespace, rule name and business key.
    pub fn new(namespace: &str, rule: &str, business_key: &str) -> Self {
        Self(format!("{}:{}:{}", namespace, rule, business_key))
    }

    /// Prepend a deployment-wide prefix, if one is configured.
    pub fn with_prefix(self, prefix: Option<&str>) -> Self {
        match prefix {
            Some(p) if !p.is_empty() => Self(format!("{}:{}", p, self.0)),
            _ => self,
        }
    }

    /// The key as sent to the counter store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Read-only view of the request that triggered a guarded call.
///
/// Only used for diagnostics; it never influences the admission decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Network origin of the caller
    pub remote_addr: Option<SocketAddr>,
    /// Request path that led to the call
    pub path: Option<String>,
}

impl RequestContext {
    /// Create a context from a caller address and request path.
    pub fn new(remote_addr: SocketAddr, path: impl Into<String>) -> Self {
        Self {
            remote_addr: Some(remote_addr),
            path: Some(path.into()),
        }
    }
}

/// Derives the business key for a call from its arguments.
///
/// Implementations must be pure: the same arguments always yield the same key.
/// Failure to find the expected identifier is a [`GatekeeperError::Parameter`].
pub trait KeyBuilder<A: ?Sized>: Send + Sync {
    /// Build the business key portion of the rate limit key.
    fn build(&self, args: &A, context: Option<&RequestContext>) -> Result<String>;
}

impl<A, F> KeyBuilder<A> for F
where
    A: ?Sized,
    F: Fn(&A, Option<&RequestContext>) -> Result<String> + Send + Sync,
{
    fn build(&self, args: &A, context: Option<&RequestContext>) -> Result<String> {
        self(args, context)
    }
}

/// Arguments of a dynamically described call, one JSON value per parameter.
pub type CallArgs = [Value];

/// Key builder that reads a string field from the first call argument.
///
/// This is the key builder used for bindings declared in configuration.
#[derive(Debug, Clone)]
pub struct JsonFieldKeyBuilder {
    field: String,
    require_context: bool,
}

impl JsonFieldKeyBuilder {
    /// Extract `field` from the first argument.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            require_context: false,
        }
    }

    /// Fail with a parameter error when the call carries no request context.
    pub fn require_context(mut self, require: bool) -> Self {
        self.require_context = require;
        self
    }
}

impl KeyBuilder<CallArgs> for JsonFieldKeyBuilder {
    fn build(&self, args: &CallArgs, context: Option<&RequestContext>) -> Result<String> {
        let first = args.first().ok_or_else(|| {
            GatekeeperError::Parameter(
                "guarded operation was called without arguments".to_string(),
            )
        })?;

        let object = first.as_object().ok_or_else(|| {
            GatekeeperError::Parameter(format!(
                "first argument must be an object carrying `{}`",
                self.field
            ))
        })?;

        let business_key = match object.get(&self.field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) | Some(Value::Null) | None => {
                return Err(GatekeeperError::Parameter(format!(
                    "first argument is missing `{}`",
                    self.field
                )))
            }
            Some(other) => {
                return Err(GatekeeperError::Parameter(format!(
                    "`{}` must be a string, got {}",
                    self.field, other
                )))
            }
        };

        match context {
            Some(ctx) => debug!(
                remote_addr = ?ctx.remote_addr,
                path = ?ctx.path,
                args = %first,
                "Deriving rate limit key"
            ),
            None if self.require_context => {
                return Err(GatekeeperError::Parameter(
                    "request context is required for this operation".to_string(),
                ))
            }
            None => debug!(args = %first, "Deriving rate limit key without request context"),
        }

        Ok(business_key)
    }
}
