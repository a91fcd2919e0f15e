//! Generic call interception.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::binding::{Binding, OperationPattern};
use crate::config::GatekeeperConfig;
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{
    AdmissionGate, CallArgs, Decision, JsonFieldKeyBuilder, RequestContext, RetryScheduler,
};
use crate::store::CounterStore;

/// One call of a (possibly) guarded operation.
pub struct Invocation<'a, A: ?Sized> {
    operation: &'a str,
    args: &'a A,
    context: Option<&'a RequestContext>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, A: ?Sized> Invocation<'a, A> {
    /// Describe a call of `operation` with `args`.
    pub fn new(operation: &'a str, args: &'a A) -> Self {
        Self {
            operation,
            args,
            context: None,
            cancel: None,
        }
    }

    /// Attach the request that triggered the call.
    pub fn with_context(mut self, context: &'a RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Abandon the retry wait when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn operation(&self) -> &str {
        self.operation
    }
}

/// How an operation was selected for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The operation has its own binding
    Explicit,
    /// The operation matched a registered pattern
    Pattern(String),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Explicit => f.write_str("explicit"),
            Selection::Pattern(p) => write!(f, "pattern {}", p),
        }
    }
}

/// Wraps guarded operations with the admission gate.
///
/// Operations are selected either by an explicit per-operation binding or by
/// a pattern over operation names; an explicit binding always takes
/// precedence. Operations with neither pass through untouched. Both selection
/// styles run the same [`RetryScheduler::decide_with_retry`] check.
pub struct Interceptor<S: CounterStore + ?Sized, A: ?Sized> {
    scheduler: RetryScheduler<S>,
    key_prefix: Option<String>,
    bindings: RwLock<HashMap<String, Arc<Binding<A>>>>,
    patterns: RwLock<Vec<(OperationPattern, Arc<Binding<A>>)>>,
}

impl<S: CounterStore + ?Sized, A: ?Sized> Interceptor<S, A> {
    /// Create an interceptor with no bindings.
    pub fn new(scheduler: RetryScheduler<S>) -> Self {
        Self {
            scheduler,
            key_prefix: None,
            bindings: RwLock::new(HashMap::new()),
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// Prefix every rate limit key, e.g. to separate deployments sharing a store.
    pub fn with_key_prefix(mut self, prefix: Option<String>) -> Self {
        self.key_prefix = prefix;
        self
    }

    /// Attach a binding to a single operation, replacing any previous one.
    pub fn register(&self, operation: impl Into<String>, binding: Binding<A>) {
        let operation = operation.into();
        info!(
            operation = %operation,
            namespace = %binding.namespace(),
            rule = %binding.rule(),
            limit = binding.policy().max_count(),
            window_secs = binding.policy().window().as_secs(),
            "Registered rate limit binding"
        );
        self.bindings.write().insert(operation, Arc::new(binding));
    }

    /// Attach a binding to every operation matching `pattern`.
    ///
    /// Patterns are tried in registration order; the first match wins.
    pub fn register_pattern(&self, pattern: &str, binding: Binding<A>) -> Result<()> {
        let pattern = OperationPattern::compile(pattern)?;
        info!(
            pattern = %pattern,
            namespace = %binding.namespace(),
            rule = %binding.rule(),
            limit = binding.policy().max_count(),
            window_secs = binding.policy().window().as_secs(),
            "Registered rate limit pattern"
        );
        self.patterns.write().push((pattern, Arc::new(binding)));
        Ok(())
    }

    /// The retry scheduler shared by every binding.
    pub fn scheduler(&self) -> &RetryScheduler<S> {
        &self.scheduler
    }

    /// How `operation` would be selected, or `None` if it is not guarded.
    pub fn selection(&self, operation: &str) -> Option<Selection> {
        self.resolve(operation).map(|(selection, _)| selection)
    }

    fn resolve(&self, operation: &str) -> Option<(Selection, Arc<Binding<A>>)> {
        if let Some(binding) = self.bindings.read().get(operation) {
            return Some((Selection::Explicit, Arc::clone(binding)));
        }

        self.patterns
            .read()
            .iter()
            .find(|(pattern, _)| pattern.matches(operation))
            .map(|(pattern, binding)| {
                (
                    Selection::Pattern(pattern.as_str().to_string()),
                    Arc::clone(binding),
                )
            })
    }

    /// Run `operation` through the gate.
    ///
    /// Unguarded operations run directly. For guarded ones the key is built
    /// first, so a key builder failure never reaches the store. On ALLOW the
    /// operation's own result is returned unchanged; on a terminal DENY the
    /// operation is not run and [`GatekeeperError::RateLimitExceeded`] is
    /// returned through `E`.
    pub async fn call<T, E, F, Fut>(
        &self,
        invocation: Invocation<'_, A>,
        operation: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<GatekeeperError>,
    {
        let Some((selection, binding)) = self.resolve(invocation.operation) else {
            trace!(operation = %invocation.operation, "Operation not guarded");
            return operation().await;
        };

        let key = binding.key_for(
            invocation.args,
            invocation.context,
            self.key_prefix.as_deref(),
        )?;

        debug!(
            operation = %invocation.operation,
            selected_by = %selection,
            key = %key,
            "Checking admission"
        );

        let never = CancellationToken::new();
        let cancel = invocation.cancel.unwrap_or(&never);

        match self
            .scheduler
            .decide_with_retry(&key, binding.policy(), cancel)
            .await?
        {
            Decision::Allow => operation().await,
            Decision::Deny => {
                warn!(
                    operation = %invocation.operation,
                    key = %key,
                    limit = binding.policy().max_count(),
                    "Rate limit exceeded after retry"
                );
                Err(GatekeeperError::RateLimitExceeded {
                    key: key.to_string(),
                }
                .into())
            }
        }
    }
}

impl<S: CounterStore + ?Sized> Interceptor<S, CallArgs> {
    /// Build an interceptor for JSON-described calls from configuration.
    ///
    /// Each configured binding keys calls on a string field of the first
    /// argument. The gate's expiry mode and the retry delay are taken from
    /// the configuration as well.
    pub fn from_config(config: &GatekeeperConfig, store: Arc<S>) -> Result<Self> {
        let gate = AdmissionGate::new(store).with_expiry_mode(config.gate.expiry_mode);
        let scheduler = RetryScheduler::new(gate).with_delay(config.retry.delay());
        let interceptor = Self::new(scheduler).with_key_prefix(config.store.key_prefix.clone());

        for binding in &config.bindings {
            interceptor.register(binding.target.clone(), json_binding(binding)?);
        }
        for binding in &config.patterns {
            interceptor.register_pattern(&binding.target, json_binding(binding)?)?;
        }

        Ok(interceptor)
    }
}

fn json_binding(config: &crate::config::BindingConfig) -> Result<Binding<CallArgs>> {
    let key_builder =
        JsonFieldKeyBuilder::new(config.key_field.clone()).require_context(config.require_context);
    Ok(Binding::new(
        config.namespace.clone(),
        config.rule.clone(),
        config.policy()?,
        key_builder,
    ))
}
