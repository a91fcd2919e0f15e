//! Policy attachments and operation selection.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{KeyBuilder, Policy, RateLimitKey, RequestContext};

/// A policy attached to a guarded operation, with the means to key its calls.
pub struct Binding<A: ?Sized> {
    namespace: String,
    rule: String,
    policy: Policy,
    key_builder: Arc<dyn KeyBuilder<A>>,
}

impl<A: ?Sized> Binding<A> {
    /// Attach `policy` under the `<namespace>:<rule>:` key prefix.
    pub fn new<K>(
        namespace: impl Into<String>,
        rule: impl Into<String>,
        policy: Policy,
        key_builder: K,
    ) -> Self
    where
        K: KeyBuilder<A> + 'static,
    {
        Self {
            namespace: namespace.into(),
            rule: rule.into(),
            policy,
            key_builder: Arc::new(key_builder),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Derive the full rate limit key for one call.
    pub fn key_for(
        &self,
        args: &A,
        context: Option<&RequestContext>,
        prefix: Option<&str>,
    ) -> Result<RateLimitKey> {
        let business_key = self.key_builder.build(args, context)?;
        Ok(RateLimitKey::new(&self.namespace, &self.rule, &business_key).with_prefix(prefix))
    }
}

impl<A: ?Sized> fmt::Debug for Binding<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("namespace", &self.namespace)
            .field("rule", &self.rule)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// A glob over dot-separated operation names.
///
/// `*` matches within one segment, `**` matches across segments:
/// `**.service.*Impl.*` selects every method of every `*Impl` type in any
/// `service` package.
#[derive(Debug, Clone)]
pub struct OperationPattern {
    raw: String,
    regex: Regex,
}

impl OperationPattern {
    /// Compile a pattern.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(GatekeeperError::Configuration(
                "operation pattern must not be empty".to_string(),
            ));
        }

        let translated = regex::escape(pattern)
            .replace(r"\*\*", ".*")
            .replace(r"\*", "[^.]*");
        let regex = Regex::new(&format!("^{}$", translated)).map_err(|e| {
            GatekeeperError::Configuration(format!(
                "invalid operation pattern `{}`: {}",
                pattern, e
            ))
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    /// Whether `operation` is selected by this pattern.
    pub fn matches(&self, operation: &str) -> bool {
        self.regex.is_match(operation)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for OperationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_segment_wildcard() {
        let pattern = OperationPattern::compile("smsService.*").unwrap();
        assert!(pattern.matches("smsService.sendSmsMessage"));
        assert!(pattern.matches("smsService.cancel"));
        assert!(!pattern.matches("smsService.inner.send"));
        assert!(!pattern.matches("mailService.send"));
    }

    #[test]
    fn test_multi_segment_wildcard() {
        let pattern = OperationPattern::compile("**.service.*Impl.*").unwrap();
        assert!(pattern.matches("cn.example.service.SmsMessageServiceImpl.sendSmsMessage"));
        assert!(pattern.matches("app.service.UserImpl.register"));
        assert!(!pattern.matches("app.service.UserService.register"));
        assert!(!pattern.matches("app.controller.UserImpl.register"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let pattern = OperationPattern::compile("billing.charge(card)").unwrap();
        assert!(pattern.matches("billing.charge(card)"));
        assert!(!pattern.matches("billingXcharge(card)"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let err = OperationPattern::compile("  ").unwrap_err();
        assert!(matches!(err, GatekeeperError::Configuration(_)));
    }

    #[test]
    fn test_binding_key() {
        let binding: Binding<str> = Binding::new(
            "smsService",
            "sendLimit",
            Policy::default(),
            |msg_key: &str, _: Option<&RequestContext>| -> Result<String> {
                Ok(msg_key.to_string())
            },
        );

        let key = binding.key_for("register-user", None, None).unwrap();
        assert_eq!(key.as_str(), "smsService:sendLimit:register-user");

        let key = binding.key_for("register-user", None, Some("eu")).unwrap();
        assert_eq!(key.as_str(), "eu:smsService:sendLimit:register-user");
    }
}
