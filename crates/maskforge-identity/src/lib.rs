#![warn(missing_docs)]
//! # maskforge-identity
//!
//! ## Purpose
//! Resolves who made a request, for audit attribution only.
//!
//! ## Responsibilities
//! - Model the caller as display name plus domain.
//! - Resolve it through an injectable [`IdentityProvider`].
//! - Fall back to [`CallerIdentity::anonymous`] whenever resolution fails.
//!
//! ## Data flow
//! Route handler collects request headers -> [`IdentityProvider::identify`] ->
//! [`resolve_or_anonymous`] -> audit record.
//!
//! ## Error model
//! Providers may fail with [`IdentityError`]; callers never treat that as a
//! request failure.
//!
//! ## Security and privacy notes
//! Identity is taken from headers set by a trusted fronting proxy. Nothing
//! here authenticates the caller.
//!
//! ## Example
//! ```rust
//! use maskforge_identity::{CallerIdentity, HeaderIdentityProvider, resolve_or_anonymous};
//!
//! let provider = HeaderIdentityProvider::default();
//! let caller = resolve_or_anonymous(&provider, &[]);
//! assert_eq!(caller, CallerIdentity::anonymous());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Display name used when no identity can be resolved.
pub const ANONYMOUS_NAME: &str = "anonymous";

/// Default header carrying the caller's user name.
pub const FORWARDED_USER_HEADER: &str = "x-forwarded-user";

/// Default header carrying the caller's email address.
pub const FORWARDED_EMAIL_HEADER: &str = "x-forwarded-email";

/// Caller attribution for audit records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Human-readable name.
    pub display_name: String,
    /// Organizational domain, when known.
    pub domain: Option<String>,
}

impl CallerIdentity {
    /// Identity used when none can be resolved.
    pub fn anonymous() -> Self {
        Self {
            display_name: ANONYMOUS_NAME.to_string(),
            domain: None,
        }
    }

    /// Returns `true` for the anonymous fallback.
    pub fn is_anonymous(&self) -> bool {
        self.display_name == ANONYMOUS_NAME && self.domain.is_none()
    }

    /// `name@domain`, or just the name.
    pub fn qualified(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}@{domain}", self.display_name),
            None => self.display_name.clone(),
        }
    }
}

/// Resolves a caller from request headers.
pub trait IdentityProvider: Send + Sync {
    /// Resolves the caller from `(lowercase name, value)` header pairs.
    ///
    /// # Errors
    /// Returns [`IdentityError`] when no identity is present or it is malformed.
    fn identify(&self, headers: &[(String, String)]) -> Result<CallerIdentity, IdentityError>;
}

/// Reads identity from proxy-set headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderIdentityProvider {
    user_header: String,
    email_header: String,
}

impl HeaderIdentityProvider {
    /// Provider reading the given header names.
    pub fn new(user_header: impl Into<String>, email_header: impl Into<String>) -> Self {
        Self {
            user_header: user_header.into().to_ascii_lowercase(),
            email_header: email_header.into().to_ascii_lowercase(),
        }
    }
}

impl Default for HeaderIdentityProvider {
    fn default() -> Self {
        Self::new(FORWARDED_USER_HEADER, FORWARDED_EMAIL_HEADER)
    }
}

impl IdentityProvider for HeaderIdentityProvider {
    fn identify(&self, headers: &[(String, String)]) -> Result<CallerIdentity, IdentityError> {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.trim())
                .filter(|value| !value.is_empty())
        };

        if let Some(email) = lookup(&self.email_header) {
            return parse_email(email);
        }

        lookup(&self.user_header)
            .map(|user| CallerIdentity {
                display_name: user.to_string(),
                domain: None,
            })
            .ok_or(IdentityError::Missing)
    }
}

/// Always returns the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentityProvider(pub CallerIdentity);

impl IdentityProvider for StaticIdentityProvider {
    fn identify(&self, _headers: &[(String, String)]) -> Result<CallerIdentity, IdentityError> {
        Ok(self.0.clone())
    }
}

/// Splits `local@domain` into a caller identity.
///
/// # Errors
/// Returns [`IdentityError::Malformed`] when either side is empty.
pub fn parse_email(email: &str) -> Result<CallerIdentity, IdentityError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(CallerIdentity {
            display_name: local.to_string(),
            domain: Some(domain.to_ascii_lowercase()),
        }),
        _ => Err(IdentityError::Malformed(format!(
            "expected local@domain, got {} chars",
            email.chars().count()
        ))),
    }
}

/// Resolves the caller, treating any provider failure as anonymous.
pub fn resolve_or_anonymous(
    provider: &dyn IdentityProvider,
    headers: &[(String, String)],
) -> CallerIdentity {
    provider
        .identify(headers)
        .unwrap_or_else(|_| CallerIdentity::anonymous())
}

/// Identity resolution errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// No identity headers were present.
    #[error("no caller identity present")]
    Missing,
    /// Identity header value could not be parsed.
    #[error("malformed caller identity: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for identity resolution and fallback.

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn email_header_wins_over_user_header() {
        let provider = HeaderIdentityProvider::default();
        let caller = provider
            .identify(&headers(&[
                ("x-forwarded-user", "someone"),
                ("X-Forwarded-Email", "ada@Example.org"),
            ]))
            .expect("email header should resolve");
        assert_eq!(caller.display_name, "ada");
        assert_eq!(caller.domain.as_deref(), Some("example.org"));
        assert_eq!(caller.qualified(), "ada@example.org");
    }

    #[test]
    fn missing_or_malformed_identity_falls_back_to_anonymous() {
        let provider = HeaderIdentityProvider::default();
        assert_eq!(provider.identify(&[]), Err(IdentityError::Missing));

        let caller =
            resolve_or_anonymous(&provider, &headers(&[("x-forwarded-email", "@nowhere")]));
        assert!(caller.is_anonymous());
    }

    #[test]
    fn user_header_alone_resolves_without_domain() {
        let caller = resolve_or_anonymous(
            &HeaderIdentityProvider::default(),
            &headers(&[("x-forwarded-user", " grace ")]),
        );
        assert_eq!(caller.display_name, "grace");
        assert_eq!(caller.domain, None);
    }
}
