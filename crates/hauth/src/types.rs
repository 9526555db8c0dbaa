//! Wire-level data shapes shared by issuers and verifiers.
//!
//! # Purpose
//! Defines the token header, the login and access claim sets, scope filters
//! and the caller type, with the JSON field names used on the wire.
//!
//! # Key invariants
//! - Optional fields are omitted from JSON when absent.
//! - `iat` and `exp` are unix seconds and always serialized.
//! - A scope value of `"*"` is a wildcard for that scope name.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scope value that matches any requested value for the same name.
pub const SCOPE_WILDCARD: &str = "*";

/// Kind of caller an access key belongs to.
///
/// App callers keep a stable session id across logins; User callers send a
/// fresh nonce each time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKeyType {
    #[default]
    User,
    App,
}

impl AccessKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKeyType::User => "User",
            AccessKeyType::App => "App",
        }
    }
}

impl fmt::Display for AccessKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named permission dimension with a value.
///
/// # Example
/// ```rust
/// use hauth::ScopeFilter;
///
/// let granted = ScopeFilter::new("ns", "*");
/// assert!(granted.matches(&ScopeFilter::new("ns", "payments")));
/// assert!(!granted.matches(&ScopeFilter::new("pod", "payments")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub name: String,
    pub value: String,
}

impl ScopeFilter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.value == SCOPE_WILDCARD
    }

    /// Whether this granted scope satisfies the `requested` filter.
    pub fn matches(&self, requested: &ScopeFilter) -> bool {
        self.name == requested.name && (self.is_wildcard() || self.value == requested.value)
    }
}

/// First token segment: signing algorithm and signing key id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl TokenHeader {
    pub fn with_kid(kid: impl Into<String>) -> Self {
        Self {
            alg: String::new(),
            typ: None,
            kid: Some(kid.into()),
        }
    }
}

/// Claims of a short-lived, self-signed login token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginClaims {
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    pub state: String,
}

/// Claims of an access token. Also decodes login tokens, whose fields are a
/// subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// What a registry does when an entry with the same name is inserted twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Last write wins.
    #[default]
    Overwrite,
    /// Second insert fails.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "{other} is not a supported duplicate policy. Use either `overwrite` or `reject`."
            )),
        }
    }
}
