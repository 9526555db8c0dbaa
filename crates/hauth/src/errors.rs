use thiserror::Error;

/// Every failure the core can report. Callers must treat any of these as
/// "not authorized".
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("access key {0} not found")]
    UnknownKey(String),
    #[error("token expired")]
    Expired,
    #[error("verification denied")]
    SignatureMismatch,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
    #[error("missing context: {0}")]
    MissingContext(String),
    #[error("token not found")]
    TokenNotFound,
    #[error("access key {0} already registered")]
    DuplicateKey(String),
    #[error("signer {0} already registered")]
    DuplicateSigner(String),
    #[error("login token already used")]
    ReplayedLogin,
    #[error("login token lifetime {actual}s exceeds {max}s")]
    LoginLifetimeExceeded { actual: i64, max: i64 },
}

impl AuthError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedToken(reason.into())
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
