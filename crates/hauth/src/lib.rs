//! hauth authn/authz primitives shared by issuers and receivers in the mesh.
//!
//! # Purpose
//! Issues, signs and verifies compact three-segment tokens that bind a
//! caller's identity, roles, groups and scopes to a time-bounded credential.
//!
//! # How it fits
//! Callers hold a [`LoginConnector`] and present self-signed login tokens to
//! an [`IdentityAuthService`]. The service verifies them against a
//! [`KeyStore`], records an [`IdentityToken`] in the [`SessionTokenManager`]
//! and hands back an access token signed with the authority's own issuer
//! keys. Receivers resolve access tokens with
//! [`KeyStoreAuthService::authenticate`] and authorize with
//! [`ScopeAuthorizer`].
//!
//! # Key invariants
//! - Tokens always carry three base64url segments: header, claims, signature.
//! - `exp` is checked against wall-clock seconds with no grace window.
//! - Unknown algorithms (including `none`) resolve to a signer that never
//!   produces a signature.
//! - Session entries are never returned past their `exp`.
//!
//! # Important configuration
//! - [`AuthConfig`] carries TTLs, the sweep interval and duplicate policies.
//!
//! # Examples
//! ```rust
//! use hauth::{AccessKey, AccessToken, KeyStore, LoginConnector, SignerRegistry};
//! use std::sync::Arc;
//!
//! let signers = Arc::new(SignerRegistry::with_defaults());
//! let key = AccessKey::new_app();
//! let keys = KeyStore::new();
//! keys.set(key.clone()).expect("insert key");
//!
//! let connector = LoginConnector::new(key.clone(), signers.clone());
//! let raw = connector.login_token().expect("login token");
//! let token = AccessToken::parse(&raw, &signers).expect("parse");
//! let verified = token.verify(&keys).expect("verify");
//! assert_eq!(verified.id, key.id);
//! ```
//!
//! # Common pitfalls
//! - Treating any error from parse/verify/allow as anything other than "deny".
//! - Running issuer and verifier with unsynchronized clocks.

mod access_key;
mod access_token;
mod clock;
mod codec;
mod config;
mod connector;
mod errors;
mod identity;
mod scope;
mod service;
mod session;
mod signer;
mod types;

pub use access_key::{AccessKey, ISSUER_SUBJECT, KeyStore, SecretBytes};
pub use access_token::{AccessToken, TOKEN_HEADER};
pub use clock::{Clock, ManualClock, SystemClock, now_epoch_seconds};
pub use codec::{
    decode_bytes, decode_segment, encode_bytes, encode_segment, sign_token, sign_token_with_secret,
};
pub use config::{
    AuthConfig, DEFAULT_ACCESS_TTL_SECS, DEFAULT_LOGIN_TTL_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
    MAX_ACCESS_TTL_SECS, MIN_ACCESS_TTL_SECS, clamp_access_ttl,
};
pub use connector::LoginConnector;
pub use errors::{AuthError, AuthResult};
pub use identity::IdentityToken;
pub use scope::ScopeAuthorizer;
pub use service::{AuthLoginRequest, AuthLoginResponse, IdentityAuthService, KeyStoreAuthService};
pub use session::SessionTokenManager;
pub use signer::{
    Algorithm, EcdsaSigner, HashFunction, HmacSigner, KeyFamily, KeyMaterial, NONE_ALGORITHM,
    NoneSigner, RsaSigner, Signer, SignerRegistry,
};
pub use types::{
    AccessClaims, AccessKeyType, DuplicatePolicy, LoginClaims, SCOPE_WILDCARD, ScopeFilter,
    TokenHeader,
};
