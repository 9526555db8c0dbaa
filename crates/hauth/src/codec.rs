//! Compact token encoding.
//!
//! A token is `segment(header).segment(claims).b64(signature)` where
//! `segment(x) = base64url_nopad(json(x))`. Everything here is pure.
use crate::signer::{KeyMaterial, Signer};
use crate::types::TokenHeader;
use crate::{AuthError, AuthResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn encode_bytes(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_bytes(segment: &str) -> AuthResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| AuthError::malformed(format!("base64: {err}")))
}

pub fn encode_segment<T: Serialize>(value: &T) -> AuthResult<String> {
    let json =
        serde_json::to_vec(value).map_err(|err| AuthError::malformed(format!("json: {err}")))?;
    Ok(encode_bytes(&json))
}

pub fn decode_segment<T: DeserializeOwned>(segment: &str) -> AuthResult<T> {
    let bytes = decode_bytes(segment)?;
    serde_json::from_slice(&bytes).map_err(|err| AuthError::malformed(format!("json: {err}")))
}

/// Build and sign a compact token. `header.alg` is overwritten with the
/// signer's name so the header always names the algorithm actually used.
pub fn sign_token<C: Serialize>(
    header: &TokenHeader,
    claims: &C,
    signer: &dyn Signer,
    key: &KeyMaterial,
) -> AuthResult<String> {
    let signing_string = signing_string(header, claims, signer)?;
    let signature = signer.sign(&signing_string, key)?;
    Ok(format!("{signing_string}.{}", encode_bytes(&signature)))
}

/// Like [`sign_token`], deriving key material from access-key secret bytes.
pub fn sign_token_with_secret<C: Serialize>(
    header: &TokenHeader,
    claims: &C,
    signer: &dyn Signer,
    secret: &[u8],
) -> AuthResult<String> {
    let signing_string = signing_string(header, claims, signer)?;
    let signature = signer.sign_with_secret(&signing_string, secret)?;
    Ok(format!("{signing_string}.{}", encode_bytes(&signature)))
}

fn signing_string<C: Serialize>(
    header: &TokenHeader,
    claims: &C,
    signer: &dyn Signer,
) -> AuthResult<String> {
    let mut header = header.clone();
    header.alg = signer.name().to_string();
    Ok(format!(
        "{}.{}",
        encode_segment(&header)?,
        encode_segment(claims)?
    ))
}

/// Borrowed views into a raw token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TokenParts<'a> {
    pub signing_string: &'a str,
    pub header: &'a str,
    pub claims: &'a str,
    pub signature: &'a str,
}

/// Split on the last `.` for the signature, then on the first `.` of the
/// remainder for header and claims.
pub(crate) fn split_token(raw: &str) -> AuthResult<TokenParts<'_>> {
    let (signing_string, signature) = raw
        .rsplit_once('.')
        .ok_or_else(|| AuthError::malformed("missing signature segment"))?;
    let (header, claims) = signing_string
        .split_once('.')
        .ok_or_else(|| AuthError::malformed("missing claims segment"))?;
    Ok(TokenParts {
        signing_string,
        header,
        claims,
        signature,
    })
}
