//! Server-held session identity records.
use crate::access_key::AccessKey;
use crate::clock::now_epoch_seconds;
use crate::scope::ScopeAuthorizer;
use crate::types::{AccessClaims, AccessKeyType, ScopeFilter};
use serde::{Deserialize, Serialize};

/// Who a session is and what it was granted. Looked up by `jti`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityToken {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(rename = "type", default)]
    pub key_type: AccessKeyType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<ScopeFilter>,
}

impl IdentityToken {
    /// Identity for a session established with `key`, valid for `ttl_secs`
    /// from `now`. Grants are copied from the key in sorted order.
    pub fn from_access_key(key: &AccessKey, jti: impl Into<String>, now: i64, ttl_secs: i64) -> Self {
        Self {
            jti: jti.into(),
            sub: key.owner().to_string(),
            iat: now,
            exp: now + ttl_secs,
            roles: key.roles.iter().copied().collect(),
            groups: key.groups.iter().cloned().collect(),
            key_type: key.key_type,
            scopes: key.scopes.iter().cloned().collect(),
        }
    }

    /// No subject and no session id.
    pub fn is_empty(&self) -> bool {
        self.sub.is_empty() && self.jti.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_epoch_seconds())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }

    /// Shorthand for [`ScopeAuthorizer::allow`] on this identity.
    pub fn allow(&self, subject: &str, filters: &[ScopeFilter]) -> bool {
        ScopeAuthorizer::allow(Some(self), subject, filters)
    }

    /// Claims for an access token bound to this session.
    pub fn access_claims(&self) -> AccessClaims {
        AccessClaims {
            jti: Some(self.jti.clone()),
            iat: self.iat,
            exp: self.exp,
            sub: (!self.sub.is_empty()).then(|| self.sub.clone()),
            state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_from_key_grants() {
        let key = AccessKey::new("d4d7d973aa8d3c70", "secret", AccessKeyType::App)
            .with_user("billing")
            .with_role(7)
            .with_role(3)
            .with_group("ops")
            .with_scope(ScopeFilter::new("ns", "payments"));
        let identity = IdentityToken::from_access_key(&key, "session-1", 1_000, 600);
        assert_eq!(identity.jti, "session-1");
        assert_eq!(identity.sub, "billing");
        assert_eq!(identity.iat, 1_000);
        assert_eq!(identity.exp, 1_600);
        assert_eq!(identity.roles, vec![3, 7]);
        assert_eq!(identity.groups, vec!["ops".to_string()]);
        assert_eq!(identity.key_type, AccessKeyType::App);
        assert_eq!(identity.scopes, vec![ScopeFilter::new("ns", "payments")]);
    }

    #[test]
    fn sub_falls_back_to_key_id() {
        let key = AccessKey::new("d4d7d973aa8d3c70", "secret", AccessKeyType::App);
        let identity = IdentityToken::from_access_key(&key, "s", 0, 1);
        assert_eq!(identity.sub, "d4d7d973aa8d3c70");
    }

    #[test]
    fn expiry_and_emptiness() {
        let identity = IdentityToken {
            jti: "s".to_string(),
            exp: 10,
            ..Default::default()
        };
        assert!(!identity.is_empty());
        assert!(identity.is_expired_at(10));
        assert!(!identity.is_expired_at(9));
        assert!(IdentityToken::default().is_empty());
    }

    #[test]
    fn json_shape() {
        let identity = IdentityToken {
            jti: "s".to_string(),
            sub: "guest".to_string(),
            iat: 1,
            exp: 2,
            roles: vec![1],
            groups: vec!["g".to_string()],
            key_type: AccessKeyType::App,
            scopes: vec![ScopeFilter::new("ns", "*")],
        };
        let value = serde_json::to_value(&identity).expect("json");
        assert_eq!(value["type"], "App");
        assert_eq!(value["scopes"][0]["name"], "ns");
        assert_eq!(value["scopes"][0]["value"], "*");
        let decoded: IdentityToken = serde_json::from_value(value).expect("decode");
        assert_eq!(decoded, identity);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let identity = IdentityToken {
            jti: "s".to_string(),
            exp: 5,
            ..Default::default()
        };
        let value = serde_json::to_value(&identity).expect("json");
        assert_eq!(
            value,
            serde_json::json!({"jti": "s", "iat": 0, "exp": 5, "type": "User"})
        );
        let decoded: IdentityToken = serde_json::from_value(value).expect("decode");
        assert_eq!(decoded, identity);
    }

    #[test]
    fn access_claims_carry_session_fields() {
        let identity = IdentityToken {
            jti: "s".to_string(),
            sub: "guest".to_string(),
            iat: 5,
            exp: 9,
            ..Default::default()
        };
        let claims = identity.access_claims();
        assert_eq!(claims.jti.as_deref(), Some("s"));
        assert_eq!(claims.sub.as_deref(), Some("guest"));
        assert_eq!((claims.iat, claims.exp), (5, 9));
        assert_eq!(claims.state, None);
    }
}
