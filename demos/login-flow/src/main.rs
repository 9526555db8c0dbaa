//! # Purpose
//! Walk through the hauth login exchange in one process: an App caller and a
//! User caller log in, present their access tokens and get authorized.
//!
//! # What this demo proves
//! - Login tokens self-signed with a caller's own key are accepted by the
//!   identity service and exchanged for access tokens.
//! - Access tokens resolve back to the session identity on the receiver.
//! - Scope grants only widen access for App identities.
//! - Tampered or downgraded tokens are refused, and a login token is never
//!   accepted as an access token.
//!
//! # High-level flow
//! 1. Load `AuthConfig` from the environment (and `HAUTH_CONFIG` YAML).
//! 2. Register an App key with a namespace wildcard scope and a User key.
//! 3. Each caller logs in through a `LoginConnector`.
//! 4. The receiver authenticates the `x-hauth2` header value and authorizes.
//! 5. A forged token is rejected with a typed error.
mod observability;

use anyhow::{Context, Result, bail};
use hauth::{
    AccessKey, AuthConfig, AuthLoginRequest, AuthLoginResponse, IdentityAuthService,
    KeyStoreAuthService, LoginConnector, ScopeFilter, TOKEN_HEADER,
};
use std::sync::Arc;

fn login(service: &KeyStoreAuthService, connector: &LoginConnector) -> Result<AuthLoginResponse> {
    let request = AuthLoginRequest {
        login_token: connector.login_token().context("mint login token")?,
    };
    let response = match service.auth_login(&request) {
        Ok(response) => response,
        Err(err) => {
            let rejected = AuthLoginResponse::rejected(&err);
            bail!("login rejected: {}", serde_json::to_string(&rejected)?);
        }
    };
    connector
        .refresh_access_token(&response.access_token)
        .context("install access token")?;
    Ok(response)
}

fn main() -> Result<()> {
    observability::init_tracing("hauth-login-flow");
    let config = AuthConfig::from_env_or_yaml().context("load hauth config")?;
    tracing::info!(?config, "config loaded");

    let keys = Arc::new(config.key_store());
    let app_key = AccessKey::new_app()
        .with_user("payments")
        .with_group("backend")
        .with_scope(ScopeFilter::new("ns", "*"));
    let user_key = AccessKey::new_user().with_user("alice").with_role(1);
    keys.set(app_key.clone()).context("register app key")?;
    keys.set(user_key.clone()).context("register user key")?;

    let service =
        KeyStoreAuthService::from_config(keys, &config).context("build identity service")?;
    let app = LoginConnector::new(app_key, service.signers().clone());
    let user = LoginConnector::new(user_key, service.signers().clone());

    for (name, connector) in [("app", &app), ("user", &user)] {
        let response = login(&service, connector)?;
        let identity = response.identity_token.context("identity token missing")?;
        tracing::info!(
            caller = name,
            sub = %identity.sub,
            jti = %identity.jti,
            exp = identity.exp,
            "logged in"
        );
        println!("{name}: {}", serde_json::to_string_pretty(&identity)?);
    }

    let requested = [ScopeFilter::new("ns", "orders")];
    for (name, connector) in [("app", &app), ("user", &user)] {
        let header = connector.credential().context("outgoing credential")?;
        let identity = service
            .authenticate_header(Some(&header))
            .with_context(|| format!("authenticate {name} via {TOKEN_HEADER}"))?;
        let allowed = identity.allow("orders-api", &requested);
        println!("{name}: orders-api ns=orders allowed={allowed}");
    }

    let mut forged = app.access_token();
    forged.push('x');
    match service.authenticate(&forged) {
        Ok(_) => bail!("forged token was accepted"),
        Err(err) => println!("forged token rejected: {err}"),
    }

    let replayed_login = app.login_token().context("mint login token")?;
    match service.authenticate(&replayed_login) {
        Ok(_) => bail!("login token was accepted as an access token"),
        Err(err) => println!("login token refused as access token: {err}"),
    }

    println!("active sessions: {}", service.sessions().len());
    Ok(())
}
