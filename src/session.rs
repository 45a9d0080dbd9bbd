use std::sync::Arc;

use serde_json::json;

use crate::context::AppContext;
use crate::dispatch::Dispatcher;
use crate::error::{report, Error, Result};
use crate::model::{User, UserPayload};
use crate::storage::UserTokenPair;

pub const RENEW_PATH: &str = "/main/renew";
pub const LOGIN_PATH: &str = "/main/login";
pub const LOGOUT_PATH: &str = "/main/logout";

/// Trades the browser session for a fresh copy of the current user. One call,
/// no retries: the caller decides what a failure means.
pub struct SessionRenewer {
    dispatcher: Arc<Dispatcher>,
}

impl SessionRenewer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn renew(&self) -> Result<UserPayload> {
        let outcome = self.dispatcher.post(RENEW_PATH, json!({})).and_then(|resp| {
            if !resp.is_success() {
                return Err(Error::Api {
                    status: resp.status,
                    message: resp.error_message(),
                });
            }
            Ok(resp.decode::<UserPayload>()?)
        });
        match outcome {
            Ok(payload) => {
                tracing::info!(nickname = %payload.nickname, "session: renewed");
                Ok(payload)
            }
            Err(err) => Err(Error::RenewalFailed(Box::new(err))),
        }
    }
}

/// Logs in with a password and keeps the returned token pair for later visits.
pub fn login(ctx: &AppContext, nickname: &str, password: &str) -> Result<Arc<User>> {
    let resp = ctx.dispatcher().post(
        LOGIN_PATH,
        json!({"nickname": nickname, "password": password}),
    )?;
    if !resp.is_success() {
        return Err(Error::Api {
            status: resp.status,
            message: resp.error_message(),
        });
    }
    let payload: UserPayload = resp.decode()?;
    if let (Some(token), Some(secret)) = (payload.token.clone(), payload.secret.clone()) {
        ctx.credentials().set_user_credentials(
            &UserTokenPair { token, secret },
            Some(payload.nickname.as_str()),
        )?;
    } else {
        tracing::warn!(nickname = %payload.nickname, "session: login returned no token pair");
    }

    ctx.models().clear();
    let user = ctx.models().unique_user(&payload);
    ctx.set_principal(Some(user.clone()));
    Ok(user)
}

/// Ends the server session, then forgets everything tied to the old login.
pub fn logout(ctx: &AppContext) -> Result<()> {
    match ctx.dispatcher().post(LOGOUT_PATH, json!({})) {
        Ok(resp) if !resp.is_success() => report(&Error::Api {
            status: resp.status,
            message: resp.error_message(),
        }),
        Ok(_) => {}
        Err(err) => report(&err),
    }
    ctx.teardown()
}
