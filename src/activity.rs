use serde_json::Value;

use crate::context::AppContext;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::model::{Activity, ActivityStream};

pub const PROXY_PATH: &str = "/main/proxy";

/// Posts a public-style activity: to the principal's major stream when logged in,
/// through the proxy otherwise.
pub fn new_major_activity(ctx: &AppContext, activity: &Activity) -> Result<Activity> {
    match ctx.principal() {
        Some(user) => add_to_stream(&user.major_stream, activity),
        None => proxy_activity(ctx.dispatcher(), activity),
    }
}

pub fn new_minor_activity(ctx: &AppContext, activity: &Activity) -> Result<Activity> {
    match ctx.principal() {
        Some(user) => add_to_stream(&user.minor_stream, activity),
        None => proxy_activity(ctx.dispatcher(), activity),
    }
}

pub fn add_to_stream(stream: &ActivityStream, activity: &Activity) -> Result<Activity> {
    stream.create(activity)
}

/// Anonymous posting path. A JSON error body wins over the bare status.
pub fn proxy_activity(dispatcher: &Dispatcher, activity: &Activity) -> Result<Activity> {
    let body: Value = serde_json::to_value(activity)?;
    let resp = match dispatcher.post(PROXY_PATH, body) {
        Ok(resp) => resp,
        Err(err) => return Err(Error::ProxyRequestFailed(err.to_string())),
    };
    if !resp.is_success() {
        return Err(Error::ProxyRequestFailed(resp.error_message()));
    }
    resp.decode()
        .map_err(|err| Error::ProxyRequestFailed(format!("decode proxied activity: {}", err)))
}
