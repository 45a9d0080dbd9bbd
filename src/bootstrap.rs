//! One-shot page-load sequence deciding who the visitor is.
//!
//! Embedded principal -> adopt it. Embedded subject -> show it, stay anonymous.
//! Otherwise a stored token pair triggers a session renewal followed by a batch
//! fetch of the principal's two direct inboxes. Every failure degrades to an
//! anonymous or partially populated page; nothing escapes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::AppContext;
use crate::error::report;
use crate::fetch::fetch_all;
use crate::model::{Person, User, UserPayload};
use crate::session::{SessionRenewer, LOGIN_PATH};

/// What the server rendered into the page.
#[derive(Debug, Clone, Default)]
pub struct PageState {
    pub path: String,
    pub query: Option<String>,
    pub principal_user: Option<UserPayload>,
    pub principal: Option<Person>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Home,
    Path(String),
}

/// Presentation layer hooks.
pub trait Presenter {
    fn show_principal(&self, user: &Arc<User>);
    fn show_subject(&self, person: &Person);
    fn navigate(&self, destination: Destination);
}

pub enum Outcome {
    EmbeddedPrincipal(Arc<User>),
    AnonymousSubject(Arc<RwLock<Person>>),
    Anonymous,
    RenewalFailed,
    InboxUnavailable(Arc<User>),
    Authenticated(Arc<User>),
}

impl Outcome {
    pub fn principal(&self) -> Option<&Arc<User>> {
        match self {
            Outcome::EmbeddedPrincipal(user)
            | Outcome::InboxUnavailable(user)
            | Outcome::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

pub fn run(ctx: &AppContext, page: &PageState, presenter: &dyn Presenter) -> Outcome {
    if let Some(payload) = &page.principal_user {
        let user = ctx.models().unique_user(payload);
        ctx.set_principal(Some(user.clone()));
        tracing::debug!(nickname = %user.nickname, "bootstrap: embedded principal");
        presenter.show_principal(&user);
        return Outcome::EmbeddedPrincipal(user);
    }

    if let Some(person) = &page.principal {
        let subject = ctx.models().unique_person(person.clone());
        ctx.set_subject(Some(subject.clone()));
        presenter.show_subject(&subject.read());
        return Outcome::AnonymousSubject(subject);
    }

    match ctx.credentials().user_credentials() {
        Ok(Some(_)) => {}
        Ok(None) => return Outcome::Anonymous,
        Err(err) => {
            report(&err);
            return Outcome::Anonymous;
        }
    }

    let payload = match SessionRenewer::new(ctx.dispatcher().clone()).renew() {
        Ok(payload) => payload,
        Err(err) => {
            report(&err);
            return Outcome::RenewalFailed;
        }
    };

    let user = ctx.models().unique_user(&payload);
    ctx.set_principal(Some(user.clone()));

    if let Err(err) = fetch_all(&user.inboxes()) {
        report(&err);
        return Outcome::InboxUnavailable(user);
    }

    presenter.show_principal(&user);
    match page.path.as_str() {
        LOGIN_PATH => {
            let destination = continue_to(page.query.as_deref())
                .map(Destination::Path)
                .unwrap_or(Destination::Home);
            presenter.navigate(destination);
        }
        "/" => presenter.navigate(Destination::Home),
        _ => {}
    }
    Outcome::Authenticated(user)
}

/// Decodes a query string (leading `?` optional, `+` as space).
pub fn search_params(query: &str) -> HashMap<String, String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// The `continue` parameter, only when it is a path on this origin.
pub fn continue_to(query: Option<&str>) -> Option<String> {
    let params = search_params(query?);
    params.get("continue").filter(|value| is_local_path(value)).cloned()
}

// `//host` and `/\host` are read by browsers as another origin.
fn is_local_path(value: &str) -> bool {
    value.starts_with('/') && !value.starts_with("//") && !value.starts_with("/\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_params_decode_plus_and_percent() {
        let params = search_params("?q=hello+world&continue=%2Fevan%2Ffavorites&flag");
        assert_eq!(params.get("q").map(String::as_str), Some("hello world"));
        assert_eq!(
            params.get("continue").map(String::as_str),
            Some("/evan/favorites")
        );
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn continue_to_accepts_root_relative_paths_only() {
        assert_eq!(
            continue_to(Some("continue=/foo/bar")),
            Some("/foo/bar".to_string())
        );
        assert_eq!(continue_to(Some("continue=http://evil.example/x")), None);
        assert_eq!(continue_to(Some("continue=//evil.example/x")), None);
        assert_eq!(continue_to(Some("continue=%2F%2Fevil.example%2Fx")), None);
        assert_eq!(continue_to(Some("continue=/%5Cevil.example/x")), None);
        assert_eq!(continue_to(Some("continue=")), None);
        assert_eq!(continue_to(Some("other=1")), None);
        assert_eq!(continue_to(None), None);
    }
}
