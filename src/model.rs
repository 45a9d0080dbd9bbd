use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::registry::Registry;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// User document as returned by `/main/renew`, `/main/login` or embedded in the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPayload {
    pub nickname: String,
    #[serde(default)]
    pub profile: Person,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub links: Map<String, Value>,
}

impl UserPayload {
    fn link(&self, name: &str) -> Option<String> {
        self.links
            .get(name)
            .and_then(|link| link.get("href"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub verb: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub object: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionPage {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    total_items: Option<u64>,
    #[serde(default)]
    items: Vec<Activity>,
    #[serde(default)]
    next_link: Option<String>,
    #[serde(default)]
    links: Map<String, Value>,
}

impl CollectionPage {
    fn cursor(&self) -> Option<String> {
        self.links
            .get("next")
            .and_then(|link| link.get("href"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| self.next_link.clone())
            .filter(|link| !link.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamSnapshot {
    pub display_name: String,
    pub total_items: Option<u64>,
    pub items: Vec<Activity>,
    pub next_link: Option<String>,
}

/// A paginated activity collection living at `url`.
pub struct ActivityStream {
    url: String,
    dispatcher: Arc<Dispatcher>,
    state: RwLock<StreamSnapshot>,
    loading: AtomicBool,
}

impl ActivityStream {
    pub fn new(url: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            url: url.into(),
            dispatcher,
            state: RwLock::new(StreamSnapshot::default()),
            loading: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.state.read().clone()
    }

    pub fn items(&self) -> Vec<Activity> {
        self.state.read().items.clone()
    }

    pub fn next_link(&self) -> Option<String> {
        self.state.read().next_link.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn get_page(&self, url: &str) -> Result<CollectionPage> {
        let resp = self.dispatcher.get(url)?;
        if !resp.is_success() {
            return Err(Error::Api {
                status: resp.status,
                message: resp.error_message(),
            });
        }
        Ok(resp.decode()?)
    }

    /// Loads the page behind the cursor and appends it. Returns `Ok(false)` when
    /// the stream is exhausted or another page load is still in flight.
    pub fn load_next(&self) -> Result<bool> {
        let Some(next) = self.next_link() else {
            return Ok(false);
        };
        if self.loading.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let outcome = self.get_page(&next);
        self.loading.store(false, Ordering::SeqCst);

        let page = outcome?;
        let cursor = page.cursor();
        let mut state = self.state.write();
        state.items.extend(page.items);
        state.next_link = cursor;
        if page.total_items.is_some() {
            state.total_items = page.total_items;
        }
        Ok(true)
    }

    /// Posts `activity` to this stream and prepends the server's copy.
    pub fn create(&self, activity: &Activity) -> Result<Activity> {
        let resp = self
            .dispatcher
            .post(&self.url, serde_json::to_value(activity)?)?;
        if !resp.is_success() {
            return Err(Error::Api {
                status: resp.status,
                message: resp.error_message(),
            });
        }
        let created: Activity = resp.decode()?;
        self.state.write().items.insert(0, created.clone());
        Ok(created)
    }
}

impl Fetch for ActivityStream {
    fn fetch(&self) -> Result<()> {
        let page = self.get_page(&self.url)?;
        let cursor = page.cursor();
        let mut state = self.state.write();
        state.display_name = page.display_name;
        state.total_items = page.total_items;
        state.items = page.items;
        state.next_link = cursor;
        Ok(())
    }
}

/// A user together with the streams hanging off them.
pub struct User {
    pub nickname: String,
    pub profile: Arc<RwLock<Person>>,
    pub major_direct_inbox: Arc<ActivityStream>,
    pub minor_direct_inbox: Arc<ActivityStream>,
    pub major_stream: Arc<ActivityStream>,
    pub minor_stream: Arc<ActivityStream>,
}

impl User {
    pub fn profile(&self) -> Person {
        self.profile.read().clone()
    }

    pub fn inboxes(&self) -> Vec<Arc<ActivityStream>> {
        vec![
            self.major_direct_inbox.clone(),
            self.minor_direct_inbox.clone(),
        ]
    }
}

/// Identity-keyed caches for everything built from server documents.
pub struct Models {
    dispatcher: Arc<Dispatcher>,
    persons: Registry<RwLock<Person>>,
    users: Registry<User>,
    streams: Registry<ActivityStream>,
}

impl Models {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            persons: Registry::new(),
            users: Registry::new(),
            streams: Registry::new(),
        }
    }

    /// Shared instance for this person; fresh data replaces what was cached.
    pub fn unique_person(&self, person: Person) -> Arc<RwLock<Person>> {
        if person.id.is_empty() {
            return Arc::new(RwLock::new(person));
        }
        let shared = self
            .persons
            .get_or_insert_with(&person.id, || RwLock::new(person.clone()));
        *shared.write() = person;
        shared
    }

    pub fn unique_user(&self, payload: &UserPayload) -> Arc<User> {
        let profile = self.unique_person(payload.profile.clone());
        let existing = self.users.get(&payload.nickname);
        if let Some(user) = existing {
            if !Arc::ptr_eq(&user.profile, &profile) {
                *user.profile.write() = profile.read().clone();
            }
            return user;
        }

        let base = format!("/api/user/{}", payload.nickname);
        let stream_url = |link: &str, fallback: &str| {
            payload
                .link(link)
                .unwrap_or_else(|| format!("{}/{}", base, fallback))
        };
        let major_direct_inbox =
            self.stream(&stream_url("activity-inbox-direct-major", "inbox/direct/major"));
        let minor_direct_inbox =
            self.stream(&stream_url("activity-inbox-direct-minor", "inbox/direct/minor"));
        let major_stream = self.stream(&stream_url("activity-outbox-major", "feed/major"));
        let minor_stream = self.stream(&stream_url("activity-outbox-minor", "feed/minor"));

        self.users.get_or_insert_with(&payload.nickname, || User {
            nickname: payload.nickname.clone(),
            profile,
            major_direct_inbox,
            minor_direct_inbox,
            major_stream,
            minor_stream,
        })
    }

    /// Streams are keyed by their absolute URL, so a derived path and a
    /// server-supplied link to the same collection share one instance.
    pub fn stream(&self, url: &str) -> Arc<ActivityStream> {
        let url = self.dispatcher.signer().full_url(url);
        let dispatcher = self.dispatcher.clone();
        self.streams
            .get_or_insert_with(&url, || ActivityStream::new(url.clone(), dispatcher))
    }

    pub fn streams(&self) -> Vec<Arc<ActivityStream>> {
        self.streams.values()
    }

    pub fn clear(&self) {
        self.persons.clear();
        self.users.clear();
        self.streams.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use serde_json::json;
    use tempfile::tempdir;
    use url::Url;

    use crate::credentials::{CredentialStore, REGISTER_PATH};
    use crate::fetch::fetch_all;
    use crate::oauth::Signer;
    use crate::storage::{Options, Store};
    use crate::transport::{HttpResponse, MockTransport};

    fn models() -> (tempfile::TempDir, Arc<MockTransport>, Models) {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            Store::open(Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let mock = Arc::new(MockTransport::new());
        mock.on(
            Method::POST,
            REGISTER_PATH,
            HttpResponse::json(200, &json!({"client_id": "ck", "client_secret": "cs"})),
        );
        let creds = Arc::new(CredentialStore::new(
            "https://pump.example",
            "tests",
            store,
            mock.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            mock.clone(),
            creds,
            Signer::new(Url::parse("https://pump.example/").unwrap()),
        ));
        (dir, mock, Models::new(dispatcher))
    }

    fn evan() -> UserPayload {
        serde_json::from_value(json!({
            "nickname": "evan",
            "profile": {"id": "acct:evan@pump.example", "displayName": "Evan"}
        }))
        .unwrap()
    }

    #[test]
    fn users_are_unique_per_nickname() {
        let (_dir, _mock, models) = models();
        let first = models.unique_user(&evan());
        let mut renamed = evan();
        renamed.profile.display_name = "Evan P.".into();
        let second = models.unique_user(&renamed);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.profile().display_name, "Evan P.");
        assert_eq!(
            first.major_direct_inbox.url(),
            "https://pump.example/api/user/evan/inbox/direct/major"
        );
        assert_eq!(
            first.minor_direct_inbox.url(),
            "https://pump.example/api/user/evan/inbox/direct/minor"
        );
        assert!(Arc::ptr_eq(
            &first.major_direct_inbox,
            &models.stream("/api/user/evan/inbox/direct/major")
        ));
    }

    #[test]
    fn derived_and_absolute_stream_urls_share_an_instance() {
        let (_dir, _mock, models) = models();
        let derived = models.unique_user(&evan()).major_direct_inbox.clone();
        let linked = models.stream("https://pump.example/api/user/evan/inbox/direct/major");
        assert!(Arc::ptr_eq(&derived, &linked));
        assert_eq!(models.streams().len(), 4);
    }

    #[test]
    fn explicit_links_override_derived_urls() {
        let (_dir, _mock, models) = models();
        let mut payload = evan();
        payload.links.insert(
            "activity-inbox-direct-major".into(),
            json!({"href": "https://pump.example/api/user/evan/inbox/direct/major?x=1"}),
        );
        let user = models.unique_user(&payload);
        assert_eq!(
            user.major_direct_inbox.url(),
            "https://pump.example/api/user/evan/inbox/direct/major?x=1"
        );
    }

    #[test]
    fn fetch_then_paginate() {
        let (_dir, mock, models) = models();
        mock.on(
            Method::GET,
            "/api/user/evan/inbox/direct/major",
            HttpResponse::json(
                200,
                &json!({
                    "displayName": "Direct inbox",
                    "totalItems": 3,
                    "items": [{"id": "a1", "verb": "post"}, {"id": "a2", "verb": "like"}],
                    "links": {"next": {"href": "https://pump.example/api/user/evan/inbox/direct/major?before=a2"}}
                }),
            ),
        );
        mock.on(
            Method::GET,
            "/api/user/evan/inbox/direct/major?before=a2",
            HttpResponse::json(200, &json!({"items": [{"id": "a3", "verb": "share"}]})),
        );

        let stream = models.stream("/api/user/evan/inbox/direct/major");
        fetch_all(&[stream.clone()]).unwrap();
        assert_eq!(stream.items().len(), 2);
        assert!(stream.next_link().is_some());

        assert!(stream.load_next().unwrap());
        let snapshot = stream.snapshot();
        assert_eq!(snapshot.items.len(), 3);
        assert_eq!(snapshot.items[2].id.as_deref(), Some("a3"));
        assert_eq!(snapshot.total_items, Some(3));
        assert!(snapshot.next_link.is_none());

        assert!(!stream.load_next().unwrap());
        assert_eq!(mock.requests().len(), 2);
    }

    #[test]
    fn failed_fetch_reports_status() {
        let (_dir, mock, models) = models();
        mock.on(
            Method::GET,
            "/api/user/evan/inbox/direct/minor",
            HttpResponse::json(403, &json!({"error": "Only the user can read their inbox"})),
        );
        let stream = models.stream("/api/user/evan/inbox/direct/minor");
        let err = stream.fetch().unwrap_err();
        assert!(matches!(err, Error::Api { status: 403, ref message } if message == "Only the user can read their inbox"));
    }

    #[test]
    fn clear_drops_cached_instances() {
        let (_dir, _mock, models) = models();
        let before = models.unique_user(&evan());
        models.clear();
        let after = models.unique_user(&evan());
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
