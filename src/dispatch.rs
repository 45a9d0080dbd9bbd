use std::sync::Arc;

use anyhow::anyhow;
use reqwest::header::AUTHORIZATION;
use reqwest::Method;

use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::oauth::Signer;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Read-only requests ride on the ambient session cookie and are never signed.
pub fn is_read_only(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

/// Single chokepoint for outgoing calls. Mutating requests are signed with the
/// client credentials (and the user token pair, when present) before they leave.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    signer: Signer,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        signer: Signer,
    ) -> Self {
        Self {
            transport,
            credentials,
            signer,
        }
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn dispatch(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        request.url = self.signer.full_url(&request.url);

        if !is_read_only(&request.method) {
            let client = self.credentials.client_credentials()?;
            let user = self.credentials.user_credentials()?;
            let header = self
                .signer
                .sign(request.method.as_str(), &request.url, &client, user.as_ref())
                .map_err(|err| Error::Internal(anyhow!("sign {}: {}", request.url, err)))?;
            request
                .headers
                .retain(|(name, _)| !name.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
            request
                .headers
                .push((AUTHORIZATION.as_str().to_string(), header));
            tracing::debug!(method = %request.method, url = %request.url, token = user.is_some(), "dispatch: signed request");
        }

        Ok(self.transport.send(request)?)
    }

    pub fn get(&self, url: &str) -> Result<HttpResponse> {
        self.dispatch(HttpRequest::get(url))
    }

    pub fn post(&self, url: &str, body: serde_json::Value) -> Result<HttpResponse> {
        self.dispatch(HttpRequest::post(url, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use url::Url;

    use crate::credentials::REGISTER_PATH;
    use crate::oauth::{header_param, parse_header};
    use crate::storage::{Options, Store, UserTokenPair};
    use crate::transport::{has_authorization, MockTransport};

    const SERVER: &str = "https://pump.example";

    struct Fixture {
        _dir: tempfile::TempDir,
        mock: Arc<MockTransport>,
        credentials: Arc<CredentialStore>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
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
        mock.on(Method::GET, "/api/user/evan", HttpResponse::json(200, &json!({})));
        mock.on(Method::HEAD, "/api/user/evan", HttpResponse::new(200, ""));
        mock.on(Method::POST, "/api/user/evan/feed", HttpResponse::json(200, &json!({})));
        mock.on(Method::PUT, "/api/note/1", HttpResponse::json(200, &json!({})));
        mock.on(Method::DELETE, "/api/note/1", HttpResponse::json(200, &json!({})));

        let credentials = Arc::new(CredentialStore::new(SERVER, "tests", store, mock.clone()));
        let dispatcher = Dispatcher::new(
            mock.clone(),
            credentials.clone(),
            Signer::new(Url::parse("https://pump.example/").unwrap()),
        );
        Fixture {
            _dir: dir,
            mock,
            credentials,
            dispatcher,
        }
    }

    #[test]
    fn read_only_requests_skip_credentials() {
        let fx = fixture();
        fx.dispatcher.get("/api/user/evan").unwrap();
        fx.dispatcher
            .dispatch(HttpRequest::new(Method::HEAD, "/api/user/evan"))
            .unwrap();

        let requests = fx.mock.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|req| !has_authorization(req)));
        assert!(fx.mock.requests_to(REGISTER_PATH).is_empty());
    }

    #[test]
    fn mutating_requests_are_signed() {
        let fx = fixture();
        for method in [Method::POST, Method::PUT, Method::DELETE] {
            let path = if method == Method::POST {
                "/api/user/evan/feed"
            } else {
                "/api/note/1"
            };
            fx.dispatcher
                .dispatch(HttpRequest::new(method, path).with_body(json!({"verb": "post"})))
                .unwrap();
        }

        let signed: Vec<_> = fx
            .mock
            .requests()
            .into_iter()
            .filter(|req| !req.url.ends_with(REGISTER_PATH))
            .collect();
        assert_eq!(signed.len(), 3);
        for req in signed {
            let header = req.header("Authorization").unwrap();
            let params = parse_header(header).unwrap();
            assert_eq!(header_param(&params, "oauth_consumer_key"), Some("ck"));
            assert!(header_param(&params, "oauth_token").is_none());
            assert!(header_param(&params, "oauth_signature").is_some());
        }
        assert_eq!(fx.mock.requests_to(REGISTER_PATH).len(), 1);
    }

    #[test]
    fn user_token_is_attached_when_present() {
        let fx = fixture();
        fx.credentials
            .set_user_credentials(
                &UserTokenPair {
                    token: "ut".into(),
                    secret: "us".into(),
                },
                Some("evan"),
            )
            .unwrap();
        fx.dispatcher
            .post("/api/user/evan/feed", json!({"verb": "post"}))
            .unwrap();
        let req = fx.mock.requests_to("/api/user/evan/feed").pop().unwrap();
        let params = parse_header(req.header("Authorization").unwrap()).unwrap();
        assert_eq!(header_param(&params, "oauth_token"), Some("ut"));
        assert_eq!(req.url, "https://pump.example/api/user/evan/feed");
    }

    #[test]
    fn credential_failure_blocks_the_request() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            Store::open(Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let mock = Arc::new(MockTransport::new());
        mock.on(Method::POST, REGISTER_PATH, HttpResponse::new(503, "down"));
        mock.on(Method::POST, "/api/user/evan/feed", HttpResponse::json(200, &json!({})));
        let credentials = Arc::new(CredentialStore::new(SERVER, "tests", store, mock.clone()));
        let dispatcher = Dispatcher::new(
            mock.clone(),
            credentials,
            Signer::new(Url::parse("https://pump.example/").unwrap()),
        );

        let err = dispatcher
            .post("/api/user/evan/feed", json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::CredentialUnavailable(_)));
        assert!(mock.requests_to("/api/user/evan/feed").is_empty());
    }

    #[test]
    fn malformed_url_is_not_a_credential_problem() {
        let fx = fixture();
        let err = fx
            .dispatcher
            .post("http://[not-a-host/feed", json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(fx
            .mock
            .requests()
            .iter()
            .all(|req| req.url.ends_with(REGISTER_PATH)));
    }
}
