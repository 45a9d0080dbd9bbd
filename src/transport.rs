use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json; charset=utf-8".into()),
            body: body.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }

    /// Best message for a failed response: the `error` field of a JSON body,
    /// falling back to the status line.
    pub fn error_message(&self) -> String {
        if self.is_json() {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&self.body) {
                if let Some(Value::String(message)) = map.get("error") {
                    return message.clone();
                }
            }
        }
        status_text(self.status)
    }
}

fn status_text(status: u16) -> String {
    match reqwest::StatusCode::from_u16(status) {
        Ok(code) => match code.canonical_reason() {
            Some(reason) => format!("{} {}", status, reason),
            None => status.to_string(),
        },
        Err(_) => status.to_string(),
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("{method} {url}: {message}")]
    Network {
        method: Method,
        url: String,
        message: String,
    },
    #[error("no response scripted for {method} {url}")]
    Unscripted { method: Method, url: String },
}

/// The generic request function every network call goes through.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct HttpTransport {
    http: HttpClient,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            anyhow::bail!("transport: user agent required");
        }
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .cookie_store(true)
                .build()
                .context("transport: build http client")?,
        };
        Ok(Self {
            http,
            user_agent: config.user_agent,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;
        let network = |err: reqwest::Error| TransportError::Network {
            method: method.clone(),
            url: url.clone(),
            message: err.to_string(),
        };

        let mut req = self
            .http
            .request(method.clone(), &url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(ACCEPT, "application/json");
        for (name, value) in &headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(&body);
        }

        let resp = req.send().map_err(network)?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = resp.text().map_err(network)?;
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

type Responder = Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// Scripted transport: routes are tried in order, one-shot responses first.
/// Every request is recorded, Authorization header included.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    queued: Mutex<VecDeque<(Method, String, Result<HttpResponse, TransportError>)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

struct Route {
    method: Method,
    path: String,
    respond: Responder,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `method path` request with `response`.
    pub fn on(&self, method: Method, path: &str, response: HttpResponse) {
        self.on_with(method, path, move |_| Ok(response.clone()));
    }

    pub fn on_with<F>(&self, method: Method, path: &str, respond: F)
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        self.routes.lock().push(Route {
            method,
            path: path.to_string(),
            respond: Arc::new(respond),
        });
    }

    /// Answer the next `method path` request once, ahead of any standing route.
    pub fn once(&self, method: Method, path: &str, response: Result<HttpResponse, TransportError>) {
        self.queued
            .lock()
            .push_back((method, path.to_string(), response));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|req| request_path(&req.url) == path)
            .cloned()
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        let path = request_path(&request.url);

        {
            let mut queued = self.queued.lock();
            if let Some(pos) = queued
                .iter()
                .position(|(method, p, _)| *method == request.method && *p == path)
            {
                if let Some((_, _, response)) = queued.remove(pos) {
                    return response;
                }
            }
        }

        let respond = self
            .routes
            .lock()
            .iter()
            .find(|route| route.method == request.method && route.path == path)
            .map(|route| route.respond.clone());
        if let Some(respond) = respond {
            return respond(&request);
        }
        Err(TransportError::Unscripted {
            method: request.method,
            url: request.url,
        })
    }
}

/// Path plus query of an absolute or relative URL.
pub fn request_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}

pub fn has_authorization(request: &HttpRequest) -> bool {
    request.header(AUTHORIZATION.as_str()).is_some()
}
