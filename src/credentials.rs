use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::storage::{ClientCredentials, Store, UserTokenPair};
use crate::transport::{HttpRequest, Transport};

pub const REGISTER_PATH: &str = "/api/client/register";

type Waiter = Sender<Result<ClientCredentials, String>>;

enum ClientState {
    Empty,
    Registering(Vec<Waiter>),
    Ready(ClientCredentials),
}

/// Process-wide holder of the OAuth consumer identity and the visitor's token pair.
///
/// Concurrent first-time callers of [`client_credentials`](Self::client_credentials)
/// share a single registration call.
pub struct CredentialStore {
    server: String,
    register_url: String,
    application_name: String,
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    state: Mutex<ClientState>,
    generation: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: String,
}

impl CredentialStore {
    /// `server` is the origin used both as storage key and as registration host.
    pub fn new(
        server: impl Into<String>,
        application_name: impl Into<String>,
        store: Arc<Store>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let server = server.into();
        let register_url = format!("{}{}", server.trim_end_matches('/'), REGISTER_PATH);
        Self {
            server,
            register_url,
            application_name: application_name.into(),
            store,
            transport,
            state: Mutex::new(ClientState::Empty),
            generation: AtomicU64::new(0),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn client_credentials(&self) -> Result<ClientCredentials> {
        let (rx, generation) = {
            let mut state = self.state.lock();
            let generation = self.generation.load(Ordering::SeqCst);
            match &mut *state {
                ClientState::Ready(cred) => return Ok(cred.clone()),
                ClientState::Registering(waiters) => {
                    let (tx, rx) = bounded(1);
                    waiters.push(tx);
                    (Some(rx), generation)
                }
                ClientState::Empty => {
                    *state = ClientState::Registering(Vec::new());
                    (None, generation)
                }
            }
        };

        if let Some(rx) = rx {
            return match rx.recv() {
                Ok(result) => result.map_err(Error::CredentialUnavailable),
                Err(_) => Err(Error::CredentialUnavailable(
                    "registration abandoned".into(),
                )),
            };
        }

        let loaded = self.load_or_register();

        let (outcome, waiters) = {
            let mut state = self.state.lock();
            // Generation check and persist both happen under the state lock.
            let outcome = match loaded {
                Ok(_) if self.generation.load(Ordering::SeqCst) != generation => {
                    tracing::info!(server = %self.server, "credentials: cleared during registration, discarding");
                    Err("credentials cleared during registration".to_string())
                }
                Ok((cred, registered)) => {
                    if registered {
                        if let Err(err) = self.store.put_client_credentials(&self.server, &cred) {
                            tracing::warn!(error = %err, "credentials: could not persist client");
                        }
                    }
                    Ok(cred)
                }
                Err(err) => Err(err),
            };
            let previous = std::mem::replace(
                &mut *state,
                match &outcome {
                    Ok(cred) => ClientState::Ready(cred.clone()),
                    Err(_) => ClientState::Empty,
                },
            );
            let waiters = match previous {
                ClientState::Registering(waiters) => waiters,
                _ => Vec::new(),
            };
            (outcome, waiters)
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome.map_err(Error::CredentialUnavailable)
    }

    /// Stored credentials, or a fresh registration flagged `true`.
    fn load_or_register(&self) -> Result<(ClientCredentials, bool), String> {
        match self.store.get_client_credentials(&self.server) {
            Ok(Some(cred)) => return Ok((cred, false)),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "credentials: stored client unreadable"),
        }
        Ok((self.register()?, true))
    }

    fn register(&self) -> Result<ClientCredentials, String> {
        tracing::info!(server = %self.server, "credentials: registering client");
        let request = HttpRequest::post(
            self.register_url.clone(),
            json!({
                "type": "client_associate",
                "application_type": "web",
                "application_name": self.application_name,
            }),
        );
        let resp = self
            .transport
            .send(request)
            .map_err(|err| err.to_string())?;
        if !resp.is_success() {
            return Err(format!("registration failed: {}", resp.error_message()));
        }
        let payload: RegistrationResponse = resp
            .decode()
            .map_err(|err| format!("registration response: {}", err))?;
        if payload.client_id.is_empty() {
            return Err("registration response missing client_id".into());
        }
        Ok(ClientCredentials {
            client_id: payload.client_id,
            client_secret: payload.client_secret,
        })
    }

    /// The visitor's stored token pair, if they have a session.
    pub fn user_credentials(&self) -> Result<Option<UserTokenPair>> {
        Ok(self.store.get_user_token(&self.server)?)
    }

    pub fn set_user_credentials(&self, pair: &UserTokenPair, nickname: Option<&str>) -> Result<()> {
        self.store.put_user_token(&self.server, pair, nickname)?;
        Ok(())
    }

    /// Forgets both credential kinds. A registration still in flight finishes
    /// but its result is neither cached nor stored.
    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            if matches!(*state, ClientState::Ready(_)) {
                *state = ClientState::Empty;
            }
        }
        self.store.clear_credentials(&self.server)?;
        Ok(())
    }
}
