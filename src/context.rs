use std::sync::Arc;

use anyhow::Context as _;
use parking_lot::RwLock;
use url::Url;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::model::{Models, Person, User};
use crate::oauth::Signer;
use crate::storage::Store;
use crate::transport::Transport;

/// Everything the client runtime shares: configuration, credentials, the
/// dispatcher, model caches and who is looking at the page.
pub struct AppContext {
    config: Config,
    store: Arc<Store>,
    credentials: Arc<CredentialStore>,
    dispatcher: Arc<Dispatcher>,
    models: Models,
    principal: RwLock<Option<Arc<User>>>,
    subject: RwLock<Option<Arc<RwLock<Person>>>>,
}

impl AppContext {
    pub fn new(config: Config, store: Arc<Store>, transport: Arc<dyn Transport>) -> Result<Self> {
        let page = Url::parse(&config.server.url)
            .with_context(|| format!("context: invalid server url {}", config.server.url))?;
        let signer = Signer::new(page);
        let credentials = Arc::new(CredentialStore::new(
            signer.origin(),
            config.server.application_name.clone(),
            store.clone(),
            transport.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(transport, credentials.clone(), signer));
        let models = Models::new(dispatcher.clone());

        Ok(Self {
            config,
            store,
            credentials,
            dispatcher,
            models,
            principal: RwLock::new(None),
            subject: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    pub fn principal(&self) -> Option<Arc<User>> {
        self.principal.read().clone()
    }

    pub fn set_principal(&self, user: Option<Arc<User>>) {
        *self.principal.write() = user;
    }

    pub fn subject(&self) -> Option<Arc<RwLock<Person>>> {
        self.subject.read().clone()
    }

    pub fn set_subject(&self, person: Option<Arc<RwLock<Person>>>) {
        *self.subject.write() = person;
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.read().is_some()
    }

    /// Resets exactly what login state owns: principal, subject, model caches
    /// and stored credentials.
    pub fn teardown(&self) -> Result<()> {
        self.set_principal(None);
        self.set_subject(None);
        self.models.clear();
        self.credentials.clear()
    }
}
