use std::sync::Arc;

use anyhow::{Context, Result};

use crate::bootstrap::{self, Destination, Outcome, PageState, Presenter};
use crate::config;
use crate::context::AppContext;
use crate::model::{Person, User};
use crate::refresh::StreamRefresher;
use crate::session;
use crate::storage;
use crate::transport::{HttpTransport, TransportConfig};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub path: String,
    pub query: Option<String>,
    pub logout: bool,
    pub watch: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            path: "/".into(),
            query: None,
            logout: false,
            watch: false,
        }
    }
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );
    let transport = Arc::new(
        HttpTransport::new(TransportConfig {
            user_agent: cfg.server.user_agent.clone(),
            timeout: Some(cfg.server.timeout),
            http_client: None,
        })
        .context("build transport")?,
    );
    let ctx = Arc::new(AppContext::new(cfg, store, transport).context("build context")?);

    if options.logout {
        session::logout(&ctx).context("logout")?;
        println!("Logged out of {}.", ctx.credentials().server());
        return Ok(());
    }

    let page = PageState {
        path: options.path,
        query: options.query,
        ..PageState::default()
    };
    let outcome = bootstrap::run(&ctx, &page, &TerminalPresenter);
    match outcome {
        Outcome::Anonymous | Outcome::AnonymousSubject(_) => {
            println!("Browsing {} anonymously.", ctx.credentials().server());
        }
        Outcome::RenewalFailed => {
            println!("Stored session could not be renewed; browsing anonymously.");
        }
        Outcome::InboxUnavailable(user) => {
            println!("Logged in as {}, but the inbox could not be loaded.", user.nickname);
        }
        Outcome::EmbeddedPrincipal(_) | Outcome::Authenticated(_) => {}
    }

    if options.watch {
        watch(&ctx)?;
    }
    Ok(())
}

/// Keeps every cached stream fresh until the user presses Enter.
fn watch(ctx: &Arc<AppContext>) -> Result<()> {
    let Some(principal) = ctx.principal() else {
        println!("Nothing to watch while anonymous.");
        return Ok(());
    };
    let interval = ctx.config().refresh.interval;
    let refresher = StreamRefresher::start(ctx.clone());
    println!(
        "Refreshing every {}; press Enter to stop.",
        humantime::format_duration(interval)
    );
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("read stdin")?;
    refresher.stop();
    TerminalPresenter.show_principal(&principal);
    Ok(())
}

struct TerminalPresenter;

impl Presenter for TerminalPresenter {
    fn show_principal(&self, user: &Arc<User>) {
        let profile = user.profile();
        let name = if profile.display_name.is_empty() {
            user.nickname.as_str()
        } else {
            profile.display_name.as_str()
        };
        println!("Logged in as {} ({})", name, user.nickname);
        for (label, stream) in [
            ("Messages", &user.major_direct_inbox),
            ("Notifications", &user.minor_direct_inbox),
        ] {
            let snapshot = stream.snapshot();
            let total = snapshot
                .total_items
                .unwrap_or(snapshot.items.len() as u64);
            println!("  {label}: {total}");
            for item in snapshot.items.iter().take(5) {
                let id = item.id.as_deref().unwrap_or("-");
                println!("    {} {}", item.verb, id);
            }
        }
    }

    fn show_subject(&self, person: &Person) {
        println!("Viewing {}", person.display_name);
    }

    fn navigate(&self, destination: Destination) {
        match destination {
            Destination::Home => println!("-> home"),
            Destination::Path(path) => println!("-> {path}"),
        }
    }
}
