use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, tick, Sender};

use crate::context::AppContext;
use crate::error::{report, Result};
use crate::fetch::fetch_all;

/// Re-fetches every cached stream in one batch.
pub fn refresh_streams(ctx: &AppContext) -> Result<usize> {
    let streams = ctx.models().streams();
    let count = streams.len();
    fetch_all(&streams)?;
    Ok(count)
}

/// Periodic fallback refresh in case pushed updates get lost. Runs every
/// `refresh.interval` from the context's config.
pub struct StreamRefresher {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamRefresher {
    pub fn start(ctx: Arc<AppContext>) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(ctx.config().refresh.interval);
        let handle = thread::spawn(move || loop {
            crossbeam_channel::select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => match refresh_streams(&ctx) {
                    Ok(count) => tracing::debug!(count, "refresh: streams refreshed"),
                    Err(err) => report(&err),
                },
            }
        });
        Self {
            stop: stop_tx,
            thread: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamRefresher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
