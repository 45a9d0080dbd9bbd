use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, tick, Sender};

use crate::config::ScrollConfig;
use crate::error::{report, Result};
use crate::model::ActivityStream;

pub trait Viewport: Send + Sync {
    fn scroll_top(&self) -> f64;
    fn document_height(&self) -> f64;
    fn window_height(&self) -> f64;
}

pub trait LoadIndicator: Send + Sync {
    fn start_load(&self);
    fn end_load(&self);
}

/// A stream that can be extended one page at a time.
pub trait Paged: Send + Sync {
    fn has_next(&self) -> bool;
    fn load_next(&self) -> Result<bool>;
}

impl Paged for ActivityStream {
    fn has_next(&self) -> bool {
        self.next_link().is_some()
    }

    fn load_next(&self) -> Result<bool> {
        ActivityStream::load_next(self)
    }
}

/// Supplies whichever stream is the primary ("major") one on the current page.
pub trait StreamSource: Send + Sync {
    fn primary(&self) -> Option<Arc<dyn Paged>>;
}

impl<F> StreamSource for F
where
    F: Fn() -> Option<Arc<dyn Paged>> + Send + Sync,
{
    fn primary(&self) -> Option<Arc<dyn Paged>> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    NotNearBottom,
    Exhausted,
    Loaded,
    Skipped,
    Failed,
}

/// Scroll events only mark the page dirty; the position is sampled on a timer.
pub struct InfiniteScroll {
    dirty: AtomicBool,
    threshold: f64,
    interval: Duration,
    viewport: Arc<dyn Viewport>,
    source: Arc<dyn StreamSource>,
    indicator: Arc<dyn LoadIndicator>,
}

impl InfiniteScroll {
    pub fn new(
        config: &ScrollConfig,
        viewport: Arc<dyn Viewport>,
        source: Arc<dyn StreamSource>,
        indicator: Arc<dyn LoadIndicator>,
    ) -> Self {
        Self {
            dirty: AtomicBool::new(false),
            threshold: config.threshold,
            interval: config.interval,
            viewport,
            source,
            indicator,
        }
    }

    pub fn on_scroll(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn near_bottom(&self) -> bool {
        let vp = &self.viewport;
        vp.scroll_top() >= vp.document_height() - vp.window_height() - self.threshold
    }

    pub fn tick(&self) -> TickOutcome {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return TickOutcome::Idle;
        }
        if !self.near_bottom() {
            return TickOutcome::NotNearBottom;
        }
        let stream = match self.source.primary() {
            Some(stream) if stream.has_next() => stream,
            _ => return TickOutcome::Exhausted,
        };

        self.indicator.start_load();
        let outcome = stream.load_next();
        self.indicator.end_load();
        match outcome {
            Ok(true) => TickOutcome::Loaded,
            Ok(false) => TickOutcome::Skipped,
            Err(err) => {
                report(&err);
                TickOutcome::Failed
            }
        }
    }

    /// Samples on a background thread every `scroll.interval` until the handle drops.
    pub fn spawn(self: Arc<Self>) -> ScrollHandle {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(self.interval);
        let handle = thread::spawn(move || loop {
            crossbeam_channel::select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => {
                    let outcome = self.tick();
                    if outcome != TickOutcome::Idle {
                        tracing::debug!(?outcome, "pagination: tick");
                    }
                }
            }
        });
        ScrollHandle {
            stop: stop_tx,
            thread: Some(handle),
        }
    }
}

pub struct ScrollHandle {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ScrollHandle {
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

impl Drop for ScrollHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
