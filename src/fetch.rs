use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;

use crate::error::{Error, Result};

/// Something that can refresh itself from the network.
pub trait Fetch: Send + Sync {
    fn fetch(&self) -> Result<()>;
}

/// Fetches every object concurrently and resolves once: with the whole batch
/// when all succeed, or with the first failure. Results arriving after the
/// batch resolved are dropped.
pub fn fetch_all<T>(objects: &[Arc<T>]) -> Result<Vec<Arc<T>>>
where
    T: Fetch + ?Sized + 'static,
{
    let batch: Vec<Arc<T>> = objects.to_vec();
    let count = batch.len();
    if count == 0 {
        return Ok(batch);
    }

    let (tx, rx) = unbounded::<(usize, Result<()>)>();
    for (index, object) in batch.iter().enumerate() {
        let object = object.clone();
        let worker_tx = tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("fetch-{index}"))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| object.fetch()))
                    .unwrap_or_else(|payload| Err(Error::FetchPanicked(panic_message(payload))));
                let _ = worker_tx.send((index, outcome));
            });
        if let Err(err) = spawned {
            let _ = tx.send((index, Err(Error::FetchPanicked(err.to_string()))));
        }
    }
    drop(tx);

    let mut fetched = 0;
    while fetched < count {
        match rx.recv() {
            Ok((_, Ok(()))) => fetched += 1,
            Ok((index, Err(err))) => {
                tracing::debug!(index, error = %err, "fetch: batch short-circuited");
                return Err(Error::BatchFetchFailed {
                    index,
                    source: Box::new(err),
                });
            }
            Err(_) => {
                return Err(Error::FetchPanicked(
                    "fetch workers exited without reporting".into(),
                ))
            }
        }
    }
    tracing::debug!(count, "fetch: batch complete");
    Ok(batch)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "fetch panicked".to_string()
    }
}
