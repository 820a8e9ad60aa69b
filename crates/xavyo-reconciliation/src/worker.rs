//! Bounded item worker pool.
//!
//! Items of one page (pull) or selection (push) are dispatched to spawned
//! tasks, at most `concurrency` at a time. Dispatch stops as soon as the halt
//! token is cancelled; items already running are allowed to finish so no
//! connector call is abandoned half way.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Result slot for one dispatched input.
#[derive(Debug)]
pub enum Slot<T> {
    /// The item ran to completion.
    Done(T),
    /// The item was never dispatched.
    Skipped,
    /// The item's task panicked.
    Panicked(String),
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `process` on every input and return the results in input order.
    pub async fn run<I, T, F, Fut>(
        &self,
        inputs: Vec<I>,
        halt: &CancellationToken,
        process: F,
    ) -> Vec<Slot<T>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Slot<T>> = inputs.iter().map(|_| Slot::Skipped).collect();

        for (index, input) in inputs.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = halt.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                debug!(dispatched = index, "Halt requested, not dispatching remaining items");
                break;
            };
            if halt.is_cancelled() {
                break;
            }

            let fut = process(input);
            tasks.spawn(async move {
                let _permit = permit;
                (index, AssertUnwindSafe(fut).catch_unwind().await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(value))) => slots[index] = Slot::Done(value),
                Ok((index, Err(panic))) => {
                    let message = panic_message(panic.as_ref());
                    error!(index, error = %message, "Item task panicked");
                    slots[index] = Slot::Panicked(message);
                }
                Err(e) => error!(error = %e, "Item task aborted"),
            }
        }

        slots
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
