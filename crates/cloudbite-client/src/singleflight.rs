/// Single-flight coordination for expensive operations.
///
/// At most one instance of a named operation runs at a time; late
/// callers attach to the in-flight run and receive the same result. The
/// operation itself runs as a detached task, so a caller being cancelled
/// mid-await cannot strand the others.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::debug;

enum Flight<T> {
    Idle,
    InProgress(broadcast::Sender<T>),
}

/// Tagged single-flight slot, named for logging.
pub struct SingleFlight<T> {
    name: &'static str,
    flight: Arc<Mutex<Flight<T>>>,
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            flight: Arc::new(Mutex::new(Flight::Idle)),
        }
    }

    /// Whether a run is currently in progress.
    pub fn in_flight(&self) -> bool {
        matches!(*self.flight.lock().unwrap(), Flight::InProgress(_))
    }

    /// Run `op`, or join the run already in flight.
    ///
    /// `op` is only invoked when this caller becomes the leader. If the
    /// leading task dies without publishing a result, waiting callers
    /// re-contest leadership instead of hanging.
    pub async fn run<F, Fut>(&self, op: F) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        loop {
            let mut rx = {
                let mut flight = self.flight.lock().unwrap();
                match &*flight {
                    Flight::InProgress(tx) => {
                        debug!(op = self.name, "Joining in-flight operation");
                        tx.subscribe()
                    }
                    Flight::Idle => {
                        let (tx, rx) = broadcast::channel(1);
                        *flight = Flight::InProgress(tx.clone());

                        let fut = op();
                        let slot = Arc::clone(&self.flight);
                        tokio::spawn(async move {
                            let outcome = AssertUnwindSafe(fut).catch_unwind().await;
                            let mut flight = slot.lock().unwrap();
                            *flight = Flight::Idle;
                            if let Ok(value) = outcome {
                                // Dropping tx without sending (panic path)
                                // closes the channel and wakes the others.
                                let _ = tx.send(value);
                            }
                        });
                        rx
                    }
                }
            };

            match rx.recv().await {
                Ok(value) => return value,
                Err(_) => {
                    debug!(op = self.name, "In-flight operation died, retrying");
                }
            }
        }
    }
}
