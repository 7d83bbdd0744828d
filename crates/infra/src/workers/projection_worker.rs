use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use promissory_events::{EventBus, EventEnvelope, Projection, Subscription};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Projection worker loop.
///
/// - Subscribes to an event bus (before returning, so nothing published afterwards is missed)
/// - Feeds every envelope the projection handles to `Projection::apply`, one at a time
/// - Logs protocol violations at error level and local read-model failures as warnings,
///   then keeps consuming; the projection's cursor guarantees a rejected envelope left no
///   partial state behind, so a later catch-up from the log can still apply it
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a worker thread that processes events from the bus subscription.
    pub fn spawn<P, B>(name: &'static str, bus: B, projection: Arc<P>) -> std::io::Result<WorkerHandle>
    where
        P: Projection + 'static,
        P::Payload: Send + 'static,
        B: EventBus<EventEnvelope<P::Payload>>,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<EventEnvelope<P::Payload>> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, projection.as_ref()))?;

        info!(worker = name, "projection worker started");

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<P>(
    name: &'static str,
    sub: Subscription<EventEnvelope<P::Payload>>,
    shutdown_rx: mpsc::Receiver<()>,
    projection: &P,
) where
    P: Projection,
{
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(envelope) => {
                if !projection.handles(envelope.aggregate_type()) {
                    continue;
                }

                match projection.apply(&envelope) {
                    Ok(()) => {}
                    Err(err) if projection.is_protocol_violation(&err) => error!(
                        worker = name,
                        projection = projection.name(),
                        stream = %envelope.aggregate_id(),
                        sequence = envelope.sequence_number(),
                        event_type = envelope.event_type(),
                        error = %err,
                        "projection rejected event"
                    ),
                    Err(err) => warn!(
                        worker = name,
                        projection = projection.name(),
                        stream = %envelope.aggregate_id(),
                        sequence = envelope.sequence_number(),
                        error = %err,
                        "projection failed to apply event"
                    ),
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "projection worker stopped");
}
