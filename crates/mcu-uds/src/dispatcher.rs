//! Dispatcher: ingress, processing and timer tasks
//!
//! ```text
//!  bus transport ──(ingress)──┐
//!                             ├──> FrameQueue ──(processing)──> ServiceRouter ──> transports
//!  api transport ──(ingress)──┘
//!
//!  timer task ──every timer_poll_ms──> McuContext::poll_timers
//! ```
//!
//! Every task checks the shared running flag after each blocking call
//! returns. Shutdown clears the flag, closes the queue and joins every task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::McuContext;
use crate::queue::FrameQueue;
use crate::router::{Outbound, ServiceRouter};
use crate::transport::FrameTransport;

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct Dispatcher {
    context: Arc<McuContext>,
    bus: Arc<dyn FrameTransport>,
    api: Option<Arc<dyn FrameTransport>>,
}

impl Dispatcher {
    pub fn new(context: Arc<McuContext>, bus: Arc<dyn FrameTransport>) -> Self {
        Self {
            context,
            bus,
            api: None,
        }
    }

    /// Listen on a separate API channel and send API-bound frames there
    pub fn with_api(mut self, api: Arc<dyn FrameTransport>) -> Self {
        self.api = Some(api);
        self
    }

    /// Spawn all tasks. Must be called from within a tokio runtime.
    pub fn start(self) -> DispatcherHandle {
        let running = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(FrameQueue::new());
        let receive_timeout = self.context.config().transport.receive_timeout();
        let mut tasks = Vec::new();

        tasks.push((
            "bus-ingress",
            spawn_ingress(
                self.bus.clone(),
                queue.clone(),
                running.clone(),
                receive_timeout,
            ),
        ));

        if let Some(api) = &self.api {
            tasks.push((
                "api-ingress",
                spawn_ingress(api.clone(), queue.clone(), running.clone(), receive_timeout),
            ));
        }

        let router = ServiceRouter::new(self.context.clone());
        let bus = self.bus.clone();
        let api = self.api.clone();
        let queue_for_processing = queue.clone();
        tasks.push((
            "processing",
            tokio::task::spawn_blocking(move || {
                process_frames(router, &queue_for_processing, bus.as_ref(), api.as_deref());
            }),
        ));

        let context = self.context.clone();
        let running_for_timers = running.clone();
        let poll_interval = Duration::from_millis(self.context.config().session.timer_poll_ms);
        tasks.push((
            "timers",
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(poll_interval);
                while running_for_timers.load(Ordering::SeqCst) {
                    interval.tick().await;
                    context.poll_timers();
                }
                debug!("Timer task stopped");
            }),
        ));

        info!(
            bus = self.bus.name(),
            api = self.api.as_ref().map(|t| t.name()).unwrap_or("-"),
            tasks = tasks.len(),
            "Dispatcher started"
        );

        DispatcherHandle {
            context: self.context,
            running,
            queue,
            tasks,
        }
    }
}

/// Running dispatcher
pub struct DispatcherHandle {
    context: Arc<McuContext>,
    running: Arc<AtomicBool>,
    queue: Arc<FrameQueue>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl DispatcherHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frames received but not yet routed
    pub fn pending_frames(&self) -> usize {
        self.queue.len()
    }

    /// Signal every task to stop and wait for them
    pub async fn shutdown(self) {
        info!("Shutting down dispatcher...");
        self.running.store(false, Ordering::SeqCst);
        self.queue.close();

        for (name, handle) in self.tasks {
            match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(task = name, "Task joined"),
                Ok(Err(e)) => error!(task = name, error = %e, "Task failed"),
                Err(_) => warn!(task = name, "Task did not stop in time"),
            }
        }
        self.context.stop_timers();
        info!("Dispatcher stopped");
    }
}

fn spawn_ingress(
    transport: Arc<dyn FrameTransport>,
    queue: Arc<FrameQueue>,
    running: Arc<AtomicBool>,
    receive_timeout: Duration,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while running.load(Ordering::SeqCst) {
            match transport.receive(receive_timeout) {
                Ok(Some(frame)) => {
                    debug!(interface = transport.name(), ?frame, "Frame received");
                    if !queue.push(frame) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(interface = transport.name(), error = %e, "Receive error");
                    std::thread::sleep(RECEIVE_ERROR_BACKOFF);
                }
            }
        }
        debug!(interface = transport.name(), "Ingress stopped");
    })
}

fn process_frames(
    mut router: ServiceRouter,
    queue: &FrameQueue,
    bus: &dyn FrameTransport,
    api: Option<&dyn FrameTransport>,
) {
    // pop() returns None only once the queue is closed and drained
    while let Some(frame) = queue.pop() {
        for outbound in router.route(&frame) {
            let transport = match &outbound {
                Outbound::Bus(_) => bus,
                Outbound::Api(_) => api.unwrap_or(bus),
            };
            if let Err(e) = transport.send(outbound.frame()) {
                error!(
                    interface = transport.name(),
                    can_id = %outbound.frame().id(),
                    error = %e,
                    "Failed to send frame"
                );
            }
        }
    }
    debug!("Processing stopped");
}
