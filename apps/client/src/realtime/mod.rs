//! Real-time channel
//!
//! Keeps one authenticated connection open for the lifetime of a signed-in session.
//! Reconnects after transport failures with a fixed delay and gives up for good after
//! a bounded number of consecutive failures. A fresh channel is the only way back.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::notifications::{self, Notification, Notifier, RECONNECT_EXHAUSTED_MESSAGE};

pub mod events;
pub mod transport;

pub use events::{ChannelEvent, SubscriptionId};
pub use transport::{ChannelError, Frame, Transport, WebSocketTransport};

use events::Subscribers;
use transport::{FrameSink, FrameStream};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed connection attempts before giving up.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retries exhausted. Terminal.
    Failed,
    /// Closed by the client. Terminal.
    Closed,
}

/// Everything a new channel needs except the credential.
#[derive(Clone)]
pub struct ChannelConnector {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    notifier: Arc<dyn Notifier>,
}

impl ChannelConnector {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            transport,
            policy,
            notifier,
        }
    }

    pub fn open(&self, token: &str) -> RealtimeChannel {
        RealtimeChannel::open(
            Arc::clone(&self.transport),
            token,
            self.policy,
            Arc::clone(&self.notifier),
        )
    }
}

/// Handle to a live channel. Clones share the same connection; the connection is
/// closed by `close()` or when the last handle is dropped.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
}

/// State shared between the handles and the connection task.
struct Shared {
    subscribers: Subscribers,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    state: watch::Sender<ChannelState>,
    notifier: Arc<dyn Notifier>,
}

impl RealtimeChannel {
    /// Spawns the connection task. Must be called inside a Tokio runtime.
    pub fn open(
        transport: Arc<dyn Transport>,
        token: &str,
        policy: ReconnectPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        let shared = Arc::new(Shared {
            subscribers: Subscribers::default(),
            outbound: Mutex::new(None),
            state,
            notifier,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(connection_loop(
            transport,
            token.to_string(),
            policy,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        Self {
            inner: Arc::new(ChannelInner { shared, shutdown }),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Sends an event if connected. Otherwise logs a warning and drops it;
    /// nothing is queued for a later connection.
    pub fn emit(&self, event: &str, payload: Value) {
        let outbound = self
            .inner
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) if tx.send(Frame::new(event, payload)).is_ok() => {
                debug!(event, "Real-time event emitted");
            }
            _ => warn!(event, "Real-time channel not connected; event dropped"),
        }
    }

    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.inner.shared.subscribers.add(event, Arc::new(handler))
    }

    /// Returns whether the subscription existed.
    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        self.inner.shared.subscribers.remove(event, id)
    }

    /// Closes the connection. Safe to call any number of times.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl ChannelInner {
    fn close(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        self.shared.take_outbound();
        self.shared.state.send_replace(ChannelState::Closed);
        info!("Real-time channel closed");
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    /// Terminal states stick: the task cannot overwrite a client-side close.
    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == ChannelState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn install_outbound(&self, tx: mpsc::UnboundedSender<Frame>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    fn take_outbound(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn dispatch(&self, frame: Frame) {
        let event = ChannelEvent {
            name: frame.event,
            payload: frame.data,
            received_at: Utc::now(),
        };
        if let Some(notification) = notifications::for_event(&event.name, &event.payload) {
            self.notifier.notify(notification);
        }
        let delivered = self.subscribers.deliver(&event);
        debug!(event = %event.name, delivered, "Real-time event received");
    }
}

enum PumpExit {
    Shutdown,
    Lost(ChannelError),
}

async fn connection_loop(
    transport: Arc<dyn Transport>,
    token: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let connected = tokio::select! {
            _ = shutdown.changed() => break,
            result = transport.connect(&token) => result,
        };

        match connected {
            Ok((sink, stream)) => {
                failures = 0;
                info!("Real-time channel connected");

                match pump(sink, stream, &shared, &mut shutdown).await {
                    PumpExit::Shutdown => break,
                    PumpExit::Lost(e) => warn!("Real-time connection lost: {e}"),
                }
            }
            Err(e) => {
                failures += 1;
                warn!(
                    attempt = failures,
                    max_attempts = policy.max_attempts,
                    "Real-time connection attempt failed: {e}"
                );
                if failures >= policy.max_attempts {
                    error!(
                        "Real-time channel gave up after {} failed attempts",
                        failures
                    );
                    shared.set_state(ChannelState::Failed);
                    shared
                        .notifier
                        .notify(Notification::error(RECONNECT_EXHAUSTED_MESSAGE).persistent());
                    break;
                }
            }
        }

        // `attempt` counts within the current streak of failures.
        shared.set_state(ChannelState::Reconnecting {
            attempt: failures + 1,
        });

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }

    debug!("Real-time connection task finished");
}

/// Moves frames in both directions until the connection drops or the channel closes.
async fn pump(
    mut sink: FrameSink,
    mut stream: FrameStream,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpExit {
    let (tx, mut rx) = mpsc::unbounded_channel();
    shared.install_outbound(tx);
    shared.set_state(ChannelState::Connected);

    let exit = loop {
        tokio::select! {
            _ = shutdown.changed() => break PumpExit::Shutdown,
            Some(frame) = rx.recv() => {
                if let Err(e) = sink.send(frame).await {
                    break PumpExit::Lost(e);
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(frame)) => shared.dispatch(frame),
                Some(Err(ChannelError::Frame(reason))) => {
                    warn!("Ignoring malformed real-time frame: {reason}");
                }
                Some(Err(e)) => break PumpExit::Lost(e),
                None => break PumpExit::Lost(ChannelError::Closed),
            },
        }
    };

    shared.take_outbound();
    if matches!(exit, PumpExit::Shutdown) {
        let _ = sink.close().await;
    }
    exit
}
