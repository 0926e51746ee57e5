mod backoff;
pub use backoff::{apply_jitter, ReconnectPolicy, RetryStep};
mod cache;
pub use cache::{keys, CacheEntry, CacheUpdate, MemoryCache, Notifier, QueryCache};
mod codec;
pub use codec::{SseCodec, SseFrame};
mod error;
pub use error::SyncError;
mod events;
pub use events::{ChannelEvent, PlaybackEvent, SyncEvent};
pub mod models;
pub use models::{SavePositionRequest, SponsorSegment};
mod playback;
pub use playback::{resume_position, PlaybackTracker, TrackerConfig};
mod progress;
pub use progress::{HttpProgressStore, ProgressStore};
mod settings;
pub use settings::{Settings, SETTINGS};
mod state;
pub use state::ConnectionState;
mod sync;
pub use sync::CacheSync;
mod wake_lock;
pub use wake_lock::{ScreenLock, WakeLock};

use bytes::BytesMut;
use futures::{FutureExt, StreamExt}; // Needed for response.bytes_stream()
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, trace, warn};

/// Path of the server-push stream, relative to the server base URL.
pub const EVENTS_PATH: &str = "/api/sse";

struct ConnectionManagerContext {
    client: Arc<Client>,
    url: String,
    policy: ReconnectPolicy,
    jitter: f32,
    inactivity_timeout: Duration,
    request_timeout: Duration,
    cache_sync: CacheSync,
    event_sender: broadcast::Sender<ChannelEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_notify: Arc<Notify>,
    rearm_notify: Arc<Notify>,
    attempt: Arc<AtomicU32>,
    last_event_id: Arc<RwLock<Option<String>>>,
    // Server `retry:` hint in milliseconds, 0 when none was sent
    retry_hint_ms: Arc<AtomicU64>,
}

/// Real-time synchronization client.
///
/// Keeps one server-push stream open against the library server, applies
/// every named event to the local cache through [`CacheSync`] and
/// rebroadcasts it. Transport failures never reach the caller: they are
/// absorbed and retried per [`ReconnectPolicy`]. Only the connection state
/// is observable.
///
/// # Logging
///
/// This library uses the `tracing` crate for logging. To see its output,
/// install a subscriber in your application, e.g. with `tracing_subscriber`:
/// ```no_run
/// use tracing::Level;
/// use tracing_subscriber::FmtSubscriber;
///
/// let subscriber = FmtSubscriber::builder()
///     .with_max_level(Level::DEBUG)
///     .finish();
/// tracing::subscriber::set_global_default(subscriber)
///     .expect("Failed to set tracing subscriber");
/// ```
pub struct SyncClient {
    client: Arc<Client>,
    base_url: String,
    policy: ReconnectPolicy,
    jitter: f32,
    inactivity_timeout: Duration,
    cache_sync: CacheSync,
    event_sender: broadcast::Sender<ChannelEvent>,
    // Flag to signal the connection manager task to stop
    stop_signal: Arc<AtomicBool>,
    management_task: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
    shutdown_notify: Arc<Notify>,
    // Wakes the manager out of its retry sleep
    rearm_notify: Arc<Notify>,
    visible: AtomicBool,
    connection_state_tx: Arc<watch::Sender<ConnectionState>>,
    connection_state_rx: watch::Receiver<ConnectionState>,
    attempt: Arc<AtomicU32>,
    last_event_id: Arc<RwLock<Option<String>>>,
    retry_hint_ms: Arc<AtomicU64>,
}

impl SyncClient {
    /// Create a new SyncClient for the server at `base_url`. Optionally
    /// accepts a custom reqwest client for connection reuse; it must not set
    /// a total request timeout, since the event stream is long-lived.
    pub fn new(
        base_url: &str,
        cache: Arc<dyn QueryCache>,
        notifier: Arc<dyn Notifier>,
        custom_client: Option<Arc<Client>>,
    ) -> Result<Self, SyncError> {
        let client = match custom_client {
            Some(client) => client,
            None => Arc::new(
                Client::builder()
                    .connect_timeout(SETTINGS.request_timeout)
                    .pool_idle_timeout(Some(Duration::from_secs(600)))
                    .build()?,
            ),
        };
        let (event_tx, _) = broadcast::channel(SETTINGS.event_buffer_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy: ReconnectPolicy::default(),
            jitter: SETTINGS.backoff_jitter,
            inactivity_timeout: SETTINGS.inactivity_timeout,
            cache_sync: CacheSync::new(cache, notifier),
            event_sender: event_tx,
            stop_signal: Arc::new(AtomicBool::new(false)),
            management_task: Arc::new(RwLock::new(None)),
            shutdown_notify: Arc::new(Notify::new()),
            rearm_notify: Arc::new(Notify::new()),
            visible: AtomicBool::new(true),
            connection_state_tx: Arc::new(state_tx),
            connection_state_rx: state_rx,
            attempt: Arc::new(AtomicU32::new(0)),
            last_event_id: Arc::new(RwLock::new(None)),
            retry_hint_ms: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_inactivity_timeout(mut self, inactivity_timeout: Duration) -> Self {
        self.inactivity_timeout = inactivity_timeout;
        self
    }

    pub fn events_url(&self) -> String {
        format!("{}{}", self.base_url, EVENTS_PATH)
    }

    pub fn event_receiver(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_sender.subscribe()
    }

    /// Get the current state of the connection manager.
    pub fn current_state(&self) -> ConnectionState {
        *self.connection_state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state().is_connected()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state_rx.clone()
    }

    /// Attempt number the next failure will be scheduled with.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Start (or restart) the background connection manager. Any previous
    /// transport is torn down first, so calling this while already
    /// connected simply reconnects.
    pub async fn connect(&self) -> Result<(), SyncError> {
        info!(url = %self.events_url(), "Connecting event channel");

        self.stop_and_await_manager().await?;

        // Clear any previous stop signal
        self.stop_signal.store(false, Ordering::SeqCst);
        // Reset the notifications for a fresh start
        while self.shutdown_notify.notified().now_or_never().is_some() {}
        while self.rearm_notify.notified().now_or_never().is_some() {}
        self.attempt.store(0, Ordering::SeqCst);
        self.retry_hint_ms.store(0, Ordering::SeqCst);

        self.start_connection_manager().await;
        Ok(())
    }

    /// Release the transport and cancel any pending retry. Safe to call
    /// any number of times.
    pub async fn disconnect(&self) -> Result<(), SyncError> {
        info!(url = %self.events_url(), "Disconnecting event channel");
        self.stop_and_await_manager().await?;
        let _ = self
            .connection_state_tx
            .send_replace(ConnectionState::Disconnected);
        Ok(())
    }

    /// Host visibility changed. Coming back from hidden with no live
    /// transport skips the pending retry and reconnects right away with a
    /// fresh attempt counter.
    pub fn on_visibility_change(&self, visible: bool) {
        let was_visible = self.visible.swap(visible, Ordering::SeqCst);
        if !visible || was_visible {
            return;
        }
        if self.stop_signal.load(Ordering::SeqCst) {
            debug!("Visible again, but the channel was disconnected on purpose.");
            return;
        }
        if self.current_state() == ConnectionState::Disconnected {
            info!("Visible again with no live transport, reconnecting now.");
            self.attempt.store(0, Ordering::SeqCst);
            self.rearm_notify.notify_one();
        }
    }

    async fn start_connection_manager(&self) {
        let ctx = ConnectionManagerContext {
            client: self.client.clone(),
            url: self.events_url(),
            policy: self.policy,
            jitter: self.jitter,
            inactivity_timeout: self.inactivity_timeout,
            request_timeout: SETTINGS.request_timeout,
            cache_sync: self.cache_sync.clone(),
            event_sender: self.event_sender.clone(),
            state_tx: self.connection_state_tx.clone(),
            shutdown_notify: self.shutdown_notify.clone(),
            rearm_notify: self.rearm_notify.clone(),
            attempt: self.attempt.clone(),
            last_event_id: self.last_event_id.clone(),
            retry_hint_ms: self.retry_hint_ms.clone(),
        };

        let stop_signal = self.stop_signal.clone();
        let management_task_arc = self.management_task.clone();

        let handle = tokio::spawn(async move {
            info!("Connection manager task started.");
            // Outer loop only breaks on explicit shutdown
            loop {
                if stop_signal.load(Ordering::Relaxed) {
                    info!("Connection manager task stopping due to stop signal.");
                    break;
                }

                set_state(&ctx.state_tx, ConnectionState::Connecting);
                let result = tokio::select! {
                    biased;
                    _ = ctx.shutdown_notify.notified() => {
                        info!("Connection manager received shutdown notification.");
                        break;
                    }
                    res = Self::run_stream(&ctx) => res,
                };

                // The transport from this cycle is gone either way
                set_state(&ctx.state_tx, ConnectionState::Disconnected);
                let err = match result {
                    Ok(()) => SyncError::ConnectionClosed,
                    Err(e) => e,
                };
                match &err {
                    SyncError::ConnectionClosed => debug!("Event stream ended by server (EOF)."),
                    e if e.is_transport() => warn!(error = %e, "Event stream failed"),
                    e => error!(error = %e, "Event stream failed unexpectedly"),
                }
                let message = err.to_string();

                let policy = match ctx.retry_hint_ms.load(Ordering::SeqCst) {
                    0 => ctx.policy,
                    ms => ctx.policy.with_base(Duration::from_millis(ms)),
                };
                let attempt = ctx.attempt.load(Ordering::SeqCst);
                let step = policy.schedule(attempt);
                ctx.attempt.store(step.next_attempt, Ordering::SeqCst);
                let delay = apply_jitter(step.delay, ctx.jitter);
                let _ = ctx.event_sender.send(ChannelEvent::Error {
                    message,
                    retry_in_ms: delay.as_millis() as u64,
                });
                debug!(attempt, next_attempt = step.next_attempt, ?delay, "Backing off before reconnect");

                tokio::select! {
                    biased;
                    _ = ctx.shutdown_notify.notified() => {
                        info!("Shutdown requested while waiting to reconnect.");
                        break;
                    }
                    _ = ctx.rearm_notify.notified() => {
                        debug!("Retry timer skipped, reconnecting immediately.");
                        ctx.attempt.store(0, Ordering::SeqCst);
                    }
                    _ = sleep(delay) => {}
                }
            }

            info!("Connection manager task finished.");
            let _ = ctx.state_tx.send_replace(ConnectionState::Disconnected);
        });

        {
            let mut task_guard = management_task_arc.write().await;
            *task_guard = Some(handle);
            debug!("Stored management task JoinHandle.");
        }
    }

    /// Opens the stream and pumps it until it ends. `Ok` means the server
    /// closed the stream; every other ending is an error.
    async fn run_stream(ctx: &ConnectionManagerContext) -> Result<(), SyncError> {
        let mut request = ctx
            .client
            .get(&ctx.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = ctx.last_event_id.read().await.clone() {
            trace!(%id, "Resuming after last event id");
            request = request.header("Last-Event-ID", id);
        }

        let response = timeout(ctx.request_timeout, request.send())
            .await
            .map_err(|_| {
                SyncError::InvalidResponse(format!(
                    "No response from {} within {}s",
                    ctx.url,
                    ctx.request_timeout.as_secs()
                ))
            })??;

        if !response.status().is_success() {
            return Err(SyncError::InvalidResponse(format!(
                "Event stream request failed with status {}",
                response.status()
            )));
        }

        ctx.attempt.store(0, Ordering::SeqCst);
        set_state(&ctx.state_tx, ConnectionState::Connected);
        // A re-arm requested before this open is already satisfied
        while ctx.rearm_notify.notified().now_or_never().is_some() {}
        info!(url = %ctx.url, "Event stream opened");
        let _ = ctx.event_sender.send(ChannelEvent::Opened);

        let mut stream = response.bytes_stream();
        let mut codec = SseCodec::new();
        let mut buffer = BytesMut::with_capacity(SETTINGS.streaming_buffer_capacity);

        loop {
            match timeout(ctx.inactivity_timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    trace!("Received chunk of size {}", chunk.len());
                    buffer.extend_from_slice(&chunk);
                    while let Some(frame) = codec.decode(&mut buffer)? {
                        Self::handle_frame(ctx, frame).await;
                    }
                }
                Ok(Some(Err(e))) => return Err(SyncError::RequestFailed(e)),
                Ok(None) => return Ok(()),
                Err(_) => {
                    return Err(SyncError::Inactive(ctx.inactivity_timeout.as_secs()));
                }
            }
        }
    }

    async fn handle_frame(ctx: &ConnectionManagerContext, frame: SseFrame) {
        if let Some(id) = frame.id.clone() {
            *ctx.last_event_id.write().await = Some(id);
        }
        if let Some(ms) = frame.retry.filter(|ms| *ms > 0) {
            debug!(retry_ms = ms, "Server suggested a reconnect delay");
            ctx.retry_hint_ms.store(ms, Ordering::SeqCst);
        }
        let event = SyncEvent::from_frame(frame);
        debug!(event = event.event_type(), "Received event");
        ctx.cache_sync.dispatch(&event);
        let _ = ctx.event_sender.send(ChannelEvent::Message(event));
    }

    // Helper to stop and await the manager task
    async fn stop_and_await_manager(&self) -> Result<(), SyncError> {
        self.stop_signal.store(true, Ordering::SeqCst);

        let handle = {
            let mut task_guard = self.management_task.write().await;
            task_guard.take()
        };

        if let Some(h) = handle {
            self.shutdown_notify.notify_one();
            debug!("Awaiting management task termination...");
            h.await.map_err(SyncError::TaskJoinError)?;
            debug!("Management task joined.");
        }
        Ok(())
    }
}

fn set_state(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state_tx.send_if_modified(|prev| {
        if *prev == next {
            return false;
        }
        if !prev.can_transition_to(next) {
            warn!(from = ?*prev, to = ?next, "Unexpected connection state transition");
        }
        *prev = next;
        true
    });
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("base_url", &self.base_url)
            .field("state", &self.current_state())
            .field("policy", &self.policy)
            .finish()
    }
}

// Ensure the client cleans up the background task on drop
impl Drop for SyncClient {
    fn drop(&mut self) {
        debug!("Dropping SyncClient, stopping connection manager.");
        self.stop_signal.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_one();
        // Drop can't await; abort instead so no retry fires after disposal
        if let Ok(mut task_guard) = self.management_task.try_write() {
            if let Some(handle) = task_guard.take() {
                handle.abort();
            }
        }
    }
}
