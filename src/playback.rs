use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::SyncError;
use crate::events::PlaybackEvent;
use crate::models::SponsorSegment;
use crate::progress::ProgressStore;
use crate::settings::SETTINGS;
use crate::wake_lock::WakeLock;

/// Tunables of the playback tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Quiet period after the last position update before it is saved.
    pub debounce: Duration,
    /// Saved positions below this many seconds count as unwatched.
    pub resume_floor_secs: f64,
    /// Fraction of the duration after which the media counts as watched.
    pub watched_threshold: f64,
    /// Minimum time between two segment skips.
    pub skip_cooldown: Duration,
    /// Positions this close to a segment's end no longer trigger a skip.
    pub skip_end_margin_secs: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce: SETTINGS.progress_debounce,
            resume_floor_secs: SETTINGS.resume_floor_secs,
            watched_threshold: SETTINGS.watched_threshold,
            skip_cooldown: SETTINGS.skip_cooldown,
            skip_end_margin_secs: SETTINGS.skip_end_margin_secs,
        }
    }
}

/// Where playback should start given a previously saved position.
pub fn resume_position(saved: Option<f64>, floor_secs: f64) -> f64 {
    match saved {
        Some(pos) if pos.is_finite() && pos >= floor_secs => pos,
        _ => 0.0,
    }
}

// Read by the debounce task when it fires, never captured by value
struct TrackerContext {
    media_id: String,
    position: f64,
}

impl TrackerContext {
    fn snapshot(context: &Mutex<TrackerContext>) -> (String, u64) {
        let ctx = context.lock().unwrap_or_else(PoisonError::into_inner);
        (ctx.media_id.clone(), whole_seconds(ctx.position))
    }
}

fn spawn_save(store: &dyn ProgressStore, media_id: String, seconds: u64) {
    let save = store.save_position(&media_id, seconds);
    tokio::spawn(log_save_failure(media_id, save));
}

async fn log_save_failure(media_id: String, save: BoxFuture<'static, Result<(), SyncError>>) {
    if let Err(e) = save.await {
        warn!(%media_id, error = %e, "Failed to save playback position");
    }
}

fn whole_seconds(position: f64) -> u64 {
    if position.is_finite() && position > 0.0 {
        position.floor() as u64
    } else {
        0
    }
}

/// Playback-progress state machine for one media item.
///
/// Driven by the host's media element signals. Persists the position
/// (debounced while playing, immediately on pause/seek/teardown), detects
/// the watched threshold once, skips sponsor segments and holds the wake
/// lock while playing.
pub struct PlaybackTracker {
    config: TrackerConfig,
    context: Arc<Mutex<TrackerContext>>,
    start_position: f64,
    duration: Option<f64>,
    segments: Vec<SponsorSegment>,
    watched: bool,
    playing: bool,
    last_skip: Option<Instant>,
    debounce_task: Option<JoinHandle<()>>,
    store: Arc<dyn ProgressStore>,
    wake_lock: Arc<WakeLock>,
    // This tracker counts as one holder of the shared wake lock
    holds_wake_lock: bool,
    event_sender: broadcast::Sender<PlaybackEvent>,
    torn_down: bool,
}

impl PlaybackTracker {
    pub fn new(
        media_id: &str,
        saved_position: Option<f64>,
        store: Arc<dyn ProgressStore>,
        wake_lock: Arc<WakeLock>,
        config: TrackerConfig,
    ) -> Self {
        let start_position = resume_position(saved_position, config.resume_floor_secs);
        let (event_tx, _) = broadcast::channel(16);
        debug!(media_id, start_position, "Playback tracker bound");

        Self {
            config,
            context: Arc::new(Mutex::new(TrackerContext {
                media_id: media_id.to_string(),
                position: start_position,
            })),
            start_position,
            duration: None,
            segments: Vec::new(),
            watched: false,
            playing: false,
            last_skip: None,
            debounce_task: None,
            store,
            wake_lock,
            holds_wake_lock: false,
            event_sender: event_tx,
            torn_down: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.event_sender.subscribe()
    }

    /// Position the host should seek to before starting playback.
    pub fn start_position(&self) -> f64 {
        self.start_position
    }

    pub fn media_id(&self) -> String {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .media_id
            .clone()
    }

    pub fn position(&self) -> f64 {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .position
    }

    pub fn is_watched(&self) -> bool {
        self.watched
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn has_pending_save(&self) -> bool {
        self.debounce_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn set_duration(&mut self, duration: f64) {
        if duration.is_finite() && duration > 0.0 {
            self.duration = Some(duration);
        }
    }

    /// Replaces the sponsor segments, kept ordered by start time.
    pub fn set_segments(&mut self, mut segments: Vec<SponsorSegment>) {
        segments.retain(|s| s.start.is_finite() && s.end.is_finite() && s.end > s.start);
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        self.segments = segments;
    }

    pub fn on_play(&mut self) {
        if self.torn_down {
            return;
        }
        self.playing = true;
        if !self.holds_wake_lock {
            self.wake_lock.acquire();
            self.holds_wake_lock = true;
        }
    }

    /// Handles a position tick. Returns the position to seek to when a
    /// sponsor segment was skipped.
    pub fn on_time_update(&mut self, position: f64) -> Option<f64> {
        if self.torn_down || !position.is_finite() || position < 0.0 {
            return None;
        }
        self.set_position(position);
        self.schedule_save();

        let skipped_to = self.try_skip(position);
        let position = skipped_to.unwrap_or(position);
        self.check_watched(position);
        skipped_to
    }

    pub fn on_pause(&mut self) {
        if self.torn_down {
            return;
        }
        self.playing = false;
        self.save_now();
        self.release_wake_lock();
    }

    pub fn on_seeked(&mut self, position: f64) {
        if self.torn_down || !position.is_finite() || position < 0.0 {
            return;
        }
        self.set_position(position);
        self.save_now();
    }

    pub fn on_ended(&mut self) {
        if self.torn_down {
            return;
        }
        self.playing = false;
        self.release_wake_lock();
        let media_id = self.media_id();
        info!(%media_id, "Playback ended");
        let _ = self.event_sender.send(PlaybackEvent::Ended { media_id });
    }

    /// Host visibility changed. Hiding the page drops OS-level locks, so a
    /// fresh one is requested once visible again while still playing.
    pub fn on_visibility_change(&mut self, visible: bool) {
        if self.torn_down {
            return;
        }
        if !visible {
            self.wake_lock.mark_lost();
        } else if self.playing {
            self.wake_lock.restore();
        }
    }

    /// Final best-effort save; cancels the debounce timer and releases the
    /// wake lock. Later signals are ignored.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.playing = false;
        self.save_now();
        self.release_wake_lock();
        debug!(media_id = %self.media_id(), "Playback tracker torn down");
    }

    fn release_wake_lock(&mut self) {
        if self.holds_wake_lock {
            self.holds_wake_lock = false;
            self.wake_lock.release();
        }
    }

    fn set_position(&self, position: f64) {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .position = position;
    }

    fn cancel_pending_save(&mut self) {
        if let Some(task) = self.debounce_task.take() {
            task.abort();
        }
    }

    fn schedule_save(&mut self) {
        self.cancel_pending_save();

        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime, skipping debounced save");
            return;
        };
        let context = self.context.clone();
        let store = self.store.clone();
        let delay = self.config.debounce;

        // Only the timer is cancellable; once it fires the save runs detached
        self.debounce_task = Some(handle.spawn(async move {
            sleep(delay).await;
            let (media_id, seconds) = TrackerContext::snapshot(&context);
            trace!(%media_id, seconds, "Debounced save firing");
            spawn_save(store.as_ref(), media_id, seconds);
        }));
    }

    fn save_now(&mut self) {
        self.cancel_pending_save();

        let (media_id, seconds) = TrackerContext::snapshot(&self.context);
        let Ok(handle) = Handle::try_current() else {
            warn!(%media_id, "No async runtime, playback position not saved");
            return;
        };
        let save = self.store.save_position(&media_id, seconds);
        handle.spawn(log_save_failure(media_id, save));
    }

    fn try_skip(&mut self, position: f64) -> Option<f64> {
        let now = Instant::now();
        if let Some(last) = self.last_skip {
            if now.duration_since(last) < self.config.skip_cooldown {
                return None;
            }
        }

        let segment = self
            .segments
            .iter()
            .find(|s| s.should_skip_at(position, self.config.skip_end_margin_secs))?
            .clone();

        self.last_skip = Some(now);
        self.set_position(segment.end);
        let media_id = self.media_id();
        debug!(%media_id, from = position, to = segment.end, "Skipping sponsor segment");
        let to = segment.end;
        let _ = self.event_sender.send(PlaybackEvent::SegmentSkipped {
            media_id,
            segment,
            to,
        });
        Some(to)
    }

    fn check_watched(&mut self, position: f64) {
        if self.watched {
            return;
        }
        let Some(duration) = self.duration else {
            return;
        };
        if position / duration >= self.config.watched_threshold {
            self.watched = true;
            let media_id = self.media_id();
            info!(%media_id, "Marked as watched");
            let _ = self.event_sender.send(PlaybackEvent::Watched { media_id });
        }
    }
}

impl std::fmt::Debug for PlaybackTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackTracker")
            .field("media_id", &self.media_id())
            .field("position", &self.position())
            .field("duration", &self.duration)
            .field("watched", &self.watched)
            .field("playing", &self.playing)
            .finish()
    }
}

// Unload path: same best-effort save as an explicit teardown
impl Drop for PlaybackTracker {
    fn drop(&mut self) {
        self.teardown();
        self.cancel_pending_save();
    }
}
