use crate::codec::SseFrame;
use crate::models::SponsorSegment;

// Named data events read from the server-push stream. Payloads stay raw;
// handlers decide how much of them to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Init(String),
    Queue(String),
    Settings(String),
    Import(String),
    Videos(String),
    Channels(String),
    Toast(String),
    Unknown { name: String, payload: String },
}

impl SyncEvent {
    pub fn from_frame(frame: SseFrame) -> Self {
        let SseFrame { event, data, .. } = frame;
        match event.as_str() {
            "init" => SyncEvent::Init(data),
            "queue" => SyncEvent::Queue(data),
            "settings" => SyncEvent::Settings(data),
            "import" => SyncEvent::Import(data),
            "videos" => SyncEvent::Videos(data),
            "channels" => SyncEvent::Channels(data),
            "toast" => SyncEvent::Toast(data),
            _ => SyncEvent::Unknown {
                name: event,
                payload: data,
            },
        }
    }

    // Get the wire name of the event
    pub fn event_type(&self) -> &str {
        match self {
            SyncEvent::Init(_) => "init",
            SyncEvent::Queue(_) => "queue",
            SyncEvent::Settings(_) => "settings",
            SyncEvent::Import(_) => "import",
            SyncEvent::Videos(_) => "videos",
            SyncEvent::Channels(_) => "channels",
            SyncEvent::Toast(_) => "toast",
            SyncEvent::Unknown { name, .. } => name,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            SyncEvent::Init(p)
            | SyncEvent::Queue(p)
            | SyncEvent::Settings(p)
            | SyncEvent::Import(p)
            | SyncEvent::Videos(p)
            | SyncEvent::Channels(p)
            | SyncEvent::Toast(p) => p,
            SyncEvent::Unknown { payload, .. } => payload,
        }
    }
}

/// Everything the event channel broadcasts to subscribers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The stream was opened and the attempt counter reset.
    Opened,
    /// The stream failed or closed; a retry is scheduled after `retry_in_ms`.
    Error { message: String, retry_in_ms: u64 },
    /// A named event, delivered after the cache was updated from it.
    Message(SyncEvent),
}

/// Side effects of the playback tracker that the host may react to.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Playback crossed the watched threshold; fires once per session.
    Watched { media_id: String },
    Ended { media_id: String },
    /// A sponsor segment was skipped; the host should seek to `to`.
    SegmentSkipped {
        media_id: String,
        segment: SponsorSegment,
        to: f64,
    },
}

impl PlaybackEvent {
    pub fn media_id(&self) -> &str {
        match self {
            PlaybackEvent::Watched { media_id }
            | PlaybackEvent::Ended { media_id }
            | PlaybackEvent::SegmentSkipped { media_id, .. } => media_id,
        }
    }
}
