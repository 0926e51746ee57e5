use serde::{Deserialize, Serialize};

/// A sponsor/intro/outro interval inside a video, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub category: Option<String>,
}

impl SponsorSegment {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            category: None,
        }
    }

    /// True when `position` lies inside the segment and at least `margin`
    /// seconds before its end, so a skip still saves time.
    pub fn should_skip_at(&self, position: f64, margin: f64) -> bool {
        position >= self.start && position < self.end - margin
    }
}

/// Body of the progress-save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePositionRequest {
    pub position: u64,
}
