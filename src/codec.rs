// Codec for the server-sent events wire format
// Handles blocks of `field: value` lines terminated by a blank line

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::warn;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field, `"message"` when the server omitted it.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

pub struct SseCodec {
    // Fields collected for the frame currently being read
    pending: PendingFrame,
}

#[derive(Default)]
struct PendingFrame {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    // A line of this block was not valid UTF-8
    corrupt: bool,
}

impl PendingFrame {
    fn is_empty(&self) -> bool {
        self.event.is_none()
            && self.data.is_none()
            && self.id.is_none()
            && self.retry.is_none()
            && !self.corrupt
    }
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SseCodec {
    pub fn new() -> Self {
        Self {
            pending: PendingFrame::default(),
        }
    }

    fn apply_field(&mut self, line: &str) {
        // Lines starting with a colon are comments (used as keep-alives)
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => match self.pending.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_string()),
            },
            // ids containing NUL are ignored by the format
            "id" if !value.contains('\0') => self.pending.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.pending.retry = Some(ms);
                }
            }
            _ => {}
        }
    }

    /// Finishes the pending block. Blocks without data, or with an
    /// undecodable line, are not dispatched.
    fn take_frame(&mut self) -> Option<SseFrame> {
        let pending = std::mem::take(&mut self.pending);
        if pending.corrupt {
            warn!(
                event = pending.event.as_deref().unwrap_or("message"),
                "Skipping event with invalid UTF-8"
            );
            return None;
        }
        let data = pending.data?;
        Some(SseFrame {
            event: pending
                .event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
            id: pending.id,
            retry: pending.retry,
        })
    }
}

impl Decoder for SseCodec {
    type Item = SseFrame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Look for a newline to delimit the next line
            let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') else {
                // Not enough data for a full line
                return Ok(None);
            };

            let line = buf.split_to(newline_pos + 1);
            let mut raw = &line[..line.len() - 1];
            if let Some(stripped) = raw.strip_suffix(b"\r") {
                raw = stripped;
            }

            let Ok(line) = std::str::from_utf8(raw) else {
                // Only the block this line belongs to is lost
                self.pending.corrupt = true;
                continue;
            };

            if line.is_empty() {
                // Blank line ends the block
                if let Some(frame) = self.take_frame() {
                    return Ok(Some(frame));
                }
                continue;
            }

            self.apply_field(line);
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        // A trailing block without its blank line is incomplete; drop it
        if !buf.is_empty() || !self.pending.is_empty() {
            buf.clear();
            self.pending = PendingFrame::default();
        }
        Ok(None)
    }
}
