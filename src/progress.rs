use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::models::SavePositionRequest;
use crate::settings::SETTINGS;

/// Persistence collaborator for playback positions.
///
/// Implementations should do their work inside the returned future; the
/// tracker spawns it and never awaits the result.
pub trait ProgressStore: Send + Sync {
    fn save_position(&self, media_id: &str, seconds: u64)
        -> BoxFuture<'static, Result<(), SyncError>>;
}

/// Saves positions through the library server's REST API.
#[derive(Clone)]
pub struct HttpProgressStore {
    client: Arc<Client>,
    base_url: String,
}

impl HttpProgressStore {
    pub fn new(base_url: &str, custom_client: Option<Arc<Client>>) -> Result<Self, SyncError> {
        let client = match custom_client {
            Some(client) => client,
            None => Arc::new(
                Client::builder()
                    .timeout(SETTINGS.request_timeout)
                    .connect_timeout(SETTINGS.request_timeout)
                    .pool_idle_timeout(Some(Duration::from_secs(90)))
                    .build()?,
            ),
        };
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn progress_url(&self, media_id: &str) -> String {
        format!("{}/api/videos/{}/progress", self.base_url, media_id)
    }
}

impl ProgressStore for HttpProgressStore {
    fn save_position(
        &self,
        media_id: &str,
        seconds: u64,
    ) -> BoxFuture<'static, Result<(), SyncError>> {
        let client = self.client.clone();
        let url = self.progress_url(media_id);
        async move {
            let response = client
                .post(&url)
                .json(&SavePositionRequest { position: seconds })
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                warn!(%status, %url, "Saving playback position failed");
                return Err(SyncError::InvalidResponse(format!(
                    "Saving position failed with status {}",
                    status
                )));
            }
            debug!(%url, seconds, "Playback position saved");
            Ok(())
        }
        .boxed()
    }
}
