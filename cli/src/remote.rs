use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::Config;
use morsel_core::models::{FoodEntry, NewEntry};
use morsel_core::session::AuthProvider;
use morsel_core::store::{EntryStore, SNAPSHOT_BUFFER, Subscription};

#[derive(Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Deserialize)]
struct UserResponse {
    user_id: String,
}

/// Drive a client future to completion from the synchronous store/auth seam.
///
/// Commands run on the multi-thread runtime, so `block_in_place` moves the
/// blocking section off the async worker before blocking on the handle.
fn wait<F: std::future::Future>(rt: &tokio::runtime::Handle, fut: F) -> F::Output {
    tokio::task::block_in_place(|| rt.block_on(fut))
}

fn request_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(format!("morsel-cli/{} (food log)", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(10))
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("Failed to build HTTP client")
}

/// Client for the long-lived snapshot stream: connect timeout only, no
/// overall request timeout.
fn stream_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(format!("morsel-cli/{} (food log)", env!("CARGO_PKG_VERSION")))
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("Failed to build HTTP client")
}

/// HTTP client for the morsel document-store backend.
pub struct RemoteStore {
    client: reqwest::Client,
    streamer: reqwest::Client,
    base_url: String,
    app_id: String,
    api_key: Option<String>,
    rt: tokio::runtime::Handle,
}

impl RemoteStore {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            client: request_client(),
            streamer: stream_client(),
            base_url: config.store.base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            api_key: config.store.api_key.clone(),
            rt: tokio::runtime::Handle::current(),
        }
    }

    fn collection_url(&self, user_id: &str) -> String {
        format!(
            "{}/api/artifacts/{}/users/{}/foodLog",
            self.base_url, self.app_id, user_id
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn create_async(
        &self,
        user_id: &str,
        entry: &NewEntry,
        created_at_ms: i64,
    ) -> Result<String> {
        let body = serde_json::json!({
            "name": entry.name,
            "calories": entry.calories,
            "protein": entry.protein,
            "fat": entry.fat,
            "carbs": entry.carbs,
            "fiber": entry.fiber,
            "created_at": created_at_ms,
        });
        let resp = self
            .authorize(self.client.post(self.collection_url(user_id)))
            .json(&body)
            .send()
            .await
            .context("Failed to reach the food log store")?
            .error_for_status()
            .context("Store rejected the create")?;

        let created: CreatedResponse = resp
            .json()
            .await
            .context("Failed to parse create response")?;
        Ok(created.id)
    }

    async fn delete_async(&self, user_id: &str, entry_id: &str) -> Result<bool> {
        let url = format!("{}/{}", self.collection_url(user_id), entry_id);
        let resp = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .context("Failed to reach the food log store")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        resp.error_for_status().context("Store rejected the delete")?;
        Ok(true)
    }
}

impl EntryStore for RemoteStore {
    fn create(&self, user_id: &str, entry: &NewEntry, created_at_ms: i64) -> Result<String> {
        wait(&self.rt, self.create_async(user_id, entry, created_at_ms))
    }

    fn delete(&self, user_id: &str, entry_id: &str) -> Result<bool> {
        wait(&self.rt, self.delete_async(user_id, entry_id))
    }

    fn subscribe(&self, user_id: &str) -> Result<Subscription> {
        let url = format!("{}/stream", self.collection_url(user_id));
        let request = self.authorize(self.streamer.get(url));
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let producer = tokio::spawn(async move {
            if let Err(e) = run_snapshot_feed(request, tx).await {
                tracing::warn!("food log subscription ended: {e:#}");
            }
        });
        Ok(Subscription::new(rx, producer))
    }
}

/// Read the server-sent-event feed, forwarding each complete snapshot. No
/// reconnection: when the stream drops, the feed ends and the mirror freezes.
async fn run_snapshot_feed(
    request: reqwest::RequestBuilder,
    tx: mpsc::Sender<Vec<FoodEntry>>,
) -> Result<()> {
    let mut resp = request
        .send()
        .await
        .context("Failed to open the snapshot stream")?
        .error_for_status()
        .context("Store rejected the subscription")?;

    let mut parser = EventParser::default();
    while let Some(chunk) = resp.chunk().await.context("Snapshot stream read failed")? {
        for payload in parser.push(&String::from_utf8_lossy(&chunk)) {
            match serde_json::from_str::<Vec<FoodEntry>>(&payload) {
                Ok(snapshot) => {
                    if tx.send(snapshot).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => tracing::warn!("ignoring malformed snapshot event: {e}"),
            }
        }
    }
    Ok(())
}

/// Incremental server-sent-events parser. Only `data:` fields matter here;
/// comments and other fields are skipped.
#[derive(Default)]
struct EventParser {
    buffer: String,
    data: String,
}

impl EventParser {
    /// Feed a chunk, returning the data payloads of any events completed by it.
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(payload) = line.strip_prefix("data:") {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(payload.strip_prefix(' ').unwrap_or(payload));
            } else if line.is_empty() && !self.data.is_empty() {
                events.push(std::mem::take(&mut self.data));
            }
        }
        events
    }
}

/// HTTP client for the backend's auth endpoints.
pub struct HttpAuth {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rt: tokio::runtime::Handle,
}

impl HttpAuth {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            client: request_client(),
            base_url: config.store.base_url.trim_end_matches('/').to_string(),
            api_key: config.store.api_key.clone(),
            rt: tokio::runtime::Handle::current(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_for_user(&self, path: &str, body: serde_json::Value) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .context("Failed to reach the auth endpoint")?
            .error_for_status()
            .context("Auth request rejected")?;

        let user: UserResponse = resp.json().await.context("Failed to parse auth response")?;
        Ok(user.user_id)
    }
}

impl AuthProvider for HttpAuth {
    fn exchange_token(&self, token: &str) -> Result<String> {
        wait(
            &self.rt,
            self.post_for_user("/api/auth/token", serde_json::json!({ "token": token })),
        )
    }

    fn sign_in_anonymously(&self) -> Result<String> {
        wait(
            &self.rt,
            self.post_for_user("/api/auth/anonymous", serde_json::json!({})),
        )
    }
}
