//! Where rendered media and the votes they receive are kept.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tmg::systems::render::{RenderRecord, RenderSink};
use tracing::debug;

use crate::configuration::FeedbackSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    /// Reactions that count as votes
    pub fn from_emoji(emoji: &str) -> Option<Vote> {
        match emoji {
            "👍" | "⬆️" => Some(Vote::Up),
            "👎" | "⬇️" => Some(Vote::Down),
            _ => None,
        }
    }
}

#[async_trait]
pub trait FeedbackStore: RenderSink {
    /// Add `delta` (+1 or -1) to a render's tally; unknown messages are ignored
    async fn adjust_votes(&self, message_id: &str, vote: Vote, delta: i64) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl Tally {
    fn apply(&mut self, vote: Vote, delta: i64) {
        let count = match vote {
            Vote::Up => &mut self.upvotes,
            Vote::Down => &mut self.downvotes,
        };
        *count = (*count + delta).max(0);
    }
}

/// Keeps everything in process; used when no feedback endpoint is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (RenderRecord, Tally)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self, message_id: &str) -> Option<Tally> {
        self.entries
            .lock()
            .ok()?
            .get(message_id)
            .map(|(_, tally)| tally.clone())
    }
}

#[async_trait]
impl RenderSink for MemoryStore {
    async fn record_render(&self, record: RenderRecord) -> Result<()> {
        self.entries
            .lock()
            .map_err(|e| anyhow!(e.to_string()))?
            .insert(record.message_id.clone(), (record, Tally::default()));
        Ok(())
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn adjust_votes(&self, message_id: &str, vote: Vote, delta: i64) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|e| anyhow!(e.to_string()))?;
        if let Some((_, tally)) = entries.get_mut(message_id) {
            tally.apply(vote, delta);
        }
        Ok(())
    }
}

/// A PostgREST table such as Supabase's, one row per rendered message
pub struct SupabaseStore {
    client: Client,
    settings: FeedbackSettings,
}

impl SupabaseStore {
    pub fn new(settings: FeedbackSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, settings })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.settings.url.trim_end_matches('/'),
            self.settings.table
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.settings.api_key)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
    }

    async fn fetch_tally(&self, message_id: &str) -> Result<Option<Tally>> {
        let filter = format!("eq.{}", message_id);
        let response = self
            .authorized(self.client.get(self.table_url()))
            .query(&[
                ("message_id", filter.as_str()),
                ("select", "upvotes,downvotes"),
            ])
            .send()
            .await?
            .error_for_status()?;
        let rows: Vec<Tally> = response.json().await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl RenderSink for SupabaseStore {
    async fn record_render(&self, record: RenderRecord) -> Result<()> {
        let row = json!({
            "message_id": record.message_id,
            "title": record.title,
            "description": record.description,
            "script": record.script,
            "upvotes": 0,
            "downvotes": 0,
        });
        self.authorized(self.client.post(self.table_url()))
            .header("Prefer", "resolution=merge-duplicates")
            .json(&row)
            .send()
            .await?
            .error_for_status()?;
        debug!(message_id = %record.message_id, "render recorded");
        Ok(())
    }
}

#[async_trait]
impl FeedbackStore for SupabaseStore {
    async fn adjust_votes(&self, message_id: &str, vote: Vote, delta: i64) -> Result<()> {
        // PostgREST cannot increment in place: read, then write the new counts
        let Some(mut tally) = self.fetch_tally(message_id).await? else {
            return Ok(());
        };
        tally.apply(vote, delta);

        let filter = format!("eq.{}", message_id);
        self.authorized(self.client.patch(self.table_url()))
            .query(&[("message_id", filter.as_str())])
            .json(&tally)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
