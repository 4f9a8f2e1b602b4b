use anyhow::Result;
use async_trait::async_trait;
use serenity::builder::{CreateAttachment, CreateMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId};
use std::sync::Arc;
use tmg::outbox::Outbox;
use tmg::tex::{self, TexConfig, RENDERED_FILE_NAME};
use tracing::warn;

/// Replies in the channel a message came from, referencing that message
pub struct DiscordOutbox {
    http: Arc<Http>,
    channel_id: ChannelId,
    reply_to: MessageId,
    tex: TexConfig,
}

impl DiscordOutbox {
    pub fn new(http: Arc<Http>, channel_id: ChannelId, reply_to: MessageId, tex: TexConfig) -> Self {
        Self {
            http,
            channel_id,
            reply_to,
            tex,
        }
    }

    fn reply(&self) -> CreateMessage {
        CreateMessage::new().reference_message((self.channel_id, self.reply_to))
    }

    pub async fn send_plain(&self, text: &str) -> Result<()> {
        self.channel_id
            .send_message(&*self.http, self.reply().content(text))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Outbox for DiscordOutbox {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.send_plain(text).await
    }

    async fn send_file(&self, name: &str, bytes: Vec<u8>) -> Result<Option<String>> {
        let message = self
            .channel_id
            .send_message(
                &*self.http,
                self.reply().add_file(CreateAttachment::bytes(bytes, name)),
            )
            .await?;
        Ok(Some(message.id.to_string()))
    }

    /// Replies that contain math also get a typeset image
    async fn finish_text(&self, text: &str) -> Result<()> {
        if !tex::contains_tex(text) {
            return Ok(());
        }
        match tex::render_tex(&self.tex, text).await {
            Ok(png) => {
                self.send_file(RENDERED_FILE_NAME, png).await?;
            }
            Err(err) => {
                warn!(error = %err, "could not typeset reply");
            }
        }
        Ok(())
    }
}
