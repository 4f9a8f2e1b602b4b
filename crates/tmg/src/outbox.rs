use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// Where a conversation's output goes: the originating channel in production
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Post a file attachment, returning the id of the posted message when there is one
    async fn send_file(&self, name: &str, bytes: Vec<u8>) -> Result<Option<String>>;

    /// Called once with the whole text of a reply after its chunks were sent
    async fn finish_text(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// An outbox that keeps everything in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct CollectingOutbox {
    texts: Mutex<Vec<String>>,
    files: Mutex<Vec<SentFile>>,
}

impl CollectingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn files(&self) -> Vec<SentFile> {
        self.files
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Outbox for CollectingOutbox {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.texts
            .lock()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
            .push(text.to_string());
        Ok(())
    }

    async fn send_file(&self, name: &str, bytes: Vec<u8>) -> Result<Option<String>> {
        let mut files = self
            .files
            .lock()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        files.push(SentFile {
            name: name.to_string(),
            bytes,
        });
        Ok(Some(format!("file-{}", files.len())))
    }
}
