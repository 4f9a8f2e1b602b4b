//! Turning Discord attachments into content blocks the backends understand.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serenity::model::channel::Attachment;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tmg::command::{run_command, RenderError};
use tmg::models::content::FileContent;
use tmg::models::message::MessageContent;
use tokio::process::Command;
use tracing::warn;

use crate::configuration::RenderSettings;
use crate::transcription::Transcriber;

/// Pages beyond this are dropped from PDFs
pub const MAX_PDF_PAGES: usize = 20;
/// Frames sampled evenly across a video
pub const MAX_VIDEO_FRAMES: usize = 10;

const CONVERT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Text,
    Pdf,
    Audio,
    Video,
    Other,
}

pub fn classify(content_type: Option<&str>) -> AttachmentKind {
    let Some(content_type) = content_type else {
        return AttachmentKind::Other;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if mime.starts_with("image/") {
        AttachmentKind::Image
    } else if mime.starts_with("text/") {
        AttachmentKind::Text
    } else if mime == "application/pdf" {
        AttachmentKind::Pdf
    } else if mime.starts_with("audio/") {
        AttachmentKind::Audio
    } else if mime.starts_with("video/") {
        AttachmentKind::Video
    } else {
        AttachmentKind::Other
    }
}

pub fn image_block(bytes: &[u8], mime_type: &str) -> MessageContent {
    MessageContent::image(STANDARD.encode(bytes), mime_type)
}

pub fn text_file_block(content_type: &str, text: &str) -> MessageContent {
    MessageContent::text(format!(
        "A text file has been sent with mime type {}.\n\n# Content\n{}",
        content_type, text
    ))
}

pub fn file_reference(url: &str, mime_type: &str, name: &str) -> MessageContent {
    MessageContent::File(FileContent {
        uri: url.to_string(),
        mime_type: mime_type.to_string(),
        name: name.to_string(),
    })
}

/// Frame rendered PDF pages with the text the model expects around them
pub fn pdf_page_blocks(pages: Vec<Vec<u8>>) -> Vec<MessageContent> {
    let mut blocks = Vec::with_capacity(pages.len() + 2);
    blocks.push(MessageContent::text(format!(
        "The following {} pages are from a PDF file.",
        pages.len()
    )));
    blocks.extend(pages.iter().map(|page| image_block(page, "image/png")));
    blocks.push(MessageContent::text("The PDF file has ended."));
    blocks
}

pub fn audio_block(transcription: &str) -> MessageContent {
    MessageContent::text(format!(
        "An audio has been sent.\n\n# Transcription\n{}",
        transcription
    ))
}

/// Sampled frames, then the transcription when the video had audio
pub fn video_blocks(frames: Vec<Vec<u8>>, transcription: Option<String>) -> Vec<MessageContent> {
    let mut blocks = Vec::with_capacity(frames.len() + 3);
    blocks.push(MessageContent::text(format!(
        "A video is starting right now. The next inputs are {} evenly spaced frames and the last one is the transcription, if any audio. There's no transcription if it's null, empty or senseless.",
        frames.len()
    )));
    blocks.extend(frames.iter().map(|frame| image_block(frame, "image/jpeg")));
    if let Some(text) = transcription {
        blocks.push(MessageContent::text(format!("# Transcription\n{}", text)));
    }
    blocks.push(MessageContent::text("The video has ended."));
    blocks
}

/// `ffprobe` prints the duration in seconds, or `N/A` for streams without one
pub fn parse_duration(output: &str) -> Option<f64> {
    output
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
}

/// Sampling rate that spreads `MAX_VIDEO_FRAMES` over the whole video
pub fn frame_rate(duration: Option<f64>) -> f64 {
    match duration {
        Some(seconds) => MAX_VIDEO_FRAMES as f64 / seconds,
        None => 1.0,
    }
}

async fn sorted_outputs(dir: &Path, extension: &str) -> Result<Vec<Vec<u8>>, RenderError> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension() == Some(OsStr::new(extension)) {
            paths.push(path);
        }
    }
    // page-01.png, frame-001.jpg, ... sort in order
    paths.sort();

    let mut outputs = Vec::with_capacity(paths.len());
    for path in paths {
        outputs.push(tokio::fs::read(path).await?);
    }
    if outputs.is_empty() {
        return Err(RenderError::NoOutput);
    }
    Ok(outputs)
}

/// Rasterize a PDF with `pdftoppm`, one PNG per page
pub async fn render_pdf_pages(pdftoppm: &str, pdf: &[u8]) -> Result<Vec<Vec<u8>>, RenderError> {
    let dir = tempfile::tempdir()?;
    tokio::fs::write(dir.path().join("input.pdf"), pdf).await?;
    let last_page = MAX_PDF_PAGES.to_string();
    run_command(
        Command::new(pdftoppm).current_dir(dir.path()).args([
            "-png",
            "-r",
            "100",
            "-l",
            last_page.as_str(),
            "input.pdf",
            "page",
        ]),
        CONVERT_TIMEOUT,
    )
    .await?;
    sorted_outputs(dir.path(), "png").await
}

/// Transcode any audio track in `input` to MP3 with `ffmpeg`
pub async fn extract_mp3(ffmpeg: &str, dir: &Path, input: &str) -> Result<Vec<u8>, RenderError> {
    run_command(
        Command::new(ffmpeg).current_dir(dir).args([
            "-y", "-i", input, "-vn", "-ar", "44100", "-ac", "2", "-b:a", "192k", "audio.mp3",
        ]),
        CONVERT_TIMEOUT,
    )
    .await?;
    Ok(tokio::fs::read(dir.join("audio.mp3")).await?)
}

async fn ffprobe_output(ffprobe: &str, dir: &Path, args: &[&str]) -> Result<String, RenderError> {
    let output = run_command(
        Command::new(ffprobe)
            .current_dir(dir)
            .args(["-v", "error"])
            .args(args),
        CONVERT_TIMEOUT,
    )
    .await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// External converters for media attachments, plus optional speech-to-text
pub struct MediaTools {
    pub pdftoppm: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

impl MediaTools {
    pub fn new(settings: &RenderSettings) -> Self {
        Self {
            pdftoppm: settings.pdftoppm_command.clone(),
            ffmpeg: settings.ffmpeg_command.clone(),
            ffprobe: settings.ffprobe_command.clone(),
            transcriber: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    async fn transcribe_audio(&self, transcriber: &dyn Transcriber, audio: &[u8]) -> anyhow::Result<String> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join("input"), audio).await?;
        let mp3 = extract_mp3(&self.ffmpeg, dir.path(), "input").await?;
        transcriber.transcribe(mp3).await
    }

    /// Evenly spaced JPEG frames of a video with `ffmpeg`
    pub async fn sample_frames(&self, dir: &Path, input: &str) -> Result<Vec<Vec<u8>>, RenderError> {
        let duration = ffprobe_output(
            &self.ffprobe,
            dir,
            &[
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                input,
            ],
        )
        .await?;
        let filter = format!("fps={:.6}", frame_rate(parse_duration(&duration)));
        let max_frames = MAX_VIDEO_FRAMES.to_string();
        run_command(
            Command::new(&self.ffmpeg).current_dir(dir).args([
                "-y",
                "-i",
                input,
                "-vf",
                filter.as_str(),
                "-frames:v",
                max_frames.as_str(),
                "-q:v",
                "3",
                "frame-%03d.jpg",
            ]),
            CONVERT_TIMEOUT,
        )
        .await?;
        sorted_outputs(dir, "jpg").await
    }

    async fn has_audio(&self, dir: &Path, input: &str) -> Result<bool, RenderError> {
        let streams = ffprobe_output(
            &self.ffprobe,
            dir,
            &["-select_streams", "a", "-show_entries", "stream=index", "-of", "csv=p=0", input],
        )
        .await?;
        Ok(!streams.trim().is_empty())
    }

    async fn video_content(&self, video: &[u8]) -> anyhow::Result<Vec<MessageContent>> {
        let dir = tempfile::tempdir()?;
        tokio::fs::write(dir.path().join("input.mp4"), video).await?;
        let frames = self.sample_frames(dir.path(), "input.mp4").await?;

        let mut transcription = None;
        if let Some(transcriber) = &self.transcriber {
            if self.has_audio(dir.path(), "input.mp4").await? {
                let transcribed = match extract_mp3(&self.ffmpeg, dir.path(), "input.mp4").await {
                    Ok(mp3) => transcriber.transcribe(mp3).await,
                    Err(err) => Err(err.into()),
                };
                match transcribed {
                    Ok(text) => transcription = Some(text),
                    Err(err) => warn!(error = %err, "could not transcribe video audio"),
                }
            }
        }
        Ok(video_blocks(frames, transcription))
    }

    async fn attachment_content(&self, attachment: &Attachment) -> anyhow::Result<Vec<MessageContent>> {
        let content_type = attachment.content_type.as_deref();
        let mime = content_type.unwrap_or("application/octet-stream");
        Ok(match classify(content_type) {
            AttachmentKind::Image => vec![image_block(&attachment.download().await?, mime)],
            AttachmentKind::Text => {
                let bytes = attachment.download().await?;
                vec![text_file_block(mime, &String::from_utf8_lossy(&bytes))]
            }
            AttachmentKind::Pdf => {
                let pages = render_pdf_pages(&self.pdftoppm, &attachment.download().await?).await?;
                pdf_page_blocks(pages)
            }
            AttachmentKind::Audio => match &self.transcriber {
                Some(transcriber) => {
                    let audio = attachment.download().await?;
                    let text = self.transcribe_audio(transcriber.as_ref(), &audio).await?;
                    vec![audio_block(&text)]
                }
                None => vec![file_reference(&attachment.url, mime, &attachment.filename)],
            },
            AttachmentKind::Video => self.video_content(&attachment.download().await?).await?,
            AttachmentKind::Other => vec![file_reference(&attachment.url, mime, &attachment.filename)],
        })
    }

    /// Convert every attachment; failures fall back to a reference by URL
    pub async fn attachment_blocks(&self, attachments: &[Attachment]) -> Vec<MessageContent> {
        let mut blocks = Vec::new();
        for attachment in attachments {
            match self.attachment_content(attachment).await {
                Ok(content) => blocks.extend(content),
                Err(err) => {
                    warn!(file = %attachment.filename, error = %err, "could not read attachment");
                    blocks.push(file_reference(
                        &attachment.url,
                        attachment
                            .content_type
                            .as_deref()
                            .unwrap_or("application/octet-stream"),
                        &attachment.filename,
                    ));
                }
            }
        }
        blocks
    }
}
