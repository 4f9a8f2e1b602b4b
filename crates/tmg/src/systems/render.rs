use async_trait::async_trait;
use serde_json::json;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use super::calculator::FUNCTIONS;
use super::scene::{SceneBuilderSystem, SceneDraft, SceneScript};
use super::{System, ToolContext};
use crate::agent::Agent;
use crate::command::{run_command, RenderError};
use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::ConversationState;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::outbox::CollectingOutbox;
use crate::prompt_template::{load_prompt_file, SCENE_BUILDER_PROMPT};
use crate::providers::base::Provider;

const RUNNER_SCRIPT: &str = include_str!("../../assets/scene_runner.py");
const SCENE_CLASS: &str = "GeneratedScene";

pub const VIDEO_RENDERED: &str =
    "The video was rendered successfully. The user must watch it in the sent message.";
pub const IMAGE_RENDERED: &str =
    "The image was rendered successfully. The user must watch it in the sent message.";

/// How scenes are built and rendered
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// program that runs the Manim CLI
    pub command: String,
    /// arguments placed before `render ...`
    pub args: Vec<String>,
    /// Manim quality flag: l, m, h, p or k
    pub quality: String,
    /// ceiling on the renderer subprocess
    pub timeout: Duration,
    /// ceiling on the scene builder conversation
    pub builder_timeout: Duration,
    pub builder_max_rounds: usize,
    pub latex_command: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "manim".to_string()],
            quality: "h".to_string(),
            timeout: Duration::from_secs(120),
            builder_timeout: Duration::from_secs(300),
            builder_max_rounds: 60,
            latex_command: "latex".to_string(),
        }
    }
}

/// A posted render, kept so reactions on it can be tallied later
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRecord {
    pub message_id: String,
    pub title: String,
    pub description: String,
    /// the scene script as JSON
    pub script: String,
}

#[async_trait]
pub trait RenderSink: Send + Sync {
    async fn record_render(&self, record: RenderRecord) -> anyhow::Result<()>;
}

#[derive(Debug)]
struct RenderedMedia {
    bytes: Vec<u8>,
    is_video: bool,
}

/// The `render_manim` tool.
///
/// A nested agent builds a [`SceneScript`] with the scene operations, then a
/// fixed runner replays it with Manim in a subprocess.
pub struct RenderSystem {
    tools: Vec<Tool>,
    provider: Arc<dyn Provider>,
    config: RenderConfig,
    builder_prompt: String,
    sink: Option<Arc<dyn RenderSink>>,
}

impl RenderSystem {
    pub fn new(provider: Arc<dyn Provider>, config: RenderConfig) -> AgentResult<Self> {
        let builder_prompt = load_prompt_file(
            SCENE_BUILDER_PROMPT,
            &json!({
                "functions": FUNCTIONS.join(", "),
                "animations": SceneBuilderSystem::animation_names().join(", "),
            }),
        )
        .map_err(|e| AgentError::Internal(e.to_string()))?;

        let render_manim = Tool::new(
            "render_manim",
            "Render a mathematical animation or image with Manim and send it to the user.",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "Short title of the scene"},
                    "description": {"type": "string", "description": "What the scene must show"},
                    "steps": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Optional ordered steps of the animation"
                    },
                    "considerations": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Optional constraints, e.g. colors or what to avoid"
                    },
                    "is_3d": {"type": "boolean", "description": "Whether the scene is three dimensional"}
                },
                "required": ["title", "description", "is_3d"],
                "additionalProperties": false
            }),
        );

        Ok(Self {
            tools: vec![render_manim],
            provider,
            config,
            builder_prompt,
            sink: None,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn RenderSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn build_scene(&self, call: &ToolCall, title: &str, is_3d: bool) -> AgentResult<SceneScript> {
        let draft = Arc::new(Mutex::new(SceneDraft {
            script: SceneScript::new(title, is_3d),
            finished: false,
        }));
        let mut builder = Agent::new(Box::new(self.provider.clone()), self.builder_prompt.clone())
            .with_max_rounds(self.config.builder_max_rounds);
        builder.add_system(Box::new(SceneBuilderSystem::new(
            draft.clone(),
            self.config.latex_command.clone(),
        )));

        let request = json!({
            "title": title,
            "description": call.str_arg("description")?,
            "steps": call.arguments.get("steps"),
            "considerations": call.arguments.get("considerations"),
            "is_3d": is_3d,
        });
        let mut state = ConversationState::new();
        let scratch = CollectingOutbox::new();
        let turn = builder.run_turn(
            &mut state,
            Message::user().with_text(request.to_string()),
            &scratch,
        );
        match tokio::time::timeout(self.config.builder_timeout, turn).await {
            Err(_) => {
                return Err(AgentError::RenderTimeout(format!(
                    "building the scene took longer than {}s, the work is discarded",
                    self.config.builder_timeout.as_secs()
                )))
            }
            Ok(Err(e)) => {
                return Err(AgentError::ExecutionError(format!(
                    "the scene builder failed: {}",
                    e
                )))
            }
            Ok(Ok(())) => {}
        }

        let draft = std::mem::take(
            &mut *draft
                .lock()
                .map_err(|e| AgentError::Internal(e.to_string()))?,
        );
        if draft.script.ops.is_empty() {
            return Err(AgentError::ExecutionError(
                "the scene builder produced an empty scene".to_string(),
            ));
        }
        if !draft.finished {
            warn!(title, "scene builder stopped without finishing, rendering what it built");
        }
        info!(title, ops = draft.script.ops.len(), "scene built");
        Ok(draft.script)
    }

    async fn render_script(&self, script: &SceneScript) -> Result<RenderedMedia, RenderError> {
        let dir = tempfile::tempdir()?;
        let scene_file = dir.path().join("scene.json");
        let runner = dir.path().join("scene_runner.py");
        let media_dir = dir.path().join("media");
        let json = serde_json::to_string(script)
            .map_err(|e| RenderError::Invalid(e.to_string()))?;
        tokio::fs::write(&scene_file, json).await?;
        tokio::fs::write(&runner, RUNNER_SCRIPT).await?;

        let is_video = script.is_animated();
        let mut command = Command::new(&self.config.command);
        command
            .current_dir(dir.path())
            .env("TMG_SCENE_FILE", &scene_file)
            .args(&self.config.args)
            .args(["render", "-q", self.config.quality.as_str(), "--media_dir"])
            .arg(&media_dir);
        if !is_video {
            command.arg("-s");
        }
        command.arg(&runner).arg(SCENE_CLASS);

        run_command(&mut command, self.config.timeout).await?;

        let extension = if is_video { "mp4" } else { "png" };
        let path = find_output(&media_dir, extension)
            .await?
            .ok_or(RenderError::NoOutput)?;
        let bytes = tokio::fs::read(&path).await?;
        Ok(RenderedMedia { bytes, is_video })
    }

    async fn render_manim(&self, call: &ToolCall, ctx: &ToolContext<'_>) -> AgentResult<String> {
        let title = call.str_arg("title")?;
        let description = call.str_arg("description")?;
        let is_3d = call
            .arguments
            .get("is_3d")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let script = self.build_scene(call, title, is_3d).await?;
        let media = self.render_script(&script).await.map_err(|e| match e {
            RenderError::Timeout(limit) => AgentError::RenderTimeout(format!(
                "rendering took longer than {}s, the work is discarded",
                limit.as_secs()
            )),
            RenderError::ToolMissing(program) => {
                AgentError::ExecutionError(format!("the renderer is not available: {}", program))
            }
            other => AgentError::ExecutionError(format!("rendering failed: {}", other)),
        })?;

        let extension = if media.is_video { "mp4" } else { "png" };
        let file_name = format!("{}.{}", file_stem(title), extension);
        let message_id = ctx
            .outbox
            .send_file(&file_name, media.bytes)
            .await
            .map_err(|e| AgentError::ExecutionError(format!("could not post the render: {}", e)))?;

        if let (Some(sink), Some(message_id)) = (&self.sink, message_id) {
            let record = RenderRecord {
                message_id,
                title: title.to_string(),
                description: description.to_string(),
                script: serde_json::to_string(&script).unwrap_or_default(),
            };
            if let Err(err) = sink.record_render(record).await {
                warn!(error = %err, "failed to record render");
            }
        }

        Ok(if media.is_video {
            VIDEO_RENDERED
        } else {
            IMAGE_RENDERED
        }
        .to_string())
    }
}

/// File name for an attachment, from a free-form title
fn file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .take(64)
        .collect::<String>()
        .trim()
        .replace(' ', "_");
    if stem.is_empty() {
        "scene".to_string()
    } else {
        stem
    }
}

/// First file with `extension`, looking at a directory's files before its subdirectories
async fn find_output(dir: &Path, extension: &str) -> std::io::Result<Option<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                subdirs.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
        files.sort();
        if let Some(path) = files
            .into_iter()
            .find(|path| path.extension() == Some(OsStr::new(extension)))
        {
            return Ok(Some(path));
        }
        // reversed so the stack pops them in sorted order
        subdirs.sort();
        pending.extend(subdirs.into_iter().rev());
    }
    Ok(None)
}

#[async_trait]
impl System for RenderSystem {
    fn name(&self) -> &str {
        "RenderSystem"
    }

    fn description(&self) -> &str {
        "Renders mathematical animations"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, ctx: &ToolContext<'_>) -> AgentResult<String> {
        match tool_call.name.as_str() {
            "render_manim" => self.render_manim(&tool_call, ctx).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    // stands in for `python3 -m manim`: $5 is the media dir, $6 is -s for stills
    const FAKE_MANIM: &str = r#"
        test -f "$TMG_SCENE_FILE" || exit 9
        if [ "$6" = "-s" ]; then
            mkdir -p "$5/images" && cp "$TMG_SCENE_FILE" "$5/images/GeneratedScene.png"
        else
            mkdir -p "$5/videos/scene_runner/1080p60" && printf video > "$5/videos/scene_runner/1080p60/GeneratedScene.mp4"
        fi
    "#;

    struct RecordingSink(Mutex<Vec<RenderRecord>>);

    #[async_trait]
    impl RenderSink for RecordingSink {
        async fn record_render(&self, record: RenderRecord) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn fake_config(script: &str) -> RenderConfig {
        RenderConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "manim".to_string()],
            latex_command: "tmg-missing-latex".to_string(),
            ..RenderConfig::default()
        }
    }

    fn builder_replies(animated: bool) -> Vec<Message> {
        let mut replies = vec![Message::assistant().with_tool_request(
            "s1",
            Ok(ToolCall::new(
                "add_shape",
                json!({"id": "c", "shape": "circle", "color": "BLUE"}),
            )),
        )];
        if animated {
            replies.push(Message::assistant().with_tool_request(
                "s2",
                Ok(ToolCall::new(
                    "animate",
                    json!({"animation": "create", "targets": ["c"]}),
                )),
            ));
        }
        replies.push(
            Message::assistant().with_tool_request("s3", Ok(ToolCall::new("finish", json!({})))),
        );
        replies.push(Message::assistant().with_text("Listo."));
        replies
    }

    fn render_call(title: &str) -> ToolCall {
        ToolCall::new(
            "render_manim",
            json!({"title": title, "description": "Un círculo azul", "is_3d": false}),
        )
    }

    #[tokio::test]
    async fn test_render_video_posts_file_and_records() {
        let mock = Arc::new(MockProvider::new(builder_replies(true)));
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let system = RenderSystem::new(mock.clone(), fake_config(FAKE_MANIM))
            .unwrap()
            .with_sink(sink.clone());
        let outbox = CollectingOutbox::new();

        let result = system
            .call(render_call("Círculo azul"), &ToolContext::new(&outbox))
            .await;

        assert_eq!(result, Ok(VIDEO_RENDERED.to_string()));
        let files = outbox.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "Círculo_azul.mp4");
        assert_eq!(files[0].bytes, b"video");
        // the builder's own text never reaches the channel
        assert!(outbox.texts().is_empty());

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_id, "file-1");
        assert_eq!(records[0].title, "Círculo azul");
        assert!(records[0].script.contains("\"op\":\"animate\""));

        let requests = mock.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[0].tool_names.contains(&"plot_function".to_string()));
        assert!(requests[0].system.contains("fade_in"));
    }

    #[tokio::test]
    async fn test_still_scene_renders_png() {
        let mock = Arc::new(MockProvider::new(builder_replies(false)));
        let system = RenderSystem::new(mock, fake_config(FAKE_MANIM)).unwrap();
        let outbox = CollectingOutbox::new();

        let result = system
            .call(render_call("círculo"), &ToolContext::new(&outbox))
            .await;

        assert_eq!(result, Ok(IMAGE_RENDERED.to_string()));
        let files = outbox.files();
        assert_eq!(files[0].name, "círculo.png");
        // the fake renderer echoes the script it was given
        let script: SceneScript = serde_json::from_slice(&files[0].bytes).unwrap();
        assert_eq!(script.title, "círculo");
        assert_eq!(script.ops.len(), 1);
    }

    #[tokio::test]
    async fn test_render_timeout_discards_work() {
        let mock = Arc::new(MockProvider::new(builder_replies(true)));
        let config = RenderConfig {
            timeout: Duration::from_millis(200),
            ..fake_config("sleep 5")
        };
        let system = RenderSystem::new(mock, config).unwrap();
        let outbox = CollectingOutbox::new();

        let result = system
            .call(render_call("lento"), &ToolContext::new(&outbox))
            .await;

        match result {
            Err(AgentError::RenderTimeout(message)) => {
                assert!(message.contains("the work is discarded"))
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(outbox.files().is_empty());
    }

    #[tokio::test]
    async fn test_renderer_failure_is_reported() {
        let mock = Arc::new(MockProvider::new(builder_replies(true)));
        let system =
            RenderSystem::new(mock, fake_config("echo 'LaTeX Error' >&2; exit 1")).unwrap();
        let outbox = CollectingOutbox::new();

        let result = system
            .call(render_call("roto"), &ToolContext::new(&outbox))
            .await;

        assert!(matches!(result, Err(AgentError::ExecutionError(m)) if m.contains("LaTeX Error")));
    }

    #[tokio::test]
    async fn test_empty_scene_is_an_error() {
        let mock = Arc::new(MockProvider::new(vec![
            Message::assistant().with_text("No sé cómo dibujar eso.")
        ]));
        let system = RenderSystem::new(mock, fake_config(FAKE_MANIM)).unwrap();
        let outbox = CollectingOutbox::new();

        let result = system
            .call(render_call("nada"), &ToolContext::new(&outbox))
            .await;

        assert_eq!(
            result,
            Err(AgentError::ExecutionError(
                "the scene builder produced an empty scene".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_find_output_walks_nested_media_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let videos = dir.path().join("videos/runner/1080p60");
        std::fs::create_dir_all(&videos).unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(videos.join("partial_movie.txt"), b"").unwrap();
        std::fs::write(videos.join("GeneratedScene.mp4"), b"mp4").unwrap();
        std::fs::write(dir.path().join("images/GeneratedScene.png"), b"png").unwrap();

        assert_eq!(
            find_output(dir.path(), "mp4").await.unwrap(),
            Some(videos.join("GeneratedScene.mp4"))
        );
        assert_eq!(
            find_output(dir.path(), "png").await.unwrap(),
            Some(dir.path().join("images/GeneratedScene.png"))
        );
        assert_eq!(find_output(dir.path(), "gif").await.unwrap(), None);
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Teorema de Pitágoras"), "Teorema_de_Pitágoras");
        assert_eq!(file_stem("a/b\\c:d"), "abcd");
        assert_eq!(file_stem("???"), "scene");
    }
}
