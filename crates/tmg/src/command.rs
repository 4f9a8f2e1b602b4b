use std::io::ErrorKind;
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Failures of the external renderers (latex, dvipng, manim)
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{0} is not installed")]
    ToolMissing(String),

    #[error("{program} failed: {detail}")]
    Failed { program: String, detail: String },

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("no output was produced")]
    NoOutput,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const MAX_DETAIL_CHARS: usize = 1500;

/// Keep the end of a tool's output, where the actual error usually is
pub fn output_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let count = text.chars().count();
    if count <= MAX_DETAIL_CHARS {
        text.trim().to_string()
    } else {
        let tail: String = text.chars().skip(count - MAX_DETAIL_CHARS).collect();
        format!("...{}", tail.trim())
    }
}

/// Run a command to completion under a wall-clock ceiling.
///
/// The child is killed when the ceiling is hit. A non-zero exit is a
/// `RenderError::Failed` carrying the tail of stderr (or stdout when
/// stderr is empty).
pub async fn run_command(command: &mut Command, timeout: Duration) -> Result<Output, RenderError> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();
    debug!(program = %program, "spawning");

    let child = command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => RenderError::ToolMissing(program.clone()),
            _ => RenderError::Io(e),
        })?;

    // dropping the wait future on timeout drops the child, which kills it
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| RenderError::Timeout(timeout))??;

    if !output.status.success() {
        let detail = if output.stderr.iter().all(u8::is_ascii_whitespace) {
            output_tail(&output.stdout)
        } else {
            output_tail(&output.stderr)
        };
        return Err(RenderError::Failed { program, detail });
    }
    Ok(output)
}
