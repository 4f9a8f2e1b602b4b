//! Rendering of replies that contain TeX into a PNG posted after the text.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::{run_command, RenderError};

lazy_static! {
    static ref TEX_MESSAGE: Regex =
        Regex::new(r"(\$.*?\$)|(\$\$.*?\$\$)|\\\(.*?\\\)|\\\[.*?\\\]").unwrap();
    static ref MENTIONS: Regex = Regex::new(r"<@!?\d+>").unwrap();
    static ref DOUBLE_QUOTES: Regex = Regex::new(r#""(.*?)""#).unwrap();
    static ref SINGLE_QUOTES: Regex = Regex::new(r"'(.*?)'").unwrap();
    static ref EMOJI: Regex = Regex::new(
        r"[\p{Extended_Pictographic}\x{1F1E6}-\x{1F1FF}\x{1F3FB}-\x{1F3FF}\x{FE0F}\x{200D}\x{20E3}]"
    )
    .unwrap();
    static ref UNSAFE_COMMANDS: Regex = Regex::new(
        r"\\(write18|immediate|openout|openin|input|include|directlua|catcode|special)\b"
    )
    .unwrap();
    static ref LEFT: Regex = Regex::new(r"\\left\b").unwrap();
    static ref RIGHT: Regex = Regex::new(r"\\right\b").unwrap();
}

pub const MENTION_PLACEHOLDER: &str = "Usuario de Discord";
pub const RENDERED_FILE_NAME: &str = "texput.png";

const MARKDOWN_MARKER: &str = "%MARKDOWN%";

const TEMPLATE: &str = r"\documentclass[preview]{standalone}
\usepackage[spanish]{babel}
\usepackage{amsmath}
\usepackage{amssymb}
\usepackage{xcolor}
\usepackage{mlmodern}
\usepackage{hyperref}
\usepackage[smartEllipses,hashEnumerators,fencedCode]{markdown}
\markdownSetup{renderers={
  link = {\href{#2}{#1}}
}}
\begin{document}
\color{white}
\begin{markdown}[texMathDollars,texMathSingleBackslash,texMathDoubleBackslash]
%MARKDOWN%
\end{markdown}
\end{document}";

/// External programs used to render TeX
#[derive(Debug, Clone)]
pub struct TexConfig {
    pub latex_command: String,
    pub dvipng_command: String,
    /// ceiling for each program run
    pub timeout: Duration,
}

impl Default for TexConfig {
    fn default() -> Self {
        Self {
            latex_command: "latex".to_string(),
            dvipng_command: "dvipng".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

pub fn contains_tex(text: &str) -> bool {
    TEX_MESSAGE.is_match(text)
}

fn to_dollars(tex: &str) -> String {
    if let Some(inner) = tex.strip_prefix(r"\(").and_then(|t| t.strip_suffix(r"\)")) {
        format!("${}$", inner)
    } else if let Some(inner) = tex.strip_prefix(r"\[").and_then(|t| t.strip_suffix(r"\]")) {
        format!("$${}$$", inner)
    } else {
        tex.to_string()
    }
}

/// Prepare a chat reply for the markdown template: mentions and emoji removed,
/// typographic quotes, every formula delimited by dollars
pub fn clean_tex(text: &str) -> String {
    let text = EMOJI.replace_all(text, "");
    let text = MENTIONS.replace_all(&text, MENTION_PLACEHOLDER);
    let text = UNSAFE_COMMANDS.replace_all(&text, "");
    let text = DOUBLE_QUOTES.replace_all(&text, "“$1”");
    let text = SINGLE_QUOTES.replace_all(&text, "‘$1’");
    TEX_MESSAGE
        .replace_all(&text, |caps: &Captures| to_dollars(&caps[0]))
        .into_owned()
}

pub fn document(text: &str) -> String {
    TEMPLATE.replace(MARKDOWN_MARKER, &clean_tex(text))
}

/// Check that braces, `\left`/`\right` pairs and environments are balanced
pub fn check_balanced(latex: &str) -> Result<(), RenderError> {
    let mut depth: i64 = 0;
    let mut escaped = false;
    for c in latex.chars() {
        match c {
            '\\' => {
                escaped = !escaped;
                continue;
            }
            '{' if !escaped => depth += 1,
            '}' if !escaped => {
                depth -= 1;
                if depth < 0 {
                    return Err(RenderError::Invalid("unexpected '}'".to_string()));
                }
            }
            _ => {}
        }
        escaped = false;
    }
    if depth != 0 {
        return Err(RenderError::Invalid("unbalanced braces".to_string()));
    }

    let lefts = LEFT.find_iter(latex).count();
    let rights = RIGHT.find_iter(latex).count();
    if lefts != rights {
        return Err(RenderError::Invalid(format!(
            "{} \\left but {} \\right",
            lefts, rights
        )));
    }

    lazy_static! {
        static ref ENVIRONMENT: Regex = Regex::new(r"\\(begin|end)\{([^}]*)\}").unwrap();
    }
    let mut open: Vec<&str> = Vec::new();
    for caps in ENVIRONMENT.captures_iter(latex) {
        let name = caps.get(2).map_or("", |m| m.as_str());
        if &caps[1] == "begin" {
            open.push(name);
        } else if open.pop() != Some(name) {
            return Err(RenderError::Invalid(format!(
                "\\end{{{}}} does not close the open environment",
                name
            )));
        }
    }
    if let Some(name) = open.pop() {
        return Err(RenderError::Invalid(format!("\\begin{{{}}} is never closed", name)));
    }
    Ok(())
}

/// Compile a single math formula to see whether LaTeX accepts it
pub async fn check_math(latex_command: &str, formula: &str) -> Result<(), RenderError> {
    check_balanced(formula)?;
    let dir = tempfile::tempdir()?;
    let source = format!(
        "\\documentclass{{standalone}}\n\\usepackage{{amsmath}}\n\\usepackage{{amssymb}}\n\\begin{{document}}\n$\\displaystyle {}$\n\\end{{document}}\n",
        formula
    );
    tokio::fs::write(dir.path().join("check.tex"), source).await?;
    run_command(
        Command::new(latex_command)
            .current_dir(dir.path())
            .args(["-interaction=nonstopmode", "-halt-on-error", "check.tex"]),
        Duration::from_secs(20),
    )
    .await?;
    Ok(())
}

/// Compile a reply into a transparent PNG
pub async fn render_tex(config: &TexConfig, text: &str) -> Result<Vec<u8>, RenderError> {
    let dir = tempfile::tempdir()?;
    tokio::fs::write(dir.path().join("texput.tex"), document(text)).await?;

    // twice, so references and the markdown cache settle
    for pass in 1..=2 {
        debug!(pass, "running latex");
        run_command(
            Command::new(&config.latex_command).current_dir(dir.path()).args([
                "-interaction=nonstopmode",
                "-shell-escape",
                "texput.tex",
            ]),
            config.timeout,
        )
        .await?;
    }

    run_command(
        Command::new(&config.dvipng_command).current_dir(dir.path()).args([
            "-T",
            "tight",
            "-o",
            RENDERED_FILE_NAME,
            "-bg",
            "Transparent",
            "-D",
            "500",
            "texput.dvi",
        ]),
        config.timeout,
    )
    .await?;

    let png = tokio::fs::read(dir.path().join(RENDERED_FILE_NAME))
        .await
        .map_err(|_| RenderError::NoOutput)?;
    info!(bytes = png.len(), "rendered tex reply");
    Ok(png)
}
