//! Declarative scene building.
//!
//! The scene builder model never writes code: it calls a fixed set of
//! operations that append validated steps to a [`SceneScript`], which the
//! Manim runner replays.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::calculator::{parse_function, Expr};
use super::{System, ToolContext};
use crate::command::RenderError;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::tex;

lazy_static! {
    static ref HEX_COLOR: Regex = Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap();
    static ref OBJECT_ID: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]{0,31}$").unwrap();
}

pub const NAMED_COLORS: &[&str] = &[
    "WHITE", "BLACK", "GRAY", "RED", "ORANGE", "YELLOW", "GREEN", "TEAL", "BLUE", "PURPLE",
    "PINK", "MAROON", "GOLD",
];

const PLOT_SAMPLES: usize = 400;
const MAX_OPS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShapeKind {
    Circle,
    Square,
    Rectangle,
    Line,
    Arrow,
    Dot,
    Axes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnimationKind {
    Create,
    Write,
    FadeIn,
    FadeOut,
    GrowFromCenter,
    Indicate,
    Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Where an object goes: absolute coordinates, or beside another object
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Placement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SceneOp {
    AddText {
        id: String,
        text: String,
        font_size: f64,
        color: String,
        placement: Placement,
    },
    AddMath {
        id: String,
        latex: String,
        font_size: f64,
        color: String,
        placement: Placement,
    },
    AddShape {
        id: String,
        shape: ShapeKind,
        color: String,
        /// width, height or radius depending on the shape
        size: [f64; 2],
        #[serde(skip_serializing_if = "Option::is_none")]
        x_range: Option<[f64; 3]>,
        #[serde(skip_serializing_if = "Option::is_none")]
        y_range: Option<[f64; 3]>,
        placement: Placement,
    },
    PlotFunction {
        id: String,
        axes: String,
        expression: String,
        color: String,
        /// sampled points in axes coordinates, split where the function is undefined
        segments: Vec<Vec<[f64; 2]>>,
    },
    Animate {
        animation: AnimationKind,
        targets: Vec<String>,
        run_time: f64,
    },
    Wait {
        seconds: f64,
    },
}

/// Everything the runner needs to draw one scene
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneScript {
    pub title: String,
    pub is_3d: bool,
    pub ops: Vec<SceneOp>,
}

impl SceneScript {
    pub fn new<S: Into<String>>(title: S, is_3d: bool) -> Self {
        Self {
            title: title.into(),
            is_3d,
            ops: Vec::new(),
        }
    }

    /// A scene with any animation or pause renders to video, otherwise to a still image
    pub fn is_animated(&self) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, SceneOp::Animate { .. } | SceneOp::Wait { .. }))
    }

    fn ids(&self) -> HashSet<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                SceneOp::AddText { id, .. }
                | SceneOp::AddMath { id, .. }
                | SceneOp::AddShape { id, .. }
                | SceneOp::PlotFunction { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    fn axes_ranges(&self, axes_id: &str) -> Option<([f64; 3], [f64; 3])> {
        self.ops.iter().find_map(|op| match op {
            SceneOp::AddShape {
                id,
                shape: ShapeKind::Axes,
                x_range: Some(x),
                y_range: Some(y),
                ..
            } if id == axes_id => Some((*x, *y)),
            _ => None,
        })
    }
}

/// Sample `expr` over `[x_min, x_max]`, starting a new segment wherever the
/// function is undefined or leaves the visible `y` range
pub fn sample_function(expr: &Expr, x_min: f64, x_max: f64, y_range: [f64; 2]) -> Vec<Vec<[f64; 2]>> {
    let mut segments: Vec<Vec<[f64; 2]>> = Vec::new();
    let mut current: Vec<[f64; 2]> = Vec::new();

    for i in 0..=PLOT_SAMPLES {
        let x = x_min + (x_max - x_min) * i as f64 / PLOT_SAMPLES as f64;
        match expr.eval_at(x) {
            Ok(y) if y >= y_range[0] && y <= y_range[1] => current.push([x, y]),
            _ => {
                if current.len() > 1 {
                    segments.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
    }
    if current.len() > 1 {
        segments.push(current);
    }
    segments
}

#[derive(Debug, Default)]
pub struct SceneDraft {
    pub script: SceneScript,
    pub finished: bool,
}

/// Scene operations offered to the builder model for one render
pub struct SceneBuilderSystem {
    tools: Vec<Tool>,
    draft: Arc<Mutex<SceneDraft>>,
    latex_command: String,
}

fn lock(draft: &Mutex<SceneDraft>) -> MutexGuard<'_, SceneDraft> {
    draft.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn names<T: IntoEnumIterator + std::fmt::Display>() -> Vec<String> {
    T::iter().map(|v| v.to_string()).collect()
}

fn placement_schema() -> Value {
    json!({
        "type": "object",
        "description": "Where to put the object. Omit to center it.",
        "properties": {
            "at": {"type": "array", "items": {"type": "number"}, "description": "[x, y] in scene units; the visible frame spans about x in [-7, 7] and y in [-4, 4]"},
            "next_to": {"type": "string", "description": "Id of an existing object to place this one beside"},
            "direction": {"type": "string", "enum": names::<Direction>()}
        },
        "additionalProperties": false
    })
}

fn color_schema() -> Value {
    json!({
        "type": "string",
        "description": format!("One of {} or a hex color like #FF8800. Defaults to WHITE.", NAMED_COLORS.join(", "))
    })
}

impl SceneBuilderSystem {
    pub fn new(draft: Arc<Mutex<SceneDraft>>, latex_command: impl Into<String>) -> Self {
        let id_schema = json!({"type": "string", "description": "A new unique id, letters, digits and underscores"});
        let tools = vec![
            Tool::new(
                "add_text",
                "Add plain text to the scene.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": id_schema,
                        "text": {"type": "string"},
                        "font_size": {"type": "number"},
                        "color": color_schema(),
                        "placement": placement_schema()
                    },
                    "required": ["id", "text"],
                    "additionalProperties": false
                }),
            ),
            Tool::new(
                "add_math",
                "Add a LaTeX math formula (math mode, no surrounding $) to the scene.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": id_schema,
                        "latex": {"type": "string"},
                        "font_size": {"type": "number"},
                        "color": color_schema(),
                        "placement": placement_schema()
                    },
                    "required": ["id", "latex"],
                    "additionalProperties": false
                }),
            ),
            Tool::new(
                "add_shape",
                "Add a shape. For axes, give x_range and y_range as [min, max, step].",
                json!({
                    "type": "object",
                    "properties": {
                        "id": id_schema,
                        "shape": {"type": "string", "enum": names::<ShapeKind>()},
                        "color": color_schema(),
                        "size": {"type": "array", "items": {"type": "number"}, "description": "[width, height]; circles and dots use the first value as radius; lines and arrows use [length, angle in degrees]"},
                        "x_range": {"type": "array", "items": {"type": "number"}},
                        "y_range": {"type": "array", "items": {"type": "number"}},
                        "placement": placement_schema()
                    },
                    "required": ["id", "shape"],
                    "additionalProperties": false
                }),
            ),
            Tool::new(
                "plot_function",
                "Plot y = f(x) on existing axes.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": id_schema,
                        "axes": {"type": "string", "description": "Id of the axes to plot on"},
                        "expression": {"type": "string", "description": "f(x), e.g. \"sin(x) / x\""},
                        "x_min": {"type": "number"},
                        "x_max": {"type": "number"},
                        "color": color_schema()
                    },
                    "required": ["id", "axes", "expression"],
                    "additionalProperties": false
                }),
            ),
            Tool::new(
                "animate",
                "Play an animation. transform takes exactly two targets: from and to.",
                json!({
                    "type": "object",
                    "properties": {
                        "animation": {"type": "string", "enum": names::<AnimationKind>()},
                        "targets": {"type": "array", "items": {"type": "string"}},
                        "run_time": {"type": "number"}
                    },
                    "required": ["animation", "targets"],
                    "additionalProperties": false
                }),
            ),
            Tool::new(
                "wait",
                "Pause the animation.",
                json!({
                    "type": "object",
                    "properties": {"seconds": {"type": "number"}},
                    "required": ["seconds"],
                    "additionalProperties": false
                }),
            ),
            Tool::new(
                "check_latex",
                "Check whether a LaTeX math formula compiles, without adding it.",
                json!({
                    "type": "object",
                    "properties": {"latex": {"type": "string"}},
                    "required": ["latex"],
                    "additionalProperties": false
                }),
            ),
            Tool::new(
                "clear_scene",
                "Remove everything from the scene and start over.",
                json!({"type": "object", "properties": {}, "additionalProperties": false}),
            ),
            Tool::new(
                "finish",
                "Finish the scene. Call it once, when the scene is complete.",
                json!({"type": "object", "properties": {}, "additionalProperties": false}),
            ),
        ];

        Self {
            tools,
            draft,
            latex_command: latex_command.into(),
        }
    }

    pub fn animation_names() -> Vec<String> {
        names::<AnimationKind>()
    }

    fn push(&self, op: SceneOp) -> AgentResult<String> {
        let mut draft = lock(&self.draft);
        if draft.finished {
            return Err(AgentError::ExecutionError(
                "the scene is already finished".to_string(),
            ));
        }
        if draft.script.ops.len() >= MAX_OPS {
            return Err(AgentError::ExecutionError(format!(
                "the scene already has {} operations",
                MAX_OPS
            )));
        }
        if let Some(id) = new_object_id(&op) {
            if !OBJECT_ID.is_match(id) {
                return Err(AgentError::InvalidParameters(format!(
                    "invalid id '{}': use letters, digits and underscores, starting with a letter",
                    id
                )));
            }
            if draft.script.ids().contains(id) {
                return Err(AgentError::InvalidParameters(format!(
                    "an object with id '{}' already exists",
                    id
                )));
            }
        }
        validate_references(&draft.script, &op)?;

        let summary = describe(&op);
        draft.script.ops.push(op);
        Ok(summary)
    }

    fn plot(&self, call: &ToolCall) -> AgentResult<SceneOp> {
        let id = call.str_arg("id")?.to_string();
        let axes = call.str_arg("axes")?.to_string();
        let expression = call.str_arg("expression")?;
        let expr = parse_function(expression).map_err(|e| {
            AgentError::InvalidParameters(format!("invalid expression '{}': {}", expression, e))
        })?;

        let (x_range, y_range) = lock(&self.draft)
            .script
            .axes_ranges(&axes)
            .ok_or_else(|| AgentError::InvalidParameters(format!("no axes with id '{}'", axes)))?;
        let x_min = number_arg(call, "x_min").unwrap_or(x_range[0]);
        let x_max = number_arg(call, "x_max").unwrap_or(x_range[1]);
        if x_min >= x_max {
            return Err(AgentError::InvalidParameters(
                "x_min must be smaller than x_max".to_string(),
            ));
        }

        let segments = sample_function(&expr, x_min, x_max, [y_range[0], y_range[1]]);
        if segments.is_empty() {
            return Err(AgentError::ExecutionError(format!(
                "y = {} has no visible points on these axes",
                expr
            )));
        }

        Ok(SceneOp::PlotFunction {
            id,
            axes,
            expression: expr.to_string(),
            color: color_arg(call)?,
            segments,
        })
    }

    async fn check_latex(&self, latex: &str) -> AgentResult<String> {
        tex::check_balanced(latex).map_err(|e| AgentError::InvalidParameters(e.to_string()))?;
        match tex::check_math(&self.latex_command, latex).await {
            Ok(()) => Ok("The LaTeX formula is valid.".to_string()),
            Err(RenderError::ToolMissing(_)) => {
                Ok("The LaTeX formula looks well formed.".to_string())
            }
            Err(e) => Err(AgentError::InvalidParameters(format!(
                "The LaTeX formula is invalid: {}",
                e
            ))),
        }
    }
}

fn new_object_id(op: &SceneOp) -> Option<&str> {
    match op {
        SceneOp::AddText { id, .. }
        | SceneOp::AddMath { id, .. }
        | SceneOp::AddShape { id, .. }
        | SceneOp::PlotFunction { id, .. } => Some(id),
        _ => None,
    }
}

fn validate_references(script: &SceneScript, op: &SceneOp) -> AgentResult<()> {
    let ids = script.ids();
    let missing = |id: &str| -> AgentResult<()> {
        if ids.contains(id) {
            Ok(())
        } else {
            Err(AgentError::InvalidParameters(format!(
                "no object with id '{}'",
                id
            )))
        }
    };

    match op {
        SceneOp::AddText { placement, .. }
        | SceneOp::AddMath { placement, .. }
        | SceneOp::AddShape { placement, .. } => {
            if let Some(other) = &placement.next_to {
                missing(other)?;
            }
        }
        SceneOp::Animate {
            animation, targets, ..
        } => {
            if targets.is_empty() {
                return Err(AgentError::InvalidParameters(
                    "animate needs at least one target".to_string(),
                ));
            }
            if *animation == AnimationKind::Transform && targets.len() != 2 {
                return Err(AgentError::InvalidParameters(
                    "transform takes exactly two targets".to_string(),
                ));
            }
            for target in targets {
                missing(target)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn describe(op: &SceneOp) -> String {
    match op {
        SceneOp::AddText { id, .. } => format!("Added text '{}'.", id),
        SceneOp::AddMath { id, .. } => format!("Added formula '{}'.", id),
        SceneOp::AddShape { id, shape, .. } => format!("Added {} '{}'.", shape, id),
        SceneOp::PlotFunction { id, expression, .. } => {
            format!("Plotted y = {} as '{}'.", expression, id)
        }
        SceneOp::Animate {
            animation, targets, ..
        } => format!("Queued {} on {}.", animation, targets.join(", ")),
        SceneOp::Wait { seconds } => format!("Queued a {}s pause.", seconds),
    }
}

fn number_arg(call: &ToolCall, key: &str) -> Option<f64> {
    call.arguments.get(key).and_then(|v| v.as_f64())
}

fn color_arg(call: &ToolCall) -> AgentResult<String> {
    let color = call.opt_str_arg("color").unwrap_or("WHITE");
    let upper = color.to_uppercase();
    if NAMED_COLORS.contains(&upper.as_str()) {
        Ok(upper)
    } else if HEX_COLOR.is_match(color) {
        Ok(color.to_string())
    } else {
        Err(AgentError::InvalidParameters(format!(
            "unknown color '{}'",
            color
        )))
    }
}

fn placement_arg(call: &ToolCall) -> AgentResult<Placement> {
    match call.arguments.get("placement") {
        None | Some(Value::Null) => Ok(Placement::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| AgentError::InvalidParameters(format!("invalid placement: {}", e))),
    }
}

fn parse_enum<T: std::str::FromStr>(call: &ToolCall, key: &str, options: Vec<String>) -> AgentResult<T> {
    let value = call.str_arg(key)?;
    value.parse().map_err(|_| {
        AgentError::InvalidParameters(format!(
            "unknown {} '{}', expected one of: {}",
            key,
            value,
            options.join(", ")
        ))
    })
}

fn range_arg(call: &ToolCall, key: &str) -> AgentResult<Option<[f64; 3]>> {
    let Some(value) = call.arguments.get(key) else {
        return Ok(None);
    };
    let numbers: Vec<f64> = value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default();
    match numbers.as_slice() {
        [min, max, step] if min < max && *step > 0.0 => Ok(Some([*min, *max, *step])),
        [min, max] if min < max => Ok(Some([*min, *max, (*max - *min) / 10.0])),
        _ => Err(AgentError::InvalidParameters(format!(
            "{} must be [min, max, step] with min < max",
            key
        ))),
    }
}

#[async_trait]
impl System for SceneBuilderSystem {
    fn name(&self) -> &str {
        "SceneBuilderSystem"
    }

    fn description(&self) -> &str {
        "Builds a declarative scene step by step"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, _ctx: &ToolContext<'_>) -> AgentResult<String> {
        let call = &tool_call;
        let font_size = || number_arg(call, "font_size").unwrap_or(48.0).clamp(8.0, 144.0);

        let op = match call.name.as_str() {
            "add_text" => SceneOp::AddText {
                id: call.str_arg("id")?.to_string(),
                text: call.str_arg("text")?.to_string(),
                font_size: font_size(),
                color: color_arg(call)?,
                placement: placement_arg(call)?,
            },
            "add_math" => {
                let latex = call.str_arg("latex")?.trim().trim_matches('$').to_string();
                tex::check_balanced(&latex)
                    .map_err(|e| AgentError::InvalidParameters(e.to_string()))?;
                SceneOp::AddMath {
                    id: call.str_arg("id")?.to_string(),
                    latex,
                    font_size: font_size(),
                    color: color_arg(call)?,
                    placement: placement_arg(call)?,
                }
            }
            "add_shape" => {
                let shape: ShapeKind = parse_enum(call, "shape", names::<ShapeKind>())?;
                let size = call
                    .arguments
                    .get("size")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().filter_map(|v| v.as_f64()).collect::<Vec<_>>())
                    .unwrap_or_default();
                let (x_range, y_range) = if shape == ShapeKind::Axes {
                    (
                        Some(range_arg(call, "x_range")?.unwrap_or([-5.0, 5.0, 1.0])),
                        Some(range_arg(call, "y_range")?.unwrap_or([-3.0, 3.0, 1.0])),
                    )
                } else {
                    (None, None)
                };
                SceneOp::AddShape {
                    id: call.str_arg("id")?.to_string(),
                    shape,
                    color: color_arg(call)?,
                    size: [
                        size.first().copied().unwrap_or(1.0),
                        size.get(1).copied().unwrap_or(0.0),
                    ],
                    x_range,
                    y_range,
                    placement: placement_arg(call)?,
                }
            }
            "plot_function" => self.plot(call)?,
            "animate" => SceneOp::Animate {
                animation: parse_enum(call, "animation", names::<AnimationKind>())?,
                targets: call
                    .arguments
                    .get("targets")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
                run_time: number_arg(call, "run_time").unwrap_or(1.0).clamp(0.1, 10.0),
            },
            "wait" => SceneOp::Wait {
                seconds: number_arg(call, "seconds").unwrap_or(1.0).clamp(0.1, 10.0),
            },
            "check_latex" => return self.check_latex(call.str_arg("latex")?).await,
            "clear_scene" => {
                lock(&self.draft).script.ops.clear();
                return Ok("The scene is empty again.".to_string());
            }
            "finish" => {
                let mut draft = lock(&self.draft);
                if draft.script.ops.is_empty() {
                    return Err(AgentError::ExecutionError(
                        "the scene is empty, add something before finishing".to_string(),
                    ));
                }
                draft.finished = true;
                return Ok("Scene finished.".to_string());
            }
            _ => return Err(AgentError::ToolNotFound(tool_call.name.clone())),
        };

        self.push(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::CollectingOutbox;

    fn builder() -> (SceneBuilderSystem, Arc<Mutex<SceneDraft>>) {
        let draft = Arc::new(Mutex::new(SceneDraft::default()));
        (
            SceneBuilderSystem::new(draft.clone(), "definitely-not-a-latex-binary"),
            draft,
        )
    }

    async fn run(system: &SceneBuilderSystem, name: &str, args: Value) -> AgentResult<String> {
        let outbox = CollectingOutbox::new();
        system
            .call(ToolCall::new(name, args), &ToolContext::new(&outbox))
            .await
    }

    #[tokio::test]
    async fn test_build_and_finish() {
        let (system, draft) = builder();
        run(&system, "add_text", json!({"id": "title", "text": "Pitágoras", "color": "blue"}))
            .await
            .unwrap();
        run(
            &system,
            "add_math",
            json!({"id": "eq", "latex": "$a^2 + b^2 = c^2$", "placement": {"next_to": "title", "direction": "down"}}),
        )
        .await
        .unwrap();
        run(&system, "animate", json!({"animation": "write", "targets": ["title", "eq"]}))
            .await
            .unwrap();
        assert_eq!(run(&system, "finish", json!({})).await.unwrap(), "Scene finished.");

        let draft = lock(&draft);
        assert!(draft.finished);
        assert!(draft.script.is_animated());
        match &draft.script.ops[1] {
            SceneOp::AddMath { latex, placement, .. } => {
                assert_eq!(latex, "a^2 + b^2 = c^2");
                assert_eq!(placement.direction, Some(Direction::Down));
            }
            other => panic!("unexpected op {:?}", other),
        }
        match &draft.script.ops[0] {
            SceneOp::AddText { color, .. } => assert_eq!(color, "BLUE"),
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_operations_are_rejected() {
        let (system, draft) = builder();
        run(&system, "add_text", json!({"id": "a", "text": "x"})).await.unwrap();

        let duplicate = run(&system, "add_text", json!({"id": "a", "text": "y"})).await;
        assert!(matches!(duplicate, Err(AgentError::InvalidParameters(_))));

        let missing = run(&system, "animate", json!({"animation": "create", "targets": ["b"]})).await;
        assert_eq!(
            missing,
            Err(AgentError::InvalidParameters("no object with id 'b'".into()))
        );

        let bad_anim = run(&system, "animate", json!({"animation": "explode", "targets": ["a"]})).await;
        assert!(matches!(bad_anim, Err(AgentError::InvalidParameters(m)) if m.contains("fade_in")));

        let bad_color = run(&system, "add_shape", json!({"id": "c", "shape": "circle", "color": "chartreuse-ish"})).await;
        assert!(matches!(bad_color, Err(AgentError::InvalidParameters(_))));

        let unbalanced = run(&system, "add_math", json!({"id": "m", "latex": "\\frac{1}{2"})).await;
        assert!(matches!(unbalanced, Err(AgentError::InvalidParameters(_))));

        // nothing invalid was recorded
        assert_eq!(lock(&draft).script.ops.len(), 1);
        assert!(!lock(&draft).script.is_animated());
    }

    #[tokio::test]
    async fn test_plot_function_samples_visible_segments() {
        let (system, draft) = builder();
        run(
            &system,
            "add_shape",
            json!({"id": "ax", "shape": "axes", "x_range": [-4, 4, 1], "y_range": [-3, 3, 1]}),
        )
        .await
        .unwrap();
        let summary = run(
            &system,
            "plot_function",
            json!({"id": "f", "axes": "ax", "expression": "1/x", "color": "#FF8800"}),
        )
        .await
        .unwrap();
        assert_eq!(summary, "Plotted y = 1 / x as 'f'.");

        let draft = lock(&draft);
        match &draft.script.ops[1] {
            SceneOp::PlotFunction { segments, .. } => {
                assert_eq!(segments.len(), 2);
                for segment in segments {
                    assert!(segment.iter().all(|[x, y]| (-4.0..=4.0).contains(x) && (-3.0..=3.0).contains(y)));
                }
                assert!(segments[0].iter().all(|[x, _]| *x < 0.0));
                assert!(segments[1].iter().all(|[x, _]| *x > 0.0));
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plot_rejects_code() {
        let (system, _) = builder();
        run(&system, "add_shape", json!({"id": "ax", "shape": "axes"})).await.unwrap();
        let result = run(
            &system,
            "plot_function",
            json!({"id": "f", "axes": "ax", "expression": "__import__('os').system('ls')"}),
        )
        .await;
        assert!(matches!(result, Err(AgentError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_clear_and_finish_rules() {
        let (system, draft) = builder();
        assert!(run(&system, "finish", json!({})).await.is_err());
        run(&system, "wait", json!({"seconds": 2})).await.unwrap();
        assert_eq!(
            run(&system, "clear_scene", json!({})).await.unwrap(),
            "The scene is empty again."
        );
        assert!(lock(&draft).script.ops.is_empty());

        run(&system, "add_shape", json!({"id": "sq", "shape": "square"})).await.unwrap();
        run(&system, "finish", json!({})).await.unwrap();
        let late = run(&system, "add_text", json!({"id": "t", "text": "late"})).await;
        assert_eq!(
            late,
            Err(AgentError::ExecutionError("the scene is already finished".into()))
        );
    }

    #[tokio::test]
    async fn test_check_latex_without_latex_installed() {
        let (system, _) = builder();
        let ok = run(&system, "check_latex", json!({"latex": "\\int_0^1 x\\,dx"})).await;
        assert_eq!(ok, Ok("The LaTeX formula looks well formed.".to_string()));
        let bad = run(&system, "check_latex", json!({"latex": "\\left( x"})).await;
        assert!(bad.is_err());
    }

    #[test]
    fn test_script_serializes_with_op_tags() {
        let mut script = SceneScript::new("t", false);
        script.ops.push(SceneOp::Wait { seconds: 1.0 });
        let value = serde_json::to_value(&script).unwrap();
        assert_eq!(value["ops"][0]["op"], "wait");
        assert_eq!(serde_json::from_value::<SceneScript>(value).unwrap(), script);
    }
}
