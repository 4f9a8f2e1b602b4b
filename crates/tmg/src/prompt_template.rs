use include_dir::{include_dir, Dir};
use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

static PROMPTS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/src/prompts");

pub const ACADEMIC_PROMPT: &str = "academic.md";
pub const MATH_SOLVER_PROMPT: &str = "math_solver.md";
pub const PROBLEM_STATEMENT_PROMPT: &str = "problem_statement.md";
pub const SCENE_BUILDER_PROMPT: &str = "scene_builder.md";

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered.trim().to_string())
}

/// Render one of the prompts embedded in the binary
pub fn load_prompt_file<T: Serialize>(
    template_file: &str,
    context_data: &T,
) -> Result<String, TeraError> {
    let file = PROMPTS_DIR
        .get_file(template_file)
        .ok_or_else(|| TeraError::msg(format!("Unknown prompt template: {}", template_file)))?;
    let template_content = file
        .contents_utf8()
        .ok_or_else(|| TeraError::msg(format!("Prompt {} is not UTF-8", template_file)))?;
    load_prompt(template_content, context_data)
}

/// Values substituted into the persona prompt
#[derive(Debug, Clone, Serialize)]
pub struct PersonaContext {
    pub bot_name: String,
    pub server_name: String,
    pub bot_mention: String,
    /// Empty when no owner is configured
    pub owner_mention: String,
}

pub fn academic_prompt(context: &PersonaContext) -> Result<String, TeraError> {
    load_prompt_file(ACADEMIC_PROMPT, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::Tool;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_load_prompt() {
        let template = "Hola, {{ name }}! Tienes {{ age }} años.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Ana".to_string());
        context.insert("age".to_string(), 30.to_string());

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(result, "Hola, Ana! Tienes 30 años.");
    }

    #[test]
    fn test_load_prompt_missing_variable() {
        let template = "Hola, {{ name }}! Tienes {{ age }} años.";
        let mut context = HashMap::new();
        context.insert("name".to_string(), "Ana".to_string());
        let result = load_prompt(template, &context);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_prompt_file_missing_file() {
        let context: HashMap<String, String> = HashMap::new();
        assert!(load_prompt_file("non_existent_template.md", &context).is_err());
    }

    #[test]
    fn test_load_prompt_with_tools() {
        let template = "### Tools\n{% for tool in tools %}\n{{tool.name}}: {{tool.description}}{% endfor %}";
        let tools = vec![
            Tool::new("calculator", "Evaluates an expression", json!({"type": "object"})),
            Tool::new("internet_search", "Searches the web", json!({"type": "object"})),
        ];
        let mut context = HashMap::new();
        context.insert("tools".to_string(), tools);

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(
            result,
            "### Tools\n\ncalculator: Evaluates an expression\ninternet_search: Searches the web"
        );
    }

    #[test]
    fn test_academic_prompt() {
        let mut context = PersonaContext {
            bot_name: "TheMathGuysBot".to_string(),
            server_name: "The Math Guys".to_string(),
            bot_mention: "<@1>".to_string(),
            owner_mention: "<@2>".to_string(),
        };
        let prompt = academic_prompt(&context).unwrap();
        assert!(prompt.contains("Your user mention is <@1>"));
        assert!(prompt.contains("The user with ping <@2> is the server owner"));
        assert!(prompt.contains("\"previous_message\""));

        context.owner_mention.clear();
        let prompt = academic_prompt(&context).unwrap();
        assert!(!prompt.contains("server owner"));
    }

    #[test]
    fn test_every_embedded_prompt_renders() {
        let context = json!({
            "functions": "sqrt, sin",
            "animations": "create, write",
            "bot_name": "b",
            "server_name": "s",
            "bot_mention": "<@1>",
            "owner_mention": ""
        });
        for name in [
            ACADEMIC_PROMPT,
            MATH_SOLVER_PROMPT,
            PROBLEM_STATEMENT_PROMPT,
            SCENE_BUILDER_PROMPT,
        ] {
            let rendered = load_prompt_file(name, &context).unwrap();
            assert!(!rendered.is_empty(), "{} rendered empty", name);
        }
    }
}
