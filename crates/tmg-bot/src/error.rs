use thiserror::Error;

pub const ENV_PREFIX: &str = "TMG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted config key, e.g. `discord.token`
/// becomes `TMG_DISCORD__TOKEN`
pub fn to_env_var(key: &str) -> String {
    let path = key
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_uppercase())
        .collect::<Vec<_>>()
        .join("__");
    format!("{}_{}", ENV_PREFIX, path)
}

/// Recover the dotted key from a deserialization message such as
/// "missing field `token` for key `discord`"
pub fn missing_field_key(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest
        .split_once("for key `")
        .and_then(|(_, key)| key.split_once('`'))
    {
        Some((parent, _)) if !parent.is_empty() => Some(format!("{}.{}", parent, field)),
        _ => Some(field.to_string()),
    }
}
