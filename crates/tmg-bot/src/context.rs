use serde::Serialize;
use tmg::models::message::MessageContent;

pub const DM_CHANNEL_NAME: &str = "DM Channel";

/// What the model is told about each Discord message, as a JSON text block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageContext {
    pub message: String,
    pub user_ping: String,
    pub user_name: String,
    pub channel: String,
    pub channel_mention: String,
    pub time_utc: String,
    pub replying_to_user_with_ping: Option<String>,
    /// the text before an edit, for edited messages
    pub previous_message: Option<String>,
}

impl MessageContext {
    pub fn to_block(&self) -> MessageContent {
        MessageContent::text(serde_json::to_string_pretty(self).unwrap_or_default())
    }
}

/// The bot speaks only when mentioned or in a direct message
pub fn should_respond(is_dm: bool, mentions_bot: bool) -> bool {
    is_dm || mentions_bot
}

pub fn format_time_utc(unix_seconds: i64) -> String {
    chrono::DateTime::from_timestamp(unix_seconds, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub fn welcome_text(server_name: &str, member_mention: &str, rules_mention: &str, emoji: &str) -> String {
    format!(
        "¡Bienvenido {} a {}! Recuerda leer todas las reglas en {} y verificarte ahí mismo. ¡Disfruta tu estadía! {}",
        member_mention, server_name, rules_mention, emoji
    )
    .trim_end()
    .to_string()
}
