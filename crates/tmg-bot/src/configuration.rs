use crate::error::{missing_field_key, to_env_var, ConfigError, ENV_PREFIX};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use tmg::providers::{
    configs::{
        GoogleProviderConfig, OpenAiProviderConfig, ProviderConfig, ResponsesProviderConfig,
        GOOGLE_DEFAULT_HOST, OPENAI_DEFAULT_HOST,
    },
    factory::ProviderType,
    retry::RetryConfig,
};
use tmg::store::{StoreConfig, DEFAULT_MAX_CONVERSATIONS, DEFAULT_MAX_TURNS};
use tmg::systems::render::RenderConfig;
use tmg::systems::search::{SearchConfig, BING_DEFAULT_HOST, DEFAULT_RESULT_COUNT};
use tmg::tex::TexConfig;

/// Greeting posted when someone joins the server
#[derive(Debug, Clone, Deserialize)]
pub struct WelcomeSettings {
    pub channel_id: u64,
    pub rules_channel_id: u64,
    /// Custom emoji markup, e.g. `<:aplus:1196603434254737468>`
    #[serde(default)]
    pub emoji: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordSettings {
    pub token: String,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default)]
    pub owner_id: Option<u64>,
    #[serde(default)]
    pub welcome: Option<WelcomeSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Responses {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        max_tokens: Option<i32>,
        /// set for Azure deployments
        #[serde(default)]
        api_version: Option<String>,
    },
    Google {
        #[serde(default = "default_google_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_google_model")]
        model: String,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
            ProviderSettings::Responses { .. } => ProviderType::Responses,
            ProviderSettings::Google { .. } => ProviderType::Google,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                max_tokens,
            }),
            ProviderSettings::Responses {
                host,
                api_key,
                model,
                max_tokens,
                api_version,
            } => ProviderConfig::Responses(ResponsesProviderConfig {
                host,
                api_key,
                model,
                max_tokens,
                api_version,
            }),
            ProviderSettings::Google {
                host,
                api_key,
                model,
                max_tokens,
            } => ProviderConfig::Google(GoogleProviderConfig {
                host,
                api_key,
                model,
                max_tokens,
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// minimum spacing between backend calls
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl RetrySettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            ..RetryConfig::default()
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    pub api_key: String,
    #[serde(default = "default_search_host")]
    pub host: String,
    #[serde(default = "default_search_count")]
    pub count: u32,
}

impl SearchSettings {
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            host: self.host.clone(),
            api_key: self.api_key.clone(),
            count: self.count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_conversations: default_max_conversations(),
            max_rounds: default_max_rounds(),
        }
    }
}

impl ConversationSettings {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_turns: self.max_turns,
            max_conversations: self.max_conversations,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_render_command")]
    pub command: String,
    #[serde(default = "default_render_args")]
    pub args: Vec<String>,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_builder_timeout")]
    pub builder_timeout_secs: u64,
    #[serde(default = "default_latex")]
    pub latex_command: String,
    #[serde(default = "default_dvipng")]
    pub dvipng_command: String,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm_command: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_command: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_command: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            command: default_render_command(),
            args: default_render_args(),
            quality: default_quality(),
            timeout_secs: default_render_timeout(),
            builder_timeout_secs: default_builder_timeout(),
            latex_command: default_latex(),
            dvipng_command: default_dvipng(),
            pdftoppm_command: default_pdftoppm(),
            ffmpeg_command: default_ffmpeg(),
            ffprobe_command: default_ffprobe(),
        }
    }
}

impl RenderSettings {
    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            command: self.command.clone(),
            args: self.args.clone(),
            quality: self.quality.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            builder_timeout: Duration::from_secs(self.builder_timeout_secs),
            latex_command: self.latex_command.clone(),
            ..RenderConfig::default()
        }
    }

    pub fn tex_config(&self) -> TexConfig {
        TexConfig {
            latex_command: self.latex_command.clone(),
            dvipng_command: self.dvipng_command.clone(),
            ..TexConfig::default()
        }
    }
}

/// PostgREST endpoint (e.g. Supabase) where rendered media and votes are kept
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackSettings {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_feedback_table")]
    pub table: String,
}

/// Speech-to-text for audio and video attachments, OpenAI or Azure style
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionSettings {
    #[serde(default = "default_openai_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    /// set for Azure deployments
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub discord: DiscordSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub search: Option<SearchSettings>,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub feedback: Option<FeedbackSettings>,
    #[serde(default)]
    pub transcription: Option<TranscriptionSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Optional file, overridden by the environment
            .add_source(File::with_name("tmg").required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let Some(key) = missing_field_key(&err.to_string()) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&key),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_server_name() -> String {
    "The Math Guys".to_string()
}

fn default_openai_host() -> String {
    OPENAI_DEFAULT_HOST.to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_google_host() -> String {
    GOOGLE_DEFAULT_HOST.to_string()
}

fn default_google_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_search_host() -> String {
    BING_DEFAULT_HOST.to_string()
}

fn default_search_count() -> u32 {
    DEFAULT_RESULT_COUNT
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_max_conversations() -> usize {
    DEFAULT_MAX_CONVERSATIONS
}

fn default_max_rounds() -> usize {
    tmg::agent::DEFAULT_MAX_ROUNDS
}

fn default_render_command() -> String {
    "python3".to_string()
}

fn default_render_args() -> Vec<String> {
    vec!["-m".to_string(), "manim".to_string()]
}

fn default_quality() -> String {
    "h".to_string()
}

fn default_render_timeout() -> u64 {
    120
}

fn default_builder_timeout() -> u64 {
    300
}

fn default_latex() -> String {
    "latex".to_string()
}

fn default_dvipng() -> String {
    "dvipng".to_string()
}

fn default_pdftoppm() -> String {
    "pdftoppm".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_feedback_table() -> String {
    "renders".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("TMG_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("TMG_DISCORD__TOKEN", "discord-token");
        env::set_var("TMG_PROVIDER__TYPE", "openai");
        env::set_var("TMG_PROVIDER__API_KEY", "test-key");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.discord.token, "discord-token");
        assert_eq!(settings.discord.server_name, "The Math Guys");
        assert!(settings.discord.welcome.is_none());
        assert!(settings.search.is_none());
        assert!(settings.feedback.is_none());
        assert!(settings.transcription.is_none());
        assert_eq!(settings.render.ffmpeg_command, "ffmpeg");
        assert_eq!(settings.conversation.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(settings.render.timeout_secs, 120);
        assert_eq!(settings.render.render_config().args, vec!["-m", "manim"]);
        assert_eq!(settings.provider.provider_type(), ProviderType::OpenAi);

        if let ProviderSettings::OpenAi {
            host,
            api_key,
            model,
            max_tokens,
        } = settings.provider
        {
            assert_eq!(host, "https://api.openai.com");
            assert_eq!(api_key, "test-key");
            assert_eq!(model, "gpt-4o");
            assert_eq!(max_tokens, None);
        } else {
            panic!("Expected OpenAI provider");
        }

        clean_env();
    }

    #[test]
    #[serial]
    fn test_responses_settings_for_azure() {
        clean_env();
        env::set_var("TMG_DISCORD__TOKEN", "discord-token");
        env::set_var("TMG_PROVIDER__TYPE", "responses");
        env::set_var("TMG_PROVIDER__HOST", "https://tmg.openai.azure.com");
        env::set_var("TMG_PROVIDER__API_KEY", "azure-key");
        env::set_var("TMG_PROVIDER__API_VERSION", "2025-03-01-preview");
        env::set_var("TMG_PROVIDER__MAX_TOKENS", "2000");

        let settings = Settings::new().unwrap();
        match settings.provider.into_config() {
            ProviderConfig::Responses(config) => {
                assert_eq!(config.host, "https://tmg.openai.azure.com");
                assert_eq!(config.model, "gpt-4o");
                assert_eq!(config.api_version.as_deref(), Some("2025-03-01-preview"));
                assert_eq!(config.max_tokens, Some(2000));
            }
            other => panic!("Expected Responses provider, got {:?}", other),
        }

        clean_env();
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("TMG_DISCORD__TOKEN", "discord-token");
        env::set_var("TMG_DISCORD__WELCOME__CHANNEL_ID", "1045453709221568535");
        env::set_var("TMG_DISCORD__WELCOME__RULES_CHANNEL_ID", "1046564924035436674");
        env::set_var("TMG_PROVIDER__TYPE", "google");
        env::set_var("TMG_PROVIDER__API_KEY", "gemini-key");
        env::set_var("TMG_SEARCH__API_KEY", "bing-key");
        env::set_var("TMG_CONVERSATION__MAX_TURNS", "10");
        env::set_var("TMG_RENDER__TIMEOUT_SECS", "30");
        env::set_var("TMG_FEEDBACK__URL", "https://tmg.supabase.co");
        env::set_var("TMG_FEEDBACK__API_KEY", "service-key");
        env::set_var("TMG_TRANSCRIPTION__API_KEY", "whisper-key");

        let settings = Settings::new().unwrap();
        let welcome = settings.discord.welcome.unwrap();
        assert_eq!(welcome.channel_id, 1045453709221568535);
        assert_eq!(welcome.rules_channel_id, 1046564924035436674);
        assert_eq!(settings.provider.provider_type(), ProviderType::Google);
        let search = settings.search.unwrap().search_config();
        assert_eq!(search.api_key, "bing-key");
        assert_eq!(search.count, DEFAULT_RESULT_COUNT);
        assert_eq!(settings.conversation.store_config().max_turns, 10);
        assert_eq!(
            settings.render.render_config().timeout,
            Duration::from_secs(30)
        );
        let feedback = settings.feedback.unwrap();
        assert_eq!(feedback.table, "renders");
        let transcription = settings.transcription.unwrap();
        assert_eq!(transcription.model, "whisper-1");
        assert_eq!(transcription.host, "https://api.openai.com");
        assert_eq!(transcription.api_version, None);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_provider() {
        clean_env();
        env::set_var("TMG_DISCORD__TOKEN", "discord-token");

        match Settings::new() {
            Err(ConfigError::MissingEnvVar { env_var }) => assert_eq!(env_var, "TMG_PROVIDER"),
            other => panic!("Expected MissingEnvVar, got {:?}", other.map(|_| ())),
        }

        clean_env();
    }
}
