mod attachments;
mod configuration;
mod context;
mod error;
mod feedback;
mod handler;
mod outbox;
mod state;
mod transcription;

use serenity::cache::Settings as CacheSettings;
use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use std::sync::Arc;
use tmg::providers::base::Provider;
use tmg::providers::factory::get_resilient_provider;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::configuration::Settings;
use crate::feedback::{MemoryStore, SupabaseStore};
use crate::handler::Handler;
use crate::state::AppState;
use crate::transcription::WhisperTranscriber;

/// Messages kept per channel so edits can report what they replaced
const CACHED_MESSAGES: usize = 200;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut settings = Settings::new()?;
    info!(
        provider = %settings.provider.provider_type(),
        search = settings.search.is_some(),
        "configuration loaded"
    );

    let provider: Arc<dyn Provider> = Arc::from(get_resilient_provider(
        settings.provider.clone().into_config(),
        settings.retry.retry_config(),
        settings.retry.min_interval(),
    )?);

    let token = settings.discord.token.clone();
    let transcription = settings.transcription.take();
    let state = match settings.feedback.take() {
        Some(feedback) => AppState::new(settings, provider, Arc::new(SupabaseStore::new(feedback)?)),
        None => {
            info!("no feedback store configured, votes are kept in memory");
            AppState::new(settings, provider, Arc::new(MemoryStore::new()))
        }
    };
    let state = match transcription {
        Some(transcription) => state.with_transcriber(Arc::new(WhisperTranscriber::new(transcription)?)),
        None => {
            info!("no transcription backend configured, audio is passed by reference");
            state
        }
    };
    let handler = Handler::new(Arc::new(state));

    let intents = GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::DIRECT_MESSAGE_REACTIONS
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT;

    let mut cache_settings = CacheSettings::default();
    cache_settings.max_messages = CACHED_MESSAGES;

    Client::builder(&token, intents)
        .cache_settings(cache_settings)
        .event_handler(handler)
        .await?
        .start()
        .await
        .map_err(Into::into)
}
