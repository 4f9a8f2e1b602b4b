use anyhow::Result;
use std::sync::Arc;
use tmg::agent::Agent;
use tmg::prompt_template::{academic_prompt, PersonaContext};
use tmg::providers::base::Provider;
use tmg::store::ConversationStore;
use tmg::systems::{MathSystem, RenderSink, RenderSystem, SearchSystem};
use tmg::tex::TexConfig;
use tokio::sync::RwLock;
use tracing::info;

use crate::attachments::MediaTools;
use crate::configuration::Settings;
use crate::feedback::FeedbackStore;
use crate::transcription::Transcriber;

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    pub store: ConversationStore,
    pub feedback: Arc<dyn FeedbackStore>,
    sink: Arc<dyn RenderSink>,
    pub provider: Arc<dyn Provider>,
    pub tex: TexConfig,
    pub media: MediaTools,
    /// Installed once the gateway tells us who we are
    agent: RwLock<Option<Arc<Agent>>>,
}

impl AppState {
    pub fn new<F>(settings: Settings, provider: Arc<dyn Provider>, feedback: Arc<F>) -> Self
    where
        F: FeedbackStore + 'static,
    {
        Self {
            sink: feedback.clone(),
            store: ConversationStore::new(settings.conversation.store_config()),
            tex: settings.render.tex_config(),
            media: MediaTools::new(&settings.render),
            settings,
            feedback,
            provider,
            agent: RwLock::new(None),
        }
    }

    /// Transcribe audio attachments and video soundtracks
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.media = self.media.with_transcriber(transcriber);
        self
    }

    /// The academic persona with every tool the configuration enables
    pub fn build_agent(&self, bot_name: &str, bot_mention: &str) -> Result<Agent> {
        let persona = PersonaContext {
            bot_name: bot_name.to_string(),
            server_name: self.settings.discord.server_name.clone(),
            bot_mention: bot_mention.to_string(),
            owner_mention: self
                .settings
                .discord
                .owner_id
                .map(|id| format!("<@{}>", id))
                .unwrap_or_default(),
        };
        let mut agent = Agent::new(Box::new(Arc::clone(&self.provider)), academic_prompt(&persona)?)
            .with_max_rounds(self.settings.conversation.max_rounds);

        match &self.settings.search {
            Some(search) => agent.add_system(Box::new(SearchSystem::new(search.search_config())?)),
            None => info!("no search key configured, internet_search is disabled"),
        }
        agent.add_system(Box::new(MathSystem::new(Arc::clone(&self.provider))?));
        agent.add_system(Box::new(
            RenderSystem::new(Arc::clone(&self.provider), self.settings.render.render_config())?
                .with_sink(Arc::clone(&self.sink)),
        ));
        Ok(agent)
    }

    pub async fn install_agent(&self, agent: Agent) {
        *self.agent.write().await = Some(Arc::new(agent));
    }

    pub async fn agent(&self) -> Option<Arc<Agent>> {
        self.agent.read().await.clone()
    }
}
