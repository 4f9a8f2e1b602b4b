use serenity::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::gateway::ActivityData;
use serenity::model::channel::{Message, Reaction, ReactionType};
use serenity::model::event::MessageUpdateEvent;
use serenity::model::gateway::Ready;
use serenity::model::guild::Member;
use serenity::model::id::ChannelId;
use serenity::model::mention::Mentionable;
use std::sync::Arc;
use tmg::agent::TurnError;
use tmg::store::ConversationKey;
use tracing::{debug, error, info, warn};

use crate::context::{
    format_time_utc, should_respond, welcome_text, MessageContext, DM_CHANNEL_NAME,
};
use crate::feedback::Vote;
use crate::outbox::DiscordOutbox;
use crate::state::AppState;

pub struct Handler {
    state: Arc<AppState>,
}

impl Handler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    async fn message_context(
        &self,
        ctx: &Context,
        msg: &Message,
        previous_message: Option<String>,
    ) -> MessageContext {
        let author_mention = msg.author.mention().to_string();
        let (channel, channel_mention) = if msg.guild_id.is_none() {
            (DM_CHANNEL_NAME.to_string(), author_mention.clone())
        } else {
            let name = match msg.channel_id.to_channel(ctx).await {
                Ok(channel) => channel.guild().map(|c| c.name).unwrap_or_default(),
                Err(err) => {
                    debug!(channel = %msg.channel_id, error = %err, "could not resolve channel name");
                    String::new()
                }
            };
            (name, msg.channel_id.mention().to_string())
        };

        MessageContext {
            message: msg.content.clone(),
            user_ping: author_mention,
            user_name: msg.author.name.clone(),
            channel,
            channel_mention,
            time_utc: format_time_utc(msg.timestamp.unix_timestamp()),
            replying_to_user_with_ping: msg
                .referenced_message
                .as_ref()
                .map(|replied| replied.author.mention().to_string()),
            previous_message,
        }
    }

    /// Record every message as context; answer the ones addressed to the bot
    async fn handle(&self, ctx: Context, msg: Message, previous_message: Option<String>) {
        let bot_id = ctx.cache.current_user().id;
        if msg.author.id == bot_id {
            return;
        }

        let mut blocks = vec![self
            .message_context(&ctx, &msg, previous_message)
            .await
            .to_block()];
        blocks.extend(self.state.media.attachment_blocks(&msg.attachments).await);

        let key = ConversationKey::new(msg.channel_id.to_string());
        let entry = self.state.store.entry(&key);
        let mut conversation = entry.lock().await;

        if !should_respond(msg.guild_id.is_none(), msg.mentions_user_id(bot_id)) {
            for block in blocks {
                conversation.remember(block);
            }
            return;
        }

        let Some(agent) = self.state.agent().await else {
            warn!("message arrived before the agent was ready");
            return;
        };

        let user = conversation.take_user_turn(blocks);
        let outbox = DiscordOutbox::new(
            Arc::clone(&ctx.http),
            msg.channel_id,
            msg.id,
            self.state.tex.clone(),
        );
        let _typing = msg.channel_id.start_typing(&ctx.http);

        if let Err(err) = agent.run_turn(&mut conversation.state, user, &outbox).await {
            error!(channel = %msg.channel_id, error = %err, "turn failed");
            if let Err(err) = outbox.send_plain(apology(&err)).await {
                warn!(error = %err, "could not send apology");
            }
        }
        if self.state.store.enforce_capacity(&mut conversation) {
            info!(channel = %msg.channel_id, "conversation reached its turn limit and was reset");
        }
    }

    async fn vote(&self, ctx: &Context, reaction: &Reaction, delta: i64) {
        if reaction.user_id == Some(ctx.cache.current_user().id) {
            return;
        }
        let Some(vote) = reaction_vote(&reaction.emoji) else {
            return;
        };
        if let Err(err) = self
            .state
            .feedback
            .adjust_votes(&reaction.message_id.to_string(), vote, delta)
            .await
        {
            warn!(message = %reaction.message_id, error = %err, "could not update votes");
        }
    }
}

fn apology(err: &TurnError) -> &'static str {
    match err {
        TurnError::BackendUnavailable(_) => {
            "Lo siento, no puedo responder en este momento. Inténtalo de nuevo en un rato."
        }
        TurnError::TooManyRounds(_) => {
            "Lo siento, me enredé intentando responder. ¿Puedes reformular tu pregunta?"
        }
    }
}

fn reaction_vote(emoji: &ReactionType) -> Option<Vote> {
    match emoji {
        ReactionType::Unicode(emoji) => Vote::from_emoji(emoji),
        _ => None,
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, "connected to Discord");
        ctx.set_activity(Some(ActivityData::playing("math")));

        match self
            .state
            .build_agent(&ready.user.name, &ready.user.id.mention().to_string())
        {
            Ok(agent) => self.state.install_agent(agent).await,
            Err(err) => error!(error = %err, "could not build the agent"),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        self.handle(ctx, msg, None).await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        old_if_available: Option<Message>,
        new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        // embeds resolving also fire updates, with no content change
        if event.content.is_none() {
            return;
        }
        let msg = match new {
            Some(msg) => msg,
            None => match event.channel_id.message(&ctx.http, event.id).await {
                Ok(msg) => msg,
                Err(err) => {
                    warn!(message = %event.id, error = %err, "could not fetch edited message");
                    return;
                }
            },
        };
        let previous = old_if_available.map(|old| old.content);
        self.handle(ctx, msg, Some(previous.unwrap_or_default())).await;
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let Some(welcome) = &self.state.settings.discord.welcome else {
            return;
        };
        let text = welcome_text(
            &self.state.settings.discord.server_name,
            &new_member.mention().to_string(),
            &ChannelId::new(welcome.rules_channel_id).mention().to_string(),
            &welcome.emoji,
        );
        if let Err(err) = ChannelId::new(welcome.channel_id)
            .say(&ctx.http, text)
            .await
        {
            warn!(member = %new_member.user.name, error = %err, "could not send welcome");
        }
    }

    async fn reaction_add(&self, ctx: Context, add_reaction: Reaction) {
        self.vote(&ctx, &add_reaction, 1).await;
    }

    async fn reaction_remove(&self, ctx: Context, removed_reaction: Reaction) {
        self.vote(&ctx, &removed_reaction, -1).await;
    }
}
