//! Chat service: prompt submission, streamed generation and conversation upkeep
//!
//! Every operation takes the acting user's id and refuses to touch
//! conversations owned by someone else (reported as not found).

use crate::config::ThreadlineConfig;
use crate::db::LazyDatabase;
use crate::error::{Result, ThreadlineError};
use crate::models::{Conversation, ConversationHistory};
use crate::repositories::{ConversationRepository, PromptPlacement, ResponseRepository, TurnRepository};
use crate::services::submission::{PromptSubmission, SubmissionValidator};
use crate::services::title::TitleGenerator;
use chrono::Utc;
use futures::{Stream, StreamExt};
use llm::{
    ChatModel, ChatRequest, HttpFileResolver, Mem0Client, MemoryClientConfig, OpenAiClient,
    RemoteLlmConfig, TextStream,
};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thread_context::{
    AssembledContext, ContextAssembler, ContextRequest, ContextTrimmer, Feedback, MemoryInjector,
    PromptRecord, ResponseRecord, ResponseState, ResponseVersion, ThreadReconstructor, TurnExchange,
};
use tracing::{debug, info, warn};

/// Events of one generation
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// Incremental answer text
    Delta(String),
    /// The full answer was stored as a new version
    Completed {
        response_id: String,
        /// 1-based number of the stored version
        version: usize,
        text: String,
    },
}

/// Stream of generation events. Dropping it before `Completed` cancels the
/// model call and stores nothing.
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent>> + Send>>;

/// A started generation
pub struct Generation {
    pub response_id: String,
    pub model: String,
    /// Context sent to the model
    pub context: AssembledContext,
    pub events: GenerationStream,
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("response_id", &self.response_id)
            .field("model", &self.model)
            .field("messages", &self.context.messages.len())
            .finish()
    }
}

/// Result of storing a prompt
#[derive(Debug, Clone)]
pub struct SubmittedPrompt {
    pub conversation: Conversation,
    pub prompt: PromptRecord,
    pub placement: PromptPlacement,
    /// Whether the conversation was created by this submission
    pub created: bool,
}

/// Generation settings taken from configuration
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_model: String,
    pub temperature: f32,
    pub response_reserve: usize,
}

impl ChatSettings {
    pub fn from_config(config: &ThreadlineConfig) -> Self {
        Self {
            default_model: config.llm.default_model.clone(),
            temperature: config.llm.temperature,
            response_reserve: config.llm.response_reserve,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&ThreadlineConfig::default())
    }
}

struct Repositories {
    conversations: ConversationRepository,
    turns: TurnRepository,
    responses: ResponseRepository,
}

/// Chat operations over the conversation store
#[derive(Clone)]
pub struct ChatService {
    db: LazyDatabase,
    assembler: Arc<ContextAssembler>,
    chat: Arc<dyn ChatModel>,
    titles: TitleGenerator,
    validator: SubmissionValidator,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        db: LazyDatabase,
        assembler: Arc<ContextAssembler>,
        chat: Arc<dyn ChatModel>,
        titles: TitleGenerator,
        validator: SubmissionValidator,
        settings: ChatSettings,
    ) -> Self {
        Self {
            db,
            assembler,
            chat,
            titles,
            validator,
            settings,
        }
    }

    /// Wire the HTTP collaborators described by `config`
    pub fn from_config(config: &ThreadlineConfig, db: LazyDatabase) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm.timeout_secs);

        let api_key = match config.llm_api_key() {
            Some(key) => key.to_string(),
            None => {
                warn!("No chat API key configured; generation requests will be rejected");
                String::new()
            }
        };
        let chat: Arc<dyn ChatModel> = Arc::new(OpenAiClient::new(
            RemoteLlmConfig::new(api_key, config.llm.base_url.clone()).with_timeout(timeout),
        )?);

        let memory = match (config.memory.enabled, config.memory_api_key()) {
            (true, Some(key)) => MemoryInjector::new(Arc::new(Mem0Client::new(
                MemoryClientConfig::new(key, config.memory.base_url.clone())
                    .with_timeout(Duration::from_secs(config.memory.timeout_secs)),
            )?)),
            (true, None) => {
                warn!("Memory is enabled but no API key is configured; continuing without memory");
                MemoryInjector::disabled()
            }
            (false, _) => MemoryInjector::disabled(),
        };

        let trimmer = Arc::new(ContextTrimmer::new(
            config.model_registry(),
            config.tokenizer_registry()?,
        ));
        let reconstructor = ThreadReconstructor::new(Arc::new(HttpFileResolver::new(timeout)?));
        let assembler = Arc::new(
            ContextAssembler::new(trimmer, reconstructor, memory)
                .with_system_prompt(config.llm.system_prompt.clone()),
        );
        let titles = TitleGenerator::new(chat.clone(), config.llm.title_model.clone());

        Ok(Self::new(
            db,
            assembler,
            chat,
            titles,
            SubmissionValidator::new(config.limits.clone()),
            ChatSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    fn memory(&self) -> &MemoryInjector {
        self.assembler.memory()
    }

    async fn repositories(&self) -> Result<Repositories> {
        let db = self.db.get().await?;
        Ok(Repositories {
            conversations: ConversationRepository::new(db.clone()),
            turns: TurnRepository::new(db.clone()),
            responses: ResponseRepository::new(db),
        })
    }

    /// Conversation `id`, if it belongs to `user_id`
    async fn owned_conversation(&self, repos: &Repositories, user_id: &str, id: &str) -> Result<Conversation> {
        match repos.conversations.find_by_id(id).await? {
            Some(conversation) if conversation.is_owned_by(user_id) => Ok(conversation),
            _ => Err(ThreadlineError::NotFound(format!("Conversation {}", id))),
        }
    }

    /// Prompt `id` and its conversation, if owned by `user_id`
    async fn owned_prompt(
        &self,
        repos: &Repositories,
        user_id: &str,
        id: &str,
    ) -> Result<(Conversation, PromptRecord)> {
        let prompt = repos.turns.find_prompt(id).await?;
        let conversation = self
            .owned_conversation(repos, user_id, &prompt.conversation_id)
            .await
            .map_err(|e| rename_not_found(e, format!("Prompt {}", id)))?;
        Ok((conversation, prompt))
    }

    fn resolve_model(&self, model: Option<&str>) -> Result<String> {
        let model = model.unwrap_or(&self.settings.default_model).to_string();
        // Unknown models are rejected before anything is stored
        self.assembler.trimmer().models().get(&model)?;
        Ok(model)
    }

    /// Validate and store a prompt, creating the conversation on first use
    pub async fn submit_prompt(&self, submission: PromptSubmission) -> Result<SubmittedPrompt> {
        self.validator.validate(&submission)?;
        let repos = self.repositories().await?;

        let (conversation, created) = match &submission.conversation_id {
            Some(id) => (self.owned_conversation(&repos, &submission.user_id, id).await?, false),
            None => {
                let title = self.titles.generate(&submission.text).await;
                let conversation = Conversation::new(&submission.user_id).with_title(title);
                repos.conversations.create(&conversation).await?;
                info!(
                    conversation_id = %conversation.id,
                    user_id = %submission.user_id,
                    title = %conversation.title,
                    "Created conversation"
                );
                (conversation, true)
            }
        };

        let mut prompt = PromptRecord::new(&conversation.id, submission.text);
        prompt.attachments = submission.attachments;
        if let Some(previous) = submission.previous_prompt_id {
            prompt = prompt.superseding(previous);
        }

        let placement = repos.turns.append_prompt(&prompt).await?;
        let conversation = repos.conversations.get(&conversation.id).await?;

        Ok(SubmittedPrompt {
            conversation,
            prompt,
            placement,
            created,
        })
    }

    /// Start answering a stored prompt with a new response record
    pub async fn respond(&self, user_id: &str, prompt_id: &str, model: Option<&str>) -> Result<Generation> {
        let model = self.resolve_model(model)?;
        let repos = self.repositories().await?;
        let (_, prompt) = self.owned_prompt(&repos, user_id, prompt_id).await?;

        let response = ResponseRecord::pending(&prompt.id);
        repos.responses.create(&response).await?;
        debug!(response_id = %response.id, prompt_id = %prompt.id, "Created pending response");

        self.generate(repos, user_id, prompt, response.id, model).await
    }

    /// Generate another version of an existing response
    pub async fn regenerate(&self, user_id: &str, response_id: &str, model: Option<&str>) -> Result<Generation> {
        let model = self.resolve_model(model)?;
        let repos = self.repositories().await?;
        let response = repos.responses.find_by_id(response_id).await?;
        let (_, prompt) = self
            .owned_prompt(&repos, user_id, &response.prompt_id)
            .await
            .map_err(|e| rename_not_found(e, format!("Response {}", response_id)))?;

        debug!(
            response_id = %response.id,
            versions = response.versions.len(),
            "Regenerating response"
        );
        self.generate(repos, user_id, prompt, response.id, model).await
    }

    /// Build the context and open the model stream
    async fn generate(
        &self,
        repos: Repositories,
        user_id: &str,
        prompt: PromptRecord,
        response_id: String,
        model: String,
    ) -> Result<Generation> {
        let turns = repos.turns.load_turns(&prompt.conversation_id).await?;
        let context = self
            .assembler
            .assemble(
                ContextRequest::new(&model, user_id, &turns, &prompt)
                    .with_reserve(self.settings.response_reserve),
            )
            .await?;

        let request = ChatRequest::new(model.clone(), context.to_messages())
            .with_temperature(self.settings.temperature);
        let deltas = self.chat.stream_chat(request).await?;

        let events = generation_events(
            deltas,
            repos.responses,
            self.memory().clone(),
            user_id.to_string(),
            prompt.text.clone(),
            response_id.clone(),
            model.clone(),
        );

        Ok(Generation {
            response_id,
            model,
            context,
            events: Box::pin(events),
        })
    }

    /// Context that would be sent for `prompt_id`, without calling the model
    pub async fn context_preview(
        &self,
        user_id: &str,
        prompt_id: &str,
        model: Option<&str>,
    ) -> Result<AssembledContext> {
        let model = self.resolve_model(model)?;
        let repos = self.repositories().await?;
        let (_, prompt) = self.owned_prompt(&repos, user_id, prompt_id).await?;
        let turns = repos.turns.load_turns(&prompt.conversation_id).await?;

        Ok(self
            .assembler
            .assemble(
                ContextRequest::new(&model, user_id, &turns, &prompt)
                    .with_reserve(self.settings.response_reserve),
            )
            .await?)
    }

    /// Set feedback on a response that has been answered at least once
    pub async fn set_feedback(&self, user_id: &str, response_id: &str, feedback: Feedback) -> Result<()> {
        let repos = self.repositories().await?;
        let response = repos.responses.find_by_id(response_id).await?;
        self.owned_prompt(&repos, user_id, &response.prompt_id)
            .await
            .map_err(|e| rename_not_found(e, format!("Response {}", response_id)))?;

        repos.responses.set_feedback(response_id, feedback).await?;
        debug!(response_id = %response_id, feedback = %feedback, "Set feedback");
        Ok(())
    }

    pub async fn rename(&self, user_id: &str, conversation_id: &str, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ThreadlineError::Validation("Title cannot be empty".to_string()));
        }
        let repos = self.repositories().await?;
        self.owned_conversation(&repos, user_id, conversation_id).await?;
        repos.conversations.rename(conversation_id, title).await
    }

    /// Conversations of a user, most recently active first
    pub async fn list(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.repositories().await?.conversations.list_for_user(user_id).await
    }

    pub async fn history(&self, user_id: &str, conversation_id: &str) -> Result<ConversationHistory> {
        let repos = self.repositories().await?;
        let conversation = self.owned_conversation(&repos, user_id, conversation_id).await?;
        let turns = repos.turns.load_turns(conversation_id).await?;
        Ok(ConversationHistory::new(conversation, &turns))
    }

    /// Delete a conversation and everything in it
    pub async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        let repos = self.repositories().await?;
        self.owned_conversation(&repos, user_id, conversation_id).await?;
        repos.conversations.delete_cascade(conversation_id).await?;
        Ok(())
    }

    /// Delete every conversation of a user; returns how many were removed
    pub async fn delete_all(&self, user_id: &str) -> Result<usize> {
        self.repositories()
            .await?
            .conversations
            .delete_all_for_user(user_id)
            .await
    }

    /// Delete the user's long-term memories. False when memory is disabled.
    pub async fn forget(&self, user_id: &str) -> Result<bool> {
        let forgotten = self.memory().forget(user_id).await?;
        if forgotten {
            info!(user_id = %user_id, "Deleted user memories");
        }
        Ok(forgotten)
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("db", &self.db)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Report a missing parent as the record the caller asked for
fn rename_not_found(err: ThreadlineError, what: String) -> ThreadlineError {
    match err {
        ThreadlineError::NotFound(_) => ThreadlineError::NotFound(what),
        other => other,
    }
}

/// Forward deltas, then store the full text as a version and offer the
/// exchange to memory.
fn generation_events(
    mut deltas: TextStream,
    responses: ResponseRepository,
    memory: MemoryInjector,
    user_id: String,
    prompt_text: String,
    response_id: String,
    model: String,
) -> impl Stream<Item = Result<GenerationEvent>> + Send {
    async_stream::try_stream! {
        let mut text = String::new();
        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            text.push_str(&delta);
            yield GenerationEvent::Delta(delta);
        }

        let version = ResponseVersion {
            text: text.clone(),
            model,
            created_at: Utc::now(),
        };
        let state = responses.append_version(&response_id, &version).await?;
        let version = match state {
            ResponseState::Versioned(n) => n,
            ResponseState::Pending => 0,
        };

        memory
            .remember(&TurnExchange::new(prompt_text, text.clone()), &user_id)
            .await;

        yield GenerationEvent::Completed {
            response_id,
            version,
            text,
        };
    }
}
