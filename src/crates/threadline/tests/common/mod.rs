//! Common test utilities and setup

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use llm::{ChatModel, ChatRequest, LlmError, TextStream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use thread_context::{
    CharEstimateCounter, ContextAssembler, ContextError, ContextTrimmer, MemoryFact, MemoryInjector,
    MemoryStore, ModelRegistry, ModelSpec, ThreadReconstructor, TokenizerRegistry, TurnExchange,
};
use threadline::db::Database;
use threadline::{ChatService, ChatSettings, LazyDatabase, SubmissionValidator, TitleGenerator};

static TEST_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Title returned for every title request
pub const SCRIPTED_TITLE: &str = "Scripted Title";

/// Create a migrated test database with a unique name
pub async fn setup_test_db() -> (TempDir, Arc<Database>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = temp_dir.path().join(format!("test_{}.db", counter));

    let db = Database::initialize(&db_path, 5)
        .await
        .expect("Failed to create test database");

    (temp_dir, Arc::new(db))
}

/// One scripted model answer
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these chunks
    Chunks(Vec<String>),
    /// Refuse to start the stream
    Fail,
    /// Yield these chunks, then fail mid-stream
    BreakAfter(Vec<String>),
}

impl Script {
    pub fn reply(text: &str) -> Self {
        Self::Chunks(text.split_inclusive(' ').map(str::to_string).collect())
    }
}

/// Chat model that plays back queued scripts and records every request.
///
/// Title requests (max_tokens = 15) always get [`SCRIPTED_TITLE`] and do not
/// consume a script. An empty queue answers "ok".
#[derive(Default)]
pub struct ScriptedChat {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Non-title requests, in order
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.max_tokens != Some(15))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn stream_chat(&self, request: ChatRequest) -> llm::Result<TextStream> {
        let is_title = request.max_tokens == Some(15);
        self.requests.lock().unwrap().push(request);

        if is_title {
            return Ok(Box::pin(stream::iter(vec![Ok(SCRIPTED_TITLE.to_string())])));
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Chunks(vec!["ok".to_string()]));

        match script {
            Script::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok)))),
            Script::Fail => Err(LlmError::ProviderError("scripted failure".to_string())),
            Script::BreakAfter(chunks) => {
                let mut items: Vec<llm::Result<String>> = chunks.into_iter().map(Ok).collect();
                items.push(Err(LlmError::StreamError("connection reset".to_string())));
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }
}

/// Memory store with fixed facts that records saves and deletions
#[derive(Default)]
pub struct ScriptedMemory {
    pub facts: Vec<String>,
    pub fail: bool,
    pub searches: Mutex<Vec<(String, String)>>,
    pub saved: Mutex<Vec<(TurnExchange, String)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl ScriptedMemory {
    pub fn with_facts(facts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            facts: facts.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl MemoryStore for ScriptedMemory {
    async fn search(&self, query: &str, user_id: &str) -> thread_context::Result<Vec<MemoryFact>> {
        self.searches
            .lock()
            .unwrap()
            .push((query.to_string(), user_id.to_string()));
        if self.fail {
            return Err(ContextError::Memory("memory service unavailable".to_string()));
        }
        Ok(self.facts.iter().map(MemoryFact::new).collect())
    }

    async fn add(&self, exchange: &TurnExchange, user_id: &str) -> thread_context::Result<()> {
        if self.fail {
            return Err(ContextError::Memory("memory service unavailable".to_string()));
        }
        self.saved
            .lock()
            .unwrap()
            .push((exchange.clone(), user_id.to_string()));
        Ok(())
    }

    async fn delete_all(&self, user_id: &str) -> thread_context::Result<()> {
        if self.fail {
            return Err(ContextError::Memory("memory service unavailable".to_string()));
        }
        self.deleted.lock().unwrap().push(user_id.to_string());
        Ok(())
    }
}

/// Small model table: built-ins plus a 120-token "tiny" model
pub fn test_models() -> ModelRegistry {
    ModelRegistry::builtin().with_model(ModelSpec::new("tiny", 120))
}

/// Everything a service test needs
pub struct TestHarness {
    pub _temp_dir: TempDir,
    pub db: Arc<Database>,
    pub chat: Arc<ScriptedChat>,
    pub service: ChatService,
}

/// Service over a temp database with scripted collaborators.
///
/// Tokens are estimated at four characters each; the response reserve is 20.
pub async fn setup_service(memory: Option<Arc<dyn MemoryStore>>) -> TestHarness {
    let (temp_dir, db) = setup_test_db().await;
    let chat = ScriptedChat::new();

    let estimate: Arc<CharEstimateCounter> = Arc::new(CharEstimateCounter::default());
    let trimmer = Arc::new(ContextTrimmer::new(test_models(), TokenizerRegistry::new(estimate)));
    let memory = match memory {
        Some(store) => MemoryInjector::new(store),
        None => MemoryInjector::disabled(),
    };
    let assembler = Arc::new(
        ContextAssembler::new(trimmer, ThreadReconstructor::by_reference(), memory)
            .with_system_prompt("You are a test assistant."),
    );

    let settings = ChatSettings {
        default_model: "gpt-3.5-turbo".to_string(),
        temperature: 0.7,
        response_reserve: 20,
    };

    let service = ChatService::new(
        LazyDatabase::from_database(db.clone()),
        assembler,
        chat.clone(),
        TitleGenerator::new(chat.clone(), "gpt-3.5-turbo"),
        SubmissionValidator::default(),
        settings,
    );

    TestHarness {
        _temp_dir: temp_dir,
        db,
        chat,
        service,
    }
}

/// Count rows in a table
pub async fn count_rows(db: &Database, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db.pool())
        .await
        .unwrap()
}
