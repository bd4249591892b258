use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use rusqlite::Connection;
use surveyengine_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use surveyengine_core::config::{SurveyConfig, TemplateStoreKind};
use surveyengine_core::error::{Result, SurveyError};
use surveyengine_core::resolver::TemplateLoader;
use surveyengine_graph::{GraphExecutor, HttpOracle, Oracle};
use surveyengine_store::{ChatLogWriter, ConversationStore, FileTemplateLoader, HostStore, SqliteHostLoader, TemplateStore};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Resolves templates from whichever backend `template_store.kind` selects.
/// Host lookups are always sqlite-backed — the source has no file-based
/// host fixture format.
pub enum TemplateBackend {
    File(FileTemplateLoader),
    Database(TemplateStore),
}

impl TemplateLoader for TemplateBackend {
    fn get(&self, template_id: &str) -> Result<surveyengine_core::domain::Template> {
        match self {
            TemplateBackend::File(loader) => loader.get(template_id),
            TemplateBackend::Database(store) => store.get(template_id),
        }
    }
}

pub type SessionHandle = Arc<Mutex<surveyengine_core::domain::SessionState>>;

/// Central shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: SurveyConfig,
    pub templates: TemplateBackend,
    pub hosts: HostStore,
    /// Concrete handle kept alongside the trait object so the TTL sweep
    /// task (which needs `sweep_expired`, not on the trait) can share it.
    pub checkpoint_store: Arc<InMemoryCheckpointStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub executor: GraphExecutor,
    pub chat_log: ChatLogWriter,
    pub conversations: ConversationStore,
    /// Live graph instances keyed by `template_id:conversation_id`, the Rust
    /// shape of the source's `template_graph_cache` dict.
    pub sessions: DashMap<String, SessionHandle>,
    /// In-flight `drive()` tasks keyed by session cache key. Shutdown cancels
    /// every token so a server stop doesn't leave a turn half-written.
    pub active_operations: DashMap<String, CancellationToken>,
}

impl AppState {
    pub fn new(config: SurveyConfig) -> anyhow::Result<Self> {
        let templates = match config.template_store.kind {
            TemplateStoreKind::File => TemplateBackend::File(FileTemplateLoader::load(&config.template_store.file_path)?),
            TemplateStoreKind::Database => {
                TemplateBackend::Database(TemplateStore::new(Connection::open(&config.database.path)?)?)
            }
        };
        let hosts = HostStore::new(Connection::open(&config.database.path)?)?;
        let checkpoint_store = InMemoryCheckpointStore::new(config.checkpoint.ttl_secs);
        let checkpoints: Arc<dyn CheckpointStore> = checkpoint_store.clone();
        let oracle: Arc<dyn Oracle> = Arc::new(HttpOracle::new(&config.oracle));
        let executor = GraphExecutor::new(oracle);
        let chat_log = ChatLogWriter::new(&config.chat_log.directory)?;
        let conversations = ConversationStore::new(Connection::open(&config.database.path)?)?;

        Ok(Self {
            config,
            templates,
            hosts,
            checkpoint_store,
            checkpoints,
            executor,
            chat_log,
            conversations,
            sessions: DashMap::new(),
            active_operations: DashMap::new(),
        })
    }

    /// Cancel every in-flight `drive()` task, for graceful shutdown.
    pub fn cancel_all_operations(&self) {
        for entry in self.active_operations.iter() {
            entry.value().cancel();
        }
    }

    pub fn host_loader(&self) -> SqliteHostLoader<'_> {
        SqliteHostLoader(&self.hosts)
    }

    pub fn cache_key(template_id: &str, conversation_id: &str) -> String {
        format!("{template_id}:{conversation_id}")
    }

    /// Resolve the effective template, mapping lookup failures to the
    /// domain error the HTTP layer already knows how to render.
    pub fn resolve_template(&self, template_id: &str) -> Result<surveyengine_core::domain::EffectiveTemplate> {
        surveyengine_core::resolver::resolve(template_id, &self.templates, &self.host_loader())
    }

    /// Rehydrate a session from its latest checkpoint when it is absent
    /// from the in-process cache (e.g. after a restart, or handled by a
    /// different replica).
    pub async fn rehydrate(&self, thread_id: &str) -> Result<SessionHandle> {
        let state = self
            .checkpoints
            .get_latest(thread_id)
            .await
            .map_err(|e| SurveyError::Checkpoint(e.to_string()))?
            .ok_or_else(|| SurveyError::SessionNotFound(thread_id.to_string()))?;
        Ok(Arc::new(Mutex::new(state)))
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/api/survey/chat/stream", post(crate::http::survey::chat_stream))
        .route("/api/survey/chat/continue", post(crate::http::survey::chat_continue))
        .route("/api/survey/chat/history", get(crate::http::survey::chat_history))
        .route("/api/survey/chat/history/{conversation_id}", get(crate::http::survey::chat_history_detail))
        .route(
            "/api/template/templates",
            get(crate::http::template::list_templates).post(crate::http::template::create_template),
        )
        .route(
            "/api/template/templates/{id}",
            get(crate::http::template::get_template)
                .put(crate::http::template::update_template)
                .delete(crate::http::template::delete_template),
        )
        .route(
            "/api/host/hosts",
            get(crate::http::host::list_hosts).post(crate::http::host::create_host),
        )
        .route(
            "/api/host/hosts/{id}",
            get(crate::http::host::get_host).put(crate::http::host::update_host).delete(crate::http::host::delete_host),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
