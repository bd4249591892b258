use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use surveyengine_core::domain::{Message, NodeLabel, SessionState};
use surveyengine_core::error::SurveyError;
use surveyengine_graph::ExecOutcome;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::app::{AppState, SessionHandle};
use crate::error::error_response;

#[derive(Deserialize)]
pub struct ChatStreamRequest {
    pub conversation_id: String,
    pub message: String,
    pub template_id: String,
}

#[derive(Deserialize)]
pub struct ChatContinueRequest {
    pub conversation_id: String,
    pub user_response: String,
    pub template_id: String,
}

type EventStream = Sse<std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>>;

/// POST /api/survey/chat/stream — start (or restart) a conversation.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatStreamRequest>,
) -> Result<EventStream, (StatusCode, Json<crate::error::ErrorBody>)> {
    let effective = state.resolve_template(&req.template_id).map_err(error_response)?;

    let initial = SessionState {
        thread_id: req.conversation_id.clone(),
        messages: vec![
            Message::system(effective.system_prompt.clone()),
            Message::assistant(effective.welcome_message.clone()),
            Message::human(req.message.clone()),
        ],
        steps: effective.steps.clone(),
        system_prompt: effective.system_prompt.clone(),
        end_message: effective.end_message.clone(),
        max_turns: effective.max_turns,
        current_step: NodeLabel::QuestionNode(0),
        current_step_messages: vec![],
    };

    state
        .conversations
        .upsert(&req.conversation_id, &req.template_id, initial.messages.len() as u32)
        .map_err(error_response)?;

    let key = AppState::cache_key(&req.template_id, &req.conversation_id);
    let session: SessionHandle = Arc::new(tokio::sync::Mutex::new(initial));
    state.sessions.insert(key.clone(), session.clone());

    Ok(drive(
        state,
        key,
        req.template_id,
        session.try_lock_owned().expect("freshly created session cannot be contended"),
        None,
    ))
}

/// POST /api/survey/chat/continue — deliver the user's reply to the
/// session's current answer node.
pub async fn chat_continue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatContinueRequest>,
) -> Result<EventStream, (StatusCode, Json<crate::error::ErrorBody>)> {
    let key = AppState::cache_key(&req.template_id, &req.conversation_id);

    let session = match state.sessions.get(&key).map(|s| s.value().clone()) {
        Some(s) => s,
        None => {
            let rehydrated = state.rehydrate(&req.conversation_id).await.map_err(error_response)?;
            state.sessions.insert(key.clone(), rehydrated.clone());
            rehydrated
        }
    };

    let guard = session
        .clone()
        .try_lock_owned()
        .map_err(|_| error_response(SurveyError::SessionConflict(req.conversation_id.clone())))?;

    Ok(drive(state, key, req.template_id, guard, Some(req.user_response)))
}

/// Drive the executor to its next suspend/completion point, forwarding
/// emitted assistant chunks to the client as they are produced. Runs in a
/// spawned task so the handler can return the streaming response
/// immediately; the task owns the session's lock for the turn's duration.
fn drive(
    app: Arc<AppState>,
    key: String,
    template_id: String,
    mut guard: tokio::sync::OwnedMutexGuard<SessionState>,
    resume: Option<String>,
) -> EventStream {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let cancel = CancellationToken::new();
    app.active_operations.insert(key.clone(), cancel.clone());

    tokio::spawn(async move {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                app.active_operations.remove(&key);
                return;
            }
            outcome = async {
                match resume {
                    Some(reply) => app.executor.resume(&mut guard, &reply, app.checkpoints.as_ref(), &tx).await,
                    None => app.executor.run_until_suspend(&mut guard, app.checkpoints.as_ref(), &tx).await,
                }
            } => outcome,
        };

        app.active_operations.remove(&key);

        match outcome {
            Ok(ExecOutcome::Suspended) => {
                let _ = app.conversations.upsert(&guard.thread_id, &template_id, guard.messages.len() as u32);
            }
            Ok(ExecOutcome::Completed { transcript }) => {
                if let Err(e) = app.chat_log.save(&guard.thread_id, &transcript) {
                    warn!(error = %e, thread_id = %guard.thread_id, "failed to write chat log");
                }
                let _ = app.conversations.upsert(&guard.thread_id, &template_id, transcript.len() as u32);
                // Let the final SSE frame reach the client before the checkpoint trail disappears.
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                if let Err(e) = app.checkpoints.purge(&guard.thread_id).await {
                    warn!(error = %e, thread_id = %guard.thread_id, "failed to purge checkpoints");
                }
                app.sessions.remove(&key);
            }
            Err(e) => {
                warn!(error = %e, thread_id = %guard.thread_id, "graph execution failed");
                let _ = tx.send(format!("error: {e}"));
            }
        }
    });

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            let encoded = serde_json::to_string(&chunk).unwrap_or_default();
            yield Ok(Event::default().data(encoded));
        }
    };

    Sse::new(Box::pin(stream) as std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>).keep_alive(KeepAlive::default())
}

#[derive(Serialize)]
pub struct ChatHistorySummary {
    pub conversation_id: String,
    pub timestamp: String,
    pub created_at: String,
    pub message_count: usize,
}

/// GET /api/survey/chat/history — every completed conversation, newest first.
pub async fn chat_history(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ChatHistorySummary>>, (StatusCode, Json<crate::error::ErrorBody>)> {
    let summaries = state.chat_log.list().map_err(error_response)?;
    Ok(Json(
        summaries
            .into_iter()
            .map(|s| ChatHistorySummary {
                conversation_id: s.conversation_id,
                timestamp: s.timestamp,
                created_at: s.created_at,
                message_count: s.message_count,
            })
            .collect(),
    ))
}

/// GET /api/survey/chat/history/{conversation_id} — full transcript, HUMAN
/// and ASSISTANT messages only.
pub async fn chat_history_detail(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>, (StatusCode, Json<crate::error::ErrorBody>)> {
    let detail = state
        .chat_log
        .read(&conversation_id)
        .map_err(error_response)?
        .ok_or_else(|| error_response(SurveyError::SessionNotFound(conversation_id.clone())))?;
    Ok(Json(detail.messages))
}
