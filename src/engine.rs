//! Turn orchestration.
//!
//! [`ChatEngine`] is the explicit context object threaded through every
//! call: session gating, state store, and model clients travel together
//! instead of living in ambient globals. One turn runs: append user
//! message, embed, retrieve, assemble bounded context, build prompt,
//! stream the answer, then commit the assistant message atomically on
//! clean completion only.

use crate::actions::{ActionRequest, ActionRunner, ActionTicket};
use crate::config::EngineConfig;
use crate::context::{assemble_context, history_estimate};
use crate::embedding::{EmbeddingService, HttpEmbeddingService};
use crate::error::{EngineError, GenerationError, RetrievalError};
use crate::generation::{CompletionService, HttpCompletionService};
use crate::persist::{ChatStore, MemoryChatStore, PersistenceGate};
use crate::prompt::build_prompt;
use crate::render::{RenderState, SharedView, project};
use crate::retrieval::{HttpVectorIndex, MetadataFilter, VectorIndex};
use crate::session::{Session, SessionProvider};
use crate::state::ConversationStore;
use crate::stream::{self, StreamHandle, StreamReader};
use crate::types::{Message, MessageContent, Role};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

/// Live output of one turn: the committed user message id, the id the
/// assistant message will carry if the turn completes, and the delta
/// stream. Dropping `deltas` cancels the turn without a commit.
pub struct TurnHandle {
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub deltas: StreamReader<String>,
}

pub struct ChatEngine {
    config: EngineConfig,
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn CompletionService>,
    store: Arc<ConversationStore>,
    gate: Arc<PersistenceGate>,
    actions: ActionRunner,
}

impl ChatEngine {
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn CompletionService>,
        chat_store: Arc<dyn ChatStore>,
    ) -> Self {
        let gate = Arc::new(PersistenceGate::new(
            chat_store,
            config.title_max_chars,
            config.persist_timeout,
        ));
        Self {
            config,
            embedder,
            index,
            model,
            store: Arc::new(ConversationStore::new()),
            gate,
            actions: ActionRunner::new(),
        }
    }

    /// Wire up HTTP clients from environment variables, with an
    /// in-memory chat store. Requires `MAGPIE_EMBEDDING_ENDPOINT`,
    /// `MAGPIE_INDEX_ENDPOINT`, and `MAGPIE_COMPLETION_ENDPOINT`.
    pub fn from_env(config: EngineConfig) -> anyhow::Result<Self> {
        // Pick up a .env file when present; real env vars win.
        let _ = dotenvy::dotenv();
        let api_key = std::env::var("MAGPIE_API_KEY").ok();
        let index_key = std::env::var("MAGPIE_INDEX_API_KEY").ok();

        let embedder = Arc::new(HttpEmbeddingService::new(
            required_env("MAGPIE_EMBEDDING_ENDPOINT")?,
            config.embedding_model.clone(),
            api_key.clone(),
        ));
        let index = Arc::new(HttpVectorIndex::new(
            required_env("MAGPIE_INDEX_ENDPOINT")?,
            config.namespace.clone(),
            index_key,
        ));
        let model = Arc::new(HttpCompletionService::new(
            required_env("MAGPIE_COMPLETION_ENDPOINT")?,
            config.generation_model.clone(),
            config.summarization_model.clone(),
            api_key,
        ));
        Ok(Self::new(
            config,
            embedder,
            index,
            model,
            Arc::new(MemoryChatStore::new()),
        ))
    }

    /// Run one conversation turn.
    ///
    /// The user message is appended before any external call, so a
    /// failing turn still preserves it; no assistant message is
    /// appended unless the stream completes cleanly.
    pub async fn submit_user_message(
        &self,
        session: Option<&Session>,
        chat_id: &str,
        text: String,
        view: &SharedView,
    ) -> Result<TurnHandle, EngineError> {
        let user_message = Message::text(Role::User, text.clone());
        let user_message_id = user_message.id.clone();
        view.push_user(&user_message_id, &text);
        self.store
            .append(session, chat_id, vec![user_message.clone()])
            .await;

        let assistant_message_id = Message::allocate_id();

        let prompt = match self
            .prepare_prompt(session, chat_id, &user_message, &text)
            .await
        {
            Ok(prompt) => prompt,
            Err(e) => {
                view.fail_assistant(&assistant_message_id, &e.to_string());
                return Err(e);
            }
        };

        let deadline = Instant::now() + self.config.generation_timeout;
        let upstream = match timeout_at(deadline, self.model.stream(&prompt)).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) => {
                view.fail_assistant(&assistant_message_id, &e.to_string());
                return Err(e.into());
            }
            Err(_) => {
                let e = GenerationError::Timeout;
                view.fail_assistant(&assistant_message_id, &e.to_string());
                return Err(e.into());
            }
        };

        let (handle, deltas) = stream::channel::<String>();
        let turn = Turn {
            assistant_message_id: assistant_message_id.clone(),
            session: session.cloned(),
            chat_id: chat_id.to_string(),
            store: self.store.clone(),
            gate: self.gate.clone(),
            view: view.clone(),
            deadline,
        };
        tokio::spawn(turn.run(upstream, handle));

        Ok(TurnHandle {
            user_message_id,
            assistant_message_id,
            deltas,
        })
    }

    async fn prepare_prompt(
        &self,
        session: Option<&Session>,
        chat_id: &str,
        user_message: &Message,
        text: &str,
    ) -> Result<crate::prompt::Prompt, EngineError> {
        let vector = timeout(self.config.embed_timeout, self.embedder.embed(text))
            .await
            .map_err(|_| RetrievalError::Timeout("embedding"))??;

        let filter = MetadataFilter::new();
        let passages = timeout(
            self.config.retrieval_timeout,
            self.index.query(&vector, self.config.top_k, &filter),
        )
        .await
        .map_err(|_| RetrievalError::Timeout("index query"))??;
        debug!(chat_id, passages = passages.len(), "retrieval complete");

        // Without a session the store is a no-op; the turn still runs,
        // grounded on the current message alone.
        let history = match self.store.get_state(session, chat_id).await {
            Some(state) => state.messages,
            None => vec![user_message.clone()],
        };

        let context = assemble_context(
            &passages,
            history_estimate(&history),
            &self.config,
            self.model.as_ref(),
        )
        .await?;

        Ok(build_prompt(&context, &history))
    }

    /// Dispatch a background action for this chat.
    pub async fn run_action(
        &self,
        session: Option<&Session>,
        chat_id: &str,
        request: ActionRequest,
        view: &SharedView,
    ) -> ActionTicket {
        self.actions
            .dispatch(
                request,
                session,
                chat_id,
                self.store.clone(),
                view.clone(),
                self.config.action_step_delay,
            )
            .await
    }

    /// Await the background task behind an action invocation.
    pub async fn join_action(&self, invocation_id: u64) {
        self.actions.join(invocation_id).await;
    }

    pub fn cancel_action(&self, invocation_id: u64) {
        self.actions.cancel(invocation_id);
    }

    /// Project the durable log into a fresh render state (cold replay).
    /// `None` without a session, like every state read.
    pub async fn replay(&self, session: Option<&Session>, chat_id: &str) -> Option<RenderState> {
        let state = self.store.get_state(session, chat_id).await?;
        Some(project(&state))
    }

    /// Rehydrate a chat from the durable store: resolve the current
    /// session from the provider, fetch its snapshot, load it into the
    /// state store, and project it. `None` when there is no session,
    /// the chat is unknown, or it belongs to another user.
    pub async fn restore(
        &self,
        provider: &dyn SessionProvider,
        chat_id: &str,
    ) -> Option<RenderState> {
        let session = provider.current_session()?;
        let snapshot = self.gate.fetch(chat_id).await?;
        if snapshot.user_id != session.user_id {
            debug!(chat_id, "restore denied: chat belongs to another user");
            return None;
        }
        self.store
            .load(Some(&session), chat_id, snapshot.messages)
            .await;
        self.replay(Some(&session), chat_id).await
    }

    pub fn state_store(&self) -> &ConversationStore {
        &self.store
    }
}

fn required_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{key} not set"))
}

/// Everything the detached turn task owns.
struct Turn {
    assistant_message_id: String,
    session: Option<Session>,
    chat_id: String,
    store: Arc<ConversationStore>,
    gate: Arc<PersistenceGate>,
    view: SharedView,
    deadline: Instant,
}

impl Turn {
    /// Pump upstream deltas into the handle and the live view, then
    /// commit all-or-nothing. Any failure or consumer disconnect leaves
    /// the conversation log exactly as it was before generation.
    async fn run(self, mut upstream: crate::generation::DeltaStream, handle: StreamHandle<String>) {
        let mut buffer = String::new();
        let mut opened = false;

        loop {
            let next = match timeout_at(self.deadline, upstream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    self.fail(GenerationError::Timeout);
                    return;
                }
            };
            match next {
                Some(Ok(delta)) => {
                    if !opened {
                        self.view.open_assistant(&self.assistant_message_id);
                        opened = true;
                    }
                    if !handle.update(delta.clone()) {
                        self.fail(GenerationError::Disconnected);
                        return;
                    }
                    self.view.extend_assistant(&self.assistant_message_id, &delta);
                    buffer.push_str(&delta);
                }
                Some(Err(e)) => {
                    self.fail(e);
                    return;
                }
                None => break,
            }
        }

        if !opened {
            self.view.open_assistant(&self.assistant_message_id);
        }
        handle.done(buffer.clone());
        self.view
            .seal_assistant(&self.assistant_message_id, &buffer);

        let assistant_message = Message::with_id(
            self.assistant_message_id.clone(),
            Role::Assistant,
            MessageContent::text(buffer),
        );
        self.store
            .append(self.session.as_ref(), &self.chat_id, vec![assistant_message])
            .await;
        self.store
            .finalize(self.session.as_ref(), &self.chat_id, &self.gate)
            .await;
    }

    fn fail(&self, error: GenerationError) {
        warn!(chat_id = %self.chat_id, error = %error, "turn aborted");
        self.view
            .fail_assistant(&self.assistant_message_id, &error.to_string());
        // Handle dropped unsealed: the consumer sees the stream end
        // without a Done event.
    }
}
