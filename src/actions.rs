//! Phased background actions.
//!
//! Simulated multi-step operations triggered mid-conversation, each an
//! exhaustive variant of [`ActionRequest`] with its own typed argument
//! shape. Every invocation gets its own append-then-seal handle,
//! decoupled from the main generation stream: the pending ticket
//! returns immediately and phase advances run on a detached task that
//! communicates only through the handle and a final append to the
//! conversation log.

use crate::render::SharedView;
use crate::session::Session;
use crate::state::ConversationStore;
use crate::stream::{self, StreamHandle, StreamReader};
use crate::types::{ActionPhase, Message, MessageContent, Role, ToolInvocation};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

const MAX_PURCHASE_QUANTITY: u32 = 1000;

/// Closed set of action kinds. New operations are new variants.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionRequest {
    ConfirmPurchase {
        symbol: String,
        price: f64,
        quantity: u32,
    },
}

impl ActionRequest {
    fn kind(&self) -> &'static str {
        match self {
            ActionRequest::ConfirmPurchase { .. } => "confirm_purchase",
        }
    }

    fn args(&self) -> serde_json::Value {
        match self {
            ActionRequest::ConfirmPurchase {
                symbol,
                price,
                quantity,
            } => json!({"symbol": symbol, "price": price, "quantity": quantity}),
        }
    }
}

/// One phase advance pushed to the invocation's handle.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionUpdate {
    pub invocation_id: u64,
    pub phase: ActionPhase,
    pub note: String,
}

/// Returned to the caller immediately, while phases advance in the
/// background.
pub struct ActionTicket {
    pub invocation_id: u64,
    pub updates: StreamReader<ActionUpdate>,
}

/// Spawns and tracks one background task per invocation id.
#[derive(Default)]
pub struct ActionRunner {
    counter: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl ActionRunner {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch an action. Invalid input is rejected synchronously,
    /// before any phase transition; valid input returns a pending
    /// ticket and advances on a detached task.
    pub async fn dispatch(
        &self,
        request: ActionRequest,
        session: Option<&Session>,
        chat_id: &str,
        store: Arc<ConversationStore>,
        view: SharedView,
        step_delay: Duration,
    ) -> ActionTicket {
        let invocation_id = self.counter.fetch_add(1, Ordering::Relaxed);
        let (handle, updates) = stream::channel::<ActionUpdate>();

        match request {
            ActionRequest::ConfirmPurchase {
                symbol,
                price,
                quantity,
            } => {
                let request = ActionRequest::ConfirmPurchase {
                    symbol: symbol.clone(),
                    price,
                    quantity,
                };
                handle.update(ActionUpdate {
                    invocation_id,
                    phase: ActionPhase::Pending,
                    note: format!("Purchasing {quantity} ${symbol}..."),
                });

                // Validated synchronously, before any phase transition.
                if quantity == 0 || quantity > MAX_PURCHASE_QUANTITY {
                    reject_purchase(
                        invocation_id,
                        &request,
                        handle,
                        session,
                        chat_id,
                        &store,
                        &view,
                    )
                    .await;
                } else {
                    let session = session.cloned();
                    let chat_id = chat_id.to_string();
                    let task = tokio::spawn(async move {
                        run_purchase(
                            invocation_id,
                            symbol,
                            price,
                            quantity,
                            handle,
                            session,
                            chat_id,
                            store,
                            view,
                            step_delay,
                        )
                        .await;
                    });
                    self.tasks
                        .lock()
                        .expect("action runner poisoned")
                        .insert(invocation_id, task);
                }
            }
        }

        ActionTicket {
            invocation_id,
            updates,
        }
    }

    /// Await the background task for an invocation, if still tracked.
    pub async fn join(&self, invocation_id: u64) {
        let task = self
            .tasks
            .lock()
            .expect("action runner poisoned")
            .remove(&invocation_id);
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Abort an in-flight invocation's task.
    pub fn cancel(&self, invocation_id: u64) {
        let task = self
            .tasks
            .lock()
            .expect("action runner poisoned")
            .remove(&invocation_id);
        if let Some(task) = task {
            task.abort();
            debug!(invocation_id, "action cancelled");
        }
    }
}

async fn reject_purchase(
    invocation_id: u64,
    request: &ActionRequest,
    handle: StreamHandle<ActionUpdate>,
    session: Option<&Session>,
    chat_id: &str,
    store: &ConversationStore,
    view: &SharedView,
) {
    let invocation = ToolInvocation {
        id: invocation_id,
        kind: request.kind().to_string(),
        args: request.args(),
        phase: ActionPhase::Rejected,
        result: Some(json!({"status": "rejected"})),
    };
    let tool_message = Message::new(
        Role::Tool,
        MessageContent::Tool {
            invocation: invocation.clone(),
        },
    );
    let system_message = Message::text(Role::System, "[User has selected an invalid quantity]");
    view.push_action(&tool_message.id, invocation);
    store
        .append(session, chat_id, vec![tool_message, system_message])
        .await;

    handle.done(ActionUpdate {
        invocation_id,
        phase: ActionPhase::Rejected,
        note: "Invalid quantity".to_string(),
    });
}

#[allow(clippy::too_many_arguments)]
async fn run_purchase(
    invocation_id: u64,
    symbol: String,
    price: f64,
    quantity: u32,
    handle: StreamHandle<ActionUpdate>,
    session: Option<Session>,
    chat_id: String,
    store: Arc<ConversationStore>,
    view: SharedView,
    step_delay: Duration,
) {
    sleep(step_delay).await;
    handle.update(ActionUpdate {
        invocation_id,
        phase: ActionPhase::Working,
        note: format!("Purchasing {quantity} ${symbol}... working on it..."),
    });

    sleep(step_delay).await;
    let total = f64::from(quantity) * price;
    let invocation = ToolInvocation {
        id: invocation_id,
        kind: "confirm_purchase".to_string(),
        args: json!({"symbol": symbol, "price": price, "quantity": quantity}),
        phase: ActionPhase::Done,
        result: Some(json!({"symbol": symbol, "price": price, "quantity": quantity, "total": total})),
    };
    let tool_message = Message::new(
        Role::Tool,
        MessageContent::Tool {
            invocation: invocation.clone(),
        },
    );
    // Synthetic bookkeeping entry so future turns know the outcome.
    let system_message = Message::text(
        Role::System,
        format!(
            "[User has purchased {quantity} shares of {symbol} at ${price}. Total cost = {total}]"
        ),
    );
    view.push_action(&tool_message.id, invocation);
    store
        .append(session.as_ref(), &chat_id, vec![tool_message, system_message])
        .await;

    handle.done(ActionUpdate {
        invocation_id,
        phase: ActionPhase::Done,
        note: format!(
            "You have successfully purchased {quantity} ${symbol}. Total cost: {total}"
        ),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn session() -> Session {
        Session {
            user_id: "u-1".into(),
            email: "ada@example.com".into(),
        }
    }

    fn request(quantity: u32) -> ActionRequest {
        ActionRequest::ConfirmPurchase {
            symbol: "DOGE".into(),
            price: 42.0,
            quantity,
        }
    }

    async fn observed_phases(ticket: ActionTicket) -> Vec<ActionPhase> {
        ticket
            .updates
            .map(|e| match e {
                crate::stream::StreamEvent::Update(u) | crate::stream::StreamEvent::Done(u) => {
                    u.phase
                }
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn valid_purchase_walks_pending_working_done() {
        let runner = ActionRunner::new();
        let store = Arc::new(ConversationStore::new());
        let view = SharedView::new();
        let s = session();

        let ticket = runner
            .dispatch(
                request(10),
                Some(&s),
                "c1",
                store.clone(),
                view.clone(),
                Duration::from_millis(5),
            )
            .await;
        let id = ticket.invocation_id;

        let phases = observed_phases(ticket).await;
        assert_eq!(
            phases,
            vec![ActionPhase::Pending, ActionPhase::Working, ActionPhase::Done]
        );

        runner.join(id).await;
        let state = store.get_state(Some(&s), "c1").await.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::Tool);
        assert_eq!(state.messages[1].role, Role::System);
        assert!(state.messages[1]
            .content
            .as_text()
            .contains("[User has purchased 10 shares of DOGE at $42. Total cost = 420]"));
    }

    #[tokio::test]
    async fn out_of_range_quantity_goes_straight_to_rejected() {
        let runner = ActionRunner::new();
        let store = Arc::new(ConversationStore::new());
        let view = SharedView::new();
        let s = session();

        for quantity in [0, MAX_PURCHASE_QUANTITY + 1] {
            let ticket = runner
                .dispatch(
                    request(quantity),
                    Some(&s),
                    "c1",
                    store.clone(),
                    view.clone(),
                    Duration::from_millis(5),
                )
                .await;
            let phases = observed_phases(ticket).await;
            assert_eq!(phases, vec![ActionPhase::Pending, ActionPhase::Rejected]);
            assert!(!phases.contains(&ActionPhase::Done));
        }

        let state = store.get_state(Some(&s), "c1").await.unwrap();
        let rejections: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .collect();
        assert_eq!(rejections.len(), 2);
        assert!(rejections[0]
            .content
            .as_text()
            .contains("invalid quantity"));
    }

    #[tokio::test]
    async fn terminal_handle_accepts_no_further_transitions() {
        let runner = ActionRunner::new();
        let store = Arc::new(ConversationStore::new());
        let ticket = runner
            .dispatch(
                request(0),
                Some(&session()),
                "c1",
                store,
                SharedView::new(),
                Duration::from_millis(1),
            )
            .await;
        // Rejection seals the handle; the reader sequence is finite.
        let phases = observed_phases(ticket).await;
        assert_eq!(phases.last(), Some(&ActionPhase::Rejected));
    }

    #[tokio::test]
    async fn each_invocation_gets_its_own_id_and_stream() {
        let runner = ActionRunner::new();
        let store = Arc::new(ConversationStore::new());
        let view = SharedView::new();
        let s = session();

        let t1 = runner
            .dispatch(
                request(1),
                Some(&s),
                "c1",
                store.clone(),
                view.clone(),
                Duration::from_millis(1),
            )
            .await;
        let t2 = runner
            .dispatch(
                request(2),
                Some(&s),
                "c1",
                store.clone(),
                view.clone(),
                Duration::from_millis(1),
            )
            .await;
        assert_ne!(t1.invocation_id, t2.invocation_id);

        let (id1, id2) = (t1.invocation_id, t2.invocation_id);
        runner.join(id1).await;
        runner.join(id2).await;
    }

    #[tokio::test]
    async fn cancelled_action_never_commits() {
        let runner = ActionRunner::new();
        let store = Arc::new(ConversationStore::new());
        let s = session();
        let ticket = runner
            .dispatch(
                request(5),
                Some(&s),
                "c1",
                store.clone(),
                SharedView::new(),
                Duration::from_secs(60),
            )
            .await;

        runner.cancel(ticket.invocation_id);
        runner.join(ticket.invocation_id).await;

        let state = store.get_state(Some(&s), "c1").await.unwrap();
        assert!(state.messages.is_empty());
    }

    #[tokio::test]
    async fn rejected_action_renders_a_card() {
        let runner = ActionRunner::new();
        let store = Arc::new(ConversationStore::new());
        let view = SharedView::new();
        let ticket = runner
            .dispatch(
                request(0),
                Some(&session()),
                "c1",
                store,
                view.clone(),
                Duration::from_millis(1),
            )
            .await;
        observed_phases(ticket).await;

        let snap = view.snapshot();
        assert_eq!(snap.entries.len(), 1);
        assert!(matches!(
            snap.entries[0].renderable,
            crate::render::Renderable::ActionCard { ref invocation }
                if invocation.phase == ActionPhase::Rejected
        ));
    }
}
