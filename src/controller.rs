//! Conversation state for one chat session: message history, the queue of
//! proposals awaiting approval, and the Idle/Thinking state machine.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ideaboard_backend::actions::Proposal;
use ideaboard_backend::context::InvocationContext;
use ideaboard_backend::invocation::{InvocationError, InvocationResult};
use ideaboard_backend::mention::MentionDetector;

use crate::applier::MutationApplier;
use crate::router::AssistantRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Thinking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Proposals carried by this reply, as originally received.
    pub actions: Vec<Proposal>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            actions: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

pub struct ConversationController {
    router: AssistantRouter,
    applier: MutationApplier,
    detector: MentionDetector,
    idea_id: Option<String>,
    messages: Vec<ChatMessage>,
    pending: Vec<Proposal>,
    /// Idea that was open when the pending proposals were queued.
    pending_idea: Option<String>,
    state: SessionState,
    last_error: Option<String>,
    cancel: CancellationToken,
}

impl ConversationController {
    pub fn new(router: AssistantRouter, applier: MutationApplier, detector: MentionDetector) -> Self {
        Self {
            router,
            applier,
            detector,
            idea_id: None,
            messages: Vec::new(),
            pending: Vec::new(),
            pending_idea: None,
            state: SessionState::Idle,
            last_error: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn pending(&self) -> &[Proposal] {
        &self.pending
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn idea_id(&self) -> Option<&str> {
        self.idea_id.as_deref()
    }

    /// Idea the next chat turn is about. Proposals already queued keep the
    /// idea they were made for.
    pub fn set_idea(&mut self, idea_id: Option<String>) {
        self.idea_id = idea_id;
    }

    pub fn router(&self) -> &AssistantRouter {
        &self.router
    }

    /// Token that aborts the current (or next) invocation when cancelled.
    pub fn cancel_handle(&mut self) -> CancellationToken {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.cancel.clone()
    }

    /// Send one user message. Returns `false` when the message was ignored
    /// because it was blank or a reply is already in flight.
    pub async fn send_message(&mut self, text: &str, context: &InvocationContext) -> bool {
        if self.state == SessionState::Thinking {
            return false;
        }

        let prompt = if self.detector.contains_mention(text) {
            self.detector.extract_directive(text)
        } else {
            text.trim().to_string()
        };
        if prompt.trim().is_empty() {
            return false;
        }

        self.messages.push(ChatMessage::new(Role::User, text.trim()));

        let idea_id = self.idea_id.clone();
        let cancel = self.cancel_handle();
        self.state = SessionState::Thinking;
        let result = tokio::select! {
            result = self.router.send_message(&prompt, context) => result,
            _ = cancel.cancelled() => {
                tracing::info!("Invocation cancelled by user");
                InvocationResult::failure(&InvocationError::Cancelled)
            }
        };
        self.state = SessionState::Idle;

        self.record_reply(result, idea_id);
        true
    }

    fn record_reply(&mut self, result: InvocationResult, idea_id: Option<String>) {
        if let Some(error) = result.error {
            self.last_error = Some(error);
            return;
        }

        self.last_error = None;
        let mut reply = ChatMessage::new(Role::Assistant, result.message);
        reply.actions = result.actions.clone();
        self.messages.push(reply);
        if !result.actions.is_empty() {
            self.pending = result.actions;
            self.pending_idea = idea_id;
        }
    }

    /// Queue proposals produced outside a chat reply (e.g. brainstorming),
    /// replacing whatever was pending.
    pub fn propose(&mut self, proposals: Vec<Proposal>) {
        if !proposals.is_empty() {
            self.pending = proposals;
            self.pending_idea = self.idea_id.clone();
        }
    }

    /// Apply a pending proposal. It leaves the queue only once the board
    /// accepted it; on failure it stays queued and the error is recorded.
    pub async fn approve(&mut self, id: Uuid) -> Result<()> {
        let proposal = self
            .pending
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("No pending proposal with id {}", id))?;

        match self
            .applier
            .apply(&proposal.action, self.pending_idea.as_deref())
            .await
        {
            Ok(confirmation) => {
                self.pending.retain(|p| p.id != id);
                self.messages
                    .push(ChatMessage::new(Role::Assistant, confirmation));
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to apply {}: {:#}", proposal.action.kind(), e);
                self.last_error = Some(format!("{:#}", e));
                Err(e)
            }
        }
    }

    /// Drop a pending proposal without applying it.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.id != id);
        self.pending.len() != before
    }

    pub fn dismiss_all(&mut self) {
        self.pending.clear();
        self.pending_idea = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ideaboard_backend::actions::{parse_reply, ProposedAction};
    use ideaboard_backend::board::BoardRepository;
    use ideaboard_backend::database::BoardDatabase;
    use ideaboard_backend::invocation::{HealthStatus, InvocationBackend};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Replays canned raw replies and records the prompts it was given.
    struct Scripted {
        replies: Mutex<Vec<Result<String, InvocationError>>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl InvocationBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn invoke(&self, prompt: &str, _context: &InvocationContext) -> InvocationResult {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.replies.lock().unwrap().remove(0) {
                Ok(raw) => {
                    let reply = parse_reply(&raw);
                    InvocationResult::success(reply.message, reply.actions)
                }
                Err(error) => InvocationResult::failure(&error),
            }
        }

        async fn check_health(&self) -> HealthStatus {
            HealthStatus::available(None)
        }
    }

    struct Stalled;

    #[async_trait]
    impl InvocationBackend for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn invoke(&self, _prompt: &str, _context: &InvocationContext) -> InvocationResult {
            tokio::time::sleep(Duration::from_secs(300)).await;
            InvocationResult::success("too late".to_string(), Vec::new())
        }

        async fn check_health(&self) -> HealthStatus {
            HealthStatus::available(None)
        }
    }

    struct Harness {
        controller: ConversationController,
        db: Arc<BoardDatabase>,
        prompts: Arc<Mutex<Vec<String>>>,
        idea_id: String,
    }

    fn harness(replies: Vec<Result<String, InvocationError>>) -> Harness {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let backend = Scripted {
            replies: Mutex::new(replies),
            prompts: prompts.clone(),
        };
        with_backend(Arc::new(backend), prompts)
    }

    fn with_backend(
        backend: Arc<dyn InvocationBackend>,
        prompts: Arc<Mutex<Vec<String>>>,
    ) -> Harness {
        let db = Arc::new(BoardDatabase::in_memory().unwrap());
        let idea = db.create_idea("Launch", "Ship v1").unwrap();
        let mut controller = ConversationController::new(
            AssistantRouter::new(backend),
            MutationApplier::new(db.clone(), "todo"),
            MentionDetector::default(),
        );
        controller.set_idea(Some(idea.id.clone()));
        Harness {
            controller,
            db,
            prompts,
            idea_id: idea.id,
        }
    }

    const CREATE_IN_DOING: &str = "Sure, adding it.\n```actions\n[{\"type\":\"create_card\",\"params\":{\"text\":\"Onboarding\",\"columnId\":\"doing\"}}]\n```";

    #[tokio::test]
    async fn mention_to_card_on_the_board() {
        let mut h = harness(vec![Ok(CREATE_IN_DOING.to_string())]);
        let ctx = InvocationContext::default();

        assert!(
            h.controller
                .send_message("@claude add a card 'Onboarding' to doing", &ctx)
                .await
        );

        assert_eq!(
            h.prompts.lock().unwrap().as_slice(),
            ["add a card 'Onboarding' to doing"]
        );
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.controller.messages().len(), 2);
        assert_eq!(h.controller.messages()[1].content, "Sure, adding it.");
        assert_eq!(h.controller.messages()[1].actions.len(), 1);
        assert_ne!(h.controller.messages()[0].id, h.controller.messages()[1].id);
        assert_eq!(h.controller.pending().len(), 1);

        let id = h.controller.pending()[0].id;
        h.controller.approve(id).await.unwrap();

        assert!(h.controller.pending().is_empty());
        let board = h.db.load_board(&h.idea_id).unwrap().unwrap();
        let doing = board.column("doing").unwrap();
        assert_eq!(doing.cards.len(), 1);
        assert_eq!(doing.cards[0].text, "Onboarding");
        let last = h.controller.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("doing"));
    }

    #[tokio::test]
    async fn blank_or_busy_sends_are_ignored() {
        let mut h = harness(vec![Ok("unused".to_string())]);
        let ctx = InvocationContext::default();

        assert!(!h.controller.send_message("   ", &ctx).await);
        assert!(!h.controller.send_message("@claude   ", &ctx).await);
        assert!(h.controller.last_error().is_none());

        h.controller.state = SessionState::Thinking;
        assert!(!h.controller.send_message("hello", &ctx).await);

        assert!(h.controller.messages().is_empty());
        assert!(h.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn errors_keep_history_and_clear_on_success() {
        let mut h = harness(vec![
            Err(InvocationError::Timeout { secs: 120 }),
            Ok("All good".to_string()),
        ]);
        let ctx = InvocationContext::default();

        h.controller.send_message("first", &ctx).await;
        assert_eq!(h.controller.messages().len(), 1);
        assert!(h.controller.last_error().unwrap().contains("120 seconds"));
        assert_eq!(h.controller.state(), SessionState::Idle);

        h.controller.send_message("second", &ctx).await;
        assert!(h.controller.last_error().is_none());
        assert_eq!(h.controller.messages().len(), 3);
    }

    #[tokio::test]
    async fn new_actions_replace_the_queue_but_plain_replies_do_not() {
        let two_cards = "Two\n```actions\n[{\"type\":\"create_card\",\"params\":{\"text\":\"A\"}},{\"type\":\"create_card\",\"params\":{\"text\":\"B\"}}]\n```";
        let one_card =
            "One\n```actions\n[{\"type\":\"create_card\",\"params\":{\"text\":\"C\"}}]\n```";
        let mut h = harness(vec![
            Ok(two_cards.to_string()),
            Ok("Just chatting".to_string()),
            Ok(one_card.to_string()),
        ]);
        let ctx = InvocationContext::default();

        h.controller.send_message("two", &ctx).await;
        assert_eq!(h.controller.pending().len(), 2);

        h.controller.send_message("chat", &ctx).await;
        assert_eq!(h.controller.pending().len(), 2);

        h.controller.send_message("one", &ctx).await;
        let pending = h.controller.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].action,
            ProposedAction::CreateCard {
                text: "C".to_string(),
                column_id: None,
            }
        );
    }

    #[tokio::test]
    async fn approve_removes_only_the_approved_proposal() {
        let three = "```actions\n[{\"type\":\"create_card\",\"params\":{\"text\":\"A\"}},{\"type\":\"create_card\",\"params\":{\"text\":\"B\"}},{\"type\":\"create_card\",\"params\":{\"text\":\"C\"}}]\n```";
        let mut h = harness(vec![Ok(three.to_string())]);
        h.controller
            .send_message("cards", &InvocationContext::default())
            .await;

        let ids: Vec<Uuid> = h.controller.pending().iter().map(|p| p.id).collect();
        h.controller.approve(ids[1]).await.unwrap();

        let remaining: Vec<Uuid> = h.controller.pending().iter().map(|p| p.id).collect();
        assert_eq!(remaining, vec![ids[0], ids[2]]);

        let todo = h.db.load_board(&h.idea_id).unwrap().unwrap();
        assert_eq!(todo.column("todo").unwrap().cards[0].text, "B");
    }

    #[tokio::test]
    async fn failed_approval_stays_queued() {
        let bad_move = "```actions\n[{\"type\":\"move_card\",\"params\":{\"cardId\":\"ghost\",\"columnId\":\"done\"}}]\n```";
        let mut h = harness(vec![Ok(bad_move.to_string())]);
        h.controller
            .send_message("move it", &InvocationContext::default())
            .await;
        let id = h.controller.pending()[0].id;
        let messages_before = h.controller.messages().len();

        assert!(h.controller.approve(id).await.is_err());
        assert_eq!(h.controller.pending().len(), 1);
        assert!(h.controller.last_error().unwrap().contains("ghost"));
        assert_eq!(h.controller.messages().len(), messages_before);

        assert!(h.controller.approve(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn dismiss_and_dismiss_all() {
        let three = "```actions\n[{\"type\":\"create_card\",\"params\":{\"text\":\"A\"}},{\"type\":\"create_card\",\"params\":{\"text\":\"B\"}},{\"type\":\"create_card\",\"params\":{\"text\":\"C\"}}]\n```";
        let mut h = harness(vec![Ok(three.to_string())]);
        h.controller
            .send_message("three", &InvocationContext::default())
            .await;

        let ids: Vec<Uuid> = h.controller.pending().iter().map(|p| p.id).collect();
        assert!(h.controller.dismiss(ids[1]));
        assert!(!h.controller.dismiss(ids[1]));
        let remaining: Vec<Uuid> = h.controller.pending().iter().map(|p| p.id).collect();
        assert_eq!(remaining, vec![ids[0], ids[2]]);

        h.controller.dismiss_all();
        assert!(h.controller.pending().is_empty());
        let board = h.db.load_board(&h.idea_id).unwrap().unwrap();
        assert!(board.columns.iter().all(|c| c.cards.is_empty()));
    }

    #[tokio::test]
    async fn approval_targets_the_idea_the_proposal_was_made_for() {
        let mut h = harness(vec![Ok(CREATE_IN_DOING.to_string())]);
        h.controller
            .send_message("@claude add onboarding", &InvocationContext::default())
            .await;

        let other = h.db.create_idea("Side project", "").unwrap();
        h.controller.set_idea(Some(other.id.clone()));
        let id = h.controller.pending()[0].id;
        h.controller.approve(id).await.unwrap();

        let original = h.db.load_board(&h.idea_id).unwrap().unwrap();
        assert_eq!(original.column("doing").unwrap().cards.len(), 1);
        let switched = h.db.load_board(&other.id).unwrap().unwrap();
        assert!(switched.columns.iter().all(|c| c.cards.is_empty()));
    }

    #[tokio::test]
    async fn cancellation_returns_to_idle() {
        let mut h = with_backend(Arc::new(Stalled), Arc::new(Mutex::new(Vec::new())));
        let token = h.controller.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let sent = tokio::time::timeout(
            Duration::from_secs(10),
            h.controller
                .send_message("take forever", &InvocationContext::default()),
        )
        .await
        .expect("cancellation should end the invocation");

        assert!(sent);
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(h.controller.last_error().unwrap().contains("cancelled"));
        assert_eq!(h.controller.messages().len(), 1);
        assert!(!h.controller.cancel_handle().is_cancelled());
    }
}
