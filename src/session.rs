use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::{ActionKind, Phase, QueueState, RemoteOp, TriageEngine};
use crate::error::FetchError;
use crate::fetch::{FetchConfig, ProgressFn, fetch_unread};
use crate::gmail::MailboxApi;
use crate::group::{SenderGroup, group_by_sender};
use crate::mutate::MutationClient;
use crate::persist::StateStore;

/// Discrete action events produced by the presentation/gesture layer.
///
/// Each applies to the group currently at the front of the deck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriageEvent {
    Skip,
    Read,
    Todo,
    Undo,
}

/// What the session found at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartOutcome {
    /// A persisted deck was restored. When `stale`, the host should offer a
    /// choice between continuing and discarding for a fresh fetch.
    Restored { stale: bool },
    /// No usable persisted state; the host should call `refresh`.
    NeedsFetch,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub fetch: FetchConfig,
    /// Age of the last fetch beyond which a restored deck counts as stale.
    pub stale_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            stale_after: Duration::hours(3),
        }
    }
}

/// One user's triage session: owns the store handle, the API handle, and the
/// queue engine, so nothing about the deck lives in global state.
///
/// Engine operations complete their local transition synchronously; remote
/// mutations are dispatched fire-and-forget afterwards (which requires a
/// Tokio runtime), and the full state is persisted after every mutation.
pub struct TriageSession {
    api: Arc<dyn MailboxApi>,
    store: Arc<dyn StateStore>,
    mutations: MutationClient,
    config: SessionConfig,
    engine: Option<TriageEngine>,
}

impl TriageSession {
    pub fn new(api: Arc<dyn MailboxApi>, store: Arc<dyn StateStore>, config: SessionConfig) -> Self {
        let mutations = MutationClient::new(Arc::clone(&api));
        Self {
            api,
            store,
            mutations,
            config,
            engine: None,
        }
    }

    /// Restores a persisted deck if one exists; otherwise asks for a fetch.
    pub fn start(&mut self) -> StartOutcome {
        match self.store.load() {
            Some(state) if !state.groups.is_empty() => {
                let stale = Utc::now() - state.last_fetch > self.config.stale_after;
                info!(
                    "restored deck: {} groups, {} todos, stale={stale}",
                    state.groups.len(),
                    state.todos.len()
                );
                self.engine = Some(TriageEngine::new(state));
                StartOutcome::Restored { stale }
            }
            _ => StartOutcome::NeedsFetch,
        }
    }

    /// Performs a full retrieval and replaces the deck: cursor back to zero,
    /// todo queue and history cleared.
    pub async fn refresh(&mut self, progress: ProgressFn) -> Result<(), FetchError> {
        let emails = fetch_unread(Arc::clone(&self.api), &self.config.fetch, progress).await?;
        let groups = group_by_sender(emails);
        info!("fetched deck: {} groups", groups.len());

        let engine = TriageEngine::new(QueueState::new(groups, Utc::now()));
        self.store.save(engine.state());
        self.engine = Some(engine);
        Ok(())
    }

    /// Applies a presentation-layer event to the front group.
    pub fn handle_event(&mut self, event: TriageEvent) {
        match event {
            TriageEvent::Skip => self.mark_group(ActionKind::Skip),
            TriageEvent::Read => self.mark_group(ActionKind::Read),
            TriageEvent::Todo => self.mark_group(ActionKind::Todo),
            TriageEvent::Undo => self.undo(),
        }
    }

    pub fn mark_group(&mut self, kind: ActionKind) {
        if let Some(engine) = &mut self.engine {
            let ops = engine.mark_group(kind);
            self.after_mutation(ops);
        }
    }

    pub fn mark_email(&mut self, email_id: &str, kind: ActionKind) {
        if let Some(engine) = &mut self.engine {
            let ops = engine.mark_email(email_id, kind);
            self.after_mutation(ops);
        }
    }

    pub fn undo(&mut self) {
        if let Some(engine) = &mut self.engine {
            let ops = engine.undo();
            self.after_mutation(ops);
        }
    }

    pub fn move_todo_to_front(&mut self, key: &str) {
        if let Some(engine) = &mut self.engine
            && engine.move_todo_to_front(key)
        {
            self.persist();
        }
    }

    pub fn remove_todo(&mut self, key: &str) {
        if let Some(engine) = &mut self.engine
            && engine.remove_todo(key)
        {
            self.persist();
        }
    }

    /// Drops the deck and the persisted slot.
    pub fn sign_out(&mut self) {
        self.store.clear();
        self.engine = None;
    }

    pub fn phase(&self) -> Phase {
        self.engine
            .as_ref()
            .map_or(Phase::Loading, TriageEngine::phase)
    }

    pub fn front_group(&self) -> Option<&SenderGroup> {
        self.engine.as_ref().and_then(TriageEngine::front_group)
    }

    pub fn todo_groups(&self) -> &[SenderGroup] {
        self.engine
            .as_ref()
            .map_or(&[], TriageEngine::todo_groups)
    }

    pub fn remaining_main(&self) -> usize {
        self.engine.as_ref().map_or(0, TriageEngine::remaining_main)
    }

    pub fn state(&self) -> Option<&QueueState> {
        self.engine.as_ref().map(TriageEngine::state)
    }

    fn after_mutation(&self, ops: Vec<RemoteOp>) {
        self.persist();
        for op in ops {
            let mutations = self.mutations.clone();
            tokio::spawn(async move {
                match op {
                    RemoteOp::MarkRead(ids) => mutations.mark_read_batch(ids).await,
                    RemoteOp::MarkUnread(ids) => mutations.mark_unread_batch(ids).await,
                }
            });
        }
    }

    fn persist(&self) {
        if let Some(engine) = &self.engine {
            self.store.save(engine.state());
            debug!("queue state persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::Email;
    use crate::error::ApiError;
    use crate::gmail::{ListPage, MessageRef, RawMessage};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Records label mutations on a channel so tests can await the
    /// fire-and-forget dispatch deterministically.
    struct RecordingApi {
        modified: mpsc::UnboundedSender<(String, Vec<String>, Vec<String>)>,
    }

    #[async_trait]
    impl MailboxApi for RecordingApi {
        async fn list_unread(
            &self,
            _page_size: u32,
            _page_token: Option<String>,
        ) -> Result<ListPage, ApiError> {
            Ok(ListPage::default())
        }

        async fn get_message(&self, _id: &str) -> Result<RawMessage, ApiError> {
            Err(ApiError::Status(404))
        }

        async fn modify_labels(
            &self,
            id: &str,
            add: Vec<String>,
            remove: Vec<String>,
        ) -> Result<(), ApiError> {
            let _ = self.modified.send((id.to_string(), add, remove));
            Ok(())
        }
    }

    fn email_from(id: &str, from: &str) -> Email {
        let (from_name, from_email) = crate::email::parse_sender(from);
        Email {
            id: id.to_string(),
            thread_id: format!("t{id}"),
            from_name,
            from_email,
            subject: "Subject".to_string(),
            snippet: String::new(),
            body_text: String::new(),
            body_html: String::new(),
            date: Utc::now(),
            unread: true,
            starred: false,
            important: false,
            label_ids: vec!["UNREAD".to_string()],
        }
    }

    fn persisted_state(store: &dyn StateStore, emails: Vec<Email>) {
        let state = QueueState::new(group_by_sender(emails), Utc::now());
        store.save(&state);
    }

    fn session_with(
        store: Arc<dyn StateStore>,
    ) -> (
        TriageSession,
        mpsc::UnboundedReceiver<(String, Vec<String>, Vec<String>)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = Arc::new(RecordingApi { modified: tx });
        (TriageSession::new(api, store, SessionConfig::default()), rx)
    }

    #[tokio::test]
    async fn test_start_without_persisted_state_needs_fetch() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        let (mut session, _rx) = session_with(store);

        assert_eq!(session.phase(), Phase::Loading);
        assert_eq!(session.start(), StartOutcome::NeedsFetch);
        assert_eq!(session.phase(), Phase::Loading);
    }

    #[tokio::test]
    async fn test_start_restores_persisted_state() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        persisted_state(store.as_ref(), vec![email_from("m1", "a@x.com")]);

        let (mut session, _rx) = session_with(Arc::clone(&store));
        assert_eq!(session.start(), StartOutcome::Restored { stale: false });
        assert_eq!(session.phase(), Phase::Browsing);
        assert_eq!(session.front_group().unwrap().key, "a@x.com");
    }

    #[tokio::test]
    async fn test_start_flags_stale_state() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        let state = QueueState::new(
            group_by_sender(vec![email_from("m1", "a@x.com")]),
            Utc::now() - Duration::hours(4),
        );
        store.save(&state);

        let (mut session, _rx) = session_with(store);
        assert_eq!(session.start(), StartOutcome::Restored { stale: true });
    }

    #[tokio::test]
    async fn test_start_ignores_empty_persisted_queue() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        persisted_state(store.as_ref(), Vec::new());

        let (mut session, _rx) = session_with(store);
        assert_eq!(session.start(), StartOutcome::NeedsFetch);
    }

    #[tokio::test]
    async fn test_read_event_dispatches_remote_and_persists() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        persisted_state(
            store.as_ref(),
            vec![email_from("m1", "a@x.com"), email_from("m2", "a@x.com")],
        );

        let (mut session, mut rx) = session_with(Arc::clone(&store));
        session.start();
        session.handle_event(TriageEvent::Read);

        // Local transition is already visible and persisted.
        assert_eq!(session.phase(), Phase::Complete);
        assert_eq!(store.load().unwrap().cursor, 1);

        // Both ids get a mark-as-read, in some order.
        let mut seen = Vec::new();
        for _ in 0..2 {
            let (id, add, remove) = rx.recv().await.unwrap();
            assert!(add.is_empty());
            assert_eq!(remove, vec!["UNREAD".to_string()]);
            seen.push(id);
        }
        seen.sort();
        assert_eq!(seen, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn test_undo_event_dispatches_unread_reversal() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        persisted_state(store.as_ref(), vec![email_from("m1", "a@x.com")]);

        let (mut session, mut rx) = session_with(store);
        session.start();
        session.handle_event(TriageEvent::Read);
        let _ = rx.recv().await.unwrap();

        session.handle_event(TriageEvent::Undo);
        assert_eq!(session.phase(), Phase::Browsing);

        let (id, add, remove) = rx.recv().await.unwrap();
        assert_eq!(id, "m1");
        assert_eq!(add, vec!["UNREAD".to_string()]);
        assert!(remove.is_empty());
    }

    #[tokio::test]
    async fn test_skip_and_todo_events_have_no_remote_effect() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        persisted_state(
            store.as_ref(),
            vec![email_from("m1", "a@x.com"), email_from("m2", "b@x.com")],
        );

        let (mut session, mut rx) = session_with(Arc::clone(&store));
        session.start();
        session.handle_event(TriageEvent::Todo);
        session.handle_event(TriageEvent::Skip);

        assert_eq!(session.phase(), Phase::ReviewingTodos);
        assert_eq!(store.load().unwrap().todos.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_with_empty_mailbox_completes() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        let (mut session, _rx) = session_with(Arc::clone(&store));

        let progress: ProgressFn = Arc::new(|_| {});
        session.refresh(progress).await.unwrap();

        assert_eq!(session.phase(), Phase::Complete);
        assert!(store.load().unwrap().groups.is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_clears_store_and_deck() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        persisted_state(store.as_ref(), vec![email_from("m1", "a@x.com")]);

        let (mut session, _rx) = session_with(Arc::clone(&store));
        session.start();
        session.sign_out();

        assert_eq!(session.phase(), Phase::Loading);
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_move_and_remove_todo_persist() {
        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        persisted_state(
            store.as_ref(),
            vec![email_from("m1", "a@x.com"), email_from("m2", "b@x.com")],
        );

        let (mut session, _rx) = session_with(Arc::clone(&store));
        session.start();
        session.handle_event(TriageEvent::Todo); // front group → todos

        let key = session.todo_groups()[0].key.clone();
        session.move_todo_to_front(&key);
        assert!(store.load().unwrap().todos.is_empty());
        assert_eq!(session.front_group().unwrap().key, key);

        session.handle_event(TriageEvent::Todo);
        let key = session.todo_groups()[0].key.clone();
        session.remove_todo(&key);
        assert!(store.load().unwrap().todos.is_empty());
    }

    #[tokio::test]
    async fn test_mutation_failure_never_rolls_back_local_state() {
        struct FailingApi;

        #[async_trait]
        impl MailboxApi for FailingApi {
            async fn list_unread(
                &self,
                _page_size: u32,
                _page_token: Option<String>,
            ) -> Result<ListPage, ApiError> {
                Ok(ListPage {
                    messages: vec![MessageRef {
                        id: "m1".to_string(),
                        thread_id: "t1".to_string(),
                    }],
                    next_page_token: None,
                    result_size_estimate: Some(1),
                })
            }

            async fn get_message(&self, _id: &str) -> Result<RawMessage, ApiError> {
                Err(ApiError::Status(500))
            }

            async fn modify_labels(
                &self,
                _id: &str,
                _add: Vec<String>,
                _remove: Vec<String>,
            ) -> Result<(), ApiError> {
                Err(ApiError::Status(500))
            }
        }

        let store: Arc<dyn StateStore> = Arc::new(crate::persist::MemoryStore::new());
        persisted_state(store.as_ref(), vec![email_from("m1", "a@x.com")]);

        let mut session =
            TriageSession::new(Arc::new(FailingApi), store, SessionConfig::default());
        session.start();
        session.handle_event(TriageEvent::Read);

        // Local state is the source of truth regardless of the remote failure.
        assert_eq!(session.phase(), Phase::Complete);
        tokio::task::yield_now().await;
        assert_eq!(session.phase(), Phase::Complete);
    }
}
