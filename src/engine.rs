use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::email::Email;
use crate::group::SenderGroup;

/// Maximum number of actions kept for undo.
const MAX_HISTORY: usize = 50;

/// The three terminal decisions for a group or a single email.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Mark as read (remote side effect).
    Read,
    /// Skip: local-only deferral, the item just scrolls past.
    Skip,
    /// Defer to the todo queue for later review.
    Todo,
}

/// One applied triage decision, kept so undo can invert it.
///
/// Group-scope actions capture the whole group and the main-queue index it
/// occupied; `index: None` means the action was taken while reviewing todos.
/// Email-scope actions additionally capture the pre-mutation group so the
/// email can be spliced back exactly where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Action {
    Group {
        kind: ActionKind,
        group: SenderGroup,
        index: Option<usize>,
    },
    Email {
        kind: ActionKind,
        email: Email,
        group: SenderGroup,
        index: Option<usize>,
    },
}

/// Remote side effect produced by an engine operation.
///
/// The engine never performs network calls itself; it returns these for the
/// session to dispatch fire-and-forget, so local state transitions always
/// complete synchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
    MarkRead(Vec<String>),
    MarkUnread(Vec<String>),
}

/// Logical state of the triage deck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// No queue yet (before the first fetch or restore). Session-level.
    Loading,
    /// Working through the main queue.
    Browsing,
    /// Main queue exhausted; the todo queue head is the active front.
    ReviewingTodos,
    /// Both queues exhausted. Reversible only via undo or refresh.
    Complete,
}

/// The whole persisted triage state.
///
/// Created fresh by a retrieval (cursor 0, empty todos and history), mutated
/// only by [`TriageEngine`], serialized wholesale after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    /// Main queue. Groups are never removed; the cursor advances past them.
    pub groups: Vec<SenderGroup>,
    pub cursor: usize,
    /// Deferred groups, reviewed FIFO once the main queue is exhausted.
    pub todos: Vec<SenderGroup>,
    /// True once the todo queue has become the active front.
    pub reviewing: bool,
    pub last_fetch: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<Action>,
}

impl QueueState {
    pub fn new(groups: Vec<SenderGroup>, last_fetch: DateTime<Utc>) -> Self {
        Self {
            groups,
            cursor: 0,
            todos: Vec::new(),
            reviewing: false,
            last_fetch,
            history: Vec::new(),
        }
    }
}

/// The dual-queue triage state machine.
///
/// Every operation acts on the group currently at the front: the main queue
/// at the cursor, or the todo queue head when reviewing. Operations mutate
/// local state synchronously and return the remote ops to dispatch.
#[derive(Debug)]
pub struct TriageEngine {
    state: QueueState,
}

impl TriageEngine {
    /// Wraps a fresh or restored state. A restored blob where the cursor ran
    /// off the main queue with todos pending resumes in review mode.
    pub fn new(mut state: QueueState) -> Self {
        if state.cursor >= state.groups.len() && !state.todos.is_empty() {
            state.reviewing = true;
        }
        Self { state }
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        if self.state.reviewing {
            if self.state.todos.is_empty() {
                Phase::Complete
            } else {
                Phase::ReviewingTodos
            }
        } else if self.state.cursor < self.state.groups.len() {
            Phase::Browsing
        } else if self.state.todos.is_empty() {
            Phase::Complete
        } else {
            Phase::ReviewingTodos
        }
    }

    /// The group the next decision applies to.
    pub fn front_group(&self) -> Option<&SenderGroup> {
        if self.in_review() {
            self.state.todos.first()
        } else {
            self.state.groups.get(self.state.cursor)
        }
    }

    pub fn todo_groups(&self) -> &[SenderGroup] {
        &self.state.todos
    }

    /// Groups still awaiting a first decision in the main queue.
    pub fn remaining_main(&self) -> usize {
        self.state.groups.len().saturating_sub(self.state.cursor)
    }

    pub fn history_len(&self) -> usize {
        self.state.history.len()
    }

    fn in_review(&self) -> bool {
        self.state.reviewing && !self.state.todos.is_empty()
    }

    /// Applies a group-scope decision to the front group.
    pub fn mark_group(&mut self, kind: ActionKind) -> Vec<RemoteOp> {
        let reviewing = self.in_review();
        let Some(front) = self.front_group().cloned() else {
            return Vec::new();
        };
        debug!("group action {kind:?} on {} ({} emails)", front.key, front.count());

        let index = if reviewing {
            None
        } else {
            Some(self.state.cursor)
        };
        self.push_action(Action::Group {
            kind,
            group: front.clone(),
            index,
        });

        let mut ops = Vec::new();
        match kind {
            ActionKind::Read => {
                ops.push(RemoteOp::MarkRead(front.email_ids()));
                self.advance();
            }
            ActionKind::Skip => {
                self.advance();
            }
            ActionKind::Todo => {
                if reviewing {
                    // Snooze within review: rotate the head to the tail. The
                    // queue does not shrink and the cursor does not move.
                    if self.state.todos.len() > 1 {
                        let head = self.state.todos.remove(0);
                        self.state.todos.push(head);
                    }
                } else {
                    self.push_todo_group(front);
                    self.advance();
                }
            }
        }
        ops
    }

    /// Applies a decision to a single email within the front group.
    pub fn mark_email(&mut self, email_id: &str, kind: ActionKind) -> Vec<RemoteOp> {
        let reviewing = self.in_review();
        let Some(front) = self.front_group() else {
            return Vec::new();
        };
        let Some(pos) = front.emails.iter().position(|e| e.id == email_id) else {
            return Vec::new();
        };

        let snapshot = front.clone();
        let email = snapshot.emails[pos].clone();
        let index = if reviewing {
            None
        } else {
            Some(self.state.cursor)
        };
        self.push_action(Action::Email {
            kind,
            email: email.clone(),
            group: snapshot,
            index,
        });

        if reviewing {
            self.state.todos[0].emails.remove(pos);
        } else {
            self.state.groups[self.state.cursor].emails.remove(pos);
        }

        let mut ops = Vec::new();
        match kind {
            ActionKind::Read => ops.push(RemoteOp::MarkRead(vec![email.id.clone()])),
            ActionKind::Skip => {}
            ActionKind::Todo => self.push_todo_email(email),
        }

        // The todo merge above may have refilled the front group, so the
        // emptiness check comes after the side effects.
        let front_empty = if reviewing {
            self.state.todos.first().is_some_and(|g| g.is_empty())
        } else {
            self.state.groups[self.state.cursor].is_empty()
        };
        if front_empty {
            self.advance();
        }
        ops
    }

    /// Inverts the most recent action. No-op when the history is empty.
    pub fn undo(&mut self) -> Vec<RemoteOp> {
        let Some(action) = self.state.history.pop() else {
            return Vec::new();
        };
        match action {
            Action::Group { kind, group, index } => self.undo_group(kind, group, index),
            Action::Email {
                kind,
                email,
                group,
                index,
            } => self.undo_email(kind, email, group, index),
        }
    }

    /// Pulls a todo group out of the todo queue and makes it the next group
    /// to review, clearing Complete and exiting review mode if needed.
    pub fn move_todo_to_front(&mut self, key: &str) -> bool {
        let Some(pos) = self.state.todos.iter().position(|g| g.key == key) else {
            return false;
        };
        let group = self.state.todos.remove(pos);
        let at = self.state.cursor.min(self.state.groups.len());
        self.state.groups.insert(at, group);
        self.state.cursor = at;
        self.state.reviewing = false;
        true
    }

    /// Deletes a todo group outright. No remote effect and no history entry.
    pub fn remove_todo(&mut self, key: &str) -> bool {
        let before = self.state.todos.len();
        self.state.todos.retain(|g| g.key != key);
        self.state.todos.len() != before
    }

    /// Moves past the front group: advance the cursor, or pop the todo head,
    /// switching into review mode when the main queue runs out.
    fn advance(&mut self) {
        if self.in_review() {
            self.state.todos.remove(0);
        } else if self.state.cursor + 1 < self.state.groups.len() {
            self.state.cursor += 1;
        } else {
            self.state.cursor = self.state.groups.len();
            if !self.state.todos.is_empty() {
                self.state.reviewing = true;
            }
        }
    }

    /// Appends a group to the todo queue, merging with an existing group for
    /// the same sender so the queue never holds two groups per key.
    fn push_todo_group(&mut self, group: SenderGroup) {
        if let Some(existing) = self.state.todos.iter_mut().find(|g| g.key == group.key) {
            existing.merge_emails(group.emails);
        } else {
            self.state.todos.push(group);
        }
    }

    fn push_todo_email(&mut self, email: Email) {
        let key = email.sender_key();
        if let Some(existing) = self.state.todos.iter_mut().find(|g| g.key == key) {
            existing.insert_email(email);
        } else {
            self.state.todos.push(SenderGroup {
                key,
                name: email.from_name.clone(),
                emails: vec![email],
            });
        }
    }

    fn undo_group(
        &mut self,
        kind: ActionKind,
        group: SenderGroup,
        index: Option<usize>,
    ) -> Vec<RemoteOp> {
        let mut ops = Vec::new();
        if kind == ActionKind::Read {
            ops.push(RemoteOp::MarkUnread(group.email_ids()));
        }

        match index {
            Some(i) => {
                // Taken while browsing. The group itself never left the main
                // queue; only the merged-in todo copy has to be unwound.
                if kind == ActionKind::Todo {
                    self.remove_ids_from_todos(&group.key, &group.email_ids());
                }
                self.state.cursor = i.min(self.state.groups.len());
                self.state.reviewing = false;
            }
            None => {
                // Taken while reviewing todos: the group goes back to the
                // FRONT of the todo queue (deliberate asymmetry with the
                // append rule for new todos).
                if kind == ActionKind::Todo {
                    // Rotation: pull the group back out of wherever it sits.
                    self.state.todos.retain(|g| g.key != group.key);
                }
                self.state.todos.insert(0, group);
                self.state.reviewing = true;
            }
        }
        ops
    }

    fn undo_email(
        &mut self,
        kind: ActionKind,
        email: Email,
        group: SenderGroup,
        index: Option<usize>,
    ) -> Vec<RemoteOp> {
        let mut ops = Vec::new();
        if kind == ActionKind::Read {
            ops.push(RemoteOp::MarkUnread(vec![email.id.clone()]));
        }
        if kind == ActionKind::Todo {
            self.remove_ids_from_todos(&email.sender_key(), std::slice::from_ref(&email.id));
        }

        // Removing the group's only email advanced past it; that advance has
        // to be reversed too.
        let advanced = group.count() == 1;
        let key = email.sender_key();

        match index {
            Some(i) => {
                let at = if self.state.groups.get(i).is_some_and(|g| g.key == key) {
                    Some(i)
                } else {
                    self.state.groups.iter().position(|g| g.key == key)
                };
                if let Some(at) = at {
                    self.state.groups[at].insert_email(email);
                    if advanced {
                        self.state.cursor = at;
                        self.state.reviewing = false;
                    }
                }
            }
            None => {
                if let Some(existing) = self.state.todos.iter_mut().find(|g| g.key == key) {
                    existing.insert_email(email);
                } else {
                    // The emptied group was popped from the head; restore it
                    // there with the email back in place.
                    self.state.todos.insert(0, group);
                }
                self.state.reviewing = true;
            }
        }
        ops
    }

    fn remove_ids_from_todos(&mut self, key: &str, ids: &[String]) {
        if let Some(pos) = self.state.todos.iter().position(|g| g.key == key) {
            self.state.todos[pos].remove_ids(ids);
            if self.state.todos[pos].is_empty() {
                self.state.todos.remove(pos);
            }
        }
    }

    fn push_action(&mut self, action: Action) {
        self.state.history.push(action);
        if self.state.history.len() > MAX_HISTORY {
            let overflow = self.state.history.len() - MAX_HISTORY;
            self.state.history.drain(0..overflow);
        }
    }
}
