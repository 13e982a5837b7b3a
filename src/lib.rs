//! Unread-mail triage engine.
//!
//! Fetches every unread inbox message, groups them by sender into a deck of
//! cards, and lets the host work through the deck one decision at a time:
//! mark read, skip, or defer to a todo queue, with LIFO undo. Local state is
//! the source of truth; remote label mutations are dispatched fire-and-forget
//! and the full queue state is persisted after every mutation.

pub mod auth;
pub mod email;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod gmail;
pub mod group;
pub mod mutate;
pub mod parser;
pub mod persist;
pub mod session;

pub use auth::{StaticTokenProvider, TokenError, TokenProvider};
pub use email::Email;
pub use engine::{Action, ActionKind, Phase, QueueState, RemoteOp, TriageEngine};
pub use error::{ApiError, FetchError};
pub use fetch::{FetchConfig, Progress, ProgressFn, fetch_unread};
pub use gmail::{HttpMailboxClient, MailboxApi};
pub use group::{SenderGroup, group_by_sender};
pub use mutate::MutationClient;
pub use parser::parse_message;
pub use persist::{FileStore, MemoryStore, StateStore};
pub use session::{SessionConfig, StartOutcome, TriageEvent, TriageSession};
