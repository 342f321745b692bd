//! Slack interface for deskhand.
//!
//! - **Payloads** (`payloads`) - Events API and interactivity wire types
//! - **Events** (`events`) - normalized events and the handler dispatcher
//! - **Mentions** (`mention`) - identity gate, command interpretation, catch-all apology
//! - **Confirmation** (`confirm`) - stateless confirm/cancel for bulk actions
//! - **Bulk actions** (`bulk`) - per-ticket assign, close and reply passes
//! - **Block Kit** (`blocks`) - message builders for every reply deskhand posts
//!
//! # Architecture
//!
//! ```text
//! HTTP ingress → EventDispatcher → MentionDispatcher / ConfirmationHandler
//!                                        ↓
//!                      BulkActionExecutor → repositories
//!                                        ↓
//!                         ChatResponder ← Block Kit reply
//! ```

pub mod blocks;
pub mod bulk;
pub mod confirm;
pub mod events;
pub mod identity;
pub mod mention;
pub mod payloads;
pub mod responder;
pub mod stats;
