//! Real-time support chat core for the Ridewire mobility platform.
//!
//! Maintains a persistent duplex connection to a conversational backend
//! (AI bot or human agent), survives network interruption, degrades to a
//! local scripted simulator when no backend is reachable, and enforces the
//! ownership hand-off protocol between bot, agent and system. The
//! presentation layer issues commands to [`orchestrator::ChatOrchestrator`]
//! and re-renders from [`store::SharedStore`] snapshots and
//! [`bus::EventBus`] events.

pub mod analytics;
pub mod bus;
pub mod config;
pub mod conversation;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod ownership;
pub mod protocol;
pub mod simulator;
pub mod storage;
pub mod store;
pub mod transport;

pub use config::ChatConfig;
pub use conversation::{Conversation, Ownership, UserRole};
pub use error::{ChatError, ErrorCode};
pub use message::{ChatMessage, MessageKind};
pub use orchestrator::ChatOrchestrator;
pub use store::SharedStore;
pub use transport::ConnectionStatus;
