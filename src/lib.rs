//! Compass: a chat-style questionnaire that asks a handful of fixed
//! questions and turns the answers into advice from a generative language
//! model.
//!
//! [`conversation`] holds the state machine, [`session`] runs it on tokio,
//! and [`web_server`] and [`chat`] are the two front ends.

pub mod advice;
pub mod catalog;
pub mod chat;
pub mod constants;
pub mod conversation;
pub mod session;
pub mod web_server;

pub use advice::{AdviceClient, AdviceError, AdvisorConfig};
pub use catalog::{Catalog, CatalogError, Question};
pub use conversation::{Conversation, Effect, Event, Message, Phase, Sender, TransitionError, ViewState};
pub use session::{Pacing, Session};
