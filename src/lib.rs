//! Client library for a document question-answering backend: the wire
//! types, the streaming-answer state machine, and the HTTP client behind
//! the `docq` terminal binary.

pub mod client;
pub mod export;
pub mod protocol;
pub mod transcript;

pub use client::{AnswerStream, BackendClient, ClientError, ClientResult};
pub use protocol::{ConversationTurn, Sender};
pub use transcript::Transcript;
