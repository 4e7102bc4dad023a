use serde::{Deserialize, Serialize};

/// Who produced a conversation turn.
///
/// The wire format knows exactly two values. Anything else read back from
/// stored history collapses to `Model` instead of being passed through or
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Sender {
    User,
    Model,
}

impl From<String> for Sender {
    fn from(value: String) -> Self {
        if value == "user" {
            Sender::User
        } else {
            Sender::Model
        }
    }
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Model => "model",
        }
    }
}

/// One entry of the conversation, in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub sender: Sender,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Model,
            text: text.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskRequest {
    pub session_id: String,
    pub question: String,
    pub chat_history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportRequest {
    pub chat_history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub message: String,
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sender_serializes_lowercase() {
        let turn = ConversationTurn::user("hi");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value, json!({"sender": "user", "text": "hi"}));

        let turn = ConversationTurn::model("hello");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value, json!({"sender": "model", "text": "hello"}));
    }

    #[test]
    fn unknown_sender_coerces_to_model() {
        let turn: ConversationTurn =
            serde_json::from_value(json!({"sender": "assistant", "text": "hi"})).unwrap();
        assert_eq!(turn.sender, Sender::Model);

        let turn: ConversationTurn =
            serde_json::from_value(json!({"sender": "user", "text": "hi"})).unwrap();
        assert_eq!(turn.sender, Sender::User);
    }

    #[test]
    fn coerced_sender_round_trips_as_model() {
        let turn: ConversationTurn =
            serde_json::from_value(json!({"sender": "bot", "text": "hi"})).unwrap();
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["sender"], "model");
    }

    #[test]
    fn ask_request_wire_shape() {
        let request = AskRequest {
            session_id: "abc123".to_string(),
            question: "What does chapter 2 cover?".to_string(),
            chat_history: vec![ConversationTurn::user("hi"), ConversationTurn::model("hello")],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["session_id"], "abc123");
        assert_eq!(value["question"], "What does chapter 2 cover?");
        assert_eq!(value["chat_history"].as_array().unwrap().len(), 2);
        assert_eq!(value["chat_history"][1]["sender"], "model");
    }
}
