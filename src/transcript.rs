use crate::protocol::ConversationTurn;

/// Fixed text recorded as a model turn when the ask request fails before
/// any of the answer has arrived.
pub const REQUEST_FAILED_TEXT: &str = "Error: could not reach the backend.";

/// Whether an answer is currently streaming in. `Active` owns the
/// accumulation so far; the open model turn's text is a projection of it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum AnswerState {
    #[default]
    Idle,
    Active {
        accumulated: String,
    },
}

/// The ordered conversation plus the state of the answer streaming into it.
///
/// Turns are append-only with one exception: while an answer is open, each
/// fragment replaces the open model turn's text with the full accumulation,
/// so the turn count stays flat while the text grows.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
    answer: AnswerState,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True while fragments for an answer are still being folded in.
    pub fn answer_in_progress(&self) -> bool {
        matches!(self.answer, AnswerState::Active { .. })
    }

    /// Records a submitted question and returns the history snapshot to send
    /// as context, taken before the new user turn. Returns `None` when the
    /// text is blank: nothing is recorded and no request should go out. The
    /// turn keeps the text exactly as typed, untrimmed.
    pub fn begin_question(&mut self, text: &str) -> Option<Vec<ConversationTurn>> {
        if text.trim().is_empty() {
            return None;
        }
        let history = self.turns.clone();
        self.answer = AnswerState::Idle;
        self.turns.push(ConversationTurn::user(text));
        Some(history)
    }

    /// Folds one decoded fragment into the open answer. The first fragment
    /// appends a model turn; every later one replaces that turn's text with
    /// the accumulation so far.
    pub fn apply_fragment(&mut self, fragment: &str) {
        match &mut self.answer {
            AnswerState::Idle => {
                let accumulated = fragment.to_string();
                self.turns.push(ConversationTurn::model(accumulated.clone()));
                self.answer = AnswerState::Active { accumulated };
            }
            AnswerState::Active { accumulated } => {
                accumulated.push_str(fragment);
                if let Some(last) = self.turns.last_mut() {
                    last.text = accumulated.clone();
                }
            }
        }
    }

    /// Closes the open answer. Whatever text has accumulated, including a
    /// partial answer cut off mid-stream, stays in the transcript as a
    /// regular model turn.
    pub fn finish_answer(&mut self) {
        self.answer = AnswerState::Idle;
    }

    /// The ask request failed before any fragment arrived: append one model
    /// turn carrying the fixed failure text.
    pub fn record_request_failure(&mut self) {
        self.answer = AnswerState::Idle;
        self.turns.push(ConversationTurn::model(REQUEST_FAILED_TEXT));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Sender;

    fn model_turn_count(transcript: &Transcript) -> usize {
        transcript
            .turns()
            .iter()
            .filter(|turn| turn.sender == Sender::Model)
            .count()
    }

    #[test]
    fn blank_question_is_a_no_op() {
        let mut transcript = Transcript::new();
        assert!(transcript.begin_question("").is_none());
        assert!(transcript.begin_question("   \t\n  ").is_none());
        assert!(transcript.is_empty());
    }

    #[test]
    fn question_keeps_raw_text_and_snapshots_prior_history() {
        let mut transcript = Transcript::new();
        transcript.begin_question("first").unwrap();
        transcript.apply_fragment("answer one");
        transcript.finish_answer();

        let history = transcript.begin_question("  second?  ").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "first");
        assert_eq!(history[1].text, "answer one");
        assert_eq!(transcript.turns().last().unwrap().text, "  second?  ");
    }

    #[test]
    fn fragments_merge_into_a_single_model_turn() {
        let mut transcript = Transcript::new();
        transcript.begin_question("q").unwrap();
        transcript.apply_fragment("The answer ");
        transcript.apply_fragment("is ");
        transcript.apply_fragment("42.");
        transcript.finish_answer();

        assert_eq!(transcript.turns().len(), 2);
        assert_eq!(model_turn_count(&transcript), 1);
        let last = transcript.turns().last().unwrap();
        assert_eq!(last.sender, Sender::Model);
        assert_eq!(last.text, "The answer is 42.");
    }

    #[test]
    fn each_answer_gets_its_own_turn() {
        let mut transcript = Transcript::new();
        transcript.begin_question("one").unwrap();
        transcript.apply_fragment("first answer");
        transcript.finish_answer();
        transcript.begin_question("two").unwrap();
        transcript.apply_fragment("second ");
        transcript.apply_fragment("answer");
        transcript.finish_answer();

        assert_eq!(transcript.turns().len(), 4);
        assert_eq!(transcript.turns()[1].text, "first answer");
        assert_eq!(transcript.turns()[3].text, "second answer");
    }

    #[test]
    fn request_failure_appends_one_fixed_turn() {
        let mut transcript = Transcript::new();
        transcript.begin_question("q").unwrap();
        transcript.record_request_failure();

        assert_eq!(transcript.turns().len(), 2);
        assert_eq!(model_turn_count(&transcript), 1);
        let last = transcript.turns().last().unwrap();
        assert_eq!(last.sender, Sender::Model);
        assert_eq!(last.text, REQUEST_FAILED_TEXT);
        assert!(!transcript.answer_in_progress());
    }

    #[test]
    fn interrupted_stream_keeps_partial_text() {
        let mut transcript = Transcript::new();
        transcript.begin_question("q").unwrap();
        transcript.apply_fragment("partial ans");
        transcript.finish_answer();

        assert_eq!(transcript.turns().last().unwrap().text, "partial ans");
        assert!(!transcript.answer_in_progress());

        // The sealed turn is never reopened by a later answer.
        transcript.begin_question("again").unwrap();
        transcript.apply_fragment("fresh");
        assert_eq!(transcript.turns().len(), 4);
        assert_eq!(transcript.turns()[1].text, "partial ans");
        assert_eq!(transcript.turns()[3].text, "fresh");
    }
}
