use serde::Serialize;

use crate::gateway::{AnswerOutcome, GatewayAnswer, NO_ANSWER_TRANSCRIPT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Query behind an assistant turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Ordered transcript of one chat session, kept for display only.
///
/// Owned by whoever runs the session; nothing in it is fed back into query generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationContext {
    turns: Vec<Turn>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, question: &str) {
        self.turns.push(Turn {
            role: Role::User,
            content: question.to_string(),
            query: None,
        });
    }

    pub fn push_assistant(&mut self, answer: &GatewayAnswer) {
        let content = match &answer.outcome {
            AnswerOutcome::Answered(text) | AnswerOutcome::Failed(text) => text.clone(),
            AnswerOutcome::NoAnswer => NO_ANSWER_TRANSCRIPT.to_string(),
        };
        self.turns.push(Turn {
            role: Role::Assistant,
            content,
            query: Some(answer.query.clone()),
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_answer_turn_uses_notice() {
        let mut context = ConversationContext::new();
        context.push_user("없는 회사?");
        context.push_assistant(&GatewayAnswer {
            outcome: AnswerOutcome::NoAnswer,
            query: "MATCH (c:Company) RETURN c LIMIT 50".into(),
        });

        assert_eq!(context.len(), 2);
        assert_eq!(context.turns()[0].role, Role::User);
        assert_eq!(context.turns()[1].content, NO_ANSWER_TRANSCRIPT);
        assert!(context.turns()[1].query.is_some());

        context.clear();
        assert!(context.is_empty());
    }
}
