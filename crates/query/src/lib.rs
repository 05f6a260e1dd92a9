pub mod conversation;
pub mod gateway;
pub mod llm;
pub mod similarity;
pub mod text2cypher;

pub use conversation::{ConversationContext, Role, Turn};
pub use gateway::{
    AnswerOutcome, ERROR_PREFIX, ERROR_QUERY, GatewayAnswer, NO_ANSWER_NOTICE, NO_ANSWER_TRANSCRIPT,
    QueryGateway,
};
pub use llm::{QueryLLM, TextGenerator};
pub use similarity::SimilaritySearch;
pub use text2cypher::{GuardError, READ_PROCEDURES, ReadOnlyGuard, build_cypher_prompt, clean_generated};
