pub mod mock;
#[cfg(feature = "llm-integration")]
pub mod openai;

pub use mock::MockLlmService;
#[cfg(feature = "llm-integration")]
pub use openai::OpenAILlmService;
