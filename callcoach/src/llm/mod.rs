mod api;
pub mod prompts;
mod provider;

pub use api::LlmApiClient;
pub use prompts::{ChunkPosition, Prompt};
pub use provider::{InferenceClient, LlmBackend, LlmProvider};
