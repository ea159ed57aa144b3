pub mod extract;
pub mod llm;
pub mod prompts;
pub mod session;
pub mod stages;
pub mod workflow;
