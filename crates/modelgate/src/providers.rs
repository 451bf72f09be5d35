pub mod anthropic;
pub mod base;
pub mod configs;
pub mod databricks;
pub mod factory;
pub mod oauth;
pub mod ollama;
pub mod openai;
pub mod openrouter;
pub mod utils;

#[cfg(test)]
pub mod mock;
