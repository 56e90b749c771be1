pub mod admin;
pub mod app;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod messenger;
pub mod orchestrator;
pub mod prompting;
pub mod store;
pub mod tools;
pub mod types;
