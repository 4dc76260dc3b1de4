pub mod admin;
pub mod alerts;
pub mod config;
pub mod error;
pub mod ingest;
pub mod investigate;
pub mod llm;
pub mod metrics;
pub mod responder;
pub mod session;
pub mod store;
