pub mod cli;
pub mod error;
pub mod ingestion;
pub mod models;
pub mod provider;
pub mod query;
pub mod store;
