//! Incremental job listing acquisition and profile matching.

pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod extraction;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod profile;
pub mod sources;
pub mod stats;
pub mod store;

pub use error::ScoutError;
pub use pipeline::{Pipeline, RunReport};
