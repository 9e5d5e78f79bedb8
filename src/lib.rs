pub mod catalog;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod gate;
pub mod ollama;
pub mod storage;
pub mod transcriber;
pub mod worker;

pub use config::Settings;
pub use database::Database;
pub use error::{PipelineError, Result};
pub use gate::{GatePolicy, SafetyGate};
pub use worker::{PassOutcome, Pipeline, PipelineOptions, Services};
