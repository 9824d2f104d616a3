// lib.rs - Scene-to-video generation pipeline
pub mod config;
pub mod error;
pub mod services;
pub mod style;
pub mod workflow;

pub use config::Settings;
pub use error::{CollaboratorError, PipelineError, Result};
pub use services::Services;
pub use workflow::{PipelineExecutor, Step, TaskConfig, TaskState};
