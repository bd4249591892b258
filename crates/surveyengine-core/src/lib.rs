pub mod config;
pub mod domain;
pub mod error;
pub mod resolver;

pub use config::SurveyConfig;
pub use error::{Result, SurveyError};
