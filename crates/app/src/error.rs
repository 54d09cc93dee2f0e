use engine::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings error: {0}")]
    Settings(String),
}

impl AppError {
    /// Whether the error must stop the process instead of the current pass.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Engine(err) => err.is_fatal(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_engine_errors_are_fatal() {
        let missing = AppError::Engine(EngineError::NotFound("month".to_string()));
        assert!(!missing.is_fatal());
        let config = AppError::Engine(EngineError::Configuration("token".to_string()));
        assert!(config.is_fatal());
        assert!(AppError::Settings("year".to_string()).is_fatal());
    }
}
