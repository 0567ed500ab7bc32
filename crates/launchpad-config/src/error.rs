//! Configuration parsing errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<ConfigError> for launchpad_core::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => launchpad_core::Error::Io(e),
            other => launchpad_core::Error::InvalidInput(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_core_error() {
        let err: launchpad_core::Error = ConfigError::invalid("version", "no version declaration found").into();
        assert!(matches!(err, launchpad_core::Error::InvalidInput(_)));
        assert!(err.to_string().contains("no version declaration found"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "ver.py");
        let err: launchpad_core::Error = ConfigError::Io(io).into();
        assert!(matches!(err, launchpad_core::Error::Io(_)));
    }
}
