use thiserror::Error;

/// Errors raised while gathering, modelling or storing a forecast
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForecastError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Whether the failure is on the remote side and worth trying again next run
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Request { .. } => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for ForecastError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<csv::Error> for ForecastError {
    fn from(e: csv::Error) -> Self {
        Self::Parse(format!("csv: {e}"))
    }
}

impl From<zip::result::ZipError> for ForecastError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}

impl From<quick_xml::Error> for ForecastError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Parse(format!("xml: {e}"))
    }
}

pub type ForecastResult<T> = std::result::Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let busy = ForecastError::Http {
            status: 503,
            url: "https://example.invalid".into(),
        };
        let missing = ForecastError::Http {
            status: 404,
            url: "https://example.invalid".into(),
        };
        assert!(busy.is_transient());
        assert!(!missing.is_transient());
        assert!(!ForecastError::parse("bad").is_transient());
    }

    #[test]
    fn test_display() {
        let e = ForecastError::Http {
            status: 401,
            url: "https://api.example.invalid/x".into(),
        };
        assert_eq!(e.to_string(), "HTTP 401 from https://api.example.invalid/x");
    }
}
