use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid detection: {0}")]
    InvalidDetection(String),

    #[error("Brand database error: {0}")]
    BrandDatabase(String),

    #[error("Grouping error: {0}")]
    Grouping(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::Deserialization(err.to_string())
        } else {
            Error::Serialization(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidImage("empty payload".to_string());
        assert_eq!(err.to_string(), "Invalid image: empty payload");
    }

    #[test]
    fn test_json_syntax_error_maps_to_deserialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        match Error::from(json_err) {
            Error::Deserialization(_) => {}
            other => panic!("Expected Deserialization error, got {:?}", other),
        }
    }
}
