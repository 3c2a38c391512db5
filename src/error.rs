use thiserror::Error;

#[derive(Error, Debug)]
pub enum SalesAnalyticsError {
    #[error(
        "Missing required columns: {}. Found columns: {}",
        .missing.join(", "),
        .found.join(", ")
    )]
    SchemaError {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("Field '{field}' is not present in the dataset; {view} is unavailable")]
    MissingFieldError { field: String, view: String },

    #[error("Invalid parameter '{name}': {details}")]
    InvalidParameter { name: String, details: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SalesAnalyticsError {
    pub fn invalid_parameter(name: &str, details: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            details: details.into(),
        }
    }

    pub fn missing_field(field: &str, view: &str) -> Self {
        Self::MissingFieldError {
            field: field.to_string(),
            view: view.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SalesAnalyticsError>;
