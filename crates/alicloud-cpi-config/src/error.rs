use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "CPI configuration file not found. Looked in:\n\
        - the --config argument\n\
        - the ALICLOUD_CPI_CONFIG environment variable\n\
        - ./cpi.json\n\
        - ~/.config/alicloud-cpi/cpi.json"
    )]
    ConfigNotFound,

    #[error("Configuration file does not exist: {0}")]
    MissingFile(String),

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("No image configured for stemcell '{stemcell}' in region '{region}'")]
    NoImage { stemcell: String, region: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for alicloud_cpi_core::CpiError {
    fn from(err: ConfigError) -> Self {
        alicloud_cpi_core::CpiError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
