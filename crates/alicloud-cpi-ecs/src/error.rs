//! ECS adapter error types

use alicloud_cpi_core::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EcsError {
    #[error("aliyun CLI not found. Please install it: https://github.com/aliyun/aliyun-cli")]
    AliyunNotFound,

    #[error("aliyun command failed: {0}")]
    Api(ProviderError),

    #[error("Unexpected response from {api}: {message}")]
    MalformedResponse { api: String, message: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<EcsError> for ProviderError {
    fn from(err: EcsError) -> Self {
        let message = err.to_string();
        match err {
            EcsError::Api(err) => err,
            EcsError::AliyunNotFound => ProviderError::new("CliUnavailable", message),
            EcsError::MalformedResponse { .. } | EcsError::JsonError(_) => {
                ProviderError::new("MalformedResponse", message)
            }
            EcsError::IoError(_) => ProviderError::new("CliFailure", message),
        }
    }
}

pub type Result<T> = std::result::Result<T, EcsError>;
