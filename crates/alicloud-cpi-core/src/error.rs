//! CPI error types

use crate::status::{ResourceHandle, ResourceKind, ResourceStatus};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a single remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// Provider error code (e.g. "IncorrectInstanceStatus")
    pub code: String,

    /// Human readable message
    pub message: String,

    /// Request id, when the provider returned one
    pub request_id: Option<String>,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// The provider rejected the call because the target no longer exists
    pub fn is_not_found(&self) -> bool {
        self.code.ends_with("NotFound")
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// CPI errors
#[derive(Error, Debug)]
pub enum CpiError {
    #[error("{operation}: {handle} not found")]
    NotFound {
        operation: &'static str,
        handle: ResourceHandle,
    },

    #[error("{operation}: provider call for {handle} failed: {source}")]
    Provider {
        operation: &'static str,
        handle: ResourceHandle,
        #[source]
        source: ProviderError,
    },

    #[error(
        "{operation}: timed out after {elapsed:?} waiting for {handle} to become {target} (last status: {last_status})"
    )]
    Timeout {
        operation: &'static str,
        handle: ResourceHandle,
        target: ResourceStatus,
        last_status: ResourceStatus,
        elapsed: Duration,
    },

    #[error("{operation}: aborted by caller at {handle}: last known status = {last_status}")]
    Aborted {
        operation: &'static str,
        handle: ResourceHandle,
        last_status: ResourceStatus,
    },

    #[error("{operation}: aborted by caller before creating a {kind}")]
    Cancelled {
        operation: &'static str,
        kind: ResourceKind,
    },

    #[error("{operation}: creating a {kind} in zone '{zone}' failed: {source}")]
    CreateFailed {
        operation: &'static str,
        kind: ResourceKind,
        zone: String,
        #[source]
        source: ProviderError,
    },

    #[error("{operation}: {handle} is {status}: {reason}")]
    InvalidState {
        operation: &'static str,
        handle: ResourceHandle,
        status: ResourceStatus,
        reason: String,
    },

    #[error("creating VM failed, instance '{vm_id}' was left for cleanup: {source}")]
    VmCreationFailed {
        vm_id: String,
        #[source]
        source: Box<CpiError>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CpiError {
    pub fn not_found(operation: &'static str, handle: &ResourceHandle) -> Self {
        CpiError::NotFound {
            operation,
            handle: handle.clone(),
        }
    }

    pub fn invalid_state(
        operation: &'static str,
        handle: &ResourceHandle,
        status: ResourceStatus,
        reason: impl Into<String>,
    ) -> Self {
        CpiError::InvalidState {
            operation,
            handle: handle.clone(),
            status,
            reason: reason.into(),
        }
    }

    /// Handle of the resource the error is about, if any
    pub fn handle(&self) -> Option<&ResourceHandle> {
        match self {
            CpiError::NotFound { handle, .. }
            | CpiError::Provider { handle, .. }
            | CpiError::Timeout { handle, .. }
            | CpiError::Aborted { handle, .. }
            | CpiError::InvalidState { handle, .. } => Some(handle),
            CpiError::VmCreationFailed { source, .. } => source.handle(),
            CpiError::Cancelled { .. }
            | CpiError::CreateFailed { .. }
            | CpiError::InvalidArgument(_)
            | CpiError::Config(_) => None,
        }
    }

    /// Error type reported to the caller of the CPI
    pub fn kind(&self) -> &'static str {
        match self {
            CpiError::NotFound { handle, .. } => match handle.kind() {
                ResourceKind::Instance => "Bosh::Clouds::VMNotFound",
                ResourceKind::Disk => "Bosh::Clouds::DiskNotFound",
                ResourceKind::Image => "Bosh::Clouds::CloudError",
            },
            CpiError::VmCreationFailed { .. } => "Bosh::Clouds::VMCreationFailed",
            CpiError::InvalidArgument(_) => "InvalidCall",
            CpiError::Provider { .. }
            | CpiError::Timeout { .. }
            | CpiError::Aborted { .. }
            | CpiError::Cancelled { .. }
            | CpiError::CreateFailed { .. }
            | CpiError::InvalidState { .. }
            | CpiError::Config(_) => "Bosh::Clouds::CloudError",
        }
    }

    /// Whether retrying the whole operation later may succeed
    pub fn ok_to_retry(&self) -> bool {
        matches!(
            self,
            CpiError::Timeout { .. }
                | CpiError::Aborted { .. }
                | CpiError::Cancelled { .. }
                | CpiError::InvalidState { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CpiError>;

/// Attaches operation and handle context to a raw provider result
pub trait ProviderResultExt<T> {
    fn for_handle(self, operation: &'static str, handle: &ResourceHandle) -> Result<T>;
}

impl<T> ProviderResultExt<T> for ProviderResult<T> {
    fn for_handle(self, operation: &'static str, handle: &ResourceHandle) -> Result<T> {
        self.map_err(|source| CpiError::Provider {
            operation,
            handle: handle.clone(),
            source,
        })
    }
}
