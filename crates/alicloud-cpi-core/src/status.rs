//! Resource handles and provider-reported statuses

use serde::{Deserialize, Serialize};

/// Family of provider resources the CPI manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// ECS instance (VM)
    Instance,
    /// Block storage disk
    Disk,
    /// Machine image (stemcell)
    Image,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Instance => write!(f, "instance"),
            ResourceKind::Disk => write!(f, "disk"),
            ResourceKind::Image => write!(f, "image"),
        }
    }
}

/// Opaque, provider-assigned identifier of a single resource
///
/// Handles are never cached across calls: every operation resolves the handle
/// against the provider again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    kind: ResourceKind,
    id: String,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn instance(id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Instance, id)
    }

    pub fn disk(id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Disk, id)
    }

    pub fn image(id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Image, id)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.kind, self.id)
    }
}

/// Status of a resource as last reported by the provider
///
/// Instances, disks and images share one vocabulary so that the runner can wait
/// on any of them. `Absent` is synthetic: the provider reports zero matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Creating,
    Waiting,
    Starting,
    Running,
    Stopping,
    Stopped,
    Available,
    Attaching,
    InUse,
    Detaching,
    Failed,
    Absent,
    /// Status string the adapter does not recognise
    Unknown,
}

/// Coarse lifecycle phase shared by VMs, disks and images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Absent,
    Pending,
    /// Running, Stopped, Available or InUse
    Steady,
    Transitioning,
    Failed,
}

impl ResourceStatus {
    pub fn phase(&self) -> Phase {
        match self {
            ResourceStatus::Absent => Phase::Absent,
            ResourceStatus::Pending | ResourceStatus::Creating | ResourceStatus::Waiting => {
                Phase::Pending
            }
            ResourceStatus::Running
            | ResourceStatus::Stopped
            | ResourceStatus::Available
            | ResourceStatus::InUse => Phase::Steady,
            ResourceStatus::Starting
            | ResourceStatus::Stopping
            | ResourceStatus::Attaching
            | ResourceStatus::Detaching
            | ResourceStatus::Unknown => Phase::Transitioning,
            ResourceStatus::Failed => Phase::Failed,
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Pending => write!(f, "pending"),
            ResourceStatus::Creating => write!(f, "creating"),
            ResourceStatus::Waiting => write!(f, "waiting"),
            ResourceStatus::Starting => write!(f, "starting"),
            ResourceStatus::Running => write!(f, "running"),
            ResourceStatus::Stopping => write!(f, "stopping"),
            ResourceStatus::Stopped => write!(f, "stopped"),
            ResourceStatus::Available => write!(f, "available"),
            ResourceStatus::Attaching => write!(f, "attaching"),
            ResourceStatus::InUse => write!(f, "in_use"),
            ResourceStatus::Detaching => write!(f, "detaching"),
            ResourceStatus::Failed => write!(f, "failed"),
            ResourceStatus::Absent => write!(f, "absent"),
            ResourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_grouping() {
        assert_eq!(ResourceStatus::Pending.phase(), Phase::Pending);
        assert_eq!(ResourceStatus::Waiting.phase(), Phase::Pending);
        assert_eq!(ResourceStatus::Stopped.phase(), Phase::Steady);
        assert_eq!(ResourceStatus::InUse.phase(), Phase::Steady);
        assert_eq!(ResourceStatus::Detaching.phase(), Phase::Transitioning);
        assert_eq!(ResourceStatus::Absent.phase(), Phase::Absent);
    }

    #[test]
    fn test_handle_display() {
        let handle = ResourceHandle::disk("d-1");
        assert_eq!(handle.to_string(), "disk 'd-1'");
        assert_eq!(handle.kind(), ResourceKind::Disk);
        assert_eq!(handle.id(), "d-1");
    }
}
