//! ECS provider client trait definition

use crate::error::ProviderResult;
use crate::status::ResourceStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provider limit on tags per resource
pub const MAX_TAGS: usize = 20;

/// Provider limit on the length of a tag key or value, in characters
pub const MAX_TAG_LEN: usize = 128;

/// Narrow call surface over the ECS control plane
///
/// Every method issues exactly one remote call and returns either the
/// provider's answer or the provider's error. There is no retry and no local
/// state here; polling and idempotence live in the runner and the handlers.
///
/// Describe calls return `Ok(None)` when the provider reports zero matches.
#[async_trait]
pub trait EcsClient: Send + Sync {
    /// Region every call is scoped to
    fn region(&self) -> &str;

    async fn describe_instance(&self, id: &str) -> ProviderResult<Option<Instance>>;

    /// Create an instance and let the provider start it; returns its id
    async fn run_instance(&self, request: &CreateInstanceRequest) -> ProviderResult<String>;

    async fn start_instance(&self, id: &str) -> ProviderResult<()>;

    async fn stop_instance(&self, id: &str, force: bool) -> ProviderResult<()>;

    async fn reboot_instance(&self, id: &str, force: bool) -> ProviderResult<()>;

    async fn delete_instance(&self, id: &str) -> ProviderResult<()>;

    async fn tag_instance(&self, id: &str, tags: &BTreeMap<String, String>) -> ProviderResult<()>;

    async fn describe_disk(&self, id: &str) -> ProviderResult<Option<Disk>>;

    /// All disks currently attached to an instance, system disk included
    async fn describe_instance_disks(&self, instance_id: &str) -> ProviderResult<Vec<Disk>>;

    /// Create a disk; returns its id
    async fn create_disk(&self, request: &CreateDiskRequest) -> ProviderResult<String>;

    async fn delete_disk(&self, id: &str) -> ProviderResult<()>;

    async fn attach_disk(&self, instance_id: &str, disk_id: &str) -> ProviderResult<()>;

    async fn detach_disk(&self, instance_id: &str, disk_id: &str) -> ProviderResult<()>;

    async fn describe_image(&self, id: &str) -> ProviderResult<Option<Image>>;

    async fn delete_image(&self, id: &str) -> ProviderResult<()>;
}

/// Instance descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: Option<String>,
    pub status: ResourceStatus,
    pub zone_id: String,
    pub instance_type: Option<String>,
    pub private_ips: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

/// Disk descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    pub status: ResourceStatus,

    /// Instance the disk is attached to
    pub instance_id: Option<String>,

    pub zone_id: String,
    pub size_gb: u32,
    pub category: String,
    pub disk_type: DiskType,
}

impl Disk {
    pub fn is_attached_to(&self, instance_id: &str) -> bool {
        self.instance_id.as_deref() == Some(instance_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskType {
    System,
    Data,
}

/// Image descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub status: ResourceStatus,
    pub owner: ImageOwner,
}

/// Who owns an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOwner {
    /// Owned by the configured account
    Account,
    System,
    Shared,
    Marketplace,
}

/// Parameters for creating an instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub image_id: String,
    pub instance_type: String,
    pub zone_id: Option<String>,
    pub security_group_id: String,
    pub vswitch_id: Option<String>,
    pub private_ip: Option<String>,
    pub instance_name: Option<String>,
    pub key_pair_name: Option<String>,
    pub system_disk: SystemDisk,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDisk {
    pub category: Option<String>,
    pub size_gb: Option<u32>,
}

/// Parameters for creating a data disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDiskRequest {
    pub zone_id: String,
    pub size_gb: u32,
    pub category: String,
    pub name: Option<String>,
}
