//! ECS provider client backed by the aliyun CLI

use crate::aliyun::{
    Aliyun, CreateDiskConfig, DiskFilter, DiskInfo, ImageInfo, InstanceInfo, RunInstanceConfig,
};
use crate::error::EcsError;
use alicloud_cpi_core::{
    CreateDiskRequest, CreateInstanceRequest, Disk, DiskType, EcsClient, Image, ImageOwner,
    Instance, ProviderResult, ResourceStatus,
};
use async_trait::async_trait;
use std::collections::BTreeMap;

fn instance_status(status: &str) -> ResourceStatus {
    match status {
        "Pending" => ResourceStatus::Pending,
        "Starting" => ResourceStatus::Starting,
        "Running" => ResourceStatus::Running,
        "Stopping" => ResourceStatus::Stopping,
        "Stopped" => ResourceStatus::Stopped,
        _ => ResourceStatus::Unknown,
    }
}

fn disk_status(status: &str) -> ResourceStatus {
    match status {
        "Creating" => ResourceStatus::Creating,
        "Available" => ResourceStatus::Available,
        "Attaching" => ResourceStatus::Attaching,
        "In_use" => ResourceStatus::InUse,
        "Detaching" => ResourceStatus::Detaching,
        _ => ResourceStatus::Unknown,
    }
}

fn image_status(status: &str) -> ResourceStatus {
    match status {
        "Creating" => ResourceStatus::Creating,
        "Waiting" => ResourceStatus::Waiting,
        "Available" => ResourceStatus::Available,
        "CreateFailed" | "UnAvailable" => ResourceStatus::Failed,
        _ => ResourceStatus::Unknown,
    }
}

impl From<InstanceInfo> for Instance {
    fn from(info: InstanceInfo) -> Self {
        let private_ips = info.private_ips();
        let tags = info.tag_map();
        Self {
            status: instance_status(&info.status),
            id: info.id,
            name: info.name.filter(|n| !n.is_empty()),
            zone_id: info.zone_id,
            instance_type: info.instance_type,
            private_ips,
            tags,
        }
    }
}

impl From<DiskInfo> for Disk {
    fn from(info: DiskInfo) -> Self {
        Self {
            status: disk_status(&info.status),
            id: info.id,
            instance_id: Some(info.instance_id).filter(|id| !id.is_empty()),
            zone_id: info.zone_id,
            size_gb: info.size,
            category: info.category,
            disk_type: if info.disk_type == "system" {
                DiskType::System
            } else {
                DiskType::Data
            },
        }
    }
}

impl From<ImageInfo> for Image {
    fn from(info: ImageInfo) -> Self {
        let owner = match info.owner_alias.as_str() {
            "self" => ImageOwner::Account,
            "system" => ImageOwner::System,
            "marketplace" => ImageOwner::Marketplace,
            _ => ImageOwner::Shared,
        };
        Self {
            status: image_status(&info.status),
            id: info.id,
            owner,
        }
    }
}

impl From<&CreateInstanceRequest> for RunInstanceConfig {
    fn from(request: &CreateInstanceRequest) -> Self {
        Self {
            image_id: request.image_id.clone(),
            instance_type: request.instance_type.clone(),
            security_group_id: request.security_group_id.clone(),
            zone_id: request.zone_id.clone(),
            vswitch_id: request.vswitch_id.clone(),
            private_ip: request.private_ip.clone(),
            instance_name: request.instance_name.clone(),
            key_pair_name: request.key_pair_name.clone(),
            system_disk_category: request.system_disk.category.clone(),
            system_disk_size_gb: request.system_disk.size_gb,
            tags: request.tags.clone(),
        }
    }
}

/// ECS provider client
pub struct AliyunEcs {
    aliyun: Aliyun,
}

impl AliyunEcs {
    pub fn new(aliyun: Aliyun) -> Self {
        Self { aliyun }
    }
}

#[async_trait]
impl EcsClient for AliyunEcs {
    fn region(&self) -> &str {
        self.aliyun.region()
    }

    async fn describe_instance(&self, id: &str) -> ProviderResult<Option<Instance>> {
        let instances = self.aliyun.describe_instances(&[id]).await?;
        Ok(instances.into_iter().next().map(Instance::from))
    }

    async fn run_instance(&self, request: &CreateInstanceRequest) -> ProviderResult<String> {
        let ids = self
            .aliyun
            .run_instances(&RunInstanceConfig::from(request))
            .await?;
        match ids.into_iter().next() {
            Some(id) => {
                tracing::info!("Instance {} requested in {}", id, self.aliyun.region());
                Ok(id)
            }
            None => Err(EcsError::MalformedResponse {
                api: "RunInstances".to_string(),
                message: "empty InstanceIdSet".to_string(),
            }
            .into()),
        }
    }

    async fn start_instance(&self, id: &str) -> ProviderResult<()> {
        Ok(self.aliyun.start_instance(id).await?)
    }

    async fn stop_instance(&self, id: &str, force: bool) -> ProviderResult<()> {
        Ok(self.aliyun.stop_instance(id, force).await?)
    }

    async fn reboot_instance(&self, id: &str, force: bool) -> ProviderResult<()> {
        Ok(self.aliyun.reboot_instance(id, force).await?)
    }

    async fn delete_instance(&self, id: &str) -> ProviderResult<()> {
        Ok(self.aliyun.delete_instance(id).await?)
    }

    async fn tag_instance(&self, id: &str, tags: &BTreeMap<String, String>) -> ProviderResult<()> {
        Ok(self.aliyun.add_tags(id, tags).await?)
    }

    async fn describe_disk(&self, id: &str) -> ProviderResult<Option<Disk>> {
        let ids = [id];
        let disks = self.aliyun.describe_disks(DiskFilter::Ids(&ids)).await?;
        Ok(disks.into_iter().next().map(Disk::from))
    }

    async fn describe_instance_disks(&self, instance_id: &str) -> ProviderResult<Vec<Disk>> {
        let disks = self
            .aliyun
            .describe_disks(DiskFilter::Instance(instance_id))
            .await?;
        Ok(disks.into_iter().map(Disk::from).collect())
    }

    async fn create_disk(&self, request: &CreateDiskRequest) -> ProviderResult<String> {
        let config = CreateDiskConfig {
            zone_id: request.zone_id.clone(),
            size_gb: request.size_gb,
            category: request.category.clone(),
            name: request.name.clone(),
        };
        Ok(self.aliyun.create_disk(&config).await?)
    }

    async fn delete_disk(&self, id: &str) -> ProviderResult<()> {
        Ok(self.aliyun.delete_disk(id).await?)
    }

    async fn attach_disk(&self, instance_id: &str, disk_id: &str) -> ProviderResult<()> {
        Ok(self.aliyun.attach_disk(instance_id, disk_id).await?)
    }

    async fn detach_disk(&self, instance_id: &str, disk_id: &str) -> ProviderResult<()> {
        Ok(self.aliyun.detach_disk(instance_id, disk_id).await?)
    }

    async fn describe_image(&self, id: &str) -> ProviderResult<Option<Image>> {
        let images = self.aliyun.describe_images(id).await?;
        Ok(images.into_iter().next().map(Image::from))
    }

    async fn delete_image(&self, id: &str) -> ProviderResult<()> {
        Ok(self.aliyun.delete_image(id).await?)
    }
}
