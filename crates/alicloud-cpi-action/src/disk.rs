//! Disk handlers

use crate::props::DiskCloudProps;
use crate::{DiskLifecycle, already_gone, require_present};
use alicloud_cpi_config::CpiConfig;
use alicloud_cpi_core::{
    CpiError, CreateDiskRequest, DiskType, LifecycleRunner, OperationContext, ProviderResultExt,
    ResourceHandle, ResourceKind, ResourceStatus, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const DEFAULT_CATEGORY: &str = "cloud_efficiency";
const MIN_DISK_GB: u64 = 20;

/// Round a size in MiB up to whole GiB, never below the provider minimum
fn disk_size_gb(size_mib: u64) -> u64 {
    size_mib.div_ceil(1024).max(MIN_DISK_GB)
}

pub struct DiskHandler {
    runner: Arc<LifecycleRunner>,
    config: Arc<CpiConfig>,
}

impl DiskHandler {
    pub fn new(runner: Arc<LifecycleRunner>, config: Arc<CpiConfig>) -> Self {
        Self { runner, config }
    }

    /// Zone of the VM the disk is meant for, else the configured zone
    async fn placement(&self, vm_id: Option<&str>, ctx: &OperationContext) -> Result<String> {
        if let Some(vm_id) = vm_id {
            return match self.runner.instance(vm_id, ctx).await? {
                Some(instance) => Ok(instance.zone_id),
                None => Err(CpiError::not_found(
                    ctx.operation(),
                    &ResourceHandle::instance(vm_id),
                )),
            };
        }
        self.config.alicloud().zone_id.clone().ok_or_else(|| {
            CpiError::InvalidArgument(format!(
                "{}: no VM given and no zone_id configured",
                ctx.operation()
            ))
        })
    }
}

#[async_trait]
impl DiskLifecycle for DiskHandler {
    #[instrument(skip_all, fields(size_mib = size_mib))]
    async fn create_disk(
        &self,
        size_mib: u64,
        props: &DiskCloudProps,
        vm_id: Option<&str>,
        ctx: &OperationContext,
    ) -> Result<String> {
        if size_mib == 0 {
            return Err(CpiError::InvalidArgument(format!(
                "{}: disk size must be positive",
                ctx.operation()
            )));
        }
        let size_gb = u32::try_from(disk_size_gb(size_mib)).map_err(|_| {
            CpiError::InvalidArgument(format!(
                "{}: disk size {size_mib} MiB is too large",
                ctx.operation()
            ))
        })?;
        let request = CreateDiskRequest {
            zone_id: self.placement(vm_id, ctx).await?,
            size_gb,
            category: props
                .category
                .clone()
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            name: None,
        };

        let Some(created) = self
            .runner
            .cancellable(ctx, self.runner.client().create_disk(&request))
            .await
        else {
            return Err(CpiError::Cancelled {
                operation: ctx.operation(),
                kind: ResourceKind::Disk,
            });
        };
        let disk_id = created.map_err(|source| CpiError::CreateFailed {
            operation: ctx.operation(),
            kind: ResourceKind::Disk,
            zone: request.zone_id.clone(),
            source,
        })?;
        info!(disk = %disk_id, zone = %request.zone_id, size_gb, "Disk created");

        self.runner
            .wait_from(
                &ResourceHandle::disk(&disk_id),
                ResourceStatus::Creating,
                ResourceStatus::Available,
                ctx,
            )
            .await?;
        Ok(disk_id)
    }

    #[instrument(skip_all, fields(disk = %disk_id))]
    async fn delete_disk(&self, disk_id: &str, ctx: &OperationContext) -> Result<()> {
        let handle = ResourceHandle::disk(disk_id);
        let Some(disk) = self.runner.disk(disk_id, ctx).await? else {
            info!("Disk already deleted");
            return Ok(());
        };

        match disk.status {
            ResourceStatus::Available => {}
            ResourceStatus::InUse => {
                let owner = disk.instance_id.as_deref().unwrap_or("an instance");
                return Err(CpiError::invalid_state(
                    ctx.operation(),
                    &handle,
                    disk.status,
                    format!("disk is attached to {owner}"),
                ));
            }
            status => {
                return Err(CpiError::invalid_state(
                    ctx.operation(),
                    &handle,
                    status,
                    "disk cannot be deleted until it settles",
                ));
            }
        }

        info!("Deleting disk");
        let delete = self.runner.client().delete_disk(disk_id);
        already_gone(self.runner.guarded(&handle, disk.status, ctx, delete).await?)
            .for_handle(ctx.operation(), &handle)?;
        self.runner
            .wait_from(&handle, disk.status, ResourceStatus::Absent, ctx)
            .await
    }

    async fn has_disk(&self, disk_id: &str, ctx: &OperationContext) -> Result<bool> {
        Ok(self.runner.disk(disk_id, ctx).await?.is_some())
    }

    #[instrument(skip_all, fields(vm = %vm_id, disk = %disk_id))]
    async fn attach_disk(
        &self,
        vm_id: &str,
        disk_id: &str,
        ctx: &OperationContext,
    ) -> Result<()> {
        let handle = ResourceHandle::disk(disk_id);
        if self.runner.instance(vm_id, ctx).await?.is_none() {
            return Err(CpiError::not_found(
                ctx.operation(),
                &ResourceHandle::instance(vm_id),
            ));
        }
        let Some(disk) = self.runner.disk(disk_id, ctx).await? else {
            return Err(CpiError::not_found(ctx.operation(), &handle));
        };

        match disk.status {
            ResourceStatus::InUse if disk.is_attached_to(vm_id) => {
                info!("Disk already attached");
                return Ok(());
            }
            ResourceStatus::InUse => {
                let owner = disk.instance_id.as_deref().unwrap_or("another instance");
                return Err(CpiError::invalid_state(
                    ctx.operation(),
                    &handle,
                    disk.status,
                    format!("disk is attached to {owner}"),
                ));
            }
            ResourceStatus::Available => {}
            status => {
                return Err(CpiError::invalid_state(
                    ctx.operation(),
                    &handle,
                    status,
                    "disk cannot be attached until it settles",
                ));
            }
        }

        info!("Attaching disk");
        let attach = self.runner.client().attach_disk(vm_id, disk_id);
        require_present(
            self.runner.guarded(&handle, disk.status, ctx, attach).await?,
            ctx.operation(),
            &handle,
        )?;
        self.runner
            .wait_from(&handle, disk.status, ResourceStatus::InUse, ctx)
            .await
    }

    #[instrument(skip_all, fields(vm = %vm_id, disk = %disk_id))]
    async fn detach_disk(
        &self,
        vm_id: &str,
        disk_id: &str,
        ctx: &OperationContext,
    ) -> Result<()> {
        let handle = ResourceHandle::disk(disk_id);
        let Some(disk) = self.runner.disk(disk_id, ctx).await? else {
            return Err(CpiError::not_found(ctx.operation(), &handle));
        };

        if disk.instance_id.is_some() && !disk.is_attached_to(vm_id) {
            warn!(
                attached_to = disk.instance_id.as_deref().unwrap_or_default(),
                "Disk is attached to a different instance; nothing to detach"
            );
            return Ok(());
        }

        match disk.status {
            ResourceStatus::Available => {
                info!("Disk already detached");
                Ok(())
            }
            ResourceStatus::Detaching => {
                self.runner
                    .wait_from(&handle, disk.status, ResourceStatus::Available, ctx)
                    .await
            }
            ResourceStatus::InUse => {
                info!("Detaching disk");
                let detach = self.runner.client().detach_disk(vm_id, disk_id);
                require_present(
                    self.runner.guarded(&handle, disk.status, ctx, detach).await?,
                    ctx.operation(),
                    &handle,
                )?;
                self.runner
                    .wait_from(&handle, disk.status, ResourceStatus::Available, ctx)
                    .await
            }
            status => Err(CpiError::invalid_state(
                ctx.operation(),
                &handle,
                status,
                "disk cannot be detached until it settles",
            )),
        }
    }

    async fn get_disks(&self, vm_id: &str, ctx: &OperationContext) -> Result<Vec<String>> {
        let handle = ResourceHandle::instance(vm_id);
        if self.runner.instance(vm_id, ctx).await?.is_none() {
            return Err(CpiError::not_found(ctx.operation(), &handle));
        }
        let describe = self.runner.client().describe_instance_disks(vm_id);
        let disks = self
            .runner
            .guarded(&handle, ResourceStatus::Unknown, ctx, describe)
            .await?
            .for_handle(ctx.operation(), &handle)?;
        Ok(disks
            .into_iter()
            .filter(|d| d.disk_type == DiskType::Data)
            .map(|d| d.id)
            .collect())
    }
}
