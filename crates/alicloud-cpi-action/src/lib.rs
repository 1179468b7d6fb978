//! CPI operation handlers
//!
//! Each handler composes [`LifecycleRunner`](alicloud_cpi_core::LifecycleRunner)
//! queries and single provider verbs into one idempotent, externally meaningful
//! action. Handlers are grouped by resource family; each family is a capability
//! trait so the dispatcher only needs a trait object per family.
//!
//! Every handler re-queries the resource right before deciding whether a verb
//! is still needed; nothing is cached between calls.

pub mod disk;
pub mod dispatch;
pub mod props;
pub mod stemcell;
pub mod vm;

pub use disk::DiskHandler;
pub use dispatch::{Cpi, Method, Request, Response, ResponseError};
pub use props::{
    DiskCloudProps, ImageIdProp, Network, NetworkCloudProps, NetworkType, Networks,
    StemcellCloudProps, SystemDiskProps, VmCloudProps, VmMetadata,
};
pub use stemcell::StemcellHandler;
pub use vm::VmHandler;

use alicloud_cpi_core::{
    CpiError, OperationContext, ProviderResult, ProviderResultExt, ResourceHandle, Result,
};
use async_trait::async_trait;

/// VM lifecycle operations
#[async_trait]
pub trait VmLifecycle: Send + Sync {
    /// Create and boot an instance; returns its id once it reports Running
    async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_id: &str,
        props: &VmCloudProps,
        networks: &Networks,
        ctx: &OperationContext,
    ) -> Result<String>;

    async fn delete_vm(&self, vm_id: &str, ctx: &OperationContext) -> Result<()>;

    async fn has_vm(&self, vm_id: &str, ctx: &OperationContext) -> Result<bool>;

    async fn reboot_vm(&self, vm_id: &str, ctx: &OperationContext) -> Result<()>;

    async fn set_vm_metadata(
        &self,
        vm_id: &str,
        metadata: &VmMetadata,
        ctx: &OperationContext,
    ) -> Result<()>;
}

/// Disk lifecycle operations
#[async_trait]
pub trait DiskLifecycle: Send + Sync {
    /// Create a data disk of at least `size_mib`; returns its id once Available
    async fn create_disk(
        &self,
        size_mib: u64,
        props: &DiskCloudProps,
        vm_id: Option<&str>,
        ctx: &OperationContext,
    ) -> Result<String>;

    async fn delete_disk(&self, disk_id: &str, ctx: &OperationContext) -> Result<()>;

    async fn has_disk(&self, disk_id: &str, ctx: &OperationContext) -> Result<bool>;

    async fn attach_disk(&self, vm_id: &str, disk_id: &str, ctx: &OperationContext)
    -> Result<()>;

    async fn detach_disk(&self, vm_id: &str, disk_id: &str, ctx: &OperationContext)
    -> Result<()>;

    /// Data disks attached to a VM
    async fn get_disks(&self, vm_id: &str, ctx: &OperationContext) -> Result<Vec<String>>;
}

/// Stemcell (image) operations
#[async_trait]
pub trait StemcellLifecycle: Send + Sync {
    /// Resolve the image backing a stemcell and wait until it is usable
    async fn create_stemcell(
        &self,
        image_path: &str,
        props: &StemcellCloudProps,
        ctx: &OperationContext,
    ) -> Result<String>;

    async fn delete_stemcell(&self, stemcell_id: &str, ctx: &OperationContext) -> Result<()>;
}

/// Treat "not found" from a delete-style verb as already done
pub(crate) fn already_gone(result: ProviderResult<()>) -> ProviderResult<()> {
    match result {
        Err(err) if err.is_not_found() => {
            tracing::debug!(code = %err.code, "resource already gone");
            Ok(())
        }
        other => other,
    }
}

/// Attach context to a verb's result, reporting "not found" as [`CpiError::NotFound`]
pub(crate) fn require_present<T>(
    result: ProviderResult<T>,
    operation: &'static str,
    handle: &ResourceHandle,
) -> Result<T> {
    match result {
        Err(err) if err.is_not_found() => Err(CpiError::not_found(operation, handle)),
        other => other.for_handle(operation, handle),
    }
}
