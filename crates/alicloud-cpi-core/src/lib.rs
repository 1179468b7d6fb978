//! Alibaba Cloud CPI core
//!
//! This crate provides the resource model and lifecycle orchestration shared by
//! every CPI operation: a narrow provider abstraction over the ECS control plane
//! and a runner that turns "this resource must reach status X" into a bounded,
//! cancellable polling loop.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              alicloud-cpi (binary)              │
//! │            request on stdin / stdout            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │              alicloud-cpi-action                │
//! │   VM / disk / stemcell handlers + dispatch      │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               alicloud-cpi-core                 │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  LifecycleRunner (poll / timeout / abort) │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │        trait EcsClient { ... }            │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────┐
//! │    alicloud-cpi-ecs     │
//! │   (aliyun CLI adapter)  │
//! └─────────────────────────┘
//! ```

pub mod context;
pub mod error;
pub mod provider;
pub mod runner;
pub mod status;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports
pub use context::OperationContext;
pub use error::{CpiError, ProviderError, ProviderResult, ProviderResultExt, Result};
pub use provider::{
    CreateDiskRequest, CreateInstanceRequest, Disk, DiskType, EcsClient, Image, ImageOwner,
    Instance, MAX_TAG_LEN, MAX_TAGS, SystemDisk,
};
pub use runner::{LifecycleRunner, PollPolicy};
pub use status::{Phase, ResourceHandle, ResourceKind, ResourceStatus};
