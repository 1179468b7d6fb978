//! Alibaba Cloud ECS provider client
//!
//! This crate implements the [`EcsClient`](alicloud_cpi_core::EcsClient) trait
//! on top of the `aliyun` command line tool.
//!
//! # Requirements
//!
//! - `aliyun` CLI must be installed (or its path passed to [`Aliyun::with_binary`])
//! - Credentials come from the CPI configuration and are handed to the CLI
//!   through `ALIBABA_CLOUD_*` environment variables
//!
//! # Example
//!
//! ```ignore
//! use alicloud_cpi_ecs::{Aliyun, AliyunEcs};
//! use alicloud_cpi_core::EcsClient;
//!
//! let client = AliyunEcs::new(Aliyun::new("cn-hangzhou", key_id, key_secret));
//! let instance = client.describe_instance("i-abc123").await?;
//! ```

pub mod aliyun;
pub mod error;
pub mod provider;

pub use aliyun::{Aliyun, DiskInfo, ImageInfo, InstanceInfo};
pub use error::{EcsError, Result};
pub use provider::AliyunEcs;
