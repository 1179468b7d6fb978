//! VM handlers

use crate::props::{NetworkType, Networks, VmCloudProps, VmMetadata, primary_network};
use crate::{VmLifecycle, already_gone, require_present};
use alicloud_cpi_config::CpiConfig;
use alicloud_cpi_core::{
    CpiError, CreateInstanceRequest, LifecycleRunner, MAX_TAG_LEN, MAX_TAGS, OperationContext,
    ProviderResultExt, ResourceHandle, ResourceKind, ResourceStatus, Result, SystemDisk,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct VmHandler {
    runner: Arc<LifecycleRunner>,
    config: Arc<CpiConfig>,
}

impl VmHandler {
    pub fn new(runner: Arc<LifecycleRunner>, config: Arc<CpiConfig>) -> Self {
        Self { runner, config }
    }

    fn force_stop(&self) -> bool {
        self.config.alicloud().force_stop
    }

    fn instance_request(
        &self,
        agent_id: &str,
        stemcell_id: &str,
        props: &VmCloudProps,
        networks: &Networks,
        ctx: &OperationContext,
    ) -> Result<CreateInstanceRequest> {
        let instance_type = props.instance_type.clone().ok_or_else(|| {
            CpiError::InvalidArgument(format!(
                "{}: cloud_properties.instance_type is required",
                ctx.operation()
            ))
        })?;
        let image_id = self.config.resolve_stemcell_image(stemcell_id)?;

        let network = primary_network(networks);
        let network_props = network.map(|n| &n.cloud_properties);
        let security_group_id = props
            .security_group_id
            .clone()
            .or_else(|| network_props.and_then(|p| p.security_group_id.clone()))
            .ok_or_else(|| {
                CpiError::InvalidArgument(format!(
                    "{}: no security_group_id in cloud_properties or networks",
                    ctx.operation()
                ))
            })?;
        let vswitch_id = props
            .vswitch_id
            .clone()
            .or_else(|| network_props.and_then(|p| p.vswitch_id.clone()));
        let private_ip = network
            .filter(|n| n.network_type == NetworkType::Manual)
            .and_then(|n| n.ip.clone());

        Ok(CreateInstanceRequest {
            image_id,
            instance_type,
            zone_id: props
                .availability_zone
                .clone()
                .or_else(|| self.config.alicloud().zone_id.clone()),
            security_group_id,
            vswitch_id,
            private_ip,
            instance_name: props.instance_name.clone(),
            key_pair_name: props.key_pair_name.clone(),
            system_disk: SystemDisk {
                category: props.system_disk.category.clone(),
                size_gb: props.system_disk.size,
            },
            tags: BTreeMap::from([("agent_id".to_string(), agent_id.to_string())]),
        })
    }
}

/// Render metadata as provider tags
///
/// Keys that collide once truncated keep the first value in key order.
fn metadata_tags(metadata: &VmMetadata) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    for (key, value) in metadata {
        if tags.len() == MAX_TAGS {
            break;
        }
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        tags.entry(truncate(key)).or_insert_with(|| truncate(&value));
    }
    tags
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_TAG_LEN).collect()
}

#[async_trait]
impl VmLifecycle for VmHandler {
    #[instrument(skip_all, fields(agent = %agent_id, stemcell = %stemcell_id))]
    async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_id: &str,
        props: &VmCloudProps,
        networks: &Networks,
        ctx: &OperationContext,
    ) -> Result<String> {
        let request = self.instance_request(agent_id, stemcell_id, props, networks, ctx)?;

        let Some(created) = self
            .runner
            .cancellable(ctx, self.runner.client().run_instance(&request))
            .await
        else {
            return Err(CpiError::Cancelled {
                operation: ctx.operation(),
                kind: ResourceKind::Instance,
            });
        };
        let vm_id =
            created.for_handle(ctx.operation(), &ResourceHandle::image(&request.image_id))?;
        info!(
            vm = %vm_id,
            image = %request.image_id,
            region = %self.runner.client().region(),
            "Instance created"
        );

        // The instance exists from here on; failures carry its id for cleanup
        let handle = ResourceHandle::instance(&vm_id);
        if let Err(source) = self
            .runner
            .wait_for(&handle, ResourceStatus::Running, ctx)
            .await
        {
            tracing::error!(vm = %vm_id, error = %source, "Instance did not reach running");
            return Err(CpiError::VmCreationFailed {
                vm_id,
                source: Box::new(source),
            });
        }

        info!(vm = %vm_id, "Instance running");
        Ok(vm_id)
    }

    #[instrument(skip_all, fields(vm = %vm_id))]
    async fn delete_vm(&self, vm_id: &str, ctx: &OperationContext) -> Result<()> {
        let handle = ResourceHandle::instance(vm_id);
        let Some(instance) = self.runner.instance(vm_id, ctx).await? else {
            info!("Instance already deleted");
            return Ok(());
        };

        match instance.status {
            ResourceStatus::Running => {
                info!("Stopping instance");
                let stop = self.runner.client().stop_instance(vm_id, self.force_stop());
                match self
                    .runner
                    .guarded(&handle, instance.status, ctx, stop)
                    .await?
                {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {
                        info!("Instance disappeared while stopping");
                        return Ok(());
                    }
                    Err(source) => {
                        return Err(CpiError::Provider {
                            operation: ctx.operation(),
                            handle,
                            source,
                        });
                    }
                }
                self.runner
                    .wait_from(&handle, instance.status, ResourceStatus::Stopped, ctx)
                    .await?;
            }
            ResourceStatus::Stopping => {
                self.runner
                    .wait_from(&handle, instance.status, ResourceStatus::Stopped, ctx)
                    .await?;
            }
            ResourceStatus::Stopped => {}
            status => {
                return Err(CpiError::invalid_state(
                    ctx.operation(),
                    &handle,
                    status,
                    "instance cannot be deleted until it settles",
                ));
            }
        }

        info!("Deleting instance");
        let delete = self.runner.client().delete_instance(vm_id);
        already_gone(
            self.runner
                .guarded(&handle, ResourceStatus::Stopped, ctx, delete)
                .await?,
        )
        .for_handle(ctx.operation(), &handle)?;
        self.runner
            .wait_from(&handle, ResourceStatus::Stopped, ResourceStatus::Absent, ctx)
            .await?;
        info!("Instance deleted");
        Ok(())
    }

    async fn has_vm(&self, vm_id: &str, ctx: &OperationContext) -> Result<bool> {
        Ok(self.runner.instance(vm_id, ctx).await?.is_some())
    }

    #[instrument(skip_all, fields(vm = %vm_id))]
    async fn reboot_vm(&self, vm_id: &str, ctx: &OperationContext) -> Result<()> {
        let handle = ResourceHandle::instance(vm_id);
        let reboot = self.runner.client().reboot_instance(vm_id, self.force_stop());
        require_present(
            self.runner
                .guarded(&handle, ResourceStatus::Unknown, ctx, reboot)
                .await?,
            ctx.operation(),
            &handle,
        )?;
        info!("Reboot issued");
        self.runner
            .wait_for(&handle, ResourceStatus::Running, ctx)
            .await
    }

    #[instrument(skip_all, fields(vm = %vm_id))]
    async fn set_vm_metadata(
        &self,
        vm_id: &str,
        metadata: &VmMetadata,
        ctx: &OperationContext,
    ) -> Result<()> {
        let handle = ResourceHandle::instance(vm_id);
        let Some(instance) = self.runner.instance(vm_id, ctx).await? else {
            return Err(CpiError::not_found(ctx.operation(), &handle));
        };

        let tags = metadata_tags(metadata);
        if tags.is_empty() {
            return Ok(());
        }
        if metadata.len() > tags.len() {
            tracing::warn!(
                dropped = metadata.len() - tags.len(),
                "Metadata exceeds the tag limit"
            );
        }
        let tag = self.runner.client().tag_instance(vm_id, &tags);
        require_present(
            self.runner
                .guarded(&handle, instance.status, ctx, tag)
                .await?,
            ctx.operation(),
            &handle,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_tags() {
        let long = "x".repeat(200);
        let metadata: VmMetadata = serde_json::from_value(json!({
            "director": "bosh",
            "index": 3,
            "deployment": long,
        }))
        .unwrap();

        let tags = metadata_tags(&metadata);
        assert_eq!(tags["director"], "bosh");
        assert_eq!(tags["index"], "3");
        assert_eq!(tags["deployment"].len(), MAX_TAG_LEN);
    }

    #[test]
    fn test_metadata_tag_limit() {
        let metadata: VmMetadata = (0..30)
            .map(|i| (format!("key-{i:02}"), json!("v")))
            .collect();
        let tags = metadata_tags(&metadata);
        assert_eq!(tags.len(), MAX_TAGS);
        assert!(tags.contains_key("key-00"));
        assert!(!tags.contains_key("key-29"));
    }

    #[test]
    fn test_metadata_keys_colliding_after_truncation() {
        let prefix = "k".repeat(MAX_TAG_LEN);
        let mut metadata: VmMetadata = (0..MAX_TAGS)
            .map(|i| (format!("{prefix}-{i:02}"), json!("v")))
            .collect();
        metadata.insert("name".to_string(), json!("web"));

        let tags = metadata_tags(&metadata);
        // every long key collapses into one tag, leaving room for the rest
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[&prefix], "v");
        assert_eq!(tags["name"], "web");
    }
}
