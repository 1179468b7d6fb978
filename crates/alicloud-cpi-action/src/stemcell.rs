//! Stemcell handlers
//!
//! Stemcells are prebuilt images; creating one resolves the image id for the
//! configured region and waits until the image is usable.

use crate::props::{ImageIdProp, StemcellCloudProps};
use crate::{StemcellLifecycle, already_gone};
use alicloud_cpi_config::CpiConfig;
use alicloud_cpi_core::{
    CpiError, ImageOwner, LifecycleRunner, OperationContext, ProviderResultExt, ResourceHandle,
    ResourceStatus, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct StemcellHandler {
    runner: Arc<LifecycleRunner>,
    config: Arc<CpiConfig>,
}

impl StemcellHandler {
    pub fn new(runner: Arc<LifecycleRunner>, config: Arc<CpiConfig>) -> Self {
        Self { runner, config }
    }

    /// Image id from the cloud properties, else the region table
    fn resolve_image(&self, props: &StemcellCloudProps) -> Result<String> {
        match &props.image_id {
            Some(ImageIdProp::Regional(ids)) => {
                if let Some(id) = ids.get(self.runner.client().region()) {
                    return Ok(id.clone());
                }
            }
            Some(ImageIdProp::Single(id)) => return Ok(id.clone()),
            None => {}
        }
        let name = props.name.as_deref().unwrap_or_default();
        Ok(self.config.resolve_stemcell_image(name)?)
    }
}

#[async_trait]
impl StemcellLifecycle for StemcellHandler {
    #[instrument(skip_all, fields(image_path = %image_path))]
    async fn create_stemcell(
        &self,
        image_path: &str,
        props: &StemcellCloudProps,
        ctx: &OperationContext,
    ) -> Result<String> {
        let image_id = self.resolve_image(props)?;
        let handle = ResourceHandle::image(&image_id);

        let Some(image) = self.runner.image(&image_id, ctx).await? else {
            return Err(CpiError::not_found(ctx.operation(), &handle));
        };
        match image.status {
            ResourceStatus::Available => {}
            ResourceStatus::Failed => {
                return Err(CpiError::invalid_state(
                    ctx.operation(),
                    &handle,
                    image.status,
                    "image is not usable",
                ));
            }
            status => {
                info!(image = %image_id, %status, "Waiting for image");
                self.runner
                    .wait_from(&handle, status, ResourceStatus::Available, ctx)
                    .await?;
            }
        }

        info!(image = %image_id, "Stemcell ready");
        Ok(image_id)
    }

    #[instrument(skip_all, fields(image = %stemcell_id))]
    async fn delete_stemcell(&self, stemcell_id: &str, ctx: &OperationContext) -> Result<()> {
        let handle = ResourceHandle::image(stemcell_id);
        let Some(image) = self.runner.image(stemcell_id, ctx).await? else {
            info!("Image already deleted");
            return Ok(());
        };
        if image.owner != ImageOwner::Account {
            info!(owner = ?image.owner, "Image is not owned by this account; leaving it");
            return Ok(());
        }

        info!("Deleting image");
        let delete = self.runner.client().delete_image(stemcell_id);
        already_gone(self.runner.guarded(&handle, image.status, ctx, delete).await?)
            .for_handle(ctx.operation(), &handle)?;
        self.runner
            .wait_from(&handle, image.status, ResourceStatus::Absent, ctx)
            .await
    }
}
