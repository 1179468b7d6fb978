use alicloud_cpi_action::{Cpi, DiskHandler, StemcellHandler, VmHandler};
use alicloud_cpi_config::CpiConfig;
use alicloud_cpi_core::testing::FakeEcs;
use alicloud_cpi_core::{LifecycleRunner, OperationContext};
use std::sync::Arc;

pub const CONFIG: &str = r#"{
    "cloud": {
        "plugin": "alicloud",
        "properties": {
            "alicloud": {
                "region_id": "cn-hangzhou",
                "zone_id": "cn-hangzhou-b",
                "access_key_id": "LTAI-test",
                "access_key_secret": "secret",
                "regions": [
                    {
                        "name": "cn-hangzhou",
                        "image_id": "m-default",
                        "stemcells": { "stemcell-42": "m-hz42" }
                    }
                ],
                "polling": { "interval_ms": 500, "timeout_ms": 10000 }
            }
        }
    }
}"#;

pub struct TestCpi {
    pub fake: Arc<FakeEcs>,
    pub config: Arc<CpiConfig>,
    pub runner: Arc<LifecycleRunner>,
}

impl TestCpi {
    pub fn new() -> Self {
        Self::with_fake(FakeEcs::new("cn-hangzhou"))
    }

    pub fn with_fake(fake: FakeEcs) -> Self {
        let config: Arc<CpiConfig> = Arc::new(CONFIG.parse().unwrap());
        let fake = Arc::new(fake);
        let runner = Arc::new(LifecycleRunner::new(fake.clone(), config.poll_policy()));
        Self {
            fake,
            config,
            runner,
        }
    }

    #[allow(dead_code)]
    pub fn vms(&self) -> VmHandler {
        VmHandler::new(self.runner.clone(), self.config.clone())
    }

    #[allow(dead_code)]
    pub fn disks(&self) -> DiskHandler {
        DiskHandler::new(self.runner.clone(), self.config.clone())
    }

    #[allow(dead_code)]
    pub fn stemcells(&self) -> StemcellHandler {
        StemcellHandler::new(self.runner.clone(), self.config.clone())
    }

    #[allow(dead_code)]
    pub fn cpi(&self) -> Cpi {
        Cpi::new(self.config.clone(), self.fake.clone())
    }
}

pub fn ctx(operation: &'static str) -> OperationContext {
    OperationContext::new(operation)
}
