//! aliyun CLI wrapper
//!
//! Wraps the `aliyun ecs <Api>` commands used by the CPI. Every method runs
//! exactly one CLI process and parses its JSON output.

use crate::error::{EcsError, Result};
use alicloud_cpi_core::{MAX_TAGS, ProviderError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;

/// Statuses passed to DescribeImages, which otherwise only lists available images
const ALL_IMAGE_STATUSES: &str = "Creating,Waiting,Available,UnAvailable,CreateFailed";

/// aliyun CLI wrapper
pub struct Aliyun {
    region: String,
    access_key_id: String,
    access_key_secret: String,
    binary: String,
}

impl Aliyun {
    pub fn new(
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            binary: "aliyun".to_string(),
        }
    }

    /// Use a different CLI executable
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Arguments for one ECS API call, region first
    fn command_args(&self, api: &str, params: &[(&str, String)]) -> Vec<String> {
        let mut args = vec![
            "ecs".to_string(),
            api.to_string(),
            "--RegionId".to_string(),
            self.region.clone(),
        ];
        for (key, value) in params {
            args.push(format!("--{key}"));
            args.push(value.clone());
        }
        args
    }

    /// Run an ECS API call and parse stdout
    async fn call<T: DeserializeOwned>(&self, api: &str, params: &[(&str, String)]) -> Result<T> {
        let args = self.command_args(api, params);
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args);
        // Credentials travel through the environment so they never show up in `ps`
        cmd.env("ALIBABA_CLOUD_ACCESS_KEY_ID", &self.access_key_id);
        cmd.env("ALIBABA_CLOUD_ACCESS_KEY_SECRET", &self.access_key_secret);
        cmd.env("ALIBABA_CLOUD_REGION_ID", &self.region);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // An abandoned call must not leave the CLI running
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", self.binary, args.join(" "));

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EcsError::AliyunNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EcsError::Api(parse_cli_error(&stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Run a mutating call whose response only carries a request id
    async fn call_verb(&self, api: &str, params: &[(&str, String)]) -> Result<()> {
        let response: RequestAck = self.call(api, params).await?;
        tracing::debug!("{} accepted (RequestId: {})", api, response.request_id);
        Ok(())
    }

    pub async fn describe_instances(&self, ids: &[&str]) -> Result<Vec<InstanceInfo>> {
        let response: DescribeInstancesResponse = self
            .call("DescribeInstances", &[("InstanceIds", json_list(ids)?)])
            .await?;
        Ok(response.instances.instance)
    }

    pub async fn run_instances(&self, config: &RunInstanceConfig) -> Result<Vec<String>> {
        let response: RunInstancesResponse =
            self.call("RunInstances", &config.params()).await?;
        Ok(response.instance_id_sets.instance_id_set)
    }

    pub async fn start_instance(&self, id: &str) -> Result<()> {
        self.call_verb("StartInstance", &[("InstanceId", id.to_string())])
            .await
    }

    pub async fn stop_instance(&self, id: &str, force: bool) -> Result<()> {
        self.call_verb(
            "StopInstance",
            &[("InstanceId", id.to_string()), ("ForceStop", force.to_string())],
        )
        .await
    }

    pub async fn reboot_instance(&self, id: &str, force: bool) -> Result<()> {
        self.call_verb(
            "RebootInstance",
            &[("InstanceId", id.to_string()), ("ForceStop", force.to_string())],
        )
        .await
    }

    pub async fn delete_instance(&self, id: &str) -> Result<()> {
        self.call_verb("DeleteInstance", &[("InstanceId", id.to_string())])
            .await
    }

    pub async fn add_tags(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut params = vec![
            ("ResourceType", "instance".to_string()),
            ("ResourceId", id.to_string()),
        ];
        push_tags(&mut params, tags);
        self.call_verb("AddTags", &params).await
    }

    pub async fn describe_disks(&self, filter: DiskFilter<'_>) -> Result<Vec<DiskInfo>> {
        let params = match filter {
            DiskFilter::Ids(ids) => vec![("DiskIds", json_list(ids)?)],
            DiskFilter::Instance(id) => vec![("InstanceId", id.to_string())],
        };
        let response: DescribeDisksResponse = self.call("DescribeDisks", &params).await?;
        Ok(response.disks.disk)
    }

    pub async fn create_disk(&self, config: &CreateDiskConfig) -> Result<String> {
        let mut params = vec![
            ("ZoneId", config.zone_id.clone()),
            ("Size", config.size_gb.to_string()),
            ("DiskCategory", config.category.clone()),
        ];
        if let Some(name) = &config.name {
            params.push(("DiskName", name.clone()));
        }
        let response: CreateDiskResponse = self.call("CreateDisk", &params).await?;
        Ok(response.disk_id)
    }

    pub async fn delete_disk(&self, id: &str) -> Result<()> {
        self.call_verb("DeleteDisk", &[("DiskId", id.to_string())])
            .await
    }

    pub async fn attach_disk(&self, instance_id: &str, disk_id: &str) -> Result<()> {
        self.call_verb(
            "AttachDisk",
            &[
                ("InstanceId", instance_id.to_string()),
                ("DiskId", disk_id.to_string()),
            ],
        )
        .await
    }

    pub async fn detach_disk(&self, instance_id: &str, disk_id: &str) -> Result<()> {
        self.call_verb(
            "DetachDisk",
            &[
                ("InstanceId", instance_id.to_string()),
                ("DiskId", disk_id.to_string()),
            ],
        )
        .await
    }

    pub async fn describe_images(&self, id: &str) -> Result<Vec<ImageInfo>> {
        let response: DescribeImagesResponse = self
            .call(
                "DescribeImages",
                &[
                    ("ImageId", id.to_string()),
                    ("Status", ALL_IMAGE_STATUSES.to_string()),
                ],
            )
            .await?;
        Ok(response.images.image)
    }

    pub async fn delete_image(&self, id: &str) -> Result<()> {
        self.call_verb("DeleteImage", &[("ImageId", id.to_string())])
            .await
    }
}

fn json_list(ids: &[&str]) -> Result<String> {
    Ok(serde_json::to_string(ids)?)
}

/// Extract code, message and request id from the CLI's error output
///
/// ```text
/// ERROR: SDK.ServerError
/// ErrorCode: InvalidInstanceId.NotFound
/// Recommend: https://...
/// RequestId: 6C3F1A52-...
/// Message: The specified InstanceId does not exist.
/// ```
pub(crate) fn parse_cli_error(stderr: &str) -> ProviderError {
    let mut code = None;
    let mut message = None;
    let mut request_id = None;

    for line in stderr.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("ErrorCode:") {
            code = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("Message:") {
            message = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("RequestId:") {
            request_id = Some(value.trim());
        }
    }

    let err = ProviderError::new(
        code.unwrap_or("CliError"),
        message.unwrap_or_else(|| stderr.trim()),
    );
    match request_id {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

/// Which disks DescribeDisks should return
#[derive(Debug, Clone, Copy)]
pub enum DiskFilter<'a> {
    Ids(&'a [&'a str]),
    Instance(&'a str),
}

/// Configuration for RunInstances
#[derive(Debug, Clone, Default)]
pub struct RunInstanceConfig {
    pub image_id: String,
    pub instance_type: String,
    pub security_group_id: String,
    pub zone_id: Option<String>,
    pub vswitch_id: Option<String>,
    pub private_ip: Option<String>,
    pub instance_name: Option<String>,
    pub key_pair_name: Option<String>,
    pub system_disk_category: Option<String>,
    pub system_disk_size_gb: Option<u32>,
    pub tags: BTreeMap<String, String>,
}

impl RunInstanceConfig {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("ImageId", self.image_id.clone()),
            ("InstanceType", self.instance_type.clone()),
            ("SecurityGroupId", self.security_group_id.clone()),
            ("Amount", "1".to_string()),
        ];
        let optional = [
            ("ZoneId", &self.zone_id),
            ("VSwitchId", &self.vswitch_id),
            ("PrivateIpAddress", &self.private_ip),
            ("InstanceName", &self.instance_name),
            ("KeyPairName", &self.key_pair_name),
            ("SystemDisk.Category", &self.system_disk_category),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                params.push((key, value.clone()));
            }
        }
        if let Some(size) = self.system_disk_size_gb {
            params.push(("SystemDisk.Size", size.to_string()));
        }
        push_tags(&mut params, &self.tags);
        params
    }
}

/// Render tags as numbered Tag.N.Key / Tag.N.Value pairs; extras past the limit are dropped
fn push_tags(params: &mut Vec<(&'static str, String)>, tags: &BTreeMap<String, String>) {
    for ((key_slot, value_slot), (key, value)) in TAG_SLOTS.iter().zip(tags) {
        params.push((*key_slot, key.clone()));
        params.push((*value_slot, value.clone()));
    }
}

const TAG_SLOTS: [(&str, &str); MAX_TAGS] = [
    ("Tag.1.Key", "Tag.1.Value"),
    ("Tag.2.Key", "Tag.2.Value"),
    ("Tag.3.Key", "Tag.3.Value"),
    ("Tag.4.Key", "Tag.4.Value"),
    ("Tag.5.Key", "Tag.5.Value"),
    ("Tag.6.Key", "Tag.6.Value"),
    ("Tag.7.Key", "Tag.7.Value"),
    ("Tag.8.Key", "Tag.8.Value"),
    ("Tag.9.Key", "Tag.9.Value"),
    ("Tag.10.Key", "Tag.10.Value"),
    ("Tag.11.Key", "Tag.11.Value"),
    ("Tag.12.Key", "Tag.12.Value"),
    ("Tag.13.Key", "Tag.13.Value"),
    ("Tag.14.Key", "Tag.14.Value"),
    ("Tag.15.Key", "Tag.15.Value"),
    ("Tag.16.Key", "Tag.16.Value"),
    ("Tag.17.Key", "Tag.17.Value"),
    ("Tag.18.Key", "Tag.18.Value"),
    ("Tag.19.Key", "Tag.19.Value"),
    ("Tag.20.Key", "Tag.20.Value"),
];

/// Configuration for CreateDisk
#[derive(Debug, Clone)]
pub struct CreateDiskConfig {
    pub zone_id: String,
    pub size_gb: u32,
    pub category: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestAck {
    #[serde(rename = "RequestId", default)]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeInstancesResponse {
    #[serde(rename = "Instances")]
    instances: InstanceSet,
}

#[derive(Debug, Deserialize)]
struct InstanceSet {
    #[serde(rename = "Instance", default)]
    instance: Vec<InstanceInfo>,
}

/// Instance information from DescribeInstances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    #[serde(rename = "InstanceId")]
    pub id: String,

    #[serde(rename = "InstanceName", default)]
    pub name: Option<String>,

    #[serde(rename = "Status")]
    pub status: String,

    #[serde(rename = "ZoneId", default)]
    pub zone_id: String,

    #[serde(rename = "InstanceType", default)]
    pub instance_type: Option<String>,

    #[serde(rename = "VpcAttributes", default)]
    pub vpc_attributes: Option<VpcAttributes>,

    #[serde(rename = "Tags", default)]
    pub tags: Option<TagSet>,
}

impl InstanceInfo {
    pub fn private_ips(&self) -> Vec<String> {
        self.vpc_attributes
            .as_ref()
            .map(|vpc| vpc.private_ip_address.ip_address.clone())
            .unwrap_or_default()
    }

    pub fn tag_map(&self) -> BTreeMap<String, String> {
        self.tags
            .as_ref()
            .map(|set| {
                set.tag
                    .iter()
                    .map(|t| (t.key.clone(), t.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcAttributes {
    #[serde(rename = "PrivateIpAddress")]
    pub private_ip_address: IpAddressSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAddressSet {
    #[serde(rename = "IpAddress", default)]
    pub ip_address: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSet {
    #[serde(rename = "Tag", default)]
    pub tag: Vec<TagInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagInfo {
    #[serde(rename = "TagKey")]
    pub key: String,
    #[serde(rename = "TagValue", default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct RunInstancesResponse {
    #[serde(rename = "InstanceIdSets")]
    instance_id_sets: InstanceIdSets,
}

#[derive(Debug, Deserialize)]
struct InstanceIdSets {
    #[serde(rename = "InstanceIdSet", default)]
    instance_id_set: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeDisksResponse {
    #[serde(rename = "Disks")]
    disks: DiskSet,
}

#[derive(Debug, Deserialize)]
struct DiskSet {
    #[serde(rename = "Disk", default)]
    disk: Vec<DiskInfo>,
}

/// Disk information from DescribeDisks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    #[serde(rename = "DiskId")]
    pub id: String,

    #[serde(rename = "Status")]
    pub status: String,

    /// Empty when the disk is not attached
    #[serde(rename = "InstanceId", default)]
    pub instance_id: String,

    #[serde(rename = "ZoneId", default)]
    pub zone_id: String,

    #[serde(rename = "Size", default)]
    pub size: u32,

    #[serde(rename = "Category", default)]
    pub category: String,

    /// "system" or "data"
    #[serde(rename = "Type", default)]
    pub disk_type: String,
}

#[derive(Debug, Deserialize)]
struct CreateDiskResponse {
    #[serde(rename = "DiskId")]
    disk_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeImagesResponse {
    #[serde(rename = "Images")]
    images: ImageSet,
}

#[derive(Debug, Deserialize)]
struct ImageSet {
    #[serde(rename = "Image", default)]
    image: Vec<ImageInfo>,
}

/// Image information from DescribeImages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "ImageId")]
    pub id: String,

    #[serde(rename = "Status")]
    pub status: String,

    /// "self", "system", "others" or "marketplace"
    #[serde(rename = "ImageOwnerAlias", default)]
    pub owner_alias: String,
}
