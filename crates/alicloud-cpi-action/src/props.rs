//! Cloud properties and other typed arguments carried by CPI requests

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `cloud_properties` of create_vm
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmCloudProps {
    #[serde(default)]
    pub instance_type: Option<String>,

    /// Zone; falls back to the configured zone_id
    #[serde(default)]
    pub availability_zone: Option<String>,

    /// Overrides the network's security group
    #[serde(default)]
    pub security_group_id: Option<String>,

    /// Overrides the network's vswitch
    #[serde(default)]
    pub vswitch_id: Option<String>,

    #[serde(default)]
    pub key_pair_name: Option<String>,

    #[serde(default)]
    pub instance_name: Option<String>,

    #[serde(default)]
    pub system_disk: SystemDiskProps,
}

/// System disk settings; size is in GiB
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemDiskProps {
    #[serde(default)]
    pub size: Option<u32>,

    #[serde(default)]
    pub category: Option<String>,
}

/// Network settings keyed by network name
pub type Networks = BTreeMap<String, Network>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Manual,
    Dynamic,
    Vip,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "type", default)]
    pub network_type: NetworkType,

    #[serde(default)]
    pub ip: Option<String>,

    #[serde(default)]
    pub cloud_properties: NetworkCloudProps,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkCloudProps {
    #[serde(default)]
    pub vswitch_id: Option<String>,

    #[serde(default)]
    pub security_group_id: Option<String>,
}

/// Network the instance's primary interface is placed on
///
/// Manual networks win over dynamic ones; VIP networks never carry an
/// interface. Ties are broken by network name.
pub fn primary_network(networks: &Networks) -> Option<&Network> {
    let candidates = || {
        networks
            .values()
            .filter(|n| n.network_type != NetworkType::Vip)
    };
    candidates()
        .find(|n| n.network_type == NetworkType::Manual)
        .or_else(|| candidates().next())
}

/// `cloud_properties` of create_disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskCloudProps {
    /// Disk category, e.g. cloud_efficiency or cloud_ssd
    #[serde(default)]
    pub category: Option<String>,
}

/// `cloud_properties` of create_stemcell
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StemcellCloudProps {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub image_id: Option<ImageIdProp>,
}

/// Prebuilt image reference: one id per region, or one id for every region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageIdProp {
    Regional(BTreeMap<String, String>),
    Single(String),
}

/// Metadata the director attaches to a VM
pub type VmMetadata = BTreeMap<String, serde_json::Value>;
