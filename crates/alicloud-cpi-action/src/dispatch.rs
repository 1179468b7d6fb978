//! Request dispatch
//!
//! One request names a method and carries positional JSON arguments. The
//! dispatcher decodes the arguments, runs the matching handler under a fresh
//! [`OperationContext`] and turns the outcome into a [`Response`].

use crate::disk::DiskHandler;
use crate::props::{DiskCloudProps, Networks, StemcellCloudProps, VmCloudProps, VmMetadata};
use crate::stemcell::StemcellHandler;
use crate::vm::VmHandler;
use crate::{DiskLifecycle, StemcellLifecycle, VmLifecycle};
use alicloud_cpi_config::CpiConfig;
use alicloud_cpi_core::{CpiError, EcsClient, LifecycleRunner, OperationContext, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const STEMCELL_FORMATS: [&str; 2] = ["alicloud-raw", "alicloud-light"];

/// Supported CPI methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Info,
    CreateStemcell,
    DeleteStemcell,
    CreateVm,
    DeleteVm,
    HasVm,
    RebootVm,
    SetVmMetadata,
    CreateDisk,
    DeleteDisk,
    HasDisk,
    AttachDisk,
    DetachDisk,
    GetDisks,
}

impl Method {
    pub const ALL: [Method; 14] = [
        Method::Info,
        Method::CreateStemcell,
        Method::DeleteStemcell,
        Method::CreateVm,
        Method::DeleteVm,
        Method::HasVm,
        Method::RebootVm,
        Method::SetVmMetadata,
        Method::CreateDisk,
        Method::DeleteDisk,
        Method::HasDisk,
        Method::AttachDisk,
        Method::DetachDisk,
        Method::GetDisks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Info => "info",
            Method::CreateStemcell => "create_stemcell",
            Method::DeleteStemcell => "delete_stemcell",
            Method::CreateVm => "create_vm",
            Method::DeleteVm => "delete_vm",
            Method::HasVm => "has_vm",
            Method::RebootVm => "reboot_vm",
            Method::SetVmMetadata => "set_vm_metadata",
            Method::CreateDisk => "create_disk",
            Method::DeleteDisk => "delete_disk",
            Method::HasDisk => "has_disk",
            Method::AttachDisk => "attach_disk",
            Method::DetachDisk => "detach_disk",
            Method::GetDisks => "get_disks",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Incoming request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,

    #[serde(default)]
    pub arguments: Vec<Value>,

    /// Caller context (director uuid, request id); informational only
    #[serde(default)]
    pub context: Value,
}

/// Outgoing response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub result: Value,
    pub error: Option<ResponseError>,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub ok_to_retry: bool,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            error: None,
            log: String::new(),
        }
    }

    fn failure(kind: &str, message: String, ok_to_retry: bool) -> Self {
        Self {
            result: Value::Null,
            error: Some(ResponseError {
                kind: kind.to_string(),
                message,
                ok_to_retry,
            }),
            log: String::new(),
        }
    }

    pub fn from_error(err: &CpiError) -> Self {
        Self::failure(err.kind(), err.to_string(), err.ok_to_retry())
    }

    pub fn not_implemented(method: &str) -> Self {
        Self::failure(
            "Bosh::Clouds::NotImplemented",
            format!("method '{method}' is not supported"),
            false,
        )
    }

    /// The request itself could not be understood
    pub fn invalid_call(message: impl Into<String>) -> Self {
        Self::failure("InvalidCall", message.into(), false)
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Positional arguments of one request
struct Arguments<'a> {
    method: Method,
    values: &'a [Value],
}

impl<'a> Arguments<'a> {
    fn invalid(&self, index: usize, expected: &str) -> CpiError {
        CpiError::InvalidArgument(format!(
            "{}: argument {index} must be {expected}",
            self.method
        ))
    }

    fn string(&self, index: usize) -> Result<&'a str> {
        self.values
            .get(index)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| self.invalid(index, "a non-empty string"))
    }

    fn optional_string(&self, index: usize) -> Result<Option<&'a str>> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid(index, "a string or null")),
        }
    }

    fn number(&self, index: usize) -> Result<u64> {
        self.values
            .get(index)
            .and_then(Value::as_u64)
            .ok_or_else(|| self.invalid(index, "a non-negative integer"))
    }

    /// Decode an object argument; missing or null decodes to the default
    fn decode<T: DeserializeOwned + Default>(&self, index: usize) -> Result<T> {
        match self.values.get(index) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                CpiError::InvalidArgument(format!("{}: argument {index}: {e}", self.method))
            }),
        }
    }
}

/// Operation registry: routes each method to the handler family that owns it
pub struct Cpi {
    vms: Arc<dyn VmLifecycle>,
    disks: Arc<dyn DiskLifecycle>,
    stemcells: Arc<dyn StemcellLifecycle>,
}

impl Cpi {
    /// Build every handler from one configuration and one provider client
    pub fn new(config: Arc<CpiConfig>, client: Arc<dyn EcsClient>) -> Self {
        let runner = Arc::new(LifecycleRunner::new(client, config.poll_policy()));
        Self::with_handlers(
            Arc::new(VmHandler::new(runner.clone(), config.clone())),
            Arc::new(DiskHandler::new(runner.clone(), config.clone())),
            Arc::new(StemcellHandler::new(runner, config)),
        )
    }

    pub fn with_handlers(
        vms: Arc<dyn VmLifecycle>,
        disks: Arc<dyn DiskLifecycle>,
        stemcells: Arc<dyn StemcellLifecycle>,
    ) -> Self {
        Self {
            vms,
            disks,
            stemcells,
        }
    }

    /// Run one request to completion
    ///
    /// Never fails: every error is folded into the response. `cancel` aborts
    /// any wait in progress.
    pub async fn handle(&self, request: &Request, cancel: CancellationToken) -> Response {
        let method = match request.method.parse::<Method>() {
            Ok(method) => method,
            Err(unknown) => {
                error!(method = %unknown, "Unsupported method");
                return Response::not_implemented(&unknown);
            }
        };

        info!(%method, "Handling request");
        let ctx = OperationContext::new(method.as_str()).with_cancellation(cancel);
        let args = Arguments {
            method,
            values: &request.arguments,
        };

        match self.call(&args, &ctx).await {
            Ok(result) => {
                info!(%method, "Request succeeded");
                Response::ok(result)
            }
            Err(err) => {
                error!(%method, error = %err, kind = err.kind(), "Request failed");
                Response::from_error(&err)
            }
        }
    }

    async fn call(&self, args: &Arguments<'_>, ctx: &OperationContext) -> Result<Value> {
        let result = match args.method {
            Method::Info => json!({ "stemcell_formats": STEMCELL_FORMATS }),
            Method::CreateStemcell => {
                let image_path = args.optional_string(0)?.unwrap_or_default();
                let props: StemcellCloudProps = args.decode(1)?;
                json!(self.stemcells.create_stemcell(image_path, &props, ctx).await?)
            }
            Method::DeleteStemcell => {
                self.stemcells
                    .delete_stemcell(args.string(0)?, ctx)
                    .await?;
                Value::Null
            }
            Method::CreateVm => {
                let props: VmCloudProps = args.decode(2)?;
                let networks: Networks = args.decode(3)?;
                let vm_id = self
                    .vms
                    .create_vm(args.string(0)?, args.string(1)?, &props, &networks, ctx)
                    .await?;
                json!(vm_id)
            }
            Method::DeleteVm => {
                self.vms.delete_vm(args.string(0)?, ctx).await?;
                Value::Null
            }
            Method::HasVm => json!(self.vms.has_vm(args.string(0)?, ctx).await?),
            Method::RebootVm => {
                self.vms.reboot_vm(args.string(0)?, ctx).await?;
                Value::Null
            }
            Method::SetVmMetadata => {
                let metadata: VmMetadata = args.decode(1)?;
                self.vms
                    .set_vm_metadata(args.string(0)?, &metadata, ctx)
                    .await?;
                Value::Null
            }
            Method::CreateDisk => {
                let size_mib = args.number(0)?;
                let props: DiskCloudProps = args.decode(1)?;
                let vm_id = args.optional_string(2)?;
                json!(self.disks.create_disk(size_mib, &props, vm_id, ctx).await?)
            }
            Method::DeleteDisk => {
                self.disks.delete_disk(args.string(0)?, ctx).await?;
                Value::Null
            }
            Method::HasDisk => json!(self.disks.has_disk(args.string(0)?, ctx).await?),
            Method::AttachDisk => {
                self.disks
                    .attach_disk(args.string(0)?, args.string(1)?, ctx)
                    .await?;
                Value::Null
            }
            Method::DetachDisk => {
                self.disks
                    .detach_disk(args.string(0)?, args.string(1)?, ctx)
                    .await?;
                Value::Null
            }
            Method::GetDisks => json!(self.disks.get_disks(args.string(0)?, ctx).await?),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>(), Ok(method));
            let encoded = serde_json::to_value(method).unwrap();
            assert_eq!(encoded, json!(method.as_str()));
        }
        assert_eq!("snapshot_disk".parse::<Method>(), Err("snapshot_disk".to_string()));
    }

    #[test]
    fn test_request_defaults() {
        let request: Request = serde_json::from_str(r#"{"method": "info"}"#).unwrap();
        assert!(request.arguments.is_empty());
        assert!(request.context.is_null());
    }

    #[test]
    fn test_response_shape() {
        let response = Response::not_implemented("snapshot_disk");
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["result"], Value::Null);
        assert_eq!(encoded["error"]["type"], "Bosh::Clouds::NotImplemented");
        assert_eq!(encoded["error"]["ok_to_retry"], false);
        assert_eq!(encoded["log"], "");

        let encoded = serde_json::to_value(Response::ok(json!(true))).unwrap();
        assert_eq!(encoded["error"], Value::Null);
    }

    #[test]
    fn test_argument_decoding() {
        let values = vec![json!("i-1"), json!(null), json!(10240), json!({"category": 3})];
        let args = Arguments {
            method: Method::CreateDisk,
            values: &values,
        };
        assert_eq!(args.string(0).unwrap(), "i-1");
        assert!(args.string(1).is_err());
        assert_eq!(args.optional_string(1).unwrap(), None);
        assert_eq!(args.number(2).unwrap(), 10240);
        assert!(args.number(0).is_err());

        let props: DiskCloudProps = args.decode(1).unwrap();
        assert_eq!(props, DiskCloudProps::default());
        let err = args.decode::<DiskCloudProps>(3).unwrap_err();
        assert_eq!(err.kind(), "InvalidCall");
    }
}
