//! Scripted in-memory ECS client
//!
//! `FakeEcs` keeps instances, disks and images in memory and emulates the
//! provider's asynchronous transitions: each mutating verb queues the statuses
//! the resource will report on subsequent describe calls, one per call. Tests
//! can replace those scripts, inject failures and inspect the ordered call
//! journal.

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    CreateDiskRequest, CreateInstanceRequest, Disk, DiskType, EcsClient, Image, ImageOwner,
    Instance,
};
use crate::status::ResourceStatus;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Kind of provider call, used to target failure injection and script overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    DescribeInstance,
    RunInstance,
    StartInstance,
    StopInstance,
    RebootInstance,
    DeleteInstance,
    TagInstance,
    DescribeDisk,
    DescribeInstanceDisks,
    CreateDisk,
    DeleteDisk,
    AttachDisk,
    DetachDisk,
    DescribeImage,
    DeleteImage,
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DescribeInstance(String),
    RunInstance { image_id: String },
    StartInstance(String),
    StopInstance { id: String, force: bool },
    RebootInstance { id: String, force: bool },
    DeleteInstance(String),
    TagInstance { id: String, tags: BTreeMap<String, String> },
    DescribeDisk(String),
    DescribeInstanceDisks(String),
    CreateDisk { zone_id: String, size_gb: u32 },
    DeleteDisk(String),
    AttachDisk { instance_id: String, disk_id: String },
    DetachDisk { instance_id: String, disk_id: String },
    DescribeImage(String),
    DeleteImage(String),
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::DescribeInstance(_) => Op::DescribeInstance,
            Call::RunInstance { .. } => Op::RunInstance,
            Call::StartInstance(_) => Op::StartInstance,
            Call::StopInstance { .. } => Op::StopInstance,
            Call::RebootInstance { .. } => Op::RebootInstance,
            Call::DeleteInstance(_) => Op::DeleteInstance,
            Call::TagInstance { .. } => Op::TagInstance,
            Call::DescribeDisk(_) => Op::DescribeDisk,
            Call::DescribeInstanceDisks(_) => Op::DescribeInstanceDisks,
            Call::CreateDisk { .. } => Op::CreateDisk,
            Call::DeleteDisk(_) => Op::DeleteDisk,
            Call::AttachDisk { .. } => Op::AttachDisk,
            Call::DetachDisk { .. } => Op::DetachDisk,
            Call::DescribeImage(_) => Op::DescribeImage,
            Call::DeleteImage(_) => Op::DeleteImage,
        }
    }

    pub fn is_describe(&self) -> bool {
        matches!(
            self.op(),
            Op::DescribeInstance | Op::DescribeDisk | Op::DescribeInstanceDisks | Op::DescribeImage
        )
    }
}

#[derive(Default)]
struct FakeState {
    instances: HashMap<String, Instance>,
    disks: HashMap<String, Disk>,
    images: HashMap<String, Image>,
    scripts: HashMap<String, VecDeque<ResourceStatus>>,
    overrides: HashMap<Op, Vec<ResourceStatus>>,
    failures: HashMap<Op, ProviderError>,
    cancel_on: HashMap<Op, CancellationToken>,
    instance_ids: VecDeque<String>,
    disk_ids: VecDeque<String>,
    run_requests: Vec<CreateInstanceRequest>,
    disk_requests: Vec<CreateDiskRequest>,
    calls: Vec<Call>,
    sequence: u32,
}

impl FakeState {
    /// Record the call and return the injected failure for it, if any
    fn record(&mut self, call: Call) -> ProviderResult<()> {
        let op = call.op();
        self.calls.push(call);
        if let Some(token) = self.cancel_on.remove(&op) {
            token.cancel();
        }
        match self.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn queue(&mut self, id: &str, op: Op, default: &[ResourceStatus]) {
        let script = self
            .overrides
            .remove(&op)
            .unwrap_or_else(|| default.to_vec());
        self.scripts.insert(id.to_string(), script.into());
    }

    fn advance(&mut self, id: &str) -> Option<ResourceStatus> {
        let script = self.scripts.get_mut(id)?;
        let next = script.pop_front();
        if script.is_empty() {
            self.scripts.remove(id);
        }
        next
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}-fake{}", self.sequence)
    }
}

pub struct FakeEcs {
    region: String,
    state: Mutex<FakeState>,
}

impl FakeEcs {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake ECS state poisoned")
    }

    pub fn instance(id: &str, status: ResourceStatus) -> Instance {
        Instance {
            id: id.to_string(),
            name: None,
            status,
            zone_id: "cn-hangzhou-b".to_string(),
            instance_type: Some("ecs.n4.small".to_string()),
            private_ips: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn disk(id: &str, status: ResourceStatus, instance_id: Option<&str>) -> Disk {
        Disk {
            id: id.to_string(),
            status,
            instance_id: instance_id.map(str::to_string),
            zone_id: "cn-hangzhou-b".to_string(),
            size_gb: 20,
            category: "cloud_efficiency".to_string(),
            disk_type: DiskType::Data,
        }
    }

    pub fn image(id: &str, status: ResourceStatus) -> Image {
        Image {
            id: id.to_string(),
            status,
            owner: ImageOwner::Account,
        }
    }

    pub fn add_instance(&self, instance: Instance) {
        self.state().instances.insert(instance.id.clone(), instance);
    }

    pub fn add_disk(&self, disk: Disk) {
        self.state().disks.insert(disk.id.clone(), disk);
    }

    pub fn add_image(&self, image: Image) {
        self.state().images.insert(image.id.clone(), image);
    }

    /// Statuses the resource reports on its next describe calls, one per call
    pub fn script(&self, id: &str, statuses: impl IntoIterator<Item = ResourceStatus>) {
        self.state()
            .scripts
            .insert(id.to_string(), statuses.into_iter().collect());
    }

    /// Replace the default transition script of the next `op` verb
    pub fn on_next(&self, op: Op, statuses: impl IntoIterator<Item = ResourceStatus>) {
        self.state()
            .overrides
            .insert(op, statuses.into_iter().collect());
    }

    /// Fail the next call of `op` with `err`
    pub fn fail_next(&self, op: Op, err: ProviderError) {
        self.state().failures.insert(op, err);
    }

    /// Cancel `token` while the next `op` call is in flight
    ///
    /// The call itself still completes, like a Ctrl-C arriving after the
    /// request went out.
    pub fn cancel_during(&self, op: Op, token: CancellationToken) {
        self.state().cancel_on.insert(op, token);
    }

    /// Ids handed out by subsequent `run_instance` calls
    pub fn with_instance_ids(self, ids: impl IntoIterator<Item = &'static str>) -> Self {
        self.state()
            .instance_ids
            .extend(ids.into_iter().map(str::to_string));
        self
    }

    /// Ids handed out by subsequent `create_disk` calls
    pub fn with_disk_ids(self, ids: impl IntoIterator<Item = &'static str>) -> Self {
        self.state()
            .disk_ids
            .extend(ids.into_iter().map(str::to_string));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Recorded calls without describe queries
    pub fn verbs(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| !c.is_describe())
            .cloned()
            .collect()
    }

    pub fn describe_count(&self, id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| match c {
                Call::DescribeInstance(x) | Call::DescribeDisk(x) | Call::DescribeImage(x) => {
                    x == id
                }
                _ => false,
            })
            .count()
    }

    pub fn instance_state(&self, id: &str) -> Option<Instance> {
        self.state().instances.get(id).cloned()
    }

    pub fn disk_state(&self, id: &str) -> Option<Disk> {
        self.state().disks.get(id).cloned()
    }

    pub fn image_state(&self, id: &str) -> Option<Image> {
        self.state().images.get(id).cloned()
    }

    pub fn run_requests(&self) -> Vec<CreateInstanceRequest> {
        self.state().run_requests.clone()
    }

    pub fn disk_requests(&self) -> Vec<CreateDiskRequest> {
        self.state().disk_requests.clone()
    }
}

fn missing(kind: &str, id: &str) -> ProviderError {
    ProviderError::new(
        format!("Invalid{kind}Id.NotFound"),
        format!("The specified {kind} '{id}' does not exist."),
    )
}

fn incorrect_status(kind: &str, id: &str, status: ResourceStatus) -> ProviderError {
    ProviderError::new(
        format!("Incorrect{kind}Status"),
        format!("The current status of {kind} '{id}' ({status}) does not support this operation."),
    )
}

#[async_trait]
impl EcsClient for FakeEcs {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_instance(&self, id: &str) -> ProviderResult<Option<Instance>> {
        let mut state = self.state();
        state.record(Call::DescribeInstance(id.to_string()))?;
        let next = state.advance(id);
        match next {
            Some(ResourceStatus::Absent) => {
                state.instances.remove(id);
                Ok(None)
            }
            Some(status) => Ok(state.instances.get_mut(id).map(|instance| {
                instance.status = status;
                instance.clone()
            })),
            None => Ok(state.instances.get(id).cloned()),
        }
    }

    async fn run_instance(&self, request: &CreateInstanceRequest) -> ProviderResult<String> {
        let mut state = self.state();
        state.record(Call::RunInstance {
            image_id: request.image_id.clone(),
        })?;
        state.run_requests.push(request.clone());
        let assigned = state.instance_ids.pop_front();
        let id = assigned.unwrap_or_else(|| state.next_id("i"));
        let mut instance = FakeEcs::instance(&id, ResourceStatus::Pending);
        instance.name = request.instance_name.clone();
        instance.tags = request.tags.clone();
        if let Some(zone) = &request.zone_id {
            instance.zone_id = zone.clone();
        }
        state.instances.insert(id.clone(), instance);
        state.queue(
            &id,
            Op::RunInstance,
            &[ResourceStatus::Pending, ResourceStatus::Running],
        );
        Ok(id)
    }

    async fn start_instance(&self, id: &str) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::StartInstance(id.to_string()))?;
        let status = state
            .instances
            .get(id)
            .ok_or_else(|| missing("Instance", id))?
            .status;
        if status != ResourceStatus::Stopped {
            return Err(incorrect_status("Instance", id, status));
        }
        state.queue(
            id,
            Op::StartInstance,
            &[ResourceStatus::Starting, ResourceStatus::Running],
        );
        Ok(())
    }

    async fn stop_instance(&self, id: &str, force: bool) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::StopInstance {
            id: id.to_string(),
            force,
        })?;
        let status = state
            .instances
            .get(id)
            .ok_or_else(|| missing("Instance", id))?
            .status;
        if status != ResourceStatus::Running {
            return Err(incorrect_status("Instance", id, status));
        }
        state.queue(
            id,
            Op::StopInstance,
            &[ResourceStatus::Stopping, ResourceStatus::Stopped],
        );
        Ok(())
    }

    async fn reboot_instance(&self, id: &str, force: bool) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::RebootInstance {
            id: id.to_string(),
            force,
        })?;
        let status = state
            .instances
            .get(id)
            .ok_or_else(|| missing("Instance", id))?
            .status;
        if status != ResourceStatus::Running {
            return Err(incorrect_status("Instance", id, status));
        }
        state.queue(
            id,
            Op::RebootInstance,
            &[
                ResourceStatus::Stopping,
                ResourceStatus::Starting,
                ResourceStatus::Running,
            ],
        );
        Ok(())
    }

    async fn delete_instance(&self, id: &str) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::DeleteInstance(id.to_string()))?;
        let status = state
            .instances
            .get(id)
            .ok_or_else(|| missing("Instance", id))?
            .status;
        if status != ResourceStatus::Stopped {
            return Err(incorrect_status("Instance", id, status));
        }
        state.queue(id, Op::DeleteInstance, &[ResourceStatus::Absent]);
        Ok(())
    }

    async fn tag_instance(&self, id: &str, tags: &BTreeMap<String, String>) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::TagInstance {
            id: id.to_string(),
            tags: tags.clone(),
        })?;
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| missing("Instance", id))?;
        instance
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn describe_disk(&self, id: &str) -> ProviderResult<Option<Disk>> {
        let mut state = self.state();
        state.record(Call::DescribeDisk(id.to_string()))?;
        let next = state.advance(id);
        match next {
            Some(ResourceStatus::Absent) => {
                state.disks.remove(id);
                Ok(None)
            }
            Some(status) => Ok(state.disks.get_mut(id).map(|disk| {
                disk.status = status;
                disk.clone()
            })),
            None => Ok(state.disks.get(id).cloned()),
        }
    }

    async fn describe_instance_disks(&self, instance_id: &str) -> ProviderResult<Vec<Disk>> {
        let mut state = self.state();
        state.record(Call::DescribeInstanceDisks(instance_id.to_string()))?;
        let mut disks: Vec<Disk> = state
            .disks
            .values()
            .filter(|d| d.is_attached_to(instance_id))
            .cloned()
            .collect();
        disks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(disks)
    }

    async fn create_disk(&self, request: &CreateDiskRequest) -> ProviderResult<String> {
        let mut state = self.state();
        state.record(Call::CreateDisk {
            zone_id: request.zone_id.clone(),
            size_gb: request.size_gb,
        })?;
        state.disk_requests.push(request.clone());
        let assigned = state.disk_ids.pop_front();
        let id = assigned.unwrap_or_else(|| state.next_id("d"));
        let mut disk = FakeEcs::disk(&id, ResourceStatus::Creating, None);
        disk.zone_id = request.zone_id.clone();
        disk.size_gb = request.size_gb;
        disk.category = request.category.clone();
        state.disks.insert(id.clone(), disk);
        state.queue(
            &id,
            Op::CreateDisk,
            &[ResourceStatus::Creating, ResourceStatus::Available],
        );
        Ok(id)
    }

    async fn delete_disk(&self, id: &str) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::DeleteDisk(id.to_string()))?;
        let status = state
            .disks
            .get(id)
            .ok_or_else(|| missing("Disk", id))?
            .status;
        if status != ResourceStatus::Available {
            return Err(incorrect_status("Disk", id, status));
        }
        state.queue(id, Op::DeleteDisk, &[ResourceStatus::Absent]);
        Ok(())
    }

    async fn attach_disk(&self, instance_id: &str, disk_id: &str) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::AttachDisk {
            instance_id: instance_id.to_string(),
            disk_id: disk_id.to_string(),
        })?;
        if !state.instances.contains_key(instance_id) {
            return Err(missing("Instance", instance_id));
        }
        let disk = state
            .disks
            .get_mut(disk_id)
            .ok_or_else(|| missing("Disk", disk_id))?;
        if disk.status != ResourceStatus::Available {
            return Err(incorrect_status("Disk", disk_id, disk.status));
        }
        disk.instance_id = Some(instance_id.to_string());
        state.queue(
            disk_id,
            Op::AttachDisk,
            &[ResourceStatus::Attaching, ResourceStatus::InUse],
        );
        Ok(())
    }

    async fn detach_disk(&self, instance_id: &str, disk_id: &str) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::DetachDisk {
            instance_id: instance_id.to_string(),
            disk_id: disk_id.to_string(),
        })?;
        let disk = state
            .disks
            .get_mut(disk_id)
            .ok_or_else(|| missing("Disk", disk_id))?;
        if disk.status != ResourceStatus::InUse || !disk.is_attached_to(instance_id) {
            return Err(incorrect_status("Disk", disk_id, disk.status));
        }
        disk.instance_id = None;
        state.queue(
            disk_id,
            Op::DetachDisk,
            &[ResourceStatus::Detaching, ResourceStatus::Available],
        );
        Ok(())
    }

    async fn describe_image(&self, id: &str) -> ProviderResult<Option<Image>> {
        let mut state = self.state();
        state.record(Call::DescribeImage(id.to_string()))?;
        let next = state.advance(id);
        match next {
            Some(ResourceStatus::Absent) => {
                state.images.remove(id);
                Ok(None)
            }
            Some(status) => Ok(state.images.get_mut(id).map(|image| {
                image.status = status;
                image.clone()
            })),
            None => Ok(state.images.get(id).cloned()),
        }
    }

    async fn delete_image(&self, id: &str) -> ProviderResult<()> {
        let mut state = self.state();
        state.record(Call::DeleteImage(id.to_string()))?;
        if !state.images.contains_key(id) {
            return Err(missing("Image", id));
        }
        state.queue(id, Op::DeleteImage, &[ResourceStatus::Absent]);
        Ok(())
    }
}
