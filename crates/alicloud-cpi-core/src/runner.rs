//! Lifecycle runner
//!
//! Turns "this resource must reach status X" into a bounded polling loop:
//! query, compare, sleep a fixed interval, repeat until the target is observed,
//! the budget runs out, or the caller cancels. Only the read-only status query
//! is ever repeated; mutating verbs are issued by the handlers exactly once,
//! through [`LifecycleRunner::guarded`] so a cancelled call sends none.

use crate::context::OperationContext;
use crate::error::{CpiError, ProviderResultExt, Result};
use crate::provider::{Disk, EcsClient, Image, Instance};
use crate::status::{Phase, ResourceHandle, ResourceKind, ResourceStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

const DEFAULT_INTERVAL_MS: u64 = 500;
const DEFAULT_TIMEOUT_MS: u64 = 1_200_000;

/// Poll interval and per-resource-class timeout budgets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub instance_timeout: Duration,
    pub disk_timeout: Duration,
    pub image_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        let timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            instance_timeout: timeout,
            disk_timeout: timeout,
            image_timeout: timeout,
        }
    }
}

impl PollPolicy {
    pub fn timeout_for(&self, kind: ResourceKind) -> Duration {
        match kind {
            ResourceKind::Instance => self.instance_timeout,
            ResourceKind::Disk => self.disk_timeout,
            ResourceKind::Image => self.image_timeout,
        }
    }
}

/// Polling component shared by every handler
pub struct LifecycleRunner {
    client: Arc<dyn EcsClient>,
    policy: PollPolicy,
}

impl LifecycleRunner {
    pub fn new(client: Arc<dyn EcsClient>, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &dyn EcsClient {
        self.client.as_ref()
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Run one provider call unless the caller has cancelled
    ///
    /// Returns `None` without polling `call` when the context is already
    /// cancelled, and drops `call` mid-flight when cancellation wins the race.
    pub async fn cancellable<T>(
        &self,
        ctx: &OperationContext,
        call: impl Future<Output = T>,
    ) -> Option<T> {
        if ctx.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = ctx.cancelled() => None,
            out = call => Some(out),
        }
    }

    /// [`cancellable`](Self::cancellable) for a call about an existing resource
    ///
    /// `last_status` is what the caller last observed for `handle` and is
    /// reported in the abort error.
    pub async fn guarded<T>(
        &self,
        handle: &ResourceHandle,
        last_status: ResourceStatus,
        ctx: &OperationContext,
        call: impl Future<Output = T>,
    ) -> Result<T> {
        match self.cancellable(ctx, call).await {
            Some(out) => Ok(out),
            None => Err(self.aborted(handle, last_status, ctx)),
        }
    }

    pub async fn instance(&self, id: &str, ctx: &OperationContext) -> Result<Option<Instance>> {
        let handle = ResourceHandle::instance(id);
        self.guarded(&handle, ResourceStatus::Unknown, ctx, self.client.describe_instance(id))
            .await?
            .for_handle(ctx.operation(), &handle)
    }

    pub async fn disk(&self, id: &str, ctx: &OperationContext) -> Result<Option<Disk>> {
        let handle = ResourceHandle::disk(id);
        self.guarded(&handle, ResourceStatus::Unknown, ctx, self.client.describe_disk(id))
            .await?
            .for_handle(ctx.operation(), &handle)
    }

    pub async fn image(&self, id: &str, ctx: &OperationContext) -> Result<Option<Image>> {
        let handle = ResourceHandle::image(id);
        self.guarded(&handle, ResourceStatus::Unknown, ctx, self.client.describe_image(id))
            .await?
            .for_handle(ctx.operation(), &handle)
    }

    /// Resolve a handle to the status the provider reports right now
    ///
    /// `Ok(None)` means the provider reports the resource as absent.
    pub async fn current_status(
        &self,
        handle: &ResourceHandle,
        ctx: &OperationContext,
    ) -> Result<Option<ResourceStatus>> {
        let status = match handle.kind() {
            ResourceKind::Instance => self.instance(handle.id(), ctx).await?.map(|i| i.status),
            ResourceKind::Disk => self.disk(handle.id(), ctx).await?.map(|d| d.status),
            ResourceKind::Image => self.image(handle.id(), ctx).await?.map(|i| i.status),
        };
        Ok(status)
    }

    /// Wait for `target` using the policy's budget for the handle's kind
    pub async fn wait_for(
        &self,
        handle: &ResourceHandle,
        target: ResourceStatus,
        ctx: &OperationContext,
    ) -> Result<()> {
        self.wait_from(handle, ResourceStatus::Unknown, target, ctx)
            .await
    }

    /// Like [`wait_for`](Self::wait_for), seeded with the status the caller
    /// observed before issuing its verb
    pub async fn wait_from(
        &self,
        handle: &ResourceHandle,
        observed: ResourceStatus,
        target: ResourceStatus,
        ctx: &OperationContext,
    ) -> Result<()> {
        let budget = self.policy.timeout_for(handle.kind());
        self.poll_until(handle, target, observed, budget, ctx).await
    }

    /// Poll until the provider reports `target`
    ///
    /// # Returns
    /// * `Ok(())` - the most recent query observed `target`, or the resource is
    ///   gone and `target` is [`ResourceStatus::Absent`]
    /// * `Err(CpiError::Timeout)` - `budget` elapsed without reaching `target`
    /// * `Err(CpiError::Aborted)` - the context was cancelled or its deadline passed
    /// * `Err(CpiError::NotFound)` - the resource vanished while waiting for a
    ///   status other than absent
    /// * `Err(CpiError::InvalidState)` - the provider reports the resource failed
    /// * `Err(CpiError::Provider)` - a status query failed; never retried here
    pub async fn await_status(
        &self,
        handle: &ResourceHandle,
        target: ResourceStatus,
        budget: Duration,
        ctx: &OperationContext,
    ) -> Result<()> {
        self.poll_until(handle, target, ResourceStatus::Unknown, budget, ctx)
            .await
    }

    async fn poll_until(
        &self,
        handle: &ResourceHandle,
        target: ResourceStatus,
        observed: ResourceStatus,
        budget: Duration,
        ctx: &OperationContext,
    ) -> Result<()> {
        if handle.id().is_empty() {
            return Err(CpiError::InvalidArgument(format!(
                "{}: empty {} id",
                ctx.operation(),
                handle.kind()
            )));
        }
        if budget.is_zero() {
            return Err(CpiError::InvalidArgument(format!(
                "{}: timeout budget for {} must be positive",
                ctx.operation(),
                handle
            )));
        }

        let started = Instant::now();
        let deadline = started + budget;
        let mut last_status = observed;
        let mut polls: u32 = 0;

        loop {
            let observed = tokio::select! {
                biased;
                () = ctx.cancelled() => return Err(self.aborted(handle, last_status, ctx)),
                observed = self.current_status(handle, ctx) => observed?,
            };
            polls += 1;

            match observed {
                Some(status) if status == target => {
                    debug!(%handle, %status, polls, "target status reached");
                    return Ok(());
                }
                Some(ResourceStatus::Failed) => {
                    return Err(CpiError::invalid_state(
                        ctx.operation(),
                        handle,
                        ResourceStatus::Failed,
                        format!("provider reports failure while waiting for {target}"),
                    ));
                }
                Some(status) => {
                    debug!(%handle, %status, %target, polls, "waiting for status");
                    last_status = status;
                }
                None if target.phase() == Phase::Absent => {
                    debug!(%handle, polls, "resource is gone");
                    return Ok(());
                }
                None => return Err(CpiError::not_found(ctx.operation(), handle)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CpiError::Timeout {
                    operation: ctx.operation(),
                    handle: handle.clone(),
                    target,
                    last_status,
                    elapsed: now - started,
                });
            }

            let pause = self.policy.interval.min(deadline - now);
            tokio::select! {
                biased;
                () = ctx.cancelled() => return Err(self.aborted(handle, last_status, ctx)),
                () = sleep(pause) => {}
            }
        }
    }

    fn aborted(
        &self,
        handle: &ResourceHandle,
        last_status: ResourceStatus,
        ctx: &OperationContext,
    ) -> CpiError {
        tracing::warn!(%handle, %last_status, "aborted by caller");
        CpiError::Aborted {
            operation: ctx.operation(),
            handle: handle.clone(),
            last_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::testing::{Call, FakeEcs, Op};
    use tokio_util::sync::CancellationToken;

    fn policy(interval_ms: u64, timeout_ms: u64) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(interval_ms),
            instance_timeout: Duration::from_millis(timeout_ms),
            disk_timeout: Duration::from_millis(timeout_ms),
            image_timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn runner(fake: &Arc<FakeEcs>, interval_ms: u64, timeout_ms: u64) -> LifecycleRunner {
        LifecycleRunner::new(fake.clone(), policy(interval_ms, timeout_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_matching_poll() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_instance(FakeEcs::instance("i-1", ResourceStatus::Running));
        let runner = runner(&fake, 500, 10_000);
        let ctx = OperationContext::new("test");

        let started = Instant::now();
        runner
            .wait_for(&ResourceHandle::instance("i-1"), ResourceStatus::Running, &ctx)
            .await
            .unwrap();

        assert_eq!(fake.describe_count("i-1"), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_target() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_instance(FakeEcs::instance("i-1", ResourceStatus::Pending));
        fake.script(
            "i-1",
            [
                ResourceStatus::Pending,
                ResourceStatus::Starting,
                ResourceStatus::Running,
            ],
        );
        let runner = runner(&fake, 500, 10_000);
        let ctx = OperationContext::new("test");

        let started = Instant::now();
        runner
            .wait_for(&ResourceHandle::instance("i-1"), ResourceStatus::Running, &ctx)
            .await
            .unwrap();

        assert_eq!(fake.describe_count("i-1"), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_succeeds_on_stale_status() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_disk(FakeEcs::disk("d-1", ResourceStatus::Available, None));
        // the disk passes through other statuses but never reports InUse
        fake.script(
            "d-1",
            [
                ResourceStatus::Attaching,
                ResourceStatus::Detaching,
                ResourceStatus::Available,
            ],
        );
        let runner = runner(&fake, 100, 250);
        let ctx = OperationContext::new("test");

        let err = runner
            .wait_for(&ResourceHandle::disk("d-1"), ResourceStatus::InUse, &ctx)
            .await
            .unwrap_err();

        match err {
            CpiError::Timeout { last_status, .. } => {
                assert_eq!(last_status, ResourceStatus::Available)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_within_budget_plus_interval() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_instance(FakeEcs::instance("i-stuck", ResourceStatus::Starting));
        let runner = runner(&fake, 400, 1_000);
        let ctx = OperationContext::new("reboot_vm");

        let started = Instant::now();
        let err = runner
            .wait_for(
                &ResourceHandle::instance("i-stuck"),
                ResourceStatus::Running,
                &ctx,
            )
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(elapsed <= Duration::from_millis(1_000 + 400), "{elapsed:?}");
        match err {
            CpiError::Timeout {
                operation,
                handle,
                last_status,
                target,
                ..
            } => {
                assert_eq!(operation, "reboot_vm");
                assert_eq!(handle.id(), "i-stuck");
                assert_eq!(target, ResourceStatus::Running);
                assert_eq!(last_status, ResourceStatus::Starting);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_counts_as_deleted() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        let runner = runner(&fake, 500, 10_000);
        let ctx = OperationContext::new("delete_vm");

        runner
            .wait_for(&ResourceHandle::instance("i-gone"), ResourceStatus::Absent, &ctx)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanishing_resource_is_not_found() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_instance(FakeEcs::instance("i-1", ResourceStatus::Pending));
        fake.script("i-1", [ResourceStatus::Pending, ResourceStatus::Absent]);
        let runner = runner(&fake, 500, 10_000);
        let ctx = OperationContext::new("create_vm");

        let err = runner
            .wait_for(&ResourceHandle::instance("i-1"), ResourceStatus::Running, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CpiError::NotFound { .. }));
        // once absent, the resource stays absent for the rest of the call
        assert!(fake.instance_state("i-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_propagates_without_retry() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_instance(FakeEcs::instance("i-1", ResourceStatus::Pending));
        fake.fail_next(
            Op::DescribeInstance,
            ProviderError::new("ServiceUnavailable", "try again later"),
        );
        let runner = runner(&fake, 500, 10_000);
        let ctx = OperationContext::new("create_vm");

        let err = runner
            .wait_for(&ResourceHandle::instance("i-1"), ResourceStatus::Running, &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, CpiError::Provider { .. }));
        assert_eq!(
            fake.calls(),
            vec![Call::DescribeInstance("i-1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_with_last_status() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_instance(FakeEcs::instance("i-1", ResourceStatus::Stopping));
        let runner = runner(&fake, 500, 600_000);
        let token = CancellationToken::new();
        let ctx = OperationContext::new("delete_vm").with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            sleep(Duration::from_millis(1_200)).await;
            token.cancel();
        });

        let started = Instant::now();
        let err = runner
            .wait_for(&ResourceHandle::instance("i-1"), ResourceStatus::Stopped, &ctx)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(1_200));
        match err {
            CpiError::Aborted { last_status, .. } => {
                assert_eq!(last_status, ResourceStatus::Stopping)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_from_reports_observed_status() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_instance(FakeEcs::instance("i-1", ResourceStatus::Running));
        let runner = runner(&fake, 500, 600_000);
        let token = CancellationToken::new();
        token.cancel();
        let ctx = OperationContext::new("delete_vm").with_cancellation(token);

        let err = runner
            .wait_from(
                &ResourceHandle::instance("i-1"),
                ResourceStatus::Running,
                ResourceStatus::Stopped,
                &ctx,
            )
            .await
            .unwrap_err();

        match err {
            CpiError::Aborted { last_status, .. } => {
                assert_eq!(last_status, ResourceStatus::Running)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_guarded_call_is_not_started_once_cancelled() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_instance(FakeEcs::instance("i-1", ResourceStatus::Running));
        let runner = runner(&fake, 500, 10_000);
        let token = CancellationToken::new();
        let ctx = OperationContext::new("reboot_vm").with_cancellation(token.clone());
        let handle = ResourceHandle::instance("i-1");

        let instance = runner.instance("i-1", &ctx).await.unwrap();
        assert!(instance.is_some());

        token.cancel();
        let err = runner
            .guarded(
                &handle,
                ResourceStatus::Running,
                &ctx,
                runner.client().reboot_instance("i-1", true),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CpiError::Aborted {
                last_status: ResourceStatus::Running,
                ..
            }
        ));
        assert!(runner.instance("i-1", &ctx).await.is_err());
        assert_eq!(
            fake.calls(),
            vec![Call::DescribeInstance("i-1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_call_is_dropped_on_cancel() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        let runner = runner(&fake, 500, 10_000);
        let token = CancellationToken::new();
        let ctx = OperationContext::new("create_disk").with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            token.cancel();
        });

        let started = Instant::now();
        let out = runner
            .cancellable(&ctx, std::future::pending::<()>())
            .await;
        canceller.await.unwrap();

        assert!(out.is_none());
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_image(FakeEcs::image("m-1", ResourceStatus::Creating));
        let runner = runner(&fake, 500, 600_000);
        let ctx = OperationContext::new("create_stemcell")
            .with_deadline(Instant::now() + Duration::from_secs(2));

        let err = runner
            .wait_for(&ResourceHandle::image("m-1"), ResourceStatus::Available, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CpiError::Aborted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_ends_wait() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        fake.add_image(FakeEcs::image("m-1", ResourceStatus::Creating));
        fake.script("m-1", [ResourceStatus::Creating, ResourceStatus::Failed]);
        let runner = runner(&fake, 500, 600_000);
        let ctx = OperationContext::new("create_stemcell");

        let err = runner
            .wait_for(&ResourceHandle::image("m-1"), ResourceStatus::Available, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CpiError::InvalidState {
                status: ResourceStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rejects_empty_handle_and_zero_budget() {
        let fake = Arc::new(FakeEcs::new("cn-hangzhou"));
        let runner = runner(&fake, 500, 1_000);
        let ctx = OperationContext::new("test");

        let err = runner
            .wait_for(&ResourceHandle::instance(""), ResourceStatus::Running, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CpiError::InvalidArgument(_)));

        let err = runner
            .await_status(
                &ResourceHandle::instance("i-1"),
                ResourceStatus::Running,
                Duration::ZERO,
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CpiError::InvalidArgument(_)));
        assert!(fake.calls().is_empty());
    }
}
