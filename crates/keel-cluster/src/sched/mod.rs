mod actor;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use keel_server::actor::{ActorHandle, ActorSystem};

use crate::detector::{MasterDetector, MasterUrl, StaticDetector};
use crate::error::{ClusterError, ClusterResult};
use crate::id::{ExecutorId, FrameworkId, OfferId, SlaveId, TaskId};
use crate::local::LocalCluster;
use crate::protocol::{
    Filters, FrameworkInfo, Offer, ResourceRequest, SchedulerMessage, TaskDescription, TaskStatus,
};
use crate::resources::Resources;

use self::actor::{SchedActor, SchedActorOptions, SchedEvent, SchedOp};

/// Callbacks a framework's scheduler implements. Invoked on the driver's
/// actor, one at a time.
pub trait Scheduler: Send + 'static {
    fn registered(&mut self, driver: &SchedulerDriverClient, framework_id: &FrameworkId);
    fn resource_offers(&mut self, driver: &SchedulerDriverClient, offers: &[Offer]);
    fn offer_rescinded(&mut self, driver: &SchedulerDriverClient, offer_id: &OfferId);
    fn status_update(&mut self, driver: &SchedulerDriverClient, status: &TaskStatus);
    fn framework_message(
        &mut self,
        driver: &SchedulerDriverClient,
        slave_id: &SlaveId,
        executor_id: &ExecutorId,
        data: &[u8],
    );
    fn slave_lost(&mut self, driver: &SchedulerDriverClient, slave_id: &SlaveId);
    fn error(&mut self, driver: &SchedulerDriverClient, code: i32, message: &str);
}

/// Handle used to issue operations from inside callbacks or from other
/// threads. Operations issued before registration are buffered and
/// flushed once the master confirms it.
#[derive(Clone)]
pub struct SchedulerDriverClient {
    handle: ActorHandle<SchedActor>,
}

impl SchedulerDriverClient {
    /// Launch tasks against an offer; an empty task list declines it.
    pub fn reply_to_offer(
        &self,
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
        filters: Filters,
    ) {
        self.handle.send(SchedEvent::Op(SchedOp::ReplyToOffer {
            offer_id,
            tasks,
            filters,
        }));
    }

    pub fn kill_task(&self, task_id: TaskId) {
        self.handle.send(SchedEvent::Op(SchedOp::KillTask { task_id }));
    }

    pub fn revive_offers(&self) {
        self.handle.send(SchedEvent::Op(SchedOp::ReviveOffers));
    }

    pub fn request_resources(&self, requests: Vec<ResourceRequest>) {
        self.handle
            .send(SchedEvent::Op(SchedOp::RequestResources { requests }));
    }

    pub fn send_framework_message(
        &self,
        slave_id: SlaveId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        self.handle.send(SchedEvent::Op(SchedOp::SendFrameworkMessage {
            slave_id,
            executor_id,
            data,
        }));
    }

    /// Unregister from the master and stop the driver.
    pub fn stop(&self) {
        self.handle.send(SchedEvent::Stop);
    }
}

enum MasterSource {
    Detector(Arc<dyn MasterDetector>),
    Local { slaves: usize },
}

/// The library actor a framework links against: finds the master via the
/// detector, registers, and translates protocol events into [Scheduler]
/// callbacks.
pub struct SchedulerDriver {
    system: ActorSystem,
    framework: FrameworkInfo,
    source: MasterSource,
    scheduler: Option<Box<dyn Scheduler>>,
    handle: Option<ActorHandle<SchedActor>>,
    owns_endpoint: bool,
    listen_host: String,
    failover_id: Option<FrameworkId>,
    /// Keeps the in-process cluster alive for `local` master URLs.
    local: Option<LocalCluster>,
}

static DRIVER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl SchedulerDriver {
    /// Connect to the master named by `master_url`: `host:port`, `local`,
    /// `local/N`, or a coordinated `zoo://...` URL (which needs an
    /// externally provided detector; see [Self::with_detector]).
    pub fn new(
        scheduler: Box<dyn Scheduler>,
        framework: FrameworkInfo,
        master_url: &str,
    ) -> ClusterResult<Self> {
        let url: MasterUrl = master_url.parse()?;
        let source = match url {
            MasterUrl::Local { slaves } => MasterSource::Local { slaves },
            other => MasterSource::Detector(other.detector()?),
        };
        Ok(Self {
            system: ActorSystem::new(),
            framework,
            source,
            scheduler: Some(scheduler),
            handle: None,
            owns_endpoint: true,
            listen_host: "127.0.0.1".to_string(),
            failover_id: None,
            local: None,
        })
    }

    pub fn with_detector(
        scheduler: Box<dyn Scheduler>,
        framework: FrameworkInfo,
        detector: Arc<dyn MasterDetector>,
    ) -> Self {
        Self {
            system: ActorSystem::new(),
            framework,
            source: MasterSource::Detector(detector),
            scheduler: Some(scheduler),
            handle: None,
            owns_endpoint: true,
            listen_host: "127.0.0.1".to_string(),
            failover_id: None,
            local: None,
        }
    }

    /// A driver running inside an existing actor system (local clusters
    /// and tests).
    pub fn local(
        system: &ActorSystem,
        scheduler: Box<dyn Scheduler>,
        framework: FrameworkInfo,
        detector: Arc<dyn MasterDetector>,
    ) -> Self {
        Self {
            system: system.clone(),
            framework,
            source: MasterSource::Detector(detector),
            scheduler: Some(scheduler),
            handle: None,
            owns_endpoint: false,
            listen_host: "127.0.0.1".to_string(),
            failover_id: None,
            local: None,
        }
    }

    /// The host this driver's endpoint advertises; it must be routable
    /// from the master.
    pub fn with_listen_host(mut self, host: impl Into<String>) -> Self {
        self.listen_host = host.into();
        self
    }

    /// Fail over as an existing framework: re-register under the id a
    /// previous driver incarnation was assigned.
    pub fn with_framework_id(mut self, framework_id: FrameworkId) -> Self {
        self.failover_id = Some(framework_id);
        self
    }

    pub async fn start(&mut self) -> ClusterResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let scheduler = self
            .scheduler
            .take()
            .ok_or_else(|| ClusterError::InternalError("driver cannot be restarted".into()))?;
        if self.owns_endpoint {
            self.system.listen(&self.listen_host.clone(), 0).await?;
        }
        let detector: Arc<dyn MasterDetector> = match &self.source {
            MasterSource::Detector(detector) => detector.clone(),
            MasterSource::Local { slaves } => {
                let cluster =
                    LocalCluster::start(&self.system, *slaves, Resources::cpus_mem(1.0, 1024.0));
                let detector = Arc::new(StaticDetector::new(cluster.master_address()));
                self.local = Some(cluster);
                detector
            }
        };
        let name = format!(
            "scheduler-{}",
            DRIVER_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let handle = self.system.spawn::<SchedActor>(
            &name,
            SchedActorOptions {
                scheduler,
                framework: self.framework.clone(),
                detector,
                failover_id: self.failover_id.clone(),
            },
        );
        self.system
            .expose::<SchedActor, SchedulerMessage, _>(&handle, |message, from| {
                SchedEvent::Message { from, message }
            });
        self.handle = Some(handle);
        Ok(())
    }

    pub fn client(&self) -> ClusterResult<SchedulerDriverClient> {
        self.handle
            .as_ref()
            .map(|handle| SchedulerDriverClient {
                handle: handle.clone(),
            })
            .ok_or(ClusterError::DriverNotRunning)
    }

    pub fn stop(&self) {
        if let Some(handle) = &self.handle {
            handle.send(SchedEvent::Stop);
        }
    }

    /// Stop the driver without unregistering, as a crashing scheduler
    /// would. The master keeps the framework through its failover window.
    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.terminate();
        }
    }

    /// Wait until the driver stops.
    pub async fn join(&self) {
        if let Some(handle) = &self.handle {
            handle.clone().wait_for_stop().await;
        }
        if let Some(local) = &self.local {
            local.shutdown().await;
        }
    }

    pub async fn run(&mut self) -> ClusterResult<()> {
        self.start().await?;
        self.join().await;
        Ok(())
    }
}
