use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use uuid::Uuid;

use keel_cluster::detector::StaticDetector;
use keel_cluster::exec::{Executor, ExecutorDriverClient};
use keel_cluster::id::{ExecutorId, FrameworkId, OfferId, SlaveId, TaskId};
use keel_cluster::local::LocalCluster;
use keel_cluster::master::{start_master, MasterActor, MasterEvent, MasterOptions, MasterSnapshot};
use keel_cluster::protocol::{
    ExecutorInfo, Filters, FrameworkInfo, MasterMessage, Offer, SlaveMessage, TaskDescription,
    TaskState, TaskStatus,
};
use keel_cluster::resources::Resources;
use keel_cluster::sched::{Scheduler, SchedulerDriver, SchedulerDriverClient};
use keel_cluster::slave::{
    start_slave, LocalIsolation, SlaveActor, SlaveEvent, SlaveOptions, SlaveRegistrySnapshot,
};
use keel_server::actor::{Actor, ActorAction, ActorContext, ActorHandle, ActorSystem};
use keel_server::address::Address;

const EVENT_TIMEOUT: Duration = Duration::from_secs(60);

fn framework_info(name: &str) -> FrameworkInfo {
    FrameworkInfo {
        name: name.to_string(),
        user: "tester".to_string(),
        executor: ExecutorInfo {
            executor_id: ExecutorId::new("default"),
            uri: "/bin/false".to_string(),
            command: String::new(),
            data: Vec::new(),
            resources: Resources::new(),
        },
    }
}

fn task(task_id: &str, slave_id: &SlaveId, cpus: f64, mem: f64) -> TaskDescription {
    TaskDescription {
        task_id: TaskId::new(task_id),
        name: task_id.to_string(),
        slave_id: slave_id.clone(),
        resources: Resources::cpus_mem(cpus, mem),
        executor: None,
        data: Vec::new(),
    }
}

async fn inspect_master(handle: &ActorHandle<MasterActor>) -> MasterSnapshot {
    let (reply, response) = oneshot::channel();
    handle.send(MasterEvent::Inspect { reply });
    response.await.expect("master is gone")
}

async fn inspect_slave(handle: &ActorHandle<SlaveActor>) -> SlaveRegistrySnapshot {
    let (reply, response) = oneshot::channel();
    handle.send(SlaveEvent::Inspect { reply });
    response.await.expect("slave is gone")
}

/// Wait until the master's registries satisfy a predicate.
async fn master_eventually<F>(handle: &ActorHandle<MasterActor>, mut predicate: F)
where
    F: FnMut(&MasterSnapshot) -> bool,
{
    for _ in 0..600 {
        let snapshot = inspect_master(handle).await;
        if predicate(&snapshot) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("master never reached the expected state");
}

#[derive(Debug)]
enum SchedulerEvent {
    Registered(FrameworkId),
    Rescinded(OfferId),
    FrameworkMessage(SlaveId, ExecutorId, Vec<u8>),
    SlaveLost(SlaveId),
    Error(i32, String),
}

/// A scheduler that forwards every callback to the test body.
struct TestScheduler {
    events: mpsc::UnboundedSender<SchedulerEvent>,
    offers: mpsc::UnboundedSender<Vec<Offer>>,
    statuses: mpsc::UnboundedSender<TaskStatus>,
}

impl Scheduler for TestScheduler {
    fn registered(&mut self, _driver: &SchedulerDriverClient, framework_id: &FrameworkId) {
        let _ = self
            .events
            .send(SchedulerEvent::Registered(framework_id.clone()));
    }

    fn resource_offers(&mut self, _driver: &SchedulerDriverClient, offers: &[Offer]) {
        let _ = self.offers.send(offers.to_vec());
    }

    fn offer_rescinded(&mut self, _driver: &SchedulerDriverClient, offer_id: &OfferId) {
        let _ = self.events.send(SchedulerEvent::Rescinded(offer_id.clone()));
    }

    fn status_update(&mut self, _driver: &SchedulerDriverClient, status: &TaskStatus) {
        let _ = self.statuses.send(status.clone());
    }

    fn framework_message(
        &mut self,
        _driver: &SchedulerDriverClient,
        slave_id: &SlaveId,
        executor_id: &ExecutorId,
        data: &[u8],
    ) {
        let _ = self.events.send(SchedulerEvent::FrameworkMessage(
            slave_id.clone(),
            executor_id.clone(),
            data.to_vec(),
        ));
    }

    fn slave_lost(&mut self, _driver: &SchedulerDriverClient, slave_id: &SlaveId) {
        let _ = self.events.send(SchedulerEvent::SlaveLost(slave_id.clone()));
    }

    fn error(&mut self, _driver: &SchedulerDriverClient, code: i32, message: &str) {
        let _ = self
            .events
            .send(SchedulerEvent::Error(code, message.to_string()));
    }
}

/// The test body's view of a driver's callbacks.
struct SchedulerProbe {
    events: mpsc::UnboundedReceiver<SchedulerEvent>,
    offers: mpsc::UnboundedReceiver<Vec<Offer>>,
    statuses: mpsc::UnboundedReceiver<TaskStatus>,
    spare_statuses: VecDeque<TaskStatus>,
}

impl SchedulerProbe {
    fn new() -> (TestScheduler, Self) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (offers_tx, offers_rx) = mpsc::unbounded_channel();
        let (statuses_tx, statuses_rx) = mpsc::unbounded_channel();
        (
            TestScheduler {
                events: events_tx,
                offers: offers_tx,
                statuses: statuses_tx,
            },
            Self {
                events: events_rx,
                offers: offers_rx,
                statuses: statuses_rx,
                spare_statuses: VecDeque::new(),
            },
        )
    }

    async fn registered(&mut self) -> FrameworkId {
        loop {
            match timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .expect("timed out waiting for registration")
                .expect("driver is gone")
            {
                SchedulerEvent::Registered(framework_id) => return framework_id,
                other => panic!("expected registration, got {other:?}"),
            }
        }
    }

    async fn offers(&mut self) -> Vec<Offer> {
        timeout(EVENT_TIMEOUT, self.offers.recv())
            .await
            .expect("timed out waiting for offers")
            .expect("driver is gone")
    }

    async fn no_offers_for(&mut self, duration: Duration) {
        if let Ok(offers) = timeout(duration, self.offers.recv()).await {
            panic!("unexpected offers: {offers:?}");
        }
    }

    async fn status(&mut self) -> TaskStatus {
        if let Some(status) = self.spare_statuses.pop_front() {
            return status;
        }
        timeout(EVENT_TIMEOUT, self.statuses.recv())
            .await
            .expect("timed out waiting for a status update")
            .expect("driver is gone")
    }

    /// The next status update for one specific task.
    async fn status_of(&mut self, task_id: &TaskId) -> TaskStatus {
        for _ in 0..16 {
            let status = self.status().await;
            if &status.task_id == task_id {
                return status;
            }
            self.spare_statuses.push_back(status);
        }
        panic!("no status update for task {task_id}");
    }

    async fn no_statuses_for(&mut self, duration: Duration) {
        assert!(
            self.spare_statuses.is_empty(),
            "unconsumed status updates: {:?}",
            self.spare_statuses
        );
        if let Ok(status) = timeout(duration, self.statuses.recv()).await {
            panic!("unexpected status update: {status:?}");
        }
    }

    async fn slave_lost(&mut self) -> SlaveId {
        loop {
            match timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .expect("timed out waiting for slave loss")
                .expect("driver is gone")
            {
                SchedulerEvent::SlaveLost(slave_id) => return slave_id,
                other => panic!("expected slave loss, got {other:?}"),
            }
        }
    }

    async fn error(&mut self) -> (i32, String) {
        loop {
            match timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .expect("timed out waiting for an error")
                .expect("driver is gone")
            {
                SchedulerEvent::Error(code, message) => return (code, message),
                other => panic!("expected an error, got {other:?}"),
            }
        }
    }

    async fn framework_message(&mut self) -> (SlaveId, ExecutorId, Vec<u8>) {
        loop {
            match timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .expect("timed out waiting for a framework message")
                .expect("driver is gone")
            {
                SchedulerEvent::FrameworkMessage(slave_id, executor_id, data) => {
                    return (slave_id, executor_id, data)
                }
                other => panic!("expected a framework message, got {other:?}"),
            }
        }
    }
}

/// An executor that reports `RUNNING` for every task it is handed, and
/// optionally finishes it right away. Kill requests produce exactly one
/// `KILLED` update per task. Framework messages are echoed back.
struct TestExecutor {
    auto_finish: bool,
    killed: HashSet<TaskId>,
}

impl TestExecutor {
    fn running() -> Self {
        Self {
            auto_finish: false,
            killed: HashSet::new(),
        }
    }

    fn finishing() -> Self {
        Self {
            auto_finish: true,
            killed: HashSet::new(),
        }
    }
}

impl Executor for TestExecutor {
    fn init(&mut self, _driver: &ExecutorDriverClient, _args: &keel_cluster::protocol::ExecutorArgs) {}

    fn launch_task(&mut self, driver: &ExecutorDriverClient, task: &TaskDescription) {
        driver.send_status_update(task.task_id.clone(), TaskState::Running, None);
        if self.auto_finish {
            driver.send_status_update(task.task_id.clone(), TaskState::Finished, None);
        }
    }

    fn kill_task(&mut self, driver: &ExecutorDriverClient, task_id: &TaskId) {
        if self.killed.insert(task_id.clone()) {
            driver.send_status_update(task_id.clone(), TaskState::Killed, None);
        }
    }

    fn framework_message(&mut self, driver: &ExecutorDriverClient, data: &[u8]) {
        driver.send_framework_message(data.to_vec());
    }

    fn shutdown(&mut self, _driver: &ExecutorDriverClient) {}

    fn error(&mut self, _driver: &ExecutorDriverClient, _code: i32, _message: &str) {}
}

struct Harness {
    system: ActorSystem,
    cluster: LocalCluster,
}

impl Harness {
    fn start(slaves: usize, resources: Resources) -> Self {
        Self::start_with_options(slaves, resources, MasterOptions::new())
    }

    fn start_with_options(slaves: usize, resources: Resources, options: MasterOptions) -> Self {
        let system = ActorSystem::new();
        let cluster = LocalCluster::start_with_options(&system, slaves, resources, options);
        cluster
            .isolation()
            .register_executor(ExecutorId::new("default"), || {
                Box::new(TestExecutor::running())
            });
        Self { system, cluster }
    }

    async fn driver(&self) -> (SchedulerDriver, SchedulerDriverClient, SchedulerProbe) {
        self.named_driver("test").await
    }

    async fn named_driver(
        &self,
        name: &str,
    ) -> (SchedulerDriver, SchedulerDriverClient, SchedulerProbe) {
        let (scheduler, probe) = SchedulerProbe::new();
        let mut driver = SchedulerDriver::local(
            &self.system,
            Box::new(scheduler),
            framework_info(name),
            self.cluster.detector(),
        );
        driver.start().await.expect("failed to start driver");
        let client = driver.client().expect("driver has no client");
        (driver, client, probe)
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path() {
    let harness = Harness::start(1, Resources::cpus_mem(2.0, 1024.0));
    let (_driver, client, mut probe) = harness.driver().await;

    let framework_id = probe.registered().await;
    let offers = probe.offers().await;
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].resources, Resources::cpus_mem(2.0, 1024.0));
    let slave_id = offers[0].slave_id.clone();

    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![task("t1", &slave_id, 1.0, 512.0)],
        Filters {
            refuse_seconds: 0.0,
        },
    );

    let status = probe.status_of(&TaskId::new("t1")).await;
    assert_eq!(status.state, TaskState::Running);

    // The unused half of the offer comes back as a fresh offer.
    let offers = probe.offers().await;
    assert_eq!(offers[0].resources, Resources::cpus_mem(1.0, 512.0));

    // The master agrees: the task is running, and available plus
    // outstanding offers plus the task add up to the slave's total.
    let snapshot = inspect_master(harness.cluster.master()).await;
    let framework = snapshot.framework(&framework_id).expect("framework gone");
    assert_eq!(framework.tasks.len(), 1);
    assert_eq!(framework.tasks[0].state, TaskState::Running);
    let slave = snapshot.slave(&slave_id).expect("slave gone");
    let mut in_use = slave.available.clone();
    for offer in &snapshot.offers {
        if offer.slave_id == slave_id {
            in_use = in_use.add(&offer.resources).unwrap();
        }
    }
    for task in &slave.tasks {
        in_use = in_use.add(&task.resources).unwrap();
    }
    assert_eq!(in_use, slave.total);

    harness.cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_declined_offer_respects_refusal_filter() {
    let harness = Harness::start(1, Resources::cpus_mem(2.0, 1024.0));
    let (_driver, client, mut probe) = harness.driver().await;

    probe.registered().await;
    let offers = probe.offers().await;
    let slave_id = offers[0].slave_id.clone();

    let declined_at = tokio::time::Instant::now();
    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![],
        Filters {
            refuse_seconds: 5.0,
        },
    );

    // The declined resources return to the slave in full.
    master_eventually(harness.cluster.master(), |snapshot| {
        snapshot
            .slave(&slave_id)
            .is_some_and(|s| s.available == Resources::cpus_mem(2.0, 1024.0))
    })
    .await;

    // No re-offer while the filter is in force, then one right after.
    probe.no_offers_for(Duration::from_secs(4)).await;
    let offers = probe.offers().await;
    assert!(declined_at.elapsed() >= Duration::from_secs(5));
    assert_eq!(offers[0].resources, Resources::cpus_mem(2.0, 1024.0));

    harness.cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_revive_offers_clears_filters() {
    let harness = Harness::start(1, Resources::cpus_mem(2.0, 1024.0));
    let (_driver, client, mut probe) = harness.driver().await;

    probe.registered().await;
    let offers = probe.offers().await;
    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![],
        Filters {
            refuse_seconds: 300.0,
        },
    );
    probe.no_offers_for(Duration::from_secs(3)).await;

    client.revive_offers();
    let offers = probe.offers().await;
    assert_eq!(offers[0].resources, Resources::cpus_mem(2.0, 1024.0));

    harness.cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slave_lost_mid_task() {
    let harness = Harness::start(1, Resources::cpus_mem(2.0, 1024.0));
    let (_driver, client, mut probe) = harness.driver().await;

    let framework_id = probe.registered().await;
    let offers = probe.offers().await;
    let slave_id = offers[0].slave_id.clone();
    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![task("t1", &slave_id, 1.0, 512.0)],
        Filters {
            refuse_seconds: 0.0,
        },
    );
    let status = probe.status_of(&TaskId::new("t1")).await;
    assert_eq!(status.state, TaskState::Running);

    // Kill the slave actor outright, as if its connection died.
    harness.cluster.slaves()[0].terminate();

    let status = probe.status_of(&TaskId::new("t1")).await;
    assert_eq!(status.state, TaskState::Lost);
    assert_eq!(probe.slave_lost().await, slave_id);

    let snapshot = inspect_master(harness.cluster.master()).await;
    assert!(snapshot.slave(&slave_id).is_none());
    let framework = snapshot.framework(&framework_id).expect("framework gone");
    assert!(framework.tasks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_framework_reregistration_preserves_tasks() {
    let harness = Harness::start(1, Resources::cpus_mem(2.0, 1024.0));
    let (driver1, client, mut probe) = harness.named_driver("failover").await;

    let framework_id = probe.registered().await;
    let offers = probe.offers().await;
    let slave_id = offers[0].slave_id.clone();
    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![task("t1", &slave_id, 1.0, 512.0)],
        Filters {
            refuse_seconds: 0.0,
        },
    );
    assert_eq!(
        probe.status_of(&TaskId::new("t1")).await.state,
        TaskState::Running
    );

    // The scheduler crashes without unregistering.
    driver1.abort();
    master_eventually(harness.cluster.master(), |snapshot| {
        snapshot
            .framework(&framework_id)
            .is_some_and(|f| !f.active)
    })
    .await;

    // A new incarnation reconnects within the failover window under the
    // same framework id.
    let (scheduler, mut probe2) = SchedulerProbe::new();
    let mut driver2 = SchedulerDriver::local(
        &harness.system,
        Box::new(scheduler),
        framework_info("failover"),
        harness.cluster.detector(),
    )
    .with_framework_id(framework_id.clone());
    driver2.start().await.unwrap();

    assert_eq!(probe2.registered().await, framework_id);
    let snapshot = inspect_master(harness.cluster.master()).await;
    let framework = snapshot.framework(&framework_id).expect("framework gone");
    assert!(framework.active);
    assert_eq!(framework.tasks.len(), 1);
    assert_eq!(framework.tasks[0].task_id, TaskId::new("t1"));

    // Offers resume for the new incarnation.
    let offers = probe2.offers().await;
    assert_eq!(offers[0].resources, Resources::cpus_mem(1.0, 512.0));

    harness.cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_framework_failover_window_expires() {
    let mut options = MasterOptions::new();
    options.framework_failover_timeout = Duration::from_secs(5);
    let harness = Harness::start_with_options(1, Resources::cpus_mem(2.0, 1024.0), options);
    let (driver, client, mut probe) = harness.driver().await;

    let framework_id = probe.registered().await;
    let offers = probe.offers().await;
    let slave_id = offers[0].slave_id.clone();
    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![task("t1", &slave_id, 1.0, 512.0)],
        Filters {
            refuse_seconds: 0.0,
        },
    );
    assert_eq!(
        probe.status_of(&TaskId::new("t1")).await.state,
        TaskState::Running
    );

    driver.abort();
    master_eventually(harness.cluster.master(), |snapshot| {
        snapshot.framework(&framework_id).is_none()
    })
    .await;

    // The slave was told to tear the framework down with its executor.
    let slaves = harness.cluster.slaves();
    for _ in 0..600 {
        let snapshot = inspect_slave(&slaves[0]).await;
        if snapshot.framework(&framework_id).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("slave kept the framework after the failover window expired");
}

#[tokio::test(start_paused = true)]
async fn test_oversized_task_is_rejected_alone() {
    let harness = Harness::start(1, Resources::cpus_mem(1.0, 512.0));
    let (_driver, client, mut probe) = harness.driver().await;

    probe.registered().await;
    let offers = probe.offers().await;
    assert_eq!(offers[0].resources, Resources::cpus_mem(1.0, 512.0));
    let slave_id = offers[0].slave_id.clone();

    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![
            task("fits", &slave_id, 0.5, 128.0),
            task("huge", &slave_id, 2.0, 64.0),
        ],
        Filters {
            refuse_seconds: 0.0,
        },
    );

    // The oversized task is lost with a reason; its sibling launches.
    let lost = probe.status_of(&TaskId::new("huge")).await;
    assert_eq!(lost.state, TaskState::Lost);
    assert!(lost.message.is_some());
    let running = probe.status_of(&TaskId::new("fits")).await;
    assert_eq!(running.state, TaskState::Running);

    harness.cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_kill_task_yields_one_terminal_update() {
    let harness = Harness::start(1, Resources::cpus_mem(2.0, 1024.0));
    let (_driver, client, mut probe) = harness.driver().await;

    probe.registered().await;
    let offers = probe.offers().await;
    let slave_id = offers[0].slave_id.clone();
    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![task("t1", &slave_id, 1.0, 512.0)],
        Filters {
            refuse_seconds: 0.0,
        },
    );
    assert_eq!(
        probe.status_of(&TaskId::new("t1")).await.state,
        TaskState::Running
    );

    client.kill_task(TaskId::new("t1"));
    client.kill_task(TaskId::new("t1"));

    let status = probe.status_of(&TaskId::new("t1")).await;
    assert_eq!(status.state, TaskState::Killed);
    probe.no_statuses_for(Duration::from_secs(30)).await;

    harness.cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_framework_message_round_trip() {
    let harness = Harness::start(1, Resources::cpus_mem(2.0, 1024.0));
    let (_driver, client, mut probe) = harness.driver().await;

    probe.registered().await;
    let offers = probe.offers().await;
    let slave_id = offers[0].slave_id.clone();
    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![task("t1", &slave_id, 1.0, 512.0)],
        Filters {
            refuse_seconds: 0.0,
        },
    );
    assert_eq!(
        probe.status_of(&TaskId::new("t1")).await.state,
        TaskState::Running
    );

    // Scheduler-to-executor travels via the master; the echo comes back
    // directly from the slave.
    client.send_framework_message(
        slave_id.clone(),
        ExecutorId::new("default"),
        b"marco".to_vec(),
    );
    let (from_slave, from_executor, data) = probe.framework_message().await;
    assert_eq!(from_slave, slave_id);
    assert_eq!(from_executor, ExecutorId::new("default"));
    assert_eq!(data, b"marco".to_vec());

    harness.cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_registration_is_rejected() {
    let harness = Harness::start(1, Resources::cpus_mem(1.0, 512.0));
    let (scheduler, mut probe) = SchedulerProbe::new();
    let mut info = framework_info("anonymous");
    info.name = String::new();
    let mut driver = SchedulerDriver::local(
        &harness.system,
        Box::new(scheduler),
        info,
        harness.cluster.detector(),
    );
    driver.start().await.unwrap();

    let (code, message) = probe.error().await;
    assert_eq!(code, 1);
    assert!(message.contains("name"), "{message}");
    assert!(inspect_master(harness.cluster.master())
        .await
        .frameworks
        .is_empty());

    harness.cluster.shutdown().await;
}

/// A stand-in master giving the test full control over status update
/// acknowledgements.
struct FakeMaster {
    events: mpsc::UnboundedSender<MasterMessage>,
}

struct FakeMasterOptions {
    events: mpsc::UnboundedSender<MasterMessage>,
}

enum FakeMasterEvent {
    Message {
        from: Address,
        message: MasterMessage,
    },
    Ack {
        slave: Address,
        framework_id: FrameworkId,
        task_id: TaskId,
        uuid: Uuid,
    },
}

#[async_trait]
impl Actor for FakeMaster {
    type Message = FakeMasterEvent;
    type Options = FakeMasterOptions;

    fn name() -> &'static str {
        "FakeMaster"
    }

    fn new(options: FakeMasterOptions) -> Self {
        Self {
            events: options.events,
        }
    }

    async fn start(&mut self, _ctx: &mut ActorContext<Self>) {}

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: FakeMasterEvent) -> ActorAction {
        match message {
            FakeMasterEvent::Message { from, message } => {
                if matches!(message, MasterMessage::RegisterSlave { .. }) {
                    ctx.post(
                        &from,
                        &SlaveMessage::SlaveRegistered {
                            slave_id: SlaveId::new("s-fake"),
                        },
                    );
                }
                let _ = self.events.send(message);
                ActorAction::Continue
            }
            FakeMasterEvent::Ack {
                slave,
                framework_id,
                task_id,
                uuid,
            } => {
                ctx.post(
                    &slave,
                    &SlaveMessage::StatusUpdateAck {
                        framework_id,
                        task_id,
                        uuid,
                    },
                );
                ActorAction::Continue
            }
        }
    }

    async fn stop(self, _ctx: &mut ActorContext<Self>) {}
}

async fn next_status_update(
    rx: &mut mpsc::UnboundedReceiver<MasterMessage>,
) -> (FrameworkId, TaskStatus) {
    loop {
        let message = timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a status update")
            .expect("fake master is gone");
        if let MasterMessage::StatusUpdate {
            framework_id,
            status,
        } = message
        {
            return (framework_id, status);
        }
    }
}

async fn no_status_updates_for(rx: &mut mpsc::UnboundedReceiver<MasterMessage>, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, rx.recv()).await {
            Err(_) => return,
            Ok(Some(MasterMessage::StatusUpdate { status, .. })) => {
                panic!("unexpected status update: {status:?}");
            }
            Ok(Some(_)) => {}
            Ok(None) => panic!("fake master is gone"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_status_update_retries_until_acknowledged() {
    let system = ActorSystem::new();
    let (events, mut rx) = mpsc::unbounded_channel();
    let master = system.spawn::<FakeMaster>("master", FakeMasterOptions { events });
    system.expose::<FakeMaster, MasterMessage, _>(&master, |message, from| {
        FakeMasterEvent::Message { from, message }
    });

    let detector = Arc::new(StaticDetector::new(master.address().clone()));
    let isolation = Arc::new(LocalIsolation::new(system.clone()));
    isolation.register_executor(ExecutorId::new("default"), || {
        Box::new(TestExecutor::finishing())
    });
    let slave = start_slave(
        &system,
        "slave-0",
        SlaveOptions::new(detector, isolation)
            .with_resources(Resources::cpus_mem(2.0, 1024.0))
            .with_work_dir(std::env::temp_dir()),
    );
    let slave_address = slave.address().clone();

    // Wait for the slave to register, then hand it a task directly.
    loop {
        match timeout(EVENT_TIMEOUT, rx.recv()).await.unwrap().unwrap() {
            MasterMessage::RegisterSlave { .. } => break,
            _ => continue,
        }
    }
    let framework_id = FrameworkId::new("fw-test");
    system.post(
        master.address(),
        &slave_address,
        &SlaveMessage::RunTask {
            framework_id: framework_id.clone(),
            framework: framework_info("retry"),
            scheduler: master.address().clone(),
            task: task("t1", &SlaveId::new("s-fake"), 1.0, 512.0),
        },
    );

    // RUNNING then FINISHED arrive; acknowledge only RUNNING.
    let (_, running) = next_status_update(&mut rx).await;
    assert_eq!(running.state, TaskState::Running);
    master.send(FakeMasterEvent::Ack {
        slave: slave_address.clone(),
        framework_id: framework_id.clone(),
        task_id: running.task_id.clone(),
        uuid: running.uuid,
    });
    let (_, finished) = next_status_update(&mut rx).await;
    assert_eq!(finished.state, TaskState::Finished);

    // Unacknowledged updates are resent with the same uuid.
    let (_, resent) = next_status_update(&mut rx).await;
    assert_eq!(resent.uuid, finished.uuid);
    assert_eq!(resent.state, TaskState::Finished);

    // Acknowledging stops the retries and drains the buffer.
    master.send(FakeMasterEvent::Ack {
        slave: slave_address.clone(),
        framework_id: framework_id.clone(),
        task_id: finished.task_id.clone(),
        uuid: finished.uuid,
    });
    no_status_updates_for(&mut rx, Duration::from_secs(30)).await;
    let snapshot = inspect_slave(&slave).await;
    let framework = snapshot.framework(&framework_id).expect("framework gone");
    assert_eq!(framework.pending_updates, 0);
}

#[tokio::test(start_paused = true)]
async fn test_kill_task_for_unknown_framework_reports_lost_with_retry() {
    let system = ActorSystem::new();
    let (events, mut rx) = mpsc::unbounded_channel();
    let master = system.spawn::<FakeMaster>("master", FakeMasterOptions { events });
    system.expose::<FakeMaster, MasterMessage, _>(&master, |message, from| {
        FakeMasterEvent::Message { from, message }
    });

    let detector = Arc::new(StaticDetector::new(master.address().clone()));
    let isolation = Arc::new(LocalIsolation::new(system.clone()));
    let slave = start_slave(
        &system,
        "slave-0",
        SlaveOptions::new(detector, isolation)
            .with_resources(Resources::cpus_mem(1.0, 512.0))
            .with_work_dir(std::env::temp_dir()),
    );
    let slave_address = slave.address().clone();
    loop {
        match timeout(EVENT_TIMEOUT, rx.recv()).await.unwrap().unwrap() {
            MasterMessage::RegisterSlave { .. } => break,
            _ => continue,
        }
    }

    // A kill for a framework this slave has never run (or has already
    // torn down) still answers with a retried LOST update.
    let framework_id = FrameworkId::new("fw-ghost");
    system.post(
        master.address(),
        &slave_address,
        &SlaveMessage::KillTask {
            framework_id: framework_id.clone(),
            task_id: TaskId::new("t-ghost"),
        },
    );

    let (reported, lost) = next_status_update(&mut rx).await;
    assert_eq!(reported, framework_id);
    assert_eq!(lost.state, TaskState::Lost);
    assert_eq!(lost.task_id, TaskId::new("t-ghost"));

    // Unacknowledged, so it is resent with the same uuid.
    let (_, resent) = next_status_update(&mut rx).await;
    assert_eq!(resent.uuid, lost.uuid);
    assert_eq!(resent.state, TaskState::Lost);

    // The acknowledgement drains the orphan buffer and ends the retries.
    master.send(FakeMasterEvent::Ack {
        slave: slave_address.clone(),
        framework_id: framework_id.clone(),
        task_id: lost.task_id.clone(),
        uuid: lost.uuid,
    });
    no_status_updates_for(&mut rx, Duration::from_secs(30)).await;
    let snapshot = inspect_slave(&slave).await;
    assert_eq!(snapshot.orphaned_updates, 0);
    assert!(snapshot.framework(&framework_id).is_none());
}

#[tokio::test]
async fn test_http_surface_over_the_shared_port() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let system = ActorSystem::new();
    let bound = system.listen("127.0.0.1", 0).await.unwrap();
    start_master(&system, MasterOptions::new());

    let mut stream = tokio::net::TcpStream::connect(bound).await.unwrap();
    stream
        .write_all(b"GET /master/stats.json HTTP/1.1\r\nHost: keel\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("total_frameworks"), "{response}");

    let mut stream = tokio::net::TcpStream::connect(bound).await.unwrap();
    stream
        .write_all(b"GET /master/nope HTTP/1.1\r\nHost: keel\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
}

#[tokio::test]
async fn test_happy_path_over_tcp() {
    let master_system = ActorSystem::new();
    master_system.listen("127.0.0.1", 0).await.unwrap();
    let master_handle = start_master(&master_system, MasterOptions::new());
    let master_address = master_handle.address().clone();

    let slave_system = ActorSystem::new();
    slave_system.listen("127.0.0.1", 0).await.unwrap();
    let isolation = Arc::new(LocalIsolation::new(slave_system.clone()));
    isolation.register_executor(ExecutorId::new("default"), || {
        Box::new(TestExecutor::running())
    });
    let detector = Arc::new(StaticDetector::new(master_address.clone()));
    start_slave(
        &slave_system,
        "slave",
        SlaveOptions::new(detector.clone(), isolation)
            .with_resources(Resources::cpus_mem(2.0, 1024.0))
            .with_work_dir(std::env::temp_dir()),
    );

    let (scheduler, mut probe) = SchedulerProbe::new();
    let mut driver = SchedulerDriver::with_detector(
        Box::new(scheduler),
        framework_info("distributed"),
        detector,
    );
    driver.start().await.unwrap();
    let client = driver.client().unwrap();

    probe.registered().await;
    let offers = probe.offers().await;
    assert_eq!(offers[0].resources, Resources::cpus_mem(2.0, 1024.0));
    let slave_id = offers[0].slave_id.clone();
    client.reply_to_offer(
        offers[0].offer_id.clone(),
        vec![task("t1", &slave_id, 1.0, 512.0)],
        Filters {
            refuse_seconds: 0.0,
        },
    );
    let status = probe.status_of(&TaskId::new("t1")).await;
    assert_eq!(status.state, TaskState::Running);

    // A graceful stop unregisters the framework from the master.
    driver.stop();
    driver.join().await;
    master_eventually(&master_handle, |snapshot| snapshot.frameworks.is_empty()).await;
}
