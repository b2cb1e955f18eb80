use std::sync::Arc;

use keel_server::actor::{ActorHandle, ActorSystem};
use keel_server::address::Address;

use crate::detector::{MasterDetector, StaticDetector};
use crate::master::{start_master, MasterActor, MasterEvent, MasterOptions};
use crate::resources::Resources;
use crate::slave::{start_slave, LocalIsolation, SlaveActor, SlaveEvent, SlaveOptions};

/// An in-process cluster: one master and N slaves on a shared actor
/// system, with executors run in-process. Backs the `local` and
/// `local/N` master URL forms and the test suites.
pub struct LocalCluster {
    master: ActorHandle<MasterActor>,
    slaves: Vec<ActorHandle<SlaveActor>>,
    isolation: Arc<LocalIsolation>,
    detector: Arc<StaticDetector>,
}

impl LocalCluster {
    pub fn start(system: &ActorSystem, slaves: usize, resources: Resources) -> Self {
        Self::start_with_options(system, slaves, resources, MasterOptions::new())
    }

    pub fn start_with_options(
        system: &ActorSystem,
        slaves: usize,
        resources: Resources,
        options: MasterOptions,
    ) -> Self {
        let master = start_master(system, options);
        let detector = Arc::new(StaticDetector::new(master.address().clone()));
        let isolation = Arc::new(LocalIsolation::new(system.clone()));
        let slaves = (0..slaves)
            .map(|i| {
                let options = SlaveOptions::new(detector.clone(), isolation.clone())
                    .with_resources(resources.clone())
                    .with_work_dir(std::env::temp_dir());
                start_slave(system, &format!("slave-{i}"), options)
            })
            .collect();
        Self {
            master,
            slaves,
            isolation,
            detector,
        }
    }

    pub fn master(&self) -> &ActorHandle<MasterActor> {
        &self.master
    }

    pub fn master_address(&self) -> Address {
        self.master.address().clone()
    }

    pub fn slaves(&self) -> &[ActorHandle<SlaveActor>] {
        &self.slaves
    }

    /// Register in-process executor implementations here.
    pub fn isolation(&self) -> &Arc<LocalIsolation> {
        &self.isolation
    }

    pub fn detector(&self) -> Arc<dyn MasterDetector> {
        self.detector.clone()
    }

    pub async fn shutdown(&self) {
        for slave in &self.slaves {
            slave.send(SlaveEvent::Shutdown);
        }
        for slave in &self.slaves {
            slave.clone().wait_for_stop().await;
        }
        self.master.send(MasterEvent::Shutdown);
        self.master.clone().wait_for_stop().await;
    }
}
