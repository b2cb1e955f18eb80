use std::collections::{HashMap, HashSet};

use keel_server::address::Address;
use log::warn;
use tokio::time::Instant;

use crate::id::{ExecutorId, FrameworkId, IdGenerator, OfferId, SlaveId, TaskId};
use crate::protocol::{FrameworkInfo, SlaveInfo, Task};
use crate::resources::Resources;

/// The master's registries: frameworks, slaves, and outstanding offers,
/// tied together by the accounting identity
/// `available = total − tasks − executors − offers` per slave.
pub struct MasterState {
    frameworks: HashMap<FrameworkId, FrameworkEntry>,
    slaves: HashMap<SlaveId, SlaveEntry>,
    offers: HashMap<OfferId, OfferEntry>,
    framework_ids: IdGenerator,
    slave_ids: IdGenerator,
    offer_ids: IdGenerator,
}

pub struct FrameworkEntry {
    pub framework_id: FrameworkId,
    pub info: FrameworkInfo,
    pub scheduler: Address,
    pub tasks: HashMap<TaskId, Task>,
    pub offers: HashSet<OfferId>,
    /// Cleared while the scheduler is disconnected during its failover
    /// window; an inactive framework receives no offers.
    pub active: bool,
    /// Bumped on every (re)registration so that stale failover timers can
    /// recognize themselves.
    pub epoch: u64,
}

pub struct SlaveEntry {
    pub slave_id: SlaveId,
    pub info: SlaveInfo,
    pub address: Address,
    pub total: Resources,
    pub available: Resources,
    pub tasks: HashMap<(FrameworkId, TaskId), Task>,
    pub executors: HashMap<(FrameworkId, ExecutorId), Resources>,
    pub last_heartbeat: Instant,
}

pub struct OfferEntry {
    pub offer_id: OfferId,
    pub framework_id: FrameworkId,
    pub slave_id: SlaveId,
    pub resources: Resources,
    pub created_at: Instant,
}

impl MasterState {
    pub fn new(id_prefix: &str) -> Self {
        Self {
            frameworks: HashMap::new(),
            slaves: HashMap::new(),
            offers: HashMap::new(),
            framework_ids: IdGenerator::new(format!("{id_prefix}-fw")),
            slave_ids: IdGenerator::new(format!("{id_prefix}-s")),
            offer_ids: IdGenerator::new(format!("{id_prefix}-o")),
        }
    }

    pub fn next_framework_id(&mut self) -> FrameworkId {
        self.framework_ids.next()
    }

    pub fn next_slave_id(&mut self) -> SlaveId {
        self.slave_ids.next()
    }

    pub fn add_framework(&mut self, entry: FrameworkEntry) {
        self.frameworks.insert(entry.framework_id.clone(), entry);
    }

    pub fn get_framework(&self, framework_id: &FrameworkId) -> Option<&FrameworkEntry> {
        self.frameworks.get(framework_id)
    }

    pub fn get_framework_mut(&mut self, framework_id: &FrameworkId) -> Option<&mut FrameworkEntry> {
        self.frameworks.get_mut(framework_id)
    }

    pub fn remove_framework_entry(&mut self, framework_id: &FrameworkId) -> Option<FrameworkEntry> {
        self.frameworks.remove(framework_id)
    }

    pub fn list_frameworks(&self) -> impl Iterator<Item = &FrameworkEntry> {
        self.frameworks.values()
    }

    pub fn find_framework_by_scheduler(&self, scheduler: &Address) -> Option<FrameworkId> {
        self.frameworks
            .values()
            .find(|f| &f.scheduler == scheduler)
            .map(|f| f.framework_id.clone())
    }

    pub fn add_slave(&mut self, entry: SlaveEntry) {
        self.slaves.insert(entry.slave_id.clone(), entry);
    }

    pub fn get_slave(&self, slave_id: &SlaveId) -> Option<&SlaveEntry> {
        self.slaves.get(slave_id)
    }

    pub fn get_slave_mut(&mut self, slave_id: &SlaveId) -> Option<&mut SlaveEntry> {
        self.slaves.get_mut(slave_id)
    }

    pub fn remove_slave_entry(&mut self, slave_id: &SlaveId) -> Option<SlaveEntry> {
        self.slaves.remove(slave_id)
    }

    pub fn list_slaves(&self) -> impl Iterator<Item = &SlaveEntry> {
        self.slaves.values()
    }

    pub fn find_slave_by_address(&self, address: &Address) -> Option<SlaveId> {
        self.slaves
            .values()
            .find(|s| &s.address == address)
            .map(|s| s.slave_id.clone())
    }

    pub fn get_offer(&self, offer_id: &OfferId) -> Option<&OfferEntry> {
        self.offers.get(offer_id)
    }

    pub fn list_offers(&self) -> impl Iterator<Item = &OfferEntry> {
        self.offers.values()
    }

    pub fn offers_on_slave(&self, slave_id: &SlaveId) -> Vec<OfferId> {
        self.offers
            .values()
            .filter(|o| &o.slave_id == slave_id)
            .map(|o| o.offer_id.clone())
            .collect()
    }

    /// Create an offer: mint an id, reserve the resources on the slave,
    /// and register the offer with the framework.
    pub fn create_offer(
        &mut self,
        framework_id: &FrameworkId,
        slave_id: &SlaveId,
        resources: Resources,
    ) -> Option<OfferId> {
        let slave = match self.slaves.get_mut(slave_id) {
            Some(slave) => slave,
            None => {
                warn!("cannot offer resources on unknown slave {slave_id}");
                return None;
            }
        };
        let available = match slave.available.checked_sub(&resources) {
            Ok(available) => available,
            Err(e) => {
                warn!("cannot offer more than slave {slave_id} has available: {e}");
                return None;
            }
        };
        let framework = match self.frameworks.get_mut(framework_id) {
            Some(framework) => framework,
            None => {
                warn!("cannot offer resources to unknown framework {framework_id}");
                return None;
            }
        };
        slave.available = available;
        let offer_id: OfferId = self.offer_ids.next();
        framework.offers.insert(offer_id.clone());
        self.offers.insert(
            offer_id.clone(),
            OfferEntry {
                offer_id: offer_id.clone(),
                framework_id: framework_id.clone(),
                slave_id: slave_id.clone(),
                resources,
                created_at: Instant::now(),
            },
        );
        Some(offer_id)
    }

    /// Terminate an offer. With `return_resources` the reserved bundle
    /// goes back to the slave's available pool; without it the caller
    /// settles the accounting itself (offer replies) or the slave is gone.
    pub fn remove_offer(&mut self, offer_id: &OfferId, return_resources: bool) -> Option<OfferEntry> {
        let offer = self.offers.remove(offer_id)?;
        if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
            framework.offers.remove(offer_id);
        }
        if return_resources {
            if let Some(slave) = self.slaves.get_mut(&offer.slave_id) {
                match slave.available.add(&offer.resources) {
                    Ok(available) => slave.available = available,
                    Err(e) => warn!("failed to return offer resources: {e}"),
                }
            }
        }
        Some(offer)
    }

    /// Record a launched task with both its framework and its slave. The
    /// task's resources must already be reserved (they came out of an
    /// offer), so the slave's available pool is left untouched.
    pub fn add_task(&mut self, task: Task) {
        let framework_id = task.framework_id.clone();
        let task_id = task.task_id.clone();
        if let Some(framework) = self.frameworks.get_mut(&framework_id) {
            framework.tasks.insert(task_id.clone(), task.clone());
        } else {
            warn!("cannot record task {task_id} for unknown framework {framework_id}");
            return;
        }
        if let Some(slave) = self.slaves.get_mut(&task.slave_id) {
            slave.tasks.insert((framework_id, task_id), task);
        }
    }

    /// Drop a task from both registries and release its resources back to
    /// the slave. Returns the removed record.
    pub fn remove_task(&mut self, framework_id: &FrameworkId, task_id: &TaskId) -> Option<Task> {
        let task = self
            .frameworks
            .get_mut(framework_id)
            .and_then(|f| f.tasks.remove(task_id))?;
        if let Some(slave) = self.slaves.get_mut(&task.slave_id) {
            slave
                .tasks
                .remove(&(framework_id.clone(), task_id.clone()));
            match slave.available.add(&task.resources) {
                Ok(available) => slave.available = available,
                Err(e) => warn!("failed to release resources of task {task_id}: {e}"),
            }
        }
        Some(task)
    }

    /// Record a task state transition in both registries. Terminal tasks
    /// are removed via [Self::remove_task] instead.
    pub fn update_task_state(
        &mut self,
        framework_id: &FrameworkId,
        task_id: &TaskId,
        state: crate::protocol::TaskState,
    ) {
        if let Some(task) = self
            .frameworks
            .get_mut(framework_id)
            .and_then(|f| f.tasks.get_mut(task_id))
        {
            task.state = state;
            let slave_id = task.slave_id.clone();
            if let Some(task) = self
                .slaves
                .get_mut(&slave_id)
                .and_then(|s| s.tasks.get_mut(&(framework_id.clone(), task_id.clone())))
            {
                task.state = state;
            }
        } else {
            warn!("cannot update unknown task {task_id} of framework {framework_id}");
        }
    }

    /// Drop every executor a framework has on any slave, releasing their
    /// resources. Returns the slaves that hosted one.
    pub fn remove_framework_executors(&mut self, framework_id: &FrameworkId) -> Vec<SlaveId> {
        let mut hosts = Vec::new();
        for slave in self.slaves.values_mut() {
            let keys: Vec<_> = slave
                .executors
                .keys()
                .filter(|(id, _)| id == framework_id)
                .cloned()
                .collect();
            if keys.is_empty() {
                continue;
            }
            hosts.push(slave.slave_id.clone());
            for key in keys {
                if let Some(resources) = slave.executors.remove(&key) {
                    match slave.available.add(&resources) {
                        Ok(available) => slave.available = available,
                        Err(e) => warn!("failed to release executor resources: {e}"),
                    }
                }
            }
        }
        hosts
    }

    /// Track the executor the task runs under, reserving the executor's
    /// own resources the first time it appears on the slave.
    pub fn add_executor(
        &mut self,
        framework_id: &FrameworkId,
        slave_id: &SlaveId,
        executor_id: &ExecutorId,
        resources: &Resources,
    ) {
        let Some(slave) = self.slaves.get_mut(slave_id) else {
            return;
        };
        let key = (framework_id.clone(), executor_id.clone());
        if slave.executors.contains_key(&key) {
            return;
        }
        match slave.available.checked_sub(resources) {
            Ok(available) => {
                slave.available = available;
                slave.executors.insert(key, resources.clone());
            }
            Err(e) => {
                warn!("cannot reserve executor resources on slave {slave_id}: {e}");
                slave.executors.insert(key, Resources::new());
            }
        }
    }

    /// Drop an executor and release its resources. Returns whether the
    /// executor was known.
    pub fn remove_executor(
        &mut self,
        framework_id: &FrameworkId,
        slave_id: &SlaveId,
        executor_id: &ExecutorId,
    ) -> bool {
        let Some(slave) = self.slaves.get_mut(slave_id) else {
            return false;
        };
        let key = (framework_id.clone(), executor_id.clone());
        match slave.executors.remove(&key) {
            Some(resources) => {
                match slave.available.add(&resources) {
                    Ok(available) => slave.available = available,
                    Err(e) => warn!("failed to release executor resources: {e}"),
                }
                true
            }
            None => false,
        }
    }

    /// Verify the registry invariants. Returns a description of the first
    /// violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        for slave in self.slaves.values() {
            let mut sum = slave.available.clone();
            for offer in self.offers.values() {
                if offer.slave_id == slave.slave_id {
                    sum = sum
                        .add(&offer.resources)
                        .map_err(|e| format!("slave {}: {e}", slave.slave_id))?;
                }
            }
            for task in slave.tasks.values() {
                sum = sum
                    .add(&task.resources)
                    .map_err(|e| format!("slave {}: {e}", slave.slave_id))?;
            }
            for resources in slave.executors.values() {
                sum = sum
                    .add(resources)
                    .map_err(|e| format!("slave {}: {e}", slave.slave_id))?;
            }
            if !sum.fits_in(&slave.total) || !slave.total.fits_in(&sum) {
                return Err(format!(
                    "slave {}: available + offers + tasks + executors ({sum}) != total ({})",
                    slave.slave_id, slave.total
                ));
            }
        }
        for offer in self.offers.values() {
            let held = self
                .frameworks
                .get(&offer.framework_id)
                .is_some_and(|f| f.offers.contains(&offer.offer_id));
            if !held {
                return Err(format!(
                    "offer {} is not held by framework {}",
                    offer.offer_id, offer.framework_id
                ));
            }
            if !self.slaves.contains_key(&offer.slave_id) {
                return Err(format!(
                    "offer {} targets unknown slave {}",
                    offer.offer_id, offer.slave_id
                ));
            }
        }
        for framework in self.frameworks.values() {
            for task in framework.tasks.values() {
                if task.state.is_terminal() {
                    return Err(format!(
                        "terminal task {} is still registered",
                        task.task_id
                    ));
                }
                let mirrored = self.slaves.get(&task.slave_id).is_some_and(|s| {
                    s.tasks
                        .contains_key(&(framework.framework_id.clone(), task.task_id.clone()))
                });
                if !mirrored {
                    return Err(format!(
                        "task {} of framework {} is missing from slave {}",
                        task.task_id, framework.framework_id, task.slave_id
                    ));
                }
            }
        }
        Ok(())
    }
}
