use std::collections::{HashMap, HashSet};

use keel_server::actor::ActorContext;
use keel_server::address::Address;
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::allocator::AllocatableSlave;
use crate::id::{ExecutorId, FrameworkId, OfferId, SlaveId, TaskId};
use crate::master::event::MasterEvent;
use crate::master::state::{FrameworkEntry, SlaveEntry};
use crate::master::MasterActor;
use crate::protocol::{
    Filters, FrameworkInfo, Offer, ResourceRequest, SchedulerMessage, SlaveInfo, SlaveMessage,
    Task, TaskDescription, TaskState, TaskStatus,
};

impl MasterActor {
    pub(super) fn handle_register_framework(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework: FrameworkInfo,
        scheduler: Address,
    ) {
        if framework.name.is_empty() || framework.user.is_empty() {
            warn!("rejecting framework registration from {scheduler}: missing name or user");
            ctx.post(
                &scheduler,
                &SchedulerMessage::Error {
                    code: 1,
                    message: "framework name and user must not be empty".to_string(),
                },
            );
            return;
        }
        let framework_id = self.state.next_framework_id();
        info!(
            "registering framework {framework_id} ({}) with scheduler at {scheduler}",
            framework.name
        );
        self.state.add_framework(FrameworkEntry {
            framework_id: framework_id.clone(),
            info: framework,
            scheduler: scheduler.clone(),
            tasks: HashMap::new(),
            offers: HashSet::new(),
            active: true,
            epoch: 0,
        });
        self.allocator.framework_added(&framework_id);
        ctx.link(&scheduler, |address| MasterEvent::Exited { address });
        ctx.post(&scheduler, &SchedulerMessage::Registered { framework_id });
        self.allocate(ctx);
    }

    pub(super) fn handle_reregister_framework(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        scheduler: Address,
    ) {
        match self.state.get_framework_mut(&framework_id) {
            Some(entry) => {
                info!("framework {framework_id} re-registered from {scheduler}");
                entry.info = framework;
                entry.scheduler = scheduler.clone();
                entry.active = true;
                entry.epoch += 1;
            }
            None => {
                // A framework surviving a master failover brings its own id.
                info!("framework {framework_id} re-registered with no prior entry; restoring it");
                self.state.add_framework(FrameworkEntry {
                    framework_id: framework_id.clone(),
                    info: framework,
                    scheduler: scheduler.clone(),
                    tasks: HashMap::new(),
                    offers: HashSet::new(),
                    active: true,
                    epoch: 0,
                });
                self.allocator.framework_added(&framework_id);
            }
        }
        ctx.link(&scheduler, |address| MasterEvent::Exited { address });
        ctx.post(
            &scheduler,
            &SchedulerMessage::Registered {
                framework_id: framework_id.clone(),
            },
        );
        // Point the slaves running this framework's tasks at the new
        // scheduler address.
        let hosts: HashSet<SlaveId> = self
            .state
            .get_framework(&framework_id)
            .map(|f| f.tasks.values().map(|t| t.slave_id.clone()).collect())
            .unwrap_or_default();
        for slave_id in hosts {
            if let Some(slave) = self.state.get_slave(&slave_id) {
                ctx.post(
                    &slave.address,
                    &SlaveMessage::UpdateFramework {
                        framework_id: framework_id.clone(),
                        scheduler: scheduler.clone(),
                    },
                );
            }
        }
        self.allocate(ctx);
    }

    pub(super) fn handle_unregister_framework(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
    ) {
        info!("unregistering framework {framework_id}");
        self.remove_framework(ctx, &framework_id);
    }

    pub(super) fn handle_reply_to_offer(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
        filters: Filters,
    ) {
        let Some(offer) = self.state.get_offer(&offer_id) else {
            warn!("ignoring reply to unknown or already-consumed offer {offer_id}");
            return;
        };
        if offer.framework_id != framework_id {
            warn!("ignoring reply to offer {offer_id} from the wrong framework {framework_id}");
            return;
        }
        let slave_id = offer.slave_id.clone();
        let offered = offer.resources.clone();
        let Some(slave) = self.state.get_slave(&slave_id) else {
            warn!("dropping reply to offer {offer_id}: slave {slave_id} is gone");
            self.state.remove_offer(&offer_id, false);
            return;
        };
        let slave_address = slave.address.clone();
        let Some(framework) = self.state.get_framework(&framework_id) else {
            warn!("ignoring reply to offer {offer_id} from unknown framework {framework_id}");
            return;
        };
        let scheduler = framework.scheduler.clone();
        let framework_info = framework.info.clone();
        let in_use: HashSet<TaskId> = framework.tasks.keys().cloned().collect();

        let mut remaining = offered.clone();
        let mut accepted: Vec<TaskDescription> = Vec::new();
        let mut rejected: Vec<(TaskDescription, String)> = Vec::new();
        let mut seen: HashSet<TaskId> = HashSet::new();
        for task in tasks {
            let reason = if task.slave_id != slave_id {
                Some(format!(
                    "task targets slave {} but the offer is on slave {slave_id}",
                    task.slave_id
                ))
            } else if in_use.contains(&task.task_id) || !seen.insert(task.task_id.clone()) {
                Some(format!("task id {} is already in use", task.task_id))
            } else if task.resources.is_empty() {
                Some("task uses no resources".to_string())
            } else if !task.resources.fits_in(&remaining) {
                Some(format!(
                    "task requires {} but the offer has {remaining} left",
                    task.resources
                ))
            } else {
                None
            };
            match reason {
                None => match remaining.checked_sub(&task.resources) {
                    Ok(rest) => {
                        remaining = rest;
                        accepted.push(task);
                    }
                    Err(e) => rejected.push((task, e.to_string())),
                },
                Some(reason) => rejected.push((task, reason)),
            }
        }
        if self.settings.atomic_offer_replies && !rejected.is_empty() {
            let reason = "another task in the reply failed validation".to_string();
            for task in accepted.drain(..) {
                rejected.push((task, reason.clone()));
            }
            remaining = offered;
        }

        // The offer is resolved; its resources stay reserved until the
        // accepted tasks and the unused remainder are settled below.
        self.state.remove_offer(&offer_id, false);

        for (task, reason) in rejected {
            warn!(
                "rejecting task {} of framework {framework_id}: {reason}",
                task.task_id
            );
            self.stats.lost_tasks += 1;
            let status = TaskStatus::new(task.task_id, slave_id.clone(), TaskState::Lost)
                .with_message(reason);
            ctx.post(&scheduler, &SchedulerMessage::StatusUpdate { status });
        }

        for task in accepted {
            let executor = task
                .executor
                .clone()
                .unwrap_or_else(|| framework_info.executor.clone());
            self.state.add_executor(
                &framework_id,
                &slave_id,
                &executor.executor_id,
                &executor.resources,
            );
            info!(
                "launching task {} of framework {framework_id} on slave {slave_id}",
                task.task_id
            );
            self.state.add_task(Task {
                task_id: task.task_id.clone(),
                framework_id: framework_id.clone(),
                slave_id: slave_id.clone(),
                executor_id: executor.executor_id.clone(),
                name: task.name.clone(),
                resources: task.resources.clone(),
                state: TaskState::Staging,
            });
            self.stats.launched_tasks += 1;
            ctx.post(
                &slave_address,
                &SlaveMessage::RunTask {
                    framework_id: framework_id.clone(),
                    framework: framework_info.clone(),
                    scheduler: scheduler.clone(),
                    task,
                },
            );
        }

        if let Some(slave) = self.state.get_slave_mut(&slave_id) {
            match slave.available.add(&remaining) {
                Ok(available) => slave.available = available,
                Err(e) => warn!("failed to return unused offer resources: {e}"),
            }
        }
        if !remaining.is_empty() {
            self.allocator
                .resources_recovered(&framework_id, &slave_id, &remaining);
            self.allocator
                .resources_unused(&framework_id, &slave_id, &remaining, &filters);
        }
        self.allocate(ctx);
    }

    pub(super) fn handle_revive_offers(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
    ) {
        debug!("reviving offers for framework {framework_id}");
        self.allocator.offers_revived(&framework_id);
        self.allocate(ctx);
    }

    pub(super) fn handle_request_resources(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        requests: Vec<ResourceRequest>,
    ) {
        self.allocator.resources_requested(&framework_id, &requests);
    }

    pub(super) fn handle_kill_task(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) {
        let target = self
            .state
            .get_framework(&framework_id)
            .and_then(|f| f.tasks.get(&task_id))
            .map(|t| t.slave_id.clone());
        match target {
            Some(slave_id) => {
                if let Some(slave) = self.state.get_slave(&slave_id) {
                    ctx.post(
                        &slave.address,
                        &SlaveMessage::KillTask {
                            framework_id,
                            task_id,
                        },
                    );
                }
            }
            None => {
                warn!("cannot kill unknown task {task_id} of framework {framework_id}");
                if let Some(framework) = self.state.get_framework(&framework_id) {
                    let status =
                        TaskStatus::new(task_id, SlaveId::new(""), TaskState::Lost)
                            .with_message("task is unknown");
                    ctx.post(
                        &framework.scheduler,
                        &SchedulerMessage::StatusUpdate { status },
                    );
                }
            }
        }
    }

    pub(super) fn handle_framework_to_executor(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        slave_id: SlaveId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        let slave_address = self.state.get_slave(&slave_id).map(|s| s.address.clone());
        match slave_address {
            Some(address) if self.state.get_framework(&framework_id).is_some() => {
                self.stats.valid_framework_messages += 1;
                ctx.post(
                    &address,
                    &SlaveMessage::FrameworkToExecutor {
                        framework_id,
                        executor_id,
                        data,
                    },
                );
            }
            _ => {
                warn!(
                    "dropping framework message from {framework_id} for executor \
                     '{executor_id}' on slave {slave_id}"
                );
                self.stats.invalid_framework_messages += 1;
            }
        }
    }

    pub(super) fn handle_register_slave(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: Address,
        slave: SlaveInfo,
    ) {
        let slave_id = self.state.next_slave_id();
        info!(
            "registering slave {slave_id} at {from} with {}",
            slave.resources
        );
        self.state.add_slave(SlaveEntry {
            slave_id: slave_id.clone(),
            total: slave.resources.clone(),
            available: slave.resources.clone(),
            info: slave,
            address: from.clone(),
            tasks: HashMap::new(),
            executors: HashMap::new(),
            last_heartbeat: Instant::now(),
        });
        self.allocator.slave_added(&slave_id);
        ctx.link(&from, |address| MasterEvent::Exited { address });
        ctx.post(
            &from,
            &SlaveMessage::SlaveRegistered {
                slave_id: slave_id.clone(),
            },
        );
        ctx.send_with_delay(
            MasterEvent::ProbeSlaveHeartbeat {
                slave_id,
                instant: Instant::now(),
            },
            self.settings.slave_heartbeat_timeout,
        );
        self.allocate(ctx);
    }

    pub(super) fn handle_reregister_slave(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: Address,
        slave_id: SlaveId,
        slave: SlaveInfo,
        tasks: Vec<Task>,
    ) {
        if self.state.get_slave(&slave_id).is_none() {
            info!("slave {slave_id} re-registered from {from}; restoring its tasks");
            self.state.add_slave(SlaveEntry {
                slave_id: slave_id.clone(),
                total: slave.resources.clone(),
                available: slave.resources.clone(),
                info: slave,
                address: from.clone(),
                tasks: HashMap::new(),
                executors: HashMap::new(),
                last_heartbeat: Instant::now(),
            });
            self.allocator.slave_added(&slave_id);
            for task in tasks {
                if task.state.is_terminal() || task.slave_id != slave_id {
                    continue;
                }
                if self.state.get_framework(&task.framework_id).is_none() {
                    warn!(
                        "dropping restored task {} of unknown framework {}",
                        task.task_id, task.framework_id
                    );
                    continue;
                }
                let reserved = self
                    .state
                    .get_slave_mut(&slave_id)
                    .map(|s| match s.available.checked_sub(&task.resources) {
                        Ok(available) => {
                            s.available = available;
                            true
                        }
                        Err(e) => {
                            warn!("cannot restore task {}: {e}", task.task_id);
                            false
                        }
                    })
                    .unwrap_or(false);
                if reserved {
                    self.state.add_task(task);
                }
            }
        } else if let Some(entry) = self.state.get_slave_mut(&slave_id) {
            info!("slave {slave_id} re-registered from {from}");
            entry.address = from.clone();
            entry.info = slave;
            entry.last_heartbeat = Instant::now();
        }
        ctx.link(&from, |address| MasterEvent::Exited { address });
        ctx.post(
            &from,
            &SlaveMessage::SlaveReregistered {
                slave_id: slave_id.clone(),
            },
        );
        ctx.send_with_delay(
            MasterEvent::ProbeSlaveHeartbeat {
                slave_id,
                instant: Instant::now(),
            },
            self.settings.slave_heartbeat_timeout,
        );
        self.allocate(ctx);
    }

    pub(super) fn handle_status_update(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        status: TaskStatus,
    ) {
        let slave_address = self
            .state
            .get_slave(&status.slave_id)
            .map(|s| s.address.clone());
        let scheduler = self
            .state
            .get_framework(&framework_id)
            .map(|f| f.scheduler.clone());
        let task_known = self
            .state
            .get_framework(&framework_id)
            .is_some_and(|f| f.tasks.contains_key(&status.task_id));

        if task_known {
            info!(
                "status update: task {} of framework {framework_id} is now {}",
                status.task_id, status.state
            );
            self.stats.valid_status_updates += 1;
            if status.state.is_terminal() {
                match status.state {
                    TaskState::Finished => self.stats.finished_tasks += 1,
                    TaskState::Failed => self.stats.failed_tasks += 1,
                    TaskState::Killed => self.stats.killed_tasks += 1,
                    TaskState::Lost => self.stats.lost_tasks += 1,
                    _ => {}
                }
                if let Some(task) = self.state.remove_task(&framework_id, &status.task_id) {
                    self.allocator.resources_recovered(
                        &framework_id,
                        &task.slave_id,
                        &task.resources,
                    );
                }
            } else {
                self.state
                    .update_task_state(&framework_id, &status.task_id, status.state);
            }
            if let Some(scheduler) = &scheduler {
                ctx.post(
                    scheduler,
                    &SchedulerMessage::StatusUpdate {
                        status: status.clone(),
                    },
                );
            }
        } else {
            // Either a protocol violation or a retry that raced the first
            // delivery; count it and do not forward.
            warn!(
                "status update for unknown task {} of framework {framework_id}",
                status.task_id
            );
            self.stats.invalid_status_updates += 1;
        }

        // Acknowledge to the slave either way so its retry loop converges;
        // terminal task state is absorbing on this side.
        if let Some(slave_address) = slave_address {
            ctx.post(
                &slave_address,
                &SlaveMessage::StatusUpdateAck {
                    framework_id,
                    task_id: status.task_id.clone(),
                    uuid: status.uuid,
                },
            );
        }
        if task_known && status.state.is_terminal() {
            self.allocate(ctx);
        }
    }

    pub(super) fn handle_exited_executor(
        &mut self,
        ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    ) {
        info!(
            "executor '{executor_id}' of framework {framework_id} exited on slave {slave_id} \
             with status {status}"
        );
        self.state
            .remove_executor(&framework_id, &slave_id, &executor_id);
        let task_ids: Vec<TaskId> = self
            .state
            .get_framework(&framework_id)
            .map(|f| {
                f.tasks
                    .values()
                    .filter(|t| t.slave_id == slave_id && t.executor_id == executor_id)
                    .map(|t| t.task_id.clone())
                    .collect()
            })
            .unwrap_or_default();
        let scheduler = self
            .state
            .get_framework(&framework_id)
            .map(|f| f.scheduler.clone());
        for task_id in task_ids {
            if let Some(task) = self.state.remove_task(&framework_id, &task_id) {
                self.stats.lost_tasks += 1;
                self.allocator
                    .resources_recovered(&framework_id, &slave_id, &task.resources);
                if let Some(scheduler) = &scheduler {
                    let status =
                        TaskStatus::new(task.task_id, slave_id.clone(), TaskState::Lost)
                            .with_message(format!("executor '{executor_id}' exited"));
                    ctx.post(scheduler, &SchedulerMessage::StatusUpdate { status });
                }
            }
        }
        self.allocate(ctx);
    }

    pub(super) fn handle_ping(
        &mut self,
        ctx: &mut ActorContext<Self>,
        from: Address,
        slave_id: SlaveId,
    ) {
        ctx.post(&from, &SlaveMessage::Pong);
        if self.state.get_slave(&slave_id).is_some() {
            if let Some(slave) = self.state.get_slave_mut(&slave_id) {
                slave.last_heartbeat = Instant::now();
            }
            ctx.send_with_delay(
                MasterEvent::ProbeSlaveHeartbeat {
                    slave_id,
                    instant: Instant::now(),
                },
                self.settings.slave_heartbeat_timeout,
            );
        }
    }

    pub(super) fn handle_exited(&mut self, ctx: &mut ActorContext<Self>, address: Address) {
        if let Some(slave_id) = self.state.find_slave_by_address(&address) {
            warn!("slave {slave_id} at {address} disconnected");
            self.slave_lost(ctx, slave_id);
        } else if let Some(framework_id) = self.state.find_framework_by_scheduler(&address) {
            warn!(
                "scheduler for framework {framework_id} at {address} disconnected; \
                 starting failover timer"
            );
            self.deactivate_framework(ctx, framework_id);
        } else {
            debug!("exited notification for unlinked address {address}");
        }
    }

    pub(super) fn handle_framework_failover_timeout(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        epoch: u64,
    ) {
        let expired = self
            .state
            .get_framework(&framework_id)
            .is_some_and(|f| !f.active && f.epoch == epoch);
        if expired {
            info!("framework {framework_id} failover window expired; removing it");
            self.remove_framework(ctx, &framework_id);
        }
    }

    pub(super) fn handle_probe_slave_heartbeat(
        &mut self,
        ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
        instant: Instant,
    ) {
        let stale = self
            .state
            .get_slave(&slave_id)
            .is_some_and(|s| s.last_heartbeat <= instant);
        if stale {
            warn!("slave {slave_id} heartbeat timed out");
            self.slave_lost(ctx, slave_id);
        }
    }

    pub(super) fn handle_allocation_tick(&mut self, ctx: &mut ActorContext<Self>) {
        self.allocator.timer_tick(Instant::now());
        self.allocate(ctx);
        ctx.send_with_delay(MasterEvent::AllocationTick, self.settings.allocation_interval);
    }

    /// Consult the allocator and turn its decisions into offer batches.
    pub(super) fn allocate(&mut self, ctx: &mut ActorContext<Self>) {
        let slaves: Vec<AllocatableSlave> = self
            .state
            .list_slaves()
            .map(|s| AllocatableSlave {
                slave_id: s.slave_id.clone(),
                available: s.available.clone(),
            })
            .collect();
        let allocations = self.allocator.allocate(&slaves, Instant::now());
        let mut batches: HashMap<FrameworkId, Vec<Offer>> = HashMap::new();
        for allocation in allocations {
            let active = self
                .state
                .get_framework(&allocation.framework_id)
                .is_some_and(|f| f.active);
            if !active {
                continue;
            }
            let Some(hostname) = self
                .state
                .get_slave(&allocation.slave_id)
                .map(|s| s.info.hostname.clone())
            else {
                continue;
            };
            let Some(offer_id) = self.state.create_offer(
                &allocation.framework_id,
                &allocation.slave_id,
                allocation.resources.clone(),
            ) else {
                continue;
            };
            batches
                .entry(allocation.framework_id.clone())
                .or_default()
                .push(Offer {
                    offer_id,
                    slave_id: allocation.slave_id,
                    hostname,
                    resources: allocation.resources,
                });
        }
        for (framework_id, offers) in batches {
            if let Some(framework) = self.state.get_framework(&framework_id) {
                debug!(
                    "sending {} offer(s) to framework {framework_id}",
                    offers.len()
                );
                ctx.post(
                    &framework.scheduler,
                    &SchedulerMessage::ResourceOffers { offers },
                );
            }
        }
    }

    /// Deactivate a framework whose scheduler disconnected: rescind its
    /// offers and arm the failover timer.
    fn deactivate_framework(&mut self, ctx: &mut ActorContext<Self>, framework_id: FrameworkId) {
        let Some(framework) = self.state.get_framework_mut(&framework_id) else {
            return;
        };
        framework.active = false;
        let epoch = framework.epoch;
        let offer_ids: Vec<OfferId> = framework.offers.iter().cloned().collect();
        for offer_id in offer_ids {
            if let Some(offer) = self.state.remove_offer(&offer_id, true) {
                self.allocator.resources_recovered(
                    &framework_id,
                    &offer.slave_id,
                    &offer.resources,
                );
            }
        }
        ctx.send_with_delay(
            MasterEvent::FrameworkFailoverTimeout {
                framework_id,
                epoch,
            },
            self.settings.framework_failover_timeout,
        );
    }

    /// Remove a framework entirely: rescind offers, drop its tasks, tell
    /// every involved slave to tear down its executors.
    fn remove_framework(&mut self, ctx: &mut ActorContext<Self>, framework_id: &FrameworkId) {
        let Some(framework) = self.state.get_framework(framework_id) else {
            warn!("cannot remove unknown framework {framework_id}");
            return;
        };
        let offer_ids: Vec<OfferId> = framework.offers.iter().cloned().collect();
        let task_ids: Vec<TaskId> = framework.tasks.keys().cloned().collect();
        let mut hosts: HashSet<SlaveId> =
            framework.tasks.values().map(|t| t.slave_id.clone()).collect();

        for offer_id in offer_ids {
            if let Some(offer) = self.state.remove_offer(&offer_id, true) {
                self.allocator.resources_recovered(
                    framework_id,
                    &offer.slave_id,
                    &offer.resources,
                );
            }
        }
        for task_id in task_ids {
            if let Some(task) = self.state.remove_task(framework_id, &task_id) {
                self.stats.killed_tasks += 1;
                self.allocator
                    .resources_recovered(framework_id, &task.slave_id, &task.resources);
            }
        }
        hosts.extend(self.state.remove_framework_executors(framework_id));
        for slave_id in hosts {
            if let Some(slave) = self.state.get_slave(&slave_id) {
                ctx.post(
                    &slave.address,
                    &SlaveMessage::KillFramework {
                        framework_id: framework_id.clone(),
                    },
                );
            }
        }
        self.state.remove_framework_entry(framework_id);
        self.allocator.framework_removed(framework_id);
        self.allocate(ctx);
    }

    /// A slave is gone: terminate its offers, mark its tasks lost, and
    /// tell the affected frameworks.
    fn slave_lost(&mut self, ctx: &mut ActorContext<Self>, slave_id: SlaveId) {
        let mut affected: HashSet<FrameworkId> = HashSet::new();
        for offer_id in self.state.offers_on_slave(&slave_id) {
            if let Some(offer) = self.state.remove_offer(&offer_id, false) {
                affected.insert(offer.framework_id.clone());
                if let Some(framework) = self.state.get_framework(&offer.framework_id) {
                    ctx.post(
                        &framework.scheduler,
                        &SchedulerMessage::RescindOffer {
                            offer_id: offer.offer_id,
                        },
                    );
                }
            }
        }
        let Some(slave) = self.state.remove_slave_entry(&slave_id) else {
            return;
        };
        info!("removed slave {slave_id} at {}", slave.address);
        for ((framework_id, task_id), _task) in slave.tasks {
            affected.insert(framework_id.clone());
            self.stats.lost_tasks += 1;
            if let Some(framework) = self.state.get_framework_mut(&framework_id) {
                framework.tasks.remove(&task_id);
                let scheduler = framework.scheduler.clone();
                let status = TaskStatus::new(task_id, slave_id.clone(), TaskState::Lost)
                    .with_message("slave lost");
                ctx.post(&scheduler, &SchedulerMessage::StatusUpdate { status });
            }
        }
        for framework_id in affected {
            if let Some(framework) = self.state.get_framework(&framework_id) {
                ctx.post(
                    &framework.scheduler,
                    &SchedulerMessage::SlaveLost {
                        slave_id: slave_id.clone(),
                    },
                );
            }
        }
        self.allocator.slave_removed(&slave_id);
    }
}
