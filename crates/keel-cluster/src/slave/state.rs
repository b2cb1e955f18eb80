use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use keel_server::address::Address;
use log::info;
use tokio::time::Instant;
use uuid::Uuid;

use crate::id::{ExecutorId, FrameworkId, SlaveId, TaskId};
use crate::protocol::{ExecutorInfo, FrameworkInfo, Task, TaskDescription, TaskStatus};
use crate::resources::Resources;

/// The slave's view of one framework: its executors and the status
/// updates not yet acknowledged by the master.
pub struct FrameworkRecord {
    pub framework_id: FrameworkId,
    pub info: FrameworkInfo,
    pub scheduler: Address,
    pub executors: HashMap<ExecutorId, ExecutorRecord>,
    /// Unacknowledged status updates keyed by their resend deadline.
    /// A task may have several distinct updates in flight at once, so the
    /// buckets hold every unacknowledged update, not one per task.
    pub pending_updates: BTreeMap<Instant, Vec<TaskStatus>>,
}

impl FrameworkRecord {
    pub fn pending_update_count(&self) -> usize {
        self.pending_updates.values().map(|b| b.len()).sum()
    }

    /// The executor that owns the task, running or still queued.
    pub fn executor_for_task(&self, task_id: &TaskId) -> Option<&ExecutorId> {
        self.executors
            .iter()
            .find(|(_, e)| {
                e.tasks.contains_key(task_id)
                    || e.queued_tasks.iter().any(|t| &t.task_id == task_id)
            })
            .map(|(id, _)| id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorRegistration {
    /// Launch requested; tasks queue until the executor registers.
    Launching,
    /// Registered and reachable at the given address.
    Registered(Address),
    /// The process exited or never came up.
    Dead,
}

pub struct ExecutorRecord {
    pub info: ExecutorInfo,
    pub directory: PathBuf,
    pub registration: ExecutorRegistration,
    pub queued_tasks: Vec<TaskDescription>,
    pub tasks: HashMap<TaskId, Task>,
    /// Current resource envelope: the executor's own resources plus those
    /// of its running tasks. Handed to the isolation module as the limit.
    pub resources: Resources,
}

impl ExecutorRecord {
    pub fn address(&self) -> Option<&Address> {
        match &self.registration {
            ExecutorRegistration::Registered(address) => Some(address),
            _ => None,
        }
    }
}

pub struct SlaveState {
    pub slave_id: Option<SlaveId>,
    pub master: Option<Address>,
    frameworks: HashMap<FrameworkId, FrameworkRecord>,
    /// Unacknowledged updates synthesized for frameworks with no record
    /// here, e.g. a `LOST` answering a kill for an already-removed
    /// framework. Retried on the same schedule as framework-held updates.
    orphaned_updates: BTreeMap<Instant, Vec<(FrameworkId, TaskStatus)>>,
}

impl SlaveState {
    pub fn new() -> Self {
        Self {
            slave_id: None,
            master: None,
            frameworks: HashMap::new(),
            orphaned_updates: BTreeMap::new(),
        }
    }

    pub fn add_framework(&mut self, record: FrameworkRecord) {
        self.frameworks.insert(record.framework_id.clone(), record);
    }

    pub fn get_framework(&self, framework_id: &FrameworkId) -> Option<&FrameworkRecord> {
        self.frameworks.get(framework_id)
    }

    pub fn get_framework_mut(
        &mut self,
        framework_id: &FrameworkId,
    ) -> Option<&mut FrameworkRecord> {
        self.frameworks.get_mut(framework_id)
    }

    pub fn remove_framework(&mut self, framework_id: &FrameworkId) -> Option<FrameworkRecord> {
        self.frameworks.remove(framework_id)
    }

    pub fn list_frameworks(&self) -> impl Iterator<Item = &FrameworkRecord> {
        self.frameworks.values()
    }

    pub fn list_frameworks_mut(&mut self) -> impl Iterator<Item = &mut FrameworkRecord> {
        self.frameworks.values_mut()
    }

    /// All running tasks, as reported on re-registration.
    pub fn running_tasks(&self) -> Vec<Task> {
        self.frameworks
            .values()
            .flat_map(|f| f.executors.values())
            .flat_map(|e| e.tasks.values())
            .cloned()
            .collect()
    }

    /// Buffer a status update until the master acknowledges it. Updates
    /// for frameworks without a record land in the orphan buffer so the
    /// at-least-once guarantee holds for synthesized statuses too.
    pub fn enqueue_update(
        &mut self,
        framework_id: &FrameworkId,
        status: TaskStatus,
        deadline: Instant,
    ) {
        match self.frameworks.get_mut(framework_id) {
            Some(framework) => framework
                .pending_updates
                .entry(deadline)
                .or_default()
                .push(status),
            None => self
                .orphaned_updates
                .entry(deadline)
                .or_default()
                .push((framework_id.clone(), status)),
        }
    }

    pub fn orphaned_update_count(&self) -> usize {
        self.orphaned_updates.values().map(|b| b.len()).sum()
    }

    /// Drop the buffered update matching the acknowledgement. Returns
    /// whether a matching entry existed.
    pub fn ack_update(
        &mut self,
        framework_id: &FrameworkId,
        task_id: &TaskId,
        uuid: &Uuid,
    ) -> bool {
        let mut acked = false;
        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            framework.pending_updates.retain(|_, bucket| {
                let before = bucket.len();
                bucket.retain(|status| !(&status.task_id == task_id && &status.uuid == uuid));
                acked |= bucket.len() != before;
                !bucket.is_empty()
            });
        }
        if !acked {
            self.orphaned_updates.retain(|_, bucket| {
                let before = bucket.len();
                bucket.retain(|(id, status)| {
                    !(id == framework_id && &status.task_id == task_id && &status.uuid == uuid)
                });
                acked |= bucket.len() != before;
                !bucket.is_empty()
            });
        }
        if acked {
            info!("acknowledged status update for task {task_id} of framework {framework_id}");
        }
        acked
    }

    /// Take every update whose deadline has passed, re-keying it to a new
    /// deadline, so the caller can resend.
    pub fn take_expired_updates(
        &mut self,
        now: Instant,
        next_deadline: Instant,
    ) -> Vec<(FrameworkId, TaskStatus)> {
        let mut expired = Vec::new();
        for framework in self.frameworks.values_mut() {
            let deadlines: Vec<Instant> = framework
                .pending_updates
                .range(..=now)
                .map(|(deadline, _)| *deadline)
                .collect();
            for deadline in deadlines {
                if let Some(bucket) = framework.pending_updates.remove(&deadline) {
                    for status in bucket {
                        expired.push((framework.framework_id.clone(), status.clone()));
                        framework
                            .pending_updates
                            .entry(next_deadline)
                            .or_default()
                            .push(status);
                    }
                }
            }
        }
        let deadlines: Vec<Instant> = self
            .orphaned_updates
            .range(..=now)
            .map(|(deadline, _)| *deadline)
            .collect();
        for deadline in deadlines {
            if let Some(bucket) = self.orphaned_updates.remove(&deadline) {
                for (framework_id, status) in bucket {
                    expired.push((framework_id.clone(), status.clone()));
                    self.orphaned_updates
                        .entry(next_deadline)
                        .or_default()
                        .push((framework_id, status));
                }
            }
        }
        expired
    }
}

/// A work directory unique to one executor run. The same framework and
/// executor pair may be launched more than once on a slave, so a run
/// counter disambiguates.
pub fn unique_work_directory(
    work_dir: &Path,
    slave_id: &SlaveId,
    framework_id: &FrameworkId,
    executor_id: &ExecutorId,
) -> PathBuf {
    let base = work_dir
        .join("work")
        .join(format!("slave-{slave_id}"))
        .join(format!("fw-{framework_id}-{executor_id}"));
    let mut run = 0u64;
    loop {
        let candidate = base.join(run.to_string());
        if !candidate.exists() {
            return candidate;
        }
        run += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::protocol::TaskState;

    use super::*;

    fn record(framework_id: &str) -> FrameworkRecord {
        FrameworkRecord {
            framework_id: FrameworkId::new(framework_id),
            info: FrameworkInfo {
                name: "test".to_string(),
                user: "user".to_string(),
                executor: ExecutorInfo {
                    executor_id: ExecutorId::new("default"),
                    uri: "/bin/executor".to_string(),
                    command: String::new(),
                    data: Vec::new(),
                    resources: Resources::new(),
                },
            },
            scheduler: Address::local("sched"),
            executors: HashMap::new(),
            pending_updates: BTreeMap::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_buffer_ack_and_expiry() {
        let mut state = SlaveState::new();
        let framework_id = FrameworkId::new("fw");
        state.add_framework(record("fw"));

        let status = TaskStatus::new(TaskId::new("t1"), SlaveId::new("s1"), TaskState::Finished);
        let deadline = Instant::now() + Duration::from_secs(10);
        state.enqueue_update(&framework_id, status.clone(), deadline);

        // Not expired yet.
        let next = Instant::now() + Duration::from_secs(10);
        assert!(state.take_expired_updates(Instant::now(), next).is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        let now = Instant::now();
        let expired = state.take_expired_updates(now, now + Duration::from_secs(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].1.uuid, status.uuid);

        // The update was re-buffered; an ack with the wrong uuid misses,
        // the right one clears it.
        assert!(!state.ack_update(&framework_id, &status.task_id, &Uuid::new_v4()));
        assert!(state.ack_update(&framework_id, &status.task_id, &status.uuid));
        assert_eq!(
            state
                .get_framework(&framework_id)
                .unwrap()
                .pending_update_count(),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_updates_for_one_task_are_all_retained() {
        let mut state = SlaveState::new();
        let framework_id = FrameworkId::new("fw");
        state.add_framework(record("fw"));

        let running = TaskStatus::new(TaskId::new("t1"), SlaveId::new("s1"), TaskState::Running);
        let finished = TaskStatus::new(TaskId::new("t1"), SlaveId::new("s1"), TaskState::Finished);
        let deadline = Instant::now() + Duration::from_secs(10);
        state.enqueue_update(&framework_id, running.clone(), deadline);
        state.enqueue_update(&framework_id, finished.clone(), deadline);
        assert_eq!(
            state
                .get_framework(&framework_id)
                .unwrap()
                .pending_update_count(),
            2
        );

        assert!(state.ack_update(&framework_id, &running.task_id, &running.uuid));
        let framework = state.get_framework(&framework_id).unwrap();
        assert_eq!(framework.pending_update_count(), 1);
        let remaining: Vec<_> = framework.pending_updates.values().flatten().collect();
        assert_eq!(remaining[0].uuid, finished.uuid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphaned_updates_are_retained_until_acked() {
        let mut state = SlaveState::new();
        let framework_id = FrameworkId::new("gone");
        let status = TaskStatus::new(TaskId::new("t1"), SlaveId::new("s1"), TaskState::Lost);
        let deadline = Instant::now() + Duration::from_secs(10);
        state.enqueue_update(&framework_id, status.clone(), deadline);
        assert_eq!(state.orphaned_update_count(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        let now = Instant::now();
        let expired = state.take_expired_updates(now, now + Duration::from_secs(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, framework_id);
        assert_eq!(expired[0].1.uuid, status.uuid);
        assert_eq!(state.orphaned_update_count(), 1);

        assert!(state.ack_update(&framework_id, &status.task_id, &status.uuid));
        assert_eq!(state.orphaned_update_count(), 0);
    }

    #[test]
    fn test_work_directories_are_unique_per_run() {
        let root = std::env::temp_dir().join(format!("keel-test-{}", std::process::id()));
        let slave_id = SlaveId::new("s1");
        let framework_id = FrameworkId::new("fw");
        let executor_id = ExecutorId::new("exec");
        let first = unique_work_directory(&root, &slave_id, &framework_id, &executor_id);
        std::fs::create_dir_all(&first).unwrap();
        let second = unique_work_directory(&root, &slave_id, &framework_id, &executor_id);
        assert_ne!(first, second);
        std::fs::remove_dir_all(&root).unwrap();
    }
}
