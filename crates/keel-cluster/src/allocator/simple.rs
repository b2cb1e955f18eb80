use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::allocator::{AllocatableSlave, Allocation, Allocator};
use crate::id::{FrameworkId, SlaveId};
use crate::protocol::{Filters, ResourceRequest};
use crate::resources::Resources;

/// Resource amounts below which a slave is not worth offering.
const MIN_OFFERABLE_CPUS: f64 = 0.1;
const MIN_OFFERABLE_MEM: f64 = 32.0;

/// The reference allocation policy: plain round-robin. Each allocatable
/// slave's full available bundle is offered to the next registered
/// framework that has not filtered that slave.
pub struct SimpleAllocator {
    /// Frameworks in registration order; the rotation cursor advances past
    /// each framework that receives an offer.
    frameworks: Vec<FrameworkId>,
    cursor: usize,
    /// Declined (framework, slave) pairs and when the refusal expires.
    filters: HashMap<(FrameworkId, SlaveId), Instant>,
}

impl Default for SimpleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleAllocator {
    pub fn new() -> Self {
        Self {
            frameworks: Vec::new(),
            cursor: 0,
            filters: HashMap::new(),
        }
    }

    fn filtered(&self, framework_id: &FrameworkId, slave_id: &SlaveId, now: Instant) -> bool {
        self.filters
            .get(&(framework_id.clone(), slave_id.clone()))
            .is_some_and(|expiry| *expiry > now)
    }

    fn offerable(resources: &Resources) -> bool {
        resources.cpus() >= MIN_OFFERABLE_CPUS || resources.mem() >= MIN_OFFERABLE_MEM
    }
}

impl Allocator for SimpleAllocator {
    fn framework_added(&mut self, framework_id: &FrameworkId) {
        if !self.frameworks.contains(framework_id) {
            self.frameworks.push(framework_id.clone());
        }
    }

    fn framework_removed(&mut self, framework_id: &FrameworkId) {
        self.frameworks.retain(|id| id != framework_id);
        self.filters.retain(|(id, _), _| id != framework_id);
        if self.cursor >= self.frameworks.len() {
            self.cursor = 0;
        }
    }

    fn slave_added(&mut self, _slave_id: &SlaveId) {}

    fn slave_removed(&mut self, slave_id: &SlaveId) {
        self.filters.retain(|(_, id), _| id != slave_id);
    }

    fn resources_requested(&mut self, framework_id: &FrameworkId, requests: &[ResourceRequest]) {
        // Round-robin has no notion of standing requests; fairness-aware
        // policies would weigh them here.
        debug!(
            "ignoring {} resource request(s) from framework {framework_id}",
            requests.len()
        );
    }

    fn resources_unused(
        &mut self,
        framework_id: &FrameworkId,
        slave_id: &SlaveId,
        _resources: &Resources,
        filters: &Filters,
    ) {
        if filters.refuse_seconds > 0.0 {
            let expiry = Instant::now() + Duration::from_secs_f64(filters.refuse_seconds);
            self.filters
                .insert((framework_id.clone(), slave_id.clone()), expiry);
        }
    }

    fn resources_recovered(
        &mut self,
        _framework_id: &FrameworkId,
        _slave_id: &SlaveId,
        _resources: &Resources,
    ) {
    }

    fn offers_revived(&mut self, framework_id: &FrameworkId) {
        self.filters.retain(|(id, _), _| id != framework_id);
    }

    fn timer_tick(&mut self, now: Instant) {
        self.filters.retain(|_, expiry| *expiry > now);
    }

    fn allocate(&mut self, slaves: &[AllocatableSlave], now: Instant) -> Vec<Allocation> {
        if self.frameworks.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for slave in slaves {
            if !Self::offerable(&slave.available) {
                continue;
            }
            for step in 0..self.frameworks.len() {
                let index = (self.cursor + step) % self.frameworks.len();
                let framework_id = &self.frameworks[index];
                if self.filtered(framework_id, &slave.slave_id, now) {
                    continue;
                }
                out.push(Allocation {
                    framework_id: framework_id.clone(),
                    slave_id: slave.slave_id.clone(),
                    resources: slave.available.clone(),
                });
                self.cursor = (index + 1) % self.frameworks.len();
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slave(id: &str, cpus: f64, mem: f64) -> AllocatableSlave {
        AllocatableSlave {
            slave_id: SlaveId::new(id),
            available: Resources::cpus_mem(cpus, mem),
        }
    }

    #[tokio::test]
    async fn test_round_robin_rotates_across_frameworks() {
        let mut allocator = SimpleAllocator::new();
        allocator.framework_added(&FrameworkId::new("f1"));
        allocator.framework_added(&FrameworkId::new("f2"));
        let slaves = [slave("s1", 2.0, 1024.0), slave("s2", 2.0, 1024.0)];
        let now = Instant::now();
        let allocations = allocator.allocate(&slaves, now);
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].framework_id, FrameworkId::new("f1"));
        assert_eq!(allocations[1].framework_id, FrameworkId::new("f2"));
        assert_eq!(allocations[0].resources, Resources::cpus_mem(2.0, 1024.0));
    }

    #[tokio::test]
    async fn test_negligible_resources_are_not_offered() {
        let mut allocator = SimpleAllocator::new();
        allocator.framework_added(&FrameworkId::new("f1"));
        let slaves = [slave("s1", 0.05, 16.0)];
        assert!(allocator.allocate(&slaves, Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_suppresses_offers_until_expiry() {
        let mut allocator = SimpleAllocator::new();
        let framework = FrameworkId::new("f1");
        let slave_id = SlaveId::new("s1");
        allocator.framework_added(&framework);
        allocator.resources_unused(
            &framework,
            &slave_id,
            &Resources::cpus_mem(2.0, 1024.0),
            &Filters { refuse_seconds: 5.0 },
        );
        let slaves = [slave("s1", 2.0, 1024.0)];
        assert!(allocator.allocate(&slaves, Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        let now = Instant::now();
        allocator.timer_tick(now);
        assert_eq!(allocator.allocate(&slaves, now).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revive_clears_filters_immediately() {
        let mut allocator = SimpleAllocator::new();
        let framework = FrameworkId::new("f1");
        allocator.framework_added(&framework);
        allocator.resources_unused(
            &framework,
            &SlaveId::new("s1"),
            &Resources::cpus_mem(1.0, 512.0),
            &Filters {
                refuse_seconds: 300.0,
            },
        );
        let slaves = [slave("s1", 1.0, 512.0)];
        assert!(allocator.allocate(&slaves, Instant::now()).is_empty());
        allocator.offers_revived(&framework);
        assert_eq!(allocator.allocate(&slaves, Instant::now()).len(), 1);
    }
}
