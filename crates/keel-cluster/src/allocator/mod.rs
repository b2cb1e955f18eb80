mod simple;

use tokio::time::Instant;

pub use simple::SimpleAllocator;

use crate::id::{FrameworkId, SlaveId};
use crate::protocol::{Filters, ResourceRequest};
use crate::resources::Resources;

/// One allocation decision: offer `resources` on `slave_id` to
/// `framework_id`. The master packages decisions into offers.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub framework_id: FrameworkId,
    pub slave_id: SlaveId,
    pub resources: Resources,
}

/// The slice of master state an allocator sees when deciding.
#[derive(Debug, Clone)]
pub struct AllocatableSlave {
    pub slave_id: SlaveId,
    pub available: Resources,
}

/// The pluggable offer policy consulted by the master. The master calls
/// the notification methods as its registries change and `allocate`
/// whenever resources may have become offerable; the allocator never calls
/// back into the master.
pub trait Allocator: Send + 'static {
    fn framework_added(&mut self, framework_id: &FrameworkId);
    fn framework_removed(&mut self, framework_id: &FrameworkId);
    fn slave_added(&mut self, slave_id: &SlaveId);
    fn slave_removed(&mut self, slave_id: &SlaveId);
    fn resources_requested(&mut self, framework_id: &FrameworkId, requests: &[ResourceRequest]);
    /// Resources offered but not consumed by the framework's reply, along
    /// with the filters it attached.
    fn resources_unused(
        &mut self,
        framework_id: &FrameworkId,
        slave_id: &SlaveId,
        resources: &Resources,
        filters: &Filters,
    );
    /// Resources returned by a terminal task, a rescinded offer, or an
    /// unused portion of a reply.
    fn resources_recovered(
        &mut self,
        framework_id: &FrameworkId,
        slave_id: &SlaveId,
        resources: &Resources,
    );
    fn offers_revived(&mut self, framework_id: &FrameworkId);
    fn timer_tick(&mut self, now: Instant);
    fn allocate(&mut self, slaves: &[AllocatableSlave], now: Instant) -> Vec<Allocation>;
}
