use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::detector::MasterDetector;
use crate::resources::Resources;
use crate::slave::isolation::IsolationModule;

/// How long a status update waits for a master acknowledgement before it
/// is resent. The buffers are scanned once a second.
pub const STATUS_UPDATE_RETRY_INTERVAL: Duration = Duration::from_secs(10);
pub const RETRY_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Delay before re-registering after losing the master connection.
pub const MASTER_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct SlaveOptions {
    /// Total consumable resources advertised to the master.
    pub resources: Resources,
    pub hostname: Option<String>,
    /// Root under which executor work directories are created.
    pub work_dir: PathBuf,
    pub detector: Arc<dyn MasterDetector>,
    pub isolation: Arc<dyn IsolationModule>,
    pub status_update_retry_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl SlaveOptions {
    pub fn new(detector: Arc<dyn MasterDetector>, isolation: Arc<dyn IsolationModule>) -> Self {
        Self {
            resources: Resources::cpus_mem(1.0, 1024.0),
            hostname: None,
            work_dir: PathBuf::from("."),
            detector,
            isolation,
            status_update_retry_interval: STATUS_UPDATE_RETRY_INTERVAL,
            heartbeat_interval: Duration::from_secs(10),
        }
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }
}
