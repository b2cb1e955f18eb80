use std::str::FromStr;
use std::sync::Arc;

use keel_server::address::Address;
use tokio::sync::watch;

use crate::error::ClusterError;
use crate::master::MASTER_ACTOR_NAME;

/// Tells slaves and scheduler drivers who the current master is. The
/// coordinated (externally elected) variant lives behind this interface;
/// the core only depends on the trait.
pub trait MasterDetector: Send + Sync + 'static {
    /// Observe the current master address and its changes.
    fn subscribe(&self) -> watch::Receiver<Option<Address>>;
    /// Set the current master. `None` means no master is known.
    fn appoint(&self, master: Option<Address>);
}

/// A detector with a fixed (or test-driven) master address.
pub struct StaticDetector {
    sender: watch::Sender<Option<Address>>,
}

impl StaticDetector {
    pub fn new(master: Address) -> Self {
        Self {
            sender: watch::channel(Some(master)).0,
        }
    }

    /// Starts with no master appointed; tests appoint one explicitly.
    pub fn unappointed() -> Self {
        Self {
            sender: watch::channel(None).0,
        }
    }
}

impl MasterDetector for StaticDetector {
    fn subscribe(&self) -> watch::Receiver<Option<Address>> {
        self.sender.subscribe()
    }

    fn appoint(&self, master: Option<Address>) {
        let _ = self.sender.send(master);
    }
}

/// The supported master URL forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterUrl {
    /// `host:port` — connect to a fixed master.
    Direct { host: String, port: u16 },
    /// `local` or `local/N` — an in-process master with N slaves.
    Local { slaves: usize },
    /// `zoo://host1:port1,host2:port2/path` — coordinated election.
    Zoo { servers: String, path: String },
    /// `zoofile://path` — coordinated election, servers read from a file.
    ZooFile { path: String },
}

impl FromStr for MasterUrl {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "local" {
            return Ok(MasterUrl::Local { slaves: 1 });
        }
        if let Some(count) = s.strip_prefix("local/") {
            let slaves = count
                .parse::<usize>()
                .map_err(|_| ClusterError::InvalidMasterUrl(s.to_string()))?;
            if slaves == 0 {
                return Err(ClusterError::InvalidMasterUrl(s.to_string()));
            }
            return Ok(MasterUrl::Local { slaves });
        }
        if let Some(rest) = s.strip_prefix("zoo://") {
            let (servers, path) = rest
                .split_once('/')
                .ok_or_else(|| ClusterError::InvalidMasterUrl(s.to_string()))?;
            return Ok(MasterUrl::Zoo {
                servers: servers.to_string(),
                path: format!("/{path}"),
            });
        }
        if let Some(path) = s.strip_prefix("zoofile://") {
            return Ok(MasterUrl::ZooFile {
                path: path.to_string(),
            });
        }
        let (host, port) = s
            .split_once(':')
            .ok_or_else(|| ClusterError::InvalidMasterUrl(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ClusterError::InvalidMasterUrl(s.to_string()))?;
        if host.is_empty() {
            return Err(ClusterError::InvalidMasterUrl(s.to_string()));
        }
        Ok(MasterUrl::Direct {
            host: host.to_string(),
            port,
        })
    }
}

impl MasterUrl {
    /// Build a detector for this URL. Coordinated URLs need an external
    /// detector implementation and cannot be constructed here; the local
    /// form is handled by the in-process cluster, not a detector.
    pub fn detector(&self) -> Result<Arc<dyn MasterDetector>, ClusterError> {
        match self {
            MasterUrl::Direct { host, port } => Ok(Arc::new(StaticDetector::new(Address::new(
                host.clone(),
                *port,
                MASTER_ACTOR_NAME,
            )))),
            MasterUrl::Local { .. } => Err(ClusterError::InvalidMasterUrl(
                "the local master runs in-process and needs no detector".to_string(),
            )),
            MasterUrl::Zoo { servers, .. } => {
                Err(ClusterError::DetectorUnavailable(format!("zoo://{servers}")))
            }
            MasterUrl::ZooFile { path } => {
                Err(ClusterError::DetectorUnavailable(format!("zoofile://{path}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_url_forms() {
        assert_eq!(
            "10.0.0.1:5050".parse::<MasterUrl>().unwrap(),
            MasterUrl::Direct {
                host: "10.0.0.1".to_string(),
                port: 5050
            }
        );
        assert_eq!(
            "local".parse::<MasterUrl>().unwrap(),
            MasterUrl::Local { slaves: 1 }
        );
        assert_eq!(
            "local/4".parse::<MasterUrl>().unwrap(),
            MasterUrl::Local { slaves: 4 }
        );
        assert_eq!(
            "zoo://a:2181,b:2181/keel".parse::<MasterUrl>().unwrap(),
            MasterUrl::Zoo {
                servers: "a:2181,b:2181".to_string(),
                path: "/keel".to_string()
            }
        );
        assert_eq!(
            "zoofile:///etc/keel/masters".parse::<MasterUrl>().unwrap(),
            MasterUrl::ZooFile {
                path: "/etc/keel/masters".to_string()
            }
        );
        for bad in ["", "local/0", "host", "host:bad"] {
            assert!(bad.parse::<MasterUrl>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_coordinated_urls_need_an_external_detector() {
        let url: MasterUrl = "zoo://a:2181/keel".parse().unwrap();
        assert!(matches!(
            url.detector(),
            Err(ClusterError::DetectorUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_static_detector_appoints() {
        let detector = StaticDetector::unappointed();
        let mut watch = detector.subscribe();
        assert_eq!(*watch.borrow(), None);
        let master = Address::new("127.0.0.1", 5050, "master");
        detector.appoint(Some(master.clone()));
        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow(), Some(master));
    }
}
