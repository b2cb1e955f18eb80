use std::sync::Arc;

use clap::{Parser, Subcommand};
use keel_cluster::detector::MasterUrl;
use keel_cluster::local::LocalCluster;
use keel_cluster::master::{start_master, MasterOptions};
use keel_cluster::resources::Resources;
use keel_cluster::slave::{start_slave, ProcessIsolation, SlaveOptions};
use keel_server::actor::ActorSystem;
use log::info;

#[derive(Parser)]
#[command(name = "keel", about = "A two-level cluster resource manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the cluster coordinator.
    Master {
        /// Host to advertise to slaves and frameworks.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 5050)]
        port: u16,
    },
    /// Run a worker node.
    Slave {
        /// Master URL, e.g. `10.0.0.1:5050`.
        #[arg(long)]
        master: String,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 5051)]
        port: u16,
        /// Total consumable resources, e.g. `cpus:4;mem:4096`.
        #[arg(long, default_value = "cpus:1;mem:1024")]
        resources: String,
        /// Root directory for executor work directories.
        #[arg(long, default_value = ".")]
        work_dir: String,
    },
    /// Run an in-process master with N slaves, for trying things out.
    Local {
        #[arg(short = 'n', long, default_value_t = 1)]
        slaves: usize,
        #[arg(long, default_value = "cpus:1;mem:1024")]
        resources: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    keel_common::logging::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Master { host, port } => {
            let system = ActorSystem::new();
            let bound = system.listen(&host, port).await?;
            info!("master endpoint bound on {bound}");
            start_master(&system, MasterOptions::new());
            system.join().await;
        }
        Command::Slave {
            master,
            host,
            port,
            resources,
            work_dir,
        } => {
            let url: MasterUrl = master.parse()?;
            let detector = url.detector()?;
            let system = ActorSystem::new();
            let bound = system.listen(&host, port).await?;
            info!("slave endpoint bound on {bound}");
            let options = SlaveOptions::new(detector, Arc::new(ProcessIsolation))
                .with_resources(Resources::parse(&resources)?)
                .with_work_dir(work_dir);
            start_slave(&system, "slave", options);
            system.join().await;
        }
        Command::Local { slaves, resources } => {
            let system = ActorSystem::new();
            let cluster = LocalCluster::start(&system, slaves, Resources::parse(&resources)?);
            info!(
                "local cluster up with {slaves} slave(s); master at {}",
                cluster.master_address()
            );
            system.join().await;
        }
    }
    Ok(())
}
