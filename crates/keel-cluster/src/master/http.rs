use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use keel_server::actor::{ActorContext, ActorHandle};
use keel_server::http::{HttpHandlerMap, HttpResponse};
use serde_json::json;
use tokio::sync::oneshot;

use crate::master::event::{
    FrameworkSnapshot, MasterEndpoint, MasterEvent, MasterSnapshot, OfferSnapshot, SlaveSnapshot,
};
use crate::master::MasterActor;

/// HTTP handlers for `/master/...`; each endpoint resolves by asking the
/// master actor for its current view.
pub(super) fn handlers(handle: &ActorHandle<MasterActor>) -> HttpHandlerMap {
    let endpoints = [
        ("info.json", MasterEndpoint::Info),
        ("frameworks.json", MasterEndpoint::Frameworks),
        ("tasks.json", MasterEndpoint::Tasks),
        ("stats.json", MasterEndpoint::Stats),
        ("vars", MasterEndpoint::Vars),
    ];
    let mut map: HttpHandlerMap = HashMap::new();
    for (path, endpoint) in endpoints {
        let handle = handle.clone();
        map.insert(
            path.to_string(),
            Arc::new(move |_request| {
                let handle = handle.clone();
                async move {
                    let (reply, response) = oneshot::channel();
                    handle.send(MasterEvent::HttpQuery { endpoint, reply });
                    response
                        .await
                        .unwrap_or_else(|_| HttpResponse::not_found())
                }
                .boxed()
            }),
        );
    }
    map
}

impl MasterActor {
    pub(super) fn handle_http_query(
        &mut self,
        ctx: &mut ActorContext<Self>,
        endpoint: MasterEndpoint,
    ) -> HttpResponse {
        match endpoint {
            MasterEndpoint::Info => HttpResponse::json(
                json!({
                    "address": ctx.address().to_string(),
                    "uptime": self.started_at.elapsed().as_secs_f64(),
                })
                .to_string(),
            ),
            MasterEndpoint::Frameworks => {
                let frameworks: Vec<_> = self
                    .state
                    .list_frameworks()
                    .map(|f| {
                        json!({
                            "id": f.framework_id.to_string(),
                            "name": f.info.name,
                            "user": f.info.user,
                            "active": f.active,
                            "tasks": f.tasks.len(),
                            "offers": f.offers.len(),
                        })
                    })
                    .collect();
                HttpResponse::json(json!(frameworks).to_string())
            }
            MasterEndpoint::Tasks => {
                let tasks: Vec<_> = self
                    .state
                    .list_frameworks()
                    .flat_map(|f| f.tasks.values())
                    .map(|t| {
                        json!({
                            "task_id": t.task_id.to_string(),
                            "framework_id": t.framework_id.to_string(),
                            "slave_id": t.slave_id.to_string(),
                            "name": t.name,
                            "state": t.state.to_string(),
                            "cpus": t.resources.cpus(),
                            "mem": t.resources.mem(),
                        })
                    })
                    .collect();
                HttpResponse::json(json!(tasks).to_string())
            }
            MasterEndpoint::Stats => HttpResponse::json(self.stats_json().to_string()),
            MasterEndpoint::Vars => {
                let mut out = String::new();
                let stats = self.stats_json();
                if let Some(object) = stats.as_object() {
                    for (key, value) in object {
                        out.push_str(&format!("{key} {value}\n"));
                    }
                }
                HttpResponse::text(out)
            }
        }
    }

    fn stats_json(&self) -> serde_json::Value {
        json!({
            "uptime": self.started_at.elapsed().as_secs_f64(),
            "total_frameworks": self.state.list_frameworks().count(),
            "total_slaves": self.state.list_slaves().count(),
            "outstanding_offers": self.state.list_offers().count(),
            "launched_tasks": self.stats.launched_tasks,
            "finished_tasks": self.stats.finished_tasks,
            "killed_tasks": self.stats.killed_tasks,
            "failed_tasks": self.stats.failed_tasks,
            "lost_tasks": self.stats.lost_tasks,
            "valid_status_updates": self.stats.valid_status_updates,
            "invalid_status_updates": self.stats.invalid_status_updates,
            "valid_framework_messages": self.stats.valid_framework_messages,
            "invalid_framework_messages": self.stats.invalid_framework_messages,
        })
    }

    pub(super) fn snapshot(&self) -> MasterSnapshot {
        MasterSnapshot {
            frameworks: self
                .state
                .list_frameworks()
                .map(|f| FrameworkSnapshot {
                    framework_id: f.framework_id.clone(),
                    name: f.info.name.clone(),
                    active: f.active,
                    tasks: f.tasks.values().cloned().collect(),
                    offers: f.offers.iter().cloned().collect(),
                })
                .collect(),
            slaves: self
                .state
                .list_slaves()
                .map(|s| SlaveSnapshot {
                    slave_id: s.slave_id.clone(),
                    hostname: s.info.hostname.clone(),
                    total: s.total.clone(),
                    available: s.available.clone(),
                    tasks: s.tasks.values().cloned().collect(),
                })
                .collect(),
            offers: self
                .state
                .list_offers()
                .map(|o| OfferSnapshot {
                    offer_id: o.offer_id.clone(),
                    framework_id: o.framework_id.clone(),
                    slave_id: o.slave_id.clone(),
                    resources: o.resources.clone(),
                })
                .collect(),
        }
    }
}
