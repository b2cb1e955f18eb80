use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use keel_server::actor::{ActorContext, ActorHandle};
use keel_server::http::{HttpHandlerMap, HttpResponse};
use serde_json::json;
use tokio::sync::oneshot;

use crate::slave::event::{
    ExecutorRecordSnapshot, FrameworkRecordSnapshot, SlaveEndpoint, SlaveEvent,
    SlaveRegistrySnapshot,
};
use crate::slave::SlaveActor;

/// HTTP handlers for `/slave/...`.
pub(super) fn handlers(handle: &ActorHandle<SlaveActor>) -> HttpHandlerMap {
    let endpoints = [
        ("info.json", SlaveEndpoint::Info),
        ("frameworks.json", SlaveEndpoint::Frameworks),
        ("tasks.json", SlaveEndpoint::Tasks),
        ("stats.json", SlaveEndpoint::Stats),
        ("vars", SlaveEndpoint::Vars),
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
                    handle.send(SlaveEvent::HttpQuery { endpoint, reply });
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

impl SlaveActor {
    pub(super) fn handle_http_query(
        &mut self,
        ctx: &mut ActorContext<Self>,
        endpoint: SlaveEndpoint,
    ) -> HttpResponse {
        match endpoint {
            SlaveEndpoint::Info => HttpResponse::json(
                json!({
                    "address": ctx.address().to_string(),
                    "hostname": self.hostname,
                    "slave_id": self.state.slave_id.as_ref().map(|id| id.to_string()),
                    "resources": self.options.resources.to_string(),
                    "uptime": self.started_at.elapsed().as_secs_f64(),
                })
                .to_string(),
            ),
            SlaveEndpoint::Frameworks => {
                let frameworks: Vec<_> = self
                    .state
                    .list_frameworks()
                    .map(|f| {
                        json!({
                            "id": f.framework_id.to_string(),
                            "name": f.info.name,
                            "user": f.info.user,
                            "executors": f.executors.len(),
                            "pending_updates": f.pending_update_count(),
                        })
                    })
                    .collect();
                HttpResponse::json(json!(frameworks).to_string())
            }
            SlaveEndpoint::Tasks => {
                let tasks: Vec<_> = self
                    .state
                    .list_frameworks()
                    .flat_map(|f| f.executors.values())
                    .flat_map(|e| e.tasks.values())
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
            SlaveEndpoint::Stats => HttpResponse::json(self.stats_json().to_string()),
            SlaveEndpoint::Vars => {
                let mut out = String::new();
                if let Some(object) = self.stats_json().as_object() {
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

    pub(super) fn snapshot(&self) -> SlaveRegistrySnapshot {
        SlaveRegistrySnapshot {
            slave_id: self.state.slave_id.clone(),
            master: self.state.master.clone(),
            orphaned_updates: self.state.orphaned_update_count(),
            frameworks: self
                .state
                .list_frameworks()
                .map(|f| FrameworkRecordSnapshot {
                    framework_id: f.framework_id.clone(),
                    pending_updates: f.pending_update_count(),
                    executors: f
                        .executors
                        .iter()
                        .map(|(executor_id, e)| ExecutorRecordSnapshot {
                            executor_id: executor_id.clone(),
                            registered: e.address().is_some(),
                            queued_tasks: e.queued_tasks.iter().map(|t| t.task_id.clone()).collect(),
                            tasks: e.tasks.values().cloned().collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
