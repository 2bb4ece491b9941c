use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::{
    config::ClientSettings,
    dedup::RequestDedup,
    error::TransportError,
    sync::ConversationSync,
    transport::{ApiRequest, Method, ResponseEnvelope, Transport},
};

struct Reply {
    outcome: Result<Value, TransportError>,
    gate: Option<Arc<Notify>>,
}

/// Transport answering from per-route queues of canned replies. A gated reply
/// stays in flight until its `Notify` is triggered.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .expect("routes")
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn respond(&self, method: Method, path: &str, data: Value) {
        self.push(
            method,
            path,
            Reply {
                outcome: Ok(data),
                gate: None,
            },
        );
    }

    pub(crate) fn fail(&self, method: Method, path: &str, err: TransportError) {
        self.push(
            method,
            path,
            Reply {
                outcome: Err(err),
                gate: None,
            },
        );
    }

    pub(crate) fn respond_gated(&self, method: Method, path: &str, data: Value) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.push(
            method,
            path,
            Reply {
                outcome: Ok(data),
                gate: Some(Arc::clone(&gate)),
            },
        );
        gate
    }

    pub(crate) fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().expect("calls").clone()
    }

    pub(crate) fn call_count(&self, method: Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ResponseEnvelope, TransportError> {
        let reply = {
            self.calls.lock().expect("calls").push(request.clone());
            self.routes
                .lock()
                .expect("routes")
                .get_mut(&(request.method, request.path.clone()))
                .and_then(VecDeque::pop_front)
        };
        let Some(reply) = reply else {
            return Err(TransportError::connect(format!(
                "no scripted reply for {} {}",
                request.method.as_str(),
                request.path
            )));
        };
        if let Some(gate) = reply.gate {
            gate.notified().await;
        }
        reply
            .outcome
            .map(|data| ResponseEnvelope { data, status: 200 })
    }
}

pub(crate) fn sync_over(
    transport: &Arc<ScriptedTransport>,
    settings: &ClientSettings,
) -> ConversationSync {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    ConversationSync::new_with_dependencies(
        transport,
        Arc::new(RequestDedup::new(settings.in_flight_max_age)),
        settings,
    )
}

pub(crate) fn conversation_json(id: i64, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "summary": "",
        "category": null,
        "category_name": null,
        "tags": [],
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-01T10:00:00Z",
        "message_count": 0
    })
}

pub(crate) fn message_json(id: i64, role: &str, content: &str) -> Value {
    json!({
        "id": id,
        "role": role,
        "content": content,
        "timestamp": "2024-05-01T10:00:01Z"
    })
}
