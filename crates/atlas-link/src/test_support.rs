//! Scripted [`Transport`] for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atlas_types::CommandResult;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::transport::{Method, Transport};

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub endpoint: String,
    pub method: Method,
    pub body: Option<Value>,
}

/// Records every request and answers from a per-endpoint script.
///
/// Lookup order: queued one-shot responses, then the endpoint's sticky
/// response, then `{"success": true}`.  Endpoints put on [`hold`] block after
/// the call is recorded until [`release`] hands out permits.
///
/// [`hold`]: ScriptedTransport::hold
/// [`release`]: ScriptedTransport::release
pub(crate) struct ScriptedTransport {
    calls: Mutex<Vec<Call>>,
    queued: Mutex<HashMap<String, VecDeque<CommandResult<Value>>>>,
    sticky: Mutex<HashMap<String, CommandResult<Value>>>,
    held: Mutex<Vec<String>>,
    gate: Arc<Semaphore>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            queued: Mutex::new(HashMap::new()),
            sticky: Mutex::new(HashMap::new()),
            held: Mutex::new(Vec::new()),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Answer every later request to `endpoint` with `result`.
    pub fn set_response(&self, endpoint: &str, result: CommandResult<Value>) {
        self.sticky.lock().unwrap().insert(endpoint.to_string(), result);
    }

    /// Answer the next unanswered request to `endpoint` with `result`.
    pub fn push_response(&self, endpoint: &str, result: CommandResult<Value>) {
        self.queued
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn hold(&self, endpoint: &str) {
        self.held.lock().unwrap().push(endpoint.to_string());
    }

    /// Let `n` held requests through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .count()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Request bodies sent to `endpoint`, in call order.
    pub fn bodies(&self, endpoint: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .filter_map(|c| c.body.clone())
            .collect()
    }

    /// Wait until at least `n` requests to `endpoint` have been recorded.
    pub async fn wait_for_calls(&self, endpoint: &str, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls_to(endpoint) < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("timed out waiting for transport calls");
    }

    fn next_response(&self, endpoint: &str) -> CommandResult<Value> {
        if let Some(result) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        self.sticky
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| Ok(json!({ "success": true })))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
    ) -> CommandResult<Value> {
        let response = self.next_response(endpoint);
        self.calls.lock().unwrap().push(Call {
            endpoint: endpoint.to_string(),
            method,
            body,
        });
        let held = self.held.lock().unwrap().iter().any(|e| e == endpoint);
        if held {
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        response
    }
}
