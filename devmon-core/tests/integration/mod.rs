//! Shared helpers for integration tests

mod poll_cycle_tests;
mod shell_tests;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use devmon_core::{Operation, RawResult, Target, Transport, TransportKind, TransportResult};

type Handler = dyn Fn(&Operation) -> TransportResult<RawResult> + Send + Sync;

/// HTTP-like device answering from a closure and recording every request
pub struct ScriptedDevice {
    handler: Box<Handler>,
    sent: Mutex<Vec<Operation>>,
}

impl ScriptedDevice {
    pub fn new(
        handler: impl Fn(&Operation) -> TransportResult<RawResult> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Paths requested so far, in order
    pub fn paths(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(path_of).collect()
    }

    /// Requests sent to `path`
    pub fn count(&self, path: &str) -> usize {
        self.paths().iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl Transport for ScriptedDevice {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn send(&self, operation: &Operation) -> TransportResult<RawResult> {
        self.sent.lock().unwrap().push(operation.clone());
        (self.handler)(operation)
    }

    async fn close(&self) {}
}

/// Request path of an HTTP operation
pub fn path_of(operation: &Operation) -> String {
    match &operation.target {
        Target::Http(request) => request.path.clone(),
        _ => String::new(),
    }
}

/// A 200 response with a JSON body
pub fn ok_json(body: &str) -> TransportResult<RawResult> {
    Ok(RawResult::from_body(body).with_status(200))
}
