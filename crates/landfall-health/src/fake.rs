//! In-memory [`HttpProbe`] for tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::checker::{HttpProbe, ProbeFuture, ProbeResponse};
use crate::error::ProbeError;

#[derive(Debug, Default)]
struct Routes {
    /// Per path, a sequence of answers whose last entry repeats.
    answers: BTreeMap<String, VecDeque<Result<ProbeResponse, ProbeError>>>,
    calls: BTreeMap<String, u32>,
}

/// Scripted probe. Paths without a script behave like a refused
/// connection.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    routes: Arc<Mutex<Routes>>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every default endpoint answers 200; `/status` reports the given
    /// database flag.
    pub fn healthy(database_connected: bool) -> Self {
        let probe = Self::new();
        for path in ["/", "/health", "/db-test", "/config", "/environment"] {
            probe.respond(path, 200, "ok");
        }
        probe.respond(
            "/status",
            200,
            &serde_json::json!({ "status": "ok", "database_connected": database_connected }).to_string(),
        );
        probe
    }

    /// Replace the answers for `path`.
    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.routes()
            .answers
            .insert(path.to_string(), VecDeque::from([Ok(ProbeResponse::new(status, body))]));
    }

    /// Append an answer for `path`, used once the earlier ones are spent.
    pub fn then_respond(&self, path: &str, status: u16, body: &str) {
        self.routes()
            .answers
            .entry(path.to_string())
            .or_default()
            .push_back(Ok(ProbeResponse::new(status, body)));
    }

    /// Replace the answers for `path` with a connection failure.
    pub fn refuse(&self, path: &str) {
        self.routes().answers.insert(
            path.to_string(),
            VecDeque::from([Err(ProbeError::Connect("connection refused".to_string()))]),
        );
    }

    pub fn calls(&self, path: &str) -> u32 {
        self.routes().calls.get(path).copied().unwrap_or(0)
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn answer(&self, path: &str) -> Result<ProbeResponse, ProbeError> {
        let mut routes = self.routes();
        *routes.calls.entry(path.to_string()).or_default() += 1;
        match routes.answers.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(ProbeError::Connect("no answer".to_string()))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ProbeError::Connect("no answer".to_string()))),
            None => Err(ProbeError::Connect(format!("connection refused for {path}"))),
        }
    }
}

impl HttpProbe for FakeProbe {
    fn get<'a>(&'a self, path: &'a str) -> ProbeFuture<'a> {
        Box::pin(async move { self.answer(path) })
    }

    fn target(&self) -> String {
        "http://fake.invalid".to_string()
    }
}
