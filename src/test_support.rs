//! Shared test doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::duplex;
use tokio::task::JoinHandle;

use crate::client::TabClient;
use crate::error::{Error, Result};
use crate::protocol::Command;
use crate::transport::FramedTransport;

// ============================================================================
// StubClient
// ============================================================================

type Responder = Box<dyn Fn(&Command) -> Result<Value> + Send + Sync>;

/// In-memory [`TabClient`] that records every command it receives.
pub struct StubClient {
    name: String,
    delay: Mutex<Option<Duration>>,
    responder: Option<Responder>,
    failing: AtomicBool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Command>>,
}

impl StubClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Mutex::new(None),
            responder: None,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(Some(delay));
        self
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&Command) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.seen.lock().clone()
    }

    /// Listing returned by default for tab reads.
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("1.2\tTitle {0}\thttps://{0}.example/one", self.name),
            format!("1.3\tOther {0}\thttps://{0}.example/two", self.name),
        ]
    }

    fn default_response(&self, command: &Command) -> Value {
        match command {
            Command::ListTabs
            | Command::QueryTabs { .. }
            | Command::GetActiveTabs
            | Command::OpenUrls { .. }
            | Command::UpdateTabs { .. }
            | Command::GetWords(_)
            | Command::GetText(_)
            | Command::GetHtml(_) => json!(self.lines()),
            Command::GetBrowser => json!("stub"),
            Command::GetPid => json!(4242),
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl TabClient for StubClient {
    fn describe(&self) -> String {
        format!("stub:{}", self.name)
    }

    async fn execute(&self, command: Command) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(command.clone());

        // The answer reflects the state at call time; the delay only
        // postpones its delivery.
        let outcome = if self.failing.load(Ordering::SeqCst) {
            Err(Error::connection(format!("stub {} is down", self.name)))
        } else {
            match &self.responder {
                Some(responder) => responder(&command),
                None => Ok(self.default_response(&command)),
            }
        };

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

// ============================================================================
// FakeBrowser
// ============================================================================

/// Browser side of a framed stdio pair.
///
/// Answers each `{"name", "args"}` frame with whatever `answer` returns, and
/// stops when the mediator side goes away.
pub fn fake_browser(
    answer: impl Fn(&Value) -> Value + Send + 'static,
) -> (Arc<FramedTransport>, JoinHandle<anyhow::Result<usize>>) {
    let (mediator_end, browser_end) = duplex(64 * 1024);
    let mediator = Arc::new(FramedTransport::from_stream(mediator_end));
    let browser = FramedTransport::from_stream(browser_end);

    let task = tokio::spawn(async move {
        let mut handled = 0;
        loop {
            let request = match browser.recv().await {
                Ok(request) => request,
                Err(e) if e.is_connection_closed() => return Ok(handled),
                Err(e) => return Err(e.into()),
            };
            browser.send(&answer(&request)).await?;
            handled += 1;
        }
    });

    (mediator, task)
}

/// Browser side that hands back its transport for scripted exchanges.
pub fn browser_pair() -> (Arc<FramedTransport>, FramedTransport) {
    let (mediator_end, browser_end) = duplex(64 * 1024);
    (
        Arc::new(FramedTransport::from_stream(mediator_end)),
        FramedTransport::from_stream(browser_end),
    )
}
