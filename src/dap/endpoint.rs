//! Request/response correlation for the front-end protocol
//!
//! The endpoint stamps every outgoing message with the next sequence number,
//! keeps a table of requests awaiting a reply, and fans incoming events out to
//! listeners. A pending request is completed exactly once: by its matching
//! response or by its timeout, whichever removes it from the table first.

use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, warn};

use crate::dap::protocol::{Event, ProtocolMessage, Request, Response};
use crate::log_dap_message;

/// Local event emitted when a request times out; never written to the wire
pub const DIAGNOSTIC_EVENT: &str = "diagnostic";

/// Answered request numbers tracked individually before folding into the watermark
const ANSWERED_WINDOW: usize = 256;

/// Errors raised by the endpoint
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Outbound channel closed")]
    ChannelClosed,

    #[error("Request {0} was already answered")]
    DuplicateResponse(i64),
}

type EventListener = Arc<dyn Fn(&Event) + Send + Sync>;

struct PendingRequest {
    command: String,
    waiter: oneshot::Sender<Response>,
    timer: Option<JoinHandle<()>>,
}

struct Outbound {
    next_seq: i64,
    sender: mpsc::UnboundedSender<ProtocolMessage>,
}

/// Request sequence numbers that already got a response
///
/// Everything at or below `watermark` counts as answered; the set holds the
/// most recent answers above it and never exceeds [`ANSWERED_WINDOW`].
#[derive(Debug, Default)]
struct AnsweredRequests {
    watermark: i64,
    recent: BTreeSet<i64>,
}

impl AnsweredRequests {
    /// Record `seq`; false when it was already answered
    fn insert(&mut self, seq: i64) -> bool {
        if seq <= self.watermark || !self.recent.insert(seq) {
            return false;
        }
        while self.recent.len() > ANSWERED_WINDOW {
            if let Some(oldest) = self.recent.pop_first() {
                self.watermark = oldest;
            }
        }
        true
    }
}

struct Inner {
    outbound: Mutex<Outbound>,
    pending: Mutex<HashMap<i64, PendingRequest>>,
    answered: Mutex<AnsweredRequests>,
    listeners: Mutex<HashMap<String, Vec<EventListener>>>,
}

/// Sequence-numbering, correlating side of a protocol connection
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

/// Future resolving to the reply of a request sent with [`Endpoint::send_request`]
pub struct PendingResponse {
    receiver: oneshot::Receiver<Response>,
}

impl Future for PendingResponse {
    type Output = Result<Response, EndpointError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| EndpointError::ChannelClosed))
    }
}

impl Endpoint {
    /// Create an endpoint writing to `sender`; the first message gets sequence 1
    pub fn new(sender: mpsc::UnboundedSender<ProtocolMessage>) -> Self {
        Self {
            inner: Arc::new(Inner {
                outbound: Mutex::new(Outbound {
                    next_seq: 1,
                    sender,
                }),
                pending: Mutex::new(HashMap::new()),
                answered: Mutex::new(AnsweredRequests::default()),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Assign the next sequence number to `message` and queue it for writing
    pub fn send(&self, message: ProtocolMessage) -> Result<i64, EndpointError> {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        let mut outbound = self.inner.outbound.lock().unwrap();
        Self::send_locked(&mut outbound, message)
    }

    fn send_locked(outbound: &mut Outbound, mut message: ProtocolMessage) -> Result<i64, EndpointError> {
        let seq = outbound.next_seq;
        outbound.next_seq += 1;
        message.set_seq(seq);

        log_dap_message!(Level::DEBUG, "outbound", message.name(), &message);

        outbound
            .sender
            .send(message)
            .map_err(|_| EndpointError::ChannelClosed)?;
        Ok(seq)
    }

    pub fn send_event(&self, event: &str, body: Value) -> Result<i64, EndpointError> {
        self.send(ProtocolMessage::Event(Event::new(event, body)))
    }

    /// Send the reply to a request; a second reply to the same request is refused
    pub fn send_response(&self, response: Response) -> Result<(), EndpointError> {
        let request_seq = response.request_seq;
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        if !self.inner.answered.lock().unwrap().insert(request_seq) {
            error!(
                "Endpoint: refusing second response to request {} ({})",
                request_seq, response.command
            );
            return Err(EndpointError::DuplicateResponse(request_seq));
        }
        self.send(ProtocolMessage::Response(response)).map(|_| ())
    }

    /// Send a request and register it for correlation
    ///
    /// The returned future resolves with the matching response, or with a
    /// failed response if none arrives within `timeout`. A zero timeout waits
    /// indefinitely.
    pub fn send_request(
        &self,
        command: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<PendingResponse, EndpointError> {
        let (waiter, receiver) = oneshot::channel();

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        let mut outbound = self.inner.outbound.lock().unwrap();
        let seq = outbound.next_seq;
        {
            let mut pending = self.inner.pending.lock().unwrap();
            let timer = (!timeout.is_zero()).then(|| self.spawn_timer(seq, timeout));
            pending.insert(
                seq,
                PendingRequest {
                    command: command.to_string(),
                    waiter,
                    timer,
                },
            );
        }

        let request = ProtocolMessage::Request(Request::new(command, arguments));
        if let Err(e) = Self::send_locked(&mut outbound, request) {
            if let Some(entry) = self.inner.pending.lock().unwrap().remove(&seq) {
                entry.timer.inspect(JoinHandle::abort);
            }
            return Err(e);
        }

        Ok(PendingResponse { receiver })
    }

    fn spawn_timer(&self, seq: i64, timeout: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let entry = inner.pending.lock().unwrap().remove(&seq);
            let Some(entry) = entry else {
                return;
            };

            let message = format!("timeout after {}ms", timeout.as_millis());
            warn!("Endpoint: request {} ({}) {}", seq, entry.command, message);
            let _ = entry
                .waiter
                .send(Response::failure(seq, &entry.command, message));

            let diagnostic = Event::new(
                DIAGNOSTIC_EVENT,
                json!({ "message": format!("unresponsive {}", entry.command) }),
            );
            Self::dispatch_event(&inner, &diagnostic);
        })
    }

    /// Route an incoming response to its waiter; unmatched responses are dropped
    pub fn handle_response(&self, response: Response) {
        log_dap_message!(Level::DEBUG, "inbound", &response.command, &response);

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        let entry = self.inner.pending.lock().unwrap().remove(&response.request_seq);
        match entry {
            Some(entry) => {
                entry.timer.inspect(JoinHandle::abort);
                if entry.waiter.send(response).is_err() {
                    debug!("Endpoint: waiter for {} dropped", entry.command);
                }
            }
            None => debug!(
                "Endpoint: dropping response to unknown or expired request {}",
                response.request_seq
            ),
        }
    }

    /// Deliver an incoming event to every listener registered for its name
    pub fn handle_event(&self, event: Event) {
        log_dap_message!(Level::DEBUG, "inbound", &event.event, &event);
        Self::dispatch_event(&self.inner, &event);
    }

    fn dispatch_event(inner: &Inner, event: &Event) {
        let listeners: Vec<EventListener> = inner
            .listeners
            .lock()
            .unwrap()
            .get(&event.event)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener(event);
        }
    }

    /// Register a listener for events named `event`
    pub fn on_event<F>(&self, event: &str, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Fail every pending request; used when the session shuts down
    pub fn cancel_pending(&self) {
        let drained: Vec<(i64, PendingRequest)> =
            self.inner.pending.lock().unwrap().drain().collect();
        for (seq, entry) in drained {
            debug!("Endpoint: cancelling pending request {}", seq);
            entry.timer.inspect(JoinHandle::abort);
            let _ = entry
                .waiter
                .send(Response::failure(seq, &entry.command, "session closed"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn endpoint() -> (Endpoint, mpsc::UnboundedReceiver<ProtocolMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Endpoint::new(sender), receiver)
    }

    fn reply(request_seq: i64, command: &str) -> Response {
        Response {
            seq: 40,
            request_seq,
            success: true,
            command: command.to_string(),
            message: None,
            body: json!({"ok": true}),
        }
    }

    #[tokio::test]
    async fn test_sequence_numbers_start_at_one_and_increase() {
        let (endpoint, mut written) = endpoint();

        endpoint.send_event("initialized", Value::Null).unwrap();
        endpoint
            .send_request("runInTerminal", Value::Null, Duration::ZERO)
            .unwrap();
        let request = Request {
            seq: 1,
            command: "threads".to_string(),
            arguments: Value::Null,
        };
        endpoint
            .send_response(Response::success(&request, Value::Null))
            .unwrap();
        endpoint.send_event("output", Value::Null).unwrap();

        let mut seqs = Vec::new();
        while let Ok(message) = written.try_recv() {
            seqs.push(message.seq());
        }
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_response_resolves_matching_request() {
        let (endpoint, mut written) = endpoint();

        let pending = endpoint
            .send_request("runInTerminal", json!({"args": ["ls"]}), Duration::from_secs(5))
            .unwrap();
        let sent = written.recv().await.unwrap();

        endpoint.handle_response(reply(sent.seq(), "runInTerminal"));

        let response = pending.await.unwrap();
        assert!(response.success);
        assert_eq!(response.body, json!({"ok": true}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_failed_response_and_diagnostic() {
        let (endpoint, _written) = endpoint();
        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&diagnostics);
        endpoint.on_event(DIAGNOSTIC_EVENT, move |event| {
            sink.lock().unwrap().push(event.body["message"].clone());
        });

        let pending = endpoint
            .send_request("runInTerminal", Value::Null, Duration::from_millis(3000))
            .unwrap();
        let response = pending.await.unwrap();

        assert!(!response.success);
        assert!(
            response
                .message
                .as_deref()
                .unwrap()
                .contains("timeout after 3000ms")
        );
        assert_eq!(
            *diagnostics.lock().unwrap(),
            vec![json!("unresponsive runInTerminal")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_dropped() {
        let (endpoint, mut written) = endpoint();

        let pending = endpoint
            .send_request("runInTerminal", Value::Null, Duration::from_millis(100))
            .unwrap();
        let seq = written.recv().await.unwrap().seq();

        let response = pending.await.unwrap();
        assert!(!response.success);

        // The stale reply finds no pending entry and goes nowhere
        endpoint.handle_response(reply(seq, "runInTerminal"));
        assert!(endpoint.inner.pending.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_before_timeout_cancels_timer() {
        let (endpoint, mut written) = endpoint();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        endpoint.on_event(DIAGNOSTIC_EVENT, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pending = endpoint
            .send_request("runInTerminal", Value::Null, Duration::from_millis(100))
            .unwrap();
        let seq = written.recv().await.unwrap().seq();
        endpoint.handle_response(reply(seq, "runInTerminal"));
        assert!(pending.await.unwrap().success);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_response_to_same_request_is_refused() {
        let (endpoint, mut written) = endpoint();
        let request = Request {
            seq: 7,
            command: "next".to_string(),
            arguments: Value::Null,
        };

        endpoint
            .send_response(Response::success(&request, Value::Null))
            .unwrap();
        let second = endpoint.send_response(Response::failure(7, "next", "again"));

        assert!(matches!(second, Err(EndpointError::DuplicateResponse(7))));
        assert!(written.recv().await.is_some());
        assert!(written.try_recv().is_err());
    }

    #[test]
    fn test_answered_requests_stay_bounded() {
        let mut answered = AnsweredRequests::default();
        let total = ANSWERED_WINDOW as i64 * 4;

        for seq in 1..=total {
            assert!(answered.insert(seq));
        }

        assert_eq!(answered.recent.len(), ANSWERED_WINDOW);
        assert_eq!(answered.watermark, total - ANSWERED_WINDOW as i64);
        assert!(!answered.insert(1));
        assert!(!answered.insert(total));
        assert!(answered.insert(total + 1));
    }

    #[tokio::test]
    async fn test_events_fan_out_to_all_listeners() {
        let (endpoint, _written) = endpoint();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            endpoint.on_event("progress", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        endpoint.handle_event(Event::new("progress", Value::Null));
        endpoint.handle_event(Event::new("unheard", Value::Null));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_pending_fails_outstanding_requests() {
        let (endpoint, _written) = endpoint();
        let pending = endpoint
            .send_request("runInTerminal", Value::Null, Duration::ZERO)
            .unwrap();

        endpoint.cancel_pending();

        let response = pending.await.unwrap();
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("session closed"));
    }
}
