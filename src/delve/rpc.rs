//! JSON-RPC 1.0 client for the Delve API server
//!
//! Delve speaks Go's `net/rpc/jsonrpc` dialect: requests are
//! `{"method", "params": [arg], "id"}` objects, replies are
//! `{"id", "result", "error"}` with `error` a plain string or null, and both
//! directions are bare JSON values written back to back on the socket with no
//! framing beyond the JSON syntax itself.

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{Level, debug, error, trace, warn};

use crate::io::{spawn_reader, spawn_writer};
use crate::log_rpc_message;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(serde_json::Error),

    /// Error string reported by the debugger
    #[error("{0}")]
    Server(String),

    #[error("{method} timed out after {}ms", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    #[error("Connection to debugger closed")]
    ConnectionClosed,
}

// ============================================================================
// Stream Codec
// ============================================================================

/// Codec for a stream of concatenated JSON values
#[derive(Debug)]
pub struct JsonStreamCodec<T> {
    _message: PhantomData<fn() -> T>,
}

impl<T> JsonStreamCodec<T> {
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<T> Default for JsonStreamCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonStreamCodec<T> {
    type Item = T;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, RpcError> {
        let skip = src
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(src.len());
        src.advance(skip);
        if src.is_empty() {
            return Ok(None);
        }

        let (item, consumed) = {
            let mut values = serde_json::Deserializer::from_slice(&src[..]).into_iter::<T>();
            match values.next() {
                Some(Ok(item)) => (item, values.byte_offset()),
                Some(Err(e)) if e.is_eof() => {
                    trace!("JsonStreamCodec: incomplete value ({} bytes buffered)", src.len());
                    return Ok(None);
                }
                Some(Err(e)) => return Err(RpcError::Deserialization(e)),
                None => return Ok(None),
            }
        };

        src.advance(consumed);
        Ok(Some(item))
    }
}

impl<T, U: Serialize> Encoder<U> for JsonStreamCodec<T> {
    type Error = RpcError;

    fn encode(&mut self, item: U, dst: &mut BytesMut) -> Result<(), RpcError> {
        let mut writer = dst.writer();
        serde_json::to_writer(&mut writer, &item).map_err(RpcError::Serialization)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

// ============================================================================
// Client
// ============================================================================

type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// JSON-RPC client with request/response correlation by id
pub struct JsonRpcClient {
    outbound: mpsc::UnboundedSender<RpcRequest>,
    next_id: AtomicU64,
    pending: PendingCalls,
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl JsonRpcClient {
    /// Connect to a debugger API server
    pub async fn connect(address: &str) -> Result<Self, RpcError> {
        debug!("JsonRpcClient: connecting to {}", address);
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Create a client over an established byte stream
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, writer_task) = spawn_writer(writer, JsonStreamCodec::<RpcResponse>::new());
        let (mut inbound, reader_task) = spawn_reader(reader, JsonStreamCodec::<RpcResponse>::new());

        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let pending_clone = Arc::clone(&pending);
        let closed_clone = Arc::clone(&closed);
        let dispatch_task = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                match message {
                    Ok(response) => Self::route_response(response, &pending_clone),
                    Err(e) => {
                        error!("JsonRpcClient: failed to decode reply: {}", e);
                        break;
                    }
                }
            }
            debug!("JsonRpcClient: connection closed");
            Self::cleanup_pending_requests(&pending_clone, &closed_clone);
        });

        Self {
            outbound,
            next_id: AtomicU64::new(1),
            pending,
            closed,
            tasks: vec![writer_task, reader_task, dispatch_task],
        }
    }

    fn route_response(response: RpcResponse, pending: &PendingCalls) {
        log_rpc_message!(Level::TRACE, "inbound", response.id, &response);

        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        let waiter = pending.lock().unwrap().remove(&response.id);
        match waiter {
            Some(waiter) => {
                if waiter.send(response).is_err() {
                    debug!("JsonRpcClient: caller gave up before reply arrived");
                }
            }
            None => debug!("JsonRpcClient: reply for unknown call {}", response.id),
        }
    }

    /// Drop every waiter so outstanding calls fail with `ConnectionClosed`
    fn cleanup_pending_requests(pending: &PendingCalls, closed: &AtomicBool) {
        closed.store(true, Ordering::SeqCst);
        let drained = pending.lock().unwrap().drain().count();
        if drained > 0 {
            warn!("JsonRpcClient: {} calls abandoned by closed connection", drained);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Call `method` with positional `params`
    ///
    /// Without a timeout the call waits until the debugger replies or the
    /// connection closes. A timed-out call keeps running on the debugger side.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (waiter, receiver) = oneshot::channel();

        {
            // Checked under the lock so cleanup cannot miss this entry
            let mut pending = self.pending.lock().unwrap();
            if self.is_closed() {
                return Err(RpcError::ConnectionClosed);
            }
            pending.insert(id, waiter);
        }

        let request = RpcRequest {
            method: method.to_string(),
            params,
            id,
        };
        log_rpc_message!(Level::DEBUG, "outbound", method, &request);

        if self.outbound.send(request).is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        let reply = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, receiver).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().unwrap().remove(&id);
                    return Err(RpcError::Timeout {
                        method: method.to_string(),
                        timeout,
                    });
                }
            },
            None => receiver.await,
        };
        let response = reply.map_err(|_| RpcError::ConnectionClosed)?;

        if let Some(message) = response.error {
            return Err(RpcError::Server(message));
        }
        Ok(response.result)
    }
}

impl Drop for JsonRpcClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    type ServerSide = Framed<DuplexStream, JsonStreamCodec<RpcRequest>>;

    fn connected_pair() -> (JsonRpcClient, ServerSide) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let client = JsonRpcClient::new(client_io);
        let server = Framed::new(server_io, JsonStreamCodec::<RpcRequest>::new());
        (client, server)
    }

    fn reply(id: u64, result: Value) -> RpcResponse {
        RpcResponse {
            id,
            result,
            error: None,
        }
    }

    #[test]
    fn test_decoder_handles_back_to_back_and_split_values() {
        let mut codec = JsonStreamCodec::<RpcResponse>::new();
        let mut buffer =
            BytesMut::from(&br#"{"id":1,"result":{"exited":false},"error":null}{"id":2,"res"#[..]);

        let first = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.result, json!({"exited": false}));
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(br#"ult":[],"error":"boom"}"#);
        let second = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(second.error.as_deref(), Some("boom"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut codec = JsonStreamCodec::<RpcResponse>::new();
        let mut buffer = BytesMut::from(&b"}{"[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(RpcError::Deserialization(_))
        ));
    }

    #[test]
    fn test_request_wire_shape() {
        let mut codec = JsonStreamCodec::<RpcResponse>::new();
        let mut buffer = BytesMut::new();
        codec
            .encode(
                RpcRequest {
                    method: "RPCServer.Command".to_string(),
                    params: vec![json!({"name": "continue"})],
                    id: 3,
                },
                &mut buffer,
            )
            .unwrap();

        let value: Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(
            value,
            json!({"method": "RPCServer.Command", "params": [{"name": "continue"}], "id": 3})
        );
    }

    #[tokio::test]
    async fn test_replies_are_matched_by_id() {
        let (client, mut server) = connected_pair();

        let server_task = tokio::spawn(async move {
            let first = server.next().await.unwrap().unwrap();
            let second = server.next().await.unwrap().unwrap();
            // Answer out of order
            server
                .send(reply(second.id, json!(second.method)))
                .await
                .unwrap();
            server
                .send(reply(first.id, json!(first.method)))
                .await
                .unwrap();
            server
        });

        let (a, b) = tokio::join!(
            client.call("RPCServer.State", vec![], None),
            client.call("RPCServer.ListGoroutines", vec![], None)
        );

        assert_eq!(a.unwrap(), json!("RPCServer.State"));
        assert_eq!(b.unwrap(), json!("RPCServer.ListGoroutines"));
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_string_becomes_error() {
        let (client, mut server) = connected_pair();

        tokio::spawn(async move {
            let request = server.next().await.unwrap().unwrap();
            server
                .send(RpcResponse {
                    id: request.id,
                    result: Value::Null,
                    error: Some("could not find symbol value for y".to_string()),
                })
                .await
                .unwrap();
            server
        });

        let result = client
            .call("RPCServer.EvalSymbol", vec![json!({"symbol": "y"})], None)
            .await;
        match result {
            Err(RpcError::Server(message)) => assert!(message.contains("symbol value for y")),
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let (client, _server) = connected_pair();

        let result = client
            .call("RPCServer.State", vec![], Some(Duration::from_millis(250)))
            .await;

        assert!(matches!(
            result,
            Err(RpcError::Timeout { ref method, timeout })
                if method == "RPCServer.State" && timeout == Duration::from_millis(250)
        ));
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_fails_outstanding_and_new_calls() {
        let (client, mut server) = connected_pair();

        let closer = tokio::spawn(async move {
            let _ = server.next().await;
            drop(server);
        });

        let result = client.call("RPCServer.Command", vec![], None).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        closer.await.unwrap();

        let after = client.call("RPCServer.State", vec![], None).await;
        assert!(matches!(after, Err(RpcError::ConnectionClosed)));
        assert!(client.is_closed());
    }
}
