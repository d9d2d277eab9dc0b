use anyhow::{Result, anyhow};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Global atomic ID counter for generating unique message IDs.
pub(crate) static GLOBAL_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Returns a unique incremental ID for request messages.
pub(crate) fn next_id() -> usize {
    GLOBAL_ID_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

/// Messages sent to the transport actor.
#[derive(Debug)]
pub(crate) enum TransportMessage {
    /// A request command with a response sender.
    Request(Value, oneshot::Sender<Result<TransportResponse>>),
    /// Listener for target messages with given ID.
    ListenTargetMessage(u64, oneshot::Sender<Result<TransportResponse>>),
    /// One-shot subscription to a session event such as `Page.domContentEventFired`.
    ListenEvent(EventKey, oneshot::Sender<Value>),
    /// Command to shut down the transport.
    Shutdown,
}

/// Responses produced by the transport actor.
#[derive(Debug)]
pub(crate) enum TransportResponse {
    Response(Response),
    Target(TargetMessage),
}

/// Represents a generic CDP response.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Response {
    pub(crate) id: u64,
    pub(crate) result: Value,
}

/// Represents messages sent from targets (such as received target messages).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TargetMessage {
    pub(crate) params: Value,
}

/// Session id plus event method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EventKey {
    pub(crate) session_id: String,
    pub(crate) method: String,
}

/// Where a message relayed from a target should go.
#[derive(Debug, PartialEq)]
enum Route {
    Reply(u64),
    Event(EventKey, Value),
}

fn route_target_message(target_msg: &TargetMessage) -> Option<Route> {
    let inner_str = target_msg.params.get("message")?.as_str()?;
    let inner: Value = serde_json::from_str(inner_str).ok()?;

    if let Some(id) = inner.get("id").and_then(|i| i.as_u64()) {
        return Some(Route::Reply(id));
    }

    let method = inner.get("method")?.as_str()?.to_string();
    let session_id = target_msg.params.get("sessionId")?.as_str()?.to_string();
    let params = inner.get("params").cloned().unwrap_or(Value::Null);
    Some(Route::Event(EventKey { session_id, method }, params))
}

/// A top-level reply, or the CDP error it carries instead of a result.
fn decode_reply(id: u64, reply: Value) -> Result<TransportResponse> {
    if let Some(error) = reply.get("error") {
        return Err(anyhow!("CDP error for request {}: {}", id, error));
    }
    let result = reply.get("result").cloned().unwrap_or(Value::Null);
    Ok(TransportResponse::Response(Response { id, result }))
}

/// Internal transport actor managing WebSocket communication and request-response handling.
struct TransportActor {
    pending_requests: HashMap<u64, oneshot::Sender<Result<TransportResponse>>>,
    event_listeners: HashMap<EventKey, Vec<oneshot::Sender<Value>>>,
    ws_sink: SplitSink<WsStream, Message>,
    command_rx: mpsc::Receiver<TransportMessage>,
}

impl TransportActor {
    /// Event loop handling incoming/outgoing WebSocket messages and commands.
    async fn run(mut self, mut ws_stream: SplitStream<WsStream>) {
        loop {
            tokio::select! {
                Some(msg) = ws_stream.next() => {
                    match msg {
                        Ok(Message::Text(text)) => self.handle_text(&text),
                        Err(e) => {
                            log::debug!("DevTools socket closed: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }
                Some(msg) = self.command_rx.recv() => {
                    match msg {
                        TransportMessage::Request(cmd, tx) => {
                            if let Some(id) = cmd["id"].as_u64()
                                && let Ok(text) = serde_json::to_string(&cmd) {
                                    if self.ws_sink.send(Message::Text(text)).await.is_ok() {
                                        self.pending_requests.insert(id, tx);
                                    } else {
                                        let _ = tx.send(Err(anyhow!("WebSocket send failed")));
                                    }
                                }
                        },
                        TransportMessage::ListenTargetMessage(id, tx) => {
                            self.pending_requests.insert(id, tx);
                        },
                        TransportMessage::ListenEvent(key, tx) => {
                            self.event_listeners.entry(key).or_default().push(tx);
                        },
                        TransportMessage::Shutdown => {
                            let _ = self.ws_sink.close().await;
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return;
        };
        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            if let Some(sender) = self.pending_requests.remove(&id) {
                let _ = sender.send(decode_reply(id, value));
            }
            return;
        }

        // "Target.receivedMessageFromTarget" notifications carry both replies and events.
        let Ok(target_msg) = serde_json::from_value::<TargetMessage>(value) else {
            return;
        };
        match route_target_message(&target_msg) {
            Some(Route::Reply(id)) => {
                if let Some(sender) = self.pending_requests.remove(&id) {
                    let _ = sender.send(Ok(TransportResponse::Target(target_msg)));
                }
            }
            Some(Route::Event(key, params)) => {
                if let Some(listeners) = self.event_listeners.remove(&key) {
                    for tx in listeners {
                        let _ = tx.send(params.clone());
                    }
                }
            }
            None => {}
        }
    }
}

/// Asynchronous transport interface to the Chrome DevTools Protocol over WebSocket.
#[derive(Debug)]
pub(crate) struct Transport {
    tx: mpsc::Sender<TransportMessage>,
}

impl Transport {
    /// Creates a new transport connected to the specified WebSocket URL.
    pub(crate) async fn new(ws_url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let actor = TransportActor {
                pending_requests: HashMap::new(),
                event_listeners: HashMap::new(),
                ws_sink,
                command_rx: rx,
            };
            actor.run(ws_stream).await;
        });

        Ok(Self { tx })
    }

    /// Sends a command and awaits its response.
    pub(crate) async fn send(&self, command: Value) -> Result<TransportResponse> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(TransportMessage::Request(command, tx))
            .await
            .map_err(|_| anyhow!("Transport actor dropped"))?;
        time::timeout(Duration::from_secs(10), rx)
            .await
            .map_err(|_| anyhow!("Timeout waiting for response"))?
            .map_err(|_| anyhow!("Response channel closed"))?
    }

    /// Waits for a specific target message by ID.
    pub(crate) async fn get_target_msg(&self, msg_id: usize) -> Result<TransportResponse> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(TransportMessage::ListenTargetMessage(msg_id as u64, tx))
            .await
            .map_err(|_| anyhow!("Transport actor dropped"))?;
        time::timeout(Duration::from_secs(10), rx)
            .await
            .map_err(|_| anyhow!("Timeout waiting for target message"))?
            .map_err(|_| anyhow!("Response channel closed"))?
    }

    /// Registers a one-shot listener for `method` on the given session.
    ///
    /// Register before triggering the action that fires the event, otherwise it can be missed.
    pub(crate) async fn listen_for_event(
        &self,
        session_id: &str,
        method: &str,
    ) -> Result<oneshot::Receiver<Value>> {
        let (tx, rx) = oneshot::channel();
        let key = EventKey {
            session_id: session_id.to_string(),
            method: method.to_string(),
        };
        self.tx
            .send(TransportMessage::ListenEvent(key, tx))
            .await
            .map_err(|_| anyhow!("Transport actor dropped"))?;
        Ok(rx)
    }

    /// Closes the socket and stops the actor. Pending requests fail with a closed channel.
    pub(crate) async fn shutdown(&self) {
        let _ = self.tx.send(TransportMessage::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(session: &str, inner: Value) -> TargetMessage {
        TargetMessage {
            params: json!({ "sessionId": session, "message": inner.to_string() }),
        }
    }

    #[test]
    fn replies_route_by_id() {
        let msg = wrap("S1", json!({ "id": 42, "result": {} }));
        assert_eq!(route_target_message(&msg), Some(Route::Reply(42)));
    }

    #[test]
    fn events_route_by_session_and_method() {
        let msg = wrap(
            "S1",
            json!({ "method": "Page.domContentEventFired", "params": { "timestamp": 1.5 } }),
        );
        let Some(Route::Event(key, params)) = route_target_message(&msg) else {
            panic!("expected an event route");
        };
        assert_eq!(
            key,
            EventKey {
                session_id: "S1".into(),
                method: "Page.domContentEventFired".into()
            }
        );
        assert_eq!(params["timestamp"], json!(1.5));
    }

    #[test]
    fn malformed_messages_are_ignored() {
        let msg = TargetMessage {
            params: json!({ "message": "not json" }),
        };
        assert!(route_target_message(&msg).is_none());
    }

    #[test]
    fn error_replies_fail_the_request() {
        let reply = json!({ "id": 7, "error": { "code": -32000, "message": "No target with given id found" } });
        let err = decode_reply(7, reply).unwrap_err().to_string();
        assert!(err.contains("No target with given id found"), "{err}");
    }

    #[test]
    fn result_replies_are_passed_through() {
        let reply = json!({ "id": 8, "result": { "targetId": "T1" } });
        let Ok(TransportResponse::Response(response)) = decode_reply(8, reply) else {
            panic!("expected a response");
        };
        assert_eq!(response.id, 8);
        assert_eq!(response.result["targetId"], "T1");
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = next_id();
        let b = next_id();
        assert!(b > a);
    }
}
