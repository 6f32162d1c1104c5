//! Notification Fan-Out (C10): broadcasts change events to every connected WebSocket client.
//! MQTT publication of the same events is handled separately by the MQTT Controller (C11); a
//! failure in one sink never blocks the other or the polling loop that produced the event.

use crate::polling::ChangeEvent;
use axum::extract::ws::{Message, WebSocket};
use tokio::sync::broadcast;
use tracing::{trace, warn};

#[derive(Clone)]
pub struct Broadcaster {
    source: broadcast::Sender<ChangeEvent>,
}

impl Broadcaster {
    pub fn new(source: broadcast::Sender<ChangeEvent>) -> Self {
        Self { source }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.source.subscribe()
    }

    /// Drives a single WebSocket connection: forwards every change event as a JSON text frame
    /// until the client disconnects or a send fails, at which point this client is dropped and
    /// every other subscriber keeps receiving broadcasts undisturbed.
    pub async fn serve(&self, mut socket: WebSocket) {
        let mut events = self.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(message = "websocket client lagged behind change events", skipped);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    };
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(message = "could not serialize change event", error = %e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        trace!("websocket client disconnected");
                        return;
                    }
                }
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Err(_)) => return,
                        _ => {}
                    }
                }
            }
        }
    }
}
