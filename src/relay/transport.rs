//! Relay WebSocket client
//!
//! Maintains a connection to the relay for one household room. On drop it
//! reconnects with exponential backoff plus jitter, bounded at a maximum
//! delay. A rejected credential is terminal for the session: the task
//! reports it and stops instead of retrying.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{self, RelayMessage};

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 30_000;

/// Events surfaced to the sync coordinator.
#[derive(Debug)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected,
    Message(RelayMessage),
    /// Terminal: the relay rejected our credential.
    AuthRejected(String),
}

/// Handle to the running transport task.
pub struct TransportHandle {
    pub outbound: mpsc::UnboundedSender<RelayMessage>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    pub fn send(&self, msg: RelayMessage) {
        let _ = self.outbound.send(msg);
    }

    /// Tear the connection down; no further reconnect attempts.
    pub fn disconnect(&self) {
        self.task.abort();
    }
}

/// Start the transport for `url`, presenting `token` as the bearer
/// credential on every attempt.
pub fn connect(
    url: String,
    token: String,
    events: mpsc::Sender<TransportEvent>,
) -> TransportHandle {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(url, token, out_rx, events));
    TransportHandle {
        outbound: out_tx,
        task,
    }
}

async fn run(
    url: String,
    token: String,
    mut outbound: mpsc::UnboundedReceiver<RelayMessage>,
    events: mpsc::Sender<TransportEvent>,
) {
    let target = format!("{url}?token={token}");
    let mut attempt: u32 = 0;
    loop {
        if events.send(TransportEvent::Connecting).await.is_err() {
            return;
        }
        match connect_async(target.as_str()).await {
            Ok((socket, _response)) => {
                attempt = 0;
                info!(url = %url, "connected to relay");
                if events.send(TransportEvent::Connected).await.is_err() {
                    return;
                }
                drive(socket, &mut outbound, &events).await;
                if events.send(TransportEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(tungstenite::Error::Http(response))
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                let reason = format!("relay rejected credentials ({})", response.status());
                warn!(url = %url, "{reason}");
                let _ = events.send(TransportEvent::AuthRejected(reason)).await;
                return;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "relay connection failed");
                let _ = events.send(TransportEvent::Disconnected).await;
            }
        }
        attempt += 1;
        let delay = backoff_delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::time::sleep(delay).await;
    }
}

async fn drive(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound: &mut mpsc::UnboundedReceiver<RelayMessage>,
    events: &mpsc::Sender<TransportEvent>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                match protocol::encode(&msg) {
                    Ok(bytes) => {
                        if sink.send(WsMessage::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode outbound frame"),
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        if let Some(msg) = protocol::decode(&bytes) {
                            if events.send(TransportEvent::Message(msg)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "relay socket error");
                        break;
                    }
                }
            }
        }
    }
}

/// Exponential backoff capped at [`BACKOFF_MAX_MS`], with up to 50%
/// additive random jitter.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(7).saturating_sub(1));
    let capped = exp.min(BACKOFF_MAX_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 2);
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_bounded() {
        for _ in 0..50 {
            let first = backoff_delay(1).as_millis() as u64;
            assert!((BACKOFF_BASE_MS..=BACKOFF_BASE_MS + BACKOFF_BASE_MS / 2).contains(&first));

            let late = backoff_delay(20).as_millis() as u64;
            assert!(late <= BACKOFF_MAX_MS + BACKOFF_MAX_MS / 2);
            assert!(late >= BACKOFF_MAX_MS / 2);
        }
    }

    #[test]
    fn backoff_is_monotonic_in_expectation() {
        // Compare the deterministic component across attempts.
        let floor = |attempt: u32| {
            BACKOFF_BASE_MS
                .saturating_mul(1u64 << attempt.min(7).saturating_sub(1))
                .min(BACKOFF_MAX_MS)
        };
        assert!(floor(1) < floor(2));
        assert!(floor(2) < floor(4));
        assert_eq!(floor(7), floor(20));
    }
}
