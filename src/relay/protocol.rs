//! Relay wire protocol
//!
//! MessagePack-framed messages over the WebSocket channel. Heads are
//! hex-encoded change hashes; update payloads are opaque CRDT bytes.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Messages exchanged between a client and the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// First frame from a client after the upgrade.
    Hello {
        client_id: String,
        /// Heads the client already has (reconciliation basis)
        heads: Vec<String>,
    },

    /// Relay's answer to Hello.
    HelloAck { peer_count: usize },

    /// Ask the other side for changes missing relative to `heads`.
    SyncRequest { heads: Vec<String> },

    /// Changes the requester was missing. Empty when already caught up.
    SyncResponse { changes: Vec<Vec<u8>> },

    /// Incremental change broadcast. `origin` is the producing client id,
    /// used to suppress echo of a client's own updates.
    Update { origin: String, payload: Vec<u8> },

    /// Room membership changed.
    PeerCount { count: usize },
}

pub fn encode(msg: &RelayMessage) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec(msg)
}

/// Decode a frame; malformed frames are logged and dropped here so they
/// never propagate into the document.
pub fn decode(bytes: &[u8]) -> Option<RelayMessage> {
    match rmp_serde::from_slice(bytes) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(error = %e, bytes = bytes.len(), "dropping malformed relay frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_variants() {
        let messages = vec![
            RelayMessage::Hello {
                client_id: "client-1".into(),
                heads: vec!["deadbeef".into()],
            },
            RelayMessage::HelloAck { peer_count: 3 },
            RelayMessage::SyncRequest { heads: vec![] },
            RelayMessage::SyncResponse {
                changes: vec![vec![1, 2, 3], vec![4, 5]],
            },
            RelayMessage::Update {
                origin: "client-2".into(),
                payload: vec![9, 9, 9],
            },
            RelayMessage::PeerCount { count: 2 },
        ];
        for msg in messages {
            let encoded = encode(&msg).unwrap();
            let decoded = decode(&encoded).expect("decodes");
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn garbage_is_dropped() {
        assert!(decode(b"not msgpack at all \xff\xff").is_none());
        assert!(decode(&[]).is_none());
    }
}
