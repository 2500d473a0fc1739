//! Envelope and body definitions.
//!
//! Every line on the wire is an [`Envelope`]. Its body carries the optional
//! `msg_id`/`in_reply_to` correlation header next to a [`Payload`], which is
//! tagged by the `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::ProtocolError;

/// Neighbor adjacency as sent by the harness: node id -> neighbor ids.
pub type Topology = HashMap<String, Vec<String>>;

/// A routed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<B = Body> {
    /// Sending node or client
    pub src: String,
    /// Receiving node
    pub dest: String,
    /// Message body
    pub body: B,
}

/// An envelope whose body has not been decoded yet.
///
/// The runtime reads lines into this shape first so that a body which fails
/// to decode can still be answered with an error addressed to its sender.
pub type RawEnvelope = Envelope<Value>;

/// Message body: correlation header plus typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Typed message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        node_id: String,
        node_ids: Vec<String>,
    },
    InitOk,
    Broadcast {
        message: i64,
    },
    BroadcastOk,
    Read,
    ReadOk {
        messages: Vec<i64>,
    },
    Topology {
        topology: Topology,
    },
    TopologyOk,
    Generate,
    GenerateOk {
        id: String,
    },
    Error {
        code: u32,
        text: String,
    },
    /// Any `type` this node does not know about.
    #[serde(other)]
    Unknown,
}

impl Payload {
    /// The `type` discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Init { .. } => "init",
            Payload::InitOk => "init_ok",
            Payload::Broadcast { .. } => "broadcast",
            Payload::BroadcastOk => "broadcast_ok",
            Payload::Read => "read",
            Payload::ReadOk { .. } => "read_ok",
            Payload::Topology { .. } => "topology",
            Payload::TopologyOk => "topology_ok",
            Payload::Generate => "generate",
            Payload::GenerateOk { .. } => "generate_ok",
            Payload::Error { .. } => "error",
            Payload::Unknown => "unknown",
        }
    }

    /// Build the `error` payload reported to a caller for `err`.
    pub fn error(err: &ProtocolError) -> Self {
        Payload::Error {
            code: err.code().as_u32(),
            text: err.to_string(),
        }
    }
}

impl Body {
    /// A body with no correlation header.
    pub fn new(payload: Payload) -> Self {
        Self {
            msg_id: None,
            in_reply_to: None,
            payload,
        }
    }
}

impl Envelope<Body> {
    /// Address `payload` back to the sender of this envelope.
    pub fn reply(&self, payload: Payload) -> Envelope<Body> {
        Envelope {
            src: self.dest.clone(),
            dest: self.src.clone(),
            body: Body {
                msg_id: None,
                in_reply_to: self.body.msg_id,
                payload,
            },
        }
    }
}

impl RawEnvelope {
    /// `msg_id` of the undecoded body, if present and numeric.
    pub fn msg_id(&self) -> Option<u64> {
        self.body.get("msg_id").and_then(Value::as_u64)
    }

    /// `in_reply_to` of the undecoded body, if present and numeric.
    pub fn in_reply_to(&self) -> Option<u64> {
        self.body.get("in_reply_to").and_then(Value::as_u64)
    }

    /// Decode the body into its typed form.
    pub fn decode(self) -> Result<Envelope<Body>, ProtocolError> {
        let kind = self
            .body
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);

        let body: Body =
            serde_json::from_value(self.body).map_err(|e| ProtocolError::MalformedRequest {
                reason: match kind {
                    Some(kind) => format!("{} body: {}", kind, e),
                    None => e.to_string(),
                },
            })?;

        Ok(Envelope {
            src: self.src,
            dest: self.dest,
            body,
        })
    }

    /// Reply to an envelope whose body could not be decoded.
    pub fn reply_error(&self, err: &ProtocolError) -> Envelope<Body> {
        Envelope {
            src: self.dest.clone(),
            dest: self.src.clone(),
            body: Body {
                msg_id: None,
                in_reply_to: self.msg_id(),
                payload: Payload::error(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(body: Value) -> RawEnvelope {
        Envelope {
            src: "c1".to_string(),
            dest: "n1".to_string(),
            body,
        }
    }

    #[test]
    fn test_decode_broadcast() {
        let envelope = raw(json!({"type": "broadcast", "message": 42, "msg_id": 7}))
            .decode()
            .unwrap();

        assert_eq!(envelope.body.msg_id, Some(7));
        assert_eq!(envelope.body.payload, Payload::Broadcast { message: 42 });
    }

    #[test]
    fn test_decode_topology() {
        let envelope = raw(json!({
            "type": "topology",
            "msg_id": 1,
            "topology": {"n1": ["n2", "n3"], "n2": ["n1"]}
        }))
        .decode()
        .unwrap();

        match envelope.body.payload {
            Payload::Topology { topology } => {
                assert_eq!(topology["n1"], vec!["n2".to_string(), "n3".to_string()]);
                assert_eq!(topology.len(), 2);
            }
            other => panic!("Expected topology, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type() {
        let envelope = raw(json!({"type": "cas", "msg_id": 3, "key": 1}))
            .decode()
            .unwrap();
        assert_eq!(envelope.body.payload, Payload::Unknown);
    }

    #[test]
    fn test_decode_malformed_body() {
        let raw = raw(json!({"type": "broadcast", "message": "five", "msg_id": 9}));
        assert_eq!(raw.msg_id(), Some(9));

        let err = raw.clone().decode().unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedRequest { .. }));

        let reply = raw.reply_error(&err);
        assert_eq!(reply.dest, "c1");
        assert_eq!(reply.body.in_reply_to, Some(9));
        match reply.body.payload {
            Payload::Error { code, .. } => assert_eq!(code, 12),
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_wire_shape() {
        let request = raw(json!({"type": "read", "msg_id": 4})).decode().unwrap();
        let reply = request.reply(Payload::ReadOk {
            messages: vec![5, 7],
        });

        let encoded = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            encoded,
            json!({
                "src": "n1",
                "dest": "c1",
                "body": {"type": "read_ok", "in_reply_to": 4, "messages": [5, 7]}
            })
        );
    }

    #[test]
    fn test_unit_payload_omits_header() {
        let encoded = serde_json::to_value(Body::new(Payload::BroadcastOk)).unwrap();
        assert_eq!(encoded, json!({"type": "broadcast_ok"}));
    }
}
