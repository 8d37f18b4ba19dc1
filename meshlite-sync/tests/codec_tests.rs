//! Tests for the signaling line codec and message shapes.

use futures::io::Cursor;
use meshlite_sync::codec::{decode_line, encode_line, read_signal, write_signal, MAX_LINE_SIZE};
use meshlite_sync::{IceCandidate, SignalMessage};
use meshlite_types::PeerId;
use serde_json::json;

// ── Wire shape ───────────────────────────────────────────────────

#[test]
fn peer_disconnected_uses_kebab_case_tag() {
    let msg = SignalMessage::PeerDisconnected {
        id: PeerId::new("bob"),
    };
    let value: serde_json::Value = serde_json::from_str(&encode_line(&msg).unwrap()).unwrap();
    assert_eq!(value, json!({"type": "peer-disconnected", "id": "bob"}));
}

#[test]
fn candidate_fields_are_camel_case() {
    let msg = SignalMessage::Candidate {
        id: PeerId::new("bob"),
        candidate: IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        },
    };
    let value: serde_json::Value = serde_json::from_str(&encode_line(&msg).unwrap()).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "candidate",
            "id": "bob",
            "candidate": {
                "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }
        })
    );
}

#[test]
fn decodes_offer_from_rendezvous() {
    let msg = decode_line(r#"{"type":"offer","id":"alice","sdp":"v=0"}"#).unwrap();
    assert_eq!(
        msg,
        SignalMessage::Offer {
            id: PeerId::new("alice"),
            sdp: "v=0".into()
        }
    );
    assert_eq!(msg.kind(), "offer");
    assert_eq!(msg.peer_id().as_str(), "alice");
}

#[test]
fn candidate_without_optional_fields() {
    let msg = decode_line(r#"{"type":"candidate","id":"a","candidate":{"candidate":"c"}}"#).unwrap();
    assert_eq!(
        msg,
        SignalMessage::Candidate {
            id: PeerId::new("a"),
            candidate: IceCandidate::new("c"),
        }
    );
}

#[test]
fn unknown_type_is_invalid_data() {
    let err = decode_line(r#"{"type":"shout","id":"a"}"#).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn encoded_line_ends_with_newline() {
    let line = encode_line(&SignalMessage::Register {
        id: PeerId::new("a"),
    })
    .unwrap();
    assert!(line.ends_with('\n'));
    assert_eq!(line.matches('\n').count(), 1);
}

// ── Stream reading ───────────────────────────────────────────────

#[tokio::test]
async fn reads_messages_in_order_and_skips_blank_lines() {
    let mut buf = Cursor::new(Vec::new());
    write_signal(&mut buf, &SignalMessage::Register { id: PeerId::new("a") })
        .await
        .unwrap();
    let mut data = buf.into_inner();
    data.extend_from_slice(b"\n   \n");
    data.extend_from_slice(br#"{"type":"answer","id":"b","sdp":"x"}"#);

    let mut reader = Cursor::new(data);
    let first = read_signal(&mut reader).await.unwrap();
    let second = read_signal(&mut reader).await.unwrap();
    let end = read_signal(&mut reader).await.unwrap();

    assert_eq!(first, Some(SignalMessage::Register { id: PeerId::new("a") }));
    assert_eq!(
        second,
        Some(SignalMessage::Answer {
            id: PeerId::new("b"),
            sdp: "x".into()
        })
    );
    assert_eq!(end, None);
}

#[tokio::test]
async fn malformed_line_does_not_consume_the_next() {
    let data = b"not json\n{\"type\":\"register\",\"id\":\"z\"}\n".to_vec();
    let mut reader = Cursor::new(data);

    let err = read_signal(&mut reader).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

    let next = read_signal(&mut reader).await.unwrap();
    assert_eq!(next, Some(SignalMessage::Register { id: PeerId::new("z") }));
}

#[tokio::test]
async fn oversized_line_is_rejected() {
    let data = vec![b'x'; MAX_LINE_SIZE + 10];
    let mut reader = Cursor::new(data);
    let err = read_signal(&mut reader).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    assert!(err.to_string().contains("exceeds"));
}

#[tokio::test]
async fn reading_resumes_after_an_oversized_line() {
    let mut data = vec![b'x'; MAX_LINE_SIZE + 10];
    data.extend_from_slice(b"\n{\"type\":\"register\",\"id\":\"alice\"}\n");
    let mut reader = Cursor::new(data);

    let err = read_signal(&mut reader).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

    let next = read_signal(&mut reader).await.unwrap();
    assert_eq!(
        next,
        Some(SignalMessage::Register {
            id: PeerId::new("alice")
        })
    );
    assert_eq!(read_signal(&mut reader).await.unwrap(), None);
}
