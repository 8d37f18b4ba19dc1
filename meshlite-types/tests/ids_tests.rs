use meshlite_types::PeerId;
use std::collections::HashSet;
use std::str::FromStr;

// ── PeerId ────────────────────────────────────────────────────────

#[test]
fn peer_id_random_is_unique() {
    let ids: HashSet<PeerId> = (0..100).map(|_| PeerId::random()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn peer_id_display_matches_input() {
    let id = PeerId::new("alice");
    assert_eq!(id.to_string(), "alice");
    assert_eq!(id.as_str(), "alice");
}

#[test]
fn peer_id_from_str() {
    let id = PeerId::from_str("bob").unwrap();
    assert_eq!(id, PeerId::from("bob"));
}

#[test]
fn peer_id_parse_rejects_blank() {
    assert!(PeerId::parse("").is_err());
    assert!(PeerId::parse("   ").is_err());
}

#[test]
fn peer_id_serializes_transparently() {
    let id = PeerId::new("carol");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"carol\"");
    let back: PeerId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn peer_id_ordering_is_lexicographic() {
    let mut ids = vec![PeerId::new("c"), PeerId::new("a"), PeerId::new("b")];
    ids.sort();
    assert_eq!(ids, vec![PeerId::new("a"), PeerId::new("b"), PeerId::new("c")]);
}
