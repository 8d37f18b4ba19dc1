use meshlite_sync::mock::{ScriptedReply, ScriptedTransport};
use meshlite_sync::{ChannelTransport, PeerMessage, QuorumGate, SyncError, Tally, Vote};
use meshlite_types::PeerId;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn peers(names: &[&str]) -> Vec<PeerId> {
    names.iter().map(|n| PeerId::new(*n)).collect()
}

fn accept() -> ScriptedReply {
    ScriptedReply::Reply(PeerMessage::Accept)
}

fn reject(reason: &str) -> ScriptedReply {
    ScriptedReply::Reply(PeerMessage::Reject {
        reason: reason.into(),
    })
}

fn gate(transport: &ScriptedTransport) -> QuorumGate {
    QuorumGate::new(Arc::new(transport.clone()), Duration::from_millis(200))
}

fn propose(statement: &str) -> PeerMessage {
    PeerMessage::Propose {
        statement: statement.into(),
    }
}

// ── Tally ────────────────────────────────────────────────────────

#[test]
fn strict_majority_is_required() {
    let tally = |acks: usize, total: usize| Tally {
        votes: (0..total)
            .map(|i| {
                let vote = if i < acks { Vote::Accepted } else { Vote::TimedOut };
                (PeerId::new(format!("p{i}")), vote)
            })
            .collect(),
    };

    assert!(!tally(0, 0).has_quorum());
    assert!(tally(1, 1).has_quorum());
    assert!(!tally(1, 2).has_quorum());
    assert!(tally(2, 3).has_quorum());
    assert!(!tally(2, 4).has_quorum());
    assert!(tally(3, 4).has_quorum());
    assert_eq!(tally(0, 4).required(), 3);
    assert_eq!(tally(0, 0).required(), 1);
}

// ── Gate ─────────────────────────────────────────────────────────

#[tokio::test]
async fn two_of_three_commits() {
    let transport = ScriptedTransport::new();
    transport
        .script("a", accept())
        .script("b", accept())
        .script("c", reject("busy"));

    let commit = gate(&transport)
        .propose_and_commit(&peers(&["a", "b", "c"]), propose("INSERT"), |msg| async move {
            assert_eq!(msg, propose("INSERT"));
            Ok(42)
        })
        .await
        .unwrap();

    assert_eq!(commit.value, 42);
    assert_eq!(commit.tally.acks(), 2);
    assert_eq!(
        commit.tally.vote_of(&PeerId::new("c")),
        Some(&Vote::Rejected("busy".into()))
    );
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn one_of_three_is_refused_without_committing() {
    let transport = ScriptedTransport::new();
    transport
        .script("a", accept())
        .script("b", reject("no"))
        .script("c", ScriptedReply::Unreachable);

    let committed = Arc::new(AtomicBool::new(false));
    let flag = committed.clone();
    let result = gate(&transport)
        .propose_and_commit(&peers(&["a", "b", "c"]), propose("x"), |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(matches!(
        result,
        Err(SyncError::NoQuorum {
            acks: 1,
            required: 2,
            total: 3
        })
    ));
    assert!(!committed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn zero_peers_never_commit() {
    let transport = ScriptedTransport::new();
    let result = gate(&transport)
        .propose_and_commit(&[], propose("x"), |_| async { Ok(()) })
        .await;
    assert!(matches!(
        result,
        Err(SyncError::NoQuorum {
            acks: 0,
            required: 1,
            total: 0
        })
    ));
}

#[tokio::test]
async fn unscripted_peer_counts_as_unreachable() {
    let transport = ScriptedTransport::new();
    transport.script("a", accept());

    let tally = gate(&transport)
        .collect(&peers(&["a", "ghost"]), &propose("x"))
        .await;
    assert!(matches!(
        tally.vote_of(&PeerId::new("ghost")),
        Some(Vote::Unreachable(_))
    ));
    assert!(!tally.has_quorum());
}

#[tokio::test]
async fn unexpected_reply_counts_as_rejection() {
    let transport = ScriptedTransport::new();
    transport.script("a", ScriptedReply::Reply(PeerMessage::LogRequest));

    let tally = gate(&transport).collect(&peers(&["a"]), &propose("x")).await;
    assert_eq!(tally.acks(), 0);
    assert!(matches!(tally.vote_of(&PeerId::new("a")), Some(Vote::Rejected(_))));
}

#[tokio::test(start_paused = true)]
async fn silent_peers_time_out() {
    let transport = ScriptedTransport::new();
    transport
        .script("a", accept())
        .script("b", ScriptedReply::Hang)
        .script("c", ScriptedReply::Hang);

    let tally = gate(&transport)
        .collect(&peers(&["a", "b", "c"]), &propose("x"))
        .await;
    assert_eq!(tally.acks(), 1);
    assert_eq!(tally.vote_of(&PeerId::new("b")), Some(&Vote::TimedOut));
    assert_eq!(tally.vote_of(&PeerId::new("c")), Some(&Vote::TimedOut));
}

#[tokio::test(start_paused = true)]
async fn one_silent_peer_does_not_block_a_majority() {
    let transport = ScriptedTransport::new();
    transport
        .script("a", accept())
        .script("b", accept())
        .script("c", ScriptedReply::Hang);

    let commit = gate(&transport)
        .propose_and_commit(&peers(&["a", "b", "c"]), propose("x"), |_| async { Ok("done") })
        .await
        .unwrap();
    assert_eq!(commit.value, "done");
    assert_eq!(commit.tally.vote_of(&PeerId::new("c")), Some(&Vote::TimedOut));
}

#[tokio::test]
async fn commit_callback_error_is_returned() {
    let transport = ScriptedTransport::new();
    transport.script("a", accept());

    let result: Result<_, _> = gate(&transport)
        .propose_and_commit(&peers(&["a"]), propose("x"), |_| async {
            Err::<(), _>(SyncError::Protocol("apply failed".into()))
        })
        .await;
    assert!(matches!(result, Err(SyncError::Protocol(_))));
}

#[tokio::test(start_paused = true)]
async fn request_with_timeout_maps_to_timeout() {
    let transport = ScriptedTransport::new();
    transport.script("a", ScriptedReply::Hang);

    let result = transport
        .request_with_timeout(&PeerId::new("a"), propose("x"), Duration::from_secs(1))
        .await;
    assert!(matches!(result, Err(SyncError::Timeout)));
}
