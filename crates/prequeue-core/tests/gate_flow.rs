//! End-to-end admission gate flows: real scripts through `LocalNode`,
//! scripted behaviors through `FakeNode`.

use prequeue_core::fakes::{FakeNode, LaunchBehavior};
use prequeue_core::{
    AdmissionGate, AdmissionOutcome, GateConfig, Interpreter, LocalNode, Node, ProbeDefinition,
    WorkItem, MSG_NODE_OFFLINE, MSG_PREREQUISITES_NOT_MET,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn shell_item(id: u64, script: &str) -> WorkItem {
    WorkItem::new(id).with_probe(ProbeDefinition::new(script, Interpreter::PosixShell))
}

async fn poll_until_terminal(
    gate: &AdmissionGate,
    item: &WorkItem,
    node: &Arc<dyn Node>,
) -> AdmissionOutcome {
    for _ in 0..1000 {
        match gate.can_admit(item, node) {
            Some(AdmissionOutcome::Pending) => tokio::time::sleep(Duration::from_millis(5)).await,
            Some(outcome) => return outcome,
            None => panic!("expected an admission check"),
        }
    }
    panic!("admission check never resolved");
}

/// Test: item #42 on "agent-1" with `exit 0` goes Pending, Pending, Allowed,
/// and the entry is removed after consumption.
#[tokio::test]
#[cfg(unix)]
async fn test_exit_zero_sequence_pending_then_allowed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig::default());
    let node: Arc<dyn Node> = Arc::new(LocalNode::new("agent-1", dir.path()));
    let item = shell_item(42, "exit 0");

    assert_eq!(
        gate.can_admit(&item, &node),
        Some(AdmissionOutcome::Pending),
        "first poll submits and answers Pending"
    );
    assert_eq!(
        gate.can_admit(&item, &node),
        Some(AdmissionOutcome::Pending),
        "immediate re-poll is still Pending"
    );

    let outcome = poll_until_terminal(&gate, &item, &node).await;
    assert_eq!(outcome, AdmissionOutcome::Allowed);
    assert_eq!(gate.in_flight_len(), 0, "entry removed after consumption");
}

/// Test: item #42 on "agent-1" with `exit 1` resolves to Blocked with the
/// fixed prerequisites-not-met reason.
#[tokio::test]
#[cfg(unix)]
async fn test_exit_one_blocks_with_fixed_reason() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig::default());
    let node: Arc<dyn Node> = Arc::new(LocalNode::new("agent-1", dir.path()));
    let item = shell_item(42, "exit 1");

    assert_eq!(
        gate.can_admit(&item, &node),
        Some(AdmissionOutcome::Pending)
    );
    let outcome = poll_until_terminal(&gate, &item, &node).await;
    assert_eq!(
        outcome,
        AdmissionOutcome::Blocked {
            reason: MSG_PREREQUISITES_NOT_MET.to_string(),
            node: "agent-1".to_string(),
        }
    );
}

/// Test: no probe configured means no objection on the first call and no
/// probe is ever launched.
#[tokio::test]
async fn test_no_probe_is_no_objection() {
    let gate = AdmissionGate::new(GateConfig::default());
    let fake = Arc::new(FakeNode::offline("agent-1"));
    let node: Arc<dyn Node> = fake.clone();
    let item = WorkItem::new(1);

    assert_eq!(gate.can_admit(&item, &node), None);
    assert_eq!(gate.can_admit(&item, &node), None);
    assert_eq!(gate.in_flight_len(), 0);
    assert_eq!(fake.launch_count(), 0);
}

/// Test: an offline node ("agent-2", no root path) blocks with the offline
/// reason and zero process launches.
#[tokio::test]
async fn test_offline_node_blocks_without_launch() {
    let gate = AdmissionGate::new(GateConfig::default());
    let fake = Arc::new(FakeNode::offline("agent-2"));
    let node: Arc<dyn Node> = fake.clone();
    let item = shell_item(42, "exit 0");

    let outcome = poll_until_terminal(&gate, &item, &node).await;
    assert_eq!(
        outcome,
        AdmissionOutcome::Blocked {
            reason: MSG_NODE_OFFLINE.to_string(),
            node: "agent-2".to_string(),
        }
    );
    assert_eq!(fake.launch_count(), 0);
}

/// Test: repeated polls before resolution schedule exactly one probe
/// execution, and the poll after the terminal outcome starts a brand-new
/// probe.
#[tokio::test]
async fn test_dedup_one_probe_per_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig::default());
    let fake = Arc::new(FakeNode::online(
        "agent-1",
        dir.path(),
        LaunchBehavior::ExitAfter {
            code: 0,
            delay: Duration::from_millis(500),
        },
    ));
    let node: Arc<dyn Node> = fake.clone();
    let item = shell_item(42, "exit 0");

    for _ in 0..10 {
        assert_eq!(
            gate.can_admit(&item, &node),
            Some(AdmissionOutcome::Pending),
            "polls before resolution are all Pending"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(gate.in_flight_len(), 1);

    let outcome = poll_until_terminal(&gate, &item, &node).await;
    assert_eq!(outcome, AdmissionOutcome::Allowed);
    assert_eq!(fake.launch_count(), 1, "exactly one probe execution");

    // Same pair again: fresh cycle, fresh probe.
    assert_eq!(
        gate.can_admit(&item, &node),
        Some(AdmissionOutcome::Pending)
    );
    poll_until_terminal(&gate, &item, &node).await;
    assert_eq!(fake.launch_count(), 2);
}

/// Test: a probe running past the configured timeout resolves to Blocked
/// within a bounded wall-clock time, not Pending forever.
#[tokio::test]
#[cfg(unix)]
async fn test_timeout_resolves_to_blocked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig {
        probe_timeout: Duration::from_millis(200),
    });
    let node: Arc<dyn Node> = Arc::new(LocalNode::new("agent-1", dir.path()));
    let item = shell_item(42, "sleep 30");

    let started = Instant::now();
    let outcome = poll_until_terminal(&gate, &item, &node).await;
    assert_eq!(
        outcome,
        AdmissionOutcome::Blocked {
            reason: MSG_PREREQUISITES_NOT_MET.to_string(),
            node: "agent-1".to_string(),
        }
    );
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "resolution bounded by timeout plus scheduling overhead"
    );
}

/// Test: a node reporting a launch timeout blocks with the fixed
/// prerequisites-not-met reason, independent of platform scripting.
#[tokio::test]
async fn test_reported_timeout_blocks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig::default());
    let node: Arc<dyn Node> = Arc::new(FakeNode::online(
        "agent-1",
        dir.path(),
        LaunchBehavior::TimeOut,
    ));
    let item = shell_item(42, "exit 0");

    let outcome = poll_until_terminal(&gate, &item, &node).await;
    assert_eq!(
        outcome,
        AdmissionOutcome::Blocked {
            reason: MSG_PREREQUISITES_NOT_MET.to_string(),
            node: "agent-1".to_string(),
        }
    );
}

/// Test: a spawn failure resolves to CheckFailed carrying the error text,
/// and the map entry is cleaned up.
#[tokio::test]
async fn test_spawn_failure_is_check_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig::default());
    let node: Arc<dyn Node> = Arc::new(FakeNode::online(
        "agent-1",
        dir.path(),
        LaunchBehavior::SpawnError("interpreter not found".to_string()),
    ));
    let item = shell_item(42, "exit 0");

    let outcome = poll_until_terminal(&gate, &item, &node).await;
    match outcome {
        AdmissionOutcome::CheckFailed { message } => {
            assert!(message.starts_with("failed to check job prerequisites:"));
            assert!(message.contains("interpreter not found"));
        }
        other => panic!("expected CheckFailed, got {other:?}"),
    }
    assert_eq!(gate.in_flight_len(), 0, "no permanent leak");
}

/// Test: a probe task that panics still resolves the pair to CheckFailed
/// and releases the key.
#[tokio::test]
async fn test_panicking_probe_task_is_cleaned_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig::default());
    let node: Arc<dyn Node> = Arc::new(FakeNode::online(
        "agent-1",
        dir.path(),
        LaunchBehavior::Panic,
    ));
    let item = shell_item(42, "exit 0");

    let outcome = poll_until_terminal(&gate, &item, &node).await;
    assert!(matches!(outcome, AdmissionOutcome::CheckFailed { .. }));
    assert_eq!(gate.in_flight_len(), 0);

    // The key is free again for a fresh cycle.
    assert_eq!(
        gate.can_admit(&item, &node),
        Some(AdmissionOutcome::Pending)
    );
}

/// Test: build parameters reach the probe through the PARAMS variable.
#[tokio::test]
#[cfg(unix)]
async fn test_params_drive_the_decision() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig::default());
    let node: Arc<dyn Node> = Arc::new(LocalNode::new("agent-1", dir.path()));

    let item = WorkItem::new(42)
        .with_param("branch", "main")
        .with_probe(ProbeDefinition::new(
            r#"case "$PARAMS" in *branch=main*) exit 0;; *) exit 1;; esac"#,
            Interpreter::PosixShell,
        ));

    let outcome = poll_until_terminal(&gate, &item, &node).await;
    assert_eq!(outcome, AdmissionOutcome::Allowed);
}

/// Test: checks for different items on the same node run independently.
#[tokio::test]
#[cfg(unix)]
async fn test_items_are_independent_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = AdmissionGate::new(GateConfig::default());
    let node: Arc<dyn Node> = Arc::new(LocalNode::new("agent-1", dir.path()));

    let passing = shell_item(1, "exit 0");
    let failing = shell_item(2, "exit 1");

    gate.can_admit(&passing, &node);
    gate.can_admit(&failing, &node);
    assert_eq!(gate.in_flight_len(), 2);

    assert_eq!(
        poll_until_terminal(&gate, &passing, &node).await,
        AdmissionOutcome::Allowed
    );
    assert!(matches!(
        poll_until_terminal(&gate, &failing, &node).await,
        AdmissionOutcome::Blocked { .. }
    ));
    assert_eq!(gate.in_flight_len(), 0);
}
