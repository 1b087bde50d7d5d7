//! Storage layer tests against an in-memory database.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use super::*;

async fn db_with_agent() -> (FleetDatabase, Agent) {
    let db = FleetDatabase::open_in_memory().await.unwrap();
    db.create_farm("f1", "East Hall").await.unwrap();
    let agent = db.create_agent("a1", "f1", "hash-a1").await.unwrap();
    (db, agent)
}

// =========================================================================
// Farms and agents
// =========================================================================

#[tokio::test]
async fn create_and_rename_farm() {
    let db = FleetDatabase::open_in_memory().await.unwrap();
    let farm = db.create_farm("f1", "East Hall").await.unwrap();
    assert_eq!(farm.name, "East Hall");

    let farm = db.rename_farm("f1", "West Hall").await.unwrap();
    assert_eq!(farm.name, "West Hall");

    assert!(matches!(
        db.rename_farm("missing", "X").await,
        Err(DatabaseError::NotFound(_))
    ));
}

#[tokio::test]
async fn one_agent_per_farm() {
    let (db, _) = db_with_agent().await;
    let result = db.create_agent("a2", "f1", "hash-a2").await;
    assert!(result.is_err(), "second agent for one farm must be rejected");
}

#[tokio::test]
async fn last_seen_only_moves_forward() {
    let (db, agent) = db_with_agent().await;
    assert!(agent.last_seen.is_none());

    assert!(db.record_agent_contact("a1", 1000).await.unwrap());
    assert_eq!(db.get_agent("a1").await.unwrap().last_seen, Some(1000));

    // An older timestamp must not rewind last_seen.
    assert!(db.record_agent_contact("a1", 500).await.unwrap());
    assert_eq!(db.get_agent("a1").await.unwrap().last_seen, Some(1000));

    assert!(db.record_agent_contact("a1", 2000).await.unwrap());
    assert_eq!(db.get_agent("a1").await.unwrap().last_seen, Some(2000));
}

#[tokio::test]
async fn contact_for_deleted_agent_reports_gone() {
    let (db, _) = db_with_agent().await;
    db.delete_farm("f1").await.unwrap();
    assert!(!db.record_agent_contact("a1", 1000).await.unwrap());
}

#[tokio::test]
async fn delete_farm_cascades_everything() {
    let (db, _) = db_with_agent().await;
    db.upsert_miner("a1", "AA:BB:CC:DD:EE:01", Some("10.0.0.5"), None)
        .await
        .unwrap();
    db.enqueue_command("c1", "a1", CommandKind::Scan, "{}")
        .await
        .unwrap();
    db.create_enrollment_token("t1", "f1", "tok-hash")
        .await
        .unwrap();

    assert!(db.delete_farm("f1").await.unwrap());

    assert!(matches!(
        db.get_agent("a1").await,
        Err(DatabaseError::NotFound(_))
    ));
    assert!(db.list_miners(Some("a1")).await.unwrap().is_empty());
    assert!(matches!(
        db.get_command("c1").await,
        Err(DatabaseError::NotFound(_))
    ));
    assert!(matches!(
        db.get_enrollment_token("t1").await,
        Err(DatabaseError::NotFound(_))
    ));
}

// =========================================================================
// Miners
// =========================================================================

#[tokio::test]
async fn upsert_miner_by_mac_updates_in_place() {
    let (db, _) = db_with_agent().await;

    let first = db
        .upsert_miner("a1", "AA:BB:CC:DD:EE:01", Some("10.0.0.5"), None)
        .await
        .unwrap();

    let second = db
        .upsert_miner(
            "a1",
            "AA:BB:CC:DD:EE:01",
            Some("10.0.0.9"),
            Some("M30S"),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id, "same MAC must not duplicate the row");
    assert_eq!(second.ip.as_deref(), Some("10.0.0.9"));
    assert_eq!(second.model.as_deref(), Some("M30S"));
    assert_eq!(db.count_miners("a1").await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_without_ip_keeps_existing() {
    let (db, _) = db_with_agent().await;
    db.upsert_miner("a1", "AA:BB:CC:DD:EE:01", Some("10.0.0.5"), None)
        .await
        .unwrap();

    let miner = db
        .upsert_miner("a1", "AA:BB:CC:DD:EE:01", None, None)
        .await
        .unwrap();
    assert_eq!(miner.ip.as_deref(), Some("10.0.0.5"));
}

#[tokio::test]
async fn miner_config_update_clears_empty_fields() {
    let (db, _) = db_with_agent().await;
    let miner = db
        .upsert_miner("a1", "AA:BB:CC:DD:EE:01", None, None)
        .await
        .unwrap();

    let miner = db
        .update_miner_config(
            &miner.id,
            &MinerConfigUpdate {
                worker1: Some("pool.worker.1".into()),
                password: Some("secret".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(miner.worker1.as_deref(), Some("pool.worker.1"));
    assert_eq!(miner.password.as_deref(), Some("secret"));

    // Absent fields are untouched, empty fields are cleared.
    let miner = db
        .update_miner_config(
            &miner.id,
            &MinerConfigUpdate {
                worker1: Some(String::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(miner.worker1.is_none());
    assert_eq!(miner.password.as_deref(), Some("secret"));
}

// =========================================================================
// Command queue
// =========================================================================

#[tokio::test]
async fn sequence_numbers_are_monotonic_per_agent() {
    let (db, _) = db_with_agent().await;
    db.create_farm("f2", "Other").await.unwrap();
    db.create_agent("a2", "f2", "hash-a2").await.unwrap();

    let c1 = db
        .enqueue_command("c1", "a1", CommandKind::Scan, "{}")
        .await
        .unwrap();
    let c2 = db
        .enqueue_command("c2", "a1", CommandKind::RestartMiner, "{}")
        .await
        .unwrap();
    let other = db
        .enqueue_command("c3", "a2", CommandKind::Scan, "{}")
        .await
        .unwrap();

    assert_eq!(c1.seq, 1);
    assert_eq!(c2.seq, 2);
    assert_eq!(other.seq, 1, "sequence numbers are per-agent");
    assert_eq!(c1.status, "pending");
}

#[tokio::test]
async fn claim_enforces_single_in_flight() {
    let (db, _) = db_with_agent().await;
    db.enqueue_command("c1", "a1", CommandKind::Scan, "{}")
        .await
        .unwrap();
    db.enqueue_command("c2", "a1", CommandKind::RestartMiner, "{}")
        .await
        .unwrap();

    let first = db.claim_next_deliverable("a1").await.unwrap().unwrap();
    assert_eq!(first.id, "c1");
    assert_eq!(first.status, "delivered");

    // c2 is not deliverable while c1 is in flight.
    assert!(db.claim_next_deliverable("a1").await.unwrap().is_none());

    let acked = db
        .ack_command("c1", true, Some("{}"), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(acked.status, "acked");

    let second = db.claim_next_deliverable("a1").await.unwrap().unwrap();
    assert_eq!(second.id, "c2");
}

#[tokio::test]
async fn ack_of_non_in_flight_command_is_rejected() {
    let (db, _) = db_with_agent().await;
    db.enqueue_command("c1", "a1", CommandKind::Scan, "{}")
        .await
        .unwrap();

    // Still pending, never delivered.
    assert!(db.ack_command("c1", true, None, None).await.unwrap().is_none());
}

#[tokio::test]
async fn requeue_in_flight_restores_order() {
    let (db, _) = db_with_agent().await;
    db.enqueue_command("c1", "a1", CommandKind::Scan, "{}")
        .await
        .unwrap();
    db.enqueue_command("c2", "a1", CommandKind::RestartMiner, "{}")
        .await
        .unwrap();

    db.claim_next_deliverable("a1").await.unwrap().unwrap();
    assert_eq!(db.requeue_in_flight("a1").await.unwrap(), 1);

    // The requeued command comes back before any newer one.
    let redelivered = db.claim_next_deliverable("a1").await.unwrap().unwrap();
    assert_eq!(redelivered.id, "c1");
}

#[tokio::test]
async fn overdue_commands_fail_and_unblock_queue() {
    let (db, _) = db_with_agent().await;
    db.enqueue_command("c1", "a1", CommandKind::PowerOffMiner, "{}")
        .await
        .unwrap();
    db.enqueue_command("c2", "a1", CommandKind::Scan, "{}")
        .await
        .unwrap();
    db.claim_next_deliverable("a1").await.unwrap().unwrap();

    let failed = db
        .fail_overdue_commands(fleet_core::db::unix_timestamp() + 1)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "c1");
    assert_eq!(failed[0].error.as_deref(), Some("ack timeout"));

    // Failed command stays for audit, next one becomes deliverable.
    assert_eq!(db.get_command("c1").await.unwrap().status, "failed");
    let next = db.claim_next_deliverable("a1").await.unwrap().unwrap();
    assert_eq!(next.id, "c2");

    // A late ack for the failed command is ignored.
    assert!(db.ack_command("c1", true, None, None).await.unwrap().is_none());
}

#[tokio::test]
async fn latest_scan_result_returns_newest_acked() {
    let (db, _) = db_with_agent().await;
    assert!(db.latest_scan_result("a1").await.unwrap().is_none());

    db.enqueue_command("c1", "a1", CommandKind::Scan, "{}")
        .await
        .unwrap();
    db.claim_next_deliverable("a1").await.unwrap();
    db.ack_command("c1", true, Some(r#"{"discovered":[]}"#), None)
        .await
        .unwrap();

    db.enqueue_command("c2", "a1", CommandKind::Scan, "{}")
        .await
        .unwrap();
    db.claim_next_deliverable("a1").await.unwrap();
    db.ack_command(
        "c2",
        true,
        Some(r#"{"discovered":[{"mac":"AA:BB"}]}"#),
        None,
    )
    .await
    .unwrap();

    let latest = db.latest_scan_result("a1").await.unwrap().unwrap();
    assert_eq!(latest.id, "c2");
}

// =========================================================================
// Enrollment tokens
// =========================================================================

#[tokio::test]
async fn enrollment_token_consumed_exactly_once() {
    let db = FleetDatabase::open_in_memory().await.unwrap();
    db.create_farm("f1", "East Hall").await.unwrap();
    db.create_enrollment_token("t1", "f1", "tok-hash")
        .await
        .unwrap();

    let agent = db
        .consume_enrollment_token("tok-hash", "a1", "cred-hash")
        .await
        .unwrap();
    assert!(agent.is_some());

    // Second consumption fails and creates no second agent.
    let again = db
        .consume_enrollment_token("tok-hash", "a2", "cred-hash-2")
        .await
        .unwrap();
    assert!(again.is_none());
    assert!(matches!(
        db.get_agent("a2").await,
        Err(DatabaseError::NotFound(_))
    ));

    // The consumed token is retained as an audit record.
    let token = db.get_enrollment_token("t1").await.unwrap();
    assert!(token.consumed_at.is_some());
}

#[tokio::test]
async fn consume_replaces_existing_agent() {
    let db = FleetDatabase::open_in_memory().await.unwrap();
    db.create_farm("f1", "East Hall").await.unwrap();
    db.create_agent("a1", "f1", "old-cred").await.unwrap();
    db.create_enrollment_token("t1", "f1", "tok-hash")
        .await
        .unwrap();

    let agent = db
        .consume_enrollment_token("tok-hash", "a2", "new-cred")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent.id, "a2");
    assert!(matches!(
        db.get_agent("a1").await,
        Err(DatabaseError::NotFound(_))
    ));
}
