//! End-to-end runs of the orchestrator against in-memory fakes

mod common;

use coach_runner::converge::{Action, ConvergeState};
use coach_runner::gate::GateDecision;
use coach_runner::state::{CredentialStore, RunRecordStore};
use coach_runner::{OperatorOptions, OrchestratorError};
use coach_types::{credentials_in, Credentials, RunRecord, ServiceRole};
use common::{bridge_id, broker_id, engine_id, FakeCheck, Harness};
use serde_json::{json, Map};
use std::sync::atomic::Ordering;
use tempfile::TempDir;

fn carried(harness: &Harness, role: ServiceRole) -> Vec<Credentials> {
    let id = harness.config.service_id(role).clone();
    credentials_in(role, &harness.control_plane.options(&id))
}

fn active_credentials(harness: &Harness) -> Credentials {
    CredentialStore::new(harness.config.credentials_path())
        .load()
        .unwrap()
        .broker
        .active
        .unwrap()
}

#[tokio::test]
async fn test_fresh_stack_is_installed_and_owned() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());

    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.gate, GateDecision::Fresh);
    for role in [
        ServiceRole::Broker,
        ServiceRole::Bridge,
        ServiceRole::AutomationEngine,
    ] {
        let report = summary.report(role).unwrap();
        assert_eq!(report.state, ConvergeState::RunningVerified, "{role}");
        assert_eq!(report.count(Action::Install), 1);
        assert_eq!(report.count(Action::SetConfiguration), 1);
        assert_eq!(report.count(Action::Restart), 1);
        assert!(!report.pre_existing);
    }

    let creds = active_credentials(&harness);
    assert!(creds.username.starts_with("coach_"));
    for role in [
        ServiceRole::Broker,
        ServiceRole::Bridge,
        ServiceRole::AutomationEngine,
    ] {
        assert_eq!(carried(&harness, role), vec![creds.clone()], "{role}");
    }

    let engine = harness.control_plane.service(&engine_id()).unwrap();
    assert_eq!(engine.state, "started");
    assert_eq!(engine.boot.as_deref(), Some("auto"));
    assert_eq!(engine.watchdog, Some(true));
    assert!(!engine.options["init_commands"].as_array().unwrap().is_empty());
    assert_eq!(engine.options["platform_default"], true);

    assert_eq!(harness.deployer.submissions.load(Ordering::SeqCst), 1);
    assert!(summary.deploy.unwrap().submitted());

    let record = RunRecordStore::new(harness.config.run_record_path())
        .load()
        .unwrap()
        .unwrap();
    assert!(record.managed);
    assert_eq!(record.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_second_run_issues_no_mutating_calls() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    let orchestrator = harness.orchestrator(OperatorOptions::default());

    orchestrator.run().await.unwrap();
    let after_first = harness.control_plane.mutating_calls();
    let creds = active_credentials(&harness);

    let summary = orchestrator.run().await.unwrap();
    assert_eq!(summary.gate, GateDecision::Managed);
    assert_eq!(summary.mutating_calls(), 0);
    assert_eq!(harness.control_plane.mutating_calls(), after_first);
    assert_eq!(harness.deployer.submissions.load(Ordering::SeqCst), 1);
    assert!(!summary.deploy.unwrap().submitted());
    assert!(summary.warnings.is_empty());
    assert_eq!(active_credentials(&harness), creds);
}

#[tokio::test]
async fn test_pre_existing_engine_without_override_halts_before_mutation() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    let mut user_flows_config = Map::new();
    user_flows_config.insert("credential_secret".into(), json!("users-own-secret"));
    harness
        .control_plane
        .install_existing(&engine_id(), user_flows_config.clone(), true);

    let err = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::OwnershipConflict { .. }));
    assert!(err.remediation().contains("confirm_nodered_takeover"));
    assert_eq!(harness.control_plane.mutating_calls(), 0);
    assert_eq!(harness.deployer.submissions.load(Ordering::SeqCst), 0);
    assert_eq!(harness.control_plane.options(&engine_id()), user_flows_config);
    assert!(harness.control_plane.service(&broker_id()).is_none());
    assert!(RunRecordStore::new(harness.config.run_record_path())
        .load()
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_takeover_override_records_ownership() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness
        .control_plane
        .install_existing(&engine_id(), Map::new(), true);

    let options = OperatorOptions {
        confirm_nodered_takeover: true,
        ..Default::default()
    };
    let summary = harness.orchestrator(options).run().await.unwrap();
    assert_eq!(summary.gate, GateDecision::TakeoverConfirmed);
    let engine = summary.report(ServiceRole::AutomationEngine).unwrap();
    assert!(engine.pre_existing);
    assert_eq!(engine.count(Action::Install), 0);

    let record = RunRecordStore::new(harness.config.run_record_path())
        .load()
        .unwrap()
        .unwrap();
    assert!(record.managed);

    // the override is no longer needed once coach owns the engine
    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();
    assert_eq!(summary.gate, GateDecision::Managed);
}

#[tokio::test]
async fn test_unmanaged_record_still_halts() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness
        .control_plane
        .install_existing(&engine_id(), Map::new(), true);
    RunRecordStore::new(harness.config.run_record_path())
        .save(&RunRecord {
            managed: false,
            ..RunRecord::managed_now("0.0.1")
        })
        .unwrap();

    let err = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::OwnershipConflict { .. }));
    assert_eq!(harness.control_plane.mutating_calls(), 0);
}

#[tokio::test]
async fn test_bridge_install_failure_degrades_to_warning() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.control_plane.fail_install(&bridge_id());

    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();

    let bridge = summary.report(ServiceRole::Bridge).unwrap();
    assert!(matches!(bridge.state, ConvergeState::Failed(_)));
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("No space left on device")));
    assert_eq!(
        summary.report(ServiceRole::AutomationEngine).unwrap().state,
        ConvergeState::RunningVerified
    );
    assert!(summary.record.unwrap().managed);
}

#[tokio::test]
async fn test_bridge_that_never_starts_is_a_warning() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.control_plane.never_start(&bridge_id());

    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();

    let bridge = summary.report(ServiceRole::Bridge).unwrap();
    assert_eq!(bridge.state, ConvergeState::RunningUnverified);
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("CAN traffic will not reach the broker")));
}

#[tokio::test]
async fn test_broker_readiness_timeout_aborts_run() {
    let dir = TempDir::new().unwrap();
    let mut harness = Harness::new(dir.path());
    harness.broker_check = FakeCheck::never("mqtt://core-mosquitto:1883");

    let err = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Timeout { attempts: 3, .. }));
    assert_eq!(harness.broker_check.probes.load(Ordering::SeqCst), 3);
    assert!(harness
        .control_plane
        .mutating_calls_for(&bridge_id())
        .is_empty());
    assert!(harness
        .control_plane
        .mutating_calls_for(&engine_id())
        .is_empty());
}

#[tokio::test]
async fn test_engine_readiness_timeout_aborts_before_deploy() {
    let dir = TempDir::new().unwrap();
    let mut harness = Harness::new(dir.path());
    harness.engine_check = FakeCheck::never("http://a0d7b954-nodered:1880");

    let err = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Timeout { .. }));
    assert_eq!(harness.deployer.submissions.load(Ordering::SeqCst), 0);

    // the engine was installed by this run, so ownership is already recorded
    let record = RunRecordStore::new(harness.config.run_record_path())
        .load()
        .unwrap()
        .unwrap();
    assert!(record.managed);
}

#[tokio::test]
async fn test_rerun_after_engine_timeout_resumes_without_override() {
    let dir = TempDir::new().unwrap();
    let mut harness = Harness::new(dir.path());
    harness.engine_check = FakeCheck::never("http://a0d7b954-nodered:1880");
    harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap_err();

    harness.engine_check = FakeCheck::ready("http://a0d7b954-nodered:1880");
    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.gate, GateDecision::Managed);
    assert!(summary.deploy.as_ref().unwrap().submitted());
    assert_eq!(
        summary.report(ServiceRole::AutomationEngine).unwrap().state,
        ConvergeState::RunningVerified
    );
}

#[tokio::test]
async fn test_engine_drift_failure_on_fresh_install_still_records_ownership() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.control_plane.fail_configuration(&engine_id());

    let err = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ConfigDriftUnresolved { .. }));

    harness.control_plane.clear_failures();
    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();
    assert_eq!(summary.gate, GateDecision::Managed);
}

#[tokio::test]
async fn test_bridge_configuration_failure_on_fresh_run_is_a_warning() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.control_plane.fail_configuration(&bridge_id());

    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();

    let bridge = summary.report(ServiceRole::Bridge).unwrap();
    assert!(matches!(bridge.state, ConvergeState::Failed(_)));
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("does not carry the broker credentials")));
    assert!(!summary.credentials_rotated);
    assert!(summary.record.unwrap().managed);

    // the next run is not mistaken for a foreign engine
    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();
    assert_eq!(summary.gate, GateDecision::Managed);

    harness.control_plane.clear_failures();
    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();
    assert!(summary.warnings.is_empty());
    assert_eq!(
        carried(&harness, ServiceRole::Bridge),
        vec![active_credentials(&harness)]
    );
}

#[tokio::test]
async fn test_unreachable_bridge_degrades_to_warning() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.control_plane.set_service_unreachable(&bridge_id());

    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();

    let bridge = summary.report(ServiceRole::Bridge).unwrap();
    assert!(matches!(bridge.state, ConvergeState::Failed(_)));
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("connection refused")));
    assert!(harness
        .control_plane
        .mutating_calls_for(&bridge_id())
        .is_empty());
    assert_eq!(
        summary.report(ServiceRole::AutomationEngine).unwrap().state,
        ConvergeState::RunningVerified
    );
    assert!(summary.record.unwrap().managed);
}

#[tokio::test]
async fn test_operator_broker_logins_are_kept() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    let zigbee = json!({"username": "zigbee2mqtt", "password": "z2m-secret"});
    let mut broker_options = Map::new();
    broker_options.insert("logins".into(), json!([zigbee.clone()]));
    harness
        .control_plane
        .install_existing(&broker_id(), broker_options, true);

    harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();
    let first = active_credentials(&harness);
    let logins = harness.control_plane.options(&broker_id())["logins"].clone();
    assert_eq!(logins.as_array().unwrap().len(), 2);
    assert!(logins.as_array().unwrap().contains(&zigbee));

    // a rotation swaps only coach's own login
    harness
        .orchestrator(OperatorOptions::default())
        .rotate_credentials(true)
        .run()
        .await
        .unwrap();
    let rotated = active_credentials(&harness);
    let pairs = carried(&harness, ServiceRole::Broker);
    assert!(pairs.contains(&Credentials::new("zigbee2mqtt", "z2m-secret")));
    assert!(pairs.contains(&rotated));
    assert!(!pairs.contains(&first));
    assert_eq!(pairs.len(), 2);
}

#[tokio::test]
async fn test_unreachable_control_plane_is_fatal() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.control_plane.set_unreachable(true);

    let err = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Unreachable { .. }));
}

#[tokio::test]
async fn test_rotation_reaches_every_consumer() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();
    let old = active_credentials(&harness);

    let summary = harness
        .orchestrator(OperatorOptions::default())
        .rotate_credentials(true)
        .run()
        .await
        .unwrap();
    assert!(summary.credentials_rotated);

    let stored = CredentialStore::new(harness.config.credentials_path())
        .load()
        .unwrap();
    assert!(stored.broker.pending.is_none());
    let new = stored.broker.active.unwrap();
    assert_ne!(new, old);

    for role in [
        ServiceRole::Broker,
        ServiceRole::Bridge,
        ServiceRole::AutomationEngine,
    ] {
        let pairs = carried(&harness, role);
        assert!(pairs.contains(&new), "{role} lacks the new pair");
        assert!(!pairs.contains(&old), "{role} still holds the old pair");
    }
    assert_eq!(harness.deployer.submissions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_partial_rotation_stays_pending() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();
    let old = active_credentials(&harness);

    harness.control_plane.fail_configuration(&bridge_id());
    let summary = harness
        .orchestrator(OperatorOptions::default())
        .rotate_credentials(true)
        .run()
        .await
        .unwrap();

    assert!(!summary.credentials_rotated);
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("rotation stays pending")));

    let stored = CredentialStore::new(harness.config.credentials_path())
        .load()
        .unwrap();
    assert_eq!(stored.broker.active, Some(old.clone()));
    let pending = stored.broker.pending.clone().unwrap();
    assert_eq!(carried(&harness, ServiceRole::Bridge), vec![old]);

    // once the bridge accepts options again the same rotation completes
    harness.control_plane.clear_failures();
    let summary = harness
        .orchestrator(OperatorOptions::default())
        .run()
        .await
        .unwrap();
    assert!(summary.credentials_rotated);
    let stored = CredentialStore::new(harness.config.credentials_path())
        .load()
        .unwrap();
    assert_eq!(stored.broker.active, Some(pending));
    assert!(stored.broker.pending.is_none());
}

#[tokio::test]
async fn test_operator_supplied_credentials_are_propagated() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    let options = OperatorOptions {
        mqtt_user: Some("rv_owner".into()),
        mqtt_pass: Some("correct-horse".into()),
        ..Default::default()
    };

    harness.orchestrator(options).run().await.unwrap();

    let expected = Credentials::new("rv_owner", "correct-horse");
    assert_eq!(active_credentials(&harness), expected);
    assert_eq!(carried(&harness, ServiceRole::Bridge), vec![expected]);
}
