mod common;

use anyhow::Context as _;
use common::{open_as, ScriptedProbe};
use continuity_application::TrackedError;
use continuity_core::action::{ActionFilter, ActionStatus};
use continuity_core::session::SessionStatus;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_at_most_one_active_session() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(ScriptedProbe::default());
    let orchestrator = open_as(temp.path(), 1001, &probe);

    for _ in 0..3 {
        let s = orchestrator.start().unwrap();
        assert!(orchestrator.start().unwrap_err().is_state());
        let active = orchestrator
            .session_history(100)
            .unwrap()
            .into_iter()
            .filter(|session| session.status == SessionStatus::Active)
            .count();
        assert_eq!(active, 1);
        orchestrator.end(&s, Some("ok")).unwrap();
    }

    assert!(!temp.path().join("session.lock").exists());
    assert_eq!(orchestrator.session_history(2).unwrap().len(), 2);
}

#[test]
fn test_set_twice_returns_latest() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(ScriptedProbe::default());
    let orchestrator = open_as(temp.path(), 1001, &probe);
    let s = orchestrator.start().unwrap();

    orchestrator.set_context(&s, "ns", "key", json!("v1")).unwrap();
    orchestrator.set_context(&s, "ns", "key", json!("v2")).unwrap();
    assert_eq!(orchestrator.get_context(&s, "ns", "key").unwrap(), Some(json!("v2")));

    // A fresh process sees the committed value.
    orchestrator.end(&s, None).unwrap();
    drop(orchestrator);
    let reopened = open_as(temp.path(), 1002, &probe);
    assert_eq!(reopened.get_context(&s, "ns", "key").unwrap(), Some(json!("v2")));
}

#[test]
fn test_failing_tracked_work_is_recorded_and_surfaced() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(ScriptedProbe::default());
    let orchestrator = open_as(temp.path(), 1001, &probe);
    let s = orchestrator.start().unwrap();

    let compile = |params: &Value| -> anyhow::Result<Value> {
        std::fs::read_to_string("/definitely/not/here")
            .with_context(|| format!("reading {}", params["file"]))?;
        Ok(Value::Null)
    };
    let err = orchestrator
        .execute_tracked(&s, "Compile", json!({"file": "main.rs"}), compile)
        .unwrap_err();

    let TrackedError::Work { action_id, source } = err else {
        panic!("expected a recorded work failure");
    };
    assert!(source.to_string().starts_with("reading"));
    assert!(source.downcast_ref::<std::io::Error>().is_some());

    let action = orchestrator.action(&action_id).unwrap();
    assert_eq!(action.status, ActionStatus::Failed);
    let info = action.result.unwrap();
    assert_eq!(info["error"], json!(source.to_string()));
    assert_eq!(info["chain"].as_array().unwrap().len(), 1);
}

#[test]
fn test_tracked_work_success_and_listing() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(ScriptedProbe::default());
    let orchestrator = open_as(temp.path(), 1001, &probe);
    let s = orchestrator.start().unwrap();

    let (len, first) = orchestrator
        .execute_tracked(&s, "Measure", json!({"text": "hello"}), |params| {
            Ok(params["text"].as_str().map(str::len).unwrap_or(0))
        })
        .unwrap();
    assert_eq!(len, 5);
    let second = orchestrator.record_intent(&s, "Upload", Value::Null).unwrap();

    let all = orchestrator.list_actions(&s, &ActionFilter::new()).unwrap();
    assert_eq!(
        all.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
        vec![second.as_str(), first.as_str()]
    );
    let measured = orchestrator
        .list_actions(&s, &ActionFilter::new().with_type("Measure"))
        .unwrap();
    assert_eq!(measured[0].result, Some(json!(5)));

    let info = orchestrator.session_info(&s).unwrap();
    assert_eq!(info.action_count, 2);
    assert_eq!(info.pending_action_count, 1);

    orchestrator.cancel(&s, &second, "no longer needed").unwrap();
    let stats = orchestrator.action_stats(&s).unwrap();
    assert_eq!(stats.count(ActionStatus::Failed), 1);
    assert_eq!(stats.count(ActionStatus::Completed), 1);
}

#[test]
fn test_transfer_between_sessions() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(ScriptedProbe::default());
    let orchestrator = open_as(temp.path(), 1001, &probe);

    let old = orchestrator.start().unwrap();
    orchestrator.set_context(&old, "prefs", "theme", json!("dark")).unwrap();
    orchestrator.end(&old, None).unwrap();

    let new = orchestrator.start().unwrap();
    assert_eq!(orchestrator.transfer_context(&old, &new, Some("prefs")).unwrap(), 1);
    assert_eq!(
        orchestrator.get_context(&new, "prefs", "theme").unwrap(),
        Some(json!("dark"))
    );
    assert!(orchestrator.transfer_context(&new, &old, None).unwrap_err().is_state());
}

#[test]
fn test_config_export_import_round_trip() {
    let temp = TempDir::new().unwrap();
    let probe = Arc::new(ScriptedProbe::default());
    let orchestrator = open_as(temp.path(), 1001, &probe);
    let config = orchestrator.config();

    config
        .set("ui.theme", json!("dark"), None, Some("Colour scheme"))
        .unwrap();
    let path = orchestrator.paths().exports_dir().join("config.toml");
    let exported = config.export_toml(&path).unwrap();

    config.set("ui.theme", json!("light"), None, None).unwrap();
    assert_eq!(config.import_toml(&path).unwrap(), exported);
    assert_eq!(config.get_string("ui.theme", "").unwrap(), "dark");
}
