//! End-to-end tests over a real coordination file

mod common;

use agentcomm_core::{
    CommsError, CommunicationsFile, CoordinationDocument, StatusUpdate, TaskAgent,
};
use common::TestWorkspace;
use serde_json::json;

#[tokio::test]
async fn test_fresh_file_is_default_document() {
    let ws = TestWorkspace::new();
    let comms = ws.open();

    let doc = comms.read_raw().await.unwrap();
    assert_eq!(doc.meta.version, "1.0");
    assert!(doc.agents.is_empty());

    // Initialization is persisted, not just returned
    assert!(ws.path.exists());
    assert_eq!(ws.raw_json()["meta"]["version"], "1.0");
}

#[tokio::test]
async fn test_status_round_trip() {
    let ws = TestWorkspace::new();
    let comms = ws.open();

    comms
        .update_agent("a", StatusUpdate::new("M", "W"))
        .await
        .unwrap();

    let status = comms.get_agent("a").await.unwrap().unwrap().status.unwrap();
    assert_eq!(status.mission, "M");
    assert_eq!(status.working_on, "W");

    let raw = ws.raw_json();
    assert_eq!(raw["a"]["status"]["mission"], "M");
    assert_eq!(raw["a"]["status"]["workingOn"], "W");
}

#[tokio::test]
async fn test_request_then_completion_scenario() {
    let ws = TestWorkspace::new();
    let comms = ws.open();

    comms.read_raw().await.unwrap();
    comms
        .add_request("agent_a", "agent_b", "Please do X")
        .await
        .unwrap();

    let pending = comms.get_requests_for_agent("agent_b").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].from_agent, "agent_a");
    assert_eq!(pending[0].request, "Please do X");

    let outcome = comms
        .complete_request("agent_b", "agent_a", "Please do X", "X done")
        .await
        .unwrap();
    assert!(outcome.matched);
    assert_eq!(outcome.request_id, pending[0].id);

    assert!(comms
        .get_requests_for_agent("agent_b")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(ws.raw_json()["agent_a"]["added"], json!([["agent_b", "X done"]]));
}

#[tokio::test]
async fn test_requests_keep_insertion_order() {
    let ws = TestWorkspace::new();
    let comms = ws.open();

    comms.add_request("a", "b", "X").await.unwrap();
    comms.add_request("c", "b", "Y").await.unwrap();
    comms.add_request("a", "b", "Z").await.unwrap();

    let texts: Vec<String> = comms
        .get_requests_for_agent("b")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.request)
        .collect();
    assert_eq!(texts, vec!["X", "Y", "Z"]);
}

#[tokio::test]
async fn test_reset_always_yields_default() {
    let ws = TestWorkspace::new();
    let comms = ws.open();

    comms.add_request("a", "b", "X").await.unwrap();
    comms
        .update_agent("b", StatusUpdate::new("m", "w"))
        .await
        .unwrap();

    comms.reset().await.unwrap();
    assert_eq!(comms.read_raw().await.unwrap(), CoordinationDocument::default());

    comms.reset().await.unwrap();
    assert_eq!(comms.read_raw().await.unwrap(), CoordinationDocument::default());
}

#[tokio::test]
async fn test_concurrent_requests_from_one_process() {
    let ws = TestWorkspace::new();
    let comms = ws.open();
    let n = 20;

    let mut handles = Vec::new();
    for i in 0..n {
        // Independent handles on the same path share the write queue
        let handle = ws.open();
        handles.push(tokio::spawn(async move {
            handle
                .add_request(&format!("sender{}", i), "target", &format!("job {}", i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let pending = comms.get_requests_for_agent("target").await.unwrap();
    assert_eq!(pending.len(), n);
    assert_eq!(comms.read_raw().await.unwrap().meta.revision, n as u64);
}

#[tokio::test]
async fn test_legacy_document_is_readable() {
    let ws = TestWorkspace::new();
    ws.write_raw(
        r#"{
            "meta": {"version": "1.0"},
            "coder": {
                "status": {"mission": "Ship", "workingOn": "Auth", "updatedAt": 0},
                "requests": [{"fromAgent": "lead", "request": "Add login", "createdAt": 0}],
                "added": [["reviewer", "LGTM"]]
            }
        }"#,
    );
    let comms = ws.open();

    let record = comms.get_agent("coder").await.unwrap().unwrap();
    assert_eq!(record.requests[0].id, None);
    assert_eq!(record.deliveries[0].completed_at, None);

    let outcome = comms
        .complete_request("coder", "lead", "Add login", "Login added")
        .await
        .unwrap();
    assert!(outcome.matched);
    assert_eq!(outcome.request_id, None);
}

#[tokio::test]
async fn test_malformed_document_is_not_overwritten() {
    let ws = TestWorkspace::new();
    ws.write_raw("{\"meta\": ");
    let comms = ws.open();

    let err = comms.add_request("a", "b", "X").await.unwrap_err();
    assert!(matches!(err, CommsError::Parse(_)));
    assert_eq!(std::fs::read_to_string(&ws.path).unwrap(), "{\"meta\": ");
}

#[tokio::test]
async fn test_unknown_schema_version_rejected() {
    let ws = TestWorkspace::new();
    ws.write_raw(r#"{"meta": {"version": "2.0"}}"#);

    let err = ws.open().read_raw().await.unwrap_err();
    assert!(matches!(err, CommsError::Parse(_)));
}

#[tokio::test]
async fn test_agents_collaborate_through_coordinator() {
    let ws = TestWorkspace::new();
    let coordinator = ws.started_coordinator().await;

    let researcher = coordinator
        .create_agent(TaskAgent::new, "researcher")
        .await
        .unwrap();
    let coder = coordinator
        .create_agent(TaskAgent::new, "coder")
        .await
        .unwrap();

    researcher
        .report_status("Design auth", "Collecting requirements")
        .await
        .unwrap();
    let id = researcher
        .request("coder", "Implement auth API")
        .await
        .unwrap();

    let pending = coder.get_pending_requests().await.unwrap();
    assert_eq!(pending[0].id, Some(id));

    let outcome = coder
        .complete_request_by_id("researcher", id, "Auth API implemented")
        .await
        .unwrap();
    assert!(outcome.matched);

    let deliveries = researcher.get_my_deliveries().await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].from_agent, "coder");
    assert_eq!(deliveries[0].description, "Auth API implemented");

    let others = coder.other_agents().await.unwrap();
    assert!(others.contains_key("researcher"));

    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_second_process_view_sees_writes() {
    let ws = TestWorkspace::new();
    let first = ws.open();
    let second = CommunicationsFile::open(ws.dir.path().join("./communications.json"));

    assert_eq!(first.store_key(), second.store_key());

    first.add_request("a", "b", "X").await.unwrap();
    let pending = second.get_requests_for_agent("b").await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_coordinators_share_one_file() {
    let ws = TestWorkspace::new();
    let left = ws.started_coordinator().await;
    let right = ws.started_coordinator().await;

    let lead = left.create_agent(TaskAgent::new, "lead").await.unwrap();
    let worker = right.create_agent(TaskAgent::new, "worker").await.unwrap();

    lead.request("worker", "Write docs").await.unwrap();
    let pending = worker.get_pending_requests().await.unwrap();
    worker
        .complete_request(&pending[0].from_agent, &pending[0].request, "Docs written")
        .await
        .unwrap();

    assert_eq!(lead.get_my_deliveries().await.unwrap()[0].description, "Docs written");

    left.stop().await.unwrap();
    right.stop().await.unwrap();
}
