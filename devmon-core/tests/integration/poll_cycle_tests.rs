//! Polling cycles over a scripted HTTP device

use std::path::Path;
use std::sync::Arc;

use devmon_core::normalize::TEXT_SENTINEL;
use devmon_core::{
    Backoff, ClassifiedError, DeviceConfig, DeviceParameters, ErrorClassification, Executor,
    FieldValue, HttpRequest, MemorySink, Operation, Poller, PreparedTransport, RawResult,
    SessionManager, SuccessPredicate, Transport, TransportError,
};
use secrecy::SecretString;

use super::{ScriptedDevice, ok_json, path_of};

const PROFILE: &str = r#"
    name = "lab-fw"

    [target]
    transport = "http"
    address = "192.0.2.7"

    [credentials]
    username = "monitor"

    [auth]
    strategy = "single_call"
    extractor = { kind = "json_pointer", pointer = "/token" }
    [auth.request]
    name = "login"
    target = { kind = "http", method = "POST", path = "/api/login", body = '{"user":"${username}","pass":"${password}"}' }

    [probe]
    name = "system"
    target = { kind = "http", path = "/api/system" }

    [discover.operation]
    name = "items"
    target = { kind = "http", path = "/api/items" }

    [discover.normalize]
    format = "json"
    items = "items"
    [[discover.normalize.fields]]
    name = "id"
    required = true
    [[discover.normalize.fields]]
    name = "status"

    [[readings]]
    label = "Item count"
    source = { from = "count" }

    [table]
    id = "items"
    key = "id"
    columns = ["id", "status"]
"#;

fn parameters() -> DeviceParameters {
    DeviceParameters::new("192.0.2.7", "monitor", SecretString::from("s3cret"))
}

fn poller(device: &Arc<ScriptedDevice>) -> Poller {
    let config = DeviceConfig::from_toml(PROFILE, Path::new("lab-fw.toml")).unwrap();
    config.validate().unwrap();
    let params = parameters();
    let transport: Arc<dyn Transport> = device.clone();
    Poller::new(
        config.name.clone(),
        Arc::new(PreparedTransport::new(transport)),
        Arc::new(config.profile(&params)),
        params.credentials(),
    )
}

fn healthy_device(login_status: u16) -> Arc<ScriptedDevice> {
    ScriptedDevice::new(move |op| match path_of(op).as_str() {
        "/api/login" => Ok(RawResult::from_body(r#"{"token":"tok-1"}"#).with_status(login_status)),
        "/api/system" => ok_json(r#"{"model":"fw-100"}"#),
        "/api/items" => ok_json(r#"{"items":[{"id":"a","status":"ok"},{"id":"b"}]}"#),
        other => panic!("unexpected request {other}"),
    })
}

#[tokio::test]
async fn poll_defaults_missing_optional_field() {
    let device = healthy_device(200);
    let report = poller(&device).poll().await.unwrap();

    let table = &report.tables[0];
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.row("a").unwrap().values[1],
        FieldValue::Text("ok".into())
    );
    assert_eq!(
        table.row("b").unwrap().values[1],
        FieldValue::Text(TEXT_SENTINEL.into())
    );
    assert_eq!(report.readings[0].value, FieldValue::Number(2.0));
}

#[tokio::test]
async fn poll_logs_in_exactly_once() {
    let device = healthy_device(200);
    poller(&device).poll().await.unwrap();

    assert_eq!(device.count("/api/login"), 1);
    assert_eq!(device.paths(), vec!["/api/login", "/api/items"]);
}

#[tokio::test]
async fn rejected_login_reports_nothing() {
    let device = healthy_device(401);
    let mut sink = MemorySink::new();

    let err = poller(&device).poll_into(&mut sink).await.unwrap_err();

    assert_eq!(err.classification, ErrorClassification::AuthenticationError);
    assert_eq!(sink.record_count(), 0);
    assert_eq!(device.count("/api/items"), 0);
}

#[tokio::test]
async fn validate_runs_probe_after_login() {
    let device = healthy_device(200);
    let validation = poller(&device).validate().await.unwrap();

    assert_eq!(validation.device, "lab-fw");
    assert_eq!(validation.strategy, "single_call");
    assert_eq!(device.paths(), vec!["/api/login", "/api/system"]);
}

async fn stateless_executor(device: &Arc<ScriptedDevice>) -> Executor {
    let sessions = Arc::new(SessionManager::new(
        devmon_core::AuthStrategy::Stateless,
        parameters().credentials(),
    ));
    sessions.login(device.as_ref()).await.unwrap();
    let transport: Arc<dyn Transport> = device.clone();
    Executor::new(transport, sessions)
}

#[tokio::test]
async fn failing_predicate_uses_retries_plus_one_attempts() {
    let device = ScriptedDevice::new(|_| ok_json("BUSY"));
    let executor = stateless_executor(&device).await;

    let op = Operation::http("state", HttpRequest::get("/state"))
        .with_retries(3)
        .with_backoff(Backoff::Fixed(5))
        .with_predicate(SuccessPredicate::OutputMatches("READY".into()));
    let err = executor.run_one(&op).await.unwrap_err();

    assert_eq!(device.count("/state"), 4);
    assert_eq!(err.classification, ErrorClassification::GenericError);
}

#[tokio::test]
async fn fan_out_returns_one_outcome_per_operation() {
    let device = ScriptedDevice::new(|op| {
        let path = path_of(op);
        if path.ends_with("/3") || path.ends_with("/5") {
            Ok(RawResult::from_body("").with_status(503))
        } else {
            ok_json(&format!(r#"{{"path":"{path}"}}"#))
        }
    });
    let executor = stateless_executor(&device).await.with_concurrency(3);

    let ops: Vec<Operation> = (0..7)
        .map(|i| Operation::http(format!("item{i}"), HttpRequest::get(format!("/item/{i}"))))
        .collect();
    let outcomes = executor.run_batch(ops).await;

    assert_eq!(outcomes.len(), 7);
    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Ok(raw) => assert!(raw.body.contains(&format!("/item/{i}"))),
            Err(e) => {
                assert!(i == 3 || i == 5, "unexpected failure at {i}");
                assert_eq!(e.classification, ErrorClassification::ResourceUnavailable);
            }
        }
    }
    assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 2);
}

#[tokio::test]
async fn chain_root_failure_stops_the_chain() {
    let device = ScriptedDevice::new(|op| match path_of(op).as_str() {
        "/root" => Err(TransportError::Unreachable("192.0.2.7".into())),
        _ => ok_json("{}"),
    });
    let executor = stateless_executor(&device).await;

    let steps: Vec<devmon_core::ChainStep> = vec![Box::new(|_: &RawResult| {
        Ok::<_, ClassifiedError>(Operation::http("child", HttpRequest::get("/child")))
    })];
    let err = executor
        .run_chain(&Operation::http("root", HttpRequest::get("/root")), steps)
        .await
        .unwrap_err();

    assert_eq!(err.classification, ErrorClassification::ResourceUnavailable);
    assert_eq!(device.paths(), vec!["/root"]);
}
