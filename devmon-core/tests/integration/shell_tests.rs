//! Interactive shell sessions over an in-memory channel

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use devmon_core::session::PromptStep;
use devmon_core::transport::ShellTransport;
use devmon_core::{
    AuthStrategy, Credentials, DeviceConfig, DeviceParameters, ErrorClassification, Executor,
    FieldValue, Operation, Poller, PreparedTransport, SessionManager, ShellInput, Transport,
};
use secrecy::SecretString;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const PROFILE: &str = r#"
    [target]
    transport = "shell"
    address = "192.0.2.9"

    [credentials]
    username = "monitor"

    [auth]
    strategy = "prompt"
    [[auth.steps]]
    expect = "login: $"
    [[auth.steps]]
    send = "${username}"
    expect = "Password: $"
    [[auth.steps]]
    send = "${password}"
    expect = "sw01# $"
    reject = "Login incorrect"

    [probe]
    name = "version"
    target = { kind = "shell", lines = ["show version"], terminator = "sw01# $" }

    [discover.operation]
    name = "interfaces"
    target = { kind = "shell", lines = ["show interfaces"], terminator = "sw01# $" }

    [discover.normalize]
    format = "columns"
    pattern = '^(?P<name>\S+)\s+(?P<state>up|down)\s+(?P<rx>\d+)'
    skip_header = 1
    [[discover.normalize.fields]]
    name = "name"
    required = true
    [[discover.normalize.fields]]
    name = "state"
    [[discover.normalize.fields]]
    name = "rx"
    kind = "number"

    [[readings]]
    label = "Peak rx"
    source = { from = "max", field = "rx" }

    [table]
    id = "interfaces"
    key = "name"
    columns = ["name", "state", "rx"]
"#;

/// Switch console: prompt login, two show commands and a menu that never
/// reaches the requested screen. Wrong passwords are refused.
async fn console(mut device: DuplexStream) {
    let mut buf = [0u8; 256];
    let mut pending = String::new();
    let _ = device.write_all(b"\r\nlogin: ").await;

    let mut awaiting = "username";
    loop {
        let n = match device.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.push_str(&String::from_utf8_lossy(&buf[..n]));

        while let Some(end) = pending.find("\r\n") {
            let line: String = pending.drain(..end + 2).collect();
            let reply: &[u8] = match (awaiting, line.trim_end()) {
                ("username", _) => {
                    awaiting = "password";
                    b"Password: "
                }
                ("password", "s3cret") => {
                    awaiting = "command";
                    b"\r\nsw01# "
                }
                ("password", _) => {
                    awaiting = "username";
                    b"\r\nLogin incorrect\r\nlogin: "
                }
                (_, "show version") => b"Switch OS 7.1\r\nsw01# ",
                (_, "show interfaces") => {
                    b"Port   State  Rx\r\neth0   up     1200\r\neth1   down   0\r\neth2   up     987\r\nsw01# "
                }
                _ => b"\x1b[2J MAIN MENU\r\n 1) Status\r\n 2) Logs\r\n",
            };
            if device.write_all(reply).await.is_err() {
                return;
            }
        }
    }
}

fn shell_device() -> Arc<dyn Transport> {
    let (ours, device) = tokio::io::duplex(4096);
    tokio::spawn(console(device));
    Arc::new(ShellTransport::from_stream(ours, false))
}

fn poller(password: &str) -> Poller {
    poller_for(PROFILE, password)
}

fn poller_for(profile: &str, password: &str) -> Poller {
    let config = DeviceConfig::from_toml(profile, Path::new("sw01.toml")).unwrap();
    config.validate().unwrap();
    let params = DeviceParameters::new("192.0.2.9", "monitor", SecretString::from(password));
    Poller::new(
        config.name.clone(),
        Arc::new(PreparedTransport::new(shell_device())),
        Arc::new(
            config
                .profile(&params)
                .with_timeout(Duration::from_secs(2)),
        ),
        params.credentials(),
    )
}

#[tokio::test]
async fn validate_reports_shell_prompt() {
    let validation = poller("s3cret").validate().await.unwrap();
    assert_eq!(validation.device, "sw01");
    assert_eq!(validation.strategy, "prompt");
    assert_eq!(validation.prompt.as_deref(), Some("sw01#"));
}

#[tokio::test]
async fn poll_parses_interface_columns() {
    let report = poller("s3cret").poll().await.unwrap();

    let table = &report.tables[0];
    assert_eq!(table.len(), 3);
    let eth1 = table.row("eth1").unwrap();
    assert_eq!(eth1.values[1], FieldValue::Text("down".into()));
    assert_eq!(eth1.values[2], FieldValue::Number(0.0));
    assert_eq!(report.readings[0].value, FieldValue::Number(1200.0));
}

#[tokio::test]
async fn wrong_password_is_an_authentication_error() {
    let err = poller("guess").poll().await.unwrap_err();
    assert_eq!(err.classification, ErrorClassification::AuthenticationError);
}

#[tokio::test]
async fn exhausted_menu_navigation_is_generic() {
    let transport = shell_device();
    let strategy = AuthStrategy::Prompt {
        steps: vec![
            PromptStep {
                send: None,
                expect: "login: $".into(),
                reject: None,
            },
            PromptStep {
                send: Some("${username}".into()),
                expect: "Password: $".into(),
                reject: None,
            },
            PromptStep {
                send: Some("${password}".into()),
                expect: "sw01# $".into(),
                reject: Some("Login incorrect".into()),
            },
        ],
    };
    let sessions = Arc::new(SessionManager::new(
        strategy,
        Credentials::new("monitor", SecretString::from("s3cret")),
    ));
    sessions.login(transport.as_ref()).await.unwrap();
    let executor = Executor::new(transport, sessions);

    let menu = ShellInput::command("4", r"\[STATUS\]").with_menu_attempts(3);
    let op = Operation::shell("status screen", menu).with_timeout(Duration::from_millis(600));
    let err = executor.run_one(&op).await.unwrap_err();

    assert_eq!(err.classification, ErrorClassification::GenericError);
}

#[tokio::test]
async fn poll_fails_when_menu_never_reaches_screen() {
    let interfaces = r#"target = { kind = "shell", lines = ["show interfaces"], terminator = "sw01# $" }"#;
    let menu = r#"target = { kind = "shell", lines = ["4"], terminator = '\[STATUS\]', menu_attempts = 3 }"#;
    assert!(PROFILE.contains(interfaces));
    let profile = PROFILE.replace(interfaces, menu);

    let err = poller_for(&profile, "s3cret").poll().await.unwrap_err();

    assert_eq!(err.classification, ErrorClassification::GenericError);
}
