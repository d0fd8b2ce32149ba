//! Integration tests for the application wiring.
//!
//! Runs the full stack from a TOML config: embedded TCP broker,
//! in-process workers, boards and components.

use digs_app::{DigsApp, DigsConfig};
use digs_runtime::{Connector, InProcessLauncher, LocalBroker, SimHardware, WorkerMode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
[broker]
host = "127.0.0.1"
port = 0

[worker]
mode = "in_process"
ready_timeout_ms = 2000
retry_interval_ms = 10
max_retries = 2

[boards.desk]
name = "Desk Lamp"
port = "COM4"

[[boards.desk.components]]
class = "led"
id = "lamp"

[boards.porch]

[[boards.porch.components]]
class = "motion-sensor"

[[boards.porch.components]]
class = "relay"
"#;

#[tokio::test]
async fn embedded_broker_runs_configured_boards() {
    let config = DigsConfig::from_toml(CONFIG).unwrap();
    assert_eq!(config.worker.mode, WorkerMode::InProcess);

    let app = DigsApp::builder(config).build().await.unwrap();
    assert_ne!(app.config().broker.port, 0);

    let report = app.start().await;
    assert!(report.all_started(), "failed: {:?}", report.failed);
    assert_eq!(report.started, vec!["desk-lamp", "porch"]);

    let desk = app.registry().get("desk-lamp").unwrap();
    assert_eq!(desk.port().as_deref(), Some("COM4"));
    let lamp = desk.get_component("lamp").unwrap();
    assert_eq!(lamp.call("on", vec![]).await.unwrap(), json!({"on": true, "brightness": 255}));

    // MotionSensor is not a simulated class; the relay still comes up.
    let porch = app.registry().get("porch").unwrap();
    let classes: Vec<_> = porch
        .components()
        .iter()
        .map(|c| c.component_class().to_string())
        .collect();
    assert_eq!(classes, vec!["Relay"]);

    let snapshots = app.registry().snapshots();
    let json = serde_json::to_value(&snapshots).unwrap();
    assert_eq!(json[0]["id"], "desk-lamp");
    assert_eq!(json[0]["components"][0]["componentClass"], "Led");

    app.shutdown().await;
}

#[tokio::test]
async fn injected_connector_skips_embedded_broker() {
    let broker = LocalBroker::new();
    let mut config = DigsConfig::from_toml(CONFIG).unwrap();
    config.broker.port = 1;

    let app = DigsApp::builder(config)
        .with_connector(Arc::new(broker.clone()) as Arc<dyn Connector>)
        .build()
        .await
        .unwrap();
    assert_eq!(app.config().broker.port, 1);

    app.run_until(async {}).await;
    assert!(broker.client_ids().is_empty());
}

#[tokio::test]
async fn shutdown_during_start_up_cancels_boards() {
    let broker = LocalBroker::new();
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let slow = SimHardware::new().with_open_delay(Duration::from_secs(30));
    let launcher = InProcessLauncher::new(Arc::clone(&connector), Arc::new(slow))
        .with_ready_timeout(Duration::from_secs(60));
    let mut config = DigsConfig::from_toml(CONFIG).unwrap();
    config.worker.ready_timeout_ms = 60_000;

    let app = DigsApp::builder(config)
        .with_connector(connector)
        .with_launcher(Arc::new(launcher))
        .build()
        .await
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        app.run_until(tokio::time::sleep(Duration::from_millis(100))),
    )
    .await
    .expect("shutdown waited for boards still starting");
    assert!(broker.client_ids().is_empty());
}
