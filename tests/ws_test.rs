//! Integration tests for the real-time event channel.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use taskd::{config::DaemonConfig, ipc, ws, AppContext};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn get_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_test_daemon(metrics_interval_secs: u64) -> Arc<AppContext> {
    let config = DaemonConfig {
        control_port: get_free_port(),
        ws_port: get_free_port(),
        metrics: taskd::config::MetricsConfig {
            interval_secs: metrics_interval_secs,
            ..taskd::config::MetricsConfig::default()
        },
        ..DaemonConfig::default()
    };
    let ctx = AppContext::new(config, None);

    let gateway_ctx = ctx.clone();
    tokio::spawn(async move {
        ipc::run(gateway_ctx).await.ok();
    });
    let ws_ctx = ctx.clone();
    tokio::spawn(async move {
        ws::run(ws_ctx).await.ok();
    });
    ws::spawn_metrics_ticker(ctx.clone());

    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx
}

async fn ws_connect(ctx: &AppContext) -> WsClient {
    let url = format!("ws://{}", ctx.config.ws_addr());
    let (client, _) = connect_async(url).await.expect("ws connect failed");
    // Let the registrar record the connection before events start flowing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
}

/// Read frames until one of the wanted type arrives.
async fn next_event(client: &mut WsClient, kind: &str) -> Value {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let msg = client.next().await.expect("ws stream ended").unwrap();
            if let Message::Text(text) = msg {
                let v: Value = serde_json::from_str(&text).unwrap();
                if v["type"] == kind {
                    return v;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} event within {deadline:?}"))
}

async fn control_request(ctx: &AppContext, command: &str, data: Value) -> Value {
    let stream = TcpStream::connect(ctx.config.control_addr()).await.unwrap();
    let (read, mut write) = stream.into_split();
    let frame = json!({ "command": command, "data": data }).to_string();
    write.write_all(frame.as_bytes()).await.unwrap();
    write.write_all(b"\n").await.unwrap();
    let mut line = String::new();
    BufReader::new(read).read_line(&mut line).await.unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn lifecycle_events_fan_out_to_every_connection() {
    let ctx = start_test_daemon(3600).await;
    let mut first = ws_connect(&ctx).await;
    let mut second = ws_connect(&ctx).await;

    let created = control_request(&ctx, "createTask", json!({"title": "T1"})).await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    for client in [&mut first, &mut second] {
        let event = next_event(client, "task_created").await;
        assert_eq!(event["data"]["id"], id.as_str());
        assert_eq!(event["data"]["status"], "todo");
    }

    control_request(&ctx, "updateTaskStatus", json!({"taskId": id, "status": "done"})).await;
    for client in [&mut first, &mut second] {
        let event = next_event(client, "task_status_changed").await;
        assert_eq!(event["data"]["status"], "done");
    }

    control_request(&ctx, "deleteTask", json!({"taskId": id})).await;
    let event = next_event(&mut first, "task_deleted").await;
    assert_eq!(event["data"]["id"], id.as_str());
}

#[tokio::test]
async fn refresh_metrics_primes_a_new_connection() {
    // Long cadence: the only snapshot within the test window is the primed one.
    let ctx = start_test_daemon(3600).await;
    control_request(&ctx, "createTask", json!({"title": "T1"})).await;

    let mut client = ws_connect(&ctx).await;
    client
        .send(Message::Text(json!({"type": "refresh_metrics"}).to_string()))
        .await
        .unwrap();

    let event = next_event(&mut client, "metrics_update").await;
    assert_eq!(event["data"]["total"], 1);
    assert_eq!(event["data"]["pending"], 1);
    assert_eq!(event["data"]["processingTimes"]["averageMs"], 0.0);
}

#[tokio::test]
async fn metrics_update_arrives_on_the_periodic_cadence() {
    let ctx = start_test_daemon(1).await;
    let mut client = ws_connect(&ctx).await;

    let event = next_event(&mut client, "metrics_update").await;
    assert!(event["data"]["total"].is_number());
    assert!(event["data"]["byStatus"].is_object());
    assert!(event["data"]["queueByPriority"].is_object());
}

#[tokio::test]
async fn connection_count_tracks_connects_and_disconnects() {
    let ctx = start_test_daemon(3600).await;
    let client = ws_connect(&ctx).await;
    assert_eq!(ctx.broadcaster.active_count().await, 1);

    let status = control_request(&ctx, "getWebSocketStatus", json!({})).await;
    assert_eq!(status["data"]["activeConnections"], 1);
    assert_eq!(status["data"]["connections"][0]["state"], "open");

    drop(client);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ctx.broadcaster.active_count().await, 0);
}

#[tokio::test]
async fn plain_http_request_is_rejected_not_upgraded() {
    let ctx = start_test_daemon(3600).await;

    let mut stream = TcpStream::connect(ctx.config.ws_addr()).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    // The server drops the connection without a 101 upgrade.
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut response)).await;
    let text = String::from_utf8_lossy(&response);
    assert!(!text.contains("101 Switching Protocols"));
    assert_eq!(ctx.broadcaster.active_count().await, 0);
}
