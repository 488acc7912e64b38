use serde_json::json;
use tokio::time::Instant;

use super::*;
use crate::config::{StartOptions, TransportPreference};
use crate::net::Net;
use crate::state::ConnectionState;
use crate::test_support::{EventRecorder, MockHttp, Reply, connection, negotiate_body, settle};

const CONNECT: &str = "/connect?";
const POLL: &str = "/signalr?transport";
const RECONNECT: &str = "/reconnect?";
const HELD: Duration = Duration::from_millis(100);

fn only_long_polling() -> StartOptions {
    StartOptions::with_transport(TransportPreference::named([LONG_POLLING]))
}

fn frame(message_id: &str) -> Reply {
    Reply::Body(json!({"MessageId": message_id, "Messages": []}).to_string())
}

/// A poll the server holds open briefly before answering.
fn held(body: serde_json::Value) -> Reply {
    Reply::Delay(HELD, body.to_string())
}

fn setup(http: &Arc<MockHttp>) -> (Connection, EventRecorder) {
    http.always("/negotiate", Reply::Body(negotiate_body(Some(10.0), false)));
    let conn = connection(Net::default().with_http(http.clone()));
    let recorder = EventRecorder::attach(&conn);
    (conn, recorder)
}

#[tokio::test(start_paused = true)]
async fn first_successful_poll_completes_start() {
    let http = MockHttp::new();
    http.reply(CONNECT, Reply::Body(json!({"MessageId": "1", "Messages": ["hi"]}).to_string()))
        .always(POLL, Reply::Hang);
    let (conn, recorder) = setup(&http);

    let began = Instant::now();
    conn.start(only_long_polling()).await.unwrap();

    assert!(began.elapsed() >= conn.config().long_poll_initial_delay);
    assert_eq!(conn.state(), ConnectionState::Connected);
    settle().await;
    assert_eq!(recorder.received(), vec![json!("hi")]);
    assert_eq!(conn.message_id().as_deref(), Some("1"));
    assert_eq!(http.requests_to(POLL).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn held_poll_is_assumed_connected() {
    let http = MockHttp::new();
    http.always(CONNECT, Reply::Hang);
    let (conn, _) = setup(&http);

    let began = Instant::now();
    conn.start(only_long_polling()).await.unwrap();

    let config = conn.config();
    assert!(began.elapsed() >= config.long_poll_initial_delay + config.long_poll_assume_connected_after);
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn keep_alive_is_not_monitored_and_loss_is_unsupported() {
    let http = MockHttp::new();
    http.always(CONNECT, Reply::Hang);
    let (conn, _) = setup(&http);
    conn.start(only_long_polling()).await.unwrap();

    assert!(conn.keep_alive_settings().is_some());
    assert!(!conn.keep_alive().is_monitoring());
    let transport = conn.current_transport().unwrap();
    assert!(matches!(
        transport.lost_connection(&conn),
        Err(ClientError::UnsupportedOperation(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_poll_reports_then_reconnects() {
    let http = MockHttp::new();
    http.reply(CONNECT, frame("1"))
        .reply(POLL, Reply::Fail(NetError::Status { status: 500, body: "boom".into() }))
        .always(POLL, Reply::Hang)
        .always(RECONNECT, Reply::Hang);
    let (conn, recorder) = setup(&http);
    conn.start(only_long_polling()).await.unwrap();
    settle().await;

    assert!(matches!(recorder.errors().as_slice(), [ClientError::Transport(_)]));
    assert!(http.requests_to(RECONNECT).is_empty());

    tokio::time::sleep(conn.config().reconnect_delay + Duration::from_millis(1)).await;
    settle().await;
    let reconnects = http.requests_to(RECONNECT);
    assert_eq!(reconnects.len(), 1);
    assert!(reconnects[0].url.contains("messageId=1"));
    assert_eq!(conn.state(), ConnectionState::Reconnecting);

    tokio::time::sleep(conn.config().long_poll_reconnect_delay + Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(recorder.count("reconnecting"), 1);
    assert_eq!(recorder.count("reconnected"), 1);
}

#[tokio::test(start_paused = true)]
async fn timed_out_poll_resumes_with_reconnect() {
    let http = MockHttp::new();
    http.reply(CONNECT, frame("1"))
        .reply(POLL, held(json!({"MessageId": "2", "Messages": [], "TimedOut": true})))
        .always(POLL, Reply::Hang)
        .reply(RECONNECT, frame("3"));
    let (conn, recorder) = setup(&http);
    conn.start(only_long_polling()).await.unwrap();
    tokio::time::sleep(HELD + Duration::from_millis(1)).await;
    settle().await;

    assert_eq!(http.requests_to(RECONNECT).len(), 1);
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.message_id().as_deref(), Some("3"));
    assert_eq!(recorder.count("reconnected"), 1);
    assert_eq!(http.requests_to(POLL).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn server_delay_spaces_polls() {
    let http = MockHttp::new();
    http.reply(
        CONNECT,
        Reply::Body(json!({"MessageId": "1", "Messages": [], "TransportData": {"LongPollDelay": 500}}).to_string()),
    )
    .always(POLL, Reply::Hang);
    let (conn, _) = setup(&http);
    conn.start(only_long_polling()).await.unwrap();
    settle().await;
    assert!(http.requests_to(POLL).is_empty());

    tokio::time::sleep(Duration::from_millis(501)).await;
    settle().await;
    assert_eq!(http.requests_to(POLL).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_frame_ends_polling() {
    let http = MockHttp::new();
    http.reply(CONNECT, frame("1"))
        .reply(POLL, held(json!({"Disconnect": true})))
        .always(POLL, Reply::Hang);
    let (conn, recorder) = setup(&http);
    conn.start(only_long_polling()).await.unwrap();
    tokio::time::sleep(HELD + Duration::from_millis(1)).await;
    settle().await;

    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(recorder.count("disconnected"), 1);
    assert_eq!(http.requests_to(POLL).len(), 1);
    assert!(http.requests_to("/abort").is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_ends_polling() {
    let http = MockHttp::new();
    http.reply(CONNECT, frame("1")).always(POLL, Reply::Hang);
    let (conn, _) = setup(&http);
    conn.start(only_long_polling()).await.unwrap();
    settle().await;

    conn.stop();
    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;

    assert_eq!(http.requests_to(POLL).len(), 1);
    assert_eq!(http.requests_to("/abort").len(), 1);
}
