use std::sync::{Arc, Mutex};

use serde_json::json;

use super::*;
use crate::config::{TransportChoice, TransportPreference};
use crate::test_support::{FakeTransport, MockHttp, Reply, StartScript, TEST_URL, negotiate_body, settle};
use crate::transport::Transport;

fn options() -> HubOptions {
    HubOptions { use_default_path: false, ..HubOptions::default() }
}

fn hub() -> HubConnection {
    let http = MockHttp::new();
    http.always("/negotiate", Reply::Body(negotiate_body(None, false)));
    HubConnection::new(TEST_URL, options(), Net::default().with_http(http))
}

async fn started(hub: &HubConnection) -> Arc<FakeTransport> {
    let fake = FakeTransport::new("fake", StartScript::Succeed);
    let transport: Arc<dyn Transport> = fake.clone();
    let choice = TransportChoice::Instance(transport);
    hub.start(StartOptions::with_transport(TransportPreference::List(vec![choice])))
        .await
        .unwrap();
    fake
}

fn deliver(hub: &HubConnection, message: Value) {
    hub.connection().process_frame(&json!({ "Messages": [message] }));
}

fn last_envelope(fake: &FakeTransport) -> Value {
    let sent = fake.sent.lock().unwrap();
    serde_json::from_str(sent.last().unwrap()).unwrap()
}

#[test]
fn default_path_is_appended() {
    let hub = HubConnection::new("http://example.test/", HubOptions::default(), Net::default());
    assert_eq!(hub.connection().url(), "http://example.test/signalr");

    let hub = HubConnection::new("", options(), Net::default());
    assert_eq!(hub.connection().url(), "/signalr");

    let hub = HubConnection::new("http://example.test/hubs", options(), Net::default());
    assert_eq!(hub.connection().url(), "http://example.test/hubs");
}

#[test]
fn create_proxy_reuses_case_insensitively() {
    let hub = hub();
    let a = hub.create_proxy("Chat");
    a.set_state("k", json!(1));
    let b = hub.create_proxy("CHAT");

    assert_eq!(b.state()["k"], json!(1));
    assert!(hub.proxy("chat").is_some());
    assert!(hub.proxy("game").is_none());
}

#[tokio::test]
async fn invoke_round_trip_resolves_and_merges_state() {
    let hub = hub();
    let chat = hub.create_proxy("Chat");
    chat.set_state("user", json!("ada"));
    let fake = started(&hub).await;

    let invocation = chat.invoke("Send", vec![arg("hi")]);
    let id = invocation.id();

    let envelope = last_envelope(&fake);
    assert_eq!(
        envelope,
        json!({"hub": "chat", "method": "Send", "args": ["hi"], "state": {"user": "ada"}, "id": id})
    );

    deliver(&hub, json!({"Id": id.to_string(), "Result": "ok", "State": {"seen": true}}));

    assert_eq!(invocation.await, Ok(json!("ok")));
    assert_eq!(chat.state()["seen"], json!(true));
    assert_eq!(chat.state()["user"], json!("ada"));
    assert_eq!(hub.registry().pending_count(), 0);
}

#[tokio::test]
async fn missing_result_resolves_to_null() {
    let hub = hub();
    let chat = hub.create_proxy("chat");
    started(&hub).await;

    let invocation = chat.invoke("ping", vec![]);
    deliver(&hub, json!({"Id": invocation.id()}));

    assert_eq!(invocation.await, Ok(Value::Null));
}

#[tokio::test]
async fn server_error_rejects_with_message_only() {
    let hub = hub();
    let chat = hub.create_proxy("chat");
    started(&hub).await;

    let invocation = chat.invoke("send", vec![]);
    deliver(
        &hub,
        json!({"Id": invocation.id(), "Error": "boom", "StackTrace": "at Hub.Send()", "State": {}}),
    );

    assert_eq!(invocation.await, Err(ClientError::Invocation { message: "boom".into() }));
    assert_eq!(hub.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn late_and_unknown_ids_are_ignored() {
    let hub = hub();
    let chat = hub.create_proxy("chat");
    started(&hub).await;

    let invocation = chat.invoke("send", vec![]);
    let id = invocation.id();
    deliver(&hub, json!({"Id": "999", "Result": "stray"}));
    deliver(&hub, json!({"Id": id, "Result": "first"}));
    deliver(&hub, json!({"Id": id, "Result": "second"}));

    assert_eq!(invocation.await, Ok(json!("first")));
    assert_eq!(hub.registry().pending_count(), 0);
}

#[tokio::test]
async fn responses_correlate_out_of_order() {
    let hub = hub();
    let chat = hub.create_proxy("chat");
    started(&hub).await;

    let first = chat.invoke("a", vec![]);
    let second = chat.invoke("b", vec![]);
    deliver(&hub, json!({"Id": second.id(), "Result": 2}));
    deliver(&hub, json!({"Id": first.id(), "Result": 1}));

    assert_eq!(first.await, Ok(json!(1)));
    assert_eq!(second.await, Ok(json!(2)));
}

#[tokio::test]
async fn broadcast_dispatches_case_insensitively() {
    let hub = hub();
    let chat = hub.create_proxy("chat");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    chat.on("send", move |args| sink.lock().unwrap().push(args.to_vec()));
    started(&hub).await;

    deliver(&hub, json!({"Hub": "Chat", "Method": "Send", "Args": ["x"], "State": {"topic": "rust"}}));

    assert_eq!(*seen.lock().unwrap(), vec![vec![json!("x")]]);
    assert_eq!(chat.state()["topic"], json!("rust"));
}

#[tokio::test]
async fn broadcast_for_unknown_hub_is_dropped() {
    let hub = hub();
    let chat = hub.create_proxy("chat");
    let seen = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&seen);
    chat.on("send", move |_| *sink.lock().unwrap() += 1);
    started(&hub).await;

    deliver(&hub, json!({"Hub": "Game", "Method": "Send", "Args": []}));

    assert_eq!(*seen.lock().unwrap(), 0);
    assert!(hub.proxy("game").is_none());
}

#[tokio::test]
async fn connection_data_lists_subscribed_hubs() {
    let hub = hub();
    let chat = hub.create_proxy("Chat");
    hub.create_proxy("Silent");
    let handler = chat.on("send", |_| {});
    started(&hub).await;

    assert_eq!(hub.connection().connection_data().as_deref(), Some(r#"[{"name":"chat"}]"#));

    chat.off("send", Some(handler));
    hub.send("raw").unwrap();
    assert_eq!(hub.connection().connection_data().as_deref(), Some("[]"));
}

#[tokio::test]
async fn stop_rejects_pending_invocations() {
    let hub = hub();
    let chat = hub.create_proxy("chat");
    started(&hub).await;

    let invocation = chat.invoke("slow", vec![]);
    hub.stop();
    settle().await;

    assert_eq!(invocation.await, Err(ClientError::Stopped));
    assert_eq!(hub.registry().pending_count(), 0);
}

#[tokio::test]
async fn dropping_an_invocation_withdraws_it() {
    let hub = hub();
    let chat = hub.create_proxy("chat");
    started(&hub).await;

    let invocation = chat.invoke("send", vec![]);
    assert_eq!(hub.registry().pending_count(), 1);
    drop(invocation);
    assert_eq!(hub.registry().pending_count(), 0);
}

#[tokio::test]
async fn shared_registry_keeps_connections_apart() {
    let registry = Arc::new(InvocationRegistry::new());
    let http = MockHttp::new();
    http.always("/negotiate", Reply::Body(negotiate_body(None, false)));
    let net = Net::default().with_http(http);
    let a = HubConnection::with_registry(TEST_URL, options(), net.clone(), Arc::clone(&registry));
    let b = HubConnection::with_registry(TEST_URL, options(), net, Arc::clone(&registry));
    started(&a).await;
    started(&b).await;

    let on_a = a.create_proxy("chat").invoke("send", vec![]);
    let on_b = b.create_proxy("chat").invoke("send", vec![]);
    assert_ne!(on_a.id(), on_b.id());

    deliver(&b, json!({"Id": on_a.id(), "Result": "wrong connection"}));
    assert_eq!(registry.pending_count(), 2);

    deliver(&a, json!({"Id": on_a.id(), "Result": "a"}));
    assert_eq!(on_a.await, Ok(json!("a")));
    drop(on_b);
}
