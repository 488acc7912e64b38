use serde_json::json;

use super::*;

#[test]
fn negotiate_response_parses_pascal_case() {
    let body = r#"{"Url":"/signalr","ConnectionId":"c1","KeepAlive":15.0,"ProtocolVersion":"1.0","TryWebSockets":true}"#;
    let res = NegotiateResponse::parse(body).unwrap();
    assert_eq!(res.url, "/signalr");
    assert_eq!(res.connection_id, "c1");
    assert_eq!(res.keep_alive, Some(15.0));
    assert!(res.try_web_sockets);
    assert!(res.web_socket_server_url.is_none());
    assert!(res.check_version().is_ok());
}

#[test]
fn negotiate_response_rejects_garbage() {
    let err = NegotiateResponse::parse("<html>").unwrap_err();
    assert_eq!(err.error_code(), "E_NEGOTIATION");
}

#[test]
fn version_mismatch_and_absence_are_rejected() {
    let body = r#"{"Url":"/signalr","ConnectionId":"c1","ProtocolVersion":"1.2"}"#;
    let err = NegotiateResponse::parse(body).unwrap().check_version().unwrap_err();
    assert_eq!(err, ClientError::ProtocolVersion { expected: "1.0", actual: Some("1.2".into()) });

    let body = r#"{"Url":"/signalr","ConnectionId":"c1"}"#;
    let err = NegotiateResponse::parse(body).unwrap().check_version().unwrap_err();
    assert_eq!(err, ClientError::ProtocolVersion { expected: "1.0", actual: None });
}

#[test]
fn frame_reads_all_fields() {
    let frame = Frame::from_value(&json!({
        "Messages": [1, "two"],
        "MessageId": 17,
        "TransportData": {"Groups": ["g1"], "LongPollDelay": 250},
        "Disconnect": false,
        "TimedOut": true
    }))
    .unwrap();
    assert_eq!(frame.messages, Some(vec![json!(1), json!("two")]));
    assert_eq!(frame.cursor().as_deref(), Some("17"));
    assert_eq!(frame.transport_data.as_ref().unwrap().groups, Some(json!(["g1"])));
    assert_eq!(frame.long_poll_delay_ms(), Some(250));
    assert!(frame.timed_out);
}

#[test]
fn empty_and_null_frames_are_defaults() {
    assert_eq!(Frame::from_value(&json!({})).unwrap(), Frame::default());
    assert_eq!(Frame::from_value(&Value::Null).unwrap(), Frame::default());
}

#[test]
fn malformed_frame_is_protocol_error() {
    let err = Frame::from_value(&json!({"Messages": "nope"})).unwrap_err();
    assert_eq!(err.error_code(), "E_PROTOCOL");
}

#[test]
fn non_positive_poll_delay_is_ignored() {
    let frame = Frame::from_value(&json!({"TransportData": {"LongPollDelay": 0}})).unwrap();
    assert_eq!(frame.long_poll_delay_ms(), None);
}

#[test]
fn frame_detection_matches_socket_rules() {
    assert!(is_frame(&json!({})));
    assert!(is_frame(&json!({"Messages": []})));
    assert!(!is_frame(&json!({"I": "0", "R": 1})));
    assert!(!is_frame(&json!({"Id": "1", "Result": 2})));
    assert!(!is_frame(&json!("text")));
}

#[test]
fn invocation_envelope_uses_lowercase_keys() {
    let state = Map::new();
    let args = [json!("hi"), Value::Null];
    let envelope = HubInvocation { hub: "chat", method: "send", args: &args, state: &state, id: 7 };
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value, json!({"hub": "chat", "method": "send", "args": ["hi", null], "state": {}, "id": 7}));
}

#[test]
fn hub_message_classifies_results_and_broadcasts() {
    let result = HubMessage::parse(&json!({"Id": "3", "Result": "ok", "State": {"a": 1}})).unwrap();
    let Some(HubMessage::Result(result)) = result else {
        panic!("expected result");
    };
    assert_eq!(id_text(&result.id).as_deref(), Some("3"));
    assert_eq!(result.result, Some(json!("ok")));

    let broadcast = HubMessage::parse(&json!({"Hub": "Chat", "Method": "Send", "Args": ["x"]})).unwrap();
    let Some(HubMessage::Broadcast(broadcast)) = broadcast else {
        panic!("expected broadcast");
    };
    assert_eq!(broadcast.hub, "Chat");
    assert_eq!(broadcast.args, vec![json!("x")]);
    assert!(broadcast.state.is_none());
}

#[test]
fn hub_message_ignores_unrelated_payloads() {
    assert_eq!(HubMessage::parse(&json!("plain")).unwrap(), None);
    assert_eq!(HubMessage::parse(&json!({"other": 1})).unwrap(), None);
}

#[test]
fn hub_message_rejects_broadcast_without_method() {
    assert!(HubMessage::parse(&json!({"Hub": "chat"})).is_err());
}
