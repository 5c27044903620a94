use esp_core::topics;
use esp_rpc::message::{INTERNAL_ERROR, METHOD_NOT_FOUND};
use esp_rpc::{handler, ErrorResponse, Request, Response, RpcChannel, RpcError, RpcMessage};
use esp_transport::{LocalBus, Message, SharedTransport, Transport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Collect every payload published on `topic`
async fn capture(bus: &SharedTransport, topic: &str) -> mpsc::UnboundedReceiver<RpcMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        topic,
        Arc::new(move |message: Message| {
            if let Ok(parsed) = RpcMessage::parse(&message.payload) {
                let _ = tx.send(parsed);
            }
        }),
    )
    .await
    .unwrap();
    rx
}

async fn send_request(bus: &SharedTransport, session: u64, request: &Request) {
    let payload = RpcMessage::from(request.clone()).to_bytes().unwrap();
    bus.publish(&topics::client(session), payload).await.unwrap();
}

fn bus() -> SharedTransport {
    Arc::new(LocalBus::new())
}

#[tokio::test]
async fn test_ping_replies_with_pong() {
    let bus = bus();
    let channel = RpcChannel::new(3, bus.clone());
    channel.start().await.unwrap();
    let mut replies = capture(&bus, &topics::server(3)).await;

    let request = Request::new("ping", json!({"hello": "world"}));
    send_request(&bus, 3, &request).await;

    match replies.recv().await.unwrap() {
        RpcMessage::Result(response) => {
            assert_eq!(response.id, request.id);
            assert_eq!(response.result, json!({"pong": {"hello": "world"}}));
        }
        other => panic!("expected result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_method_replies_method_not_found() {
    let bus = bus();
    let channel = RpcChannel::new(0, bus.clone());
    channel.start().await.unwrap();
    let mut replies = capture(&bus, &topics::server(0)).await;

    let request = Request::new("does_not_exist", Value::Null);
    send_request(&bus, 0, &request).await;

    match replies.recv().await.unwrap() {
        RpcMessage::Error(reply) => {
            assert_eq!(reply.id.as_deref(), Some(request.id.as_str()));
            assert_eq!(reply.error.code, METHOD_NOT_FOUND);
            assert_eq!(reply.error.message, "Unknown method does_not_exist");
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failing_handler_replies_internal_error() {
    let bus = bus();
    let channel = RpcChannel::new(1, bus.clone());
    channel.register(
        "explode",
        handler(|_params, _channel| async move { Err("boom".into()) }),
    );
    channel.start().await.unwrap();
    let mut replies = capture(&bus, &topics::server(1)).await;

    let request = Request::new("explode", Value::Null);
    send_request(&bus, 1, &request).await;

    match replies.recv().await.unwrap() {
        RpcMessage::Error(reply) => {
            assert_eq!(reply.error.code, INTERNAL_ERROR);
            assert_eq!(reply.error.message, "Internal error");
            assert_eq!(reply.error.data, Some(json!("boom")));
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_panicking_handler_replies_internal_error() {
    let bus = bus();
    let channel = RpcChannel::new(2, bus.clone());
    channel.register(
        "panic",
        handler(|_params, _channel| async move {
            if true {
                panic!("handler bug");
            }
            Ok(Value::Null)
        }),
    );
    channel.start().await.unwrap();
    let mut replies = capture(&bus, &topics::server(2)).await;

    send_request(&bus, 2, &Request::new("panic", Value::Null)).await;
    match replies.recv().await.unwrap() {
        RpcMessage::Error(reply) => assert_eq!(reply.error.code, INTERNAL_ERROR),
        other => panic!("expected error, got {:?}", other),
    }

    // The channel keeps serving after a panic
    send_request(&bus, 2, &Request::new("ping", Value::Null)).await;
    assert!(matches!(
        replies.recv().await.unwrap(),
        RpcMessage::Result(_)
    ));
}

#[tokio::test]
async fn test_call_times_out_and_clears_pending() {
    let bus = bus();
    let channel = RpcChannel::new(5, bus.clone());
    channel.start().await.unwrap();

    let err = channel
        .call("get_time", Value::Null, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();

    match err {
        RpcError::Timeout {
            method,
            session,
            timeout,
        } => {
            assert_eq!(method, "get_time");
            assert_eq!(session, 5);
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(channel.pending_ids().is_empty());
}

#[tokio::test]
async fn test_late_and_unknown_replies_are_dropped() {
    let bus = bus();
    let channel = RpcChannel::new(10, bus.clone());
    channel.start().await.unwrap();
    let mut requests = capture(&bus, &topics::server(10)).await;

    let err = channel
        .call("slow", Value::Null, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));

    let id = match requests.recv().await.unwrap() {
        RpcMessage::Request(request) => request.id,
        other => panic!("expected request, got {:?}", other),
    };

    // The reply arrives after the caller gave up
    let late = RpcMessage::from(Response::new(id.clone(), json!("too late")));
    bus.publish(&topics::client(10), late.to_bytes().unwrap())
        .await
        .unwrap();
    // Replies to ids that were never issued
    let stray = RpcMessage::from(Response::new("never-issued", json!(1)));
    bus.publish(&topics::client(10), stray.to_bytes().unwrap())
        .await
        .unwrap();
    let stray = RpcMessage::from(ErrorResponse::new(
        Some("never-issued".into()),
        INTERNAL_ERROR,
        "Internal error",
        None,
    ));
    bus.publish(&topics::client(10), stray.to_bytes().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(channel.pending_ids().is_empty());

    // The channel still completes new calls
    let device = RpcChannel::device(10, bus.clone());
    device.start().await.unwrap();
    let pong = channel.call("ping", json!("again"), None).await.unwrap();
    assert_eq!(pong, json!({"pong": "again"}));
    assert!(channel.pending_ids().is_empty());
}

#[tokio::test]
async fn test_call_round_trip_with_device_channel() {
    let bus = bus();
    let gateway = RpcChannel::new(9, bus.clone());
    let device = RpcChannel::device(9, bus.clone());
    device.register(
        "add",
        handler(|params, _channel| async move {
            let a = params["a"].as_i64().unwrap_or(0);
            let b = params["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        }),
    );
    gateway.start().await.unwrap();
    device.start().await.unwrap();

    let sum = gateway.call("add", json!({"a": 2, "b": 3}), None).await.unwrap();
    assert_eq!(sum, json!(5));

    let pong = device.call("ping", json!(1), None).await.unwrap();
    assert_eq!(pong, json!({"pong": 1}));

    assert!(gateway.pending_ids().is_empty());
    assert!(device.pending_ids().is_empty());
}

#[tokio::test]
async fn test_remote_error_surfaces_to_caller() {
    let bus = bus();
    let gateway = RpcChannel::new(4, bus.clone());
    let device = RpcChannel::device(4, bus.clone());
    gateway.start().await.unwrap();
    device.start().await.unwrap();

    let err = gateway.call("missing", Value::Null, None).await.unwrap_err();
    match err {
        RpcError::Remote { code, message, .. } => {
            assert_eq!(code, METHOD_NOT_FOUND);
            assert_eq!(message, "Unknown method missing");
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_can_call_back_into_device() {
    let bus = bus();
    let gateway = RpcChannel::new(6, bus.clone());
    let device = RpcChannel::device(6, bus.clone());

    device.register(
        "get_brightness",
        handler(|_params, _channel| async move { Ok(json!(80)) }),
    );
    gateway.register(
        "report",
        handler(|_params, channel| async move {
            let brightness = channel.call("get_brightness", Value::Null, None).await?;
            Ok(json!({ "brightness": brightness }))
        }),
    );
    gateway.start().await.unwrap();
    device.start().await.unwrap();

    let report = device.call("report", Value::Null, None).await.unwrap();
    assert_eq!(report, json!({"brightness": 80}));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let bus = Arc::new(LocalBus::new());
    let shared: SharedTransport = bus.clone();
    let channel = RpcChannel::new(8, shared);
    channel.start().await.unwrap();
    channel.start().await.unwrap();

    assert!(channel.is_started());
    assert_eq!(bus.subscriber_count(&topics::client(8)), 1);
}

#[tokio::test]
async fn test_unregister_turns_method_unknown() {
    let bus = bus();
    let channel = RpcChannel::new(7, bus.clone());
    assert!(channel.has_method("ping"));
    assert!(channel.unregister("ping"));
    assert!(channel.method_names().is_empty());

    channel.start().await.unwrap();
    let mut replies = capture(&bus, &topics::server(7)).await;
    send_request(&bus, 7, &Request::new("ping", Value::Null)).await;

    match replies.recv().await.unwrap() {
        RpcMessage::Error(reply) => assert_eq!(reply.error.code, METHOD_NOT_FOUND),
        other => panic!("expected error, got {:?}", other),
    }
}
