//! End-to-end tests for the async client against an in-process daemon
//! stub.

mod support;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use assassinate_ipc::protocol::ReplyEnvelope;
use assassinate_ipc::{IpcClient, IpcError, Value};

use support::{DaemonStub, echo, unique_config};

#[tokio::test]
async fn happy_path_echo_roundtrip() {
    support::init_tracing();
    let config = unique_config("happy", 64 * 1024);
    let _stub = DaemonStub::start(&config, echo);

    let client = IpcClient::new(config);
    client.connect().await.unwrap();

    let started = Instant::now();
    let result = client
        .call_with_timeout("ping", vec![Value::from("hello")], Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(result, Value::from("hello"));
    assert!(started.elapsed() < Duration::from_millis(100));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn replies_out_of_order_reach_their_own_callers() {
    let config = unique_config("ooo", 64 * 1024);
    // Hold the first two requests; once the third arrives, answer all
    // three in reverse arrival order.
    let mut held: Vec<assassinate_ipc::protocol::RequestEnvelope> = Vec::new();
    let _stub = DaemonStub::start(&config, move |request| {
        held.push(request);
        if held.len() < 3 {
            return Vec::new();
        }
        held.drain(..)
            .map(|r| ReplyEnvelope::result(r.call_id, r.request.args[0].clone()))
            .rev()
            .collect()
    });

    let client = IpcClient::new(config);
    client.connect().await.unwrap();

    let (a, b, c) = tokio::join!(
        client.call("echo", vec![Value::from("alpha")]),
        client.call("echo", vec![Value::from("beta")]),
        client.call("echo", vec![Value::from("gamma")]),
    );
    assert_eq!(a.unwrap(), Value::from("alpha"));
    assert_eq!(b.unwrap(), Value::from("beta"));
    assert_eq!(c.unwrap(), Value::from("gamma"));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn timeout_fires_and_the_late_reply_is_dropped() {
    let config = unique_config("timeout", 64 * 1024);
    // "slow" is never answered on time; its reply is emitted only when
    // the next request arrives, by which point the caller is gone.
    let mut unanswered: Option<u64> = None;
    let _stub = DaemonStub::start(&config, move |request| {
        if request.request.method == "slow" {
            unanswered = Some(request.call_id);
            return Vec::new();
        }
        let mut replies = Vec::new();
        if let Some(late_id) = unanswered.take() {
            replies.push(ReplyEnvelope::result(late_id, Value::from("too late")));
        }
        replies.push(ReplyEnvelope::result(
            request.call_id,
            Value::from("prompt"),
        ));
        replies
    });

    let client = IpcClient::new(config);
    client.connect().await.unwrap();

    let started = Instant::now();
    let err = client
        .call_with_timeout("slow", vec![], Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(50));

    // The late reply for "slow" lands before "ping"'s reply; the reader
    // must drop it and still route "ping" correctly.
    let result = client.call("ping", vec![]).await.unwrap();
    assert_eq!(result, Value::from("prompt"));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn remote_errors_carry_code_and_message() {
    let config = unique_config("remote-err", 64 * 1024);
    let _stub = DaemonStub::start(&config, |request| {
        vec![ReplyEnvelope::error(
            request.call_id,
            "NOT_FOUND",
            "module missing",
        )]
    });

    let client = IpcClient::new(config);
    client.connect().await.unwrap();

    let err = client.call("create_module", vec![]).await.unwrap_err();
    match err {
        IpcError::Remote { code, message } => {
            assert_eq!(code, "NOT_FOUND");
            assert_eq!(message, "module missing");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn full_ring_backpressure_then_recovery() {
    let config = unique_config("backpressure", 1024);
    let stub = DaemonStub::start(&config, echo);
    stub.pause();

    let client = Arc::new(IpcClient::new(config));
    client.connect().await.unwrap();

    // Two ~450-byte requests fill most of the 1 KiB ring while the
    // stub is paused.
    let payload = Value::Binary(vec![0x41u8; 400]);
    let first = tokio::spawn({
        let client = Arc::clone(&client);
        let payload = payload.clone();
        async move {
            client
                .call_with_timeout("fill", vec![payload], Duration::from_secs(5))
                .await
        }
    });
    let second = tokio::spawn({
        let client = Arc::clone(&client);
        let payload = payload.clone();
        async move {
            client
                .call_with_timeout("fill", vec![payload], Duration::from_secs(5))
                .await
        }
    });

    // Wait until both requests are sitting in the ring.
    let deadline = Instant::now() + Duration::from_secs(2);
    while client.request_utilization() < 0.8 {
        assert!(Instant::now() < deadline, "requests never reached the ring");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // A third request cannot fit; with the stub paused it must fail
    // with backpressure once its deadline passes.
    let err = client
        .call_with_timeout("fill", vec![payload.clone()], Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Backpressure));

    // Once the stub drains the ring, everything completes normally.
    stub.resume();
    assert_eq!(first.await.unwrap().unwrap(), payload);
    assert_eq!(second.await.unwrap().unwrap(), payload);
    let result = client.call("fill", vec![payload.clone()]).await.unwrap();
    assert_eq!(result, payload);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn oversized_request_fails_fast() {
    let config = unique_config("oversized", 1024);
    let _stub = DaemonStub::start(&config, echo);

    let client = IpcClient::new(config);
    client.connect().await.unwrap();

    // Larger than the ring can ever hold, so no amount of draining
    // helps; the call must not wait for its deadline.
    let started = Instant::now();
    let err = client
        .call("fill", vec![Value::Binary(vec![0u8; 2048])])
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Backpressure));
    assert!(started.elapsed() < Duration::from_secs(1));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_cancels_outstanding_calls() {
    let config = unique_config("shutdown", 64 * 1024);
    let _stub = DaemonStub::start(&config, |_request| Vec::new());

    let client = Arc::new(IpcClient::new(config));
    client.connect().await.unwrap();

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call_with_timeout("black_hole", vec![Value::from(i)], Duration::from_secs(30))
                    .await
            })
        })
        .collect();

    // Let the calls reach the pending table.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    client.disconnect().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, IpcError::Cancelled), "got {err:?}");
    }
    assert!(!client.is_connected());

    let err = client.call("ping", vec![]).await.unwrap_err();
    assert!(matches!(err, IpcError::NotConnected));
}

#[tokio::test]
async fn disconnect_cancels_a_call_stuck_on_backpressure() {
    let config = unique_config("bp-cancel", 1024);
    let stub = DaemonStub::start(&config, echo);
    stub.pause();

    let client = Arc::new(IpcClient::new(config));
    client.connect().await.unwrap();

    // Two ~450-byte requests fill the ring; the third parks in the
    // write-retry loop and never reaches it.
    let payload = Value::Binary(vec![0x42u8; 400]);
    let calls: Vec<_> = (0..3)
        .map(|_| {
            let client = Arc::clone(&client);
            let payload = payload.clone();
            tokio::spawn(async move {
                client
                    .call_with_timeout("fill", vec![payload], Duration::from_secs(30))
                    .await
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(2);
    while client.request_utilization() < 0.8 {
        assert!(Instant::now() < deadline, "requests never reached the ring");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // With the stub paused nothing is ever answered, so every caller,
    // including the one still retrying its write, must observe
    // cancellation rather than some other failure.
    client.disconnect().await.unwrap();
    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, IpcError::Cancelled), "got {err:?}");
    }
}

#[tokio::test]
async fn malformed_reply_fails_the_caller_immediately() {
    let config = unique_config("malformed", 64 * 1024);
    // A reply carrying neither result nor error is a daemon bug; the
    // caller should fail fast instead of running out its timeout.
    let _stub = DaemonStub::start(&config, |request| {
        vec![ReplyEnvelope {
            call_id: request.call_id,
            response: None,
            error: None,
        }]
    });

    let client = IpcClient::new(config);
    client.connect().await.unwrap();

    let started = Instant::now();
    let err = client
        .call_with_timeout("ping", vec![], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Cancelled), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn four_mebibyte_result_arrives_byte_identical() {
    let config = unique_config("large", 8 * 1024 * 1024);
    let blob: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = blob.clone();
    let _stub = DaemonStub::start(&config, move |request| {
        vec![ReplyEnvelope::result(
            request.call_id,
            Value::Binary(blob.clone()),
        )]
    });

    let client = IpcClient::new(config);
    client.connect().await.unwrap();

    let result = client
        .call_with_timeout("payload_generate", vec![], Duration::from_secs(10))
        .await
        .unwrap();
    match result {
        Value::Binary(bytes) => assert_eq!(bytes, expected),
        other => panic!("expected binary result, got wrong type: {}", other),
    }

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn call_ids_stay_unique_across_reconnect() {
    let config = unique_config("reconnect", 64 * 1024);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _stub = DaemonStub::start(&config, {
        let seen = Arc::clone(&seen);
        move |request| {
            seen.lock().unwrap().push(request.call_id);
            echo(request)
        }
    });

    let client = IpcClient::new(config);
    client.connect().await.unwrap();
    client.call("ping", vec![Value::from(1)]).await.unwrap();
    client.disconnect().await.unwrap();

    client.connect().await.unwrap();
    client.call("ping", vec![Value::from(2)]).await.unwrap();
    client.disconnect().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[1] > seen[0], "call ids went backwards: {seen:?}");
}

#[tokio::test]
async fn connect_is_a_noop_while_connected() {
    let config = unique_config("reconnect-noop", 64 * 1024);
    let _stub = DaemonStub::start(&config, echo);

    let client = IpcClient::new(config);
    client.connect().await.unwrap();
    client.connect().await.unwrap();

    let result = client.call("ping", vec![Value::from("still fine")]).await.unwrap();
    assert_eq!(result, Value::from("still fine"));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn connecting_without_a_daemon_reports_the_missing_region() {
    let config = unique_config("no-daemon", 4096);
    let client = IpcClient::new(config);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, IpcError::RegionMissing { .. }));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn calls_before_connect_fail_not_connected() {
    let config = unique_config("unconnected", 4096);
    let client = IpcClient::new(config);
    let err = client.call("ping", vec![]).await.unwrap_err();
    assert!(matches!(err, IpcError::NotConnected));
}
