// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use taskd_core::{Priority, TaskClass, TaskSpec};

fn submit_request() -> Request {
    Request::Submit {
        spec: TaskSpec {
            name: "x".to_string(),
            description: "echo".to_string(),
            class: TaskClass::Light,
            priority: Priority::Normal,
            working_dir: None,
            dedup_key: None,
            max_attempts: None,
        },
    }
}

#[test]
fn requests_round_trip() {
    for request in [
        submit_request(),
        Request::List { state: Some(TaskState::Pending) },
        Request::Get { id: "t-1".to_string() },
        Request::Cancel { id: "t-1".to_string() },
        Request::Release { id: "t-1".to_string() },
        Request::ScheduleList,
        Request::Status,
        Request::Shutdown,
    ] {
        let bytes = encode(&request).unwrap();
        let back: Request = decode(&bytes).unwrap();
        assert_eq!(back, request);
    }
}

#[test]
fn request_uses_op_tag() {
    let json = serde_json::to_value(&Request::Status).unwrap();
    assert_eq!(json["op"], "status");

    let json = serde_json::to_value(&submit_request()).unwrap();
    assert_eq!(json["op"], "submit");
    assert_eq!(json["spec"]["class"], "lightweight");
}

#[test]
fn responses_round_trip() {
    let response = Response::Submitted {
        id: TaskId::new("t-1"),
        verdict: ScanVerdict::Blocked {
            kinds: vec!["destructive_fs".to_string()],
        },
    };
    let bytes = encode(&response).unwrap();
    let back: Response = decode(&bytes).unwrap();
    assert_eq!(back, response);
}

#[test]
fn error_response_carries_code() {
    let response = Response::error(ErrorCode::Validation, "bad class");
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["result"], "error");
    assert_eq!(json["code"], "validation");
}

#[test]
fn status_counts_serialize_with_string_keys() {
    let mut counts = HashMap::new();
    counts.insert(TaskState::Pending, 3usize);
    let report = StatusReport {
        counts,
        workers: Vec::new(),
        rate_limit: RateLimitState::default(),
        schedules: 0,
        version: "0.1.0".to_string(),
    };
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["counts"]["pending"], 3);
}

#[tokio::test]
async fn wire_format_round_trips_over_a_duplex_stream() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    let request = submit_request();
    write_message(&mut client, &encode(&request).unwrap()).await.unwrap();

    let received = read_request(&mut server, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(received, request);

    write_response(&mut server, &Response::Ok, DEFAULT_TIMEOUT).await.unwrap();
    let bytes = read_message(&mut client).await.unwrap();
    let response: Response = decode(&bytes).unwrap();
    assert_eq!(response, Response::Ok);
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected() {
    let (mut client, mut server) = tokio::io::duplex(64);
    let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
    tokio::io::AsyncWriteExt::write_all(&mut client, &len).await.unwrap();

    let err = read_message(&mut server).await.unwrap_err();
    assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
}

#[tokio::test]
async fn closed_connection_is_distinguished() {
    let (client, mut server) = tokio::io::duplex(64);
    drop(client);
    let err = read_message(&mut server).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}
