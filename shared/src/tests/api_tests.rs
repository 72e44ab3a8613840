//! Tests for API request/response types

use crate::api::{CreateTaskRequest, CreateTaskResponse};

#[test]
fn test_missing_fields_reported_by_name() {
    let request: CreateTaskRequest = serde_json::from_str(r#"{}"#).unwrap();
    assert_eq!(
        request.missing_fields(),
        vec!["apiMethod", "apiURL", "startFrom", "frequency", "apiBody"]
    );

    let request: CreateTaskRequest = serde_json::from_str(
        r#"{"apiMethod": "POST", "apiURL": "http://sink/a", "apiBody": {}}"#,
    )
    .unwrap();
    assert_eq!(request.missing_fields(), vec!["startFrom", "frequency"]);
}

#[test]
fn test_full_request_parses() {
    let request: CreateTaskRequest = serde_json::from_str(
        r#"{
            "apiMethod": "POST",
            "apiURL": "http://sink/a",
            "startFrom": "2030-01-01 00:00:00",
            "frequency": 3600,
            "apiBody": {"k": "v"},
            "timeOutAfter": 5
        }"#,
    )
    .unwrap();

    assert!(request.missing_fields().is_empty());
    assert_eq!(request.api_method.as_deref(), Some("POST"));
    assert_eq!(request.api_url.as_deref(), Some("http://sink/a"));
    assert_eq!(request.frequency, Some(3600));
    assert_eq!(request.time_out_after, Some(5));
}

#[test]
fn test_create_response_wire_name() {
    let response = CreateTaskResponse {
        task_id: "alice_1".to_string(),
    };
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["taskId"], "alice_1");
}
