use chat_sync::error::ChatError;
use chat_sync::history::{HistoryApi, RestHistory};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn message_json(id: &str, text: &str) -> serde_json::Value {
    json!({
        "id": id,
        "contactId": "c1",
        "senderType": "USER",
        "text": text,
        "createdAt": "2024-03-01T09:30:00Z"
    })
}

#[tokio::test]
async fn test_fetch_sends_pagination_and_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contacts/c1/messages"))
        .and(query_param("page", "2"))
        .and(query_param("perPage", "15"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [message_json("m1", "hi")],
            "pagination": {"page": 2, "perPage": 15, "total": 31}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = RestHistory::new(server.uri(), Some("secret-token".to_string()));
    let page = api.fetch_messages("c1", None, 2, 15).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].text, "hi");
    assert_eq!(page.pagination.page, 2);
    assert!(page.pagination.has_more());
}

#[tokio::test]
async fn test_fetch_scopes_to_estimate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contacts/c1/messages"))
        .and(query_param("estimateId", "e7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [],
            "pagination": {"page": 1, "perPage": 15, "total": 0}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = RestHistory::new(server.uri(), None);
    let page = api.fetch_messages("c1", Some("e7"), 1, 15).await.unwrap();
    assert!(page.data.is_empty());
}

#[tokio::test]
async fn test_server_error_becomes_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contacts/c1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let api = RestHistory::new(server.uri(), None);
    let err = api.fetch_messages("c1", None, 1, 15).await.unwrap_err();
    match err {
        ChatError::Request(msg) => assert!(msg.contains("500")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contacts/c1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let api = RestHistory::new(server.uri(), None);
    assert!(api.fetch_messages("c1", None, 1, 15).await.is_err());
}
