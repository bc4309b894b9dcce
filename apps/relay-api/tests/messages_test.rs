mod common;

use axum::http::StatusCode;
use axum_test::TestServer;

/// Join a fresh connection to `room` and send `count` messages through the relay.
async fn seed_room(relay: &common::TestRelay, room: &str, count: usize) -> Vec<String> {
    let engine = &relay.state.relay;
    let (conn, _rx) = engine.connect();
    engine.handle_join(&conn, room).unwrap();

    let mut ids = Vec::new();
    for i in 0..count {
        let msg = engine
            .handle_message(&conn, room, "usr_ada", &format!("message {i}"))
            .await
            .unwrap();
        ids.push(msg.id.to_string());
    }
    engine.handle_disconnect(&conn);
    ids
}

#[tokio::test]
async fn history_of_unknown_room_is_empty() {
    let (app, _relay) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/api/v1/rooms/nowhere/messages").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["data"], serde_json::json!([]));
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn history_returns_latest_page_oldest_first() {
    let (app, relay) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let ids = seed_room(&relay, "trip-42", 5).await;
    seed_room(&relay, "paris", 2).await;

    let body: serde_json::Value = server
        .get("/api/v1/rooms/trip-42/messages?limit=3")
        .await
        .json();

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data[0]["id"], ids[2]);
    assert_eq!(data[2]["id"], ids[4]);
    assert_eq!(data[2]["body"], "message 4");
    assert_eq!(data[2]["sender_name"], "Ada Lovelace");
    assert_eq!(data[2]["room_id"], "trip-42");
    assert_eq!(body["has_more"], true);
}

#[tokio::test]
async fn history_pages_with_before_cursor() {
    let (app, relay) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let ids = seed_room(&relay, "trip-42", 5).await;

    let body: serde_json::Value = server
        .get(&format!("/api/v1/rooms/trip-42/messages?before={}&limit=10", ids[2]))
        .await
        .json();

    let data = body["data"].as_array().unwrap();
    let got: Vec<&str> = data.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(got, vec![ids[0].as_str(), ids[1].as_str()]);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn history_rejects_malformed_cursor() {
    let (app, _relay) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server
        .get("/api/v1/rooms/trip-42/messages?before=not-a-number")
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
