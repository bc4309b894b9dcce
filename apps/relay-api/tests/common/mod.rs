#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use relay_api::config::Config;
use relay_api::db::store::MemoryMessageStore;
use relay_api::identity::MemoryDirectory;
use relay_api::AppState;

/// A relay wired to in-memory collaborators the test can inspect.
pub struct TestRelay {
    pub state: AppState,
    pub store: Arc<MemoryMessageStore>,
    pub directory: Arc<MemoryDirectory>,
}

/// Build a test AppState with an in-memory store and directory.
///
/// `usr_ada` resolves to "Ada Lovelace"; every other sender is unknown.
pub fn test_state() -> TestRelay {
    test_state_with(Config::default())
}

/// Like [`test_state`], with a caller-supplied configuration.
pub fn test_state_with(config: Config) -> TestRelay {
    let store = Arc::new(MemoryMessageStore::new());
    let directory = Arc::new(MemoryDirectory::new().with_user("usr_ada", "Ada Lovelace"));
    let state = AppState::new(config, store.clone(), directory.clone());

    TestRelay {
        state,
        store,
        directory,
    }
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, TestRelay) {
    app_for(test_state())
}

fn app_for(relay: TestRelay) -> (Router, TestRelay) {
    let app = relay_api::routes::router().with_state(relay.state.clone());
    (app, relay)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_server() -> (SocketAddr, TestRelay) {
    start_server_with(Config::default()).await
}

pub async fn start_server_with(config: Config) -> (SocketAddr, TestRelay) {
    let (app, relay) = app_for(test_state_with(config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, relay)
}
