//! Helpers for testing the cache and the users client.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`user_server`], make sure that the server is held until all requests to
//!    the server have been made. Dropping it stops serving, and later requests fail to connect.
//!    Assign it to a variable in the test function: `let server = user_server();`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{OriginalUri, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// The bearer token the [`user_server`] accepts for private users.
pub const SECRET_TOKEN: &str = "secret";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from our own crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("suspense_cache=trace,userpage=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
    hits: Hits,
}

impl Server {
    /// Spawns `router` on an ephemeral port, counting requests per path.
    pub fn with_router(router: Router) -> Self {
        let hits = Hits::default();
        let router = router.layer(middleware::from_fn_with_state(hits.clone(), count_hits));

        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            hits,
        }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }

    /// The number of requests made to `path` so far, ignoring the query string.
    pub fn hits(&self, path: &str) -> usize {
        let hits = self.hits.lock().unwrap();
        hits.get(path).copied().unwrap_or_default()
    }

    /// The number of requests made to any path so far.
    pub fn accesses(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn count_hits(
    State(hits): State<Hits>,
    OriginalUri(uri): OriginalUri,
    request: Request,
    next: Next,
) -> Response {
    {
        let mut hits = hits.lock().unwrap();
        *hits.entry(uri.path().to_owned()).or_default() += 1;
    }

    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    /// Seconds to wait before responding.
    delay: Option<u64>,
}

fn user(id: u64, first_name: &str, last_name: &str) -> Json<serde_json::Value> {
    Json(json!({
        "data": {
            "id": id,
            "email": format!("{}@example.com", first_name.to_lowercase()),
            "first_name": first_name,
            "last_name": last_name,
        },
        "support": {
            "text": "This is a test fixture",
        },
    }))
}

async fn get_user(
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
    headers: HeaderMap,
) -> Response {
    if let Some(delay) = query.delay {
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }

    match id.as_str() {
        "1" => user(1, "Alice", "Liddell").into_response(),
        "2" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "3" => user(3, "Emma", "Wong").into_response(),
        "malformed" => "this is not json".into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            user(1, "Alice", "Liddell").into_response()
        }
        "private" => {
            let expected = format!("Bearer {SECRET_TOKEN}");
            let authorization = headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok());
            if authorization == Some(expected.as_str()) {
                user(7, "Michael", "Lawson").into_response()
            } else {
                StatusCode::UNAUTHORIZED.into_response()
            }
        }
        _ => (StatusCode::NOT_FOUND, Json(json!({}))).into_response(),
    }
}

/// Spawns a mock of the users REST API.
///
/// Users are served under `/api/users/<id>`:
///
///  - `1` and `3` are regular users, Alice and Emma.
///  - `2` always fails with a server error.
///  - `malformed` responds with a body that is not JSON.
///  - `slow` responds after two seconds.
///  - `private` requires the [`SECRET_TOKEN`] as a bearer token.
///  - Everything else is not found.
///
/// The `delay` query parameter delays every response by that many seconds.
pub fn user_server() -> Server {
    let router = Router::new().route("/api/users/:id", get(get_user));
    Server::with_router(router)
}
