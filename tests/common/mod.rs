//! Shared fixtures for integration tests: an embedded file server and
//! archive helpers.

#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

/// Request counters of the mock file server.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub requests: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

pub struct MockFileServer {
    pub base_url: String,
    pub stats: Arc<ServerStats>,
}

impl MockFileServer {
    pub fn url(&self, name: &str) -> String {
        format!("{}/files/{}", self.base_url, name)
    }
}

/// Start embedded mock HTTP server.
///
/// `GET /files/{name}` answers with `content of {name}`. Names starting with
/// `missing` get a 404, `slow` names wait 400ms and `busy` names 80ms
/// before answering.
pub async fn start_file_server() -> MockFileServer {
    let stats = Arc::new(ServerStats::default());
    let app = Router::new()
        .route("/files/{name}", get(serve_file))
        .with_state(stats.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let bound_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockFileServer {
        base_url: format!("http://{}", bound_addr),
        stats,
    }
}

async fn serve_file(State(stats): State<Arc<ServerStats>>, Path(name): Path<String>) -> impl IntoResponse {
    stats.requests.fetch_add(1, Ordering::SeqCst);
    let current = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stats.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let delay = if name.starts_with("slow") {
        Some(Duration::from_millis(400))
    } else if name.starts_with("busy") {
        Some(Duration::from_millis(80))
    } else {
        None
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    stats.in_flight.fetch_sub(1, Ordering::SeqCst);

    if name.starts_with("missing") {
        (StatusCode::NOT_FOUND, String::from("not found"))
    } else {
        (StatusCode::OK, format!("content of {name}"))
    }
}

/// Entry names of a ZIP archive, in archive order.
pub fn zip_entries(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Reads one archive entry as text.
pub fn zip_text(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    text
}
