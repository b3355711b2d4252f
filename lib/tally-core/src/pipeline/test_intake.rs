//! In-process OpenTSDB-style intake for exercising the batcher over real HTTP.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_compression::tokio::bufread::GzipDecoder;
use axum::{body::Bytes, extract::State, routing::post, Router};
use http::{HeaderMap, StatusCode};
use tokio::{io::AsyncReadExt as _, net::TcpListener};

use crate::data_model::DataPoint;

#[derive(Clone)]
pub struct ReceivedRequest {
    pub headers: HeaderMap,
    pub points: Vec<DataPoint>,
}

struct IntakeState {
    status: StatusCode,
    requests: Vec<ReceivedRequest>,
}

#[derive(Clone)]
pub struct TestIntake {
    addr: SocketAddr,
    state: Arc<Mutex<IntakeState>>,
}

impl TestIntake {
    /// Spawns an intake that records every request and answers with `status`.
    pub async fn spawn(status: StatusCode) -> Self {
        let state = Arc::new(Mutex::new(IntakeState {
            status,
            requests: Vec::new(),
        }));

        let router = Router::new()
            .route("/api/put", post(handle_put))
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_status(&self, status: StatusCode) {
        self.state.lock().unwrap().status = status;
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Waits until at least `count` points have been accepted, returning all accepted points.
    pub async fn wait_for_points(&self, count: usize) -> Vec<DataPoint> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let points: Vec<DataPoint> = self.requests().into_iter().flat_map(|request| request.points).collect();
                if points.len() >= count {
                    return points;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for points")
    }
}

async fn handle_put(
    State(state): State<Arc<Mutex<IntakeState>>>, headers: HeaderMap, body: Bytes,
) -> (StatusCode, &'static str) {
    let mut decoder = GzipDecoder::new(&body[..]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).await.unwrap();
    let points: Vec<DataPoint> = serde_json::from_slice(&decompressed).unwrap();

    let mut state = state.lock().unwrap();
    let status = state.status;
    // Only accepted batches count as received.
    if status == StatusCode::NO_CONTENT {
        state.requests.push(ReceivedRequest { headers, points });
    }

    (status, "")
}
