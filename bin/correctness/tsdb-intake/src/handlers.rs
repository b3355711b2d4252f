use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use tally_core::DataPoint;
use tracing::{debug, error, info};

use crate::state::IntakeState;

pub async fn handle_shutdown(State(state): State<IntakeState>) {
    info!("Received shutdown request. Stopping...");
    state.trigger_shutdown();
}

pub async fn handle_points_dump(State(state): State<IntakeState>) -> Json<Vec<DataPoint>> {
    Json(state.dump_points())
}

pub async fn handle_put(State(state): State<IntakeState>, body: Bytes) -> StatusCode {
    debug!("Received put payload.");

    let points = match serde_json::from_slice::<Vec<DataPoint>>(&body[..]) {
        Ok(points) => points,
        Err(e) => {
            error!(error = %e, "Failed to parse put payload.");
            return StatusCode::BAD_REQUEST;
        }
    };

    debug!(points = points.len(), "Processed put payload.");
    state.merge_points(points);

    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use tally_core::TagSet;
    use tokio::sync::mpsc;

    use super::*;

    fn state() -> IntakeState {
        let (shutdown_tx, _) = mpsc::channel(1);
        IntakeState::new(shutdown_tx)
    }

    #[tokio::test]
    async fn valid_batch_is_stored() {
        let state = state();
        let body = r#"[{"metric":"cpu.idle","timestamp":1700000000,"value":42,"tags":{"host":"web01"}}]"#;

        let status = handle_put(State(state.clone()), Bytes::from_static(body.as_bytes())).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(points) = handle_points_dump(State(state)).await;
        assert_eq!(
            points,
            vec![DataPoint::new("cpu.idle", 1_700_000_000, 42, TagSet::from([("host", "web01")]))]
        );
    }

    #[tokio::test]
    async fn malformed_batch_is_rejected() {
        let state = state();

        let status = handle_put(State(state.clone()), Bytes::from_static(b"{\"metric\":")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.dump_points().is_empty());
    }
}
