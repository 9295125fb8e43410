use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    stopping: bool,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    let stopping = state.stop.is_stopped();
    Json(Status {
        status: if stopping { "Stopping" } else { "Available" }.into(),
        stopping,
    })
}
