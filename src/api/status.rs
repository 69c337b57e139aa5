use crate::core::prober::{AvailabilityProber, ServiceStatus};
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/", get(status))
        .route("/refresh", post(refresh))
}

async fn status(Inject(prober): Inject<AvailabilityProber>) -> Json<ServiceStatus> {
    Json(prober.status())
}

async fn refresh(Inject(prober): Inject<AvailabilityProber>) -> Json<ServiceStatus> {
    Json(prober.probe().await)
}
