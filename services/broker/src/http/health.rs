use axum::response::IntoResponse;

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

pub async fn readyz() -> impl IntoResponse {
    "ok"
}
