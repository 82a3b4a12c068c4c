use actix_web::HttpResponse;

/// Liveness probe. It answers without touching the store, Redis or the worker queue.
#[tracing::instrument(name = "Health check")]
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().finish()
}
