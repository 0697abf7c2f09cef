use crate::lifecycle::AppState;
use crate::metrics;
use crate::reconciler::{PaymentRequest, PromptResponse, ReconcileError, Reconciler};
use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

pub type SharedReconciler = web::Data<Arc<Reconciler>>;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    locked: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
pub struct LifecycleBody {
    pub state: AppState,
}

#[derive(Deserialize)]
pub struct CallbackBody {
    pub uri: String,
}

#[derive(Deserialize)]
pub struct LockEnabledBody {
    pub enabled: bool,
}

#[derive(Deserialize)]
pub struct RespondBody {
    pub response: PromptResponse,
}

fn error_response(e: ReconcileError) -> HttpResponse {
    let body = ErrorBody {
        error: e.to_string(),
    };
    match e {
        ReconcileError::InvalidAmount(_) | ReconcileError::MissingPayee => {
            HttpResponse::BadRequest().json(body)
        }
        ReconcileError::LaunchFailed { .. } => HttpResponse::BadGateway().json(body),
        ReconcileError::PendingNotSaved(_)
        | ReconcileError::Ledger(_)
        | ReconcileError::Storage(_) => {
            error!("Request failed: {}", body.error);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

pub async fn health_check(data: SharedReconciler) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        locked: data.is_locked(),
    })
}

pub async fn get_metrics() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::render())
}

pub async fn start_payment(data: SharedReconciler, body: web::Json<PaymentRequest>) -> HttpResponse {
    match data.start_payment(body.into_inner()).await {
        Ok(started) => HttpResponse::Created().json(started),
        Err(e) => error_response(e),
    }
}

pub async fn report_lifecycle(data: SharedReconciler, body: web::Json<LifecycleBody>) -> impl Responder {
    HttpResponse::Ok().json(data.on_app_state_change(body.state))
}

pub async fn deep_link_callback(data: SharedReconciler, body: web::Json<CallbackBody>) -> impl Responder {
    HttpResponse::Ok().json(data.handle_deep_link(&body.uri))
}

pub async fn get_prompts(data: SharedReconciler) -> impl Responder {
    HttpResponse::Ok().json(data.open_prompts())
}

pub async fn respond_prompt(
    data: SharedReconciler,
    path: web::Path<String>,
    body: web::Json<RespondBody>,
) -> HttpResponse {
    match data.respond(&path.into_inner(), body.response) {
        Ok(resolution) => HttpResponse::Ok().json(resolution),
        Err(e) => error_response(e),
    }
}

pub async fn get_pending(data: SharedReconciler) -> impl Responder {
    HttpResponse::Ok().json(data.recovery_listing())
}

pub async fn get_recovery_route(data: SharedReconciler) -> impl Responder {
    HttpResponse::Ok().json(data.check_recovery_on_startup())
}

pub async fn confirm_all_pending(data: SharedReconciler) -> impl Responder {
    HttpResponse::Ok().json(data.confirm_all_pending())
}

pub async fn get_transactions(data: SharedReconciler) -> impl Responder {
    HttpResponse::Ok().json(data.ledger().list())
}

pub async fn get_patterns(data: SharedReconciler) -> impl Responder {
    HttpResponse::Ok().json(data.patterns())
}

pub async fn get_apps(data: SharedReconciler) -> impl Responder {
    HttpResponse::Ok().json(data.candidate_apps().await)
}

pub async fn unlock(data: SharedReconciler) -> impl Responder {
    data.unlock();
    HttpResponse::NoContent().finish()
}

pub async fn set_lock_enabled(
    data: SharedReconciler,
    body: web::Json<LockEnabledBody>,
) -> impl Responder {
    data.set_app_lock_enabled(body.enabled);
    HttpResponse::NoContent().finish()
}

pub async fn export_data(data: SharedReconciler) -> HttpResponse {
    match data.export() {
        Ok(dump) => HttpResponse::Ok().json(dump),
        Err(e) => error_response(e),
    }
}

pub async fn wipe_data(data: SharedReconciler) -> HttpResponse {
    match data.wipe() {
        Ok(removed) => HttpResponse::Ok().json(serde_json::json!({ "removed": removed })),
        Err(e) => error_response(e),
    }
}

// Define scope configuration
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/metrics").route(web::get().to(get_metrics)))
        .service(web::resource("/payments").route(web::post().to(start_payment)))
        .service(web::resource("/lifecycle").route(web::post().to(report_lifecycle)))
        .service(web::resource("/callback").route(web::post().to(deep_link_callback)))
        .service(web::resource("/prompts").route(web::get().to(get_prompts)))
        .service(web::resource("/prompts/{intent_id}/respond").route(web::post().to(respond_prompt)))
        .service(web::resource("/pending").route(web::get().to(get_pending)))
        .service(web::resource("/pending/confirm-all").route(web::post().to(confirm_all_pending)))
        .service(web::resource("/recovery").route(web::get().to(get_recovery_route)))
        .service(web::resource("/transactions").route(web::get().to(get_transactions)))
        .service(web::resource("/patterns").route(web::get().to(get_patterns)))
        .service(web::resource("/apps").route(web::get().to(get_apps)))
        .service(web::resource("/lock/unlock").route(web::post().to(unlock)))
        .service(web::resource("/lock/enabled").route(web::post().to(set_lock_enabled)))
        .service(
            web::resource("/data")
                .route(web::get().to(export_data))
                .route(web::delete().to(wipe_data)),
        );
}
