use actix_web::{App, test, web};
use paytrack_reconcile::api;
use paytrack_reconcile::capability::{HostFocusSignal, NoopLauncher};
use paytrack_reconcile::config::ReconcileConfig;
use paytrack_reconcile::context::{ReconcileContext, SimulatedTimeProvider};
use paytrack_reconcile::persistence::redb_store::MemoryStore;
use paytrack_reconcile::persistence::store::AppDataStore;
use paytrack_reconcile::reconciler::Reconciler;
use serde_json::{Value, json};
use std::sync::Arc;

fn reconciler_with_clock() -> (Arc<Reconciler>, Arc<SimulatedTimeProvider>) {
    let (ctx, clock) = ReconcileContext::new_simulated(1_718_000_000_000);
    let reconciler = Arc::new(Reconciler::new(
        ctx,
        AppDataStore::new(Arc::new(MemoryStore::new()), "@paytrack"),
        ReconcileConfig::default(),
        Arc::new(NoopLauncher::default()),
        Arc::new(HostFocusSignal),
    ));
    (reconciler, clock)
}

fn reconciler() -> Arc<Reconciler> {
    reconciler_with_clock().0
}

fn payment_body(amount: f64) -> Value {
    json!({
        "payee": { "externalId": "chemist@upi", "displayName": "Chemist" },
        "amount": amount,
        "category": "Health",
        "appId": "com.wallet.upi",
        "supportsCallback": true
    })
}

#[actix_web::test]
async fn test_health() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler()))
            .configure(api::config),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["locked"], false);
}

#[actix_web::test]
async fn test_payment_then_callback() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler()))
            .configure(api::config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/payments")
        .set_json(payment_body(150.0))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let started: Value = test::read_body_json(resp).await;
    let intent_id = started["intent"]["id"].as_str().unwrap().to_string();
    assert!(started["uri"].as_str().unwrap().starts_with("upi://pay?pa=chemist%40upi"));

    let req = test::TestRequest::get().uri("/pending").to_request();
    let pending: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let req = test::TestRequest::post()
        .uri("/callback")
        .set_json(json!({
            "uri": format!("paytrack://upi-callback?tr={}&status=success", intent_id)
        }))
        .to_request();
    let outcome: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(outcome["outcome"], "confirmed");

    let req = test::TestRequest::get().uri("/transactions").to_request();
    let ledger: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(ledger.as_array().unwrap().len(), 1);
    assert_eq!(ledger[0]["verifiedBy"], "intent");
}

#[actix_web::test]
async fn test_invalid_amount_rejected() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler()))
            .configure(api::config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/payments")
        .set_json(payment_body(0.0))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_prompt_flow_over_http() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler()))
            .configure(api::config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/payments")
        .set_json(payment_body(80.0))
        .to_request();
    let started: Value = test::call_and_read_body_json(&app, req).await;
    let intent_id = started["intent"]["id"].as_str().unwrap().to_string();

    for lifecycle in ["background", "active"] {
        let req = test::TestRequest::post()
            .uri("/lifecycle")
            .set_json(json!({ "state": lifecycle }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    // Zero dwell on the simulated clock is a flicker
    let req = test::TestRequest::get().uri("/prompts").to_request();
    let prompts: Value = test::call_and_read_body_json(&app, req).await;
    assert!(prompts.as_array().unwrap().is_empty());

    let req = test::TestRequest::post()
        .uri(&format!("/prompts/{}/respond", intent_id))
        .set_json(json!({ "response": "cancelled" }))
        .to_request();
    let resolution: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resolution["resolution"], "discarded");

    let req = test::TestRequest::get().uri("/patterns").to_request();
    let patterns: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(patterns["totalFailed"], 1);
}

#[actix_web::test]
async fn test_export_and_wipe() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler()))
            .configure(api::config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/payments")
        .set_json(payment_body(42.0))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/data").to_request();
    let dump: Value = test::call_and_read_body_json(&app, req).await;
    assert!(dump.get("@paytrack:pending_transactions").is_some());

    let req = test::TestRequest::delete().uri("/data").to_request();
    let wiped: Value = test::call_and_read_body_json(&app, req).await;
    assert!(wiped["removed"].as_u64().unwrap() >= 1);

    let req = test::TestRequest::get().uri("/pending").to_request();
    let pending: Value = test::call_and_read_body_json(&app, req).await;
    assert!(pending.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn test_disabling_app_lock() {
    let (reconciler, clock) = reconciler_with_clock();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler))
            .configure(api::config),
    )
    .await;

    for (state, advance_secs) in [("background", 300), ("active", 0)] {
        let req = test::TestRequest::post()
            .uri("/lifecycle")
            .set_json(json!({ "state": state }))
            .to_request();
        test::call_service(&app, req).await;
        clock.advance(advance_secs * 1000);
    }
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["locked"], true);

    let req = test::TestRequest::post()
        .uri("/lock/enabled")
        .set_json(json!({ "enabled": false }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    // Disabling also releases the current lock
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["locked"], false);

    for (state, advance_secs) in [("background", 300), ("active", 0)] {
        let req = test::TestRequest::post()
            .uri("/lifecycle")
            .set_json(json!({ "state": state }))
            .to_request();
        test::call_service(&app, req).await;
        clock.advance(advance_secs * 1000);
    }
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["locked"], false);
}
