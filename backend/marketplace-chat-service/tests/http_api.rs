mod common;

use actix_web::{http::StatusCode, test, web, App};
use common::{admin, client, manager, Harness};
use marketplace_chat_service::{models::MessageType, routes, services::SendOutcome};
use serde_json::{json, Value};
use uuid::Uuid;

fn bearer(h: &Harness, user: &marketplace_chat_service::models::AuthenticatedUser) -> (String, String) {
    ("Authorization".to_string(), format!("Bearer {}", h.token(user)))
}

#[actix_rt::test]
async fn test_public_endpoints() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.app.clone()))
            .configure(routes::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn test_plain_get_on_ws_registers_nothing() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.app.clone()))
            .configure(routes::configure),
    )
    .await;

    for _ in 0..3 {
        let resp = test::call_service(&app, test::TestRequest::get().uri("/ws").to_request()).await;
        assert!(resp.status().is_client_error());
    }
    assert_eq!(h.app.registry.connection_count().await, 0);
}

#[actix_rt::test]
async fn test_chat_endpoints_enforce_roles() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.app.clone()))
            .configure(routes::configure),
    )
    .await;
    let store_id = Uuid::new_v4();
    let ana = client("Ana");
    let tienda = manager(store_id);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/chats")
            .set_json(json!({ "store_id": store_id }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/chats")
            .insert_header(bearer(&h, &ana))
            .set_json(json!({
                "store_id": store_id,
                "product": { "id": Uuid::new_v4(), "name": "Filtro de aceite" },
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let chat: Value = test::read_body_json(resp).await;
    assert_eq!(chat["status"], "active");
    let chat_id = chat["id"].as_str().unwrap().to_string();

    // store managers cannot open chats
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/chats")
            .insert_header(bearer(&h, &tienda))
            .set_json(json!({ "store_id": store_id }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/stores/{store_id}/chats?limit=10"))
            .insert_header(bearer(&h, &tienda))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let chats: Value = test::read_body_json(resp).await;
    assert_eq!(chats.as_array().unwrap().len(), 1);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/stores/{store_id}/chats/stats"))
            .insert_header(bearer(&h, &ana))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/chats/{chat_id}/messages"))
            .insert_header(bearer(&h, &client("Pedro")))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "FORBIDDEN");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/api/v1/chats/{chat_id}/close"))
            .insert_header(bearer(&h, &tienda))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let closed: Value = test::read_body_json(resp).await;
    assert_eq!(closed["status"], "closed");
}

#[actix_rt::test]
async fn test_violation_review_endpoints() {
    let h = Harness::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(h.app.clone()))
            .configure(routes::configure),
    )
    .await;
    let store_id = Uuid::new_v4();
    let ana = client("Ana");
    let moderator = admin();
    let chat = h.open_chat(&ana, store_id).await;

    let outcome = h
        .app
        .pipeline
        .send(&ana, chat.id, "mándame un correo a ana@correo.com", MessageType::Text)
        .await
        .unwrap();
    let violation_id = match outcome {
        SendOutcome::Blocked { violation, .. } => violation.id,
        SendOutcome::Delivered(_) => panic!("expected a blocked message"),
    };

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/violations?status=pending&store_id={store_id}"))
            .insert_header(bearer(&h, &manager(store_id)))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/violations?status=pending&store_id={store_id}"))
            .insert_header(bearer(&h, &moderator))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let listed: Value = test::read_body_json(resp).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["violation_type"], "email");
    assert_eq!(listed[0]["severity"], "medium");

    let act = |action: &str| {
        test::TestRequest::post()
            .uri(&format!("/api/v1/violations/{violation_id}/actions"))
            .insert_header(bearer(&h, &moderator))
            .set_json(json!({ "action": action, "note": "primer aviso" }))
            .to_request()
    };

    let resp = test::call_service(&app, act("warning")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let reviewed: Value = test::read_body_json(resp).await;
    assert_eq!(reviewed["status"], "resolved");
    assert_eq!(reviewed["action"], "warning");

    let resp = test::call_service(&app, act("dismiss")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "INVALID_STATE");

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/v1/admin/rules")
            .insert_header(bearer(&h, &moderator))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let info: Value = test::read_body_json(resp).await;
    assert_eq!(info["version"], "builtin-1");
    assert_eq!(info["rule_count"], 5);
}
