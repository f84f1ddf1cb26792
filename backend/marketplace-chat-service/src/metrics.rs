//! Prometheus metrics for the chat gateway and moderation pipeline

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

/// Messages accepted and broadcast
pub static MESSAGES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chat_messages_sent_total",
        "Total chat messages accepted and broadcast"
    )
    .expect("failed to register chat_messages_sent_total")
});

/// Messages blocked by the classifier, by primary violation type
pub static MESSAGES_BLOCKED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_messages_blocked_total",
        "Total chat messages blocked by moderation",
        &["violation_type"]
    )
    .expect("failed to register chat_messages_blocked_total")
});

/// Moderator decisions applied to violations
pub static VIOLATION_ACTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_violation_actions_total",
        "Total moderator actions on violations",
        &["action"]
    )
    .expect("failed to register chat_violation_actions_total")
});

/// Rule reload attempts (ok/error)
pub static RULE_RELOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "chat_rule_reloads_total",
        "Moderation rule reload attempts",
        &["result"]
    )
    .expect("failed to register chat_rule_reloads_total")
});

/// Open realtime connections
pub static WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("chat_ws_connections", "Open realtime connections")
        .expect("failed to register chat_ws_connections")
});

/// Time spent classifying message content
pub static CLASSIFY_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "chat_classify_duration_seconds",
        "Time spent classifying a message",
        vec![0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]
    )
    .expect("failed to register chat_classify_duration_seconds")
});

pub fn record_message_blocked(violation_type: &str) {
    MESSAGES_BLOCKED_TOTAL
        .with_label_values(&[violation_type])
        .inc();
}

pub fn record_violation_action(action: &str) {
    VIOLATION_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

/// `GET /metrics`
pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
