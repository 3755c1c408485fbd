use actix_web::{HttpResponse, Responder};
use once_cell::sync::Lazy;
use prometheus::{core::Collector, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

fn register(name: &str, collector: Box<dyn Collector>) {
    if let Err(e) = prometheus::default_registry().register(collector) {
        tracing::warn!("failed to register {}: {}", name, e);
    }
}

struct ChatMetrics {
    messages_sent: IntCounterVec,
    decryption_failures: IntCounter,
    ws_connections: IntGauge,
    offline_notifications: IntCounterVec,
}

static CHAT_METRICS: Lazy<Option<ChatMetrics>> = Lazy::new(|| {
    let messages_sent = IntCounterVec::new(
        Opts::new("chat_messages_sent_total", "Messages persisted, by transport"),
        &["transport"],
    )
    .ok()?;
    let decryption_failures = IntCounter::new(
        "chat_decryption_failures_total",
        "Stored envelopes that failed to decrypt on read",
    )
    .ok()?;
    let ws_connections = IntGauge::new(
        "chat_ws_active_connections",
        "Authenticated websocket connections on this instance",
    )
    .ok()?;
    let offline_notifications = IntCounterVec::new(
        Opts::new(
            "chat_offline_notifications_total",
            "Offline delivery hooks, by outcome",
        ),
        &["outcome"],
    )
    .ok()?;

    register("chat_messages_sent_total", Box::new(messages_sent.clone()));
    register(
        "chat_decryption_failures_total",
        Box::new(decryption_failures.clone()),
    );
    register("chat_ws_active_connections", Box::new(ws_connections.clone()));
    register(
        "chat_offline_notifications_total",
        Box::new(offline_notifications.clone()),
    );

    Some(ChatMetrics {
        messages_sent,
        decryption_failures,
        ws_connections,
        offline_notifications,
    })
});

pub fn record_message_sent(transport: &str) {
    if let Some(m) = CHAT_METRICS.as_ref() {
        m.messages_sent.with_label_values(&[transport]).inc();
    }
}

pub fn record_decryption_failure() {
    if let Some(m) = CHAT_METRICS.as_ref() {
        m.decryption_failures.inc();
    }
}

pub fn ws_connected() {
    if let Some(m) = CHAT_METRICS.as_ref() {
        m.ws_connections.inc();
    }
}

pub fn ws_disconnected() {
    if let Some(m) = CHAT_METRICS.as_ref() {
        m.ws_connections.dec();
    }
}

pub fn record_offline_notification(outcome: &str) {
    if let Some(m) = CHAT_METRICS.as_ref() {
        m.offline_notifications.with_label_values(&[outcome]).inc();
    }
}

/// Handler that serialises Prometheus metrics in text format.
pub async fn metrics_handler() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(err) => {
            tracing::error!("failed to encode metrics: {}", err);
            HttpResponse::InternalServerError().finish()
        }
    }
}
