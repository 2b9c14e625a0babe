//! Prometheus-kompatible Metriken fuer chatcodes
//!
//! Registrierte Metriken:
//! - `chatcodes_connections` – Gauge: Offene WebSocket-Verbindungen
//! - `chatcodes_channels_active` – Gauge: Aktive (nicht archivierte) Kanaele
//! - `chatcodes_channels_created_total` – Counter: Neu angelegte Kanaele
//! - `chatcodes_channels_archived_total` – Counter: Archivierte Kanaele
//! - `chatcodes_messages_total` – Counter: Bearbeitete Anfragen (type)
//! - `chatcodes_messages_dropped_total` – Counter: Verworfene Nachrichten
//! - `chatcodes_store_up` – Gauge: 1 wenn der letzte Speicherzugriff gelang

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle chatcodes-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Zaehler.
#[derive(Clone)]
pub struct ChatCodesMetrics {
    pub registry: Arc<Registry>,

    pub connections: IntGauge,
    pub channels_active: IntGauge,
    pub channels_created_total: IntCounter,
    pub channels_archived_total: IntCounter,
    pub messages_total: IntCounterVec,
    pub messages_dropped_total: IntCounter,
    pub store_up: IntGauge,
}

impl ChatCodesMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connections = IntGauge::with_opts(Opts::new(
            "chatcodes_connections",
            "Anzahl offener WebSocket-Verbindungen",
        ))?;
        registry.register(Box::new(connections.clone()))?;

        let channels_active = IntGauge::with_opts(Opts::new(
            "chatcodes_channels_active",
            "Anzahl aktiver Kanaele",
        ))?;
        registry.register(Box::new(channels_active.clone()))?;

        let channels_created_total = IntCounter::with_opts(Opts::new(
            "chatcodes_channels_created_total",
            "Gesamtanzahl neu angelegter Kanaele",
        ))?;
        registry.register(Box::new(channels_created_total.clone()))?;

        let channels_archived_total = IntCounter::with_opts(Opts::new(
            "chatcodes_channels_archived_total",
            "Gesamtanzahl archivierter Kanaele",
        ))?;
        registry.register(Box::new(channels_archived_total.clone()))?;

        let messages_total = IntCounterVec::new(
            Opts::new("chatcodes_messages_total", "Bearbeitete Control-Anfragen"),
            &["type"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let messages_dropped_total = IntCounter::with_opts(Opts::new(
            "chatcodes_messages_dropped_total",
            "Verworfene fehlerhafte Nachrichten",
        ))?;
        registry.register(Box::new(messages_dropped_total.clone()))?;

        let store_up = IntGauge::with_opts(Opts::new(
            "chatcodes_store_up",
            "1 wenn der Dokumentenspeicher erreichbar ist",
        ))?;
        store_up.set(1);
        registry.register(Box::new(store_up.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connections,
            channels_active,
            channels_created_total,
            channels_archived_total,
            messages_total,
            messages_dropped_total,
            store_up,
        })
    }

    pub fn speicher_verbunden(&self) -> bool {
        self.store_up.get() == 1
    }

    /// Vermerkt das Ergebnis des letzten Speicherzugriffs
    pub fn speicher_status_setzen(&self, verbunden: bool) {
        self.store_up.set(i64::from(verbunden));
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: ChatCodesMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<ChatCodesMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = ChatCodesMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn gauge_aktive_kanaele() {
        let metriken = ChatCodesMetrics::neu().unwrap();
        metriken.channels_active.inc();
        metriken.channels_active.inc();
        metriken.channels_active.dec();
        assert_eq!(metriken.channels_active.get(), 1);
    }

    #[test]
    fn zwei_instanzen_sind_unabhaengig() {
        let a = ChatCodesMetrics::neu().unwrap();
        let b = ChatCodesMetrics::neu().unwrap();
        a.channels_created_total.inc();
        assert_eq!(b.channels_created_total.get(), 0);
    }

    #[test]
    fn nachrichten_counter_mit_labels() {
        let metriken = ChatCodesMetrics::neu().unwrap();
        metriken
            .messages_total
            .with_label_values(&["request-join-room"])
            .inc();
        let wert = metriken
            .messages_total
            .with_label_values(&["request-join-room"])
            .get();
        assert_eq!(wert, 1);
    }

    #[test]
    fn speicher_status() {
        let metriken = ChatCodesMetrics::neu().unwrap();
        assert!(metriken.speicher_verbunden());
        metriken.speicher_status_setzen(false);
        assert!(!metriken.speicher_verbunden());
        assert!(metriken.exportieren().unwrap().contains("chatcodes_store_up 0"));
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = ChatCodesMetrics::neu().unwrap();
        metriken.connections.set(5);
        metriken.channels_archived_total.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("chatcodes_connections 5"));
        assert!(output.contains("chatcodes_channels_archived_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
