//! Health-Check-Endpunkt fuer chatcodes
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, aktiven Kanaelen und
//! Erreichbarkeit des Dokumentenspeichers

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::ChatCodesMetrics;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub channels_active: i64,
    pub connections: i64,
    pub store_connected: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    metriken: ChatCodesMetrics,
}

impl HealthState {
    pub fn neu(metriken: ChatCodesMetrics) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            metriken,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Wird von der Registry bei jedem Zugriff auf die Kanal-Liste gesetzt
    pub fn speicher_verbunden(&self) -> bool {
        self.metriken.speicher_verbunden()
    }

    /// Momentaufnahme fuer die Antwort
    pub fn antwort(&self) -> HealthResponse {
        let store_connected = self.speicher_verbunden();
        HealthResponse {
            status: if store_connected {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            channels_active: self.metriken.channels_active.get(),
            connections: self.metriken.connections.get(),
            store_connected,
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
///
/// Auch `degraded` liefert 200, damit Liveness-Checks nicht fehlschlagen.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.antwort()))
}
