//! Kanal-API – HTTP-Endpunkte neben dem WebSocket-Protokoll
//!
//! - `GET /new?topic=` – Namen vergeben, Kanal anlegen, `{channel, channelID}`
//! - `GET /valid/:name` – Ist der Name ein Wort der Wortliste?
//! - `GET /channels` – Die persistierte Kanal-Liste

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chatcodes_core::KanalId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::SignalingError;
use crate::server_state::SignalingState;

#[derive(Debug, Deserialize)]
pub struct NeuQuery {
    pub topic: Option<String>,
}

/// Antwort von `GET /new`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuerKanal {
    pub channel: String,
    #[serde(rename = "channelID")]
    pub channel_id: KanalId,
}

/// Router der Kanal-API
pub fn kanal_router(state: Arc<SignalingState>) -> Router {
    Router::new()
        .route("/new", get(neuer_kanal))
        .route("/valid/:name", get(name_gueltig))
        .route("/channels", get(kanal_liste))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Startet den HTTP-Server der Kanal-API
pub async fn kanal_api_starten(
    bind_addr: SocketAddr,
    state: Arc<SignalingState>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Kanal-API gestartet");

    axum::serve(listener, kanal_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
}

/// `GET /new` – vergibt einen freien Namen und legt den Kanal an
async fn neuer_kanal(
    State(state): State<Arc<SignalingState>>,
    Query(query): Query<NeuQuery>,
) -> Response {
    // Vergabe und Reservierung ohne .await dazwischen
    let name = state.namen.vergeben(&state.registry);
    match state
        .registry
        .erstellen_oder_holen(&name, None, query.topic)
        .await
    {
        Ok(sitzung) => (
            StatusCode::OK,
            Json(NeuerKanal {
                channel: name,
                channel_id: sitzung.kanal_id().clone(),
            }),
        )
            .into_response(),
        Err(e) => fehler_antwort(e),
    }
}

/// `GET /valid/:name`
async fn name_gueltig(
    State(state): State<Arc<SignalingState>>,
    Path(name): Path<String>,
) -> Response {
    let gueltig = state.namen.pool().enthaelt(&name);
    (
        StatusCode::OK,
        Json(json!({ "channel": name, "valid": gueltig })),
    )
        .into_response()
}

/// `GET /channels`
async fn kanal_liste(State(state): State<Arc<SignalingState>>) -> Response {
    match state.registry.liste().await {
        Ok(liste) => (StatusCode::OK, Json(liste)).into_response(),
        Err(e) => fehler_antwort(e),
    }
}

fn fehler_antwort(e: SignalingError) -> Response {
    tracing::warn!(fehler = %e, "Kanal-API-Anfrage fehlgeschlagen");
    (
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{NameAllocator, NamensPool};
    use crate::registry::ChannelRegistry;
    use crate::server_state::SignalingConfig;
    use axum::body::Body;
    use axum::http::Request;
    use chatcodes_db::SpeicherStore;
    use chatcodes_observability::ChatCodesMetrics;
    use tower::ServiceExt;

    async fn state() -> Arc<SignalingState> {
        let registry = ChannelRegistry::oeffnen(
            Arc::new(SpeicherStore::neu()),
            ChatCodesMetrics::neu().unwrap(),
        )
        .await
        .unwrap();
        SignalingState::neu(
            SignalingConfig::default(),
            registry,
            NameAllocator::neu(NamensPool::aus_text("otter\nbiber").unwrap()),
        )
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let antwort = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = antwort.status();
        let bytes = axum::body::to_bytes(antwort.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn neu_legt_kanal_mit_topic_an() {
        let state = state().await;
        let (status, json) = get_json(kanal_router(Arc::clone(&state)), "/new?topic=rust").await;
        assert_eq!(status, StatusCode::OK);

        let neu: NeuerKanal = serde_json::from_value(json).unwrap();
        assert!(["otter", "biber"].contains(&neu.channel.as_str()));

        let sitzung = state.registry.aktive_sitzung(&neu.channel).unwrap();
        assert_eq!(sitzung.kanal_id(), &neu.channel_id);
        assert_eq!(sitzung.topic(), Some("rust"));
    }

    #[tokio::test]
    async fn neu_vergibt_keinen_aktiven_namen() {
        let state = state().await;
        let mut namen = Vec::new();
        for _ in 0..3 {
            let (_, json) = get_json(kanal_router(Arc::clone(&state)), "/new").await;
            namen.push(json["channel"].as_str().unwrap().to_string());
        }
        namen.sort();
        namen.dedup();
        assert_eq!(namen.len(), 3);
    }

    #[tokio::test]
    async fn gueltige_namen() {
        let state = state().await;
        let (_, json) = get_json(kanal_router(Arc::clone(&state)), "/valid/otter").await;
        assert_eq!(json["valid"], json!(true));
        let (_, json) = get_json(kanal_router(state), "/valid/ott").await;
        assert_eq!(json["valid"], json!(false));
    }

    #[tokio::test]
    async fn liste() {
        let state = state().await;
        state.registry.erstellen_oder_holen("otter", None, None).await.unwrap();
        let (status, json) = get_json(kanal_router(state), "/channels").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["channelName"], json!("otter"));
        assert_eq!(json[0]["archived"], json!(false));
    }
}
