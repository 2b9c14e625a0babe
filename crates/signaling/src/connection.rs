//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung laeuft als eigener lokaler Task. Text-Frames gehen an den
//! `SessionRouter`, dessen Antwort (falls vorhanden) direkt zurueckgeschickt
//! wird. Der naechste Frame wird erst gelesen, wenn die vorige Anfrage
//! fertig ist; Antworten kommen damit in Anfrage-Reihenfolge.

use chatcodes_core::VerbindungsId;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::dispatcher::VerbindungsKontext;
use crate::server_state::SignalingState;

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    verbindung: VerbindungsId,
}

impl ClientConnection {
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        Self {
            state,
            peer_addr,
            verbindung: VerbindungsId::new(),
        }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis der Client trennt oder ein Shutdown-Signal eingeht.
    /// Danach wird die Verbindung aus ihrem Kanal ausgetragen.
    pub async fn verarbeiten<S>(
        self,
        ws: WebSocketStream<S>,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_addr = self.peer_addr;
        let mut ctx = VerbindungsKontext::neu(self.verbindung);
        let router = &self.state.router;
        let (mut sink, mut stream) = ws.split();

        tracing::info!(peer = %peer_addr, verbindung = %self.verbindung, "Neue Verbindung");

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let Some(antwort) = router.verarbeiten(text.as_str(), &mut ctx).await else {
                                continue;
                            };
                            if let Err(e) = sink.send(Message::Text(antwort.into())).await {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    fehler = %e,
                                    "Senden fehlgeschlagen"
                                );
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(daten))) => {
                            if let Err(e) = sink.send(Message::Pong(daten)).await {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    fehler = %e,
                                    "Pong fehlgeschlagen"
                                );
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Client getrennt");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(peer = %peer_addr, fehler = %e, "WebSocket-Lesefehler");
                            break;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!(peer = %peer_addr, "Shutdown, Verbindung wird geschlossen");
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }

        router.verbindung_getrennt(&mut ctx).await;
        tracing::debug!(peer = %peer_addr, verbindung = %self.verbindung, "Verbindung beendet");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{NameAllocator, NamensPool};
    use crate::registry::ChannelRegistry;
    use crate::server_state::SignalingConfig;
    use chatcodes_db::SpeicherStore;
    use chatcodes_observability::ChatCodesMetrics;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::Role;

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
            NameAllocator::neu(NamensPool::aus_text("delta").unwrap()),
        )
    }

    #[tokio::test]
    async fn pong_an_getrennten_client_beendet_schleife() {
        let state = state().await;
        let (server_seite, client_seite) = tokio::io::duplex(4096);

        let mut client = WebSocketStream::from_raw_socket(client_seite, Role::Client, None).await;
        client.send(Message::Ping(vec![1u8].into())).await.unwrap();
        let beitritt = r#"{"cc":1,"type":"request-join-room","messageID":1,"payload":{"channel":"delta"}}"#;
        client.send(Message::Text(beitritt.into())).await.unwrap();
        drop(client);

        let ws = WebSocketStream::from_raw_socket(server_seite, Role::Server, None).await;
        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            ClientConnection::neu(Arc::clone(&state), peer).verarbeiten(ws, stop_rx),
        )
        .await
        .expect("Schleife haengt");

        // Nach dem gescheiterten Pong wird nichts mehr gelesen
        let metriken = state.metriken();
        assert_eq!(
            metriken
                .messages_total
                .with_label_values(&["request-join-room"])
                .get(),
            0
        );
        assert_eq!(metriken.channels_created_total.get(), 0);
    }
}
