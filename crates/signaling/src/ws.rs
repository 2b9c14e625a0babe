//! WebSocket-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` bindet einen TCP-Socket, fuehrt den
//! WebSocket-Handshake durch und startet fuer jede Verbindung eine
//! `ClientConnection`.
//!
//! ## Concurrency-Modell
//! Alle Verbindungs-Tasks laufen in einer `tokio::task::LocalSet`, also auf
//! einem Thread. Unterbrechungen gibt es nur an `.await`-Punkten
//! (Speicherzugriffe, Netzwerk).

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::LocalSet;

use crate::connection::ClientConnection;
use crate::server_state::SignalingState;

/// WebSocket-Signaling-Server
pub struct SignalingServer {
    state: Arc<SignalingState>,
    bind_addr: SocketAddr,
}

impl SignalingServer {
    pub fn neu(state: Arc<SignalingState>, bind_addr: SocketAddr) -> Self {
        Self { state, bind_addr }
    }

    /// Bindet den Listener und akzeptiert Verbindungen
    ///
    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
    pub async fn starten(
        self,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.mit_listener_starten(listener, shutdown_rx).await
    }

    /// Wie `starten`, aber mit bereits gebundenem Listener
    pub async fn mit_listener_starten(
        self,
        listener: TcpListener,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let local = LocalSet::new();
        local.run_until(self.accept_loop(listener, shutdown_rx)).await
    }

    /// Interne Accept-Loop (laeuft innerhalb der LocalSet)
    async fn accept_loop(
        self,
        listener: TcpListener,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        tracing::info!(
            server_name = %self.state.config.server_name,
            adresse = %lokale_addr,
            "WebSocket Signaling-Server gestartet"
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Some(platz) = self.state.verbindung_anmelden() else {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.state.config.max_verbindungen,
                                    "Server voll – Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            };

                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");
                            let state = Arc::clone(&self.state);
                            let shutdown_rx_clone = shutdown_rx.clone();

                            // Lokaler Task – kein Send erforderlich
                            tokio::task::spawn_local(async move {
                                let _platz = platz;
                                match tokio_tungstenite::accept_async(stream).await {
                                    Ok(ws) => {
                                        ClientConnection::neu(state, peer_addr)
                                            .verarbeiten(ws, shutdown_rx_clone)
                                            .await;
                                    }
                                    Err(e) => {
                                        tracing::debug!(
                                            peer = %peer_addr,
                                            fehler = %e,
                                            "WebSocket-Handshake fehlgeschlagen"
                                        );
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("WebSocket Signaling-Server gestoppt");
        Ok(())
    }
}
