//! chatcodes-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::{Context, Result};
use chatcodes_observability::{observability_server_starten, HealthState};
use chatcodes_signaling::{
    kanal_api_starten, ChannelRegistry, NameAllocator, NamensPool, SignalingConfig,
    SignalingServer, SignalingState,
};
use config::ServerConfig;
use std::sync::Arc;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Baut den geteilten Zustand auf (Speicher, Wortliste, Registry)
    pub async fn zustand_aufbauen(&self) -> Result<Arc<SignalingState>> {
        let backend = self.config.speicher_backend()?;
        let speicher = chatcodes_db::oeffnen(&backend)
            .await
            .with_context(|| format!("Dokumentenspeicher '{backend}' nicht verfuegbar"))?;

        let pool = NamensPool::laden(&self.config.kanaele.woerter_datei)
            .await
            .with_context(|| {
                format!(
                    "Wortliste '{}' nicht ladbar",
                    self.config.kanaele.woerter_datei.display()
                )
            })?;

        let metriken = chatcodes_observability::ChatCodesMetrics::neu()?;
        let registry = ChannelRegistry::oeffnen(speicher, metriken).await?;

        let signaling_config = SignalingConfig {
            server_name: self.config.server.name.clone(),
            max_verbindungen: self.config.server.max_verbindungen,
        };
        Ok(SignalingState::neu(
            signaling_config,
            registry,
            NameAllocator::neu(pool),
        ))
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Dokumentenspeicher oeffnen, Wortliste laden, Registry aufbauen
    /// 2. Observability-Server starten (optional)
    /// 3. Kanal-API starten
    /// 4. WebSocket-Listener starten
    /// 5. Auf Ctrl-C warten
    pub async fn starten(self) -> Result<()> {
        let ws_adresse = self.config.websocket_bind_adresse()?;
        let api_adresse = self.config.api_bind_adresse()?;

        tracing::info!(
            server_name = %self.config.server.name,
            websocket = %ws_adresse,
            api = %api_adresse,
            "Server startet"
        );

        let state = self.zustand_aufbauen().await?;
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse()?;
            let metriken = state.metriken().clone();
            let health = HealthState::neu(metriken.clone());
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(adresse, metriken, health).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        let api = tokio::spawn(kanal_api_starten(
            api_adresse,
            Arc::clone(&state),
            shutdown_rx.clone(),
        ));

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown-Signal empfangen, Server wird beendet"),
                Err(e) => tracing::error!(fehler = %e, "Signal-Handler fehlgeschlagen"),
            }
            let _ = shutdown_tx.send(true);
        });

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        SignalingServer::neu(Arc::clone(&state), ws_adresse)
            .starten(shutdown_rx)
            .await
            .with_context(|| format!("WebSocket-Listener auf {ws_adresse}"))?;

        match api.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(fehler = %e, "Kanal-API beendet"),
            Err(e) => tracing::error!(fehler = %e, "Kanal-API-Task abgebrochen"),
        }

        tracing::info!(
            uptime_sek = state.uptime_sek(),
            kanaele = state.registry.aktive_anzahl(),
            "Server gestoppt"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zustand_mit_wortliste_aufbauen() {
        let dir = tempfile::tempdir().unwrap();
        let woerter = dir.path().join("channel_names.txt");
        tokio::fs::write(&woerter, "otter\nbiber\n").await.unwrap();

        let mut config = ServerConfig::default();
        config.kanaele.woerter_datei = woerter;
        config.dokumente.backend = "datei".into();
        config.dokumente.datei = Some(dir.path().join("dokumente.json"));

        let state = Server::neu(config).zustand_aufbauen().await.unwrap();
        assert_eq!(state.namen.pool().len(), 2);

        let name = state.namen.vergeben(&state.registry);
        state.registry.erstellen_oder_holen(&name, None, None).await.unwrap();
        assert_eq!(state.registry.liste().await.unwrap().len(), 1);
        assert!(dir.path().join("dokumente.json").exists());
    }

    #[tokio::test]
    async fn fehlende_wortliste_ist_fehler() {
        let mut config = ServerConfig::default();
        config.kanaele.woerter_datei = "/nicht/vorhanden.txt".into();
        assert!(Server::neu(config).zustand_aufbauen().await.is_err());
    }
}
