//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt Registry, Router und Namensvergabe als geteilte Referenzen fuer
//! Verbindungs-Tasks und die Kanal-API.

use chatcodes_observability::ChatCodesMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::dispatcher::SessionRouter;
use crate::names::NameAllocator;
use crate::registry::ChannelRegistry;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Servers
    pub server_name: String,
    /// Maximale gleichzeitige WebSocket-Verbindungen
    pub max_verbindungen: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "chatcodes".to_string(),
            max_verbindungen: 1024,
        }
    }
}

/// Gemeinsamer Server-Zustand (Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    pub registry: ChannelRegistry,
    pub router: SessionRouter,
    pub namen: NameAllocator,
    /// Offene Verbindungen (fuer das Limit)
    verbindungen: AtomicUsize,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    pub fn neu(config: SignalingConfig, registry: ChannelRegistry, namen: NameAllocator) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            router: SessionRouter::neu(registry.clone()),
            registry,
            namen,
            verbindungen: AtomicUsize::new(0),
            start_time: Instant::now(),
        })
    }

    pub fn metriken(&self) -> &ChatCodesMetrics {
        self.registry.metriken()
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn verbindungen(&self) -> usize {
        self.verbindungen.load(Ordering::Acquire)
    }

    /// Reserviert einen Verbindungsplatz, `None` wenn der Server voll ist
    ///
    /// Der Platz wird beim Drop des `VerbindungsPlatz` wieder frei.
    pub fn verbindung_anmelden(self: &Arc<Self>) -> Option<VerbindungsPlatz> {
        let max = self.config.max_verbindungen;
        self.verbindungen
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        self.metriken().connections.inc();
        Some(VerbindungsPlatz {
            state: Arc::clone(self),
        })
    }
}

/// Belegter Verbindungsplatz
pub struct VerbindungsPlatz {
    state: Arc<SignalingState>,
}

impl Drop for VerbindungsPlatz {
    fn drop(&mut self) {
        self.state.verbindungen.fetch_sub(1, Ordering::AcqRel);
        self.state.metriken().connections.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NamensPool;
    use chatcodes_db::SpeicherStore;

    async fn state(max: usize) -> Arc<SignalingState> {
        let registry = ChannelRegistry::oeffnen(
            Arc::new(SpeicherStore::neu()),
            ChatCodesMetrics::neu().unwrap(),
        )
        .await
        .unwrap();
        let config = SignalingConfig {
            max_verbindungen: max,
            ..Default::default()
        };
        SignalingState::neu(
            config,
            registry,
            NameAllocator::neu(NamensPool::aus_text("otter").unwrap()),
        )
    }

    #[tokio::test]
    async fn verbindungslimit() {
        let state = state(2).await;
        let a = state.verbindung_anmelden().unwrap();
        let _b = state.verbindung_anmelden().unwrap();
        assert!(state.verbindung_anmelden().is_none());
        assert_eq!(state.metriken().connections.get(), 2);

        drop(a);
        assert_eq!(state.verbindungen(), 1);
        assert_eq!(state.metriken().connections.get(), 1);
        assert!(state.verbindung_anmelden().is_some());
    }
}
