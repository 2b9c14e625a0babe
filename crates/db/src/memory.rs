//! In-Memory-Dokumentenspeicher
//!
//! Haelt alle Dokumente in einer DashMap. Geht beim Prozessende verloren,
//! dient als Standard-Backend und als Grundlage fuer den `DateiStore`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{SpeicherFehler, SpeicherResult};
use crate::repository::{
    patch_anwenden, Dokument, DokumentSchluessel, DokumentSpeicher, Patch, PatchErgebnis,
};

/// Dokumentenspeicher im Arbeitsspeicher
///
/// Clone teilt den inneren Zustand.
#[derive(Debug, Clone, Default)]
pub struct SpeicherStore {
    dokumente: Arc<DashMap<DokumentSchluessel, Dokument>>,
}

impl SpeicherStore {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Baut einen Speicher aus vorhandenen Dokumenten (z.B. aus einer Datei)
    pub fn aus_dokumenten(dokumente: impl IntoIterator<Item = (DokumentSchluessel, Dokument)>) -> Self {
        let map = DashMap::new();
        for (schluessel, dokument) in dokumente {
            map.insert(schluessel, dokument);
        }
        Self {
            dokumente: Arc::new(map),
        }
    }

    /// Kopie aller Dokumente, sortiert nach Schluessel
    pub fn schnappschuss(&self) -> Vec<(DokumentSchluessel, Dokument)> {
        let mut alle: Vec<_> = self
            .dokumente
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        alle.sort_by(|a, b| (&a.0.sammlung, &a.0.id).cmp(&(&b.0.sammlung, &b.0.id)));
        alle
    }

    pub fn anzahl(&self) -> usize {
        self.dokumente.len()
    }

    pub(crate) fn erstellen_sofort(&self, schluessel: &DokumentSchluessel, initial: Value) -> bool {
        let mut neu = false;
        self.dokumente.entry(schluessel.clone()).or_insert_with(|| {
            neu = true;
            Dokument {
                version: 1,
                daten: initial,
            }
        });
        if neu {
            tracing::debug!(dokument = %schluessel, "Dokument angelegt");
        }
        neu
    }

    /// Uebernimmt einen bereits gesicherten Stand
    pub(crate) fn setzen(&self, schluessel: DokumentSchluessel, dokument: Dokument) {
        self.dokumente.insert(schluessel, dokument);
    }

    pub(crate) fn abrufen_sofort(&self, schluessel: &DokumentSchluessel) -> Option<Dokument> {
        self.dokumente.get(schluessel).map(|d| d.clone())
    }

    pub(crate) fn patch_sofort(
        &self,
        schluessel: &DokumentSchluessel,
        patch: Patch,
    ) -> SpeicherResult<PatchErgebnis> {
        let mut dokument = self
            .dokumente
            .get_mut(schluessel)
            .ok_or_else(|| SpeicherFehler::nicht_gefunden(schluessel.to_string()))?;
        let ergebnis = patch_anwenden(&mut dokument, patch)?;
        if let PatchErgebnis::Konflikt { ref aktuell } = ergebnis {
            tracing::debug!(dokument = %schluessel, aktuell = %aktuell, "Patch-Konflikt");
        }
        Ok(ergebnis)
    }
}

// Jede Operation gibt einmal an den Scheduler ab, damit sich der Speicher
// bei Nebenlaeufigkeit wie ein echtes I/O-Backend verhaelt.
#[async_trait]
impl DokumentSpeicher for SpeicherStore {
    async fn erstellen(
        &self,
        schluessel: &DokumentSchluessel,
        initial: Value,
    ) -> SpeicherResult<bool> {
        tokio::task::yield_now().await;
        Ok(self.erstellen_sofort(schluessel, initial))
    }

    async fn abrufen(&self, schluessel: &DokumentSchluessel) -> SpeicherResult<Option<Dokument>> {
        tokio::task::yield_now().await;
        Ok(self.abrufen_sofort(schluessel))
    }

    async fn patch_einreichen(
        &self,
        schluessel: &DokumentSchluessel,
        patch: Patch,
    ) -> SpeicherResult<PatchErgebnis> {
        tokio::task::yield_now().await;
        self.patch_sofort(schluessel, patch)
    }
}
