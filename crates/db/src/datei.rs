//! JSON-Datei-Dokumentenspeicher
//!
//! Verhaelt sich wie der `SpeicherStore`, schreibt aber nach jeder Aenderung
//! den gesamten Bestand in eine JSON-Datei und liest ihn beim Oeffnen wieder
//! ein. Damit ueberlebt die Kanal-Liste einen Neustart.
//!
//! Aenderungen werden an einer Kopie vorgenommen und erst nach dem
//! erfolgreichen Schreiben in den Speicher uebernommen.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{SpeicherFehler, SpeicherResult};
use crate::memory::SpeicherStore;
use crate::repository::{
    patch_anwenden, Dokument, DokumentSchluessel, DokumentSpeicher, Patch, PatchErgebnis,
};

/// Ein Eintrag in der Datei
#[derive(Debug, Serialize, Deserialize)]
struct DateiEintrag {
    sammlung: String,
    id: String,
    version: u64,
    daten: Value,
}

/// Dateibasierter Dokumentenspeicher
pub struct DateiStore {
    pfad: PathBuf,
    inner: SpeicherStore,
    /// Serialisiert Aendern, Schreiben und Uebernehmen, damit nie ein
    /// aelterer Stand einen neueren ueberschreibt
    schreib_sperre: Mutex<()>,
}

impl DateiStore {
    /// Oeffnet (oder beginnt) die Datei unter `pfad`
    pub async fn oeffnen(pfad: impl AsRef<Path>) -> SpeicherResult<Self> {
        let pfad = pfad.as_ref().to_path_buf();
        let inner = match tokio::fs::read_to_string(&pfad).await {
            Ok(inhalt) => {
                let eintraege: Vec<DateiEintrag> = serde_json::from_str(&inhalt)?;
                tracing::info!(
                    pfad = %pfad.display(),
                    dokumente = eintraege.len(),
                    "Dokumentenspeicher geladen"
                );
                SpeicherStore::aus_dokumenten(eintraege.into_iter().map(|e| {
                    (
                        DokumentSchluessel::neu(e.sammlung, e.id),
                        Dokument {
                            version: e.version,
                            daten: e.daten,
                        },
                    )
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(pfad = %pfad.display(), "Neue Speicherdatei wird angelegt");
                SpeicherStore::neu()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            pfad,
            inner,
            schreib_sperre: Mutex::new(()),
        })
    }

    pub fn pfad(&self) -> &Path {
        &self.pfad
    }

    /// Schreibt den Bestand mit `dokument` unter `schluessel` in die Datei.
    /// Der Aufrufer haelt die Schreibsperre.
    async fn sichern_mit(
        &self,
        schluessel: &DokumentSchluessel,
        dokument: &Dokument,
    ) -> SpeicherResult<()> {
        let mut bestand = self.inner.schnappschuss();
        match bestand.iter_mut().find(|(s, _)| s == schluessel) {
            Some((_, d)) => *d = dokument.clone(),
            None => {
                bestand.push((schluessel.clone(), dokument.clone()));
                bestand.sort_by(|a, b| (&a.0.sammlung, &a.0.id).cmp(&(&b.0.sammlung, &b.0.id)));
            }
        }

        let eintraege: Vec<DateiEintrag> = bestand
            .into_iter()
            .map(|(s, d)| DateiEintrag {
                sammlung: s.sammlung,
                id: s.id,
                version: d.version,
                daten: d.daten,
            })
            .collect();
        let json = serde_json::to_vec_pretty(&eintraege)?;

        // Erst in eine Nachbardatei, dann umbenennen
        let tmp = self.pfad.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.pfad).await?;
        Ok(())
    }
}

#[async_trait]
impl DokumentSpeicher for DateiStore {
    async fn erstellen(
        &self,
        schluessel: &DokumentSchluessel,
        initial: Value,
    ) -> SpeicherResult<bool> {
        let _sperre = self.schreib_sperre.lock().await;
        if self.inner.abrufen_sofort(schluessel).is_some() {
            return Ok(false);
        }
        let dokument = Dokument {
            version: 1,
            daten: initial,
        };
        self.sichern_mit(schluessel, &dokument).await?;
        self.inner.setzen(schluessel.clone(), dokument);
        tracing::debug!(dokument = %schluessel, "Dokument angelegt");
        Ok(true)
    }

    async fn abrufen(&self, schluessel: &DokumentSchluessel) -> SpeicherResult<Option<Dokument>> {
        Ok(self.inner.abrufen_sofort(schluessel))
    }

    async fn patch_einreichen(
        &self,
        schluessel: &DokumentSchluessel,
        patch: Patch,
    ) -> SpeicherResult<PatchErgebnis> {
        let _sperre = self.schreib_sperre.lock().await;
        let mut kopie = self
            .inner
            .abrufen_sofort(schluessel)
            .ok_or_else(|| SpeicherFehler::nicht_gefunden(schluessel.to_string()))?;
        let ergebnis = patch_anwenden(&mut kopie, patch)?;
        if let PatchErgebnis::Konflikt { ref aktuell } = ergebnis {
            tracing::debug!(dokument = %schluessel, aktuell = %aktuell, "Patch-Konflikt");
            return Ok(ergebnis);
        }
        self.sichern_mit(schluessel, &kopie).await?;
        self.inner.setzen(schluessel.clone(), kopie);
        Ok(ergebnis)
    }
}
