//! chatcodes-db – Dokumentenspeicher-Abstraktion
//!
//! Dieses Crate stellt den `DokumentSpeicher`-Trait bereit, hinter dem die
//! Kanal-Liste und die Namensraeume der Kanaele liegen. Zwei Backends:
//! `SpeicherStore` (In-Memory) und `DateiStore` (JSON-Datei).

pub mod datei;
pub mod error;
pub mod memory;
pub mod repository;

use std::sync::Arc;

pub use datei::DateiStore;
pub use error::{SpeicherFehler, SpeicherResult};
pub use memory::SpeicherStore;
pub use repository::{
    CompareAndSwapPatch, Dokument, DokumentSchluessel, DokumentSpeicher, Patch, PatchErgebnis,
    Pfad, PfadSegment, SpeicherBackend,
};

/// Oeffnet das konfigurierte Backend
pub async fn oeffnen(backend: &SpeicherBackend) -> SpeicherResult<Arc<dyn DokumentSpeicher>> {
    tracing::info!(backend = %backend, "Dokumentenspeicher wird geoeffnet");
    Ok(match backend {
        SpeicherBackend::Memory => Arc::new(SpeicherStore::neu()),
        SpeicherBackend::Datei(pfad) => Arc::new(DateiStore::oeffnen(pfad).await?),
    })
}
