//! Fehlertypen fuer den Dokumentenspeicher

use thiserror::Error;

/// Dokumentenspeicher-Fehlertypen
#[derive(Debug, Error)]
pub enum SpeicherFehler {
    #[error("Dokument nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Ungueltiger Pfad: {0}")]
    UngueltigerPfad(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpeicherFehler {
    pub fn nicht_gefunden(msg: impl Into<String>) -> Self {
        Self::NichtGefunden(msg.into())
    }

    pub fn ungueltiger_pfad(msg: impl Into<String>) -> Self {
        Self::UngueltigerPfad(msg.into())
    }
}

/// Result-Typ fuer den Dokumentenspeicher
pub type SpeicherResult<T> = Result<T, SpeicherFehler>;
