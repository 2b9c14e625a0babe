//! Fehlertypen fuer den Signaling-Service

use chatcodes_core::ChatCodesError;
use chatcodes_db::SpeicherFehler;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Dokumentenspeicher hat abgelehnt oder ist nicht erreichbar
    #[error("Speicherfehler: {0}")]
    Speicher(#[from] SpeicherFehler),

    /// Protokoll- oder Konfigurationsfehler aus dem Core
    #[error(transparent)]
    Core(#[from] ChatCodesError),

    /// Sitzung wurde bereits archiviert bzw. abgebaut
    #[error("Sitzung beendet: {0}")]
    SitzungBeendet(String),

    /// Kanal-Liste ist nicht im erwarteten Format
    #[error("Kanal-Liste beschaedigt: {0}")]
    ListeBeschaedigt(String),

    /// Das Paar aus Name und ID steht nicht in der Kanal-Liste
    #[error("Unbekannter Kanal: {0}")]
    UnbekannterKanal(String),
}

impl SignalingError {
    /// Erstellt einen Fehler fuer eine beendete Sitzung
    pub fn sitzung_beendet(kanal: impl std::fmt::Display) -> Self {
        Self::SitzungBeendet(kanal.to_string())
    }

    pub fn unbekannter_kanal(name: &str, id: impl std::fmt::Display) -> Self {
        Self::UnbekannterKanal(format!("{name} ({id})"))
    }

    /// HTTP-Status fuer die Kanal-API
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SitzungBeendet(_) => 409,
            Self::UnbekannterKanal(_) => 404,
            Self::Core(ChatCodesError::UngueltigeNachricht(_)) => 400,
            Self::Speicher(_) | Self::ListeBeschaedigt(_) => 503,
            _ => 500,
        }
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
