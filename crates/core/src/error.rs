//! Fehlertypen fuer chatcodes
//!
//! Zentraler Fehler-Enum fuer Fehler ausserhalb der Kanal-Verwaltung
//! (Protokoll, Konfiguration, Dateizugriff). Der Signaling-Crate definiert
//! eigene Fehler und konvertiert via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer chatcodes
pub type Result<T> = std::result::Result<T, ChatCodesError>;

/// Allgemeine Fehler im chatcodes-System
#[derive(Debug, Error)]
pub enum ChatCodesError {
    // --- Dateisystem ---
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl ChatCodesError {
    /// Erstellt einen Protokollfehler
    pub fn nachricht(msg: impl Into<String>) -> Self {
        Self::UngueltigeNachricht(msg.into())
    }

    /// Erstellt einen Konfigurationsfehler
    pub fn konfiguration(msg: impl Into<String>) -> Self {
        Self::Konfiguration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = ChatCodesError::konfiguration("Wortliste ist leer");
        assert_eq!(e.to_string(), "Konfigurationsfehler: Wortliste ist leer");
    }

    #[test]
    fn io_fehler_konvertierung() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "fehlt");
        let e: ChatCodesError = io.into();
        assert!(matches!(e, ChatCodesError::Io(_)));
    }
}
