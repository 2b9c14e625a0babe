//! Gemeinsame Identifikationstypen fuer chatcodes
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Kanal- und Verbindungs-IDs zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Global eindeutige Kanal-ID
///
/// Wird bei der Erstellung eines Kanals vergeben und danach nie wieder
/// geaendert oder an einen anderen Kanal vergeben. Auf dem Draht ein
/// einfacher String, daher kein UUID-Zwang beim Einlesen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KanalId(String);

impl KanalId {
    /// Erstellt eine neue zufaellige KanalId
    pub fn neu() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Uebernimmt eine bereits bekannte ID (z.B. aus `channelID`)
    pub fn aus_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KanalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eindeutige ID einer Transport-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerbindungsId(pub Uuid);

impl VerbindungsId {
    /// Erstellt eine neue zufaellige VerbindungsId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for VerbindungsId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VerbindungsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "verbindung:{}", self.0)
    }
}

/// Aktueller Zeitpunkt als Unix-Millisekunden
pub fn jetzt_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
