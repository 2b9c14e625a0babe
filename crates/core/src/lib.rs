//! chatcodes-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen chatcodes-Crates gemeinsam genutzt werden.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{ChatCodesError, Result};
pub use types::{jetzt_ms, KanalId, VerbindungsId};
