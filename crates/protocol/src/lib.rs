//! chatcodes-protocol – Protokoll-Definitionen
//!
//! - `control`: Kanal-Anfragen und Antwort-Umschlag (JSON, `cc`-Diskriminator)

pub mod control;

pub use control::{
    klassifizieren, Anfrage, Antwort, BeitrittsPayload, Eingang, Ignoriert, RaumAntwort,
    RaumInfo, VerfuegbarkeitsAntwort,
};
