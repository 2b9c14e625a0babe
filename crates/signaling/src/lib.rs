//! chatcodes-signaling – Kanal-Lebenszyklus und Sitzungs-Routing
//!
//! Dieser Crate vergibt Kanalnamen, verwaltet die aktiven Kanaele und
//! routet die Control-Anfragen der WebSocket-Verbindungen an die richtige
//! Sitzung. Leere Kanaele werden archiviert und geben ihren Namen frei.
//!
//! ## Architektur
//!
//! ```text
//! WebSocket Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein lokaler Task)
//!     |
//!     v
//! SessionRouter
//!     |  request-join-room, channel-available
//!     v
//! ChannelRegistry ---- chatcodes/channels (DokumentSpeicher)
//!     |  erstellen_oder_holen, ist_leer, index_von, archivieren
//!     v
//! ChannelSession ----- <name>-<id>/users
//!        |  letztes Mitglied weg
//!        +-----------> LeerBeobachter -> Archivierung
//!
//! NameAllocator  – freie Kanalnamen aus der Wortliste
//! Kanal-API      – /new, /valid/:name, /channels
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod names;
pub mod registry;
pub mod server_state;
pub mod session;
pub mod ws;

// Bequeme Re-Exporte
pub use connection::ClientConnection;
pub use dispatcher::{SessionRouter, VerbindungsKontext};
pub use error::{SignalingError, SignalingResult};
pub use http::{kanal_api_starten, kanal_router, NeuerKanal};
pub use names::{KandidatenCursor, NameAllocator, NamensPool, Verfuegbarkeit};
pub use registry::{ArchivErgebnis, Archivierung, ChannelListEntry, ChannelRegistry};
pub use server_state::{SignalingConfig, SignalingState, VerbindungsPlatz};
pub use session::{ChannelSession, LeerBeobachter, NamensraumHandle, SitzungsPhase};
pub use ws::SignalingServer;
