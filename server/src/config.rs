//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use anyhow::{bail, Context};
use chatcodes_db::SpeicherBackend;
use chatcodes_observability::logging::{log_format_gueltig, log_level_gueltig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Kanal-Einstellungen (Wortliste)
    pub kanaele: KanalEinstellungen,
    /// Dokumentenspeicher
    pub dokumente: DokumentEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger WebSocket-Verbindungen
    pub max_verbindungen: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "chatcodes".into(),
            max_verbindungen: 1024,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle Listener
    pub bind_adresse: String,
    /// Port fuer das WebSocket-Protokoll
    pub port: u16,
    /// Port fuer die Kanal-API (/new, /valid, /channels)
    pub api_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8080,
            api_port: 8081,
        }
    }
}

/// Kanal-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KanalEinstellungen {
    /// Wortliste fuer Kanalnamen (ein Wort pro Zeile)
    pub woerter_datei: PathBuf,
}

impl Default for KanalEinstellungen {
    fn default() -> Self {
        Self {
            woerter_datei: PathBuf::from("channel_names.txt"),
        }
    }
}

/// Dokumentenspeicher-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DokumentEinstellungen {
    /// Backend: "memory" oder "datei"
    pub backend: String,
    /// Pfad der JSON-Datei (nur Backend "datei")
    pub datei: Option<PathBuf>,
}

impl Default for DokumentEinstellungen {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            datei: None,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Logging ist hier noch nicht initialisiert
                eprintln!("Konfigurationsdatei '{pfad}' nicht gefunden, verwende Standardwerte");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.pruefen()?;
        Ok(config)
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.server.max_verbindungen == 0 {
            bail!("server.max_verbindungen muss groesser als 0 sein");
        }
        if !log_level_gueltig(&self.logging.level) {
            bail!("Unbekanntes Log-Level '{}'", self.logging.level);
        }
        if !log_format_gueltig(&self.logging.format) {
            bail!("Unbekanntes Log-Format '{}'", self.logging.format);
        }
        self.speicher_backend()?;
        self.websocket_bind_adresse()?;
        Ok(())
    }

    /// Backend des Dokumentenspeichers
    pub fn speicher_backend(&self) -> anyhow::Result<SpeicherBackend> {
        match self.dokumente.backend.as_str() {
            "memory" => Ok(SpeicherBackend::Memory),
            "datei" => {
                let pfad = self
                    .dokumente
                    .datei
                    .clone()
                    .context("dokumente.datei fehlt fuer Backend 'datei'")?;
                Ok(SpeicherBackend::Datei(pfad))
            }
            anderes => bail!("Unbekanntes Dokumenten-Backend '{anderes}'"),
        }
    }

    fn adresse(&self, port: u16) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, port);
        adresse
            .parse()
            .with_context(|| format!("Ungueltige Bind-Adresse '{adresse}'"))
    }

    /// Bind-Adresse fuer das WebSocket-Protokoll
    pub fn websocket_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.adresse(self.netzwerk.port)
    }

    /// Bind-Adresse fuer die Kanal-API
    pub fn api_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.adresse(self.netzwerk.api_port)
    }

    /// Bind-Adresse fuer den Observability-Server
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        self.adresse(self.observability.port)
    }
}
