//! Control-Protokoll (JSON ueber WebSocket)
//!
//! Definiert die Anfragen, die ein Client zur Kanal-Verwaltung schickt, und
//! den gemeinsamen Antwort-Umschlag.
//!
//! ## Design
//! - Request/Response Pattern: jede Anfrage traegt eine `messageID`, die
//!   unveraendert in der Antwort zurueckkommt (beliebiger JSON-Wert)
//! - Anfragen tragen `cc: 1`, Antworten `cc: 2`
//! - Alles ohne `cc: 1` oder mit unbekanntem `type` gehoert nicht zu uns
//!   (z.B. Dokument-Sync-Verkehr auf derselben Verbindung) und wird
//!   ignoriert statt als Fehler behandelt
//!
//! ```text
//! -> {cc:1, type:"request-join-room", messageID, payload:{channel, channelID?}}
//! <- {cc:2, channel, messageID, payload:{id, ns}}
//!
//! -> {cc:1, type:"channel-available", messageID, channel, payload:{}}
//! <- {cc:2, channel, messageID, payload:<bool>}
//! ```

use chatcodes_core::{ChatCodesError, KanalId, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Diskriminator fuer Anfragen vom Client
pub const CC_ANFRAGE: u64 = 1;
/// Diskriminator fuer Antworten vom Server
pub const CC_ANTWORT: u64 = 2;

/// Wert von `type` fuer Beitritts-Anfragen
pub const TYP_RAUM_BEITRETEN: &str = "request-join-room";
/// Wert von `type` fuer Verfuegbarkeits-Anfragen
pub const TYP_KANAL_VERFUEGBAR: &str = "channel-available";

// ---------------------------------------------------------------------------
// Anfragen
// ---------------------------------------------------------------------------

/// Payload von `request-join-room`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeitrittsPayload {
    /// Kanalname
    pub channel: String,
    /// Vorhandene Kanal-ID (Reconnect oder Archiv-Ansicht)
    ///
    /// `""`, `null`, `false` und `0` gelten als nicht angegeben.
    #[serde(
        rename = "channelID",
        default,
        deserialize_with = "kanal_id_oder_nichts",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_id: Option<KanalId>,
    /// Restliche Felder beschreiben das Mitglied (Name, Farbe, ...)
    #[serde(flatten)]
    pub mitglied: Map<String, Value>,
}

fn kanal_id_oder_nichts<'de, D>(deserializer: D) -> std::result::Result<Option<KanalId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(id)) if !id.is_empty() => Ok(Some(KanalId::aus_string(id))),
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(Value::String(_)) => Ok(None),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Ok(None),
        Some(anderes) => Err(serde::de::Error::custom(format!(
            "channelID muss ein String sein, war {anderes}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct RaumBeitretenRoh {
    #[serde(rename = "messageID")]
    message_id: Value,
    payload: BeitrittsPayload,
}

#[derive(Debug, Deserialize)]
struct KanalVerfuegbarRoh {
    #[serde(rename = "messageID")]
    message_id: Value,
    channel: String,
}

/// Eine vollstaendig geparste Anfrage
#[derive(Debug, Clone)]
pub enum Anfrage {
    /// Kanal beitreten (oder erneut anbinden)
    RaumBeitreten {
        message_id: Value,
        payload: BeitrittsPayload,
    },
    /// Ist unter diesem Namen gerade niemand?
    KanalVerfuegbar { message_id: Value, channel: String },
}

impl Anfrage {
    /// Protokollname der Anfrage (fuer Logs und Metriken)
    pub fn typ(&self) -> &'static str {
        match self {
            Self::RaumBeitreten { .. } => TYP_RAUM_BEITRETEN,
            Self::KanalVerfuegbar { .. } => TYP_KANAL_VERFUEGBAR,
        }
    }
}

/// Warum eine Nachricht nicht fuer uns bestimmt war
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ignoriert {
    /// `cc` fehlt oder ist nicht 1
    KeinControl,
    /// `type` fehlt oder ist unbekannt
    UnbekannterTyp(Option<String>),
}

/// Ergebnis der Klassifizierung einer eingehenden Text-Nachricht
#[derive(Debug, Clone)]
pub enum Eingang {
    Anfrage(Anfrage),
    Ignoriert(Ignoriert),
}

/// Klassifiziert und parst eine eingehende Text-Nachricht
///
/// Unparsbares JSON und fehlende Pflichtfelder ergeben einen Fehler,
/// fremde Nachrichten ein `Eingang::Ignoriert`.
pub fn klassifizieren(text: &str) -> Result<Eingang> {
    let wert: Value = serde_json::from_str(text)
        .map_err(|e| ChatCodesError::nachricht(format!("kein gueltiges JSON: {e}")))?;

    if wert.get("cc").and_then(Value::as_u64) != Some(CC_ANFRAGE) {
        return Ok(Eingang::Ignoriert(Ignoriert::KeinControl));
    }

    let typ = wert.get("type").and_then(Value::as_str).map(str::to_owned);
    let anfrage = match typ.as_deref() {
        Some(TYP_RAUM_BEITRETEN) => {
            let roh: RaumBeitretenRoh = serde_json::from_value(wert)
                .map_err(|e| ChatCodesError::nachricht(format!("{TYP_RAUM_BEITRETEN}: {e}")))?;
            kanalname_pruefen(&roh.payload.channel)?;
            Anfrage::RaumBeitreten {
                message_id: roh.message_id,
                payload: roh.payload,
            }
        }
        Some(TYP_KANAL_VERFUEGBAR) => {
            let roh: KanalVerfuegbarRoh = serde_json::from_value(wert)
                .map_err(|e| ChatCodesError::nachricht(format!("{TYP_KANAL_VERFUEGBAR}: {e}")))?;
            kanalname_pruefen(&roh.channel)?;
            Anfrage::KanalVerfuegbar {
                message_id: roh.message_id,
                channel: roh.channel,
            }
        }
        _ => return Ok(Eingang::Ignoriert(Ignoriert::UnbekannterTyp(typ))),
    };

    Ok(Eingang::Anfrage(anfrage))
}

fn kanalname_pruefen(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\n') {
        return Err(ChatCodesError::nachricht(format!(
            "ungueltiger Kanalname {name:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Antworten
// ---------------------------------------------------------------------------

/// Payload der Beitritts-Antwort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaumInfo {
    /// Kanal-ID der Sitzung
    pub id: KanalId,
    /// Namensraum im Dokumentenspeicher
    pub ns: String,
}

/// Gemeinsamer Antwort-Umschlag `{cc:2, channel, messageID, payload}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Antwort<P> {
    pub cc: u64,
    pub channel: String,
    #[serde(rename = "messageID")]
    pub message_id: Value,
    pub payload: P,
}

impl<P: Serialize> Antwort<P> {
    pub fn neu(channel: impl Into<String>, message_id: Value, payload: P) -> Self {
        Self {
            cc: CC_ANTWORT,
            channel: channel.into(),
            message_id,
            payload,
        }
    }

    /// Serialisiert die Antwort fuer den Transport
    pub fn als_text(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ChatCodesError::nachricht(format!("Antwort nicht serialisierbar: {e}")))
    }
}

/// Antwort auf `request-join-room`
pub type RaumAntwort = Antwort<RaumInfo>;
/// Antwort auf `channel-available`
pub type VerfuegbarkeitsAntwort = Antwort<bool>;
