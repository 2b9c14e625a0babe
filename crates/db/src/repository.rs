//! Speicher-Trait und Patch-Modell
//!
//! Der Dokumentenspeicher ist fuer die Kanal-Verwaltung ein opaker
//! Mitspieler: Dokumente anlegen, abrufen und Patches einreichen. Ersetzungen
//! laufen optimistisch (Compare-and-Swap), ein Konflikt ist ein regulaeres
//! Ergebnis und kein Fehler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SpeicherFehler, SpeicherResult};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Unterstuetzte Speicher-Backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeicherBackend {
    /// Nur im Arbeitsspeicher – Standard fuer Entwicklung und Tests
    Memory,
    /// JSON-Datei, wird nach jeder Aenderung geschrieben
    Datei(std::path::PathBuf),
}

impl std::fmt::Display for SpeicherBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Datei(pfad) => write!(f, "datei:{}", pfad.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// Dokumente
// ---------------------------------------------------------------------------

/// Adresse eines Dokuments: Sammlung (Namensraum) + Dokument-ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DokumentSchluessel {
    pub sammlung: String,
    pub id: String,
}

impl DokumentSchluessel {
    pub fn neu(sammlung: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            sammlung: sammlung.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for DokumentSchluessel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sammlung, self.id)
    }
}

/// Ein Dokument mit Versionszaehler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dokument {
    /// Wird bei jedem angewendeten Patch erhoeht
    pub version: u64,
    pub daten: Value,
}

// ---------------------------------------------------------------------------
// Pfade
// ---------------------------------------------------------------------------

/// Ein Segment eines JSON-Pfads (Objektfeld oder Array-Index)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PfadSegment {
    Index(usize),
    Feld(String),
}

/// Pfad in ein Dokument, z.B. `["channels", 3, "archived"]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pfad(pub Vec<PfadSegment>);

impl Pfad {
    pub fn wurzel() -> Self {
        Self::default()
    }

    pub fn feld(mut self, name: impl Into<String>) -> Self {
        self.0.push(PfadSegment::Feld(name.into()));
        self
    }

    pub fn index(mut self, i: usize) -> Self {
        self.0.push(PfadSegment::Index(i));
        self
    }

    /// Liest den Wert an diesem Pfad
    pub fn lesen<'a>(&self, wurzel: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(wurzel, |wert, segment| match segment {
            PfadSegment::Feld(name) => wert.get(name.as_str()),
            PfadSegment::Index(i) => wert.get(*i),
        })
    }

    fn lesen_mut<'a>(&self, wurzel: &'a mut Value) -> Option<&'a mut Value> {
        self.0.iter().try_fold(wurzel, |wert, segment| match segment {
            PfadSegment::Feld(name) => wert.get_mut(name.as_str()),
            PfadSegment::Index(i) => wert.get_mut(*i),
        })
    }
}

impl std::fmt::Display for Pfad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let teile: Vec<String> = self
            .0
            .iter()
            .map(|s| match s {
                PfadSegment::Feld(name) => name.clone(),
                PfadSegment::Index(i) => i.to_string(),
            })
            .collect();
        write!(f, "/{}", teile.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Optimistische Ersetzung: greift nur wenn der aktuelle Wert `erwartet` ist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareAndSwapPatch {
    pub pfad: Pfad,
    /// Erwarteter alter Wert (fehlender Wert zaehlt als `null`)
    pub erwartet: Value,
    pub neu: Value,
}

/// Eine Aenderung an einem Dokument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Patch {
    /// Haengt `wert` an die Sequenz unter `pfad` an
    Einfuegen { pfad: Pfad, wert: Value },
    /// Ersetzt einen Wert optimistisch
    Ersetzen(CompareAndSwapPatch),
}

/// Ergebnis eines eingereichten Patches
#[derive(Debug, Clone, PartialEq)]
pub enum PatchErgebnis {
    /// Patch angewendet, neue Dokumentversion
    Angewendet { version: u64 },
    /// Ein anderer Schreiber war schneller; `aktuell` ist der vorgefundene Wert
    Konflikt { aktuell: Value },
}

impl PatchErgebnis {
    pub fn ist_angewendet(&self) -> bool {
        matches!(self, Self::Angewendet { .. })
    }
}

/// Wendet einen Patch auf ein Dokument an (gemeinsam fuer alle Backends)
pub fn patch_anwenden(dokument: &mut Dokument, patch: Patch) -> SpeicherResult<PatchErgebnis> {
    match patch {
        Patch::Einfuegen { pfad, wert } => {
            let liste = pfad
                .lesen_mut(&mut dokument.daten)
                .and_then(Value::as_array_mut)
                .ok_or_else(|| SpeicherFehler::ungueltiger_pfad(format!("{pfad} ist keine Sequenz")))?;
            liste.push(wert);
        }
        Patch::Ersetzen(cas) => {
            let aktuell = cas.pfad.lesen(&dokument.daten).cloned().unwrap_or(Value::Null);
            if aktuell != cas.erwartet {
                return Ok(PatchErgebnis::Konflikt { aktuell });
            }
            wert_setzen(&mut dokument.daten, &cas.pfad, cas.neu)?;
        }
    }
    dokument.version += 1;
    Ok(PatchErgebnis::Angewendet {
        version: dokument.version,
    })
}

fn wert_setzen(wurzel: &mut Value, pfad: &Pfad, neu: Value) -> SpeicherResult<()> {
    let Some((letztes, eltern)) = pfad.0.split_last() else {
        *wurzel = neu;
        return Ok(());
    };
    let eltern_pfad = Pfad(eltern.to_vec());
    let eltern_wert = eltern_pfad
        .lesen_mut(wurzel)
        .ok_or_else(|| SpeicherFehler::ungueltiger_pfad(format!("{eltern_pfad} existiert nicht")))?;

    match (letztes, eltern_wert) {
        (PfadSegment::Feld(name), Value::Object(objekt)) => {
            objekt.insert(name.clone(), neu);
            Ok(())
        }
        (PfadSegment::Index(i), Value::Array(liste)) if *i < liste.len() => {
            liste[*i] = neu;
            Ok(())
        }
        _ => Err(SpeicherFehler::ungueltiger_pfad(format!(
            "{pfad} ist nicht beschreibbar"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Speicher-Trait
// ---------------------------------------------------------------------------

/// Schnittstelle zum Dokumentenspeicher
///
/// Jeder Aufruf ist ein moeglicher Unterbrechungspunkt: zwischen Aufruf und
/// Ergebnis koennen andere Tasks laufen.
#[async_trait]
pub trait DokumentSpeicher: Send + Sync {
    /// Legt das Dokument an, falls es noch nicht existiert.
    /// Gibt `true` zurueck wenn es neu angelegt wurde.
    async fn erstellen(&self, schluessel: &DokumentSchluessel, initial: Value)
        -> SpeicherResult<bool>;

    /// Laedt den aktuellen Stand eines Dokuments
    async fn abrufen(&self, schluessel: &DokumentSchluessel) -> SpeicherResult<Option<Dokument>>;

    /// Reicht einen Patch ein
    async fn patch_einreichen(
        &self,
        schluessel: &DokumentSchluessel,
        patch: Patch,
    ) -> SpeicherResult<PatchErgebnis>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dok(daten: Value) -> Dokument {
        Dokument { version: 1, daten }
    }

    #[test]
    fn pfad_lesen() {
        let daten = json!({"channels": [{"archived": false}]});
        let pfad = Pfad::wurzel().feld("channels").index(0).feld("archived");
        assert_eq!(pfad.lesen(&daten), Some(&json!(false)));
        assert_eq!(pfad.to_string(), "/channels/0/archived");
        assert!(Pfad::wurzel().feld("fehlt").lesen(&daten).is_none());
    }

    #[test]
    fn pfad_serde_wie_json0() {
        let pfad = Pfad::wurzel().feld("channels").index(3);
        assert_eq!(serde_json::to_value(&pfad).unwrap(), json!(["channels", 3]));
    }

    #[test]
    fn einfuegen_haengt_an() {
        let mut d = dok(json!({"channels": []}));
        let ergebnis = patch_anwenden(
            &mut d,
            Patch::Einfuegen {
                pfad: Pfad::wurzel().feld("channels"),
                wert: json!({"channelName": "alpha"}),
            },
        )
        .unwrap();
        assert_eq!(ergebnis, PatchErgebnis::Angewendet { version: 2 });
        assert_eq!(d.daten["channels"][0]["channelName"], json!("alpha"));
    }

    #[test]
    fn einfuegen_in_nicht_sequenz_ist_fehler() {
        let mut d = dok(json!({"channels": {}}));
        let ergebnis = patch_anwenden(
            &mut d,
            Patch::Einfuegen {
                pfad: Pfad::wurzel().feld("channels"),
                wert: json!(1),
            },
        );
        assert!(matches!(ergebnis, Err(SpeicherFehler::UngueltigerPfad(_))));
        assert_eq!(d.version, 1);
    }

    #[test]
    fn ersetzen_mit_passendem_altwert() {
        let mut d = dok(json!({"channels": [{"archived": false}]}));
        let ergebnis = patch_anwenden(
            &mut d,
            Patch::Ersetzen(CompareAndSwapPatch {
                pfad: Pfad::wurzel().feld("channels").index(0).feld("archived"),
                erwartet: json!(false),
                neu: json!(1234),
            }),
        )
        .unwrap();
        assert!(ergebnis.ist_angewendet());
        assert_eq!(d.daten["channels"][0]["archived"], json!(1234));
    }

    #[test]
    fn ersetzen_mit_veraltetem_altwert_ist_konflikt() {
        let mut d = dok(json!({"channels": [{"archived": 99}]}));
        let ergebnis = patch_anwenden(
            &mut d,
            Patch::Ersetzen(CompareAndSwapPatch {
                pfad: Pfad::wurzel().feld("channels").index(0).feld("archived"),
                erwartet: json!(false),
                neu: json!(1234),
            }),
        )
        .unwrap();
        assert_eq!(ergebnis, PatchErgebnis::Konflikt { aktuell: json!(99) });
        // Dokument unveraendert
        assert_eq!(d.version, 1);
        assert_eq!(d.daten["channels"][0]["archived"], json!(99));
    }

    #[test]
    fn ersetzen_legt_fehlendes_feld_an() {
        let mut d = dok(json!({"users": [{}]}));
        patch_anwenden(
            &mut d,
            Patch::Ersetzen(CompareAndSwapPatch {
                pfad: Pfad::wurzel().feld("users").index(0).feld("present"),
                erwartet: Value::Null,
                neu: json!(true),
            }),
        )
        .unwrap();
        assert_eq!(d.daten["users"][0]["present"], json!(true));
    }

    #[test]
    fn ersetzen_ausserhalb_der_liste_ist_fehler() {
        let mut d = dok(json!({"channels": []}));
        let ergebnis = patch_anwenden(
            &mut d,
            Patch::Ersetzen(CompareAndSwapPatch {
                pfad: Pfad::wurzel().feld("channels").index(5),
                erwartet: Value::Null,
                neu: json!(1),
            }),
        );
        assert!(ergebnis.is_err());
    }
}
