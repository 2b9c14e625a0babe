//! ChannelRegistry – Aktive Kanaele und persistierte Kanal-Liste
//!
//! Die Registry ist die einzige Stelle, die die Map der aktiven Kanaele und
//! das Dokument `chatcodes/channels` veraendert.
//!
//! ## Reservierung
//! Ein neuer Kanalname wird synchron ueber `DashMap::entry` reserviert.
//! Erst danach folgt der (langsame) Eintrag in die Kanal-Liste. Zwei
//! gleichzeitige `erstellen_oder_holen` fuer denselben Namen bekommen
//! dadurch dieselbe Sitzung.
//!
//! ## Archivierung
//! ```text
//! letztes Mitglied geht
//!     -> Sitzung meldet sich (LeerBeobachter)
//!     -> Name wird sofort frei
//!     -> Task: archived per CAS auf Zeitstempel setzen, Sitzung abbauen
//! ```

use chatcodes_core::{jetzt_ms, KanalId};
use chatcodes_db::{
    CompareAndSwapPatch, DokumentSchluessel, DokumentSpeicher, Patch, PatchErgebnis, Pfad,
    SpeicherFehler, SpeicherResult,
};
use chatcodes_observability::ChatCodesMetrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};

use crate::error::{SignalingError, SignalingResult};
use crate::names::Verfuegbarkeit;
use crate::session::{ChannelSession, LeerBeobachter, ListenStatus};

/// Sammlung des Kanal-Listen-Dokuments
pub const KANAL_SAMMLUNG: &str = "chatcodes";
/// ID des Kanal-Listen-Dokuments
pub const KANAL_DOKUMENT: &str = "channels";

/// Wie oft ein abgelehnter Archiv-Patch neu versucht wird
const MAX_CAS_VERSUCHE: usize = 3;

// ---------------------------------------------------------------------------
// Listeneintrag
// ---------------------------------------------------------------------------

/// Wert von `archived`: `false` solange aktiv, danach Zeitstempel (ms)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Archivierung {
    Status(bool),
    Seit(i64),
}

impl Archivierung {
    pub fn ist_archiviert(&self) -> bool {
        match self {
            Self::Status(status) => *status,
            Self::Seit(_) => true,
        }
    }
}

/// Eintrag eines Kanals in `chatcodes/channels`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelListEntry {
    pub channel_name: String,
    #[serde(rename = "channelID")]
    pub channel_id: KanalId,
    /// Erstellungszeitpunkt (ms)
    pub created: i64,
    pub topic: Option<String>,
    pub archived: Archivierung,
}

impl ChannelListEntry {
    fn fuer(sitzung: &ChannelSession) -> Self {
        Self {
            channel_name: sitzung.kanal_name().to_string(),
            channel_id: sitzung.kanal_id().clone(),
            created: sitzung.erstellt(),
            topic: sitzung.topic().map(str::to_owned),
            archived: Archivierung::Status(false),
        }
    }
}

/// Ausgang einer Archivierung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchivErgebnis {
    /// `archived` wurde am Listenindex gesetzt
    Archiviert { index: usize },
    /// Archiv-Ansicht abgebaut, die Liste bleibt unveraendert
    Ansicht,
    /// Kein Listeneintrag fuer die Kanal-ID, Patch uebersprungen
    OhneListenEintrag,
    /// Jeder Versuch wurde von einem anderen Schreiber ueberholt
    Konflikt,
    /// Die Sitzung wurde bereits archiviert
    BereitsArchiviert,
}

// ---------------------------------------------------------------------------
// ChannelRegistry
// ---------------------------------------------------------------------------

/// Verwaltet alle aktiven Kanaele
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Kanalname -> aktive Sitzung
    aktive: DashMap<String, Arc<ChannelSession>>,
    speicher: Arc<dyn DokumentSpeicher>,
    liste: DokumentSchluessel,
    metriken: ChatCodesMetrics,
}

impl ChannelRegistry {
    /// Erstellt die Registry und legt die Kanal-Liste an, falls sie fehlt
    pub async fn oeffnen(
        speicher: Arc<dyn DokumentSpeicher>,
        metriken: ChatCodesMetrics,
    ) -> SignalingResult<Self> {
        let liste = DokumentSchluessel::neu(KANAL_SAMMLUNG, KANAL_DOKUMENT);
        let angelegt = speicher.erstellen(&liste, json!({ "channels": [] })).await?;

        let registry = Self {
            inner: Arc::new(RegistryInner {
                aktive: DashMap::new(),
                speicher,
                liste,
                metriken,
            }),
        };

        let bestand = registry.kanaele_array().await?.len();
        tracing::info!(angelegt, eintraege = bestand, "Kanal-Liste bereit");
        Ok(registry)
    }

    pub fn metriken(&self) -> &ChatCodesMetrics {
        &self.inner.metriken
    }

    pub fn speicher(&self) -> &Arc<dyn DokumentSpeicher> {
        &self.inner.speicher
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Ist unter `name` gerade kein Kanal aktiv? (reiner Map-Lookup)
    pub fn ist_leer(&self, name: &str) -> bool {
        !self.inner.aktive.contains_key(name)
    }

    /// Die aktive Sitzung unter `name`
    pub fn aktive_sitzung(&self, name: &str) -> Option<Arc<ChannelSession>> {
        self.inner.aktive.get(name).map(|s| Arc::clone(s.value()))
    }

    pub fn aktive_anzahl(&self) -> usize {
        self.inner.aktive.len()
    }

    /// Listenindex des Kanals mit `id`
    pub async fn index_von(&self, id: &KanalId) -> SignalingResult<Option<usize>> {
        let kanaele = self.kanaele_array().await?;
        Ok(index_in(&kanaele, id))
    }

    /// Alle Eintraege der Kanal-Liste (aktiv und archiviert)
    ///
    /// Eintraege, die nicht dem Format entsprechen, werden uebersprungen.
    pub async fn liste(&self) -> SignalingResult<Vec<ChannelListEntry>> {
        let kanaele = self.kanaele_array().await?;
        let mut eintraege = Vec::with_capacity(kanaele.len());
        for (index, wert) in kanaele.into_iter().enumerate() {
            match serde_json::from_value::<ChannelListEntry>(wert) {
                Ok(eintrag) => eintraege.push(eintrag),
                Err(e) => {
                    tracing::warn!(index, fehler = %e, "Ungueltiger Eintrag in der Kanal-Liste");
                }
            }
        }
        Ok(eintraege)
    }

    async fn kanaele_array(&self) -> SignalingResult<Vec<Value>> {
        let dokument = self
            .speicher_melden(self.inner.speicher.abrufen(&self.inner.liste).await)?
            .ok_or_else(|| SpeicherFehler::nicht_gefunden(self.inner.liste.to_string()))?;

        match dokument.daten {
            Value::Object(mut objekt) => match objekt.remove(KANAL_DOKUMENT) {
                Some(Value::Array(kanaele)) => Ok(kanaele),
                _ => Err(SignalingError::ListeBeschaedigt(
                    "Feld 'channels' fehlt oder ist keine Sequenz".into(),
                )),
            },
            _ => Err(SignalingError::ListeBeschaedigt(
                "Dokument ist kein Objekt".into(),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Erstellen
    // -----------------------------------------------------------------------

    /// Liefert die aktive Sitzung unter `name` oder legt eine an
    ///
    /// - Name aktiv: die bestehende Sitzung (auch wenn `id` abweicht)
    /// - `id` angegeben: Archiv-Ansicht, weder registriert noch gelistet.
    ///   Das Paar `(name, id)` muss in der Kanal-Liste stehen, sonst
    ///   `UnbekannterKanal`.
    /// - sonst: neue Sitzung mit frischer ID, reserviert und gelistet
    pub async fn erstellen_oder_holen(
        &self,
        name: &str,
        id: Option<KanalId>,
        topic: Option<String>,
    ) -> SignalingResult<Arc<ChannelSession>> {
        if let Some(sitzung) = self.aktive_sitzung(name) {
            return Ok(sitzung);
        }

        if let Some(id) = id {
            let kanaele = self.kanaele_array().await?;
            if paar_index_in(&kanaele, name, &id).is_none() {
                return Err(SignalingError::unbekannter_kanal(name, &id));
            }
            // Waehrend des Lesens kann der Name aktiv geworden sein
            if let Some(sitzung) = self.aktive_sitzung(name) {
                return Ok(sitzung);
            }
            let sitzung =
                ChannelSession::neu(name, id, topic, true, Arc::clone(&self.inner.speicher));
            sitzung.bei_leer(self.beobachter());
            tracing::info!(
                kanal = %name,
                kanal_id = %sitzung.kanal_id(),
                "Archiv-Ansicht geoeffnet"
            );
            return Ok(sitzung);
        }

        // Synchrone Reservierung, kein .await bis zum Insert
        let sitzung = match self.inner.aktive.entry(name.to_string()) {
            Entry::Occupied(belegt) => return Ok(Arc::clone(belegt.get())),
            Entry::Vacant(frei) => {
                let sitzung = ChannelSession::neu(
                    name,
                    KanalId::neu(),
                    topic,
                    false,
                    Arc::clone(&self.inner.speicher),
                );
                sitzung.bei_leer(self.beobachter());
                frei.insert(Arc::clone(&sitzung));
                sitzung
            }
        };
        self.inner.metriken.channels_active.inc();
        self.inner.metriken.channels_created_total.inc();

        if let Err(e) = self.listen_eintrag_anhaengen(&sitzung).await {
            tracing::warn!(
                kanal = %name,
                kanal_id = %sitzung.kanal_id(),
                fehler = %e,
                "Listeneintrag fehlgeschlagen, Kanal wird verworfen"
            );
            self.aus_aktiven_entfernen(&sitzung);
            sitzung.listen_status_setzen(ListenStatus::Fehlgeschlagen);
            sitzung.zerstoeren();
            return Err(e);
        }
        sitzung.listen_status_setzen(ListenStatus::Eingetragen);

        tracing::info!(
            kanal = %name,
            kanal_id = %sitzung.kanal_id(),
            "Kanal erstellt"
        );
        Ok(sitzung)
    }

    async fn listen_eintrag_anhaengen(&self, sitzung: &ChannelSession) -> SignalingResult<()> {
        let wert = serde_json::to_value(ChannelListEntry::fuer(sitzung))
            .map_err(SpeicherFehler::from)?;
        let patch = Patch::Einfuegen {
            pfad: Pfad::wurzel().feld(KANAL_DOKUMENT),
            wert,
        };
        self.speicher_melden(
            self.inner
                .speicher
                .patch_einreichen(&self.inner.liste, patch)
                .await,
        )?;
        Ok(())
    }

    /// Haelt den Speicherstatus der Metriken aktuell
    fn speicher_melden<T>(&self, ergebnis: SpeicherResult<T>) -> SignalingResult<T> {
        let metriken = &self.inner.metriken;
        match ergebnis {
            Ok(wert) => {
                metriken.speicher_status_setzen(true);
                Ok(wert)
            }
            Err(e) => {
                // Fehlende Dokumente sind ein Inhalts-, kein Verbindungsproblem
                if !matches!(e, SpeicherFehler::NichtGefunden(_)) {
                    metriken.speicher_status_setzen(false);
                }
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Archivieren
    // -----------------------------------------------------------------------

    /// Archiviert eine Sitzung und baut sie ab
    ///
    /// Nur der erste Aufruf pro Sitzung archiviert, jeder weitere liefert
    /// `BereitsArchiviert`. Die Sitzung wird in jedem Fall abgebaut, auch
    /// wenn der Listeneintrag nicht aktualisiert werden konnte.
    /// Archiv-Ansichten sind nur lesend und werden ohne Patch abgebaut.
    pub async fn archivieren(&self, sitzung: &Arc<ChannelSession>) -> SignalingResult<ArchivErgebnis> {
        if !sitzung.archivierung_beanspruchen() {
            return Ok(ArchivErgebnis::BereitsArchiviert);
        }

        let ergebnis = if sitzung.ist_archiv_ansicht() {
            Ok(ArchivErgebnis::Ansicht)
        } else {
            self.aus_aktiven_entfernen(sitzung);
            self.archiviert_markieren(sitzung).await
        };
        sitzung.zerstoeren();

        match &ergebnis {
            Ok(ArchivErgebnis::Archiviert { index }) => {
                self.inner.metriken.channels_archived_total.inc();
                tracing::info!(
                    kanal = %sitzung.kanal_name(),
                    kanal_id = %sitzung.kanal_id(),
                    index,
                    "Kanal archiviert"
                );
            }
            Ok(anderes) => {
                tracing::info!(
                    kanal = %sitzung.kanal_name(),
                    kanal_id = %sitzung.kanal_id(),
                    ergebnis = ?anderes,
                    "Kanal ohne Listen-Aktualisierung abgebaut"
                );
            }
            Err(e) => {
                tracing::warn!(
                    kanal = %sitzung.kanal_name(),
                    kanal_id = %sitzung.kanal_id(),
                    fehler = %e,
                    "Archivierung fehlgeschlagen"
                );
            }
        }
        ergebnis
    }

    /// Setzt `archived` per CAS vom vorgefundenen Wert auf den Zeitstempel
    async fn archiviert_markieren(&self, sitzung: &ChannelSession) -> SignalingResult<ArchivErgebnis> {
        if sitzung.listen_eintrag_abwarten().await != ListenStatus::Eingetragen {
            tracing::warn!(
                kanal_id = %sitzung.kanal_id(),
                "Kanal wurde nie gelistet, Archivierung uebersprungen"
            );
            return Ok(ArchivErgebnis::OhneListenEintrag);
        }

        for versuch in 1..=MAX_CAS_VERSUCHE {
            let kanaele = self.kanaele_array().await?;
            let Some(index) = paar_index_in(&kanaele, sitzung.kanal_name(), sitzung.kanal_id()) else {
                tracing::warn!(
                    kanal = %sitzung.kanal_name(),
                    kanal_id = %sitzung.kanal_id(),
                    "Kein Listeneintrag fuer Kanal-ID, Archivierung uebersprungen"
                );
                return Ok(ArchivErgebnis::OhneListenEintrag);
            };

            let erwartet = kanaele[index]
                .get("archived")
                .cloned()
                .unwrap_or(Value::Null);
            let patch = Patch::Ersetzen(CompareAndSwapPatch {
                pfad: Pfad::wurzel()
                    .feld(KANAL_DOKUMENT)
                    .index(index)
                    .feld("archived"),
                erwartet,
                neu: json!(jetzt_ms()),
            });

            match self.speicher_melden(
                self.inner
                    .speicher
                    .patch_einreichen(&self.inner.liste, patch)
                    .await,
            )? {
                PatchErgebnis::Angewendet { .. } => return Ok(ArchivErgebnis::Archiviert { index }),
                PatchErgebnis::Konflikt { aktuell } => {
                    tracing::debug!(
                        kanal_id = %sitzung.kanal_id(),
                        versuch,
                        aktuell = %aktuell,
                        "Archiv-Patch abgelehnt, neuer Versuch"
                    );
                }
            }
        }

        tracing::warn!(
            kanal_id = %sitzung.kanal_id(),
            versuche = MAX_CAS_VERSUCHE,
            "Archiv-Patch wiederholt abgelehnt"
        );
        Ok(ArchivErgebnis::Konflikt)
    }

    /// Entfernt genau diese Sitzung aus der Map (nicht einen Nachfolger)
    fn aus_aktiven_entfernen(&self, sitzung: &Arc<ChannelSession>) -> bool {
        let entfernt = self
            .inner
            .aktive
            .remove_if(sitzung.kanal_name(), |_, aktiv| Arc::ptr_eq(aktiv, sitzung))
            .is_some();
        if entfernt {
            self.inner.metriken.channels_active.dec();
        }
        entfernt
    }

    fn beobachter(&self) -> Arc<dyn LeerBeobachter> {
        Arc::new(RegistryBeobachter(Arc::downgrade(&self.inner)))
    }
}

impl Verfuegbarkeit for ChannelRegistry {
    fn ist_frei(&self, name: &str) -> bool {
        self.ist_leer(name)
    }
}

fn index_in(kanaele: &[Value], id: &KanalId) -> Option<usize> {
    kanaele
        .iter()
        .position(|k| k.get("channelID").and_then(Value::as_str) == Some(id.as_str()))
}

/// Listenindex des Eintrags mit genau diesem Namen und dieser ID
fn paar_index_in(kanaele: &[Value], name: &str, id: &KanalId) -> Option<usize> {
    kanaele.iter().position(|k| {
        k.get("channelName").and_then(Value::as_str) == Some(name)
            && k.get("channelID").and_then(Value::as_str) == Some(id.as_str())
    })
}

// ---------------------------------------------------------------------------
// Beobachter
// ---------------------------------------------------------------------------

/// Startet die Archivierung leerer Sitzungen
///
/// Haelt die Registry nur schwach, Sitzungen und Registry referenzieren
/// sich sonst gegenseitig.
struct RegistryBeobachter(Weak<RegistryInner>);

impl LeerBeobachter for RegistryBeobachter {
    fn kanal_leer(&self, sitzung: Arc<ChannelSession>) {
        let Some(inner) = self.0.upgrade() else {
            sitzung.zerstoeren();
            return;
        };
        let registry = ChannelRegistry { inner };

        // Name sofort freigeben, Archivierung laeuft nebenher
        if !sitzung.ist_archiv_ansicht() {
            registry.aus_aktiven_entfernen(&sitzung);
        }
        tokio::spawn(async move {
            // Fehler sind in `archivieren` bereits geloggt
            let _ = registry.archivieren(&sitzung).await;
        });
    }
}
