//! ChannelSession – Zustand eines einzelnen Kanals
//!
//! Eine Sitzung kennt ihre Identitaet (Name, ID), ihre Mitglieder und den
//! Namensraum im Dokumentenspeicher. Sobald das letzte Mitglied geht,
//! meldet sie sich genau einmal beim registrierten `LeerBeobachter`
//! (normalerweise die `ChannelRegistry`), der dann die Archivierung startet.
//!
//! ## Phasen
//! ```text
//! Aktiv -> Archivierung -> Beendet
//!   |                        ^
//!   +------ zerstoeren ------+
//! ```
//!
//! Locks werden nie ueber ein `.await` gehalten. Nach jedem Speicherzugriff
//! wird die Phase neu geprueft, weil die Sitzung in der Zwischenzeit
//! abgebaut worden sein kann.

use chatcodes_core::{jetzt_ms, KanalId, VerbindungsId};
use chatcodes_db::{
    CompareAndSwapPatch, DokumentSchluessel, DokumentSpeicher, Patch, PatchErgebnis, Pfad,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{SignalingError, SignalingResult};

/// Dokument-ID der Mitgliederliste im Namensraum eines Kanals
pub const MITGLIEDER_DOKUMENT: &str = "users";

// ---------------------------------------------------------------------------
// Beobachter
// ---------------------------------------------------------------------------

/// Wird benachrichtigt, wenn eine Sitzung ihr letztes Mitglied verliert
pub trait LeerBeobachter: Send + Sync {
    fn kanal_leer(&self, sitzung: Arc<ChannelSession>);
}

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Lebenszyklus einer Sitzungsinstanz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitzungsPhase {
    /// Nimmt Mitglieder auf
    Aktiv,
    /// Leer gemeldet, Archivierung laeuft
    Archivierung,
    /// Abgebaut, alle Operationen schlagen fehl
    Beendet,
}

/// Stand des Eintrags in der Kanal-Liste
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenStatus {
    Ausstehend,
    Eingetragen,
    Fehlgeschlagen,
}

/// Ein Mitglied der Sitzung
#[derive(Debug, Clone)]
pub struct Mitglied {
    /// Vom Client mitgeschickte Angaben (Name, Farbe, ...)
    pub info: Map<String, Value>,
    /// Beitrittszeitpunkt in Millisekunden
    pub beigetreten: i64,
}

/// Zugriff auf den Namensraum eines Kanals im Dokumentenspeicher
#[derive(Clone)]
pub struct NamensraumHandle {
    name: String,
    speicher: Arc<dyn DokumentSpeicher>,
}

impl NamensraumHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schluessel eines Dokuments in diesem Namensraum
    pub fn dokument(&self, id: &str) -> DokumentSchluessel {
        DokumentSchluessel::neu(self.name.clone(), id)
    }

    pub fn speicher(&self) -> &Arc<dyn DokumentSpeicher> {
        &self.speicher
    }
}

impl std::fmt::Debug for NamensraumHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamensraumHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct SitzungsZustand {
    phase: SitzungsPhase,
    mitglieder: HashMap<VerbindungsId, Mitglied>,
    beobachter: Option<Arc<dyn LeerBeobachter>>,
    namensraum: Option<NamensraumHandle>,
}

// ---------------------------------------------------------------------------
// ChannelSession
// ---------------------------------------------------------------------------

/// Zustand eines Kanals (aktiv oder Archiv-Ansicht)
pub struct ChannelSession {
    name: String,
    id: KanalId,
    topic: Option<String>,
    erstellt: i64,
    archiv_ansicht: bool,
    ns: String,
    zustand: Mutex<SitzungsZustand>,
    liste: watch::Sender<ListenStatus>,
    archiv_beansprucht: AtomicBool,
    beendet: watch::Sender<bool>,
}

impl ChannelSession {
    /// Erstellt eine neue Sitzung ohne Mitglieder
    ///
    /// Archiv-Ansichten gelten sofort als eingetragen, ihr Listeneintrag
    /// existiert bereits.
    pub fn neu(
        name: impl Into<String>,
        id: KanalId,
        topic: Option<String>,
        archiv_ansicht: bool,
        speicher: Arc<dyn DokumentSpeicher>,
    ) -> Arc<Self> {
        let name = name.into();
        let ns = format!("{name}-{id}");
        let listen_status = if archiv_ansicht {
            ListenStatus::Eingetragen
        } else {
            ListenStatus::Ausstehend
        };

        Arc::new(Self {
            topic,
            erstellt: jetzt_ms(),
            archiv_ansicht,
            zustand: Mutex::new(SitzungsZustand {
                phase: SitzungsPhase::Aktiv,
                mitglieder: HashMap::new(),
                beobachter: None,
                namensraum: Some(NamensraumHandle {
                    name: ns.clone(),
                    speicher,
                }),
            }),
            liste: watch::Sender::new(listen_status),
            archiv_beansprucht: AtomicBool::new(false),
            beendet: watch::Sender::new(false),
            name,
            id,
            ns,
        })
    }

    /// Registriert den Beobachter fuer "letztes Mitglied gegangen"
    pub fn bei_leer(&self, beobachter: Arc<dyn LeerBeobachter>) {
        let mut zustand = self.zustand.lock();
        if zustand.phase == SitzungsPhase::Aktiv {
            zustand.beobachter = Some(beobachter);
        }
    }

    // -----------------------------------------------------------------------
    // Accessoren
    // -----------------------------------------------------------------------

    pub fn kanal_id(&self) -> &KanalId {
        &self.id
    }

    pub fn kanal_name(&self) -> &str {
        &self.name
    }

    /// Name des Namensraums (bleibt auch nach dem Abbau lesbar)
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// Handle auf den Namensraum, `None` nach `zerstoeren`
    pub fn namensraum(&self) -> Option<NamensraumHandle> {
        self.zustand.lock().namensraum.clone()
    }

    pub fn ist_archiv_ansicht(&self) -> bool {
        self.archiv_ansicht
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Erstellungszeitpunkt in Millisekunden
    pub fn erstellt(&self) -> i64 {
        self.erstellt
    }

    pub fn phase(&self) -> SitzungsPhase {
        self.zustand.lock().phase
    }

    pub fn mitglieder_anzahl(&self) -> usize {
        self.zustand.lock().mitglieder.len()
    }

    pub fn ist_mitglied(&self, verbindung: &VerbindungsId) -> bool {
        self.zustand.lock().mitglieder.contains_key(verbindung)
    }

    // -----------------------------------------------------------------------
    // Mitglieder
    // -----------------------------------------------------------------------

    /// Nimmt eine Verbindung als Mitglied auf
    ///
    /// Die Mitgliedschaft gilt sofort; der Eintrag im `users`-Dokument folgt.
    /// Schlaegt der fehl, wird die Mitgliedschaft zurueckgenommen.
    /// Mehrfaches Hinzufuegen derselben Verbindung ist ein No-Op.
    pub async fn mitglied_hinzufuegen(
        self: &Arc<Self>,
        info: Map<String, Value>,
        verbindung: VerbindungsId,
    ) -> SignalingResult<()> {
        let beigetreten = jetzt_ms();
        let namensraum = {
            let mut zustand = self.zustand.lock();
            if zustand.phase != SitzungsPhase::Aktiv {
                return Err(SignalingError::sitzung_beendet(&self.name));
            }
            if zustand.mitglieder.contains_key(&verbindung) {
                return Ok(());
            }
            zustand.mitglieder.insert(
                verbindung,
                Mitglied {
                    info: info.clone(),
                    beigetreten,
                },
            );
            if self.archiv_ansicht {
                None
            } else {
                zustand.namensraum.clone()
            }
        };

        if let Some(namensraum) = namensraum {
            let eintrag = json!({
                "id": verbindung.inner().to_string(),
                "info": info,
                "joined": beigetreten,
                "present": true,
            });
            if let Err(e) = anwesenheit_eintragen(&namensraum, eintrag).await {
                self.zustand.lock().mitglieder.remove(&verbindung);
                self.leer_pruefen();
                return Err(e);
            }
        }

        if self.phase() == SitzungsPhase::Beendet {
            return Err(SignalingError::sitzung_beendet(&self.name));
        }

        tracing::debug!(
            kanal = %self.name,
            kanal_id = %self.id,
            verbindung = %verbindung,
            "Mitglied beigetreten"
        );
        Ok(())
    }

    /// Entfernt eine Verbindung (Disconnect)
    ///
    /// Gibt `false` zurueck wenn die Verbindung kein Mitglied war. Wird die
    /// Sitzung dadurch leer, wird der Beobachter benachrichtigt, auch wenn
    /// die Abwesenheits-Buchung im Speicher fehlschlaegt.
    pub async fn mitglied_entfernen(
        self: &Arc<Self>,
        verbindung: &VerbindungsId,
    ) -> SignalingResult<bool> {
        let namensraum = {
            let mut zustand = self.zustand.lock();
            if zustand.mitglieder.remove(verbindung).is_none() {
                return Ok(false);
            }
            if self.archiv_ansicht {
                None
            } else {
                zustand.namensraum.clone()
            }
        };

        tracing::debug!(
            kanal = %self.name,
            kanal_id = %self.id,
            verbindung = %verbindung,
            "Mitglied gegangen"
        );

        let ergebnis = match namensraum {
            Some(namensraum) => abwesenheit_eintragen(&namensraum, verbindung).await,
            None => Ok(()),
        };

        self.leer_pruefen();
        ergebnis.map(|_| true)
    }

    /// Meldet die Sitzung beim Beobachter, falls sie aktiv und leer ist
    fn leer_pruefen(self: &Arc<Self>) {
        let beobachter = {
            let mut zustand = self.zustand.lock();
            if !zustand.mitglieder.is_empty() || zustand.phase != SitzungsPhase::Aktiv {
                return;
            }
            zustand.phase = SitzungsPhase::Archivierung;
            zustand.beobachter.take()
        };

        tracing::debug!(kanal = %self.name, kanal_id = %self.id, "Kanal ist leer");
        if let Some(beobachter) = beobachter {
            beobachter.kanal_leer(Arc::clone(self));
        }
    }

    // -----------------------------------------------------------------------
    // Abbau
    // -----------------------------------------------------------------------

    /// Gibt Namensraum und Beobachter frei. Idempotent.
    pub fn zerstoeren(&self) {
        {
            let mut zustand = self.zustand.lock();
            if zustand.phase == SitzungsPhase::Beendet {
                return;
            }
            zustand.phase = SitzungsPhase::Beendet;
            zustand.mitglieder.clear();
            zustand.beobachter = None;
            zustand.namensraum = None;
        }
        self.beendet.send_replace(true);
        tracing::debug!(kanal = %self.name, kanal_id = %self.id, "Sitzung abgebaut");
    }

    /// Wartet bis die Sitzung abgebaut ist
    pub async fn beendet(&self) {
        let mut rx = self.beendet.subscribe();
        // Sender lebt so lange wie `self`
        let _ = rx.wait_for(|beendet| *beendet).await;
    }

    // -----------------------------------------------------------------------
    // Kanal-Liste (nur Registry)
    // -----------------------------------------------------------------------

    pub(crate) fn listen_status_setzen(&self, status: ListenStatus) {
        self.liste.send_replace(status);
    }

    /// Wartet bis der Listeneintrag geschrieben (oder gescheitert) ist
    pub(crate) async fn listen_eintrag_abwarten(&self) -> ListenStatus {
        let mut rx = self.liste.subscribe();
        let status = match rx
            .wait_for(|status| *status != ListenStatus::Ausstehend)
            .await
        {
            Ok(status) => *status,
            Err(_) => ListenStatus::Fehlgeschlagen,
        };
        status
    }

    /// Beansprucht die Archivierung; nur der erste Aufruf bekommt `true`
    pub(crate) fn archivierung_beanspruchen(&self) -> bool {
        !self.archiv_beansprucht.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("archiv_ansicht", &self.archiv_ansicht)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Buchhaltung im Namensraum
// ---------------------------------------------------------------------------

async fn anwesenheit_eintragen(namensraum: &NamensraumHandle, eintrag: Value) -> SignalingResult<()> {
    let schluessel = namensraum.dokument(MITGLIEDER_DOKUMENT);
    let speicher = namensraum.speicher();
    speicher
        .erstellen(&schluessel, json!({ "users": [] }))
        .await?;
    speicher
        .patch_einreichen(
            &schluessel,
            Patch::Einfuegen {
                pfad: Pfad::wurzel().feld("users"),
                wert: eintrag,
            },
        )
        .await?;
    Ok(())
}

/// Setzt `present` des Mitglieds per CAS von `true` auf `false`
async fn abwesenheit_eintragen(
    namensraum: &NamensraumHandle,
    verbindung: &VerbindungsId,
) -> SignalingResult<()> {
    let schluessel = namensraum.dokument(MITGLIEDER_DOKUMENT);
    let speicher = namensraum.speicher();
    let Some(dokument) = speicher.abrufen(&schluessel).await? else {
        return Ok(());
    };

    let id = verbindung.inner().to_string();
    let index = dokument
        .daten
        .get("users")
        .and_then(Value::as_array)
        .and_then(|users| {
            users.iter().rposition(|u| {
                u.get("id").and_then(Value::as_str) == Some(id.as_str())
                    && u.get("present") == Some(&Value::Bool(true))
            })
        });
    let Some(index) = index else {
        return Ok(());
    };

    let ergebnis = speicher
        .patch_einreichen(
            &schluessel,
            Patch::Ersetzen(CompareAndSwapPatch {
                pfad: Pfad::wurzel().feld("users").index(index).feld("present"),
                erwartet: Value::Bool(true),
                neu: Value::Bool(false),
            }),
        )
        .await?;
    if let PatchErgebnis::Konflikt { aktuell } = ergebnis {
        tracing::debug!(
            ns = %namensraum.name(),
            verbindung = %verbindung,
            aktuell = %aktuell,
            "Abwesenheit bereits gebucht"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcodes_db::SpeicherStore;

    /// Sammelt gemeldete Sitzungen
    #[derive(Default)]
    struct Sammler(Mutex<Vec<KanalId>>);

    impl LeerBeobachter for Sammler {
        fn kanal_leer(&self, sitzung: Arc<ChannelSession>) {
            self.0.lock().push(sitzung.kanal_id().clone());
        }
    }

    fn info(name: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("username".into(), json!(name));
        m
    }

    fn sitzung(store: &SpeicherStore) -> Arc<ChannelSession> {
        ChannelSession::neu("delta", KanalId::neu(), None, false, Arc::new(store.clone()))
    }

    async fn users(store: &SpeicherStore, s: &ChannelSession) -> Vec<Value> {
        let schluessel = DokumentSchluessel::neu(s.ns(), MITGLIEDER_DOKUMENT);
        let dok = store.abrufen(&schluessel).await.unwrap().unwrap();
        dok.daten["users"].as_array().unwrap().clone()
    }

    #[tokio::test]
    async fn accessoren() {
        let id = KanalId::aus_string("abc");
        let s = ChannelSession::neu(
            "gamma",
            id.clone(),
            Some("rust".into()),
            true,
            Arc::new(SpeicherStore::neu()),
        );
        assert_eq!(s.kanal_name(), "gamma");
        assert_eq!(s.kanal_id(), &id);
        assert_eq!(s.ns(), "gamma-abc");
        assert_eq!(s.topic(), Some("rust"));
        assert!(s.ist_archiv_ansicht());
        assert_eq!(s.namensraum().unwrap().name(), "gamma-abc");
        assert_eq!(s.phase(), SitzungsPhase::Aktiv);
    }

    #[tokio::test]
    async fn mitglied_wird_im_namensraum_gebucht() {
        let store = SpeicherStore::neu();
        let s = sitzung(&store);
        let a = VerbindungsId::new();

        s.mitglied_hinzufuegen(info("ada"), a).await.unwrap();
        assert!(s.ist_mitglied(&a));

        let liste = users(&store, &s).await;
        assert_eq!(liste.len(), 1);
        assert_eq!(liste[0]["info"]["username"], json!("ada"));
        assert_eq!(liste[0]["present"], json!(true));
    }

    #[tokio::test]
    async fn doppeltes_hinzufuegen_ist_noop() {
        let store = SpeicherStore::neu();
        let s = sitzung(&store);
        let a = VerbindungsId::new();

        s.mitglied_hinzufuegen(info("ada"), a).await.unwrap();
        s.mitglied_hinzufuegen(info("ada"), a).await.unwrap();
        assert_eq!(s.mitglieder_anzahl(), 1);
        assert_eq!(users(&store, &s).await.len(), 1);
    }

    #[tokio::test]
    async fn letztes_mitglied_meldet_genau_einmal() {
        let store = SpeicherStore::neu();
        let s = sitzung(&store);
        let sammler = Arc::new(Sammler::default());
        s.bei_leer(sammler.clone());

        let (a, b) = (VerbindungsId::new(), VerbindungsId::new());
        s.mitglied_hinzufuegen(info("a"), a).await.unwrap();
        s.mitglied_hinzufuegen(info("b"), b).await.unwrap();

        assert!(s.mitglied_entfernen(&a).await.unwrap());
        assert!(sammler.0.lock().is_empty());

        assert!(s.mitglied_entfernen(&b).await.unwrap());
        assert_eq!(sammler.0.lock().as_slice(), &[s.kanal_id().clone()]);
        assert_eq!(s.phase(), SitzungsPhase::Archivierung);

        // Unbekannte Verbindung: nichts passiert
        assert!(!s.mitglied_entfernen(&a).await.unwrap());
        assert_eq!(sammler.0.lock().len(), 1);

        let liste = users(&store, &s).await;
        assert!(liste.iter().all(|u| u["present"] == json!(false)));
    }

    #[tokio::test]
    async fn hinzufuegen_nach_leer_meldung_schlaegt_fehl() {
        let s = sitzung(&SpeicherStore::neu());
        let a = VerbindungsId::new();
        s.mitglied_hinzufuegen(info("a"), a).await.unwrap();
        s.mitglied_entfernen(&a).await.unwrap();

        let err = s
            .mitglied_hinzufuegen(info("b"), VerbindungsId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::SitzungBeendet(_)));
    }

    #[tokio::test]
    async fn zerstoeren_ist_idempotent() {
        let s = sitzung(&SpeicherStore::neu());
        s.bei_leer(Arc::new(Sammler::default()));
        s.zerstoeren();
        s.zerstoeren();
        assert_eq!(s.phase(), SitzungsPhase::Beendet);
        assert!(s.namensraum().is_none());
        s.beendet().await;
    }

    #[tokio::test]
    async fn zerstoeren_waehrend_beitritt() {
        let store = SpeicherStore::neu();
        let s = sitzung(&store);

        let beitritt = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.mitglied_hinzufuegen(info("a"), VerbindungsId::new()).await })
        };
        // Beitritt haengt am ersten Speicherzugriff
        tokio::task::yield_now().await;
        s.zerstoeren();

        let ergebnis = beitritt.await.unwrap();
        assert!(matches!(ergebnis, Err(SignalingError::SitzungBeendet(_))));
        assert_eq!(s.mitglieder_anzahl(), 0);
    }

    #[tokio::test]
    async fn archiv_ansicht_bucht_keine_mitglieder() {
        let store = SpeicherStore::neu();
        let s = ChannelSession::neu("gamma", KanalId::neu(), None, true, Arc::new(store.clone()));
        s.mitglied_hinzufuegen(info("a"), VerbindungsId::new()).await.unwrap();
        assert_eq!(store.anzahl(), 0);
    }

    #[tokio::test]
    async fn listeneintrag_abwarten() {
        let s = sitzung(&SpeicherStore::neu());
        let warten = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.listen_eintrag_abwarten().await })
        };
        tokio::task::yield_now().await;
        s.listen_status_setzen(ListenStatus::Eingetragen);
        assert_eq!(warten.await.unwrap(), ListenStatus::Eingetragen);

        let ansicht = ChannelSession::neu("gamma", KanalId::neu(), None, true, Arc::new(SpeicherStore::neu()));
        assert_eq!(ansicht.listen_eintrag_abwarten().await, ListenStatus::Eingetragen);
    }

    #[tokio::test]
    async fn archivierung_nur_einmal_beanspruchbar() {
        let s = sitzung(&SpeicherStore::neu());
        assert!(s.archivierung_beanspruchen());
        assert!(!s.archivierung_beanspruchen());
    }
}
