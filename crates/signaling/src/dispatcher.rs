//! SessionRouter – Routet Control-Anfragen an Registry und Sitzungen
//!
//! Der Router bekommt die Text-Nachrichten einer Verbindung, klassifiziert
//! sie und liefert optional eine Antwort zurueck.
//!
//! - Fehlerhafte Nachrichten werden geloggt und verworfen (keine Antwort)
//! - Fremde Nachrichten (kein `cc: 1`, unbekannter `type`) werden ignoriert
//! - Eine Verbindung ist hoechstens Mitglied eines Kanals

use chatcodes_core::VerbindungsId;
use chatcodes_protocol::{
    klassifizieren, Anfrage, BeitrittsPayload, Eingang, RaumAntwort, RaumInfo,
    VerfuegbarkeitsAntwort,
};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{SignalingError, SignalingResult};
use crate::registry::ChannelRegistry;
use crate::session::ChannelSession;

/// Zustand einer Verbindung aus Sicht des Routers
#[derive(Debug)]
pub struct VerbindungsKontext {
    pub verbindung: VerbindungsId,
    /// Kanal, dem die Verbindung beigetreten ist
    pub sitzung: Option<Arc<ChannelSession>>,
}

impl VerbindungsKontext {
    pub fn neu(verbindung: VerbindungsId) -> Self {
        Self {
            verbindung,
            sitzung: None,
        }
    }
}

/// Zentraler Router fuer Control-Anfragen
#[derive(Clone)]
pub struct SessionRouter {
    registry: ChannelRegistry,
}

impl SessionRouter {
    pub fn neu(registry: ChannelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Verarbeitet eine eingehende Text-Nachricht
    ///
    /// Gibt `None` zurueck wenn nichts gesendet werden soll.
    pub async fn verarbeiten(&self, text: &str, ctx: &mut VerbindungsKontext) -> Option<String> {
        let metriken = self.registry.metriken();
        let anfrage = match klassifizieren(text) {
            Ok(Eingang::Anfrage(anfrage)) => anfrage,
            Ok(Eingang::Ignoriert(grund)) => {
                tracing::debug!(verbindung = %ctx.verbindung, grund = ?grund, "Nachricht ignoriert");
                return None;
            }
            Err(e) => {
                metriken.messages_dropped_total.inc();
                tracing::warn!(verbindung = %ctx.verbindung, fehler = %e, "Fehlerhafte Nachricht verworfen");
                return None;
            }
        };

        let typ = anfrage.typ();
        metriken.messages_total.with_label_values(&[typ]).inc();

        let ergebnis = match anfrage {
            Anfrage::RaumBeitreten {
                message_id,
                payload,
            } => self.raum_beitreten(message_id, payload, ctx).await,
            Anfrage::KanalVerfuegbar {
                message_id,
                channel,
            } => self.kanal_verfuegbar(message_id, channel),
        };

        match ergebnis {
            Ok(antwort) => Some(antwort),
            Err(e) => {
                tracing::warn!(
                    verbindung = %ctx.verbindung,
                    typ,
                    fehler = %e,
                    "Anfrage fehlgeschlagen"
                );
                None
            }
        }
    }

    /// `request-join-room`
    async fn raum_beitreten(
        &self,
        message_id: Value,
        payload: BeitrittsPayload,
        ctx: &mut VerbindungsKontext,
    ) -> SignalingResult<String> {
        let BeitrittsPayload {
            channel,
            channel_id,
            mitglied,
        } = payload;

        // Reconnect: bekannte ID eines aktiven Kanals, Mitgliedschaft bleibt
        if let Some(id) = &channel_id {
            if let Some(aktiv) = self.registry.aktive_sitzung(&channel) {
                if aktiv.kanal_id() == id {
                    tracing::debug!(
                        verbindung = %ctx.verbindung,
                        kanal = %channel,
                        "Reconnect auf aktiven Kanal"
                    );
                    return raum_antwort(&channel, message_id, &aktiv);
                }
            }
        }

        let mut wiederholt = false;
        let sitzung = loop {
            let sitzung = self
                .registry
                .erstellen_oder_holen(&channel, channel_id.clone(), None)
                .await?;
            self.vorherigen_kanal_verlassen(ctx, &sitzung).await;

            match sitzung
                .mitglied_hinzufuegen(mitglied.clone(), ctx.verbindung)
                .await
            {
                Ok(()) => break sitzung,
                // Kanal wurde zwischen Nachschlagen und Beitritt leer
                Err(SignalingError::SitzungBeendet(_)) if !wiederholt => {
                    tracing::debug!(kanal = %channel, "Kanal inzwischen archiviert, neuer Versuch");
                    wiederholt = true;
                }
                Err(e) => return Err(e),
            }
        };

        ctx.sitzung = Some(Arc::clone(&sitzung));
        tracing::info!(
            verbindung = %ctx.verbindung,
            kanal = %channel,
            kanal_id = %sitzung.kanal_id(),
            archiv = sitzung.ist_archiv_ansicht(),
            "Kanal beigetreten"
        );
        raum_antwort(&channel, message_id, &sitzung)
    }

    /// `channel-available`
    fn kanal_verfuegbar(&self, message_id: Value, channel: String) -> SignalingResult<String> {
        let frei = self.registry.ist_leer(&channel);
        Ok(VerfuegbarkeitsAntwort::neu(channel, message_id, frei).als_text()?)
    }

    async fn vorherigen_kanal_verlassen(
        &self,
        ctx: &mut VerbindungsKontext,
        neu: &Arc<ChannelSession>,
    ) {
        let wechsel = ctx
            .sitzung
            .as_ref()
            .is_some_and(|alt| !Arc::ptr_eq(alt, neu));
        if !wechsel {
            return;
        }
        let Some(alt) = ctx.sitzung.take() else {
            return;
        };
        if let Err(e) = alt.mitglied_entfernen(&ctx.verbindung).await {
            tracing::warn!(
                verbindung = %ctx.verbindung,
                kanal = %alt.kanal_name(),
                fehler = %e,
                "Verlassen des vorherigen Kanals fehlgeschlagen"
            );
        }
    }

    /// Raeumt beim Trennen der Verbindung auf
    pub async fn verbindung_getrennt(&self, ctx: &mut VerbindungsKontext) {
        let Some(sitzung) = ctx.sitzung.take() else {
            return;
        };
        if let Err(e) = sitzung.mitglied_entfernen(&ctx.verbindung).await {
            tracing::warn!(
                verbindung = %ctx.verbindung,
                kanal = %sitzung.kanal_name(),
                fehler = %e,
                "Austragen beim Trennen fehlgeschlagen"
            );
        }
    }
}

fn raum_antwort(
    channel: &str,
    message_id: Value,
    sitzung: &ChannelSession,
) -> SignalingResult<String> {
    let info = RaumInfo {
        id: sitzung.kanal_id().clone(),
        ns: sitzung.ns().to_string(),
    };
    Ok(RaumAntwort::neu(channel, message_id, info).als_text()?)
}
