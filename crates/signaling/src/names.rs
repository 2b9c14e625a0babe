//! Namensvergabe – Liefert einen gerade nicht aktiven Kanalnamen
//!
//! Kandidaten kommen aus einer Wortliste (eine Zeile pro Wort). Erst alle
//! Woerter in zufaelliger Reihenfolge, danach unendlich `wort[i % n] + i`.
//! Damit endet die Suche immer, auch wenn alle Woerter belegt sind.
//!
//! Die Pruefung auf Verfuegbarkeit ist synchron (reiner Map-Lookup in der
//! Registry). Zwischen `vergeben` und dem Eintragen des Kanals darf daher
//! kein `.await` liegen, sonst kann ein anderer Task denselben Namen
//! bekommen.

use chatcodes_core::{ChatCodesError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;

/// Abfrage ob ein Name gerade frei ist
pub trait Verfuegbarkeit {
    fn ist_frei(&self, name: &str) -> bool;
}

// ---------------------------------------------------------------------------
// NamensPool
// ---------------------------------------------------------------------------

/// Die einmal geladene Wortliste
#[derive(Debug, Clone)]
pub struct NamensPool {
    woerter: Arc<Vec<String>>,
}

impl NamensPool {
    /// Parst eine Wortliste (ein Wort pro Zeile, Leerzeilen werden ignoriert)
    pub fn aus_text(text: &str) -> Result<Self> {
        let woerter: Vec<String> = text
            .split('\n')
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_owned)
            .collect();

        if woerter.is_empty() {
            return Err(ChatCodesError::konfiguration("Wortliste ist leer"));
        }
        Ok(Self {
            woerter: Arc::new(woerter),
        })
    }

    /// Laedt die Wortliste aus einer Datei
    pub async fn laden(pfad: impl AsRef<Path>) -> Result<Self> {
        let pfad = pfad.as_ref();
        let inhalt = tokio::fs::read_to_string(pfad).await?;
        let pool = Self::aus_text(&inhalt)?;
        tracing::info!(pfad = %pfad.display(), woerter = pool.len(), "Wortliste geladen");
        Ok(pool)
    }

    /// Ist `name` ein Wort der Liste?
    pub fn enthaelt(&self, name: &str) -> bool {
        !name.contains('\n') && self.woerter.iter().any(|w| w == name)
    }

    pub fn len(&self) -> usize {
        self.woerter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.woerter.is_empty()
    }
}

// ---------------------------------------------------------------------------
// KandidatenCursor
// ---------------------------------------------------------------------------

/// Unendliche Folge von Namenskandidaten fuer genau eine Vergabe
#[derive(Debug, Clone)]
pub struct KandidatenCursor {
    woerter: Vec<String>,
    position: usize,
    zaehler: u64,
}

impl KandidatenCursor {
    fn neu(woerter: Vec<String>) -> Self {
        Self {
            woerter,
            position: 0,
            zaehler: 0,
        }
    }

    /// Naechster Kandidat; endet nie
    pub fn naechster(&mut self) -> String {
        if let Some(wort) = self.woerter.get(self.position) {
            self.position += 1;
            return wort.clone();
        }
        // Pool ist nie leer (siehe NamensPool::aus_text)
        let n = self.woerter.len() as u64;
        let kandidat = format!("{}{}", self.woerter[(self.zaehler % n) as usize], self.zaehler);
        self.zaehler += 1;
        kandidat
    }
}

impl Iterator for KandidatenCursor {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        Some(self.naechster())
    }
}

// ---------------------------------------------------------------------------
// NameAllocator
// ---------------------------------------------------------------------------

/// Vergibt Kanalnamen aus dem Pool
#[derive(Debug, Clone)]
pub struct NameAllocator {
    pool: NamensPool,
}

impl NameAllocator {
    pub fn neu(pool: NamensPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &NamensPool {
        &self.pool
    }

    /// Frischer Cursor mit neu gemischter Wortliste
    pub fn cursor(&self) -> KandidatenCursor {
        self.cursor_mit(&mut rand::thread_rng())
    }

    pub fn cursor_mit<R: Rng + ?Sized>(&self, rng: &mut R) -> KandidatenCursor {
        let mut woerter = self.pool.woerter.as_ref().clone();
        woerter.shuffle(rng);
        KandidatenCursor::neu(woerter)
    }

    /// Liefert den ersten Kandidaten, den `frei` als verfuegbar meldet
    pub fn vergeben(&self, frei: &impl Verfuegbarkeit) -> String {
        let mut cursor = self.cursor();
        let mut versuche = 0usize;
        loop {
            let kandidat = cursor.naechster();
            versuche += 1;
            if frei.ist_frei(&kandidat) {
                tracing::debug!(name = %kandidat, versuche, "Kanalname vergeben");
                return kandidat;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Verfuegbarkeit ueber ein Set belegter Namen
    #[derive(Default)]
    struct Belegt(RefCell<HashSet<String>>);

    impl Belegt {
        fn belegen(&self, name: &str) {
            self.0.borrow_mut().insert(name.to_string());
        }
    }

    impl Verfuegbarkeit for Belegt {
        fn ist_frei(&self, name: &str) -> bool {
            !self.0.borrow().contains(name)
        }
    }

    #[test]
    fn pool_ignoriert_leerzeilen_und_cr() {
        let pool = NamensPool::aus_text("alpha\r\nbeta\n\n  gamma  \n").unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.enthaelt("alpha"));
        assert!(pool.enthaelt("gamma"));
        assert!(!pool.enthaelt("alp"));
        assert!(!pool.enthaelt("alpha\nbeta"));
    }

    #[test]
    fn leerer_pool_ist_konfigurationsfehler() {
        assert!(matches!(
            NamensPool::aus_text("\n\n"),
            Err(ChatCodesError::Konfiguration(_))
        ));
    }

    #[test]
    fn cursor_liefert_erst_alle_woerter_dann_fallback() {
        let pool = NamensPool::aus_text("a\nb\nc").unwrap();
        let allocator = NameAllocator::neu(pool);
        let kandidaten: Vec<String> = allocator.cursor().take(6).collect();

        let erste: HashSet<&str> = kandidaten[..3].iter().map(String::as_str).collect();
        assert_eq!(erste, HashSet::from(["a", "b", "c"]));

        // Fallback nutzt die gemischte Reihenfolge mit angehaengtem Zaehler
        assert_eq!(kandidaten[3], format!("{}0", kandidaten[0]));
        assert_eq!(kandidaten[4], format!("{}1", kandidaten[1]));
        assert_eq!(kandidaten[5], format!("{}2", kandidaten[2]));
    }

    #[test]
    fn erschoepfter_pool_mit_einem_wort() {
        let allocator = NameAllocator::neu(NamensPool::aus_text("foo").unwrap());
        let belegt = Belegt::default();

        let mut namen = Vec::new();
        for _ in 0..3 {
            let name = allocator.vergeben(&belegt);
            belegt.belegen(&name);
            namen.push(name);
        }
        assert_eq!(namen, vec!["foo", "foo0", "foo1"]);
    }

    #[test]
    fn aufeinanderfolgende_vergaben_sind_eindeutig() {
        let allocator = NameAllocator::neu(NamensPool::aus_text("rot\ngruen\nblau").unwrap());
        let belegt = Belegt::default();

        let mut gesehen = HashSet::new();
        for _ in 0..20 {
            let name = allocator.vergeben(&belegt);
            assert!(gesehen.insert(name.clone()), "{name} doppelt vergeben");
            belegt.belegen(&name);
        }
    }

    #[test]
    fn jede_vergabe_mischt_neu() {
        let woerter: Vec<String> = (0..50).map(|i| format!("w{i}")).collect();
        let allocator = NameAllocator::neu(NamensPool::aus_text(&woerter.join("\n")).unwrap());

        let reihenfolgen: HashSet<Vec<String>> =
            (0..5).map(|_| allocator.cursor().take(50).collect()).collect();
        assert!(reihenfolgen.len() > 1);
    }

    #[tokio::test]
    async fn pool_aus_datei_laden() {
        let dir = tempfile::tempdir().unwrap();
        let datei = dir.path().join("channel_names.txt");
        tokio::fs::write(&datei, "otter\nbiber\n").await.unwrap();

        let pool = NamensPool::laden(&datei).await.unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.enthaelt("biber"));
    }
}
