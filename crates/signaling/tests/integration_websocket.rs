//! Integration-Tests ueber echte WebSocket-Verbindungen

use chatcodes_db::SpeicherStore;
use chatcodes_observability::ChatCodesMetrics;
use chatcodes_signaling::{
    ChannelRegistry, NameAllocator, NamensPool, SignalingConfig, SignalingServer, SignalingState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn state(max_verbindungen: usize) -> Arc<SignalingState> {
    let registry = ChannelRegistry::oeffnen(
        Arc::new(SpeicherStore::neu()),
        ChatCodesMetrics::neu().unwrap(),
    )
    .await
    .unwrap();
    SignalingState::neu(
        SignalingConfig {
            max_verbindungen,
            ..Default::default()
        },
        registry,
        NameAllocator::neu(NamensPool::aus_text("delta\nepsilon").unwrap()),
    )
}

async fn verbinden(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("WebSocket-Verbindung fehlgeschlagen");
    ws
}

/// Sendet eine Anfrage und wartet auf die naechste Text-Antwort
async fn anfrage(ws: &mut Client, anfrage: Value) -> Value {
    ws.send(Message::Text(anfrage.to_string().into())).await.unwrap();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timeout beim Warten auf Antwort")
            .expect("Verbindung geschlossen")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn beitritt(message_id: u64, channel: &str) -> Value {
    json!({
        "cc": 1,
        "type": "request-join-room",
        "messageID": message_id,
        "payload": { "channel": channel }
    })
}

async fn warten_bis(mut bedingung: impl FnMut() -> bool) {
    for _ in 0..200 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Bedingung nicht erfuellt");
}

#[tokio::test]
async fn end_to_end_ueber_websocket() {
    let state = state(16).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let server = SignalingServer::neu(Arc::clone(&state), addr).mit_listener_starten(listener, stop_rx);

    let szenario = async {
        let mut a = verbinden(addr).await;
        let mut b = verbinden(addr).await;

        let antwort_a = anfrage(&mut a, beitritt(1, "delta")).await;
        assert_eq!(antwort_a["cc"], json!(2));
        assert_eq!(antwort_a["messageID"], json!(1));
        let antwort_b = anfrage(&mut b, beitritt(2, "delta")).await;
        assert_eq!(antwort_a["payload"], antwort_b["payload"]);
        let x = antwort_a["payload"]["id"].clone();

        // Fremder Verkehr und Muell bleiben ohne Antwort, die Verbindung offen
        a.send(Message::Text("kein json".into())).await.unwrap();
        a.send(Message::Text(r#"{"a":"s"}"#.into())).await.unwrap();
        let frei = anfrage(
            &mut a,
            json!({"cc": 1, "type": "channel-available", "messageID": 3, "channel": "delta", "payload": {}}),
        )
        .await;
        assert_eq!(frei["messageID"], json!(3));
        assert_eq!(frei["payload"], json!(false));

        a.close(None).await.unwrap();
        b.close(None).await.unwrap();
        warten_bis(|| state.registry.ist_leer("delta")).await;

        let mut c = verbinden(addr).await;
        let antwort_c = anfrage(&mut c, beitritt(4, "delta")).await;
        assert_ne!(antwort_c["payload"]["id"], x);
        c.close(None).await.unwrap();

        stop_tx.send(true).unwrap();
    };

    let (server_ergebnis, ()) = tokio::join!(server, szenario);
    server_ergebnis.unwrap();

    let liste = state.registry.liste().await.unwrap();
    assert_eq!(liste.len(), 2);
    assert_eq!(state.metriken().messages_dropped_total.get(), 1);
}

#[tokio::test]
async fn verbindungslimit_lehnt_ab() {
    let state = state(1).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let server = SignalingServer::neu(Arc::clone(&state), addr).mit_listener_starten(listener, stop_rx);

    let szenario = async {
        let mut erste = verbinden(addr).await;
        assert!(tokio_tungstenite::connect_async(format!("ws://{addr}")).await.is_err());

        // Erste Verbindung arbeitet weiter
        let antwort = anfrage(&mut erste, beitritt(1, "epsilon")).await;
        assert_eq!(antwort["channel"], json!("epsilon"));
        erste.close(None).await.unwrap();
        warten_bis(|| state.verbindungen() == 0).await;

        stop_tx.send(true).unwrap();
    };

    let (server_ergebnis, ()) = tokio::join!(server, szenario);
    server_ergebnis.unwrap();
    assert_eq!(state.metriken().connections.get(), 0);
}
