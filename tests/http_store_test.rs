//! Integration tests for the HTTP store against a loopback store server

use parking_monitor::domain::types::{SlotId, SlotRecord};
use parking_monitor::infra::{Config, GpioBackend, Metrics};
use parking_monitor::io::store_server::{serve_store, DocumentTable};
use parking_monitor::io::{HttpStore, SimulatedBoard, SlotStore, StoreError};
use parking_monitor::services::{ReconcileOutcome, ReconciliationEngine, SensorLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

struct Server {
    base_url: String,
    table: DocumentTable,
    _shutdown: watch::Sender<bool>,
}

async fn start_server() -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let table = DocumentTable::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let serve_table = table.clone();
    tokio::spawn(async move {
        let _ = serve_store(listener, serve_table, shutdown_rx).await;
    });

    Server { base_url, table, _shutdown: shutdown_tx }
}

fn store(server: &Server) -> HttpStore {
    HttpStore::new(&server.base_url, "parkslot", "slots", None, Duration::from_secs(2)).unwrap()
}

fn slots() -> Vec<SlotId> {
    vec![SlotId::new("slotid1"), SlotId::new("slotid2"), SlotId::new("slotid3")]
}

#[tokio::test]
async fn test_create_load_and_swap() {
    let server = start_server().await;
    let store = store(&server);

    assert!(matches!(store.load().await, Err(StoreError::NotFound)));
    assert!(store.create_if_absent(&SlotRecord::initial(&slots())).await.unwrap());
    assert!(!store.create_if_absent(&SlotRecord::initial(&slots())).await.unwrap());

    let current = store.load().await.unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.value.available, 3);

    let mut next = current.value.clone();
    next.slots.insert("slotid1".to_string(), false);
    next.available = 2;
    assert_eq!(store.compare_and_swap(1, &next).await.unwrap(), 2);

    let err = store.compare_and_swap(1, &next).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { expected: 1 }));

    // Stored body uses the flat document layout
    let (_, body) = server.table.get("/parkslot/slots").unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["slotid1"], false);
    assert_eq!(json["available"], 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_instances_keep_record_consistent() {
    let server = start_server().await;
    let setup = ReconciliationEngine::new(Arc::new(store(&server)), 5, Arc::new(Metrics::new()));
    setup.ensure_record(&slots()).await.unwrap();

    let mut handles = Vec::new();
    for writer in 0..4u32 {
        let engine =
            ReconciliationEngine::new(Arc::new(store(&server)), 20, Arc::new(Metrics::new()));
        handles.push(tokio::spawn(async move {
            let mut committed = 0;
            for i in 0..20u32 {
                let slot = SlotId::new(format!("slotid{}", (writer + i) % 3 + 1));
                if let ReconcileOutcome::Committed { .. } =
                    engine.reconcile(&slot, (writer * 7 + i) % 3 == 0).await
                {
                    committed += 1;
                }
            }
            committed
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let record = store(&server).load().await.unwrap().value;
    assert!(record.is_consistent(), "record {:?}", record);
}

#[tokio::test]
async fn test_sensor_loop_over_http_store() {
    let server = start_server().await;
    let config = Config::default()
        .with_gpio_backend(GpioBackend::Simulated)
        .with_timing(10, 1)
        .with_simulated_distance("slotid2", 15.0);

    let (bindings, board) = SimulatedBoard::from_config(&config).into_bindings();
    let metrics = Arc::new(Metrics::new());
    let reconciler = ReconciliationEngine::new(Arc::new(store(&server)), 5, metrics.clone());
    let mut sensor_loop = SensorLoop::new(&config, bindings, reconciler, Vec::new(), metrics);

    sensor_loop.initialize().await.unwrap();
    let (_tx, mut rx) = watch::channel(false);
    assert_eq!(sensor_loop.run_cycle(&mut rx).await, Some((2, 3)));

    let record = store(&server).load().await.unwrap().value;
    assert!(!record.slot(&SlotId::new("slotid2")));
    assert_eq!(record.available, 2);
    assert!(!board.slot("slotid2").unwrap().indicator_on());
    assert!(board.slot("slotid3").unwrap().indicator_on());
}

#[tokio::test]
async fn test_unconditional_put_rejected() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let response = client
        .put(format!("{}/parkslot/slots", server.base_url))
        .body("{\"available\":0}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 428);
    assert!(server.table.get("/parkslot/slots").is_none());
}
