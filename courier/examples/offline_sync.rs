//! Offline sync walkthrough with a SQLite queue.
//!
//! Captures a handful of photos while "offline", brings the network back and
//! lets the recovery monitor and scheduler drain the queue. The transport
//! fails every third call so retries show up in the event stream.
//!
//! Run with `RUST_LOG=courier=debug cargo run --example offline_sync`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier::*;

struct FlakyTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl UploadTransport for FlakyTransport {
    async fn upload(&self, item: &QueueItem) -> anyhow::Result<UploadResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(150)).await;
        if call % 3 == 0 {
            anyhow::bail!("gateway timeout uploading {}", item.filename);
        }
        Ok(UploadResponse::ok(format!("remote-{}", item.id)))
    }
}

struct Switch(AtomicBool);

#[async_trait]
impl ReachabilityProbe for Switch {
    async fn is_online(&self) -> anyhow::Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("courier=info".parse()?),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());
    let config = SqliteStoreConfig::new(url);
    let store = Arc::new(SqliteRecordStore::open(&config, ItemKind::Asset).await?);

    let network = Arc::new(Switch(AtomicBool::new(false)));
    let sync = SyncConfig::default()
        .with_inter_batch_delay(200)
        .with_reachability_poll_interval(500);

    let manager = QueueManagerBuilder::new(sync)
        .with_store(Arc::clone(&store))
        .with_transport(Arc::new(FlakyTransport {
            calls: AtomicUsize::new(0),
        }))
        .with_probe(Arc::clone(&network))
        .build()?;

    let mut stream = manager.events().subscribe_all();
    tokio::spawn(async move {
        while let Ok(event) = stream.recv().await {
            println!("[{}] {:?}", event.kind(), event.payload);
        }
    });

    let recovered = manager.recover().await?;
    println!("recovered {recovered} interrupted uploads");
    manager.spawn_recovery_monitor();

    for i in 0..8 {
        let item = NewItem::new(
            format!("IMG_{:04}.jpg", i + 1),
            "image/jpeg",
            Payload::Inline {
                bytes: vec![0xFF, 0xD8, 0xFF, i as u8],
            },
        )
        .with_owner(1, "field-team");
        let id = store.insert(item).await?;
        manager.enqueue(id).await?;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("network restored");
    network.0.store(true, Ordering::SeqCst);

    let mut metrics = manager.metrics();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        let counts = store.status_counts().await?;
        if counts.uploaded + counts.failed == counts.total() {
            break;
        }
        if tokio::time::timeout_at(deadline, metrics.changed()).await.is_err() {
            println!("gave up waiting for the queue to drain");
            break;
        }
    }

    manager.shutdown().await?;
    println!("final metrics: {:?}", *manager.metrics().borrow());
    println!("final counts: {:?}", store.status_counts().await?);
    Ok(())
}
