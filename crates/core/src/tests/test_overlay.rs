//! Join, state exchange and application routing scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use super::fast_config;
use super::prepare_node;
use super::wait_until;
use crate::bootstrap::StaticSeeder;
use crate::error::Error;
use crate::overlay::callback::AppCallback;
use crate::overlay::wire::Envelope;
use crate::overlay::wire::Header;
use crate::overlay::wire::State;
use crate::overlay::Overlay;
use crate::overlay::Status;
use crate::transport::memory::MemoryHub;
use crate::transport::memory::MemoryTransport;
use crate::Config;

#[derive(Default)]
struct Mailbox {
    delivered: AsyncMutex<Vec<(Vec<u8>, Vec<u8>)>>,
}

#[async_trait::async_trait]
impl AppCallback for Mailbox {
    async fn deliver(&self, meta: Vec<u8>, data: Vec<u8>) {
        self.delivered.lock().await.push((meta, data));
    }
}

#[tokio::test]
async fn two_nodes_discover_each_other() {
    let hub = MemoryHub::new();
    let alpha = prepare_node(&hub, "alpha", vec![], fast_config()).await;
    let beta = prepare_node(&hub, "beta", vec!["mem://alpha".to_string()], fast_config()).await;

    let (alpha_id, beta_id) = (alpha.id().clone(), beta.id().clone());
    assert!(
        wait_until(|| {
            alpha.inspect().peers.contains(&beta_id) && beta.inspect().peers.contains(&alpha_id)
        })
        .await,
        "nodes never registered each other"
    );
    assert!(
        wait_until(|| {
            alpha.inspect().leaves.contains(&beta_id) && beta.inspect().leaves.contains(&alpha_id)
        })
        .await,
        "leaf sets never converged"
    );
    assert!(wait_until(|| alpha.status() == Status::Active && beta.status() == Status::Active).await);
    // Each side heartbeats the other as an active route entry.
    assert!(
        wait_until(|| {
            alpha.inspect().active_claims.contains(&beta_id)
                && beta.inspect().active_claims.contains(&alpha_id)
        })
        .await
    );
}

#[tokio::test]
async fn lone_node_goes_active() {
    let hub = MemoryHub::new();
    let solo = prepare_node(&hub, "solo", vec![], fast_config()).await;

    assert!(wait_until(|| solo.status() == Status::Active).await);
    assert!(solo.inspect().peers.is_empty());
}

#[tokio::test]
async fn boot_twice_is_rejected() {
    let hub = MemoryHub::new();
    let solo = prepare_node(&hub, "again", vec![], fast_config()).await;
    assert!(matches!(
        solo.boot(StaticSeeder::empty()).await,
        Err(Error::LateLifecycle(_))
    ));
}

#[tokio::test]
async fn silent_seeder_starves_boot() {
    struct SilentSeeder;

    #[async_trait::async_trait]
    impl crate::bootstrap::Seeder for SilentSeeder {
        async fn run(
            self: Box<Self>,
            _sink: tokio::sync::mpsc::Sender<String>,
            _phase: Arc<std::sync::atomic::AtomicU32>,
        ) {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
    }

    let hub = MemoryHub::new();
    let transport = MemoryTransport::new(hub, "starved");
    let overlay = Overlay::new(
        "starved",
        Config {
            boot_timeout: std::time::Duration::from_millis(50),
            ..fast_config()
        },
        transport,
    )
    .unwrap();
    assert!(matches!(
        overlay.boot(Box::new(SilentSeeder)).await,
        Err(Error::BootstrapStarvation)
    ));
}

#[tokio::test]
async fn application_messages_route_to_the_closest_node() {
    let hub = MemoryHub::new();
    let alpha = prepare_node(&hub, "alpha", vec![], fast_config()).await;
    let beta = prepare_node(&hub, "beta", vec!["mem://alpha".to_string()], fast_config()).await;

    let alpha_mail = Arc::new(Mailbox::default());
    let beta_mail = Arc::new(Mailbox::default());
    alpha.bind_callback(alpha_mail.clone());
    beta.bind_callback(beta_mail.clone());

    let beta_id = beta.id().clone();
    assert!(wait_until(|| alpha.inspect().peers.contains(&beta_id)).await);

    // Addressed exactly at beta: one hop, delivered there.
    alpha
        .send_app(beta.id(), b"topic".to_vec(), b"payload".to_vec())
        .await
        .unwrap();
    assert!(
        wait_until(|| beta_mail.delivered.try_lock().map(|d| d.len()).unwrap_or(0) == 1).await,
        "message never reached beta"
    );
    assert_eq!(
        beta_mail.delivered.lock().await[0],
        (b"topic".to_vec(), b"payload".to_vec())
    );

    // Addressed at the local id: delivered to the local upper layer.
    alpha
        .send_app(alpha.id(), b"loop".to_vec(), b"back".to_vec())
        .await
        .unwrap();
    assert!(
        wait_until(|| alpha_mail.delivered.try_lock().map(|d| d.len()).unwrap_or(0) == 1).await
    );
}

#[tokio::test]
async fn exchange_merge_is_version_gated() {
    let hub = MemoryHub::new();
    let alpha = prepare_node(&hub, "alpha", vec![], fast_config()).await;
    let beta = prepare_node(&hub, "beta", vec!["mem://alpha".to_string()], fast_config()).await;
    let xray = prepare_node(&hub, "xray", vec![], fast_config()).await;
    let yankee = prepare_node(&hub, "yankee", vec![], fast_config()).await;

    let beta_id = beta.id().clone();
    let xray_id = xray.id().clone();
    let yankee_id = yankee.id().clone();
    assert!(wait_until(|| alpha.inspect().peers.contains(&beta_id)).await);

    let exchange = |version: u64, addrs: BTreeMap<String, Vec<String>>| {
        Envelope::new(Header::exchange(alpha.id(), State { addrs, version }))
    };
    let entry = |overlay: &Arc<Overlay>, endpoint: &str| {
        let mut addrs = BTreeMap::new();
        addrs.insert(overlay.id().to_string(), vec![endpoint.to_string()]);
        addrs
    };

    // A fresh version makes alpha dial the advertised node.
    alpha
        .dispatch(beta_id.clone(), exchange(1000, entry(&xray, "mem://xray")))
        .await;
    assert!(
        wait_until(|| alpha.inspect().peers.contains(&xray_id)).await,
        "advertised node was never dialed"
    );

    // Replaying the same version merges nothing.
    alpha
        .dispatch(beta_id.clone(), exchange(1000, entry(&yankee, "mem://yankee")))
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!alpha.inspect().peers.contains(&yankee_id));

    // Advancing the version merges the new node only.
    alpha
        .dispatch(beta_id.clone(), exchange(1001, entry(&yankee, "mem://yankee")))
        .await;
    assert!(wait_until(|| alpha.inspect().peers.contains(&yankee_id)).await);
}
