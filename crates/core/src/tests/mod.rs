//! Multi node scenario tests over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use crate::bootstrap::StaticSeeder;
use crate::config::Config;
use crate::overlay::Overlay;
use crate::transport::memory::MemoryHub;
use crate::transport::memory::MemoryTransport;

mod test_overlay;

#[allow(dead_code)]
pub fn setup_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

/// Timings tight enough to run whole lifecycles in a test.
pub fn fast_config() -> Config {
    Config {
        space: 32,
        base: 4,
        leaves: 4,
        beat_period: Duration::from_millis(25),
        silent_timeout: Duration::from_millis(75),
        kill_timeout: Duration::from_millis(150),
        sync_window: Duration::from_millis(50),
        boot_timeout: Duration::from_millis(500),
        min_fill: 0,
        ..Default::default()
    }
}

/// Boot a named overlay on the hub, seeded from the given endpoints.
pub async fn prepare_node(
    hub: &Arc<MemoryHub>,
    name: &str,
    seeds: Vec<String>,
    config: Config,
) -> Arc<Overlay> {
    let transport = MemoryTransport::new(hub.clone(), name);
    let overlay = Overlay::new(name, config, transport).unwrap();
    let seeder = if seeds.is_empty() {
        StaticSeeder::empty()
    } else {
        StaticSeeder::new(seeds, Duration::from_millis(50))
    };
    overlay.boot(seeder).await.unwrap();
    overlay
}

/// Poll a condition until it holds or the scenario deadline passes.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
