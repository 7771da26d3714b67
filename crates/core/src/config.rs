//! Per overlay configuration.
//!
//! Every overlay instance receives its own [Config] at construction, so
//! multiple overlays with different parameters can coexist in one process
//! (the multi node tests rely on exactly that).

use std::time::Duration;

use sha1::Sha1;
use sha2::Digest;
use sha2::Sha256;
use sha2::Sha512;

use crate::consts;

/// Digest used to resolve textual names into overlay identifiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Resolver {
    /// 160 bit digest, matches the default identifier space exactly.
    Sha1,
    /// Default digest.
    #[default]
    Sha256,
    /// Wide digest for identifier spaces beyond 256 bits.
    Sha512,
}

impl Resolver {
    /// Hash a byte slice with the selected digest.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Resolver::Sha1 => Sha1::digest(data).to_vec(),
            Resolver::Sha256 => Sha256::digest(data).to_vec(),
            Resolver::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Overlay runtime configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Bit width `B` of the circular identifier space.
    pub space: usize,
    /// Bits `b` per routing digit.
    pub base: usize,
    /// Digest used by name resolution.
    pub resolver: Resolver,
    /// Leaf set half size `l`: nodes kept on each side of the local id.
    pub leaves: usize,

    /// Heartbeat period.
    pub beat_period: Duration,
    /// Silence threshold after which a peer is asked for a repair.
    pub silent_timeout: Duration,
    /// Silence threshold after which a peer is declared dead.
    pub kill_timeout: Duration,
    /// Window between the first state exchange and going active.
    pub sync_window: Duration,

    /// Deadline for a single outbound link write.
    pub write_timeout: Duration,
    /// Deadline for acquiring the first bootstrap seed.
    pub boot_timeout: Duration,
    /// Table fill under which a bootstrap assisted repair is scheduled.
    pub min_fill: usize,

    /// TCP ports scanned by the probing seeder.
    pub boot_ports: Vec<u16>,
    /// Ports at which the directory seeder queries a membership directory.
    pub directory_ports: Vec<u16>,
    /// Directory polling interval during active bootstrap.
    pub fast_rescan: Duration,
    /// Directory polling interval once the overlay converged.
    pub slow_rescan: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            space: consts::DEFAULT_SPACE,
            base: consts::DEFAULT_BASE,
            resolver: Resolver::default(),
            leaves: consts::DEFAULT_LEAVES,
            beat_period: Duration::from_millis(consts::DEFAULT_BEAT_MS),
            silent_timeout: Duration::from_millis(consts::DEFAULT_SILENT_MS),
            kill_timeout: Duration::from_millis(consts::DEFAULT_KILL_MS),
            sync_window: Duration::from_millis(consts::DEFAULT_SYNC_MS),
            write_timeout: Duration::from_millis(consts::DEFAULT_WRITE_TIMEOUT_MS),
            boot_timeout: Duration::from_millis(consts::DEFAULT_BOOT_TIMEOUT_MS),
            min_fill: consts::DEFAULT_MIN_FILL,
            boot_ports: consts::DEFAULT_BOOT_PORTS.to_vec(),
            directory_ports: consts::DEFAULT_DIRECTORY_PORTS.to_vec(),
            fast_rescan: Duration::from_millis(consts::DEFAULT_FAST_RESCAN_MS),
            slow_rescan: Duration::from_millis(consts::DEFAULT_SLOW_RESCAN_MS),
        }
    }
}

impl Config {
    /// Grace period granted to in-flight sends during shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        self.beat_period * consts::SHUTDOWN_GRACE_BEATS
    }
}
