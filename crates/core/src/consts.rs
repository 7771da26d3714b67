//! Constant variables.

/// Bit width of the circular identifier space.
pub const DEFAULT_SPACE: usize = 160;
/// Bits per routing digit.
pub const DEFAULT_BASE: usize = 4;
/// Leaf set half size, nodes kept on each side of the local id.
pub const DEFAULT_LEAVES: usize = 8;

/// Heartbeat period in ms.
pub const DEFAULT_BEAT_MS: u64 = 1000;
/// A peer silent for this long gets a repair request.
pub const DEFAULT_SILENT_MS: u64 = 3 * DEFAULT_BEAT_MS;
/// A peer silent for this long is declared dead.
pub const DEFAULT_KILL_MS: u64 = 6 * DEFAULT_BEAT_MS;
/// Stabilization window between the first state exchange and going active.
pub const DEFAULT_SYNC_MS: u64 = 2 * DEFAULT_BEAT_MS;
/// Beat periods granted to in-flight sends during shutdown.
pub const SHUTDOWN_GRACE_BEATS: u32 = 3;

/// Outbound writes blocked longer than this break the link.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;
/// Deadline for acquiring the first bootstrap seed.
pub const DEFAULT_BOOT_TIMEOUT_MS: u64 = 10 * 1000;
/// Table fill under which a bootstrap assisted repair is scheduled.
pub const DEFAULT_MIN_FILL: usize = 2;

/// TCP ports scanned by the probing seeder.
pub const DEFAULT_BOOT_PORTS: &[u16] = &[14142, 24142, 34142];
/// Ports at which the directory seeder queries a membership directory.
pub const DEFAULT_DIRECTORY_PORTS: &[u16] = &[4001, 7001];
/// Directory polling interval during active bootstrap in ms.
pub const DEFAULT_FAST_RESCAN_MS: u64 = 500;
/// Directory polling interval once the overlay converged in ms.
pub const DEFAULT_SLOW_RESCAN_MS: u64 = 10 * 1000;

/// Hard cap on a single framed transport message.
pub const MAX_FRAME_SIZE: usize = 1 << 20;
