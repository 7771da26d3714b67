//! Core of the Iris decentralized messaging framework: a Pastry style
//! structured overlay delivering key based routing over an unreliable peer
//! mesh, with heartbeat driven membership and failure detection.
//!
//! Nodes hash their logical name into a circular identifier space and keep
//! a leaf set, prefix routing rows and a neighborhood set about their
//! peers. Application messages are routed by logical id, hopping to the
//! peer whose identifier shares the longest prefix with the destination
//! until the numerically closest node delivers them to the upper layer.
//!
//! ```no_run
//! use iris_core::bootstrap::StaticSeeder;
//! use iris_core::transport::tcp::TcpTransport;
//! use iris_core::Config;
//! use iris_core::Overlay;
//!
//! # async fn boot() -> iris_core::Result<()> {
//! let transport = TcpTransport::bind("gateway", "0.0.0.0:14142").await?;
//! let overlay = Overlay::new("gateway", Config::default(), transport)?;
//! overlay
//!     .boot(StaticSeeder::new(
//!         vec!["10.0.0.1:14142".to_string()],
//!         std::time::Duration::from_secs(1),
//!     ))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod consts;
pub mod error;
pub mod heart;
pub mod overlay;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use config::Resolver;
pub use error::Error;
pub use error::Result;
pub use overlay::space::Id;
pub use overlay::Overlay;
pub use overlay::Status;
