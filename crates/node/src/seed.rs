//! Seed lists for bootstrapping from well known endpoints.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

/// A list contains SeedPeer.
#[derive(Deserialize, Serialize, Debug, Default)]
pub struct Seed {
    pub peers: Vec<SeedPeer>,
}

/// One well known overlay member.
#[derive(Deserialize, Serialize, Debug)]
pub struct SeedPeer {
    /// Remote `host:port` endpoint.
    pub endpoint: String,
}

impl Seed {
    /// Load a seed list from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The bare endpoint list.
    pub fn endpoints(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.endpoint.clone()).collect()
    }
}
