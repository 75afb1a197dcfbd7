//! TOML node-info files.
//!
//! ```toml
//! id = 0
//! address = "127.0.0.1:7000"
//! identity = "<64 hex chars: Ed25519 public key>"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use shared_crypto::Ed25519PublicKey;
use shared_types::{PartyId, ReplicaId};

use crate::domain::{DirectoryError, DirectoryResult, NodeInfo};

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeInfoFile {
    pub id: u16,
    pub address: String,
    pub identity: String,
}

impl NodeInfoFile {
    pub fn load<P: AsRef<Path>>(path: P) -> DirectoryResult<NodeInfo> {
        let label = path.as_ref().display().to_string();
        let content = fs::read_to_string(path.as_ref()).map_err(|e| DirectoryError::Io {
            path: label.clone(),
            error: e.to_string(),
        })?;
        Self::parse(&content, &label)
    }

    /// Parse `content`; `label` names the source in errors.
    pub fn parse(content: &str, label: &str) -> DirectoryResult<NodeInfo> {
        let file: NodeInfoFile = toml::from_str(content).map_err(|e| DirectoryError::Parse {
            path: label.to_string(),
            reason: e.to_string(),
        })?;
        file.into_node_info(label)
    }

    pub fn render(info: &NodeInfo) -> DirectoryResult<String> {
        let file = NodeInfoFile {
            id: info.id.0,
            address: info.address.clone(),
            identity: hex::encode(info.identity.0),
        };
        toml::to_string(&file).map_err(|e| DirectoryError::Encode(e.to_string()))
    }

    /// Write `info` to `path`, replacing any previous file.
    pub fn store<P: AsRef<Path>>(path: P, info: &NodeInfo) -> DirectoryResult<()> {
        let text = Self::render(info)?;
        fs::write(path.as_ref(), text).map_err(|e| DirectoryError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })
    }

    fn into_node_info(self, label: &str) -> DirectoryResult<NodeInfo> {
        let invalid = |reason: String| DirectoryError::InvalidIdentity {
            path: label.to_string(),
            reason,
        };
        if self.address.trim().is_empty() {
            return Err(DirectoryError::Parse {
                path: label.to_string(),
                reason: "empty address".into(),
            });
        }
        let bytes = hex::decode(self.identity.trim()).map_err(|e| invalid(e.to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| invalid(format!("expected 32 bytes, got {}", b.len())))?;
        Ed25519PublicKey::from_bytes(key).map_err(|e| invalid(e.to_string()))?;

        Ok(NodeInfo {
            id: ReplicaId(self.id),
            address: self.address,
            identity: PartyId(key),
        })
    }
}
