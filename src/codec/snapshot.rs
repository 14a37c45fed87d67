//! Snapshot format for exported entities
//!
//! A snapshot is self-describing: it carries the declarations of every
//! exported type next to the records, so it can be imported by a process
//! that never loaded those types. Text encoding is JSON; the compact
//! encoding is MessagePack with named fields.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::core::{PropertyValues, Result, TrackError};
use crate::entity::EntityState;
use crate::metadata::MetadataDeclaration;

pub const SNAPSHOT_VERSION: u32 = 1;

/// One exported entity: mapped and declared-unmapped values only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub type_name: String,
    pub entity_state: EntityState,
    pub values: PropertyValues,
    #[serde(default)]
    pub original_values: PropertyValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub metadata: MetadataDeclaration,
    pub entities: Vec<SnapshotRecord>,
}

/// How imported records enter the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Attach with the exported state and original values instead of Unchanged.
    pub restore_state: bool,
}

impl ImportOptions {
    pub fn restore_state() -> Self {
        Self {
            restore_state: true,
        }
    }
}

impl EntitySnapshot {
    pub fn new(metadata: MetadataDeclaration, entities: Vec<SnapshotRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            metadata,
            entities,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.check_version()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = rmp_serde::from_slice(bytes)?;
        snapshot.check_version()
    }

    fn check_version(self) -> Result<Self> {
        if self.version > SNAPSHOT_VERSION {
            return Err(TrackError::Serialization(format!(
                "Unsupported snapshot version {} (newest known is {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        Ok(self)
    }

    /// Writes atomically: a temp file in the target directory is persisted
    /// over `path`. `.msgpack` files get the binary encoding, anything else JSON.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let data = if is_binary(path) {
            self.to_bytes()?
        } else {
            self.to_json()?.into_bytes()
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| TrackError::Io(e.to_string()))?;
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        if is_binary(path) {
            Self::from_bytes(&data)
        } else {
            let text = String::from_utf8(data)
                .map_err(|e| TrackError::Serialization(e.to_string()))?;
            Self::from_json(&text)
        }
    }
}

fn is_binary(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "msgpack" || ext == "mpk")
}
