//! Binary persistence for graph lists and checkpoints.
//!
//! All durable files share one envelope: 4 magic bytes, a little-endian u32
//! format version, then a bincode payload. Readers decode the full payload
//! before any in-memory state is touched, so a corrupt or truncated file
//! never applies partially.

use crate::RegionGraph;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Errors for durable storage operations
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Not a recognized file: bad magic bytes")]
    BadMagic,
    #[error("Format version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
}

/// Result type for persistence operations
pub type PersistResult<T> = Result<T, PersistError>;

/// Magic bytes identifying a graph-list file
pub const GRAPH_LIST_MAGIC: [u8; 4] = *b"WGGL";

/// Graph-list format version
pub const GRAPH_LIST_VERSION: u32 = 1;

/// Write `value` under the magic/version envelope.
pub fn write_envelope<T, P>(path: P, magic: [u8; 4], version: u32, value: &T) -> PersistResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&magic)?;
    writer.write_all(&version.to_le_bytes())?;
    let data = bincode::serialize(value).map_err(|e| PersistError::Serialization(e.to_string()))?;
    writer.write_all(&(data.len() as u64).to_le_bytes())?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

/// Read a value written by [`write_envelope`], validating magic and version.
pub fn read_envelope<T, P>(path: P, magic: [u8; 4], version: u32) -> PersistResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut found_magic = [0u8; 4];
    reader.read_exact(&mut found_magic)?;
    if found_magic != magic {
        return Err(PersistError::BadMagic);
    }

    let mut version_bytes = [0u8; 4];
    reader.read_exact(&mut version_bytes)?;
    let found_version = u32::from_le_bytes(version_bytes);
    if found_version != version {
        return Err(PersistError::VersionMismatch {
            expected: version,
            actual: found_version,
        });
    }

    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes) as usize;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    bincode::deserialize(&data).map_err(|e| PersistError::Serialization(e.to_string()))
}

/// Save a training graph list for later replay.
pub fn save_graph_list<P: AsRef<Path>>(path: P, graphs: &[RegionGraph]) -> PersistResult<()> {
    write_envelope(path, GRAPH_LIST_MAGIC, GRAPH_LIST_VERSION, &graphs)
}

/// Load a training graph list saved by [`save_graph_list`].
pub fn load_graph_list<P: AsRef<Path>>(path: P) -> PersistResult<Vec<RegionGraph>> {
    read_envelope(path, GRAPH_LIST_MAGIC, GRAPH_LIST_VERSION)
}
