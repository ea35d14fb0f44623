use std::io;

use thiserror::Error;

/// Errors surfaced while opening a volume or enumerating its MFT. Individual
/// malformed file records are never surfaced; they are skipped and counted.
#[derive(Debug, Error)]
pub enum MftError {
    #[error("failed to open volume: {0}")]
    VolumeOpen(#[source] io::Error),

    #[error("short read at byte {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },

    #[error("volume is not formatted as NTFS")]
    NotNtfs,

    #[error("boot sector field out of range: {0}")]
    BadBootSector(&'static str),

    #[error("MFT record 0 could not be read")]
    MftUnreadable,

    #[error("MFT record 0 is missing its $DATA or $BITMAP attribute")]
    MftAttributesMissing,

    #[error("MFT size {mft_size} is not a multiple of the file record size {record_size}")]
    MisalignedMft { mft_size: u64, record_size: u32 },

    #[error("cluster size {cluster_size} is not a multiple of the file record size {record_size}")]
    MisalignedCluster {
        cluster_size: u32,
        record_size: u32,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, MftError>;
