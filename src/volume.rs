use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use crate::error::{MftError, Result};

/// Read handle to a block device or volume image, addressed by absolute byte
/// offset. Reads are positioned and unbuffered; the MFT reader above this
/// already batches whole clusters, so buffering here would only copy twice.
pub struct Volume {
    path: PathBuf,
    file: Option<File>,
    position: u64,
}

impl Volume {
    /// Opens the volume read-only. On Windows a raw device path such as
    /// `\\.\C:` requires sufficient privileges; a disk image path works
    /// anywhere.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(MftError::VolumeOpen)?;
        Ok(Self {
            path: path.to_owned(),
            file: Some(file),
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Releases the handle. Further reads fail; closing again is a no-op.
    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file()?.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Fills `buffer` from the current position. A device that yields fewer
    /// bytes than requested produces `ShortRead` with the exact counts.
    pub fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let offset = self.position;
        let file = self.file()?;
        let mut got = 0;
        while got < buffer.len() {
            match file.read(&mut buffer[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if got < buffer.len() {
            return Err(MftError::ShortRead {
                offset,
                wanted: buffer.len(),
                got,
            });
        }
        self.position += buffer.len() as u64;
        Ok(())
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or_else(|| {
            MftError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "volume handle is closed",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn positioned_reads_and_short_read() {
        let mut image = tempfile::NamedTempFile::new().unwrap();
        image.write_all(&[0xAAu8; 1024]).unwrap();
        image.flush().unwrap();

        let mut volume = Volume::open(image.path()).unwrap();
        let mut buffer = [0u8; 512];
        volume.seek_to(512).unwrap();
        volume.read_exact(&mut buffer).unwrap();
        assert_eq!(buffer, [0xAAu8; 512]);

        // Only 1024 bytes exist, so a read at 768 comes up short.
        volume.seek_to(768).unwrap();
        match volume.read_exact(&mut buffer) {
            Err(MftError::ShortRead {
                offset,
                wanted,
                got,
            }) => {
                assert_eq!(offset, 768);
                assert_eq!(wanted, 512);
                assert_eq!(got, 256);
            }
            other => panic!("expected ShortRead, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn close_is_idempotent() {
        let image = tempfile::NamedTempFile::new().unwrap();
        let mut volume = Volume::open(image.path()).unwrap();
        assert!(volume.is_open());
        volume.close();
        volume.close();
        assert!(!volume.is_open());
        assert!(volume.seek_to(0).is_err());
    }
}
