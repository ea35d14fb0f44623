use std::io;

use log::warn;

use crate::bytestream::{ByteStream, Readable, SECTOR_SIZE};
use crate::error::{MftError, Result};
use crate::volume::Volume;

pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// NTFS partition boot sector. Only the BPB fields the MFT walk needs are
/// kept; the reserved ranges in between are skipped during the read.
#[derive(Debug)]
pub struct BootSector {
    pub jump_instruction: [u8; 3],
    pub oem_id: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_start_lcn: u64,
    pub backup_mft_start_lcn: u64,
    // - If this value, when read in two's complement, is positive (00h-7Fh),
    //   it designates the number of clusters per file record.
    // - If negative (80h-FFh), the size in bytes of each record is 2 to the
    //   power of its absolute value, i.e. 1 << (0x100 - value).
    pub clusters_per_file_record: u32,
    pub clusters_per_index_block: u32,
    pub serial_number: u64,
    pub boot_signature: [u8; 2],
}

impl Readable for BootSector {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        let jump_instruction = reader.read_byte_array::<3>()?;
        // Interpreted as a string
        let oem_id = reader.read_byte_array::<8>()?;
        let bytes_per_sector = reader.read_le::<u16>()?;
        let sectors_per_cluster = reader.read::<u8>()?;
        // Reserved BPB fields (0x0E - 0x27) the parser never consumes
        reader.skip_bytes(26)?;
        let total_sectors = reader.read_le::<u64>()?;
        let mft_start_lcn = reader.read_le::<u64>()?;
        let backup_mft_start_lcn = reader.read_le::<u64>()?;
        let clusters_per_file_record = reader.read_le::<u32>()?;
        let clusters_per_index_block = reader.read_le::<u32>()?;
        let serial_number = reader.read_le::<u64>()?;
        // Boot code up to the 0xAA55 signature
        reader.skip_bytes(430)?;
        let boot_signature = reader.read_byte_array::<2>()?;

        Ok(Self {
            jump_instruction,
            oem_id,
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_start_lcn,
            backup_mft_start_lcn,
            clusters_per_file_record,
            clusters_per_index_block,
            serial_number,
            boot_signature,
        })
    }
}

/// Volume geometry computed once from the boot sector.
#[derive(Debug, Clone, Copy)]
pub struct VolumeParams {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub bytes_per_cluster: u32,
    pub bytes_per_file_record: u32,
    pub mft_start_byte: u64,
}

impl BootSector {
    pub fn is_ntfs(&self) -> bool {
        self.oem_id.starts_with(b"NTFS")
    }

    pub fn volume_params(&self) -> Result<VolumeParams> {
        if !self.is_ntfs() {
            return Err(MftError::NotNtfs);
        }
        if self.boot_signature != BOOT_SIGNATURE {
            warn!("boot sector lacks the 0xAA55 signature, continuing anyway");
        }
        if self.bytes_per_sector == 0 {
            return Err(MftError::BadBootSector("bytes per sector is zero"));
        }
        if self.sectors_per_cluster == 0 {
            return Err(MftError::BadBootSector("sectors per cluster is zero"));
        }

        let bytes_per_cluster = self.bytes_per_sector as u32 * self.sectors_per_cluster as u32;
        let bytes_per_file_record = if self.clusters_per_file_record < 0x80 {
            self.clusters_per_file_record
                .checked_mul(bytes_per_cluster)
                .ok_or(MftError::BadBootSector("file record size out of range"))?
        } else {
            let exponent = 0x100u32.wrapping_sub(self.clusters_per_file_record);
            if !(0x80..=0xFF).contains(&self.clusters_per_file_record) || exponent > 31 {
                return Err(MftError::BadBootSector("file record size out of range"));
            }
            1u32 << exponent
        };
        if bytes_per_file_record == 0 {
            return Err(MftError::BadBootSector("file record size is zero"));
        }

        Ok(VolumeParams {
            bytes_per_sector: self.bytes_per_sector,
            sectors_per_cluster: self.sectors_per_cluster,
            bytes_per_cluster,
            bytes_per_file_record,
            mft_start_byte: self.mft_start_lcn * bytes_per_cluster as u64,
        })
    }
}

/// Reads and decodes sector 0 of the volume.
pub fn read_boot_sector(volume: &mut Volume) -> Result<BootSector> {
    let mut sector = [0u8; SECTOR_SIZE];
    volume.seek_to(0)?;
    volume.read_exact(&mut sector)?;
    let boot = ByteStream::new(&sector).read::<BootSector>()?;
    Ok(boot)
}

#[cfg(test)]
pub(crate) fn synthetic_boot_sector(
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    mft_start_lcn: u64,
    clusters_per_file_record: u32,
) -> [u8; SECTOR_SIZE] {
    let mut sector = [0u8; SECTOR_SIZE];
    sector[3..11].copy_from_slice(b"NTFS    ");
    sector[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
    sector[13] = sectors_per_cluster;
    sector[40..48].copy_from_slice(&1_000_000u64.to_le_bytes());
    sector[48..56].copy_from_slice(&mft_start_lcn.to_le_bytes());
    sector[64..68].copy_from_slice(&clusters_per_file_record.to_le_bytes());
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

#[test]
fn test_small_value_file_record_encoding() {
    let sector = synthetic_boot_sector(512, 8, 786432, 2);
    let boot = ByteStream::new(&sector).read::<BootSector>().unwrap();
    let params = boot.volume_params().unwrap();
    assert_eq!(params.bytes_per_cluster, 4096);
    assert_eq!(params.bytes_per_file_record, 2 * 4096);
    assert_eq!(params.mft_start_byte, 786432 * 4096);
}

#[test]
fn test_power_of_two_file_record_encoding() {
    // 0xF6 encodes 1 << (0x100 - 0xF6) = 1024 bytes per record
    let sector = synthetic_boot_sector(512, 8, 4, 0xF6);
    let boot = ByteStream::new(&sector).read::<BootSector>().unwrap();
    let params = boot.volume_params().unwrap();
    assert_eq!(params.bytes_per_file_record, 1024);
}

#[test]
fn test_rejects_non_ntfs_volume() {
    let mut sector = synthetic_boot_sector(512, 8, 4, 0xF6);
    sector[3..11].copy_from_slice(b"MSDOS5.0");
    let boot = ByteStream::new(&sector).read::<BootSector>().unwrap();
    assert!(matches!(boot.volume_params(), Err(MftError::NotNtfs)));
}

#[test]
fn test_rejects_out_of_range_geometry() {
    let sector = synthetic_boot_sector(0, 8, 4, 0xF6);
    let boot = ByteStream::new(&sector).read::<BootSector>().unwrap();
    assert!(matches!(
        boot.volume_params(),
        Err(MftError::BadBootSector(_))
    ));

    // An exponent above 31 cannot describe a real record size.
    let sector = synthetic_boot_sector(512, 8, 4, 0x80);
    let boot = ByteStream::new(&sector).read::<BootSector>().unwrap();
    assert!(matches!(
        boot.volume_params(),
        Err(MftError::BadBootSector(_))
    ));
}
