use std::path::Path;

use log::{debug, info};

use crate::boot::{read_boot_sector, VolumeParams};
use crate::error::{MftError, Result};
use crate::record::{
    apply_fixup, attribute_type, find_attribute, AttributeHeader, AttributeIter, FileName,
    FileRecordHeader, FILE_NAME_MIN_LENGTH,
};
use crate::runs::{decode_runs, DataRun};
use crate::volume::Volume;

/// The first 16 MFT records are reserved for NTFS system files.
pub const RESERVED_RECORDS: u64 = 16;

/// Clusters per volume read while draining a run.
const CLUSTERS_PER_READ: u64 = 1024;

/// One enumerated filesystem object. Timestamps are seconds since the UNIX
/// epoch; `parent` is the MFT record id of the containing directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MftFile {
    pub id: u64,
    pub parent: u64,
    pub created: u64,
    pub accessed: u64,
    pub modified: u64,
    pub size: u64,
    pub name: String,
    pub directory: bool,
}

/// Diagnostic counters accumulated across a scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanCounters {
    pub records_checked: u64,
    pub records_skipped: u64,
    pub files_emitted: u64,
}

/// Enumerates an NTFS volume by walking its MFT from raw sectors. Opening
/// decodes the boot sector and the MFT's own record; `read_all` (or a
/// `reader`) then streams every in-use file record out of the run list.
pub struct MftParser {
    volume: Volume,
    params: VolumeParams,
    runs: Vec<DataRun>,
    mft_size: u64,
    record_count: u64,
    records_per_cluster: u32,
    counters: ScanCounters,
}

impl MftParser {
    /// Opens a volume and locates the MFT. Any failure during setup releases
    /// the volume handle before the error is returned.
    pub fn open(path: &Path) -> Result<MftParser> {
        let mut volume = Volume::open(path)?;
        match Self::locate(&mut volume) {
            Ok((params, runs, mft_size)) => {
                let record_count = mft_size / params.bytes_per_file_record as u64;
                let records_per_cluster = params.bytes_per_cluster / params.bytes_per_file_record;
                info!(
                    "MFT of {} holds {} records across {} runs",
                    volume.path().display(),
                    record_count,
                    runs.len()
                );
                Ok(MftParser {
                    volume,
                    params,
                    runs,
                    mft_size,
                    record_count,
                    records_per_cluster,
                    counters: ScanCounters::default(),
                })
            }
            Err(e) => {
                volume.close();
                Err(e)
            }
        }
    }

    /// Total number of MFT slots, including the reserved system records.
    pub fn count(&self) -> u64 {
        self.record_count + RESERVED_RECORDS
    }

    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    pub fn mft_size(&self) -> u64 {
        self.mft_size
    }

    pub fn counters(&self) -> ScanCounters {
        self.counters
    }

    /// Streaming reader over the MFT run list. The reader borrows the parser
    /// and keeps its own drain position, so a caller can alternate `fill`
    /// with consuming the destination.
    pub fn reader(&mut self) -> MftReader<'_> {
        MftReader {
            parser: self,
            run_index: 0,
            consumed_in_run: 0,
            buffer: Vec::new(),
        }
    }

    /// Reads the whole MFT into one sequence.
    pub fn read_all(&mut self) -> Result<Vec<MftFile>> {
        let capacity = self.count().max(self.records_per_cluster as u64) as usize;
        let mut files = Vec::with_capacity(capacity);
        let mut reader = self.reader();
        while !reader.fill(&mut files)? {}
        Ok(files)
    }

    /// Releases the volume handle. Safe to call more than once; reads after
    /// close fail and unwind through the error path.
    pub fn close(&mut self) {
        self.volume.close();
    }

    fn locate(volume: &mut Volume) -> Result<(VolumeParams, Vec<DataRun>, u64)> {
        let boot = read_boot_sector(volume)?;
        let params = boot.volume_params()?;
        debug!("volume parameters: {:?}", params);

        if params.bytes_per_cluster % params.bytes_per_file_record != 0 {
            return Err(MftError::MisalignedCluster {
                cluster_size: params.bytes_per_cluster,
                record_size: params.bytes_per_file_record,
            });
        }

        let mut mft_buffer = vec![0u8; params.bytes_per_cluster as usize];
        volume.seek_to(params.mft_start_byte)?;
        volume.read_exact(&mut mft_buffer)?;

        let record_size = params.bytes_per_file_record as usize;
        let header = {
            let record = &mut mft_buffer[..record_size];
            let header = FileRecordHeader::parse(record).map_err(|_| MftError::MftUnreadable)?;
            if !header.is_valid() || !apply_fixup(record, header.usa_offset, header.usa_count) {
                return Err(MftError::MftUnreadable);
            }
            header
        };

        let record = &mft_buffer[..record_size];
        let data = find_attribute(record, &header, attribute_type::DATA)
            .ok_or(MftError::MftAttributesMissing)?;
        find_attribute(record, &header, attribute_type::BITMAP)
            .ok_or(MftError::MftAttributesMissing)?;

        let non_resident = data
            .header
            .non_resident()
            .ok_or(MftError::MftAttributesMissing)?;
        let mft_size = non_resident.data_size;
        if mft_size % params.bytes_per_file_record as u64 != 0 {
            return Err(MftError::MisalignedMft {
                mft_size,
                record_size: params.bytes_per_file_record,
            });
        }

        let cluster_span = non_resident.last_vcn.saturating_sub(non_resident.first_vcn) + 1;
        let run_bytes = data.run_list().ok_or(MftError::MftAttributesMissing)?;
        let runs = decode_runs(run_bytes, cluster_span);
        Ok((params, runs, mft_size))
    }
}

/// Streams MFT file records out of the run list in bounded batches.
pub struct MftReader<'a> {
    parser: &'a mut MftParser,
    run_index: usize,
    consumed_in_run: u64,
    buffer: Vec<u8>,
}

impl MftReader<'_> {
    /// Reads and carves MFT clusters into `dest` until the run list is
    /// exhausted or `dest` lacks room for another cluster's worth of
    /// records. Returns true once the whole MFT has been consumed; false
    /// means drain `dest` and call again.
    pub fn fill(&mut self, dest: &mut Vec<MftFile>) -> Result<bool> {
        let bytes_per_cluster = self.parser.params.bytes_per_cluster as u64;
        let records_per_cluster = self.parser.records_per_cluster as u64;

        while self.run_index < self.parser.runs.len() {
            let run = self.parser.runs[self.run_index];
            if run.sparse {
                // Uninitialised virtual clusters: nothing on disk to read.
                self.run_index += 1;
                self.consumed_in_run = 0;
                continue;
            }
            while self.consumed_in_run < run.cluster_count {
                let capacity_clusters =
                    ((dest.capacity() - dest.len()) as u64) / records_per_cluster;
                if capacity_clusters == 0 {
                    return Ok(false);
                }
                let remaining = run.cluster_count - self.consumed_in_run;
                let clusters = CLUSTERS_PER_READ.min(remaining).min(capacity_clusters);
                let read_bytes = (clusters * bytes_per_cluster) as usize;
                self.buffer.resize(read_bytes, 0);
                self.parser
                    .volume
                    .seek_to((run.lcn + self.consumed_in_run) * bytes_per_cluster)?;
                self.parser.volume.read_exact(&mut self.buffer[..read_bytes])?;
                carve(
                    &mut self.buffer[..read_bytes],
                    &self.parser.params,
                    &mut self.parser.counters,
                    dest,
                );
                self.consumed_in_run += clusters;
            }
            self.run_index += 1;
            self.consumed_in_run = 0;
        }
        Ok(true)
    }
}

/// Walks a freshly read batch in file-record strides and emits every record
/// that carries a usable $FILE_NAME.
fn carve(
    buffer: &mut [u8],
    params: &VolumeParams,
    counters: &mut ScanCounters,
    dest: &mut Vec<MftFile>,
) {
    for slot in buffer.chunks_exact_mut(params.bytes_per_file_record as usize) {
        counters.records_checked += 1;
        match carve_record(slot) {
            Some(file) => {
                counters.files_emitted += 1;
                dest.push(file);
            }
            None => counters.records_skipped += 1,
        }
    }
}

fn carve_record(slot: &mut [u8]) -> Option<MftFile> {
    let header = FileRecordHeader::parse(slot).ok()?;
    if !header.is_valid() {
        return None;
    }
    if !apply_fixup(slot, header.usa_offset, header.usa_count) {
        return None;
    }
    if !header.in_use() {
        return None;
    }

    let slot = &*slot;
    let mut file_name: Option<FileName> = None;
    let mut data_size: Option<u64> = None;
    let mut seen_data = false;
    for attribute in AttributeIter::new(slot, &header) {
        match attribute.header.attribute_type() {
            attribute_type::FILE_NAME if file_name.is_none() => {
                if let Some(value) = attribute.resident_value(FILE_NAME_MIN_LENGTH) {
                    if let Some(decoded) = FileName::parse(value) {
                        if !decoded.name.is_empty() {
                            file_name = Some(decoded);
                        }
                    }
                }
            }
            attribute_type::DATA if !seen_data => {
                seen_data = true;
                // The $FILE_NAME sizes can be stale; the stream header is
                // authoritative when the data lives outside the record.
                if let AttributeHeader::NonResident { non_resident, .. } = &attribute.header {
                    data_size = Some(non_resident.data_size);
                }
            }
            _ => {}
        }
    }

    let file_name = file_name?;
    Some(MftFile {
        id: header.record_id as u64,
        parent: file_name.parent_directory,
        created: file_name.created.unix_seconds(),
        accessed: file_name.accessed.unix_seconds(),
        modified: file_name.written.unix_seconds(),
        size: data_size.unwrap_or(file_name.data_size),
        name: file_name.name,
        directory: header.is_directory(),
    })
}
