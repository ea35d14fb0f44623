use std::io;

use crate::bytestream::{interpret_bytes_as_utf16, ByteStream, Readable, SECTOR_SIZE};

pub const FILE_RECORD_MAGIC: [u8; 4] = *b"FILE";

pub const FLAG_IN_USE: u16 = 0x0001;
pub const FLAG_DIRECTORY: u16 = 0x0002;

/// Attribute type codes. The on-disk terminator is `END`; anything outside
/// `FIRST..=LAST` means the chain is corrupt.
pub mod attribute_type {
    pub const STANDARD_INFORMATION: u32 = 0x10;
    pub const ATTRIBUTE_LIST: u32 = 0x20;
    pub const FILE_NAME: u32 = 0x30;
    pub const DATA: u32 = 0x80;
    pub const BITMAP: u32 = 0xB0;
    pub const END: u32 = 0xFFFF_FFFF;
    pub const FIRST: u32 = STANDARD_INFORMATION;
    pub const LAST: u32 = 0x100;
}

/// $FILE_NAME name types.
pub mod name_type {
    pub const POSIX: u8 = 0;
    pub const WIN32: u8 = 1;
    pub const DOS: u8 = 2;
    pub const WIN32_AND_DOS: u8 = 3;
}

/// Fixed-size header at the start of every MFT slot.
#[derive(Debug)]
pub struct FileRecordHeader {
    pub signature: [u8; 4],
    pub usa_offset: u16,
    pub usa_count: u16,
    pub log_file_sequence: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub attributes_offset: u16,
    // 0x01 == record in use, 0x02 == record is a directory
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_record: u64,
    pub next_attribute_number: u16,
    pub record_id: u32,
}

impl Readable for FileRecordHeader {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        let signature = reader.read_byte_array::<4>()?;
        let usa_offset = reader.read_le::<u16>()?;
        let usa_count = reader.read_le::<u16>()?;
        let log_file_sequence = reader.read_le::<u64>()?;
        let sequence_number = reader.read_le::<u16>()?;
        let hard_link_count = reader.read_le::<u16>()?;
        let attributes_offset = reader.read_le::<u16>()?;
        let flags = reader.read_le::<u16>()?;
        let bytes_in_use = reader.read_le::<u32>()?;
        let bytes_allocated = reader.read_le::<u32>()?;
        let base_record = reader.read_le::<u64>()?;
        let next_attribute_number = reader.read_le::<u16>()?;
        reader.skip_bytes(2)?;
        let record_id = reader.read_le::<u32>()?;

        Ok(Self {
            signature,
            usa_offset,
            usa_count,
            log_file_sequence,
            sequence_number,
            hard_link_count,
            attributes_offset,
            flags,
            bytes_in_use,
            bytes_allocated,
            base_record,
            next_attribute_number,
            record_id,
        })
    }
}

impl FileRecordHeader {
    pub fn parse(record: &[u8]) -> io::Result<Self> {
        ByteStream::new(record).read()
    }

    pub fn is_valid(&self) -> bool {
        self.signature == FILE_RECORD_MAGIC
    }

    pub fn in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }
}

/// Applies the update sequence array to a freshly read file record: the true
/// last word of each 512-byte sector lives in the USA and is written back
/// over the update sequence number stamped at the sector end. Returns false
/// when the USA is out of range and the record must be skipped.
pub fn apply_fixup(record: &mut [u8], usa_offset: u16, usa_count: u16) -> bool {
    if usa_count > 4 {
        return false;
    }
    let usa_offset = usa_offset as usize;
    let usa_count = usa_count as usize;
    for i in 1..usa_count {
        let sector_end = i * SECTOR_SIZE;
        let usa_entry = usa_offset + i * 2;
        if sector_end > record.len() || usa_entry + 2 > record.len() {
            return false;
        }
        record[sector_end - 2] = record[usa_entry];
        record[sector_end - 1] = record[usa_entry + 1];
    }
    true
}

/// Struct for holding the common values between all attribute headers.
#[derive(Debug, Clone)]
pub struct CommonAttributeHeader {
    pub attribute_type: u32,
    pub length: u32,
    pub non_resident_flag: u8,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub attribute_number: u16,
}

impl Readable for CommonAttributeHeader {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        Ok(Self {
            attribute_type: reader.read_le::<u32>()?,
            length: reader.read_le::<u32>()?,
            non_resident_flag: reader.read::<u8>()?,
            name_length: reader.read::<u8>()?,
            name_offset: reader.read_le::<u16>()?,
            flags: reader.read_le::<u16>()?,
            attribute_number: reader.read_le::<u16>()?,
        })
    }
}

/// Data relating to resident attributes only.
#[derive(Debug, Clone)]
pub struct ResidentAttributeHeader {
    pub value_length: u32,
    pub value_offset: u16,
    pub indexed_flag: u8,
}

impl Readable for ResidentAttributeHeader {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        let value_length = reader.read_le::<u32>()?;
        let value_offset = reader.read_le::<u16>()?;
        let indexed_flag = reader.read::<u8>()?;
        // One byte of padding
        let _ = reader.read::<u8>()?;
        Ok(Self {
            value_length,
            value_offset,
            indexed_flag,
        })
    }
}

/// Data specific to non resident attribute headers.
#[derive(Debug, Clone)]
pub struct NonResidentAttributeHeader {
    pub first_vcn: u64,
    pub last_vcn: u64,
    pub run_array_offset: u16,
    pub compression_unit: u16,
    pub allocated_size: u64,
    pub data_size: u64,
    pub initialized_size: u64,
}

/// Common header plus the non-resident extension.
pub const NON_RESIDENT_HEADER_SIZE: usize = 64;

impl Readable for NonResidentAttributeHeader {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        let first_vcn = reader.read_le::<u64>()?;
        let last_vcn = reader.read_le::<u64>()?;
        let run_array_offset = reader.read_le::<u16>()?;
        let compression_unit = reader.read_le::<u16>()?;
        // Discard 4 bytes of 0 padding
        reader.skip_bytes(4)?;
        let allocated_size = reader.read_le::<u64>()?;
        let data_size = reader.read_le::<u64>()?;
        let initialized_size = reader.read_le::<u64>()?;
        Ok(Self {
            first_vcn,
            last_vcn,
            run_array_offset,
            compression_unit,
            allocated_size,
            data_size,
            initialized_size,
        })
    }
}

/// An attribute is resident (value inside the record) or non-resident
/// (value in clusters described by a run list); both share the common
/// header prefix.
#[derive(Debug, Clone)]
pub enum AttributeHeader {
    Resident {
        common: CommonAttributeHeader,
        resident: ResidentAttributeHeader,
    },
    NonResident {
        common: CommonAttributeHeader,
        non_resident: NonResidentAttributeHeader,
    },
}

impl Readable for AttributeHeader {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        let common = reader.read::<CommonAttributeHeader>()?;
        Ok(if common.non_resident_flag == 0 {
            let resident = reader.read::<ResidentAttributeHeader>()?;
            AttributeHeader::Resident { common, resident }
        } else {
            let non_resident = reader.read::<NonResidentAttributeHeader>()?;
            AttributeHeader::NonResident {
                common,
                non_resident,
            }
        })
    }
}

impl AttributeHeader {
    pub fn attribute_type(&self) -> u32 {
        self.common().attribute_type
    }

    pub fn attribute_length(&self) -> u32 {
        self.common().length
    }

    pub fn is_non_resident(&self) -> bool {
        matches!(self, AttributeHeader::NonResident { .. })
    }

    pub fn non_resident(&self) -> Option<&NonResidentAttributeHeader> {
        match self {
            AttributeHeader::NonResident { non_resident, .. } => Some(non_resident),
            AttributeHeader::Resident { .. } => None,
        }
    }

    pub fn common(&self) -> &CommonAttributeHeader {
        match self {
            AttributeHeader::Resident { common, .. } => common,
            AttributeHeader::NonResident { common, .. } => common,
        }
    }
}

/// One attribute inside a file record: the decoded header plus a bounded
/// view of the record for value and run-list access. `offset` is the
/// attribute's byte position from the start of the record.
#[derive(Debug)]
pub struct Attribute<'a> {
    pub header: AttributeHeader,
    pub offset: usize,
    record: &'a [u8],
}

impl<'a> Attribute<'a> {
    /// Resident value accessor: a view of `value_length` bytes at
    /// `value_offset`, or None when the value is shorter than
    /// `minimum_length` or leaves the record.
    pub fn resident_value(&self, minimum_length: usize) -> Option<&'a [u8]> {
        let AttributeHeader::Resident { resident, .. } = &self.header else {
            return None;
        };
        let length = resident.value_length as usize;
        let start = self.offset + resident.value_offset as usize;
        let end = start.checked_add(length)?;
        if length < minimum_length || end > self.record.len() {
            return None;
        }
        Some(&self.record[start..end])
    }

    /// Run-list bytes of a non-resident attribute, bounded by the
    /// attribute's length and the record.
    pub fn run_list(&self) -> Option<&'a [u8]> {
        let AttributeHeader::NonResident {
            common,
            non_resident,
        } = &self.header
        else {
            return None;
        };
        let start = self.offset + non_resident.run_array_offset as usize;
        let end = (self.offset + common.length as usize).min(self.record.len());
        if start >= end {
            return None;
        }
        Some(&self.record[start..end])
    }
}

/// Walks the attribute stream of a file record. The `0xFFFFFFFF` terminator
/// is authoritative; `next_attribute_number` only caps the walk on records
/// whose chain never terminates. All reads stay inside `bytes_in_use`.
pub struct AttributeIter<'a> {
    record: &'a [u8],
    offset: usize,
    remaining: usize,
    done: bool,
}

impl<'a> AttributeIter<'a> {
    pub fn new(record: &'a [u8], header: &FileRecordHeader) -> Self {
        let bytes_in_use = (header.bytes_in_use as usize).min(record.len());
        Self {
            record: &record[..bytes_in_use],
            offset: header.attributes_offset as usize,
            remaining: header.next_attribute_number as usize,
            done: false,
        }
    }
}

impl<'a> Iterator for AttributeIter<'a> {
    type Item = Attribute<'a>;

    fn next(&mut self) -> Option<Attribute<'a>> {
        if self.done || self.remaining == 0 {
            return None;
        }
        let mut stream = ByteStream::at_offset(self.record, self.offset).ok()?;
        let type_code = stream.peek_le::<u32>().ok()?;
        if type_code == attribute_type::END {
            return None;
        }
        if !(attribute_type::FIRST..=attribute_type::LAST).contains(&type_code) {
            return None;
        }
        let header = stream.read::<AttributeHeader>().ok()?;
        self.remaining -= 1;

        let attribute = Attribute {
            header,
            offset: self.offset,
            record: self.record,
        };
        let length = attribute.header.attribute_length() as usize;
        if length > 0 && length < self.record.len() {
            self.offset += length;
        } else if attribute.header.is_non_resident() {
            // Fallback stride for records whose length field is broken
            self.offset += NON_RESIDENT_HEADER_SIZE;
        } else {
            self.done = true;
        }
        Some(attribute)
    }
}

/// Bounded attribute search used on MFT record 0: never walks more than 8
/// attributes deep regardless of what the record header claims.
pub fn find_attribute<'a>(
    record: &'a [u8],
    header: &FileRecordHeader,
    attribute_type: u32,
) -> Option<Attribute<'a>> {
    AttributeIter::new(record, header)
        .take(8)
        .find(|attribute| attribute.header.attribute_type() == attribute_type)
}

/// 1601-to-1970 epoch difference in 100-nanosecond ticks.
pub const EPOCH_DIFFERENCE_TICKS: i64 = 116_444_736_000_000_000;
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// A point in time as 100-nanosecond ticks since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtfsTimestamp(pub u64);

impl NtfsTimestamp {
    /// Seconds since the UNIX epoch; anything before 1970 clamps to 0.
    pub fn unix_seconds(&self) -> u64 {
        let seconds = (self.0 as i64 - EPOCH_DIFFERENCE_TICKS) / TICKS_PER_SECOND;
        seconds.max(0) as u64
    }
}

impl Readable for NtfsTimestamp {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        Ok(NtfsTimestamp(reader.read_le::<u64>()?))
    }
}

/// Bytes in a $FILE_NAME value before the name itself.
pub const FILE_NAME_MIN_LENGTH: usize = 66;

/// The upper 16 bits of a directory reference are a sequence number, not
/// part of the parent record id.
pub const PARENT_REFERENCE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Decoded resident $FILE_NAME value.
#[derive(Debug)]
pub struct FileName {
    pub parent_directory: u64,
    pub created: NtfsTimestamp,
    pub changed: NtfsTimestamp,
    pub written: NtfsTimestamp,
    pub accessed: NtfsTimestamp,
    pub allocated_size: u64,
    pub data_size: u64,
    pub name_type: u8,
    pub name: String,
}

impl FileName {
    /// Decodes a resident $FILE_NAME value. None when the buffer is shorter
    /// than the fixed prefix, the advertised name leaves the buffer, or the
    /// name is not valid UTF-16.
    pub fn parse(value: &[u8]) -> Option<FileName> {
        if value.len() < FILE_NAME_MIN_LENGTH {
            return None;
        }
        let mut stream = ByteStream::new(value);
        let parent_reference = stream.read_le::<u64>().ok()?;
        let created = stream.read::<NtfsTimestamp>().ok()?;
        let changed = stream.read::<NtfsTimestamp>().ok()?;
        let written = stream.read::<NtfsTimestamp>().ok()?;
        let accessed = stream.read::<NtfsTimestamp>().ok()?;
        let allocated_size = stream.read_le::<u64>().ok()?;
        let data_size = stream.read_le::<u64>().ok()?;
        // File attribute flags and reparse data
        stream.skip_bytes(8).ok()?;
        let name_length = stream.read::<u8>().ok()?;
        let name_type = stream.read::<u8>().ok()?;
        let name_bytes = stream.read_slice(name_length as usize * 2).ok()?;
        let name = interpret_bytes_as_utf16(name_bytes).ok()?;

        Some(FileName {
            parent_directory: parent_reference & PARENT_REFERENCE_MASK,
            created,
            changed,
            written,
            accessed,
            allocated_size,
            data_size,
            name_type,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_attributes(attributes: &[Vec<u8>]) -> (Vec<u8>, FileRecordHeader) {
        let mut record = vec![0u8; 1024];
        record[0..4].copy_from_slice(b"FILE");
        record[4..6].copy_from_slice(&48u16.to_le_bytes());
        record[6..8].copy_from_slice(&1u16.to_le_bytes());
        record[20..22].copy_from_slice(&56u16.to_le_bytes());
        record[22..24].copy_from_slice(&FLAG_IN_USE.to_le_bytes());
        let mut offset = 56;
        for attribute in attributes {
            record[offset..offset + attribute.len()].copy_from_slice(attribute);
            offset += attribute.len();
        }
        record[offset..offset + 4].copy_from_slice(&attribute_type::END.to_le_bytes());
        offset += 8;
        record[24..28].copy_from_slice(&(offset as u32).to_le_bytes());
        record[28..32].copy_from_slice(&1024u32.to_le_bytes());
        record[40..42].copy_from_slice(&((attributes.len() + 1) as u16).to_le_bytes());
        let header = FileRecordHeader::parse(&record).unwrap();
        (record, header)
    }

    fn resident_attribute(attribute_type: u32, value: &[u8]) -> Vec<u8> {
        let length = (24 + value.len() + 7) & !7;
        let mut attribute = vec![0u8; length];
        attribute[0..4].copy_from_slice(&attribute_type.to_le_bytes());
        attribute[4..8].copy_from_slice(&(length as u32).to_le_bytes());
        attribute[16..20].copy_from_slice(&(value.len() as u32).to_le_bytes());
        attribute[20..22].copy_from_slice(&24u16.to_le_bytes());
        attribute[24..24 + value.len()].copy_from_slice(value);
        attribute
    }

    #[test]
    fn file_record_header_field_offsets() {
        let mut record = vec![0u8; 1024];
        record[0..4].copy_from_slice(b"FILE");
        record[4..6].copy_from_slice(&48u16.to_le_bytes());
        record[6..8].copy_from_slice(&3u16.to_le_bytes());
        record[20..22].copy_from_slice(&56u16.to_le_bytes());
        record[22..24].copy_from_slice(&3u16.to_le_bytes());
        record[24..28].copy_from_slice(&416u32.to_le_bytes());
        record[40..42].copy_from_slice(&5u16.to_le_bytes());
        record[44..48].copy_from_slice(&77u32.to_le_bytes());

        let header = FileRecordHeader::parse(&record).unwrap();
        assert!(header.is_valid());
        assert!(header.in_use());
        assert!(header.is_directory());
        assert_eq!(header.usa_offset, 48);
        assert_eq!(header.usa_count, 3);
        assert_eq!(header.attributes_offset, 56);
        assert_eq!(header.bytes_in_use, 416);
        assert_eq!(header.next_attribute_number, 5);
        assert_eq!(header.record_id, 77);
    }

    #[test]
    fn fixup_patches_every_sector_end() {
        let mut record = vec![0u8; 1024];
        // USN 0x1111 stamped at both sector ends, true words in the USA
        record[48..50].copy_from_slice(&0x1111u16.to_le_bytes());
        record[50..52].copy_from_slice(&0xBEEFu16.to_le_bytes());
        record[52..54].copy_from_slice(&0xCAFEu16.to_le_bytes());
        record[510..512].copy_from_slice(&0x1111u16.to_le_bytes());
        record[1022..1024].copy_from_slice(&0x1111u16.to_le_bytes());

        assert!(apply_fixup(&mut record, 48, 3));
        assert_eq!(&record[510..512], &0xBEEFu16.to_le_bytes());
        assert_eq!(&record[1022..1024], &0xCAFEu16.to_le_bytes());

        // Applying again is a no-op once the words already match the USA.
        let snapshot = record.clone();
        assert!(apply_fixup(&mut record, 48, 3));
        assert_eq!(record, snapshot);
    }

    #[test]
    fn fixup_rejects_oversized_usa() {
        let mut record = vec![0u8; 1024];
        assert!(!apply_fixup(&mut record, 48, 6));
    }

    #[test]
    fn fixup_rejects_usa_outside_record() {
        let mut record = vec![0u8; 1024];
        assert!(!apply_fixup(&mut record, 1020, 3));
        // Two sectors described but only one present
        let mut short_record = vec![0u8; 512];
        assert!(!apply_fixup(&mut short_record, 48, 3));
    }

    #[test]
    fn attribute_iterator_stops_at_terminator() {
        let attributes = vec![
            resident_attribute(attribute_type::STANDARD_INFORMATION, &[0u8; 72]),
            resident_attribute(attribute_type::FILE_NAME, &[0u8; 80]),
        ];
        let (record, header) = record_with_attributes(&attributes);
        let collected: Vec<u32> = AttributeIter::new(&record, &header)
            .map(|attribute| attribute.header.attribute_type())
            .collect();
        assert_eq!(
            collected,
            vec![
                attribute_type::STANDARD_INFORMATION,
                attribute_type::FILE_NAME
            ]
        );
    }

    #[test]
    fn attribute_iterator_stops_on_garbage_type() {
        let attributes = vec![
            resident_attribute(attribute_type::STANDARD_INFORMATION, &[0u8; 72]),
            resident_attribute(0x05, &[0u8; 8]),
        ];
        let (record, header) = record_with_attributes(&attributes);
        assert_eq!(AttributeIter::new(&record, &header).count(), 1);
    }

    #[test]
    fn attribute_iterator_stops_on_zero_length() {
        let mut broken = resident_attribute(attribute_type::FILE_NAME, &[0u8; 80]);
        broken[4..8].copy_from_slice(&0u32.to_le_bytes());
        let (record, header) = record_with_attributes(&[broken]);
        // The attribute is yielded, but the walk cannot advance past it.
        assert_eq!(AttributeIter::new(&record, &header).count(), 1);
    }

    #[test]
    fn resident_value_is_bounded() {
        let value = [0xABu8; 32];
        let (record, header) = record_with_attributes(&[resident_attribute(
            attribute_type::STANDARD_INFORMATION,
            &value,
        )]);
        let attribute = AttributeIter::new(&record, &header).next().unwrap();
        assert_eq!(attribute.resident_value(32).unwrap(), &value);
        // A caller expecting a larger layout gets nothing back.
        assert!(attribute.resident_value(33).is_none());
    }

    fn file_name_value(parent: u64, name: &str, name_type: u8) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut value = vec![0u8; FILE_NAME_MIN_LENGTH + units.len() * 2];
        value[0..8].copy_from_slice(&parent.to_le_bytes());
        value[8..16].copy_from_slice(&116_444_736_000_000_000u64.to_le_bytes());
        value[48..56].copy_from_slice(&4096u64.to_le_bytes());
        value[64] = units.len() as u8;
        value[65] = name_type;
        for (i, unit) in units.iter().enumerate() {
            value[66 + i * 2..68 + i * 2].copy_from_slice(&unit.to_le_bytes());
        }
        value
    }

    #[test]
    fn file_name_masks_parent_sequence_number() {
        let value = file_name_value(0x0005_0000_0000_0024, "report.txt", name_type::WIN32);
        let file_name = FileName::parse(&value).unwrap();
        assert_eq!(file_name.parent_directory, 0x24);
        assert_eq!(file_name.name, "report.txt");
        assert_eq!(file_name.name_type, name_type::WIN32);
        assert_eq!(file_name.data_size, 4096);
        assert_eq!(file_name.created.unix_seconds(), 0);
    }

    #[test]
    fn file_name_rejects_truncated_value() {
        let value = file_name_value(5, "a", name_type::WIN32);
        assert!(FileName::parse(&value[..FILE_NAME_MIN_LENGTH - 1]).is_none());
        // Advertised name length runs past the buffer
        let mut lying = file_name_value(5, "a", name_type::WIN32);
        lying[64] = 200;
        assert!(FileName::parse(&lying).is_none());
    }

    #[test]
    fn timestamp_conversion() {
        assert_eq!(NtfsTimestamp(116_444_736_000_000_000).unix_seconds(), 0);
        assert_eq!(NtfsTimestamp(0).unix_seconds(), 0);
        assert_eq!(
            NtfsTimestamp(116_444_736_000_000_000 + 10_000_000).unix_seconds(),
            1
        );
        // 2020-01-01T00:00:00Z
        assert_eq!(
            NtfsTimestamp(132_223_104_000_000_000).unix_seconds(),
            1_577_836_800
        );
        // Pre-1970 stamps clamp to the epoch.
        assert_eq!(NtfsTimestamp(1).unix_seconds(), 0);
    }
}
