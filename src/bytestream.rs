use std::{
    io::{self, Cursor, Read, Seek, SeekFrom},
    string::FromUtf16Error,
};

use byteorder::{ByteOrder, ReadBytesExt};

pub const SECTOR_SIZE: usize = 512;

pub trait Readable {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized;
}

pub trait ReadableEndianness {
    fn read<T>(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        T: ByteOrder,
        Self: Sized;
}

impl Readable for u8 {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        reader.cursor.read_u8()
    }
}

impl Readable for i8 {
    fn read(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        Self: Sized,
    {
        reader.cursor.read_i8()
    }
}

impl ReadableEndianness for u16 {
    fn read<T>(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        T: ByteOrder,
        Self: Sized,
    {
        reader.cursor.read_u16::<T>()
    }
}

impl ReadableEndianness for u32 {
    fn read<T>(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        T: ByteOrder,
        Self: Sized,
    {
        reader.cursor.read_u32::<T>()
    }
}

impl ReadableEndianness for u64 {
    fn read<T>(reader: &mut ByteStream<'_>) -> io::Result<Self>
    where
        T: ByteOrder,
        Self: Sized,
    {
        reader.cursor.read_u64::<T>()
    }
}

/// Cursor over a borrowed byte region. All reads are length-checked; reading
/// past the end yields `UnexpectedEof` instead of panicking, so on-disk
/// length fields can never walk a decoder out of its buffer.
pub struct ByteStream<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Starts the stream `offset` bytes into `data`.
    pub fn at_offset(data: &'a [u8], offset: usize) -> io::Result<Self> {
        if offset > data.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let mut cursor = Cursor::new(data);
        cursor.set_position(offset as u64);
        Ok(Self { cursor })
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub fn peek_le<T>(&mut self) -> io::Result<T>
    where
        T: ReadableEndianness,
    {
        let current_index = self.cursor.seek(SeekFrom::Current(0))?;
        let result = self.read_le::<T>()?;
        let _ = self.cursor.seek(SeekFrom::Start(current_index))?;
        Ok(result)
    }

    pub fn read<T>(&mut self) -> io::Result<T>
    where
        T: Readable,
    {
        T::read(self)
    }

    pub fn read_le<T>(&mut self) -> io::Result<T>
    where
        T: ReadableEndianness,
    {
        T::read::<byteorder::LittleEndian>(self)
    }

    pub fn read_be<T>(&mut self) -> io::Result<T>
    where
        T: ReadableEndianness,
    {
        T::read::<byteorder::BigEndian>(self)
    }

    // Reads S bytes from the stream
    pub fn read_byte_array<const S: usize>(&mut self) -> io::Result<[u8; S]> {
        let mut buffer = [0u8; S];
        self.cursor.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Borrows the next `amount` bytes without copying.
    pub fn read_slice(&mut self, amount: usize) -> io::Result<&'a [u8]> {
        let start = self.position();
        let data = *self.cursor.get_ref();
        let end = start
            .checked_add(amount)
            .filter(|end| *end <= data.len())
            .ok_or(io::ErrorKind::UnexpectedEof)?;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    pub fn skip_bytes(&mut self, amount: u64) -> io::Result<()> {
        if amount > self.remaining() as u64 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.cursor.set_position(self.cursor.position() + amount);
        Ok(())
    }
}

pub fn interpret_bytes_as_utf16(name_bytes: &[u8]) -> Result<String, FromUtf16Error> {
    let mut unicode_symbols: Vec<u16> = Vec::with_capacity(name_bytes.len() / 2);
    for pair in name_bytes.chunks_exact(2) {
        unicode_symbols.push(u16::from_le_bytes([pair[0], pair[1]]));
    }
    String::from_utf16(&unicode_symbols)
}

#[test]
fn test_typed_reads() {
    let data = [0x01u8, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF];
    let mut stream = ByteStream::new(&data);
    assert_eq!(stream.read::<u8>().unwrap(), 0x01);
    assert_eq!(stream.read_le::<u16>().unwrap(), 0x1234);
    assert_eq!(stream.peek_le::<u32>().unwrap(), 0x12345678);
    assert_eq!(stream.read_le::<u32>().unwrap(), 0x12345678);
    assert_eq!(stream.remaining(), 1);
    assert!(stream.read_le::<u16>().is_err());
}

#[test]
fn test_slices_are_length_checked() {
    let data = [0u8; 4];
    let mut stream = ByteStream::new(&data);
    assert_eq!(stream.read_slice(4).unwrap(), &data[..]);
    assert!(stream.read_slice(1).is_err());
    assert!(ByteStream::at_offset(&data, 5).is_err());
}

#[test]
fn test_utf16_decoding() {
    // "$MFT" in UTF-16LE
    let bytes = [0x24, 0x00, 0x4D, 0x00, 0x46, 0x00, 0x54, 0x00];
    assert_eq!(interpret_bytes_as_utf16(&bytes).unwrap(), "$MFT");
}
