use crate::Error;
use memmap::{Mmap, MmapOptions};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Sequential, write-only side of the codec byte-stream contract.
///
/// All multi-byte fixed-width writes are big-endian; vints are 7 bits
/// per byte with the high bit as continuation.
pub trait IndexOutput {
    fn write_byte(&mut self, b: u8) -> Result<(), Error>;
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error>;
    /// Bytes written so far.
    fn file_pointer(&self) -> u64;
    fn close(&mut self) -> Result<(), Error>;

    /// Running checksum of the bytes written, where an implementation
    /// keeps one.
    fn checksum(&self) -> Result<i64, Error> {
        Err(Error::Unsupported("checksums on this output"))
    }

    fn write_short(&mut self, v: i16) -> Result<(), Error> {
        self.write_bytes(&v.to_be_bytes())
    }
    fn write_int(&mut self, v: i32) -> Result<(), Error> {
        self.write_bytes(&v.to_be_bytes())
    }
    fn write_long(&mut self, v: i64) -> Result<(), Error> {
        self.write_bytes(&v.to_be_bytes())
    }
    fn write_vint(&mut self, v: u32) -> Result<(), Error> {
        self.write_vlong(v as u64)
    }
    fn write_vlong(&mut self, v: u64) -> Result<(), Error> {
        let mut v = v;
        while v >= 0x80 {
            self.write_byte((v as u8 & 0x7f) | 0x80)?;
            v >>= 7;
        }
        self.write_byte(v as u8)
    }
    /// Length-prefixed UTF-8.
    fn write_string(&mut self, s: &str) -> Result<(), Error> {
        self.write_vint(s.len() as u32)?;
        self.write_bytes(s.as_bytes())
    }
}

/// Heap-backed output; codec writers buffer a segment here and
/// surrender the bytes to the directory layer on close.
#[derive(Default)]
pub struct ByteBuffersOutput {
    data: Vec<u8>,
    closed: bool,
}

impl ByteBuffersOutput {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
    /// Take the accumulated bytes, leaving this output closed.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl IndexOutput for ByteBuffersOutput {
    fn write_byte(&mut self, b: u8) -> Result<(), Error> {
        if self.closed {
            return Err(Error::AlreadyClosed("ByteBuffersOutput"));
        }
        self.data.push(b);
        Ok(())
    }
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::AlreadyClosed("ByteBuffersOutput"));
        }
        self.data.extend_from_slice(data);
        Ok(())
    }
    fn file_pointer(&self) -> u64 {
        self.data.len() as u64
    }
    fn close(&mut self) -> Result<(), Error> {
        self.closed = true;
        Ok(())
    }
}

/// File-backed output that tracks its own pointer so `tell` never
/// needs a seek syscall.
pub struct FileOutput {
    inner: BufWriter<File>,
    pointer: u64,
    closed: bool,
}

impl FileOutput {
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path)?;
        Ok(Self {
            inner: BufWriter::new(file),
            pointer: 0,
            closed: false,
        })
    }
}

impl IndexOutput for FileOutput {
    fn write_byte(&mut self, b: u8) -> Result<(), Error> {
        self.write_bytes(&[b])
    }
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::AlreadyClosed("FileOutput"));
        }
        self.inner.write_all(data)?;
        self.pointer += data.len() as u64;
        Ok(())
    }
    fn file_pointer(&self) -> u64 {
        self.pointer
    }
    fn close(&mut self) -> Result<(), Error> {
        if !self.closed {
            self.inner.flush()?;
            self.closed = true;
        }
        Ok(())
    }
}

pub fn open_mmap_file(path: &Path) -> Result<Arc<Mmap>, Error> {
    let file = fs::File::open(path)?;
    let opts = MmapOptions::new();
    let mmap: Mmap = unsafe { opts.map(&file)? };
    Ok(Arc::new(mmap))
}

/// Random-access, read-only side of the byte-stream contract.
pub trait IndexInput {
    fn read_byte(&mut self) -> Result<u8, Error>;
    fn read_bytes(&mut self, dst: &mut [u8]) -> Result<(), Error>;
    fn seek(&mut self, pos: u64) -> Result<(), Error>;
    fn file_pointer(&self) -> u64;
    fn len(&self) -> u64;

    fn eof(&self) -> bool {
        self.file_pointer() >= self.len()
    }
    fn read_short(&mut self) -> Result<i16, Error> {
        let mut buf = [0u8; 2];
        self.read_bytes(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
    fn read_int(&mut self) -> Result<i32, Error> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }
    fn read_long(&mut self) -> Result<i64, Error> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }
    fn read_vint(&mut self) -> Result<u32, Error> {
        let v = read_varint(self, 5)?;
        Ok(v as u32)
    }
    fn read_vlong(&mut self) -> Result<u64, Error> {
        read_varint(self, 10)
    }
    fn read_string(&mut self) -> Result<String, Error> {
        let len = self.read_vint()? as usize;
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        Ok(std::str::from_utf8(&buf)?.to_string())
    }
}

fn read_varint<I: IndexInput + ?Sized>(input: &mut I, max_bytes: u32) -> Result<u64, Error> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for _ in 0..max_bytes {
        let byte = input.read_byte()? as u64;
        result |= (byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(Error::Corruption(format!(
        "varint longer than {} bytes",
        max_bytes
    )))
}

/// One cursor over shared read-only storage. Clones and slices carry
/// independent positions over the same backing bytes; the backing may
/// be a mapped file or a heap buffer.
#[derive(Clone)]
pub struct BytesInput {
    source: Arc<dyn AsRef<[u8]> + Send + Sync>,
    start: usize,
    end: usize,
    pos: usize,
}

impl BytesInput {
    pub fn from_mmap(source: Arc<Mmap>) -> Self {
        let end = source.len();
        Self {
            source,
            start: 0,
            end,
            pos: 0,
        }
    }
    pub fn from_vec(data: Vec<u8>) -> Self {
        let end = data.len();
        Self {
            source: Arc::new(data),
            start: 0,
            end,
            pos: 0,
        }
    }
    pub fn open(path: &Path) -> Result<Self, Error> {
        Ok(Self::from_mmap(open_mmap_file(path)?))
    }
    /// Independent sub-view; position 0 of the slice is `offset` here.
    pub fn slice(&self, offset: u64, length: u64) -> Result<BytesInput, Error> {
        let start = self.start + offset as usize;
        let end = start + length as usize;
        if end > self.end {
            return Err(Error::eof("slice beyond input"));
        }
        Ok(BytesInput {
            source: self.source.clone(),
            start,
            end,
            pos: 0,
        })
    }
    fn bytes(&self) -> &[u8] {
        &(*self.source).as_ref()[self.start..self.end]
    }
}

impl std::fmt::Debug for BytesInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BytesInput[@{}..{}]", self.pos, self.end - self.start)
    }
}

impl IndexInput for BytesInput {
    fn read_byte(&mut self) -> Result<u8, Error> {
        let data = self.bytes();
        if self.pos >= data.len() {
            return Err(Error::eof("read_byte at end of input"));
        }
        let b = data[self.pos];
        self.pos += 1;
        Ok(b)
    }
    fn read_bytes(&mut self, dst: &mut [u8]) -> Result<(), Error> {
        let data = self.bytes();
        let end = self.pos + dst.len();
        if end > data.len() {
            return Err(Error::eof("read_bytes at end of input"));
        }
        dst.copy_from_slice(&data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
    fn seek(&mut self, pos: u64) -> Result<(), Error> {
        let pos = pos as usize;
        if pos > self.end - self.start {
            return Err(Error::eof("seek beyond input"));
        }
        self.pos = pos;
        Ok(())
    }
    fn file_pointer(&self) -> u64 {
        self.pos as u64
    }
    fn len(&self) -> u64 {
        (self.end - self.start) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn vlong_round_trip() {
        let expected: &[u64] = &[
            0,
            0xf,
            0xef,
            0xeef,
            0xbeef,
            0xdbeef,
            0xadbeef,
            0xeadbeef,
            0xdeadbeef,
            u64::max_value(),
        ];
        let mut out = ByteBuffersOutput::new();
        for x in expected {
            out.write_vlong(*x).unwrap();
        }
        let mut rdr = BytesInput::from_vec(out.into_bytes());
        for x in expected {
            assert_eq!(*x, rdr.read_vlong().unwrap());
        }
        assert!(rdr.eof());
    }

    #[test]
    fn fixed_width_big_endian() {
        let mut out = ByteBuffersOutput::new();
        out.write_int(0x11223344).unwrap();
        out.write_long(-1).unwrap();
        out.write_short(0x0102).unwrap();
        assert_eq!(out.file_pointer(), 14);
        let mut rdr = BytesInput::from_vec(out.into_bytes());
        assert_eq!(0x11223344, rdr.read_int().unwrap());
        assert_eq!(-1, rdr.read_long().unwrap());
        assert_eq!(0x0102, rdr.read_short().unwrap());
        assert!(rdr.eof());
    }

    #[test]
    fn strings_and_slices() {
        let mut out = ByteBuffersOutput::new();
        out.write_string("hello").unwrap();
        out.write_string("worlds").unwrap();
        let first_len = 6; // vint(5) + bytes
        let rdr = BytesInput::from_vec(out.into_bytes());

        let mut whole = rdr.clone();
        assert_eq!("hello", whole.read_string().unwrap());
        assert_eq!("worlds", whole.read_string().unwrap());

        let mut tail = rdr.slice(first_len, rdr.len() - first_len).unwrap();
        assert_eq!("worlds", tail.read_string().unwrap());
        assert!(tail.eof());
    }

    #[test]
    fn clones_have_independent_positions() {
        let mut out = ByteBuffersOutput::new();
        for i in 0..10u32 {
            out.write_vint(i).unwrap();
        }
        let mut a = BytesInput::from_vec(out.into_bytes());
        let mut b = a.clone();
        assert_eq!(0, a.read_vint().unwrap());
        assert_eq!(0, b.read_vint().unwrap());
        assert_eq!(1, a.read_vint().unwrap());
        a.seek(0).unwrap();
        assert_eq!(0, a.read_vint().unwrap());
        assert_eq!(1, b.read_vint().unwrap());
    }

    #[test]
    fn closed_output_rejects_writes() {
        let mut out = ByteBuffersOutput::new();
        out.write_byte(1).unwrap();
        out.close().unwrap();
        assert!(matches!(
            out.write_byte(2),
            Err(Error::AlreadyClosed(_))
        ));
        assert!(matches!(out.checksum(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn file_output_round_trips_through_mmap() -> Result<(), Error> {
        let tmp_dir = TempDir::new()?;
        let path = tmp_dir.path().join("stream.bin");
        {
            let mut out = FileOutput::create(&path)?;
            for i in 0..10_000u32 {
                out.write_vint(i * 3)?;
            }
            out.write_string("trailer")?;
            out.close()?;
        }
        let mut rdr = BytesInput::open(&path)?;
        for i in 0..10_000u32 {
            assert_eq!(i * 3, rdr.read_vint()?);
        }
        assert_eq!("trailer", rdr.read_string()?);
        assert!(rdr.eof());
        Ok(())
    }

    #[test]
    fn short_read_is_an_io_error() {
        let mut rdr = BytesInput::from_vec(vec![1, 2]);
        assert!(matches!(rdr.read_int(), Err(Error::IO(_))));
    }
}
