use crate::Error;

/// 32 KiB blocks; matches the int pool's 8 Ki ints.
pub const BYTE_BLOCK_SIZE: usize = 32768;
pub const INT_BLOCK_SIZE: usize = 8192;

/// Append-only byte storage in fixed blocks. Offsets are stable for the
/// life of the pool: growth allocates a new block, it never moves old
/// ones, so an absolute offset always names the same byte.
pub struct ByteBlockPool {
    buffers: Vec<Box<[u8]>>,
    buffer_upto: usize,
    byte_upto: usize,
}

impl Default for ByteBlockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteBlockPool {
    pub fn new() -> Self {
        Self {
            buffers: vec![new_byte_block()],
            buffer_upto: 0,
            byte_upto: 0,
        }
    }

    /// Total bytes written.
    pub fn size(&self) -> u64 {
        (self.buffer_upto * BYTE_BLOCK_SIZE + self.byte_upto) as u64
    }

    /// Allocated block memory.
    pub fn bytes_used(&self) -> u64 {
        (self.buffers.len() * BYTE_BLOCK_SIZE) as u64
    }

    /// Append, spilling across block boundaries; returns the starting offset.
    pub fn append(&mut self, bytes: &[u8]) -> u64 {
        let start = self.size();
        let mut src = bytes;
        while !src.is_empty() {
            let available = BYTE_BLOCK_SIZE - self.byte_upto;
            if available == 0 {
                self.next_buffer();
                continue;
            }
            let take = src.len().min(available);
            self.buffers[self.buffer_upto][self.byte_upto..self.byte_upto + take]
                .copy_from_slice(&src[..take]);
            self.byte_upto += take;
            src = &src[take..];
        }
        start
    }

    /// Store a string null-terminated; returns its starting offset.
    pub fn append_str(&mut self, s: &str) -> u64 {
        let offset = self.append(s.as_bytes());
        self.append(&[0]);
        offset
    }

    /// Reserve `size` contiguous bytes in the current block, rolling to a
    /// fresh block when it does not fit. Oversized requests are rejected.
    pub fn allocate(&mut self, size: usize) -> Result<u64, Error> {
        if size == 0 || size > BYTE_BLOCK_SIZE {
            return Err(Error::InvalidArgument(format!(
                "allocation of {} bytes (block size {})",
                size, BYTE_BLOCK_SIZE
            )));
        }
        if BYTE_BLOCK_SIZE - self.byte_upto < size {
            self.next_buffer();
        }
        let offset = self.size();
        self.byte_upto += size;
        Ok(offset)
    }

    pub fn read_byte(&self, offset: u64) -> Result<u8, Error> {
        if offset >= self.size() {
            return Err(Error::InvalidArgument(format!(
                "pool read at {} past {}",
                offset,
                self.size()
            )));
        }
        let offset = offset as usize;
        Ok(self.buffers[offset / BYTE_BLOCK_SIZE][offset % BYTE_BLOCK_SIZE])
    }

    pub fn read_bytes(&self, offset: u64, dst: &mut [u8]) -> Result<(), Error> {
        if offset + dst.len() as u64 > self.size() {
            return Err(Error::InvalidArgument(format!(
                "pool read of {} bytes at {} past {}",
                dst.len(),
                offset,
                self.size()
            )));
        }
        let mut offset = offset as usize;
        let mut filled = 0;
        while filled < dst.len() {
            let block = offset / BYTE_BLOCK_SIZE;
            let within = offset % BYTE_BLOCK_SIZE;
            let take = (dst.len() - filled).min(BYTE_BLOCK_SIZE - within);
            dst[filled..filled + take].copy_from_slice(&self.buffers[block][within..within + take]);
            filled += take;
            offset += take;
        }
        Ok(())
    }

    /// Read a null-terminated string stored with `append_str`.
    pub fn read_str(&self, offset: u64) -> Result<String, Error> {
        let mut out = Vec::new();
        let mut at = offset;
        loop {
            let b = self.read_byte(at)?;
            if b == 0 {
                break;
            }
            out.push(b);
            at += 1;
        }
        Ok(std::str::from_utf8(&out)?.to_string())
    }

    /// Keep the blocks, rewind the write position.
    pub fn reset(&mut self) {
        self.buffer_upto = 0;
        self.byte_upto = 0;
    }

    /// Release everything but the first block.
    pub fn clear(&mut self) {
        self.buffers.truncate(1);
        self.buffers.shrink_to_fit();
        self.reset();
    }

    fn next_buffer(&mut self) {
        self.buffer_upto += 1;
        if self.buffer_upto == self.buffers.len() {
            self.buffers.push(new_byte_block());
        }
        self.byte_upto = 0;
    }
}

fn new_byte_block() -> Box<[u8]> {
    vec![0u8; BYTE_BLOCK_SIZE].into_boxed_slice()
}

/// Append-only i32 storage, same block discipline as the byte pool.
/// Offsets are in ints, not bytes.
pub struct IntBlockPool {
    buffers: Vec<Box<[i32]>>,
    buffer_upto: usize,
    int_upto: usize,
}

impl Default for IntBlockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IntBlockPool {
    pub fn new() -> Self {
        Self {
            buffers: vec![new_int_block()],
            buffer_upto: 0,
            int_upto: 0,
        }
    }

    pub fn size(&self) -> u32 {
        (self.buffer_upto * INT_BLOCK_SIZE + self.int_upto) as u32
    }

    pub fn bytes_used(&self) -> u64 {
        (self.buffers.len() * INT_BLOCK_SIZE * 4) as u64
    }

    pub fn append(&mut self, value: i32) -> u32 {
        if self.int_upto == INT_BLOCK_SIZE {
            self.next_buffer();
        }
        let offset = self.size();
        self.buffers[self.buffer_upto][self.int_upto] = value;
        self.int_upto += 1;
        offset
    }

    /// Reserve `count` contiguous ints within one block.
    pub fn allocate(&mut self, count: usize) -> Result<u32, Error> {
        if count == 0 || count > INT_BLOCK_SIZE {
            return Err(Error::InvalidArgument(format!(
                "allocation of {} ints (block size {})",
                count, INT_BLOCK_SIZE
            )));
        }
        if INT_BLOCK_SIZE - self.int_upto < count {
            self.next_buffer();
        }
        let offset = self.size();
        self.int_upto += count;
        Ok(offset)
    }

    pub fn read_int(&self, offset: u32) -> Result<i32, Error> {
        if offset >= self.size() {
            return Err(Error::InvalidArgument(format!(
                "pool read at {} past {}",
                offset,
                self.size()
            )));
        }
        let offset = offset as usize;
        Ok(self.buffers[offset / INT_BLOCK_SIZE][offset % INT_BLOCK_SIZE])
    }

    pub fn write_int(&mut self, offset: u32, value: i32) -> Result<(), Error> {
        if offset >= self.size() {
            return Err(Error::InvalidArgument(format!(
                "pool write at {} past {}",
                offset,
                self.size()
            )));
        }
        let offset = offset as usize;
        self.buffers[offset / INT_BLOCK_SIZE][offset % INT_BLOCK_SIZE] = value;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.buffer_upto = 0;
        self.int_upto = 0;
    }

    pub fn clear(&mut self) {
        self.buffers.truncate(1);
        self.buffers.shrink_to_fit();
        self.reset();
    }

    fn next_buffer(&mut self) {
        self.buffer_upto += 1;
        if self.buffer_upto == self.buffers.len() {
            self.buffers.push(new_int_block());
        }
        self.int_upto = 0;
    }
}

fn new_int_block() -> Box<[i32]> {
    vec![0i32; INT_BLOCK_SIZE].into_boxed_slice()
}

/// Capacity schedule for posting slices: small terms stay cheap, long
/// posting lists converge to large slices.
const SLICE_CAPACITIES: [usize; 6] = [8, 16, 32, 64, 128, 256];

/// A growable int sequence stored as chained slices inside an
/// [`IntBlockPool`]. Each slice reserves one trailing cell that either
/// stays unused (the live tail) or holds the offset of the next slice.
#[derive(Debug, Clone, Copy)]
pub struct IntSliceList {
    head: u32,
    tail: u32,
    end: u32,
    level: usize,
    len: u32,
}

impl IntSliceList {
    pub fn new(pool: &mut IntBlockPool) -> Result<Self, Error> {
        let cap = SLICE_CAPACITIES[0];
        let head = pool.allocate(cap + 1)?;
        Ok(Self {
            head,
            tail: head,
            end: head + cap as u32,
            level: 0,
            len: 0,
        })
    }

    pub fn len(&self) -> u32 {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, pool: &mut IntBlockPool, value: i32) -> Result<(), Error> {
        if self.tail == self.end {
            let next_level = (self.level + 1).min(SLICE_CAPACITIES.len() - 1);
            let cap = SLICE_CAPACITIES[next_level];
            let next = pool.allocate(cap + 1)?;
            pool.write_int(self.end, next as i32)?;
            self.tail = next;
            self.end = next + cap as u32;
            self.level = next_level;
        }
        pool.write_int(self.tail, value)?;
        self.tail += 1;
        self.len += 1;
        Ok(())
    }

    /// Walk the chain front to back. The capacity schedule is replayed
    /// deterministically, so no per-slice length is stored.
    pub fn read_all(&self, pool: &IntBlockPool) -> Result<Vec<i32>, Error> {
        let mut out = Vec::with_capacity(self.len as usize);
        let mut offset = self.head;
        let mut level = 0usize;
        let mut remaining = self.len;
        while remaining > 0 {
            let cap = SLICE_CAPACITIES[level] as u32;
            let take = remaining.min(cap);
            for i in 0..take {
                out.push(pool.read_int(offset + i)?);
            }
            remaining -= take;
            if remaining > 0 {
                offset = pool.read_int(offset + cap)? as u32;
                level = (level + 1).min(SLICE_CAPACITIES.len() - 1);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_pool_append_and_read_back() {
        let mut pool = ByteBlockPool::new();
        let a = pool.append(b"hello");
        let b = pool.append_str("world");
        let c = pool.append(&[1, 2, 3]);
        assert_eq!(a, 0);
        assert_eq!(b, 5);
        assert_eq!(c, 11); // "world" plus terminator

        let mut buf = [0u8; 5];
        pool.read_bytes(a, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!("world", pool.read_str(b).unwrap());
        assert_eq!(2, pool.read_byte(c + 1).unwrap());
    }

    #[test]
    fn byte_pool_offsets_survive_growth() {
        let mut pool = ByteBlockPool::new();
        let payload = vec![0xabu8; 1000];
        let mut offsets = Vec::new();
        // Well past one 32 KiB block.
        for _ in 0..100 {
            offsets.push(pool.append(&payload));
        }
        assert!(pool.bytes_used() > BYTE_BLOCK_SIZE as u64);
        let mut buf = vec![0u8; 1000];
        for off in offsets {
            pool.read_bytes(off, &mut buf).unwrap();
            assert_eq!(buf, payload);
        }
    }

    #[test]
    fn byte_pool_rejects_bad_requests() {
        let mut pool = ByteBlockPool::new();
        assert!(pool.allocate(0).is_err());
        assert!(pool.allocate(BYTE_BLOCK_SIZE + 1).is_err());
        assert!(pool.read_byte(0).is_err());
    }

    #[test]
    fn byte_pool_reset_is_idempotent() {
        let mut pool = ByteBlockPool::new();
        pool.append(&vec![7u8; 40000]);
        let blocks_before = pool.bytes_used();
        pool.reset();
        assert_eq!(pool.size(), 0);
        // capacity retained
        assert_eq!(pool.bytes_used(), blocks_before);
        let off = pool.append(b"fresh");
        assert_eq!(off, 0);
        assert_eq!(pool.read_byte(0).unwrap(), b'f');

        pool.clear();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.bytes_used(), BYTE_BLOCK_SIZE as u64);
    }

    #[test]
    fn int_pool_append_write_read() {
        let mut pool = IntBlockPool::new();
        for i in 0..20_000 {
            let off = pool.append(i);
            assert_eq!(off, i as u32);
        }
        assert!(pool.bytes_used() > (INT_BLOCK_SIZE * 4) as u64);
        assert_eq!(pool.read_int(0).unwrap(), 0);
        assert_eq!(pool.read_int(12_345).unwrap(), 12_345);
        pool.write_int(12_345, -1).unwrap();
        assert_eq!(pool.read_int(12_345).unwrap(), -1);
        assert!(pool.read_int(20_000).is_err());
    }

    #[test]
    fn slice_list_grows_through_levels() {
        let mut pool = IntBlockPool::new();
        let mut list = IntSliceList::new(&mut pool).unwrap();
        let n = 5000;
        for i in 0..n {
            list.push(&mut pool, i * 2).unwrap();
        }
        assert_eq!(list.len(), n as u32);
        let all = list.read_all(&pool).unwrap();
        assert_eq!(all.len(), n as usize);
        for (i, v) in all.iter().enumerate() {
            assert_eq!(*v, (i as i32) * 2);
        }
    }

    #[test]
    fn interleaved_slice_lists_stay_disjoint() {
        let mut pool = IntBlockPool::new();
        let mut a = IntSliceList::new(&mut pool).unwrap();
        let mut b = IntSliceList::new(&mut pool).unwrap();
        for i in 0..1000 {
            a.push(&mut pool, i).unwrap();
            b.push(&mut pool, -i).unwrap();
        }
        let av = a.read_all(&pool).unwrap();
        let bv = b.read_all(&pool).unwrap();
        for i in 0..1000 {
            assert_eq!(av[i as usize], i);
            assert_eq!(bv[i as usize], -i);
        }
    }
}
