use anyhow::{bail, Result};

/// Stable identity of a pooled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(usize);

impl BufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Fixed-capacity byte region with a fill length.
/// Not `Clone`: whoever holds the value has exclusive custody of the bytes.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    data: Box<[u8]>,
    len: usize,
}

impl Buffer {
    fn allocate(id: BufferId, capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        if data.try_reserve_exact(capacity).is_err() {
            bail!("Failed to allocate buffer #{} ({} bytes)", id.0, capacity);
        }
        data.resize(capacity, 0u8);
        Ok(Self {
            id,
            data: data.into_boxed_slice(),
            len: 0,
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Filled portion
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whole backing region, for producers writing in place.
    /// Call `set_len` afterwards.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Clamped to capacity
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Copy `bytes` in, truncating to capacity. Returns bytes copied.
    pub fn fill_from(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
        n
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

pub struct BufferPool;

impl BufferPool {
    /// Allocate `count` zeroed buffers of `byte_size` bytes each.
    /// This is the only place buffers are created.
    pub fn allocate(count: usize, byte_size: usize) -> Result<Vec<Buffer>> {
        if count == 0 {
            bail!("Buffer pool needs at least one buffer");
        }
        if byte_size == 0 {
            bail!("Buffer size must be non-zero");
        }

        (0..count)
            .map(|i| Buffer::allocate(BufferId(i), byte_size))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_distinct_ids() {
        let buffers = BufferPool::allocate(4, 16).unwrap();
        let ids: Vec<usize> = buffers.iter().map(|b| b.id().index()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(buffers.iter().all(|b| b.capacity() == 16 && b.is_empty()));
    }

    #[test]
    fn rejects_empty_pool() {
        assert!(BufferPool::allocate(0, 16).is_err());
        assert!(BufferPool::allocate(2, 0).is_err());
    }

    #[test]
    fn fill_truncates_to_capacity() {
        let mut buffer = BufferPool::allocate(1, 4).unwrap().remove(0);
        assert_eq!(buffer.fill_from(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);

        buffer.set_len(100);
        assert_eq!(buffer.len(), 4);

        buffer.as_mut_slice()[0] = 9;
        buffer.set_len(1);
        assert_eq!(buffer.as_slice(), &[9]);

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
