use std::collections::HashMap;

use log::trace;

use crate::error::ImrResult;
use crate::gpu::{BufferId, BufferTarget, BufferUsage, GpuBackend};
use crate::utils::min_power_of_two;

/// Smallest capacity handed out; keeps every buffer writable in 4-byte units.
pub const MIN_BUFFER_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferKey {
    pub capacity: usize,
    pub target: BufferTarget,
    pub usage: BufferUsage,
}

impl BufferKey {
    /// Size class a request of `size` bytes falls into.
    pub fn for_request(size: usize, target: BufferTarget, usage: BufferUsage) -> Self {
        Self {
            capacity: min_power_of_two(size.max(MIN_BUFFER_CAPACITY)),
            target,
            usage,
        }
    }
}

/// A GPU buffer checked out of the pool. Not `Clone`: exactly one owner at a
/// time, and it goes back through [`BufferPool::give_back`].
#[derive(Debug, PartialEq, Eq)]
pub struct PooledBuffer {
    id: BufferId,
    key: BufferKey,
}

impl PooledBuffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.key.capacity
    }

    pub fn key(&self) -> BufferKey {
        self.key
    }
}

/// Size-class allocator for scratch GPU buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: HashMap<BufferKey, Vec<PooledBuffer>>,
    allocated: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkout<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        size: usize,
        target: BufferTarget,
        usage: BufferUsage,
    ) -> ImrResult<PooledBuffer> {
        let key = BufferKey::for_request(size, target, usage);
        if let Some(buffer) = self.free.get_mut(&key).and_then(Vec::pop) {
            return Ok(buffer);
        }
        let id = backend.create_buffer(key.capacity, target, usage)?;
        self.allocated += 1;
        trace!("buffer pool: new {:?} buffer of {} bytes", target, key.capacity);
        Ok(PooledBuffer { id, key })
    }

    pub fn give_back(&mut self, buffer: PooledBuffer) {
        self.free.entry(buffer.key).or_default().push(buffer);
    }

    /// Number of idle buffers in one size class.
    pub fn free_count(&self, key: &BufferKey) -> usize {
        self.free.get(key).map_or(0, Vec::len)
    }

    /// Buffers ever created by this pool.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Deletes every idle buffer. Buffers still checked out are the caller's.
    pub fn destroy<B: GpuBackend>(&mut self, backend: &mut B) {
        for (_, buffers) in self.free.drain() {
            for buffer in buffers {
                backend.delete_buffer(buffer.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::RecordingBackend;

    #[test]
    fn returned_buffer_is_reused() {
        let mut gpu = RecordingBackend::new();
        let mut pool = BufferPool::new();
        let a = pool
            .checkout(&mut gpu, 100, BufferTarget::Vertex, BufferUsage::DynamicDraw)
            .unwrap();
        assert_eq!(a.capacity(), 128);
        let id = a.id();
        pool.give_back(a);
        let b = pool
            .checkout(&mut gpu, 120, BufferTarget::Vertex, BufferUsage::DynamicDraw)
            .unwrap();
        assert_eq!(b.id(), id);
        assert_eq!(gpu.buffers_created(), 1);
    }

    #[test]
    fn size_classes_do_not_mix() {
        let mut gpu = RecordingBackend::new();
        let mut pool = BufferPool::new();
        let big = pool
            .checkout(&mut gpu, 512, BufferTarget::Index, BufferUsage::DynamicDraw)
            .unwrap();
        pool.give_back(big);
        let small = pool
            .checkout(&mut gpu, 16, BufferTarget::Index, BufferUsage::DynamicDraw)
            .unwrap();
        assert_eq!(small.capacity(), 16);
        let other_target = pool
            .checkout(&mut gpu, 512, BufferTarget::Vertex, BufferUsage::DynamicDraw)
            .unwrap();
        assert_ne!(other_target.capacity(), 0);
        assert_eq!(pool.allocated(), 3);
    }

    #[test]
    fn tiny_requests_get_minimum_capacity() {
        let key = BufferKey::for_request(1, BufferTarget::Index, BufferUsage::StaticDraw);
        assert_eq!(key.capacity, MIN_BUFFER_CAPACITY);
    }

    #[test]
    fn destroy_deletes_idle_buffers() {
        let mut gpu = RecordingBackend::new();
        let mut pool = BufferPool::new();
        let a = pool
            .checkout(&mut gpu, 64, BufferTarget::Vertex, BufferUsage::DynamicDraw)
            .unwrap();
        pool.give_back(a);
        pool.destroy(&mut gpu);
        assert_eq!(gpu.live_buffers(), 0);
    }
}
