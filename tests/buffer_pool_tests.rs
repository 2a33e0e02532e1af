use plutonium_imr::buffer_pool::{BufferKey, BufferPool};
use plutonium_imr::gpu::recording::RecordingBackend;
use plutonium_imr::gpu::{BufferTarget, BufferUsage};

#[test]
fn same_size_class_returns_the_same_buffer() {
    let mut gpu = RecordingBackend::new();
    let mut pool = BufferPool::new();
    let first = pool
        .checkout(&mut gpu, 300, BufferTarget::Vertex, BufferUsage::DynamicDraw)
        .unwrap();
    let id = first.id();
    assert_eq!(first.capacity(), 512);
    pool.give_back(first);

    let again = pool
        .checkout(&mut gpu, 300, BufferTarget::Vertex, BufferUsage::DynamicDraw)
        .unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(gpu.buffers_created(), 1);
    pool.give_back(again);
}

#[test]
fn size_classes_do_not_mix() {
    let mut gpu = RecordingBackend::new();
    let mut pool = BufferPool::new();
    let small = pool
        .checkout(&mut gpu, 100, BufferTarget::Vertex, BufferUsage::DynamicDraw)
        .unwrap();
    pool.give_back(small);
    let big = pool
        .checkout(&mut gpu, 1000, BufferTarget::Vertex, BufferUsage::DynamicDraw)
        .unwrap();
    let index = pool
        .checkout(&mut gpu, 100, BufferTarget::Index, BufferUsage::DynamicDraw)
        .unwrap();
    assert_eq!(gpu.buffers_created(), 3);
    assert_eq!(big.capacity(), 1024);
    assert_eq!(
        pool.free_count(&BufferKey::for_request(
            128,
            BufferTarget::Vertex,
            BufferUsage::DynamicDraw
        )),
        1
    );
    pool.give_back(big);
    pool.give_back(index);

    pool.destroy(&mut gpu);
    assert_eq!(gpu.live_buffers(), 0);
}

#[test]
fn tiny_requests_round_up_to_the_minimum() {
    let key = BufferKey::for_request(1, BufferTarget::Index, BufferUsage::StaticDraw);
    assert_eq!(key.capacity, plutonium_imr::buffer_pool::MIN_BUFFER_CAPACITY);
    let key = BufferKey::for_request(0, BufferTarget::Index, BufferUsage::StaticDraw);
    assert_eq!(key.capacity, 4);
}
