#![allow(dead_code)]

use nori::{
    Backend, BarrierModel, Buffer, BufferCreateInfo, BufferUsageBit, CommandBuffer,
    CommandBufferCreateInfo, CommandBufferLevel, CommandPool, CommandPoolCreateInfo,
    CommandPoolFlags, Context, ContextInfo, NativeBuffer, QueueType, ResourceState,
    SoftwareDeviceInfo,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Headless software device. `latency_us` is added to every draw and dispatch.
pub fn software_context(model: BarrierModel, latency_us: u64) -> Context {
    init_logging();
    Context::headless(&ContextInfo {
        backend: Some(Backend::Software),
        software: SoftwareDeviceInfo {
            barrier_model: model,
            command_latency_us: latency_us,
        },
        ..Default::default()
    })
    .expect("software device is always available")
}

pub fn host_buffer(ctx: &Context, name: &str, size: u64) -> Buffer {
    Buffer::from_native(
        ctx,
        &BufferCreateInfo {
            debug_name: name,
            size,
            usage: BufferUsageBit::TRANSFER_SRC | BufferUsageBit::TRANSFER_DST,
            initial_state: ResourceState::COMMON,
        },
        NativeBuffer::Software,
    )
    .unwrap()
}

pub fn pool(ctx: &Context, queue_type: QueueType, flags: CommandPoolFlags) -> CommandPool {
    CommandPool::new(
        ctx,
        &CommandPoolCreateInfo {
            debug_name: "test pool",
            queue_type,
            flags,
        },
    )
    .unwrap()
}

pub fn primaries(pool: &CommandPool, count: u32) -> CommandBuffer {
    CommandBuffer::new(
        pool,
        &CommandBufferCreateInfo {
            debug_name: "test commands",
            level: CommandBufferLevel::Primary,
            command_buffer_count: count,
        },
    )
    .unwrap()
}
