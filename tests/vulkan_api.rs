#![cfg(feature = "nori-vulkan")]

mod common;

use common::{init_logging, pool, primaries};
use nori::*;
use serial_test::serial;

/// Vulkan device, or `None` on machines without a usable driver.
fn vulkan_context() -> Option<Context> {
    init_logging();
    match Context::headless(&ContextInfo {
        backend: Some(Backend::Vulkan),
        enable_validation: true,
        ..Default::default()
    }) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("Skipping Vulkan test: {}", e);
            None
        }
    }
}

#[test]
#[serial]
fn test_context() {
    let Some(ctx) = vulkan_context() else { return };
    assert_eq!(ctx.backend(), Backend::Vulkan);
    assert_eq!(ctx.barrier_model(), BarrierModel::Explicit);
    assert!(!ctx.supports_presentation());
    ctx.wait_idle().unwrap();
}

#[test]
#[serial]
fn test_fence() {
    let Some(ctx) = vulkan_context() else { return };
    let fence = Fence::new(
        &ctx,
        &FenceCreateInfo {
            debug_name: "test fence",
            signaled: true,
            timeout_ns: 1_000_000,
        },
    )
    .unwrap();
    assert!(fence.status().unwrap());
    assert!(fence.wait().unwrap());
    fence.reset().unwrap();
    assert!(!fence.status().unwrap());
    assert!(!fence.wait().unwrap());
}

#[test]
#[serial]
fn test_timeline_semaphore() {
    let Some(ctx) = vulkan_context() else { return };
    let sem = Semaphore::new(
        &ctx,
        &SemaphoreCreateInfo {
            debug_name: "test timeline",
            semaphore_type: SemaphoreType::Timeline,
            initial_value: 1,
        },
    )
    .unwrap();
    assert_eq!(sem.current_value().unwrap(), 1);
    sem.signal(5).unwrap();
    assert_eq!(sem.current_value().unwrap(), 5);
    assert!(sem.wait(5, 0).unwrap());
    assert!(!sem.wait(6, 1_000).unwrap());
    assert!(sem.signal(2).is_err());
}

#[test]
#[serial]
fn test_event() {
    let Some(ctx) = vulkan_context() else { return };
    let event = Event::new(
        &ctx,
        &EventCreateInfo {
            debug_name: "test event",
            device_only: false,
        },
    )
    .unwrap();
    assert!(event.status().unwrap());
    event.set().unwrap();
    assert!(event.is_set().unwrap());
    event.reset().unwrap();
    assert!(!event.is_set().unwrap());
}

#[test]
#[serial]
fn test_submit_on_every_queue() {
    let Some(ctx) = vulkan_context() else { return };
    for queue_type in QueueType::ALL {
        let pool = pool(&ctx, queue_type, CommandPoolFlags::RESET_COMMAND_BUFFER);
        let mut cmd = primaries(&pool, 2);
        let fence = Fence::new(&ctx, &Default::default()).unwrap();

        for i in 0..2 {
            cmd.begin(i, CommandBufferUsageBit::empty()).unwrap();
            cmd.pipeline_barrier(
                i,
                PipelineStageBit::TOP_OF_PIPE,
                PipelineStageBit::BOTTOM_OF_PIPE,
                DependencyBit::empty(),
                &[Barrier::new(
                    &ctx,
                    &BarrierCreateInfo {
                        debug_name: "global",
                        src_access: AccessBit::MEMORY_WRITE,
                        dst_access: AccessBit::MEMORY_READ,
                        ..Default::default()
                    },
                )
                .unwrap()],
            )
            .unwrap();
            cmd.end(i).unwrap();
        }
        cmd.submit(
            &[SubmitInfo {
                command_buffer_indices: &[0, 1],
                ..Default::default()
            }],
            Some(&fence),
        )
        .unwrap();
        assert!(fence.wait().unwrap());
        assert_eq!(cmd.state(0), Some(CommandBufferState::Executable));
        assert_eq!(cmd.state(1), Some(CommandBufferState::Executable));

        cmd.reset(0, true).unwrap();
        pool.reset(false).unwrap();
        assert_eq!(cmd.state(1), Some(CommandBufferState::Initial));
    }
}

#[test]
#[serial]
fn test_headless_swapchain_is_rejected() {
    let Some(ctx) = vulkan_context() else { return };
    let res = Swapchain::new(&ctx, &Default::default(), None);
    assert!(matches!(res, Err(GPUError::HeadlessDisplayNotSupported)));
}
