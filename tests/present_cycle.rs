mod common;

use std::time::{Duration, Instant};

use common::{pool, software_context};
use nori::*;

fn cycle(ctx: &Context, image_count: u32) -> PresentCycle {
    PresentCycle::new(
        ctx,
        &PresentCycleInfo {
            debug_name: "main",
            swapchain: SwapchainCreateInfo {
                debug_name: "main swapchain",
                width: 320,
                height: 240,
                image_count,
                ..Default::default()
            },
        },
        None,
    )
    .unwrap()
}

#[test]
fn frames_rotate_through_slots() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let mut cycle = cycle(&ctx, 3);
    assert_eq!(cycle.frames_in_flight(), 3);
    assert_eq!(cycle.frame_resources().len(), 3);

    for n in 0..7u32 {
        let frame = cycle.begin_frame().unwrap();
        assert_eq!(frame.slot, n % 3);
        assert_eq!(frame.image_index, n % 3);
        assert_eq!(frame.status, PresentStatus::Optimal);
        assert_eq!(cycle.current_frame(), Some(frame));
        assert!(cycle.current_image().unwrap().swapchain_owned());

        cycle
            .commands()
            .begin_debug_label(frame.slot, "frame", [1.0, 0.0, 0.0, 1.0])
            .unwrap();
        cycle.commands().end_debug_label(frame.slot).unwrap();
        assert_eq!(cycle.end_frame().unwrap(), PresentStatus::Optimal);
        assert!(cycle.current_frame().is_none());
    }
    ctx.wait_idle().unwrap();
}

#[test]
fn reused_slot_waits_for_its_fence() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let mut cycle = cycle(&ctx, 2);
    let gate = Event::new(
        &ctx,
        &EventCreateInfo {
            debug_name: "frame 0 gate",
            ..Default::default()
        },
    )
    .unwrap();

    let first = cycle.begin_frame().unwrap();
    assert_eq!(first.slot, 0);
    cycle
        .commands()
        .wait_events(
            first.slot,
            &[&gate],
            PipelineStageBit::HOST,
            PipelineStageBit::ALL_COMMANDS,
            &[],
        )
        .unwrap();
    cycle.end_frame().unwrap();

    let second = cycle.begin_frame().unwrap();
    assert_eq!(second.slot, 1);
    cycle.end_frame().unwrap();
    assert!(!cycle.frame_resources().get(0).unwrap().draw_fence.status().unwrap());

    let release = Duration::from_millis(30);
    std::thread::scope(|s| {
        s.spawn(|| {
            std::thread::sleep(release);
            gate.set().unwrap();
        });

        let start = Instant::now();
        let third = cycle.begin_frame().unwrap();
        assert!(start.elapsed() >= release, "slot 0 reused after {:?}", start.elapsed());
        assert_eq!(third.slot, 0);
        assert_eq!(third.image_index, 0);
    });
    cycle.end_frame().unwrap();
    ctx.wait_idle().unwrap();
}

#[test]
fn frame_calls_must_pair() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let mut cycle = cycle(&ctx, 2);

    assert!(matches!(cycle.end_frame(), Err(GPUError::InvalidUsage(_))));
    cycle.begin_frame().unwrap();
    assert!(matches!(cycle.begin_frame(), Err(GPUError::InvalidUsage(_))));
    cycle.end_frame().unwrap();
}

#[test]
fn failed_end_frame_leaves_slot_reusable() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let mut cycle = cycle(&ctx, 2);

    // Ending the buffer by hand makes end_frame fail before anything is
    // submitted from the slot.
    let frame = cycle.begin_frame().unwrap();
    cycle.commands().end(frame.slot).unwrap();
    assert!(cycle.end_frame().is_err());
    assert!(cycle.current_frame().is_none());
    assert!(cycle.frame_resources().get(0).unwrap().draw_fence.status().unwrap());

    let retry = cycle.begin_frame().unwrap();
    assert_eq!(retry.slot, frame.slot);
    assert_eq!(cycle.end_frame().unwrap(), PresentStatus::Optimal);
    ctx.wait_idle().unwrap();
}

#[test]
fn resize_rebuilds_swapchain_and_frames() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let mut cycle = cycle(&ctx, 2);
    cycle.begin_frame().unwrap();
    cycle.end_frame().unwrap();
    let id = cycle.swapchain().id();

    // Resizing mid-frame drops the open frame.
    cycle.begin_frame().unwrap();
    cycle.resize(640, 480).unwrap();
    assert!(cycle.current_frame().is_none());

    let extent = cycle.swapchain().extent();
    assert_eq!((extent.width, extent.height), (640, 480));
    assert_eq!(cycle.swapchain().id(), id);
    assert_eq!(cycle.frames_in_flight(), 2);

    let frame = cycle.begin_frame().unwrap();
    assert_eq!(frame.slot, 0);
    assert_eq!(frame.image_index, 0);
    let image = cycle.current_image().unwrap();
    assert_eq!(image.extent().width, 640);
    assert_eq!(
        image.swapchain_ref(),
        Some(SwapchainImageRef {
            swapchain_id: id,
            index: 0
        })
    );
    cycle.end_frame().unwrap();
    ctx.wait_idle().unwrap();
}

#[test]
fn swapchain_rejects_bad_arguments() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    assert!(Swapchain::new(
        &ctx,
        &SwapchainCreateInfo {
            image_count: 0,
            ..Default::default()
        },
        None,
    )
    .is_err());

    let mut swapchain = Swapchain::new(&ctx, &Default::default(), None).unwrap();
    assert_eq!(swapchain.image_count(), 2);
    assert_eq!(swapchain.format(), Format::BGRA8Srgb);

    let timeline = Semaphore::new(
        &ctx,
        &SemaphoreCreateInfo {
            semaphore_type: SemaphoreType::Timeline,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(swapchain.acquire_next_image(&timeline).is_err());

    let acquired = Semaphore::new(&ctx, &Default::default()).unwrap();
    let (index, status) = swapchain.acquire_next_image(&acquired).unwrap();
    assert_eq!((index, status), (0, PresentStatus::Optimal));

    let compute = pool(&ctx, QueueType::Compute, CommandPoolFlags::empty());
    assert!(swapchain.present(&compute, &[&acquired], index).is_err());

    let graphics = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    assert!(swapchain.present(&graphics, &[&acquired], 9).is_err());
    assert_eq!(
        swapchain.present(&graphics, &[&acquired], index).unwrap(),
        PresentStatus::Optimal
    );
    ctx.wait_idle().unwrap();
    assert!(swapchain.recreate(0, 10).is_err());
}
