mod common;

use std::time::{Duration, Instant};

use common::software_context;
use nori::{
    BarrierModel, Event, EventCreateInfo, Fence, FenceCreateInfo, GPUError, Semaphore,
    SemaphoreCreateInfo, SemaphoreType,
};

#[test]
fn unsignaled_fence_times_out() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let fence = Fence::new(
        &ctx,
        &FenceCreateInfo {
            debug_name: "never signaled",
            signaled: false,
            timeout_ns: 1_000_000,
        },
    )
    .unwrap();

    let start = Instant::now();
    assert!(!fence.wait().unwrap());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1), "returned after {:?}", elapsed);
    // On an idle host this returns within 2x the timeout. The wider bound
    // covers thread wake-up latency on a loaded test runner.
    assert!(elapsed < Duration::from_millis(50), "returned after {:?}", elapsed);
    assert!(!fence.status().unwrap());
}

#[test]
fn signaled_fence_resets() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let fence = Fence::new(
        &ctx,
        &FenceCreateInfo {
            signaled: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert!(fence.status().unwrap());
    assert!(fence.wait_timeout(0).unwrap());
    fence.reset().unwrap();
    assert!(!fence.status().unwrap());
    assert!(!fence.wait_timeout(0).unwrap());
    assert!(fence.info().signaled);
}

#[test]
fn create_info_round_trips() {
    let ctx = software_context(BarrierModel::ResourceState, 0);

    let fence_info = FenceCreateInfo {
        debug_name: "frame fence",
        signaled: true,
        timeout_ns: 16_000_000,
    };
    assert_eq!(Fence::new(&ctx, &fence_info).unwrap().info(), fence_info);

    for semaphore_info in [
        SemaphoreCreateInfo {
            debug_name: "acquire",
            semaphore_type: SemaphoreType::Binary,
            initial_value: 0,
        },
        SemaphoreCreateInfo {
            debug_name: "progress",
            semaphore_type: SemaphoreType::Timeline,
            initial_value: 42,
        },
    ] {
        let sem = Semaphore::new(&ctx, &semaphore_info).unwrap();
        assert_eq!(sem.info(), semaphore_info);
    }

    for device_only in [false, true] {
        let event_info = EventCreateInfo {
            debug_name: "upload done",
            device_only,
        };
        assert_eq!(Event::new(&ctx, &event_info).unwrap().info(), event_info);
    }
}

#[test]
fn timeline_signal_and_wait() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let sem = Semaphore::new(
        &ctx,
        &SemaphoreCreateInfo {
            debug_name: "timeline",
            semaphore_type: SemaphoreType::Timeline,
            initial_value: 0,
        },
    )
    .unwrap();

    sem.signal(5).unwrap();
    assert_eq!(sem.current_value().unwrap(), 5);
    assert!(sem.wait(5, 0).unwrap());
    assert!(sem.wait(3, 0).unwrap());
    assert!(!sem.wait(6, 0).unwrap());

    // Same value again is accepted, a lower one is not.
    sem.signal(5).unwrap();
    assert!(matches!(
        sem.signal(4),
        Err(GPUError::TimelineValueDecrease {
            current: 5,
            requested: 4
        })
    ));
    assert_eq!(sem.current_value().unwrap(), 5);
}

#[test]
fn timeline_wait_wakes_on_host_signal() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let sem = Semaphore::new(
        &ctx,
        &SemaphoreCreateInfo {
            semaphore_type: SemaphoreType::Timeline,
            initial_value: 1,
            ..Default::default()
        },
    )
    .unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            std::thread::sleep(Duration::from_millis(5));
            sem.signal(2).unwrap();
        });
        assert!(sem.wait(2, u64::MAX).unwrap());
    });
    assert_eq!(sem.current_value().unwrap(), 2);
}

#[test]
fn binary_semaphore_rejects_host_access() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let sem = Semaphore::new(&ctx, &Default::default()).unwrap();
    assert_eq!(sem.semaphore_type(), SemaphoreType::Binary);
    assert!(sem.signal(1).is_err());
    assert!(sem.current_value().is_err());
    assert!(sem.wait(1, 0).is_err());
}

#[test]
fn event_status_is_inverted() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let event = Event::new(
        &ctx,
        &EventCreateInfo {
            debug_name: "flag",
            device_only: false,
        },
    )
    .unwrap();

    assert!(!event.is_set().unwrap());
    assert!(event.status().unwrap());

    event.set().unwrap();
    assert!(event.is_set().unwrap());
    assert!(!event.status().unwrap());

    event.reset().unwrap();
    assert!(event.status().unwrap());
}

#[test]
fn device_only_event_rejects_host_access() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let event = Event::new(
        &ctx,
        &EventCreateInfo {
            debug_name: "device flag",
            device_only: true,
        },
    )
    .unwrap();
    assert!(event.set().is_err());
    assert!(event.reset().is_err());
    assert!(event.is_set().is_err());
}
