mod common;

use common::{host_buffer, pool, primaries, software_context};
use nori::*;

fn buffer_barrier<'a>(
    ctx: &Context,
    buffer: &'a Buffer,
    src_access: AccessBit,
    dst_access: AccessBit,
) -> Barrier<'a> {
    Barrier::new(
        ctx,
        &BarrierCreateInfo {
            debug_name: buffer.debug_name(),
            barrier_type: BarrierType::Buffer,
            src_access,
            dst_access,
            target: BarrierTarget::Buffer {
                buffer,
                offset: 0,
                size: None,
            },
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn transfer_batch_completes_behind_fence() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let pool = pool(&ctx, QueueType::Transfer, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 2);
    let fence = Fence::new(&ctx, &Default::default()).unwrap();

    for i in 0..2 {
        cmd.begin(i, CommandBufferUsageBit::empty()).unwrap();
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
}

#[test]
fn out_of_range_index_is_rejected() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 2);
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.begin(1, CommandBufferUsageBit::empty()).unwrap();
    cmd.end(1).unwrap();

    assert_eq!(cmd.state(2), None);
    assert!(matches!(
        cmd.begin(2, CommandBufferUsageBit::empty()),
        Err(GPUError::IndexOutOfRange { index: 2, count: 2 })
    ));
    assert!(matches!(
        cmd.end(7),
        Err(GPUError::IndexOutOfRange { index: 7, count: 2 })
    ));
    assert_eq!(cmd.state(0), Some(CommandBufferState::Recording));
    assert_eq!(cmd.state(1), Some(CommandBufferState::Executable));
}

#[test]
fn create_info_round_trips() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let pool_info = CommandPoolCreateInfo {
        debug_name: "upload pool",
        queue_type: QueueType::Transfer,
        flags: CommandPoolFlags::RESET_COMMAND_BUFFER | CommandPoolFlags::TRANSIENT,
    };
    let pool = CommandPool::new(&ctx, &pool_info).unwrap();
    assert_eq!(pool.info(), pool_info);

    for level in [CommandBufferLevel::Primary, CommandBufferLevel::Secondary] {
        let cmd_info = CommandBufferCreateInfo {
            debug_name: "uploads",
            level,
            command_buffer_count: 3,
        };
        let cmd = CommandBuffer::new(&pool, &cmd_info).unwrap();
        assert_eq!(cmd.info(), cmd_info);
    }
}

#[test]
fn zero_sized_allocation_is_rejected() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    let res = CommandBuffer::new(
        &pool,
        &CommandBufferCreateInfo {
            debug_name: "empty",
            level: CommandBufferLevel::Primary,
            command_buffer_count: 0,
        },
    );
    assert!(res.is_err());
}

#[test]
fn state_machine_rejects_out_of_order_calls() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);

    assert!(matches!(
        cmd.end(0),
        Err(GPUError::InvalidCommandBufferState {
            state: CommandBufferState::Initial,
            ..
        })
    ));
    assert!(cmd.submit(
        &[SubmitInfo {
            command_buffer_indices: &[0],
            ..Default::default()
        }],
        None,
    )
    .is_err());

    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    assert!(matches!(
        cmd.begin(0, CommandBufferUsageBit::empty()),
        Err(GPUError::InvalidCommandBufferState {
            state: CommandBufferState::Recording,
            ..
        })
    ));
    cmd.end(0).unwrap();
    assert_eq!(cmd.state(0), Some(CommandBufferState::Executable));
}

#[test]
fn rerecording_needs_reset_flag() {
    let ctx = software_context(BarrierModel::ResourceState, 0);

    let plain = pool(&ctx, QueueType::Compute, CommandPoolFlags::empty());
    let mut cmd = primaries(&plain, 1);
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.end(0).unwrap();
    assert!(cmd.begin(0, CommandBufferUsageBit::empty()).is_err());
    assert!(cmd.reset(0, false).is_err());

    // A pool reset is always allowed and returns every buffer to Initial.
    plain.reset(false).unwrap();
    assert_eq!(cmd.state(0), Some(CommandBufferState::Initial));
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.end(0).unwrap();

    let resettable = pool(&ctx, QueueType::Compute, CommandPoolFlags::RESET_COMMAND_BUFFER);
    let mut cmd = primaries(&resettable, 1);
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.end(0).unwrap();
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.end(0).unwrap();
    cmd.reset(0, true).unwrap();
    assert_eq!(cmd.state(0), Some(CommandBufferState::Initial));
}

#[test]
fn queue_capabilities_are_enforced() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let pool = pool(&ctx, QueueType::Transfer, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    assert!(matches!(
        cmd.dispatch(0, 1, 1, 1),
        Err(GPUError::InvalidUsage(_))
    ));
    assert!(matches!(
        cmd.draw(
            0,
            &Draw {
                vertex_count: 3,
                ..Default::default()
            }
        ),
        Err(GPUError::InvalidUsage(_))
    ));
}

#[test]
fn copy_is_ordered_behind_barriers() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let src = host_buffer(&ctx, "src", 64);
    let dst = host_buffer(&ctx, "dst", 64);
    let payload: Vec<u8> = (0..32).collect();
    src.host_write(0, &payload).unwrap();

    let pool = pool(&ctx, QueueType::Transfer, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);
    let fence = Fence::new(&ctx, &Default::default()).unwrap();

    cmd.begin(0, CommandBufferUsageBit::ONE_TIME_SUBMIT).unwrap();
    cmd.pipeline_barrier(
        0,
        PipelineStageBit::HOST,
        PipelineStageBit::TRANSFER,
        DependencyBit::empty(),
        &[
            buffer_barrier(&ctx, &src, AccessBit::empty(), AccessBit::TRANSFER_READ),
            buffer_barrier(&ctx, &dst, AccessBit::empty(), AccessBit::TRANSFER_WRITE),
        ],
    )
    .unwrap();
    assert_eq!(src.tracked_state(), ResourceState::COPY_SOURCE);
    assert_eq!(dst.tracked_state(), ResourceState::COPY_DEST);

    cmd.copy_buffer(
        0,
        &src,
        &dst,
        &[BufferCopy {
            src_offset: 0,
            dst_offset: 16,
            size: 32,
        }],
    )
    .unwrap();
    cmd.end(0).unwrap();
    cmd.submit(
        &[SubmitInfo {
            command_buffer_indices: &[0],
            ..Default::default()
        }],
        Some(&fence),
    )
    .unwrap();

    assert!(fence.wait().unwrap());
    assert_eq!(dst.host_read(16, 32).unwrap(), payload);
    assert_eq!(dst.host_read(0, 16).unwrap(), vec![0u8; 16]);
    // One-time buffers fall back to Initial once retired.
    assert_eq!(cmd.state(0), Some(CommandBufferState::Initial));
}

#[test]
fn copy_region_must_fit() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let src = host_buffer(&ctx, "src", 16);
    let dst = host_buffer(&ctx, "dst", 8);
    let pool = pool(&ctx, QueueType::Transfer, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    let res = cmd.copy_buffer(
        0,
        &src,
        &dst,
        &[BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: 16,
        }],
    );
    assert!(matches!(res, Err(GPUError::InvalidUsage(_))));
}

#[test]
fn pending_until_event_releases_queue() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let gate = Event::new(&ctx, &Default::default()).unwrap();
    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::RESET_COMMAND_BUFFER);
    let mut cmd = primaries(&pool, 1);
    let fence = Fence::new(&ctx, &Default::default()).unwrap();

    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.wait_events(
        0,
        &[&gate],
        PipelineStageBit::HOST,
        PipelineStageBit::ALL_COMMANDS,
        &[],
    )
    .unwrap();
    cmd.end(0).unwrap();
    cmd.submit(
        &[SubmitInfo {
            command_buffer_indices: &[0],
            ..Default::default()
        }],
        Some(&fence),
    )
    .unwrap();

    assert!(!fence.wait_timeout(5_000_000).unwrap());
    assert_eq!(cmd.state(0), Some(CommandBufferState::Pending));
    assert!(cmd.begin(0, CommandBufferUsageBit::empty()).is_err());
    assert!(cmd.reset(0, false).is_err());
    assert!(cmd
        .submit(
            &[SubmitInfo {
                command_buffer_indices: &[0],
                ..Default::default()
            }],
            None,
        )
        .is_err());

    gate.set().unwrap();
    assert!(fence.wait_timeout(u64::MAX).unwrap());
    assert_eq!(cmd.state(0), Some(CommandBufferState::Executable));
}

#[test]
fn pool_reset_is_rejected_while_a_buffer_is_pending() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let gate = Event::new(&ctx, &Default::default()).unwrap();
    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);
    let fence = Fence::new(&ctx, &Default::default()).unwrap();

    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.wait_events(
        0,
        &[&gate],
        PipelineStageBit::HOST,
        PipelineStageBit::ALL_COMMANDS,
        &[],
    )
    .unwrap();
    cmd.end(0).unwrap();
    cmd.submit(
        &[SubmitInfo {
            command_buffer_indices: &[0],
            ..Default::default()
        }],
        Some(&fence),
    )
    .unwrap();

    assert!(matches!(pool.reset(false), Err(GPUError::InvalidUsage(_))));
    assert_eq!(cmd.state(0), Some(CommandBufferState::Pending));
    assert!(cmd.begin(0, CommandBufferUsageBit::empty()).is_err());

    gate.set().unwrap();
    assert!(fence.wait_timeout(u64::MAX).unwrap());
    pool.reset(false).unwrap();
    assert_eq!(cmd.state(0), Some(CommandBufferState::Initial));
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
}

#[test]
fn repeated_index_in_one_submit_needs_simultaneous() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 2);
    let fence = Fence::new(&ctx, &Default::default()).unwrap();

    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.end(0).unwrap();
    let twice_in_one_batch = cmd.submit(
        &[SubmitInfo {
            command_buffer_indices: &[0, 0],
            ..Default::default()
        }],
        None,
    );
    assert!(matches!(
        twice_in_one_batch,
        Err(GPUError::InvalidCommandBufferState {
            index: 0,
            state: CommandBufferState::Pending,
            ..
        })
    ));
    let once_per_batch = cmd.submit(
        &[
            SubmitInfo {
                command_buffer_indices: &[0],
                ..Default::default()
            },
            SubmitInfo {
                command_buffer_indices: &[0],
                ..Default::default()
            },
        ],
        None,
    );
    assert!(matches!(
        once_per_batch,
        Err(GPUError::InvalidCommandBufferState {
            index: 0,
            state: CommandBufferState::Pending,
            ..
        })
    ));
    // Rejected calls submit nothing.
    assert_eq!(cmd.state(0), Some(CommandBufferState::Executable));

    cmd.begin(1, CommandBufferUsageBit::SIMULTANEOUS).unwrap();
    cmd.end(1).unwrap();
    cmd.submit(
        &[
            SubmitInfo {
                command_buffer_indices: &[1, 1],
                ..Default::default()
            },
            SubmitInfo {
                command_buffer_indices: &[1],
                ..Default::default()
            },
        ],
        Some(&fence),
    )
    .unwrap();
    assert!(fence.wait().unwrap());
    assert_eq!(cmd.state(1), Some(CommandBufferState::Executable));
}

#[test]
fn failed_barrier_call_keeps_tracked_states() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let staging = host_buffer(&ctx, "staging", 16);
    let sampled = host_buffer(&ctx, "sampled", 16);
    let pool = pool(&ctx, QueueType::Transfer, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();

    // Shader reads cannot be expressed on a copy queue, so the whole call
    // fails and the first barrier must not stick.
    let res = cmd.pipeline_barrier(
        0,
        PipelineStageBit::TRANSFER,
        PipelineStageBit::TRANSFER,
        DependencyBit::empty(),
        &[
            buffer_barrier(&ctx, &staging, AccessBit::empty(), AccessBit::TRANSFER_WRITE),
            buffer_barrier(&ctx, &sampled, AccessBit::empty(), AccessBit::SHADER_READ),
        ],
    );
    assert!(matches!(res, Err(GPUError::InvalidBarrier(_))));
    assert_eq!(staging.tracked_state(), ResourceState::COMMON);
    assert_eq!(sampled.tracked_state(), ResourceState::COMMON);

    cmd.pipeline_barrier(
        0,
        PipelineStageBit::TRANSFER,
        PipelineStageBit::TRANSFER,
        DependencyBit::empty(),
        &[buffer_barrier(
            &ctx,
            &staging,
            AccessBit::empty(),
            AccessBit::TRANSFER_WRITE,
        )],
    )
    .unwrap();
    assert_eq!(staging.tracked_state(), ResourceState::COPY_DEST);
}

#[test]
fn recorded_event_set_is_visible_on_host() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let event = Event::new(&ctx, &Default::default()).unwrap();
    let pool = pool(&ctx, QueueType::Compute, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);
    let fence = Fence::new(&ctx, &Default::default()).unwrap();

    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.set_event(0, &event, PipelineStageBit::COMPUTE_SHADER)
        .unwrap();
    cmd.end(0).unwrap();
    assert!(!event.is_set().unwrap());

    cmd.submit(
        &[SubmitInfo {
            command_buffer_indices: &[0],
            ..Default::default()
        }],
        Some(&fence),
    )
    .unwrap();
    assert!(fence.wait().unwrap());
    assert!(event.is_set().unwrap());
}

#[test]
fn timeline_semaphores_order_queues() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let timeline = Semaphore::new(
        &ctx,
        &SemaphoreCreateInfo {
            debug_name: "progress",
            semaphore_type: SemaphoreType::Timeline,
            initial_value: 0,
        },
    )
    .unwrap();

    let compute_pool = pool(&ctx, QueueType::Compute, CommandPoolFlags::empty());
    let mut compute = primaries(&compute_pool, 1);
    let transfer_pool = pool(&ctx, QueueType::Transfer, CommandPoolFlags::empty());
    let mut transfer = primaries(&transfer_pool, 1);
    let done = Fence::new(&ctx, &Default::default()).unwrap();

    for cmd in [&mut compute, &mut transfer] {
        cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
        cmd.end(0).unwrap();
    }

    // The transfer batch waits on a value nobody has signalled yet.
    transfer
        .submit(
            &[SubmitInfo {
                command_buffer_indices: &[0],
                wait_semaphores: &[&timeline],
                wait_dst_pipeline_stages: &[PipelineStageBit::TRANSFER],
                wait_values: &[2],
                ..Default::default()
            }],
            Some(&done),
        )
        .unwrap();
    assert!(!done.wait_timeout(5_000_000).unwrap());

    compute
        .submit(
            &[SubmitInfo {
                command_buffer_indices: &[0],
                signal_semaphores: &[&timeline],
                signal_values: &[2],
                ..Default::default()
            }],
            None,
        )
        .unwrap();

    assert!(done.wait_timeout(u64::MAX).unwrap());
    assert_eq!(timeline.current_value().unwrap(), 2);
}

#[test]
fn mismatched_submit_lists_are_rejected() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let sem = Semaphore::new(&ctx, &Default::default()).unwrap();
    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.end(0).unwrap();

    let res = cmd.submit(
        &[SubmitInfo {
            command_buffer_indices: &[0],
            wait_semaphores: &[&sem],
            ..Default::default()
        }],
        None,
    );
    assert!(matches!(
        res,
        Err(GPUError::SubmitLengthMismatch {
            field: "wait_dst_pipeline_stages",
            expected: 1,
            found: 0
        })
    ));
    assert_eq!(cmd.state(0), Some(CommandBufferState::Executable));
}

#[test]
fn secondaries_run_inside_primary() {
    let ctx = software_context(BarrierModel::Explicit, 0);
    let src = host_buffer(&ctx, "src", 8);
    let dst = host_buffer(&ctx, "dst", 8);
    src.host_write(0, &[7u8; 8]).unwrap();

    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    let mut primary = primaries(&pool, 1);
    let mut secondary = CommandBuffer::new(
        &pool,
        &CommandBufferCreateInfo {
            debug_name: "bundle",
            level: CommandBufferLevel::Secondary,
            command_buffer_count: 1,
        },
    )
    .unwrap();
    let fence = Fence::new(&ctx, &Default::default()).unwrap();

    secondary
        .begin(0, CommandBufferUsageBit::RENDER_PASS_CONTINUE)
        .unwrap();
    secondary
        .copy_buffer(
            0,
            &src,
            &dst,
            &[BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 8,
            }],
        )
        .unwrap();
    secondary.end(0).unwrap();

    // Secondaries are only ever executed from a primary.
    assert!(secondary
        .submit(
            &[SubmitInfo {
                command_buffer_indices: &[0],
                ..Default::default()
            }],
            None,
        )
        .is_err());

    primary.begin(0, CommandBufferUsageBit::empty()).unwrap();
    primary
        .execute_secondary_command_buffers(0, &secondary, &[0])
        .unwrap();
    primary.end(0).unwrap();
    primary
        .submit(
            &[SubmitInfo {
                command_buffer_indices: &[0],
                ..Default::default()
            }],
            Some(&fence),
        )
        .unwrap();

    assert!(fence.wait().unwrap());
    assert_eq!(dst.host_read(0, 8).unwrap(), vec![7u8; 8]);
}

#[test]
fn barrier_from_other_model_is_rejected() {
    let explicit = software_context(BarrierModel::Explicit, 0);
    let resource_state = software_context(BarrierModel::ResourceState, 0);
    let buffer = host_buffer(&explicit, "shared", 16);
    let barrier = buffer_barrier(
        &explicit,
        &buffer,
        AccessBit::TRANSFER_WRITE,
        AccessBit::SHADER_READ,
    );

    let pool = pool(&resource_state, QueueType::Graphics, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);
    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    let res = cmd.pipeline_barrier(
        0,
        PipelineStageBit::TRANSFER,
        PipelineStageBit::FRAGMENT_SHADER,
        DependencyBit::empty(),
        &[barrier],
    );
    assert!(matches!(res, Err(GPUError::InvalidBarrier(_))));
}

#[test]
fn image_layout_transition_tracks_state() {
    let ctx = software_context(BarrierModel::ResourceState, 0);
    let image = Image::from_native(
        &ctx,
        &ImageCreateInfo {
            debug_name: "colour",
            extent: Extent3D {
                width: 4,
                height: 4,
                depth: 1,
            },
            usage: ImageUsageBit::COLOUR_ATTACHMENT | ImageUsageBit::SAMPLED,
            ..Default::default()
        },
        NativeImage::Software,
    )
    .unwrap();
    let pool = pool(&ctx, QueueType::Graphics, CommandPoolFlags::empty());
    let mut cmd = primaries(&pool, 1);

    let to_target = Barrier::new(
        &ctx,
        &BarrierCreateInfo {
            debug_name: "to target",
            barrier_type: BarrierType::Image,
            dst_access: AccessBit::COLOUR_ATTACHMENT_WRITE,
            target: BarrierTarget::Image {
                image: &image,
                range: SubresourceRange::whole(1, 1),
            },
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::ColourAttachmentOptimal,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(to_target.transitions_layout());

    cmd.begin(0, CommandBufferUsageBit::empty()).unwrap();
    cmd.pipeline_barrier(
        0,
        PipelineStageBit::TOP_OF_PIPE,
        PipelineStageBit::COLOUR_ATTACHMENT_OUTPUT,
        DependencyBit::empty(),
        &[to_target],
    )
    .unwrap();
    assert_eq!(image.tracked_state(), ResourceState::RENDER_TARGET);

    let to_sampled = Barrier::new(
        &ctx,
        &BarrierCreateInfo {
            debug_name: "to sampled",
            barrier_type: BarrierType::Image,
            src_access: AccessBit::COLOUR_ATTACHMENT_WRITE,
            dst_access: AccessBit::SHADER_READ,
            target: BarrierTarget::Image {
                image: &image,
                range: SubresourceRange::whole(1, 1),
            },
            old_layout: ImageLayout::ColourAttachmentOptimal,
            new_layout: ImageLayout::ShaderReadOnlyOptimal,
            ..Default::default()
        },
    )
    .unwrap();
    cmd.pipeline_barrier(
        0,
        PipelineStageBit::COLOUR_ATTACHMENT_OUTPUT,
        PipelineStageBit::FRAGMENT_SHADER,
        DependencyBit::empty(),
        &[to_sampled],
    )
    .unwrap();
    assert_eq!(image.tracked_state(), ResourceState::SHADER_RESOURCE);
    cmd.end(0).unwrap();
}
