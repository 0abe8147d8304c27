use std::sync::Arc;

use super::{Counter, QueueOp, SoftBatch, SoftSignal, SoftWait, SoftwareDevice, SoftwareQueue, SoftwareResource};
use crate::gpu::{
    Backend, GPUError, PresentStatus, QueueType, RawSemaphore, ResourceState, Result, Semaphore,
    SwapchainCreateInfo,
};

/// Round-robin swapchain with no window behind it.
///
/// Acquire and present run on the graphics queue: an acquire waits for the
/// image's last present before signalling the caller's semaphore, so the
/// host never blocks in `acquire`.
pub(crate) struct SoftwareSwapchain {
    name: String,
    queue: Arc<SoftwareQueue>,
    images: Vec<Arc<SoftwareResource>>,
    /// 1 while the image is free to be acquired.
    available: Vec<Arc<Counter>>,
    next: usize,
    extent: (u32, u32),
}

fn counter(sem: &Semaphore) -> Result<Arc<Counter>> {
    match &sem.raw {
        RawSemaphore::Software(s) => Ok(s.signal.clone()),
        #[allow(unreachable_patterns)]
        _ => Err(GPUError::BackendMismatch {
            expected: Backend::Software,
            found: sem.context().backend(),
        }),
    }
}

impl SoftwareSwapchain {
    pub(crate) fn new(dev: &SoftwareDevice, info: &SwapchainCreateInfo) -> Self {
        let mut sc = Self {
            name: info.debug_name.to_string(),
            queue: dev.queue(QueueType::Graphics).clone(),
            images: Vec::new(),
            available: Vec::new(),
            next: 0,
            extent: (info.width, info.height),
        };
        sc.build(info.image_count as usize);
        sc
    }

    fn build(&mut self, count: usize) {
        self.images = (0..count)
            .map(|i| {
                Arc::new(SoftwareResource::new(
                    &format!("{} image {}", self.name, i),
                    0,
                    ResourceState::PRESENT,
                ))
            })
            .collect();
        self.available = (0..count).map(|_| Arc::new(Counter::new(1))).collect();
        self.next = 0;
    }

    pub(crate) fn images(&self) -> &[Arc<SoftwareResource>] {
        &self.images
    }

    pub(crate) fn extent(&self) -> (u32, u32) {
        self.extent
    }

    pub(crate) fn acquire(&mut self, semaphore: &Semaphore) -> Result<(u32, PresentStatus)> {
        let signal = counter(semaphore)?;
        let index = self.next;
        self.next = (self.next + 1) % self.images.len();
        self.queue.enqueue(QueueOp::Submit(SoftBatch {
            waits: vec![SoftWait::Binary(self.available[index].clone())],
            lists: Vec::new(),
            signals: vec![SoftSignal::Binary(signal)],
            fence: None,
        }))?;
        Ok((index as u32, PresentStatus::Optimal))
    }

    pub(crate) fn present(&mut self, waits: &[&Semaphore], index: u32) -> Result<PresentStatus> {
        let waits = waits.iter().map(|s| counter(s)).collect::<Result<Vec<_>>>()?;
        self.queue.enqueue(QueueOp::Present {
            waits,
            image: self.available[index as usize].clone(),
        })?;
        Ok(PresentStatus::Optimal)
    }

    pub(crate) fn recreate(&mut self, width: u32, height: u32) {
        self.extent = (width, height);
        let count = self.images.len();
        self.build(count);
    }
}
