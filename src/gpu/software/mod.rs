//! CPU emulation of a GPU device.
//!
//! Each queue type gets one worker thread that executes submissions in the
//! order they were accepted. Semaphore waits, signals, fences and events are
//! honoured, buffer copies run on host memory and every state transition is
//! checked against the state the emulated resource is actually in. Useful for
//! tests and headless hosts.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::{GPUError, QueueType, ResourceState, Result, SoftwareDeviceInfo};

mod commands;
mod display;
mod sync;

pub(crate) use commands::{SoftCommand, SoftwareSink};
pub(crate) use display::SoftwareSwapchain;
pub(crate) use sync::{Counter, SoftwareEvent, SoftwareFence, SoftwareSemaphore};

/// Host-side backing of an emulated buffer or image.
pub(crate) struct SoftwareResource {
    pub(crate) name: String,
    pub(crate) memory: Mutex<Vec<u8>>,
    /// State the resource is in on the emulated timeline.
    pub(crate) state: AtomicU32,
}

impl SoftwareResource {
    pub(crate) fn new(name: &str, size: usize, state: ResourceState) -> Self {
        Self {
            name: name.to_string(),
            memory: Mutex::new(vec![0; size]),
            state: AtomicU32::new(state.bits()),
        }
    }

    pub(crate) fn executed_state(&self) -> ResourceState {
        ResourceState::from_bits_retain(self.state.load(Ordering::Acquire))
    }
}

pub(crate) enum SoftWait {
    Binary(Arc<Counter>),
    Timeline(Arc<Counter>, u64),
}

pub(crate) enum SoftSignal {
    Binary(Arc<Counter>),
    Timeline(Arc<Counter>, u64),
}

impl SoftSignal {
    fn fire(&self) {
        match self {
            SoftSignal::Binary(c) => c.add(1),
            SoftSignal::Timeline(c, v) => c.raise_to(*v),
        }
    }
}

pub(crate) struct SoftBatch {
    pub(crate) waits: Vec<SoftWait>,
    pub(crate) lists: Vec<Arc<Vec<SoftCommand>>>,
    pub(crate) signals: Vec<SoftSignal>,
    pub(crate) fence: Option<Arc<Counter>>,
}

pub(crate) enum QueueOp {
    Submit(SoftBatch),
    /// Wait on the semaphores, then hand the image back to the swapchain.
    Present {
        waits: Vec<Arc<Counter>>,
        image: Arc<Counter>,
    },
}

struct Worker {
    queue_type: QueueType,
    completed: Arc<Counter>,
    shutdown: Arc<AtomicBool>,
    latency: Duration,
}

impl Worker {
    fn run(self, rx: Receiver<(u64, QueueOp)>) {
        while let Ok((value, op)) = rx.recv() {
            // The fence is raised after `completed` so a host woken by it
            // already sees the submission retired.
            let done = match op {
                QueueOp::Submit(batch) => self.execute(&batch).then_some(batch.fence),
                QueueOp::Present { waits, image } => {
                    let ok = waits.iter().all(|w| w.take_or_shutdown(&self.shutdown));
                    if ok {
                        image.set(1);
                    }
                    ok.then_some(None)
                }
            };
            let Some(fence) = done else {
                log::debug!("{:?} queue abandoned work at shutdown", self.queue_type);
                return;
            };
            self.completed.raise_to(value);
            if let Some(fence) = fence {
                fence.set(1);
            }
        }
    }

    fn execute(&self, batch: &SoftBatch) -> bool {
        for wait in &batch.waits {
            let ok = match wait {
                SoftWait::Binary(c) => c.take_or_shutdown(&self.shutdown),
                SoftWait::Timeline(c, v) => c.wait_or_shutdown(*v, &self.shutdown),
            };
            if !ok {
                return false;
            }
        }

        for list in &batch.lists {
            if !commands::execute(list, self) {
                return false;
            }
        }

        for signal in &batch.signals {
            signal.fire();
        }
        true
    }
}

pub(crate) struct SoftwareQueue {
    queue_type: QueueType,
    sender: Mutex<Option<(Sender<(u64, QueueOp)>, u64)>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    completed: Arc<Counter>,
    shutdown: Arc<AtomicBool>,
}

impl SoftwareQueue {
    fn new(queue_type: QueueType, info: &SoftwareDeviceInfo) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let completed = Arc::new(Counter::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            queue_type,
            completed: completed.clone(),
            shutdown: shutdown.clone(),
            latency: Duration::from_micros(info.command_latency_us),
        };
        let handle = std::thread::Builder::new()
            .name(format!("nori-{:?}-queue", queue_type).to_lowercase())
            .spawn(move || worker.run(rx))
            .map_err(|e| {
                log::error!("Failed to spawn {:?} queue worker: {}", queue_type, e);
                GPUError::NoSuitableDevice
            })?;

        Ok(Self {
            queue_type,
            sender: Mutex::new(Some((tx, 0))),
            worker: Mutex::new(Some(handle)),
            completed,
            shutdown,
        })
    }

    /// Hand `op` to the worker. Returns the queue value that marks its
    /// completion.
    pub(crate) fn enqueue(&self, op: QueueOp) -> Result<u64> {
        let mut guard = self.sender.lock();
        let (tx, last) = guard.as_mut().ok_or(GPUError::DeviceLost)?;
        let value = *last + 1;
        tx.send((value, op)).map_err(|_| GPUError::DeviceLost)?;
        *last = value;
        log::trace!("{:?} queue accepted op {}", self.queue_type, value);
        Ok(value)
    }

    pub(crate) fn completed_value(&self) -> u64 {
        self.completed.value()
    }

    fn last_submitted(&self) -> u64 {
        self.sender.lock().as_ref().map(|(_, v)| *v).unwrap_or(0)
    }

    pub(crate) fn wait_idle(&self) {
        let target = self.last_submitted();
        while !self.completed.wait_at_least(target, sync::WORKER_WAIT_SLICE) {
            if self.worker.lock().as_ref().map_or(true, |w| w.is_finished()) {
                break;
            }
        }
    }

    fn shutdown(&self) {
        self.sender.lock().take();
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("{:?} queue worker panicked", self.queue_type);
            }
        }
    }
}

pub(crate) struct SoftwareDevice {
    queues: [Arc<SoftwareQueue>; 3],
}

impl SoftwareDevice {
    pub(crate) fn new(info: &SoftwareDeviceInfo) -> Result<Self> {
        let queues = [
            Arc::new(SoftwareQueue::new(QueueType::Graphics, info)?),
            Arc::new(SoftwareQueue::new(QueueType::Compute, info)?),
            Arc::new(SoftwareQueue::new(QueueType::Transfer, info)?),
        ];
        Ok(Self { queues })
    }

    pub(crate) fn queue(&self, queue_type: QueueType) -> &Arc<SoftwareQueue> {
        &self.queues[queue_type.slot()]
    }

    pub(crate) fn wait_idle(&self) -> Result<()> {
        for q in &self.queues {
            q.wait_idle();
        }
        Ok(())
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        for q in &self.queues {
            q.shutdown();
        }
    }
}
