//! GPU thread
//!
//! Runs the command processor on its own OS thread. Buffers are taken from
//! the command queue one at a time, run to completion and retired. Nothing
//! is shared with the producer except the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cafe_core::{BufferStatus, CommandQueueReceiver};

use crate::driver::GpuDriver;

/// Handle to a running GPU thread
pub struct GpuThread {
    running: Arc<AtomicBool>,
    receiver: CommandQueueReceiver,
    handle: Option<JoinHandle<GpuDriver>>,
}

impl GpuThread {
    /// Start processing buffers from `receiver` on a new thread
    pub fn spawn(driver: GpuDriver, receiver: CommandQueueReceiver) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = Arc::clone(&running);
            let receiver = receiver.clone();
            std::thread::Builder::new()
                .name("gpu".to_string())
                .spawn(move || run(driver, receiver, running))?
        };

        tracing::info!("GPU thread started");
        Ok(Self {
            running,
            receiver,
            handle: Some(handle),
        })
    }

    /// Stop the thread and take back the driver.
    ///
    /// The buffer being processed is finished first; buffers still queued
    /// are dropped. Returns `None` if the thread panicked.
    pub fn stop(mut self) -> Option<GpuDriver> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<GpuDriver> {
        self.running.store(false, Ordering::Release);
        self.receiver.close();

        let handle = self.handle.take()?;
        match handle.join() {
            Ok(driver) => {
                tracing::info!("GPU thread stopped");
                Some(driver)
            }
            Err(_) => {
                tracing::error!("GPU thread panicked");
                None
            }
        }
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn run(mut driver: GpuDriver, receiver: CommandQueueReceiver, running: Arc<AtomicBool>) -> GpuDriver {
    while running.load(Ordering::Acquire) {
        let Some(buffer) = receiver.unqueue() else {
            break;
        };

        tracing::trace!("Running command buffer {} ({} words)", buffer.id, buffer.words.len());
        let status = match driver.run_command_buffer(&buffer.words) {
            Ok(()) => BufferStatus::Completed,
            Err(err) => BufferStatus::Aborted {
                reason: err.to_string(),
            },
        };
        receiver.retire(buffer, status);
    }

    driver
}
