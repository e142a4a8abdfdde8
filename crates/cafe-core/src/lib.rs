//! Core types for the oxidized-cafe GPU emulator
//!
//! This crate provides the error taxonomy, configuration, logging setup and
//! the command-buffer queue shared between guest execution and the GPU thread.

pub mod config;
pub mod error;
pub mod gpu_queue;
pub mod logging;

pub use config::Config;
pub use error::{EmulatorError, GpuError, Result};
pub use gpu_queue::{
    create_command_queue, BufferStatus, CommandBuffer, CommandQueueReceiver,
    CommandQueueSender, QueueClosed, RetiredBuffer,
};
