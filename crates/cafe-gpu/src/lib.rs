//! Latte GPU emulation for oxidized-cafe
//!
//! The Latte is an R700-family GPU driven by PM4 command buffers. This crate
//! decodes those buffers, tracks the register file, recompiles shader
//! microcode to GLSL and drives a host backend.

pub mod backend;
pub mod driver;
pub mod memory;
pub mod pm4;
pub mod registers;
pub mod screen;
pub mod shader;
pub mod surface;
pub mod thread;

pub use driver::{DrawSkip, DriverOptions, GpuDriver, GpuStats};
pub use memory::{GuestMemory, NoMemory, SparseMemory};
pub use screen::ScreenQuad;
pub use thread::GpuThread;
