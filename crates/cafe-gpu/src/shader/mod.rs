//! Latte shader recompiler (Latte microcode → GLSL)
//!
//! Shader programs are walked one control flow instruction at a time. Each
//! instruction is dispatched through a handler table and appends GLSL
//! statements to the translation state, together with the export and
//! feedback descriptors later used to link the vertex and pixel stages.
//!
//! - `instructions`: word layouts for CF, ALU, TEX and VTX instructions
//! - `decode`: control flow walk and clause extraction
//! - `export`: EXP and MEM_STREAM translation, selection algebra
//! - `alu`, `tex`, `fetch`: clause translation and fetch shader parsing
//! - `glsl`: whole-program assembly
//! - `pipeline`: stage and pipeline caches

pub mod alu;
pub mod decode;
pub mod export;
pub mod fetch;
pub mod glsl;
pub mod instructions;
pub mod pipeline;
pub mod tex;
pub mod translate;

pub use export::{ExportDescriptor, FeedbackDescriptor, Selection};
pub use fetch::{FetchAttribute, FetchShader};
pub use pipeline::{PipelineKey, PipelineStatus, ShaderPipeline, ShaderPipelineCache};
pub use translate::{translate_shader, TranslatedShader};

use thiserror::Error;

/// Shader program kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderType {
    Fetch,
    Vertex,
    Pixel,
}

/// Recompiler failures. Each one aborts translation of a single shader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("Unexpected SQ_SEL value {0}")]
    InvalidSelector(u32),

    #[error("Invalid export type {0}")]
    InvalidExportType(u32),

    #[error("Position export with array base {0} below 60")]
    InvalidPositionIndex(u32),

    #[error("Unsupported EXPORT_WRITE_IND in MEM_STREAM{0}")]
    WriteIndUnsupported(u32),

    #[error("Invalid export type {export_type} for MEM_STREAM{stream}")]
    InvalidMemExportType { stream: u32, export_type: u32 },

    #[error("Unsupported value size {size} in MEM_STREAM{stream}")]
    FeedbackTooLarge { stream: u32, size: u32 },

    #[error("Unsupported control flow instruction {0}")]
    UnsupportedCf(String),

    #[error("Unsupported ALU instruction {0}")]
    UnsupportedAlu(String),

    #[error("Unsupported texture instruction 0x{0:02X}")]
    UnsupportedTex(u32),

    #[error("Unsupported ALU source select {0}")]
    UnsupportedSource(u32),

    #[error("{what} at slot {slot} runs past end of program ({len} words)")]
    ProgramOverrun { what: &'static str, slot: usize, len: usize },

    #[error("Program ended without END_OF_PROGRAM")]
    MissingEndOfProgram,

    #[error("{0} is not valid in a {1:?} shader")]
    WrongShaderType(String, ShaderType),
}
