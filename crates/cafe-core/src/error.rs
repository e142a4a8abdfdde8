//! Error types for the oxidized-cafe emulator

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Latte GPU errors
///
/// `MalformedStream` and `Unimplemented` are the two fatal outcomes of command
/// buffer processing: the first means the words cannot be decoded at all, the
/// second means they decode to something this emulator does not support.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("Malformed command stream at word {offset}: {reason}")]
    MalformedStream { offset: usize, reason: String },

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    #[error("Invalid register 0x{0:05x}")]
    InvalidRegister(u32),

    #[error("Guest memory read failed at 0x{addr:08x} ({words} words)")]
    GuestMemory { addr: u32, words: usize },

    #[error("Shader translation failed: {0}")]
    ShaderTranslation(String),

    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl GpuError {
    /// Whether this error must terminate processing of the current command buffer
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedStream { .. }
                | Self::Unimplemented(_)
                | Self::InvalidRegister(_)
                | Self::GuestMemory { .. }
        )
    }
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpuError::MalformedStream {
            offset: 12,
            reason: "payload runs past end of buffer".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Malformed command stream at word 12: payload runs past end of buffer"
        );

        let err = GpuError::GuestMemory { addr: 0x1000_0000, words: 4 };
        assert_eq!(format!("{}", err), "Guest memory read failed at 0x10000000 (4 words)");

        assert_eq!(format!("{}", GpuError::InvalidRegister(0x40000)), "Invalid register 0x40000");
    }

    #[test]
    fn test_error_conversion() {
        let gpu_err = GpuError::Unimplemented("type 0 packet".to_string());
        let emu_err: EmulatorError = gpu_err.into();
        assert!(matches!(emu_err, EmulatorError::Gpu(_)));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GpuError::Unimplemented("x".into()).is_fatal());
        assert!(GpuError::MalformedStream { offset: 0, reason: String::new() }.is_fatal());
        assert!(!GpuError::ShaderTranslation("x".into()).is_fatal());
        assert!(!GpuError::ShaderCompilation("x".into()).is_fatal());
    }
}
