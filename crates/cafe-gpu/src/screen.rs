//! Full-screen quad used to present color buffers
//!
//! The two programs are read from disk at startup. A missing file leaves the
//! quad unavailable and scan-out requests are dropped with a warning.

use std::path::Path;

use crate::backend::{HostBackend, PipelineHandle, ShaderKind};

pub const SCREEN_VERTEX_FILE: &str = "screen_vertex.glsl";
pub const SCREEN_PIXEL_FILE: &str = "screen_pixel.glsl";

/// Source text of the screen-quad programs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSources {
    pub vertex: String,
    pub pixel: String,
}

impl ScreenSources {
    /// Read both programs from `dir`, logging and returning `None` on failure
    pub fn load(dir: &Path) -> Option<Self> {
        let read = |name: &str| {
            let path = dir.join(name);
            match std::fs::read_to_string(&path) {
                Ok(source) => Some(source),
                Err(e) => {
                    tracing::error!("Failed to read screen shader {}: {}", path.display(), e);
                    None
                }
            }
        };

        let vertex = read(SCREEN_VERTEX_FILE);
        let pixel = read(SCREEN_PIXEL_FILE);
        Some(Self {
            vertex: vertex?,
            pixel: pixel?,
        })
    }
}

#[derive(Debug)]
enum State {
    Missing,
    Pending(ScreenSources),
    Ready(PipelineHandle),
    Failed,
}

/// Lazily built screen-quad pipeline
#[derive(Debug)]
pub struct ScreenQuad {
    state: State,
}

impl ScreenQuad {
    pub fn new(sources: Option<ScreenSources>) -> Self {
        let state = match sources {
            Some(sources) => State::Pending(sources),
            None => State::Missing,
        };
        Self { state }
    }

    /// A quad with no programs; presentation is always skipped
    pub fn missing() -> Self {
        Self::new(None)
    }

    /// Load from a resource directory
    pub fn load(dir: &Path) -> Self {
        Self::new(ScreenSources::load(dir))
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, State::Pending(_) | State::Ready(_))
    }

    /// Pipeline handle, building it on first use
    pub fn pipeline(&mut self, backend: &mut dyn HostBackend) -> Option<PipelineHandle> {
        let sources = match std::mem::replace(&mut self.state, State::Failed) {
            State::Ready(handle) => {
                self.state = State::Ready(handle);
                return Some(handle);
            }
            State::Missing => {
                self.state = State::Missing;
                return None;
            }
            State::Failed => return None,
            State::Pending(sources) => sources,
        };

        let built = backend
            .create_program(ShaderKind::Vertex, &sources.vertex)
            .and_then(|vertex| {
                let pixel = backend.create_program(ShaderKind::Pixel, &sources.pixel)?;
                backend.create_pipeline(vertex, pixel, &[])
            });

        match built {
            Ok(handle) => {
                self.state = State::Ready(handle);
                Some(handle)
            }
            Err(log) => {
                tracing::error!("Failed to build screen pipeline: {}", log);
                None
            }
        }
    }
}
