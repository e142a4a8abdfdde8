//! Null backend
//!
//! Allocates handles and counts calls without touching any graphics API.
//! Used for headless trace replay.

use super::{
    DrawCommand, FeedbackVarying, HostBackend, ImageDesc, ImageHandle, PipelineHandle,
    ProgramHandle, ShaderKind, UniformLocation,
};
use crate::pm4::ScanTarget;

/// Null graphics backend
#[derive(Debug, Default)]
pub struct NullBackend {
    next_handle: u32,
    /// Draw calls since the last swap
    draw_calls_this_frame: u32,
    frame_count: u64,
    /// Last clear color requested
    clear_color: [f32; 4],
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn draw_calls_this_frame(&self) -> u32 {
        self.draw_calls_this_frame
    }

    pub fn last_clear_color(&self) -> [f32; 4] {
        self.clear_color
    }
}

impl HostBackend for NullBackend {
    fn create_image(&mut self, _desc: &ImageDesc) -> Result<ImageHandle, String> {
        Ok(ImageHandle(self.allocate()))
    }

    fn attach_color(&mut self, _slot: usize, _image: ImageHandle) {}

    fn detach_color(&mut self, _slot: usize) {}

    fn attach_depth(&mut self, _image: ImageHandle) {}

    fn detach_depth(&mut self) {}

    fn create_program(&mut self, _kind: ShaderKind, _source: &str) -> Result<ProgramHandle, String> {
        Ok(ProgramHandle(self.allocate()))
    }

    fn uniform_location(&mut self, _program: ProgramHandle, _name: &str) -> Option<UniformLocation> {
        Some(UniformLocation(0))
    }

    fn upload_uniforms(&mut self, _program: ProgramHandle, _location: UniformLocation, _values: &[f32]) {}

    fn create_pipeline(
        &mut self,
        _vertex: ProgramHandle,
        _pixel: ProgramHandle,
        _feedback: &[FeedbackVarying],
    ) -> Result<PipelineHandle, String> {
        Ok(PipelineHandle(self.allocate()))
    }

    fn bind_pipeline(&mut self, _pipeline: Option<PipelineHandle>) {}

    fn draw(&mut self, _command: &DrawCommand) {
        self.draw_calls_this_frame += 1;
    }

    fn clear_color(&mut self, _slot: usize, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn present(&mut self, _screen: PipelineHandle, _image: ImageHandle, _target: ScanTarget) {}

    fn swap_buffers(&mut self) {
        self.frame_count += 1;
        self.draw_calls_this_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PrimitiveType, SurfaceFormat};

    #[test]
    fn test_null_backend_handles_are_unique() {
        let mut backend = NullBackend::new();
        let desc = ImageDesc {
            width: 64,
            height: 64,
            format: SurfaceFormat::Rgba8,
        };
        let a = backend.create_image(&desc).unwrap();
        let b = backend.create_image(&desc).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_null_backend_draw_call_tracking() {
        let mut backend = NullBackend::new();
        let draw = DrawCommand {
            primitive: PrimitiveType::Triangles,
            count: 3,
            instances: 1,
            indices: None,
        };
        backend.draw(&draw);
        backend.draw(&draw);
        assert_eq!(backend.draw_calls_this_frame(), 2);

        backend.swap_buffers();
        assert_eq!(backend.draw_calls_this_frame(), 0);
        assert_eq!(backend.frame_count(), 1);
    }

    #[test]
    fn test_null_backend_clear_color() {
        let mut backend = NullBackend::new();
        backend.clear_color(0, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(backend.last_clear_color(), [1.0, 0.0, 0.0, 1.0]);
    }
}
