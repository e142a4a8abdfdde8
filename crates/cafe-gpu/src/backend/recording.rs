//! Recording backend
//!
//! Records every host call in order so tests can assert on exactly what the
//! command processor asked the host to do. The call log is shared, so it can
//! still be inspected after the backend has been moved into a driver.

use super::{
    DrawCommand, FeedbackVarying, HostBackend, ImageDesc, ImageHandle, PipelineHandle,
    ProgramHandle, ShaderKind, UniformLocation,
};
use crate::pm4::ScanTarget;
use parking_lot::Mutex;
use std::sync::Arc;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    CreateImage { handle: ImageHandle, desc: ImageDesc },
    AttachColor { slot: usize, image: ImageHandle },
    DetachColor { slot: usize },
    AttachDepth { image: ImageHandle },
    DetachDepth,
    CreateProgram { handle: ProgramHandle, kind: ShaderKind, source: String },
    UploadUniforms { program: ProgramHandle, location: UniformLocation, count: usize },
    CreatePipeline { handle: PipelineHandle, vertex: ProgramHandle, pixel: ProgramHandle, feedback: Vec<FeedbackVarying> },
    BindPipeline { pipeline: Option<PipelineHandle> },
    Draw { command: DrawCommand },
    ClearColor { slot: usize, rgba: [f32; 4] },
    Present { screen: PipelineHandle, image: ImageHandle, target: ScanTarget },
    SwapBuffers,
}

impl HostCall {
    /// Whether this call changes an attachment or pipeline binding
    pub fn is_binding(&self) -> bool {
        matches!(
            self,
            HostCall::AttachColor { .. }
                | HostCall::DetachColor { .. }
                | HostCall::AttachDepth { .. }
                | HostCall::DetachDepth
                | HostCall::BindPipeline { .. }
        )
    }
}

/// Shared view of a recording backend's call log
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<HostCall>>>,
}

impl CallLog {
    pub fn snapshot(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Count calls matching a predicate
    pub fn count(&self, predicate: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    fn push(&self, call: HostCall) {
        self.calls.lock().push(call);
    }
}

/// Backend that records calls instead of executing them
#[derive(Debug, Default)]
pub struct RecordingBackend {
    log: CallLog,
    next_handle: u32,
    /// Program creation fails for sources containing this marker
    fail_programs_containing: Option<String>,
    /// Pipeline creation always fails
    fail_pipelines: bool,
    fail_images: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the call log
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Make program creation fail for any source containing `marker`
    pub fn fail_programs_containing(mut self, marker: &str) -> Self {
        self.fail_programs_containing = Some(marker.to_string());
        self
    }

    pub fn fail_pipelines(mut self) -> Self {
        self.fail_pipelines = true;
        self
    }

    /// Make every image allocation fail
    pub fn fail_images(mut self) -> Self {
        self.fail_images = true;
        self
    }

    fn allocate(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl HostBackend for RecordingBackend {
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageHandle, String> {
        if self.fail_images {
            return Err(format!("out of memory for {}x{} image", desc.width, desc.height));
        }
        let handle = ImageHandle(self.allocate());
        self.log.push(HostCall::CreateImage { handle, desc: *desc });
        Ok(handle)
    }

    fn attach_color(&mut self, slot: usize, image: ImageHandle) {
        self.log.push(HostCall::AttachColor { slot, image });
    }

    fn detach_color(&mut self, slot: usize) {
        self.log.push(HostCall::DetachColor { slot });
    }

    fn attach_depth(&mut self, image: ImageHandle) {
        self.log.push(HostCall::AttachDepth { image });
    }

    fn detach_depth(&mut self) {
        self.log.push(HostCall::DetachDepth);
    }

    fn create_program(&mut self, kind: ShaderKind, source: &str) -> Result<ProgramHandle, String> {
        if let Some(marker) = &self.fail_programs_containing {
            if source.contains(marker.as_str()) {
                return Err(format!("0(1) : error C0000: rejected program containing '{}'", marker));
            }
        }
        let handle = ProgramHandle(self.allocate());
        self.log.push(HostCall::CreateProgram {
            handle,
            kind,
            source: source.to_string(),
        });
        Ok(handle)
    }

    fn uniform_location(&mut self, _program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        (name == "VC").then_some(UniformLocation(0))
    }

    fn upload_uniforms(&mut self, program: ProgramHandle, location: UniformLocation, values: &[f32]) {
        self.log.push(HostCall::UploadUniforms {
            program,
            location,
            count: values.len(),
        });
    }

    fn create_pipeline(
        &mut self,
        vertex: ProgramHandle,
        pixel: ProgramHandle,
        feedback: &[FeedbackVarying],
    ) -> Result<PipelineHandle, String> {
        if self.fail_pipelines {
            return Err("link failed".to_string());
        }
        let handle = PipelineHandle(self.allocate());
        self.log.push(HostCall::CreatePipeline {
            handle,
            vertex,
            pixel,
            feedback: feedback.to_vec(),
        });
        Ok(handle)
    }

    fn bind_pipeline(&mut self, pipeline: Option<PipelineHandle>) {
        self.log.push(HostCall::BindPipeline { pipeline });
    }

    fn draw(&mut self, command: &DrawCommand) {
        self.log.push(HostCall::Draw { command: *command });
    }

    fn clear_color(&mut self, slot: usize, rgba: [f32; 4]) {
        self.log.push(HostCall::ClearColor { slot, rgba });
    }

    fn present(&mut self, screen: PipelineHandle, image: ImageHandle, target: ScanTarget) {
        self.log.push(HostCall::Present { screen, image, target });
    }

    fn swap_buffers(&mut self) {
        self.log.push(HostCall::SwapBuffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SurfaceFormat;

    #[test]
    fn test_log_survives_move() {
        let backend = RecordingBackend::new();
        let log = backend.log();
        let mut boxed: Box<dyn HostBackend> = Box::new(backend);

        boxed
            .create_image(&ImageDesc {
                width: 8,
                height: 8,
                format: SurfaceFormat::Rgba8,
            })
            .unwrap();
        boxed.swap_buffers();

        assert_eq!(log.len(), 2);
        assert_eq!(log.snapshot()[1], HostCall::SwapBuffers);
    }

    #[test]
    fn test_program_failure_marker() {
        let mut backend = RecordingBackend::new().fail_programs_containing("broken");
        assert!(backend.create_program(ShaderKind::Pixel, "void main() { broken; }").is_err());
        assert!(backend.create_program(ShaderKind::Pixel, "void main() {}").is_ok());
        assert_eq!(backend.log().len(), 1);
    }

    #[test]
    fn test_binding_classification() {
        assert!(HostCall::DetachDepth.is_binding());
        assert!(!HostCall::SwapBuffers.is_binding());
    }
}
