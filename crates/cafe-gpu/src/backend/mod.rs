//! Host rendering backends
//!
//! Everything the command processor does to the host graphics API goes
//! through `HostBackend`. Context and window setup happen outside this crate.

pub mod null;
pub mod recording;

use crate::pm4::ScanTarget;

/// Host image handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u32);

/// Host program handle (one compiled stage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// Host pipeline handle (linked vertex + pixel programs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u32);

/// Location of a uniform within a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

/// Host image formats used for render targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    Rgba8,
    Rgb565,
    Rgba16,
    Rgba16F,
    Rgba32,
    Rgba32F,
    Depth16,
    Depth24Stencil8,
    Depth32F,
}

/// Image creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
}

/// Shader stage kind for program creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Pixel,
}

/// Transform feedback output captured from a vertex program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackVarying {
    pub name: String,
    pub buffer: u32,
    /// Byte offset within the buffer
    pub offset: u32,
    /// Component count
    pub size: u32,
}

/// Primitive topology types (VGT_DI_PRIM_TYPE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Points = 1,
    Lines = 2,
    LineStrip = 3,
    Triangles = 4,
    TriangleFan = 5,
    TriangleStrip = 6,
    Rects = 0x11,
    LineLoop = 0x12,
    Quads = 0x13,
    QuadStrip = 0x14,
    Polygon = 0x15,
}

impl PrimitiveType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw & 0x3F {
            1 => PrimitiveType::Points,
            2 => PrimitiveType::Lines,
            3 => PrimitiveType::LineStrip,
            4 => PrimitiveType::Triangles,
            5 => PrimitiveType::TriangleFan,
            6 => PrimitiveType::TriangleStrip,
            0x11 => PrimitiveType::Rects,
            0x12 => PrimitiveType::LineLoop,
            0x13 => PrimitiveType::Quads,
            0x14 => PrimitiveType::QuadStrip,
            0x15 => PrimitiveType::Polygon,
            _ => return None,
        })
    }
}

/// Index element size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

/// One draw submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    pub primitive: PrimitiveType,
    pub count: u32,
    pub instances: u32,
    /// Index format and guest address for indexed draws
    pub indices: Option<(IndexFormat, u32)>,
}

/// Host graphics backend trait
pub trait HostBackend: Send {
    /// Create a 2D image with nearest filtering and clamp-to-edge addressing
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageHandle, String>;

    /// Attach an image to a color attachment slot
    fn attach_color(&mut self, slot: usize, image: ImageHandle);

    /// Detach whatever is attached to a color slot
    fn detach_color(&mut self, slot: usize);

    fn attach_depth(&mut self, image: ImageHandle);

    fn detach_depth(&mut self);

    /// Compile a program from GLSL source. On failure returns the compile log.
    fn create_program(&mut self, kind: ShaderKind, source: &str) -> Result<ProgramHandle, String>;

    /// Look up a uniform by name
    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;

    /// Upload an array of vec4 uniforms
    fn upload_uniforms(&mut self, program: ProgramHandle, location: UniformLocation, values: &[f32]);

    /// Link a vertex and pixel program. On failure returns the link log.
    fn create_pipeline(
        &mut self,
        vertex: ProgramHandle,
        pixel: ProgramHandle,
        feedback: &[FeedbackVarying],
    ) -> Result<PipelineHandle, String>;

    /// Bind a pipeline, or unbind with `None`
    fn bind_pipeline(&mut self, pipeline: Option<PipelineHandle>);

    /// Submit a draw
    fn draw(&mut self, command: &DrawCommand);

    /// Clear a color attachment slot
    fn clear_color(&mut self, slot: usize, rgba: [f32; 4]);

    /// Draw `image` to a scan-out target with the screen-quad pipeline
    fn present(&mut self, screen: PipelineHandle, image: ImageHandle, target: ScanTarget);

    /// Present the back buffer
    fn swap_buffers(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_type_from_raw() {
        assert_eq!(PrimitiveType::from_raw(4), Some(PrimitiveType::Triangles));
        assert_eq!(PrimitiveType::from_raw(0x13), Some(PrimitiveType::Quads));
        assert_eq!(PrimitiveType::from_raw(0), None);
    }
}
