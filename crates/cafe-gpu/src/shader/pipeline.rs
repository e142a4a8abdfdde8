//! Shader stage and pipeline caches
//!
//! Stages are keyed by the guest address of their microcode and live for the
//! rest of the process. A stage or pipeline that fails to build is cached as
//! failed and never retried.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use cafe_core::GpuError;

use super::export::ExportDescriptor;
use super::fetch::{parse_fetch_shader, FetchShader};
use super::glsl;
use super::translate::{translate_shader, TranslatedShader};
use super::instructions::ExportType;
use super::ShaderType;
use crate::backend::{
    FeedbackVarying, HostBackend, PipelineHandle, ProgramHandle, ShaderKind, UniformLocation,
};
use crate::memory::GuestMemory;
use crate::registers::{Register, RegisterFile, SpiPsInControl0};

/// Name of the constant file uniform in generated programs
pub const UNIFORM_REGISTERS_NAME: &str = "VC";

/// Program addresses identifying a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub fetch: u32,
    pub vertex: u32,
    pub pixel: u32,
}

impl PipelineKey {
    /// Byte addresses of the fetch, vertex and pixel programs
    pub fn from_registers(registers: &RegisterFile) -> Self {
        Self {
            fetch: registers.get(Register::SQ_PGM_START_FS) << 8,
            vertex: registers.get(Register::SQ_PGM_START_VS) << 8,
            pixel: registers.get(Register::SQ_PGM_START_PS) << 8,
        }
    }
}

/// Location and size of one program in guest memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProgramRange {
    addr: u32,
    bytes: u32,
}

impl ProgramRange {
    fn from_registers(registers: &RegisterFile, start: Register, size: Register) -> Self {
        Self {
            addr: registers.get(start) << 8,
            bytes: registers.get(size) << 3,
        }
    }

    fn read(self, memory: &dyn GuestMemory) -> Option<Vec<u32>> {
        memory.read_words(self.addr, (self.bytes / 4) as usize)
    }
}

#[derive(Debug, Clone)]
enum Stage<T> {
    Ready(T),
    Failed,
}

impl<T> Stage<T> {
    fn ready(&self) -> Option<&T> {
        match self {
            Stage::Ready(value) => Some(value),
            Stage::Failed => None,
        }
    }
}

/// A vertex or pixel stage compiled by the host
#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub program: ProgramHandle,
    /// Location of the constant file uniform, if the program has one
    pub uniform_registers: Option<UniformLocation>,
    pub translated: TranslatedShader,
    pub source: String,
}

/// A linked, ready-to-bind pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderPipeline {
    pub key: PipelineKey,
    pub handle: PipelineHandle,
    pub vertex_program: ProgramHandle,
    pub pixel_program: ProgramHandle,
    pub vertex_uniforms: Option<UniformLocation>,
    pub pixel_uniforms: Option<UniformLocation>,
}

/// Outcome of looking up a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Ready(ShaderPipeline),
    Failed,
}

/// Counters for the shader caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShaderCacheStats {
    pub fetch_shaders: usize,
    pub vertex_shaders: usize,
    pub pixel_shaders: usize,
    pub pipelines: usize,
    pub failed: usize,
}

impl fmt::Display for ShaderCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fetch shaders:    {}", self.fetch_shaders)?;
        writeln!(f, "vertex shaders:   {}", self.vertex_shaders)?;
        writeln!(f, "pixel shaders:    {}", self.pixel_shaders)?;
        write!(f, "pipelines:        {} ({} failed builds)", self.pipelines, self.failed)
    }
}

/// Interpolant ids below `num_interp` that no param export writes
pub fn missing_interpolants(exports: &[ExportDescriptor], num_interp: u32) -> Vec<u32> {
    let params: BTreeSet<u32> = exports
        .iter()
        .filter(|export| export.export_type == ExportType::Param)
        .map(|export| export.id)
        .collect();
    (0..num_interp).filter(|id| !params.contains(id)).collect()
}

/// Process-lifetime cache of shader stages and linked pipelines
#[derive(Debug, Default)]
pub struct ShaderPipelineCache {
    fetch: HashMap<u32, Stage<FetchShader>>,
    /// Translated against the fetch layout bound at first use
    vertex: HashMap<u32, Stage<CompiledStage>>,
    /// Built with the interpolant count bound at first use
    pixel: HashMap<u32, Stage<CompiledStage>>,
    pipelines: HashMap<PipelineKey, PipelineStatus>,
    dump_shaders: bool,
}

impl ShaderPipelineCache {
    pub fn new(dump_shaders: bool) -> Self {
        Self {
            dump_shaders,
            ..Self::default()
        }
    }

    /// Look up or build the pipeline selected by the program registers
    pub fn get_pipeline(
        &mut self,
        backend: &mut dyn HostBackend,
        memory: &dyn GuestMemory,
        registers: &RegisterFile,
    ) -> PipelineStatus {
        let key = PipelineKey::from_registers(registers);
        if let Some(status) = self.pipelines.get(&key) {
            return *status;
        }

        let status = self
            .build_pipeline(backend, memory, registers, key)
            .map_or(PipelineStatus::Failed, PipelineStatus::Ready);
        self.pipelines.insert(key, status);
        status
    }

    fn build_pipeline(
        &mut self,
        backend: &mut dyn HostBackend,
        memory: &dyn GuestMemory,
        registers: &RegisterFile,
        key: PipelineKey,
    ) -> Option<ShaderPipeline> {
        let fetch_range =
            ProgramRange::from_registers(registers, Register::SQ_PGM_START_FS, Register::SQ_PGM_SIZE_FS);
        let vertex_range =
            ProgramRange::from_registers(registers, Register::SQ_PGM_START_VS, Register::SQ_PGM_SIZE_VS);
        let pixel_range =
            ProgramRange::from_registers(registers, Register::SQ_PGM_START_PS, Register::SQ_PGM_SIZE_PS);
        let num_interp = SpiPsInControl0(registers.get(Register::SPI_PS_IN_CONTROL_0)).num_interp();

        self.fetch_stage(memory, fetch_range);
        let fetch = self.fetch.get(&fetch_range.addr).and_then(Stage::ready)?.clone();

        self.vertex_stage(backend, memory, vertex_range, &fetch);
        self.pixel_stage(backend, memory, pixel_range, num_interp);

        let vertex = self.vertex.get(&vertex_range.addr).and_then(Stage::ready)?;
        let pixel = self.pixel.get(&pixel_range.addr).and_then(Stage::ready)?;

        let missing = missing_interpolants(&vertex.translated.exports, num_interp);
        if !missing.is_empty() {
            tracing::warn!(
                "Pixel shader 0x{:X} reads {} interpolants, vertex shader 0x{:X} does not export params {:?}",
                pixel_range.addr,
                num_interp,
                vertex_range.addr,
                missing
            );
        }

        let feedback: Vec<FeedbackVarying> = vertex
            .translated
            .all_feedbacks()
            .map(|descriptor| FeedbackVarying {
                name: descriptor.name(),
                buffer: descriptor.stream,
                offset: descriptor.offset,
                size: descriptor.size,
            })
            .collect();

        let handle = match backend.create_pipeline(vertex.program, pixel.program, &feedback) {
            Ok(handle) => handle,
            Err(log) => {
                tracing::error!(
                    "Failed to link pipeline fetch 0x{:X} vertex 0x{:X} pixel 0x{:X}: {}",
                    key.fetch,
                    key.vertex,
                    key.pixel,
                    log
                );
                return None;
            }
        };

        tracing::debug!(
            "Linked pipeline {:?} (fetch 0x{:X}, vertex 0x{:X}, pixel 0x{:X})",
            handle,
            key.fetch,
            key.vertex,
            key.pixel
        );

        Some(ShaderPipeline {
            key,
            handle,
            vertex_program: vertex.program,
            pixel_program: pixel.program,
            vertex_uniforms: vertex.uniform_registers,
            pixel_uniforms: pixel.uniform_registers,
        })
    }

    fn fetch_stage(&mut self, memory: &dyn GuestMemory, range: ProgramRange) {
        if self.fetch.contains_key(&range.addr) {
            return;
        }

        let stage = match range.read(memory) {
            None => {
                tracing::error!("Fetch shader 0x{:X} ({} bytes) is not mapped", range.addr, range.bytes);
                Stage::Failed
            }
            Some(words) => match parse_fetch_shader(&words) {
                Ok(fetch) => Stage::Ready(fetch),
                Err(err) => {
                    tracing::error!("Failed to parse fetch shader 0x{:X}: {}", range.addr, err);
                    Stage::Failed
                }
            },
        };
        self.fetch.insert(range.addr, stage);
    }

    fn vertex_stage(
        &mut self,
        backend: &mut dyn HostBackend,
        memory: &dyn GuestMemory,
        range: ProgramRange,
        fetch: &FetchShader,
    ) {
        if self.vertex.contains_key(&range.addr) {
            return;
        }

        let stage = self
            .compile(backend, memory, range, ShaderType::Vertex, |translated| {
                glsl::vertex_program(translated, fetch)
            }, Some(fetch))
            .map_or(Stage::Failed, Stage::Ready);
        self.vertex.insert(range.addr, stage);
    }

    fn pixel_stage(
        &mut self,
        backend: &mut dyn HostBackend,
        memory: &dyn GuestMemory,
        range: ProgramRange,
        num_interp: u32,
    ) {
        if self.pixel.contains_key(&range.addr) {
            return;
        }

        let stage = self
            .compile(backend, memory, range, ShaderType::Pixel, |translated| {
                glsl::pixel_program(translated, num_interp)
            }, None)
            .map_or(Stage::Failed, Stage::Ready);
        self.pixel.insert(range.addr, stage);
    }

    fn compile(
        &self,
        backend: &mut dyn HostBackend,
        memory: &dyn GuestMemory,
        range: ProgramRange,
        shader_type: ShaderType,
        assemble: impl FnOnce(&TranslatedShader) -> String,
        fetch: Option<&FetchShader>,
    ) -> Option<CompiledStage> {
        let Some(words) = range.read(memory) else {
            let err = GpuError::GuestMemory {
                addr: range.addr,
                words: (range.bytes / 4) as usize,
            };
            tracing::error!("{:?} shader 0x{:X}: {}", shader_type, range.addr, err);
            return None;
        };

        let translated = match translate_shader(shader_type, &words, fetch) {
            Ok(translated) => translated,
            Err(err) => {
                let err = GpuError::ShaderTranslation(err.to_string());
                tracing::error!("{:?} shader 0x{:X}: {}", shader_type, range.addr, err);
                return None;
            }
        };

        let source = assemble(&translated);
        if self.dump_shaders {
            tracing::debug!("{:?} shader 0x{:X}:\n{}", shader_type, range.addr, source);
        }

        let kind = match shader_type {
            ShaderType::Pixel => ShaderKind::Pixel,
            _ => ShaderKind::Vertex,
        };
        let program = match backend.create_program(kind, &source) {
            Ok(program) => program,
            Err(log) => {
                let err = GpuError::ShaderCompilation(log);
                tracing::error!("{:?} shader 0x{:X}: {}\n{}", shader_type, range.addr, err, source);
                return None;
            }
        };

        Some(CompiledStage {
            program,
            uniform_registers: backend.uniform_location(program, UNIFORM_REGISTERS_NAME),
            translated,
            source,
        })
    }

    pub fn stats(&self) -> ShaderCacheStats {
        let failed = self.fetch.values().filter(|s| s.ready().is_none()).count()
            + self.vertex.values().filter(|s| s.ready().is_none()).count()
            + self.pixel.values().filter(|s| s.ready().is_none()).count()
            + self
                .pipelines
                .values()
                .filter(|s| matches!(s, PipelineStatus::Failed))
                .count();

        ShaderCacheStats {
            fetch_shaders: self.fetch.len(),
            vertex_shaders: self.vertex.len(),
            pixel_shaders: self.pixel.len(),
            pipelines: self.pipelines.len(),
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{HostCall, RecordingBackend};
    use crate::memory::SparseMemory;
    use crate::shader::instructions::*;

    const FETCH_ADDR: u32 = 0x1000;
    const VERTEX_ADDR: u32 = 0x2000;
    const PIXEL_ADDR: u32 = 0x3000;
    const OTHER_FETCH_ADDR: u32 = 0x5000;
    const XYZW: [SqSel; 4] = [SqSel::X, SqSel::Y, SqSel::Z, SqSel::W];

    fn programs() -> SparseMemory {
        let mut fetch = Vec::new();
        fetch.extend(encode::cf(SQ_CF_INST_VTX, 2, 0, false));
        fetch.extend(encode::cf(SQ_CF_INST_RETURN, 0, 0, false));
        fetch.extend(encode::vtx_fetch(160, 0, 1, XYZW, 0x23, 0));

        let mut vertex = Vec::new();
        vertex.extend(encode::cf(SQ_CF_INST_CALL_FS, 0, 0, false));
        vertex.extend(encode::mem_stream(0, SQ_MEM_EXPORT_WRITE, 0, 1, 3, 0xF));
        vertex.extend(encode::export(SQ_CF_INST_EXP, 2, 0, 1, false, XYZW, 0, false));
        vertex.extend(encode::export(SQ_CF_INST_EXP_DONE, 1, 60, 1, false, XYZW, 0, true));

        let pixel = encode::export(SQ_CF_INST_EXP_DONE, 0, 0, 0, false, XYZW, 0, true).to_vec();

        SparseMemory::new()
            .with_region(OTHER_FETCH_ADDR, fetch.clone())
            .with_region(FETCH_ADDR, fetch)
            .with_region(VERTEX_ADDR, vertex)
            .with_region(PIXEL_ADDR, pixel)
    }

    fn registers(vertex_addr: u32) -> RegisterFile {
        let mut registers = RegisterFile::new();
        registers.store(Register::SQ_PGM_START_FS, FETCH_ADDR >> 8);
        registers.store(Register::SQ_PGM_SIZE_FS, 32 >> 3);
        registers.store(Register::SQ_PGM_START_VS, vertex_addr >> 8);
        registers.store(Register::SQ_PGM_SIZE_VS, 32 >> 3);
        registers.store(Register::SQ_PGM_START_PS, PIXEL_ADDR >> 8);
        registers.store(Register::SQ_PGM_SIZE_PS, 8 >> 3);
        registers.store(Register::SPI_PS_IN_CONTROL_0, 1);
        registers
    }

    #[test]
    fn test_builds_and_caches_pipeline() {
        let mut backend = RecordingBackend::new();
        let log = backend.log();
        let memory = programs();
        let mut cache = ShaderPipelineCache::new(false);

        let first = cache.get_pipeline(&mut backend, &memory, &registers(VERTEX_ADDR));
        let PipelineStatus::Ready(pipeline) = first else {
            panic!("expected a ready pipeline, got {:?}", first);
        };
        assert_eq!(pipeline.key.vertex, VERTEX_ADDR);
        assert!(pipeline.vertex_uniforms.is_some());

        let second = cache.get_pipeline(&mut backend, &memory, &registers(VERTEX_ADDR));
        assert_eq!(first, second);
        assert_eq!(log.count(|call| matches!(call, HostCall::CreateProgram { .. })), 2);

        let feedback = log.snapshot().into_iter().find_map(|call| match call {
            HostCall::CreatePipeline { feedback, .. } => Some(feedback),
            _ => None,
        });
        assert_eq!(
            feedback,
            Some(vec![FeedbackVarying {
                name: "feedback_0_0".to_string(),
                buffer: 0,
                offset: 0,
                size: 4
            }])
        );
        assert_eq!(cache.stats().pipelines, 1);
    }

    #[test]
    fn test_failed_pipeline_not_retried() {
        let mut backend = RecordingBackend::new();
        let log = backend.log();
        let memory = programs();
        let mut cache = ShaderPipelineCache::new(false);

        // Nothing mapped at the vertex address
        let regs = registers(0x8000);
        assert_eq!(cache.get_pipeline(&mut backend, &memory, &regs), PipelineStatus::Failed);
        let calls = log.len();
        assert_eq!(cache.get_pipeline(&mut backend, &memory, &regs), PipelineStatus::Failed);
        assert_eq!(log.len(), calls);
        assert!(cache.stats().failed >= 2);
    }

    #[test]
    fn test_compile_failure_is_cached() {
        let mut backend = RecordingBackend::new().fail_programs_containing("exp_pixel_0");
        let log = backend.log();
        let memory = programs();
        let mut cache = ShaderPipelineCache::new(false);

        assert_eq!(
            cache.get_pipeline(&mut backend, &memory, &registers(VERTEX_ADDR)),
            PipelineStatus::Failed
        );
        assert_eq!(log.count(|call| matches!(call, HostCall::CreatePipeline { .. })), 0);
        let stats = cache.stats();
        assert_eq!(stats.vertex_shaders, 1);
        // pixel stage and pipeline
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_stages_shared_across_fetch_programs() {
        let mut backend = RecordingBackend::new();
        let log = backend.log();
        let memory = programs();
        let mut cache = ShaderPipelineCache::new(false);

        let first = cache.get_pipeline(&mut backend, &memory, &registers(VERTEX_ADDR));
        assert!(matches!(first, PipelineStatus::Ready(_)));

        let mut regs = registers(VERTEX_ADDR);
        regs.store(Register::SQ_PGM_START_FS, OTHER_FETCH_ADDR >> 8);
        let second = cache.get_pipeline(&mut backend, &memory, &regs);
        let PipelineStatus::Ready(pipeline) = second else {
            panic!("expected a ready pipeline, got {:?}", second);
        };
        assert_eq!(pipeline.key.fetch, OTHER_FETCH_ADDR);

        // One vertex and one pixel program serve both pipelines
        assert_eq!(log.count(|call| matches!(call, HostCall::CreateProgram { .. })), 2);
        assert_eq!(log.count(|call| matches!(call, HostCall::CreatePipeline { .. })), 2);
        let stats = cache.stats();
        assert_eq!(stats.fetch_shaders, 2);
        assert_eq!(stats.vertex_shaders, 1);
        assert_eq!(stats.pixel_shaders, 1);
        assert_eq!(stats.pipelines, 2);
    }

    #[test]
    fn test_missing_interpolants() {
        let exports = [
            ExportDescriptor { export_type: ExportType::Position, id: 0 },
            ExportDescriptor { export_type: ExportType::Param, id: 5 },
            ExportDescriptor { export_type: ExportType::Param, id: 6 },
        ];
        assert_eq!(missing_interpolants(&exports, 2), vec![0, 1]);
        assert_eq!(missing_interpolants(&exports, 0), Vec::<u32>::new());

        let exports = [
            ExportDescriptor { export_type: ExportType::Param, id: 1 },
            ExportDescriptor { export_type: ExportType::Param, id: 0 },
        ];
        assert!(missing_interpolants(&exports, 2).is_empty());
        assert_eq!(missing_interpolants(&exports, 3), vec![2]);
    }

    #[test]
    fn test_stats_display() {
        let stats = ShaderCacheStats {
            fetch_shaders: 1,
            vertex_shaders: 2,
            pixel_shaders: 3,
            pipelines: 4,
            failed: 1,
        };
        let text = stats.to_string();
        assert!(text.contains("vertex shaders:   2"));
        assert!(text.ends_with("pipelines:        4 (1 failed builds)"));
    }
}
