//! PM4 command processor
//!
//! `GpuDriver` owns the register file, the surface and shader caches and the
//! host backend. It decodes command buffers packet by packet, dispatching
//! Type-3 opcodes through a handler table. Every register write goes through
//! `set_register` so side effects fire for bulk writes too.

use std::fmt;

use cafe_core::{Config, GpuError};
use thiserror::Error;

use crate::backend::{DrawCommand, HostBackend, IndexFormat, PrimitiveType};
use crate::memory::GuestMemory;
use crate::pm4::{
    single_word, ClearColor, CopyColorToScan, DrawIndex2, DrawIndexAuto, IndirectBuffer, Opcode,
    Packet, PacketReader, SetRegisters,
};
use crate::registers::{
    CbColorInfo, DbDepthInfo, Register, RegisterFile, SqConfig, SurfaceSize, VgtDmaIndexType,
    NUM_ALU_CONSTANTS, NUM_COLOR_BUFFERS, NUM_VTX_SEMANTICS, SEMANTIC_UNMAPPED,
};
use crate::screen::ScreenQuad;
use crate::shader::{PipelineKey, PipelineStatus, ShaderPipeline, ShaderPipelineCache};
use crate::surface::{Surface, SurfaceCache};

/// Maximum nesting of indirect buffers
pub const MAX_INDIRECT_DEPTH: usize = 8;

/// Floats uploaded per stage in DX9 constant mode
pub const UNIFORM_FLOATS: usize = NUM_ALU_CONSTANTS * 4;

/// Driver settings taken from the configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverOptions {
    /// Log every decoded packet at trace level
    pub trace_pm4: bool,
    /// Dump recompiled shader source at debug level
    pub dump_shaders: bool,
}

impl DriverOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            trace_pm4: config.debug.trace_pm4,
            dump_shaders: config.debug.dump_shaders,
        }
    }
}

/// Reasons a draw was skipped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSkip {
    #[error("no usable shader pipeline")]
    Shader,

    #[error("uniforms could not be uploaded")]
    Uniforms,

    #[error("color buffer {0} could not be bound")]
    ColorBuffer(usize),

    #[error("depth buffer could not be bound")]
    DepthBuffer,

    #[error("unsupported primitive type 0x{0:X}")]
    Primitive(u32),
}

/// Counters for one driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    pub buffers: u64,
    pub aborted_buffers: u64,
    pub indirect_buffers: u64,
    pub packets: u64,
    pub unknown_packets: u64,
    pub register_writes: u64,
    pub side_effects: u64,
    pub draws: u64,
    pub skipped_draws: u64,
    pub clears: u64,
    pub scanouts: u64,
    pub swaps: u64,
}

impl fmt::Display for GpuStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "buffers:          {} ({} aborted, {} indirect)", self.buffers, self.aborted_buffers, self.indirect_buffers)?;
        writeln!(f, "packets:          {} ({} skipped)", self.packets, self.unknown_packets)?;
        writeln!(f, "register writes:  {} ({} side effects)", self.register_writes, self.side_effects)?;
        writeln!(f, "draws:            {} ({} skipped)", self.draws, self.skipped_draws)?;
        writeln!(f, "clears:           {}", self.clears)?;
        write!(f, "scanouts / swaps: {} / {}", self.scanouts, self.swaps)
    }
}

/// Side effect run after a register is stored
type SideEffect = fn(&mut GpuDriver, Register, u32);

const SIDE_EFFECTS: &[(u32, SideEffect)] = &[
    (Register::SQ_VTX_SEMANTIC_CLEAR.offset(), GpuDriver::clear_vtx_semantics),
    (Register::CB_BLEND_CONTROL.offset(), GpuDriver::blend_control_changed),
    (Register::CB_BLEND0_CONTROL.offset(), GpuDriver::blend_control_changed),
    (Register::CB_BLEND0_CONTROL.offset() + 0x04, GpuDriver::blend_control_changed),
    (Register::CB_BLEND0_CONTROL.offset() + 0x08, GpuDriver::blend_control_changed),
    (Register::CB_BLEND0_CONTROL.offset() + 0x0C, GpuDriver::blend_control_changed),
    (Register::CB_BLEND0_CONTROL.offset() + 0x10, GpuDriver::blend_control_changed),
    (Register::CB_BLEND0_CONTROL.offset() + 0x14, GpuDriver::blend_control_changed),
    (Register::CB_BLEND0_CONTROL.offset() + 0x18, GpuDriver::blend_control_changed),
    (Register::CB_BLEND0_CONTROL.offset() + 0x1C, GpuDriver::blend_control_changed),
];

fn lookup_side_effect(reg: Register) -> Option<SideEffect> {
    SIDE_EFFECTS
        .iter()
        .find(|(offset, _)| *offset == reg.offset())
        .map(|(_, effect)| *effect)
}

/// Type-3 packet handler; `depth` is the indirect buffer nesting level
type PacketHandler = fn(&mut GpuDriver, &Packet<'_>, usize) -> Result<(), GpuError>;

const PACKET_HANDLERS: &[(Opcode, PacketHandler)] = &[
    (Opcode::DecafCopyColorToScan, GpuDriver::handle_copy_color_to_scan),
    (Opcode::DecafSwapBuffers, GpuDriver::handle_swap_buffers),
    (Opcode::DecafClearColor, GpuDriver::handle_clear_color),
    (Opcode::DecafClearDepthStencil, GpuDriver::handle_clear_depth_stencil),
    (Opcode::DrawIndexAuto, GpuDriver::handle_draw_index_auto),
    (Opcode::DrawIndex2, GpuDriver::handle_draw_index_2),
    (Opcode::IndexType, GpuDriver::handle_index_type),
    (Opcode::NumInstances, GpuDriver::handle_num_instances),
    (Opcode::IndirectBufferPriv, GpuDriver::handle_indirect_buffer),
    (Opcode::SetAluConst, GpuDriver::handle_set_registers),
    (Opcode::SetConfigReg, GpuDriver::handle_set_registers),
    (Opcode::SetContextReg, GpuDriver::handle_set_registers),
    (Opcode::SetCtlConst, GpuDriver::handle_set_registers),
    (Opcode::SetLoopConst, GpuDriver::handle_set_registers),
    (Opcode::SetSampler, GpuDriver::handle_set_registers),
    (Opcode::SetResource, GpuDriver::handle_set_registers),
];

fn lookup_packet_handler(opcode: Opcode) -> Option<PacketHandler> {
    PACKET_HANDLERS
        .iter()
        .find(|(key, _)| *key == opcode)
        .map(|(_, handler)| *handler)
}

/// Latte command processor state
pub struct GpuDriver {
    registers: RegisterFile,
    surfaces: SurfaceCache,
    shaders: ShaderPipelineCache,
    backend: Box<dyn HostBackend>,
    memory: Box<dyn GuestMemory>,
    screen: ScreenQuad,
    active_color: [Option<Surface>; NUM_COLOR_BUFFERS],
    active_depth: Option<Surface>,
    /// Program addresses of the last pipeline lookup
    active_key: Option<PipelineKey>,
    active_pipeline: Option<ShaderPipeline>,
    options: DriverOptions,
    stats: GpuStats,
}

impl GpuDriver {
    pub fn new(backend: Box<dyn HostBackend>, memory: Box<dyn GuestMemory>, options: DriverOptions) -> Self {
        Self {
            registers: RegisterFile::new(),
            surfaces: SurfaceCache::new(),
            shaders: ShaderPipelineCache::new(options.dump_shaders),
            backend,
            memory,
            screen: ScreenQuad::missing(),
            active_color: [None; NUM_COLOR_BUFFERS],
            active_depth: None,
            active_key: None,
            active_pipeline: None,
            options,
            stats: GpuStats::default(),
        }
    }

    /// Use `screen` for DECAF_COPY_COLOR_TO_SCAN
    pub fn with_screen(mut self, screen: ScreenQuad) -> Self {
        self.screen = screen;
        self
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn surfaces(&self) -> &SurfaceCache {
        &self.surfaces
    }

    pub fn shaders(&self) -> &ShaderPipelineCache {
        &self.shaders
    }

    pub fn stats(&self) -> GpuStats {
        self.stats
    }

    pub fn active_color(&self, slot: usize) -> Option<&Surface> {
        self.active_color.get(slot).and_then(Option::as_ref)
    }

    pub fn active_depth(&self) -> Option<&Surface> {
        self.active_depth.as_ref()
    }

    pub fn active_pipeline(&self) -> Option<&ShaderPipeline> {
        self.active_pipeline.as_ref()
    }

    /// Store a register value and run its side effect
    pub fn set_register(&mut self, reg: Register, value: u32) {
        self.registers.store(reg, value);
        self.stats.register_writes += 1;

        if let Some(effect) = lookup_side_effect(reg) {
            self.stats.side_effects += 1;
            effect(self, reg, value);
        }
    }

    fn clear_vtx_semantics(&mut self, _reg: Register, _value: u32) {
        for slot in 0..NUM_VTX_SEMANTICS {
            self.set_register(Register::sq_vtx_semantic(slot), SEMANTIC_UNMAPPED);
        }
    }

    fn blend_control_changed(&mut self, reg: Register, value: u32) {
        tracing::trace!("Blend control {} = 0x{:08X}", reg, value);
    }

    /// Run one command buffer to completion.
    ///
    /// Errors are fatal for this buffer; packets before the failing one have
    /// taken effect.
    pub fn run_command_buffer(&mut self, words: &[u32]) -> Result<(), GpuError> {
        self.stats.buffers += 1;
        let result = self.run_buffer(words, 0);
        if let Err(err) = &result {
            self.stats.aborted_buffers += 1;
            tracing::error!("Command buffer aborted: {}", err);
        }
        result
    }

    fn run_buffer(&mut self, words: &[u32], depth: usize) -> Result<(), GpuError> {
        let mut reader = PacketReader::new(words);

        while let Some(packet) = reader.next_packet()? {
            self.stats.packets += 1;

            let Some(opcode) = packet.opcode() else {
                self.stats.unknown_packets += 1;
                tracing::trace!(
                    "Skipping unknown opcode 0x{:02X} at word {}",
                    packet.header.opcode(),
                    packet.offset
                );
                continue;
            };

            if self.options.trace_pm4 {
                tracing::trace!(
                    "{} ({} words) at word {}",
                    opcode.name(),
                    packet.payload.len(),
                    packet.offset
                );
            }

            match lookup_packet_handler(opcode) {
                Some(handler) => match handler(self, &packet, depth) {
                    Err(err) if !err.is_fatal() => {
                        tracing::warn!("{} at word {} failed: {}", opcode.name(), packet.offset, err);
                    }
                    result => result?,
                },
                None => self.stats.unknown_packets += 1,
            }
        }

        Ok(())
    }

    fn handle_set_registers(&mut self, packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        let window = packet
            .opcode()
            .and_then(Opcode::register_window)
            .ok_or_else(|| GpuError::Unimplemented(format!("SET opcode 0x{:02X}", packet.header.opcode())))?;
        let set = SetRegisters::parse(packet, window)?;

        // Validate the whole range before the first write
        let start = RegisterFile::validate_range(set.start, set.values.len()).ok_or_else(|| {
            GpuError::MalformedStream {
                offset: packet.offset,
                reason: format!(
                    "{} words from register 0x{:05X} leave the register file",
                    set.values.len(),
                    set.start
                ),
            }
        })?;

        for (i, &value) in set.values.iter().enumerate() {
            let reg = start
                .offset_by(i as u32)
                .ok_or(GpuError::InvalidRegister(set.start))?;
            self.set_register(reg, value);
        }

        Ok(())
    }

    fn handle_indirect_buffer(&mut self, packet: &Packet<'_>, depth: usize) -> Result<(), GpuError> {
        let indirect = IndirectBuffer::parse(packet)?;

        if depth + 1 > MAX_INDIRECT_DEPTH {
            return Err(GpuError::MalformedStream {
                offset: packet.offset,
                reason: format!("indirect buffers nested deeper than {}", MAX_INDIRECT_DEPTH),
            });
        }
        if indirect.addr_hi != 0 {
            tracing::warn!("Ignoring high address bits 0x{:X} of indirect buffer", indirect.addr_hi);
        }

        let words = self
            .memory
            .read_words(indirect.addr_lo, indirect.size as usize)
            .ok_or(GpuError::GuestMemory {
                addr: indirect.addr_lo,
                words: indirect.size as usize,
            })?;

        self.stats.indirect_buffers += 1;
        tracing::trace!(
            "Indirect buffer 0x{:08X} ({} words) at depth {}",
            indirect.addr_lo,
            indirect.size,
            depth + 1
        );
        self.run_buffer(&words, depth + 1)
    }

    fn handle_index_type(&mut self, packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        let value = single_word(packet, "INDEX_TYPE")?;
        self.registers.store(Register::VGT_DMA_INDEX_TYPE, value);
        Ok(())
    }

    fn handle_num_instances(&mut self, packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        let value = single_word(packet, "NUM_INSTANCES")?;
        self.registers.store(Register::VGT_DMA_NUM_INSTANCES, value);
        Ok(())
    }

    fn handle_draw_index_auto(&mut self, packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        let draw = DrawIndexAuto::parse(packet)?;
        self.draw(draw.count, None);
        Ok(())
    }

    fn handle_draw_index_2(&mut self, packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        let draw = DrawIndex2::parse(packet)?;
        let format = match VgtDmaIndexType(self.registers.get(Register::VGT_DMA_INDEX_TYPE)).index_type() {
            0 => IndexFormat::U16,
            _ => IndexFormat::U32,
        };
        self.draw(draw.count, Some((format, draw.index_addr)));
        Ok(())
    }

    fn draw(&mut self, count: u32, indices: Option<(IndexFormat, u32)>) {
        let command = self.check_ready_draw().and_then(|()| {
            let raw = self.registers.get(Register::VGT_PRIMITIVE_TYPE);
            let primitive = PrimitiveType::from_raw(raw).ok_or(DrawSkip::Primitive(raw))?;
            Ok(DrawCommand {
                primitive,
                count,
                instances: self.registers.get(Register::VGT_DMA_NUM_INSTANCES).max(1),
                indices,
            })
        });

        match command {
            Ok(command) => {
                self.backend.draw(&command);
                self.stats.draws += 1;
            }
            Err(skip) => {
                self.stats.skipped_draws += 1;
                tracing::warn!("Skipping draw: {}", skip);
            }
        }
    }

    /// Bring shader, uniforms and render targets in line with the registers
    pub fn check_ready_draw(&mut self) -> Result<(), DrawSkip> {
        self.check_active_shader()?;
        self.check_active_uniforms()?;
        self.check_active_color_buffer()?;
        self.check_active_depth_buffer()?;
        Ok(())
    }

    /// Bind the pipeline selected by the program registers
    pub fn check_active_shader(&mut self) -> Result<(), DrawSkip> {
        let key = PipelineKey::from_registers(&self.registers);
        if self.active_key == Some(key) {
            return self.active_pipeline.map(|_| ()).ok_or(DrawSkip::Shader);
        }

        let status = self
            .shaders
            .get_pipeline(self.backend.as_mut(), self.memory.as_ref(), &self.registers);
        self.active_key = Some(key);

        match status {
            PipelineStatus::Ready(pipeline) => {
                self.backend.bind_pipeline(Some(pipeline.handle));
                self.active_pipeline = Some(pipeline);
                Ok(())
            }
            PipelineStatus::Failed => {
                if self.active_pipeline.take().is_some() {
                    self.backend.bind_pipeline(None);
                }
                Err(DrawSkip::Shader)
            }
        }
    }

    /// Upload the constant file to both stages of the active pipeline
    pub fn check_active_uniforms(&mut self) -> Result<(), DrawSkip> {
        let Some(pipeline) = self.active_pipeline else {
            return Ok(());
        };

        let sq_config = SqConfig::from_bits_truncate(self.registers.get(Register::SQ_CONFIG));
        if !sq_config.contains(SqConfig::DX9_CONSTS) {
            tracing::warn!("{}", GpuError::Unimplemented("uniform blocks".to_string()));
            return Err(DrawSkip::Uniforms);
        }

        let stages = [
            (pipeline.vertex_program, pipeline.vertex_uniforms, Register::SQ_ALU_CONSTANT0_256),
            (pipeline.pixel_program, pipeline.pixel_uniforms, Register::SQ_ALU_CONSTANT0_0),
        ];

        for (program, location, start) in stages {
            let Some(location) = location else {
                continue;
            };
            let words = self.registers.range(start, UNIFORM_FLOATS).ok_or(DrawSkip::Uniforms)?;
            let values: &[f32] = bytemuck::cast_slice(words);
            self.backend.upload_uniforms(program, location, values);
        }

        Ok(())
    }

    /// Rebind color targets whose base register changed
    pub fn check_active_color_buffer(&mut self) -> Result<(), DrawSkip> {
        for slot in 0..NUM_COLOR_BUFFERS {
            let base = self.registers.get(Register::cb_color_base(slot));

            if base == 0 {
                if self.active_color[slot].take().is_some() {
                    self.backend.detach_color(slot);
                }
                continue;
            }

            if self.active_color[slot].map(|surface| surface.base) == Some(base) {
                continue;
            }

            let size = SurfaceSize(self.registers.get(Register::cb_color_size(slot)));
            let info = CbColorInfo(self.registers.get(Register::cb_color_info(slot)));
            match self.surfaces.get_color(self.backend.as_mut(), base, size, info) {
                Ok(Some(surface)) => {
                    self.backend.attach_color(slot, surface.image);
                    self.active_color[slot] = Some(surface);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("Color buffer {} at 0x{:X}: {}", slot, base, err);
                    return Err(DrawSkip::ColorBuffer(slot));
                }
            }
        }

        Ok(())
    }

    /// Rebind the depth target if its base register changed
    pub fn check_active_depth_buffer(&mut self) -> Result<(), DrawSkip> {
        let base = self.registers.get(Register::DB_DEPTH_BASE);

        if base == 0 {
            if self.active_depth.take().is_some() {
                self.backend.detach_depth();
            }
            return Ok(());
        }

        if self.active_depth.map(|surface| surface.base) == Some(base) {
            return Ok(());
        }

        let size = SurfaceSize(self.registers.get(Register::DB_DEPTH_SIZE));
        let info = DbDepthInfo(self.registers.get(Register::DB_DEPTH_INFO));
        match self.surfaces.get_depth(self.backend.as_mut(), base, size, info) {
            Ok(Some(surface)) => {
                self.backend.attach_depth(surface.image);
                self.active_depth = Some(surface);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                tracing::warn!("Depth buffer at 0x{:X}: {}", base, err);
                Err(DrawSkip::DepthBuffer)
            }
        }
    }

    fn check_render_targets(&mut self) {
        let result = self
            .check_active_color_buffer()
            .and_then(|()| self.check_active_depth_buffer());
        if let Err(skip) = result {
            tracing::warn!("Render target binding failed: {}", skip);
        }
    }

    fn handle_clear_color(&mut self, packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        let clear = ClearColor::parse(packet)?;
        self.check_render_targets();
        self.stats.clears += 1;

        let bound = self
            .active_color
            .iter()
            .position(|surface| surface.map(|s| s.base) == Some(clear.buffer_addr));
        if let Some(slot) = bound {
            self.backend.clear_color(slot, clear.rgba);
            return Ok(());
        }

        // Not bound: borrow slot 0 for the clear
        match self.surfaces.get_color(
            self.backend.as_mut(),
            clear.buffer_addr,
            clear.cb_color_size,
            clear.cb_color_info,
        )? {
            Some(surface) => {
                self.backend.attach_color(0, surface.image);
                self.backend.clear_color(0, clear.rgba);
                self.backend.detach_color(0);
                self.active_color[0] = None;
            }
            None => tracing::warn!("Ignoring clear of color buffer at address 0"),
        }

        Ok(())
    }

    fn handle_clear_depth_stencil(&mut self, _packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        tracing::trace!("DECAF_CLEAR_DEPTH_STENCIL has no host effect");
        Ok(())
    }

    fn handle_copy_color_to_scan(&mut self, packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        let copy = CopyColorToScan::parse(packet)?;
        self.check_render_targets();

        let surface = match self.surfaces.get_color(
            self.backend.as_mut(),
            copy.buffer_addr,
            copy.cb_color_size,
            copy.cb_color_info,
        )? {
            Some(surface) => surface,
            None => {
                tracing::warn!("Ignoring scan-out of color buffer at address 0");
                return Ok(());
            }
        };

        let Some(screen) = self.screen.pipeline(self.backend.as_mut()) else {
            tracing::warn!("Screen programs unavailable, dropping scan-out to {:?}", copy.scan_target);
            return Ok(());
        };

        self.backend.present(screen, surface.image, copy.scan_target);
        self.stats.scanouts += 1;

        // Presenting binds the screen pipeline; force a rebind on the next draw
        self.active_key = None;
        self.active_pipeline = None;
        Ok(())
    }

    fn handle_swap_buffers(&mut self, _packet: &Packet<'_>, _depth: usize) -> Result<(), GpuError> {
        self.backend.swap_buffers();
        self.stats.swaps += 1;
        Ok(())
    }
}

impl fmt::Debug for GpuDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuDriver")
            .field("registers", &self.registers)
            .field("surfaces", &self.surfaces.len())
            .field("active_key", &self.active_key)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{CallLog, HostCall, RecordingBackend};
    use crate::memory::{NoMemory, SparseMemory};
    use crate::pm4::PacketBuilder;

    fn recording_driver() -> (GpuDriver, CallLog) {
        let backend = RecordingBackend::new();
        let log = backend.log();
        let driver = GpuDriver::new(Box::new(backend), Box::new(NoMemory), DriverOptions::default());
        (driver, log)
    }

    #[test]
    fn test_set_context_sequence() {
        let (mut driver, _log) = recording_driver();
        let words = PacketBuilder::new()
            .set_context_reg(Register::CB_COLOR0_BASE, &[1, 2, 3])
            .build();
        driver.run_command_buffer(&words).unwrap();

        for (i, value) in [1, 2, 3].into_iter().enumerate() {
            assert_eq!(driver.registers().get(Register::cb_color_base(i)), value);
        }
        assert_eq!(driver.stats().register_writes, 3);
        assert_eq!(driver.stats().side_effects, 0);
    }

    #[test]
    fn test_semantic_clear_fires_once() {
        let (mut driver, _log) = recording_driver();
        let words = PacketBuilder::new()
            .set_context_reg(Register::sq_vtx_semantic(0), &[7])
            .set_context_reg(Register::SQ_VTX_SEMANTIC_CLEAR, &[1])
            .build();
        driver.run_command_buffer(&words).unwrap();

        assert_eq!(driver.stats().side_effects, 1);
        for slot in 0..NUM_VTX_SEMANTICS {
            assert_eq!(driver.registers().get(Register::sq_vtx_semantic(slot)), SEMANTIC_UNMAPPED);
        }
        // 2 packet writes + 32 re-entrant writes
        assert_eq!(driver.stats().register_writes, 34);
    }

    #[test]
    fn test_blend_control_is_registered() {
        assert!(lookup_side_effect(Register::CB_BLEND_CONTROL).is_some());
        assert!(lookup_side_effect(Register::cb_blend_control(7)).is_some());
        assert!(lookup_side_effect(Register::CB_COLOR0_BASE).is_none());
    }

    #[test]
    fn test_out_of_range_set_writes_nothing() {
        let (mut driver, _log) = recording_driver();
        // Context window index that runs past the end of the register file
        let words = PacketBuilder::new()
            .packet(Opcode::SetContextReg as u8, &[0x5FFF, 1, 2])
            .build();

        let err = driver.run_command_buffer(&words).unwrap_err();
        assert!(matches!(err, GpuError::MalformedStream { .. }));
        assert_eq!(driver.stats().register_writes, 0);
        assert_eq!(driver.stats().aborted_buffers, 1);
    }

    #[test]
    fn test_unknown_opcode_skipped() {
        let (mut driver, _log) = recording_driver();
        let words = PacketBuilder::new()
            .packet(0x10, &[0xDEAD, 0xBEEF])
            .set_config_reg(Register::SQ_CONFIG, &[4])
            .build();
        driver.run_command_buffer(&words).unwrap();

        assert_eq!(driver.stats().unknown_packets, 1);
        assert_eq!(driver.registers().get(Register::SQ_CONFIG), 4);
    }

    #[test]
    fn test_type0_packet_aborts() {
        let (mut driver, _log) = recording_driver();
        let mut words = PacketBuilder::new().swap_buffers().build();
        words.push(0x0000_1234);
        words.extend(PacketBuilder::new().swap_buffers().build());

        assert!(matches!(
            driver.run_command_buffer(&words),
            Err(GpuError::Unimplemented(_))
        ));
        assert_eq!(driver.stats().swaps, 1);
    }

    #[test]
    fn test_index_type_and_instances_stored() {
        let (mut driver, _log) = recording_driver();
        let words = PacketBuilder::new().index_type(1).num_instances(4).build();
        driver.run_command_buffer(&words).unwrap();

        assert_eq!(driver.registers().get(Register::VGT_DMA_INDEX_TYPE), 1);
        assert_eq!(driver.registers().get(Register::VGT_DMA_NUM_INSTANCES), 4);
    }

    #[test]
    fn test_indirect_depth_capped() {
        // A buffer that calls itself
        let addr = 0x1000;
        let inner = PacketBuilder::new().indirect_buffer(addr, 4).build();
        let memory = SparseMemory::new().with_region(addr, inner.clone());
        let mut driver = GpuDriver::new(
            Box::new(RecordingBackend::new()),
            Box::new(memory),
            DriverOptions::default(),
        );

        let err = driver.run_command_buffer(&inner).unwrap_err();
        assert!(matches!(err, GpuError::MalformedStream { .. }));
        assert_eq!(driver.stats().indirect_buffers, MAX_INDIRECT_DEPTH as u64);
    }

    #[test]
    fn test_unmapped_indirect_buffer() {
        let (mut driver, _log) = recording_driver();
        let words = PacketBuilder::new().indirect_buffer(0x2000, 8).build();
        assert_eq!(
            driver.run_command_buffer(&words),
            Err(GpuError::GuestMemory { addr: 0x2000, words: 8 })
        );
    }

    #[test]
    fn test_color_binding_idempotent() {
        let (mut driver, log) = recording_driver();
        let words = PacketBuilder::new()
            .set_context_reg(Register::CB_COLOR0_BASE, &[0x100])
            .set_context_reg(Register::CB_COLOR0_SIZE, &[SurfaceSize::from_tiles(7, 63).0])
            .build();
        driver.run_command_buffer(&words).unwrap();

        driver.check_active_color_buffer().unwrap();
        let binds = log.count(HostCall::is_binding);
        assert_eq!(binds, 1);

        driver.check_active_color_buffer().unwrap();
        driver.check_active_depth_buffer().unwrap();
        assert_eq!(log.count(HostCall::is_binding), binds);
    }

    #[test]
    fn test_base_zero_unbinds_once() {
        let (mut driver, log) = recording_driver();
        driver.set_register(Register::CB_COLOR0_BASE, 0x100);
        driver.check_active_color_buffer().unwrap();

        driver.set_register(Register::CB_COLOR0_BASE, 0);
        driver.check_active_color_buffer().unwrap();
        driver.check_active_color_buffer().unwrap();

        assert_eq!(log.count(|call| matches!(call, HostCall::DetachColor { slot: 0 })), 1);
        assert!(driver.active_color(0).is_none());
    }

    #[test]
    fn test_unbound_clear_borrows_slot_zero() {
        let (mut driver, log) = recording_driver();
        let info = CbColorInfo::with_format(crate::surface::COLOR_8_8_8_8);
        let words = PacketBuilder::new()
            .clear_color([0.0, 0.0, 1.0, 1.0], 0x400, SurfaceSize::from_tiles(7, 63), info)
            .build();
        driver.run_command_buffer(&words).unwrap();

        let calls: Vec<HostCall> = log
            .snapshot()
            .into_iter()
            .filter(|call| !matches!(call, HostCall::CreateImage { .. }))
            .collect();
        assert!(matches!(calls[0], HostCall::AttachColor { slot: 0, .. }));
        assert_eq!(calls[1], HostCall::ClearColor { slot: 0, rgba: [0.0, 0.0, 1.0, 1.0] });
        assert_eq!(calls[2], HostCall::DetachColor { slot: 0 });
        assert!(driver.surfaces().contains_color(0x400));
    }

    #[test]
    fn test_backend_failure_does_not_abort_buffer() {
        let backend = RecordingBackend::new().fail_images();
        let log = backend.log();
        let mut driver = GpuDriver::new(Box::new(backend), Box::new(NoMemory), DriverOptions::default());
        let info = CbColorInfo::with_format(crate::surface::COLOR_8_8_8_8);
        let words = PacketBuilder::new()
            .clear_color([1.0, 0.0, 0.0, 1.0], 0x400, SurfaceSize::from_tiles(7, 63), info)
            .set_context_reg(Register::CB_COLOR0_BASE, &[0x800])
            .swap_buffers()
            .build();
        driver.run_command_buffer(&words).unwrap();

        assert_eq!(driver.stats().aborted_buffers, 0);
        assert_eq!(driver.stats().clears, 1);
        assert_eq!(driver.stats().swaps, 1);
        assert_eq!(driver.registers().get(Register::CB_COLOR0_BASE), 0x800);
        assert!(!driver.surfaces().contains_color(0x400));
        assert_eq!(log.count(|call| matches!(call, HostCall::ClearColor { .. })), 0);
    }

    #[test]
    fn test_draw_without_shader_skipped() {
        let (mut driver, log) = recording_driver();
        let words = PacketBuilder::new().draw_index_auto(3).build();
        driver.run_command_buffer(&words).unwrap();

        assert_eq!(driver.stats().skipped_draws, 1);
        assert_eq!(log.count(|call| matches!(call, HostCall::Draw { .. })), 0);
    }

    #[test]
    fn test_scan_out_without_screen_programs() {
        let (mut driver, log) = recording_driver();
        let info = CbColorInfo::with_format(crate::surface::COLOR_8_8_8_8);
        let words = PacketBuilder::new()
            .copy_color_to_scan(1, 0x100, SurfaceSize::from_tiles(7, 63), info)
            .swap_buffers()
            .build();
        driver.run_command_buffer(&words).unwrap();

        assert_eq!(driver.stats().scanouts, 0);
        assert_eq!(driver.stats().swaps, 1);
        assert_eq!(log.count(|call| matches!(call, HostCall::Present { .. })), 0);
    }
}
