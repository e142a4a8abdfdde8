//! PM4 command packet decoding
//!
//! A command buffer is a flat sequence of 32-bit words. Each packet starts
//! with a header whose top two bits select the packet type. Only Type-3
//! packets are supported; their header carries an opcode and the payload
//! length.

use crate::registers::{CbColorInfo, Register, SurfaceSize};
use cafe_core::GpuError;

/// Packet type, header bits 30-31
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Type0 = 0,
    Type1 = 1,
    Type2 = 2,
    Type3 = 3,
}

impl PacketType {
    pub fn from_header(header: u32) -> Self {
        match header >> 30 {
            0 => PacketType::Type0,
            1 => PacketType::Type1,
            2 => PacketType::Type2,
            _ => PacketType::Type3,
        }
    }
}

/// Type-3 packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type3Header(pub u32);

impl Type3Header {
    pub fn new(opcode: u8, payload_words: usize) -> Self {
        debug_assert!((1..=0x4000).contains(&payload_words));
        let count = (payload_words.saturating_sub(1) as u32) & 0x3FFF;
        Self((3 << 30) | (count << 16) | ((opcode as u32) << 8))
    }

    /// Payload word count minus one (bits 16-29)
    pub fn count(self) -> u32 {
        (self.0 >> 16) & 0x3FFF
    }

    pub fn payload_words(self) -> usize {
        self.count() as usize + 1
    }

    /// IT_OPCODE (bits 8-15)
    pub fn opcode(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    pub fn predicate(self) -> bool {
        self.0 & 1 != 0
    }
}

/// Type-3 opcodes handled by the command processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    DrawIndex2 = 0x27,
    IndexType = 0x2A,
    DrawIndexAuto = 0x2D,
    NumInstances = 0x2F,
    IndirectBufferPriv = 0x32,
    SetConfigReg = 0x68,
    SetContextReg = 0x69,
    SetAluConst = 0x6A,
    SetLoopConst = 0x6C,
    SetResource = 0x6D,
    SetSampler = 0x6E,
    SetCtlConst = 0x6F,
    DecafCopyColorToScan = 0x91,
    DecafSwapBuffers = 0x92,
    DecafClearColor = 0x93,
    DecafClearDepthStencil = 0x94,
}

impl Opcode {
    /// Every opcode with a handler
    pub const ALL: [Opcode; 16] = [
        Opcode::DrawIndex2,
        Opcode::IndexType,
        Opcode::DrawIndexAuto,
        Opcode::NumInstances,
        Opcode::IndirectBufferPriv,
        Opcode::SetConfigReg,
        Opcode::SetContextReg,
        Opcode::SetAluConst,
        Opcode::SetLoopConst,
        Opcode::SetResource,
        Opcode::SetSampler,
        Opcode::SetCtlConst,
        Opcode::DecafCopyColorToScan,
        Opcode::DecafSwapBuffers,
        Opcode::DecafClearColor,
        Opcode::DecafClearDepthStencil,
    ];

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == raw)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::DrawIndex2 => "DRAW_INDEX_2",
            Opcode::IndexType => "INDEX_TYPE",
            Opcode::DrawIndexAuto => "DRAW_INDEX_AUTO",
            Opcode::NumInstances => "NUM_INSTANCES",
            Opcode::IndirectBufferPriv => "INDIRECT_BUFFER_PRIV",
            Opcode::SetConfigReg => "SET_CONFIG_REG",
            Opcode::SetContextReg => "SET_CONTEXT_REG",
            Opcode::SetAluConst => "SET_ALU_CONST",
            Opcode::SetLoopConst => "SET_LOOP_CONST",
            Opcode::SetResource => "SET_RESOURCE",
            Opcode::SetSampler => "SET_SAMPLER",
            Opcode::SetCtlConst => "SET_CTL_CONST",
            Opcode::DecafCopyColorToScan => "DECAF_COPY_COLOR_TO_SCAN",
            Opcode::DecafSwapBuffers => "DECAF_SWAP_BUFFERS",
            Opcode::DecafClearColor => "DECAF_CLEAR_COLOR",
            Opcode::DecafClearDepthStencil => "DECAF_CLEAR_DEPTH_STENCIL",
        }
    }

    /// Base byte offset of the register window written by a SET_* opcode
    pub fn register_window(self) -> Option<u32> {
        match self {
            Opcode::SetConfigReg => Some(Register::CONFIG_BASE),
            Opcode::SetContextReg => Some(Register::CONTEXT_BASE),
            Opcode::SetAluConst => Some(Register::ALU_CONST_BASE),
            Opcode::SetLoopConst => Some(Register::LOOP_CONST_BASE),
            Opcode::SetResource => Some(Register::RESOURCE_BASE),
            Opcode::SetSampler => Some(Register::SAMPLER_BASE),
            Opcode::SetCtlConst => Some(Register::CTL_CONST_BASE),
            _ => None,
        }
    }
}

/// A decoded Type-3 packet borrowing its payload from the command buffer
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub header: Type3Header,
    /// Word offset of the header within its buffer
    pub offset: usize,
    pub payload: &'a [u32],
}

impl<'a> Packet<'a> {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_raw(self.header.opcode())
    }

    /// Fail unless the payload holds at least `words` words
    fn require(&self, words: usize, what: &str) -> Result<(), GpuError> {
        if self.payload.len() < words {
            return Err(GpuError::MalformedStream {
                offset: self.offset,
                reason: format!(
                    "{} payload has {} words, expected at least {}",
                    what,
                    self.payload.len(),
                    words
                ),
            });
        }
        Ok(())
    }
}

/// Sequential packet decoder over one command buffer
pub struct PacketReader<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    /// Word offset of the next header
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Decode the next packet.
    ///
    /// Returns `Ok(None)` at the end of the buffer. After an error the reader
    /// is exhausted.
    pub fn next_packet(&mut self) -> Result<Option<Packet<'a>>, GpuError> {
        let offset = self.pos;
        let header = match self.words.get(offset) {
            Some(&header) => header,
            None => return Ok(None),
        };

        match PacketType::from_header(header) {
            PacketType::Type3 => {}
            other => {
                self.pos = self.words.len();
                return Err(GpuError::Unimplemented(format!(
                    "{:?} packet 0x{:08X} at word {}",
                    other, header, offset
                )));
            }
        }

        let header = Type3Header(header);
        let start = offset + 1;
        let end = start + header.payload_words();
        if end > self.words.len() {
            self.pos = self.words.len();
            return Err(GpuError::MalformedStream {
                offset,
                reason: format!(
                    "payload of {} words runs past end of buffer ({} words)",
                    header.payload_words(),
                    self.words.len()
                ),
            });
        }

        self.pos = end;
        Ok(Some(Packet {
            header,
            offset,
            payload: &self.words[start..end],
        }))
    }
}

/// Scan-out target of DECAF_COPY_COLOR_TO_SCAN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTarget {
    Tv,
    Drc,
    Unknown(u32),
}

impl ScanTarget {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => ScanTarget::Tv,
            4 => ScanTarget::Drc,
            other => ScanTarget::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyColorToScan {
    pub scan_target: ScanTarget,
    pub buffer_addr: u32,
    pub cb_color_size: SurfaceSize,
    pub cb_color_info: CbColorInfo,
}

impl CopyColorToScan {
    pub fn parse(packet: &Packet<'_>) -> Result<Self, GpuError> {
        packet.require(4, "DECAF_COPY_COLOR_TO_SCAN")?;
        let p = packet.payload;
        Ok(Self {
            scan_target: ScanTarget::from_raw(p[0]),
            buffer_addr: p[1],
            cb_color_size: SurfaceSize(p[2]),
            cb_color_info: CbColorInfo(p[3]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub rgba: [f32; 4],
    pub buffer_addr: u32,
    pub cb_color_size: SurfaceSize,
    pub cb_color_info: CbColorInfo,
}

impl ClearColor {
    pub fn parse(packet: &Packet<'_>) -> Result<Self, GpuError> {
        packet.require(7, "DECAF_CLEAR_COLOR")?;
        let p = packet.payload;
        Ok(Self {
            rgba: [
                f32::from_bits(p[0]),
                f32::from_bits(p[1]),
                f32::from_bits(p[2]),
                f32::from_bits(p[3]),
            ],
            buffer_addr: p[4],
            cb_color_size: SurfaceSize(p[5]),
            cb_color_info: CbColorInfo(p[6]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndex2 {
    pub max_indices: u32,
    pub index_addr: u32,
    pub count: u32,
    pub draw_initiator: u32,
}

impl DrawIndex2 {
    pub fn parse(packet: &Packet<'_>) -> Result<Self, GpuError> {
        packet.require(4, "DRAW_INDEX_2")?;
        let p = packet.payload;
        Ok(Self {
            max_indices: p[0],
            index_addr: p[1],
            count: p[2],
            draw_initiator: p[3],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndexAuto {
    pub count: u32,
    pub draw_initiator: u32,
}

impl DrawIndexAuto {
    pub fn parse(packet: &Packet<'_>) -> Result<Self, GpuError> {
        packet.require(2, "DRAW_INDEX_AUTO")?;
        Ok(Self {
            count: packet.payload[0],
            draw_initiator: packet.payload[1],
        })
    }
}

/// Single-word payload shared by INDEX_TYPE and NUM_INSTANCES
pub fn single_word(packet: &Packet<'_>, what: &str) -> Result<u32, GpuError> {
    packet.require(1, what)?;
    Ok(packet.payload[0])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectBuffer {
    pub addr_lo: u32,
    pub addr_hi: u32,
    /// Size in words
    pub size: u32,
}

impl IndirectBuffer {
    pub fn parse(packet: &Packet<'_>) -> Result<Self, GpuError> {
        packet.require(3, "INDIRECT_BUFFER_PRIV")?;
        let p = packet.payload;
        Ok(Self {
            addr_lo: p[0],
            addr_hi: p[1],
            size: p[2],
        })
    }
}

/// SET_* payload: a window-relative start index followed by values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetRegisters<'a> {
    /// Absolute byte offset of the first register
    pub start: u32,
    pub values: &'a [u32],
}

impl<'a> SetRegisters<'a> {
    pub fn parse(packet: &Packet<'a>, window_base: u32) -> Result<Self, GpuError> {
        packet.require(1, "SET_*")?;
        let index = packet.payload[0];
        let start = index
            .checked_mul(4)
            .and_then(|bytes| window_base.checked_add(bytes))
            .ok_or_else(|| GpuError::MalformedStream {
                offset: packet.offset,
                reason: format!("register index 0x{:X} overflows window 0x{:05X}", index, window_base),
            })?;
        Ok(Self {
            start,
            values: &packet.payload[1..],
        })
    }
}

/// Builds PM4 command buffers
#[derive(Debug, Default, Clone)]
pub struct PacketBuilder {
    words: Vec<u32>,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw Type-3 packet
    pub fn packet(mut self, opcode: u8, payload: &[u32]) -> Self {
        self.words.push(Type3Header::new(opcode, payload.len()).0);
        self.words.extend_from_slice(payload);
        self
    }

    fn op(self, opcode: Opcode, payload: &[u32]) -> Self {
        self.packet(opcode as u8, payload)
    }

    /// SET_* packet writing `values` from the absolute register `reg`
    pub fn set_registers(self, opcode: Opcode, reg: Register, values: &[u32]) -> Self {
        let base = opcode.register_window().unwrap_or(Register::CONTEXT_BASE);
        let mut payload = Vec::with_capacity(values.len() + 1);
        payload.push(reg.offset().wrapping_sub(base) / 4);
        payload.extend_from_slice(values);
        self.op(opcode, &payload)
    }

    pub fn set_config_reg(self, reg: Register, values: &[u32]) -> Self {
        self.set_registers(Opcode::SetConfigReg, reg, values)
    }

    pub fn set_context_reg(self, reg: Register, values: &[u32]) -> Self {
        self.set_registers(Opcode::SetContextReg, reg, values)
    }

    pub fn set_alu_const(self, reg: Register, values: &[u32]) -> Self {
        self.set_registers(Opcode::SetAluConst, reg, values)
    }

    pub fn clear_color(self, rgba: [f32; 4], buffer_addr: u32, size: SurfaceSize, info: CbColorInfo) -> Self {
        self.op(
            Opcode::DecafClearColor,
            &[
                rgba[0].to_bits(),
                rgba[1].to_bits(),
                rgba[2].to_bits(),
                rgba[3].to_bits(),
                buffer_addr,
                size.0,
                info.0,
            ],
        )
    }

    pub fn copy_color_to_scan(self, scan_target: u32, buffer_addr: u32, size: SurfaceSize, info: CbColorInfo) -> Self {
        self.op(Opcode::DecafCopyColorToScan, &[scan_target, buffer_addr, size.0, info.0])
    }

    pub fn swap_buffers(self) -> Self {
        self.op(Opcode::DecafSwapBuffers, &[0])
    }

    pub fn draw_index_auto(self, count: u32) -> Self {
        self.op(Opcode::DrawIndexAuto, &[count, 0])
    }

    pub fn draw_index_2(self, max_indices: u32, index_addr: u32, count: u32) -> Self {
        self.op(Opcode::DrawIndex2, &[max_indices, index_addr, count, 0])
    }

    pub fn index_type(self, index_type: u32) -> Self {
        self.op(Opcode::IndexType, &[index_type])
    }

    pub fn num_instances(self, count: u32) -> Self {
        self.op(Opcode::NumInstances, &[count])
    }

    pub fn indirect_buffer(self, addr: u32, size: u32) -> Self {
        self.op(Opcode::IndirectBufferPriv, &[addr, 0, size])
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn build(self) -> Vec<u32> {
        self.words
    }
}
