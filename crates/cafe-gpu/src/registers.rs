//! Latte register file
//!
//! Registers are addressed by their byte offset, exactly as the PM4 stream and
//! the hardware documentation name them. The file itself is a flat array of
//! 32-bit words covering byte offsets `0x00000..0x40000`.

use bitflags::bitflags;

/// Number of 32-bit words in the register file
pub const REGISTER_FILE_WORDS: usize = 0x10000;

/// Number of color buffer attachment slots
pub const NUM_COLOR_BUFFERS: usize = 8;

/// Number of vertex semantic registers reset by `SQ_VTX_SEMANTIC_CLEAR`
pub const NUM_VTX_SEMANTICS: usize = 32;

/// Number of four-component ALU constants per stage in DX9 mode
pub const NUM_ALU_CONSTANTS: usize = 256;

/// Surface tile dimensions in pixels
pub const TILE_WIDTH: u32 = 8;
pub const TILE_HEIGHT: u32 = 8;

/// Value written to semantic registers to mark them unmapped
pub const SEMANTIC_UNMAPPED: u32 = 0xFFFF_FFFF;

/// A validated register byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(u32);

impl Register {
    // Register windows used by the SET_* packets
    pub const CONFIG_BASE: u32 = 0x08000;
    pub const CONTEXT_BASE: u32 = 0x28000;
    pub const ALU_CONST_BASE: u32 = 0x30000;
    pub const RESOURCE_BASE: u32 = 0x38000;
    pub const SAMPLER_BASE: u32 = 0x3C000;
    pub const CTL_CONST_BASE: u32 = 0x3CFF0;
    pub const LOOP_CONST_BASE: u32 = 0x3E200;

    // Config registers
    pub const VGT_PRIMITIVE_TYPE: Register = Register(0x08958);
    pub const SQ_CONFIG: Register = Register(0x08C00);

    // Depth buffer
    pub const DB_DEPTH_SIZE: Register = Register(0x28000);
    pub const DB_DEPTH_VIEW: Register = Register(0x28004);
    pub const DB_DEPTH_BASE: Register = Register(0x2800C);
    pub const DB_DEPTH_INFO: Register = Register(0x28010);

    // Color buffers, 8 of each
    pub const CB_COLOR0_BASE: Register = Register(0x28040);
    pub const CB_COLOR0_SIZE: Register = Register(0x28060);
    pub const CB_COLOR0_INFO: Register = Register(0x280A0);

    // Shader state
    pub const SQ_VTX_SEMANTIC_0: Register = Register(0x28380);
    pub const SPI_PS_IN_CONTROL_0: Register = Register(0x286CC);
    pub const CB_BLEND0_CONTROL: Register = Register(0x28780);
    pub const CB_BLEND_CONTROL: Register = Register(0x28804);
    pub const SQ_PGM_START_PS: Register = Register(0x28840);
    pub const SQ_PGM_SIZE_PS: Register = Register(0x28844);
    pub const SQ_PGM_START_VS: Register = Register(0x28858);
    pub const SQ_PGM_SIZE_VS: Register = Register(0x2885C);
    pub const SQ_PGM_START_FS: Register = Register(0x28894);
    pub const SQ_PGM_SIZE_FS: Register = Register(0x28898);
    pub const SQ_VTX_SEMANTIC_CLEAR: Register = Register(0x288E0);
    pub const VGT_DMA_INDEX_TYPE: Register = Register(0x28A7C);
    pub const VGT_DMA_NUM_INSTANCES: Register = Register(0x28A88);

    // Constant files
    pub const SQ_ALU_CONSTANT0_0: Register = Register(0x30000);
    pub const SQ_ALU_CONSTANT0_256: Register = Register(0x31000);

    /// Validate a byte offset: it must be word aligned and inside the file
    pub const fn new(offset: u32) -> Option<Register> {
        if offset % 4 == 0 && (offset as usize) < REGISTER_FILE_WORDS * 4 {
            Some(Register(offset))
        } else {
            None
        }
    }

    /// Byte offset of this register
    pub const fn offset(self) -> u32 {
        self.0
    }

    /// Word index into the register file
    pub const fn index(self) -> usize {
        (self.0 / 4) as usize
    }

    /// The register `words` words after this one, if it exists
    pub fn offset_by(self, words: u32) -> Option<Register> {
        words
            .checked_mul(4)
            .and_then(|bytes| self.0.checked_add(bytes))
            .and_then(Register::new)
    }

    pub fn cb_color_base(slot: usize) -> Register {
        debug_assert!(slot < NUM_COLOR_BUFFERS);
        Register(Self::CB_COLOR0_BASE.0 + slot as u32 * 4)
    }

    pub fn cb_color_size(slot: usize) -> Register {
        debug_assert!(slot < NUM_COLOR_BUFFERS);
        Register(Self::CB_COLOR0_SIZE.0 + slot as u32 * 4)
    }

    pub fn cb_color_info(slot: usize) -> Register {
        debug_assert!(slot < NUM_COLOR_BUFFERS);
        Register(Self::CB_COLOR0_INFO.0 + slot as u32 * 4)
    }

    pub fn cb_blend_control(slot: usize) -> Register {
        debug_assert!(slot < NUM_COLOR_BUFFERS);
        Register(Self::CB_BLEND0_CONTROL.0 + slot as u32 * 4)
    }

    pub fn sq_vtx_semantic(slot: usize) -> Register {
        debug_assert!(slot < NUM_VTX_SEMANTICS);
        Register(Self::SQ_VTX_SEMANTIC_0.0 + slot as u32 * 4)
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:05X}", self.0)
    }
}

/// CB_COLORn_SIZE / DB_DEPTH_SIZE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSize(pub u32);

impl SurfaceSize {
    /// Pitch in tiles, minus one (bits 0-9)
    pub fn pitch_tile_max(self) -> u32 {
        self.0 & 0x3FF
    }

    /// Slice size in tiles, minus one (bits 10-29)
    pub fn slice_tile_max(self) -> u32 {
        (self.0 >> 10) & 0xF_FFFF
    }

    pub fn from_tiles(pitch_tile_max: u32, slice_tile_max: u32) -> Self {
        Self((pitch_tile_max & 0x3FF) | ((slice_tile_max & 0xF_FFFF) << 10))
    }

    /// Pitch in pixels
    pub fn pitch(self) -> u32 {
        (self.pitch_tile_max() + 1) * TILE_WIDTH
    }

    /// Height in pixels derived from the slice size and pitch
    pub fn height(self) -> u32 {
        ((self.slice_tile_max() + 1) * (TILE_WIDTH * TILE_HEIGHT)) / self.pitch()
    }
}

/// CB_COLORn_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CbColorInfo(pub u32);

impl CbColorInfo {
    pub fn endian(self) -> u32 {
        self.0 & 0x3
    }

    pub fn format(self) -> u32 {
        (self.0 >> 2) & 0x3F
    }

    pub fn with_format(format: u32) -> Self {
        Self((format & 0x3F) << 2)
    }
}

/// DB_DEPTH_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DbDepthInfo(pub u32);

impl DbDepthInfo {
    pub fn format(self) -> u32 {
        self.0 & 0x7
    }
}

bitflags! {
    /// SQ_CONFIG
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SqConfig: u32 {
        const VC_ENABLE = 1 << 0;
        const EXPORT_SRC_C = 1 << 1;
        const DX9_CONSTS = 1 << 2;
        const ALU_INST_PREFER_VECTOR = 1 << 3;
        const DX10_CLAMP = 1 << 4;
        const ALU_PREFER_VECTOR = 1 << 5;
    }
}

/// SPI_PS_IN_CONTROL_0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpiPsInControl0(pub u32);

impl SpiPsInControl0 {
    /// Number of interpolated pixel shader inputs
    pub fn num_interp(self) -> u32 {
        self.0 & 0x3F
    }
}

/// VGT_DMA_INDEX_TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VgtDmaIndexType(pub u32);

impl VgtDmaIndexType {
    /// 0 = 16-bit indices, 1 = 32-bit indices
    pub fn index_type(self) -> u32 {
        self.0 & 0x3
    }
}

/// Flat register state
pub struct RegisterFile {
    values: Box<[u32]>,
}

impl RegisterFile {
    /// Create a register file with every register zeroed
    pub fn new() -> Self {
        Self {
            values: vec![0u32; REGISTER_FILE_WORDS].into_boxed_slice(),
        }
    }

    /// Read a register
    pub fn get(&self, reg: Register) -> u32 {
        self.values[reg.index()]
    }

    /// Store a value without running side effects.
    ///
    /// Only the driver's mutation entry point and the packets that write VGT
    /// state directly use this.
    pub(crate) fn store(&mut self, reg: Register, value: u32) {
        self.values[reg.index()] = value;
    }

    /// A run of `words` registers starting at `start`, if it fits in the file
    pub fn range(&self, start: Register, words: usize) -> Option<&[u32]> {
        let begin = start.index();
        self.values.get(begin..begin.checked_add(words)?)
    }

    /// Validate that `words` consecutive registers starting at `offset` exist
    pub fn validate_range(offset: u32, words: usize) -> Option<Register> {
        let start = Register::new(offset)?;
        let end = start.index().checked_add(words)?;
        if end <= REGISTER_FILE_WORDS {
            Some(start)
        } else {
            None
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nonzero = self.values.iter().filter(|&&v| v != 0).count();
        f.debug_struct("RegisterFile")
            .field("words", &self.values.len())
            .field("nonzero", &nonzero)
            .finish()
    }
}
