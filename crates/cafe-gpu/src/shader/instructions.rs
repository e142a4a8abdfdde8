//! Latte shader microcode word layouts
//!
//! Control flow instructions are 64 bits (two words). ALU instructions are 64
//! bits, texture and vertex fetch instructions are 128 bits.

use super::TranslateError;

// Normal CF_INST values (CF_WORD1 bits 23-29)
pub const SQ_CF_INST_NOP: u32 = 0x00;
pub const SQ_CF_INST_TEX: u32 = 0x01;
pub const SQ_CF_INST_VTX: u32 = 0x02;
pub const SQ_CF_INST_VTX_TC: u32 = 0x03;
pub const SQ_CF_INST_LOOP_START: u32 = 0x04;
pub const SQ_CF_INST_LOOP_END: u32 = 0x05;
pub const SQ_CF_INST_JUMP: u32 = 0x0A;
pub const SQ_CF_INST_PUSH: u32 = 0x0B;
pub const SQ_CF_INST_ELSE: u32 = 0x0D;
pub const SQ_CF_INST_POP: u32 = 0x0E;
pub const SQ_CF_INST_CALL: u32 = 0x12;
pub const SQ_CF_INST_CALL_FS: u32 = 0x13;
pub const SQ_CF_INST_RETURN: u32 = 0x14;
pub const SQ_CF_INST_EMIT_VERTEX: u32 = 0x15;
pub const SQ_CF_INST_KILL: u32 = 0x18;

// Export CF_INST values (CF_ALLOC_EXPORT_WORD1 bits 23-29)
pub const SQ_CF_INST_MEM_STREAM0: u32 = 0x20;
pub const SQ_CF_INST_MEM_STREAM1: u32 = 0x21;
pub const SQ_CF_INST_MEM_STREAM2: u32 = 0x22;
pub const SQ_CF_INST_MEM_STREAM3: u32 = 0x23;
pub const SQ_CF_INST_MEM_SCRATCH: u32 = 0x24;
pub const SQ_CF_INST_MEM_REDUCTION: u32 = 0x25;
pub const SQ_CF_INST_MEM_RING: u32 = 0x26;
pub const SQ_CF_INST_EXP: u32 = 0x27;
pub const SQ_CF_INST_EXP_DONE: u32 = 0x28;
pub const SQ_CF_INST_MEM_EXPORT: u32 = 0x3A;

// ALU CF_INST values (CF_ALU_WORD1 bits 26-29)
pub const SQ_CF_INST_ALU: u32 = 0x8;
pub const SQ_CF_INST_ALU_PUSH_BEFORE: u32 = 0x9;
pub const SQ_CF_INST_ALU_POP_AFTER: u32 = 0xA;
pub const SQ_CF_INST_ALU_POP2_AFTER: u32 = 0xB;
pub const SQ_CF_INST_ALU_CONTINUE: u32 = 0xD;
pub const SQ_CF_INST_ALU_BREAK: u32 = 0xE;
pub const SQ_CF_INST_ALU_ELSE_AFTER: u32 = 0xF;

/// Control flow instruction encoding, CF_WORD1 bits 28-29
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfType {
    Normal,
    Export,
    Alu,
    AluExtended,
}

/// Key used to look up a control flow handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfOpcode {
    /// Normal or export CF_INST (7 bits)
    Inst(u32),
    /// ALU CF_INST (4 bits)
    Alu(u32),
}

impl CfOpcode {
    pub fn name(self) -> String {
        let known = match self {
            CfOpcode::Inst(SQ_CF_INST_NOP) => "NOP",
            CfOpcode::Inst(SQ_CF_INST_TEX) => "TEX",
            CfOpcode::Inst(SQ_CF_INST_VTX) => "VTX",
            CfOpcode::Inst(SQ_CF_INST_VTX_TC) => "VTX_TC",
            CfOpcode::Inst(SQ_CF_INST_LOOP_START) => "LOOP_START",
            CfOpcode::Inst(SQ_CF_INST_LOOP_END) => "LOOP_END",
            CfOpcode::Inst(SQ_CF_INST_JUMP) => "JUMP",
            CfOpcode::Inst(SQ_CF_INST_PUSH) => "PUSH",
            CfOpcode::Inst(SQ_CF_INST_ELSE) => "ELSE",
            CfOpcode::Inst(SQ_CF_INST_POP) => "POP",
            CfOpcode::Inst(SQ_CF_INST_CALL) => "CALL",
            CfOpcode::Inst(SQ_CF_INST_CALL_FS) => "CALL_FS",
            CfOpcode::Inst(SQ_CF_INST_RETURN) => "RETURN",
            CfOpcode::Inst(SQ_CF_INST_EMIT_VERTEX) => "EMIT_VERTEX",
            CfOpcode::Inst(SQ_CF_INST_KILL) => "KILL",
            CfOpcode::Inst(SQ_CF_INST_MEM_STREAM0) => "MEM_STREAM0",
            CfOpcode::Inst(SQ_CF_INST_MEM_STREAM1) => "MEM_STREAM1",
            CfOpcode::Inst(SQ_CF_INST_MEM_STREAM2) => "MEM_STREAM2",
            CfOpcode::Inst(SQ_CF_INST_MEM_STREAM3) => "MEM_STREAM3",
            CfOpcode::Inst(SQ_CF_INST_MEM_SCRATCH) => "MEM_SCRATCH",
            CfOpcode::Inst(SQ_CF_INST_MEM_REDUCTION) => "MEM_REDUCTION",
            CfOpcode::Inst(SQ_CF_INST_MEM_RING) => "MEM_RING",
            CfOpcode::Inst(SQ_CF_INST_EXP) => "EXP",
            CfOpcode::Inst(SQ_CF_INST_EXP_DONE) => "EXP_DONE",
            CfOpcode::Inst(SQ_CF_INST_MEM_EXPORT) => "MEM_EXPORT",
            CfOpcode::Alu(SQ_CF_INST_ALU) => "ALU",
            CfOpcode::Alu(SQ_CF_INST_ALU_PUSH_BEFORE) => "ALU_PUSH_BEFORE",
            CfOpcode::Alu(SQ_CF_INST_ALU_POP_AFTER) => "ALU_POP_AFTER",
            CfOpcode::Alu(SQ_CF_INST_ALU_POP2_AFTER) => "ALU_POP2_AFTER",
            CfOpcode::Alu(SQ_CF_INST_ALU_CONTINUE) => "ALU_CONTINUE",
            CfOpcode::Alu(SQ_CF_INST_ALU_BREAK) => "ALU_BREAK",
            CfOpcode::Alu(SQ_CF_INST_ALU_ELSE_AFTER) => "ALU_ELSE_AFTER",
            CfOpcode::Inst(other) => return format!("CF_INST 0x{:02X}", other),
            CfOpcode::Alu(other) => return format!("CF_INST_ALU 0x{:X}", other),
        };
        known.to_string()
    }
}

/// Component selector (SQ_SEL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqSel {
    X,
    Y,
    Z,
    W,
    Zero,
    One,
    Mask,
}

impl SqSel {
    pub fn decode(raw: u32) -> Result<Self, TranslateError> {
        Ok(match raw {
            0 => SqSel::X,
            1 => SqSel::Y,
            2 => SqSel::Z,
            3 => SqSel::W,
            4 => SqSel::Zero,
            5 => SqSel::One,
            7 => SqSel::Mask,
            other => return Err(TranslateError::InvalidSelector(other)),
        })
    }

    pub fn raw(self) -> u32 {
        match self {
            SqSel::X => 0,
            SqSel::Y => 1,
            SqSel::Z => 2,
            SqSel::W => 3,
            SqSel::Zero => 4,
            SqSel::One => 5,
            SqSel::Mask => 7,
        }
    }

    /// Swizzle letter for a plain component reference
    pub fn component(self) -> Option<char> {
        match self {
            SqSel::X => Some('x'),
            SqSel::Y => Some('y'),
            SqSel::Z => Some('z'),
            SqSel::W => Some('w'),
            _ => None,
        }
    }
}

/// Export destination class (CF_ALLOC_EXPORT_WORD0.TYPE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExportType {
    Pixel,
    Position,
    Param,
}

impl ExportType {
    pub fn decode(raw: u32) -> Result<Self, TranslateError> {
        match raw {
            0 => Ok(ExportType::Pixel),
            1 => Ok(ExportType::Position),
            2 => Ok(ExportType::Param),
            other => Err(TranslateError::InvalidExportType(other)),
        }
    }
}

/// Memory export sub-mode (CF_ALLOC_EXPORT_WORD0.TYPE for MEM_* instructions)
pub const SQ_MEM_EXPORT_WRITE: u32 = 0;
pub const SQ_MEM_EXPORT_WRITE_IND: u32 = 1;

/// A 64-bit control flow instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlowInst {
    pub word0: u32,
    pub word1: u32,
}

impl ControlFlowInst {
    pub fn new(word0: u32, word1: u32) -> Self {
        Self { word0, word1 }
    }

    pub fn cf_type(&self) -> CfType {
        match (self.word1 >> 28) & 0x3 {
            0 => CfType::Normal,
            1 => CfType::Export,
            2 => CfType::Alu,
            _ => CfType::AluExtended,
        }
    }

    pub fn opcode(&self) -> CfOpcode {
        match self.cf_type() {
            CfType::Normal | CfType::Export => CfOpcode::Inst((self.word1 >> 23) & 0x7F),
            CfType::Alu | CfType::AluExtended => CfOpcode::Alu((self.word1 >> 26) & 0xF),
        }
    }

    /// END_OF_PROGRAM (bit 21). ALU instructions have no such bit.
    pub fn end_of_program(&self) -> bool {
        match self.cf_type() {
            CfType::Normal | CfType::Export => (self.word1 >> 21) & 1 != 0,
            CfType::Alu | CfType::AluExtended => false,
        }
    }

    pub fn normal(&self) -> CfWord {
        CfWord::decode(self.word0, self.word1)
    }

    pub fn alu(&self) -> CfAluWord {
        CfAluWord::decode(self.word0, self.word1)
    }

    pub fn export_word0(&self) -> ExportWord0 {
        ExportWord0::decode(self.word0)
    }

    pub fn export_swizzle(&self) -> ExportSwizzle {
        ExportSwizzle::decode(self.word1)
    }

    pub fn export_buf(&self) -> ExportBuf {
        ExportBuf::decode(self.word1)
    }
}

/// CF_WORD0 / CF_WORD1 for normal instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfWord {
    pub addr: u32,      // word0 bits 0-31, in 64-bit units
    pub pop_count: u32, // word1 bits 0-2
    pub cf_const: u32,  // bits 3-7
    pub cond: u32,      // bits 8-9
    pub count: u32,     // bits 10-12 plus COUNT_3 at bit 19
    pub call_count: u32, // bits 13-18
}

impl CfWord {
    pub fn decode(word0: u32, word1: u32) -> Self {
        Self {
            addr: word0,
            pop_count: word1 & 0x7,
            cf_const: (word1 >> 3) & 0x1F,
            cond: (word1 >> 8) & 0x3,
            count: ((word1 >> 10) & 0x7) | (((word1 >> 19) & 1) << 3),
            call_count: (word1 >> 13) & 0x3F,
        }
    }

    /// Number of instructions in the referenced clause
    pub fn clause_len(&self) -> usize {
        self.count as usize + 1
    }
}

/// CF_ALU_WORD0 / CF_ALU_WORD1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfAluWord {
    pub addr: u32,         // word0 bits 0-21, in 64-bit units
    pub kcache_bank0: u32, // bits 22-25
    pub kcache_bank1: u32, // bits 26-29
    pub kcache_mode0: u32, // bits 30-31
    pub kcache_mode1: u32, // word1 bits 0-1
    pub kcache_addr0: u32, // bits 2-9
    pub kcache_addr1: u32, // bits 10-17
    pub count: u32,        // bits 18-24
    pub alt_const: bool,   // bit 25
}

impl CfAluWord {
    pub fn decode(word0: u32, word1: u32) -> Self {
        Self {
            addr: word0 & 0x3F_FFFF,
            kcache_bank0: (word0 >> 22) & 0xF,
            kcache_bank1: (word0 >> 26) & 0xF,
            kcache_mode0: (word0 >> 30) & 0x3,
            kcache_mode1: word1 & 0x3,
            kcache_addr0: (word1 >> 2) & 0xFF,
            kcache_addr1: (word1 >> 10) & 0xFF,
            count: (word1 >> 18) & 0x7F,
            alt_const: (word1 >> 25) & 1 != 0,
        }
    }

    /// Number of 64-bit slots in the clause, literals included
    pub fn slot_count(&self) -> usize {
        self.count as usize + 1
    }
}

/// CF_ALLOC_EXPORT_WORD0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportWord0 {
    pub array_base: u32, // bits 0-12
    pub export_type: u32, // bits 13-14
    pub rw_gpr: u32,     // bits 15-21
    pub rw_rel: bool,    // bit 22
    pub index_gpr: u32,  // bits 23-29
    pub elem_size: u32,  // bits 30-31
}

impl ExportWord0 {
    pub fn decode(val: u32) -> Self {
        Self {
            array_base: val & 0x1FFF,
            export_type: (val >> 13) & 0x3,
            rw_gpr: (val >> 15) & 0x7F,
            rw_rel: (val >> 22) & 1 != 0,
            index_gpr: (val >> 23) & 0x7F,
            elem_size: (val >> 30) & 0x3,
        }
    }
}

/// CF_ALLOC_EXPORT_WORD1_SWIZ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSwizzle {
    pub sel: [u32; 4],    // bits 0-11, 3 bits each
    pub burst_count: u32, // bits 17-20
}

impl ExportSwizzle {
    pub fn decode(val: u32) -> Self {
        Self {
            sel: [val & 0x7, (val >> 3) & 0x7, (val >> 6) & 0x7, (val >> 9) & 0x7],
            burst_count: (val >> 17) & 0xF,
        }
    }
}

/// CF_ALLOC_EXPORT_WORD1_BUF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportBuf {
    pub array_size: u32,  // bits 0-11
    pub comp_mask: u32,   // bits 12-15
    pub burst_count: u32, // bits 17-20
}

impl ExportBuf {
    pub fn decode(val: u32) -> Self {
        Self {
            array_size: val & 0xFFF,
            comp_mask: (val >> 12) & 0xF,
            burst_count: (val >> 17) & 0xF,
        }
    }
}

// ALU source selects
pub const ALU_SRC_GPR_MAX: u32 = 127;
pub const ALU_SRC_KCACHE0_BASE: u32 = 128;
pub const ALU_SRC_0: u32 = 248;
pub const ALU_SRC_1: u32 = 249;
pub const ALU_SRC_1_INT: u32 = 250;
pub const ALU_SRC_M_1_INT: u32 = 251;
pub const ALU_SRC_0_5: u32 = 252;
pub const ALU_SRC_LITERAL: u32 = 253;
pub const ALU_SRC_PV: u32 = 254;
pub const ALU_SRC_PS: u32 = 255;
pub const ALU_SRC_CONST_BASE: u32 = 256;

/// One ALU source operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluSource {
    pub sel: u32,
    pub rel: bool,
    pub chan: u32,
    pub neg: bool,
    pub abs: bool,
}

/// ALU instruction word 1 forms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluEncoding {
    Op2 { inst: u32, write_mask: bool, omod: u32 },
    Op3 { inst: u32 },
}

/// A 64-bit ALU instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluInst {
    pub src: [AluSource; 3],
    /// Number of meaningful entries in `src`
    pub src_count: usize,
    pub index_mode: u32, // word0 bits 26-28
    pub pred_sel: u32,   // word0 bits 29-30
    pub last: bool,      // word0 bit 31
    pub encoding: AluEncoding,
    pub dst_gpr: u32,    // word1 bits 21-27
    pub dst_rel: bool,   // bit 28
    pub dst_chan: u32,   // bits 29-30
    pub clamp: bool,     // bit 31
}

impl AluInst {
    pub fn decode(word0: u32, word1: u32) -> Self {
        let src0 = AluSource {
            sel: word0 & 0x1FF,
            rel: (word0 >> 9) & 1 != 0,
            chan: (word0 >> 10) & 0x3,
            neg: (word0 >> 12) & 1 != 0,
            abs: false,
        };
        let src1 = AluSource {
            sel: (word0 >> 13) & 0x1FF,
            rel: (word0 >> 22) & 1 != 0,
            chan: (word0 >> 23) & 0x3,
            neg: (word0 >> 25) & 1 != 0,
            abs: false,
        };

        let is_op3 = (word1 >> 15) & 0x7 != 0;
        let (encoding, src, src_count) = if is_op3 {
            let src2 = AluSource {
                sel: word1 & 0x1FF,
                rel: (word1 >> 9) & 1 != 0,
                chan: (word1 >> 10) & 0x3,
                neg: (word1 >> 12) & 1 != 0,
                abs: false,
            };
            (
                AluEncoding::Op3 {
                    inst: (word1 >> 13) & 0x1F,
                },
                [src0, src1, src2],
                3,
            )
        } else {
            let src0 = AluSource {
                abs: word1 & 1 != 0,
                ..src0
            };
            let src1 = AluSource {
                abs: (word1 >> 1) & 1 != 0,
                ..src1
            };
            (
                AluEncoding::Op2 {
                    inst: (word1 >> 7) & 0x7FF,
                    write_mask: (word1 >> 4) & 1 != 0,
                    omod: (word1 >> 5) & 0x3,
                },
                [src0, src1, src1],
                2,
            )
        };

        Self {
            src,
            src_count,
            index_mode: (word0 >> 26) & 0x7,
            pred_sel: (word0 >> 29) & 0x3,
            last: (word0 >> 31) & 1 != 0,
            encoding,
            dst_gpr: (word1 >> 21) & 0x7F,
            dst_rel: (word1 >> 28) & 1 != 0,
            dst_chan: (word1 >> 29) & 0x3,
            clamp: (word1 >> 31) & 1 != 0,
        }
    }

    pub fn sources(&self) -> &[AluSource] {
        &self.src[..self.src_count]
    }
}

// TEX_INST values
pub const SQ_TEX_INST_VTX_FETCH: u32 = 0x00;
pub const SQ_TEX_INST_SAMPLE: u32 = 0x10;

/// A 128-bit texture fetch instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexInst {
    pub tex_inst: u32,    // word0 bits 0-4
    pub resource_id: u32, // bits 8-15
    pub src_gpr: u32,     // bits 16-22
    pub src_rel: bool,    // bit 23
    pub dst_gpr: u32,     // word1 bits 0-6
    pub dst_rel: bool,    // bit 7
    pub dst_sel: [u32; 4], // bits 9-20
    pub sampler_id: u32,  // word2 bits 15-19
    pub src_sel: [u32; 4], // bits 20-31
}

impl TexInst {
    pub fn decode(word0: u32, word1: u32, word2: u32) -> Self {
        Self {
            tex_inst: word0 & 0x1F,
            resource_id: (word0 >> 8) & 0xFF,
            src_gpr: (word0 >> 16) & 0x7F,
            src_rel: (word0 >> 23) & 1 != 0,
            dst_gpr: word1 & 0x7F,
            dst_rel: (word1 >> 7) & 1 != 0,
            dst_sel: [
                (word1 >> 9) & 0x7,
                (word1 >> 12) & 0x7,
                (word1 >> 15) & 0x7,
                (word1 >> 18) & 0x7,
            ],
            sampler_id: (word2 >> 15) & 0x1F,
            src_sel: [
                (word2 >> 20) & 0x7,
                (word2 >> 23) & 0x7,
                (word2 >> 26) & 0x7,
                (word2 >> 29) & 0x7,
            ],
        }
    }
}

/// A 128-bit vertex fetch instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtxInst {
    pub vtx_inst: u32,         // word0 bits 0-4
    pub fetch_type: u32,       // bits 5-6
    pub buffer_id: u32,        // bits 8-15
    pub src_gpr: u32,          // bits 16-22
    pub mega_fetch_count: u32, // bits 26-31
    pub dst_gpr: u32,          // word1 bits 0-6
    pub dst_rel: bool,         // bit 7
    pub dst_sel: [u32; 4],     // bits 9-20
    pub data_format: u32,      // bits 22-27
    pub num_format_all: u32,   // bits 28-29
    pub offset: u32,           // word2 bits 0-15
    pub endian_swap: u32,      // bits 16-17
}

impl VtxInst {
    pub fn decode(word0: u32, word1: u32, word2: u32) -> Self {
        Self {
            vtx_inst: word0 & 0x1F,
            fetch_type: (word0 >> 5) & 0x3,
            buffer_id: (word0 >> 8) & 0xFF,
            src_gpr: (word0 >> 16) & 0x7F,
            mega_fetch_count: (word0 >> 26) & 0x3F,
            dst_gpr: word1 & 0x7F,
            dst_rel: (word1 >> 7) & 1 != 0,
            dst_sel: [
                (word1 >> 9) & 0x7,
                (word1 >> 12) & 0x7,
                (word1 >> 15) & 0x7,
                (word1 >> 18) & 0x7,
            ],
            data_format: (word1 >> 22) & 0x3F,
            num_format_all: (word1 >> 28) & 0x3,
            offset: word2 & 0xFFFF,
            endian_swap: (word2 >> 16) & 0x3,
        }
    }
}

/// Encoders used to build microcode in tests and tools
pub mod encode {
    use super::*;

    /// Normal CF instruction
    pub fn cf(inst: u32, addr: u32, count: u32, end_of_program: bool) -> [u32; 2] {
        let count_lo = (count & 0x7) << 10;
        let count_hi = ((count >> 3) & 1) << 19;
        [
            addr,
            (inst << 23) | count_lo | count_hi | ((end_of_program as u32) << 21),
        ]
    }

    /// ALU CF instruction; `slots` is the clause length in 64-bit slots
    pub fn cf_alu(inst: u32, addr: u32, slots: u32) -> [u32; 2] {
        [addr & 0x3F_FFFF, (inst << 26) | (((slots - 1) & 0x7F) << 18)]
    }

    /// EXP / EXP_DONE with a swizzle
    #[allow(clippy::too_many_arguments)]
    pub fn export(
        inst: u32,
        export_type: u32,
        array_base: u32,
        rw_gpr: u32,
        rw_rel: bool,
        sel: [SqSel; 4],
        burst_count: u32,
        end_of_program: bool,
    ) -> [u32; 2] {
        let word0 = (array_base & 0x1FFF)
            | ((export_type & 0x3) << 13)
            | ((rw_gpr & 0x7F) << 15)
            | ((rw_rel as u32) << 22);
        let word1 = sel[0].raw()
            | (sel[1].raw() << 3)
            | (sel[2].raw() << 6)
            | (sel[3].raw() << 9)
            | ((burst_count & 0xF) << 17)
            | ((end_of_program as u32) << 21)
            | (inst << 23);
        [word0, word1]
    }

    /// MEM_STREAMn with a component mask
    pub fn mem_stream(
        stream: u32,
        export_type: u32,
        array_base: u32,
        rw_gpr: u32,
        array_size: u32,
        comp_mask: u32,
    ) -> [u32; 2] {
        let word0 = (array_base & 0x1FFF) | ((export_type & 0x3) << 13) | ((rw_gpr & 0x7F) << 15);
        let word1 = (array_size & 0xFFF)
            | ((comp_mask & 0xF) << 12)
            | ((SQ_CF_INST_MEM_STREAM0 + stream) << 23);
        [word0, word1]
    }

    /// ALU source operand fields for word0
    pub fn alu_src(sel: u32, chan: u32, neg: bool) -> u32 {
        (sel & 0x1FF) | ((chan & 0x3) << 10) | ((neg as u32) << 12)
    }

    /// OP2 ALU instruction
    pub fn alu_op2(inst: u32, src0: u32, src1: u32, dst_gpr: u32, dst_chan: u32, write: bool, last: bool) -> [u32; 2] {
        let word0 = src0 | (src1 << 13) | ((last as u32) << 31);
        let word1 = ((write as u32) << 4) | ((inst & 0x7FF) << 7) | ((dst_gpr & 0x7F) << 21) | ((dst_chan & 0x3) << 29);
        [word0, word1]
    }

    /// OP3 ALU instruction
    pub fn alu_op3(inst: u32, src0: u32, src1: u32, src2: u32, dst_gpr: u32, dst_chan: u32, last: bool) -> [u32; 2] {
        let word0 = src0 | (src1 << 13) | ((last as u32) << 31);
        let word1 = src2 | ((inst & 0x1F) << 13) | ((dst_gpr & 0x7F) << 21) | ((dst_chan & 0x3) << 29);
        [word0, word1]
    }

    /// Vertex fetch instruction
    pub fn vtx_fetch(buffer_id: u32, src_gpr: u32, dst_gpr: u32, dst_sel: [SqSel; 4], data_format: u32, offset: u32) -> [u32; 4] {
        let word0 = ((buffer_id & 0xFF) << 8) | ((src_gpr & 0x7F) << 16);
        let word1 = (dst_gpr & 0x7F)
            | (dst_sel[0].raw() << 9)
            | (dst_sel[1].raw() << 12)
            | (dst_sel[2].raw() << 15)
            | (dst_sel[3].raw() << 18)
            | ((data_format & 0x3F) << 22);
        [word0, word1, offset & 0xFFFF, 0]
    }

    /// SAMPLE texture instruction
    pub fn tex_sample(resource_id: u32, sampler_id: u32, src_gpr: u32, dst_gpr: u32, dst_sel: [SqSel; 4]) -> [u32; 4] {
        let word0 = SQ_TEX_INST_SAMPLE | ((resource_id & 0xFF) << 8) | ((src_gpr & 0x7F) << 16);
        let word1 = (dst_gpr & 0x7F)
            | (dst_sel[0].raw() << 9)
            | (dst_sel[1].raw() << 12)
            | (dst_sel[2].raw() << 15)
            | (dst_sel[3].raw() << 18);
        let word2 = ((sampler_id & 0x1F) << 15)
            | (SqSel::X.raw() << 20)
            | (SqSel::Y.raw() << 23)
            | (SqSel::Zero.raw() << 26)
            | (SqSel::Zero.raw() << 29);
        [word0, word1, word2, 0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cf_type_and_opcode() {
        let [w0, w1] = encode::cf(SQ_CF_INST_CALL_FS, 0, 0, false);
        let cf = ControlFlowInst::new(w0, w1);
        assert_eq!(cf.cf_type(), CfType::Normal);
        assert_eq!(cf.opcode(), CfOpcode::Inst(SQ_CF_INST_CALL_FS));
        assert!(!cf.end_of_program());

        let [w0, w1] = encode::cf_alu(SQ_CF_INST_ALU, 4, 3);
        let cf = ControlFlowInst::new(w0, w1);
        assert_eq!(cf.cf_type(), CfType::Alu);
        assert_eq!(cf.opcode(), CfOpcode::Alu(SQ_CF_INST_ALU));
        assert_eq!(cf.alu().addr, 4);
        assert_eq!(cf.alu().slot_count(), 3);
    }

    #[test]
    fn test_export_fields() {
        let sel = [SqSel::X, SqSel::Mask, SqSel::Z, SqSel::One];
        let [w0, w1] = encode::export(SQ_CF_INST_EXP_DONE, 1, 60, 5, true, sel, 2, true);
        let cf = ControlFlowInst::new(w0, w1);
        assert_eq!(cf.cf_type(), CfType::Export);
        assert_eq!(cf.opcode(), CfOpcode::Inst(SQ_CF_INST_EXP_DONE));
        assert!(cf.end_of_program());

        let word0 = cf.export_word0();
        assert_eq!(word0.array_base, 60);
        assert_eq!(word0.export_type, 1);
        assert_eq!(word0.rw_gpr, 5);
        assert!(word0.rw_rel);

        let swizzle = cf.export_swizzle();
        assert_eq!(swizzle.sel, [0, 7, 2, 5]);
        assert_eq!(swizzle.burst_count, 2);
    }

    #[test]
    fn test_mem_stream_fields() {
        let [w0, w1] = encode::mem_stream(2, SQ_MEM_EXPORT_WRITE, 3, 1, 3, 0b1011);
        let cf = ControlFlowInst::new(w0, w1);
        assert_eq!(cf.opcode(), CfOpcode::Inst(SQ_CF_INST_MEM_STREAM2));
        assert_eq!(cf.export_buf().array_size, 3);
        assert_eq!(cf.export_buf().comp_mask, 0b1011);
    }

    #[test]
    fn test_sq_sel_decode() {
        assert_eq!(SqSel::decode(3).unwrap(), SqSel::W);
        assert_eq!(SqSel::decode(7).unwrap(), SqSel::Mask);
        assert!(matches!(SqSel::decode(6), Err(TranslateError::InvalidSelector(6))));
    }

    #[test]
    fn test_alu_op2_and_op3_decode() {
        let [w0, w1] = encode::alu_op2(0x00, encode::alu_src(1, 0, false), encode::alu_src(2, 1, true), 3, 2, true, true);
        let inst = AluInst::decode(w0, w1);
        assert!(matches!(inst.encoding, AluEncoding::Op2 { inst: 0, write_mask: true, .. }));
        assert_eq!(inst.sources().len(), 2);
        assert_eq!(inst.src[1].sel, 2);
        assert!(inst.src[1].neg);
        assert_eq!((inst.dst_gpr, inst.dst_chan), (3, 2));
        assert!(inst.last);

        let [w0, w1] = encode::alu_op3(0x10, encode::alu_src(1, 0, false), encode::alu_src(2, 0, false), encode::alu_src(3, 3, false), 4, 0, false);
        let inst = AluInst::decode(w0, w1);
        assert!(matches!(inst.encoding, AluEncoding::Op3 { inst: 0x10 }));
        assert_eq!(inst.sources().len(), 3);
        assert_eq!(inst.src[2].chan, 3);
        assert!(!inst.last);
    }

    #[test]
    fn test_vtx_fetch_decode() {
        let sel = [SqSel::X, SqSel::Y, SqSel::Z, SqSel::One];
        let [w0, w1, w2, _] = encode::vtx_fetch(160, 0, 1, sel, 0x23, 12);
        let inst = VtxInst::decode(w0, w1, w2);
        assert_eq!(inst.buffer_id, 160);
        assert_eq!(inst.dst_gpr, 1);
        assert_eq!(inst.dst_sel, [0, 1, 2, 5]);
        assert_eq!(inst.data_format, 0x23);
        assert_eq!(inst.offset, 12);
    }

    #[test]
    fn test_cf_clause_count() {
        let [w0, w1] = encode::cf(SQ_CF_INST_VTX, 2, 9, false);
        let word = ControlFlowInst::new(w0, w1).normal();
        assert_eq!(word.count, 9);
        assert_eq!(word.clause_len(), 10);
        assert_eq!(word.addr, 2);
    }
}
