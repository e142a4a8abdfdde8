//! Control flow walk and clause extraction
//!
//! Programs are addressed in 64-bit slots. Control flow starts at slot 0;
//! clause addresses in CF words are slot indices into the same program.

use super::instructions::*;
use super::{ShaderType, TranslateError};

/// Maximum instructions in an ALU group (x, y, z, w, t)
pub const MAX_GROUP_SIZE: usize = 5;

/// Collect control flow instructions up to and including the terminating one
pub fn control_flow(program: &[u32], shader_type: ShaderType) -> Result<Vec<ControlFlowInst>, TranslateError> {
    let mut instructions = Vec::new();

    for pair in program.chunks_exact(2) {
        let cf = ControlFlowInst::new(pair[0], pair[1]);
        instructions.push(cf);

        if cf.end_of_program() {
            return Ok(instructions);
        }
        if shader_type == ShaderType::Fetch && cf.opcode() == CfOpcode::Inst(SQ_CF_INST_RETURN) {
            return Ok(instructions);
        }
    }

    Err(TranslateError::MissingEndOfProgram)
}

/// Words of `slots` 64-bit slots starting at slot `addr`
pub fn clause_slots<'a>(
    program: &'a [u32],
    addr: u32,
    slots: usize,
    what: &'static str,
) -> Result<&'a [u32], TranslateError> {
    let start = addr as usize * 2;
    let end = start + slots * 2;
    program.get(start..end).ok_or(TranslateError::ProgramOverrun {
        what,
        slot: addr as usize,
        len: program.len(),
    })
}

/// One ALU instruction group and the literals following it
#[derive(Debug, Clone, PartialEq)]
pub struct AluGroup {
    pub insts: Vec<AluInst>,
    pub literals: [u32; 4],
}

impl AluGroup {
    pub fn literal(&self, chan: u32) -> u32 {
        self.literals[(chan & 0x3) as usize]
    }
}

/// Split an ALU clause into instruction groups
pub fn alu_groups(clause: &[u32]) -> Result<Vec<AluGroup>, TranslateError> {
    let slots = clause.len() / 2;
    let mut groups = Vec::new();
    let mut insts = Vec::with_capacity(MAX_GROUP_SIZE);
    let mut slot = 0;

    while slot < slots {
        let inst = AluInst::decode(clause[slot * 2], clause[slot * 2 + 1]);
        slot += 1;
        insts.push(inst);

        if insts.len() > MAX_GROUP_SIZE {
            return Err(TranslateError::UnsupportedAlu(format!(
                "group of more than {} instructions",
                MAX_GROUP_SIZE
            )));
        }

        if !inst.last {
            continue;
        }

        let literal_words = literal_count(&insts);
        let mut literals = [0u32; 4];
        if literal_words > 0 {
            let words = clause
                .get(slot * 2..slot * 2 + literal_words)
                .ok_or(TranslateError::ProgramOverrun {
                    what: "ALU literals",
                    slot,
                    len: clause.len(),
                })?;
            literals[..literal_words].copy_from_slice(words);
            slot += literal_words / 2;
        }

        groups.push(AluGroup {
            insts: std::mem::take(&mut insts),
            literals,
        });
    }

    if !insts.is_empty() {
        return Err(TranslateError::ProgramOverrun {
            what: "ALU group",
            slot,
            len: clause.len(),
        });
    }

    Ok(groups)
}

/// Literal words used by a group, rounded up to whole slots
fn literal_count(insts: &[AluInst]) -> usize {
    let highest = insts
        .iter()
        .flat_map(|inst| inst.sources().iter())
        .filter(|src| src.sel == ALU_SRC_LITERAL)
        .map(|src| src.chan as usize + 1)
        .max()
        .unwrap_or(0);
    (highest + 1) & !1
}

/// Decode the texture clause referenced by `cf`
pub fn tex_clause(program: &[u32], cf: &CfWord) -> Result<Vec<TexInst>, TranslateError> {
    let words = clause_slots(program, cf.addr, cf.clause_len() * 2, "TEX clause")?;
    Ok(words
        .chunks_exact(4)
        .map(|w| TexInst::decode(w[0], w[1], w[2]))
        .collect())
}

/// Decode the vertex fetch clause referenced by `cf`
pub fn vtx_clause(program: &[u32], cf: &CfWord) -> Result<Vec<VtxInst>, TranslateError> {
    let words = clause_slots(program, cf.addr, cf.clause_len() * 2, "VTX clause")?;
    Ok(words
        .chunks_exact(4)
        .map(|w| VtxInst::decode(w[0], w[1], w[2]))
        .collect())
}
