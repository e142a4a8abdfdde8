//! Control flow dispatch
//!
//! `translate_shader` walks the control flow program and hands each
//! instruction to the handler registered for its opcode. Handlers append GLSL
//! statements to `State::out` and register export and feedback descriptors.

use super::decode;
use super::export::{ExportDescriptor, FeedbackDescriptor};
use super::fetch::FetchShader;
use super::instructions::*;
use super::{alu, export, fetch, tex, ShaderType, TranslateError};
use std::collections::BTreeSet;

/// Number of transform feedback streams
pub const NUM_FEEDBACK_STREAMS: usize = 4;

const INDENT: &str = "    ";

/// Translation state for one shader
pub struct State<'a> {
    pub shader_type: ShaderType,
    /// Whole program, control flow and clauses
    pub program: &'a [u32],
    /// Attribute layout for vertex shaders
    pub fetch: Option<&'a FetchShader>,
    pub out: String,
    indent: usize,
    pub exports: Vec<ExportDescriptor>,
    pub feedbacks: [Vec<FeedbackDescriptor>; NUM_FEEDBACK_STREAMS],
    /// Texture resources sampled by the program
    pub samplers: BTreeSet<u32>,
    /// Index of the control flow instruction being translated
    pub cf_index: usize,
}

impl<'a> State<'a> {
    pub fn new(shader_type: ShaderType, program: &'a [u32], fetch: Option<&'a FetchShader>) -> Self {
        Self {
            shader_type,
            program,
            fetch,
            out: String::new(),
            indent: 1,
            exports: Vec::new(),
            feedbacks: Default::default(),
            samplers: BTreeSet::new(),
            cf_index: 0,
        }
    }

    /// Append one statement at the current indentation
    pub fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn push_indent(&mut self) {
        self.indent += 1;
    }

    pub fn pop_indent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    fn finish(self) -> TranslatedShader {
        TranslatedShader {
            shader_type: self.shader_type,
            body: self.out,
            exports: self.exports,
            feedbacks: self.feedbacks,
            samplers: self.samplers,
        }
    }
}

/// Result of translating one shader program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedShader {
    pub shader_type: ShaderType,
    /// Statements making up the body of `main`
    pub body: String,
    pub exports: Vec<ExportDescriptor>,
    pub feedbacks: [Vec<FeedbackDescriptor>; NUM_FEEDBACK_STREAMS],
    pub samplers: BTreeSet<u32>,
}

impl TranslatedShader {
    /// All feedback descriptors across streams
    pub fn all_feedbacks(&self) -> impl Iterator<Item = &FeedbackDescriptor> {
        self.feedbacks.iter().flatten()
    }
}

/// Control flow instruction handler
pub type CfHandler = fn(&mut State<'_>, &ControlFlowInst) -> Result<(), TranslateError>;

const CF_HANDLERS: &[(CfOpcode, CfHandler)] = &[
    (CfOpcode::Inst(SQ_CF_INST_NOP), cf_nop),
    (CfOpcode::Inst(SQ_CF_INST_CALL_FS), cf_call_fs),
    (CfOpcode::Inst(SQ_CF_INST_RETURN), cf_nop),
    (CfOpcode::Inst(SQ_CF_INST_TEX), tex::translate_clause),
    (CfOpcode::Inst(SQ_CF_INST_EXP), export::exp),
    (CfOpcode::Inst(SQ_CF_INST_EXP_DONE), export::exp),
    (CfOpcode::Inst(SQ_CF_INST_MEM_STREAM0), export::mem_stream),
    (CfOpcode::Inst(SQ_CF_INST_MEM_STREAM1), export::mem_stream),
    (CfOpcode::Inst(SQ_CF_INST_MEM_STREAM2), export::mem_stream),
    (CfOpcode::Inst(SQ_CF_INST_MEM_STREAM3), export::mem_stream),
    (CfOpcode::Alu(SQ_CF_INST_ALU), alu::translate_clause),
];

/// Handler registered for a control flow opcode
pub fn lookup_cf(opcode: CfOpcode) -> Option<CfHandler> {
    CF_HANDLERS
        .iter()
        .find(|(key, _)| *key == opcode)
        .map(|(_, handler)| *handler)
}

fn cf_nop(_state: &mut State<'_>, _cf: &ControlFlowInst) -> Result<(), TranslateError> {
    Ok(())
}

fn cf_call_fs(state: &mut State<'_>, cf: &ControlFlowInst) -> Result<(), TranslateError> {
    if state.shader_type != ShaderType::Vertex {
        return Err(TranslateError::WrongShaderType(
            cf.opcode().name(),
            state.shader_type,
        ));
    }
    fetch::insert_fetch_loads(state)
}

/// Translate a vertex or pixel shader program.
///
/// Vertex shaders take the attribute layout parsed from their fetch shader.
pub fn translate_shader(
    shader_type: ShaderType,
    program: &[u32],
    fetch: Option<&FetchShader>,
) -> Result<TranslatedShader, TranslateError> {
    let control_flow = decode::control_flow(program, shader_type)?;
    let mut state = State::new(shader_type, program, fetch);

    for (index, cf) in control_flow.iter().enumerate() {
        state.cf_index = index;
        let opcode = cf.opcode();
        let handler = lookup_cf(opcode).ok_or_else(|| TranslateError::UnsupportedCf(opcode.name()))?;
        handler(&mut state, cf)?;
    }

    Ok(state.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::instructions::encode;

    fn program(parts: &[&[u32]]) -> Vec<u32> {
        parts.iter().flat_map(|p| p.iter().copied()).collect()
    }

    #[test]
    fn test_lookup_table() {
        assert!(lookup_cf(CfOpcode::Inst(SQ_CF_INST_EXP)).is_some());
        assert!(lookup_cf(CfOpcode::Inst(SQ_CF_INST_MEM_SCRATCH)).is_none());
        assert!(lookup_cf(CfOpcode::Inst(SQ_CF_INST_MEM_RING)).is_none());
        assert!(lookup_cf(CfOpcode::Alu(SQ_CF_INST_ALU_PUSH_BEFORE)).is_none());
    }

    #[test]
    fn test_translate_pixel_export() {
        let sel = [SqSel::X, SqSel::Y, SqSel::Z, SqSel::W];
        let words = program(&[&encode::export(SQ_CF_INST_EXP_DONE, 0, 0, 0, false, sel, 0, true)]);
        let shader = translate_shader(ShaderType::Pixel, &words, None).unwrap();
        assert_eq!(shader.body, "    exp_pixel_0.xyzw = R[0].xyzw;\n");
        assert_eq!(shader.exports.len(), 1);
    }

    #[test]
    fn test_unsupported_memory_export_aborts() {
        let words = program(&[&encode::cf(SQ_CF_INST_MEM_RING, 0, 0, true)]);
        let err = translate_shader(ShaderType::Vertex, &words, None).unwrap_err();
        assert_eq!(err, TranslateError::UnsupportedCf("MEM_RING".to_string()));
    }

    #[test]
    fn test_call_fs_rejected_in_pixel_shader() {
        let words = program(&[&encode::cf(SQ_CF_INST_CALL_FS, 0, 0, true)]);
        assert!(matches!(
            translate_shader(ShaderType::Pixel, &words, None),
            Err(TranslateError::WrongShaderType(_, ShaderType::Pixel))
        ));
    }
}
