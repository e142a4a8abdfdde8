//! Fetch shader parsing
//!
//! The fetch shader is never translated. Its vertex fetch instructions are
//! read into an attribute layout, and the vertex shader's CALL_FS becomes a
//! series of loads from the matching vertex inputs.

use super::decode;
use super::export::{condense, decode_sels, render_vector};
use super::instructions::*;
use super::translate::State;
use super::{ShaderType, TranslateError};

/// One vertex attribute read by the fetch shader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchAttribute {
    /// Vertex input location
    pub index: u32,
    pub buffer_id: u32,
    /// Byte offset within a vertex
    pub offset: u32,
    pub data_format: u32,
    pub dst_gpr: u32,
    pub dst_sel: [SqSel; 4],
}

impl FetchAttribute {
    /// GLSL vertex input name
    pub fn input_name(&self) -> String {
        format!("fs_attr_{}", self.index)
    }
}

/// Attribute layout of a fetch shader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchShader {
    pub attributes: Vec<FetchAttribute>,
}

/// Parse the attribute layout out of a fetch shader program
pub fn parse_fetch_shader(program: &[u32]) -> Result<FetchShader, TranslateError> {
    let mut shader = FetchShader::default();

    for cf in decode::control_flow(program, ShaderType::Fetch)? {
        match cf.opcode() {
            CfOpcode::Inst(SQ_CF_INST_NOP) | CfOpcode::Inst(SQ_CF_INST_RETURN) => {}
            CfOpcode::Inst(SQ_CF_INST_VTX) | CfOpcode::Inst(SQ_CF_INST_VTX_TC) => {
                for inst in decode::vtx_clause(program, &cf.normal())? {
                    if inst.vtx_inst != SQ_TEX_INST_VTX_FETCH {
                        return Err(TranslateError::UnsupportedCf(format!(
                            "VTX_INST 0x{:02X}",
                            inst.vtx_inst
                        )));
                    }

                    let index = shader.attributes.len() as u32;
                    shader.attributes.push(FetchAttribute {
                        index,
                        buffer_id: inst.buffer_id,
                        offset: inst.offset,
                        data_format: inst.data_format,
                        dst_gpr: inst.dst_gpr,
                        dst_sel: decode_sels(inst.dst_sel)?,
                    });
                }
            }
            other => {
                return Err(TranslateError::WrongShaderType(other.name(), ShaderType::Fetch));
            }
        }
    }

    Ok(shader)
}

/// Expand CALL_FS into register loads from the vertex inputs
pub fn insert_fetch_loads(state: &mut State<'_>) -> Result<(), TranslateError> {
    let Some(fetch) = state.fetch else {
        tracing::warn!("CALL_FS without a fetch shader layout");
        return Ok(());
    };

    for attribute in &fetch.attributes {
        let selection = condense(attribute.dst_sel);
        if selection.is_empty() {
            continue;
        }

        let value = render_vector(&attribute.input_name(), &selection.sels)?;
        state.line(&format!("R[{}].{} = {};", attribute.dst_gpr, selection.mask, value));
    }

    Ok(())
}
