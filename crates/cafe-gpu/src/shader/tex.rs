//! Texture clause translation

use super::decode;
use super::export::{condense, decode_sels, export_register, render_vector};
use super::instructions::*;
use super::translate::State;
use super::TranslateError;

/// CF_INST_TEX
pub fn translate_clause(state: &mut State<'_>, cf: &ControlFlowInst) -> Result<(), TranslateError> {
    let program = state.program;
    for inst in decode::tex_clause(program, &cf.normal())? {
        translate_tex(state, &inst)?;
    }
    Ok(())
}

fn translate_tex(state: &mut State<'_>, inst: &TexInst) -> Result<(), TranslateError> {
    if inst.tex_inst != SQ_TEX_INST_SAMPLE {
        return Err(TranslateError::UnsupportedTex(inst.tex_inst));
    }

    let src_sels = decode_sels(inst.src_sel)?;
    let dst = condense(decode_sels(inst.dst_sel)?);
    if dst.is_empty() {
        tracing::debug!("Texture sample from resource {} writes nothing", inst.resource_id);
        return Ok(());
    }

    // 2D samplers read the first two source components
    let src = export_register(inst.src_gpr, inst.src_rel);
    let coords = render_vector(&src, &src_sels[..2])?;
    state.samplers.insert(inst.resource_id);
    state.line(&format!(
        "texTmp = texture(sampler_{}, {});",
        inst.resource_id, coords
    ));

    let dst_reg = export_register(inst.dst_gpr, inst.dst_rel);
    let value = render_vector("texTmp", &dst.sels)?;
    state.line(&format!("{}.{} = {};", dst_reg, dst.mask, value));
    Ok(())
}
