//! Export and streamed (transform feedback) export translation
//!
//! Both families write a selection of a source register's components to a
//! named output. The selection algebra is shared with the texture and fetch
//! translators: four per-component selectors are condensed by dropping masked
//! components, then rendered as a scalar, a swizzle or a vector constructor.

use super::instructions::*;
use super::translate::State;
use super::TranslateError;

/// Position exports start at this array base
pub const POSITION_ARRAY_BASE: u32 = 60;

/// Output written by an EXP instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExportDescriptor {
    pub export_type: ExportType,
    /// Output index; position exports are renumbered from 0
    pub id: u32,
}

/// Output written by a MEM_STREAM instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedbackDescriptor {
    pub stream: u32,
    /// Byte offset within the stream
    pub offset: u32,
    /// Component count
    pub size: u32,
}

impl FeedbackDescriptor {
    /// GLSL output variable name
    pub fn name(&self) -> String {
        format!("feedback_{}_{}", self.stream, self.offset)
    }
}

/// A condensed selection: destination letters and the matching selectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Destination component letters that survived, in order
    pub mask: String,
    /// Selectors for those components, never `Mask`
    pub sels: Vec<SqSel>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.sels.is_empty()
    }
}

const COMPONENTS: [char; 4] = ['x', 'y', 'z', 'w'];

/// Drop masked selectors, keeping survivors in their original order
pub fn condense(sels: [SqSel; 4]) -> Selection {
    let mut selection = Selection {
        mask: String::with_capacity(4),
        sels: Vec::with_capacity(4),
    };

    for (letter, sel) in COMPONENTS.iter().zip(sels) {
        if sel != SqSel::Mask {
            selection.mask.push(*letter);
            selection.sels.push(sel);
        }
    }

    selection
}

/// Decode four raw selector fields
pub fn decode_sels(raw: [u32; 4]) -> Result<[SqSel; 4], TranslateError> {
    Ok([
        SqSel::decode(raw[0])?,
        SqSel::decode(raw[1])?,
        SqSel::decode(raw[2])?,
        SqSel::decode(raw[3])?,
    ])
}

/// Render a single selected value
pub fn render_value(src: &str, sel: SqSel) -> Result<String, TranslateError> {
    match sel {
        SqSel::X | SqSel::Y | SqSel::Z | SqSel::W => {
            let letter = sel.component().unwrap_or('x');
            Ok(format!("{}.{}", src, letter))
        }
        SqSel::Zero => Ok("0.0".to_string()),
        SqSel::One => Ok("1.0".to_string()),
        // Masked components are removed by `condense` before rendering
        SqSel::Mask => Err(TranslateError::InvalidSelector(SqSel::Mask.raw())),
    }
}

/// Render a condensed selection of `src`.
///
/// One selector renders as a scalar, plain components as a swizzle, and
/// anything containing a constant as a `vecN` constructor.
pub fn render_vector(src: &str, sels: &[SqSel]) -> Result<String, TranslateError> {
    match sels.len() {
        0 => Err(TranslateError::InvalidSelector(SqSel::Mask.raw())),
        1 => render_value(src, sels[0]),
        n => {
            let swizzle: Option<String> = sels.iter().map(|sel| sel.component()).collect();
            if let Some(swizzle) = swizzle {
                return Ok(format!("{}.{}", src, swizzle));
            }

            let values = sels
                .iter()
                .map(|sel| render_value(src, *sel))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("vec{}({})", n, values.join(", ")))
        }
    }
}

/// Render the components of `src` enabled in a 4-bit component mask
pub fn render_mask_vector(src: &str, mask: u32) -> Result<String, TranslateError> {
    let pick = |bit: u32, sel: SqSel| if mask & (1 << bit) != 0 { sel } else { SqSel::Mask };
    let selection = condense([
        pick(0, SqSel::X),
        pick(1, SqSel::Y),
        pick(2, SqSel::Z),
        pick(3, SqSel::W),
    ]);
    render_vector(src, &selection.sels)
}

/// Source register, with relative addressing left symbolic
pub fn export_register(gpr: u32, rel: bool) -> String {
    if rel {
        format!("R[{} + AL]", gpr)
    } else {
        format!("R[{}]", gpr)
    }
}

fn output_name(export_type: ExportType, out_index: u32) -> Result<String, TranslateError> {
    Ok(match export_type {
        ExportType::Position => {
            let id = out_index
                .checked_sub(POSITION_ARRAY_BASE)
                .ok_or(TranslateError::InvalidPositionIndex(out_index))?;
            format!("exp_position_{}", id)
        }
        ExportType::Param => format!("exp_param_{}", out_index),
        ExportType::Pixel => format!("exp_pixel_{}", out_index),
    })
}

fn register_export(state: &mut State<'_>, export_type: ExportType, out_index: u32) {
    let id = match export_type {
        ExportType::Position => out_index - POSITION_ARRAY_BASE,
        _ => out_index,
    };
    state.exports.push(ExportDescriptor { export_type, id });
}

/// EXP / EXP_DONE
pub fn exp(state: &mut State<'_>, cf: &ControlFlowInst) -> Result<(), TranslateError> {
    let word0 = cf.export_word0();
    let swizzle = cf.export_swizzle();
    let sels = decode_sels(swizzle.sel)?;

    if sels.iter().all(|sel| *sel == SqSel::Mask) {
        tracing::warn!("Unusual shader with a fully masked export");
        return Ok(());
    }

    let export_type = ExportType::decode(word0.export_type)?;
    let selection = condense(sels);

    for i in 0..=swizzle.burst_count {
        let out_index = word0.array_base + i;
        let name = output_name(export_type, out_index)?;
        let src = export_register(word0.rw_gpr + i, word0.rw_rel);
        let value = render_vector(&src, &selection.sels)?;

        register_export(state, export_type, out_index);
        state.line(&format!("{}.{} = {};", name, selection.mask, value));
    }

    Ok(())
}

/// MEM_STREAM0..3
pub fn mem_stream(state: &mut State<'_>, cf: &ControlFlowInst) -> Result<(), TranslateError> {
    let stream = match cf.opcode() {
        CfOpcode::Inst(inst) => inst - SQ_CF_INST_MEM_STREAM0,
        other => return Err(TranslateError::UnsupportedCf(other.name())),
    };
    let word0 = cf.export_word0();
    let buf = cf.export_buf();
    let offset = word0.array_base * 4;
    let array_size = buf.array_size + 1;
    let src = export_register(word0.rw_gpr, word0.rw_rel);

    match word0.export_type {
        SQ_MEM_EXPORT_WRITE => {}
        SQ_MEM_EXPORT_WRITE_IND => return Err(TranslateError::WriteIndUnsupported(stream)),
        export_type => return Err(TranslateError::InvalidMemExportType { stream, export_type }),
    }

    if array_size > 4 {
        return Err(TranslateError::FeedbackTooLarge { stream, size: array_size });
    }

    if buf.comp_mask == 0 {
        tracing::warn!("MEM_STREAM{} with an empty component mask", stream);
        return Ok(());
    }

    // Declared width follows the written components, not the array size
    let value = render_mask_vector(&src, buf.comp_mask)?;
    let size = buf.comp_mask.count_ones();
    let feedback = FeedbackDescriptor { stream, offset, size };
    state.feedbacks[stream as usize].push(feedback);
    state.line(&format!("{} = {};", feedback.name(), value));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::instructions::encode;
    use crate::shader::ShaderType;

    fn run(handler: fn(&mut State<'_>, &ControlFlowInst) -> Result<(), TranslateError>, words: [u32; 2]) -> Result<State<'static>, TranslateError> {
        let mut state = State::new(ShaderType::Vertex, &[], None);
        handler(&mut state, &ControlFlowInst::new(words[0], words[1]))?;
        Ok(state)
    }

    #[test]
    fn test_condense_drops_masked_components() {
        let selection = condense([SqSel::X, SqSel::Mask, SqSel::Z, SqSel::Mask]);
        assert_eq!(selection.mask, "xz");
        assert_eq!(selection.sels, vec![SqSel::X, SqSel::Z]);
        assert_eq!(render_vector("R[1]", &selection.sels).unwrap(), "R[1].xz");
    }

    #[test]
    fn test_constants_render_constructor() {
        let selection = condense([SqSel::Zero, SqSel::One, SqSel::Y, SqSel::Mask]);
        assert_eq!(selection.mask, "xyz");
        assert_eq!(
            render_vector("R[0]", &selection.sels).unwrap(),
            "vec3(0.0, 1.0, R[0].y)"
        );
    }

    #[test]
    fn test_single_selection_is_scalar() {
        let selection = condense([SqSel::Mask, SqSel::Mask, SqSel::W, SqSel::Mask]);
        assert_eq!(selection.mask, "z");
        assert_eq!(render_vector("R[2]", &selection.sels).unwrap(), "R[2].w");
        assert_eq!(render_vector("R[2]", &[SqSel::One]).unwrap(), "1.0");
    }

    #[test]
    fn test_swizzle_keeps_source_order() {
        let selection = condense([SqSel::W, SqSel::Z, SqSel::Y, SqSel::X]);
        assert_eq!(render_vector("R[0]", &selection.sels).unwrap(), "R[0].wzyx");
    }

    #[test]
    fn test_fully_masked_export_emits_nothing() {
        let sel = [SqSel::Mask; 4];
        let state = run(exp, encode::export(SQ_CF_INST_EXP, 2, 0, 1, false, sel, 0, false)).unwrap();
        assert!(state.out.is_empty());
        assert!(state.exports.is_empty());
    }

    #[test]
    fn test_position_export_renumbered() {
        let sel = [SqSel::X, SqSel::Y, SqSel::Z, SqSel::W];
        let state = run(exp, encode::export(SQ_CF_INST_EXP_DONE, 1, 60, 3, false, sel, 0, false)).unwrap();
        assert_eq!(state.out, "    exp_position_0.xyzw = R[3].xyzw;\n");
        assert_eq!(
            state.exports,
            vec![ExportDescriptor {
                export_type: ExportType::Position,
                id: 0
            }]
        );
    }

    #[test]
    fn test_burst_export_expands() {
        let sel = [SqSel::X, SqSel::Y, SqSel::Mask, SqSel::Mask];
        let state = run(exp, encode::export(SQ_CF_INST_EXP, 2, 4, 7, false, sel, 1, false)).unwrap();
        assert_eq!(
            state.out,
            "    exp_param_4.xy = R[7].xy;\n    exp_param_5.xy = R[8].xy;\n"
        );
        assert_eq!(state.exports.len(), 2);
        assert_eq!(state.exports[1].id, 5);
    }

    #[test]
    fn test_relative_source_is_symbolic() {
        let sel = [SqSel::X, SqSel::Mask, SqSel::Mask, SqSel::Mask];
        let state = run(exp, encode::export(SQ_CF_INST_EXP, 0, 1, 2, true, sel, 0, false)).unwrap();
        assert_eq!(state.out, "    exp_pixel_1.x = R[2 + AL].x;\n");
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let [w0, w1] = encode::export(SQ_CF_INST_EXP, 2, 0, 0, false, [SqSel::X; 4], 0, false);
        // SEL_Y field = 6
        let w1 = (w1 & !(0x7 << 3)) | (6 << 3);
        assert!(matches!(run(exp, [w0, w1]), Err(TranslateError::InvalidSelector(6))));
    }

    #[test]
    fn test_position_below_base_rejected() {
        let sel = [SqSel::X; 4];
        assert!(matches!(
            run(exp, encode::export(SQ_CF_INST_EXP, 1, 10, 0, false, sel, 0, false)),
            Err(TranslateError::InvalidPositionIndex(10))
        ));
    }

    #[test]
    fn test_mem_stream_write() {
        let state = run(mem_stream, encode::mem_stream(1, SQ_MEM_EXPORT_WRITE, 2, 4, 2, 0b0111)).unwrap();
        assert_eq!(state.out, "    feedback_1_8 = R[4].xyz;\n");
        assert_eq!(
            state.feedbacks[1],
            vec![FeedbackDescriptor {
                stream: 1,
                offset: 8,
                size: 3
            }]
        );
    }

    #[test]
    fn test_mem_stream_sparse_mask() {
        let state = run(mem_stream, encode::mem_stream(0, SQ_MEM_EXPORT_WRITE, 0, 1, 1, 0b1001)).unwrap();
        assert_eq!(state.out, "    feedback_0_0 = R[1].xw;\n");
        assert_eq!(state.feedbacks[0][0].size, 2);
    }

    #[test]
    fn test_mem_stream_width_follows_mask() {
        // Four-component array, only xy written
        let state = run(mem_stream, encode::mem_stream(0, SQ_MEM_EXPORT_WRITE, 0, 2, 3, 0b0011)).unwrap();
        assert_eq!(state.out, "    feedback_0_0 = R[2].xy;\n");
        assert_eq!(
            state.feedbacks[0],
            vec![FeedbackDescriptor {
                stream: 0,
                offset: 0,
                size: 2
            }]
        );
    }

    #[test]
    fn test_mem_stream_write_ind_rejected() {
        assert_eq!(
            run(mem_stream, encode::mem_stream(3, SQ_MEM_EXPORT_WRITE_IND, 0, 0, 0, 0xF)).err(),
            Some(TranslateError::WriteIndUnsupported(3))
        );
        assert_eq!(
            run(mem_stream, encode::mem_stream(0, 2, 0, 0, 0, 0xF)).err(),
            Some(TranslateError::InvalidMemExportType { stream: 0, export_type: 2 })
        );
    }

    #[test]
    fn test_mem_stream_oversized_rejected() {
        assert_eq!(
            run(mem_stream, encode::mem_stream(2, SQ_MEM_EXPORT_WRITE, 0, 0, 4, 0xF)).err(),
            Some(TranslateError::FeedbackTooLarge { stream: 2, size: 5 })
        );
    }
}
