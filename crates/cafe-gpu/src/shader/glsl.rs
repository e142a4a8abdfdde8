//! Whole-program GLSL assembly
//!
//! Wraps a translated body with the declarations it needs: the constant
//! file, vertex inputs from the fetch layout, samplers, exports and feedback
//! outputs, and the postamble copying exports to stage outputs.

use std::collections::BTreeSet;
use std::fmt::Write;

use super::export::{ExportDescriptor, FeedbackDescriptor};
use super::fetch::FetchShader;
use super::instructions::ExportType;
use super::translate::TranslatedShader;

/// Registers in the general purpose register file
pub const NUM_GPRS: usize = 128;

/// vec4 entries in the constant file
pub const NUM_CONSTANTS: usize = 256;

fn header(out: &mut String, feedback: bool) {
    let _ = writeln!(out, "#version 420 core");
    if feedback {
        let _ = writeln!(out, "#extension GL_ARB_enhanced_layouts : require");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "uniform vec4 VC[{}];", NUM_CONSTANTS);
}

fn samplers(out: &mut String, shader: &TranslatedShader) {
    for id in &shader.samplers {
        let _ = writeln!(out, "layout(binding = {id}) uniform sampler2D sampler_{id};");
    }
}

fn value_type(size: u32) -> String {
    match size {
        1 => "float".to_string(),
        n => format!("vec{}", n),
    }
}

fn feedback_outputs(out: &mut String, feedbacks: &[&FeedbackDescriptor]) {
    for feedback in feedbacks {
        let _ = writeln!(
            out,
            "layout(xfb_buffer = {}, xfb_offset = {}) out {} {};",
            feedback.stream,
            feedback.offset,
            value_type(feedback.size),
            feedback.name()
        );
    }
}

/// Unique export ids of one type, in order
fn export_ids(exports: &[ExportDescriptor], export_type: ExportType) -> BTreeSet<u32> {
    exports
        .iter()
        .filter(|export| export.export_type == export_type)
        .map(|export| export.id)
        .collect()
}

fn export_local(export_type: ExportType, id: u32) -> String {
    match export_type {
        ExportType::Position => format!("exp_position_{}", id),
        ExportType::Param => format!("exp_param_{}", id),
        ExportType::Pixel => format!("exp_pixel_{}", id),
    }
}

fn locals(out: &mut String, shader: &TranslatedShader) {
    let _ = writeln!(out, "    vec4 R[{}];", NUM_GPRS);
    let _ = writeln!(out, "    vec4 PV;");
    let _ = writeln!(out, "    float PS;");
    let _ = writeln!(out, "    int AL = 0;");
    let _ = writeln!(out, "    vec4 texTmp;");

    let declared: BTreeSet<&ExportDescriptor> = shader.exports.iter().collect();
    for export in declared {
        let _ = writeln!(out, "    vec4 {};", export_local(export.export_type, export.id));
    }
}

/// Assemble a vertex program
pub fn vertex_program(shader: &TranslatedShader, fetch: &FetchShader) -> String {
    let feedbacks: Vec<&FeedbackDescriptor> = shader.all_feedbacks().collect();
    let params = export_ids(&shader.exports, ExportType::Param);
    let positions = export_ids(&shader.exports, ExportType::Position);
    let mut out = String::new();

    header(&mut out, !feedbacks.is_empty());
    samplers(&mut out, shader);
    let _ = writeln!(out);

    for attribute in &fetch.attributes {
        let _ = writeln!(
            out,
            "layout(location = {}) in vec4 {};",
            attribute.index,
            attribute.input_name()
        );
    }
    for id in &params {
        let _ = writeln!(out, "layout(location = {id}) out vec4 vs_param_{id};");
    }
    feedback_outputs(&mut out, &feedbacks);
    let _ = writeln!(out);
    let _ = writeln!(out, "out gl_PerVertex {{");
    let _ = writeln!(out, "    vec4 gl_Position;");
    let _ = writeln!(out, "}};");
    let _ = writeln!(out);

    let _ = writeln!(out, "void main()");
    let _ = writeln!(out, "{{");
    locals(&mut out, shader);
    let _ = writeln!(
        out,
        "    R[0] = vec4(intBitsToFloat(gl_VertexID), intBitsToFloat(gl_InstanceID), 0.0, 0.0);"
    );
    out.push_str(&shader.body);

    if positions.contains(&0) {
        let _ = writeln!(out, "    gl_Position = exp_position_0;");
    }
    for id in &params {
        let _ = writeln!(out, "    vs_param_{id} = exp_param_{id};");
    }
    let _ = writeln!(out, "}}");
    out
}

/// Assemble a pixel program reading `num_interp` interpolated parameters
pub fn pixel_program(shader: &TranslatedShader, num_interp: u32) -> String {
    let colors = export_ids(&shader.exports, ExportType::Pixel);
    let mut out = String::new();

    header(&mut out, false);
    samplers(&mut out, shader);
    let _ = writeln!(out);

    for i in 0..num_interp {
        let _ = writeln!(out, "layout(location = {i}) in vec4 ps_param_{i};");
    }
    for id in &colors {
        let _ = writeln!(out, "layout(location = {id}) out vec4 ps_color_{id};");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "void main()");
    let _ = writeln!(out, "{{");
    locals(&mut out, shader);
    for i in 0..num_interp {
        let _ = writeln!(out, "    R[{i}] = ps_param_{i};");
    }
    out.push_str(&shader.body);

    for id in &colors {
        let _ = writeln!(out, "    ps_color_{id} = exp_pixel_{id};");
    }
    let _ = writeln!(out, "}}");
    out
}
