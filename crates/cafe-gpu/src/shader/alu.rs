//! ALU clause translation
//!
//! Each instruction group becomes one GLSL block. Results are computed into
//! per-unit temporaries first so that every instruction in the group reads
//! the register file as it was before the group, then written back to `R[]`
//! and finally to `PV`/`PS` for the next group.

use super::decode::{self, AluGroup};
use super::instructions::*;
use super::translate::State;
use super::TranslateError;

/// ALU execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Unit {
    X,
    Y,
    Z,
    W,
    T,
}

impl Unit {
    fn from_chan(chan: u32) -> Self {
        match chan & 0x3 {
            0 => Unit::X,
            1 => Unit::Y,
            2 => Unit::Z,
            _ => Unit::W,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn temp(self) -> &'static str {
        match self {
            Unit::X => "alu_x",
            Unit::Y => "alu_y",
            Unit::Z => "alu_z",
            Unit::W => "alu_w",
            Unit::T => "alu_t",
        }
    }
}

/// Opcode key, OP2 and OP3 encodings have separate opcode spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluKey {
    Op2(u32),
    Op3(u32),
}

impl AluKey {
    fn of(inst: &AluInst) -> Self {
        match inst.encoding {
            AluEncoding::Op2 { inst, .. } => AluKey::Op2(inst),
            AluEncoding::Op3 { inst } => AluKey::Op3(inst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expr {
    /// `(a op b)`
    Binary(&'static str),
    /// `f(a)`
    Call1(&'static str),
    /// `f(a, b)`
    Call2(&'static str),
    /// `(a op b) ? 1.0 : 0.0`
    Set(&'static str),
    /// Integer operation on the raw register bits
    IntBinary(&'static str),
    Mov,
    Nop,
    Dot4,
    Max4,
    Recip,
    RecipSqrt,
    FltToInt,
    IntToFlt,
    /// Sine and cosine take their argument in revolutions
    Periodic(&'static str),
    /// `a * b + c`, then the given scale
    MulAdd(&'static str),
    /// `(a op 0.0) ? b : c`
    Cnd(&'static str),
}

struct AluOp {
    key: AluKey,
    name: &'static str,
    trans_only: bool,
    expr: Expr,
}

const fn op2(inst: u32, name: &'static str, expr: Expr) -> AluOp {
    AluOp { key: AluKey::Op2(inst), name, trans_only: false, expr }
}

const fn trans(inst: u32, name: &'static str, expr: Expr) -> AluOp {
    AluOp { key: AluKey::Op2(inst), name, trans_only: true, expr }
}

const fn op3(inst: u32, name: &'static str, expr: Expr) -> AluOp {
    AluOp { key: AluKey::Op3(inst), name, trans_only: false, expr }
}

const ALU_OPS: &[AluOp] = &[
    op2(0x00, "ADD", Expr::Binary("+")),
    op2(0x01, "MUL", Expr::Binary("*")),
    op2(0x02, "MUL_IEEE", Expr::Binary("*")),
    op2(0x03, "MAX", Expr::Call2("max")),
    op2(0x04, "MIN", Expr::Call2("min")),
    op2(0x05, "MAX_DX10", Expr::Call2("max")),
    op2(0x06, "MIN_DX10", Expr::Call2("min")),
    op2(0x08, "SETE", Expr::Set("==")),
    op2(0x09, "SETGT", Expr::Set(">")),
    op2(0x0A, "SETGE", Expr::Set(">=")),
    op2(0x0B, "SETNE", Expr::Set("!=")),
    op2(0x10, "FRACT", Expr::Call1("fract")),
    op2(0x11, "TRUNC", Expr::Call1("trunc")),
    op2(0x12, "CEIL", Expr::Call1("ceil")),
    op2(0x13, "RNDNE", Expr::Call1("roundEven")),
    op2(0x14, "FLOOR", Expr::Call1("floor")),
    op2(0x19, "MOV", Expr::Mov),
    op2(0x1A, "NOP", Expr::Nop),
    op2(0x30, "AND_INT", Expr::IntBinary("&")),
    op2(0x31, "OR_INT", Expr::IntBinary("|")),
    op2(0x34, "ADD_INT", Expr::IntBinary("+")),
    op2(0x50, "DOT4", Expr::Dot4),
    op2(0x51, "DOT4_IEEE", Expr::Dot4),
    op2(0x53, "MAX4", Expr::Max4),
    trans(0x61, "EXP_IEEE", Expr::Call1("exp2")),
    trans(0x62, "LOG_CLAMPED", Expr::Call1("log2")),
    trans(0x63, "LOG_IEEE", Expr::Call1("log2")),
    trans(0x64, "RECIP_CLAMPED", Expr::Recip),
    trans(0x65, "RECIP_FF", Expr::Recip),
    trans(0x66, "RECIP_IEEE", Expr::Recip),
    trans(0x67, "RECIPSQRT_CLAMPED", Expr::RecipSqrt),
    trans(0x68, "RECIPSQRT_FF", Expr::RecipSqrt),
    trans(0x69, "RECIPSQRT_IEEE", Expr::RecipSqrt),
    trans(0x6A, "SQRT_IEEE", Expr::Call1("sqrt")),
    trans(0x6B, "FLT_TO_INT", Expr::FltToInt),
    trans(0x6C, "INT_TO_FLT", Expr::IntToFlt),
    trans(0x6E, "SIN", Expr::Periodic("sin")),
    trans(0x6F, "COS", Expr::Periodic("cos")),
    op3(0x10, "MULADD", Expr::MulAdd("")),
    op3(0x11, "MULADD_M2", Expr::MulAdd(" * 2.0")),
    op3(0x12, "MULADD_M4", Expr::MulAdd(" * 4.0")),
    op3(0x13, "MULADD_D2", Expr::MulAdd(" / 2.0")),
    op3(0x14, "MULADD_IEEE", Expr::MulAdd("")),
    op3(0x18, "CNDE", Expr::Cnd("==")),
    op3(0x19, "CNDGT", Expr::Cnd(">")),
    op3(0x1A, "CNDGE", Expr::Cnd(">=")),
];

fn lookup_op(key: AluKey) -> Result<&'static AluOp, TranslateError> {
    ALU_OPS.iter().find(|op| op.key == key).ok_or_else(|| {
        TranslateError::UnsupportedAlu(match key {
            AluKey::Op2(inst) => format!("OP2 0x{:02X}", inst),
            AluKey::Op3(inst) => format!("OP3 0x{:02X}", inst),
        })
    })
}

/// Name of a supported ALU opcode
pub fn op_name(key: AluKey) -> Option<&'static str> {
    lookup_op(key).ok().map(|op| op.name)
}

const CHANNELS: [char; 4] = ['x', 'y', 'z', 'w'];

fn channel(chan: u32) -> char {
    CHANNELS[(chan & 0x3) as usize]
}

fn render_literal(bits: u32) -> String {
    let value = f32::from_bits(bits);
    if value.is_finite() {
        format!("{:?}", value)
    } else {
        format!("uintBitsToFloat(0x{:08X}u)", bits)
    }
}

/// Render one source operand with its modifiers applied
fn render_source(src: &AluSource, group: &AluGroup) -> Result<String, TranslateError> {
    let c = channel(src.chan);
    let base = match src.sel {
        sel @ 0..=ALU_SRC_GPR_MAX => {
            if src.rel {
                format!("R[{} + AL].{}", sel, c)
            } else {
                format!("R[{}].{}", sel, c)
            }
        }
        ALU_SRC_0 => "0.0".to_string(),
        ALU_SRC_1 => "1.0".to_string(),
        ALU_SRC_1_INT => "intBitsToFloat(1)".to_string(),
        ALU_SRC_M_1_INT => "intBitsToFloat(-1)".to_string(),
        ALU_SRC_0_5 => "0.5".to_string(),
        ALU_SRC_LITERAL => render_literal(group.literal(src.chan)),
        ALU_SRC_PV => format!("PV.{}", c),
        ALU_SRC_PS => "PS".to_string(),
        sel if sel >= ALU_SRC_CONST_BASE => {
            let index = sel - ALU_SRC_CONST_BASE;
            if src.rel {
                format!("VC[{} + AL].{}", index, c)
            } else {
                format!("VC[{}].{}", index, c)
            }
        }
        // Kcache banks and the remaining encodings need uniform blocks
        sel => return Err(TranslateError::UnsupportedSource(sel)),
    };

    let value = if src.abs { format!("abs({})", base) } else { base };
    // Parenthesized so a negative literal never renders as `--`
    Ok(if src.neg { format!("-({})", value) } else { value })
}

fn render_expr(
    op: &AluOp,
    inst: &AluInst,
    group: &AluGroup,
    reduction: &[&AluInst],
) -> Result<Option<String>, TranslateError> {
    let src = |i: usize| render_source(&inst.src[i], group);

    let expr = match op.expr {
        Expr::Nop => return Ok(None),
        Expr::Mov => src(0)?,
        Expr::Binary(operator) => format!("({} {} {})", src(0)?, operator, src(1)?),
        Expr::Call1(func) => format!("{}({})", func, src(0)?),
        Expr::Call2(func) => format!("{}({}, {})", func, src(0)?, src(1)?),
        Expr::Set(cmp) => format!("(({} {} {}) ? 1.0 : 0.0)", src(0)?, cmp, src(1)?),
        Expr::IntBinary(operator) => format!(
            "intBitsToFloat(floatBitsToInt({}) {} floatBitsToInt({}))",
            src(0)?,
            operator,
            src(1)?
        ),
        Expr::Recip => format!("(1.0 / {})", src(0)?),
        Expr::RecipSqrt => format!("inversesqrt({})", src(0)?),
        Expr::FltToInt => format!("intBitsToFloat(int({}))", src(0)?),
        Expr::IntToFlt => format!("float(floatBitsToInt({}))", src(0)?),
        Expr::Periodic(func) => format!("{}({} * 6.2831855)", func, src(0)?),
        Expr::MulAdd(scale) => format!("(({} * {} + {}){})", src(0)?, src(1)?, src(2)?, scale),
        Expr::Cnd(cmp) => format!("(({} {} 0.0) ? {} : {})", src(0)?, cmp, src(1)?, src(2)?),
        Expr::Dot4 => {
            let terms = reduction
                .iter()
                .map(|inst| {
                    Ok(format!(
                        "{} * {}",
                        render_source(&inst.src[0], group)?,
                        render_source(&inst.src[1], group)?
                    ))
                })
                .collect::<Result<Vec<_>, TranslateError>>()?;
            format!("({})", terms.join(" + "))
        }
        Expr::Max4 => {
            let mut values = reduction
                .iter()
                .map(|inst| render_source(&inst.src[0], group))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter();
            let first = values.next().unwrap_or_else(|| "0.0".to_string());
            values.fold(first, |acc, value| format!("max({}, {})", acc, value))
        }
    };

    Ok(Some(expr))
}

fn apply_output_modifiers(expr: String, inst: &AluInst) -> String {
    let expr = match inst.encoding {
        AluEncoding::Op2 { omod: 1, .. } => format!("({} * 2.0)", expr),
        AluEncoding::Op2 { omod: 2, .. } => format!("({} * 4.0)", expr),
        AluEncoding::Op2 { omod: 3, .. } => format!("({} / 2.0)", expr),
        _ => expr,
    };
    if inst.clamp {
        format!("clamp({}, 0.0, 1.0)", expr)
    } else {
        expr
    }
}

struct Slot<'g> {
    unit: Unit,
    inst: &'g AluInst,
    op: &'static AluOp,
}

/// Assign each instruction of a group to an execution unit
fn assign_units(group: &AluGroup) -> Result<Vec<Slot<'_>>, TranslateError> {
    let mut taken = [false; 5];
    let mut slots = Vec::with_capacity(group.insts.len());

    for inst in &group.insts {
        let op = lookup_op(AluKey::of(inst))?;
        let vector = Unit::from_chan(inst.dst_chan);
        let unit = if op.trans_only || taken[vector.index()] {
            Unit::T
        } else {
            vector
        };

        if taken[unit.index()] {
            return Err(TranslateError::UnsupportedAlu(format!(
                "{} with no free unit in group",
                op.name
            )));
        }
        taken[unit.index()] = true;
        slots.push(Slot { unit, inst, op });
    }

    Ok(slots)
}

fn translate_group(state: &mut State<'_>, group: &AluGroup) -> Result<(), TranslateError> {
    let slots = assign_units(group)?;
    let mut statements = Vec::with_capacity(slots.len());

    for slot in &slots {
        // Reductions combine every vector-unit instruction with the same opcode
        let reduction: Vec<&AluInst> = match slot.op.expr {
            Expr::Dot4 | Expr::Max4 => {
                let mut members: Vec<&Slot> = slots
                    .iter()
                    .filter(|other| other.op.key == slot.op.key && other.unit != Unit::T)
                    .collect();
                members.sort_by_key(|other| other.unit);
                members.into_iter().map(|other| other.inst).collect()
            }
            _ => Vec::new(),
        };

        if let Some(expr) = render_expr(slot.op, slot.inst, group, &reduction)? {
            statements.push((slot, apply_output_modifiers(expr, slot.inst)));
        }
    }

    state.line("{");
    state.push_indent();

    for (slot, expr) in &statements {
        state.line(&format!("float {} = {};", slot.unit.temp(), expr));
    }

    for (slot, _) in &statements {
        let writes = match slot.inst.encoding {
            AluEncoding::Op2 { write_mask, .. } => write_mask,
            AluEncoding::Op3 { .. } => true,
        };
        if writes {
            let dst = if slot.inst.dst_rel {
                format!("R[{} + AL]", slot.inst.dst_gpr)
            } else {
                format!("R[{}]", slot.inst.dst_gpr)
            };
            state.line(&format!("{}.{} = {};", dst, channel(slot.inst.dst_chan), slot.unit.temp()));
        }
    }

    for (slot, _) in &statements {
        match slot.unit {
            Unit::T => state.line(&format!("PS = {};", slot.unit.temp())),
            unit => state.line(&format!("PV.{} = {};", CHANNELS[unit.index()], unit.temp())),
        }
    }

    state.pop_indent();
    state.line("}");
    Ok(())
}

/// CF_INST_ALU
pub fn translate_clause(state: &mut State<'_>, cf: &ControlFlowInst) -> Result<(), TranslateError> {
    let word = cf.alu();
    let program = state.program;
    let clause = decode::clause_slots(program, word.addr, word.slot_count(), "ALU clause")?;

    for group in decode::alu_groups(clause)? {
        translate_group(state, &group)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderType;

    fn translate(clause: &[u32]) -> Result<String, TranslateError> {
        let mut state = State::new(ShaderType::Vertex, clause, None);
        for group in decode::alu_groups(clause)? {
            translate_group(&mut state, &group)?;
        }
        Ok(state.out)
    }

    fn src(sel: u32, chan: u32) -> u32 {
        encode::alu_src(sel, chan, false)
    }

    #[test]
    fn test_mov_literal() {
        let mut clause = encode::alu_op2(0x19, src(ALU_SRC_LITERAL, 0), 0, 1, 0, true, true).to_vec();
        clause.extend([0x3F80_0000, 0]);

        assert_eq!(
            translate(&clause).unwrap(),
            "    {\n        float alu_x = 1.0;\n        R[1].x = alu_x;\n        PV.x = alu_x;\n    }\n"
        );
    }

    #[test]
    fn test_group_reads_before_writes() {
        // R1.x = R1.y ; R1.y = R1.x  (swap)
        let mut clause = encode::alu_op2(0x19, src(1, 1), 0, 1, 0, true, false).to_vec();
        clause.extend(encode::alu_op2(0x19, src(1, 0), 0, 1, 1, true, true));

        let out = translate(&clause).unwrap();
        let first_write = out.find("R[1].x = alu_x;").unwrap();
        assert!(out.find("float alu_y = R[1].x;").unwrap() < first_write);
    }

    #[test]
    fn test_write_mask_still_updates_pv() {
        let clause = encode::alu_op2(0x00, src(2, 0), src(ALU_SRC_CONST_BASE + 3, 1), 4, 2, false, true);
        let out = translate(&clause).unwrap();
        assert!(out.contains("float alu_z = (R[2].x + VC[3].y);"));
        assert!(!out.contains("R[4].z ="));
        assert!(out.contains("PV.z = alu_z;"));
    }

    #[test]
    fn test_trans_only_goes_to_ps() {
        let clause = encode::alu_op2(0x66, src(ALU_SRC_PV, 0), 0, 3, 0, true, true);
        let out = translate(&clause).unwrap();
        assert!(out.contains("float alu_t = (1.0 / PV.x);"));
        assert!(out.contains("PS = alu_t;"));
    }

    #[test]
    fn test_dot4_reduction() {
        let mut clause = Vec::new();
        for chan in 0..4 {
            clause.extend(encode::alu_op2(0x50, src(1, chan), src(2, chan), 3, chan, chan == 0, chan == 3));
        }
        let out = translate(&clause).unwrap();
        assert!(out.contains(
            "float alu_w = (R[1].x * R[2].x + R[1].y * R[2].y + R[1].z * R[2].z + R[1].w * R[2].w);"
        ));
        assert!(out.contains("R[3].x = alu_x;"));
        assert!(!out.contains("R[3].y ="));
    }

    #[test]
    fn test_muladd_op3() {
        let clause = encode::alu_op3(0x11, src(1, 0), src(2, 0), src(ALU_SRC_0_5, 0), 5, 1, true);
        let out = translate(&clause).unwrap();
        assert!(out.contains("float alu_y = ((R[1].x * R[2].x + 0.5) * 2.0);"));
        assert!(out.contains("R[5].y = alu_y;"));
    }

    #[test]
    fn test_negated_source() {
        let clause = encode::alu_op2(0x19, encode::alu_src(ALU_SRC_PS, 0, true), 0, 1, 3, true, true);
        assert!(translate(&clause).unwrap().contains("float alu_w = -(PS);"));
    }

    #[test]
    fn test_negated_negative_literal() {
        let mut clause =
            encode::alu_op2(0x19, encode::alu_src(ALU_SRC_LITERAL, 0, true), 0, 1, 0, true, true).to_vec();
        clause.extend([0xC020_0000, 0]);

        let out = translate(&clause).unwrap();
        assert!(out.contains("float alu_x = -(-2.5);"));
        assert!(!out.contains("--"));
    }

    #[test]
    fn test_kcache_source_rejected() {
        let clause = encode::alu_op2(0x19, src(ALU_SRC_KCACHE0_BASE + 4, 0), 0, 1, 0, true, true);
        assert_eq!(
            translate(&clause),
            Err(TranslateError::UnsupportedSource(ALU_SRC_KCACHE0_BASE + 4))
        );
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let clause = encode::alu_op2(0x7F, src(1, 0), 0, 1, 0, true, true);
        assert_eq!(
            translate(&clause),
            Err(TranslateError::UnsupportedAlu("OP2 0x7F".to_string()))
        );
    }

    #[test]
    fn test_non_finite_literal() {
        assert_eq!(render_literal(0x7F80_0000), "uintBitsToFloat(0x7F800000u)");
        assert_eq!(render_literal(0x4020_0000), "2.5");
    }

    #[test]
    fn test_op_names() {
        assert_eq!(op_name(AluKey::Op3(0x18)), Some("CNDE"));
        assert_eq!(op_name(AluKey::Op2(0x52)), None);
    }
}
