// DWARF expression encoder.
//
// An expression is a flat sequence of operations; each operation is a
// one-byte opcode followed by operands whose layout is fixed per opcode
// (DWARF v4 sections 2.5 and 7.7.1). The layouts are resolved once into a
// dense table indexed by the opcode byte, so emission itself is a single
// lookup per operation.

use crate::arch::Arch;
use crate::leb;
use crate::{Error, Result};

// DW_OP_* values (DWARF v4 section 7.7.1, figure 24).
#[allow(non_upper_case_globals)]
pub mod op {
    pub const DW_OP_addr: u8 = 0x03;
    pub const DW_OP_deref: u8 = 0x06;
    pub const DW_OP_const1u: u8 = 0x08;
    pub const DW_OP_const1s: u8 = 0x09;
    pub const DW_OP_const2u: u8 = 0x0a;
    pub const DW_OP_const2s: u8 = 0x0b;
    pub const DW_OP_const4u: u8 = 0x0c;
    pub const DW_OP_const4s: u8 = 0x0d;
    pub const DW_OP_const8u: u8 = 0x0e;
    pub const DW_OP_const8s: u8 = 0x0f;
    pub const DW_OP_constu: u8 = 0x10;
    pub const DW_OP_consts: u8 = 0x11;
    pub const DW_OP_dup: u8 = 0x12;
    pub const DW_OP_drop: u8 = 0x13;
    pub const DW_OP_over: u8 = 0x14;
    pub const DW_OP_pick: u8 = 0x15;
    pub const DW_OP_swap: u8 = 0x16;
    pub const DW_OP_rot: u8 = 0x17;
    pub const DW_OP_xderef: u8 = 0x18;
    pub const DW_OP_abs: u8 = 0x19;
    pub const DW_OP_and: u8 = 0x1a;
    pub const DW_OP_div: u8 = 0x1b;
    pub const DW_OP_minus: u8 = 0x1c;
    pub const DW_OP_mod: u8 = 0x1d;
    pub const DW_OP_mul: u8 = 0x1e;
    pub const DW_OP_neg: u8 = 0x1f;
    pub const DW_OP_not: u8 = 0x20;
    pub const DW_OP_or: u8 = 0x21;
    pub const DW_OP_plus: u8 = 0x22;
    pub const DW_OP_plus_uconst: u8 = 0x23;
    pub const DW_OP_shl: u8 = 0x24;
    pub const DW_OP_shr: u8 = 0x25;
    pub const DW_OP_shra: u8 = 0x26;
    pub const DW_OP_xor: u8 = 0x27;
    pub const DW_OP_bra: u8 = 0x28;
    pub const DW_OP_eq: u8 = 0x29;
    pub const DW_OP_ge: u8 = 0x2a;
    pub const DW_OP_gt: u8 = 0x2b;
    pub const DW_OP_le: u8 = 0x2c;
    pub const DW_OP_lt: u8 = 0x2d;
    pub const DW_OP_ne: u8 = 0x2e;
    pub const DW_OP_skip: u8 = 0x2f;
    pub const DW_OP_lit0: u8 = 0x30; // DW_OP_lit0 ..= DW_OP_lit31 are 0x30 ..= 0x4f
    pub const DW_OP_reg0: u8 = 0x50; // DW_OP_reg0 ..= DW_OP_reg31 are 0x50 ..= 0x6f
    pub const DW_OP_breg0: u8 = 0x70; // DW_OP_breg0 ..= DW_OP_breg31 are 0x70 ..= 0x8f
    pub const DW_OP_regx: u8 = 0x90;
    pub const DW_OP_fbreg: u8 = 0x91;
    pub const DW_OP_bregx: u8 = 0x92;
    pub const DW_OP_piece: u8 = 0x93;
    pub const DW_OP_deref_size: u8 = 0x94;
    pub const DW_OP_xderef_size: u8 = 0x95;
    pub const DW_OP_nop: u8 = 0x96;
    pub const DW_OP_push_object_address: u8 = 0x97;
    pub const DW_OP_call2: u8 = 0x98;
    pub const DW_OP_call4: u8 = 0x99;
    pub const DW_OP_call_ref: u8 = 0x9a;
    pub const DW_OP_form_tls_address: u8 = 0x9b;
    pub const DW_OP_call_frame_cfa: u8 = 0x9c;
    pub const DW_OP_bit_piece: u8 = 0x9d;
    pub const DW_OP_implicit_value: u8 = 0x9e;
    pub const DW_OP_stack_value: u8 = 0x9f;
    pub const DW_OP_GNU_push_tls_address: u8 = 0xe0;
    pub const DW_OP_GNU_implicit_pointer: u8 = 0xf2;
    pub const DW_OP_GNU_entry_value: u8 = 0xf3;
    pub const DW_OP_GNU_const_type: u8 = 0xf4;
    pub const DW_OP_GNU_regval_type: u8 = 0xf5;
    pub const DW_OP_GNU_deref_type: u8 = 0xf6;
    pub const DW_OP_GNU_convert: u8 = 0xf7;
    pub const DW_OP_GNU_parameter_ref: u8 = 0xfa;
}

// One operation of an expression.
#[derive(Debug, Clone)]
pub struct Op {
    pub opcode: u8,
    pub args: Vec<OpArg>,
}

impl Op {
    pub fn new(opcode: u8, args: Vec<OpArg>) -> Op {
        Op { opcode, args }
    }

    pub fn noargs(opcode: u8) -> Op {
        Op {
            opcode,
            args: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub enum OpArg {
    Num(i128),
    // Literal payload of DW_OP_implicit_value.
    Blob(Vec<u8>),
    // Nested expression of DW_OP_GNU_entry_value.
    Expr(Vec<Op>),
}

// Operand layout for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schema {
    // No layout known; emitting the op fails. DW_OP_GNU_const_type is
    // deliberately left here.
    Missing,
    NoArgs,
    // One target word.
    Word,
    Fixed { size: usize, signed: bool },
    Uleb,
    Sleb,
    UlebUleb,
    UlebSleb,
    // One unsigned byte, then a ULEB (DW_OP_GNU_deref_type).
    ByteUleb,
    // One target word, then an SLEB (DW_OP_GNU_implicit_pointer).
    WordSleb,
    // ULEB byte count, then that many literal bytes.
    Blob,
    // ULEB byte count, then a nested expression of that length.
    Nested,
}

pub struct ExprEncoder {
    arch: Arch,
    table: [Schema; 256],
}

impl ExprEncoder {
    pub fn new(arch: Arch) -> ExprEncoder {
        ExprEncoder {
            arch,
            table: build_table(),
        }
    }

    pub fn encode(&self, expr: &[Op]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out, expr)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>, expr: &[Op]) -> Result<()> {
        for op in expr {
            out.push(op.opcode);
            self.encode_args(out, op)?;
        }
        Ok(())
    }

    fn encode_args(&self, out: &mut Vec<u8>, op: &Op) -> Result<()> {
        match self.table[op.opcode as usize] {
            Schema::Missing => return Err(unsupported(op.opcode)),
            Schema::NoArgs => {}
            Schema::Word => {
                let v = num(op, 0)?;
                self.arch.pack_word(out, v as u64);
            }
            Schema::Fixed { size, signed } => {
                let v = num(op, 0)?;
                self.arch.pack_int(out, size, signed, v);
            }
            Schema::Uleb => uleb_arg(out, op, 0)?,
            Schema::Sleb => sleb_arg(out, op, 0)?,
            Schema::UlebUleb => {
                uleb_arg(out, op, 0)?;
                uleb_arg(out, op, 1)?;
            }
            Schema::UlebSleb => {
                uleb_arg(out, op, 0)?;
                sleb_arg(out, op, 1)?;
            }
            Schema::ByteUleb => {
                let v = num(op, 0)?;
                self.arch.pack_int(out, 1, false, v);
                uleb_arg(out, op, 1)?;
            }
            Schema::WordSleb => {
                let v = num(op, 0)?;
                self.arch.pack_word(out, v as u64);
                sleb_arg(out, op, 1)?;
            }
            Schema::Blob => match op.args.first() {
                Some(OpArg::Blob(bytes)) => {
                    leb::uleb128(out, bytes.len() as u64);
                    out.extend_from_slice(bytes);
                }
                _ => return Err(unsupported(op.opcode)),
            },
            Schema::Nested => match op.args.first() {
                Some(OpArg::Expr(inner)) => {
                    let nested = self.encode(inner)?;
                    leb::uleb128(out, nested.len() as u64);
                    out.extend_from_slice(&nested);
                }
                _ => return Err(unsupported(op.opcode)),
            },
        }
        Ok(())
    }
}

fn num(op: &Op, idx: usize) -> Result<i128> {
    match op.args.get(idx) {
        Some(OpArg::Num(v)) => Ok(*v),
        _ => Err(unsupported(op.opcode)),
    }
}

fn uleb_arg(out: &mut Vec<u8>, op: &Op, idx: usize) -> Result<()> {
    let v = num(op, idx)?;
    let v = u64::try_from(v).map_err(|_| unsupported(op.opcode))?;
    leb::uleb128(out, v);
    Ok(())
}

fn sleb_arg(out: &mut Vec<u8>, op: &Op, idx: usize) -> Result<()> {
    let v = num(op, idx)?;
    let v = i64::try_from(v).map_err(|_| unsupported(op.opcode))?;
    leb::sleb128(out, v);
    Ok(())
}

fn unsupported(opcode: u8) -> Error {
    Error::Unsupported(op_name(opcode))
}

fn build_table() -> [Schema; 256] {
    use self::op::*;
    let mut t = [Schema::Missing; 256];

    let mut set = |opcode: u8, schema: Schema| t[opcode as usize] = schema;

    set(DW_OP_addr, Schema::Word);
    for (opcode, size) in [
        (DW_OP_const1u, 1),
        (DW_OP_const2u, 2),
        (DW_OP_const4u, 4),
        (DW_OP_const8u, 8),
    ] {
        set(opcode, Schema::Fixed { size, signed: false });
    }
    for (opcode, size) in [
        (DW_OP_const1s, 1),
        (DW_OP_const2s, 2),
        (DW_OP_const4s, 4),
        (DW_OP_const8s, 8),
    ] {
        set(opcode, Schema::Fixed { size, signed: true });
    }
    set(DW_OP_constu, Schema::Uleb);
    set(DW_OP_consts, Schema::Sleb);
    set(DW_OP_pick, Schema::Fixed { size: 1, signed: false });
    set(DW_OP_plus_uconst, Schema::Uleb);
    set(DW_OP_bra, Schema::Fixed { size: 2, signed: true });
    set(DW_OP_skip, Schema::Fixed { size: 2, signed: true });

    for opcode in [
        DW_OP_deref,
        DW_OP_dup,
        DW_OP_drop,
        DW_OP_over,
        DW_OP_swap,
        DW_OP_rot,
        DW_OP_xderef,
        DW_OP_abs,
        DW_OP_and,
        DW_OP_div,
        DW_OP_minus,
        DW_OP_mod,
        DW_OP_mul,
        DW_OP_neg,
        DW_OP_not,
        DW_OP_or,
        DW_OP_plus,
        DW_OP_shl,
        DW_OP_shr,
        DW_OP_shra,
        DW_OP_xor,
        DW_OP_eq,
        DW_OP_ge,
        DW_OP_gt,
        DW_OP_le,
        DW_OP_lt,
        DW_OP_ne,
        DW_OP_nop,
        DW_OP_push_object_address,
        DW_OP_form_tls_address,
        DW_OP_call_frame_cfa,
        DW_OP_stack_value,
        DW_OP_GNU_push_tls_address,
    ] {
        set(opcode, Schema::NoArgs);
    }

    for n in 0..32 {
        set(DW_OP_lit0 + n, Schema::NoArgs);
        set(DW_OP_reg0 + n, Schema::NoArgs);
        set(DW_OP_breg0 + n, Schema::Sleb);
    }

    set(DW_OP_fbreg, Schema::Sleb);
    set(DW_OP_regx, Schema::Uleb);
    set(DW_OP_bregx, Schema::UlebSleb);
    set(DW_OP_piece, Schema::Uleb);
    set(DW_OP_bit_piece, Schema::UlebUleb);
    // Signed single byte; the historical form predating the v4 wording.
    set(DW_OP_deref_size, Schema::Fixed { size: 1, signed: true });
    set(DW_OP_xderef_size, Schema::Fixed { size: 1, signed: true });
    set(DW_OP_call2, Schema::Fixed { size: 2, signed: false });
    set(DW_OP_call4, Schema::Fixed { size: 4, signed: false });
    set(DW_OP_call_ref, Schema::Word);
    set(DW_OP_implicit_value, Schema::Blob);
    set(DW_OP_GNU_entry_value, Schema::Nested);
    set(DW_OP_GNU_regval_type, Schema::UlebUleb);
    set(DW_OP_GNU_deref_type, Schema::ByteUleb);
    set(DW_OP_GNU_implicit_pointer, Schema::WordSleb);
    set(DW_OP_GNU_parameter_ref, Schema::Word);
    set(DW_OP_GNU_convert, Schema::Uleb);

    t
}

// Name for diagnostics; unknown opcodes are shown in hex.
pub fn op_name(opcode: u8) -> String {
    use self::op::*;
    let known = match opcode {
        DW_OP_addr => "DW_OP_addr",
        DW_OP_deref => "DW_OP_deref",
        DW_OP_const1u => "DW_OP_const1u",
        DW_OP_const1s => "DW_OP_const1s",
        DW_OP_const2u => "DW_OP_const2u",
        DW_OP_const2s => "DW_OP_const2s",
        DW_OP_const4u => "DW_OP_const4u",
        DW_OP_const4s => "DW_OP_const4s",
        DW_OP_const8u => "DW_OP_const8u",
        DW_OP_const8s => "DW_OP_const8s",
        DW_OP_constu => "DW_OP_constu",
        DW_OP_consts => "DW_OP_consts",
        DW_OP_dup => "DW_OP_dup",
        DW_OP_drop => "DW_OP_drop",
        DW_OP_over => "DW_OP_over",
        DW_OP_pick => "DW_OP_pick",
        DW_OP_swap => "DW_OP_swap",
        DW_OP_rot => "DW_OP_rot",
        DW_OP_xderef => "DW_OP_xderef",
        DW_OP_abs => "DW_OP_abs",
        DW_OP_and => "DW_OP_and",
        DW_OP_div => "DW_OP_div",
        DW_OP_minus => "DW_OP_minus",
        DW_OP_mod => "DW_OP_mod",
        DW_OP_mul => "DW_OP_mul",
        DW_OP_neg => "DW_OP_neg",
        DW_OP_not => "DW_OP_not",
        DW_OP_or => "DW_OP_or",
        DW_OP_plus => "DW_OP_plus",
        DW_OP_plus_uconst => "DW_OP_plus_uconst",
        DW_OP_shl => "DW_OP_shl",
        DW_OP_shr => "DW_OP_shr",
        DW_OP_shra => "DW_OP_shra",
        DW_OP_xor => "DW_OP_xor",
        DW_OP_bra => "DW_OP_bra",
        DW_OP_eq => "DW_OP_eq",
        DW_OP_ge => "DW_OP_ge",
        DW_OP_gt => "DW_OP_gt",
        DW_OP_le => "DW_OP_le",
        DW_OP_lt => "DW_OP_lt",
        DW_OP_ne => "DW_OP_ne",
        DW_OP_skip => "DW_OP_skip",
        DW_OP_regx => "DW_OP_regx",
        DW_OP_fbreg => "DW_OP_fbreg",
        DW_OP_bregx => "DW_OP_bregx",
        DW_OP_piece => "DW_OP_piece",
        DW_OP_deref_size => "DW_OP_deref_size",
        DW_OP_xderef_size => "DW_OP_xderef_size",
        DW_OP_nop => "DW_OP_nop",
        DW_OP_push_object_address => "DW_OP_push_object_address",
        DW_OP_call2 => "DW_OP_call2",
        DW_OP_call4 => "DW_OP_call4",
        DW_OP_call_ref => "DW_OP_call_ref",
        DW_OP_form_tls_address => "DW_OP_form_tls_address",
        DW_OP_call_frame_cfa => "DW_OP_call_frame_cfa",
        DW_OP_bit_piece => "DW_OP_bit_piece",
        DW_OP_implicit_value => "DW_OP_implicit_value",
        DW_OP_stack_value => "DW_OP_stack_value",
        DW_OP_GNU_push_tls_address => "DW_OP_GNU_push_tls_address",
        DW_OP_GNU_implicit_pointer => "DW_OP_GNU_implicit_pointer",
        DW_OP_GNU_entry_value => "DW_OP_GNU_entry_value",
        DW_OP_GNU_const_type => "DW_OP_GNU_const_type",
        DW_OP_GNU_regval_type => "DW_OP_GNU_regval_type",
        DW_OP_GNU_deref_type => "DW_OP_GNU_deref_type",
        DW_OP_GNU_convert => "DW_OP_GNU_convert",
        DW_OP_GNU_parameter_ref => "DW_OP_GNU_parameter_ref",
        _ => "",
    };
    if !known.is_empty() {
        return known.to_string();
    }
    match opcode {
        0x30..=0x4f => format!("DW_OP_lit{}", opcode - 0x30),
        0x50..=0x6f => format!("DW_OP_reg{}", opcode - 0x50),
        0x70..=0x8f => format!("DW_OP_breg{}", opcode - 0x70),
        _ => format!("DW_OP_{:#04x}", opcode),
    }
}

#[cfg(test)]
mod tests {
    use super::op::*;
    use super::*;
    use crate::arch;
    use crate::Error;

    fn enc(expr: &[Op]) -> Vec<u8> {
        ExprEncoder::new(arch::X86_64).encode(expr).unwrap()
    }

    #[test]
    fn noargs_ops_are_one_byte() {
        assert_eq!(
            enc(&[
                Op::noargs(DW_OP_reg0 + 5),
                Op::noargs(DW_OP_lit0 + 31),
                Op::noargs(DW_OP_stack_value),
            ]),
            [0x55, 0x4f, 0x9f]
        );
    }

    #[test]
    fn addr_is_one_target_word() {
        assert_eq!(
            enc(&[Op::new(DW_OP_addr, vec![OpArg::Num(0xdeadbeef)])]),
            [0x03, 0xef, 0xbe, 0xad, 0xde, 0x00, 0x00, 0x00, 0x00]
        );
        let be = ExprEncoder::new(arch::ARMEB)
            .encode(&[Op::new(DW_OP_addr, vec![OpArg::Num(0x1234)])])
            .unwrap();
        assert_eq!(be, [0x03, 0x00, 0x00, 0x12, 0x34]);
    }

    #[test]
    fn fixed_width_constants() {
        assert_eq!(
            enc(&[Op::new(DW_OP_const2s, vec![OpArg::Num(-2)])]),
            [0x0b, 0xfe, 0xff]
        );
        assert_eq!(
            enc(&[Op::new(DW_OP_const1u, vec![OpArg::Num(0x80)])]),
            [0x08, 0x80]
        );
    }

    #[test]
    fn breg_takes_an_sleb() {
        assert_eq!(
            enc(&[Op::new(DW_OP_breg0 + 5, vec![OpArg::Num(-8)])]),
            [0x75, 0x78]
        );
        assert_eq!(
            enc(&[Op::new(DW_OP_fbreg, vec![OpArg::Num(-16)])]),
            [0x91, 0x70]
        );
    }

    #[test]
    fn bregx_takes_uleb_then_sleb() {
        assert_eq!(
            enc(&[Op::new(DW_OP_bregx, vec![OpArg::Num(5), OpArg::Num(-8)])]),
            [0x92, 0x05, 0x78]
        );
    }

    #[test]
    fn implicit_value_carries_a_blob() {
        assert_eq!(
            enc(&[Op::new(DW_OP_implicit_value, vec![OpArg::Blob(vec![1, 2, 3])])]),
            [0x9e, 0x03, 0x01, 0x02, 0x03]
        );
    }

    #[test]
    fn entry_value_nests_an_expression() {
        assert_eq!(
            enc(&[Op::new(
                DW_OP_GNU_entry_value,
                vec![OpArg::Expr(vec![Op::noargs(DW_OP_reg0 + 5)])],
            )]),
            [0xf3, 0x01, 0x55]
        );
    }

    #[test]
    fn gnu_typed_ops() {
        assert_eq!(
            enc(&[Op::new(
                DW_OP_GNU_regval_type,
                vec![OpArg::Num(5), OpArg::Num(0x30)],
            )]),
            [0xf5, 0x05, 0x30]
        );
        assert_eq!(
            enc(&[Op::new(
                DW_OP_GNU_deref_type,
                vec![OpArg::Num(8), OpArg::Num(0x30)],
            )]),
            [0xf6, 0x08, 0x30]
        );
    }

    #[test]
    fn const_type_is_rejected() {
        let err = ExprEncoder::new(arch::X86_64)
            .encode(&[Op::new(DW_OP_GNU_const_type, vec![])])
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(name) if name == "DW_OP_GNU_const_type"));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = ExprEncoder::new(arch::X86_64)
            .encode(&[Op::noargs(0xff)])
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn missing_operand_is_rejected() {
        let err = ExprEncoder::new(arch::X86_64)
            .encode(&[Op::noargs(DW_OP_bregx)])
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(name) if name == "DW_OP_bregx"));
    }
}
