//! Bytecode opcodes.
//!
//! Instructions are register-addressed: `%r` operands name registers in the
//! current frame, `#c` operands name slots in the current constant pool.
//! Three-operand expressions come in three forms so the code generator can
//! pre-select constant operands without a temporary move.
//!
//! Every instruction has a stable one-byte tag ([`OpTag`]). Serialised
//! bytecode containers store these tags, so the declaration order below must
//! never change; new instructions are appended at the end.

use std::fmt;

use strum::{Display, EnumCount, FromRepr, IntoStaticStr};

use super::{Address, FloatConst, IntConst, Register};

/// Stable one-byte instruction tags in container order.
///
/// The discriminant of each variant is the byte written to (and read from)
/// serialised bytecode. `FromRepr` provides the decode direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumCount, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum OpTag {
    End = 0,

    Load,
    LoadAttr,
    LoadGlobal,
    #[strum(serialize = "LOAD_NONLOC")]
    LoadNonLoc,

    Store,
    StoreName,
    StoreConst,
    StoreAttr,
    StoreConstAttr,
    StoreGlobal,
    #[strum(serialize = "STORE_NONLOC")]
    StoreNonLoc,
    StoreSubsc,
    StoreConstSubsc,
    StoreSubscConst,
    #[strum(serialize = "STORE_C_SUBSC_C")]
    StoreCSubscC,

    StoreIntConst,
    StoreFloatConst,
    StoreBoolConst,
    StoreStringConst,
    StoreNilConst,

    Jmp,
    JmpIfTrue,
    JmpIfFalse,
    Call,
    CallFormatter,
    PushFrame,
    PopFrame,
    PushCallFrame,
    PopCallFrame,
    Return,
    ReturnConst,
    PushArg,
    PushConstArg,
    PushNamedArg,
    PushUnpacked,
    CreateFun,
    FunBegin,
    SetDefault,
    SetDefaultConst,
    SetType,
    SetVararg,

    Import,
    ImportAll,

    PushParent,
    BuildClass,

    Annotate,
    AnnotateMod,
    Document,

    Output,

    Concat,
    Exp,
    Add,
    Sub,
    Div,
    Mul,
    Mod,
    Eq,
    Neq,
    Bt,
    Lt,
    Beq,
    Leq,
    In,
    And,
    Or,
    Xor,
    Subsc,

    Concat2,
    Exp2,
    Add2,
    Sub2,
    Div2,
    Mul2,
    Mod2,
    Eq2,
    Neq2,
    Bt2,
    Lt2,
    Beq2,
    Leq2,
    In2,
    And2,
    Or2,
    Xor2,
    Subsc2,

    Concat3,
    Exp3,
    Add3,
    Sub3,
    Div3,
    Mul3,
    Mod3,
    Eq3,
    Neq3,
    Bt3,
    Lt3,
    Beq3,
    Leq3,
    In3,
    And3,
    Or3,
    Xor3,
    Subsc3,

    Not,
    Neg,

    Assert,

    Raise,
    Catch,
    CatchTyped,
    PopCatch,

    ListPush,
    ListPushConst,
    BuildList,

    BuildDict,
    BuildEnum,
    BuildSpace,

    CreateRange,
    CreateRange2,
    CreateRange3,
    CreateRange4,
    CreateRange5,
    CreateRange6,
    CreateRange7,
    CreateRange8,

    Switch,
    For,
    Iter,

    // Appended past the original table; tags above never move.
    Finally,
    PopFinally,
    FinallyEnd,
    ForMulti,
    SubscLast,
    SubscRest,
}

/// Binary expression operators sharing the three-form operand encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BinOp {
    Concat,
    Exp,
    Add,
    Sub,
    Div,
    Mul,
    Mod,
    Eq,
    Neq,
    Bt,
    Lt,
    Beq,
    Leq,
    In,
    And,
    Or,
    Xor,
    Subsc,
}

/// Number of [`BinOp`] operators in one specialisation family.
pub(crate) const BIN_OP_FAMILY: u8 = 18;

impl BinOp {
    pub(crate) fn from_family_index(index: u8) -> Self {
        match index {
            0 => Self::Concat,
            1 => Self::Exp,
            2 => Self::Add,
            3 => Self::Sub,
            4 => Self::Div,
            5 => Self::Mul,
            6 => Self::Mod,
            7 => Self::Eq,
            8 => Self::Neq,
            9 => Self::Bt,
            10 => Self::Lt,
            11 => Self::Beq,
            12 => Self::Leq,
            13 => Self::In,
            14 => Self::And,
            15 => Self::Or,
            16 => Self::Xor,
            17 => Self::Subsc,
            _ => unreachable!("binary operator family index out of range"),
        }
    }

    pub(crate) fn family_index(self) -> u8 {
        self as u8
    }

    /// Method name consulted when the left operand is an object.
    pub(crate) fn dunder(self) -> &'static str {
        match self {
            Self::Concat => "__concat",
            Self::Exp => "__exp",
            Self::Add => "__add",
            Self::Sub => "__sub",
            Self::Div => "__div",
            Self::Mul => "__mul",
            Self::Mod => "__mod",
            Self::Eq => "__eq",
            Self::Neq => "__neq",
            Self::Bt => "__bt",
            Self::Lt => "__lt",
            Self::Beq => "__beq",
            Self::Leq => "__leq",
            Self::In => "__in",
            Self::And => "__and",
            Self::Or => "__or",
            Self::Xor => "__xor",
            Self::Subsc => "__subsc",
        }
    }

    /// Reflected method name consulted when only the right operand is an object.
    pub(crate) fn reflected_dunder(self) -> &'static str {
        match self {
            Self::Concat => "__rconcat",
            Self::Exp => "__rexp",
            Self::Add => "__radd",
            Self::Sub => "__rsub",
            Self::Div => "__rdiv",
            Self::Mul => "__rmul",
            Self::Mod => "__rmod",
            Self::Eq => "__req",
            Self::Neq => "__rneq",
            Self::Bt => "__rbt",
            Self::Lt => "__rlt",
            Self::Beq => "__rbeq",
            Self::Leq => "__rleq",
            Self::In => "__rin",
            Self::And => "__rand",
            Self::Or => "__ror",
            Self::Xor => "__rxor",
            Self::Subsc => "__rsubsc",
        }
    }
}

/// Operand form of a binary expression.
///
/// `RegReg` is the base opcode, `ConstReg` the `2` specialisation (left
/// operand from the constant pool) and `RegConst` the `3` specialisation
/// (right operand from the constant pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinForm {
    RegReg,
    ConstReg,
    RegConst,
}

impl BinForm {
    fn family_offset(self) -> u8 {
        match self {
            Self::RegReg => 0,
            Self::ConstReg => 1,
            Self::RegConst => 2,
        }
    }

    fn mnemonic_suffix(self) -> &'static str {
        match self {
            Self::RegReg => "",
            Self::ConstReg => "2",
            Self::RegConst => "3",
        }
    }
}

/// Constant-vs-register pattern of a `CREATE_RANGE` specialisation.
///
/// The three flags say whether `start`, `step` and `end` come from the
/// constant pool. The eight combinations map onto `CREATE_RANGE..CREATE_RANGE8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeForm {
    pub start_const: bool,
    pub step_const: bool,
    pub end_const: bool,
}

impl RangeForm {
    pub(crate) fn tag_offset(self) -> u8 {
        match (self.start_const, self.step_const, self.end_const) {
            (false, false, false) => 0,
            (true, false, false) => 1,
            (false, true, false) => 2,
            (false, false, true) => 3,
            (true, true, false) => 4,
            (true, false, true) => 5,
            (false, true, true) => 6,
            (true, true, true) => 7,
        }
    }

    pub(crate) fn from_tag_offset(offset: u8) -> Self {
        let (start_const, step_const, end_const) = match offset {
            0 => (false, false, false),
            1 => (true, false, false),
            2 => (false, true, false),
            3 => (false, false, true),
            4 => (true, true, false),
            5 => (true, false, true),
            6 => (false, true, true),
            7 => (true, true, true),
            _ => unreachable!("range specialisation offset out of range"),
        };
        Self {
            start_const,
            step_const,
            end_const,
        }
    }
}

/// A decoded bytecode instruction.
///
/// Operand naming convention: `dst`/`src` are frame registers, `csrc`/`ckey`
/// constant-pool registers, `name` a string constant, `addr` a bytecode
/// address.
#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    End,

    Load { dst: Register, name: String },
    LoadAttr { dst: Register, src: Register, name: String },
    LoadGlobal { dst: Register, name: String },
    LoadNonLoc { dst: Register, name: String },

    Store { dst: Register, src: Register },
    StoreName { dst: Register, name: String },
    StoreConst { dst: Register, csrc: Register },
    StoreAttr { src: Register, obj: Register, name: String },
    StoreConstAttr { csrc: Register, obj: Register, name: String },
    StoreGlobal { src: Register, name: String },
    StoreNonLoc { src: Register, name: String },
    StoreSubsc { src: Register, obj: Register, key: Register },
    StoreConstSubsc { csrc: Register, obj: Register, key: Register },
    StoreSubscConst { src: Register, obj: Register, ckey: Register },
    StoreCSubscC { csrc: Register, obj: Register, ckey: Register },

    StoreIntConst { dst: Register, val: IntConst },
    StoreFloatConst { dst: Register, val: FloatConst },
    StoreBoolConst { dst: Register, val: bool },
    StoreStringConst { dst: Register, val: String },
    StoreNilConst { dst: Register },

    Jmp { addr: Address },
    JmpIfTrue { src: Register, addr: Address },
    JmpIfFalse { src: Register, addr: Address },
    Call { dst: Register, src: Register },
    CallFormatter { dst: Register, name: String },
    PushFrame,
    PopFrame,
    PushCallFrame,
    PopCallFrame,
    Return { src: Register },
    ReturnConst { csrc: Register },
    PushArg { src: Register },
    PushConstArg { csrc: Register },
    PushNamedArg { src: Register, name: String },
    PushUnpacked { src: Register },
    CreateFun { fun: Register, name: String, arg_names: String },
    FunBegin { fun: Register },
    SetDefault { fun: Register, index: IntConst, src: Register },
    SetDefaultConst { fun: Register, index: IntConst, csrc: Register },
    SetType { fun: Register, index: IntConst, ty: Register },
    SetVararg { fun: Register, index: IntConst },

    Import { dst: Register, name: String },
    ImportAll { src: Register },

    PushParent { parent: Register },
    BuildClass { dst: Register, name: String },

    Annotate { dst: Register, name: String, val: Register },
    AnnotateMod { name: String, val: Register },
    Document { dst: Register, val: String },

    Output { src: Register },

    Bin { op: BinOp, form: BinForm, dst: Register, lhs: Register, rhs: Register },

    Not { dst: Register, src: Register },
    Neg { dst: Register, src: Register },

    Assert { src: Register, msg: Register },

    Raise { src: Register },
    Catch { name: String, addr: Address },
    CatchTyped { name: String, ty: Register, addr: Address },
    PopCatch,

    ListPush { dst: Register, src: Register },
    ListPushConst { dst: Register, csrc: Register },
    BuildList { dst: Register },

    BuildDict { dst: Register, keys: Register, vals: Register },
    BuildEnum { dst: Register, vals: Register, name: String },
    BuildSpace { dst: Register, name: String, anonymous: bool },

    CreateRange { form: RangeForm, dst: Register, start: Register, step: Register, end: Register },

    Switch { src: Register, vals: Register, addrs: Register, default_addr: Address },
    For { index: Register, iterator: Register, addr: Address },
    Iter { iterator: Register, collection: Register },

    Finally { addr: Address, caller: Register },
    PopFinally,
    FinallyEnd { caller: Register },
    ForMulti { index: Register, count: u32, iterator: Register, addr: Address },
    SubscLast { dst: Register, src: Register, cindex: Register },
    SubscRest { dst: Register, src: Register, cindex: Register },
}

impl OpCode {
    /// Stable container tag of this instruction.
    pub fn tag(&self) -> OpTag {
        match self {
            Self::End => OpTag::End,
            Self::Load { .. } => OpTag::Load,
            Self::LoadAttr { .. } => OpTag::LoadAttr,
            Self::LoadGlobal { .. } => OpTag::LoadGlobal,
            Self::LoadNonLoc { .. } => OpTag::LoadNonLoc,
            Self::Store { .. } => OpTag::Store,
            Self::StoreName { .. } => OpTag::StoreName,
            Self::StoreConst { .. } => OpTag::StoreConst,
            Self::StoreAttr { .. } => OpTag::StoreAttr,
            Self::StoreConstAttr { .. } => OpTag::StoreConstAttr,
            Self::StoreGlobal { .. } => OpTag::StoreGlobal,
            Self::StoreNonLoc { .. } => OpTag::StoreNonLoc,
            Self::StoreSubsc { .. } => OpTag::StoreSubsc,
            Self::StoreConstSubsc { .. } => OpTag::StoreConstSubsc,
            Self::StoreSubscConst { .. } => OpTag::StoreSubscConst,
            Self::StoreCSubscC { .. } => OpTag::StoreCSubscC,
            Self::StoreIntConst { .. } => OpTag::StoreIntConst,
            Self::StoreFloatConst { .. } => OpTag::StoreFloatConst,
            Self::StoreBoolConst { .. } => OpTag::StoreBoolConst,
            Self::StoreStringConst { .. } => OpTag::StoreStringConst,
            Self::StoreNilConst { .. } => OpTag::StoreNilConst,
            Self::Jmp { .. } => OpTag::Jmp,
            Self::JmpIfTrue { .. } => OpTag::JmpIfTrue,
            Self::JmpIfFalse { .. } => OpTag::JmpIfFalse,
            Self::Call { .. } => OpTag::Call,
            Self::CallFormatter { .. } => OpTag::CallFormatter,
            Self::PushFrame => OpTag::PushFrame,
            Self::PopFrame => OpTag::PopFrame,
            Self::PushCallFrame => OpTag::PushCallFrame,
            Self::PopCallFrame => OpTag::PopCallFrame,
            Self::Return { .. } => OpTag::Return,
            Self::ReturnConst { .. } => OpTag::ReturnConst,
            Self::PushArg { .. } => OpTag::PushArg,
            Self::PushConstArg { .. } => OpTag::PushConstArg,
            Self::PushNamedArg { .. } => OpTag::PushNamedArg,
            Self::PushUnpacked { .. } => OpTag::PushUnpacked,
            Self::CreateFun { .. } => OpTag::CreateFun,
            Self::FunBegin { .. } => OpTag::FunBegin,
            Self::SetDefault { .. } => OpTag::SetDefault,
            Self::SetDefaultConst { .. } => OpTag::SetDefaultConst,
            Self::SetType { .. } => OpTag::SetType,
            Self::SetVararg { .. } => OpTag::SetVararg,
            Self::Import { .. } => OpTag::Import,
            Self::ImportAll { .. } => OpTag::ImportAll,
            Self::PushParent { .. } => OpTag::PushParent,
            Self::BuildClass { .. } => OpTag::BuildClass,
            Self::Annotate { .. } => OpTag::Annotate,
            Self::AnnotateMod { .. } => OpTag::AnnotateMod,
            Self::Document { .. } => OpTag::Document,
            Self::Output { .. } => OpTag::Output,
            Self::Bin { op, form, .. } => {
                let base = OpTag::Concat as u8 + form.family_offset() * BIN_OP_FAMILY;
                OpTag::from_repr(base + op.family_index()).expect("binary opcode tag in range")
            }
            Self::Not { .. } => OpTag::Not,
            Self::Neg { .. } => OpTag::Neg,
            Self::Assert { .. } => OpTag::Assert,
            Self::Raise { .. } => OpTag::Raise,
            Self::Catch { .. } => OpTag::Catch,
            Self::CatchTyped { .. } => OpTag::CatchTyped,
            Self::PopCatch => OpTag::PopCatch,
            Self::ListPush { .. } => OpTag::ListPush,
            Self::ListPushConst { .. } => OpTag::ListPushConst,
            Self::BuildList { .. } => OpTag::BuildList,
            Self::BuildDict { .. } => OpTag::BuildDict,
            Self::BuildEnum { .. } => OpTag::BuildEnum,
            Self::BuildSpace { .. } => OpTag::BuildSpace,
            Self::CreateRange { form, .. } => {
                OpTag::from_repr(OpTag::CreateRange as u8 + form.tag_offset()).expect("range opcode tag in range")
            }
            Self::Switch { .. } => OpTag::Switch,
            Self::For { .. } => OpTag::For,
            Self::Iter { .. } => OpTag::Iter,
            Self::Finally { .. } => OpTag::Finally,
            Self::PopFinally => OpTag::PopFinally,
            Self::FinallyEnd { .. } => OpTag::FinallyEnd,
            Self::ForMulti { .. } => OpTag::ForMulti,
            Self::SubscLast { .. } => OpTag::SubscLast,
            Self::SubscRest { .. } => OpTag::SubscRest,
        }
    }

    /// Instruction mnemonic as it appears in disassembly.
    pub fn mnemonic(&self) -> String {
        match self {
            Self::Bin { op, form, .. } => format!("{}{}", op, form.mnemonic_suffix()),
            other => other.tag().to_string(),
        }
    }
}

fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for OpCode {
    /// Renders the instruction in disassembly form, e.g. `LOAD  %3, "foo"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnem = self.mnemonic();
        match self {
            Self::End | Self::PushFrame | Self::PopFrame | Self::PushCallFrame | Self::PopCallFrame
            | Self::PopCatch | Self::PopFinally => write!(f, "{mnem}"),

            Self::Load { dst, name }
            | Self::LoadGlobal { dst, name }
            | Self::LoadNonLoc { dst, name }
            | Self::StoreName { dst, name }
            | Self::BuildClass { dst, name }
            | Self::CallFormatter { dst, name } => write!(f, "{mnem}  %{dst}, \"{name}\""),
            Self::LoadAttr { dst, src, name } => write!(f, "{mnem}  %{dst}, %{src}, \"{name}\""),

            Self::Store { dst, src }
            | Self::Call { dst, src }
            | Self::Not { dst, src }
            | Self::Neg { dst, src }
            | Self::ListPush { dst, src } => write!(f, "{mnem}  %{dst}, %{src}"),
            Self::StoreConst { dst, csrc } | Self::ListPushConst { dst, csrc } => {
                write!(f, "{mnem}  %{dst}, #{csrc}")
            }
            Self::StoreAttr { src, obj, name } => write!(f, "{mnem}  %{src}, %{obj}, \"{name}\""),
            Self::StoreConstAttr { csrc, obj, name } => write!(f, "{mnem}  #{csrc}, %{obj}, \"{name}\""),
            Self::StoreGlobal { src, name } | Self::StoreNonLoc { src, name } => {
                write!(f, "{mnem}  %{src}, \"{name}\"")
            }
            Self::StoreSubsc { src, obj, key } => write!(f, "{mnem}  %{src}, %{obj}, %{key}"),
            Self::StoreConstSubsc { csrc, obj, key } => write!(f, "{mnem}  #{csrc}, %{obj}, %{key}"),
            Self::StoreSubscConst { src, obj, ckey } => write!(f, "{mnem}  %{src}, %{obj}, #{ckey}"),
            Self::StoreCSubscC { csrc, obj, ckey } => write!(f, "{mnem}  #{csrc}, %{obj}, #{ckey}"),

            Self::StoreIntConst { dst, val } => write!(f, "{mnem}  #{dst}, {val}"),
            Self::StoreFloatConst { dst, val } => write!(f, "{mnem}  #{dst}, {val}"),
            Self::StoreBoolConst { dst, val } => {
                write!(f, "{mnem}  #{dst}, {}", if *val { "true" } else { "false" })
            }
            Self::StoreStringConst { dst, val } => write!(f, "{mnem}  #{dst}, \"{}\"", sanitize(val)),
            Self::StoreNilConst { dst } => write!(f, "{mnem}  #{dst}"),

            Self::Jmp { addr } => write!(f, "{mnem}  {addr}"),
            Self::JmpIfTrue { src, addr } | Self::JmpIfFalse { src, addr } => {
                write!(f, "{mnem}  %{src}, {addr}")
            }
            Self::Return { src } | Self::PushArg { src } | Self::PushUnpacked { src }
            | Self::Output { src } | Self::Raise { src } | Self::ImportAll { src } => {
                write!(f, "{mnem}  %{src}")
            }
            Self::ReturnConst { csrc } | Self::PushConstArg { csrc } => write!(f, "{mnem}  #{csrc}"),
            Self::PushNamedArg { src, name } => write!(f, "{mnem}  %{src}, \"{name}\""),

            Self::CreateFun { fun, name, arg_names } => {
                write!(f, "{mnem}  %{fun}, \"{name}\", \"{arg_names}\"")
            }
            Self::FunBegin { fun } => write!(f, "{mnem}  %{fun}"),
            Self::SetDefault { fun, index, src } => write!(f, "{mnem}  %{fun}, {index}, %{src}"),
            Self::SetDefaultConst { fun, index, csrc } => write!(f, "{mnem}  %{fun}, {index}, #{csrc}"),
            Self::SetType { fun, index, ty } => write!(f, "{mnem}  %{fun}, {index}, %{ty}"),
            Self::SetVararg { fun, index } => write!(f, "{mnem}  %{fun}, {index}"),

            Self::Import { dst, name } => write!(f, "{mnem}  %{dst}, \"{name}\""),
            Self::PushParent { parent } => write!(f, "{mnem}  %{parent}"),

            Self::Annotate { dst, name, val } => write!(f, "{mnem}  %{dst}, \"{name}\", %{val}"),
            Self::AnnotateMod { name, val } => write!(f, "{mnem}  \"{name}\", %{val}"),
            Self::Document { dst, val } => write!(f, "{mnem}  %{dst}, \"{}\"", sanitize(val)),

            Self::Bin { form, dst, lhs, rhs, .. } => match form {
                BinForm::RegReg => write!(f, "{mnem}  %{dst}, %{lhs}, %{rhs}"),
                BinForm::ConstReg => write!(f, "{mnem}  %{dst}, #{lhs}, %{rhs}"),
                BinForm::RegConst => write!(f, "{mnem}  %{dst}, %{lhs}, #{rhs}"),
            },

            Self::Assert { src, msg } => write!(f, "{mnem}  %{src}, %{msg}"),

            Self::Catch { name, addr } => write!(f, "{mnem}  \"{name}\", {addr}"),
            Self::CatchTyped { name, ty, addr } => write!(f, "{mnem}  \"{name}\", %{ty}, {addr}"),

            Self::BuildList { dst } => write!(f, "{mnem}  %{dst}"),
            Self::BuildDict { dst, keys, vals } => write!(f, "{mnem}  %{dst}, %{keys}, %{vals}"),
            Self::BuildEnum { dst, vals, name } => write!(f, "{mnem}  %{dst}, %{vals}, \"{name}\""),
            Self::BuildSpace { dst, name, .. } => write!(f, "{mnem}  %{dst}, \"{name}\""),

            Self::CreateRange { form, dst, start, step, end } => {
                let s = |c: bool| if c { "#" } else { "%" };
                write!(
                    f,
                    "{mnem}  %{dst}, {}{start}, {}{step}, {}{end}",
                    s(form.start_const),
                    s(form.step_const),
                    s(form.end_const)
                )
            }

            Self::Switch { src, vals, addrs, default_addr } => {
                write!(f, "{mnem}  %{src}, %{vals}, %{addrs}, {default_addr}")
            }
            Self::For { index, iterator, addr } => write!(f, "{mnem}  %{index}, %{iterator}, {addr}"),
            Self::Iter { iterator, collection } => write!(f, "{mnem}  %{iterator}, %{collection}"),

            Self::Finally { addr, caller } => write!(f, "{mnem}  {addr}, #{caller}"),
            Self::FinallyEnd { caller } => write!(f, "{mnem}  #{caller}"),
            Self::ForMulti { index, count, iterator, addr } => {
                write!(f, "{mnem}  %{index}, {count}, %{iterator}, {addr}")
            }
            Self::SubscLast { dst, src, cindex } | Self::SubscRest { dst, src, cindex } => {
                write!(f, "{mnem}  %{dst}, %{src}, #{cindex}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::EnumCount;

    use super::*;

    #[test]
    fn tag_table_is_stable() {
        // Serialised containers depend on these exact byte values.
        assert_eq!(OpTag::End as u8, 0);
        assert_eq!(OpTag::Load as u8, 1);
        assert_eq!(OpTag::StoreIntConst as u8, 16);
        assert_eq!(OpTag::Jmp as u8, 21);
        assert_eq!(OpTag::Output as u8, 49);
        assert_eq!(OpTag::Concat as u8, 50);
        assert_eq!(OpTag::Subsc as u8, 67);
        assert_eq!(OpTag::Concat2 as u8, 68);
        assert_eq!(OpTag::Concat3 as u8, 86);
        assert_eq!(OpTag::Not as u8, 104);
        assert_eq!(OpTag::Raise as u8, 107);
        assert_eq!(OpTag::CreateRange as u8, 117);
        assert_eq!(OpTag::CreateRange8 as u8, 124);
        assert_eq!(OpTag::Iter as u8, 127);
        assert_eq!(OpTag::Finally as u8, 128);
        assert_eq!(OpTag::SubscRest as u8, 133);
        assert!(OpTag::COUNT <= 0xFF, "opcodes no longer fit one byte");
    }

    #[test]
    fn bin_tags_round_trip() {
        for form in [BinForm::RegReg, BinForm::ConstReg, BinForm::RegConst] {
            for idx in 0..BIN_OP_FAMILY {
                let op = BinOp::from_family_index(idx);
                let code = OpCode::Bin { op, form, dst: 0, lhs: 1, rhs: 2 };
                let tag = code.tag() as u8;
                let family = (tag - OpTag::Concat as u8) / BIN_OP_FAMILY;
                let index = (tag - OpTag::Concat as u8) % BIN_OP_FAMILY;
                assert_eq!(index, op.family_index());
                assert_eq!(family, match form {
                    BinForm::RegReg => 0,
                    BinForm::ConstReg => 1,
                    BinForm::RegConst => 2,
                });
            }
        }
    }

    #[test]
    fn range_forms_round_trip() {
        for offset in 0..8 {
            assert_eq!(RangeForm::from_tag_offset(offset).tag_offset(), offset);
        }
    }

    #[test]
    fn disassembly_format() {
        let op = OpCode::Load { dst: 3, name: "foo".into() };
        assert_eq!(op.to_string(), "LOAD  %3, \"foo\"");
        let op = OpCode::Bin { op: BinOp::Add, form: BinForm::RegConst, dst: 6, lhs: 0, rhs: 202 };
        assert_eq!(op.to_string(), "ADD3  %6, %0, #202");
        let op = OpCode::StoreStringConst { dst: 200, val: "a\nb".into() };
        assert_eq!(op.to_string(), "STORE_STRING_CONST  #200, \"a\\nb\"");
    }
}
