//! Serialises a [`Bytecode`] program into the container wire format.
//!
//! Layout per instruction: one tag byte, then the fixed operand encoding:
//! registers and addresses as u32 LE, string constants as u32 LE length plus
//! UTF-8 bytes, int constants as i64 LE two's-complement, float constants as
//! f64 LE IEEE-754, bools as a single byte.

use std::io::{self, Write};

use super::{Address, Bytecode, OpCode, Register, BYTECODE_ID};

pub struct BytecodeWriter<W: Write> {
    out: W,
}

impl<W: Write> BytecodeWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes the header and every instruction, returning the sink.
    pub fn write(mut self, bc: &Bytecode) -> io::Result<W> {
        self.out.write_all(&BYTECODE_ID.to_le_bytes())?;
        self.out.write_all(&bc.header.checksum.to_le_bytes())?;
        self.out.write_all(&bc.header.version.to_le_bytes())?;
        self.out.write_all(&bc.header.timestamp.to_le_bytes())?;
        for op in bc.ops() {
            self.write_opcode(op)?;
        }
        Ok(self.out)
    }

    fn reg(&mut self, r: Register) -> io::Result<()> {
        self.out.write_all(&r.to_le_bytes())
    }

    fn addr(&mut self, a: Address) -> io::Result<()> {
        self.out.write_all(&a.to_le_bytes())
    }

    fn string(&mut self, s: &str) -> io::Result<()> {
        let len = u32::try_from(s.len()).expect("string constant exceeds u32 length");
        self.out.write_all(&len.to_le_bytes())?;
        self.out.write_all(s.as_bytes())
    }

    fn int(&mut self, v: i64) -> io::Result<()> {
        self.out.write_all(&v.to_le_bytes())
    }

    fn float(&mut self, v: f64) -> io::Result<()> {
        self.out.write_all(&v.to_le_bytes())
    }

    fn boolean(&mut self, v: bool) -> io::Result<()> {
        self.out.write_all(&[u8::from(v)])
    }

    fn write_opcode(&mut self, op: &OpCode) -> io::Result<()> {
        self.out.write_all(&[op.tag() as u8])?;
        match op {
            OpCode::End
            | OpCode::PushFrame
            | OpCode::PopFrame
            | OpCode::PushCallFrame
            | OpCode::PopCallFrame
            | OpCode::PopCatch
            | OpCode::PopFinally => Ok(()),

            OpCode::Load { dst, name }
            | OpCode::LoadGlobal { dst, name }
            | OpCode::LoadNonLoc { dst, name }
            | OpCode::StoreName { dst, name }
            | OpCode::BuildClass { dst, name }
            | OpCode::CallFormatter { dst, name }
            | OpCode::Import { dst, name } => {
                self.reg(*dst)?;
                self.string(name)
            }
            OpCode::LoadAttr { dst, src, name } => {
                self.reg(*dst)?;
                self.reg(*src)?;
                self.string(name)
            }

            OpCode::Store { dst, src }
            | OpCode::StoreConst { dst, csrc: src }
            | OpCode::Call { dst, src }
            | OpCode::Not { dst, src }
            | OpCode::Neg { dst, src }
            | OpCode::ListPush { dst, src }
            | OpCode::ListPushConst { dst, csrc: src } => {
                self.reg(*dst)?;
                self.reg(*src)
            }
            OpCode::StoreAttr { src, obj, name } | OpCode::StoreConstAttr { csrc: src, obj, name } => {
                self.reg(*src)?;
                self.reg(*obj)?;
                self.string(name)
            }
            OpCode::StoreGlobal { src, name }
            | OpCode::StoreNonLoc { src, name }
            | OpCode::PushNamedArg { src, name } => {
                self.reg(*src)?;
                self.string(name)
            }
            OpCode::StoreSubsc { src, obj, key }
            | OpCode::StoreConstSubsc { csrc: src, obj, key }
            | OpCode::StoreSubscConst { src, obj, ckey: key }
            | OpCode::StoreCSubscC { csrc: src, obj, ckey: key } => {
                self.reg(*src)?;
                self.reg(*obj)?;
                self.reg(*key)
            }

            OpCode::StoreIntConst { dst, val } => {
                self.reg(*dst)?;
                self.int(*val)
            }
            OpCode::StoreFloatConst { dst, val } => {
                self.reg(*dst)?;
                self.float(*val)
            }
            OpCode::StoreBoolConst { dst, val } => {
                self.reg(*dst)?;
                self.boolean(*val)
            }
            OpCode::StoreStringConst { dst, val } => {
                self.reg(*dst)?;
                self.string(val)
            }
            OpCode::StoreNilConst { dst } | OpCode::BuildList { dst } => self.reg(*dst),

            OpCode::Jmp { addr } => self.addr(*addr),
            OpCode::JmpIfTrue { src, addr } | OpCode::JmpIfFalse { src, addr } => {
                self.reg(*src)?;
                self.addr(*addr)
            }
            OpCode::Return { src }
            | OpCode::ReturnConst { csrc: src }
            | OpCode::PushArg { src }
            | OpCode::PushConstArg { csrc: src }
            | OpCode::PushUnpacked { src }
            | OpCode::ImportAll { src }
            | OpCode::Output { src }
            | OpCode::Raise { src }
            | OpCode::PushParent { parent: src }
            | OpCode::FunBegin { fun: src }
            | OpCode::FinallyEnd { caller: src } => self.reg(*src),

            OpCode::CreateFun { fun, name, arg_names } => {
                self.reg(*fun)?;
                self.string(name)?;
                self.string(arg_names)
            }
            OpCode::SetDefault { fun, index, src } | OpCode::SetDefaultConst { fun, index, csrc: src } => {
                self.reg(*fun)?;
                self.int(*index)?;
                self.reg(*src)
            }
            OpCode::SetType { fun, index, ty } => {
                self.reg(*fun)?;
                self.int(*index)?;
                self.reg(*ty)
            }
            OpCode::SetVararg { fun, index } => {
                self.reg(*fun)?;
                self.int(*index)
            }

            OpCode::Annotate { dst, name, val } => {
                self.reg(*dst)?;
                self.string(name)?;
                self.reg(*val)
            }
            OpCode::AnnotateMod { name, val } => {
                self.string(name)?;
                self.reg(*val)
            }
            OpCode::Document { dst, val } => {
                self.reg(*dst)?;
                self.string(val)
            }

            OpCode::Bin { dst, lhs, rhs, .. } => {
                self.reg(*dst)?;
                self.reg(*lhs)?;
                self.reg(*rhs)
            }

            OpCode::Assert { src, msg } => {
                self.reg(*src)?;
                self.reg(*msg)
            }

            OpCode::Catch { name, addr } => {
                self.string(name)?;
                self.addr(*addr)
            }
            OpCode::CatchTyped { name, ty, addr } => {
                self.string(name)?;
                self.reg(*ty)?;
                self.addr(*addr)
            }

            OpCode::BuildDict { dst, keys, vals } => {
                self.reg(*dst)?;
                self.reg(*keys)?;
                self.reg(*vals)
            }
            OpCode::BuildEnum { dst, vals, name } => {
                self.reg(*dst)?;
                self.reg(*vals)?;
                self.string(name)
            }
            OpCode::BuildSpace { dst, name, anonymous } => {
                self.reg(*dst)?;
                self.string(name)?;
                self.boolean(*anonymous)
            }

            OpCode::CreateRange { dst, start, step, end, .. } => {
                self.reg(*dst)?;
                self.reg(*start)?;
                self.reg(*step)?;
                self.reg(*end)
            }

            OpCode::Switch { src, vals, addrs, default_addr } => {
                self.reg(*src)?;
                self.reg(*vals)?;
                self.reg(*addrs)?;
                self.addr(*default_addr)
            }
            OpCode::For { index, iterator, addr } => {
                self.reg(*index)?;
                self.reg(*iterator)?;
                self.addr(*addr)
            }
            OpCode::Iter { iterator, collection } => {
                self.reg(*iterator)?;
                self.reg(*collection)
            }

            OpCode::Finally { addr, caller } => {
                self.addr(*addr)?;
                self.reg(*caller)
            }
            OpCode::ForMulti { index, count, iterator, addr } => {
                self.reg(*index)?;
                self.reg(*count)?;
                self.reg(*iterator)?;
                self.addr(*addr)
            }
            OpCode::SubscLast { dst, src, cindex } | OpCode::SubscRest { dst, src, cindex } => {
                self.reg(*dst)?;
                self.reg(*src)?;
                self.reg(*cindex)
            }
        }
    }
}
