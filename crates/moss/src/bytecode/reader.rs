//! Deserialises a container produced by [`super::BytecodeWriter`].

use std::io::{self, Read};

use super::{
    opcode::BIN_OP_FAMILY, Address, BinForm, BinOp, Bytecode, BytecodeHeader, OpCode, OpTag, RangeForm, Register,
    BYTECODE_ID,
};

pub struct BytecodeReader<R: Read> {
    input: R,
}

fn bad_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

impl<R: Read> BytecodeReader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Reads the header and instructions until end of stream.
    pub fn read(mut self) -> io::Result<Bytecode> {
        let id = self.u32()?;
        if id != BYTECODE_ID {
            return Err(bad_data(format!("bad container id: {id:#010x}")));
        }
        let header = BytecodeHeader {
            checksum: self.u32()?,
            version: self.u32()?,
            timestamp: self.u32()?,
        };

        let mut ops = Vec::new();
        loop {
            let mut tag_byte = [0u8; 1];
            match self.input.read_exact(&mut tag_byte) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            ops.push(self.read_opcode(tag_byte[0])?);
        }

        let mut bc = Bytecode::from_ops(ops);
        bc.header = header;
        Ok(bc)
    }

    fn u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.input.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn reg(&mut self) -> io::Result<Register> {
        self.u32()
    }

    fn addr(&mut self) -> io::Result<Address> {
        self.u32()
    }

    fn string(&mut self) -> io::Result<String> {
        let len = self.u32()? as usize;
        let mut buf = vec![0u8; len];
        self.input.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| bad_data("string constant is not valid UTF-8"))
    }

    fn int(&mut self) -> io::Result<i64> {
        let mut buf = [0u8; 8];
        self.input.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn float(&mut self) -> io::Result<f64> {
        let mut buf = [0u8; 8];
        self.input.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    fn boolean(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 1];
        self.input.read_exact(&mut buf)?;
        Ok(buf[0] != 0)
    }

    fn read_opcode(&mut self, tag_byte: u8) -> io::Result<OpCode> {
        // The binary-expression and range families decode by tag arithmetic.
        if tag_byte >= OpTag::Concat as u8 && tag_byte <= OpTag::Subsc3 as u8 {
            let rel = tag_byte - OpTag::Concat as u8;
            let form = match rel / BIN_OP_FAMILY {
                0 => BinForm::RegReg,
                1 => BinForm::ConstReg,
                2 => BinForm::RegConst,
                _ => unreachable!(),
            };
            let op = BinOp::from_family_index(rel % BIN_OP_FAMILY);
            return Ok(OpCode::Bin {
                op,
                form,
                dst: self.reg()?,
                lhs: self.reg()?,
                rhs: self.reg()?,
            });
        }
        if tag_byte >= OpTag::CreateRange as u8 && tag_byte <= OpTag::CreateRange8 as u8 {
            let form = RangeForm::from_tag_offset(tag_byte - OpTag::CreateRange as u8);
            return Ok(OpCode::CreateRange {
                form,
                dst: self.reg()?,
                start: self.reg()?,
                step: self.reg()?,
                end: self.reg()?,
            });
        }

        let tag = OpTag::from_repr(tag_byte).ok_or_else(|| bad_data(format!("unknown opcode tag {tag_byte}")))?;
        let op = match tag {
            OpTag::End => OpCode::End,

            OpTag::Load => OpCode::Load { dst: self.reg()?, name: self.string()? },
            OpTag::LoadAttr => OpCode::LoadAttr { dst: self.reg()?, src: self.reg()?, name: self.string()? },
            OpTag::LoadGlobal => OpCode::LoadGlobal { dst: self.reg()?, name: self.string()? },
            OpTag::LoadNonLoc => OpCode::LoadNonLoc { dst: self.reg()?, name: self.string()? },

            OpTag::Store => OpCode::Store { dst: self.reg()?, src: self.reg()? },
            OpTag::StoreName => OpCode::StoreName { dst: self.reg()?, name: self.string()? },
            OpTag::StoreConst => OpCode::StoreConst { dst: self.reg()?, csrc: self.reg()? },
            OpTag::StoreAttr => OpCode::StoreAttr { src: self.reg()?, obj: self.reg()?, name: self.string()? },
            OpTag::StoreConstAttr => {
                OpCode::StoreConstAttr { csrc: self.reg()?, obj: self.reg()?, name: self.string()? }
            }
            OpTag::StoreGlobal => OpCode::StoreGlobal { src: self.reg()?, name: self.string()? },
            OpTag::StoreNonLoc => OpCode::StoreNonLoc { src: self.reg()?, name: self.string()? },
            OpTag::StoreSubsc => OpCode::StoreSubsc { src: self.reg()?, obj: self.reg()?, key: self.reg()? },
            OpTag::StoreConstSubsc => {
                OpCode::StoreConstSubsc { csrc: self.reg()?, obj: self.reg()?, key: self.reg()? }
            }
            OpTag::StoreSubscConst => {
                OpCode::StoreSubscConst { src: self.reg()?, obj: self.reg()?, ckey: self.reg()? }
            }
            OpTag::StoreCSubscC => OpCode::StoreCSubscC { csrc: self.reg()?, obj: self.reg()?, ckey: self.reg()? },

            OpTag::StoreIntConst => OpCode::StoreIntConst { dst: self.reg()?, val: self.int()? },
            OpTag::StoreFloatConst => OpCode::StoreFloatConst { dst: self.reg()?, val: self.float()? },
            OpTag::StoreBoolConst => OpCode::StoreBoolConst { dst: self.reg()?, val: self.boolean()? },
            OpTag::StoreStringConst => OpCode::StoreStringConst { dst: self.reg()?, val: self.string()? },
            OpTag::StoreNilConst => OpCode::StoreNilConst { dst: self.reg()? },

            OpTag::Jmp => OpCode::Jmp { addr: self.addr()? },
            OpTag::JmpIfTrue => OpCode::JmpIfTrue { src: self.reg()?, addr: self.addr()? },
            OpTag::JmpIfFalse => OpCode::JmpIfFalse { src: self.reg()?, addr: self.addr()? },
            OpTag::Call => OpCode::Call { dst: self.reg()?, src: self.reg()? },
            OpTag::CallFormatter => OpCode::CallFormatter { dst: self.reg()?, name: self.string()? },
            OpTag::PushFrame => OpCode::PushFrame,
            OpTag::PopFrame => OpCode::PopFrame,
            OpTag::PushCallFrame => OpCode::PushCallFrame,
            OpTag::PopCallFrame => OpCode::PopCallFrame,
            OpTag::Return => OpCode::Return { src: self.reg()? },
            OpTag::ReturnConst => OpCode::ReturnConst { csrc: self.reg()? },
            OpTag::PushArg => OpCode::PushArg { src: self.reg()? },
            OpTag::PushConstArg => OpCode::PushConstArg { csrc: self.reg()? },
            OpTag::PushNamedArg => OpCode::PushNamedArg { src: self.reg()?, name: self.string()? },
            OpTag::PushUnpacked => OpCode::PushUnpacked { src: self.reg()? },
            OpTag::CreateFun => {
                OpCode::CreateFun { fun: self.reg()?, name: self.string()?, arg_names: self.string()? }
            }
            OpTag::FunBegin => OpCode::FunBegin { fun: self.reg()? },
            OpTag::SetDefault => OpCode::SetDefault { fun: self.reg()?, index: self.int()?, src: self.reg()? },
            OpTag::SetDefaultConst => {
                OpCode::SetDefaultConst { fun: self.reg()?, index: self.int()?, csrc: self.reg()? }
            }
            OpTag::SetType => OpCode::SetType { fun: self.reg()?, index: self.int()?, ty: self.reg()? },
            OpTag::SetVararg => OpCode::SetVararg { fun: self.reg()?, index: self.int()? },

            OpTag::Import => OpCode::Import { dst: self.reg()?, name: self.string()? },
            OpTag::ImportAll => OpCode::ImportAll { src: self.reg()? },

            OpTag::PushParent => OpCode::PushParent { parent: self.reg()? },
            OpTag::BuildClass => OpCode::BuildClass { dst: self.reg()?, name: self.string()? },

            OpTag::Annotate => OpCode::Annotate { dst: self.reg()?, name: self.string()?, val: self.reg()? },
            OpTag::AnnotateMod => OpCode::AnnotateMod { name: self.string()?, val: self.reg()? },
            OpTag::Document => OpCode::Document { dst: self.reg()?, val: self.string()? },

            OpTag::Output => OpCode::Output { src: self.reg()? },

            OpTag::Not => OpCode::Not { dst: self.reg()?, src: self.reg()? },
            OpTag::Neg => OpCode::Neg { dst: self.reg()?, src: self.reg()? },

            OpTag::Assert => OpCode::Assert { src: self.reg()?, msg: self.reg()? },

            OpTag::Raise => OpCode::Raise { src: self.reg()? },
            OpTag::Catch => OpCode::Catch { name: self.string()?, addr: self.addr()? },
            OpTag::CatchTyped => {
                OpCode::CatchTyped { name: self.string()?, ty: self.reg()?, addr: self.addr()? }
            }
            OpTag::PopCatch => OpCode::PopCatch,

            OpTag::ListPush => OpCode::ListPush { dst: self.reg()?, src: self.reg()? },
            OpTag::ListPushConst => OpCode::ListPushConst { dst: self.reg()?, csrc: self.reg()? },
            OpTag::BuildList => OpCode::BuildList { dst: self.reg()? },

            OpTag::BuildDict => OpCode::BuildDict { dst: self.reg()?, keys: self.reg()?, vals: self.reg()? },
            OpTag::BuildEnum => OpCode::BuildEnum { dst: self.reg()?, vals: self.reg()?, name: self.string()? },
            OpTag::BuildSpace => {
                OpCode::BuildSpace { dst: self.reg()?, name: self.string()?, anonymous: self.boolean()? }
            }

            OpTag::Switch => OpCode::Switch {
                src: self.reg()?,
                vals: self.reg()?,
                addrs: self.reg()?,
                default_addr: self.addr()?,
            },
            OpTag::For => OpCode::For { index: self.reg()?, iterator: self.reg()?, addr: self.addr()? },
            OpTag::Iter => OpCode::Iter { iterator: self.reg()?, collection: self.reg()? },

            OpTag::Finally => OpCode::Finally { addr: self.addr()?, caller: self.reg()? },
            OpTag::PopFinally => OpCode::PopFinally,
            OpTag::FinallyEnd => OpCode::FinallyEnd { caller: self.reg()? },
            OpTag::ForMulti => OpCode::ForMulti {
                index: self.reg()?,
                count: self.reg()?,
                iterator: self.reg()?,
                addr: self.addr()?,
            },
            OpTag::SubscLast => OpCode::SubscLast { dst: self.reg()?, src: self.reg()?, cindex: self.reg()? },
            OpTag::SubscRest => OpCode::SubscRest { dst: self.reg()?, src: self.reg()?, cindex: self.reg()? },

            // Families handled above by tag arithmetic.
            _ => return Err(bad_data(format!("unhandled opcode tag {tag_byte}"))),
        };
        Ok(op)
    }
}
