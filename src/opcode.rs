use std::io;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

/// Instructions of the routine machine. `0x00` is deliberately not an
/// opcode so a cleared code section never executes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive)]
pub enum OpCode {
    // Stack switch
    Enter = 1,
    Leave,
    Return,
    // Stack
    Push,
    Load,
    Store,
    // Binary operators
    Add,
    Sub,
    Mul,
    // Effects
    Print,
    Release,
    PrintLog,
}

impl OpCode {
    pub fn decode(byte: u8) -> Option<Self> {
        OpCode::from_u8(byte)
    }

    /// Size of the operand following the opcode byte.
    pub fn operand_len(self) -> usize {
        match self {
            OpCode::Push | OpCode::Load | OpCode::Store | OpCode::Print | OpCode::Release => 8,
            OpCode::Enter
            | OpCode::Leave
            | OpCode::Return
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::PrintLog => 0,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Enter => "OP_ENTER",
            OpCode::Leave => "OP_LEAVE",
            OpCode::Return => "OP_RETURN",
            OpCode::Push => "OP_PUSH",
            OpCode::Load => "OP_LOAD",
            OpCode::Store => "OP_STORE",
            OpCode::Add => "OP_ADD",
            OpCode::Sub => "OP_SUB",
            OpCode::Mul => "OP_MUL",
            OpCode::Print => "OP_PRINT",
            OpCode::Release => "OP_RELEASE",
            OpCode::PrintLog => "OP_PRINT_LOG",
        }
    }
}

/// The encoded instructions for one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    code: Box<[u8]>,
}

impl Routine {
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn operand(&self, offset: usize) -> Option<u64> {
        let bytes = self.code.get(offset..offset + 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Some(u64::from_le_bytes(word))
    }

    /// Write a listing of the routine, one instruction per line.
    pub fn write(&self, name: &str, writer: &mut dyn io::Write) -> io::Result<()> {
        writeln!(writer, "==== {} ====", name)?;
        let mut offset = 0;
        while offset < self.code.len() {
            let byte = self.code[offset];
            match OpCode::decode(byte) {
                None => {
                    writeln!(writer, "{:04} | OP_UNKNOWN {:#04x}", offset, byte)?;
                    offset += 1;
                }
                Some(opcode) if opcode.operand_len() == 0 => {
                    writeln!(writer, "{:04} | {}", offset, opcode.mnemonic())?;
                    offset += 1;
                }
                Some(opcode) => {
                    match self.operand(offset + 1) {
                        Some(operand) => writeln!(
                            writer,
                            "{:04} | {:-12} | {:#x}",
                            offset,
                            opcode.mnemonic(),
                            operand
                        )?,
                        None => writeln!(writer, "{:04} | {} <truncated>", offset, opcode.mnemonic())?,
                    }
                    offset += 1 + opcode.operand_len();
                }
            }
        }
        Ok(())
    }

    pub fn listing(&self, name: &str) -> String {
        let mut buf = vec![];
        // Writing into a Vec cannot fail.
        let _ = self.write(name, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[derive(Default)]
pub struct RoutineBuilder {
    code: Vec<u8>,
}

impl RoutineBuilder {
    pub fn push_op(&mut self, opcode: OpCode) {
        self.code.push(opcode as u8);
    }

    pub fn push_op_with(&mut self, opcode: OpCode, operand: u64) {
        debug_assert_eq!(opcode.operand_len(), 8);
        self.code.push(opcode as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn build(&mut self) -> Routine {
        let this = std::mem::take(self);
        Routine {
            code: this.code.into_boxed_slice(),
        }
    }
}
