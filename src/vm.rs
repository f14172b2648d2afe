//! The machine that runs routines out of the arena's code section.
//!
//! It has two registers: `ip` and `sp`. The scratch stack grows down and is
//! addressed in 8-byte words. Values on it use the same layout as data cells,
//! so loads and stores are plain word copies.

use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use crate::{
    allocator,
    arena::Arena,
    error::Fault,
    opcode::OpCode,
    side_effect::OutputSink,
    value::{Tag, INLINE_CAPACITY, STR_CELL_SIZE, WORD},
};

/// Value `sp` holds while the caller's stack is installed.
const CALLER_SP: u64 = 0;

pub(crate) struct Vm<'run> {
    arena: &'run mut Arena,
    sink: &'run mut dyn OutputSink,
    log_path: &'run Path,
    ip: u64,
    sp: u64,
    /// Whether the routine stack is installed.
    entered: bool,
}

impl<'run> Vm<'run> {
    pub(crate) fn new(
        arena: &'run mut Arena,
        sink: &'run mut dyn OutputSink,
        log_path: &'run Path,
    ) -> Self {
        let ip = arena.code_base();
        Self {
            arena,
            sink,
            log_path,
            ip,
            sp: CALLER_SP,
            entered: false,
        }
    }

    /// Run the routine at the start of the code section until it returns.
    pub(crate) fn run(&mut self) -> Result<u64, Fault> {
        self.ip = self.arena.code_base();
        self.sp = CALLER_SP;
        self.entered = false;
        loop {
            match self.step() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(fault) => {
                    self.unwind();
                    return Err(fault);
                }
            }
        }
    }

    /// Put the caller's stack back after a fault so the saved cell holds a
    /// routine stack pointer again.
    fn unwind(&mut self) {
        if !self.entered {
            return;
        }
        self.entered = false;
        if let Err(err) = self.switch_stack() {
            tracing::warn!(error = %err, "cannot restore caller stack");
        }
    }

    fn fetch_operand(&mut self) -> Result<u64, Fault> {
        let operand = self.arena.read_u64(self.ip)?;
        self.ip += WORD;
        Ok(operand)
    }

    fn push(&mut self, word: u64) -> Result<(), Fault> {
        let sp = self.sp.wrapping_sub(WORD);
        if sp < self.arena.stack_base() || sp >= self.arena.stack_top() {
            return Err(Fault::StackOverflow { sp });
        }
        self.arena.write_u64(sp, word)?;
        self.sp = sp;
        Ok(())
    }

    fn pop(&mut self) -> Result<u64, Fault> {
        let word = self.peek(0)?;
        self.sp += WORD;
        Ok(word)
    }

    /// Read the word `offset` bytes above the top of the stack.
    fn peek(&self, offset: u64) -> Result<u64, Fault> {
        let underflow = || Fault::StackUnderflow { sp: self.sp };
        let address = self.sp.checked_add(offset).ok_or_else(underflow)?;
        if self.sp < self.arena.stack_base() || address.saturating_add(WORD) > self.arena.stack_top() {
            return Err(underflow());
        }
        self.arena.read_u64(address)
    }

    fn drop_bytes(&mut self, len: u64) -> Result<(), Fault> {
        let sp = self.sp.saturating_add(len);
        if sp > self.arena.stack_top() {
            return Err(Fault::StackUnderflow { sp });
        }
        self.sp = sp;
        Ok(())
    }

    /// Exchange `sp` with the saved-stack-pointer cell.
    fn switch_stack(&mut self) -> Result<(), Fault> {
        let cell = self.arena.saved_sp_cell();
        let other = self.arena.read_u64(cell)?;
        self.arena.write_u64(cell, self.sp)?;
        self.sp = other;
        Ok(())
    }

    fn step(&mut self) -> Result<Option<u64>, Fault> {
        let address = self.ip;
        let byte = self.arena.read_u8(address)?;
        let opcode = OpCode::decode(byte).ok_or(Fault::IllegalInstruction { address, byte })?;
        self.ip += 1;

        match opcode {
            OpCode::Enter => {
                self.switch_stack()?;
                self.entered = true;
            }
            OpCode::Leave => {
                self.switch_stack()?;
                self.entered = false;
                if self.sp != CALLER_SP {
                    return Err(Fault::StackSwitch {
                        expected: CALLER_SP,
                        found: self.sp,
                    });
                }
            }
            OpCode::Return => return Ok(Some(0)),
            OpCode::Push => {
                let word = self.fetch_operand()?;
                self.push(word)?;
            }
            OpCode::Load => {
                let address = self.fetch_operand()?;
                self.load(address)?;
            }
            OpCode::Store => {
                let address = self.fetch_operand()?;
                self.store(address)?;
            }
            OpCode::Add => self.binop(u64::wrapping_add)?,
            OpCode::Sub => self.binop(u64::wrapping_sub)?,
            OpCode::Mul => self.binop(u64::wrapping_mul)?,
            OpCode::Print => {
                let address = self.fetch_operand()?;
                self.print(address)?;
            }
            OpCode::Release => {
                let address = self.fetch_operand()?;
                allocator::mark_free(self.arena, address)?;
            }
            OpCode::PrintLog => self.print_log()?,
        }
        Ok(None)
    }

    /// Combine the first words of the two top slots as raw integers.
    ///
    /// The result replaces the word 16 bytes above the top, so it inherits
    /// whatever tag sits right after it: `{r, 0}` for two integers, but a
    /// string operand leaks its own words into the result.
    fn binop(&mut self, op: fn(u64, u64) -> u64) -> Result<(), Fault> {
        let lhs = self.peek(0)?;
        let rhs = self.peek(16)?;
        self.drop_bytes(24)?;
        self.push(op(lhs, rhs))
    }

    fn load(&mut self, address: u64) -> Result<(), Fault> {
        let tag = self.arena.read_u64(address + WORD)?;
        match Tag::of(tag) {
            Tag::Integer => {
                self.push(tag)?;
                self.push(self.arena.read_u64(address)?)?;
            }
            Tag::String { .. } => {
                for word in (0..4).rev() {
                    self.push(self.arena.read_u64(address + word * WORD)?)?;
                }
            }
        }
        Ok(())
    }

    fn store(&mut self, address: u64) -> Result<(), Fault> {
        let tag = self.peek(WORD)?;
        let new_len = match Tag::of(tag) {
            Tag::Integer => {
                for word in 0..2 {
                    let value = self.pop()?;
                    self.arena.write_u64(address + word * WORD, value)?;
                }
                return Ok(());
            }
            Tag::String { len } => len,
        };

        let current_len = self.arena.read_u64(address + WORD)?;
        if current_len as i64 >= new_len as i64 {
            // Reuse the buffer the cell already points at; its header stays.
            let dst = self.arena.read_u64(address)?;
            let src = self.pop()?;
            self.drop_bytes(STR_CELL_SIZE - WORD)?;
            return self.arena.copy_forward(src, dst, new_len);
        }

        if new_len as i64 <= INLINE_CAPACITY as i64 {
            // Keep the content inside the cell and point the cell at itself.
            self.pop()?;
            self.arena.write_u64(address, address + 2 * WORD)?;
            for word in 1..4 {
                let value = self.pop()?;
                self.arena.write_u64(address + word * WORD, value)?;
            }
        } else {
            for word in 0..4 {
                let value = self.pop()?;
                self.arena.write_u64(address + word * WORD, value)?;
            }
        }
        Ok(())
    }

    fn print(&mut self, address: u64) -> Result<(), Fault> {
        let first = self.arena.read_u64(address)?;
        match Tag::of(self.arena.read_u64(address + WORD)?) {
            Tag::String { len } => {
                let bytes = self.arena.slice(first, len)?;
                self.sink.write_bytes(bytes).map_err(Fault::Sink)?;
            }
            Tag::Integer => {
                // The digits are rendered over the cell itself; anything past
                // the first word is not restored.
                let digits = first.to_string();
                let len = digits.len() as u64;
                self.arena.write_bytes(address, digits.as_bytes())?;
                let bytes = self.arena.slice(address, len)?;
                self.sink.write_bytes(bytes).map_err(Fault::Sink)?;
                self.arena.write_u64(address, first)?;
            }
        }
        self.sink.write_bytes(b"\n").map_err(Fault::Sink)
    }

    /// Stream the log file into the sink. A log that cannot be opened or
    /// read ends the copy quietly; only sink write failures fault.
    fn print_log(&mut self) -> Result<(), Fault> {
        let mut log = match File::open(self.log_path) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(path = %self.log_path.display(), error = %err, "cannot open log file");
                return Ok(());
            }
        };
        let mut buf = [0u8; 4096];
        loop {
            let len = match log.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(len) => len,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(path = %self.log_path.display(), error = %err, "cannot read log file");
                    return Ok(());
                }
            };
            self.sink.write_bytes(&buf[..len]).map_err(Fault::Sink)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EngineConfig, opcode::RoutineBuilder, value::FREE_SENTINEL};

    fn arena() -> Arena {
        let mut arena = Arena::create(&EngineConfig::default()).unwrap();
        arena.initialize();
        arena
    }

    fn run(arena: &mut Arena, build: impl FnOnce(&mut RoutineBuilder)) -> (Result<u64, Fault>, Vec<u8>) {
        let mut builder = RoutineBuilder::default();
        builder.push_op(OpCode::Enter);
        build(&mut builder);
        builder.push_op(OpCode::Leave);
        builder.push_op(OpCode::Return);
        let routine = builder.build();

        arena.clear_code();
        arena.write_bytes(arena.code_base(), routine.code()).unwrap();
        let mut output = Vec::new();
        let result = Vm::new(arena, &mut output, Path::new("/nonexistent/osl.log")).run();
        (result, output)
    }

    fn push_int(builder: &mut RoutineBuilder, value: u64) {
        builder.push_op_with(OpCode::Push, 0);
        builder.push_op_with(OpCode::Push, value);
    }

    #[test]
    fn store_then_print_integer() {
        let mut arena = arena();
        let cell = arena.data_base();
        let (result, output) = run(&mut arena, |b| {
            push_int(b, 1234);
            b.push_op_with(OpCode::Store, cell);
            b.push_op_with(OpCode::Print, cell);
        });
        assert_eq!(result.unwrap(), 0);
        assert_eq!(output, b"1234\n");
        assert_eq!(arena.read_u64(cell).unwrap(), 1234);
        assert_eq!(arena.read_u64(arena.saved_sp_cell()).unwrap(), arena.stack_top());
    }

    #[test]
    fn wide_integer_print_spills_into_length() {
        let mut arena = arena();
        let cell = arena.data_base();
        let (_, output) = run(&mut arena, |b| {
            push_int(b, 123_456_789_012);
            b.push_op_with(OpCode::Store, cell);
            b.push_op_with(OpCode::Print, cell);
        });
        assert_eq!(output, b"123456789012\n");
        assert_eq!(arena.read_u64(cell).unwrap(), 123_456_789_012);
        assert_eq!(arena.slice(cell + 8, 4).unwrap(), b"9012");
    }

    #[test]
    fn binop_combines_first_words() {
        let mut arena = arena();
        let cell = arena.data_base();
        let (_, output) = run(&mut arena, |b| {
            push_int(b, 4);
            push_int(b, 10);
            b.push_op(OpCode::Sub);
            b.push_op_with(OpCode::Store, cell);
            b.push_op_with(OpCode::Print, cell);
        });
        assert_eq!(output, b"6\n");
    }

    #[test]
    fn release_marks_integer_free() {
        let mut arena = arena();
        let cell = arena.data_base();
        run(&mut arena, |b| {
            push_int(b, 9);
            b.push_op_with(OpCode::Store, cell);
            b.push_op_with(OpCode::Release, cell);
        })
        .0
        .unwrap();
        assert_eq!(arena.read_u64(cell).unwrap(), FREE_SENTINEL);
    }

    #[test]
    fn cleared_code_section_is_illegal() {
        let mut arena = arena();
        arena.clear_code();
        let mut output = Vec::new();
        let code_base = arena.code_base();
        let err = Vm::new(&mut arena, &mut output, Path::new("x")).run().unwrap_err();
        assert!(matches!(err, Fault::IllegalInstruction { address, byte: 0 } if address == code_base));
    }

    #[test]
    fn pointer_outside_arena_faults_on_print() {
        let mut arena = arena();
        let cell = arena.data_base();
        arena.write_u64(cell, 0x10).unwrap();
        arena.write_u64(cell + 8, 4).unwrap();
        let (result, output) = run(&mut arena, |b| b.push_op_with(OpCode::Print, cell));
        assert!(matches!(result, Err(Fault::Memory { address: 0x10, len: 4 })));
        assert!(output.is_empty());
        // The routine stack pointer is saved again for the next routine.
        assert_eq!(arena.read_u64(arena.saved_sp_cell()).unwrap(), arena.stack_top());
    }

    #[test]
    fn stack_overflow_faults() {
        let config = EngineConfig {
            stack_section_size: 16,
            ..EngineConfig::default()
        };
        let mut arena = Arena::create(&config).unwrap();
        arena.initialize();
        let (result, _) = run(&mut arena, |b| {
            push_int(b, 1);
            push_int(b, 2);
        });
        assert!(matches!(result, Err(Fault::StackOverflow { .. })));
    }

    #[test]
    fn unbalanced_stack_survives_across_routines() {
        let mut arena = arena();
        run(&mut arena, |b| push_int(b, 1)).0.unwrap();
        assert_eq!(
            arena.read_u64(arena.saved_sp_cell()).unwrap(),
            arena.stack_top() - 16
        );
    }

    #[test]
    fn corrupted_saved_sp_is_detected() {
        let mut arena = arena();
        let saved = arena.saved_sp_cell();
        let (result, _) = run(&mut arena, |b| {
            // Overwrite the caller sp stashed in the saved cell.
            push_int(b, 7);
            b.push_op_with(OpCode::Store, saved);
        });
        assert!(matches!(result, Err(Fault::StackSwitch { found: 7, .. })));
    }
}
