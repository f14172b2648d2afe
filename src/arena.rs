//! The private memory of one run.
//!
//! The arena is a single contiguous block addressed through virtual addresses
//! starting at [`EngineConfig::base_address`]. Sections, lowest first:
//!
//! ```text
//! | saved sp (16) | data | scratch stack | code | literals |
//! ```
//!
//! Every access is bounds-checked; an address outside the block is a
//! [`Fault::Memory`].

use crate::{
    config::EngineConfig,
    error::{ArenaError, Fault},
    value::{FREE_SENTINEL, INT_CELL_SIZE, WORD},
};

const SAVED_SP_CELL_SIZE: u64 = 16;

pub struct Arena {
    memory: Box<[u8]>,
    base: u64,
    data_size: u64,
    stack_size: u64,
    code_size: u64,
}

impl Arena {
    /// Reserve the arena. The memory content is unspecified until [`Arena::initialize`].
    pub fn create(config: &EngineConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let size = config.arena_size().ok_or(ArenaError::Reserve { size: usize::MAX })?;
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| ArenaError::Reserve { size })?;
        memory.resize(size, 0);

        tracing::debug!(base = %format_args!("{:#x}", config.base_address), size, "arena reserved");
        Ok(Self {
            memory: memory.into_boxed_slice(),
            base: config.base_address,
            data_size: config.data_section_size as u64,
            stack_size: config.stack_section_size as u64,
            code_size: config.code_section_size as u64,
        })
    }

    /// Zero everything, mark every data cell free and point the saved
    /// stack pointer at the top of the scratch stack.
    pub fn initialize(&mut self) {
        self.memory.fill(0);

        let mut cell = self.data_base();
        while cell < self.data_end() {
            self.poke_u64(cell, FREE_SENTINEL);
            self.poke_u64(cell + WORD, 0);
            cell += INT_CELL_SIZE;
        }
        let top = self.stack_top();
        self.poke_u64(self.saved_sp_cell(), top);
    }

    /// Give the memory back. Dropping the arena does the same.
    pub fn release(self) {
        tracing::debug!(base = %format_args!("{:#x}", self.base), "arena released");
    }

    pub fn saved_sp_cell(&self) -> u64 {
        self.base
    }

    pub fn data_base(&self) -> u64 {
        self.base + SAVED_SP_CELL_SIZE
    }

    pub fn data_end(&self) -> u64 {
        self.data_base() + self.data_size
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn stack_base(&self) -> u64 {
        self.data_end()
    }

    pub fn stack_top(&self) -> u64 {
        self.stack_base() + self.stack_size
    }

    pub fn code_base(&self) -> u64 {
        self.stack_top()
    }

    pub fn code_size(&self) -> u64 {
        self.code_size
    }

    pub fn literal_base(&self) -> u64 {
        self.code_base() + self.code_size
    }

    pub fn end(&self) -> u64 {
        self.base + self.memory.len() as u64
    }

    fn range(&self, address: u64, len: u64) -> Result<std::ops::Range<usize>, Fault> {
        let fault = || Fault::Memory { address, len };
        let start = address.checked_sub(self.base).ok_or_else(fault)?;
        let end = start.checked_add(len).ok_or_else(fault)?;
        if end > self.memory.len() as u64 {
            return Err(fault());
        }
        Ok(start as usize..end as usize)
    }

    pub fn slice(&self, address: u64, len: u64) -> Result<&[u8], Fault> {
        let range = self.range(address, len)?;
        Ok(&self.memory[range])
    }

    pub fn slice_mut(&mut self, address: u64, len: u64) -> Result<&mut [u8], Fault> {
        let range = self.range(address, len)?;
        Ok(&mut self.memory[range])
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, Fault> {
        Ok(self.slice(address, 1)?[0])
    }

    pub fn write_u8(&mut self, address: u64, byte: u8) -> Result<(), Fault> {
        self.slice_mut(address, 1)?[0] = byte;
        Ok(())
    }

    pub fn read_u64(&self, address: u64) -> Result<u64, Fault> {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.slice(address, WORD)?);
        Ok(u64::from_le_bytes(word))
    }

    pub fn write_u64(&mut self, address: u64, value: u64) -> Result<(), Fault> {
        self.slice_mut(address, WORD)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<(), Fault> {
        self.slice_mut(address, bytes.len() as u64)?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes one at a time, lowest address first, so overlapping
    /// ranges behave like a forward byte loop.
    pub fn copy_forward(&mut self, src: u64, dst: u64, len: u64) -> Result<(), Fault> {
        let src = self.range(src, len)?;
        let dst = self.range(dst, len)?;
        for (from, to) in src.zip(dst) {
            self.memory[to] = self.memory[from];
        }
        Ok(())
    }

    /// Zero the code section ahead of the next routine.
    pub fn clear_code(&mut self) {
        let start = (self.code_base() - self.base) as usize;
        let end = start + self.code_size as usize;
        self.memory[start..end].fill(0);
    }

    /// Write inside the arena at an address known to be in range.
    fn poke_u64(&mut self, address: u64, value: u64) {
        let start = (address - self.base) as usize;
        self.memory[start..start + 8].copy_from_slice(&value.to_le_bytes());
    }
}
