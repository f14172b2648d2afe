//! Runtime values and their byte layout inside the arena.
//!
//! A cell carries no tag bits. An integer cell is `{value, 0}` (16 bytes),
//! a string cell is `{ptr, len, inline[16]}` (32 bytes). The second word is
//! the type tag: zero means integer, anything else is a string length.

use std::fmt;

use crate::{arena::Arena, error::Fault};

pub(crate) const WORD: u64 = 8;
pub const INT_CELL_SIZE: u64 = 16;
pub const STR_CELL_SIZE: u64 = 32;
/// Bytes of string content a cell can hold without a separate buffer.
pub const INLINE_CAPACITY: u64 = 16;

/// Words above this look like pointers rather than integers.
pub const MEMORY_ADDRESS_THRESHOLD: u64 = 0x10_0000;
/// First word of a free integer-sized window: huge and non-negative.
pub const FREE_SENTINEL: u64 = !(1 << 63);

const SIGN_BIT: u64 = 1 << 63;

/// What a window of the data section looks like, judged from its first two words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellShape {
    Integer,
    String,
    Free,
}

impl CellShape {
    pub fn classify(first: u64, second: u64) -> Self {
        if second == 0 && (first < MEMORY_ADDRESS_THRESHOLD || first & SIGN_BIT != 0) {
            CellShape::Integer
        } else if first > MEMORY_ADDRESS_THRESHOLD && second != 0 {
            CellShape::String
        } else {
            CellShape::Free
        }
    }

    /// Bytes to skip past an in-use window.
    pub fn span(self) -> u64 {
        match self {
            CellShape::String => STR_CELL_SIZE,
            CellShape::Integer | CellShape::Free => INT_CELL_SIZE,
        }
    }
}

/// The type tag carried by the second word of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
    Integer,
    String { len: u64 },
}

impl Tag {
    pub(crate) fn of(second: u64) -> Self {
        if second == 0 {
            Tag::Integer
        } else {
            Tag::String { len: second }
        }
    }
}

/// The 32-byte stack representation of a string literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StringHeader {
    pub(crate) ptr: u64,
    pub(crate) len: u64,
    pub(crate) inline: [u64; 2],
}

impl StringHeader {
    pub(crate) fn new(ptr: u64, content: &[u8]) -> Self {
        let mut inline = [0u8; INLINE_CAPACITY as usize];
        let prefix = content.len().min(inline.len());
        inline[..prefix].copy_from_slice(&content[..prefix]);

        let (low, high) = inline.split_at(8);
        Self {
            ptr,
            len: content.len() as u64,
            inline: [word_from_le(low), word_from_le(high)],
        }
    }

    /// Words in the order they sit in memory, lowest address first.
    pub(crate) fn words(&self) -> [u64; 4] {
        [self.ptr, self.len, self.inline[0], self.inline[1]]
    }
}

fn word_from_le(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    u64::from_le_bytes(word)
}

/// A value decoded from a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(u64),
    String(Vec<u8>),
}

impl Value {
    /// Decode the cell at `address` using its type tag.
    pub fn read(arena: &Arena, address: u64) -> Result<Self, Fault> {
        let first = arena.read_u64(address)?;
        match Tag::of(arena.read_u64(address + WORD)?) {
            Tag::Integer => Ok(Value::Integer(first)),
            Tag::String { len } => Ok(Value::String(arena.slice(first, len)?.to_vec())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", String::from_utf8_lossy(s)),
        }
    }
}
