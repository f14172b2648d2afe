//! Error types for every stage of a run.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading or validating an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The arena could not be laid out or reserved.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot reserve {size} bytes for the execution arena")]
    Reserve { size: usize },
}

/// No slot could be produced for a variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationFailure {
    #[error("invalid variable name {name:?}: names are exactly one character long")]
    InvalidName { name: String },

    #[error("data section exhausted while binding {name:?}")]
    StoreExhausted { name: String },
}

/// Failures while translating a statement into a routine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Allocation(#[from] AllocationFailure),

    #[error("literal section exhausted: {len} more bytes requested, {remaining} left")]
    LiteralSectionExhausted { len: usize, remaining: usize },

    #[error("routine of {len} bytes does not fit the {capacity} byte code section")]
    CodeSectionOverflow { len: usize, capacity: usize },
}

/// Faults raised by the machine while a routine runs.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("memory fault: {len} bytes at {address:#x} are outside the arena")]
    Memory { address: u64, len: u64 },

    #[error("scratch stack overflow (sp = {sp:#x})")]
    StackOverflow { sp: u64 },

    #[error("scratch stack underflow (sp = {sp:#x})")]
    StackUnderflow { sp: u64 },

    #[error("illegal instruction {byte:#04x} at {address:#x}")]
    IllegalInstruction { address: u64, byte: u8 },

    #[error("stack switch corrupted: expected caller sp {expected:#x}, found {found:#x}")]
    StackSwitch { expected: u64, found: u64 },

    #[error("cannot write to the output sink: {0}")]
    Sink(#[source] io::Error),
}

/// Failures of the transient output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot open output sink: {0}")]
    Open(#[source] io::Error),

    #[error("cannot read back output sink: {0}")]
    Finalize(#[source] io::Error),
}

/// Fatal conditions that terminate one run.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("statement {index}: {source}")]
    Compile {
        index: usize,
        #[source]
        source: CompileError,
    },

    #[error("statement {index}: {source}")]
    Fault {
        index: usize,
        #[source]
        source: Fault,
    },
}

/// A failed run together with whatever it printed before failing.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: ExecError,
    pub partial_output: Vec<u8>,
}
