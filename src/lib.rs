//! An execution engine for OSL, a four-statement scripting language.
//!
//! Each statement is compiled into a routine, written into the code section
//! of a private arena and run by a small stack machine before the next
//! statement is compiled. Variables live in the arena's data section, and a
//! cell's type is read from its bytes rather than tracked on the side.

#![forbid(unsafe_code)]

pub mod allocator;
pub mod arena;
pub mod ast;
mod compiler;
pub mod config;
mod constant;
pub mod driver;
pub mod error;
mod insta;
pub mod opcode;
pub mod parser;
pub mod side_effect;
pub mod value;
mod vm;

pub use crate::{
    ast::{Expr, ExprBody, Program, Statement, Var},
    config::EngineConfig,
    driver::{run, run_with_config, Executor, RequestContext},
    error::{ExecError, RunFailure},
    value::Value,
};
