use std::path::PathBuf;

use chumsky::Parser;
use typed_arena::Arena as AstArena;

use crate::{
    allocator::{Slot, SlotAllocator},
    arena::Arena,
    ast::{Program, Statement},
    compiler,
    config::EngineConfig,
    constant::LiteralPool,
    error::{CompileError, ExecError, RunFailure, SinkError},
    opcode::Routine,
    parser,
    side_effect::{SideEffectHandler, TempFileSink},
    value::Value,
    vm::Vm,
};

/// What a run needs to know about the request that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Log file streamed by `print_log`. It is opened as given.
    pub log_path: PathBuf,
}

impl RequestContext {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }
}

/// State of one program run: the arena, the name bindings, the literal
/// storage and the output sink. Nothing here outlives the run.
pub struct Executor {
    arena: Arena,
    allocator: SlotAllocator,
    literals: LiteralPool,
    sink: TempFileSink,
    context: RequestContext,
    executed: usize,
}

impl Executor {
    pub fn new(config: &EngineConfig, context: RequestContext) -> Result<Self, ExecError> {
        let mut arena = Arena::create(config)?;
        arena.initialize();
        let sink = TempFileSink::open(config.sink_dir.as_deref())?;
        let literals = LiteralPool::new(&arena);

        Ok(Self {
            arena,
            allocator: SlotAllocator::new(),
            literals,
            sink,
            context,
            executed: 0,
        })
    }

    /// Compile `statement` into the code section and run it to completion.
    ///
    /// A fault leaves the caller's stack restored, so the executor can keep
    /// running statements afterwards.
    pub fn execute(&mut self, statement: &Statement<'_>) -> Result<Routine, ExecError> {
        let index = self.executed;
        self.executed += 1;
        tracing::debug!(index, %statement, "executing statement");

        let routine = self
            .install(statement)
            .map_err(|source| ExecError::Compile { index, source })?;
        tracing::trace!(listing = %routine.listing(&format!("statement {}", index)), "routine installed");

        let status = Vm::new(&mut self.arena, &mut self.sink, &self.context.log_path)
            .run()
            .map_err(|source| ExecError::Fault { index, source })?;
        tracing::trace!(index, status, "routine returned");
        Ok(routine)
    }

    fn install(&mut self, statement: &Statement<'_>) -> Result<Routine, CompileError> {
        self.arena.clear_code();
        let routine = compiler::compile(
            statement,
            &mut self.arena,
            &mut self.allocator,
            &mut self.literals,
        )?;
        let code_base = self.arena.code_base();
        self.arena
            .write_bytes(code_base, routine.code())
            .map_err(|_| CompileError::CodeSectionOverflow {
                len: routine.len(),
                capacity: self.arena.code_size() as usize,
            })?;
        Ok(routine)
    }

    /// The slot currently bound to `name`, if any.
    pub fn slot_of(&self, name: &str) -> Option<Slot> {
        self.allocator.lookup(name)
    }

    /// Decode the cell bound to `name` the way a load would see it.
    pub fn value_of(&self, name: &str) -> Option<Value> {
        let slot = self.allocator.lookup(name)?;
        Value::read(&self.arena, self.arena.data_base() + slot).ok()
    }

    /// Release the arena and hand back everything the run printed.
    pub fn finish(self) -> Result<Vec<u8>, SinkError> {
        self.arena.release();
        self.sink.finish()
    }

    fn fail(self, error: ExecError) -> RunFailure {
        let partial_output = self.finish().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "cannot recover partial output");
            Vec::new()
        });
        RunFailure {
            error,
            partial_output,
        }
    }
}

/// Run `program` with the default arena sizing.
pub fn run(program: &Program<'_>, context: RequestContext) -> Result<Vec<u8>, RunFailure> {
    run_with_config(program, context, &EngineConfig::default())
}

pub fn run_with_config(
    program: &Program<'_>,
    context: RequestContext,
    config: &EngineConfig,
) -> Result<Vec<u8>, RunFailure> {
    run_observed(program, context, config, |_, _| Ok(()))
}

/// Like [`run_with_config`], handing each routine to `observe` after it ran.
pub(crate) fn run_observed(
    program: &Program<'_>,
    context: RequestContext,
    config: &EngineConfig,
    mut observe: impl FnMut(usize, &Routine) -> std::io::Result<()>,
) -> Result<Vec<u8>, RunFailure> {
    let mut executor = Executor::new(config, context).map_err(|error| RunFailure {
        error,
        partial_output: Vec::new(),
    })?;

    for (index, statement) in program.statements.iter().enumerate() {
        match executor.execute(statement) {
            Ok(routine) => {
                if let Err(err) = observe(index, &routine) {
                    tracing::warn!(error = %err, "routine observer failed");
                }
            }
            Err(error) => return Err(executor.fail(error)),
        }
    }

    executor.finish().map_err(|error| RunFailure {
        error: error.into(),
        partial_output: Vec::new(),
    })
}

/// Parses a source file and runs it, reporting through a [`SideEffectHandler`].
pub struct Driver<'handler> {
    pub file_name: String,
    pub source: String,
    pub log_path: PathBuf,
    pub config: EngineConfig,
    pub run: bool,
    pub handler: &'handler mut (dyn SideEffectHandler + 'handler),
}

/// How a [`Driver`] run ended.
#[derive(Debug)]
pub enum Outcome {
    Parsed,
    Completed,
    ParseFailed,
    RunFailed(RunFailure),
}

impl Driver<'_> {
    pub fn run(&mut self) -> std::io::Result<Outcome> {
        let arena = AstArena::new();
        let parser = parser::parser(&arena);
        let program = match parser.parse(self.source.as_str()) {
            Ok(program) => program,
            Err(errors) => {
                self.handler
                    .compile_error(&self.file_name, &self.source, errors)?;
                return Ok(Outcome::ParseFailed);
            }
        };
        tracing::debug!(file = %self.file_name, statements = program.statements.len(), "parsed OSL program");

        if !self.run {
            return Ok(Outcome::Parsed);
        }

        let context = RequestContext::new(self.log_path.clone());
        let handler = &mut *self.handler;
        let result = run_observed(&program, context, &self.config, |index, routine| {
            handler.routine(index, routine)
        });
        match result {
            Ok(output) => {
                handler.output(&output)?;
                Ok(Outcome::Completed)
            }
            Err(failure) => {
                handler.output(&failure.partial_output)?;
                Ok(Outcome::RunFailed(failure))
            }
        }
    }
}
