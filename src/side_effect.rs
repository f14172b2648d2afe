use std::{
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use ariadne::{Label, Report, ReportKind, Source};
use chumsky::prelude::Simple;
use tempfile::NamedTempFile;

use crate::{error::SinkError, opcode::Routine};

/// Where printed bytes go while a run is in progress.
pub trait OutputSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl OutputSink for Vec<u8> {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// A uniquely named temporary file that collects one run's output.
///
/// The file is removed when the sink is dropped, whichever way the run ends.
pub struct TempFileSink {
    file: NamedTempFile,
}

impl TempFileSink {
    pub fn open(dir: Option<&Path>) -> Result<Self, SinkError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("osl-").suffix(".out");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(SinkError::Open)?;
        tracing::debug!(path = %file.path().display(), "output sink opened");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Read back everything written so far and delete the file.
    pub fn finish(mut self) -> Result<Vec<u8>, SinkError> {
        let file = self.file.as_file_mut();
        file.flush().map_err(SinkError::Finalize)?;
        file.seek(SeekFrom::Start(0)).map_err(SinkError::Finalize)?;
        let mut output = Vec::new();
        file.read_to_end(&mut output).map_err(SinkError::Finalize)?;
        tracing::debug!(path = %self.file.path().display(), len = output.len(), "output sink finished");
        self.file.close().map_err(SinkError::Finalize)?;
        Ok(output)
    }
}

impl OutputSink for TempFileSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.as_file_mut().write_all(bytes)
    }
}

/// The side effects performed while driving a source file through the engine.
pub trait SideEffectHandler {
    fn compile_error(&mut self, file_name: &str, source: &str, errors: Vec<Simple<char>>) -> io::Result<()>;

    fn routine(&mut self, index: usize, routine: &Routine) -> io::Result<()>;

    fn output(&mut self, bytes: &[u8]) -> io::Result<()>;
}

pub struct PrintAllHandler<'stdout, 'stderr> {
    pub stdout: &'stdout mut (dyn Write + 'stdout),
    pub stderr: &'stderr mut (dyn Write + 'stderr),
    pub dump_routines: bool,
}

impl SideEffectHandler for PrintAllHandler<'_, '_> {
    fn compile_error(&mut self, file_name: &str, source: &str, errors: Vec<Simple<char>>) -> io::Result<()> {
        for error in errors {
            let message = match error.reason() {
                chumsky::error::SimpleReason::Custom(message) => message.clone(),
                _ => error.to_string(),
            };
            Report::build(ReportKind::Error, (), error.span().start)
                .with_message(format!("{}: cannot parse OSL program", file_name))
                .with_label(Label::new(error.span()).with_message(message))
                .finish()
                .write(Source::from(source), &mut *self.stderr)?;
        }

        Ok(())
    }

    fn routine(&mut self, index: usize, routine: &Routine) -> io::Result<()> {
        if self.dump_routines {
            routine.write(&format!("statement {}", index), &mut *self.stderr)?;
        }
        Ok(())
    }

    fn output(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stdout.write_all(bytes)?;
        self.stdout.flush()
    }
}
