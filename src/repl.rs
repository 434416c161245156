use std::io::{self, Write};

use log::debug;
use thiserror::Error;

use crate::error::{Fault, RtResult};
use crate::reader::Reader;
use crate::runtime::Runtime;
use crate::stream::ByteStream;

/// Why a run stopped before the end of its input.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub printed: usize,
    pub errors: usize,
}

/// Read, evaluate and print every form in `stream`. Results go to `out`, one
/// per line, and errors to `diag` as `Error: <message>`; a failing form does
/// not stop the run. Only a fatal fault or an I/O error does.
pub fn run<S, W, E>(
    rt: &mut Runtime,
    stream: S,
    out: &mut W,
    diag: &mut E,
) -> Result<RunSummary, RunError>
where
    S: ByteStream,
    W: Write,
    E: Write,
{
    let mut reader = Reader::new(stream);
    let mut summary = RunSummary::default();
    loop {
        match step(rt, &mut reader) {
            Ok(Some(text)) => {
                writeln!(out, "{}", text)?;
                summary.printed += 1;
            }
            Ok(None) => break,
            Err(Fault::Raised) => {
                writeln!(diag, "{}", rt.recover())?;
                summary.errors += 1;
            }
            Err(Fault::Fatal(message)) => return Err(RunError::Fatal(message)),
        }
    }
    out.flush()?;
    debug!(
        "run finished: {} printed, {} errors, {} collections",
        summary.printed,
        summary.errors,
        rt.gc_stats().collections
    );
    Ok(summary)
}

fn step<S: ByteStream>(rt: &mut Runtime, reader: &mut Reader<S>) -> RtResult<Option<String>> {
    let Some(form) = reader.read(rt)? else {
        return Ok(None);
    };
    let value = rt.eval(Some(form))?;
    rt.print_to_string(value).map(Some)
}
