use std::io;
use std::process::ExitCode;
use std::thread;

use cinder::repl;
use cinder::stream::FileStream;
use cinder::{Runtime, RuntimeConfig};

const INTERPRETER_STACK: usize = 64 * 1024 * 1024;

fn main() -> ExitCode {
    // Logging goes to stderr; set RUST_LOG=debug to watch collections.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();
    let path = match args.as_slice() {
        [_, path] => path,
        _ => {
            eprintln!("Usage: cinder <file>");
            eprintln!();
            eprintln!("Environment variables:");
            eprintln!("  CINDER_GC_THRESHOLD  bytes allocated before the first collection");
            eprintln!("  CINDER_HEAP_LIMIT    bytes after which allocation fails");
            eprintln!("  CINDER_STACK_LIMIT   evaluation stack entries per context");
            eprintln!("  CINDER_MAX_DEPTH     nesting of evaluation, reading and printing");
            return ExitCode::from(2);
        }
    };

    // Evaluation, reading and printing recurse natively; give them a stack
    // that comfortably outlasts the nesting limit.
    let path = path.clone();
    let worker = thread::Builder::new()
        .name("cinder".to_string())
        .stack_size(INTERPRETER_STACK)
        .spawn(move || run_file(&path));
    match worker {
        Ok(handle) => handle.join().unwrap_or(ExitCode::FAILURE),
        Err(e) => {
            eprintln!("Error starting interpreter thread: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_file(path: &str) -> ExitCode {
    let stream = match FileStream::open(path) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Error loading {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let mut rt = Runtime::with_config(RuntimeConfig::from_env());
    let stdout = io::stdout();
    let stderr = io::stderr();
    match repl::run(&mut rt, stream, &mut stdout.lock(), &mut stderr.lock()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
