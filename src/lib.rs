//! A small symbolic-expression runtime: type-tagged heap objects with
//! per-type operations, chained lexical scopes, an evaluation stack as the
//! calling convention, error unwinding with cleanup actions, and a
//! mark-sweep collector.

mod builtins;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod eval;
pub mod gc;
pub mod heap;
pub mod printer;
pub mod reader;
pub mod repl;
pub mod runtime;
pub mod stream;
pub mod types;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{ErrorKind, Fault, RtResult};
pub use runtime::Runtime;
pub use value::{ContextId, ObjId, TypeId, Value};
