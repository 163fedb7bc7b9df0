//! Bytecode representation, compiler, and builder.
//!
//! Compilation lowers the line-oriented AST into a byte-encoded stream per
//! function. The VM (in `crate::vm`) executes it with a value stack and a
//! frame stack.
//!
//! - `op` — opcode definitions and operand sizes
//! - `code` — the immutable compiled form of one function body or thunk
//! - `builder` — emission helper with jump patching and the line map
//! - `compiler` — AST → `Code`, with identifier-kind resolution

mod builder;
mod code;
mod compiler;
mod op;

pub use builder::CodeBuilder;
pub use code::{Code, Const};
pub use compiler::{compile_program, linearize};
pub use op::Opcode;
