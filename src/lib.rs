//! # Pible - HolyC to BPF Compiler
//!
//! A divine bridge between Terry Davis's HolyC and BPF runtimes,
//! allowing HolyC programs to run in Linux kernel and Solana
//! blockchain environments.
//!
//! ## Overview
//!
//! Pible transforms HolyC programs into BPF (Berkeley Packet Filter)
//! bytecode for three targets:
//!
//! - **Linux Kernel Space**: eBPF objects for system programming
//! - **Solana Blockchain**: on-chain programs with IDL support
//! - **BPF Virtual Machine**: the built-in interpreter for testing
//!
//! ## Quick Start
//!
//! ```rust
//! use pible::{Compiler, CompileOptions, CompileTarget};
//!
//! let compiler = Compiler::new();
//! let options = CompileOptions {
//!     target: CompileTarget::LinuxBpf,
//!     ..Default::default()
//! };
//!
//! let source = "U0 main() { return 0; }";
//! let output = compiler.compile(source, &options).unwrap();
//! assert!(!output.bytecode.is_empty());
//! ```
//!
//! ## Architecture
//!
//! The pipeline is strictly one-way: source bytes become tokens
//! ([`Lexer`]), tokens become an AST ([`Parser`]), the AST becomes BPF
//! instructions ([`CodeGen`]), and the instructions become object
//! bytes (the emitter) or run directly on the [`BpfVm`]. Exported
//! functions can additionally be described as an IDL document.
//!
//! ## HolyC Language Support
//!
//! - **Data Types**: `U0`, `U8`, `U16`, `U32`, `U64`, `I8`, `I16`,
//!   `I32`, `I64`, `F64`, `Bool`, pointers, fixed arrays, and
//!   `struct`/`class` records
//! - **Control Flow**: `if`/`else`, `while`, `for`, `break`,
//!   `continue`, `return`
//! - **Operators**: the full C-style arithmetic, bitwise, logical,
//!   comparison, and compound-assignment set
//! - **Built-ins**: `PrintF`, `MemoryRead`, `MemoryWrite`
//! - **Export**: `export` marks Solana entry points for IDL emission
//!
//! ## Error Handling
//!
//! Every phase reports through its own error type ([`LexError`],
//! [`ParseError`], [`CodeGenError`], [`IdlError`], [`VmError`]), all
//! carrying source positions; [`CompileError`] wraps them at the
//! pipeline level.
//!
//! ## In Memoriam
//!
//! Dedicated to Terry A. Davis (1969-2018), whose HolyC language and
//! TempleOS continue to inspire. Through Pible, his sacred language
//! reaches kernel space and blockchain runtimes.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod pible;


// Re-export main types for easy access
pub use pible::{
    ast::{BinaryOp, Expr, ExprKind, Program, Stmt, StmtKind, Type, UnaryOp},
    bpf::{BpfInstruction, BpfProgram, EntryPoint},
    bpf_vm::{BpfVm, VmError, VmResult},
    codegen::{CodeGen, CodeGenError},
    compiler::{CompileError, CompileOptions, CompileOutput, CompileTarget, Compiler},
    diagnostics::{Diagnostic, LineIndex, Severity, Span},
    emitter::{emit_object, read_object, ObjectError, TargetTag},
    idl::{build_idl, idl_to_bytes, Idl, IdlError},
    lexer::{LexError, Lexer, Token, TokenKind, TokenValue},
    parser::{ParseError, Parser},
};

/// The current version of the Pible compiler.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
