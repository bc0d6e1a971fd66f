//! # Pible Core Modules
//!
//! The core components of the Pible HolyC to BPF compiler, one module
//! per phase of the pipeline plus the shared instruction model.

/// Typed abstract syntax tree produced by the parser.
pub mod ast;

/// Shared BPF instruction model: registers, opcodes, encoding, and
/// the guest memory map.
pub mod bpf;

/// BPF virtual machine for testing and emulation.
///
/// Provides a complete interpreter for the emitted instruction subset
/// so compiled programs can run without an external BPF runtime.
pub mod bpf_vm;

/// BPF code generation from abstract syntax trees.
///
/// Lowers parsed HolyC into BPF instructions with stack-frame layout,
/// patch-list branch resolution, and built-in helper calls.
pub mod codegen;

/// Main compiler orchestration.
///
/// Coordinates the pipeline from HolyC source through lexing, parsing,
/// and code generation to produce BPF objects.
pub mod compiler;

/// Source positions and diagnostic rendering.
pub mod diagnostics;

/// Object emission and reading for the three target layouts.
pub mod emitter;

/// Interface Definition Language generation for exported functions.
pub mod idl;

/// HolyC lexical analysis and tokenization.
///
/// Converts HolyC source code into the token stream consumed by the
/// parser.
pub mod lexer;

/// HolyC syntax analysis and AST construction.
pub mod parser;

/// Lexically scoped symbol table used during code generation.
pub mod symbols;

pub use compiler::{CompileOptions, CompileTarget, Compiler};
