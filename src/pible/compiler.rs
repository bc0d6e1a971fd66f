//! # Compiler Module
//!
//! Pipeline orchestration for the Pible HolyC to BPF compiler.
//!
//! [`Compiler::compile`] runs the full pipeline — lexing, parsing,
//! code generation, object emission, optional IDL generation, and
//! optional VM validation — over in-memory values. Each phase returns
//! a `Result` and the pipeline short-circuits on the first fatal
//! error, so no partial bytecode ever escapes a failed compilation.
//!
//! ## Examples
//!
//! ```rust
//! use pible::{Compiler, CompileOptions, CompileTarget};
//!
//! let compiler = Compiler::new();
//! let options = CompileOptions {
//!     target: CompileTarget::BpfVm,
//!     ..Default::default()
//! };
//!
//! let source = "U0 main() { return 2 + 3; }";
//! let output = compiler.compile(source, &options).unwrap();
//! assert!(!output.bytecode.is_empty());
//! ```

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::pible::bpf::{BpfProgram, STACK_SIZE};
use crate::pible::bpf_vm::{BpfVm, VmError, VmResult, DEFAULT_STEP_LIMIT};
use crate::pible::codegen::{CodeGen, CodeGenError, DEFAULT_MAX_INSTRUCTIONS};
use crate::pible::diagnostics::{Diagnostic, LineIndex, Span};
use crate::pible::emitter::{emit_object, TargetTag};
use crate::pible::idl::{build_idl, idl_to_bytes, IdlError};
use crate::pible::lexer::{LexError, Lexer};
use crate::pible::parser::{ParseError, Parser};

/// Compilation target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileTarget {
    /// Linux kernel eBPF object.
    LinuxBpf,
    /// Solana BPF object with an exported-symbol table.
    SolanaBpf,
    /// Object for the built-in virtual machine.
    BpfVm,
}

impl CompileTarget {
    /// Tag recorded in the object header.
    pub fn tag(&self) -> TargetTag {
        match self {
            CompileTarget::LinuxBpf => TargetTag::Linux,
            CompileTarget::SolanaBpf => TargetTag::Solana,
            CompileTarget::BpfVm => TargetTag::Vm,
        }
    }
}

/// Compilation configuration.
///
/// ```rust
/// use pible::{CompileOptions, CompileTarget};
///
/// let options = CompileOptions {
///     target: CompileTarget::SolanaBpf,
///     generate_idl: true,
///     ..Default::default()
/// };
/// assert_eq!(options.stack_bytes, 512);
/// ```
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Target platform.
    pub target: CompileTarget,
    /// Emit an IDL document for `export` functions.
    pub generate_idl: bool,
    /// Validate the compiled program in the built-in VM.
    pub enable_vm_testing: bool,
    /// Hard cap on generated instructions.
    pub max_instructions: usize,
    /// Per-function stack frame budget in bytes.
    pub stack_bytes: usize,
    /// Explicit output path for `compile_file`.
    pub output_path: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: CompileTarget::LinuxBpf,
            generate_idl: false,
            enable_vm_testing: false,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            stack_bytes: STACK_SIZE,
            output_path: None,
        }
    }
}

/// A successful compilation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// Object bytes for the selected target.
    pub bytecode: Vec<u8>,
    /// IDL document, when requested.
    pub idl: Option<Vec<u8>>,
    /// VM validation result, when requested.
    pub vm_result: Option<VmResult>,
}

/// Compilation errors, one variant per pipeline phase.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Tokenization failed.
    #[error("lexical analysis failed: {0}")]
    Lex(#[from] LexError),
    /// The token stream does not form valid syntax.
    #[error("syntax analysis failed: {0}")]
    Parse(#[from] ParseError),
    /// The AST could not be lowered to BPF.
    #[error("code generation failed: {0}")]
    CodeGen(#[from] CodeGenError),
    /// IDL generation failed for an exported function.
    #[error("IDL generation failed: {0}")]
    Idl(#[from] IdlError),
    /// VM validation of the compiled program trapped.
    #[error("VM validation failed: {0}")]
    VmTest(#[from] VmError),
    /// Reading the source or writing outputs failed.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompileError {
    /// Source span the error refers to, when it has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Lex(e) => Some(e.span()),
            CompileError::Parse(e) => Some(e.span()),
            CompileError::CodeGen(e) => Some(e.span()),
            CompileError::Idl(e) => Some(e.span()),
            CompileError::VmTest(_) | CompileError::Io(_) => None,
        }
    }

    /// Renders the error as `line:column: error: message` against the
    /// source it came from; errors without a span render plainly.
    pub fn render(&self, source: &str) -> String {
        match self.span() {
            Some(span) => {
                let index = LineIndex::new(source);
                Diagnostic::error(span, self.to_string()).render(&index)
            }
            None => format!("error: {}", self),
        }
    }
}

/// The Pible compiler.
///
/// Stateless: every call to [`Compiler::compile`] is an independent
/// compilation, so separate threads can share nothing and still
/// compile concurrently.
#[derive(Debug, Default)]
pub struct Compiler;

impl Compiler {
    /// Creates a compiler instance.
    pub fn new() -> Self {
        Self
    }

    /// Compiles HolyC source to object bytes for the selected target.
    ///
    /// # Errors
    ///
    /// Returns the first error of the failing phase; later phases do
    /// not run and no bytecode is produced.
    pub fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompileError> {
        self.compile_named(source, "program", options)
    }

    /// Compiles with an explicit program name for the IDL document.
    pub fn compile_named(
        &self,
        source: &str,
        program_name: &str,
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompileError> {
        let (program, idl) = self.lower(source, program_name, options)?;

        let vm_result = if options.enable_vm_testing {
            let mut vm =
                BpfVm::new(&program.instructions).with_step_limit(DEFAULT_STEP_LIMIT);
            Some(vm.execute()?)
        } else {
            None
        };

        Ok(CompileOutput {
            bytecode: emit_object(&program, options.target.tag()),
            idl,
            vm_result,
        })
    }

    /// Runs the front end and code generator, returning the raw
    /// instruction program. Used by `compile` and by tests that
    /// execute programs directly.
    pub fn lower(
        &self,
        source: &str,
        program_name: &str,
        options: &CompileOptions,
    ) -> Result<(BpfProgram, Option<Vec<u8>>), CompileError> {
        let tokens = Lexer::new(source).scan_tokens()?;
        let ast = Parser::new(tokens).parse()?;

        let idl = if options.generate_idl {
            Some(idl_to_bytes(&build_idl(&ast, program_name)?))
        } else {
            None
        };

        let codegen = CodeGen::new(options.stack_bytes, options.max_instructions);
        let program = codegen.generate(&ast)?;
        Ok((program, idl))
    }

    /// Compiles a source file and writes the object next to it (or to
    /// `options.output_path`); the IDL document, when requested, lands
    /// beside the object with a `.json` extension.
    pub fn compile_file(
        &self,
        input_path: &str,
        options: &CompileOptions,
    ) -> Result<(), CompileError> {
        let source = fs::read_to_string(input_path)?;
        let program_name = Path::new(input_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("program")
            .to_string();

        let output = self.compile_named(&source, &program_name, options)?;
        let output_path = self.determine_output_path(input_path, options);

        fs::write(&output_path, &output.bytecode)?;
        println!("Compiled successfully: {} -> {}", input_path, output_path);

        if let Some(idl) = &output.idl {
            let idl_path = Path::new(&output_path)
                .with_extension("json")
                .to_string_lossy()
                .into_owned();
            fs::write(&idl_path, idl)?;
            println!("IDL generated: {}", idl_path);
        }

        if let Some(result) = &output.vm_result {
            println!(
                "VM test completed: exit_code={}, steps={}",
                result.exit_code, result.steps
            );
        }

        Ok(())
    }

    fn determine_output_path(&self, input_path: &str, options: &CompileOptions) -> String {
        if let Some(path) = &options.output_path {
            return path.clone();
        }
        Path::new(input_path)
            .with_extension("bpf")
            .to_string_lossy()
            .into_owned()
    }
}
