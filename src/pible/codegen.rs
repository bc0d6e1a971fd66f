//! BPF code generation from the HolyC AST.
//!
//! One walk per function. Register use is deliberately simple: `R0`
//! holds every expression result, `R1..R5` are scratch and call
//! arguments, `R10` is the frame pointer. Binary operators evaluate
//! the left side, spill it to a frame temporary, evaluate the right
//! side, and reload. Forward branches go through a patch list that is
//! resolved when the target label is bound.

use std::collections::HashMap;

use thiserror::Error;

use crate::pible::ast::{
    AssignOp, BinaryOp, Decl, Expr, ExprKind, FunctionDecl, Program, Stmt, StmtKind, StructDecl,
    Type, UnaryOp, VarDecl,
};
use crate::pible::bpf::{
    opc, BpfInstruction, BpfProgram, EntryPoint, DIVIDE_BY_ZERO_EXIT_CODE, HEAP_BASE, HEAP_SIZE,
    R0, R1, R10, R2,
};
use crate::pible::diagnostics::Span;
use crate::pible::symbols::{Symbol, SymbolKind, SymbolTable};

/// Built-in helper table: name, call index, argument limit.
const BUILTINS: &[(&str, i32, usize)] = &[
    ("MemoryRead", 1, 3),
    ("MemoryWrite", 2, 3),
    ("PrintF", 6, 4),
];

/// Default cap on generated instructions per program.
pub const DEFAULT_MAX_INSTRUCTIONS: usize = 100_000;

/// Code generation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodeGenError {
    /// Reference to a name that is not in scope.
    #[error("undefined symbol '{name}'")]
    UndefinedSymbol {
        /// The unresolved name.
        name: String,
        /// Where it was referenced.
        span: Span,
    },
    /// Operand types incompatible with the operator or context.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// What went wrong.
        message: String,
        /// Where.
        span: Span,
    },
    /// Function frame grew beyond the configured stack size.
    #[error("stack frame of {needed} bytes exceeds the {limit}-byte limit")]
    StackOverflow {
        /// Bytes the frame would need.
        needed: usize,
        /// Configured limit.
        limit: usize,
        /// Declaration that overflowed it.
        span: Span,
    },
    /// Branch displacement does not fit the 16-bit offset field.
    #[error("branch displacement of {distance} instructions exceeds the 16-bit range")]
    JumpOutOfRange {
        /// Displacement in instructions.
        distance: i64,
        /// Construct that emitted the branch.
        span: Span,
    },
    /// Call to anything but a built-in helper.
    #[error("unsupported call to '{name}': only built-in functions are callable")]
    UnsupportedCall {
        /// Callee name.
        name: String,
        /// Call site.
        span: Span,
    },
    /// `break` or `continue` outside a loop.
    #[error("'{keyword}' outside of a loop")]
    StrayLoopControl {
        /// The offending keyword.
        keyword: &'static str,
        /// Where it appeared.
        span: Span,
    },
    /// Program grew beyond the configured instruction cap.
    #[error("program exceeds the {limit}-instruction limit")]
    TooManyInstructions {
        /// Configured limit.
        limit: usize,
    },
}

impl CodeGenError {
    /// Byte range the error refers to, empty for program-level caps.
    pub fn span(&self) -> Span {
        match self {
            CodeGenError::UndefinedSymbol { span, .. }
            | CodeGenError::TypeMismatch { span, .. }
            | CodeGenError::StackOverflow { span, .. }
            | CodeGenError::JumpOutOfRange { span, .. }
            | CodeGenError::UnsupportedCall { span, .. }
            | CodeGenError::StrayLoopControl { span, .. } => *span,
            CodeGenError::TooManyInstructions { .. } => Span::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Label(usize);

#[derive(Debug)]
struct Patch {
    index: usize,
    label: Label,
    span: Span,
}

#[derive(Debug, Clone)]
struct FieldLayout {
    name: String,
    ty: Type,
    offset: usize,
}

#[derive(Debug, Clone)]
struct StructLayout {
    fields: Vec<FieldLayout>,
    size: usize,
}

/// BPF code generator.
///
/// Consumes a parsed [`Program`] and produces a [`BpfProgram`]: the
/// instruction vector plus the function entry-point map. The symbol
/// table is built on the fly while walking each function.
pub struct CodeGen {
    stack_bytes: usize,
    max_instructions: usize,
    instructions: Vec<BpfInstruction>,
    entry_points: Vec<EntryPoint>,
    symbols: SymbolTable,
    structs: HashMap<String, StructLayout>,
    labels: Vec<Option<usize>>,
    patches: Vec<Patch>,
    loop_stack: Vec<(Label, Label)>,
    frame_offset: i32,
    string_slots: HashMap<(usize, usize), i16>,
    heap_next: i64,
}

impl CodeGen {
    /// Creates a generator with the given frame and instruction caps.
    pub fn new(stack_bytes: usize, max_instructions: usize) -> Self {
        Self {
            stack_bytes,
            max_instructions,
            instructions: Vec::new(),
            entry_points: Vec::new(),
            symbols: SymbolTable::new(),
            structs: HashMap::new(),
            labels: Vec::new(),
            patches: Vec::new(),
            loop_stack: Vec::new(),
            frame_offset: 0,
            string_slots: HashMap::new(),
            heap_next: 0,
        }
    }

    /// Generates a complete program.
    ///
    /// Declaration pass first (struct layouts, function names, global
    /// slots), then a prelude storing global initializers, then each
    /// function in source order. Execution starts at instruction 0 and
    /// falls through the prelude into the first function.
    pub fn generate(mut self, program: &Program) -> Result<BpfProgram, CodeGenError> {
        for decl in &program.decls {
            match decl {
                Decl::Struct(s) => self.declare_struct(s)?,
                Decl::Global(v) => self.declare_global(v)?,
                Decl::Function(f) => self.symbols.define(Symbol {
                    name: f.name.clone(),
                    kind: SymbolKind::Function,
                    ty: f.return_type.clone(),
                    offset: None,
                }),
            }
        }

        for decl in &program.decls {
            if let Decl::Global(v) = decl {
                self.gen_global_init(v)?;
            }
        }
        // Initializer expressions may branch; their patches resolve
        // against the prelude before any function is generated.
        self.resolve_patches()?;

        for decl in &program.decls {
            if let Decl::Function(f) = decl {
                self.gen_function(f)?;
            }
        }

        if self.instructions.len() > self.max_instructions {
            return Err(CodeGenError::TooManyInstructions {
                limit: self.max_instructions,
            });
        }

        Ok(BpfProgram {
            instructions: self.instructions,
            entry_points: self.entry_points,
        })
    }

    // === Declarations ===

    fn declare_struct(&mut self, decl: &StructDecl) -> Result<(), CodeGenError> {
        let mut fields = Vec::new();
        let mut offset = 0usize;
        for field in &decl.fields {
            if field.ty == Type::Void {
                return Err(CodeGenError::TypeMismatch {
                    message: format!("field '{}' cannot have type U0", field.name),
                    span: field.span,
                });
            }
            let align = type_align(&field.ty);
            offset = align_up(offset, align);
            fields.push(FieldLayout {
                name: field.name.clone(),
                ty: field.ty.clone(),
                offset,
            });
            offset += field.ty.size_bytes();
        }

        self.structs.insert(
            decl.name.clone(),
            StructLayout {
                fields,
                size: align_up(offset, 8),
            },
        );
        self.symbols.define(Symbol {
            name: decl.name.clone(),
            kind: SymbolKind::Type,
            ty: Type::Struct(decl.name.clone()),
            offset: None,
        });
        Ok(())
    }

    fn declare_global(&mut self, decl: &VarDecl) -> Result<(), CodeGenError> {
        let size = align_up(self.sized(&decl.ty, decl.span)?.max(8), 8);
        if self.heap_next + size as i64 > HEAP_SIZE as i64 {
            return Err(CodeGenError::TypeMismatch {
                message: format!("global storage for '{}' exceeds the heap region", decl.name),
                span: decl.span,
            });
        }
        let offset = self.heap_next;
        self.heap_next += size as i64;
        self.symbols.define(Symbol {
            name: decl.name.clone(),
            kind: SymbolKind::Global,
            ty: decl.ty.clone(),
            offset: Some(offset as i32),
        });
        Ok(())
    }

    fn gen_global_init(&mut self, decl: &VarDecl) -> Result<(), CodeGenError> {
        let Some(init) = &decl.init else {
            return Ok(());
        };
        let offset = self
            .symbols
            .lookup(&decl.name)
            .and_then(|s| s.offset)
            .unwrap_or(0);

        let ty = self.gen_expr(init)?;
        self.expect_scalar(&ty, init.span, "global initializer")?;
        for inst in BpfInstruction::lddw(R1, HEAP_BASE + offset as u64) {
            self.emit(inst);
        }
        self.emit(BpfInstruction::stxdw(R1, R0, 0));
        Ok(())
    }

    // === Functions ===

    fn gen_function(&mut self, decl: &FunctionDecl) -> Result<(), CodeGenError> {
        self.frame_offset = 0;
        self.labels.clear();
        self.patches.clear();
        self.loop_stack.clear();
        self.string_slots.clear();

        self.entry_points.push(EntryPoint {
            name: decl.name.clone(),
            pc: self.instructions.len(),
            exported: decl.exported,
        });

        self.symbols.push_scope();

        if decl.params.len() > 5 {
            return Err(CodeGenError::TypeMismatch {
                message: format!(
                    "function '{}' has {} parameters, the BPF calling convention allows 5",
                    decl.name,
                    decl.params.len()
                ),
                span: decl.span,
            });
        }
        for (i, param) in decl.params.iter().enumerate() {
            let slot = self.alloc_slot(8, param.span)?;
            self.symbols.define(Symbol {
                name: param.name.clone(),
                kind: SymbolKind::Param,
                ty: param.ty.clone(),
                offset: Some(slot as i32),
            });
            self.emit(BpfInstruction::stxdw(R10, R1 + i as u8, slot));
        }

        self.materialize_strings(&decl.body)?;
        self.gen_stmt(&decl.body)?;

        // A function never falls off its end without an EXIT. Whether
        // one is needed is decided from the statement structure, not
        // from the last emitted instruction: a trailing `if` can end
        // with an `exit` and still have a reachable fall-through path
        // branching past it. A label bound one past the last
        // instruction (an if/else whose branches both return binds its
        // end label there) must land on a real instruction too.
        let dangling_label = self
            .labels
            .iter()
            .any(|label| *label == Some(self.instructions.len()));
        if !always_exits(&decl.body) || dangling_label {
            self.emit(BpfInstruction::mov_imm(R0, 0));
            self.emit(BpfInstruction::exit());
        }

        self.resolve_patches()?;
        self.symbols.pop_scope();
        Ok(())
    }

    /// Writes every string literal in the body into its own frame slot
    /// during the prologue, NUL-terminated, so expression evaluation
    /// only ever computes `R10`-relative addresses.
    fn materialize_strings(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        let mut literals = Vec::new();
        collect_strings_stmt(stmt, &mut literals);

        for (span, bytes) in literals {
            let mut data = bytes;
            data.push(0);
            let slot = self.alloc_slot(align_up(data.len(), 8), span)?;
            for (i, chunk) in data.chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.emit(BpfInstruction::st_w(
                    R10,
                    slot + (i * 4) as i16,
                    i32::from_le_bytes(word),
                ));
            }
            self.string_slots.insert((span.offset, span.len), slot);
        }
        Ok(())
    }

    // === Statements ===

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        match &stmt.kind {
            StmtKind::Block(statements) => {
                self.symbols.push_scope();
                for s in statements {
                    self.gen_stmt(s)?;
                }
                self.symbols.pop_scope();
                Ok(())
            }
            StmtKind::VarDecl(decl) => self.gen_local_decl(decl),
            StmtKind::Expr(expr) => {
                self.gen_expr(expr)?;
                Ok(())
            }
            StmtKind::Return(expr) => {
                match expr {
                    Some(e) => {
                        let ty = self.gen_expr(e)?;
                        self.expect_scalar(&ty, e.span, "return value")?;
                    }
                    None => self.emit(BpfInstruction::mov_imm(R0, 0)),
                }
                self.emit(BpfInstruction::exit());
                Ok(())
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let else_label = self.new_label();
                let end_label = self.new_label();

                let ty = self.gen_expr(cond)?;
                self.expect_scalar(&ty, cond.span, "condition")?;
                self.emit_branch_if_zero(else_label, cond.span);

                self.gen_stmt(then_branch)?;
                match else_branch {
                    Some(else_stmt) => {
                        self.emit_jump(end_label, stmt.span);
                        self.bind_label(else_label);
                        self.gen_stmt(else_stmt)?;
                        self.bind_label(end_label);
                    }
                    None => {
                        self.bind_label(else_label);
                        self.bind_label(end_label);
                    }
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let top = self.new_label();
                let end = self.new_label();

                self.bind_label(top);
                let ty = self.gen_expr(cond)?;
                self.expect_scalar(&ty, cond.span, "condition")?;
                self.emit_branch_if_zero(end, cond.span);

                self.loop_stack.push((end, top));
                self.gen_stmt(body)?;
                self.loop_stack.pop();

                self.emit_jump(top, stmt.span);
                self.bind_label(end);
                Ok(())
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.symbols.push_scope();
                if let Some(init) = init {
                    self.gen_stmt(init)?;
                }

                let top = self.new_label();
                let cont = self.new_label();
                let end = self.new_label();

                self.bind_label(top);
                if let Some(cond) = cond {
                    let ty = self.gen_expr(cond)?;
                    self.expect_scalar(&ty, cond.span, "condition")?;
                    self.emit_branch_if_zero(end, cond.span);
                }

                self.loop_stack.push((end, cont));
                self.gen_stmt(body)?;
                self.loop_stack.pop();

                self.bind_label(cont);
                if let Some(step) = step {
                    self.gen_expr(step)?;
                }
                self.emit_jump(top, stmt.span);
                self.bind_label(end);
                self.symbols.pop_scope();
                Ok(())
            }
            StmtKind::Break => {
                let (end, _) = *self.loop_stack.last().ok_or(CodeGenError::StrayLoopControl {
                    keyword: "break",
                    span: stmt.span,
                })?;
                self.emit_jump(end, stmt.span);
                Ok(())
            }
            StmtKind::Continue => {
                let (_, cont) = *self.loop_stack.last().ok_or(CodeGenError::StrayLoopControl {
                    keyword: "continue",
                    span: stmt.span,
                })?;
                self.emit_jump(cont, stmt.span);
                Ok(())
            }
        }
    }

    fn gen_local_decl(&mut self, decl: &VarDecl) -> Result<(), CodeGenError> {
        let size = self.sized(&decl.ty, decl.span)?;
        let slot = self.alloc_slot(size.max(8), decl.span)?;
        self.symbols.define(Symbol {
            name: decl.name.clone(),
            kind: SymbolKind::Local,
            ty: decl.ty.clone(),
            offset: Some(slot as i32),
        });

        if let Some(init) = &decl.init {
            if is_aggregate(&decl.ty) {
                return Err(CodeGenError::TypeMismatch {
                    message: format!("'{}': aggregate initializers are not supported", decl.name),
                    span: decl.span,
                });
            }
            let ty = self.gen_expr(init)?;
            self.expect_scalar(&ty, init.span, "initializer")?;
            self.emit(BpfInstruction::stxdw(R10, R0, slot));
        }
        Ok(())
    }

    // === Expressions (result in R0) ===

    fn gen_expr(&mut self, expr: &Expr) -> Result<Type, CodeGenError> {
        match &expr.kind {
            ExprKind::IntLit { value, width_hint } => {
                if *width_hint <= 32 {
                    self.emit(BpfInstruction::mov_imm(R0, *value as i32));
                } else {
                    for inst in BpfInstruction::lddw(R0, *value) {
                        self.emit(inst);
                    }
                }
                Ok(Type::unsigned(64))
            }
            ExprKind::CharLit(value) => {
                self.emit(BpfInstruction::mov_imm(R0, *value as i32));
                Ok(Type::unsigned(8))
            }
            ExprKind::BoolLit(value) => {
                self.emit(BpfInstruction::mov_imm(R0, *value as i32));
                Ok(Type::Bool)
            }
            ExprKind::Null => {
                self.emit(BpfInstruction::mov_imm(R0, 0));
                Ok(Type::Pointer(Box::new(Type::Void)))
            }
            ExprKind::FloatLit(_) => Err(CodeGenError::TypeMismatch {
                message: "floating point values cannot be lowered to BPF".to_string(),
                span: expr.span,
            }),
            ExprKind::StringLit(_) => {
                let slot = self
                    .string_slots
                    .get(&(expr.span.offset, expr.span.len))
                    .copied()
                    .ok_or(CodeGenError::TypeMismatch {
                        message: "string literal outside a function body".to_string(),
                        span: expr.span,
                    })?;
                self.emit(BpfInstruction::mov_reg(R0, R10));
                self.emit(BpfInstruction::add_imm(R0, slot as i32));
                Ok(Type::Pointer(Box::new(Type::unsigned(8))))
            }
            ExprKind::Identifier(name) => self.gen_identifier_load(name, expr.span),
            ExprKind::Unary { op, operand } => self.gen_unary(*op, operand, expr.span),
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary(*op, lhs, rhs, expr.span),
            ExprKind::Assign { target, op, value } => self.gen_assign(target, *op, value),
            ExprKind::Call { callee, args } => self.gen_call(callee, args, expr.span),
            ExprKind::Index { .. } | ExprKind::Member { .. } => {
                let ty = self.gen_address(expr)?;
                self.load_from_address(&ty);
                Ok(ty)
            }
        }
    }

    fn gen_identifier_load(&mut self, name: &str, span: Span) -> Result<Type, CodeGenError> {
        let symbol = self
            .symbols
            .lookup(name)
            .ok_or_else(|| CodeGenError::UndefinedSymbol {
                name: name.to_string(),
                span,
            })?
            .clone();

        match symbol.kind {
            SymbolKind::Local | SymbolKind::Param => {
                let offset = symbol.offset.unwrap_or(0) as i16;
                if is_aggregate(&symbol.ty) {
                    self.emit(BpfInstruction::mov_reg(R0, R10));
                    self.emit(BpfInstruction::add_imm(R0, offset as i32));
                } else {
                    self.emit(BpfInstruction::ldxdw(R0, R10, offset));
                }
                Ok(symbol.ty)
            }
            SymbolKind::Global => {
                let addr = HEAP_BASE + symbol.offset.unwrap_or(0) as u64;
                if is_aggregate(&symbol.ty) {
                    for inst in BpfInstruction::lddw(R0, addr) {
                        self.emit(inst);
                    }
                } else {
                    for inst in BpfInstruction::lddw(R1, addr) {
                        self.emit(inst);
                    }
                    self.emit(BpfInstruction::ldxdw(R0, R1, 0));
                }
                Ok(symbol.ty)
            }
            SymbolKind::Function | SymbolKind::Type => Err(CodeGenError::TypeMismatch {
                message: format!("'{}' is not a value", name),
                span,
            }),
        }
    }

    fn gen_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Result<Type, CodeGenError> {
        match op {
            UnaryOp::Plus => self.gen_expr(operand),
            UnaryOp::Neg => {
                let ty = self.gen_expr(operand)?;
                self.expect_arith(&ty, span, "-")?;
                self.emit(BpfInstruction::new(opc::NEG64, R0, 0, 0, 0));
                Ok(Type::signed(64))
            }
            UnaryOp::BitNot => {
                let ty = self.gen_expr(operand)?;
                self.expect_arith(&ty, span, "~")?;
                self.emit(BpfInstruction::new(opc::XOR64_IMM, R0, 0, 0, -1));
                Ok(ty.widen(&Type::unsigned(64)))
            }
            UnaryOp::Not => {
                let ty = self.gen_expr(operand)?;
                self.expect_scalar(&ty, span, "operand of '!'")?;
                // Normalize to 0/1 with fixed short displacements.
                self.emit(BpfInstruction::jeq_imm(R0, 0, 2));
                self.emit(BpfInstruction::mov_imm(R0, 0));
                self.emit(BpfInstruction::ja(1));
                self.emit(BpfInstruction::mov_imm(R0, 1));
                Ok(Type::Bool)
            }
            UnaryOp::Deref => {
                let ty = self.gen_expr(operand)?;
                match ty {
                    Type::Pointer(inner) => {
                        let inner = *inner;
                        if inner == Type::Void {
                            return Err(CodeGenError::TypeMismatch {
                                message: "cannot dereference a U0 pointer".to_string(),
                                span,
                            });
                        }
                        self.load_from_address(&inner);
                        Ok(inner)
                    }
                    other => Err(CodeGenError::TypeMismatch {
                        message: format!("cannot dereference a value of type {}", other),
                        span,
                    }),
                }
            }
            UnaryOp::AddrOf => {
                let ty = self.gen_address(operand)?;
                Ok(Type::Pointer(Box::new(ty)))
            }
            UnaryOp::PreIncrement => self.gen_incdec(operand, 1, false, span),
            UnaryOp::PreDecrement => self.gen_incdec(operand, -1, false, span),
            UnaryOp::PostIncrement => self.gen_incdec(operand, 1, true, span),
            UnaryOp::PostDecrement => self.gen_incdec(operand, -1, true, span),
        }
    }

    /// `++`/`--` on an lvalue; `post` selects which value is left in R0.
    fn gen_incdec(
        &mut self,
        target: &Expr,
        delta: i32,
        post: bool,
        span: Span,
    ) -> Result<Type, CodeGenError> {
        // Fast path: locals and params go straight through their slot.
        if let ExprKind::Identifier(name) = &target.kind {
            let symbol = self
                .symbols
                .lookup(name)
                .ok_or_else(|| CodeGenError::UndefinedSymbol {
                    name: name.clone(),
                    span,
                })?
                .clone();
            if matches!(symbol.kind, SymbolKind::Local | SymbolKind::Param) {
                self.expect_scalar(&symbol.ty, span, "operand of '++'/'--'")?;
                let slot = symbol.offset.unwrap_or(0) as i16;
                self.emit(BpfInstruction::ldxdw(R0, R10, slot));
                self.emit(BpfInstruction::mov_reg(R1, R0));
                self.emit(BpfInstruction::add_imm(R0, delta));
                self.emit(BpfInstruction::stxdw(R10, R0, slot));
                if post {
                    self.emit(BpfInstruction::mov_reg(R0, R1));
                }
                return Ok(symbol.ty);
            }
        }

        let ty = self.gen_address(target)?;
        self.expect_scalar(&ty, span, "operand of '++'/'--'")?;
        self.emit(BpfInstruction::mov_reg(R1, R0));
        self.load_sized(R0, R1, 0, &ty);
        self.emit(BpfInstruction::mov_reg(R2, R0));
        self.emit(BpfInstruction::add_imm(R0, delta));
        self.store_sized(R1, R0, 0, &ty);
        if post {
            self.emit(BpfInstruction::mov_reg(R0, R2));
        }
        Ok(ty)
    }

    fn gen_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        span: Span,
    ) -> Result<Type, CodeGenError> {
        if op.is_logical() {
            return self.gen_logical(op, lhs, rhs, span);
        }

        let lhs_ty = self.gen_expr(lhs)?;
        let slot = self.push_temp(span)?;
        self.emit(BpfInstruction::stxdw(R10, R0, slot));

        let rhs_ty = self.gen_expr(rhs)?;
        self.emit(BpfInstruction::mov_reg(R1, R0));
        self.emit(BpfInstruction::ldxdw(R0, R10, slot));
        self.pop_temp();

        self.apply_binary(op, &lhs_ty, &rhs_ty, span)
    }

    /// Applies `op` to lhs in R0 and rhs in R1, result in R0.
    fn apply_binary(
        &mut self,
        op: BinaryOp,
        lhs_ty: &Type,
        rhs_ty: &Type,
        span: Span,
    ) -> Result<Type, CodeGenError> {
        if op.is_comparison() {
            let signed = comparable(lhs_ty, rhs_ty, span, op)?;
            let opcode = compare_opcode(op, signed);
            let taken = self.new_label();
            let end = self.new_label();
            self.emit_jump_cond(opcode, R0, R1, taken, span);
            self.emit(BpfInstruction::mov_imm(R0, 0));
            self.emit_jump(end, span);
            self.bind_label(taken);
            self.emit(BpfInstruction::mov_imm(R0, 1));
            self.bind_label(end);
            return Ok(Type::Bool);
        }

        // Pointer offset arithmetic is byte-granular.
        let result_ty = match op {
            BinaryOp::Add | BinaryOp::Sub => {
                match (lhs_ty.is_integer() || *lhs_ty == Type::Bool, lhs_ty, rhs_ty) {
                    (_, Type::Pointer(_), rhs) if rhs.is_integer() => lhs_ty.clone(),
                    (_, Type::Pointer(_), Type::Pointer(_)) if op == BinaryOp::Sub => {
                        Type::unsigned(64)
                    }
                    (true, _, Type::Pointer(_)) if op == BinaryOp::Add => rhs_ty.clone(),
                    _ => {
                        self.expect_arith(lhs_ty, span, &op.to_string())?;
                        self.expect_arith(rhs_ty, span, &op.to_string())?;
                        lhs_ty.widen(rhs_ty)
                    }
                }
            }
            _ => {
                self.expect_arith(lhs_ty, span, &op.to_string())?;
                self.expect_arith(rhs_ty, span, &op.to_string())?;
                lhs_ty.widen(rhs_ty)
            }
        };

        if matches!(op, BinaryOp::Div | BinaryOp::Mod) {
            self.emit_divide_guard();
        }

        let opcode = match op {
            BinaryOp::Add => opc::ADD64_REG,
            BinaryOp::Sub => opc::SUB64_REG,
            BinaryOp::Mul => opc::MUL64_REG,
            BinaryOp::Div => opc::DIV64_REG,
            BinaryOp::Mod => opc::MOD64_REG,
            BinaryOp::BitAnd => opc::AND64_REG,
            BinaryOp::BitOr => opc::OR64_REG,
            BinaryOp::BitXor => opc::XOR64_REG,
            BinaryOp::Shl => opc::LSH64_REG,
            BinaryOp::Shr => opc::RSH64_REG,
            _ => unreachable!("logical and comparison ops handled above"),
        };
        self.emit(BpfInstruction::alu_reg(opcode, R0, R1));
        Ok(result_ty)
    }

    /// Runtime divisor check: skip two instructions when R1 is nonzero,
    /// otherwise exit with the distinguished code.
    fn emit_divide_guard(&mut self) {
        self.emit(BpfInstruction::jne_imm(R1, 0, 2));
        self.emit(BpfInstruction::mov_imm(R0, DIVIDE_BY_ZERO_EXIT_CODE));
        self.emit(BpfInstruction::exit());
    }

    fn gen_logical(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        span: Span,
    ) -> Result<Type, CodeGenError> {
        let end = self.new_label();
        match op {
            BinaryOp::LogicalAnd => {
                let fail = self.new_label();
                let ty = self.gen_expr(lhs)?;
                self.expect_scalar(&ty, lhs.span, "operand of '&&'")?;
                self.emit_branch_if_zero(fail, span);
                let ty = self.gen_expr(rhs)?;
                self.expect_scalar(&ty, rhs.span, "operand of '&&'")?;
                self.emit_branch_if_zero(fail, span);
                self.emit(BpfInstruction::mov_imm(R0, 1));
                self.emit_jump(end, span);
                self.bind_label(fail);
                self.emit(BpfInstruction::mov_imm(R0, 0));
            }
            BinaryOp::LogicalOr => {
                let succeed = self.new_label();
                let ty = self.gen_expr(lhs)?;
                self.expect_scalar(&ty, lhs.span, "operand of '||'")?;
                self.emit_jump_cond(opc::JNE_IMM, R0, 0, succeed, span);
                let ty = self.gen_expr(rhs)?;
                self.expect_scalar(&ty, rhs.span, "operand of '||'")?;
                self.emit_jump_cond(opc::JNE_IMM, R0, 0, succeed, span);
                self.emit(BpfInstruction::mov_imm(R0, 0));
                self.emit_jump(end, span);
                self.bind_label(succeed);
                self.emit(BpfInstruction::mov_imm(R0, 1));
            }
            _ => unreachable!("only logical operators reach gen_logical"),
        }
        self.bind_label(end);
        Ok(Type::Bool)
    }

    fn gen_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
    ) -> Result<Type, CodeGenError> {
        // Identifier targets write straight through their slot.
        if let ExprKind::Identifier(name) = &target.kind {
            let symbol = self
                .symbols
                .lookup(name)
                .ok_or_else(|| CodeGenError::UndefinedSymbol {
                    name: name.clone(),
                    span: target.span,
                })?
                .clone();

            return match symbol.kind {
                SymbolKind::Local | SymbolKind::Param => {
                    let slot = symbol.offset.unwrap_or(0) as i16;
                    self.expect_scalar(&symbol.ty, target.span, "assignment target")?;
                    match op.binary_op() {
                        None => {
                            let vty = self.gen_expr(value)?;
                            self.check_assignable(&symbol.ty, &vty, value.span)?;
                        }
                        Some(bin) => {
                            self.emit(BpfInstruction::ldxdw(R0, R10, slot));
                            let temp = self.push_temp(target.span)?;
                            self.emit(BpfInstruction::stxdw(R10, R0, temp));
                            let vty = self.gen_expr(value)?;
                            self.emit(BpfInstruction::mov_reg(R1, R0));
                            self.emit(BpfInstruction::ldxdw(R0, R10, temp));
                            self.pop_temp();
                            self.apply_binary(bin, &symbol.ty, &vty, target.span)?;
                        }
                    }
                    self.emit(BpfInstruction::stxdw(R10, R0, slot));
                    Ok(symbol.ty)
                }
                SymbolKind::Global => {
                    let addr = HEAP_BASE + symbol.offset.unwrap_or(0) as u64;
                    self.expect_scalar(&symbol.ty, target.span, "assignment target")?;
                    match op.binary_op() {
                        None => {
                            let vty = self.gen_expr(value)?;
                            self.check_assignable(&symbol.ty, &vty, value.span)?;
                        }
                        Some(bin) => {
                            for inst in BpfInstruction::lddw(R1, addr) {
                                self.emit(inst);
                            }
                            self.emit(BpfInstruction::ldxdw(R0, R1, 0));
                            let temp = self.push_temp(target.span)?;
                            self.emit(BpfInstruction::stxdw(R10, R0, temp));
                            let vty = self.gen_expr(value)?;
                            self.emit(BpfInstruction::mov_reg(R1, R0));
                            self.emit(BpfInstruction::ldxdw(R0, R10, temp));
                            self.pop_temp();
                            self.apply_binary(bin, &symbol.ty, &vty, target.span)?;
                        }
                    }
                    for inst in BpfInstruction::lddw(R1, addr) {
                        self.emit(inst);
                    }
                    self.emit(BpfInstruction::stxdw(R1, R0, 0));
                    Ok(symbol.ty)
                }
                _ => Err(CodeGenError::TypeMismatch {
                    message: format!("'{}' is not assignable", name),
                    span: target.span,
                }),
            };
        }

        // General lvalues: compute the address once, spill it, then the
        // value, then store through the reloaded address.
        let target_ty = self.gen_address(target)?;
        self.expect_scalar(&target_ty, target.span, "assignment target")?;
        let addr_slot = self.push_temp(target.span)?;
        self.emit(BpfInstruction::stxdw(R10, R0, addr_slot));

        match op.binary_op() {
            None => {
                let vty = self.gen_expr(value)?;
                self.check_assignable(&target_ty, &vty, value.span)?;
            }
            Some(bin) => {
                self.emit(BpfInstruction::ldxdw(R1, R10, addr_slot));
                self.load_sized(R0, R1, 0, &target_ty);
                let cur_slot = self.push_temp(target.span)?;
                self.emit(BpfInstruction::stxdw(R10, R0, cur_slot));
                let vty = self.gen_expr(value)?;
                self.emit(BpfInstruction::mov_reg(R1, R0));
                self.emit(BpfInstruction::ldxdw(R0, R10, cur_slot));
                self.pop_temp();
                self.apply_binary(bin, &target_ty, &vty, target.span)?;
            }
        }

        self.emit(BpfInstruction::ldxdw(R1, R10, addr_slot));
        self.pop_temp();
        self.store_sized(R1, R0, 0, &target_ty);
        Ok(target_ty)
    }

    fn gen_call(&mut self, callee: &str, args: &[Expr], span: Span) -> Result<Type, CodeGenError> {
        let Some(&(_, helper, max_args)) = BUILTINS.iter().find(|(name, _, _)| *name == callee)
        else {
            return Err(CodeGenError::UnsupportedCall {
                name: callee.to_string(),
                span,
            });
        };

        if args.len() > max_args {
            return Err(CodeGenError::TypeMismatch {
                message: format!(
                    "'{}' accepts at most {} arguments, {} given",
                    callee,
                    max_args,
                    args.len()
                ),
                span,
            });
        }

        let mut slots = Vec::with_capacity(args.len());
        for arg in args {
            let ty = self.gen_expr(arg)?;
            self.expect_scalar(&ty, arg.span, "call argument")?;
            let slot = self.push_temp(arg.span)?;
            self.emit(BpfInstruction::stxdw(R10, R0, slot));
            slots.push(slot);
        }
        for (i, slot) in slots.iter().enumerate() {
            self.emit(BpfInstruction::ldxdw(R1 + i as u8, R10, *slot));
        }
        for _ in &slots {
            self.pop_temp();
        }

        self.emit(BpfInstruction::call(helper));
        Ok(Type::unsigned(64))
    }

    /// Leaves the address of an lvalue in R0 and returns the type of
    /// the value stored there.
    fn gen_address(&mut self, expr: &Expr) -> Result<Type, CodeGenError> {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                let symbol = self
                    .symbols
                    .lookup(name)
                    .ok_or_else(|| CodeGenError::UndefinedSymbol {
                        name: name.clone(),
                        span: expr.span,
                    })?
                    .clone();
                match symbol.kind {
                    SymbolKind::Local | SymbolKind::Param => {
                        self.emit(BpfInstruction::mov_reg(R0, R10));
                        self.emit(BpfInstruction::add_imm(
                            R0,
                            symbol.offset.unwrap_or(0),
                        ));
                        Ok(symbol.ty)
                    }
                    SymbolKind::Global => {
                        let addr = HEAP_BASE + symbol.offset.unwrap_or(0) as u64;
                        for inst in BpfInstruction::lddw(R0, addr) {
                            self.emit(inst);
                        }
                        Ok(symbol.ty)
                    }
                    _ => Err(CodeGenError::TypeMismatch {
                        message: format!("'{}' has no address", name),
                        span: expr.span,
                    }),
                }
            }
            ExprKind::Index { array, index } => {
                let (elem_ty, base_is_address) = match self.indexed_type(array)? {
                    Type::Array(elem, _) => (*elem, true),
                    Type::Pointer(elem) => (*elem, false),
                    other => {
                        return Err(CodeGenError::TypeMismatch {
                            message: format!("cannot index a value of type {}", other),
                            span: expr.span,
                        })
                    }
                };

                if base_is_address {
                    self.gen_address(array)?;
                } else {
                    self.gen_expr(array)?;
                }
                let slot = self.push_temp(expr.span)?;
                self.emit(BpfInstruction::stxdw(R10, R0, slot));

                let ity = self.gen_expr(index)?;
                self.expect_arith(&ity, index.span, "index")?;
                let elem_size = elem_ty.size_bytes().max(1);
                if elem_size > 1 {
                    self.emit(BpfInstruction::new(
                        opc::MUL64_IMM,
                        R0,
                        0,
                        0,
                        elem_size as i32,
                    ));
                }
                self.emit(BpfInstruction::mov_reg(R1, R0));
                self.emit(BpfInstruction::ldxdw(R0, R10, slot));
                self.pop_temp();
                self.emit(BpfInstruction::alu_reg(opc::ADD64_REG, R0, R1));
                Ok(elem_ty)
            }
            ExprKind::Member {
                object,
                field,
                arrow,
            } => {
                let struct_name = if *arrow {
                    match self.gen_expr(object)? {
                        Type::Pointer(inner) => match *inner {
                            Type::Struct(name) => name,
                            other => {
                                return Err(CodeGenError::TypeMismatch {
                                    message: format!("'->' on a pointer to {}", other),
                                    span: expr.span,
                                })
                            }
                        },
                        other => {
                            return Err(CodeGenError::TypeMismatch {
                                message: format!("'->' on a value of type {}", other),
                                span: expr.span,
                            })
                        }
                    }
                } else {
                    match self.gen_address(object)? {
                        Type::Struct(name) => name,
                        other => {
                            return Err(CodeGenError::TypeMismatch {
                                message: format!("'.' on a value of type {}", other),
                                span: expr.span,
                            })
                        }
                    }
                };

                let layout =
                    self.structs
                        .get(&struct_name)
                        .ok_or_else(|| CodeGenError::UndefinedSymbol {
                            name: struct_name.clone(),
                            span: expr.span,
                        })?;
                let field_layout = layout
                    .fields
                    .iter()
                    .find(|f| f.name == *field)
                    .ok_or_else(|| CodeGenError::UndefinedSymbol {
                        name: format!("{}.{}", struct_name, field),
                        span: expr.span,
                    })?
                    .clone();

                self.emit(BpfInstruction::add_imm(R0, field_layout.offset as i32));
                Ok(field_layout.ty)
            }
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => match self.gen_expr(operand)? {
                Type::Pointer(inner) => Ok(*inner),
                other => Err(CodeGenError::TypeMismatch {
                    message: format!("cannot dereference a value of type {}", other),
                    span: expr.span,
                }),
            },
            _ => Err(CodeGenError::TypeMismatch {
                message: "expression is not assignable".to_string(),
                span: expr.span,
            }),
        }
    }

    /// Declared type of an indexed expression, without emitting code.
    fn indexed_type(&self, array: &Expr) -> Result<Type, CodeGenError> {
        if let ExprKind::Identifier(name) = &array.kind {
            return self
                .symbols
                .lookup(name)
                .map(|s| s.ty.clone())
                .ok_or_else(|| CodeGenError::UndefinedSymbol {
                    name: name.clone(),
                    span: array.span,
                });
        }
        Ok(self
            .static_type(array)
            .unwrap_or(Type::Pointer(Box::new(Type::unsigned(8)))))
    }

    /// Best-effort declared type of an lvalue chain, with no codegen.
    fn static_type(&self, expr: &Expr) -> Option<Type> {
        match &expr.kind {
            ExprKind::Identifier(name) => self.symbols.lookup(name).map(|s| s.ty.clone()),
            ExprKind::Member {
                object,
                field,
                arrow,
            } => {
                let name = match (arrow, self.static_type(object)?) {
                    (true, Type::Pointer(inner)) => match *inner {
                        Type::Struct(n) => n,
                        _ => return None,
                    },
                    (false, Type::Struct(n)) => n,
                    _ => return None,
                };
                let layout = self.structs.get(&name)?;
                layout
                    .fields
                    .iter()
                    .find(|f| f.name == *field)
                    .map(|f| f.ty.clone())
            }
            ExprKind::Index { array, .. } => match self.static_type(array)? {
                Type::Array(elem, _) | Type::Pointer(elem) => Some(*elem),
                _ => None,
            },
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => match self.static_type(operand)? {
                Type::Pointer(inner) => Some(*inner),
                _ => None,
            },
            _ => None,
        }
    }

    fn load_from_address(&mut self, ty: &Type) {
        if is_aggregate(ty) {
            return; // Aggregates are handled by address.
        }
        self.load_sized(R0, R0, 0, ty);
    }

    fn load_sized(&mut self, dst: u8, src: u8, offset: i16, ty: &Type) {
        let opcode = match ty.size_bytes() {
            1 => opc::LDXB,
            2 => opc::LDXH,
            4 => opc::LDXW,
            _ => opc::LDXDW,
        };
        self.emit(BpfInstruction::new(opcode, dst, src, offset, 0));
    }

    fn store_sized(&mut self, dst: u8, src: u8, offset: i16, ty: &Type) {
        let opcode = match ty.size_bytes() {
            1 => opc::STXB,
            2 => opc::STXH,
            4 => opc::STXW,
            _ => opc::STXDW,
        };
        self.emit(BpfInstruction::new(opcode, dst, src, offset, 0));
    }

    // === Labels, patches, frame ===

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn bind_label(&mut self, label: Label) {
        self.labels[label.0] = Some(self.instructions.len());
    }

    fn emit_jump(&mut self, label: Label, span: Span) {
        self.patches.push(Patch {
            index: self.instructions.len(),
            label,
            span,
        });
        self.emit(BpfInstruction::ja(0));
    }

    fn emit_branch_if_zero(&mut self, label: Label, span: Span) {
        self.emit_jump_cond(opc::JEQ_IMM, R0, 0, label, span);
    }

    fn emit_jump_cond(&mut self, opcode: u8, dst: u8, src_or_imm: u8, label: Label, span: Span) {
        self.patches.push(Patch {
            index: self.instructions.len(),
            label,
            span,
        });
        // Immediate-comparison opcodes take the comparand in imm.
        let inst = if opcode & 0x08 == 0 {
            BpfInstruction::new(opcode, dst, 0, 0, src_or_imm as i32)
        } else {
            BpfInstruction::new(opcode, dst, src_or_imm, 0, 0)
        };
        self.emit(inst);
    }

    /// Fills in every recorded branch displacement. Offsets count
    /// instructions from the slot after the branch.
    fn resolve_patches(&mut self) -> Result<(), CodeGenError> {
        for patch in self.patches.drain(..) {
            let target = self.labels[patch.label.0]
                .expect("every label is bound before patch resolution");
            assert!(
                target < self.instructions.len(),
                "label bound past the end of the instruction vector"
            );
            let distance = target as i64 - (patch.index as i64 + 1);
            if distance > i16::MAX as i64 || distance < i16::MIN as i64 {
                return Err(CodeGenError::JumpOutOfRange {
                    distance,
                    span: patch.span,
                });
            }
            self.instructions[patch.index].offset = distance as i16;
        }
        Ok(())
    }

    fn emit(&mut self, inst: BpfInstruction) {
        self.instructions.push(inst);
    }

    fn alloc_slot(&mut self, size: usize, span: Span) -> Result<i16, CodeGenError> {
        let size = align_up(size.max(8), 8);
        let offset = self.frame_offset - size as i32;
        if -offset as usize > self.stack_bytes {
            return Err(CodeGenError::StackOverflow {
                needed: -offset as usize,
                limit: self.stack_bytes,
                span,
            });
        }
        self.frame_offset = offset;
        Ok(offset as i16)
    }

    fn push_temp(&mut self, span: Span) -> Result<i16, CodeGenError> {
        self.alloc_slot(8, span)
    }

    fn pop_temp(&mut self) {
        self.frame_offset += 8;
    }

    // === Type checks ===

    fn sized(&self, ty: &Type, span: Span) -> Result<usize, CodeGenError> {
        match ty {
            Type::Void => Err(CodeGenError::TypeMismatch {
                message: "variables cannot have type U0".to_string(),
                span,
            }),
            Type::Struct(name) => self
                .structs
                .get(name)
                .map(|layout| layout.size)
                .ok_or_else(|| CodeGenError::UndefinedSymbol {
                    name: name.clone(),
                    span,
                }),
            Type::Array(inner, len) => Ok(self.sized(inner, span)? * len),
            other => Ok(other.size_bytes()),
        }
    }

    fn expect_arith(&self, ty: &Type, span: Span, op: &str) -> Result<(), CodeGenError> {
        if ty.is_arithmetic() {
            Ok(())
        } else {
            Err(CodeGenError::TypeMismatch {
                message: format!("operator '{}' needs integer operands, got {}", op, ty),
                span,
            })
        }
    }

    fn expect_scalar(&self, ty: &Type, span: Span, what: &str) -> Result<(), CodeGenError> {
        match ty {
            Type::Int { .. } | Type::Bool | Type::Pointer(_) => Ok(()),
            other => Err(CodeGenError::TypeMismatch {
                message: format!("{} has non-scalar type {}", what, other),
                span,
            }),
        }
    }

    fn check_assignable(&self, target: &Type, value: &Type, span: Span) -> Result<(), CodeGenError> {
        let ok = match (target, value) {
            (t, v) if t.is_arithmetic() && v.is_arithmetic() => true,
            (Type::Pointer(_), Type::Pointer(_)) => true,
            (Type::Pointer(_), v) if v.is_integer() => true,
            (t, Type::Pointer(_)) if t.is_integer() => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(CodeGenError::TypeMismatch {
                message: format!("cannot assign {} to {}", value, target),
                span,
            })
        }
    }
}

fn is_aggregate(ty: &Type) -> bool {
    matches!(ty, Type::Array(..) | Type::Struct(_))
}

/// True when every execution path through `stmt` reaches a `return`.
/// Loops are treated as falling through regardless of their condition.
fn always_exits(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::Block(stmts) => stmts.iter().any(always_exits),
        StmtKind::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => always_exits(then_branch) && always_exits(else_branch),
        _ => false,
    }
}

fn type_align(ty: &Type) -> usize {
    match ty {
        Type::Array(inner, _) => type_align(inner),
        Type::Struct(_) => 8,
        other => other.size_bytes().clamp(1, 8),
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// Signedness of a comparison, or a mismatch error.
fn comparable(lhs: &Type, rhs: &Type, span: Span, op: BinaryOp) -> Result<bool, CodeGenError> {
    let scalar = |t: &Type| matches!(t, Type::Int { .. } | Type::Bool | Type::Pointer(_));
    if !scalar(lhs) || !scalar(rhs) {
        return Err(CodeGenError::TypeMismatch {
            message: format!("operator '{}' cannot compare {} and {}", op, lhs, rhs),
            span,
        });
    }
    let signed = matches!(lhs, Type::Int { signed: true, .. })
        && matches!(rhs, Type::Int { signed: true, .. });
    Ok(signed)
}

fn compare_opcode(op: BinaryOp, signed: bool) -> u8 {
    match (op, signed) {
        (BinaryOp::Eq, _) => opc::JEQ_REG,
        (BinaryOp::Ne, _) => opc::JNE_REG,
        (BinaryOp::Lt, false) => opc::JLT_REG,
        (BinaryOp::Lt, true) => opc::JSLT_REG,
        (BinaryOp::Le, false) => opc::JLE_REG,
        (BinaryOp::Le, true) => opc::JSLE_REG,
        (BinaryOp::Gt, false) => opc::JGT_REG,
        (BinaryOp::Gt, true) => opc::JSGT_REG,
        (BinaryOp::Ge, false) => opc::JGE_REG,
        (BinaryOp::Ge, true) => opc::JSGE_REG,
        _ => unreachable!("not a comparison operator"),
    }
}

fn collect_strings_stmt(stmt: &Stmt, out: &mut Vec<(Span, Vec<u8>)>) {
    match &stmt.kind {
        StmtKind::Block(statements) => {
            for s in statements {
                collect_strings_stmt(s, out);
            }
        }
        StmtKind::VarDecl(decl) => {
            if let Some(init) = &decl.init {
                collect_strings_expr(init, out);
            }
        }
        StmtKind::Expr(expr) => collect_strings_expr(expr, out),
        StmtKind::Return(Some(expr)) => collect_strings_expr(expr, out),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            collect_strings_expr(cond, out);
            collect_strings_stmt(then_branch, out);
            if let Some(e) = else_branch {
                collect_strings_stmt(e, out);
            }
        }
        StmtKind::While { cond, body } => {
            collect_strings_expr(cond, out);
            collect_strings_stmt(body, out);
        }
        StmtKind::For {
            init,
            cond,
            step,
            body,
        } => {
            if let Some(i) = init {
                collect_strings_stmt(i, out);
            }
            if let Some(c) = cond {
                collect_strings_expr(c, out);
            }
            if let Some(s) = step {
                collect_strings_expr(s, out);
            }
            collect_strings_stmt(body, out);
        }
    }
}

fn collect_strings_expr(expr: &Expr, out: &mut Vec<(Span, Vec<u8>)>) {
    match &expr.kind {
        ExprKind::StringLit(bytes) => out.push((expr.span, bytes.clone())),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_strings_expr(lhs, out);
            collect_strings_expr(rhs, out);
        }
        ExprKind::Unary { operand, .. } => collect_strings_expr(operand, out),
        ExprKind::Assign { target, value, .. } => {
            collect_strings_expr(target, out);
            collect_strings_expr(value, out);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                collect_strings_expr(arg, out);
            }
        }
        ExprKind::Index { array, index } => {
            collect_strings_expr(array, out);
            collect_strings_expr(index, out);
        }
        ExprKind::Member { object, .. } => collect_strings_expr(object, out),
        _ => {}
    }
}
