//! Interface Definition Language generation for exported functions.
//!
//! Walks the AST and describes every `export` function as JSON for
//! client tooling. Types map onto a closed tag set; anything without a
//! mapping fails rather than emitting a lossy description.

use serde::Serialize;
use thiserror::Error;

use crate::pible::ast::{Decl, FunctionDecl, Program, Type};
use crate::pible::diagnostics::Span;

/// IDL generation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdlError {
    /// An exported parameter or return type has no IDL mapping.
    #[error("function '{function}': type {ty} has no IDL representation")]
    UnsupportedType {
        /// The unmappable type, rendered in source spelling.
        ty: String,
        /// Function being described.
        function: String,
        /// Declaration span.
        span: Span,
    },
}

impl IdlError {
    /// Byte range the error refers to.
    pub fn span(&self) -> Span {
        match self {
            IdlError::UnsupportedType { span, .. } => *span,
        }
    }
}

/// Top-level IDL document.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Idl {
    /// Document format version.
    pub version: String,
    /// Program name, taken from the compilation unit.
    pub name: String,
    /// One entry per exported function, in source order.
    pub instructions: Vec<IdlInstruction>,
}

/// A single exported function.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdlInstruction {
    /// Exported name.
    pub name: String,
    /// Parameters in declaration order.
    pub args: Vec<IdlField>,
    /// Return type tag.
    pub returns: String,
}

/// A named, typed parameter.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdlField {
    /// Parameter name.
    pub name: String,
    /// Type tag.
    #[serde(rename = "type")]
    pub ty: String,
}

/// Builds the IDL document for every exported function in `program`.
pub fn build_idl(program: &Program, program_name: &str) -> Result<Idl, IdlError> {
    let mut instructions = Vec::new();

    for decl in &program.decls {
        if let Decl::Function(func) = decl {
            if func.exported {
                instructions.push(describe_function(func)?);
            }
        }
    }

    Ok(Idl {
        version: env!("CARGO_PKG_VERSION").to_string(),
        name: program_name.to_string(),
        instructions,
    })
}

/// Serializes an IDL document as pretty-printed JSON.
pub fn idl_to_bytes(idl: &Idl) -> Vec<u8> {
    let mut bytes =
        serde_json::to_vec_pretty(idl).expect("IDL documents always serialize to JSON");
    bytes.push(b'\n');
    bytes
}

fn describe_function(func: &FunctionDecl) -> Result<IdlInstruction, IdlError> {
    let mut args = Vec::with_capacity(func.params.len());
    for param in &func.params {
        let ty = type_tag(&param.ty).ok_or_else(|| IdlError::UnsupportedType {
            ty: param.ty.to_string(),
            function: func.name.clone(),
            span: param.span,
        })?;
        args.push(IdlField {
            name: param.name.clone(),
            ty,
        });
    }

    let returns = if func.return_type == Type::Void {
        "void".to_string()
    } else {
        type_tag(&func.return_type).ok_or_else(|| IdlError::UnsupportedType {
            ty: func.return_type.to_string(),
            function: func.name.clone(),
            span: func.span,
        })?
    };

    Ok(IdlInstruction {
        name: func.name.clone(),
        args,
        returns,
    })
}

/// Maps a source type onto the closed IDL tag set. `U0` only maps as a
/// return type and is handled by the caller.
fn type_tag(ty: &Type) -> Option<String> {
    let tag = match ty {
        Type::Int { signed, bits } => {
            format!("{}{}", if *signed { "i" } else { "u" }, bits)
        }
        Type::Bool => "bool".to_string(),
        Type::F64 => "f64".to_string(),
        Type::Void => return None,
        Type::Pointer(inner) => format!("pointer<{}>", type_tag(inner)?),
        Type::Array(inner, len) => format!("array<{},{}>", type_tag(inner)?, len),
        Type::Struct(name) => format!("struct<{}>", name),
    };
    Some(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pible::ast::{Param, Stmt, StmtKind};

    fn exported(name: &str, params: Vec<Param>, return_type: Type) -> FunctionDecl {
        FunctionDecl {
            exported: true,
            return_type,
            name: name.to_string(),
            params,
            body: Stmt {
                kind: StmtKind::Block(Vec::new()),
                span: Span::default(),
            },
            span: Span::default(),
        }
    }

    fn param(name: &str, ty: Type) -> Param {
        Param {
            name: name.to_string(),
            ty,
            span: Span::default(),
        }
    }

    #[test]
    fn pointer_and_integer_tags() {
        let func = exported(
            "entrypoint",
            vec![
                param("input", Type::Pointer(Box::new(Type::unsigned(8)))),
                param("input_len", Type::unsigned(64)),
            ],
            Type::Void,
        );
        let described = describe_function(&func).unwrap();
        assert_eq!(described.args[0].ty, "pointer<u8>");
        assert_eq!(described.args[1].ty, "u64");
        assert_eq!(described.returns, "void");
    }

    #[test]
    fn void_parameter_is_rejected() {
        let func = exported("bad", vec![param("nothing", Type::Void)], Type::Void);
        let err = describe_function(&func).unwrap_err();
        assert!(matches!(err, IdlError::UnsupportedType { .. }));
    }

    #[test]
    fn array_and_struct_tags() {
        let func = exported(
            "stateful",
            vec![
                param("buf", Type::Array(Box::new(Type::unsigned(8)), 32)),
                param("state", Type::Struct("Counter".to_string())),
            ],
            Type::unsigned(64),
        );
        let described = describe_function(&func).unwrap();
        assert_eq!(described.args[0].ty, "array<u8,32>");
        assert_eq!(described.args[1].ty, "struct<Counter>");
        assert_eq!(described.returns, "u64");
    }
}
