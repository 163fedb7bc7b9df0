//! Compiled, immutable form of one class.
//!
//! A `CompiledUnit` is what the registry stores per class: declared
//! variables, constants, functions, base list, and the linearised
//! hierarchy. Units are built at load time and replaced wholesale on
//! reload; the VM and introspection handler only read them.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{bytecode::Code, handlers::HandlerKind, intern::StringId};

/// Declared variable type, parsed from the lowercase type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    /// `intN` — stored wrapped to N bits (two's complement).
    Int { bits: u8 },
    /// `real` — double precision.
    Real,
    /// `txtN` — text bounded to N characters on store.
    Txt { cap: u32 },
    /// `ref` — object reference (or null).
    Ref,
    /// A handler field; the instance is built when the object is created.
    Handler(HandlerKind),
}

impl VarType {
    /// Parses a type name already validated by the parser.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name == "real" {
            return Some(Self::Real);
        }
        if name == "ref" {
            return Some(Self::Ref);
        }
        if let Ok(kind) = name.parse::<HandlerKind>() {
            return Some(Self::Handler(kind));
        }
        if let Some(rest) = name.strip_prefix("int") {
            if let Ok(bits) = rest.parse::<u8>() {
                if (1..=64).contains(&bits) {
                    return Some(Self::Int { bits });
                }
            }
            return None;
        }
        if let Some(rest) = name.strip_prefix("txt") {
            if let Ok(cap) = rest.parse::<u32>() {
                if cap >= 1 {
                    return Some(Self::Txt { cap });
                }
            }
        }
        None
    }

    /// True for `intN` and `real`.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int { .. } | Self::Real)
    }

    /// True for `txtN`.
    #[must_use]
    pub fn is_text(self) -> bool {
        matches!(self, Self::Txt { .. })
    }
}

/// A declared variable of a class (or a function local).
#[derive(Debug, Clone)]
pub struct CompiledVariable {
    pub name: StringId,
    /// The declared type name, lowercase, as written.
    pub type_name: Rc<str>,
    pub var_type: VarType,
    /// Array size; 0 means scalar.
    pub array: u32,
    pub common: bool,
    pub saved: bool,
    /// Initialiser thunk, evaluated with the new object as receiver.
    pub init: Option<Rc<Code>>,
    pub line: u32,
}

/// A class constant.
#[derive(Debug, Clone)]
pub enum CompiledConstant {
    Int(i64),
    Double(f64),
    Str(Rc<str>),
    /// Expression constant: re-evaluated on each access with the invoking
    /// object as receiver and the current arguments visible.
    Expr(Rc<Code>),
}

/// A compiled function.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: StringId,
    pub code: Rc<Code>,
    /// Line of the `func` header.
    pub line: u32,
}

/// The compiled form of one class.
///
/// `vars`, `consts`, and `funcs` preserve declaration order — the
/// introspection handler iterates them in source order.
#[derive(Debug)]
pub struct CompiledUnit {
    pub name: StringId,
    /// Original-case class name for display and introspection.
    pub display_name: Rc<str>,
    /// Direct bases in declaration order.
    pub bases: Vec<StringId>,
    /// Full linearisation: this class first, then ancestors depth-first in
    /// declaration order, duplicates suppressed (first occurrence wins).
    pub linear: Vec<StringId>,
    pub vars: IndexMap<StringId, CompiledVariable>,
    pub consts: IndexMap<StringId, CompiledConstant>,
    pub funcs: IndexMap<StringId, CompiledFunction>,
    /// Source file the class came from.
    pub file: Rc<str>,
    /// Line of the `classe` header.
    pub line: u32,
}

impl CompiledUnit {
    /// Looks up a declared variable, not walking the hierarchy.
    #[must_use]
    pub fn var(&self, name: StringId) -> Option<&CompiledVariable> {
        self.vars.get(&name)
    }

    /// Looks up a constant, not walking the hierarchy.
    #[must_use]
    pub fn constant(&self, name: StringId) -> Option<&CompiledConstant> {
        self.consts.get(&name)
    }

    /// Looks up a function, not walking the hierarchy.
    #[must_use]
    pub fn func(&self, name: StringId) -> Option<&CompiledFunction> {
        self.funcs.get(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_type_parsing() {
        assert_eq!(VarType::parse("int32"), Some(VarType::Int { bits: 32 }));
        assert_eq!(VarType::parse("int1"), Some(VarType::Int { bits: 1 }));
        assert_eq!(VarType::parse("real"), Some(VarType::Real));
        assert_eq!(VarType::parse("txt80"), Some(VarType::Txt { cap: 80 }));
        assert_eq!(VarType::parse("inttempo"), Some(VarType::Handler(HandlerKind::IntTempo)));
        assert_eq!(VarType::parse("listaobj"), Some(VarType::Handler(HandlerKind::ListaObj)));
        assert_eq!(VarType::parse("int0"), None);
        assert_eq!(VarType::parse("int99"), None);
        assert_eq!(VarType::parse("bool"), None);
    }
}
