use crate::language::{ast::Expr, span::Span};
use std::{collections::HashMap, fmt};

/// A type as written in source.
#[derive(Clone, Debug)]
pub enum TypeExpr {
    /// `i32`, `Point`, `geo::Point`, `List[T]`, `Pair[i32]`.
    Named {
        path: Vec<String>,
        args: Vec<TypeAnnotation>,
    },
    /// `i32[0..=9]`: a bounded integer over a base integer type.
    Range {
        base: Box<TypeAnnotation>,
        min: Box<Expr>,
        max: Box<Expr>,
    },
    Unit,
    /// A type that has already been resolved; produced when generic declarations
    /// are cloned with their type parameters substituted.
    Resolved(Type),
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named {
            path: vec![name.into()],
            args: Vec::new(),
        }
    }

    pub fn substitute(&self, map: &HashMap<String, Type>) -> TypeExpr {
        match self {
            TypeExpr::Named { path, args } => {
                if path.len() == 1 && args.is_empty() {
                    if let Some(concrete) = map.get(&path[0]) {
                        return TypeExpr::Resolved(concrete.clone());
                    }
                }
                TypeExpr::Named {
                    path: path.clone(),
                    args: args.iter().map(|arg| arg.substitute(map)).collect(),
                }
            }
            TypeExpr::Range { base, min, max } => TypeExpr::Range {
                base: Box::new(base.substitute(map)),
                min: min.clone(),
                max: max.clone(),
            },
            TypeExpr::Unit => TypeExpr::Unit,
            TypeExpr::Resolved(ty) => TypeExpr::Resolved(ty.substitute(map)),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named { path, args } => {
                f.write_str(&path.join("::"))?;
                if !args.is_empty() {
                    let rendered: Vec<String> = args.iter().map(|arg| arg.ty.to_string()).collect();
                    write!(f, "[{}]", rendered.join(", "))?;
                }
                Ok(())
            }
            TypeExpr::Range { base, .. } => write!(f, "{}[..]", base.ty),
            TypeExpr::Unit => f.write_str("unit"),
            TypeExpr::Resolved(ty) => write!(f, "{ty}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TypeAnnotation {
    pub ty: TypeExpr,
    pub span: Span,
}

impl TypeAnnotation {
    pub fn substitute(&self, map: &HashMap<String, Type>) -> TypeAnnotation {
        TypeAnnotation {
            ty: self.ty.substitute(map),
            span: self.span,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutability {
    Immutable,
    Mutable,
}

impl Mutability {
    pub fn is_mutable(self) -> bool {
        matches!(self, Mutability::Mutable)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl IntKind {
    pub const ALL: [IntKind; 8] = [
        IntKind::I8,
        IntKind::I16,
        IntKind::I32,
        IntKind::I64,
        IntKind::U8,
        IntKind::U16,
        IntKind::U32,
        IntKind::U64,
    ];

    pub fn from_name(name: &str) -> Option<IntKind> {
        IntKind::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            IntKind::I8 => "i8",
            IntKind::I16 => "i16",
            IntKind::I32 => "i32",
            IntKind::I64 => "i64",
            IntKind::U8 => "u8",
            IntKind::U16 => "u16",
            IntKind::U32 => "u32",
            IntKind::U64 => "u64",
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            IntKind::I8 | IntKind::U8 => 8,
            IntKind::I16 | IntKind::U16 => 16,
            IntKind::I32 | IntKind::U32 => 32,
            IntKind::I64 | IntKind::U64 => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntKind::I8 | IntKind::I16 | IntKind::I32 | IntKind::I64)
    }

    pub fn min(self) -> i128 {
        if self.is_signed() {
            -(1i128 << (self.bits() - 1))
        } else {
            0
        }
    }

    pub fn max(self) -> i128 {
        if self.is_signed() {
            (1i128 << (self.bits() - 1)) - 1
        } else {
            (1i128 << self.bits()) - 1
        }
    }

    pub fn contains(self, value: i128) -> bool {
        value >= self.min() && value <= self.max()
    }
}

impl fmt::Display for IntKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `<package>::<module path>` of a source file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath {
    pub package: String,
    pub segments: Vec<String>,
}

impl ModulePath {
    pub fn new(package: impl Into<String>, segments: Vec<String>) -> Self {
        Self {
            package: package.into(),
            segments,
        }
    }

    pub fn root(package: impl Into<String>) -> Self {
        Self::new(package, Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn package_root(&self) -> ModulePath {
        ModulePath::root(self.package.clone())
    }

    pub fn child(&self, segment: impl Into<String>) -> ModulePath {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        ModulePath::new(self.package.clone(), segments)
    }

    pub fn qualify(&self, name: impl Into<String>) -> QualName {
        QualName {
            module: self.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.package)?;
        for segment in &self.segments {
            write!(f, "::{segment}")?;
        }
        Ok(())
    }
}

/// Globally unique name of a declaration: `<package>::<module path>::<identifier>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualName {
    pub module: ModulePath,
    pub name: String,
}

impl QualName {
    pub fn with_name(&self, name: impl Into<String>) -> QualName {
        self.module.qualify(name)
    }
}

impl fmt::Display for QualName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.name)
    }
}

/// A checked type.
#[derive(Clone, Debug)]
pub enum Type {
    /// An already reported error; never equal to anything.
    Poison,
    Unit,
    Bool,
    Int(IntKind),
    Str,
    /// Integer literal that has not met a constraint yet.
    UntypedInt,
    Struct(QualName),
    Enum(QualName),
    List(Box<Type>),
    Range {
        base: IntKind,
        min: i128,
        max: i128,
    },
    Param(String),
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Poison, _) | (_, Type::Poison) => false,
            (Type::Unit, Type::Unit)
            | (Type::Bool, Type::Bool)
            | (Type::Str, Type::Str)
            | (Type::UntypedInt, Type::UntypedInt) => true,
            (Type::Int(a), Type::Int(b)) => a == b,
            (Type::Struct(a), Type::Struct(b)) | (Type::Enum(a), Type::Enum(b)) => a == b,
            (Type::List(a), Type::List(b)) => a == b,
            (
                Type::Range {
                    base: base_a,
                    min: min_a,
                    max: max_a,
                },
                Type::Range {
                    base: base_b,
                    min: min_b,
                    max: max_b,
                },
            ) => base_a == base_b && min_a == min_b && max_a == max_b,
            (Type::Param(a), Type::Param(b)) => a == b,
            _ => false,
        }
    }
}

impl Type {
    pub fn is_poison(&self) -> bool {
        matches!(self, Type::Poison)
    }

    /// Integer kind this type computes with; range types decay to their base.
    pub fn int_kind(&self) -> Option<IntKind> {
        match self {
            Type::Int(kind) => Some(*kind),
            Type::Range { base, .. } => Some(*base),
            _ => None,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Range { .. } | Type::UntypedInt)
    }

    pub fn decay(&self) -> Type {
        match self {
            Type::Range { base, .. } => Type::Int(*base),
            other => other.clone(),
        }
    }

    pub fn contains_poison(&self) -> bool {
        match self {
            Type::Poison => true,
            Type::List(inner) => inner.contains_poison(),
            _ => false,
        }
    }

    pub fn contains_params(&self) -> bool {
        match self {
            Type::Param(_) => true,
            Type::List(inner) => inner.contains_params(),
            _ => false,
        }
    }

    pub fn substitute(&self, map: &HashMap<String, Type>) -> Type {
        match self {
            Type::Param(name) => map.get(name).cloned().unwrap_or_else(|| self.clone()),
            Type::List(inner) => Type::List(Box::new(inner.substitute(map))),
            other => other.clone(),
        }
    }

    /// Stable rendering used in instantiation keys; nominal types are fully
    /// qualified so equal keys always denote equal types.
    pub fn canonical(&self) -> String {
        match self {
            Type::Struct(name) | Type::Enum(name) => name.to_string(),
            Type::List(inner) => format!("List[{}]", inner.canonical()),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Poison => f.write_str("{error}"),
            Type::Unit => f.write_str("unit"),
            Type::Bool => f.write_str("bool"),
            Type::Int(kind) => write!(f, "{kind}"),
            Type::Str => f.write_str("string"),
            Type::UntypedInt => f.write_str("{integer}"),
            Type::Struct(name) | Type::Enum(name) => f.write_str(&name.name),
            Type::List(inner) => write!(f, "List[{inner}]"),
            Type::Range { base, min, max } => write!(f, "{base}[{min}..={max}]"),
            Type::Param(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poison_is_never_equal() {
        assert_ne!(Type::Poison, Type::Poison);
        assert_ne!(Type::Poison, Type::Int(IntKind::I32));
        assert_eq!(Type::Int(IntKind::I32), Type::Int(IntKind::I32));
    }

    #[test]
    fn integer_bounds_are_exact() {
        assert_eq!(IntKind::I8.min(), -128);
        assert_eq!(IntKind::I8.max(), 127);
        assert_eq!(IntKind::U64.max(), u64::MAX as i128);
        assert_eq!(IntKind::I64.min(), i64::MIN as i128);
        assert!(!IntKind::U32.contains(-1));
    }

    #[test]
    fn qualified_names_skip_root_module_segment() {
        let root = ModulePath::root("app");
        assert_eq!(root.qualify("main").to_string(), "app::main");
        assert_eq!(
            root.child("util").qualify("helper").to_string(),
            "app::util::helper"
        );
    }
}
