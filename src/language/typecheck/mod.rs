//! Name resolution, constant evaluation, monomorphization and type checking.
//!
//! The output, [`CheckedProgram`], is the hand-off to lowering: concrete
//! functions, signature tables, evaluated constants and the per-node
//! [`Resolutions`] maps.

mod calls;
mod checker;
mod consts;
mod generics;
mod patterns;
#[cfg(test)]
mod tests;

pub use checker::check_program;
pub use consts::ConstValue;
pub use generics::MAX_INSTANTIATION_DEPTH;

use crate::language::{
    ast::{FunctionDef, NodeId, Visibility},
    prelude::Builtin,
    span::Span,
    types::{ModulePath, Mutability, QualName, Type},
};
use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

#[derive(Clone, Debug)]
pub struct ParamSig {
    pub name: String,
    pub ty: Type,
    pub mutability: Mutability,
}

#[derive(Clone, Debug)]
pub struct FunctionSig {
    pub name: QualName,
    pub params: Vec<ParamSig>,
    pub ret: Type,
    pub owner: ModulePath,
    pub visibility: Visibility,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FieldSig {
    pub name: String,
    pub ty: Type,
    pub visibility: Visibility,
}

#[derive(Clone, Debug)]
pub struct StructSig {
    pub name: QualName,
    pub fields: Vec<FieldSig>,
    pub owner: ModulePath,
    pub visibility: Visibility,
    /// Generic declaration this struct was instantiated from.
    pub generic_base: Option<QualName>,
    pub type_args: Vec<Type>,
}

impl StructSig {
    pub fn field(&self, name: &str) -> Option<(usize, &FieldSig)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct VariantSig {
    pub name: String,
    pub payload: Option<Type>,
}

#[derive(Clone, Debug)]
pub struct EnumSig {
    pub name: QualName,
    pub variants: Vec<VariantSig>,
    pub index: HashMap<String, usize>,
    pub owner: ModulePath,
    pub visibility: Visibility,
    pub generic_base: Option<QualName>,
    pub type_args: Vec<Type>,
}

impl EnumSig {
    pub fn variant(&self, name: &str) -> Option<(usize, &VariantSig)> {
        let index = *self.index.get(name)?;
        self.variants.get(index).map(|variant| (index, variant))
    }
}

/// Produced once by the checker; only monomorphization appends afterwards.
#[derive(Clone, Debug, Default)]
pub struct SignatureTables {
    pub functions: BTreeMap<QualName, FunctionSig>,
    pub structs: BTreeMap<QualName, StructSig>,
    pub enums: BTreeMap<QualName, EnumSig>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    Function(QualName),
    Builtin(Builtin),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantRef {
    pub enum_name: QualName,
    pub index: usize,
}

/// Methods available on local `List` and `string` bindings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intrinsic {
    ListPush,
    ListLen,
    ListGet,
    ListSet,
    StrLen,
    StrConcat,
    StrByteAt,
}

impl Intrinsic {
    pub fn mutates_receiver(self) -> bool {
        matches!(self, Intrinsic::ListPush | Intrinsic::ListSet)
    }
}

/// Everything the checker decided about individual nodes, keyed by node id.
#[derive(Clone, Debug, Default)]
pub struct Resolutions {
    pub expr_types: HashMap<NodeId, Type>,
    pub let_types: HashMap<NodeId, Type>,
    /// Call expressions that invoke a function or builtin.
    pub calls: HashMap<NodeId, CallTarget>,
    /// Variant construction sites (call or member expressions) and variant patterns.
    pub variants: HashMap<NodeId, VariantRef>,
    pub intrinsics: HashMap<NodeId, Intrinsic>,
    pub const_refs: HashMap<NodeId, QualName>,
    pub struct_literals: HashMap<NodeId, QualName>,
}

impl Resolutions {
    pub fn type_of(&self, id: NodeId) -> Option<&Type> {
        self.expr_types.get(&id)
    }
}

#[derive(Clone, Debug)]
pub struct CheckedConst {
    pub name: QualName,
    pub ty: Type,
    pub value: ConstValue,
}

#[derive(Clone, Debug)]
pub struct CheckedFunction {
    pub name: QualName,
    pub module: ModulePath,
    pub file: PathBuf,
    /// The declaration as checked; instantiations hold the substituted clone.
    pub def: FunctionDef,
}

#[derive(Clone, Debug, Default)]
pub struct CheckedProgram {
    pub functions: BTreeMap<QualName, CheckedFunction>,
    pub signatures: SignatureTables,
    pub consts: BTreeMap<QualName, CheckedConst>,
    pub resolutions: Resolutions,
}
