//! Object-oriented intermediate representation for the classflow analysis.
//!
//! The IR models a statically typed class-based language after lowering:
//! modules own classes, functions and fields; function bodies are expression
//! arenas addressed by [`expression::ExprId`]. The [`vtable::VtableBuilder`]
//! computes per-class dispatch tables from the declared hierarchy.

pub mod expression;
pub mod module;
pub mod string_interner;
pub mod vtable;

pub use expression::{
    Body, ExprId, ExprKind, IrExpr, LocalId, ReturnTarget, TypeOperator, ValueId,
};
pub use module::{
    BuiltinKind, Builtins, ClassId, FieldId, FunId, FunctionKind, IrClass, IrField, IrFunction,
    IrLocal, IrProgram, ModuleKind,
};
pub use string_interner::{StringId, StringInterner};
pub use vtable::{method_hash, VtableBuilder, VtableError, VtableSlot};
