//! Function bodies as expression arenas.
//!
//! A [`Body`] owns a flat vector of [`IrExpr`] nodes; expressions reference
//! each other through [`ExprId`] indices, never through boxes. Every
//! expression carries its static type as a [`ClassId`].

use crate::module::{ClassId, FieldId, FunId};
use crate::string_interner::StringId;

/// Index of an expression inside its owning [`Body`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a local variable slot in the enclosing function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

impl LocalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A readable value slot: a function parameter or a local variable.
///
/// Parameter indices count the dispatch receiver first (slot 0 for instance
/// members), then the value parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueId {
    Parameter(u32),
    Local(LocalId),
}

/// Where a `Return` delivers its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnTarget {
    /// The enclosing function.
    Function,
    /// A `ReturnableBlock` expression, identified by its arena id.
    Block(ExprId),
}

/// Type operator of a `TypeOperator` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOperator {
    Cast,
    ImplicitCast,
    SafeCast,
    InstanceOf,
    NotInstanceOf,
}

impl TypeOperator {
    /// Cast operators pass their argument through narrowed; the rest produce
    /// a fresh value of the operator's declared type.
    pub fn is_cast(self) -> bool {
        matches!(
            self,
            TypeOperator::Cast | TypeOperator::ImplicitCast | TypeOperator::SafeCast
        )
    }
}

#[derive(Debug)]
pub struct IrExpr {
    pub kind: ExprKind,
    /// Static type of the expression.
    pub ty: ClassId,
}

#[derive(Debug)]
pub enum ExprKind {
    /// Sequence of statements; the value is the last one's.
    Block { statements: Vec<ExprId> },
    If {
        condition: ExprId,
        then_branch: ExprId,
        else_branch: Option<ExprId>,
    },
    Try { body: ExprId, catches: Vec<ExprId> },
    /// Block exited through `Return { target: Block(..) }` expressions.
    ReturnableBlock { body: ExprId },
    /// Lowered coroutine region; its value is the union of the suspension
    /// points registered inside it.
    SuspendableExpression { body: ExprId },
    SuspensionPoint { result: ExprId },
    Return {
        target: ReturnTarget,
        value: Option<ExprId>,
    },
    While { condition: ExprId, body: ExprId },
    Break,
    Continue,

    GetValue { value: ValueId },
    /// Assignment to a local; `Unit`-typed.
    SetValue { local: LocalId, value: ExprId },
    DeclareLocal {
        local: LocalId,
        initializer: Option<ExprId>,
    },

    /// Literal; only the static type matters to the analysis.
    Const,
    Vararg { elements: Vec<ExprId> },
    FunctionReference { function: FunId },
    /// Read of an object-declaration singleton.
    GetSingleton { class: ClassId },
    /// The well-known `getContinuation` intrinsic.
    GetContinuation,

    Call {
        callee: FunId,
        receiver: Option<ExprId>,
        arguments: Vec<ExprId>,
        /// Present on `super.f()` calls: dispatch is resolved statically in
        /// this class's scope.
        super_qualifier: Option<ClassId>,
    },
    ConstructorCall { ctor: FunId, arguments: Vec<ExprId> },
    DelegatingConstructorCall { ctor: FunId, arguments: Vec<ExprId> },

    GetField {
        receiver: Option<ExprId>,
        field: FieldId,
    },
    SetField {
        receiver: Option<ExprId>,
        field: FieldId,
        value: ExprId,
    },

    TypeOperator {
        operator: TypeOperator,
        operand: ClassId,
        argument: ExprId,
    },

    /// Result of the devirtualizing rewrite: a direct, index-based call into
    /// another module's private function table.
    DirectPrivateCall {
        module: StringId,
        virtual_function_count: u32,
        index: u32,
        receiver: ExprId,
        arguments: Vec<ExprId>,
    },
}

/// An expression arena with a designated root.
#[derive(Debug, Default)]
pub struct Body {
    pub exprs: Vec<IrExpr>,
    pub root: ExprId,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ExprKind, ty: ClassId) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(IrExpr { kind, ty });
        id
    }

    pub fn expr(&self, id: ExprId) -> &IrExpr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut IrExpr {
        &mut self.exprs[id.index()]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.exprs[id.index()].kind
    }

    pub fn ty(&self, id: ExprId) -> ClassId {
        self.exprs[id.index()].ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_push_assigns_sequential_ids() {
        let ty = ClassId(0);
        let mut body = Body::new();
        let a = body.push(ExprKind::Const, ty);
        let b = body.push(ExprKind::Const, ty);
        assert_eq!(a, ExprId(0));
        assert_eq!(b, ExprId(1));
        assert_eq!(body.exprs.len(), 2);
    }

    #[test]
    fn test_cast_classification() {
        assert!(TypeOperator::Cast.is_cast());
        assert!(TypeOperator::ImplicitCast.is_cast());
        assert!(TypeOperator::SafeCast.is_cast());
        assert!(!TypeOperator::InstanceOf.is_cast());
        assert!(!TypeOperator::NotInstanceOf.is_cast());
    }
}
