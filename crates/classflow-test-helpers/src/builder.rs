//! Fluent construction of IR programs and bodies.

use classflow_ir::{
    Body, ClassId, ExprId, ExprKind, FieldId, FunId, FunctionKind, IrClass, IrField, IrFunction,
    IrLocal, IrProgram, LocalId, ModuleKind, ReturnTarget, TypeOperator, ValueId,
};

/// Wraps an [`IrProgram`] with declaration shortcuts. Every class starts
/// open and unexported; adjust flags through the `classes` vector when a
/// test needs something unusual.
pub struct ProgramBuilder {
    pub program: IrProgram,
}

impl ProgramBuilder {
    pub fn library(name: &str) -> Self {
        Self {
            program: IrProgram::new(name, ModuleKind::Library),
        }
    }

    /// Turn the module into a program rooted at `main`.
    pub fn set_main(&mut self, main: FunId) {
        self.program.kind = ModuleKind::Program { main };
    }

    pub fn class(&mut self, name: &str, supers: Vec<ClassId>) -> ClassId {
        self.declare_class(name, supers, |_| {})
    }

    pub fn exported_class(&mut self, name: &str, supers: Vec<ClassId>) -> ClassId {
        self.declare_class(name, supers, |c| c.is_exported = true)
    }

    pub fn final_class(&mut self, name: &str, supers: Vec<ClassId>) -> ClassId {
        self.declare_class(name, supers, |c| c.is_final = true)
    }

    pub fn abstract_class(&mut self, name: &str, supers: Vec<ClassId>) -> ClassId {
        self.declare_class(name, supers, |c| c.is_abstract = true)
    }

    pub fn interface(&mut self, name: &str, supers: Vec<ClassId>) -> ClassId {
        self.declare_class(name, supers, |c| {
            c.is_interface = true;
            c.is_abstract = true;
        })
    }

    pub fn external_class(&mut self, name: &str) -> ClassId {
        self.declare_class(name, Vec::new(), |c| c.is_external = true)
    }

    pub fn opaque_class(&mut self, name: &str) -> ClassId {
        self.declare_class(name, Vec::new(), |c| c.is_opaque = true)
    }

    fn declare_class(
        &mut self,
        name: &str,
        supers: Vec<ClassId>,
        adjust: impl FnOnce(&mut IrClass),
    ) -> ClassId {
        let name = self.program.interner.intern(name);
        let mut class = IrClass {
            name,
            is_interface: false,
            is_final: false,
            is_abstract: false,
            is_exported: false,
            is_external: false,
            is_opaque: false,
            supers,
            methods: Vec::new(),
            fields: Vec::new(),
            builtin: None,
        };
        adjust(&mut class);
        self.program.add_class(class)
    }

    /// Overridable instance method; `overrides` links it into vtable slots.
    pub fn method(
        &mut self,
        class: ClassId,
        name: &str,
        return_type: ClassId,
        overrides: Vec<FunId>,
    ) -> FunId {
        let f = self.declare_function(name, Some(class), Vec::new(), return_type, |f| {
            f.is_overridable = true;
        });
        self.program.functions[f.index()].overrides = overrides;
        self.program.classes[class.index()].methods.push(f);
        f
    }

    /// Abstract interface/class member.
    pub fn abstract_method(
        &mut self,
        class: ClassId,
        name: &str,
        return_type: ClassId,
        overrides: Vec<FunId>,
    ) -> FunId {
        let f = self.declare_function(name, Some(class), Vec::new(), return_type, |f| {
            f.is_overridable = true;
            f.is_abstract = true;
        });
        self.program.functions[f.index()].overrides = overrides;
        self.program.classes[class.index()].methods.push(f);
        f
    }

    /// Stub for a method declared in another module.
    pub fn external_method(&mut self, class: ClassId, name: &str, return_type: ClassId) -> FunId {
        let f = self.declare_function(name, Some(class), Vec::new(), return_type, |f| {
            f.is_external = true;
            f.is_overridable = true;
        });
        self.program.classes[class.index()].methods.push(f);
        f
    }

    /// Stub for a top-level function declared in another module.
    pub fn external_function(
        &mut self,
        name: &str,
        value_parameters: Vec<ClassId>,
        return_type: ClassId,
    ) -> FunId {
        self.declare_function(name, None, value_parameters, return_type, |f| {
            f.is_external = true;
        })
    }

    pub fn constructor(&mut self, class: ClassId) -> FunId {
        let unit = self.program.builtins.unit;
        self.declare_function("<init>", Some(class), Vec::new(), unit, |f| {
            f.kind = FunctionKind::Constructor;
        })
    }

    /// Top-level function.
    pub fn function(
        &mut self,
        name: &str,
        value_parameters: Vec<ClassId>,
        return_type: ClassId,
    ) -> FunId {
        self.declare_function(name, None, value_parameters, return_type, |_| {})
    }

    pub fn exported_function(
        &mut self,
        name: &str,
        value_parameters: Vec<ClassId>,
        return_type: ClassId,
    ) -> FunId {
        self.declare_function(name, None, value_parameters, return_type, |f| {
            f.is_exported = true;
        })
    }

    fn declare_function(
        &mut self,
        name: &str,
        owner: Option<ClassId>,
        value_parameters: Vec<ClassId>,
        return_type: ClassId,
        adjust: impl FnOnce(&mut IrFunction),
    ) -> FunId {
        let name = self.program.interner.intern(name);
        let mut function = IrFunction {
            name,
            kind: FunctionKind::Regular,
            owner,
            has_receiver: owner.is_some(),
            value_parameters,
            return_type,
            is_suspend: false,
            is_exported: false,
            is_abstract: false,
            is_final: false,
            is_external: false,
            is_fake_override: false,
            is_overridable: false,
            is_inline_constructor: false,
            overrides: Vec::new(),
            locals: Vec::new(),
            body: None,
        };
        adjust(&mut function);
        self.program.add_function(function)
    }

    /// Static (top-level) field.
    pub fn field(&mut self, name: &str, ty: ClassId) -> FieldId {
        let name = self.program.interner.intern(name);
        self.program.add_field(IrField {
            name,
            owner: None,
            ty,
            is_static: true,
            initializer: None,
        })
    }

    pub fn member_field(&mut self, owner: ClassId, name: &str, ty: ClassId) -> FieldId {
        let name = self.program.interner.intern(name);
        let f = self.program.add_field(IrField {
            name,
            owner: Some(owner),
            ty,
            is_static: false,
            initializer: None,
        });
        self.program.classes[owner.index()].fields.push(f);
        f
    }

    /// Allocate a local slot on `function` and return its id.
    pub fn local(&mut self, function: FunId, name: &str) -> LocalId {
        let name = self.program.interner.intern(name);
        let locals = &mut self.program.functions[function.index()].locals;
        let id = LocalId(locals.len() as u32);
        locals.push(IrLocal { name });
        id
    }

    pub fn set_body(&mut self, function: FunId, body: Body) {
        self.program.functions[function.index()].body = Some(body);
    }

    pub fn set_initializer(&mut self, field: FieldId, body: Body) {
        self.program.fields[field.index()].initializer = Some(body);
    }

    pub fn finish(self) -> IrProgram {
        self.program
    }
}

/// Expression-arena construction with the builtin types at hand.
pub struct BodyBuilder {
    pub body: Body,
    unit: ClassId,
    nothing: ClassId,
}

impl BodyBuilder {
    pub fn new(program: &IrProgram) -> Self {
        Self {
            body: Body::new(),
            unit: program.builtins.unit,
            nothing: program.builtins.nothing,
        }
    }

    pub fn push(&mut self, kind: ExprKind, ty: ClassId) -> ExprId {
        self.body.push(kind, ty)
    }

    pub fn const_of(&mut self, ty: ClassId) -> ExprId {
        self.push(ExprKind::Const, ty)
    }

    pub fn get_param(&mut self, index: u32, ty: ClassId) -> ExprId {
        self.push(
            ExprKind::GetValue {
                value: ValueId::Parameter(index),
            },
            ty,
        )
    }

    pub fn get_local(&mut self, local: LocalId, ty: ClassId) -> ExprId {
        self.push(
            ExprKind::GetValue {
                value: ValueId::Local(local),
            },
            ty,
        )
    }

    pub fn declare_local(&mut self, local: LocalId, initializer: ExprId) -> ExprId {
        self.push(
            ExprKind::DeclareLocal {
                local,
                initializer: Some(initializer),
            },
            self.unit,
        )
    }

    pub fn set_local(&mut self, local: LocalId, value: ExprId) -> ExprId {
        self.push(ExprKind::SetValue { local, value }, self.unit)
    }

    pub fn new_object(&mut self, ctor: FunId, arguments: Vec<ExprId>, class: ClassId) -> ExprId {
        self.push(ExprKind::ConstructorCall { ctor, arguments }, class)
    }

    pub fn call(
        &mut self,
        callee: FunId,
        receiver: Option<ExprId>,
        arguments: Vec<ExprId>,
        return_type: ClassId,
    ) -> ExprId {
        self.push(
            ExprKind::Call {
                callee,
                receiver,
                arguments,
                super_qualifier: None,
            },
            return_type,
        )
    }

    pub fn get_field(&mut self, receiver: Option<ExprId>, field: FieldId, ty: ClassId) -> ExprId {
        self.push(ExprKind::GetField { receiver, field }, ty)
    }

    pub fn set_field(&mut self, receiver: Option<ExprId>, field: FieldId, value: ExprId) -> ExprId {
        self.push(
            ExprKind::SetField {
                receiver,
                field,
                value,
            },
            self.unit,
        )
    }

    pub fn cast(&mut self, argument: ExprId, to: ClassId) -> ExprId {
        self.push(
            ExprKind::TypeOperator {
                operator: TypeOperator::Cast,
                operand: to,
                argument,
            },
            to,
        )
    }

    pub fn if_else(
        &mut self,
        condition: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
        ty: ClassId,
    ) -> ExprId {
        self.push(
            ExprKind::If {
                condition,
                then_branch,
                else_branch: Some(else_branch),
            },
            ty,
        )
    }

    pub fn ret(&mut self, value: ExprId) -> ExprId {
        self.push(
            ExprKind::Return {
                target: ReturnTarget::Function,
                value: Some(value),
            },
            self.nothing,
        )
    }

    pub fn block(&mut self, statements: Vec<ExprId>, ty: ClassId) -> ExprId {
        self.push(ExprKind::Block { statements }, ty)
    }

    /// Seal the arena with `root` as the body's top expression.
    pub fn finish(mut self, root: ExprId) -> Body {
        self.body.root = root;
        self.body
    }

    /// Convenience: a body whose root is a block of `statements`.
    pub fn finish_block(mut self, statements: Vec<ExprId>) -> Body {
        let root = self.body.push(ExprKind::Block { statements }, self.unit);
        self.body.root = root;
        self.body
    }
}
