//! Module-level declarations: classes, functions and fields.
//!
//! An [`IrProgram`] is one compilation unit. Classes declared in other,
//! already-compiled modules appear as `is_external` stubs; their full shape is
//! recovered from that module's summary at link time. Classes the producer
//! cannot describe at all (forward declarations, foreign-interop wrappers) are
//! flagged `is_opaque` and collapse to the analysis' virtual sentinel.

use crate::expression::Body;
use crate::string_interner::{StringId, StringInterner};

/// Index of a class declaration in [`IrProgram::classes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Index of a function declaration in [`IrProgram::functions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunId(pub u32);

/// Index of a field declaration in [`IrProgram::fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FunId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FieldId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What kind of compilation unit this is. Programs have a designated entry
/// point; libraries expose their exported functions instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Program { main: FunId },
    Library,
}

/// Classes every program can rely on. `Unit` and `Nothing` back the synthetic
/// singletons the value extractor emits for statement-typed expressions;
/// `string` is always considered instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Unit,
    Nothing,
    String,
}

#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    pub unit: ClassId,
    pub nothing: ClassId,
    pub string: ClassId,
}

#[derive(Debug)]
pub struct IrClass {
    pub name: StringId,
    pub is_interface: bool,
    pub is_final: bool,
    pub is_abstract: bool,
    pub is_exported: bool,
    /// Declared in another module; shape recovered from its summary.
    pub is_external: bool,
    /// Forward-declared or foreign-interop; no usable identity.
    pub is_opaque: bool,
    /// Immediate supertypes, classes and interfaces alike.
    pub supers: Vec<ClassId>,
    /// Member functions in declaration order, fake overrides included.
    pub methods: Vec<FunId>,
    pub fields: Vec<FieldId>,
    pub builtin: Option<BuiltinKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Regular,
    Constructor,
}

/// A local variable slot of a function body.
#[derive(Debug)]
pub struct IrLocal {
    pub name: StringId,
}

#[derive(Debug)]
pub struct IrFunction {
    pub name: StringId,
    pub kind: FunctionKind,
    /// Dispatch class for member functions and constructors.
    pub owner: Option<ClassId>,
    /// Instance member: the dispatch receiver occupies parameter slot 0.
    pub has_receiver: bool,
    pub value_parameters: Vec<ClassId>,
    pub return_type: ClassId,
    pub is_suspend: bool,
    pub is_exported: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_external: bool,
    /// Inherited member materialized in a subclass without a new body.
    pub is_fake_override: bool,
    /// Open to virtual dispatch (open, override, or interface member).
    pub is_overridable: bool,
    /// Lowered inline-class constructor; its non-unit non-local returns are
    /// ignored by the element finder.
    pub is_inline_constructor: bool,
    /// Immediately overridden functions; empty for root declarations.
    pub overrides: Vec<FunId>,
    pub locals: Vec<IrLocal>,
    pub body: Option<Body>,
}

impl IrFunction {
    /// Number of dataflow parameters: the dispatch receiver (if any) followed
    /// by the value parameters. A suspend function's continuation slot sits
    /// after these and is not counted here.
    pub fn parameter_count(&self) -> u32 {
        self.value_parameters.len() as u32 + u32::from(self.has_receiver)
    }
}

#[derive(Debug)]
pub struct IrField {
    pub name: StringId,
    pub owner: Option<ClassId>,
    pub ty: ClassId,
    pub is_static: bool,
    pub initializer: Option<Body>,
}

/// One compilation unit: a module plus the external stubs it references.
#[derive(Debug)]
pub struct IrProgram {
    pub name: String,
    pub kind: ModuleKind,
    pub interner: StringInterner,
    pub classes: Vec<IrClass>,
    pub functions: Vec<IrFunction>,
    pub fields: Vec<IrField>,
    pub builtins: Builtins,
}

impl IrProgram {
    /// Create an empty module and declare the builtin classes in it.
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        let mut interner = StringInterner::new();
        let mut classes = Vec::new();
        let mut declare = |interner: &mut StringInterner,
                           classes: &mut Vec<IrClass>,
                           name: &str,
                           builtin: BuiltinKind| {
            let id = ClassId(classes.len() as u32);
            classes.push(IrClass {
                name: interner.intern(name),
                is_interface: false,
                is_final: true,
                is_abstract: false,
                is_exported: true,
                is_external: false,
                is_opaque: false,
                supers: Vec::new(),
                methods: Vec::new(),
                fields: Vec::new(),
                builtin: Some(builtin),
            });
            id
        };
        let unit = declare(&mut interner, &mut classes, "Unit", BuiltinKind::Unit);
        let nothing = declare(&mut interner, &mut classes, "Nothing", BuiltinKind::Nothing);
        let string = declare(&mut interner, &mut classes, "String", BuiltinKind::String);

        Self {
            name: name.into(),
            kind,
            interner,
            classes,
            functions: Vec::new(),
            fields: Vec::new(),
            builtins: Builtins {
                unit,
                nothing,
                string,
            },
        }
    }

    pub fn class(&self, id: ClassId) -> &IrClass {
        &self.classes[id.index()]
    }

    pub fn function(&self, id: FunId) -> &IrFunction {
        &self.functions[id.index()]
    }

    pub fn field(&self, id: FieldId) -> &IrField {
        &self.fields[id.index()]
    }

    pub fn add_class(&mut self, class: IrClass) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(class);
        id
    }

    pub fn add_function(&mut self, function: IrFunction) -> FunId {
        let id = FunId(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    pub fn add_field(&mut self, field: IrField) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(field);
        id
    }

    pub fn class_name(&self, id: ClassId) -> &str {
        self.interner.resolve(self.class(id).name)
    }

    pub fn function_name(&self, id: FunId) -> &str {
        self.interner.resolve(self.function(id).name)
    }

    pub fn field_name(&self, id: FieldId) -> &str {
        self.interner.resolve(self.field(id).name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_declared_up_front() {
        let program = IrProgram::new("app", ModuleKind::Library);
        assert_eq!(program.class_name(program.builtins.unit), "Unit");
        assert_eq!(program.class_name(program.builtins.nothing), "Nothing");
        assert_eq!(program.class_name(program.builtins.string), "String");
        assert!(program.class(program.builtins.string).is_final);
    }

    #[test]
    fn test_parameter_count_includes_receiver() {
        let mut program = IrProgram::new("app", ModuleKind::Library);
        let owner = program.builtins.string;
        let name = program.interner.intern("length");
        let f = IrFunction {
            name,
            kind: FunctionKind::Regular,
            owner: Some(owner),
            has_receiver: true,
            value_parameters: vec![program.builtins.unit],
            return_type: program.builtins.string,
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
        let id = program.add_function(f);
        assert_eq!(program.function(id).parameter_count(), 2);
    }
}
