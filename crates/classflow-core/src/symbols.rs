//! Symbol table: stable identities for classes, functions and fields.
//!
//! Every class the analysis touches becomes a [`TypeRef`] into one arena;
//! every function a [`FunRef`]. Declared entities carry their hierarchy and
//! dispatch tables; external references are interned by name and resolved to
//! the owning library's declared entity when that library's summary is
//! loaded first. Opaque classes collapse to the single `Virtual` sentinel at
//! index 0.

use std::cell::RefCell;

use classflow_ir::{
    BuiltinKind, ClassId, FieldId, FunId, FunctionKind, IrProgram, VtableBuilder,
};
use rustc_hash::FxHashMap;

use crate::errors::{AnalysisError, Result};

/// Identity of a class in the analysis. Equality is arena-index equality;
/// the interning discipline guarantees one entry per semantic identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(pub(crate) u32);

/// Identity of a function in the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunRef(pub(crate) u32);

/// Identity of a field, keyed by `(receiver type, name)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef(pub(crate) u32);

/// Index of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) u32);

impl TypeRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FunRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FieldRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Top of an unknown hierarchy; receivers of this type never devirtualize.
    Virtual,
    External { name: String },
    Public { name: String },
    Private { name: String, index: u32 },
}

impl TypeKind {
    pub fn is_declared(&self) -> bool {
        matches!(self, TypeKind::Public { .. } | TypeKind::Private { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            TypeKind::Virtual => "<virtual>",
            TypeKind::External { name }
            | TypeKind::Public { name }
            | TypeKind::Private { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub kind: TypeKind,
    pub is_final: bool,
    pub is_abstract: bool,
    pub supers: Vec<TypeRef>,
    /// Ordered dispatch table; empty for interfaces and externals.
    pub vtable: Vec<FunRef>,
    /// Interface table, sorted by method hash; empty unless concrete.
    pub itable: Vec<(u64, FunRef)>,
    pub module: Option<ModuleId>,
    pub builtin: Option<BuiltinKind>,
}

impl TypeEntry {
    pub fn itable_lookup(&self, hash: u64) -> Option<FunRef> {
        self.itable
            .binary_search_by_key(&hash, |&(h, _)| h)
            .ok()
            .map(|i| self.itable[i].1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunKind {
    External {
        name: String,
    },
    Public {
        name: String,
        /// Slot in the owning module's virtual function table; `-1` when the
        /// function cannot be called virtually from another module.
        symbol_index: i32,
    },
    Private {
        name: String,
        index: u32,
        symbol_index: i32,
    },
}

impl FunKind {
    pub fn is_declared(&self) -> bool {
        matches!(self, FunKind::Public { .. } | FunKind::Private { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            FunKind::External { name }
            | FunKind::Public { name, .. }
            | FunKind::Private { name, .. } => name,
        }
    }

    pub fn symbol_index(&self) -> i32 {
        match self {
            FunKind::External { .. } => -1,
            FunKind::Public { symbol_index, .. } | FunKind::Private { symbol_index, .. } => {
                *symbol_index
            }
        }
    }
}

/// The signature part of a [`FunctionEntry`], before an identity is assigned.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub parameter_types: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub is_suspend: bool,
    pub is_exported: bool,
    pub is_abstract: bool,
    pub is_fake_override: bool,
    /// Synthetic identity of a field initializer body; always linked into the
    /// constraint graph since initializers run at program start.
    pub is_field_initializer: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub kind: FunKind,
    pub module: Option<ModuleId>,
    /// Receiver first (instance members), then value parameters. The
    /// continuation slot of suspend functions is not listed.
    pub parameter_types: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub is_suspend: bool,
    pub is_exported: bool,
    pub is_abstract: bool,
    pub is_fake_override: bool,
    pub is_field_initializer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    /// Informational; the `(receiver, name)` pair is the identity.
    pub receiver: Option<TypeRef>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ModuleEntry {
    pub name: String,
    pub virtual_function_count: u32,
}

/// IR-to-symbol mapping for the module under analysis, plus the creation
/// order its summary serializes in.
#[derive(Debug, Default)]
pub struct ModuleSymbols {
    pub module: ModuleId,
    class_map: FxHashMap<ClassId, TypeRef>,
    function_map: FxHashMap<FunId, FunRef>,
    field_map: FxHashMap<FieldId, FieldRef>,
    /// Synthetic function identities for field initializers, in field order.
    pub initializer_functions: Vec<(FieldId, FunRef)>,
    pub types_in_order: Vec<TypeRef>,
    pub functions_in_order: Vec<FunRef>,
    pub fields_in_order: Vec<FieldRef>,
}

impl Default for ModuleId {
    fn default() -> Self {
        ModuleId(0)
    }
}

impl ModuleSymbols {
    pub fn type_of(&self, class: ClassId) -> TypeRef {
        self.class_map[&class]
    }

    pub fn function_of(&self, function: FunId) -> FunRef {
        self.function_map[&function]
    }

    pub fn field_of(&self, field: FieldId) -> FieldRef {
        self.field_map[&field]
    }

    pub fn initializer_of(&self, field: FieldId) -> Option<FunRef> {
        self.initializer_functions
            .iter()
            .find(|&&(f, _)| f == field)
            .map(|&(_, r)| r)
    }
}

pub struct SymbolTable {
    types: Vec<TypeEntry>,
    functions: Vec<FunctionEntry>,
    fields: Vec<FieldEntry>,
    modules: Vec<ModuleEntry>,
    public_types: FxHashMap<String, TypeRef>,
    public_functions: FxHashMap<String, FunRef>,
    external_types: FxHashMap<String, TypeRef>,
    external_functions: FxHashMap<String, FunRef>,
    field_keys: FxHashMap<(Option<TypeRef>, String), FieldRef>,
    next_private_type: u32,
    next_private_function: u32,
    unit_type: Option<TypeRef>,
    nothing_type: Option<TypeRef>,
    string_type: Option<TypeRef>,
    subtype_cache: RefCell<FxHashMap<(TypeRef, TypeRef), bool>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let virtual_entry = TypeEntry {
            kind: TypeKind::Virtual,
            is_final: false,
            is_abstract: false,
            supers: Vec::new(),
            vtable: Vec::new(),
            itable: Vec::new(),
            module: None,
            builtin: None,
        };
        Self {
            types: vec![virtual_entry],
            functions: Vec::new(),
            fields: Vec::new(),
            modules: Vec::new(),
            public_types: FxHashMap::default(),
            public_functions: FxHashMap::default(),
            external_types: FxHashMap::default(),
            external_functions: FxHashMap::default(),
            field_keys: FxHashMap::default(),
            next_private_type: 0,
            next_private_function: 0,
            unit_type: None,
            nothing_type: None,
            string_type: None,
            subtype_cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// The shared sentinel for opaque receivers.
    pub fn virtual_type(&self) -> TypeRef {
        TypeRef(0)
    }

    pub fn type_entry(&self, t: TypeRef) -> &TypeEntry {
        &self.types[t.index()]
    }

    pub fn function_entry(&self, f: FunRef) -> &FunctionEntry {
        &self.functions[f.index()]
    }

    pub fn field_entry(&self, f: FieldRef) -> &FieldEntry {
        &self.fields[f.index()]
    }

    pub fn module_entry(&self, m: ModuleId) -> &ModuleEntry {
        &self.modules[m.0 as usize]
    }

    pub fn type_name(&self, t: TypeRef) -> &str {
        self.types[t.index()].kind.name()
    }

    pub fn function_name(&self, f: FunRef) -> &str {
        self.functions[f.index()].kind.name()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// All function entries in identity order.
    pub fn functions(&self) -> impl Iterator<Item = (FunRef, &FunctionEntry)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, entry)| (FunRef(i as u32), entry))
    }

    /// All type entries in identity order.
    pub fn types(&self) -> impl Iterator<Item = (TypeRef, &TypeEntry)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, entry)| (TypeRef(i as u32), entry))
    }

    pub fn unit_type(&self) -> Option<TypeRef> {
        self.unit_type
    }

    pub fn nothing_type(&self) -> Option<TypeRef> {
        self.nothing_type
    }

    pub fn string_type(&self) -> Option<TypeRef> {
        self.string_type
    }

    pub fn lookup_public_type(&self, name: &str) -> Option<TypeRef> {
        self.public_types.get(name).copied()
    }

    pub fn lookup_public_function(&self, name: &str) -> Option<FunRef> {
        self.public_functions.get(name).copied()
    }

    /// `a <: b`, memoized DFS over declared supertypes. External and virtual
    /// types have no known supertypes and are only subtypes of themselves.
    pub fn is_subtype(&self, a: TypeRef, b: TypeRef) -> bool {
        if a == b {
            return true;
        }
        if let Some(&cached) = self.subtype_cache.borrow().get(&(a, b)) {
            return cached;
        }
        let result = self.types[a.index()]
            .supers
            .clone()
            .into_iter()
            .any(|s| self.is_subtype(s, b));
        self.subtype_cache.borrow_mut().insert((a, b), result);
        result
    }

    pub(crate) fn register_module(&mut self, name: String, virtual_function_count: u32) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(ModuleEntry {
            name,
            virtual_function_count,
        });
        id
    }

    pub(crate) fn set_virtual_function_count(&mut self, module: ModuleId, count: u32) {
        self.modules[module.0 as usize].virtual_function_count = count;
    }

    pub(crate) fn intern_external_type(&mut self, name: &str) -> TypeRef {
        if let Some(&t) = self.public_types.get(name) {
            return t;
        }
        if let Some(&t) = self.external_types.get(name) {
            return t;
        }
        let t = TypeRef(self.types.len() as u32);
        self.types.push(TypeEntry {
            kind: TypeKind::External {
                name: name.to_string(),
            },
            is_final: false,
            is_abstract: false,
            supers: Vec::new(),
            vtable: Vec::new(),
            itable: Vec::new(),
            module: None,
            builtin: None,
        });
        self.external_types.insert(name.to_string(), t);
        t
    }

    pub(crate) fn intern_external_function(&mut self, name: &str) -> FunRef {
        if let Some(&f) = self.public_functions.get(name) {
            return f;
        }
        if let Some(&f) = self.external_functions.get(name) {
            return f;
        }
        let f = FunRef(self.functions.len() as u32);
        self.functions.push(FunctionEntry {
            kind: FunKind::External {
                name: name.to_string(),
            },
            module: None,
            parameter_types: Vec::new(),
            return_type: TypeRef(0),
            is_suspend: false,
            is_exported: false,
            is_abstract: false,
            is_fake_override: false,
            is_field_initializer: false,
        });
        self.external_functions.insert(name.to_string(), f);
        f
    }

    /// Allocate a declared type entry; the body is filled by the caller.
    /// Public names are globally deduplicated, private entries are renumbered
    /// into this table's private index space.
    pub(crate) fn declare_type(
        &mut self,
        name: String,
        public: bool,
        module: ModuleId,
    ) -> (TypeRef, bool) {
        if public {
            if let Some(&existing) = self.public_types.get(&name) {
                return (existing, false);
            }
        }
        let kind = if public {
            TypeKind::Public { name: name.clone() }
        } else {
            let index = self.next_private_type;
            self.next_private_type += 1;
            TypeKind::Private {
                name: name.clone(),
                index,
            }
        };
        let t = TypeRef(self.types.len() as u32);
        self.types.push(TypeEntry {
            kind,
            is_final: false,
            is_abstract: false,
            supers: Vec::new(),
            vtable: Vec::new(),
            itable: Vec::new(),
            module: Some(module),
            builtin: None,
        });
        if public {
            self.public_types.insert(name, t);
        }
        (t, true)
    }

    pub(crate) fn fill_type(
        &mut self,
        t: TypeRef,
        is_final: bool,
        is_abstract: bool,
        supers: Vec<TypeRef>,
        vtable: Vec<FunRef>,
        itable: Vec<(u64, FunRef)>,
        builtin: Option<BuiltinKind>,
    ) {
        let entry = &mut self.types[t.index()];
        entry.is_final = is_final;
        entry.is_abstract = is_abstract;
        entry.supers = supers;
        entry.vtable = vtable;
        entry.itable = itable;
        entry.builtin = builtin;
        match builtin {
            Some(BuiltinKind::Unit) => self.unit_type = Some(t),
            Some(BuiltinKind::Nothing) => self.nothing_type = Some(t),
            Some(BuiltinKind::String) => self.string_type = Some(t),
            None => {}
        }
        self.subtype_cache.borrow_mut().clear();
    }

    pub(crate) fn declare_function(
        &mut self,
        name: String,
        public: bool,
        symbol_index: i32,
        module: ModuleId,
        signature: FunctionSignature,
    ) -> (FunRef, bool) {
        if public {
            if let Some(&existing) = self.public_functions.get(&name) {
                return (existing, false);
            }
        }
        let kind = if public {
            FunKind::Public {
                name: name.clone(),
                symbol_index,
            }
        } else {
            let index = self.next_private_function;
            self.next_private_function += 1;
            FunKind::Private {
                name: name.clone(),
                index,
                symbol_index,
            }
        };
        let f = FunRef(self.functions.len() as u32);
        self.functions.push(FunctionEntry {
            kind,
            module: Some(module),
            parameter_types: signature.parameter_types,
            return_type: signature.return_type,
            is_suspend: signature.is_suspend,
            is_exported: signature.is_exported,
            is_abstract: signature.is_abstract,
            is_fake_override: signature.is_fake_override,
            is_field_initializer: signature.is_field_initializer,
        });
        if public {
            self.public_functions.insert(name, f);
        }
        (f, true)
    }

    pub(crate) fn intern_field(&mut self, receiver: Option<TypeRef>, name: String) -> FieldRef {
        let key = (receiver, name);
        if let Some(&f) = self.field_keys.get(&key) {
            return f;
        }
        let f = FieldRef(self.fields.len() as u32);
        self.fields.push(FieldEntry {
            receiver: key.0,
            name: key.1.clone(),
        });
        self.field_keys.insert(key, f);
        f
    }

    /// Map the module under analysis into the table.
    ///
    /// Classes are visited in declaration order; virtual-table and
    /// interface-table slots assign dense symbol indices to the functions
    /// another module could dispatch to.
    pub fn build_module(
        &mut self,
        program: &IrProgram,
        vtables: &VtableBuilder,
    ) -> Result<ModuleSymbols> {
        let module = self.register_module(program.name.clone(), 0);
        let mut mapping = ModuleSymbols {
            module,
            ..ModuleSymbols::default()
        };

        let virtual_indices = self.assign_virtual_indices(program, vtables)?;
        self.set_virtual_function_count(module, virtual_indices.len() as u32);

        for index in 0..program.classes.len() {
            self.map_class(
                program,
                vtables,
                &virtual_indices,
                module,
                &mut mapping,
                ClassId(index as u32),
            )?;
        }
        for index in 0..program.functions.len() {
            self.map_function(
                program,
                vtables,
                &virtual_indices,
                module,
                &mut mapping,
                FunId(index as u32),
            )?;
        }
        for index in 0..program.fields.len() {
            self.map_field(
                program,
                vtables,
                &virtual_indices,
                module,
                &mut mapping,
                FieldId(index as u32),
            )?;
        }
        Ok(mapping)
    }

    /// Dense symbol indices for every function occupying a vtable or itable
    /// slot of a class declared in this module.
    fn assign_virtual_indices(
        &self,
        program: &IrProgram,
        vtables: &VtableBuilder,
    ) -> Result<FxHashMap<FunId, i32>> {
        let mut indices = FxHashMap::default();
        let mut next = 0i32;
        let mut take = |f: FunId, indices: &mut FxHashMap<FunId, i32>| {
            if program.function(f).is_external {
                return;
            }
            indices.entry(f).or_insert_with(|| {
                let i = next;
                next += 1;
                i
            });
        };
        for index in 0..program.classes.len() {
            let id = ClassId(index as u32);
            let class = program.class(id);
            if class.is_interface || class.is_external || class.is_opaque {
                continue;
            }
            for slot in vtables.vtable_entries(id)? {
                take(slot.implementation, &mut indices);
            }
            if !class.is_abstract {
                for &(_, implementation) in vtables.method_table_entries(id)? {
                    take(implementation, &mut indices);
                }
            }
        }
        Ok(indices)
    }

    fn map_class(
        &mut self,
        program: &IrProgram,
        vtables: &VtableBuilder,
        virtual_indices: &FxHashMap<FunId, i32>,
        module: ModuleId,
        mapping: &mut ModuleSymbols,
        class: ClassId,
    ) -> Result<TypeRef> {
        if let Some(&t) = mapping.class_map.get(&class) {
            return Ok(t);
        }
        let info = program.class(class);
        let name = program.class_name(class).to_string();

        let t = if info.is_opaque {
            self.virtual_type()
        } else if info.is_external {
            self.intern_external_type(&name)
        } else {
            if info.is_final && info.is_abstract {
                return Err(AnalysisError::FinalAbstractClass { class: name });
            }
            let (t, fresh) = self.declare_type(name, info.is_exported, module);
            if fresh {
                mapping.class_map.insert(class, t);
                let supers = info
                    .supers
                    .iter()
                    .map(|&s| self.map_class(program, vtables, virtual_indices, module, mapping, s))
                    .collect::<Result<Vec<_>>>()?;
                let vtable = if info.is_interface {
                    Vec::new()
                } else {
                    let slots = vtables.vtable_entries(class)?.to_vec();
                    let mut mapped = Vec::with_capacity(slots.len());
                    for slot in slots {
                        mapped.push(self.map_function(
                            program,
                            vtables,
                            virtual_indices,
                            module,
                            mapping,
                            slot.implementation,
                        )?);
                    }
                    mapped
                };
                let itable = if info.is_interface || info.is_abstract {
                    Vec::new()
                } else {
                    let entries = vtables.method_table_entries(class)?.to_vec();
                    let mut mapped = Vec::with_capacity(entries.len());
                    for (hash, implementation) in entries {
                        mapped.push((
                            hash,
                            self.map_function(
                                program,
                                vtables,
                                virtual_indices,
                                module,
                                mapping,
                                implementation,
                            )?,
                        ));
                    }
                    mapped
                };
                self.fill_type(
                    t,
                    info.is_final,
                    // Interfaces cannot be instantiated either.
                    info.is_abstract || info.is_interface,
                    supers,
                    vtable,
                    itable,
                    info.builtin,
                );
            }
            t
        };

        mapping.class_map.insert(class, t);
        if !mapping.types_in_order.contains(&t) {
            mapping.types_in_order.push(t);
        }
        Ok(t)
    }

    fn map_function(
        &mut self,
        program: &IrProgram,
        vtables: &VtableBuilder,
        virtual_indices: &FxHashMap<FunId, i32>,
        module: ModuleId,
        mapping: &mut ModuleSymbols,
        function: FunId,
    ) -> Result<FunRef> {
        if let Some(&f) = mapping.function_map.get(&function) {
            return Ok(f);
        }
        let info = program.function(function);
        let name = qualified_name(program, function);

        let f = if info.is_external {
            self.intern_external_function(&name)
        } else {
            let symbol_index = virtual_indices.get(&function).copied().unwrap_or(-1);
            let mut parameter_types = Vec::new();
            if info.has_receiver {
                let owner = info.owner.ok_or_else(|| {
                    AnalysisError::malformed(&name, "instance member without an owner class")
                })?;
                parameter_types.push(self.map_class(
                    program,
                    vtables,
                    virtual_indices,
                    module,
                    mapping,
                    owner,
                )?);
            }
            for &p in &info.value_parameters {
                parameter_types.push(self.map_class(
                    program,
                    vtables,
                    virtual_indices,
                    module,
                    mapping,
                    p,
                )?);
            }
            let return_class = if info.kind == FunctionKind::Constructor {
                program.builtins.unit
            } else {
                info.return_type
            };
            let return_type =
                self.map_class(program, vtables, virtual_indices, module, mapping, return_class)?;
            let signature = FunctionSignature {
                parameter_types,
                return_type,
                is_suspend: info.is_suspend,
                is_exported: info.is_exported,
                is_abstract: info.is_abstract,
                is_fake_override: info.is_fake_override,
                is_field_initializer: false,
            };
            let (f, _) =
                self.declare_function(name, info.is_exported, symbol_index, module, signature);
            f
        };

        mapping.function_map.insert(function, f);
        if !mapping.functions_in_order.contains(&f) {
            mapping.functions_in_order.push(f);
        }
        Ok(f)
    }

    fn map_field(
        &mut self,
        program: &IrProgram,
        vtables: &VtableBuilder,
        virtual_indices: &FxHashMap<FunId, i32>,
        module: ModuleId,
        mapping: &mut ModuleSymbols,
        field: FieldId,
    ) -> Result<FieldRef> {
        let info = program.field(field);
        let receiver = info.owner.map(|c| mapping.class_map[&c]);
        let name = program.field_name(field).to_string();
        let f = self.intern_field(receiver, name.clone());
        mapping.field_map.insert(field, f);
        if !mapping.fields_in_order.contains(&f) {
            mapping.fields_in_order.push(f);
        }

        if info.initializer.is_some() {
            let return_type =
                self.map_class(program, vtables, virtual_indices, module, mapping, info.ty)?;
            let signature = FunctionSignature {
                parameter_types: Vec::new(),
                return_type,
                is_suspend: false,
                is_exported: false,
                is_abstract: false,
                is_fake_override: false,
                is_field_initializer: true,
            };
            let (init, _) =
                self.declare_function(format!("{name}$init"), false, -1, module, signature);
            mapping.initializer_functions.push((field, init));
            if !mapping.functions_in_order.contains(&init) {
                mapping.functions_in_order.push(init);
            }
        }
        Ok(f)
    }
}

/// `Owner.name` for members, plain `name` otherwise.
pub fn qualified_name(program: &IrProgram, function: FunId) -> String {
    let info = program.function(function);
    match info.owner {
        Some(owner) => format!(
            "{}.{}",
            program.class_name(owner),
            program.interner.resolve(info.name)
        ),
        None => program.interner.resolve(info.name).to_string(),
    }
}
