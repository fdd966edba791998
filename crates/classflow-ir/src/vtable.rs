//! Per-class dispatch tables.
//!
//! The vtable of a class starts as a copy of its superclass vtable; each
//! declared overridable method either replaces the slot it overrides or
//! appends a new one. The interface table (itable) keys concrete
//! implementations by a 64-bit hash of the interface method's root name.

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::module::{ClassId, FunId, IrProgram};

#[derive(Debug, Error)]
pub enum VtableError {
    #[error("class `{class}` has no vtable (interface, external or opaque)")]
    NoVtable { class: String },

    #[error("function `{function}` occupies no slot in the vtable of `{class}`")]
    MissingSlot { class: String, function: String },

    #[error("no concrete implementation of `{function}` in `{class}`")]
    UnresolvedImplementation { class: String, function: String },

    #[error("class `{class}` extends external class `{superclass}` whose layout is unknown")]
    ExternalSuperclass { class: String, superclass: String },
}

pub type Result<T> = std::result::Result<T, VtableError>;

/// 64-bit interface-method hash: the first eight little-endian bytes of the
/// blake3 hash of the method name.
pub fn method_hash(name: &str) -> u64 {
    let hash = blake3::hash(name.as_bytes());
    let b = hash.as_bytes();
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// One vtable slot: the root declaration that owns the slot and the concrete
/// implementation the class dispatches to.
#[derive(Debug, Clone, Copy)]
pub struct VtableSlot {
    pub root: FunId,
    pub implementation: FunId,
}

/// Computes and caches dispatch tables for every declared class of a program.
pub struct VtableBuilder<'a> {
    program: &'a IrProgram,
    vtables: FxHashMap<ClassId, Vec<VtableSlot>>,
    itables: FxHashMap<ClassId, Vec<(u64, FunId)>>,
}

impl<'a> VtableBuilder<'a> {
    pub fn new(program: &'a IrProgram) -> Result<Self> {
        let mut builder = Self {
            program,
            vtables: FxHashMap::default(),
            itables: FxHashMap::default(),
        };
        for index in 0..program.classes.len() {
            let id = ClassId(index as u32);
            let class = program.class(id);
            if class.is_interface || class.is_external || class.is_opaque {
                continue;
            }
            builder.build_vtable(id)?;
            if !class.is_abstract {
                builder.build_itable(id)?;
            }
        }
        Ok(builder)
    }

    /// Ordered vtable of a non-interface declared class.
    pub fn vtable_entries(&self, class: ClassId) -> Result<&[VtableSlot]> {
        self.vtables
            .get(&class)
            .map(|v| v.as_slice())
            .ok_or_else(|| VtableError::NoVtable {
                class: self.program.class_name(class).to_string(),
            })
    }

    /// Interface table of a non-abstract declared class, sorted by hash.
    pub fn method_table_entries(&self, class: ClassId) -> Result<&[(u64, FunId)]> {
        self.itables
            .get(&class)
            .map(|v| v.as_slice())
            .ok_or_else(|| VtableError::NoVtable {
                class: self.program.class_name(class).to_string(),
            })
    }

    /// Slot index of `function` in the vtable of `class`.
    pub fn vtable_index(&self, class: ClassId, function: FunId) -> Result<u32> {
        let root = self.root_declaration(function);
        let slots = self.vtable_entries(class)?;
        slots
            .iter()
            .position(|slot| slot.root == root)
            .map(|i| i as u32)
            .ok_or_else(|| VtableError::MissingSlot {
                class: self.program.class_name(class).to_string(),
                function: self.program.function_name(function).to_string(),
            })
    }

    /// The declaration a chain of overrides originates from.
    pub fn root_declaration(&self, function: FunId) -> FunId {
        let mut current = function;
        loop {
            let f = self.program.function(current);
            match f.overrides.first() {
                Some(&next) => current = next,
                None => return current,
            }
        }
    }

    /// The concrete function `class` dispatches to for `target`.
    pub fn resolve_implementation(&self, class: ClassId, target: FunId) -> Result<FunId> {
        self.find_implementation(class, target)
            .ok_or_else(|| VtableError::UnresolvedImplementation {
                class: self.program.class_name(class).to_string(),
                function: self.program.function_name(target).to_string(),
            })
    }

    fn find_implementation(&self, class: ClassId, target: FunId) -> Option<FunId> {
        let info = self.program.class(class);
        for &m in &info.methods {
            if m == target || self.overrides_transitively(m, target) {
                return Some(self.strip_fake_override(m));
            }
        }
        for &s in &info.supers {
            let sup = self.program.class(s);
            if sup.is_external || sup.is_opaque {
                continue;
            }
            if let Some(found) = self.find_implementation(s, target) {
                return Some(found);
            }
        }
        None
    }

    fn overrides_transitively(&self, function: FunId, target: FunId) -> bool {
        let mut stack = vec![function];
        let mut seen = FxHashSet::default();
        while let Some(f) = stack.pop() {
            if !seen.insert(f) {
                continue;
            }
            for &o in &self.program.function(f).overrides {
                if o == target {
                    return true;
                }
                stack.push(o);
            }
        }
        false
    }

    fn strip_fake_override(&self, function: FunId) -> FunId {
        let mut current = function;
        while self.program.function(current).is_fake_override {
            match self.program.function(current).overrides.first() {
                Some(&next) => current = next,
                None => break,
            }
        }
        current
    }

    fn build_vtable(&mut self, class: ClassId) -> Result<()> {
        if self.vtables.contains_key(&class) {
            return Ok(());
        }
        let info = self.program.class(class);

        // Inherit the primary (non-interface) superclass layout.
        let mut slots: Vec<VtableSlot> = Vec::new();
        for &s in &info.supers {
            let sup = self.program.class(s);
            if sup.is_interface {
                continue;
            }
            if sup.is_external || sup.is_opaque {
                return Err(VtableError::ExternalSuperclass {
                    class: self.program.class_name(class).to_string(),
                    superclass: self.program.class_name(s).to_string(),
                });
            }
            self.build_vtable(s)?;
            slots = self.vtables[&s].clone();
            break;
        }

        for &m in &info.methods {
            let f = self.program.function(m);
            if f.is_fake_override {
                // The inherited slot already dispatches to the right place.
                continue;
            }
            if !f.is_overridable && f.overrides.is_empty() {
                continue;
            }
            let implementation = self.strip_fake_override(m);
            let mut replaced = false;
            for slot in slots.iter_mut() {
                if slot.root == m || self.overrides_transitively(m, slot.root) {
                    slot.implementation = implementation;
                    replaced = true;
                }
            }
            if !replaced {
                slots.push(VtableSlot {
                    root: self.root_declaration(m),
                    implementation,
                });
            }
        }

        self.vtables.insert(class, slots);
        Ok(())
    }

    fn build_itable(&mut self, class: ClassId) -> Result<()> {
        let mut interfaces = Vec::new();
        let mut seen = FxHashSet::default();
        self.collect_interfaces(class, &mut interfaces, &mut seen);
        interfaces.sort();

        let mut entries: FxHashMap<u64, FunId> = FxHashMap::default();
        for iface in interfaces {
            let info = self.program.class(iface);
            for &m in &info.methods {
                if self.program.function(m).is_fake_override {
                    continue;
                }
                let root = self.root_declaration(m);
                let hash = method_hash(self.program.function_name(root));
                let implementation = self.resolve_implementation(class, m)?;
                entries.insert(hash, implementation);
            }
        }

        let mut sorted: Vec<(u64, FunId)> = entries.into_iter().collect();
        sorted.sort_by_key(|&(hash, _)| hash);
        self.itables.insert(class, sorted);
        Ok(())
    }

    fn collect_interfaces(
        &self,
        class: ClassId,
        out: &mut Vec<ClassId>,
        seen: &mut FxHashSet<ClassId>,
    ) {
        for &s in &self.program.class(class).supers {
            let sup = self.program.class(s);
            if sup.is_external || sup.is_opaque {
                continue;
            }
            if sup.is_interface && seen.insert(s) {
                out.push(s);
            }
            self.collect_interfaces(s, out, seen);
        }
    }
}
