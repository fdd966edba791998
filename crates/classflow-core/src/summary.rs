//! Module summary codec.
//!
//! A summary carries the symbol table slice a module exposes plus its
//! function templates, all referenced by index. Loading renumbers private
//! entities into the consumer's index space and resolves external references
//! against the publics registered so far, which is what makes the analysis
//! incremental across library boundaries.

use std::path::Path;

use classflow_ir::BuiltinKind;
use serde::{Deserialize, Serialize};

use crate::errors::{AnalysisError, Result};
use crate::symbols::{
    FieldRef, FunKind, FunRef, FunctionSignature, ModuleId, ModuleSymbols, SymbolTable, TypeKind,
    TypeRef,
};
use crate::template::{
    FunctionTemplate, TemplateEdge, TemplateNode, TemplateNodeId,
};

/// Summary format version - increment when the structure changes
pub const SUMMARY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummaryBuiltin {
    Unit,
    Nothing,
    String,
}

impl From<BuiltinKind> for SummaryBuiltin {
    fn from(kind: BuiltinKind) -> Self {
        match kind {
            BuiltinKind::Unit => SummaryBuiltin::Unit,
            BuiltinKind::Nothing => SummaryBuiltin::Nothing,
            BuiltinKind::String => SummaryBuiltin::String,
        }
    }
}

impl From<SummaryBuiltin> for BuiltinKind {
    fn from(kind: SummaryBuiltin) -> Self {
        match kind {
            SummaryBuiltin::Unit => BuiltinKind::Unit,
            SummaryBuiltin::Nothing => BuiltinKind::Nothing,
            SummaryBuiltin::String => BuiltinKind::String,
        }
    }
}

/// The "intestines" of a declared type: everything beyond its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryTypeBody {
    pub is_final: bool,
    pub is_abstract: bool,
    pub supers: Vec<u32>,
    pub vtable: Vec<u32>,
    pub itable: Vec<(u64, u32)>,
    pub builtin: Option<SummaryBuiltin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SummaryType {
    Virtual,
    External { name: String },
    Public { name: String, body: SummaryTypeBody },
    Private { name: String, index: u32, body: SummaryTypeBody },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySignature {
    pub parameter_types: Vec<u32>,
    pub return_type: u32,
    pub is_suspend: bool,
    pub is_exported: bool,
    pub is_abstract: bool,
    pub is_fake_override: bool,
    pub is_field_initializer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SummaryFunction {
    External {
        name: String,
    },
    Public {
        name: String,
        symbol_index: i32,
        signature: SummarySignature,
    },
    Private {
        name: String,
        index: u32,
        symbol_index: i32,
        signature: SummarySignature,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryField {
    pub receiver_type: Option<u32>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SummaryEdge {
    pub node: u32,
    pub cast: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SummaryNode {
    Parameter {
        index: u32,
    },
    Const {
        ty: u32,
    },
    Singleton {
        ty: u32,
    },
    StaticCall {
        callee: u32,
        arguments: Vec<SummaryEdge>,
        return_type: u32,
        receiver_type: Option<u32>,
    },
    NewObject {
        ctor: u32,
        arguments: Vec<SummaryEdge>,
        result_type: u32,
    },
    VtableCall {
        callee: u32,
        receiver_type: u32,
        vtable_index: u32,
        arguments: Vec<SummaryEdge>,
        return_type: u32,
    },
    ItableCall {
        callee: u32,
        receiver_type: u32,
        method_hash: u64,
        arguments: Vec<SummaryEdge>,
        return_type: u32,
    },
    FieldRead {
        receiver: Option<SummaryEdge>,
        field: u32,
    },
    FieldWrite {
        receiver: Option<SummaryEdge>,
        field: u32,
        value: SummaryEdge,
    },
    Variable {
        values: Vec<SummaryEdge>,
    },
    TempVariable {
        values: Vec<SummaryEdge>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryTemplate {
    pub function: u32,
    pub parameter_count: u32,
    pub nodes: Vec<SummaryNode>,
    pub returns: u32,
}

/// The serialized analysis artifact of one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub format_version: u32,
    pub module_name: String,
    pub virtual_function_count: u32,
    pub types: Vec<SummaryType>,
    pub functions: Vec<SummaryFunction>,
    pub fields: Vec<SummaryField>,
    pub templates: Vec<SummaryTemplate>,
}

/// On-disk envelope with an integrity hash over the payload.
#[derive(Debug, Serialize, Deserialize)]
struct SummaryEnvelope {
    checksum: String,
    payload: Vec<u8>,
}

/// A summary registered into a consumer symbol table.
#[derive(Debug)]
pub struct LoadedModule {
    pub module: ModuleId,
    pub templates: Vec<FunctionTemplate>,
}

impl ModuleSummary {
    /// Serialize the module's slice of the symbol table plus its templates.
    pub fn build(
        symbols: &SymbolTable,
        mapping: &ModuleSymbols,
        templates: &[FunctionTemplate],
    ) -> Result<Self> {
        let writer = SummaryWriter::new(symbols, mapping);
        writer.write(templates)
    }

    /// Register this summary's entities and templates into `symbols`.
    pub fn load_into(&self, symbols: &mut SymbolTable) -> Result<LoadedModule> {
        if self.format_version != SUMMARY_VERSION {
            return Err(AnalysisError::VersionMismatch {
                expected: SUMMARY_VERSION,
                found: self.format_version,
            });
        }
        SummaryReader::new(symbols, self).read()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(AnalysisError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(AnalysisError::from)
    }

    /// Blake3 hash of the serialized summary (for integrity checking).
    pub fn compute_hash(&self) -> Result<String> {
        let bytes = self.to_bytes()?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let payload = self.to_bytes()?;
        let checksum = blake3::hash(&payload).to_hex().to_string();
        let envelope = SummaryEnvelope { checksum, payload };
        let bytes = bincode::serialize(&envelope)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let envelope: SummaryEnvelope = bincode::deserialize(&bytes)?;
        let checksum = blake3::hash(&envelope.payload).to_hex().to_string();
        if checksum != envelope.checksum {
            return Err(AnalysisError::CorruptedSummary {
                module: path.display().to_string(),
            });
        }
        let summary = Self::from_bytes(&envelope.payload)?;
        if summary.format_version != SUMMARY_VERSION {
            return Err(AnalysisError::VersionMismatch {
                expected: SUMMARY_VERSION,
                found: summary.format_version,
            });
        }
        Ok(summary)
    }
}

struct SummaryWriter<'a> {
    symbols: &'a SymbolTable,
    mapping: &'a ModuleSymbols,
    type_indices: rustc_hash::FxHashMap<TypeRef, u32>,
    function_indices: rustc_hash::FxHashMap<FunRef, u32>,
    field_indices: rustc_hash::FxHashMap<FieldRef, u32>,
}

impl<'a> SummaryWriter<'a> {
    fn new(symbols: &'a SymbolTable, mapping: &'a ModuleSymbols) -> Self {
        let type_indices = mapping
            .types_in_order
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, i as u32))
            .collect();
        let function_indices = mapping
            .functions_in_order
            .iter()
            .enumerate()
            .map(|(i, &f)| (f, i as u32))
            .collect();
        let field_indices = mapping
            .fields_in_order
            .iter()
            .enumerate()
            .map(|(i, &f)| (f, i as u32))
            .collect();
        Self {
            symbols,
            mapping,
            type_indices,
            function_indices,
            field_indices,
        }
    }

    fn type_index(&self, t: TypeRef) -> Result<u32> {
        self.type_indices.get(&t).copied().ok_or_else(|| {
            AnalysisError::malformed(
                self.symbols.type_name(t),
                "type referenced by summary but never mapped",
            )
        })
    }

    fn function_index(&self, f: FunRef) -> Result<u32> {
        self.function_indices.get(&f).copied().ok_or_else(|| {
            AnalysisError::malformed(
                self.symbols.function_name(f),
                "function referenced by summary but never mapped",
            )
        })
    }

    fn field_index(&self, f: FieldRef) -> Result<u32> {
        self.field_indices.get(&f).copied().ok_or_else(|| {
            AnalysisError::malformed(
                &self.symbols.field_entry(f).name,
                "field referenced by summary but never mapped",
            )
        })
    }

    fn write(&self, templates: &[FunctionTemplate]) -> Result<ModuleSummary> {
        let module = self.mapping.module;
        let mut types = Vec::with_capacity(self.mapping.types_in_order.len());
        for &t in &self.mapping.types_in_order {
            types.push(self.write_type(t, module)?);
        }
        let mut functions = Vec::with_capacity(self.mapping.functions_in_order.len());
        for &f in &self.mapping.functions_in_order {
            functions.push(self.write_function(f, module)?);
        }
        let mut fields = Vec::with_capacity(self.mapping.fields_in_order.len());
        for &f in &self.mapping.fields_in_order {
            let entry = self.symbols.field_entry(f);
            fields.push(SummaryField {
                receiver_type: match entry.receiver {
                    Some(r) => Some(self.type_index(r)?),
                    None => None,
                },
                name: entry.name.clone(),
            });
        }
        let mut summary_templates = Vec::with_capacity(templates.len());
        for template in templates {
            summary_templates.push(self.write_template(template)?);
        }
        let entry = self.symbols.module_entry(module);
        Ok(ModuleSummary {
            format_version: SUMMARY_VERSION,
            module_name: entry.name.clone(),
            virtual_function_count: entry.virtual_function_count,
            types,
            functions,
            fields,
            templates: summary_templates,
        })
    }

    fn write_type(&self, t: TypeRef, module: ModuleId) -> Result<SummaryType> {
        let entry = self.symbols.type_entry(t);
        let declared_here = entry.kind.is_declared() && entry.module == Some(module);
        Ok(match (&entry.kind, declared_here) {
            (TypeKind::Virtual, _) => SummaryType::Virtual,
            (kind, false) => SummaryType::External {
                name: kind.name().to_string(),
            },
            (kind, true) => {
                let mut supers = Vec::with_capacity(entry.supers.len());
                for &s in &entry.supers {
                    supers.push(self.type_index(s)?);
                }
                let mut vtable = Vec::with_capacity(entry.vtable.len());
                for &f in &entry.vtable {
                    vtable.push(self.function_index(f)?);
                }
                let mut itable = Vec::with_capacity(entry.itable.len());
                for &(hash, f) in &entry.itable {
                    itable.push((hash, self.function_index(f)?));
                }
                let body = SummaryTypeBody {
                    is_final: entry.is_final,
                    is_abstract: entry.is_abstract,
                    supers,
                    vtable,
                    itable,
                    builtin: entry.builtin.map(SummaryBuiltin::from),
                };
                match kind {
                    TypeKind::Public { name } => SummaryType::Public {
                        name: name.clone(),
                        body,
                    },
                    TypeKind::Private { name, index } => SummaryType::Private {
                        name: name.clone(),
                        index: *index,
                        body,
                    },
                    _ => unreachable!("declared kinds are public or private"),
                }
            }
        })
    }

    fn write_function(&self, f: FunRef, module: ModuleId) -> Result<SummaryFunction> {
        let entry = self.symbols.function_entry(f);
        let declared_here = entry.kind.is_declared() && entry.module == Some(module);
        if !declared_here {
            return Ok(SummaryFunction::External {
                name: entry.kind.name().to_string(),
            });
        }
        let parameter_types = entry
            .parameter_types
            .iter()
            .map(|&t| self.type_index(t))
            .collect::<Result<Vec<_>>>()?;
        let signature = SummarySignature {
            parameter_types,
            return_type: self.type_index(entry.return_type)?,
            is_suspend: entry.is_suspend,
            is_exported: entry.is_exported,
            is_abstract: entry.is_abstract,
            is_fake_override: entry.is_fake_override,
            is_field_initializer: entry.is_field_initializer,
        };
        Ok(match &entry.kind {
            FunKind::Public { name, symbol_index } => SummaryFunction::Public {
                name: name.clone(),
                symbol_index: *symbol_index,
                signature,
            },
            FunKind::Private {
                name,
                index,
                symbol_index,
            } => SummaryFunction::Private {
                name: name.clone(),
                index: *index,
                symbol_index: *symbol_index,
                signature,
            },
            FunKind::External { .. } => unreachable!("declared kinds are public or private"),
        })
    }

    fn write_edge(&self, edge: &TemplateEdge) -> Result<SummaryEdge> {
        Ok(SummaryEdge {
            node: edge.node.0,
            cast: match edge.cast {
                Some(t) => Some(self.type_index(t)?),
                None => None,
            },
        })
    }

    fn write_edges(&self, edges: &[TemplateEdge]) -> Result<Vec<SummaryEdge>> {
        edges.iter().map(|e| self.write_edge(e)).collect()
    }

    fn write_template(&self, template: &FunctionTemplate) -> Result<SummaryTemplate> {
        let mut nodes = Vec::with_capacity(template.nodes.len());
        for node in &template.nodes {
            nodes.push(match node {
                TemplateNode::Parameter { index } => SummaryNode::Parameter { index: *index },
                TemplateNode::Const { ty } => SummaryNode::Const {
                    ty: self.type_index(*ty)?,
                },
                TemplateNode::Singleton { ty } => SummaryNode::Singleton {
                    ty: self.type_index(*ty)?,
                },
                TemplateNode::StaticCall {
                    callee,
                    arguments,
                    return_type,
                    receiver_type,
                } => SummaryNode::StaticCall {
                    callee: self.function_index(*callee)?,
                    arguments: self.write_edges(arguments)?,
                    return_type: self.type_index(*return_type)?,
                    receiver_type: match receiver_type {
                        Some(t) => Some(self.type_index(*t)?),
                        None => None,
                    },
                },
                TemplateNode::NewObject {
                    ctor,
                    arguments,
                    result_type,
                } => SummaryNode::NewObject {
                    ctor: self.function_index(*ctor)?,
                    arguments: self.write_edges(arguments)?,
                    result_type: self.type_index(*result_type)?,
                },
                TemplateNode::VtableCall {
                    callee,
                    receiver_type,
                    vtable_index,
                    arguments,
                    return_type,
                    ..
                } => SummaryNode::VtableCall {
                    callee: self.function_index(*callee)?,
                    receiver_type: self.type_index(*receiver_type)?,
                    vtable_index: *vtable_index,
                    arguments: self.write_edges(arguments)?,
                    return_type: self.type_index(*return_type)?,
                },
                TemplateNode::ItableCall {
                    callee,
                    receiver_type,
                    method_hash,
                    arguments,
                    return_type,
                    ..
                } => SummaryNode::ItableCall {
                    callee: self.function_index(*callee)?,
                    receiver_type: self.type_index(*receiver_type)?,
                    method_hash: *method_hash,
                    arguments: self.write_edges(arguments)?,
                    return_type: self.type_index(*return_type)?,
                },
                TemplateNode::FieldRead { receiver, field } => SummaryNode::FieldRead {
                    receiver: match receiver {
                        Some(e) => Some(self.write_edge(e)?),
                        None => None,
                    },
                    field: self.field_index(*field)?,
                },
                TemplateNode::FieldWrite {
                    receiver,
                    field,
                    value,
                } => SummaryNode::FieldWrite {
                    receiver: match receiver {
                        Some(e) => Some(self.write_edge(e)?),
                        None => None,
                    },
                    field: self.field_index(*field)?,
                    value: self.write_edge(value)?,
                },
                TemplateNode::Variable { values } => SummaryNode::Variable {
                    values: self.write_edges(values)?,
                },
                TemplateNode::TempVariable { values } => SummaryNode::TempVariable {
                    values: self.write_edges(values)?,
                },
            });
        }
        Ok(SummaryTemplate {
            function: self.function_index(template.id)?,
            parameter_count: template.parameter_count,
            nodes,
            returns: template.returns.0,
        })
    }
}

struct SummaryReader<'a> {
    symbols: &'a mut SymbolTable,
    summary: &'a ModuleSummary,
    types: Vec<TypeRef>,
    functions: Vec<FunRef>,
    fields: Vec<FieldRef>,
}

impl<'a> SummaryReader<'a> {
    fn new(symbols: &'a mut SymbolTable, summary: &'a ModuleSummary) -> Self {
        Self {
            symbols,
            summary,
            types: Vec::new(),
            functions: Vec::new(),
            fields: Vec::new(),
        }
    }

    fn corrupted(&self) -> AnalysisError {
        AnalysisError::CorruptedSummary {
            module: self.summary.module_name.clone(),
        }
    }

    fn type_at(&self, index: u32) -> Result<TypeRef> {
        self.types
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.corrupted())
    }

    fn function_at(&self, index: u32) -> Result<FunRef> {
        self.functions
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.corrupted())
    }

    fn field_at(&self, index: u32) -> Result<FieldRef> {
        self.fields
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.corrupted())
    }

    fn read(mut self) -> Result<LoadedModule> {
        let summary = self.summary;
        let module = self
            .symbols
            .register_module(summary.module_name.clone(), summary.virtual_function_count);

        // First pass allocates type identities so later passes can
        // forward-reference them.
        let mut fresh = Vec::with_capacity(summary.types.len());
        for ty in &summary.types {
            let (t, is_fresh) = match ty {
                SummaryType::Virtual => (self.symbols.virtual_type(), false),
                SummaryType::External { name } => (self.symbols.intern_external_type(name), false),
                SummaryType::Public { name, .. } => {
                    self.symbols.declare_type(name.clone(), true, module)
                }
                SummaryType::Private { name, .. } => {
                    self.symbols.declare_type(name.clone(), false, module)
                }
            };
            self.types.push(t);
            fresh.push(is_fresh);
        }

        for function in &summary.functions {
            let f = self.read_function(function, module)?;
            self.functions.push(f);
        }

        for (i, ty) in summary.types.iter().enumerate() {
            let body = match ty {
                SummaryType::Public { body, .. } | SummaryType::Private { body, .. } => body,
                _ => continue,
            };
            if !fresh[i] {
                // An identically-named public from another library is already
                // registered; first declaration wins.
                continue;
            }
            let t = self.types[i];
            let supers = body
                .supers
                .iter()
                .map(|&s| self.type_at(s))
                .collect::<Result<Vec<_>>>()?;
            let vtable = body
                .vtable
                .iter()
                .map(|&f| self.function_at(f))
                .collect::<Result<Vec<_>>>()?;
            let itable = body
                .itable
                .iter()
                .map(|&(hash, f)| Ok((hash, self.function_at(f)?)))
                .collect::<Result<Vec<_>>>()?;
            self.symbols.fill_type(
                t,
                body.is_final,
                body.is_abstract,
                supers,
                vtable,
                itable,
                body.builtin.map(BuiltinKind::from),
            );
        }

        for field in &summary.fields {
            let receiver = match field.receiver_type {
                Some(r) => Some(self.type_at(r)?),
                None => None,
            };
            let f = self.symbols.intern_field(receiver, field.name.clone());
            self.fields.push(f);
        }

        let mut templates = Vec::with_capacity(summary.templates.len());
        for template in &summary.templates {
            templates.push(self.read_template(template)?);
        }

        Ok(LoadedModule { module, templates })
    }

    fn read_function(&mut self, function: &SummaryFunction, module: ModuleId) -> Result<FunRef> {
        let (name, public, symbol_index, signature) = match function {
            SummaryFunction::External { name } => {
                return Ok(self.symbols.intern_external_function(name));
            }
            SummaryFunction::Public {
                name,
                symbol_index,
                signature,
            } => (name, true, *symbol_index, signature),
            SummaryFunction::Private {
                name,
                symbol_index,
                signature,
                ..
            } => (name, false, *symbol_index, signature),
        };
        let parameter_types = signature
            .parameter_types
            .iter()
            .map(|&t| self.type_at(t))
            .collect::<Result<Vec<_>>>()?;
        let return_type = self.type_at(signature.return_type)?;
        let (f, _) = self.symbols.declare_function(
            name.clone(),
            public,
            symbol_index,
            module,
            FunctionSignature {
                parameter_types,
                return_type,
                is_suspend: signature.is_suspend,
                is_exported: signature.is_exported,
                is_abstract: signature.is_abstract,
                is_fake_override: signature.is_fake_override,
                is_field_initializer: signature.is_field_initializer,
            },
        );
        Ok(f)
    }

    fn read_template(&self, template: &SummaryTemplate) -> Result<FunctionTemplate> {
        let id = self.function_at(template.function)?;
        let mut nodes = Vec::with_capacity(template.nodes.len());
        for node in &template.nodes {
            nodes.push(self.read_node(node)?);
        }
        let returns = TemplateNodeId(template.returns);
        if returns.index() >= nodes.len() {
            return Err(self.corrupted());
        }
        Ok(FunctionTemplate {
            id,
            parameter_count: template.parameter_count,
            nodes,
            returns,
        })
    }

    fn read_edge(&self, edge: &SummaryEdge) -> Result<TemplateEdge> {
        Ok(TemplateEdge {
            node: TemplateNodeId(edge.node),
            cast: match edge.cast {
                Some(t) => Some(self.type_at(t)?),
                None => None,
            },
        })
    }

    fn read_edges(&self, edges: &[SummaryEdge]) -> Result<Vec<TemplateEdge>> {
        edges.iter().map(|e| self.read_edge(e)).collect()
    }

    fn read_node(&self, node: &SummaryNode) -> Result<TemplateNode> {
        Ok(match node {
            SummaryNode::Parameter { index } => TemplateNode::Parameter { index: *index },
            SummaryNode::Const { ty } => TemplateNode::Const {
                ty: self.type_at(*ty)?,
            },
            SummaryNode::Singleton { ty } => TemplateNode::Singleton {
                ty: self.type_at(*ty)?,
            },
            SummaryNode::StaticCall {
                callee,
                arguments,
                return_type,
                receiver_type,
            } => TemplateNode::StaticCall {
                callee: self.function_at(*callee)?,
                arguments: self.read_edges(arguments)?,
                return_type: self.type_at(*return_type)?,
                receiver_type: match receiver_type {
                    Some(t) => Some(self.type_at(*t)?),
                    None => None,
                },
            },
            SummaryNode::NewObject {
                ctor,
                arguments,
                result_type,
            } => TemplateNode::NewObject {
                ctor: self.function_at(*ctor)?,
                arguments: self.read_edges(arguments)?,
                result_type: self.type_at(*result_type)?,
            },
            SummaryNode::VtableCall {
                callee,
                receiver_type,
                vtable_index,
                arguments,
                return_type,
            } => TemplateNode::VtableCall {
                callee: self.function_at(*callee)?,
                receiver_type: self.type_at(*receiver_type)?,
                vtable_index: *vtable_index,
                arguments: self.read_edges(arguments)?,
                return_type: self.type_at(*return_type)?,
                call_site: None,
            },
            SummaryNode::ItableCall {
                callee,
                receiver_type,
                method_hash,
                arguments,
                return_type,
            } => TemplateNode::ItableCall {
                callee: self.function_at(*callee)?,
                receiver_type: self.type_at(*receiver_type)?,
                method_hash: *method_hash,
                arguments: self.read_edges(arguments)?,
                return_type: self.type_at(*return_type)?,
                call_site: None,
            },
            SummaryNode::FieldRead { receiver, field } => TemplateNode::FieldRead {
                receiver: match receiver {
                    Some(e) => Some(self.read_edge(e)?),
                    None => None,
                },
                field: self.field_at(*field)?,
            },
            SummaryNode::FieldWrite {
                receiver,
                field,
                value,
            } => TemplateNode::FieldWrite {
                receiver: match receiver {
                    Some(e) => Some(self.read_edge(e)?),
                    None => None,
                },
                field: self.field_at(*field)?,
                value: self.read_edge(value)?,
            },
            SummaryNode::Variable { values } => TemplateNode::Variable {
                values: self.read_edges(values)?,
            },
            SummaryNode::TempVariable { values } => TemplateNode::TempVariable {
                values: self.read_edges(values)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip_and_corruption() {
        let summary = ModuleSummary {
            format_version: SUMMARY_VERSION,
            module_name: "lib".into(),
            virtual_function_count: 0,
            types: vec![SummaryType::Virtual],
            functions: Vec::new(),
            fields: Vec::new(),
            templates: Vec::new(),
        };
        let bytes = summary.to_bytes().unwrap();
        let back = ModuleSummary::from_bytes(&bytes).unwrap();
        assert_eq!(back.module_name, "lib");
        assert_eq!(
            summary.compute_hash().unwrap(),
            back.compute_hash().unwrap()
        );
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let summary = ModuleSummary {
            format_version: SUMMARY_VERSION + 1,
            module_name: "lib".into(),
            virtual_function_count: 0,
            types: Vec::new(),
            functions: Vec::new(),
            fields: Vec::new(),
            templates: Vec::new(),
        };
        let mut symbols = SymbolTable::new();
        let err = summary.load_into(&mut symbols).unwrap_err();
        assert!(matches!(err, AnalysisError::VersionMismatch { .. }));
    }
}
