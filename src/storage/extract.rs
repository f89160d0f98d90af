//! Storage layout extraction from compiler ASTs.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::{
    ArraySlot, BuiltinValue, ElementaryType, EnumSlot, LayoutKind, MappingSlot, StorageDump,
    StorageError, StorageLayout, StorageResult, StorageSlot, StructLayout, StructSlot, packing,
};
use crate::ast::{
    ContractKind, ContractPart, EnumDefinition, Expression, LiteralKind, NodeId, SourceUnit,
    SourceUnitPart, StructDefinition, TypeName, UserDefinedValueTypeDefinition,
    VariableDeclaration,
};

/// Contracts to extract storage layouts from.
///
/// A contract is selected when its source path starts with one of the
/// source prefixes and its name is one of the contract names. An empty list
/// does not restrict anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageSelection {
    source_prefixes: Vec<String>,
    contract_names: Vec<String>,
}

impl StorageSelection {
    /// Selects every contract and library.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_source_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_prefixes.push(prefix.into());
        self
    }

    pub fn with_contract(mut self, name: impl Into<String>) -> Self {
        self.contract_names.push(name.into());
        self
    }

    pub fn matches(&self, source_path: &str, contract_name: &str) -> bool {
        let contract_selected = self.contract_names.is_empty()
            || self.contract_names.iter().any(|name| name == contract_name);
        self.matches_source(source_path) && contract_selected
    }

    /// File-level functions belong to no contract, a contract name filter
    /// leaves them out.
    pub fn matches_free_functions(&self, source_path: &str) -> bool {
        self.contract_names.is_empty() && self.matches_source(source_path)
    }

    fn matches_source(&self, source_path: &str) -> bool {
        self.source_prefixes.is_empty()
            || self
                .source_prefixes
                .iter()
                .any(|prefix| source_path.starts_with(prefix.as_str()))
    }
}

/// Declaration a type name or identifier can refer to.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Declaration<'a> {
    Contract,
    Struct(&'a StructDefinition),
    Enum(&'a EnumDefinition),
    ValueType(&'a UserDefinedValueTypeDefinition),
    Constant(&'a VariableDeclaration),
}

/// Project-wide index of declarations by node id.
#[derive(Debug, Default)]
pub(crate) struct DeclarationIndex<'a> {
    declarations: HashMap<NodeId, Declaration<'a>>,
}

impl<'a> DeclarationIndex<'a> {
    pub(crate) fn new(units: &'a [SourceUnit]) -> Self {
        let mut index = Self::default();
        for unit in units {
            for node in &unit.nodes {
                match node {
                    SourceUnitPart::ContractDefinition(def) => {
                        index.insert(def.id, Declaration::Contract);
                        for part in &def.nodes {
                            index.insert_part(part);
                        }
                    }
                    SourceUnitPart::StructDefinition(def) => {
                        index.insert(def.id, Declaration::Struct(def))
                    }
                    SourceUnitPart::EnumDefinition(def) => {
                        index.insert(def.id, Declaration::Enum(def))
                    }
                    SourceUnitPart::UserDefinedValueTypeDefinition(def) => {
                        index.insert(def.id, Declaration::ValueType(def))
                    }
                    SourceUnitPart::VariableDeclaration(def) if def.constant => {
                        index.insert(def.id, Declaration::Constant(def))
                    }
                    _ => {}
                }
            }
        }
        index
    }

    fn insert_part(&mut self, part: &'a ContractPart) {
        match part {
            ContractPart::StructDefinition(def) => self.insert(def.id, Declaration::Struct(def)),
            ContractPart::EnumDefinition(def) => self.insert(def.id, Declaration::Enum(def)),
            ContractPart::UserDefinedValueTypeDefinition(def) => {
                self.insert(def.id, Declaration::ValueType(def))
            }
            ContractPart::VariableDeclaration(def) if def.constant => {
                self.insert(def.id, Declaration::Constant(def))
            }
            _ => {}
        }
    }

    fn insert(&mut self, id: NodeId, declaration: Declaration<'a>) {
        self.declarations.insert(id, declaration);
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<Declaration<'a>> {
        self.declarations.get(&id).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.declarations.len()
    }
}

/// Resolves type names of one source unit into storage slots.
struct Resolver<'i, 'a> {
    index: &'i DeclarationIndex<'a>,
    source_unit: &'a str,
    /// Structs being resolved, to cut self references short.
    stack: Vec<NodeId>,
    /// Set while measuring a self-referencing struct.
    sizing: bool,
}

impl<'i, 'a> Resolver<'i, 'a> {
    fn new(index: &'i DeclarationIndex<'a>, source_unit: &'a str) -> Self {
        Self {
            index,
            source_unit,
            stack: Vec::new(),
            sizing: false,
        }
    }

    fn unknown(&self, variable: &str, reference: impl Into<String>) -> StorageError {
        StorageError::UnknownTypeReference {
            source_unit: self.source_unit.to_string(),
            variable: variable.to_string(),
            reference: reference.into(),
        }
    }

    fn struct_layout(&mut self, def: &StructDefinition) -> StorageResult<StructLayout> {
        let members = self.struct_members(def)?;
        Ok(StructLayout::new(def.name.clone(), members))
    }

    fn struct_members(&mut self, def: &StructDefinition) -> StorageResult<Vec<StorageSlot>> {
        self.stack.push(def.id);
        let members = def
            .members
            .iter()
            .map(|member| self.member(member))
            .collect::<StorageResult<Vec<_>>>();
        self.stack.pop();
        members
    }

    /// Slot count of a struct referenced from within itself.
    ///
    /// A struct can only contain itself behind a mapping or a dynamic array,
    /// both one slot wide whatever their element, so the self references met
    /// while measuring are left unmeasured.
    fn struct_slots(&mut self, def: &StructDefinition) -> StorageResult<Option<u64>> {
        if self.sizing {
            return Ok(None);
        }
        self.sizing = true;
        let members = self.struct_members(def);
        self.sizing = false;
        Ok(Some(packing(&members?).slots.max(1)))
    }

    fn member(&mut self, member: &VariableDeclaration) -> StorageResult<StorageSlot> {
        let type_name = member
            .type_name
            .as_ref()
            .ok_or_else(|| self.unknown(&member.name, "missing type name"))?;
        Ok(self.resolve(&member.name, type_name)?.named(member.name.clone()))
    }

    fn resolve(&mut self, variable: &str, type_name: &TypeName) -> StorageResult<StorageSlot> {
        match type_name {
            TypeName::ElementaryTypeName(elementary) => {
                let ty = ElementaryType::parse(&elementary.name)
                    .ok_or_else(|| self.unknown(variable, elementary.name.clone()))?;
                Ok(StorageSlot::Builtin(BuiltinValue::new(ty)))
            }
            TypeName::FunctionTypeName(function) => {
                let ty = ElementaryType::Function {
                    external: function.visibility == "external",
                };
                Ok(StorageSlot::Builtin(BuiltinValue::new(ty)))
            }
            TypeName::Mapping(mapping) => {
                let key = match self.resolve(variable, &mapping.key_type)? {
                    StorageSlot::Builtin(key)
                        if key.elementary_type().is_some_and(|ty| ty.is_value_type()) =>
                    {
                        key
                    }
                    StorageSlot::Enum(key) => {
                        BuiltinValue::new(ElementaryType::Uint(u16::from(key.size()) * 8))
                    }
                    other => {
                        return Err(StorageError::InvalidMappingKey {
                            source_unit: self.source_unit.to_string(),
                            variable: variable.to_string(),
                            key: other.type_label(),
                        });
                    }
                };
                let value = self.resolve(variable, &mapping.value_type)?;
                Ok(StorageSlot::Mapping(MappingSlot {
                    name: None,
                    key,
                    value: Box::new(value),
                }))
            }
            TypeName::ArrayTypeName(array) => {
                let value = self.resolve(variable, &array.base_type)?;
                let length = array
                    .length
                    .as_ref()
                    .map(|length| {
                        self.array_length(length)
                            .ok_or_else(|| self.unknown(variable, "non-constant array length"))
                    })
                    .transpose()?;
                Ok(StorageSlot::Array(ArraySlot {
                    name: None,
                    value: Box::new(value),
                    length,
                }))
            }
            TypeName::UserDefinedTypeName(user) => {
                match self.index.get(user.referenced_declaration) {
                    Some(Declaration::Struct(def)) if self.stack.contains(&def.id) => {
                        trace!(name = %def.name, "Self-referencing struct");
                        Ok(StorageSlot::Struct(StructSlot {
                            struct_name: def.name.clone(),
                            name: None,
                            members: vec![],
                            slots: self.struct_slots(def)?,
                        }))
                    }
                    Some(Declaration::Struct(def)) => Ok(StorageSlot::Struct(StructSlot {
                        struct_name: def.name.clone(),
                        name: None,
                        members: self.struct_members(def)?,
                        slots: None,
                    })),
                    Some(Declaration::Enum(def)) => Ok(StorageSlot::Enum(EnumSlot {
                        enum_name: def.name.clone(),
                        name: None,
                        members: def.members.iter().map(|m| m.name.clone()).collect(),
                    })),
                    Some(Declaration::Contract) => {
                        Ok(StorageSlot::Builtin(BuiltinValue::new(ElementaryType::Address)))
                    }
                    Some(Declaration::ValueType(def)) => self.resolve(variable, &def.underlying_type),
                    Some(Declaration::Constant(_)) | None => {
                        Err(self.unknown(variable, user.display_name()))
                    }
                }
            }
        }
    }

    fn array_length(&self, length: &Expression) -> Option<u64> {
        match length {
            Expression::Literal(literal) if literal.kind == LiteralKind::Number => {
                parse_integer(literal.value.as_deref()?)
            }
            Expression::Identifier(identifier) => {
                match self.index.get(identifier.referenced_declaration?)? {
                    Declaration::Constant(constant) => self.array_length(constant.value.as_ref()?),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn parse_integer(value: &str) -> Option<u64> {
    let value = value.replace('_', "");
    match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Extracts the struct layouts of every selected contract and library.
///
/// Interfaces are skipped, as are contracts declaring no structs. Layouts
/// follow source unit order, structs and members their declaration order.
///
/// # Errors
///
/// * [`StorageError::UnknownTypeReference`] if a member type refers to a
///   declaration outside of `units`.
/// * [`StorageError::InvalidMappingKey`] if a mapping is keyed by a non value
///   type.
pub fn extract_layouts(
    units: &[SourceUnit],
    selection: &StorageSelection,
) -> StorageResult<StorageDump> {
    let index = DeclarationIndex::new(units);
    debug!(units = units.len(), declarations = index.len(), "Indexed declarations");

    let mut dump = StorageDump::new();
    for unit in units {
        let mut resolver = Resolver::new(&index, &unit.absolute_path);
        for contract in unit.contracts() {
            if contract.contract_kind == ContractKind::Interface
                || !selection.matches(&unit.absolute_path, &contract.name)
            {
                continue;
            }
            let structs = contract
                .structs()
                .map(|def| resolver.struct_layout(def))
                .collect::<StorageResult<Vec<_>>>()?;
            if structs.is_empty() {
                continue;
            }

            let kind = match contract.contract_kind {
                ContractKind::Library => LayoutKind::Library,
                _ => LayoutKind::Contract,
            };
            debug!(
                source = %unit.absolute_path,
                contract = %contract.name,
                %kind,
                structs = structs.len(),
                "Extracted storage layout"
            );
            dump.insert(StorageLayout::new(kind, contract.name.clone(), structs));
        }
    }
    Ok(dump)
}
