//! Static verification of namespaced storage slots.
//!
//! Modules keep their state in structs anchored at a fixed slot, assigned in
//! inline assembly:
//!
//! ```solidity
//! function load() internal pure returns (Data storage store) {
//!     bytes32 s = keccak256(abi.encode("io.protocol.Account"));
//!     assembly { store.slot := s }
//! }
//! ```
//!
//! Two namespaces of different contracts anchored at the same slot silently
//! overwrite each other, so every slot value must be statically known and
//! unique across contracts.

use std::{collections::HashMap, fmt};

use alloy::primitives::{B256, U256, hex, keccak256};
use itertools::Itertools;
use tracing::{info, trace, warn};

use super::{Declaration, DeclarationIndex, StorageError, StorageResult, StorageSelection};
use crate::{
    ast::{
        Block, ContractDefinition, Expression, FunctionCall, Literal, LiteralKind, SourceUnit,
        SourceUnitPart, Statement, YulBlock, YulExpression, YulStatement,
    },
    error::{Error, Result},
};

/// Assignments are followed through at most this many variables.
const MAX_RESOLUTION_DEPTH: usize = 16;

/// Suffix of the Yul identifier setting the slot of a storage pointer.
const SLOT_SUFFIX: &str = ".slot";

/// Statically known identity of a storage slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotValue {
    /// Slot number, either written out or the hash of a string literal.
    Word(B256),
    /// Slot derived from `keccak256(abi.encode("<seed>", ...))`, identified
    /// by its seed.
    Seed(String),
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(word) => f.write_str(&hex::encode_prefixed(word)),
            Self::Seed(seed) => write!(f, "keccak256(abi.encode({seed:?}, ...))"),
        }
    }
}

/// Assignment of a storage pointer slot inside a function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotAssignment {
    source_unit: String,
    contract: String,
    function: String,
    target: String,
    slot: SlotValue,
}

impl SlotAssignment {
    pub fn new(
        source_unit: impl Into<String>,
        contract: impl Into<String>,
        function: impl Into<String>,
        target: impl Into<String>,
        slot: SlotValue,
    ) -> Self {
        Self {
            source_unit: source_unit.into(),
            contract: contract.into(),
            function: function.into(),
            target: target.into(),
            slot,
        }
    }

    pub fn source_unit(&self) -> &str {
        &self.source_unit
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Storage pointer variable the slot is assigned to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn slot(&self) -> &SlotValue {
        &self.slot
    }
}

impl fmt::Display for SlotAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}() in {}", self.contract, self.function, self.source_unit)
    }
}

/// Duplicate slot definition: one slot anchoring namespaces of more than one
/// contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotCollision {
    slot: SlotValue,
    assignments: Vec<SlotAssignment>,
}

impl SlotCollision {
    pub fn slot(&self) -> &SlotValue {
        &self.slot
    }

    /// Every assignment of the slot, in input order.
    pub fn assignments(&self) -> &[SlotAssignment] {
        &self.assignments
    }

    pub fn contract_names(&self) -> Vec<&str> {
        self.assignments
            .iter()
            .map(SlotAssignment::contract)
            .unique()
            .collect()
    }
}

impl fmt::Display for SlotCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {} is assigned by {}",
            self.slot,
            self.assignments.iter().join(", ")
        )
    }
}

/// Collects the slot assignments of every function and modifier of the
/// selected contracts, and of the free functions of the selected files.
///
/// Free functions are attributed to their file, so two files anchoring the
/// same slot collide like two contracts would.
///
/// # Errors
///
/// [`StorageError::UnverifiableSlotAssignment`] if a slot is assigned from
/// anything but a literal, `keccak256("<literal>")` or
/// `keccak256(abi.encode("<seed>", ...))`, directly or through variables and
/// constants.
pub fn collect_slot_assignments(
    units: &[SourceUnit],
    selection: &StorageSelection,
) -> StorageResult<Vec<SlotAssignment>> {
    let index = DeclarationIndex::new(units);
    let mut assignments = Vec::new();
    for unit in units {
        for contract in unit.contracts() {
            if !selection.matches(&unit.absolute_path, &contract.name) {
                continue;
            }
            let routines = contract
                .functions()
                .map(|function| (function.name.as_str(), function.body.as_ref()))
                .chain(
                    contract
                        .modifiers()
                        .map(|modifier| (modifier.name.as_str(), modifier.body.as_ref())),
                );
            for (name, body) in routines {
                let Some(body) = body else {
                    continue;
                };
                FunctionScope::new(&index, unit, Some(contract), name)
                    .collect(body, &mut assignments)?;
            }
        }
        if !selection.matches_free_functions(&unit.absolute_path) {
            continue;
        }
        for function in unit.functions() {
            if let Some(body) = &function.body {
                FunctionScope::new(&index, unit, None, &function.name)
                    .collect(body, &mut assignments)?;
            }
        }
    }
    Ok(assignments)
}

/// Groups assignments by slot and reports every slot used by more than one
/// contract, in the order slots were first seen.
pub fn find_slot_collisions(assignments: &[SlotAssignment]) -> Vec<SlotCollision> {
    let mut groups = assignments
        .iter()
        .map(|a| (a.slot.clone(), a.clone()))
        .into_group_map();

    assignments
        .iter()
        .map(|a| &a.slot)
        .unique()
        .filter_map(|slot| {
            let assignments = groups.remove(slot)?;
            let contracts = assignments.iter().map(SlotAssignment::contract).unique().count();
            (contracts > 1).then(|| SlotCollision {
                slot: slot.clone(),
                assignments,
            })
        })
        .collect()
}

/// Verifies that namespaces of different contracts never share a slot.
///
/// # Errors
///
/// * [`Error::Storage`] if a slot assignment cannot be verified.
/// * [`Error::SlotCollisions`] listing every collision found.
pub fn ensure_unique_slots(
    units: &[SourceUnit],
    selection: &StorageSelection,
) -> Result<Vec<SlotAssignment>> {
    let assignments = collect_slot_assignments(units, selection)?;
    let collisions = find_slot_collisions(&assignments);
    if !collisions.is_empty() {
        for collision in &collisions {
            warn!(%collision, "Duplicate slot definition");
        }
        return Err(Error::SlotCollisions(collisions));
    }
    info!(assignments = assignments.len(), "Verified namespace slots");
    Ok(assignments)
}

/// Names visible to the assembly blocks of a single function or modifier.
struct FunctionScope<'i, 'a> {
    index: &'i DeclarationIndex<'a>,
    unit: &'a SourceUnit,
    /// `None` for free functions.
    contract: Option<&'a ContractDefinition>,
    routine: &'a str,
    locals: HashMap<&'a str, &'a Expression>,
}

impl<'i, 'a> FunctionScope<'i, 'a> {
    fn new(
        index: &'i DeclarationIndex<'a>,
        unit: &'a SourceUnit,
        contract: Option<&'a ContractDefinition>,
        routine: &'a str,
    ) -> Self {
        Self {
            index,
            unit,
            contract,
            routine,
            locals: HashMap::new(),
        }
    }

    /// Contract the assignments are attributed to, the file for free functions.
    fn owner(&self) -> &'a str {
        match self.contract {
            Some(contract) => &contract.name,
            None => &self.unit.absolute_path,
        }
    }

    fn unverifiable(&self, reason: impl Into<String>) -> StorageError {
        StorageError::UnverifiableSlotAssignment {
            source_unit: self.unit.absolute_path.clone(),
            contract: self.owner().to_string(),
            function: self.routine.to_string(),
            reason: reason.into(),
        }
    }

    fn collect(&mut self, body: &'a Block, out: &mut Vec<SlotAssignment>) -> StorageResult<()> {
        for statement in &body.statements {
            self.collect_locals(statement);
        }
        for statement in &body.statements {
            self.walk(statement, out)?;
        }
        Ok(())
    }

    /// Records the initializers of single variable declarations, at any depth.
    fn collect_locals(&mut self, statement: &'a Statement) {
        if let Statement::VariableDeclarationStatement(declaration) = statement
            && let ([Some(variable)], Some(value)) = (
                declaration.declarations.as_slice(),
                &declaration.initial_value,
            )
        {
            self.locals.insert(variable.name.as_str(), value);
        }
        for child in statement.children() {
            self.collect_locals(child);
        }
    }

    fn walk(&self, statement: &'a Statement, out: &mut Vec<SlotAssignment>) -> StorageResult<()> {
        if let Statement::InlineAssembly(assembly) = statement {
            return self.walk_yul(&assembly.ast, &mut HashMap::new(), out);
        }
        for child in statement.children() {
            self.walk(child, out)?;
        }
        Ok(())
    }

    /// Walks `block`, leaving its variable declarations in `lets`.
    fn walk_yul(
        &self,
        block: &'a YulBlock,
        lets: &mut HashMap<&'a str, &'a YulExpression>,
        out: &mut Vec<SlotAssignment>,
    ) -> StorageResult<()> {
        for statement in &block.statements {
            match statement {
                YulStatement::YulVariableDeclaration(declaration) => {
                    if let ([variable], Some(value)) =
                        (declaration.variables.as_slice(), &declaration.value)
                    {
                        lets.insert(variable.name.as_str(), value);
                    }
                }
                YulStatement::YulAssignment(assignment) => {
                    for variable in &assignment.variable_names {
                        let Some(target) = variable.name.strip_suffix(SLOT_SUFFIX) else {
                            continue;
                        };
                        let value = assignment
                            .value
                            .as_ref()
                            .ok_or_else(|| self.unverifiable("slot assigned without a value"))?;
                        let slot = self.resolve_yul(value, lets, 0)?;
                        trace!(
                            contract = self.owner(),
                            function = self.routine,
                            target,
                            %slot,
                            "Slot assignment"
                        );
                        out.push(SlotAssignment::new(
                            self.unit.absolute_path.clone(),
                            self.owner(),
                            self.routine,
                            target,
                            slot,
                        ));
                    }
                }
                YulStatement::YulBlock(inner) => self.walk_yul(inner, &mut lets.clone(), out)?,
                YulStatement::YulIf(branch) => {
                    self.walk_yul(&branch.body, &mut lets.clone(), out)?
                }
                YulStatement::YulSwitch(switch) => {
                    for case in &switch.cases {
                        self.walk_yul(&case.body, &mut lets.clone(), out)?;
                    }
                }
                YulStatement::YulForLoop(for_loop) => {
                    let mut scope = lets.clone();
                    self.walk_yul(&for_loop.pre, &mut scope, out)?;
                    self.walk_yul(&for_loop.body, &mut scope.clone(), out)?;
                    self.walk_yul(&for_loop.post, &mut scope, out)?;
                }
                YulStatement::Other => {}
            }
        }
        Ok(())
    }

    fn resolve_yul(
        &self,
        value: &'a YulExpression,
        lets: &HashMap<&'a str, &'a YulExpression>,
        depth: usize,
    ) -> StorageResult<SlotValue> {
        if depth > MAX_RESOLUTION_DEPTH {
            return Err(self.unverifiable("too many indirections"));
        }
        match value {
            YulExpression::YulLiteral(literal) if literal.kind == "number" => {
                let value = literal.value.as_deref().unwrap_or_default();
                parse_word(value)
                    .map(SlotValue::Word)
                    .ok_or_else(|| self.unverifiable(format!("invalid number literal {value}")))
            }
            YulExpression::YulLiteral(literal) => {
                Err(self.unverifiable(format!("{} literal used as slot", literal.kind)))
            }
            YulExpression::YulIdentifier(identifier) => {
                let name = identifier.name.as_str();
                if let Some(value) = lets.get(name).copied() {
                    self.resolve_yul(value, lets, depth + 1)
                } else if let Some(value) = self.local_or_constant(name) {
                    self.resolve(value, depth + 1)
                } else {
                    Err(self.unverifiable(format!("unknown identifier {name}")))
                }
            }
            YulExpression::YulFunctionCall(call) => Err(self.unverifiable(format!(
                "slot computed by {}()",
                call.function_name.name
            ))),
        }
    }

    fn resolve(&self, value: &'a Expression, depth: usize) -> StorageResult<SlotValue> {
        if depth > MAX_RESOLUTION_DEPTH {
            return Err(self.unverifiable("too many indirections"));
        }
        match value {
            Expression::Literal(literal) if literal.kind == LiteralKind::Number => {
                let value = literal.value.as_deref().unwrap_or_default();
                parse_word(value)
                    .map(SlotValue::Word)
                    .ok_or_else(|| self.unverifiable(format!("invalid number literal {value}")))
            }
            Expression::Identifier(identifier) => {
                let constant = identifier
                    .referenced_declaration
                    .and_then(|id| self.index.get(id))
                    .and_then(|declaration| match declaration {
                        Declaration::Constant(constant) => constant.value.as_ref(),
                        _ => None,
                    });
                match constant.or_else(|| self.local_or_constant(&identifier.name)) {
                    Some(value) => self.resolve(value, depth + 1),
                    None => Err(self.unverifiable(format!("unknown identifier {}", identifier.name))),
                }
            }
            Expression::FunctionCall(call) if callee(call) == Some("keccak256") => {
                self.resolve_keccak(call)
            }
            Expression::FunctionCall(call) => Err(self.unverifiable(format!(
                "slot computed by {}()",
                callee(call).unwrap_or("an expression")
            ))),
            _ => Err(self.unverifiable("unsupported slot expression")),
        }
    }

    fn resolve_keccak(&self, call: &FunctionCall) -> StorageResult<SlotValue> {
        match call.arguments.as_slice() {
            [Expression::Literal(literal)] if is_string(literal) => literal_bytes(literal)
                .map(|bytes| SlotValue::Word(keccak256(bytes)))
                .ok_or_else(|| self.unverifiable("string literal without a value")),
            [Expression::FunctionCall(encode)] if is_abi_encode(encode) => {
                match encode.arguments.first() {
                    Some(Expression::Literal(seed)) if is_string(seed) => seed_identity(seed)
                        .map(SlotValue::Seed)
                        .ok_or_else(|| self.unverifiable("abi.encode seed without a value")),
                    _ => Err(self.unverifiable("abi.encode seed is not a string literal")),
                }
            }
            _ => Err(self.unverifiable("keccak256 over a non-literal value")),
        }
    }

    fn local_or_constant(&self, name: &str) -> Option<&'a Expression> {
        if let Some(value) = self.locals.get(name).copied() {
            return Some(value);
        }
        let contract_constant = self.contract.and_then(|contract| {
            contract
                .variables()
                .find(|variable| variable.constant && variable.name == name)
        });
        let file_constant = || {
            self.unit.nodes.iter().find_map(|node| match node {
                SourceUnitPart::VariableDeclaration(variable)
                    if variable.constant && variable.name == name =>
                {
                    Some(variable)
                }
                _ => None,
            })
        };
        contract_constant
            .or_else(file_constant)
            .and_then(|variable| variable.value.as_ref())
    }
}

fn callee(call: &FunctionCall) -> Option<&str> {
    match call.expression.as_ref() {
        Expression::Identifier(identifier) => Some(&identifier.name),
        Expression::MemberAccess(member) => Some(&member.member_name),
        _ => None,
    }
}

fn is_string(literal: &Literal) -> bool {
    matches!(
        literal.kind,
        LiteralKind::String | LiteralKind::HexString | LiteralKind::UnicodeString
    )
}

/// Bytes of a string literal. `value` is absent for literals that are not
/// valid UTF-8, `hexValue` always carries the exact bytes.
fn literal_bytes(literal: &Literal) -> Option<Vec<u8>> {
    match (&literal.hex_value, &literal.value) {
        (Some(hex_value), _) => hex::decode(hex_value).ok(),
        (None, Some(value)) => Some(value.as_bytes().to_vec()),
        (None, None) => None,
    }
}

/// Seeds read as text when they are valid UTF-8, as `hex"..."` otherwise.
fn seed_identity(literal: &Literal) -> Option<String> {
    let bytes = literal_bytes(literal)?;
    Some(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => format!("hex\"{}\"", hex::encode(err.into_bytes())),
    })
}

fn is_abi_encode(call: &FunctionCall) -> bool {
    match call.expression.as_ref() {
        Expression::MemberAccess(member) => {
            member.member_name == "encode"
                && matches!(member.expression.as_ref(), Expression::Identifier(abi) if abi.name == "abi")
        }
        _ => false,
    }
}

/// Parses a decimal or `0x` hex number literal into a storage word.
fn parse_word(value: &str) -> Option<B256> {
    let value = value.replace('_', "");
    let number = match value.strip_prefix("0x") {
        Some(digits) => U256::from_str_radix(digits, 16).ok()?,
        None => U256::from_str_radix(&value, 10).ok()?,
    };
    Some(B256::from(number.to_be_bytes::<32>()))
}
