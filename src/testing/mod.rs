//! Fixture builders for module ABIs and compiler ASTs.
//!
//! [`function_fragment`] and [`module`] build router inputs without a
//! compiler run, [`AstBuilder`] produces [`SourceUnit`]s shaped like the
//! compact AST emitted by solc, ready for storage extraction and slot
//! verification.
//!

use std::collections::HashMap;

use alloy::primitives::{Address, hex};
use serde_json::{Value, json};

use crate::{
    ast::SourceUnit,
    storage::ElementaryType,
    types::{ContractData, RawAbi},
};

/// ABI fragment of a non-payable function taking unnamed `inputs`.
pub fn function_fragment(name: &str, inputs: &[&str]) -> Value {
    let inputs = inputs
        .iter()
        .map(|ty| json!({ "name": "", "type": ty, "internalType": ty }))
        .collect::<Vec<_>>();
    json!({
        "type": "function",
        "name": name,
        "inputs": inputs,
        "outputs": [],
        "stateMutability": "nonpayable",
    })
}

/// Module exposing one function per `(name, inputs)` pair.
pub fn module(name: &str, address: Address, functions: &[(&str, &[&str])]) -> ContractData {
    let abi: RawAbi = functions
        .iter()
        .map(|(function, inputs)| function_fragment(function, inputs))
        .collect();
    ContractData::new(name, address, abi)
}

/// Slot assigned by a function built with [`AstBuilder::slot_function`], or
/// value of a constant built with [`AstBuilder::constant`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotInit {
    /// `assembly { store.slot := <literal> }`
    YulLiteral(String),
    /// `assembly { let s := <literal> store.slot := s }`
    YulLet(String),
    /// `bytes32 s = <literal>;`
    Literal(String),
    /// `bytes32 s = keccak256("<id>");`
    Keccak(String),
    /// `bytes32 s = keccak256(abi.encode("<seed>", id));`
    EncodedSeed(String),
    /// `bytes32 s = keccak256("<bytes>");` over bytes that may not be UTF-8,
    /// emitted the way solc does: `hexValue` only.
    KeccakBytes(Vec<u8>),
    /// `assembly { store.slot := <NAME> }` with `NAME` declared through
    /// [`AstBuilder::constant`].
    Constant(String),
    /// `bytes32 s = <function>();`
    Call(String),
}

/// Statement wrapping the slot assignment of
/// [`AstBuilder::nested_slot_function`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nesting {
    /// `for (bytes32 s = ...; ; ) { assembly { ... } }`
    ForLoop,
    /// `while (true) { ... }`
    WhileLoop,
    /// `do { ... } while (true);`
    DoWhileLoop,
    /// `try this.f() {} catch { ... }`
    TryCatch,
    /// `assembly { switch x case 0 {} default { ... } }`
    YulSwitch,
    /// `assembly { for { let s := ... } 1 {} { ... } }`
    YulForLoop,
}

#[derive(Clone, Debug)]
enum Item {
    Struct(String, Vec<(String, String)>),
    Enum(String, Vec<String>),
    ValueType(String, String),
    Constant(String, SlotInit),
    SlotFunction(String, SlotInit, Option<Nesting>),
    Modifier(String, SlotInit),
}

#[derive(Clone, Debug)]
struct FreeFunction {
    path: String,
    name: String,
    slot: SlotInit,
}

#[derive(Clone, Debug)]
struct ContractFixture {
    path: String,
    name: String,
    kind: &'static str,
    items: Vec<Item>,
}

/// Builder for solc compact AST fixtures.
///
/// Every contract goes into the source unit of its path, item methods add to
/// the contract declared last. Member types are written as in Solidity
/// (`uint256`, `mapping(address => Data)`, `Data[3]`), user defined types are
/// looked up by name across all the contracts.
///
/// # Example
///
/// ```ignore
/// use sol_router::testing::{AstBuilder, SlotInit};
///
/// let units = AstBuilder::new()
///     .library("src/storage/Account.sol", "Account")
///     .structure("Data", &[("uint128", "id"), ("mapping(address => uint256)", "balances")])
///     .slot_function("load", SlotInit::Keccak("io.protocol.Account".into()))
///     .build();
/// ```
#[derive(Clone, Debug, Default)]
pub struct AstBuilder {
    contracts: Vec<ContractFixture>,
    free_functions: Vec<FreeFunction>,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a library in the source unit at `path`.
    pub fn library(self, path: &str, name: &str) -> Self {
        self.declare(path, name, "library")
    }

    /// Declare a contract in the source unit at `path`.
    pub fn contract(self, path: &str, name: &str) -> Self {
        self.declare(path, name, "contract")
    }

    /// Declare an interface in the source unit at `path`.
    pub fn interface(self, path: &str, name: &str) -> Self {
        self.declare(path, name, "interface")
    }

    fn declare(mut self, path: &str, name: &str, kind: &'static str) -> Self {
        self.contracts.push(ContractFixture {
            path: path.to_string(),
            name: name.to_string(),
            kind,
            items: vec![],
        });
        self
    }

    fn push(mut self, item: Item) -> Self {
        self.contracts
            .last_mut()
            .expect("declare a contract before its items")
            .items
            .push(item);
        self
    }

    /// Add a struct with `(type, name)` members.
    pub fn structure(self, name: &str, members: &[(&str, &str)]) -> Self {
        let members = members
            .iter()
            .map(|(ty, member)| (ty.to_string(), member.to_string()))
            .collect();
        self.push(Item::Struct(name.to_string(), members))
    }

    /// Add an enum.
    pub fn enumeration(self, name: &str, members: &[&str]) -> Self {
        let members = members.iter().map(|m| m.to_string()).collect();
        self.push(Item::Enum(name.to_string(), members))
    }

    /// Add a user defined value type, e.g. `type Price is uint128`.
    pub fn value_type(self, name: &str, underlying: &str) -> Self {
        self.push(Item::ValueType(name.to_string(), underlying.to_string()))
    }

    /// Add a `bytes32 constant`.
    pub fn constant(self, name: &str, value: SlotInit) -> Self {
        self.push(Item::Constant(name.to_string(), value))
    }

    /// Add a function assigning the slot of a storage pointer named `store`.
    pub fn slot_function(self, name: &str, slot: SlotInit) -> Self {
        self.push(Item::SlotFunction(name.to_string(), slot, None))
    }

    /// Same as [`Self::slot_function`], with the assignment nested in a loop,
    /// a catch clause or a Yul construct.
    pub fn nested_slot_function(self, name: &str, slot: SlotInit, nesting: Nesting) -> Self {
        self.push(Item::SlotFunction(name.to_string(), slot, Some(nesting)))
    }

    /// Add a modifier assigning the slot of a storage pointer named `store`.
    pub fn modifier(self, name: &str, slot: SlotInit) -> Self {
        self.push(Item::Modifier(name.to_string(), slot))
    }

    /// Add a file-level function assigning the slot of a storage pointer
    /// named `store` to the source unit at `path`.
    pub fn free_function(mut self, path: &str, name: &str, slot: SlotInit) -> Self {
        self.free_functions.push(FreeFunction {
            path: path.to_string(),
            name: name.to_string(),
            slot,
        });
        self
    }

    /// Build the source units, in order of first declaration of their paths.
    pub fn build(self) -> Vec<SourceUnit> {
        self.build_json()
            .into_iter()
            .map(|unit| serde_json::from_value(unit).expect("fixture is a valid source unit"))
            .collect()
    }

    /// Build the source units as compiler JSON, e.g. to embed them in
    /// artifact files.
    pub fn build_json(self) -> Vec<Value> {
        let mut ids = IdAllocator::default();
        for contract in &self.contracts {
            ids.declare(&contract.name);
            for item in &contract.items {
                match item {
                    Item::Struct(name, _)
                    | Item::Enum(name, _)
                    | Item::ValueType(name, _)
                    | Item::Constant(name, _) => ids.declare(name),
                    Item::SlotFunction(..) | Item::Modifier(..) => {}
                }
            }
        }

        let mut units: Vec<(String, Vec<Value>)> = Vec::new();
        let mut add = |path: &str, node: Value| match units.iter_mut().find(|(p, _)| p == path) {
            Some((_, nodes)) => nodes.push(node),
            None => units.push((path.to_string(), vec![node])),
        };
        for contract in &self.contracts {
            add(&contract.path, ids.contract(contract));
        }
        for function in &self.free_functions {
            add(
                &function.path,
                ids.routine("FunctionDefinition", &function.name, &function.slot, None),
            );
        }

        units
            .into_iter()
            .map(|(path, nodes)| {
                json!({
                    "nodeType": "SourceUnit",
                    "absolutePath": path,
                    "nodes": nodes,
                })
            })
            .collect()
    }
}

/// Hands out node ids, remembering those of named declarations.
#[derive(Debug, Default)]
struct IdAllocator {
    last: i64,
    declared: HashMap<String, i64>,
}

impl IdAllocator {
    fn next(&mut self) -> i64 {
        self.last += 1;
        self.last
    }

    fn declare(&mut self, name: &str) {
        let id = self.next();
        self.declared.entry(name.to_string()).or_insert(id);
    }

    /// Id of a declared name, or of nothing at all.
    fn reference(&mut self, name: &str) -> i64 {
        match self.declared.get(name) {
            Some(id) => *id,
            None => -self.next(),
        }
    }

    fn contract(&mut self, contract: &ContractFixture) -> Value {
        let id = self.reference(&contract.name);
        let nodes = contract
            .items
            .iter()
            .map(|item| self.item(item))
            .collect::<Vec<_>>();
        json!({
            "nodeType": "ContractDefinition",
            "id": id,
            "name": contract.name,
            "contractKind": contract.kind,
            "abstract": false,
            "nodes": nodes,
        })
    }

    fn item(&mut self, item: &Item) -> Value {
        match item {
            Item::Struct(name, members) => {
                let id = self.reference(name);
                let members = members
                    .iter()
                    .map(|(ty, member)| self.variable(member, ty))
                    .collect::<Vec<_>>();
                json!({
                    "nodeType": "StructDefinition",
                    "id": id,
                    "name": name,
                    "members": members,
                })
            }
            Item::Enum(name, members) => {
                let id = self.reference(name);
                let members = members
                    .iter()
                    .map(|member| json!({ "nodeType": "EnumValue", "id": self.next(), "name": member }))
                    .collect::<Vec<_>>();
                json!({
                    "nodeType": "EnumDefinition",
                    "id": id,
                    "name": name,
                    "members": members,
                })
            }
            Item::ValueType(name, underlying) => json!({
                "nodeType": "UserDefinedValueTypeDefinition",
                "id": self.reference(name),
                "name": name,
                "underlyingType": self.type_name(underlying),
            }),
            Item::Constant(name, value) => json!({
                "nodeType": "VariableDeclaration",
                "id": self.reference(name),
                "name": name,
                "constant": true,
                "stateVariable": true,
                "typeName": self.type_name("bytes32"),
                "value": self.expression(value),
            }),
            Item::SlotFunction(name, slot, nesting) => {
                self.routine("FunctionDefinition", name, slot, *nesting)
            }
            Item::Modifier(name, slot) => self.routine("ModifierDefinition", name, slot, None),
        }
    }

    fn routine(
        &mut self,
        node_type: &str,
        name: &str,
        slot: &SlotInit,
        nesting: Option<Nesting>,
    ) -> Value {
        let id = self.next();
        let statements = self.slot_statements(slot, nesting);
        json!({
            "nodeType": node_type,
            "id": id,
            "name": name,
            "body": self.block(statements),
        })
    }

    fn block(&mut self, statements: Vec<Value>) -> Value {
        json!({ "nodeType": "Block", "id": self.next(), "statements": statements })
    }

    fn variable(&mut self, name: &str, ty: &str) -> Value {
        json!({
            "nodeType": "VariableDeclaration",
            "id": self.next(),
            "name": name,
            "constant": false,
            "stateVariable": false,
            "typeName": self.type_name(ty),
        })
    }

    fn type_name(&mut self, ty: &str) -> Value {
        let ty = ty.trim();
        let id = self.next();
        if let Some(inner) = ty.strip_prefix("mapping(").and_then(|t| t.strip_suffix(')')) {
            let (key, value) = inner.split_once("=>").expect("mapping fixture has a =>");
            return json!({
                "nodeType": "Mapping",
                "id": id,
                "keyType": self.type_name(key),
                "valueType": self.type_name(value),
            });
        }
        if let Some(base) = ty.strip_suffix(']') {
            let (base, length) = base.rsplit_once('[').expect("array fixture has a [");
            let length = (!length.is_empty()).then(|| {
                json!({ "nodeType": "Literal", "id": self.next(), "kind": "number", "value": length })
            });
            return json!({
                "nodeType": "ArrayTypeName",
                "id": id,
                "baseType": self.type_name(base),
                "length": length,
            });
        }
        if let Some(visibility) = ty.strip_prefix("function") {
            let visibility = match visibility.trim() {
                "" => "internal",
                visibility => visibility,
            };
            return json!({ "nodeType": "FunctionTypeName", "id": id, "visibility": visibility });
        }
        if ElementaryType::parse(ty).is_some() {
            return json!({ "nodeType": "ElementaryTypeName", "id": id, "name": ty });
        }
        json!({
            "nodeType": "UserDefinedTypeName",
            "id": id,
            "referencedDeclaration": self.reference(ty),
            "pathNode": { "nodeType": "IdentifierPath", "id": self.next(), "name": ty },
        })
    }

    fn literal(&mut self, kind: &str, value: &str) -> Value {
        json!({ "nodeType": "Literal", "id": self.next(), "kind": kind, "value": value })
    }

    fn identifier(&mut self, name: &str) -> Value {
        let referenced = self.declared.get(name).copied();
        json!({
            "nodeType": "Identifier",
            "id": self.next(),
            "name": name,
            "referencedDeclaration": referenced,
        })
    }

    fn call(&mut self, callee: Value, arguments: Vec<Value>) -> Value {
        json!({
            "nodeType": "FunctionCall",
            "id": self.next(),
            "expression": callee,
            "arguments": arguments,
        })
    }

    /// Solidity expression computing the slot.
    fn expression(&mut self, slot: &SlotInit) -> Value {
        match slot {
            SlotInit::YulLiteral(value) | SlotInit::YulLet(value) | SlotInit::Literal(value) => {
                self.literal("number", value)
            }
            SlotInit::Keccak(id) => {
                let keccak = self.identifier("keccak256");
                let id = self.literal("string", id);
                self.call(keccak, vec![id])
            }
            SlotInit::EncodedSeed(seed) => {
                let abi = self.identifier("abi");
                let encode = json!({
                    "nodeType": "MemberAccess",
                    "id": self.next(),
                    "expression": abi,
                    "memberName": "encode",
                });
                let seed = self.literal("string", seed);
                let id = self.identifier("id");
                let encoded = self.call(encode, vec![seed, id]);
                let keccak = self.identifier("keccak256");
                self.call(keccak, vec![encoded])
            }
            SlotInit::KeccakBytes(bytes) => {
                let keccak = self.identifier("keccak256");
                let literal = json!({
                    "nodeType": "Literal",
                    "id": self.next(),
                    "kind": "string",
                    "value": null,
                    "hexValue": hex::encode(bytes),
                });
                self.call(keccak, vec![literal])
            }
            SlotInit::Constant(name) => self.identifier(name),
            SlotInit::Call(function) => {
                let callee = self.identifier(function);
                self.call(callee, vec![])
            }
        }
    }

    /// Body assigning `store.slot`, wrapped as `nesting` asks.
    fn slot_statements(&mut self, slot: &SlotInit, nesting: Option<Nesting>) -> Vec<Value> {
        let (mut statements, yul) = self.slot_parts(slot);
        let yul = match nesting {
            Some(Nesting::YulSwitch) => vec![json!({
                "nodeType": "YulSwitch",
                "expression": { "nodeType": "YulIdentifier", "name": "x" },
                "cases": [
                    {
                        "nodeType": "YulCase",
                        "value": { "nodeType": "YulLiteral", "kind": "number", "value": "0" },
                        "body": { "nodeType": "YulBlock", "statements": [] },
                    },
                    {
                        "nodeType": "YulCase",
                        "value": "default",
                        "body": { "nodeType": "YulBlock", "statements": yul },
                    },
                ],
            })],
            Some(Nesting::YulForLoop) => {
                let (pre, body): (Vec<_>, Vec<_>) = yul
                    .into_iter()
                    .partition(|statement| statement["nodeType"] == "YulVariableDeclaration");
                vec![json!({
                    "nodeType": "YulForLoop",
                    "pre": { "nodeType": "YulBlock", "statements": pre },
                    "condition": { "nodeType": "YulLiteral", "kind": "number", "value": "1" },
                    "post": { "nodeType": "YulBlock", "statements": [] },
                    "body": { "nodeType": "YulBlock", "statements": body },
                })]
            }
            _ => yul,
        };
        statements.push(json!({
            "nodeType": "InlineAssembly",
            "id": self.next(),
            "AST": { "nodeType": "YulBlock", "statements": yul },
            "externalReferences": [],
        }));

        let condition = self.literal("bool", "true");
        let wrapped = match nesting {
            Some(Nesting::ForLoop) => {
                let initialization = (statements.len() > 1).then(|| statements.remove(0));
                json!({
                    "nodeType": "ForStatement",
                    "id": self.next(),
                    "initializationExpression": initialization,
                    "body": self.block(statements),
                })
            }
            Some(Nesting::WhileLoop) => json!({
                "nodeType": "WhileStatement",
                "id": self.next(),
                "condition": condition,
                "body": self.block(statements),
            }),
            Some(Nesting::DoWhileLoop) => json!({
                "nodeType": "DoWhileStatement",
                "id": self.next(),
                "condition": condition,
                "body": self.block(statements),
            }),
            Some(Nesting::TryCatch) => json!({
                "nodeType": "TryStatement",
                "id": self.next(),
                "externalCall": self.identifier("f"),
                "clauses": [
                    {
                        "nodeType": "TryCatchClause",
                        "id": self.next(),
                        "errorName": "",
                        "block": self.block(vec![]),
                    },
                    {
                        "nodeType": "TryCatchClause",
                        "id": self.next(),
                        "errorName": "",
                        "block": self.block(statements),
                    },
                ],
            }),
            Some(Nesting::YulSwitch | Nesting::YulForLoop) | None => return statements,
        };
        vec![wrapped]
    }

    /// Solidity statements declaring the slot, and the Yul statements
    /// assigning it.
    fn slot_parts(&mut self, slot: &SlotInit) -> (Vec<Value>, Vec<Value>) {
        let assign = |value: Value| {
            json!({
                "nodeType": "YulAssignment",
                "variableNames": [{ "nodeType": "YulIdentifier", "name": "store.slot" }],
                "value": value,
            })
        };
        let yul_literal =
            |value: &str| json!({ "nodeType": "YulLiteral", "kind": "number", "value": value });
        let yul_identifier = |name: &str| json!({ "nodeType": "YulIdentifier", "name": name });

        match slot {
            SlotInit::YulLiteral(value) => (vec![], vec![assign(yul_literal(value))]),
            SlotInit::YulLet(value) => (
                vec![],
                vec![
                    json!({
                        "nodeType": "YulVariableDeclaration",
                        "variables": [{ "nodeType": "YulTypedName", "name": "s", "type": "" }],
                        "value": yul_literal(value),
                    }),
                    assign(yul_identifier("s")),
                ],
            ),
            SlotInit::Constant(name) => (vec![], vec![assign(yul_identifier(name))]),
            SlotInit::Literal(_)
            | SlotInit::Keccak(_)
            | SlotInit::EncodedSeed(_)
            | SlotInit::KeccakBytes(_)
            | SlotInit::Call(_) => {
                let declaration = self.variable("s", "bytes32");
                let statement = json!({
                    "nodeType": "VariableDeclarationStatement",
                    "id": self.next(),
                    "declarations": [declaration],
                    "initialValue": self.expression(slot),
                });
                (vec![statement], vec![assign(yul_identifier("s"))])
            }
        }
    }
}
