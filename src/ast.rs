//! Typed subset of the solc compact JSON AST.
//!
//! Only the node kinds storage analysis looks into are modelled, every other
//! node deserializes into the `Other` variant of its enclosing enum and is
//! skipped.

use serde::Deserialize;

/// Identifier of an AST node, unique within one compilation.
pub type NodeId = i64;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUnit {
    pub absolute_path: String,
    #[serde(default)]
    pub nodes: Vec<SourceUnitPart>,
}

impl SourceUnit {
    pub fn contracts(&self) -> impl Iterator<Item = &ContractDefinition> {
        self.nodes.iter().filter_map(|node| match node {
            SourceUnitPart::ContractDefinition(contract) => Some(contract),
            _ => None,
        })
    }

    /// File-level functions.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.nodes.iter().filter_map(|node| match node {
            SourceUnitPart::FunctionDefinition(def) => Some(def),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum SourceUnitPart {
    ContractDefinition(ContractDefinition),
    FunctionDefinition(FunctionDefinition),
    StructDefinition(StructDefinition),
    EnumDefinition(EnumDefinition),
    UserDefinedValueTypeDefinition(UserDefinedValueTypeDefinition),
    VariableDeclaration(VariableDeclaration),
    #[serde(other)]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Contract,
    Interface,
    Library,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDefinition {
    pub id: NodeId,
    pub name: String,
    pub contract_kind: ContractKind,
    #[serde(default)]
    pub nodes: Vec<ContractPart>,
}

impl ContractDefinition {
    pub fn structs(&self) -> impl Iterator<Item = &StructDefinition> {
        self.nodes.iter().filter_map(|node| match node {
            ContractPart::StructDefinition(def) => Some(def),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.nodes.iter().filter_map(|node| match node {
            ContractPart::FunctionDefinition(def) => Some(def),
            _ => None,
        })
    }

    pub fn modifiers(&self) -> impl Iterator<Item = &ModifierDefinition> {
        self.nodes.iter().filter_map(|node| match node {
            ContractPart::ModifierDefinition(def) => Some(def),
            _ => None,
        })
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableDeclaration> {
        self.nodes.iter().filter_map(|node| match node {
            ContractPart::VariableDeclaration(def) => Some(def),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum ContractPart {
    StructDefinition(StructDefinition),
    EnumDefinition(EnumDefinition),
    UserDefinedValueTypeDefinition(UserDefinedValueTypeDefinition),
    VariableDeclaration(VariableDeclaration),
    FunctionDefinition(FunctionDefinition),
    ModifierDefinition(ModifierDefinition),
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructDefinition {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<VariableDeclaration>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumDefinition {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<EnumMember>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EnumMember {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinedValueTypeDefinition {
    pub id: NodeId,
    pub name: String,
    pub underlying_type: TypeName,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDeclaration {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub type_name: Option<TypeName>,
    #[serde(default)]
    pub constant: bool,
    #[serde(default)]
    pub value: Option<Expression>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub body: Option<Block>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModifierDefinition {
    pub name: String,
    #[serde(default)]
    pub body: Option<Block>,
}

// ---------------------------------------------------------------------------
// Type names
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum TypeName {
    ElementaryTypeName(ElementaryTypeName),
    Mapping(Mapping),
    ArrayTypeName(ArrayTypeName),
    UserDefinedTypeName(UserDefinedTypeName),
    FunctionTypeName(FunctionTypeName),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ElementaryTypeName {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub key_type: Box<TypeName>,
    pub value_type: Box<TypeName>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayTypeName {
    pub base_type: Box<TypeName>,
    #[serde(default)]
    pub length: Option<Expression>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinedTypeName {
    pub referenced_declaration: NodeId,
    #[serde(default)]
    pub path_node: Option<IdentifierPath>,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserDefinedTypeName {
    /// Name as written in the source.
    pub fn display_name(&self) -> String {
        self.path_node
            .as_ref()
            .map(|path| path.name.clone())
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("#{}", self.referenced_declaration))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct IdentifierPath {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FunctionTypeName {
    pub visibility: String,
}

// ---------------------------------------------------------------------------
// Statements and expressions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub statements: Vec<Statement>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum Statement {
    Block(Block),
    UncheckedBlock(Block),
    VariableDeclarationStatement(VariableDeclarationStatement),
    InlineAssembly(InlineAssembly),
    IfStatement(IfStatement),
    ForStatement(ForStatement),
    WhileStatement(LoopStatement),
    DoWhileStatement(LoopStatement),
    TryStatement(TryStatement),
    #[serde(other)]
    Other,
}

impl Statement {
    /// Statements directly nested in this one, in source order.
    pub fn children(&self) -> Vec<&Statement> {
        match self {
            Self::Block(block) | Self::UncheckedBlock(block) => block.statements.iter().collect(),
            Self::IfStatement(branch) => std::iter::once(&*branch.true_body)
                .chain(branch.false_body.as_deref())
                .collect(),
            Self::ForStatement(for_loop) => for_loop
                .initialization_expression
                .as_deref()
                .into_iter()
                .chain(std::iter::once(&*for_loop.body))
                .collect(),
            Self::WhileStatement(body) | Self::DoWhileStatement(body) => vec![&*body.body],
            Self::TryStatement(statement) => statement
                .clauses
                .iter()
                .flat_map(|clause| &clause.block.statements)
                .collect(),
            Self::VariableDeclarationStatement(_) | Self::InlineAssembly(_) | Self::Other => vec![],
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDeclarationStatement {
    #[serde(default)]
    pub declarations: Vec<Option<VariableDeclaration>>,
    #[serde(default)]
    pub initial_value: Option<Expression>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfStatement {
    pub true_body: Box<Statement>,
    #[serde(default)]
    pub false_body: Option<Box<Statement>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForStatement {
    #[serde(default)]
    pub initialization_expression: Option<Box<Statement>>,
    pub body: Box<Statement>,
}

/// Body of a `while` or `do ... while` loop.
#[derive(Clone, Debug, Deserialize)]
pub struct LoopStatement {
    pub body: Box<Statement>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TryStatement {
    #[serde(default)]
    pub clauses: Vec<TryCatchClause>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TryCatchClause {
    pub block: Block,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InlineAssembly {
    #[serde(rename = "AST")]
    pub ast: YulBlock,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LiteralKind {
    Number,
    String,
    HexString,
    UnicodeString,
    Bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum Expression {
    Literal(Literal),
    Identifier(Identifier),
    FunctionCall(FunctionCall),
    MemberAccess(MemberAccess),
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Literal {
    pub kind: LiteralKind,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub hex_value: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub name: String,
    #[serde(default)]
    pub referenced_declaration: Option<NodeId>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FunctionCall {
    pub expression: Box<Expression>,
    #[serde(default)]
    pub arguments: Vec<Expression>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAccess {
    pub expression: Box<Expression>,
    pub member_name: String,
}

// ---------------------------------------------------------------------------
// Yul
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
pub struct YulBlock {
    #[serde(default)]
    pub statements: Vec<YulStatement>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum YulStatement {
    YulAssignment(YulAssignment),
    YulVariableDeclaration(YulVariableDeclaration),
    YulBlock(YulBlock),
    YulIf(YulIf),
    YulSwitch(YulSwitch),
    YulForLoop(YulForLoop),
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YulAssignment {
    pub variable_names: Vec<YulIdentifier>,
    #[serde(default)]
    pub value: Option<YulExpression>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct YulVariableDeclaration {
    pub variables: Vec<YulTypedName>,
    #[serde(default)]
    pub value: Option<YulExpression>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct YulIf {
    pub body: YulBlock,
}

#[derive(Clone, Debug, Deserialize)]
pub struct YulSwitch {
    #[serde(default)]
    pub cases: Vec<YulCase>,
}

/// `case` or `default` branch of a switch.
#[derive(Clone, Debug, Deserialize)]
pub struct YulCase {
    pub body: YulBlock,
}

/// Variables declared in `pre` are visible in `body` and `post`.
#[derive(Clone, Debug, Deserialize)]
pub struct YulForLoop {
    pub pre: YulBlock,
    pub body: YulBlock,
    pub post: YulBlock,
}

#[derive(Clone, Debug, Deserialize)]
pub struct YulTypedName {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "nodeType")]
pub enum YulExpression {
    YulLiteral(YulLiteral),
    YulIdentifier(YulIdentifier),
    YulFunctionCall(YulFunctionCall),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YulLiteral {
    pub kind: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub hex_value: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct YulIdentifier {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YulFunctionCall {
    pub function_name: YulIdentifier,
    #[serde(default)]
    pub arguments: Vec<YulExpression>,
}
