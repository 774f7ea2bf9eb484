//! Narrow interface onto the host compiler's syntax tree.
//!
//! The transformer does not parse source text; the host compiler hands it a
//! tree and receives a rewritten tree back. This module defines exactly the
//! node kinds the transformer reads (the type algebra, declarations and
//! import/export plumbing) and the expression subset it needs to emit
//! (payload strings, arrays, zero-argument arrow thunks, `Object.assign`
//! wrappers and property assignments). Anything the host grammar has beyond
//! this surface is invisible here and falls through the walker's `any` rule.

use std::path::PathBuf;

/// Keyword types of the source language.
///
/// `Unknown`, `Object` and `Symbol` are representable so host trees round
/// through the rewriter, but the walker has no dedicated opcode for them and
/// lowers them through the fall-through rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Never,
    Any,
    Void,
    String,
    Number,
    Boolean,
    Bigint,
    Null,
    Undefined,
    Unknown,
    Object,
    Symbol,
}

/// A literal value usable both as a literal type and as an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// A possibly-qualified type name, e.g. `Box` or `ns.Box`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityName {
    Ident(String),
    /// Left-to-right segments of a qualified name.
    Qualified(Vec<String>),
}

impl EntityName {
    pub fn ident(name: impl Into<String>) -> Self {
        EntityName::Ident(name.into())
    }

    /// The name joined left-to-right with `_`, used for hoisted-binding
    /// mangling.
    pub fn joined(&self) -> String {
        match self {
            EntityName::Ident(name) => name.clone(),
            EntityName::Qualified(parts) => parts.join("_"),
        }
    }

    /// Renders the name as written in source (`a.b.c`).
    pub fn render(&self) -> String {
        match self {
            EntityName::Ident(name) => name.clone(),
            EntityName::Qualified(parts) => parts.join("."),
        }
    }
}

/// Presence of a mapped-type modifier token (`?` / `readonly`), including
/// the removing senses (`-?` / `-readonly`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappedModifier {
    #[default]
    None,
    Add,
    Remove,
}

/// A mapped type `{ [P in C](?|-?): V }`.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedType {
    pub parameter: String,
    pub constraint: Option<TypeNode>,
    pub value: Option<TypeNode>,
    pub optional: MappedModifier,
    pub readonly: MappedModifier,
}

/// A conditional type `C extends E ? A : B`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalType {
    pub check: TypeNode,
    pub extends: TypeNode,
    pub true_type: TypeNode,
    pub false_type: TypeNode,
}

/// Type syntax the walker understands.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeNode {
    Keyword(Keyword),
    /// A literal type: `"a"`, `3`, `true`.
    LiteralType(Literal),
    Array(Box<TypeNode>),
    /// Tuples have no dedicated encoding and take the fall-through rule.
    Tuple(Vec<TypeNode>),
    Union(Vec<TypeNode>),
    Intersection(Vec<TypeNode>),
    TypeLiteral(Vec<Member>),
    FunctionType {
        params: Vec<Param>,
        return_type: Option<Box<TypeNode>>,
    },
    Mapped(Box<MappedType>),
    Conditional(Box<ConditionalType>),
    Infer(String),
    /// Indexed access `T[K]`.
    IndexedAccess {
        object: Box<TypeNode>,
        index: Box<TypeNode>,
    },
    KeyOf(Box<TypeNode>),
    Reference {
        name: EntityName,
        args: Vec<TypeNode>,
    },
    Parenthesized(Box<TypeNode>),
}

impl TypeNode {
    pub fn reference(name: impl Into<String>) -> Self {
        TypeNode::Reference {
            name: EntityName::Ident(name.into()),
            args: Vec::new(),
        }
    }

    pub fn reference_with(name: impl Into<String>, args: Vec<TypeNode>) -> Self {
        TypeNode::Reference {
            name: EntityName::Ident(name.into()),
            args,
        }
    }

    pub fn array(element: TypeNode) -> Self {
        TypeNode::Array(Box::new(element))
    }

    pub fn keyof(target: TypeNode) -> Self {
        TypeNode::KeyOf(Box::new(target))
    }

    pub fn indexed(object: TypeNode, index: TypeNode) -> Self {
        TypeNode::IndexedAccess {
            object: Box::new(object),
            index: Box::new(index),
        }
    }

    pub fn string_literal(value: impl Into<String>) -> Self {
        TypeNode::LiteralType(Literal::Str(value.into()))
    }
}

/// Member visibility; `Public` is the source default and carries no opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

/// A function or method parameter.
///
/// Parameters without an identifier name (destructuring patterns) are
/// skipped by the walker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Param {
    pub name: Option<String>,
    pub ty: Option<TypeNode>,
    pub optional: bool,
    pub readonly: bool,
    pub visibility: Option<Visibility>,
    pub default: Option<Expr>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeNode) -> Self {
        Param {
            name: Some(name.into()),
            ty: Some(ty),
            ..Param::default()
        }
    }
}

/// Interface property signature.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySignature {
    pub name: String,
    pub ty: Option<TypeNode>,
    pub optional: bool,
    pub readonly: bool,
    pub doc: Option<String>,
}

impl PropertySignature {
    pub fn new(name: impl Into<String>, ty: TypeNode) -> Self {
        PropertySignature {
            name: name.into(),
            ty: Some(ty),
            optional: false,
            readonly: false,
            doc: None,
        }
    }
}

/// Interface method signature.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeNode>,
    pub optional: bool,
    pub doc: Option<String>,
}

/// Index signature `[key: K]: V`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSignature {
    pub key: Option<TypeNode>,
    pub value: TypeNode,
}

/// Class property declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub ty: Option<TypeNode>,
    pub optional: bool,
    pub readonly: bool,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub is_static: bool,
    pub initializer: Option<Expr>,
    pub doc: Option<String>,
}

impl Property {
    pub fn new(name: impl Into<String>, ty: TypeNode) -> Self {
        Property {
            name: name.into(),
            ty: Some(ty),
            optional: false,
            readonly: false,
            visibility: Visibility::Public,
            is_abstract: false,
            is_static: false,
            initializer: None,
            doc: None,
        }
    }
}

/// Class method declaration. The body is opaque to the transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeNode>,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub is_static: bool,
    pub optional: bool,
    pub doc: Option<String>,
}

impl Method {
    pub fn new(name: impl Into<String>, params: Vec<Param>, return_type: Option<TypeNode>) -> Self {
        Method {
            name: name.into(),
            params,
            return_type,
            visibility: Visibility::Public,
            is_abstract: false,
            is_static: false,
            optional: false,
            doc: None,
        }
    }
}

/// Class constructor declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Constructor {
    pub params: Vec<Param>,
    pub doc: Option<String>,
}

/// A member of a class, interface or type literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    PropertySignature(PropertySignature),
    MethodSignature(MethodSignature),
    IndexSignature(IndexSignature),
    Property(Property),
    Method(Method),
    Constructor(Constructor),
}

impl Member {
    /// The rendered name used for member deduplication; index signatures
    /// have none.
    pub fn name(&self) -> Option<&str> {
        match self {
            Member::PropertySignature(m) => Some(&m.name),
            Member::MethodSignature(m) => Some(&m.name),
            Member::Property(m) => Some(&m.name),
            Member::Method(m) => Some(&m.name),
            Member::Constructor(_) => Some("constructor"),
            Member::IndexSignature(_) => None,
        }
    }
}

/// A declared type parameter. Constraints and defaults are not part of the
/// runtime encoding; the binding name is all the walker needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParam {
    pub name: String,
}

impl TypeParam {
    pub fn new(name: impl Into<String>) -> Self {
        TypeParam { name: name.into() }
    }
}

/// A heritage reference in an interface `extends` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct HeritageRef {
    pub name: EntityName,
    pub args: Vec<TypeNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAliasDecl {
    pub name: String,
    pub type_params: Vec<TypeParam>,
    pub ty: TypeNode,
    pub exported: bool,
    pub doc: Option<String>,
}

impl TypeAliasDecl {
    pub fn new(name: impl Into<String>, ty: TypeNode) -> Self {
        TypeAliasDecl {
            name: name.into(),
            type_params: Vec::new(),
            ty,
            exported: false,
            doc: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDecl {
    pub name: String,
    pub type_params: Vec<TypeParam>,
    pub extends: Vec<HeritageRef>,
    pub members: Vec<Member>,
    pub exported: bool,
    pub doc: Option<String>,
}

impl InterfaceDecl {
    pub fn new(name: impl Into<String>, members: Vec<Member>) -> Self {
        InterfaceDecl {
            name: name.into(),
            type_params: Vec::new(),
            extends: Vec::new(),
            members,
            exported: false,
            doc: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub type_params: Vec<TypeParam>,
    pub members: Vec<Member>,
    pub exported: bool,
    pub doc: Option<String>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>, members: Vec<Member>) -> Self {
        ClassDecl {
            name: name.into(),
            type_params: Vec::new(),
            members,
            exported: false,
            doc: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeNode>,
    pub exported: bool,
    pub doc: Option<String>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, params: Vec<Param>, return_type: Option<TypeNode>) -> Self {
        FunctionDecl {
            name: name.into(),
            type_params: Vec::new(),
            params,
            return_type,
            exported: false,
            doc: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub members: Vec<String>,
    pub exported: bool,
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Const,
    Let,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub kind: VarKind,
    pub name: String,
    pub init: Option<Expr>,
    pub exported: bool,
    pub doc: Option<String>,
}

impl VarDecl {
    pub fn const_(name: impl Into<String>, init: Expr) -> Self {
        VarDecl {
            kind: VarKind::Const,
            name: name.into(),
            init: Some(init),
            exported: false,
            doc: None,
        }
    }
}

/// One binding of a named import: `import { imported as local } from "m"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSpecifier {
    pub local: String,
    /// The name in the source module, when renamed.
    pub imported: Option<String>,
    /// Pinned against dead-import elimination by the host.
    pub synthetic: bool,
}

impl ImportSpecifier {
    pub fn named(local: impl Into<String>) -> Self {
        ImportSpecifier {
            local: local.into(),
            imported: None,
            synthetic: false,
        }
    }

    /// The name looked up in the source module.
    pub fn source_name(&self) -> &str {
        self.imported.as_deref().unwrap_or(&self.local)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportClause {
    Named(Vec<ImportSpecifier>),
    /// `import * as ns from "m"`.
    Namespace(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub from: String,
    pub clause: ImportClause,
}

/// One binding of a named re-export: `export { orig as exported } from "m"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpecifier {
    pub exported: String,
    /// The `propertyName`: the name in the source module, when renamed.
    pub orig: Option<String>,
}

impl ExportSpecifier {
    pub fn source_name(&self) -> &str {
        self.orig.as_deref().unwrap_or(&self.exported)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportNamedDecl {
    pub specifiers: Vec<ExportSpecifier>,
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Import(ImportDecl),
    ExportNamed(ExportNamedDecl),
    ExportStar { from: String },
    TypeAlias(TypeAliasDecl),
    Interface(InterfaceDecl),
    Class(ClassDecl),
    Function(FunctionDecl),
    Enum(EnumDecl),
    Var(VarDecl),
    Expr(Expr),
}

/// A call expression, including any explicit type arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Expr,
    pub type_args: Vec<TypeNode>,
    pub args: Vec<Expr>,
}

/// An arrow function. The body is a single expression, which covers both
/// carrier arrows in host trees and the thunks the rewriter fabricates.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrowFn {
    pub params: Vec<Param>,
    pub return_type: Option<TypeNode>,
    pub body: Expr,
}

/// A function expression; the body is opaque except for nested rewriting.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeNode>,
    pub body: Vec<Statement>,
}

/// A class expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassExpr {
    pub name: Option<String>,
    pub type_params: Vec<TypeParam>,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Literal(Literal),
    Null,
    Undefined,
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Call(Box<CallExpr>),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Arrow(Box<ArrowFn>),
    FunctionExpr(Box<FunctionExpr>),
    ClassExpr(Box<ClassExpr>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::Str(value.into()))
    }

    pub fn num(value: f64) -> Self {
        Expr::Literal(Literal::Num(value))
    }

    /// A zero-argument accessor thunk `() => body`.
    pub fn thunk(body: Expr) -> Self {
        Expr::Arrow(Box::new(ArrowFn {
            params: Vec::new(),
            return_type: None,
            body,
        }))
    }

    pub fn member(object: Expr, property: impl Into<String>) -> Self {
        Expr::Member {
            object: Box::new(object),
            property: property.into(),
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call(Box::new(CallExpr {
            callee,
            type_args: Vec::new(),
            args,
        }))
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// Renders a possibly-qualified entity name as a member-access chain.
    pub fn from_entity(name: &EntityName) -> Self {
        match name {
            EntityName::Ident(name) => Expr::Ident(name.clone()),
            EntityName::Qualified(parts) => {
                let mut iter = parts.iter();
                let mut expr = Expr::Ident(iter.next().cloned().unwrap_or_default());
                for part in iter {
                    expr = Expr::member(expr, part.clone());
                }
                expr
            }
        }
    }
}

/// One source tree handed over by the host compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Filesystem path, used by the configuration probe.
    pub path: PathBuf,
    /// Module specifier under which other files import this one.
    pub specifier: String,
    pub statements: Vec<Statement>,
}

impl SourceFile {
    pub fn new(specifier: impl Into<String>, statements: Vec<Statement>) -> Self {
        let specifier = specifier.into();
        SourceFile {
            path: PathBuf::from(format!("{specifier}.ts")),
            specifier,
            statements,
        }
    }
}
