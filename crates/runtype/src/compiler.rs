//! The type-to-bytecode walker.
//!
//! Recursive descent over the type syntax, emitting ops into a
//! [`CompilerProgram`]. Cross-file references go through the
//! [`ModuleGraph`]; aliases and interfaces are referenced by name and queued
//! for hoisting, classes and enums become live-binding thunks.
//!
//! Unresolved references and unsupported syntax degrade to `any`; the only
//! errors this module can produce are program-invariant violations.

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::ast::{
    EntityName, HeritageRef, InterfaceDecl, Keyword, MappedModifier, MappedType, Member, Method,
    Param, Property, SourceFile, Statement, TypeAliasDecl, TypeNode, TypeParam, Visibility,
};
use crate::bytecode::{MappedModifiers, NumberBrand, Op, PackStruct, StackEntry};
use crate::error::ProgramError;
use crate::program::CompilerProgram;
use crate::resolver::{ImportRef, ModuleGraph};

/// Prefix of hoisted payload bindings.
pub const HOIST_PREFIX: &str = "__Ω";

/// Derives the hoisted-binding name from the reference name used at the
/// usage site; qualified names arrive already underscore-joined. Repeated
/// references produce the same name.
#[must_use]
pub fn hoisted_name(reference: &str) -> String {
    format!("{HOIST_PREFIX}{reference}")
}

/// Identity of a declaration: (defining module, declared name).
pub(crate) type DeclKey = (String, String);

/// A queued alias/interface compilation.
#[derive(Debug)]
pub(crate) struct HoistRequest<'g> {
    pub statement: &'g Statement,
    /// Reference name used at the first usage site; the hoisted binding
    /// name derives from it.
    pub reference: String,
}

/// Per-output-file compilation state shared by every program built while
/// rewriting one source tree.
#[derive(Debug, Default)]
pub(crate) struct FileCtx<'g> {
    /// Specifier of the file being rewritten.
    pub output: String,
    /// Aliases/interfaces declared in the output file, keyed by identity.
    pub local: IndexMap<DeclKey, HoistRequest<'g>>,
    /// The same, but originally imported from other modules and embedded
    /// here.
    pub foreign: IndexMap<DeclKey, HoistRequest<'g>>,
    /// Import bindings of the output file that must survive dead-import
    /// elimination.
    pub pinned: AHashSet<ImportRef>,
}

impl<'g> FileCtx<'g> {
    pub fn new(output: &str) -> Self {
        FileCtx {
            output: output.to_string(),
            ..FileCtx::default()
        }
    }

    /// Queues a declaration for hoisting and returns the reference name its
    /// binding derives from. The first reference wins; later references to
    /// the same declaration reuse its name.
    pub(crate) fn enqueue(&mut self, key: DeclKey, statement: &'g Statement, reference: String) -> String {
        if let Some(existing) = self.local.get(&key).or_else(|| self.foreign.get(&key)) {
            return existing.reference.clone();
        }
        let queue = if key.0 == self.output {
            &mut self.local
        } else {
            &mut self.foreign
        };
        queue.insert(key, HoistRequest { statement, reference: reference.clone() });
        reference
    }
}

/// One walker, bound to the module whose scope names resolve in.
pub(crate) struct TypeCompiler<'a, 'g> {
    graph: &'g ModuleGraph,
    /// Resolution context; the output file, or a foreign module while its
    /// declarations are embedded.
    file: &'g SourceFile,
    ctx: &'a mut FileCtx<'g>,
}

impl<'a, 'g> TypeCompiler<'a, 'g> {
    pub fn new(graph: &'g ModuleGraph, file: &'g SourceFile, ctx: &'a mut FileCtx<'g>) -> Self {
        TypeCompiler { graph, file, ctx }
    }

    /// Compiles a bare type, e.g. a helper-call type argument.
    pub fn compile_type(&mut self, node: &TypeNode) -> Result<PackStruct, ProgramError> {
        let mut program = CompilerProgram::new();
        self.emit_type(&mut program, node)?;
        Ok(program.build())
    }

    /// Compiles the program of a class carrier.
    pub fn compile_class(
        &mut self,
        type_params: &[TypeParam],
        members: &[Member],
    ) -> Result<PackStruct, ProgramError> {
        let mut program = CompilerProgram::new();
        self.emit_class(&mut program, type_params, members)?;
        Ok(program.build())
    }

    /// Compiles the program of a function-like carrier.
    pub fn compile_function(
        &mut self,
        type_params: &[TypeParam],
        name: &str,
        params: &[Param],
        return_type: Option<&TypeNode>,
    ) -> Result<PackStruct, ProgramError> {
        let mut program = CompilerProgram::new();
        for tp in type_params {
            program.push_template_parameter(&tp.name);
        }
        self.emit_function_like(&mut program, Op::Function, name, params, return_type)?;
        Ok(program.build())
    }

    /// Compiles the hoisted program of a queued alias or interface: its type
    /// parameters bound as templates, then the body.
    pub fn compile_hoisted(&mut self, statement: &Statement) -> Result<Option<PackStruct>, ProgramError> {
        let mut program = CompilerProgram::new();
        match statement {
            Statement::TypeAlias(TypeAliasDecl { type_params, ty, .. }) => {
                for tp in type_params {
                    program.push_template_parameter(&tp.name);
                }
                self.emit_type(&mut program, ty)?;
            }
            Statement::Interface(decl) => {
                for tp in &decl.type_params {
                    program.push_template_parameter(&tp.name);
                }
                self.emit_interface(&mut program, decl)?;
            }
            _ => return Ok(None),
        }
        Ok(Some(program.build()))
    }

    fn emit_type(&mut self, p: &mut CompilerProgram, node: &TypeNode) -> Result<(), ProgramError> {
        match node {
            TypeNode::Keyword(keyword) => {
                p.push_op(match keyword {
                    Keyword::Never => Op::Never,
                    Keyword::Any => Op::Any,
                    Keyword::Void => Op::Void,
                    Keyword::String => Op::String,
                    Keyword::Number => Op::Number,
                    Keyword::Boolean => Op::Boolean,
                    Keyword::Bigint => Op::Bigint,
                    Keyword::Null => Op::Null,
                    Keyword::Undefined => Op::Undefined,
                    // No dedicated encoding; degrade like any other
                    // unsupported syntax.
                    Keyword::Unknown | Keyword::Object | Keyword::Symbol => Op::Any,
                });
                Ok(())
            }
            TypeNode::LiteralType(literal) => {
                let index = p.find_or_add_stack(StackEntry::Literal(literal.clone()));
                p.push_op_with(Op::Literal, &[index]);
                Ok(())
            }
            TypeNode::Array(element) => {
                self.emit_type(p, element)?;
                p.push_op(Op::Array);
                Ok(())
            }
            TypeNode::Union(types) => self.emit_grouped(p, types, Op::Union),
            TypeNode::Intersection(types) => self.emit_grouped(p, types, Op::Intersection),
            TypeNode::TypeLiteral(members) => self.emit_object_literal(p, members, &[]),
            TypeNode::FunctionType { params, return_type } => {
                self.emit_function_like(p, Op::Function, "", params, return_type.as_deref())
            }
            TypeNode::Mapped(mapped) => self.emit_mapped(p, mapped),
            TypeNode::Conditional(conditional) => {
                p.push_conditional_frame();
                self.emit_type(p, &conditional.check)?;
                self.emit_type(p, &conditional.extends)?;
                p.push_op(Op::Extends);
                self.emit_type(p, &conditional.true_type)?;
                self.emit_type(p, &conditional.false_type)?;
                p.push_op(Op::Condition);
                p.pop_frame()
            }
            TypeNode::Infer(name) => {
                self.emit_infer(p, name);
                Ok(())
            }
            TypeNode::IndexedAccess { object, index } => {
                self.emit_type(p, object)?;
                self.emit_type(p, index)?;
                p.push_op(Op::Query);
                Ok(())
            }
            TypeNode::KeyOf(target) => {
                self.emit_type(p, target)?;
                p.push_op(Op::KeyOf);
                Ok(())
            }
            TypeNode::Reference { name, args } => self.emit_reference(p, name, args),
            TypeNode::Parenthesized(inner) => self.emit_type(p, inner),
            // Tuples and anything else without an emission rule.
            TypeNode::Tuple(_) => {
                p.push_op(Op::Any);
                Ok(())
            }
        }
    }

    /// Union/intersection: empty vanishes, a single member emits plainly,
    /// anything longer collects inside a frame unless the program is still
    /// empty.
    fn emit_grouped(
        &mut self,
        p: &mut CompilerProgram,
        types: &[TypeNode],
        op: Op,
    ) -> Result<(), ProgramError> {
        match types {
            [] => Ok(()),
            [single] => self.emit_type(p, single),
            _ => {
                let framed = p.has_body_ops();
                if framed {
                    p.push_frame();
                }
                for ty in types {
                    self.emit_type(p, ty)?;
                }
                p.push_op(op);
                if framed {
                    p.pop_frame()?;
                }
                Ok(())
            }
        }
    }

    fn emit_mapped(&mut self, p: &mut CompilerProgram, mapped: &MappedType) -> Result<(), ProgramError> {
        p.push_frame();
        p.push_variable(&mapped.parameter);
        match &mapped.constraint {
            Some(constraint) => self.emit_type(p, constraint)?,
            None => p.push_op(Op::Never),
        }

        p.push_co_routine();
        let mut bits = MappedModifiers::empty();
        bits |= match mapped.optional {
            MappedModifier::Add => MappedModifiers::OPTIONAL,
            MappedModifier::Remove => MappedModifiers::REMOVE_OPTIONAL,
            MappedModifier::None => MappedModifiers::empty(),
        };
        bits |= match mapped.readonly {
            MappedModifier::Add => MappedModifiers::READONLY,
            MappedModifier::Remove => MappedModifiers::REMOVE_READONLY,
            MappedModifier::None => MappedModifiers::empty(),
        };
        match &mapped.value {
            Some(value) => self.emit_type(p, value)?,
            None => p.push_op(Op::Never),
        }
        let offset = p.pop_co_routine()?;

        p.push_op_with(Op::MappedType, &[offset, bits.bits()]);
        p.pop_frame()
    }

    /// `infer X` binds `X` in the enclosing conditional frame, splicing its
    /// `var` op at the frame opening on first reference. Outside a
    /// conditional there is nothing to bind into.
    fn emit_infer(&mut self, p: &mut CompilerProgram, name: &str) {
        let Some(frame) = p.find_conditional_frame() else {
            p.push_op(Op::Never);
            return;
        };
        let index = p
            .variable_in_frame(frame, name)
            .unwrap_or_else(|| p.push_variable_at(frame, name));
        let offset = p.frame_offset_to(frame);
        p.push_op_with(Op::Infer, &[offset, index]);
    }

    fn emit_class(
        &mut self,
        p: &mut CompilerProgram,
        type_params: &[TypeParam],
        members: &[Member],
    ) -> Result<(), ProgramError> {
        let framed = p.has_body_ops();
        if framed {
            p.push_frame();
        }
        for tp in type_params {
            p.push_template_parameter(&tp.name);
        }
        let mut emitted = AHashSet::new();
        for member in members {
            self.emit_class_member(p, member, &mut emitted)?;
        }
        p.push_op(Op::Class);
        if framed {
            p.pop_frame()?;
        }
        Ok(())
    }

    fn emit_interface(&mut self, p: &mut CompilerProgram, decl: &InterfaceDecl) -> Result<(), ProgramError> {
        self.emit_object_literal(p, &decl.members, &decl.extends)
    }

    /// Interfaces and type literals: own members first, then the members of
    /// each extended interface, skipping names already emitted. First
    /// declaration wins.
    fn emit_object_literal(
        &mut self,
        p: &mut CompilerProgram,
        members: &[Member],
        extends: &[HeritageRef],
    ) -> Result<(), ProgramError> {
        let framed = p.has_body_ops();
        if framed {
            p.push_frame();
        }
        let mut emitted = AHashSet::new();
        let mut merged = AHashSet::new();
        self.emit_signature_members(p, members, &mut emitted)?;
        self.merge_heritage(p, extends, &mut emitted, &mut merged)?;
        p.push_op(Op::ObjectLiteral);
        if framed {
            p.pop_frame()?;
        }
        Ok(())
    }

    /// Recursively merges the members of extended interfaces. `merged`
    /// guards against inheritance cycles.
    fn merge_heritage(
        &mut self,
        p: &mut CompilerProgram,
        extends: &[HeritageRef],
        emitted: &mut AHashSet<String>,
        merged: &mut AHashSet<DeclKey>,
    ) -> Result<(), ProgramError> {
        let graph = self.graph;
        for heritage in extends {
            let Some(resolved) = graph.resolve(self.file, &heritage.name) else {
                continue;
            };
            let Statement::Interface(parent) = resolved.statement else {
                continue;
            };
            if !merged.insert((resolved.module.to_string(), resolved.name.to_string())) {
                continue;
            }
            let parent_file = if resolved.module == self.file.specifier {
                self.file
            } else {
                match graph.module(resolved.module) {
                    Some(file) => file,
                    None => continue,
                }
            };
            // Parent members resolve in the parent's own module scope.
            let saved = std::mem::replace(&mut self.file, parent_file);
            self.emit_signature_members(p, &parent.members, emitted)?;
            self.merge_heritage(p, &parent.extends, emitted, merged)?;
            self.file = saved;
        }
        Ok(())
    }

    fn emit_signature_members(
        &mut self,
        p: &mut CompilerProgram,
        members: &[Member],
        emitted: &mut AHashSet<String>,
    ) -> Result<(), ProgramError> {
        for member in members {
            if let Some(name) = member.name() {
                if !emitted.insert(name.to_string()) {
                    continue;
                }
            }
            match member {
                Member::PropertySignature(prop) => {
                    self.emit_value_type(p, prop.ty.as_ref())?;
                    let name = p.find_or_add_stack(StackEntry::name(&prop.name));
                    p.push_op_with(Op::PropertySignature, &[name]);
                    if prop.optional {
                        p.push_op(Op::Optional);
                    }
                    if prop.readonly {
                        p.push_op(Op::Readonly);
                    }
                    self.emit_description(p, prop.doc.as_deref());
                }
                Member::MethodSignature(method) => {
                    self.emit_function_like(
                        p,
                        Op::MethodSignature,
                        &method.name,
                        &method.params,
                        method.return_type.as_ref(),
                    )?;
                    if method.optional {
                        p.push_op(Op::Optional);
                    }
                    self.emit_description(p, method.doc.as_deref());
                }
                Member::IndexSignature(index) => {
                    self.emit_value_type(p, index.key.as_ref())?;
                    self.emit_type(p, &index.value)?;
                    p.push_op(Op::IndexSignature);
                }
                // Class-flavored members inside an object shape keep their
                // declaration ops.
                Member::Property(_) | Member::Method(_) | Member::Constructor(_) => {
                    self.emit_class_member_inner(p, member)?;
                }
            }
        }
        Ok(())
    }

    fn emit_class_member(
        &mut self,
        p: &mut CompilerProgram,
        member: &Member,
        emitted: &mut AHashSet<String>,
    ) -> Result<(), ProgramError> {
        if let Some(name) = member.name() {
            if !emitted.insert(name.to_string()) {
                return Ok(());
            }
        }
        self.emit_class_member_inner(p, member)
    }

    fn emit_class_member_inner(&mut self, p: &mut CompilerProgram, member: &Member) -> Result<(), ProgramError> {
        match member {
            Member::Property(prop) => self.emit_property(p, prop),
            Member::Method(method) => self.emit_method(p, method),
            Member::Constructor(ctor) => {
                self.emit_function_like(p, Op::Method, "constructor", &ctor.params, None)?;
                self.emit_description(p, ctor.doc.as_deref());
                Ok(())
            }
            Member::IndexSignature(index) => {
                self.emit_value_type(p, index.key.as_ref())?;
                self.emit_type(p, &index.value)?;
                p.push_op(Op::IndexSignature);
                Ok(())
            }
            // Signature members inside a class body keep their signature
            // ops.
            Member::PropertySignature(_) | Member::MethodSignature(_) => {
                let mut emitted = AHashSet::new();
                self.emit_signature_members(p, std::slice::from_ref(member), &mut emitted)
            }
        }
    }

    fn emit_property(&mut self, p: &mut CompilerProgram, prop: &Property) -> Result<(), ProgramError> {
        self.emit_value_type(p, prop.ty.as_ref())?;
        let name = p.find_or_add_stack(StackEntry::name(&prop.name));
        p.push_op_with(Op::Property, &[name]);
        if prop.optional {
            p.push_op(Op::Optional);
        }
        if prop.readonly {
            p.push_op(Op::Readonly);
        }
        self.emit_visibility(p, prop.visibility);
        if prop.is_abstract {
            p.push_op(Op::Abstract);
        }
        if let Some(init) = &prop.initializer {
            let thunk = p.find_or_add_stack(StackEntry::Thunk(init.clone()));
            p.push_op_with(Op::DefaultValue, &[thunk]);
        }
        self.emit_description(p, prop.doc.as_deref());
        Ok(())
    }

    fn emit_method(&mut self, p: &mut CompilerProgram, method: &Method) -> Result<(), ProgramError> {
        self.emit_function_like(
            p,
            Op::Method,
            &method.name,
            &method.params,
            method.return_type.as_ref(),
        )?;
        if method.optional {
            p.push_op(Op::Optional);
        }
        self.emit_visibility(p, method.visibility);
        if method.is_abstract {
            p.push_op(Op::Abstract);
        }
        self.emit_description(p, method.doc.as_deref());
        Ok(())
    }

    fn emit_visibility(&mut self, p: &mut CompilerProgram, visibility: Visibility) {
        match visibility {
            Visibility::Public => {}
            Visibility::Private => p.push_op(Op::Private),
            Visibility::Protected => p.push_op(Op::Protected),
        }
    }

    fn emit_description(&mut self, p: &mut CompilerProgram, doc: Option<&str>) {
        if let Some(doc) = doc {
            let index = p.find_or_add_stack(StackEntry::name(doc));
            p.push_op_with(Op::Description, &[index]);
        }
    }

    /// Methods, constructors, arrows, function expressions/declarations and
    /// function types share one emission: parameters, return type, then the
    /// member op with its name. Parameters without an identifier name are
    /// skipped.
    fn emit_function_like(
        &mut self,
        p: &mut CompilerProgram,
        op: Op,
        name: &str,
        params: &[Param],
        return_type: Option<&TypeNode>,
    ) -> Result<(), ProgramError> {
        let framed = p.has_body_ops();
        if framed {
            p.push_frame();
        }
        for param in params {
            let Some(param_name) = &param.name else {
                continue;
            };
            self.emit_value_type(p, param.ty.as_ref())?;
            let index = p.find_or_add_stack(StackEntry::name(param_name));
            p.push_op_with(Op::Parameter, &[index]);
            if param.optional {
                p.push_op(Op::Optional);
            }
            if param.readonly {
                p.push_op(Op::Readonly);
            }
            if let Some(visibility) = param.visibility {
                self.emit_visibility(p, visibility);
            }
            if let Some(default) = &param.default {
                let thunk = p.find_or_add_stack(StackEntry::Thunk(default.clone()));
                p.push_op_with(Op::DefaultValue, &[thunk]);
            }
        }
        self.emit_value_type(p, return_type)?;
        let name_index = p.find_or_add_stack(StackEntry::name(name));
        p.push_op_with(op, &[name_index]);
        if framed {
            p.pop_frame()?;
        }
        Ok(())
    }

    /// An optional annotated type; absence means `any`.
    fn emit_value_type(&mut self, p: &mut CompilerProgram, ty: Option<&TypeNode>) -> Result<(), ProgramError> {
        match ty {
            Some(ty) => self.emit_type(p, ty),
            None => {
                p.push_op(Op::Any);
                Ok(())
            }
        }
    }

    /// Type references: known classes and numeric brands first, then frame
    /// variables, then the cross-file resolver. Whatever remains unresolved
    /// is `any`.
    fn emit_reference(
        &mut self,
        p: &mut CompilerProgram,
        name: &EntityName,
        args: &[TypeNode],
    ) -> Result<(), ProgramError> {
        if let EntityName::Ident(ident) = name {
            if self.try_emit_known_class(p, ident, args)?.is_some() {
                return Ok(());
            }
            if let Some(brand) = NumberBrand::from_name(ident) {
                p.push_op_with(Op::NumberBrand, &[brand as u16]);
                return Ok(());
            }
            if let Some(var) = p.find_variable(ident) {
                p.push_op_with(Op::Loads, &[var.frame_offset, var.index]);
                return Ok(());
            }
        }

        let graph = self.graph;
        let Some(resolved) = graph.resolve(self.file, name) else {
            p.push_op(Op::Any);
            return Ok(());
        };
        let key: DeclKey = (resolved.module.to_string(), resolved.name.to_string());
        let import = resolved.import.clone();
        match resolved.statement {
            Statement::TypeAlias(_) | Statement::Interface(_) => {
                let reference = self.ctx.enqueue(key, resolved.statement, name.joined());
                let thunk = StackEntry::Thunk(crate::ast::Expr::Ident(hoisted_name(&reference)));
                let index = p.find_or_add_stack(thunk);
                if args.is_empty() {
                    p.push_op_with(Op::Inline, &[index]);
                } else {
                    for arg in args {
                        self.emit_type(p, arg)?;
                    }
                    p.push_op_with(Op::InlineCall, &[index, args.len() as u16]);
                }
            }
            Statement::Enum(_) => {
                self.pin_import(import);
                let thunk = StackEntry::Thunk(crate::ast::Expr::from_entity(name));
                let index = p.find_or_add_stack(thunk);
                p.push_op_with(Op::Enum, &[index]);
            }
            Statement::Class(_) => {
                self.pin_import(import);
                for arg in args {
                    self.emit_type(p, arg)?;
                }
                let thunk = StackEntry::Thunk(crate::ast::Expr::from_entity(name));
                let index = p.find_or_add_stack(thunk);
                p.push_op_with(Op::ClassReference, &[index]);
            }
            // Values resolved as type names have no emission rule.
            _ => p.push_op(Op::Any),
        }
        Ok(())
    }

    /// Marks the import binding behind a class/enum reference so the host's
    /// dead-import pass keeps the live binding. Only imports of the output
    /// file are rewritable.
    fn pin_import(&mut self, import: Option<ImportRef>) {
        if self.file.specifier == self.ctx.output {
            if let Some(import) = import {
                self.ctx.pinned.insert(import);
            }
        }
    }

    /// Well-known classes with dedicated ops. Returns `Some(())` when the
    /// name was one of them.
    fn try_emit_known_class(
        &mut self,
        p: &mut CompilerProgram,
        name: &str,
        args: &[TypeNode],
    ) -> Result<Option<()>, ProgramError> {
        let op = match name {
            "String" => Op::String,
            "Number" => Op::Number,
            "Boolean" => Op::Boolean,
            "BigInt" => Op::Bigint,
            "Date" => Op::Date,
            "ArrayBuffer" => Op::ArrayBuffer,
            "Int8Array" => Op::Int8Array,
            "Uint8Array" | "Uint8ClampedArray" => Op::Uint8Array,
            "Int16Array" => Op::Int16Array,
            "Uint16Array" => Op::Uint16Array,
            "Int32Array" => Op::Int32Array,
            "Uint32Array" => Op::Uint32Array,
            "Float32Array" => Op::Float32Array,
            "Float64Array" => Op::Float64Array,
            "Promise" => {
                self.emit_value_type(p, args.first())?;
                p.push_op(Op::Promise);
                return Ok(Some(()));
            }
            "Set" => {
                self.emit_value_type(p, args.first())?;
                p.push_op(Op::Set);
                return Ok(Some(()));
            }
            "Map" => {
                self.emit_value_type(p, args.first())?;
                self.emit_value_type(p, args.get(1))?;
                p.push_op(Op::Map);
                return Ok(Some(()));
            }
            _ => return Ok(None),
        };
        p.push_op(op);
        Ok(Some(()))
    }
}
