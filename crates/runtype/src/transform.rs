//! Tree rewriting: attaching payloads to carriers and hoisting compiled
//! declarations.
//!
//! The transformer visits every node of a source tree depth-first and
//! rewrites the handful of carrier kinds: classes gain a static `__type`
//! member, function declarations a trailing property assignment, arrows and
//! function expressions an `Object.assign` wrap, and recognized helper
//! calls receive their payload argument. Type aliases and interfaces are
//! compiled into sibling `const __Ω<Name>` bindings; the hoist queues drain
//! to fixpoint because each compilation may reference further declarations.

use crate::ast::{
    ClassDecl, ClassExpr, EntityName, Expr, FunctionDecl, ImportClause, Member, Property,
    SourceFile, Statement, TypeNode, Visibility,
};
use crate::bytecode::{pack, PackStruct};
use crate::compiler::{hoisted_name, FileCtx, TypeCompiler};
use crate::config::{ModeProbe, ReflectionMode};
use crate::error::TransformError;
use crate::resolver::ModuleGraph;

/// Name of the attached payload member.
pub const TYPE_PROPERTY: &str = "__type";

/// Call helpers that receive the payload of their first type argument.
const AUTO_HELPERS: [&str; 3] = ["typeOf", "valuesOf", "propertiesOf"];

/// Marker type matched in generic function signatures: a parameter typed
/// `ReceiveType<T>` receives the payload of the call-site argument for `T`.
const RECEIVE_TYPE: &str = "ReceiveType";

/// Context supplied by the host compiler when constructing a transformer.
#[derive(Debug, Default)]
pub struct TransformContext {
    pub graph: ModuleGraph,
}

impl TransformContext {
    #[must_use]
    pub fn new(graph: ModuleGraph) -> Self {
        TransformContext { graph }
    }
}

/// Produces a transformer instance for the host's transformation pipeline.
#[must_use]
pub fn transformer(context: TransformContext) -> ReflectionTransformer {
    ReflectionTransformer::new(context)
}

/// The reflection transformer.
///
/// One instance serves many files; all per-file state lives in the
/// transform call.
#[derive(Debug)]
pub struct ReflectionTransformer {
    graph: ModuleGraph,
    probe: ModeProbe,
}

impl ReflectionTransformer {
    #[must_use]
    pub fn new(context: TransformContext) -> Self {
        ReflectionTransformer {
            graph: context.graph,
            probe: ModeProbe::new(None),
        }
    }

    /// Overrides the reflection mode for nodes without a governing doc tag.
    #[must_use]
    pub fn with_reflection_mode(mut self, mode: ReflectionMode) -> Self {
        self.probe.set_override(mode);
        self
    }

    /// Bundles pass through untouched.
    #[must_use]
    pub fn transform_bundle(&self, bundle: Vec<SourceFile>) -> Vec<SourceFile> {
        bundle
    }

    /// Rewrites one source tree.
    ///
    /// # Errors
    /// Returns [`TransformError`] on compiler-program invariant violations
    /// or encoding overflow; the host is expected to keep the original tree
    /// in that case.
    pub fn transform_source_file<'g>(&'g self, file: &'g SourceFile) -> Result<SourceFile, TransformError> {
        let mut ctx = FileCtx::new(&file.specifier);
        let mut statements = {
            let mut rewriter = Rewriter {
                graph: &self.graph,
                probe: &self.probe,
                file,
                ctx: &mut ctx,
                docs: Vec::new(),
            };
            rewriter.rewrite_statements(&file.statements)?
        };

        let (local, foreign) = self.drain_hoists(file, &mut ctx)?;

        // Foreign embeds land after the last import; local bindings
        // immediately follow their declaration.
        let mut insert_at = statements
            .iter()
            .rposition(|s| matches!(s, Statement::Import(_)))
            .map_or(0, |i| i + 1);
        for statement in foreign {
            statements.insert(insert_at, statement);
            insert_at += 1;
        }
        for (decl_name, statement) in local {
            let position = statements
                .iter()
                .position(|s| declares_type(s, &decl_name))
                .map_or(statements.len(), |i| i + 1);
            statements.insert(position, statement);
        }

        if !ctx.pinned.is_empty() {
            let pinned: ahash::AHashSet<&str> =
                ctx.pinned.iter().map(|p| p.local.as_str()).collect();
            for statement in &mut statements {
                let Statement::Import(import) = statement else {
                    continue;
                };
                if let ImportClause::Named(specifiers) = &mut import.clause {
                    for spec in specifiers {
                        if pinned.contains(spec.local.as_str()) {
                            spec.synthetic = true;
                        }
                    }
                }
            }
        }

        Ok(SourceFile {
            path: file.path.clone(),
            specifier: file.specifier.clone(),
            statements,
        })
    }

    /// Drains both hoist queues to fixpoint, compiling each queued
    /// declaration once. Local declarations compile in the output file's
    /// scope, foreign ones in their defining module's scope.
    #[allow(clippy::type_complexity)]
    fn drain_hoists<'g>(
        &'g self,
        file: &'g SourceFile,
        ctx: &mut FileCtx<'g>,
    ) -> Result<(Vec<(String, Statement)>, Vec<Statement>), TransformError> {
        let mut local = Vec::new();
        let mut foreign = Vec::new();
        let mut local_done = 0;
        let mut foreign_done = 0;
        loop {
            if local_done < ctx.local.len() {
                let (key, request) = ctx.local.get_index(local_done).expect("index in range");
                let decl_name = key.1.clone();
                let reference = request.reference.clone();
                let statement = request.statement;
                local_done += 1;
                let pack = TypeCompiler::new(&self.graph, file, ctx).compile_hoisted(statement)?;
                if let Some(pack) = pack {
                    tracing::debug!(binding = %hoisted_name(&reference), "hoisting compiled declaration");
                    local.push((decl_name, hoist_binding(&reference, &pack)?));
                }
                continue;
            }
            if foreign_done < ctx.foreign.len() {
                let (key, request) = ctx.foreign.get_index(foreign_done).expect("index in range");
                let module = key.0.clone();
                let reference = request.reference.clone();
                let statement = request.statement;
                foreign_done += 1;
                let Some(source) = self.graph.module(&module) else {
                    continue;
                };
                let pack = TypeCompiler::new(&self.graph, source, ctx).compile_hoisted(statement)?;
                if let Some(pack) = pack {
                    foreign.push(hoist_binding(&reference, &pack)?);
                }
                continue;
            }
            break;
        }
        Ok((local, foreign))
    }
}

/// Builds the `const __Ω<name> = <payload>;` binding for a compiled
/// declaration.
fn hoist_binding(reference: &str, pack_struct: &PackStruct) -> Result<Statement, TransformError> {
    let payload = pack(pack_struct)?;
    Ok(Statement::Var(crate::ast::VarDecl::const_(
        hoisted_name(reference),
        payload.to_expr(),
    )))
}

fn declares_type(statement: &Statement, name: &str) -> bool {
    match statement {
        Statement::TypeAlias(d) => d.name == name,
        Statement::Interface(d) => d.name == name,
        _ => false,
    }
}

/// Depth-first rewriting of one file's statements.
struct Rewriter<'a, 'g> {
    graph: &'g ModuleGraph,
    probe: &'a ModeProbe,
    file: &'g SourceFile,
    ctx: &'a mut FileCtx<'g>,
    /// Doc comments of enclosing declarations, outermost first.
    docs: Vec<String>,
}

impl<'a, 'g> Rewriter<'a, 'g> {
    fn compiler(&mut self) -> TypeCompiler<'_, 'g> {
        TypeCompiler::new(self.graph, self.file, self.ctx)
    }

    /// Resolves the reflection mode for a node with the given doc comment.
    fn mode(&self, doc: Option<&str>) -> ReflectionMode {
        let docs = doc.into_iter().chain(self.docs.iter().rev().map(String::as_str));
        self.probe.resolve(docs, &self.file.path)
    }

    fn rewrite_statements(&mut self, statements: &'g [Statement]) -> Result<Vec<Statement>, TransformError> {
        let mut out = Vec::with_capacity(statements.len());
        for statement in statements {
            self.rewrite_statement(statement, &mut out)?;
        }
        Ok(out)
    }

    fn rewrite_statement(
        &mut self,
        statement: &'g Statement,
        out: &mut Vec<Statement>,
    ) -> Result<(), TransformError> {
        match statement {
            Statement::Class(decl) => {
                if self.mode(decl.doc.as_deref()) == ReflectionMode::Never {
                    out.push(statement.clone());
                    return Ok(());
                }
                out.push(Statement::Class(self.rewrite_class_decl(decl)?));
            }
            Statement::Function(decl) => {
                if self.mode(decl.doc.as_deref()) == ReflectionMode::Never {
                    out.push(statement.clone());
                    return Ok(());
                }
                let pack_struct = self.compiler().compile_function(
                    &decl.type_params,
                    &decl.name,
                    &decl.params,
                    decl.return_type.as_ref(),
                )?;
                let payload = pack(&pack_struct)?;
                out.push(statement.clone());
                out.push(Statement::Expr(Expr::assign(
                    Expr::member(Expr::ident(decl.name.clone()), TYPE_PROPERTY),
                    payload.to_expr(),
                )));
            }
            Statement::TypeAlias(decl) => {
                if self.mode(decl.doc.as_deref()) != ReflectionMode::Never {
                    self.ctx.enqueue(
                        (self.file.specifier.clone(), decl.name.clone()),
                        statement,
                        decl.name.clone(),
                    );
                }
                out.push(statement.clone());
            }
            Statement::Interface(decl) => {
                if self.mode(decl.doc.as_deref()) != ReflectionMode::Never {
                    self.ctx.enqueue(
                        (self.file.specifier.clone(), decl.name.clone()),
                        statement,
                        decl.name.clone(),
                    );
                }
                out.push(statement.clone());
            }
            Statement::Var(decl) => {
                let mut rewritten = decl.clone();
                if let Some(init) = &decl.init {
                    if let Some(doc) = &decl.doc {
                        self.docs.push(doc.clone());
                    }
                    let result = self.rewrite_expr(init);
                    if decl.doc.is_some() {
                        self.docs.pop();
                    }
                    rewritten.init = Some(result?);
                }
                out.push(Statement::Var(rewritten));
            }
            Statement::Expr(expr) => {
                let rewritten = self.rewrite_expr(expr)?;
                out.push(Statement::Expr(rewritten));
            }
            Statement::Import(_)
            | Statement::ExportNamed(_)
            | Statement::ExportStar { .. }
            | Statement::Enum(_) => out.push(statement.clone()),
        }
        Ok(())
    }

    /// Rewrites member initializers, compiles the class program and attaches
    /// the static payload member.
    fn rewrite_class_decl(&mut self, decl: &'g ClassDecl) -> Result<ClassDecl, TransformError> {
        if let Some(doc) = &decl.doc {
            self.docs.push(doc.clone());
        }
        let members = self.rewrite_members(&decl.members);
        if decl.doc.is_some() {
            self.docs.pop();
        }
        let mut members = members?;

        let pack_struct = self.compiler().compile_class(&decl.type_params, &decl.members)?;
        let payload = pack(&pack_struct)?;
        members.push(static_type_member(payload.to_expr()));
        Ok(ClassDecl {
            name: decl.name.clone(),
            type_params: decl.type_params.clone(),
            members,
            exported: decl.exported,
            doc: decl.doc.clone(),
        })
    }

    fn rewrite_members(&mut self, members: &'g [Member]) -> Result<Vec<Member>, TransformError> {
        members
            .iter()
            .map(|member| match member {
                Member::Property(prop) => {
                    let mut rewritten = prop.clone();
                    if let Some(init) = &prop.initializer {
                        rewritten.initializer = Some(self.rewrite_expr(init)?);
                    }
                    Ok(Member::Property(rewritten))
                }
                other => Ok(other.clone()),
            })
            .collect()
    }

    fn rewrite_expr(&mut self, expr: &'g Expr) -> Result<Expr, TransformError> {
        match expr {
            Expr::Arrow(arrow) => {
                let body = self.rewrite_expr(&arrow.body)?;
                let rebuilt = Expr::Arrow(Box::new(crate::ast::ArrowFn {
                    params: arrow.params.clone(),
                    return_type: arrow.return_type.clone(),
                    body,
                }));
                if self.mode(None) == ReflectionMode::Never {
                    return Ok(rebuilt);
                }
                let pack_struct = self.compiler().compile_function(
                    &[],
                    "",
                    &arrow.params,
                    arrow.return_type.as_ref(),
                )?;
                Ok(attach_type(rebuilt, pack(&pack_struct)?.to_expr()))
            }
            Expr::FunctionExpr(func) => {
                let body = self.rewrite_statements(&func.body)?;
                let rebuilt = Expr::FunctionExpr(Box::new(crate::ast::FunctionExpr {
                    name: func.name.clone(),
                    params: func.params.clone(),
                    return_type: func.return_type.clone(),
                    body,
                }));
                if self.mode(None) == ReflectionMode::Never {
                    return Ok(rebuilt);
                }
                let pack_struct = self.compiler().compile_function(
                    &[],
                    func.name.as_deref().unwrap_or(""),
                    &func.params,
                    func.return_type.as_ref(),
                )?;
                Ok(attach_type(rebuilt, pack(&pack_struct)?.to_expr()))
            }
            Expr::ClassExpr(class) => {
                let mut members = self.rewrite_members(&class.members)?;
                if self.mode(None) != ReflectionMode::Never {
                    let pack_struct = self
                        .compiler()
                        .compile_class(&class.type_params, &class.members)?;
                    members.push(static_type_member(pack(&pack_struct)?.to_expr()));
                }
                Ok(Expr::ClassExpr(Box::new(ClassExpr {
                    name: class.name.clone(),
                    type_params: class.type_params.clone(),
                    members,
                })))
            }
            Expr::Call(call) => self.rewrite_call(call),
            Expr::Assign { target, value } => Ok(Expr::Assign {
                target: Box::new(self.rewrite_expr(target)?),
                value: Box::new(self.rewrite_expr(value)?),
            }),
            Expr::Array(items) => Ok(Expr::Array(
                items.iter().map(|e| self.rewrite_expr(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Object(props) => Ok(Expr::Object(
                props
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.rewrite_expr(v)?)))
                    .collect::<Result<_, TransformError>>()?,
            )),
            Expr::Member { object, property } => Ok(Expr::Member {
                object: Box::new(self.rewrite_expr(object)?),
                property: property.clone(),
            }),
            Expr::Ident(_) | Expr::Literal(_) | Expr::Null | Expr::Undefined => Ok(expr.clone()),
        }
    }

    /// Call rewriting: the recognized helpers receive the payload of their
    /// first type argument; any other callee resolving to a generic function
    /// with `ReceiveType<X>` parameters receives the matching payloads at
    /// the declared parameter positions.
    fn rewrite_call(&mut self, call: &'g crate::ast::CallExpr) -> Result<Expr, TransformError> {
        let callee = self.rewrite_expr(&call.callee)?;
        let mut args = call
            .args
            .iter()
            .map(|a| self.rewrite_expr(a))
            .collect::<Result<Vec<_>, _>>()?;

        if self.mode(None) == ReflectionMode::Never {
            return Ok(Expr::Call(Box::new(crate::ast::CallExpr {
                callee,
                type_args: call.type_args.clone(),
                args,
            })));
        }

        if let Expr::Ident(name) = &call.callee {
            if AUTO_HELPERS.contains(&name.as_str()) {
                if let Some(first) = call.type_args.first() {
                    let pack_struct = self.compiler().compile_type(first)?;
                    if args.is_empty() {
                        args.push(Expr::Array(Vec::new()));
                    }
                    args.push(pack(&pack_struct)?.to_expr());
                }
            } else if !call.type_args.is_empty() {
                if let Some(decl) = self.resolve_function(name) {
                    self.inject_receive_types(decl, call, &mut args)?;
                }
            }
        }

        Ok(Expr::Call(Box::new(crate::ast::CallExpr {
            callee,
            type_args: call.type_args.clone(),
            args,
        })))
    }

    fn resolve_function(&self, name: &str) -> Option<&'g FunctionDecl> {
        let resolved = self.graph.resolve(self.file, &EntityName::ident(name))?;
        match resolved.statement {
            Statement::Function(decl) if !decl.type_params.is_empty() => Some(decl),
            _ => None,
        }
    }

    /// Fills `ReceiveType<X>`-typed parameters with the payloads of the
    /// call's explicit type arguments, padding missing arguments with
    /// `undefined`. Arguments the caller already passed are left alone.
    fn inject_receive_types(
        &mut self,
        decl: &'g FunctionDecl,
        call: &'g crate::ast::CallExpr,
        args: &mut Vec<Expr>,
    ) -> Result<(), TransformError> {
        for (position, type_param) in decl.type_params.iter().enumerate() {
            let Some(type_arg) = call.type_args.get(position) else {
                break;
            };
            let Some(param_index) = receive_type_position(decl, &type_param.name) else {
                continue;
            };
            if param_index < args.len() {
                continue;
            }
            let pack_struct = self.compiler().compile_type(type_arg)?;
            let payload = pack(&pack_struct)?.to_expr();
            while args.len() < param_index {
                args.push(Expr::Undefined);
            }
            args.push(payload);
        }
        Ok(())
    }
}

/// Index of the parameter typed `ReceiveType<{type_param}>`, if any.
fn receive_type_position(decl: &FunctionDecl, type_param: &str) -> Option<usize> {
    decl.params.iter().position(|param| {
        let Some(TypeNode::Reference { name: EntityName::Ident(marker), args }) = &param.ty else {
            return false;
        };
        if marker != RECEIVE_TYPE || args.len() != 1 {
            return false;
        }
        matches!(
            &args[0],
            TypeNode::Reference { name: EntityName::Ident(inner), args }
                if inner == type_param && args.is_empty()
        )
    })
}

/// The static class member carrying the payload.
fn static_type_member(payload: Expr) -> Member {
    Member::Property(Property {
        name: TYPE_PROPERTY.to_string(),
        ty: None,
        optional: false,
        readonly: false,
        visibility: Visibility::Public,
        is_abstract: false,
        is_static: true,
        initializer: Some(payload),
        doc: None,
    })
}

/// Wraps a function value so it keeps its identity but carries the payload:
/// `Object.assign(fn, { __type: payload })`.
fn attach_type(value: Expr, payload: Expr) -> Expr {
    Expr::call(
        Expr::member(Expr::ident("Object"), "assign"),
        vec![value, Expr::Object(vec![(TYPE_PROPERTY.to_string(), payload)])],
    )
}
