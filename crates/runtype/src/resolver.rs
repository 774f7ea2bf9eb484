//! Cross-file declaration resolution.
//!
//! Maps a type-name occurrence to its defining declaration, following import
//! bindings and re-exports across the module graph. The graph doubles as the
//! symbol oracle the host type checker would otherwise provide: per-module
//! name tables are built lazily on first need and cached for the file's
//! lifetime.
//!
//! Resolution failures are not errors; the walker degrades unresolved
//! references to `any`.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::ast::{EntityName, ImportClause, SourceFile, Statement};

/// Import binding inside one module: `local` came from `from::source_name`.
#[derive(Debug, Clone)]
struct ImportBinding {
    from: String,
    source_name: String,
    statement: usize,
}

/// Name tables of a single module.
#[derive(Debug, Default)]
struct SymbolTable {
    /// Locally declared names mapped to their statement index.
    locals: AHashMap<String, usize>,
    /// Named import bindings by local name.
    imports: AHashMap<String, ImportBinding>,
    /// Namespace imports: local name to (module specifier, statement index).
    namespaces: AHashMap<String, (String, usize)>,
}

impl SymbolTable {
    fn build(file: &SourceFile) -> Self {
        let mut table = SymbolTable::default();
        for (index, statement) in file.statements.iter().enumerate() {
            match statement {
                Statement::TypeAlias(d) => {
                    table.locals.entry(d.name.clone()).or_insert(index);
                }
                Statement::Interface(d) => {
                    table.locals.entry(d.name.clone()).or_insert(index);
                }
                Statement::Class(d) => {
                    table.locals.entry(d.name.clone()).or_insert(index);
                }
                Statement::Function(d) => {
                    table.locals.entry(d.name.clone()).or_insert(index);
                }
                Statement::Enum(d) => {
                    table.locals.entry(d.name.clone()).or_insert(index);
                }
                Statement::Var(d) => {
                    table.locals.entry(d.name.clone()).or_insert(index);
                }
                Statement::Import(import) => match &import.clause {
                    ImportClause::Named(specifiers) => {
                        for spec in specifiers {
                            table.imports.insert(
                                spec.local.clone(),
                                ImportBinding {
                                    from: import.from.clone(),
                                    source_name: spec.source_name().to_string(),
                                    statement: index,
                                },
                            );
                        }
                    }
                    ImportClause::Namespace(local) => {
                        table
                            .namespaces
                            .insert(local.clone(), (import.from.clone(), index));
                    }
                },
                Statement::ExportNamed(_) | Statement::ExportStar { .. } | Statement::Expr(_) => {}
            }
        }
        table
    }
}

/// The local import binding a resolution went through, so the rewriter can
/// pin the specifier against dead-import elimination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportRef {
    /// Statement index of the import declaration in the originating file.
    pub statement: usize,
    /// Local binding name inside that import.
    pub local: String,
}

/// A resolved defining declaration.
#[derive(Debug)]
pub struct ResolvedDecl<'a> {
    /// Specifier of the module the declaration lives in.
    pub module: &'a str,
    /// Declared name inside that module.
    pub name: &'a str,
    pub statement: &'a Statement,
    /// Set when resolution went through an import binding of the
    /// originating file.
    pub import: Option<ImportRef>,
}

/// Registry of source modules and their lazily-built symbol tables.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: AHashMap<String, SourceFile>,
    tables: RefCell<AHashMap<String, Rc<SymbolTable>>>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        ModuleGraph::default()
    }

    /// Registers a module under its specifier.
    pub fn add(&mut self, file: SourceFile) {
        self.modules.insert(file.specifier.clone(), file);
    }

    /// Looks up a registered module.
    #[must_use]
    pub fn module(&self, specifier: &str) -> Option<&SourceFile> {
        self.modules.get(specifier)
    }

    fn table_for(&self, file: &SourceFile) -> Rc<SymbolTable> {
        if let Some(table) = self.tables.borrow().get(&file.specifier) {
            return Rc::clone(table);
        }
        let table = Rc::new(SymbolTable::build(file));
        self.tables
            .borrow_mut()
            .insert(file.specifier.clone(), Rc::clone(&table));
        table
    }

    /// Finds the statement declaring `name` locally in a registered module.
    #[must_use]
    pub fn local_declaration(&self, module: &str, name: &str) -> Option<&Statement> {
        let file = self.modules.get(module)?;
        let table = self.table_for(file);
        table.locals.get(name).map(|&index| &file.statements[index])
    }

    /// Resolves a type-name occurrence in `from` to its defining
    /// declaration.
    ///
    /// `from` does not need to be registered; every module reached through
    /// imports does. Qualified names resolve through namespace imports.
    #[must_use]
    pub fn resolve<'a>(&'a self, from: &'a SourceFile, name: &EntityName) -> Option<ResolvedDecl<'a>> {
        let table = self.table_for(from);
        match name {
            EntityName::Ident(ident) => {
                if let Some(&index) = table.locals.get(ident) {
                    let statement = &from.statements[index];
                    return Some(ResolvedDecl {
                        module: &from.specifier,
                        name: declared_name(statement)?,
                        statement,
                        import: None,
                    });
                }
                let binding = table.imports.get(ident)?;
                let mut visiting = AHashSet::new();
                let Some((module, statement)) =
                    self.find_exported(&binding.from, &binding.source_name, &mut visiting)
                else {
                    tracing::trace!(name = ident.as_str(), from = binding.from.as_str(), "import binding did not reach a declaration");
                    return None;
                };
                Some(ResolvedDecl {
                    module,
                    name: declared_name(statement)?,
                    statement,
                    import: Some(ImportRef {
                        statement: binding.statement,
                        local: ident.clone(),
                    }),
                })
            }
            EntityName::Qualified(parts) => {
                let [namespace, member] = parts.as_slice() else {
                    return None;
                };
                let (module, import_statement) = table.namespaces.get(namespace)?.clone();
                let mut visiting = AHashSet::new();
                let (module, statement) = self.find_exported(&module, member, &mut visiting)?;
                Some(ResolvedDecl {
                    module,
                    name: declared_name(statement)?,
                    statement,
                    import: Some(ImportRef {
                        statement: import_statement,
                        local: namespace.clone(),
                    }),
                })
            }
        }
    }

    /// Finds the declaration exported from `module` under `name`, chasing
    /// named and star re-exports. `visiting` guards against re-export
    /// cycles.
    fn find_exported<'a>(
        &'a self,
        module: &str,
        name: &str,
        visiting: &mut AHashSet<(String, String)>,
    ) -> Option<(&'a str, &'a Statement)> {
        if !visiting.insert((module.to_string(), name.to_string())) {
            return None;
        }
        let file = self.modules.get(module)?;
        let table = self.table_for(file);

        if let Some(&index) = table.locals.get(name) {
            return Some((&file.specifier, &file.statements[index]));
        }

        // `import { X } from "m"; export { X };` re-exports an import.
        for statement in &file.statements {
            let Statement::ExportNamed(export) = statement else {
                continue;
            };
            let Some(spec) = export.specifiers.iter().find(|s| s.exported == name) else {
                continue;
            };
            let source = spec.source_name();
            if let Some(target) = &export.from {
                return self.find_exported(target, source, visiting);
            }
            if let Some(&index) = table.locals.get(source) {
                return Some((&file.specifier, &file.statements[index]));
            }
            if let Some(binding) = table.imports.get(source) {
                return self.find_exported(&binding.from, &binding.source_name, visiting);
            }
        }

        for statement in &file.statements {
            if let Statement::ExportStar { from } = statement {
                if let Some(found) = self.find_exported(from, name, visiting) {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// The declared name of a declaration statement.
fn declared_name(statement: &Statement) -> Option<&str> {
    match statement {
        Statement::TypeAlias(d) => Some(&d.name),
        Statement::Interface(d) => Some(&d.name),
        Statement::Class(d) => Some(&d.name),
        Statement::Function(d) => Some(&d.name),
        Statement::Enum(d) => Some(&d.name),
        Statement::Var(d) => Some(&d.name),
        _ => None,
    }
}
