//! `runtype` compiles the static type syntax of a dynamic-language superset
//! into compact, runtime-readable bytecode and attaches it to the values
//! that survive compilation: classes, functions, arrows, and hoisted
//! bindings for type aliases and interfaces. A companion runtime later
//! decodes the payloads for structural reflection: validators, serializers,
//! RPC marshalling and the like.
//!
//! The transformer plugs into the host compiler's pipeline: it receives a
//! syntax tree per source file (through the narrow interface in [`ast`]) and
//! returns a rewritten tree. Reflection metadata is best-effort: unresolved
//! or unsupported types degrade to `any` instead of failing the build.
//!
//! ```
//! use runtype::ast::{Keyword, SourceFile, Statement, TypeAliasDecl, TypeNode};
//! use runtype::{transformer, ReflectionMode, TransformContext};
//!
//! let file = SourceFile::new(
//!     "app",
//!     vec![Statement::TypeAlias(TypeAliasDecl::new(
//!         "A",
//!         TypeNode::Keyword(Keyword::String),
//!     ))],
//! );
//! let transformer = transformer(TransformContext::default())
//!     .with_reflection_mode(ReflectionMode::Always);
//! let out = transformer.transform_source_file(&file).unwrap();
//! // `type A = string;` gained a sibling `const __ΩA = "$";` binding.
//! assert_eq!(out.statements.len(), 2);
//! ```

pub mod ast;
pub mod bytecode;
mod compiler;
mod config;
mod error;
mod program;
mod resolver;
mod transform;

pub use crate::compiler::{hoisted_name, HOIST_PREFIX};
pub use crate::config::{mode_from_doc, ModeProbe, ReflectionMode, CONFIG_FILE};
pub use crate::error::{PackError, ProgramError, TransformError};
pub use crate::program::{CompilerProgram, FrameRef, VariableRef};
pub use crate::resolver::{ImportRef, ModuleGraph, ResolvedDecl};
pub use crate::transform::{
    transformer, ReflectionTransformer, TransformContext, TYPE_PROPERTY,
};
