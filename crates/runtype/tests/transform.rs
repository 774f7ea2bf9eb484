use pretty_assertions::assert_eq;
use runtype::ast::{
    ClassDecl, EntityName, Expr, FunctionDecl, HeritageRef, ImportClause, ImportDecl,
    ImportSpecifier, InterfaceDecl, Keyword, Literal, MappedModifier, MappedType, Member, Param,
    Property, PropertySignature, SourceFile, Statement, TypeAliasDecl, TypeNode, TypeParam,
    VarDecl,
};
use runtype::bytecode::dis::disassemble_encoded;
use runtype::{transformer, ModuleGraph, ReflectionMode, ReflectionTransformer, TransformContext};

fn always(graph: ModuleGraph) -> ReflectionTransformer {
    transformer(TransformContext::new(graph)).with_reflection_mode(ReflectionMode::Always)
}

fn transform(file: &SourceFile) -> SourceFile {
    always(ModuleGraph::new()).transform_source_file(file).unwrap()
}

/// Extracts the encoded opcode string from a payload expression.
fn encoded(expr: &Expr) -> &str {
    match expr {
        Expr::Literal(Literal::Str(s)) => s,
        Expr::Array(items) => match items.last() {
            Some(Expr::Literal(Literal::Str(s))) => s,
            other => panic!("expected a trailing encoded string, got {other:?}"),
        },
        other => panic!("expected a payload expression, got {other:?}"),
    }
}

fn listing(expr: &Expr) -> String {
    disassemble_encoded(encoded(expr)).unwrap()
}

fn hoisted<'a>(file: &'a SourceFile, name: &str) -> &'a Expr {
    file.statements
        .iter()
        .find_map(|s| match s {
            Statement::Var(v) if v.name == name => v.init.as_ref(),
            _ => None,
        })
        .unwrap_or_else(|| panic!("missing hoisted binding {name}"))
}

fn static_type_member(class: &ClassDecl) -> &Expr {
    class
        .members
        .iter()
        .find_map(|m| match m {
            Member::Property(p) if p.name == "__type" && p.is_static => p.initializer.as_ref(),
            _ => None,
        })
        .expect("class should carry a static __type member")
}

#[test]
fn string_alias_hoists_a_single_op_program() {
    // type A = string;
    let file = SourceFile::new(
        "app",
        vec![Statement::TypeAlias(TypeAliasDecl::new(
            "A",
            TypeNode::Keyword(Keyword::String),
        ))],
    );
    let out = transform(&file);
    assert_eq!(out.statements.len(), 2);
    // The binding lands immediately after the declaration.
    assert!(matches!(&out.statements[1], Statement::Var(v) if v.name == "__ΩA"));
    assert_eq!(listing(hoisted(&out, "__ΩA")), "string");
}

#[test]
fn union_alias_is_frameless_at_top_level() {
    // type A = string | number;
    let file = SourceFile::new(
        "app",
        vec![Statement::TypeAlias(TypeAliasDecl::new(
            "A",
            TypeNode::Union(vec![
                TypeNode::Keyword(Keyword::String),
                TypeNode::Keyword(Keyword::Number),
            ]),
        ))],
    );
    let out = transform(&file);
    assert_eq!(listing(hoisted(&out, "__ΩA")), "string number union");
}

#[test]
fn generic_interface_binds_its_template() {
    // interface Box<T> { v: T; }
    let file = SourceFile::new(
        "app",
        vec![Statement::Interface(InterfaceDecl {
            name: "Box".to_string(),
            type_params: vec![TypeParam::new("T")],
            extends: vec![],
            members: vec![Member::PropertySignature(PropertySignature::new(
                "v",
                TypeNode::reference("T"),
            ))],
            exported: false,
            doc: None,
        })],
    );
    let out = transform(&file);
    assert_eq!(
        listing(hoisted(&out, "__ΩBox")),
        "template(0) loads(0, 0) propertySignature(1) objectLiteral"
    );
    // Stack holds the template name and the member name, in order.
    let Expr::Array(items) = hoisted(&out, "__ΩBox") else {
        panic!("expected an array payload");
    };
    assert_eq!(items[0], Expr::str("T"));
    assert_eq!(items[1], Expr::str("v"));
}

#[test]
fn class_gains_a_static_type_member() {
    // class M { title: string; }
    let file = SourceFile::new(
        "app",
        vec![Statement::Class(ClassDecl::new(
            "M",
            vec![Member::Property(Property::new(
                "title",
                TypeNode::Keyword(Keyword::String),
            ))],
        ))],
    );
    let out = transform(&file);
    let Statement::Class(class) = &out.statements[0] else {
        panic!("class statement expected");
    };
    assert_eq!(listing(static_type_member(class)), "string property(0) class");
}

#[test]
fn mapped_alias_compiles_to_a_coroutine() {
    // type Partial<T> = { [P in keyof T]?: T[P] }
    let file = SourceFile::new(
        "app",
        vec![Statement::TypeAlias(TypeAliasDecl {
            name: "Partial".to_string(),
            type_params: vec![TypeParam::new("T")],
            ty: TypeNode::Mapped(Box::new(MappedType {
                parameter: "P".to_string(),
                constraint: Some(TypeNode::keyof(TypeNode::reference("T"))),
                value: Some(TypeNode::indexed(
                    TypeNode::reference("T"),
                    TypeNode::reference("P"),
                )),
                optional: MappedModifier::Add,
                readonly: MappedModifier::None,
            })),
            exported: false,
            doc: None,
        })],
    );
    let out = transform(&file);
    assert_eq!(
        listing(hoisted(&out, "__ΩPartial")),
        "jump(10) loads(2, 0) loads(1, 0) query return \
         template(0) frame var loads(1, 0) keyOf mappedType(2, 1)"
    );
}

#[test]
fn receive_type_calls_get_their_payload_injected() {
    // function f<T>(x: ReceiveType<T>) {}; f<string>()
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Function(FunctionDecl {
                name: "f".to_string(),
                type_params: vec![TypeParam::new("T")],
                params: vec![Param::new(
                    "x",
                    TypeNode::reference_with("ReceiveType", vec![TypeNode::reference("T")]),
                )],
                return_type: None,
                exported: false,
                doc: None,
            }),
            Statement::Expr(Expr::Call(Box::new(runtype::ast::CallExpr {
                callee: Expr::ident("f"),
                type_args: vec![TypeNode::Keyword(Keyword::String)],
                args: vec![],
            }))),
        ],
    );
    let out = transform(&file);
    // The function declaration is followed by its own payload assignment,
    // so the call is the third statement.
    let Statement::Expr(Expr::Call(call)) = &out.statements[2] else {
        panic!("call statement expected, got {:?}", out.statements[2]);
    };
    assert_eq!(call.args.len(), 1);
    assert_eq!(disassemble_encoded(encoded(&call.args[0])).unwrap(), "string");
}

#[test]
fn receive_type_pads_missing_arguments() {
    // function g<T>(first: number, marker: ReceiveType<T>) {}; g<string>()
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Function(FunctionDecl {
                name: "g".to_string(),
                type_params: vec![TypeParam::new("T")],
                params: vec![
                    Param::new("first", TypeNode::Keyword(Keyword::Number)),
                    Param::new(
                        "marker",
                        TypeNode::reference_with("ReceiveType", vec![TypeNode::reference("T")]),
                    ),
                ],
                return_type: None,
                exported: false,
                doc: None,
            }),
            Statement::Expr(Expr::Call(Box::new(runtype::ast::CallExpr {
                callee: Expr::ident("g"),
                type_args: vec![TypeNode::Keyword(Keyword::String)],
                args: vec![],
            }))),
        ],
    );
    let out = transform(&file);
    let Statement::Expr(Expr::Call(call)) = &out.statements[2] else {
        panic!("call statement expected");
    };
    assert_eq!(call.args.len(), 2);
    assert_eq!(call.args[0], Expr::Undefined);
}

#[test]
fn function_declarations_gain_a_property_assignment() {
    let file = SourceFile::new(
        "app",
        vec![Statement::Function(FunctionDecl::new(
            "greet",
            vec![Param::new("name", TypeNode::Keyword(Keyword::String))],
            Some(TypeNode::Keyword(Keyword::Void)),
        ))],
    );
    let out = transform(&file);
    assert_eq!(out.statements.len(), 2);
    let Statement::Expr(Expr::Assign { target, value }) = &out.statements[1] else {
        panic!("assignment statement expected");
    };
    assert_eq!(
        **target,
        Expr::member(Expr::ident("greet"), "__type")
    );
    assert_eq!(listing(value), "string parameter(0) void function(1)");
}

#[test]
fn arrows_are_wrapped_with_object_assign() {
    // const double = (x: number) => x;
    let file = SourceFile::new(
        "app",
        vec![Statement::Var(VarDecl::const_(
            "double",
            Expr::Arrow(Box::new(runtype::ast::ArrowFn {
                params: vec![Param::new("x", TypeNode::Keyword(Keyword::Number))],
                return_type: None,
                body: Expr::ident("x"),
            })),
        ))],
    );
    let out = transform(&file);
    let Statement::Var(var) = &out.statements[0] else {
        panic!("var statement expected");
    };
    let Some(Expr::Call(call)) = &var.init else {
        panic!("expected an Object.assign wrap, got {:?}", var.init);
    };
    assert_eq!(call.callee, Expr::member(Expr::ident("Object"), "assign"));
    assert_eq!(call.args.len(), 2);
    assert!(matches!(call.args[0], Expr::Arrow(_)));
    let Expr::Object(props) = &call.args[1] else {
        panic!("expected the payload object");
    };
    assert_eq!(props[0].0, "__type");
    assert_eq!(listing(&props[0].1), "number parameter(0) any function(1)");
}

#[test]
fn helper_calls_receive_the_first_type_argument() {
    // typeOf<string>(): a synthetic empty array fills the value slot.
    let file = SourceFile::new(
        "app",
        vec![Statement::Expr(Expr::Call(Box::new(runtype::ast::CallExpr {
            callee: Expr::ident("typeOf"),
            type_args: vec![TypeNode::Keyword(Keyword::String)],
            args: vec![],
        })))],
    );
    let out = transform(&file);
    let Statement::Expr(Expr::Call(call)) = &out.statements[0] else {
        panic!("call statement expected");
    };
    assert_eq!(call.args.len(), 2);
    assert_eq!(call.args[0], Expr::Array(vec![]));
    assert_eq!(disassemble_encoded(encoded(&call.args[1])).unwrap(), "string");
}

#[test]
fn helper_calls_keep_existing_arguments() {
    let file = SourceFile::new(
        "app",
        vec![Statement::Expr(Expr::Call(Box::new(runtype::ast::CallExpr {
            callee: Expr::ident("valuesOf"),
            type_args: vec![TypeNode::Keyword(Keyword::Number)],
            args: vec![Expr::ident("existing")],
        })))],
    );
    let out = transform(&file);
    let Statement::Expr(Expr::Call(call)) = &out.statements[0] else {
        panic!("call statement expected");
    };
    assert_eq!(call.args.len(), 2);
    assert_eq!(call.args[0], Expr::ident("existing"));
}

#[test]
fn never_mode_returns_the_tree_unchanged() {
    // No tag, no override, no configuration file: the default is `never`.
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Class(ClassDecl::new(
                "M",
                vec![Member::Property(Property::new(
                    "title",
                    TypeNode::Keyword(Keyword::String),
                ))],
            )),
            Statement::TypeAlias(TypeAliasDecl::new("A", TypeNode::Keyword(Keyword::String))),
        ],
    );
    let out = transformer(TransformContext::default())
        .transform_source_file(&file)
        .unwrap();
    assert_eq!(out, file);
}

#[test]
fn never_tag_suppresses_a_single_carrier() {
    let mut class = ClassDecl::new(
        "Hidden",
        vec![Member::Property(Property::new(
            "x",
            TypeNode::Keyword(Keyword::String),
        ))],
    );
    class.doc = Some("/** @reflection never */".to_string());
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Class(class.clone()),
            Statement::Class(ClassDecl::new(
                "Visible",
                vec![Member::Property(Property::new(
                    "y",
                    TypeNode::Keyword(Keyword::Number),
                ))],
            )),
        ],
    );
    let out = transform(&file);
    assert_eq!(out.statements[0], Statement::Class(class));
    let Statement::Class(visible) = &out.statements[1] else {
        panic!("class statement expected");
    };
    assert_eq!(listing(static_type_member(visible)), "number property(0) class");
}

#[test]
fn foreign_alias_embeds_after_the_imports() {
    let mut graph = ModuleGraph::new();
    graph.add(SourceFile::new(
        "lib",
        vec![Statement::TypeAlias(TypeAliasDecl::new(
            "Id",
            TypeNode::Keyword(Keyword::Number),
        ))],
    ));
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Import(ImportDecl {
                from: "lib".to_string(),
                clause: ImportClause::Named(vec![ImportSpecifier::named("Id")]),
            }),
            Statement::TypeAlias(TypeAliasDecl::new("Local", TypeNode::reference("Id"))),
        ],
    );
    let out = always(graph).transform_source_file(&file).unwrap();
    // import, foreign embed, alias, local hoist
    assert!(matches!(&out.statements[0], Statement::Import(_)));
    assert!(matches!(&out.statements[1], Statement::Var(v) if v.name == "__ΩId"));
    assert_eq!(listing(hoisted(&out, "__ΩId")), "number");
    assert_eq!(listing(hoisted(&out, "__ΩLocal")), "inline(0)");
    let Expr::Array(items) = hoisted(&out, "__ΩLocal") else {
        panic!("expected an array payload");
    };
    assert_eq!(items[0], Expr::thunk(Expr::ident("__ΩId")));
}

#[test]
fn class_imports_are_pinned_as_synthetic() {
    let mut graph = ModuleGraph::new();
    graph.add(SourceFile::new(
        "models",
        vec![Statement::Class(ClassDecl::new("User", vec![]))],
    ));
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Import(ImportDecl {
                from: "models".to_string(),
                clause: ImportClause::Named(vec![ImportSpecifier::named("User")]),
            }),
            Statement::TypeAlias(TypeAliasDecl::new("Ref", TypeNode::reference("User"))),
        ],
    );
    let out = always(graph).transform_source_file(&file).unwrap();
    let Statement::Import(import) = &out.statements[0] else {
        panic!("import statement expected");
    };
    let ImportClause::Named(specifiers) = &import.clause else {
        panic!("named import expected");
    };
    assert!(specifiers[0].synthetic, "the live class binding must survive elision");
    assert_eq!(listing(hoisted(&out, "__ΩRef")), "classReference(0)");
    let Expr::Array(items) = hoisted(&out, "__ΩRef") else {
        panic!("expected an array payload");
    };
    assert_eq!(items[0], Expr::thunk(Expr::ident("User")));
}

#[test]
fn enum_references_emit_live_thunks() {
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Enum(runtype::ast::EnumDecl {
                name: "Color".to_string(),
                members: vec!["Red".to_string(), "Green".to_string()],
                exported: false,
                doc: None,
            }),
            Statement::TypeAlias(TypeAliasDecl::new("C", TypeNode::reference("Color"))),
        ],
    );
    let out = transform(&file);
    assert_eq!(listing(hoisted(&out, "__ΩC")), "enum(0)");
    let Expr::Array(items) = hoisted(&out, "__ΩC") else {
        panic!("expected an array payload");
    };
    assert_eq!(items[0], Expr::thunk(Expr::ident("Color")));
}

#[test]
fn hoisting_runs_to_fixpoint_through_reference_chains() {
    // A references B; B references C; all three get exactly one binding.
    let file = SourceFile::new(
        "app",
        vec![
            Statement::TypeAlias(TypeAliasDecl::new("A", TypeNode::reference("B"))),
            Statement::TypeAlias(TypeAliasDecl::new("B", TypeNode::reference("C"))),
            Statement::TypeAlias(TypeAliasDecl::new("C", TypeNode::Keyword(Keyword::String))),
        ],
    );
    let out = transform(&file);
    for name in ["__ΩA", "__ΩB", "__ΩC"] {
        let count = out
            .statements
            .iter()
            .filter(|s| matches!(s, Statement::Var(v) if v.name == name))
            .count();
        assert_eq!(count, 1, "{name} must be hoisted exactly once");
    }
    assert_eq!(listing(hoisted(&out, "__ΩC")), "string");
}

#[test]
fn cyclic_aliases_terminate_with_by_name_references() {
    // type A = B[]; type B = A[]; the cycle breaks through `inline`.
    let file = SourceFile::new(
        "app",
        vec![
            Statement::TypeAlias(TypeAliasDecl::new(
                "A",
                TypeNode::array(TypeNode::reference("B")),
            )),
            Statement::TypeAlias(TypeAliasDecl::new(
                "B",
                TypeNode::array(TypeNode::reference("A")),
            )),
        ],
    );
    let out = transform(&file);
    assert_eq!(listing(hoisted(&out, "__ΩA")), "inline(0) array");
    assert_eq!(listing(hoisted(&out, "__ΩB")), "inline(0) array");
}

#[test]
fn qualified_references_mangle_with_underscores() {
    let mut graph = ModuleGraph::new();
    graph.add(SourceFile::new(
        "lib",
        vec![Statement::TypeAlias(TypeAliasDecl::new(
            "Inner",
            TypeNode::Keyword(Keyword::Boolean),
        ))],
    ));
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Import(ImportDecl {
                from: "lib".to_string(),
                clause: ImportClause::Namespace("ns".to_string()),
            }),
            Statement::TypeAlias(TypeAliasDecl::new(
                "Use",
                TypeNode::Reference {
                    name: EntityName::Qualified(vec!["ns".to_string(), "Inner".to_string()]),
                    args: vec![],
                },
            )),
        ],
    );
    let out = always(graph).transform_source_file(&file).unwrap();
    assert_eq!(listing(hoisted(&out, "__Ωns_Inner")), "boolean");
    let Expr::Array(items) = hoisted(&out, "__ΩUse") else {
        panic!("expected an array payload");
    };
    assert_eq!(items[0], Expr::thunk(Expr::ident("__Ωns_Inner")));
}

#[test]
fn interface_inheritance_merges_without_duplicates() {
    let file = SourceFile::new(
        "app",
        vec![
            Statement::Interface(InterfaceDecl::new(
                "Base",
                vec![
                    Member::PropertySignature(PropertySignature::new(
                        "id",
                        TypeNode::Keyword(Keyword::Number),
                    )),
                    Member::PropertySignature(PropertySignature::new(
                        "name",
                        TypeNode::Keyword(Keyword::String),
                    )),
                ],
            )),
            Statement::Interface(InterfaceDecl {
                name: "Child".to_string(),
                type_params: vec![],
                extends: vec![HeritageRef {
                    name: EntityName::ident("Base"),
                    args: vec![],
                }],
                members: vec![Member::PropertySignature(PropertySignature::new(
                    "name",
                    TypeNode::Keyword(Keyword::Boolean),
                ))],
                exported: false,
                doc: None,
            }),
        ],
    );
    let out = transform(&file);
    assert_eq!(
        listing(hoisted(&out, "__ΩChild")),
        "boolean propertySignature(0) number propertySignature(1) objectLiteral"
    );
}

#[test]
fn bundles_pass_through_untouched() {
    let bundle = vec![SourceFile::new("a", vec![]), SourceFile::new("b", vec![])];
    let out = transformer(TransformContext::default()).transform_bundle(bundle.clone());
    assert_eq!(out, bundle);
}
