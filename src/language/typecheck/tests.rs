use super::checker::{Checker, typecheck};
use crate::language::ast::{
    ArrayType, Ast, ExprId, ExprKind, Fun, FunType, Import, ImportItem, Local, LocalKind, Node,
    NodeFlags, NsExpr, NsMember, Op, PrimType, Stmt, StructType, TplInfo, TplParam, TypeId,
    TypeKind, Typedef, Unit, UnitId,
};
use crate::language::compiler::{Compiler, DiagKind};
use crate::language::package::Package;
use crate::language::span::Loc;
use crate::language::symbols::Symbol;
use crate::target::BuildTarget;
use smallvec::SmallVec;

/// Test fixture: a compiler, an AST arena and a package, plus shorthand
/// constructors for the nodes the parser would normally produce.
struct Setup {
    compiler: Compiler,
    ast: Ast,
    pkg: Package,
    file: u32,
    line: u32,
}

impl Setup {
    fn new() -> Setup {
        Setup::with_pkg("main")
    }

    fn with_pkg(path: &str) -> Setup {
        let _ = env_logger::builder().is_test(true).try_init();
        let compiler = Compiler::new(BuildTarget::host());
        let file = compiler.sources.add_file("test.kl", "");
        let ast = Ast::new(&compiler.target);
        Setup {
            compiler,
            ast,
            pkg: Package::new(path),
            file,
            line: 0,
        }
    }

    fn loc(&mut self) -> Loc {
        self.line += 1;
        Loc::new(self.file, self.line, 1, 1)
    }

    // ——— types ———

    fn int(&self) -> TypeId {
        self.ast.prim(PrimType::Int)
    }

    fn opt(&mut self, elem: TypeId) -> TypeId {
        self.ast.add_type(TypeKind::Optional { elem }, Loc::UNKNOWN)
    }

    fn array(&mut self, elem: TypeId, len: u64) -> TypeId {
        self.ast.add_type(
            TypeKind::Array(ArrayType {
                elem,
                len,
                len_expr: None,
                end_loc: Loc::UNKNOWN,
            }),
            Loc::UNKNOWN,
        )
    }

    fn reft(&mut self, elem: TypeId) -> TypeId {
        self.ast.add_type(TypeKind::Ref { elem }, Loc::UNKNOWN)
    }

    fn mutreft(&mut self, elem: TypeId) -> TypeId {
        self.ast.add_type(TypeKind::MutRef { elem }, Loc::UNKNOWN)
    }

    fn strukt(&mut self, name: &str, fields: Vec<ExprId>) -> TypeId {
        let loc = self.loc();
        self.ast.add_type(
            TypeKind::Struct(StructType {
                name: Some(Symbol::intern(name)),
                fields,
                tpl: TplInfo::None,
                ns_parent: None,
            }),
            loc,
        )
    }

    fn unresolved(&mut self, name: &str) -> TypeId {
        let loc = self.loc();
        self.ast.add_type(
            TypeKind::Unresolved {
                name: Symbol::intern(name),
                resolved: None,
            },
            loc,
        )
    }

    // ——— expressions ———

    fn id(&mut self, name: &str) -> ExprId {
        let loc = self.loc();
        let e = self.ast.add_expr(
            ExprKind::Id {
                name: Symbol::intern(name),
                target: None,
            },
            loc,
        );
        self.ast.exprs[e].flags.insert(NodeFlags::UNKNOWN);
        e
    }

    fn intlit(&mut self, value: u64) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(ExprKind::IntLit { value }, loc)
    }

    fn boollit(&mut self, value: bool) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(ExprKind::BoolLit { value }, loc)
    }

    fn local(&mut self, kind: LocalKind, name: &str, ty: TypeId, init: Option<ExprId>) -> ExprId {
        let loc = self.loc();
        let e = self.ast.add_expr(
            ExprKind::Local(Local {
                kind,
                name: Symbol::intern(name),
                name_loc: loc,
                init,
                is_this: false,
                is_mut: false,
                offset: 0,
            }),
            loc,
        );
        self.ast.exprs[e].ty = ty;
        if let Some(init) = init {
            let up = self.ast.exprs[init]
                .flags
                .intersection(NodeFlags::UNKNOWN);
            self.ast.exprs[e].flags.insert(up);
        }
        e
    }

    fn let_(&mut self, name: &str, ty: TypeId, init: ExprId) -> ExprId {
        self.local(LocalKind::Let, name, ty, Some(init))
    }

    fn var(&mut self, name: &str, ty: TypeId, init: ExprId) -> ExprId {
        self.local(LocalKind::Var, name, ty, Some(init))
    }

    fn param(&mut self, name: &str, ty: TypeId) -> ExprId {
        self.local(LocalKind::Param, name, ty, None)
    }

    fn field(&mut self, name: &str, ty: TypeId) -> ExprId {
        self.local(LocalKind::Field, name, ty, None)
    }

    fn this_param(&mut self, ty: TypeId, is_mut: bool) -> ExprId {
        let p = self.local(LocalKind::Param, "this", ty, None);
        if let ExprKind::Local(l) = &mut self.ast.exprs[p].kind {
            l.is_this = true;
            l.is_mut = is_mut;
        }
        p
    }

    fn block(&mut self, children: Vec<ExprId>) -> ExprId {
        let loc = self.loc();
        let kids: Vec<Stmt> = children.iter().map(|&e| Stmt::Expr(e)).collect();
        let b = self.ast.add_expr(
            ExprKind::Block(crate::language::ast::Block {
                children: kids,
                end_loc: loc,
            }),
            loc,
        );
        for &c in &children {
            let up = self.ast.exprs[c].flags.intersection(NodeFlags::UNKNOWN);
            self.ast.exprs[b].flags.insert(up);
        }
        b
    }

    fn ret(&mut self, value: Option<ExprId>) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(ExprKind::Return { value }, loc)
    }

    fn binop(&mut self, op: Op, left: ExprId, right: ExprId) -> ExprId {
        let loc = self.loc();
        let e = self.ast.add_expr(ExprKind::Binop { op, left, right }, loc);
        for side in [left, right] {
            let up = self.ast.exprs[side]
                .flags
                .intersection(NodeFlags::UNKNOWN);
            self.ast.exprs[e].flags.insert(up);
        }
        e
    }

    fn assign(&mut self, left: ExprId, right: ExprId) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(
            ExprKind::Assign {
                op: Op::Assign,
                left,
                right,
            },
            loc,
        )
    }

    fn prefix(&mut self, op: Op, expr: ExprId) -> ExprId {
        let loc = self.loc();
        let e = self.ast.add_expr(ExprKind::Prefix { op, expr }, loc);
        let up = self.ast.exprs[expr].flags.intersection(NodeFlags::UNKNOWN);
        self.ast.exprs[e].flags.insert(up);
        e
    }

    fn deref(&mut self, expr: ExprId) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(ExprKind::Deref { expr }, loc)
    }

    fn if_(&mut self, cond: ExprId, then_block: ExprId, else_block: Option<ExprId>) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(
            ExprKind::If(crate::language::ast::If {
                cond,
                then_block,
                else_block,
            }),
            loc,
        )
    }

    fn member(&mut self, recv: ExprId, name: &str) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(
            ExprKind::Member {
                recv,
                name: Symbol::intern(name),
                target: None,
            },
            loc,
        )
    }

    fn subscript(&mut self, recv: ExprId, index: ExprId) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(
            ExprKind::Subscript(crate::language::ast::Subscript {
                recv,
                index,
                index_val: 0,
                end_loc: loc,
            }),
            loc,
        )
    }

    fn arraylit(&mut self, values: Vec<ExprId>) -> ExprId {
        let loc = self.loc();
        self.ast
            .add_expr(ExprKind::ArrayLit { values, end_loc: loc }, loc)
    }

    fn call(&mut self, recv: ExprId, args: Vec<ExprId>) -> ExprId {
        let loc = self.loc();
        self.ast.add_expr(
            ExprKind::Call(crate::language::ast::Call {
                recv,
                args: SmallVec::from_vec(args),
                args_end_loc: loc,
            }),
            loc,
        )
    }

    fn named_arg(&mut self, name: &str, value: ExprId) -> ExprId {
        self.local(LocalKind::Param, name, self.ast.unknown(), Some(value))
    }

    fn fun(
        &mut self,
        name: &str,
        params: Vec<ExprId>,
        result: TypeId,
        body: Option<ExprId>,
    ) -> ExprId {
        self.fun_with_recv(name, None, params, result, body)
    }

    fn fun_with_recv(
        &mut self,
        name: &str,
        recv: Option<TypeId>,
        params: Vec<ExprId>,
        result: TypeId,
        body: Option<ExprId>,
    ) -> ExprId {
        let loc = self.loc();
        let result_loc = self.loc();
        let fty = self.ast.add_type(TypeKind::Fun(FunType { params, result }), loc);
        let f = self.ast.add_expr(
            ExprKind::Fun(Fun {
                name: Some(Symbol::intern(name)),
                name_loc: loc,
                body,
                recv,
                params_loc: loc,
                result_loc,
                ns_parent: None,
            }),
            loc,
        );
        self.ast.exprs[f].ty = fty;
        f
    }

    fn typedef(&mut self, ty: TypeId) -> Stmt {
        let loc = self.loc();
        Stmt::Typedef(self.ast.typedefs.alloc(Typedef {
            ty,
            flags: NodeFlags::NONE,
            loc,
        }))
    }

    fn unit(&mut self, children: Vec<Stmt>) -> UnitId {
        self.ast.units.alloc(Unit {
            children,
            imports: Vec::new(),
            srcfile: self.file,
            flags: NodeFlags::NONE,
            loc: Loc::UNKNOWN,
        })
    }

    fn unit_of_exprs(&mut self, children: Vec<ExprId>) -> UnitId {
        let stmts = children.into_iter().map(Stmt::Expr).collect();
        self.unit(stmts)
    }

    /// A package API namespace value with the given members.
    fn pkg_ns(&mut self, path: &str, members: Vec<(&str, Node)>) -> ExprId {
        let members = members
            .into_iter()
            .map(|(name, node)| NsMember {
                name: Symbol::intern(name),
                node,
            })
            .collect();
        let ns = self.ast.add_expr(
            ExprKind::Ns(NsExpr {
                name: Symbol::intern(path),
                members,
            }),
            Loc::UNKNOWN,
        );
        self.ast.exprs[ns].flags.insert(NodeFlags::PKGNS | NodeFlags::CHECKED);
        self.ast.exprs[ns].ty = self.ast.ns_type;
        ns
    }

    fn import_items(&mut self, path: &str, ns: ExprId, items: Vec<ImportItem>) -> Import {
        let loc = self.loc();
        Import {
            path: Symbol::intern(path),
            path_loc: loc,
            loc,
            name: crate::language::symbols::sym::UNDERSCORE,
            items,
            ns: Some(ns),
        }
    }

    fn item(&mut self, name: &str) -> ImportItem {
        let loc = self.loc();
        ImportItem {
            name: Symbol::intern(name),
            orig_name: None,
            loc,
            orig_name_loc: loc,
        }
    }

    fn item_renamed(&mut self, orig: &str, name: &str) -> ImportItem {
        let loc = self.loc();
        ImportItem {
            name: Symbol::intern(name),
            orig_name: Some(Symbol::intern(orig)),
            loc,
            orig_name_loc: loc,
        }
    }

    // ——— driving & assertions ———

    fn check(&mut self, units: &[UnitId]) {
        typecheck(&mut self.compiler, &mut self.ast, &mut self.pkg, units)
            .expect("typecheck aborted");
    }

    fn checker(&mut self) -> Checker<'_> {
        Checker::new(&mut self.compiler, &mut self.ast, &mut self.pkg)
    }

    fn errors(&self) -> Vec<String> {
        self.compiler
            .diagnostics()
            .iter()
            .filter(|d| d.kind == DiagKind::Error)
            .map(|d| d.message.clone())
            .collect()
    }

    fn helps(&self) -> Vec<String> {
        self.compiler
            .diagnostics()
            .iter()
            .filter(|d| d.kind == DiagKind::Help)
            .map(|d| d.message.clone())
            .collect()
    }

    fn warnings(&self) -> Vec<String> {
        self.compiler
            .diagnostics()
            .iter()
            .filter(|d| d.kind == DiagKind::Warning)
            .map(|d| d.message.clone())
            .collect()
    }

    fn assert_error(&self, needle: &str) {
        assert!(
            self.errors().iter().any(|m| m.contains(needle)),
            "expected an error containing {:?}, got: {:?}",
            needle,
            self.errors()
        );
    }

    fn assert_clean(&self) {
        assert!(
            self.compiler.diagnostics().is_empty(),
            "expected no diagnostics, got: {:?}",
            self.compiler
                .diagnostics()
                .iter()
                .map(|d| &d.context)
                .collect::<Vec<_>>()
        );
    }
}

// —————————————————————————————————————————————————————————————————————————
// diagnostics scenarios

#[test]
fn return_type_mismatch_reports_result_type() {
    // fun f() int { return true }
    let mut s = Setup::new();
    let t = s.boollit(true);
    let r = s.ret(Some(t));
    let body = s.block(vec![r]);
    let int = s.int();
    let f = s.fun("f", vec![], int, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    s.assert_error("invalid function result type: bool");
    assert!(
        s.helps().iter().any(|m| m == "function f returns int"),
        "missing help, got {:?}",
        s.helps()
    );
}

#[test]
fn optional_narrows_to_element_in_then_branch() {
    // fun f(a ?int) int { if a { a } else { 0 } }
    let mut s = Setup::new();
    let int = s.int();
    let opt_int = s.opt(int);
    let a = s.param("a", opt_int);
    let cond = s.id("a");
    let then_val = s.id("a");
    let then_b = s.block(vec![then_val]);
    let zero = s.intlit(0);
    let else_b = s.block(vec![zero]);
    let iff = s.if_(cond, then_b, Some(else_b));
    let body = s.block(vec![iff]);
    let f = s.fun("f", vec![a], int, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    s.assert_clean();
    assert_eq!(s.ast.exprs[then_b].ty, int, "then-branch value must be int");
    // narrowing is local: outside the if, the binding keeps its wider type
    assert!(matches!(
        s.ast.types[s.ast.exprs[a].ty].kind,
        TypeKind::Optional { .. }
    ));
}

#[test]
fn narrowing_rejects_or_operator() {
    // fun f(a ?int) int { if a || !a { 1 } else { 0 } }
    let mut s = Setup::new();
    let int = s.int();
    let opt_int = s.opt(int);
    let a = s.param("a", opt_int);
    let lhs = s.id("a");
    let inner = s.id("a");
    let rhs = s.prefix(Op::Not, inner);
    let cond = s.binop(Op::LOr, lhs, rhs);
    let one = s.intlit(1);
    let then_b = s.block(vec![one]);
    let zero = s.intlit(0);
    let else_b = s.block(vec![zero]);
    let iff = s.if_(cond, then_b, Some(else_b));
    let body = s.block(vec![iff]);
    let f = s.fun("f", vec![a], int, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    s.assert_error("cannot use type-narrowing let/var definition with '||' operation");
}

#[test]
fn drop_requires_mut_this_and_void() {
    // type T {}; fun T.drop(this T) {}
    let mut s = Setup::new();
    let t = s.strukt("T", vec![]);
    s.pkg.defs.insert(Symbol::intern("T"), Node::Type(t));
    let td = s.typedef(t);
    let this = s.this_param(t, false);
    let body = s.block(vec![]);
    let void = s.ast.void();
    let dropfn = s.fun_with_recv("drop", Some(t), vec![this], void, Some(body));
    let u = s.unit(vec![td, Stmt::Expr(dropfn)]);
    s.check(&[u]);

    s.assert_error("invalid signature of \"drop\" function, expecting (mut this)void");
    assert!(!s.ast.types[t].flags.contains(NodeFlags::DROP));
}

#[test]
fn drop_with_mut_this_marks_receiver() {
    let mut s = Setup::new();
    let t = s.strukt("T", vec![]);
    s.pkg.defs.insert(Symbol::intern("T"), Node::Type(t));
    let td = s.typedef(t);
    let this = s.this_param(t, true);
    let body = s.block(vec![]);
    let void = s.ast.void();
    let dropfn = s.fun_with_recv("drop", Some(t), vec![this], void, Some(body));
    let u = s.unit(vec![td, Stmt::Expr(dropfn)]);
    s.check(&[u]);

    s.assert_clean();
    assert!(s.ast.types[t].flags.contains(NodeFlags::DROP));
}

#[test]
fn excess_array_literal_value() {
    // var x [int 3] = [1,2,3,4]
    let mut s = Setup::new();
    let int = s.int();
    let at = s.array(int, 3);
    let vals: Vec<ExprId> = (1..=4).map(|v| s.intlit(v)).collect();
    let lit = s.arraylit(vals);
    let x = s.var("x", at, lit);
    let u = s.unit_of_exprs(vec![x]);
    s.check(&[u]);

    s.assert_error("excess value in array literal");
}

#[test]
fn star_import_shadowing_previous_import() {
    // import a from "p"; import * from "q" -- where q also exports a
    let mut s = Setup::new();
    let int = s.int();
    let one = s.intlit(1);
    let a_p = s.let_("a", int, one);
    s.ast.exprs[a_p].flags.insert(NodeFlags::CHECKED);
    let two = s.intlit(2);
    let a_q = s.let_("a", int, two);
    s.ast.exprs[a_q].flags.insert(NodeFlags::CHECKED);

    let ns_p = s.pkg_ns("p", vec![("a", Node::Expr(a_p))]);
    let ns_q = s.pkg_ns("q", vec![("a", Node::Expr(a_q))]);

    let item_a = s.item("a");
    let im_p = s.import_items("p", ns_p, vec![item_a]);
    let star = s.item("_");
    let im_q = s.import_items("q", ns_q, vec![star]);

    let u = s.unit(vec![]);
    s.ast.units[u].imports = vec![im_p, im_q];
    s.check(&[u]);

    s.assert_error("importing \"a\" shadows previous import");
}

#[test]
fn assigning_wider_integer_to_narrower_let() {
    // let x int = 256; let y i8 = x
    let mut s = Setup::new();
    let int = s.int();
    let i8t = s.ast.prim(PrimType::I8);
    let v = s.intlit(256);
    let x = s.let_("x", int, v);
    let xref = s.id("x");
    let y = s.let_("y", i8t, xref);
    let u = s.unit_of_exprs(vec![x, y]);
    s.check(&[u]);

    let errors = s.errors();
    assert_eq!(
        errors,
        vec!["cannot assign value of type int to let of type i8".to_string()]
    );
}

#[test]
fn template_instances_are_cached() {
    // type Foo<T, U = int> { x T; y U }; var v Foo<bool>; var w Foo<bool>
    let mut s = Setup::new();
    let loc = s.loc();
    let p_t = s.ast.tplparams.alloc(TplParam {
        name: Symbol::intern("T"),
        loc,
        default: None,
    });
    let int = s.int();
    let p_u = s.ast.tplparams.alloc(TplParam {
        name: Symbol::intern("U"),
        loc,
        default: Some(Node::Type(int)),
    });
    let ph_t = s.ast.add_type(TypeKind::Placeholder { param: p_t }, loc);
    let ph_u = s.ast.add_type(TypeKind::Placeholder { param: p_u }, loc);
    let fx = s.field("x", ph_t);
    let fy = s.field("y", ph_u);
    let foo = s.strukt("Foo", vec![fx, fy]);
    if let TypeKind::Struct(st) = &mut s.ast.types[foo].kind {
        st.tpl = TplInfo::Params(vec![p_t, p_u]);
    }
    s.ast.types[foo].flags.insert(NodeFlags::TEMPLATE);
    s.pkg.defs.insert(Symbol::intern("Foo"), Node::Type(foo));
    let td = s.typedef(foo);

    let bool_t = s.ast.prim(PrimType::Bool);
    let use_v = s.ast.add_type(
        TypeKind::Template(crate::language::ast::TemplateType {
            recv: foo,
            args: SmallVec::from_vec(vec![Node::Type(bool_t)]),
        }),
        loc,
    );
    let use_w = s.ast.add_type(
        TypeKind::Template(crate::language::ast::TemplateType {
            recv: foo,
            args: SmallVec::from_vec(vec![Node::Type(bool_t)]),
        }),
        loc,
    );
    let v = s.local(LocalKind::Var, "v", use_v, None);
    let w = s.local(LocalKind::Var, "w", use_w, None);
    let u = s.unit(vec![td, Stmt::Expr(v), Stmt::Expr(w)]);
    s.check(&[u]);

    s.assert_clean();
    let vt = s.ast.exprs[v].ty;
    let wt = s.ast.exprs[w].ty;
    assert_eq!(vt, wt, "second use must reuse the cached instance");
    assert_ne!(vt, foo);
    assert!(s.ast.types[vt].flags.contains(NodeFlags::TEMPLATEI));
    assert!(!s.ast.types[vt].flags.contains(NodeFlags::TEMPLATE));
    // the instance's fields are concrete
    let TypeKind::Struct(st) = &s.ast.types[vt].kind else {
        panic!("instance is not a struct");
    };
    assert_eq!(s.ast.exprs[st.fields[0]].ty, bool_t);
    assert_eq!(s.ast.exprs[st.fields[1]].ty, int);
}

// —————————————————————————————————————————————————————————————————————————
// compatibility oracle laws

#[test]
fn assignable_is_reflexive() {
    let mut s = Setup::new();
    let int = s.int();
    let opt = s.opt(int);
    let r = s.reft(int);
    let mr = s.mutreft(int);
    let at = s.array(int, 4);
    let chk = s.checker();
    for t in [int, opt, r, mr, at] {
        assert!(chk.assignable(t, t), "assignable must hold for T <- T");
        assert!(chk.equivalent(t, t));
    }
}

#[test]
fn reference_mutability_rules() {
    let mut s = Setup::new();
    let int = s.int();
    let r = s.reft(int);
    let mr = s.mutreft(int);
    let chk = s.checker();
    assert!(chk.assignable(r, mr), "&T <- mut&T");
    assert!(!chk.assignable(mr, r), "mut&T <- &T must be rejected");
    assert!(chk.assignable(int, r), "T <- &T reads through the reference");
}

#[test]
fn optional_accepts_element_and_optional() {
    let mut s = Setup::new();
    let int = s.int();
    let opt = s.opt(int);
    let opt2 = s.opt(int);
    let chk = s.checker();
    assert!(chk.assignable(opt, int));
    assert!(chk.assignable(opt, opt2));
    assert!(!chk.assignable(int, opt));
}

#[test]
fn slice_from_array_reference() {
    let mut s = Setup::new();
    let int = s.int();
    let at = s.array(int, 3);
    let r_at = s.reft(at);
    let mr_at = s.mutreft(at);
    let slice = s.ast.add_type(TypeKind::Slice { elem: int }, Loc::UNKNOWN);
    let mslice = s.ast.add_type(TypeKind::MutSlice { elem: int }, Loc::UNKNOWN);
    let chk = s.checker();
    assert!(chk.assignable(slice, r_at), "&[T] <- &[T N]");
    assert!(chk.assignable(slice, mslice), "&[T] <- mut&[T]");
    assert!(chk.assignable(mslice, mr_at), "mut&[T] <- mut&[T N]");
    assert!(!chk.assignable(mslice, r_at), "mut&[T] <- &[T N] rejected");
}

#[test]
fn owner_struct_cannot_be_copied_out_of_reference() {
    let mut s = Setup::new();
    let t = s.strukt("Res", vec![]);
    s.ast.types[t].flags.insert(NodeFlags::DROP | NodeFlags::CHECKED);
    let r = s.reft(t);
    let chk = s.checker();
    assert!(chk.is_owner(t));
    // identity assignment is a move and stays legal
    assert!(chk.assignable(t, t));
    // but reading the owner out of a reference would copy it
    assert!(!chk.assignable(t, r), "Res <- &Res must be rejected");
}

#[test]
fn int_aliases_concrete_width() {
    let mut s = Setup::new();
    let int = s.int();
    let concrete = if s.compiler.target.int_size() == 8 {
        s.ast.prim(PrimType::I64)
    } else {
        s.ast.prim(PrimType::I32)
    };
    let chk = s.checker();
    assert!(chk.equivalent(int, concrete));
    assert!(chk.equivalent(concrete, int));
    assert!(chk.assignable(int, concrete));
}

#[test]
fn compatible_is_symmetric() {
    let mut s = Setup::new();
    let int = s.int();
    let r = s.reft(int);
    let mr = s.mutreft(int);
    let chk = s.checker();
    for (x, y) in [(int, r), (r, mr), (int, int)] {
        assert_eq!(chk.compatible(x, y), chk.compatible(y, x));
    }
}

#[test]
fn alias_of_owner_is_owner() {
    let mut s = Setup::new();
    let t = s.strukt("Res", vec![]);
    s.ast.types[t].flags.insert(NodeFlags::DROP | NodeFlags::CHECKED);
    let alias = s.ast.add_type(
        TypeKind::Alias(crate::language::ast::AliasType {
            name: Symbol::intern("Handle"),
            elem: t,
            tpl: TplInfo::None,
            ns_parent: None,
        }),
        Loc::UNKNOWN,
    );
    let int = s.int();
    let prim_alias = s.ast.add_type(
        TypeKind::Alias(crate::language::ast::AliasType {
            name: Symbol::intern("Num"),
            elem: int,
            tpl: TplInfo::None,
            ns_parent: None,
        }),
        Loc::UNKNOWN,
    );
    let chk = s.checker();
    assert!(chk.is_owner(alias));
    assert!(!chk.is_owner(prim_alias), "aliases of primitives never own");
}

// —————————————————————————————————————————————————————————————————————————
// interning

#[test]
fn structural_clone_interns_to_same_type() {
    let mut s = Setup::new();
    let int = s.int();
    let fx = s.field("x", int);
    let st = s.strukt("Point", vec![fx]);
    let clone = s.ast.clone_type(st);
    let mut chk = s.checker();
    let a = chk.check_type(st);
    let b = chk.check_type(clone);
    assert_eq!(a, b, "structurally equal types must intern to one instance");
}

#[test]
fn distinct_structures_do_not_intern_together() {
    let mut s = Setup::new();
    let int = s.int();
    let bool_t = s.ast.prim(PrimType::Bool);
    let fx = s.field("x", int);
    let fy = s.field("x", bool_t);
    let a = s.strukt("P", vec![fx]);
    let b = s.strukt("P", vec![fy]);
    let mut chk = s.checker();
    let a = chk.check_type(a);
    let b = chk.check_type(b);
    assert_ne!(a, b);
}

// —————————————————————————————————————————————————————————————————————————
// checking behaviors

#[test]
fn rechecking_is_idempotent() {
    let mut s = Setup::new();
    let int = s.int();
    let v = s.intlit(1);
    let x = s.let_("x", int, v);
    let u = s.unit_of_exprs(vec![x]);
    s.check(&[u]);
    s.assert_clean();
    let ty_before = s.ast.exprs[x].ty;
    let exprs_before = s.ast.exprs.len();
    s.check(&[u]);
    s.assert_clean();
    assert_eq!(s.ast.exprs[x].ty, ty_before);
    assert_eq!(s.ast.exprs.len(), exprs_before, "re-run must not grow the arena");
}

#[test]
fn integer_literal_overflow() {
    let mut s = Setup::new();
    let i8t = s.ast.prim(PrimType::I8);
    let v = s.intlit(256);
    let x = s.let_("x", i8t, v);
    let u = s.unit_of_exprs(vec![x]);
    s.check(&[u]);
    s.assert_error("integer constant overflows i8");
}

#[test]
fn unknown_identifier_gets_fuzzy_suggestion() {
    let mut s = Setup::new();
    let int = s.int();
    let v = s.intlit(3);
    let length = s.let_("length", int, v);
    let bad = s.id("lenth");
    let y = s.let_("y", int, bad);
    let u = s.unit_of_exprs(vec![length, y]);
    s.check(&[u]);

    s.assert_error("unknown identifier \"lenth\"");
    assert!(
        s.helps().iter().any(|m| m == "did you mean \"length\""),
        "got {:?}",
        s.helps()
    );
}

#[test]
fn renamed_import_feeds_did_you_mean() {
    // import *, print as p from "rt"; print(...)  ->  did you mean "p"
    let mut s = Setup::new();
    let int = s.int();
    let void = s.ast.void();
    let body = s.block(vec![]);
    let print_fn = s.fun("print", vec![], void, Some(body));
    s.ast.exprs[print_fn].flags.insert(NodeFlags::CHECKED);
    let ns = s.pkg_ns("rt", vec![("print", Node::Expr(print_fn))]);
    let star = s.item("_");
    let renamed = s.item_renamed("print", "p");
    let im = s.import_items("rt", ns, vec![star, renamed]);

    let bad = s.id("print");
    let x = s.let_("x", int, bad);
    let u = s.unit_of_exprs(vec![x]);
    s.ast.units[u].imports = vec![im];
    s.check(&[u]);

    s.assert_error("unknown identifier \"print\"");
    assert!(
        s.helps().iter().any(|m| m == "did you mean \"p\""),
        "got {:?}",
        s.helps()
    );
}

#[test]
fn unused_expression_warning() {
    // fun f() { 3 }  -- the literal's value goes nowhere
    let mut s = Setup::new();
    let lit = s.intlit(3);
    let body = s.block(vec![lit]);
    let void = s.ast.void();
    let f = s.fun("f", vec![], void, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    assert!(
        s.warnings().iter().any(|m| m.starts_with("unused")),
        "expected an unused-value warning, got {:?}",
        s.warnings()
    );
}

#[test]
fn call_arity_mismatch() {
    let mut s = Setup::new();
    let int = s.int();
    let a = s.param("a", int);
    let b = s.param("b", int);
    let zero = s.intlit(0);
    let r = s.ret(Some(zero));
    let body = s.block(vec![r]);
    let add = s.fun("add", vec![a, b], int, Some(body));

    let callee = s.id("add");
    let one = s.intlit(1);
    let call = s.call(callee, vec![one]);
    let x = s.let_("x", int, call);
    let u = s.unit_of_exprs(vec![add, x]);
    s.check(&[u]);

    s.assert_error("not enough arguments in function call, expected 2");
}

#[test]
fn positional_after_named_argument() {
    let mut s = Setup::new();
    let int = s.int();
    let a = s.param("a", int);
    let b = s.param("b", int);
    let zero = s.intlit(0);
    let r = s.ret(Some(zero));
    let body = s.block(vec![r]);
    let add = s.fun("add", vec![a, b], int, Some(body));

    let callee = s.id("add");
    let one = s.intlit(1);
    let named = s.named_arg("a", one);
    let two = s.intlit(2);
    let call = s.call(callee, vec![named, two]);
    let x = s.let_("x", int, call);
    let u = s.unit_of_exprs(vec![add, x]);
    s.check(&[u]);

    s.assert_error("positional argument after named argument(s)");
}

#[test]
fn unknown_named_argument() {
    let mut s = Setup::new();
    let int = s.int();
    let a = s.param("a", int);
    let zero = s.intlit(0);
    let r = s.ret(Some(zero));
    let body = s.block(vec![r]);
    let f = s.fun("f", vec![a], int, Some(body));

    let callee = s.id("f");
    let one = s.intlit(1);
    let named = s.named_arg("nope", one);
    let call = s.call(callee, vec![named]);
    let x = s.let_("x", int, call);
    let u = s.unit_of_exprs(vec![f, x]);
    s.check(&[u]);

    s.assert_error("unknown named argument \"nope\"");
}

#[test]
fn member_resolves_field_and_method() {
    // type P { x int }; fun P.getx(this P) int { return 0 }
    // fun f(p P) int { return p.x }
    let mut s = Setup::new();
    let int = s.int();
    let fx = s.field("x", int);
    let pt = s.strukt("P", vec![fx]);
    s.pkg.defs.insert(Symbol::intern("P"), Node::Type(pt));
    let td = s.typedef(pt);

    let this = s.this_param(pt, false);
    let zero = s.intlit(0);
    let r0 = s.ret(Some(zero));
    let mbody = s.block(vec![r0]);
    let getx = s.fun_with_recv("getx", Some(pt), vec![this], int, Some(mbody));

    let p = s.param("p", pt);
    let pid = s.id("p");
    let px = s.member(pid, "x");
    let r = s.ret(Some(px));
    let body = s.block(vec![r]);
    let f = s.fun("f", vec![p], int, Some(body));

    let u = s.unit(vec![td, Stmt::Expr(getx), Stmt::Expr(f)]);
    s.check(&[u]);

    s.assert_clean();
    assert_eq!(s.ast.exprs[px].ty, int);
    let ExprKind::Member { target, .. } = s.ast.exprs[px].kind else {
        panic!("member node replaced");
    };
    assert_eq!(target, Some(fx));
}

#[test]
fn member_through_optional_is_rejected_with_help() {
    let mut s = Setup::new();
    let int = s.int();
    let fx = s.field("x", int);
    let pt = s.strukt("P", vec![fx]);
    s.pkg.defs.insert(Symbol::intern("P"), Node::Type(pt));
    let td = s.typedef(pt);

    let opt_p = s.opt(pt);
    let p = s.param("p", opt_p);
    let pid = s.id("p");
    let px = s.member(pid, "x");
    let underscore = s.id("_");
    let discard = s.assign(underscore, px);
    let body = s.block(vec![discard]);
    let void = s.ast.void();
    let f = s.fun("f", vec![p], void, Some(body));
    let u = s.unit(vec![td, Stmt::Expr(f)]);
    s.check(&[u]);

    s.assert_error("may not be valid");
    assert!(
        s.helps().iter().any(|m| m.starts_with("check p before access")),
        "got {:?}",
        s.helps()
    );
}

#[test]
fn constant_subscript_bounds_check() {
    // fun f(xs [int 3]) int { return xs[4] }
    let mut s = Setup::new();
    let int = s.int();
    let at = s.array(int, 3);
    let xs = s.param("xs", at);
    let xsid = s.id("xs");
    let four = s.intlit(4);
    let sub = s.subscript(xsid, four);
    let r = s.ret(Some(sub));
    let body = s.block(vec![r]);
    let f = s.fun("f", vec![xs], int, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    s.assert_error("out of bounds: element 4 of array [int 3]");
}

#[test]
fn primitive_cast_to_same_type_collapses() {
    // let x int = int(3)  -- the cast disappears
    let mut s = Setup::new();
    let int = s.int();
    let callee = s.id("num");
    s.pkg.defs.insert(Symbol::intern("num"), Node::Type(int));
    let three = s.intlit(3);
    let call = s.call(callee, vec![three]);
    let x = s.let_("x", int, call);
    let u = s.unit_of_exprs(vec![x]);
    s.check(&[u]);

    s.assert_clean();
    // the let's initializer is now the literal itself
    let ExprKind::Local(l) = &s.ast.exprs[x].kind else {
        panic!()
    };
    assert_eq!(l.init, Some(three));
}

#[test]
fn assigning_to_let_is_rejected() {
    let mut s = Setup::new();
    let int = s.int();
    let v = s.intlit(1);
    let x = s.let_("x", int, v);
    let xid = s.id("x");
    let two = s.intlit(2);
    let asg = s.assign(xid, two);
    let body = s.block(vec![x, asg]);
    let void = s.ast.void();
    let f = s.fun("f", vec![], void, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    s.assert_error("cannot assign to let \"x\"");
}

#[test]
fn deref_of_borrowed_owner_is_rejected() {
    // fun f(p &Res) { _ = *p }  -- would move the owner out of a borrow
    let mut s = Setup::new();
    let res = s.strukt("Res", vec![]);
    s.ast.types[res].flags.insert(NodeFlags::DROP | NodeFlags::CHECKED);
    let r = s.reft(res);
    let p = s.param("p", r);
    let pid = s.id("p");
    let star = s.deref(pid);
    let underscore = s.id("_");
    let discard = s.assign(underscore, star);
    let body = s.block(vec![discard]);
    let void = s.ast.void();
    let f = s.fun("f", vec![p], void, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    s.assert_error("cannot transfer ownership of borrowed &Res");
}

#[test]
fn main_function_shape_is_enforced() {
    let mut s = Setup::new();
    let int = s.int();
    let a = s.param("a", int);
    let zero = s.intlit(0);
    let r = s.ret(Some(zero));
    let body = s.block(vec![r]);
    let mainfn = s.fun("main", vec![a], int, Some(body));
    let u = s.unit_of_exprs(vec![mainfn]);
    s.check(&[u]);

    s.assert_error("special \"main\" function should not accept any input parameters");
    s.assert_error("special \"main\" function should not return a result");
    assert_eq!(s.pkg.main_fun, Some(mainfn));
}

#[test]
fn owner_propagation_through_post_analysis() {
    // type A {}; type B { a A }; fun A.drop(mut this) {}
    // B only becomes an owner once A's drop has been seen.
    let mut s = Setup::new();
    let a_ty = s.strukt("A", vec![]);
    s.pkg.defs.insert(Symbol::intern("A"), Node::Type(a_ty));
    let fa = s.field("a", a_ty);
    let b_ty = s.strukt("B", vec![fa]);
    s.pkg.defs.insert(Symbol::intern("B"), Node::Type(b_ty));
    let td_a = s.typedef(a_ty);
    let td_b = s.typedef(b_ty);

    let this = s.this_param(a_ty, true);
    let dbody = s.block(vec![]);
    let void = s.ast.void();
    let dropfn = s.fun_with_recv("drop", Some(a_ty), vec![this], void, Some(dbody));

    let u = s.unit(vec![td_a, td_b, Stmt::Expr(dropfn)]);
    s.check(&[u]);

    s.assert_clean();
    assert!(s.ast.types[a_ty].flags.contains(NodeFlags::DROP));
    assert!(
        s.ast.types[b_ty].flags.contains(NodeFlags::SUBOWNERS),
        "post-analysis must propagate ownership into B"
    );
}

#[test]
fn alias_cycle_is_broken() {
    // type A = B; type B = A
    let mut s = Setup::new();
    let ub = s.unresolved("B");
    let ua = s.unresolved("A");
    let a = s.ast.add_type(
        TypeKind::Alias(crate::language::ast::AliasType {
            name: Symbol::intern("A"),
            elem: ub,
            tpl: TplInfo::None,
            ns_parent: None,
        }),
        Loc::UNKNOWN,
    );
    let b = s.ast.add_type(
        TypeKind::Alias(crate::language::ast::AliasType {
            name: Symbol::intern("B"),
            elem: ua,
            tpl: TplInfo::None,
            ns_parent: None,
        }),
        Loc::UNKNOWN,
    );
    s.pkg.defs.insert(Symbol::intern("A"), Node::Type(a));
    s.pkg.defs.insert(Symbol::intern("B"), Node::Type(b));
    let td_a = s.typedef(a);
    let td_b = s.typedef(b);
    let u = s.unit(vec![td_a, td_b]);
    s.check(&[u]);

    s.assert_error("cyclic type alias");
}

#[test]
fn template_arity_error_points_at_parameters() {
    let mut s = Setup::new();
    let loc = s.loc();
    let p_t = s.ast.tplparams.alloc(TplParam {
        name: Symbol::intern("T"),
        loc,
        default: None,
    });
    let ph_t = s.ast.add_type(TypeKind::Placeholder { param: p_t }, loc);
    let fx = s.field("x", ph_t);
    let foo = s.strukt("Box", vec![fx]);
    if let TypeKind::Struct(st) = &mut s.ast.types[foo].kind {
        st.tpl = TplInfo::Params(vec![p_t]);
    }
    s.ast.types[foo].flags.insert(NodeFlags::TEMPLATE);
    s.pkg.defs.insert(Symbol::intern("Box"), Node::Type(foo));
    let td = s.typedef(foo);

    let use_t = s.ast.add_type(
        TypeKind::Template(crate::language::ast::TemplateType {
            recv: foo,
            args: SmallVec::new(),
        }),
        loc,
    );
    let v = s.local(LocalKind::Var, "v", use_t, None);
    let u = s.unit(vec![td, Stmt::Expr(v)]);
    s.check(&[u]);

    s.assert_error("not enough template parameters; want 1");
    assert!(
        s.helps().iter().any(|m| m.contains("template parameter defined here")),
        "got {:?}",
        s.helps()
    );
}

#[test]
fn package_lookup_upgrades_visibility() {
    let mut s = Setup::new();
    let int = s.int();
    let zero = s.intlit(0);
    let r = s.ret(Some(zero));
    let gbody = s.block(vec![r]);
    let g = s.fun("g", vec![], int, Some(gbody));
    s.pkg.defs.insert(Symbol::intern("g"), Node::Expr(g));

    let callee = s.id("g");
    let call = s.call(callee, vec![]);
    let x = s.let_("x", int, call);
    let u = s.unit_of_exprs(vec![x]);
    s.check(&[u]);

    s.assert_clean();
    assert!(
        s.ast.exprs[g].flags.vis() >= crate::language::ast::Visibility::Pkg,
        "cross-unit use must raise visibility to pkg"
    );
}

#[test]
fn condition_must_be_bool_or_optional() {
    let mut s = Setup::new();
    let int = s.int();
    let cond = s.intlit(1);
    let then_b = s.block(vec![]);
    let iff = s.if_(cond, then_b, None);
    let body = s.block(vec![iff]);
    let void = s.ast.void();
    let f = s.fun("f", vec![], void, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    s.assert_error("conditional is not a boolean nor an optional type");
}

#[test]
fn rvalue_if_without_else_wraps_optional() {
    // fun f(c bool) ?int { if c { 3 } }
    let mut s = Setup::new();
    let int = s.int();
    let opt_int = s.opt(int);
    let bool_t = s.ast.prim(PrimType::Bool);
    let c = s.param("c", bool_t);
    let cid = s.id("c");
    let three = s.intlit(3);
    let then_b = s.block(vec![three]);
    let iff = s.if_(cid, then_b, None);
    let body = s.block(vec![iff]);
    let f = s.fun("f", vec![c], opt_int, Some(body));
    let u = s.unit_of_exprs(vec![f]);
    s.check(&[u]);

    s.assert_clean();
    assert!(matches!(
        s.ast.types[s.ast.exprs[iff].ty].kind,
        TypeKind::Optional { .. }
    ));
}

#[test]
fn operator_must_be_defined_for_type() {
    // struct values only support ==, != and =
    let mut s = Setup::new();
    let pt = s.strukt("P", vec![]);
    s.pkg.defs.insert(Symbol::intern("P"), Node::Type(pt));
    let td = s.typedef(pt);
    let a = s.param("a", pt);
    let b = s.param("b", pt);
    let aid = s.id("a");
    let bid = s.id("b");
    let sum = s.binop(Op::Add, aid, bid);
    let underscore = s.id("_");
    let discard = s.assign(underscore, sum);
    let body = s.block(vec![discard]);
    let void = s.ast.void();
    let f = s.fun("f", vec![a, b], void, Some(body));
    let u = s.unit(vec![td, Stmt::Expr(f)]);
    s.check(&[u]);

    s.assert_error("has no '+' operator");
}

#[test]
fn no_unknown_types_survive_a_clean_check() {
    let mut s = Setup::new();
    let int = s.int();
    let v = s.intlit(1);
    let x = s.let_("x", int, v);
    let xid = s.id("x");
    let y = s.let_("y", int, xid);
    let u = s.unit_of_exprs(vec![x, y]);
    s.check(&[u]);
    s.assert_clean();

    for (_, expr) in s.ast.exprs.iter() {
        if expr.flags.contains(NodeFlags::CHECKED) {
            assert_ne!(
                expr.ty,
                s.ast.prim(PrimType::Unknown),
                "checked expression left with unknown type"
            );
        }
    }
}
