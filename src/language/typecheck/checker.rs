use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use super::instantiate::InstanceKey;
use crate::language::ast::{
    Ast, ExprId, ExprKind, Import, Local, LocalKind, Node, NodeFlags, NsParent, Op, PrimType,
    Stmt, TypeConsArgs, TypeId, TypeKind, TypedefId, UnitId, Visibility,
};
use crate::language::compiler::{Compiler, DiagKind};
use crate::language::errors::CheckError;
use crate::language::package::Package;
use crate::language::scope::Scope;
use crate::language::span::Loc;
use crate::language::symbols::{self, Symbol, sym};

/// Names we may want to suggest when an identifier fails to resolve; fed by
/// renamed imports (`x as y`).
struct DidYouMean {
    name: Symbol,
    other_name: Option<Symbol>,
    loc: Loc,
}

/// The type checking and late identifier resolution pass over one package.
pub struct Checker<'a> {
    pub(super) compiler: &'a mut Compiler,
    pub(super) ast: &'a mut Ast,
    pub(super) pkg: &'a mut Package,
    pub(super) scope: Scope<Node>,
    /// Concrete spelling of `int` and `uint` for the target.
    pub(super) int_type: TypeId,
    pub(super) uint_type: TypeId,
    /// Function currently being checked.
    fun: Option<ExprId>,
    typectx: TypeId,
    typectx_stack: Vec<TypeId>,
    ns_path: Vec<NsParent>,
    /// Types whose owner classification depends on functions defined later;
    /// value marks "processed".
    postanalyze: HashMap<TypeId, bool>,
    /// type-id => canonical type.
    typeid_map: HashMap<Symbol, TypeId>,
    pub(super) instance_cache: HashMap<InstanceKey, TypeId>,
    pub(super) reported_error: bool,
    err: Option<CheckError>,
    pub_nest: u32,
    pub(super) template_nest: u32,
    didyoumean: Vec<DidYouMean>,
}

/// Type-checks every unit of `pkg`, resolving identifiers, canonicalizing
/// user types and decorating the AST in place. Diagnostics are delivered
/// through `compiler`; only unrecoverable failures produce an `Err`.
pub fn typecheck(
    compiler: &mut Compiler,
    ast: &mut Ast,
    pkg: &mut Package,
    units: &[UnitId],
) -> Result<(), CheckError> {
    let int_type = ast.prim(if compiler.target.int_size() == 8 {
        PrimType::I64
    } else {
        PrimType::I32
    });
    let uint_type = ast.prim(if compiler.target.int_size() == 8 {
        PrimType::U64
    } else {
        PrimType::U32
    });
    let typectx = ast.void();

    let mut a = Checker {
        compiler,
        ast,
        pkg,
        scope: Scope::new(),
        int_type,
        uint_type,
        fun: None,
        typectx,
        typectx_stack: Vec::new(),
        ns_path: Vec::new(),
        postanalyze: HashMap::new(),
        typeid_map: HashMap::new(),
        instance_cache: HashMap::new(),
        reported_error: false,
        err: None,
        pub_nest: 0,
        template_nest: 0,
        didyoumean: Vec::new(),
    };

    a.enter_scope(); // package scope

    for &unit in units {
        a.enter_scope();
        a.ns_path.push(NsParent::Unit(unit));

        let imports: Vec<Import> = a.ast.units[unit].imports.clone();
        for im in &imports {
            a.import(im);
        }

        // make top-level declarations visible to each other regardless of
        // source order
        let mut children = a.ast.units[unit].children.clone();
        for &child in &children {
            a.assign_nsparent(child);
            a.define_at_unit_level(child);
        }

        for child in children.iter_mut() {
            *child = a.stmt(*child);
        }
        a.ast.units[unit].children = children;

        a.ns_path.pop();
        a.leave_scope();
    }

    a.postanalyze_all();
    a.leave_scope(); // package scope

    match a.err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl<'a> Checker<'a> {
    /// A checker primed for direct use in tests; `typecheck` is the normal
    /// entry point.
    #[cfg(test)]
    pub(super) fn new(
        compiler: &'a mut Compiler,
        ast: &'a mut Ast,
        pkg: &'a mut Package,
    ) -> Checker<'a> {
        let int_type = ast.prim(if compiler.target.int_size() == 8 {
            PrimType::I64
        } else {
            PrimType::I32
        });
        let uint_type = ast.prim(if compiler.target.int_size() == 8 {
            PrimType::U64
        } else {
            PrimType::U32
        });
        let typectx = ast.void();
        Checker {
            compiler,
            ast,
            pkg,
            scope: Scope::new(),
            int_type,
            uint_type,
            fun: None,
            typectx,
            typectx_stack: Vec::new(),
            ns_path: Vec::new(),
            postanalyze: HashMap::new(),
            typeid_map: HashMap::new(),
            instance_cache: HashMap::new(),
            reported_error: false,
            err: None,
            pub_nest: 0,
            template_nest: 0,
            didyoumean: Vec::new(),
        }
    }

    // ——— diagnostics ———

    pub(super) fn error(&mut self, loc: Loc, msg: String) {
        self.reported_error = true;
        let origin = self.compiler.sources.origin(loc);
        self.compiler.report(DiagKind::Error, origin, msg);
    }

    pub(super) fn warning(&mut self, loc: Loc, msg: String) {
        let origin = self.compiler.sources.origin(loc);
        self.compiler.report(DiagKind::Warning, origin, msg);
    }

    pub(super) fn help(&mut self, loc: Loc, msg: String) {
        let origin = self.compiler.sources.origin(loc);
        self.compiler.report(DiagKind::Help, origin, msg);
    }

    fn out_of_mem(&mut self) {
        self.error(Loc::UNKNOWN, "out of memory".to_string());
        if self.err.is_none() {
            self.err = Some(CheckError::OutOfMemory);
        }
    }

    pub(super) fn no_error(&self) -> bool {
        self.err.is_none() && self.compiler.errcount() == 0
    }

    fn error_incompatible_types(&mut self, origin: ExprId, x: TypeId, y: TypeId) {
        let msg = format!(
            "incompatible types {} and {} in {}",
            self.ast.fmt_type(x),
            self.ast.fmt_type(y),
            self.ast.describe_expr(origin)
        );
        self.error(self.ast.exprs[origin].loc, msg);
    }

    fn error_unassignable_type(&mut self, dst: ExprId, src: ExprId) {
        let mut origin = self.ast.exprs[dst].loc;
        if let Some(init) = self.ast.exprs[dst].kind.as_local().and_then(|l| l.init) {
            if self.ast.exprs[init].loc.is_known() {
                origin = self.ast.exprs[init].loc;
            }
        }

        // a narrowed source means the optional is known-empty here
        let src_narrowed = self.ast.exprs[src].flags.contains(NodeFlags::NARROWED)
            || match self.ast.exprs[src].kind {
                ExprKind::Id {
                    target: Some(Node::Expr(t)),
                    ..
                } => self.ast.exprs[t].flags.contains(NodeFlags::NARROWED),
                _ => false,
            };
        if src_narrowed && self.ast.exprs[src].ty == self.ast.void() {
            let msg = format!("optional value {} is empty here", self.ast.fmt_expr(src));
            self.error(self.ast.exprs[src].loc, msg);
            return;
        }

        let mut srctype = self.ast.exprs[src].ty;
        if self.ast.exprs[dst].flags.contains(NodeFlags::NARROWED) {
            if let TypeKind::Optional { elem } = self.ast.types[srctype].kind {
                srctype = elem;
            }
        }

        let msg = format!(
            "cannot assign value of type {} to {} of type {}",
            self.ast.fmt_type(srctype),
            self.ast.describe_expr(dst),
            self.ast.fmt_type(self.ast.exprs[dst].ty)
        );
        self.error(origin, msg);
    }

    // ——— context stacks ———

    fn typectx_push(&mut self, t: TypeId) {
        self.typectx_stack.push(self.typectx);
        self.typectx = t;
    }

    fn typectx_pop(&mut self) {
        self.typectx = self.typectx_stack.pop().expect("typectx underflow");
    }

    pub(super) fn enter_scope(&mut self) {
        self.scope.push();
        trace!("enter scope #{}", self.scope.depth());
    }

    pub(super) fn leave_scope(&mut self) {
        trace!("leave scope #{}", self.scope.depth());
        self.scope.pop();
    }

    fn enter_ns(&mut self, n: NsParent) {
        self.ns_path.push(n);
    }

    fn leave_ns(&mut self) {
        self.ns_path.pop();
    }

    fn current_ns(&self) -> Option<NsParent> {
        self.ns_path.last().copied()
    }

    // ——— name binding ———

    fn lookup(&mut self, name: Symbol) -> Option<Node> {
        debug_assert_ne!(name, sym::UNDERSCORE);
        if let Some(n) = self.scope.lookup(name, u32::MAX) {
            trace!("lookup \"{}\" in scope", name);
            self.ast.incuse(n);
            return Some(n);
        }
        let n = self.pkg.def(name)?;
        trace!("lookup \"{}\" in pkg", name);
        // the node is used across units of the same package
        self.ast.flags_mut(n).upgrade_vis(Visibility::Pkg);
        self.ast.incuse(n);
        Some(n)
    }

    fn define(&mut self, name: Symbol, n: Node) {
        if name == sym::UNDERSCORE {
            return;
        }
        trace!("define \"{}\" => {}", name, self.ast.fmt_node(n));
        if let Some(existing) = self.scope.lookup(name, 0) {
            let msg = format!("duplicate definition \"{}\"", name);
            self.error(self.ast.loc(n), msg);
            let prev_loc = self.ast.loc(existing);
            if prev_loc.is_known() {
                self.warning(prev_loc, format!("\"{}\" previously defined here", name));
            }
        }
        self.scope.define(name, n);
    }

    // ——— type interning (C2) ———

    /// Returns the canonical structural key for `t`, computing and caching
    /// it on first use.
    pub(super) fn typeid(&mut self, t: TypeId) -> Symbol {
        if let Some(tid) = self.ast.types[t].tid {
            return tid;
        }
        let mut s = String::new();
        self.typeid_append(t, &mut s);
        let tid = Symbol::intern(&s);
        self.ast.types[t].tid = Some(tid);
        tid
    }

    fn typeid_append(&self, t: TypeId, out: &mut String) {
        match &self.ast.types[t].kind {
            TypeKind::Prim(_) => {
                // int/uint canonicalize to the target's concrete integer
                let c = self.concrete(t);
                let p = self.ast.types[c].kind.prim().unwrap_or(PrimType::Unknown);
                out.push((b'A' + p as u8) as char);
            }
            TypeKind::Array(a) => {
                out.push('Y');
                out.push_str(&a.len.to_string());
                out.push(';');
                self.typeid_append(a.elem, out);
            }
            TypeKind::Fun(f) => {
                out.push('F');
                out.push('(');
                for &p in &f.params {
                    self.typeid_append(self.ast.exprs[p].ty, out);
                    out.push(',');
                }
                out.push(')');
                self.typeid_append(f.result, out);
            }
            TypeKind::Ptr { elem } => {
                out.push('P');
                self.typeid_append(*elem, out);
            }
            TypeKind::Ref { elem } => {
                out.push('R');
                self.typeid_append(*elem, out);
            }
            TypeKind::MutRef { elem } => {
                out.push('M');
                self.typeid_append(*elem, out);
            }
            TypeKind::Slice { elem } => {
                out.push('S');
                self.typeid_append(*elem, out);
            }
            TypeKind::MutSlice { elem } => {
                out.push('W');
                self.typeid_append(*elem, out);
            }
            TypeKind::Optional { elem } => {
                out.push('O');
                self.typeid_append(*elem, out);
            }
            TypeKind::Struct(st) => {
                out.push('X');
                if let Some(name) = st.name {
                    out.push_str(name.as_str());
                }
                out.push('{');
                for &f in &st.fields {
                    if let Some(l) = self.ast.exprs[f].kind.as_local() {
                        out.push_str(l.name.as_str());
                    }
                    out.push(':');
                    self.typeid_append(self.ast.exprs[f].ty, out);
                    out.push(';');
                }
                out.push('}');
            }
            TypeKind::Alias(a) => {
                out.push('L');
                out.push_str(a.name.as_str());
                out.push('=');
                self.typeid_append(a.elem, out);
            }
            TypeKind::Ns => out.push('N'),
            TypeKind::Template(tt) => {
                out.push('G');
                self.typeid_append(tt.recv, out);
                out.push('<');
                for &arg in &tt.args {
                    match arg {
                        Node::Type(t) => self.typeid_append(t, out),
                        Node::Expr(e) => out.push_str(&self.ast.fmt_expr(e)),
                    }
                    out.push(',');
                }
                out.push('>');
            }
            TypeKind::Placeholder { param } => {
                out.push('H');
                out.push_str(self.ast.tplparams[*param].name.as_str());
            }
            TypeKind::Unresolved { name, .. } => {
                out.push('U');
                out.push_str(name.as_str());
            }
        }
    }

    /// Interns a user type by its type-id. Returns the canonical instance
    /// and whether `t` became it.
    pub(super) fn intern_usertype(&mut self, t: TypeId) -> (TypeId, bool) {
        let tid = self.typeid(t);
        match self.typeid_map.get(&tid) {
            Some(&canon) => {
                if canon != t {
                    trace!("interned type dedup {}", self.ast.fmt_type(canon));
                }
                (canon, false)
            }
            None => {
                self.typeid_map.insert(tid, t);
                trace!("interned type add {}", self.ast.fmt_type(t));
                (t, true)
            }
        }
    }

    // ——— checker-made nodes ———

    fn mkreftype(&mut self, elem: TypeId, mutable: bool, loc: Loc) -> TypeId {
        let kind = if mutable {
            TypeKind::MutRef { elem }
        } else {
            TypeKind::Ref { elem }
        };
        let t = self.ast.add_type(kind, loc);
        self.ast.types[t].flags = self.ast.types[elem]
            .flags
            .intersection(NodeFlags::CHECKED);
        self.ast.types[t].size = self.compiler.target.ptr_size();
        self.ast.types[t].align = self.compiler.target.ptr_size() as u8;
        self.ast.transfer_nuse(Node::Type(t), Node::Type(elem));
        t
    }

    fn mkderef(&mut self, refval: ExprId, loc: Loc) -> ExprId {
        let n = self.ast.add_expr(ExprKind::Deref { expr: refval }, loc);
        self.ast.exprs[n].flags = self.ast.exprs[refval]
            .flags
            .intersection(NodeFlags::RVALUE | NodeFlags::CHECKED);
        let rt = self.ast.exprs[refval].ty;
        self.ast.exprs[n].ty = match self.ast.types[rt].kind {
            TypeKind::Ptr { elem } | TypeKind::Ref { elem } | TypeKind::MutRef { elem } => elem,
            _ => self.ast.void(),
        };
        self.ast.transfer_nuse(Node::Expr(n), Node::Expr(refval));
        n
    }

    fn mkretexpr(&mut self, value: ExprId, loc: Loc) -> ExprId {
        let n = self.ast.add_expr(ExprKind::Return { value: Some(value) }, loc);
        self.ast.exprs[n].flags = self.ast.exprs[value]
            .flags
            .intersection(NodeFlags::CHECKED);
        self.ast.exprs[value].flags.insert(NodeFlags::RVALUE);
        self.ast.exprs[n].ty = self.ast.exprs[value].ty;
        self.ast.transfer_nuse(Node::Expr(n), Node::Expr(value));
        n
    }

    /// Wraps a reference-like rvalue in an implicit deref when the
    /// destination is not reference-like.
    fn implicit_rvalue_deref(&mut self, ltype: TypeId, rval: ExprId) -> ExprId {
        let l = self.unwrap_alias(ltype);
        let r = self.unwrap_alias(self.ast.exprs[rval].ty);
        if !self.is_ref_like(l) && self.is_ref_like(r) {
            let loc = self.ast.exprs[rval].loc;
            self.mkderef(rval, loc)
        } else {
            rval
        }
    }

    // ——— statements ———

    pub(super) fn stmt(&mut self, s: Stmt) -> Stmt {
        if self.reported_error {
            return s;
        }
        match s {
            Stmt::Typedef(td) => {
                if !self.ast.typedefs[td].flags.contains(NodeFlags::CHECKED) {
                    self.ast.typedefs[td].flags.insert(NodeFlags::CHECKED);
                    self.typedef(td);
                }
                s
            }
            Stmt::Expr(e) => Stmt::Expr(self.expr(e)),
        }
    }

    fn typedef(&mut self, td: TypedefId) {
        let vis_pub = self.ast.typedefs[td].flags.vis() == Visibility::Pub;
        self.pub_nest += vis_pub as u32;
        let ty = self.check_type(self.ast.typedefs[td].ty);
        self.ast.typedefs[td].ty = ty;
        self.pub_nest -= vis_pub as u32;

        let name = match &self.ast.types[ty].kind {
            TypeKind::Struct(st) => st.name,
            TypeKind::Alias(a) => Some(a.name),
            _ => None,
        };
        if let Some(name) = name {
            self.define(name, Node::Type(ty));
        }
    }

    // ——— expressions ———

    /// Checks one expression, assigning its type and resolving names.
    /// Returns the node that replaces it in the parent's slot (usually the
    /// same node; calls and casts may collapse).
    pub(super) fn expr(&mut self, id: ExprId) -> ExprId {
        if self.ast.exprs[id].flags.contains(NodeFlags::CHECKED) {
            return id;
        }
        self.ast.exprs[id].flags.insert(NodeFlags::CHECKED);
        if self.reported_error {
            return id;
        }

        let vis_pub = self.ast.exprs[id].flags.vis() == Visibility::Pub;
        self.pub_nest += vis_pub as u32;
        let t = self.check_type(self.ast.exprs[id].ty);
        self.ast.exprs[id].ty = t;
        self.pub_nest -= vis_pub as u32;

        match &self.ast.exprs[id].kind {
            ExprKind::Fun(_) => {
                self.fun_expr(id);
                id
            }
            ExprKind::If(_) => {
                self.if_expr(id);
                id
            }
            ExprKind::Id { .. } => {
                self.id_expr(id);
                id
            }
            ExprKind::Ns(_) => {
                self.error(
                    self.ast.exprs[id].loc,
                    "NOT IMPLEMENTED: namespace expression".to_string(),
                );
                self.ast.exprs[id].ty = self.typectx;
                id
            }
            ExprKind::For(_) => {
                self.error(
                    self.ast.exprs[id].loc,
                    "NOT IMPLEMENTED: for expression".to_string(),
                );
                self.ast.exprs[id].ty = self.typectx;
                id
            }
            ExprKind::Return { .. } => {
                self.ret_expr(id);
                id
            }
            ExprKind::Binop { .. } => {
                self.binop(id);
                id
            }
            ExprKind::Assign { .. } => {
                self.assign(id);
                id
            }
            ExprKind::Block(_) => {
                self.enter_scope();
                self.block_noscope(id);
                self.leave_scope();
                id
            }
            ExprKind::Call(_) => self.call(id),
            ExprKind::TypeCons(_) => self.typecons(id),
            ExprKind::Member { .. } => {
                self.member(id);
                id
            }
            ExprKind::Subscript(_) => {
                self.subscript(id);
                id
            }
            ExprKind::Deref { .. } => {
                self.deref(id);
                id
            }
            ExprKind::Prefix { .. } | ExprKind::Postfix { .. } => {
                self.unaryop(id);
                id
            }
            ExprKind::BoolLit { .. } => {
                self.ast.exprs[id].ty = self.ast.bool_type();
                id
            }
            ExprKind::IntLit { .. } => {
                self.intlit(id);
                id
            }
            ExprKind::FloatLit { .. } => {
                self.floatlit(id);
                id
            }
            ExprKind::StrLit { .. } => {
                self.strlit(id);
                id
            }
            ExprKind::ArrayLit { .. } => {
                self.arraylit(id);
                id
            }
            ExprKind::Local(l) => match l.kind {
                LocalKind::Field | LocalKind::Param => {
                    self.local(id);
                    id
                }
                LocalKind::Var | LocalKind::Let => {
                    self.local_var(id);
                    id
                }
            },
        }
    }

    // ——— identifiers (C4 consumers) ———

    fn id_expr(&mut self, id: ExprId) {
        let ExprKind::Id { name, target } = self.ast.exprs[id].kind else {
            return;
        };

        let target = if target.is_none() || self.ast.exprs[id].flags.contains(NodeFlags::UNKNOWN)
        {
            let Some(found) = self.lookup(name) else {
                self.unknown_identifier(id, name);
                return;
            };
            self.ast.exprs[id].flags.remove(NodeFlags::UNKNOWN);
            if let ExprKind::Id { target, .. } = &mut self.ast.exprs[id].kind {
                *target = Some(found);
            }
            found
        } else {
            target.unwrap()
        };

        match target {
            Node::Type(t) => {
                // the identifier names a type
                let t = self.check_type(t);
                self.ast.exprs[id].ty = t;
                if let ExprKind::Id { target, .. } = &mut self.ast.exprs[id].kind {
                    *target = Some(Node::Type(t));
                }
            }
            Node::Expr(referent) => {
                let r2 = self.expr(referent);
                if r2 != referent {
                    if let ExprKind::Id { target, .. } = &mut self.ast.exprs[id].kind {
                        *target = Some(Node::Expr(r2));
                    }
                }
                let id_ty = self.ast.exprs[id].ty;
                let narrowed = self.ast.exprs[id].flags.contains(NodeFlags::NARROWED)
                    && matches!(self.ast.types[id_ty].kind, TypeKind::Optional { .. });
                if !narrowed {
                    self.ast.exprs[id].ty = self.ast.exprs[r2].ty;
                }
            }
        }
    }

    fn unknown_identifier(&mut self, id: ExprId, name: Symbol) {
        let loc = self.ast.exprs[id].loc;
        self.error(loc, format!("unknown identifier \"{}\"", name));

        // exact matches recorded from renamed imports come first
        let mut nsuggestions = 0;
        let hits: Vec<(Symbol, Loc)> = self
            .didyoumean
            .iter()
            .filter(|d| d.name == name || d.other_name == Some(name))
            .map(|d| (d.name, d.loc))
            .collect();
        for (dname, dloc) in hits {
            self.help(dloc, format!("did you mean \"{}\"", dname));
            nsuggestions += 1;
        }
        if nsuggestions > 0 {
            return;
        }

        // fuzzy match against everything in scope
        let mut entries: Vec<(Symbol, Node)> = Vec::new();
        self.scope.iterate(u32::MAX, |n, node| {
            entries.push((n, node));
            true
        });
        let mut seen: HashSet<Symbol> = HashSet::new();
        let mut best: Option<(usize, Symbol, Loc)> = None;
        for (cand, node) in entries {
            // shadowed bindings were visited first; skip the rest
            if !seen.insert(cand) {
                continue;
            }
            let dist = levenshtein(name.as_str(), cand.as_str());
            if best.as_ref().is_none_or(|&(d, _, _)| dist < d) {
                best = Some((dist, cand, self.ast.loc(node)));
            }
        }
        const MAX_EDIT_DIST: usize = 2;
        if let Some((dist, cand, loc)) = best {
            if dist <= MAX_EDIT_DIST {
                self.help(loc, format!("did you mean \"{}\"", cand));
            }
        }
    }

    fn didyoumean_add(&mut self, name: Symbol, loc: Loc, other_name: Option<Symbol>) {
        self.didyoumean.push(DidYouMean {
            name,
            other_name,
            loc,
        });
    }

    // ——— locals ———

    fn local(&mut self, id: ExprId) {
        let declared = self.check_type(self.ast.exprs[id].ty);
        self.ast.exprs[id].ty = declared;

        let l = match self.ast.exprs[id].kind.as_local() {
            Some(l) => l.clone(),
            None => return,
        };

        if let Some(init) = l.init {
            self.typectx_push(declared);
            let init = self.expr(init);
            self.typectx_pop();
            if let Some(lm) = self.local_mut(id) {
                lm.init = Some(init);
            }

            let declared = self.ast.exprs[id].ty;
            if declared == self.ast.unknown()
                || matches!(self.ast.types[declared].kind, TypeKind::Unresolved { .. })
            {
                self.ast.exprs[id].ty = self.ast.exprs[init].ty;
            } else {
                let mut rtype = self.ast.exprs[init].ty;
                if self.ast.exprs[id].flags.contains(NodeFlags::NARROWED)
                    && declared != self.ast.void()
                {
                    // a narrowed definition reads the optional's element
                    if let TypeKind::Optional { elem } = self.ast.types[rtype].kind {
                        rtype = elem;
                    }
                }
                if !self.assignable(declared, rtype) {
                    self.error_unassignable_type(id, init);
                } else {
                    let init = self.implicit_rvalue_deref(declared, init);
                    if let Some(lm) = self.local_mut(id) {
                        lm.init = Some(init);
                    }
                }
            }
        }

        if l.is_this {
            self.this_type(id);
        }

        let ty = self.ast.exprs[id].ty;
        if (ty == self.ast.void() || ty == self.ast.unknown())
            && !self.ast.exprs[id].flags.contains(NodeFlags::NARROWED)
        {
            let msg = format!(
                "cannot define {} of type void",
                self.ast.describe_expr(id)
            );
            self.error(self.ast.exprs[id].loc, msg);
        }

        if l.name == sym::UNDERSCORE && self.is_owner(ty) {
            // owners need names; a later pass tracks ownership by name
            let unique = Symbol::intern_formatted(format_args!(
                "{}var{:x}",
                symbols::INTERNAL_PREFIX,
                u32::from(id.into_raw())
            ));
            if let Some(lm) = self.local_mut(id) {
                lm.name = unique;
            }
        }
    }

    fn local_mut(&mut self, id: ExprId) -> Option<&mut Local> {
        match &mut self.ast.exprs[id].kind {
            ExprKind::Local(l) => Some(l),
            _ => None,
        }
    }

    fn local_var(&mut self, id: ExprId) {
        self.local(id);
        if let Some(l) = self.ast.exprs[id].kind.as_local() {
            self.define(l.name, Node::Expr(id));
        }
    }

    /// Checks a local reached outside the expression dispatch (struct
    /// fields, funtype parameters).
    fn check_local(&mut self, id: ExprId) {
        if !self.ast.exprs[id].flags.contains(NodeFlags::CHECKED) {
            self.ast.exprs[id].flags.insert(NodeFlags::CHECKED);
            self.local(id);
        }
    }

    /// `this` passes by value for primitives and small read-only structs;
    /// everything else becomes a reference.
    fn this_type(&mut self, id: ExprId) {
        let recvt = self.ast.exprs[id].ty;
        let is_mut = self.ast.exprs[id]
            .kind
            .as_local()
            .map(|l| l.is_mut)
            .unwrap_or(false);
        if !is_mut {
            match &self.ast.types[recvt].kind {
                TypeKind::Prim(_) => return,
                TypeKind::Struct(_) => {
                    let ptr = self.compiler.target.ptr_size();
                    let st = &self.ast.types[recvt];
                    if (st.align as u64) <= ptr && st.size <= ptr * 2 {
                        return;
                    }
                }
                _ => {}
            }
        }
        let loc = self.ast.exprs[id].loc;
        self.ast.exprs[id].ty = self.mkreftype(recvt, is_mut, loc);
    }

    // ——— blocks ———

    fn block(&mut self, id: ExprId) {
        self.ast.exprs[id].flags.insert(NodeFlags::CHECKED);
        self.enter_scope();
        self.block_noscope(id);
        self.leave_scope();
    }

    fn block_noscope(&mut self, id: ExprId) {
        let ExprKind::Block(b) = &self.ast.exprs[id].kind else {
            return;
        };
        let mut children = b.children.clone();
        let count = children.len();

        if count == 0 {
            self.ast.exprs[id].ty = self.ast.void();
            return;
        }

        let is_rvalue = self.ast.exprs[id].flags.contains(NodeFlags::RVALUE);
        let last_is_return = matches!(
            children[count - 1],
            Stmt::Expr(e) if matches!(self.ast.exprs[e].kind, ExprKind::Return { .. })
        );

        // if the block is an rvalue, its last expression is the block's
        // value and is analyzed separately
        let mut stmt_end = count - (is_rvalue && !last_is_return) as usize;

        let mut i = 0;
        let mut exited = false;
        while i < stmt_end {
            let child = self.stmt(children[i]);
            children[i] = child;
            if let Stmt::Expr(e) = child {
                if matches!(self.ast.exprs[e].kind, ExprKind::Return { .. }) {
                    // unreachable code was reported by the parser; just mark
                    // the remaining statements unused
                    for &rest in &children[i + 1..] {
                        if let Stmt::Expr(r) = rest {
                            self.ast.exprs[r].nuse = 0;
                        }
                    }
                    stmt_end = count;
                    self.ast.exprs[id].ty = self.ast.exprs[e].ty;
                    self.ast.exprs[id].flags.insert(NodeFlags::EXIT);
                    exited = true;
                    break;
                }
            }
            i += 1;
        }

        if stmt_end < count {
            let Stmt::Expr(last) = children[stmt_end] else {
                self.ast.exprs[id].ty = self.ast.void();
                let ExprKind::Block(b) = &mut self.ast.exprs[id].kind else {
                    return;
                };
                b.children = children;
                return;
            };
            self.ast.exprs[last].flags.insert(NodeFlags::RVALUE);
            let last = self.expr(last);
            children[stmt_end] = Stmt::Expr(last);
            self.ast.incuse(Node::Expr(last));
            self.ast.exprs[id].ty = self.ast.exprs[last].ty;
        } else if !exited {
            self.ast.exprs[id].ty = self.ast.void();
        }

        // warn about value-less statements
        for &child in children.iter().take(stmt_end) {
            if let Stmt::Expr(e) = child {
                if self.ast.exprs[e].nuse == 0 && self.report_unused(e) {
                    break;
                }
            }
        }

        let ExprKind::Block(b) = &mut self.ast.exprs[id].kind else {
            return;
        };
        b.children = children;
    }

    fn report_unused(&mut self, e: ExprId) -> bool {
        match &self.ast.exprs[e].kind {
            ExprKind::Local(l) => {
                let (name, name_loc, kind) = (l.name, l.name_loc, l.kind.describe());
                if name != sym::UNDERSCORE
                    && !symbols::name_is_reserved(name)
                    && self.no_error()
                {
                    self.warning(name_loc, format!("unused {} {}", kind, name));
                    return true;
                }
                false
            }
            ExprKind::If(_) if !self.ast.exprs[e].flags.contains(NodeFlags::RVALUE) => false,
            _ => {
                if !self.ast.expr_no_side_effects(e) {
                    return false;
                }
                if self.no_error() {
                    let msg = format!(
                        "unused {} {}",
                        self.ast.describe_expr(e),
                        self.ast.fmt_expr(e)
                    );
                    self.warning(self.ast.exprs[e].loc, msg);
                    return true;
                }
                false
            }
        }
    }

    // ——— functions ———

    fn fun_expr(&mut self, id: ExprId) {
        let outer_fun = self.fun.replace(id);
        let vis_pub = self.ast.exprs[id].flags.vis() == Visibility::Pub;
        self.pub_nest += vis_pub as u32;

        let ExprKind::Fun(f0) = self.ast.exprs[id].kind.clone() else {
            return;
        };

        let mut recv = f0.recv;
        if let Some(r) = recv {
            // type function
            let r = self.check_type(r);
            recv = Some(r);
            if let ExprKind::Fun(f) = &mut self.ast.exprs[id].kind {
                f.recv = Some(r);
                if f.ns_parent.is_none() {
                    f.ns_parent = Some(NsParent::Type(r));
                }
            }
            self.enter_ns(NsParent::Type(r));
        } else if f0.ns_parent.is_none() {
            let parent = self.current_ns();
            if let ExprKind::Fun(f) = &mut self.ast.exprs[id].kind {
                f.ns_parent = parent;
            }
            if let Some(name) = f0.name {
                self.define(name, Node::Expr(id));
            }
        }

        // the function type first
        let fty = self.ast.exprs[id].ty;
        if !self.ast.types[fty].flags.contains(NodeFlags::CHECKED) {
            self.ast.types[fty].flags.insert(NodeFlags::CHECKED);
            let this_type = recv.unwrap_or(self.ast.unknown());
            let fty = self.funtype1(fty, this_type);
            self.ast.exprs[id].ty = fty;
        }

        let fty = self.ast.exprs[id].ty;
        let (params, mut result) = match &self.ast.types[fty].kind {
            TypeKind::Fun(ft) => (ft.params.clone(), ft.result),
            _ => (Vec::new(), self.ast.void()),
        };

        // parameters live in their own scope frame
        if !params.is_empty() {
            self.enter_scope();
            for &p in &params {
                if !self.ast.exprs[p].flags.contains(NodeFlags::CHECKED) {
                    self.ast.exprs[p].flags.insert(NodeFlags::CHECKED);
                    self.local(p);
                }
                // multiple functions with the same signature may share one
                // function type and thus its parameter nodes; each body still
                // needs them in scope
                if f0.body.is_some() {
                    if let Some(l) = self.ast.exprs[p].kind.as_local() {
                        if l.name != sym::UNDERSCORE {
                            self.scope.define(l.name, Node::Expr(p));
                        }
                    }
                }
            }
        }

        // result type
        result = self.check_type(result);
        if let TypeKind::Fun(ft) = &mut self.ast.types[fty].kind {
            ft.result = result;
        }

        // special "drop" function signature
        if recv.is_some() && f0.name == Some(sym::DROP) {
            let ok = result == self.ast.void()
                && params.len() == 1
                && matches!(
                    self.ast.types[self.ast.exprs[params[0]].ty].kind,
                    TypeKind::MutRef { .. }
                );
            if ok {
                let r = recv.unwrap();
                self.ast.types[r].flags.insert(NodeFlags::DROP);
            } else {
                self.error(
                    self.ast.exprs[id].loc,
                    "invalid signature of \"drop\" function, expecting (mut this)void"
                        .to_string(),
                );
            }
        }

        if let Some(body) = f0.body {
            // a value-returning body is an rvalue block; its last expression
            // becomes the result
            let is_rvalue = result != self.ast.void();
            self.ast.exprs[body].flags.set(NodeFlags::RVALUE, is_rvalue);

            self.enter_ns(NsParent::Expr(id));
            self.typectx_push(result);
            self.block(body);
            self.typectx_pop();
            self.leave_ns();

            // implicit return
            if result != self.ast.void()
                && !self.ast.exprs[body].flags.contains(NodeFlags::EXIT)
            {
                let children: Vec<Stmt> = match &self.ast.exprs[body].kind {
                    ExprKind::Block(b) => b.children.clone(),
                    _ => Vec::new(),
                };
                match children.last() {
                    Some(&Stmt::Expr(last)) => {
                        let (_, new_last) = self.check_retval(self.ast.exprs[last].loc, Some(last));
                        if let Some(v) = new_last {
                            let loc = self.ast.exprs[v].loc;
                            let ret = self.mkretexpr(v, loc);
                            if let ExprKind::Block(b) = &mut self.ast.exprs[body].kind {
                                *b.children.last_mut().unwrap() = Stmt::Expr(ret);
                            }
                        }
                    }
                    _ => {
                        let loc = match &self.ast.exprs[body].kind {
                            ExprKind::Block(b) => b.end_loc,
                            _ => self.ast.exprs[body].loc,
                        };
                        self.check_retval(loc, None);
                    }
                }
            }

            if f0.name == Some(sym::MAIN)
                && recv.is_none()
                && self.pkg.is_main()
                && matches!(
                    self.ast.exprs[id].kind,
                    ExprKind::Fun(ref f) if matches!(f.ns_parent, Some(NsParent::Unit(_)))
                )
            {
                self.main_fun(id, &params, result, f0.result_loc);
            }
        } else {
            // prototypes are visible package-wide
            self.ast.exprs[id].flags.upgrade_vis(Visibility::Pkg);
        }

        if recv.is_some() {
            self.leave_ns();
        }
        if !params.is_empty() {
            self.scope.pop();
        }

        self.pub_nest -= vis_pub as u32;
        self.fun = outer_fun;
    }

    fn main_fun(&mut self, id: ExprId, params: &[ExprId], result: TypeId, result_loc: Loc) {
        self.pkg.main_fun = Some(id);
        if !params.is_empty() {
            let origin = params
                .iter()
                .fold(Loc::UNKNOWN, |acc, &p| acc.union(self.ast.exprs[p].loc));
            let origin = if origin.is_known() {
                origin
            } else {
                self.ast.exprs[id].loc
            };
            self.error(
                origin,
                "special \"main\" function should not accept any input parameters".to_string(),
            );
        }
        if result != self.ast.void() {
            let loc = if result_loc.is_known() {
                result_loc
            } else {
                self.ast.exprs[id].loc
            };
            self.error(
                loc,
                "special \"main\" function should not return a result".to_string(),
            );
        }
    }

    fn check_retval(&mut self, origin: Loc, value: Option<ExprId>) -> (TypeId, Option<ExprId>) {
        let fun = self.fun.expect("return checked outside a function");
        let fty = self.ast.exprs[fun].ty;
        let result = match &self.ast.types[fty].kind {
            TypeKind::Fun(ft) => ft.result,
            _ => self.ast.void(),
        };

        let value = value.map(|v| {
            self.ast.incuse(Node::Expr(v));
            self.expr(v)
        });
        let t = value.map(|v| self.ast.exprs[v].ty).unwrap_or(self.ast.void());

        if !self.assignable(result, t) {
            let fun_name = match &self.ast.exprs[fun].kind {
                ExprKind::Fun(f) => f.name.map(|n| format!("{} ", n)).unwrap_or_default(),
                _ => String::new(),
            };
            if result == self.ast.void() {
                self.error(
                    origin,
                    format!("function {}does not return a value", fun_name),
                );
            } else {
                if t == self.ast.void() {
                    self.error(origin, "missing return value".to_string());
                } else if t != self.ast.unknown() || !self.reported_error {
                    let msg = format!(
                        "invalid function result type: {}",
                        self.ast.fmt_type(t)
                    );
                    self.error(origin, msg);
                }
                let result_loc = match &self.ast.exprs[fun].kind {
                    ExprKind::Fun(f) => f.result_loc,
                    _ => Loc::UNKNOWN,
                };
                if result_loc.is_known() && (t != self.ast.unknown() || !self.reported_error) {
                    let msg = format!(
                        "function {}returns {}",
                        fun_name,
                        self.ast.fmt_type(result)
                    );
                    self.help(result_loc, msg);
                }
            }
        }

        match value {
            Some(v) => {
                let v = self.implicit_rvalue_deref(result, v);
                (self.ast.exprs[v].ty, Some(v))
            }
            None => (self.ast.void(), None),
        }
    }

    fn ret_expr(&mut self, id: ExprId) {
        if self.fun.is_none() {
            self.error(
                self.ast.exprs[id].loc,
                "return outside of function".to_string(),
            );
            return;
        }
        let ExprKind::Return { value } = self.ast.exprs[id].kind else {
            return;
        };
        let origin = self.ast.exprs[id].loc;
        let origin = value
            .map(|v| self.ast.exprs[v].loc)
            .filter(|l| l.is_known())
            .unwrap_or(origin);
        let (t, new_value) = self.check_retval(origin, value);
        self.ast.exprs[id].ty = t;
        if let ExprKind::Return { value } = &mut self.ast.exprs[id].kind {
            *value = new_value;
        }
    }

    // ——— if & narrowing driver ———

    fn if_expr(&mut self, id: ExprId) {
        let ExprKind::If(f) = self.ast.exprs[id].kind.clone() else {
            return;
        };
        let cond_has_unknown = self.ast.exprs[f.cond].flags.contains(NodeFlags::UNKNOWN);

        // the condition is checked inside the then-scope so narrowing
        // definitions land there
        self.enter_scope();
        self.ast.exprs[f.cond].flags.insert(NodeFlags::RVALUE);
        self.ast.incuse(Node::Expr(f.cond));
        let cond = self.expr(f.cond);
        if let ExprKind::If(fi) = &mut self.ast.exprs[id].kind {
            fi.cond = cond;
        }

        let elsedefs = if cond_has_unknown {
            match self.narrow_cond(cond, f.else_block.is_some()) {
                Some(defs) => defs,
                None => {
                    self.leave_scope();
                    return;
                }
            }
        } else {
            Vec::new()
        };

        let cond_ty = self.ast.exprs[cond].ty;
        if !self.ast.exprs[cond].flags.contains(NodeFlags::NARROWED)
            && cond_ty != self.ast.bool_type()
            && !matches!(self.ast.types[cond_ty].kind, TypeKind::Optional { .. })
        {
            self.error(
                self.ast.exprs[cond].loc,
                "conditional is not a boolean nor an optional type".to_string(),
            );
            self.leave_scope();
            return;
        }

        let rvalue = self.ast.exprs[id].flags.intersection(NodeFlags::RVALUE);

        // then branch
        self.ast.exprs[f.then_block].flags.insert(rvalue.union(NodeFlags::CHECKED));
        self.block_noscope(f.then_block);
        self.leave_scope();

        // else branch
        if let Some(eb) = f.else_block {
            self.enter_scope();
            self.narrow_elsedefs(&elsedefs);
            self.ast.exprs[eb].flags.insert(rvalue.union(NodeFlags::CHECKED));
            self.block_noscope(eb);
            self.leave_scope();
        }

        if !self.ast.exprs[id].flags.contains(NodeFlags::RVALUE) {
            self.ast.exprs[id].ty = self.ast.void();
            return;
        }

        let then_ty = self.ast.exprs[f.then_block].ty;
        let else_ty = f.else_block.map(|eb| self.ast.exprs[eb].ty);
        match else_ty {
            Some(else_ty) if else_ty != self.ast.void() => {
                // "if ... else" => T
                self.ast.exprs[id].ty = then_ty;
                if !self.assignable(then_ty, else_ty)
                    && then_ty != self.ast.unknown()
                    && else_ty != self.ast.unknown()
                {
                    let msg = format!(
                        "incompatible types {} and {} in \"if\" branches",
                        self.ast.fmt_type(then_ty),
                        self.ast.fmt_type(else_ty)
                    );
                    let loc = self.ast.exprs[f.else_block.unwrap()].loc;
                    self.error(loc, msg);
                }
            }
            _ => {
                // "if" without else => ?T
                if matches!(self.ast.types[then_ty].kind, TypeKind::Optional { .. }) {
                    self.ast.exprs[id].ty = then_ty;
                } else {
                    let loc = self.ast.exprs[id].loc;
                    let opt = self.ast.add_type(TypeKind::Optional { elem: then_ty }, loc);
                    self.ast.types[opt].flags.insert(NodeFlags::CHECKED);
                    self.ast.exprs[id].ty = opt;
                }
            }
        }
    }

    // ——— operators ———

    fn binop(&mut self, id: ExprId) {
        let ExprKind::Binop { op, left, right } = self.ast.exprs[id].kind else {
            return;
        };

        let left = self.expr(left);
        self.ast.incuse(Node::Expr(left));
        self.typectx_push(self.ast.exprs[left].ty);
        let right = self.expr(right);
        self.ast.incuse(Node::Expr(right));
        self.typectx_pop();

        let (mut left, mut right) = (left, right);
        let lt = self.ast.exprs[left].ty;
        let rt = self.ast.exprs[right].ty;

        if op.is_comparison() {
            if !self.equivalent(lt, rt) {
                self.error_incompatible_types(id, lt, rt);
            }
            self.ast.exprs[id].ty = self.ast.bool_type();
        } else if op == Op::LAnd || op == Op::LOr {
            // && accepts narrowed operands; || does not
            let exempt_narrowed = op == Op::LAnd;
            for side in [left, right] {
                let ty = self.ast.exprs[side].ty;
                let is_bool_like = ty == self.ast.bool_type()
                    || matches!(self.ast.types[ty].kind, TypeKind::Optional { .. });
                let narrowed =
                    exempt_narrowed && self.ast.exprs[side].flags.contains(NodeFlags::NARROWED);
                if !is_bool_like && !narrowed {
                    let msg =
                        format!("cannot use type {} as bool", self.ast.fmt_type(ty));
                    self.error(self.ast.exprs[side].loc, msg);
                }
            }
            self.ast.exprs[id].ty = self.ast.bool_type();
        } else {
            let ult = self.unwrap_alias(lt);
            let urt = self.unwrap_alias(rt);
            if !self.compatible(ult, urt) {
                self.error_incompatible_types(id, lt, rt);
            }
            if matches!(
                self.ast.types[ult].kind,
                TypeKind::Ref { .. } | TypeKind::MutRef { .. }
            ) {
                let loc = self.ast.exprs[left].loc;
                left = self.mkderef(left, loc);
            }
            if matches!(
                self.ast.types[urt].kind,
                TypeKind::Ref { .. } | TypeKind::MutRef { .. }
            ) {
                let loc = self.ast.exprs[right].loc;
                right = self.mkderef(right, loc);
            }
            self.ast.exprs[id].ty = self.ast.exprs[left].ty;
        }

        if let ExprKind::Binop {
            left: l, right: r, ..
        } = &mut self.ast.exprs[id].kind
        {
            *l = left;
            *r = right;
        }

        let lt = self.ast.exprs[left].ty;
        if !self.type_has_binop(lt, op) {
            let msg = format!(
                "type {} has no '{}' operator",
                self.ast.fmt_type(lt),
                op.token()
            );
            self.error(self.ast.exprs[id].loc, msg);
        }
    }

    /// Per-type operator permissibility.
    fn type_has_binop(&self, t: TypeId, op: Op) -> bool {
        let t = self.concrete(t);
        match &self.ast.types[t].kind {
            TypeKind::Prim(PrimType::Bool) | TypeKind::Optional { .. } => matches!(
                op,
                Op::LAnd | Op::LOr | Op::Eq | Op::NotEq | Op::Assign
            ),
            TypeKind::Prim(p) if p.is_integer() => matches!(
                op,
                Op::Add
                    | Op::Sub
                    | Op::Mul
                    | Op::Div
                    | Op::Mod
                    | Op::And
                    | Op::Or
                    | Op::Xor
                    | Op::Shl
                    | Op::Shr
                    | Op::LAnd
                    | Op::LOr
                    | Op::Eq
                    | Op::NotEq
                    | Op::Lt
                    | Op::Gt
                    | Op::LtEq
                    | Op::GtEq
                    | Op::Assign
                    | Op::AddAssign
                    | Op::SubAssign
                    | Op::MulAssign
                    | Op::DivAssign
                    | Op::ModAssign
                    | Op::AndAssign
                    | Op::OrAssign
                    | Op::XorAssign
                    | Op::ShlAssign
                    | Op::ShrAssign
            ),
            TypeKind::Prim(p) if p.is_float() => matches!(
                op,
                Op::Add
                    | Op::Sub
                    | Op::Mul
                    | Op::Div
                    | Op::Mod
                    | Op::LAnd
                    | Op::LOr
                    | Op::Eq
                    | Op::NotEq
                    | Op::Lt
                    | Op::Gt
                    | Op::LtEq
                    | Op::GtEq
                    | Op::Assign
                    | Op::AddAssign
                    | Op::SubAssign
                    | Op::MulAssign
                    | Op::DivAssign
                    | Op::ModAssign
            ),
            TypeKind::Struct(_) | TypeKind::Ref { .. } | TypeKind::Ptr { .. } => {
                matches!(op, Op::Eq | Op::NotEq | Op::Assign)
            }
            _ => op == Op::Assign,
        }
    }

    fn unaryop(&mut self, id: ExprId) {
        let (op, inner) = match self.ast.exprs[id].kind {
            ExprKind::Prefix { op, expr } | ExprKind::Postfix { op, expr } => (op, expr),
            _ => return,
        };
        self.ast.incuse(Node::Expr(inner));
        let inner = self.expr(inner);
        match &mut self.ast.exprs[id].kind {
            ExprKind::Prefix { expr, .. } | ExprKind::Postfix { expr, .. } => *expr = inner,
            _ => {}
        }

        let own_ty = self.ast.exprs[id].ty;
        if own_ty == self.ast.unknown()
            || matches!(self.ast.types[own_ty].kind, TypeKind::Unresolved { .. })
        {
            self.ast.exprs[id].ty = self.ast.exprs[inner].ty;
        }

        match op {
            Op::Ref | Op::MutRef => {
                let elem = self.ast.exprs[inner].ty;
                let loc = self.ast.exprs[id].loc;
                self.ast.exprs[id].ty = self.mkreftype(elem, op == Op::MutRef, loc);
            }
            Op::Inc | Op::Dec => {
                self.check_assign(inner);
            }
            Op::Not => {
                let t = self.ast.exprs[inner].ty;
                if t != self.ast.bool_type()
                    && !matches!(self.ast.types[t].kind, TypeKind::Optional { .. })
                {
                    let msg = format!(
                        "type {} has no '{}' operator",
                        self.ast.fmt_type(t),
                        op.token()
                    );
                    self.error(self.ast.exprs[id].loc, msg);
                }
                self.ast.exprs[id].ty = self.ast.bool_type();
            }
            _ => {
                debug!("unexpected unary operator '{}'", op.token());
            }
        }
    }

    fn deref(&mut self, id: ExprId) {
        let ExprKind::Deref { expr } = self.ast.exprs[id].kind else {
            return;
        };
        let inner = self.expr(expr);
        if let ExprKind::Deref { expr } = &mut self.ast.exprs[id].kind {
            *expr = inner;
        }

        let t = self.ast.exprs[inner].ty;
        if !self.is_ptr_like(t) {
            let msg = format!(
                "dereferencing non-pointer value of type {}",
                self.ast.fmt_type(t)
            );
            self.error(self.ast.exprs[id].loc, msg);
            return;
        }

        let elem = match self.ast.types[t].kind {
            TypeKind::Ptr { elem } | TypeKind::Ref { elem } | TypeKind::MutRef { elem } => elem,
            _ => return,
        };
        self.ast.exprs[id].ty = elem;

        // reading a whole owner out of a reference would move it
        let is_ref = matches!(
            self.ast.types[t].kind,
            TypeKind::Ref { .. } | TypeKind::MutRef { .. }
        );
        if is_ref && self.is_owner(elem) {
            let msg = format!(
                "cannot transfer ownership of borrowed {}",
                self.ast.fmt_type(t)
            );
            self.error(self.ast.exprs[id].loc, msg);
        }
    }

    // ——— assignment ———

    fn assign(&mut self, id: ExprId) {
        let ExprKind::Assign { left, right, .. } = self.ast.exprs[id].kind else {
            return;
        };

        // "_ = expr" evaluates and discards
        if matches!(self.ast.exprs[left].kind, ExprKind::Id { name, .. } if name == sym::UNDERSCORE)
        {
            self.typectx_push(self.ast.exprs[left].ty);
            let right = self.expr(right);
            self.ast.incuse(Node::Expr(right));
            self.typectx_pop();
            self.ast.exprs[id].ty = self.ast.exprs[right].ty;
            if let ExprKind::Assign { right: r, .. } = &mut self.ast.exprs[id].kind {
                *r = right;
            }
            return;
        }

        let left = self.expr(left);
        self.ast.incuse(Node::Expr(left));
        self.typectx_push(self.ast.exprs[left].ty);
        let right = self.expr(right);
        self.ast.incuse(Node::Expr(right));
        self.typectx_pop();
        if let ExprKind::Assign {
            left: l, right: r, ..
        } = &mut self.ast.exprs[id].kind
        {
            *l = left;
            *r = right;
        }

        self.ast.exprs[id].ty = self.ast.exprs[left].ty;

        if !self.assignable(self.ast.exprs[left].ty, self.ast.exprs[right].ty) {
            self.error_unassignable_type(left, right);
        }

        self.check_assign(left);
    }

    fn check_assign(&mut self, target: ExprId) -> bool {
        match &self.ast.exprs[target].kind {
            ExprKind::Id { .. } => self.check_assign_to_id(target),
            ExprKind::Member { .. } => self.check_assign_to_member(target),
            ExprKind::Deref { expr } => {
                let t = self.ast.exprs[*expr].ty;
                match self.ast.types[t].kind {
                    TypeKind::Ref { .. } => {
                        let msg = format!(
                            "cannot assign via immutable reference of type {}",
                            self.ast.fmt_type(t)
                        );
                        self.error(self.ast.exprs[target].loc, msg);
                        false
                    }
                    TypeKind::MutRef { .. } | TypeKind::Ptr { .. } => true,
                    _ => {
                        let msg =
                            format!("cannot assign to {}", self.ast.describe_expr(target));
                        self.error(self.ast.exprs[target].loc, msg);
                        false
                    }
                }
            }
            _ => {
                let msg = format!("cannot assign to {}", self.ast.describe_expr(target));
                self.error(self.ast.exprs[target].loc, msg);
                false
            }
        }
    }

    fn check_assign_to_id(&mut self, id: ExprId) -> bool {
        let ExprKind::Id { name, target } = self.ast.exprs[id].kind else {
            return false;
        };
        let Some(target) = target else {
            // resolution already failed and was reported
            return false;
        };
        match target {
            Node::Expr(t) => {
                if self.ast.exprs[t].flags.contains(NodeFlags::NARROWED) {
                    let msg =
                        format!("cannot assign to type-narrowed binding \"{}\"", name);
                    self.error(self.ast.exprs[id].loc, msg);
                    return true;
                }
                match self.ast.exprs[t].kind.as_local().map(|l| l.kind) {
                    Some(LocalKind::Var) => true,
                    _ => {
                        let msg = format!(
                            "cannot assign to {} \"{}\"",
                            self.ast.describe_expr(t),
                            name
                        );
                        self.error(self.ast.exprs[id].loc, msg);
                        false
                    }
                }
            }
            Node::Type(_) => {
                let msg = format!("cannot assign to type \"{}\"", name);
                self.error(self.ast.exprs[id].loc, msg);
                false
            }
        }
    }

    fn check_assign_to_member(&mut self, m: ExprId) -> bool {
        let ExprKind::Member { recv, .. } = self.ast.exprs[m].kind else {
            return false;
        };
        let rt = self.ast.exprs[recv].ty;
        match self.ast.types[rt].kind {
            TypeKind::Struct(_) => {
                // "this" received by value is read-only
                let referent = self.ast.unwrap_id(Node::Expr(recv));
                if let Node::Expr(t) = referent {
                    if self.ast.exprs[t]
                        .kind
                        .as_local()
                        .is_some_and(|l| l.kind == LocalKind::Param && l.is_this)
                    {
                        let msg = format!(
                            "assignment to immutable struct {}",
                            self.ast.fmt_expr(recv)
                        );
                        self.error(self.ast.exprs[recv].loc, msg);
                        return false;
                    }
                }
                true
            }
            TypeKind::Ref { .. } => {
                let msg = format!(
                    "assignment to immutable reference {}",
                    self.ast.fmt_expr(recv)
                );
                self.error(self.ast.exprs[recv].loc, msg);
                false
            }
            _ => true,
        }
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let (a, b): (Vec<char>, Vec<char>) = (a.chars().collect(), b.chars().collect());
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let sub = prev[j - 1] + (a[i - 1] != b[j - 1]) as usize;
            cur[j] = sub.min(prev[j] + 1).min(cur[j - 1] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

impl Checker<'_> {
    // ——— literals ———

    fn intlit(&mut self, id: ExprId) {
        if self.ast.exprs[id].ty != self.ast.unknown() {
            return;
        }
        let ExprKind::IntLit { value } = self.ast.exprs[id].kind else {
            return;
        };

        let mut ty = self.typectx;
        let mut base = self.unwrap_alias(ty);
        let mut max_val: u64 = 0;
        loop {
            match self.ast.types[base].kind.prim() {
                Some(PrimType::I8) => max_val = 0x7f,
                Some(PrimType::I16) => max_val = 0x7fff,
                Some(PrimType::I32) => max_val = 0x7fff_ffff,
                Some(PrimType::I64) => max_val = 0x7fff_ffff_ffff_ffff,
                Some(PrimType::U8) => max_val = 0xff,
                Some(PrimType::U16) => max_val = 0xffff,
                Some(PrimType::U32) => max_val = 0xffff_ffff,
                Some(PrimType::U64) => max_val = u64::MAX,
                Some(PrimType::Int) => {
                    base = self.int_type;
                    continue;
                }
                Some(PrimType::Uint) => {
                    base = self.uint_type;
                    continue;
                }
                _ => {
                    // any other context picks the smallest fitting default
                    if self.compiler.target.int_size() == 8 {
                        if value < 0x8000_0000_0000_0000 {
                            self.ast.exprs[id].ty = self.ast.prim(PrimType::Int);
                            return;
                        }
                        ty = self.ast.prim(PrimType::U64);
                        max_val = u64::MAX;
                    } else if value <= 0x7fff_ffff {
                        self.ast.exprs[id].ty = self.ast.prim(PrimType::Int);
                        return;
                    } else if value <= 0xffff_ffff {
                        self.ast.exprs[id].ty = self.ast.prim(PrimType::Uint);
                        return;
                    } else if value <= 0x7fff_ffff_ffff_ffff {
                        self.ast.exprs[id].ty = self.ast.prim(PrimType::I64);
                        return;
                    } else {
                        ty = self.ast.prim(PrimType::U64);
                        max_val = u64::MAX;
                    }
                }
            }
            break;
        }

        if value > max_val {
            let msg = format!("integer constant overflows {}", self.ast.fmt_type(ty));
            self.error(self.ast.exprs[id].loc, msg);
        }
        self.ast.exprs[id].ty = ty;
    }

    fn floatlit(&mut self, id: ExprId) {
        let ExprKind::FloatLit { value } = self.ast.exprs[id].kind else {
            return;
        };
        if self.typectx == self.ast.prim(PrimType::F32) {
            self.ast.exprs[id].ty = self.ast.prim(PrimType::F32);
            // detect values that only fit in 64-bit floats
            let narrowed = value as f32;
            if narrowed.is_infinite() && !value.is_infinite() {
                self.error(
                    self.ast.exprs[id].loc,
                    "32-bit floating-point constant too large".to_string(),
                );
                if let ExprKind::FloatLit { value } = &mut self.ast.exprs[id].kind {
                    *value = 0.0;
                }
            }
        } else {
            self.ast.exprs[id].ty = self.ast.prim(PrimType::F64);
            if value.is_infinite() {
                self.error(
                    self.ast.exprs[id].loc,
                    "64-bit floating-point constant too large".to_string(),
                );
                if let ExprKind::FloatLit { value } = &mut self.ast.exprs[id].kind {
                    *value = 0.0;
                }
            }
        }
    }

    fn strlit(&mut self, id: ExprId) {
        if self.typectx == self.ast.str_type {
            self.ast.exprs[id].ty = self.ast.str_type;
            return;
        }
        let len = match &self.ast.exprs[id].kind {
            ExprKind::StrLit { value } => value.len() as u64,
            _ => 0,
        };
        let loc = self.ast.exprs[id].loc;
        let u8t = self.ast.prim(PrimType::U8);
        let at = self.ast.add_type(
            TypeKind::Array(crate::language::ast::ArrayType {
                elem: u8t,
                len,
                len_expr: None,
                end_loc: loc,
            }),
            loc,
        );
        self.ast.types[at].flags.insert(NodeFlags::CHECKED);
        self.arraytype_calc_size(at);
        let r = self.ast.add_type(TypeKind::Ref { elem: at }, loc);
        self.ast.types[r].flags.insert(NodeFlags::CHECKED);
        self.ast.types[r].size = self.compiler.target.ptr_size();
        self.ast.types[r].align = self.compiler.target.ptr_size() as u8;
        self.ast.exprs[id].ty = r;
    }

    fn arraylit(&mut self, id: ExprId) {
        let ExprKind::ArrayLit { values, .. } = self.ast.exprs[id].kind.clone() else {
            return;
        };
        let mut values = values;
        let ctx = self.typectx;
        let mut start = 0usize;

        let at = if let TypeKind::Array(a) = &self.ast.types[ctx].kind {
            if a.len > 0 && (a.len as usize) < values.len() {
                let mut origin = self.ast.exprs[values[a.len as usize]].loc;
                if !origin.is_known() {
                    origin = self.ast.exprs[id].loc;
                }
                self.error(origin, "excess value in array literal".to_string());
            }
            ctx
        } else {
            // no array context: infer the element type from the first value
            if values.is_empty() {
                self.error(
                    self.ast.exprs[id].loc,
                    "cannot infer type of empty array literal; please specify its type"
                        .to_string(),
                );
                return;
            }
            self.typectx_push(self.ast.unknown());
            let v0 = self.expr(values[0]);
            self.typectx_pop();
            values[0] = v0;
            let loc = self.ast.exprs[id].loc;
            let elem = self.ast.exprs[v0].ty;
            let at = self.ast.add_type(
                TypeKind::Array(crate::language::ast::ArrayType {
                    elem,
                    len: values.len() as u64,
                    len_expr: None,
                    end_loc: loc,
                }),
                loc,
            );
            self.ast.types[at].flags.insert(NodeFlags::CHECKED);
            self.arraytype_calc_size(at);
            start = 1;
            at
        };

        self.ast.exprs[id].ty = at;

        let elem = match &self.ast.types[at].kind {
            TypeKind::Array(a) => a.elem,
            _ => self.ast.unknown(),
        };
        self.typectx_push(elem);
        for i in start..values.len() {
            let v = self.expr(values[i]);
            values[i] = v;
            if !self.assignable(elem, self.ast.exprs[v].ty) {
                self.error_unassignable_type(id, v);
                break;
            }
        }
        self.typectx_pop();

        if let ExprKind::ArrayLit { values: vs, .. } = &mut self.ast.exprs[id].kind {
            *vs = values;
        }
    }

    // ——— member access ———

    fn member(&mut self, id: ExprId) {
        let ExprKind::Member { recv, name, .. } = self.ast.exprs[id].kind else {
            return;
        };
        self.ast.incuse(Node::Expr(recv));
        let recv = self.expr(recv);
        if let ExprKind::Member { recv: r, .. } = &mut self.ast.exprs[id].kind {
            *r = recv;
        }

        let recvt = self.ast.exprs[recv].ty;
        let recvbt = self.unwrap_ptr_and_alias(recvt);

        if matches!(self.ast.types[recvbt].kind, TypeKind::Ns) {
            return self.member_ns(id, recv, name);
        }

        // accessing through an optional would read a possibly-absent value
        if matches!(self.ast.types[recvbt].kind, TypeKind::Optional { .. }) {
            return self.error_optional_access(recvbt, id, recv);
        }

        self.typectx_push(self.ast.unknown());
        let target = self.find_member(recvbt, recvt, name);
        self.typectx_pop();

        match target {
            Some(t) => {
                self.ast.incuse(Node::Expr(t));
                self.ast.exprs[id].ty = self.ast.exprs[t].ty;
                if let ExprKind::Member { target, .. } = &mut self.ast.exprs[id].kind {
                    *target = Some(t);
                }
            }
            None => {
                self.ast.exprs[id].ty = self.typectx; // avoid cascading errors
                if recvt != self.ast.unknown() || !self.reported_error {
                    let msg = format!(
                        "{} has no field or method \"{}\"",
                        self.ast.fmt_type(recvt),
                        name
                    );
                    self.error(self.ast.exprs[id].loc, msg);
                }
            }
        }
    }

    fn member_ns(&mut self, id: ExprId, recv: ExprId, name: Symbol) {
        let ns = match self.ast.unwrap_id(Node::Expr(recv)) {
            Node::Expr(e) => e,
            Node::Type(_) => recv,
        };
        let ExprKind::Ns(nsx) = self.ast.exprs[ns].kind.clone() else {
            let msg = format!(
                "NOT IMPLEMENTED: namespace access via {}",
                self.ast.describe_expr(ns)
            );
            self.error(self.ast.exprs[id].loc, msg);
            self.ast.exprs[id].ty = self.typectx;
            return;
        };

        for m in &nsx.members {
            if m.name != name {
                continue;
            }
            match m.node {
                Node::Expr(target) => {
                    self.ast.incuse(Node::Expr(target));
                    self.ast.exprs[id].ty = self.ast.exprs[target].ty;
                    if let ExprKind::Member { target: t, .. } = &mut self.ast.exprs[id].kind {
                        *t = Some(target);
                    }
                }
                Node::Type(_) => {
                    let msg = format!("{} names a type", name);
                    self.error(self.ast.exprs[id].loc, msg);
                }
            }
            return;
        }

        self.ast.exprs[id].ty = self.typectx; // avoid cascading errors
        let msg = if self.ast.exprs[ns].flags.contains(NodeFlags::PKGNS) {
            format!("package \"{}\" has no member \"{}\"", nsx.name, name)
        } else {
            format!("namespace {} has no member \"{}\"", nsx.name, name)
        };
        self.error(self.ast.exprs[id].loc, msg);
    }

    /// Looks for a struct field, then for a type function keyed by the
    /// dereferenced receiver's type-id.
    fn find_member(&mut self, bt: TypeId, recvt: TypeId, name: Symbol) -> Option<ExprId> {
        if let TypeKind::Struct(st) = &self.ast.types[bt].kind {
            let fields = st.fields.clone();
            for f in fields {
                if self.ast.exprs[f].kind.as_local().map(|l| l.name) == Some(name) {
                    self.check_local(f);
                    return Some(f);
                }
            }
        }

        let bt2 = self.unwrap_ptr(recvt);
        let tid = self.typeid(bt2);
        let f = self.pkg.tfundefs.lookup(tid, name)?;
        if !self.ast.exprs[f].flags.contains(NodeFlags::CHECKED) {
            self.ast.exprs[f].flags.insert(NodeFlags::CHECKED);
            self.fun_expr(f);
        }
        Some(f)
    }

    fn error_optional_access(&mut self, t: TypeId, expr: ExprId, access: ExprId) {
        let msg = format!(
            "optional value of type {} may not be valid",
            self.ast.fmt_type(t)
        );
        self.error(self.ast.exprs[expr].loc, msg);
        let access_loc = self.ast.exprs[access].loc;
        if access_loc.is_known() {
            let msg = format!(
                "check {} before access, e.g: if {} {}",
                self.ast.fmt_expr(access),
                self.ast.fmt_expr(access),
                self.ast.fmt_expr(expr)
            );
            self.help(access_loc, msg);
        }
    }

    // ——— subscripting ———

    fn subscript(&mut self, id: ExprId) {
        let ExprKind::Subscript(s) = self.ast.exprs[id].kind.clone() else {
            return;
        };
        self.ast.incuse(Node::Expr(s.recv));

        self.typectx_push(self.ast.unknown());
        let recv = self.expr(s.recv);
        self.typectx_pop();

        let (index, index_val) = self.unsigned_index_expr(s.index);
        if let ExprKind::Subscript(sm) = &mut self.ast.exprs[id].kind {
            sm.recv = recv;
            sm.index = index;
            sm.index_val = index_val.unwrap_or(0);
        }

        let recvt = self.unwrap_ptr_and_alias(self.ast.exprs[recv].ty);
        self.ast.exprs[id].ty = self.typectx; // avoid cascading errors

        match self.ast.types[recvt].kind.clone() {
            TypeKind::Array(a) => {
                self.ast.exprs[id].ty = a.elem;
                if let Some(v) = index_val {
                    if a.len > 0 && v >= a.len {
                        let msg = format!(
                            "out of bounds: element {} of array {}",
                            v,
                            self.ast.fmt_type(recvt)
                        );
                        self.error(self.ast.exprs[id].loc, msg);
                    }
                }
            }
            TypeKind::Slice { elem } | TypeKind::MutSlice { elem } => {
                self.ast.exprs[id].ty = elem;
            }
            TypeKind::Optional { .. } => {
                self.error_optional_access(recvt, id, recv);
            }
            _ => {
                let msg = format!("cannot index into type {}", self.ast.fmt_type(recvt));
                self.error(self.ast.exprs[id].loc, msg);
            }
        }
    }

    /// Checks an index expression: a compile-time constant, or a value of
    /// (or losslessly convertible to) type uint.
    fn unsigned_index_expr(&mut self, index: ExprId) -> (ExprId, Option<u64>) {
        self.ast.incuse(Node::Expr(index));
        self.typectx_push(self.ast.prim(PrimType::Uint));
        let index = self.expr(index);
        self.typectx_pop();

        if let Some(v) = self.comptime_eval_uint(index) {
            self.ast.exprs[index].flags.insert(NodeFlags::CONST);
            return (index, Some(v));
        }

        let t = self.ast.exprs[index].ty;
        let ok = match self.ast.types[t].kind.prim() {
            Some(PrimType::U8) | Some(PrimType::Uint) => true,
            Some(PrimType::U16) | Some(PrimType::U32) | Some(PrimType::U64) => {
                self.ast.types[t].size <= self.ast.types[self.uint_type].size
            }
            _ => false,
        };
        if !ok {
            let msg = format!(
                "invalid index type {}; expecting uint",
                self.ast.fmt_type(t)
            );
            self.error(self.ast.exprs[index].loc, msg);
        }
        (index, None)
    }

    /// Best-effort compile-time evaluation of an unsigned integer
    /// expression.
    fn comptime_eval_uint(&self, e: ExprId) -> Option<u64> {
        match &self.ast.exprs[e].kind {
            ExprKind::IntLit { value } => Some(*value),
            ExprKind::Id {
                target: Some(Node::Expr(t)),
                ..
            } => match self.ast.exprs[*t].kind.as_local() {
                Some(l) if matches!(l.kind, LocalKind::Let | LocalKind::Var) => {
                    self.comptime_eval_uint(l.init?)
                }
                _ => None,
            },
            ExprKind::Binop { op, left, right } => {
                let l = self.comptime_eval_uint(*left)?;
                let r = self.comptime_eval_uint(*right)?;
                match op {
                    Op::Add => l.checked_add(r),
                    Op::Sub => l.checked_sub(r),
                    Op::Mul => l.checked_mul(r),
                    _ => None,
                }
            }
            ExprKind::TypeCons(TypeConsArgs::Value(v)) => self.comptime_eval_uint(*v),
            _ => None,
        }
    }

    // ——— type construction & calls ———

    fn typecons(&mut self, id: ExprId) -> ExprId {
        if let ExprKind::TypeCons(TypeConsArgs::Value(v)) = self.ast.exprs[id].kind {
            self.ast.incuse(Node::Expr(v));
            self.typectx_push(self.ast.exprs[id].ty);
            let v2 = self.expr(v);
            self.typectx_pop();
            self.ast.exprs[id].kind = ExprKind::TypeCons(TypeConsArgs::Value(v2));
        }
        self.finalize_typecons(id)
    }

    fn finalize_typecons(&mut self, id: ExprId) -> ExprId {
        let t = self.ast.exprs[id].ty;
        if !self.ast.types[self.unwrap_alias(t)].kind.is_prim() {
            return id;
        }
        let ExprKind::TypeCons(TypeConsArgs::Value(v)) = self.ast.exprs[id].kind else {
            return id;
        };

        // a cast to an equivalent type collapses to its argument
        if self.concrete(t) == self.concrete(self.ast.exprs[v].ty) {
            let uses = self.ast.exprs[id].nuse.max(1) - 1;
            self.ast.exprs[v].nuse += uses;
            return v;
        }

        if !self.convertible(t, self.ast.exprs[v].ty) {
            let msg = format!(
                "cannot convert value of type {} to type {}",
                self.ast.fmt_type(self.ast.exprs[v].ty),
                self.ast.fmt_type(t)
            );
            self.error(self.ast.exprs[id].loc, msg);
        }
        id
    }

    fn call(&mut self, id: ExprId) -> ExprId {
        let ExprKind::Call(c) = self.ast.exprs[id].kind.clone() else {
            return id;
        };
        let recv = self.expr(c.recv);
        if let ExprKind::Call(cm) = &mut self.ast.exprs[id].kind {
            cm.recv = recv;
        }

        if self.reported_error {
            return id;
        }

        match self.ast.unwrap_id(Node::Expr(recv)) {
            Node::Type(t) => self.call_type(id, t),
            Node::Expr(e) => {
                let rt = self.ast.exprs[e].ty;
                if matches!(self.ast.types[rt].kind, TypeKind::Fun(_)) {
                    self.call_fun(id, rt);
                } else {
                    self.ast.exprs[id].ty = self.typectx; // avoid cascading errors
                    let msg = format!(
                        "calling an expression of type {}, expected function or type",
                        self.ast.fmt_type(rt)
                    );
                    self.error(self.ast.exprs[recv].loc, msg);
                }
                id
            }
        }
    }

    fn call_fun(&mut self, id: ExprId, fty: TypeId) {
        let TypeKind::Fun(ft) = self.ast.types[fty].kind.clone() else {
            return;
        };
        self.ast.exprs[id].ty = ft.result;

        // a leading "this" is supplied by the member lowering
        let mut params: &[ExprId] = &ft.params;
        if let Some(&p0) = params.first() {
            if self.ast.exprs[p0].kind.as_local().is_some_and(|l| l.is_this) {
                params = &params[1..];
            }
        }
        let params = params.to_vec();

        let mut args = match &self.ast.exprs[id].kind {
            ExprKind::Call(c) => c.args.clone(),
            _ => return,
        };

        if args.len() != params.len() {
            let msg = format!(
                "{} arguments in function call, expected {}",
                if args.len() < params.len() {
                    "not enough"
                } else {
                    "too many"
                },
                params.len()
            );
            self.error(self.ast.exprs[id].loc, msg);
            return;
        }

        let mut seen_named_arg = false;
        for i in 0..params.len() {
            let arg = args[i];
            let param = params[i];
            let param_ty = self.ast.exprs[param].ty;
            let param_name = self.ast.exprs[param]
                .kind
                .as_local()
                .map(|l| l.name)
                .unwrap_or(sym::UNDERSCORE);

            self.typectx_push(param_ty);

            let named = self.ast.exprs[arg]
                .kind
                .as_local()
                .map(|l| (l.kind, l.name, l.init));
            if let Some((LocalKind::Param, arg_name, Some(init))) = named {
                // named argument
                self.ast.exprs[arg].flags.insert(NodeFlags::CHECKED);
                let init = self.expr(init);
                if let Some(l) = self.local_mut(arg) {
                    l.init = Some(init);
                }
                self.ast.exprs[arg].ty = self.ast.exprs[init].ty;
                seen_named_arg = true;

                if arg_name != param_name {
                    let known = params.iter().any(|&p| {
                        self.ast.exprs[p].kind.as_local().map(|l| l.name) == Some(arg_name)
                    });
                    let condition = if known {
                        "invalid position of"
                    } else {
                        "unknown"
                    };
                    let msg = format!(
                        "{} named argument \"{}\", in function call {}",
                        condition,
                        arg_name,
                        self.ast.fmt_type(fty)
                    );
                    self.error(self.ast.exprs[arg].loc, msg);
                }
            } else {
                // positional argument
                if seen_named_arg {
                    self.error(
                        self.ast.exprs[arg].loc,
                        "positional argument after named argument(s)".to_string(),
                    );
                    self.typectx_pop();
                    break;
                }
                let a2 = self.expr(arg);
                args[i] = a2;
            }

            self.ast.incuse(Node::Expr(args[i]));
            self.typectx_pop();

            let arg_ty = self.ast.exprs[args[i]].ty;
            if !self.assignable(param_ty, arg_ty)
                && param_ty != self.ast.unknown()
                && arg_ty != self.ast.unknown()
            {
                let msg = format!(
                    "passing value of type {} to parameter of type {}",
                    self.ast.fmt_type(arg_ty),
                    self.ast.fmt_type(param_ty)
                );
                self.error(self.ast.exprs[args[i]].loc, msg);
            } else {
                args[i] = self.implicit_rvalue_deref(param_ty, args[i]);
            }
        }

        if let ExprKind::Call(c) = &mut self.ast.exprs[id].kind {
            c.args = args;
        }

        // an owning result must be received by someone
        if !self.ast.exprs[id].flags.contains(NodeFlags::RVALUE)
            && self.is_owner(self.ast.exprs[id].ty)
            && self.no_error()
        {
            self.warning(
                self.ast.exprs[id].loc,
                "unused result; ownership transferred from function call".to_string(),
            );
        }
    }

    fn call_type(&mut self, id: ExprId, t: TypeId) -> ExprId {
        self.ast.exprs[id].ty = t;
        let orig_t = t;
        let t = self.unwrap_alias(t);

        match self.ast.types[t].kind.clone() {
            TypeKind::Prim(PrimType::Void) => {
                if !self.check_call_type_arity(id, orig_t, 0, 0) {
                    return id;
                }
                self.ast.exprs[id].kind = ExprKind::TypeCons(TypeConsArgs::None);
                self.ast.exprs[id].ty = orig_t;
                id
            }
            TypeKind::Prim(p) if p != PrimType::Unknown => {
                if !self.check_call_type_arity(id, orig_t, 1, 1) {
                    return id;
                }
                self.call_type_prim(id, orig_t)
            }
            TypeKind::Struct(st) => {
                let max_args = st.fields.len() as u32;
                if !self.check_call_type_arity(id, orig_t, 0, max_args) {
                    return id;
                }
                self.check_call_type_struct(id, t);
                id
            }
            TypeKind::Array(_) => {
                if !self.check_call_type_arity(id, orig_t, 1, u32::MAX) {
                    return id;
                }
                let msg = format!(
                    "NOT IMPLEMENTED: {} type constructor",
                    self.ast.fmt_type(orig_t)
                );
                self.error(self.ast.exprs[id].loc, msg);
                id
            }
            TypeKind::Fun(_)
            | TypeKind::Ptr { .. }
            | TypeKind::Ref { .. }
            | TypeKind::MutRef { .. }
            | TypeKind::Optional { .. } => {
                let msg = format!(
                    "NOT IMPLEMENTED: {} type constructor",
                    self.ast.fmt_type(orig_t)
                );
                self.error(self.ast.exprs[id].loc, msg);
                id
            }
            TypeKind::Unresolved { .. } => {
                // only reachable after a resolution error
                debug_assert!(self.compiler.errcount() > 0);
                id
            }
            _ => id,
        }
    }

    fn call_type_prim(&mut self, id: ExprId, dst: TypeId) -> ExprId {
        let arg = match &self.ast.exprs[id].kind {
            ExprKind::Call(c) => c.args[0],
            _ => return id,
        };

        if self.ast.exprs[arg]
            .kind
            .as_local()
            .is_some_and(|l| l.kind == LocalKind::Param)
        {
            let msg = format!(
                "{} type cast does not accept named arguments",
                self.ast.fmt_type(dst)
            );
            self.error(self.ast.exprs[arg].loc, msg);
            return id;
        }

        self.typectx_push(dst);
        let arg = self.expr(arg);
        self.typectx_pop();
        self.ast.incuse(Node::Expr(arg));

        self.ast.exprs[id].ty = dst;
        self.ast.exprs[id].kind = ExprKind::TypeCons(TypeConsArgs::Value(arg));
        self.finalize_typecons(id)
    }

    fn check_call_type_arity(
        &mut self,
        id: ExprId,
        t: TypeId,
        min_args: u32,
        max_args: u32,
    ) -> bool {
        let nargs = match &self.ast.exprs[id].kind {
            ExprKind::Call(c) => c.args.len() as u32,
            _ => return false,
        };
        if nargs >= min_args && nargs <= max_args {
            return true;
        }

        let type_str = self.ast.fmt_type(t);
        let base = self.unwrap_alias(t);
        let logical_op = match self.ast.types[base].kind {
            TypeKind::Struct(_) | TypeKind::Array(_) => "type constructor",
            _ => "type cast",
        };
        let ExprKind::Call(c) = self.ast.exprs[id].kind.clone() else {
            return false;
        };

        if nargs < min_args {
            let origin = c
                .args
                .last()
                .map(|&a| self.ast.exprs[a].loc)
                .unwrap_or(self.ast.exprs[c.recv].loc);
            let msg = format!(
                "not enough arguments for {} {}, expecting{} {}",
                type_str,
                logical_op,
                if min_args != max_args { " at least" } else { "" },
                min_args
            );
            self.error(origin, msg);
            return false;
        }

        let extra = c.args[max_args as usize];
        let arg_str = self.ast.fmt_expr(extra);
        let msg = if max_args == 0 {
            format!(
                "unexpected value {}; {} {} accepts no arguments",
                arg_str, type_str, logical_op
            )
        } else {
            format!(
                "unexpected extra value {} in {} {}",
                arg_str, type_str, logical_op
            )
        };
        self.error(self.ast.exprs[extra].loc, msg);
        false
    }

    fn check_call_type_struct(&mut self, id: ExprId, st_ty: TypeId) {
        let TypeKind::Struct(st) = self.ast.types[st_ty].kind.clone() else {
            return;
        };

        enum Slot {
            Field(ExprId),
            Taken(ExprId),
        }
        let mut field_map: HashMap<Symbol, Slot> = HashMap::new();
        if field_map.try_reserve(st.fields.len()).is_err() {
            return self.out_of_mem();
        }
        for &f in &st.fields {
            if let Some(l) = self.ast.exprs[f].kind.as_local() {
                field_map.insert(l.name, Slot::Field(f));
            }
        }

        let mut args = match &self.ast.exprs[id].kind {
            ExprKind::Call(c) => c.args.clone(),
            _ => return,
        };

        for i in 0..args.len() {
            let arg = args[i];
            let named = self.ast.exprs[arg].kind.as_local().map(|l| l.name);
            let name = match (named, &self.ast.exprs[arg].kind) {
                (Some(n), _) => n,
                (None, ExprKind::Id { name, .. }) => *name,
                _ => {
                    self.error(
                        self.ast.exprs[arg].loc,
                        "positional argument in struct constructor; use either name:value \
                         or an identifier with the same name as the intended struct field"
                            .to_string(),
                    );
                    continue;
                }
            };

            let field = match field_map.get(&name) {
                None => {
                    let msg = format!(
                        "no \"{}\" field in struct {}",
                        name,
                        self.ast.fmt_type(st_ty)
                    );
                    self.error(self.ast.exprs[arg].loc, msg);
                    continue;
                }
                Some(Slot::Taken(prev)) => {
                    let prev_loc = self.ast.exprs[*prev].loc;
                    let msg = format!(
                        "duplicate value for field \"{}\" of struct {}",
                        name,
                        self.ast.fmt_type(st_ty)
                    );
                    self.error(self.ast.exprs[arg].loc, msg);
                    if prev_loc.is_known() {
                        let msg = format!(
                            "value for field \"{}\" already provided here",
                            name
                        );
                        self.warning(prev_loc, msg);
                    }
                    continue;
                }
                Some(Slot::Field(f)) => *f,
            };
            field_map.insert(name, Slot::Taken(arg));

            self.ast.exprs[arg].flags.insert(NodeFlags::RVALUE);
            let field_ty = self.ast.exprs[field].ty;
            self.typectx_push(field_ty);

            if named.is_some() {
                // name: value
                self.ast.exprs[arg].flags.insert(NodeFlags::CHECKED);
                let init = self.ast.exprs[arg]
                    .kind
                    .as_local()
                    .and_then(|l| l.init)
                    .expect("named struct argument without value");
                let init = self.expr(init);
                if let Some(l) = self.local_mut(arg) {
                    l.init = Some(init);
                }
                self.ast.exprs[arg].ty = self.ast.exprs[init].ty;
            } else {
                // bare identifier naming the field
                self.ast.exprs[arg].flags.insert(NodeFlags::CHECKED);
                self.id_expr(arg);
            }

            self.ast.incuse(Node::Expr(arg));
            self.typectx_pop();

            if !self.assignable(field_ty, self.ast.exprs[arg].ty) {
                self.error_field_type(arg, field);
            } else {
                args[i] = self.implicit_rvalue_deref(field_ty, args[i]);
            }
        }

        if let ExprKind::Call(c) = &mut self.ast.exprs[id].kind {
            c.args = args;
        }
    }

    fn error_field_type(&mut self, arg: ExprId, field: ExprId) {
        let mut origin = self.ast.exprs[arg].loc;
        if let Some(init) = self.ast.exprs[arg].kind.as_local().and_then(|l| l.init) {
            origin = self.ast.exprs[init].loc;
        }
        let field_name = self.ast.exprs[field]
            .kind
            .as_local()
            .map(|l| l.name)
            .unwrap_or(sym::UNDERSCORE);
        let msg = format!(
            "passing value of type {} for field \"{}\" of type {}",
            self.ast.fmt_type(self.ast.exprs[arg].ty),
            field_name,
            self.ast.fmt_type(self.ast.exprs[field].ty)
        );
        self.error(origin, msg);
    }

    // ——— types (C10) ———

    /// Checks a type unless it has been checked already. Returns the node
    /// to use in the referencing slot (unresolved and template types are
    /// substituted; structural types may dedup to a canonical instance).
    pub(super) fn check_type(&mut self, t: TypeId) -> TypeId {
        if t == self.ast.unknown() || self.ast.types[t].flags.contains(NodeFlags::CHECKED) {
            return t;
        }
        self.type_uncached(t)
    }

    fn type_uncached(&mut self, t: TypeId) -> TypeId {
        self.ast.types[t].flags.insert(NodeFlags::CHECKED);

        let is_template = self.ast.types[t].flags.contains(NodeFlags::TEMPLATE);
        if is_template {
            self.template_nest += 1;
            self.check_template_params(t);
        }

        let out = match self.ast.types[t].kind.clone() {
            TypeKind::Prim(_) | TypeKind::Ns => t,

            TypeKind::Array(_) => self.array_type(t),
            TypeKind::Fun(_) => self.funtype1(t, self.ast.unknown()),

            TypeKind::Ptr { elem } => {
                let e = self.check_type(elem);
                if let TypeKind::Ptr { elem } = &mut self.ast.types[t].kind {
                    *elem = e;
                }
                t
            }
            TypeKind::Ref { elem } => {
                let e = self.check_type(elem);
                if let TypeKind::Ref { elem } = &mut self.ast.types[t].kind {
                    *elem = e;
                }
                t
            }
            TypeKind::MutRef { elem } => {
                let e = self.check_type(elem);
                if let TypeKind::MutRef { elem } = &mut self.ast.types[t].kind {
                    *elem = e;
                }
                t
            }
            TypeKind::Slice { elem } => {
                let e = self.check_type(elem);
                if let TypeKind::Slice { elem } = &mut self.ast.types[t].kind {
                    *elem = e;
                }
                t
            }
            TypeKind::MutSlice { elem } => {
                let e = self.check_type(elem);
                if let TypeKind::MutSlice { elem } = &mut self.ast.types[t].kind {
                    *elem = e;
                }
                t
            }
            TypeKind::Optional { elem } => {
                let e = self.check_type(elem);
                if let TypeKind::Optional { elem } = &mut self.ast.types[t].kind {
                    *elem = e;
                }
                t
            }

            TypeKind::Struct(_) => self.struct_type(t),
            TypeKind::Alias(_) => self.alias_type(t),
            TypeKind::Template(_) => self.template_type(t),
            TypeKind::Placeholder { .. } => {
                debug_assert!(self.template_nest > 0, "placeholder outside template");
                t
            }
            TypeKind::Unresolved { .. } => self.unresolved_type(t),
        };

        if is_template {
            self.template_nest -= 1;
        }
        out
    }

    /// Checks the default values of a template's parameters.
    fn check_template_params(&mut self, t: TypeId) {
        let params = match &self.ast.types[t].kind {
            TypeKind::Struct(st) => st.tpl.params().to_vec(),
            TypeKind::Alias(a) => a.tpl.params().to_vec(),
            _ => Vec::new(),
        };
        for p in params {
            let Some(default) = self.ast.tplparams[p].default else {
                continue;
            };
            let new_default = match default {
                Node::Type(dt) => Node::Type(self.check_type(dt)),
                Node::Expr(de) => Node::Expr(self.expr(de)),
            };
            self.ast.tplparams[p].default = Some(new_default);
        }
    }

    fn struct_type(&mut self, t: TypeId) -> TypeId {
        let TypeKind::Struct(st) = self.ast.types[t].kind.clone() else {
            return t;
        };

        if st.ns_parent.is_none() {
            let parent = self.current_ns();
            if let TypeKind::Struct(sm) = &mut self.ast.types[t].kind {
                sm.ns_parent = parent;
            }
        }

        self.enter_ns(NsParent::Type(t));

        let mut align: u64 = 0;
        let mut size: u64 = 0;
        for &f in &st.fields {
            self.check_local(f);
            let fty = self.ast.exprs[f].ty;

            if self.is_owner(fty) {
                // optimistic: a drop function seen later can still flip a
                // field type to owner, which post-analysis picks up
                self.ast.types[t].flags.insert(NodeFlags::SUBOWNERS);
            }

            let ct = self.concrete(fty);
            let falign = (self.ast.types[ct].align as u64).max(1);
            let offset = align2(size, falign);
            if let Some(l) = self.local_mut(f) {
                l.offset = offset;
            }
            size = offset + self.ast.types[ct].size;
            align = align.max(falign);
        }

        self.leave_ns();

        self.ast.types[t].align = align.min(u8::MAX as u64) as u8;
        self.ast.types[t].size = align2(size, align.max(1));

        let (canon, added) = self.intern_usertype(t);
        if !added {
            return canon;
        }

        if !self.ast.types[canon].flags.contains(NodeFlags::SUBOWNERS) {
            self.postanalyze.insert(canon, false);
        }
        canon
    }

    fn array_type(&mut self, t: TypeId) -> TypeId {
        let TypeKind::Array(a) = self.ast.types[t].kind.clone() else {
            return t;
        };

        let elem = self.check_type(a.elem);
        if let TypeKind::Array(am) = &mut self.ast.types[t].kind {
            am.elem = elem;
        }

        if self.is_owner(elem) {
            self.ast.types[t].flags.insert(NodeFlags::SUBOWNERS);
        }

        if let Some(len_expr) = a.len_expr {
            self.typectx_push(self.ast.prim(PrimType::Uint));
            let len_expr = self.expr(len_expr);
            self.typectx_pop();
            if let TypeKind::Array(am) = &mut self.ast.types[t].kind {
                am.len_expr = Some(len_expr);
            }

            if self.compiler.errcount() > 0 {
                return t;
            }

            match self.comptime_eval_uint(len_expr) {
                Some(len) => {
                    if let TypeKind::Array(am) = &mut self.ast.types[t].kind {
                        am.len = len;
                    }
                    if len == 0 {
                        self.error(self.ast.types[t].loc, "zero length array".to_string());
                    }
                }
                None => {
                    self.error(
                        self.ast.exprs[len_expr].loc,
                        "array length is not a compile-time constant".to_string(),
                    );
                    return t;
                }
            }
        }

        if self.pub_nest > 0 {
            self.ast.types[t].flags.set_vis(Visibility::Pub);
        }

        self.arraytype_calc_size(t);
        let (canon, _) = self.intern_usertype(t);
        canon
    }

    fn arraytype_calc_size(&mut self, t: TypeId) {
        let TypeKind::Array(a) = self.ast.types[t].kind.clone() else {
            return;
        };
        if a.len == 0 {
            // sized like the dynamic array header {cap, len uint; ptr T}
            let ptr = self.compiler.target.ptr_size();
            let int = self.compiler.target.int_size();
            self.ast.types[t].align = ptr.max(int) as u8;
            self.ast.types[t].size = int * 2 + ptr;
            return;
        }
        let elem_size = self.ast.types[a.elem].size;
        match a.len.checked_mul(elem_size) {
            Some(size) => {
                self.ast.types[t].align = self.ast.types[a.elem].align;
                self.ast.types[t].size = size;
            }
            None => {
                let msg = format!(
                    "array constant too large; overflows uint ({})",
                    self.ast.fmt_type(self.uint_type)
                );
                self.error(self.ast.types[t].loc, msg);
            }
        }
    }

    fn funtype1(&mut self, t: TypeId, this_type: TypeId) -> TypeId {
        let TypeKind::Fun(ft) = self.ast.types[t].kind.clone() else {
            return t;
        };

        self.typectx_push(this_type);
        for &p in &ft.params {
            self.check_local(p);
            // a public function cannot expose internal types
            let pty = self.ast.exprs[p].ty;
            if self.pub_nest > 0 && self.ast.types[pty].flags.vis() != Visibility::Pub {
                let msg = format!(
                    "parameter of internal type {} in public function",
                    self.ast.fmt_type(pty)
                );
                self.error(self.ast.exprs[p].loc, msg);
                let hint = format!("mark {} `pub`", self.ast.fmt_type(pty));
                self.help(self.ast.types[pty].loc, hint);
            }
        }
        let result = self.check_type(ft.result);
        if let TypeKind::Fun(fm) = &mut self.ast.types[t].kind {
            fm.result = result;
        }
        self.typectx_pop();

        let (canon, _) = self.intern_usertype(t);
        canon
    }

    fn alias_type(&mut self, t: TypeId) -> TypeId {
        let TypeKind::Alias(a) = self.ast.types[t].kind.clone() else {
            return t;
        };

        let elem = self.check_type(a.elem);
        if let TypeKind::Alias(am) = &mut self.ast.types[t].kind {
            am.elem = elem;
        }

        if elem == self.ast.void() {
            self.error(self.ast.types[t].loc, "cannot alias type void".to_string());
            return t;
        }

        if self.is_owner(elem) {
            self.ast.types[t].flags.insert(NodeFlags::SUBOWNERS);
        }

        if a.ns_parent.is_none() {
            let parent = self.current_ns();
            if let TypeKind::Alias(am) = &mut self.ast.types[t].kind {
                am.ns_parent = parent;
            }
        }

        if self.pub_nest > 0 {
            if self.ast.types[elem].flags.vis() != Visibility::Pub {
                let msg = format!(
                    "internal type {} in public alias {}",
                    self.ast.fmt_type(elem),
                    a.name
                );
                self.error(self.ast.types[t].loc, msg);
                let hint = format!("mark {} `pub`", self.ast.fmt_type(elem));
                self.help(self.ast.types[elem].loc, hint);
            }
            self.ast.types[t].flags.set_vis(Visibility::Pub);
        }
        t
    }

    fn unresolved_type(&mut self, t: TypeId) -> TypeId {
        let TypeKind::Unresolved { name, resolved } = self.ast.types[t].kind else {
            return t;
        };
        if let Some(r) = resolved {
            return r;
        }

        let found = self.lookup(name);
        if let Some(Node::Type(ty)) = found {
            let ty = self.check_type(ty);
            self.ast.types[ty].nuse += self.ast.types[t].nuse;
            if let TypeKind::Unresolved { resolved, .. } = &mut self.ast.types[t].kind {
                *resolved = Some(ty);
            }

            // alias graphs must be acyclic; aliases are unwrapped all over
            // the checker and a cycle would never terminate
            if matches!(self.ast.types[ty].kind, TypeKind::Alias(_)) && self.alias_has_cycle(ty)
            {
                let msg = format!("cyclic type alias \"{}\"", name);
                self.error(self.ast.types[ty].loc, msg);
                let unknown = self.ast.unknown();
                if let TypeKind::Alias(am) = &mut self.ast.types[ty].kind {
                    am.elem = unknown;
                }
            }
            return ty;
        }

        match found {
            None => {
                let msg = format!("unknown type \"{}\"", name);
                self.error(self.ast.types[t].loc, msg);
            }
            Some(n) => {
                let descr = match n {
                    Node::Expr(e) => self.ast.describe_expr(e),
                    Node::Type(_) => "type",
                };
                let msg = format!("{} is not a type (it's a {})", name, descr);
                self.error(self.ast.types[t].loc, msg);
                let loc = self.ast.loc(n);
                if loc.is_known() {
                    self.help(loc, format!("{} defined here", name));
                }
            }
        }

        // rebind the name to the unresolved type to suppress repeats
        self.scope.define(name, Node::Type(t));
        t
    }

    fn alias_has_cycle(&self, start: TypeId) -> bool {
        let mut seen: HashSet<TypeId> = HashSet::new();
        let mut t = start;
        loop {
            if !seen.insert(t) {
                return true;
            }
            t = match &self.ast.types[t].kind {
                TypeKind::Alias(a) => a.elem,
                TypeKind::Unresolved {
                    resolved: Some(r), ..
                } => *r,
                _ => return false,
            };
        }
    }

    // ——— imports (C11) ———

    fn import(&mut self, im: &Import) {
        if im.name != sym::UNDERSCORE {
            // import "foo/bar" as lol
            match im.ns {
                Some(ns) => {
                    trace!("define \"{}\" = package namespace", im.name);
                    self.define(im.name, Node::Expr(ns));
                }
                None => {
                    debug_assert!(false, "import not resolved by the loader");
                    return;
                }
            }
        }
        if !im.items.is_empty() {
            self.import_members(im);
        }
    }

    fn import_members(&mut self, im: &Import) {
        let Some(ns) = im.ns else {
            return;
        };
        let ExprKind::Ns(nsx) = self.ast.exprs[ns].kind.clone() else {
            return;
        };
        let pkg_path = nsx.name;

        // '*' imports are denoted by the wildcard name
        let mut star: Option<&crate::language::ast::ImportItem> = None;

        for item in &im.items {
            if item.name == sym::UNDERSCORE {
                star = Some(item);
                continue;
            }
            let orig = item.orig_name.unwrap_or(item.name);
            match nsx.members.iter().find(|m| m.name == orig) {
                Some(m) => self.define(item.name, m.node),
                None => {
                    let loc = if item.orig_name_loc.is_known() {
                        item.orig_name_loc
                    } else {
                        item.loc
                    };
                    let msg =
                        format!("no member \"{}\" in package \"{}\"", orig, pkg_path);
                    self.error(loc, msg);
                }
            }
        }

        let Some(star) = star else {
            return;
        };

        // import everything not explicitly picked above
        for m in &nsx.members {
            if let Some(item) = im
                .items
                .iter()
                .find(|it| it.orig_name.unwrap_or(it.name) == m.name)
            {
                if item.orig_name.is_some() {
                    // a later use of the original name gets pointed at the
                    // rename
                    self.didyoumean_add(item.name, item.loc, item.orig_name);
                }
                continue;
            }

            let in_scope = self.scope.lookup(m.name, 0);
            let existing = in_scope.or_else(|| self.pkg.def(m.name));
            match existing {
                Some(ex) => {
                    if in_scope.is_some() {
                        // the collision comes from another import; report at
                        // the star so the message points into this file
                        let msg = format!(
                            "importing \"{}\" shadows previous import",
                            m.name
                        );
                        self.error(star.loc, msg);
                    } else {
                        let msg = format!("duplicate definition \"{}\"", m.name);
                        self.error(self.ast.loc(ex), msg);
                        if star.loc.is_known() {
                            let msg = format!(
                                "\"{}\" previously imported from package \"{}\"",
                                m.name, pkg_path
                            );
                            self.warning(star.loc, msg);
                        }
                    }
                }
                None => self.scope.define(m.name, m.node),
            }
        }
    }

    // ——— unit-level prepass ———

    /// Assigns namespace parents to top-level declarations and registers
    /// type functions so member lookup can find them before their bodies
    /// are checked.
    fn assign_nsparent(&mut self, s: Stmt) {
        let Stmt::Expr(e) = s else {
            return;
        };
        let ExprKind::Fun(f) = self.ast.exprs[e].kind.clone() else {
            return;
        };
        match f.recv {
            Some(recv) => {
                let recv = self.check_type(recv);
                if let ExprKind::Fun(fm) = &mut self.ast.exprs[e].kind {
                    fm.recv = Some(recv);
                    fm.ns_parent = Some(NsParent::Type(recv));
                }
                if let Some(name) = f.name {
                    let tid = self.typeid(recv);
                    self.pkg.tfundefs.define(tid, name, e);
                }
            }
            None => {
                let parent = self.current_ns();
                if let ExprKind::Fun(fm) = &mut self.ast.exprs[e].kind {
                    fm.ns_parent = parent;
                }
            }
        }
    }

    fn define_at_unit_level(&mut self, s: Stmt) {
        let Stmt::Expr(e) = s else {
            return;
        };
        if let ExprKind::Fun(f) = &self.ast.exprs[e].kind {
            if f.recv.is_none() {
                if let Some(name) = f.name {
                    self.define(name, Node::Expr(e));
                }
            }
        }
    }

    // ——— post-analysis ———

    /// Propagates owner classification to types whose fields depend on
    /// `drop` functions defined after the type, until a fixed point.
    fn postanalyze_all(&mut self) {
        loop {
            let pending: Vec<TypeId> = self
                .postanalyze
                .iter()
                .filter(|&(_, &done)| !done)
                .map(|(&t, _)| t)
                .collect();
            if pending.is_empty() {
                return;
            }
            for t in pending {
                self.postanalyze.insert(t, true);
                self.postanalyze_any(t);
            }
        }
    }

    fn postanalyze_any(&mut self, t: TypeId) {
        trace!("postanalyze {}", self.ast.fmt_type(t));
        match self.ast.types[t].kind.clone() {
            TypeKind::Struct(st) => {
                for &f in &st.fields {
                    let fty = self.ast.exprs[f].ty;
                    self.postanalyze_dependency(fty);
                    if self.is_owner(fty) {
                        self.ast.types[t].flags.insert(NodeFlags::SUBOWNERS);
                    }
                }
            }
            TypeKind::Alias(a) => self.postanalyze_any(a.elem),
            _ => {}
        }
    }

    fn postanalyze_dependency(&mut self, t: TypeId) {
        if !matches!(self.ast.types[t].kind, TypeKind::Struct(_)) {
            return;
        }
        if self.postanalyze.get(&t) == Some(&true) {
            return;
        }
        self.postanalyze.insert(t, true);
        self.postanalyze_any(t);
    }
}

fn align2(size: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}
