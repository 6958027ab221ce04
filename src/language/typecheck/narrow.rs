//! Optional-type flow narrowing.
//!
//! An optional value participates in boolean contexts (`if x`, `x && y`,
//! `x || y`, `!x`). Walking a condition records, per referenced optional
//! binding, whether the "then" branch sees it as present (the element type)
//! or absent (`void`). Narrowing works by cloning the binding into the
//! branch scope, never by mutating the original, so the outer binding keeps
//! its wider type.

use log::trace;

use super::checker::Checker;
use crate::language::ast::{
    Expr, ExprId, ExprKind, LocalKind, Node, NodeFlags, Op, PrimType, TypeKind,
};

/// Condition walk facts, accumulated into a bit set.
const HAS_COMPLEX_OR: u32 = 1 << 0;
const HAS_LOCAL_DEF: u32 = 1 << 1;
const HAS_NEGATION: u32 = 1 << 2;
const HAS_ID_NARROWING: u32 = 1 << 3;

impl Checker<'_> {
    /// Narrows optional bindings referenced by `cond` into the current
    /// (then-branch) scope. Returns the staged inverse clones for the else
    /// branch, or `None` when the walk was rejected with a diagnostic.
    pub(super) fn narrow_cond(
        &mut self,
        cond: ExprId,
        collect_else: bool,
    ) -> Option<Vec<ExprId>> {
        let mark = self.scope.len();
        let mut facts = 0u32;
        self.narrow_cond1(&mut facts, cond);

        // definitions cannot be combined with operators that make the
        // narrowing ambiguous
        if facts & HAS_COMPLEX_OR != 0 && facts & (HAS_LOCAL_DEF | HAS_ID_NARROWING) != 0 {
            self.narrow_reject(cond, Op::LOr);
            return None;
        }
        if facts & HAS_NEGATION != 0 && facts & HAS_LOCAL_DEF != 0 {
            self.narrow_reject(cond, Op::Not);
            return None;
        }

        let narrowed: Vec<(ExprId, bool, bool)> = self
            .scope
            .entries_from(mark)
            .iter()
            .filter_map(|&(_, node)| match node {
                Node::Expr(id) if self.ast.exprs[id].flags.contains(NodeFlags::NARROWED) => {
                    let f = self.ast.exprs[id].flags;
                    Some((
                        id,
                        f.contains(NodeFlags::MARK1),
                        f.contains(NodeFlags::MARK2),
                    ))
                }
                _ => None,
            })
            .collect();

        let mut elsedefs = Vec::new();
        for (id, is_neg, is_local) in narrowed {
            self.ast.exprs[id]
                .flags
                .remove(NodeFlags::MARK1 | NodeFlags::MARK2);

            // the optional type is found either on the binding itself or on
            // its initializer:
            //   if let x = a      — binding's type is the optional
            //   if let x int = a  — binding's type is int; use the init type
            let mut opt = self.ast.exprs[id].ty;
            if !matches!(self.ast.types[opt].kind, TypeKind::Optional { .. }) {
                let init = self.ast.exprs[id]
                    .kind
                    .as_local()
                    .and_then(|l| l.init)
                    .expect("narrowed non-optional binding without initializer");
                opt = self.ast.exprs[init].ty;
            }
            let TypeKind::Optional { elem } = self.ast.types[opt].kind else {
                continue;
            };
            let mut ok_type = elem;

            if is_local {
                let declared = self.ast.exprs[id].ty;
                if matches!(self.ast.types[declared].kind, TypeKind::Unresolved { .. }) {
                    ok_type = declared;
                } else if declared != self.ast.unknown() && !self.assignable(declared, ok_type) {
                    let origin = self.ast.exprs[id]
                        .kind
                        .as_local()
                        .and_then(|l| l.init)
                        .map(|init| self.ast.exprs[init].loc)
                        .unwrap_or(self.ast.exprs[id].loc);
                    let msg = format!(
                        "cannot assign value of type {} to {} of type {}",
                        self.ast.fmt_type(ok_type),
                        self.ast.describe_expr(id),
                        self.ast.fmt_type(declared)
                    );
                    self.error(origin, msg);
                }
            } else if collect_else {
                // stage the inverse for the else branch before narrowing
                let inverse = self.ast.clone_expr(id);
                self.ast.exprs[inverse].ty = if is_neg { ok_type } else { self.ast.void() };
                elsedefs.push(inverse);
            }

            self.ast.exprs[id].ty = if is_neg { self.ast.void() } else { ok_type };
            trace!(
                "narrowed {} to {} in then-branch",
                self.ast.fmt_expr(id),
                self.ast.fmt_type(self.ast.exprs[id].ty)
            );
        }

        Some(elsedefs)
    }

    fn narrow_cond1(&mut self, facts: &mut u32, x: ExprId) {
        let kind = self.ast.exprs[x].kind.clone();
        match kind {
            ExprKind::Prefix { op: Op::Not, expr } => {
                *facts |= HAS_NEGATION;
                let mark = self.scope.len();
                self.narrow_cond1(facts, expr);
                // toggle the "negative" mark on everything the subtree
                // narrowed; !!a cancels out
                let flips: Vec<ExprId> = self
                    .scope
                    .entries_from(mark)
                    .iter()
                    .filter_map(|&(_, node)| match node {
                        Node::Expr(id)
                            if self.ast.exprs[id].flags.contains(NodeFlags::NARROWED) =>
                        {
                            Some(id)
                        }
                        _ => None,
                    })
                    .collect();
                for id in flips {
                    self.ast.exprs[id].flags.toggle(NodeFlags::MARK1);
                }
            }

            ExprKind::Binop {
                op: op @ (Op::LAnd | Op::LOr),
                left,
                right,
            } => {
                if op == Op::LOr {
                    *facts |= HAS_COMPLEX_OR;
                }
                self.narrow_cond1(facts, left);
                self.narrow_cond1(facts, right);
            }

            ExprKind::Id { name, target } => {
                let ty = self.ast.exprs[x].ty;
                if !matches!(self.ast.types[ty].kind, TypeKind::Optional { .. })
                    || self.ast.exprs[x].flags.contains(NodeFlags::NARROWED)
                {
                    return;
                }
                self.ast.exprs[x].flags.insert(NodeFlags::NARROWED);
                *facts |= HAS_ID_NARROWING;

                // skip if a previous pass over this condition already
                // narrowed the binding into this frame
                if let Some(Node::Expr(existing)) = self.scope.lookup(name, 0) {
                    let e = &self.ast.exprs[existing];
                    if e.kind.is_local() && e.flags.contains(NodeFlags::NARROWED) {
                        return;
                    }
                }
                let Some(Node::Expr(referent)) = target else {
                    return;
                };
                let clone = self.ast.clone_expr(referent);
                self.ast.exprs[clone].flags.insert(NodeFlags::NARROWED);
                trace!("narrowing clone of \"{}\"", name);
                self.scope.define(name, Node::Expr(clone));
            }

            ExprKind::Local(ref l) if matches!(l.kind, LocalKind::Var | LocalKind::Let) => {
                let ty = self.ast.exprs[x].ty;
                let ty_kind = &self.ast.types[ty].kind;
                if self.ast.exprs[x].flags.contains(NodeFlags::NARROWED)
                    || matches!(ty_kind, TypeKind::Prim(PrimType::Unknown))
                {
                    return;
                }
                if !matches!(ty_kind, TypeKind::Optional { .. }) {
                    // only a definition whose initializer is (possibly)
                    // optional participates
                    let init_opt = l.init.is_some_and(|init| {
                        let it = self.ast.exprs[init].ty;
                        matches!(
                            self.ast.types[it].kind,
                            TypeKind::Optional { .. } | TypeKind::Prim(PrimType::Unknown)
                        )
                    });
                    if !init_opt {
                        return;
                    }
                }
                *facts |= HAS_LOCAL_DEF;
                self.ast.exprs[x]
                    .flags
                    .insert(NodeFlags::NARROWED | NodeFlags::MARK2);
                self.scope.define(l.name, Node::Expr(x));
            }

            _ => {}
        }
    }

    /// Installs the staged inverse clones into the (freshly entered) else
    /// scope.
    pub(super) fn narrow_elsedefs(&mut self, elsedefs: &[ExprId]) {
        for &id in elsedefs {
            let name = match &self.ast.exprs[id].kind {
                ExprKind::Local(l) => l.name,
                ExprKind::Id { name, .. } => *name,
                _ => continue,
            };
            self.scope.define(name, Node::Expr(id));
        }
    }

    fn narrow_reject(&mut self, cond: ExprId, op: Op) {
        let mut origin = None;
        self.narrow_find_binding(cond, &mut origin);
        let loc = origin
            .map(|id| self.ast.exprs[id].loc)
            .unwrap_or(self.ast.exprs[cond].loc);
        self.error(
            loc,
            format!(
                "cannot use type-narrowing let/var definition with '{}' operation",
                op.token()
            ),
        );
    }

    fn narrow_find_binding(&self, x: ExprId, found: &mut Option<ExprId>) {
        if found.is_some() {
            return;
        }
        let e: &Expr = &self.ast.exprs[x];
        match &e.kind {
            ExprKind::Local(l)
                if matches!(l.kind, LocalKind::Var | LocalKind::Let)
                    && e.flags.contains(NodeFlags::NARROWED) =>
            {
                *found = Some(x);
                return;
            }
            ExprKind::Id { .. } if e.flags.contains(NodeFlags::NARROWED) => {
                *found = Some(x);
                return;
            }
            _ => {}
        }
        for child in self.ast.expr_children(x) {
            if let Node::Expr(c) = child {
                self.narrow_find_binding(c, found);
            }
        }
    }
}
