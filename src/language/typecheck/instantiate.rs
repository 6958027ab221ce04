//! Template instantiation.
//!
//! A template use (`Foo<int>`) is checked in three steps: argument arity
//! and resolution, instance-cache lookup, and placeholder substitution via
//! the AST transformer. Instances register in the cache before they are
//! checked so self-referential templates terminate.

use std::collections::HashMap;

use log::trace;
use smallvec::SmallVec;

use super::checker::Checker;
use crate::language::ast::{
    Ast, Node, NodeFlags, TplInfo, TplParamId, TypeId, TypeKind,
};
use crate::language::symbols::Symbol;
use crate::language::transform::{Transformer, transform_children};

/// Instance cache key: the template plus the type-ids of its arguments.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(super) struct InstanceKey(TypeId, Vec<Symbol>);

struct Instantiator<'s> {
    subst: &'s HashMap<TplParamId, Node>,
    template_nest: u32,
}

impl Transformer for Instantiator<'_> {
    fn visit(&mut self, ast: &mut Ast, n: Node) -> Node {
        let before = n;
        let mut n = n;

        if let Node::Type(t) = n {
            if let TypeKind::Placeholder { param } = ast.types[t].kind {
                match self.subst.get(&param) {
                    Some(&arg) => n = arg,
                    // an outer template's placeholder; leave it for the
                    // enclosing instantiation
                    None => return n,
                }
            }
        }

        let entered_template = ast.flags(n).contains(NodeFlags::TEMPLATE);
        self.template_nest += entered_template as u32;
        n = transform_children(ast, n, self);
        self.template_nest -= entered_template as u32;

        if n != before {
            // a placeholder was replaced somewhere below: cached type-ids on
            // this path are stale, and the path must be re-checked
            let keep_flags = match n {
                Node::Type(t) => {
                    ast.types[t].tid = None;
                    matches!(
                        ast.types[t].kind,
                        TypeKind::Prim(_) | TypeKind::Placeholder { .. }
                    )
                }
                Node::Expr(_) => false,
            };
            if !keep_flags {
                ast.flags_mut(n)
                    .remove(NodeFlags::CHECKED | NodeFlags::UNKNOWN);
            }
        }
        n
    }
}

impl Checker<'_> {
    /// Checks a use of a template, e.g. `var x Foo<int>`. Outside template
    /// definitions the use is replaced by a (possibly cached) instance;
    /// inside one it stays symbolic until an outer instantiation reaches it.
    pub(super) fn template_type(&mut self, id: TypeId) -> TypeId {
        let TypeKind::Template(tt) = self.ast.types[id].kind.clone() else {
            return id;
        };
        let recv = self.check_type(tt.recv);
        if recv != tt.recv {
            if let TypeKind::Template(t) = &mut self.ast.types[id].kind {
                t.recv = recv;
            }
        }

        let params: Vec<TplParamId> = self.template_params(recv).to_vec();
        let total = params.len();
        let required = params
            .iter()
            .filter(|&&p| self.ast.tplparams[p].default.is_none())
            .count();

        // a template with defaulted parameters whose defaults failed to
        // check cannot be validated further
        if required != total && self.compiler.errcount() > 0 {
            return id;
        }

        if tt.args.len() < required || tt.args.len() > total {
            let msg = format!(
                "{} template parameters; want{} {}",
                if tt.args.len() > total {
                    "too many"
                } else {
                    "not enough"
                },
                if required < total { " at least" } else { "" },
                required
            );
            self.error(self.ast.types[id].loc, msg);
            let mut origin = crate::language::span::Loc::UNKNOWN;
            for &p in &params {
                origin = origin.union(self.ast.tplparams[p].loc);
            }
            if origin.is_known() {
                self.help(
                    origin,
                    format!(
                        "template parameter{} defined here",
                        if total == 1 { "" } else { "s" }
                    ),
                );
            }
            return id;
        }

        // resolve the arguments
        for i in 0..tt.args.len() {
            let mut arg = match &self.ast.types[id].kind {
                TypeKind::Template(t) => t.args[i],
                _ => return id,
            };
            if self.ast.flags(arg).contains(NodeFlags::CHECKED) {
                continue;
            }
            // a placeholder argument with a default collapses to it
            loop {
                let Node::Type(t) = arg else { break };
                let TypeKind::Placeholder { param } = self.ast.types[t].kind else {
                    break;
                };
                match self.ast.tplparams[param].default {
                    Some(d) => {
                        self.ast.types[t].flags.insert(NodeFlags::CHECKED);
                        arg = d;
                    }
                    None => break,
                }
            }
            let resolved = match arg {
                Node::Type(t) => Node::Type(self.check_type(t)),
                Node::Expr(e) => Node::Expr(self.expr(e)),
            };
            if let TypeKind::Template(t) = &mut self.ast.types[id].kind {
                t.args[i] = resolved;
            }
        }

        if !self.no_error() {
            return id;
        }

        if self.template_nest == 0 {
            self.instantiate_template(id)
        } else {
            id
        }
    }

    fn template_params(&self, t: TypeId) -> &[TplParamId] {
        match &self.ast.types[t].kind {
            TypeKind::Struct(st) => st.tpl.params(),
            TypeKind::Alias(a) => a.tpl.params(),
            _ => &[],
        }
    }

    fn instantiate_template(&mut self, id: TypeId) -> TypeId {
        let TypeKind::Template(tt) = self.ast.types[id].kind.clone() else {
            return id;
        };
        let template = tt.recv;
        let params: Vec<TplParamId> = self.template_params(template).to_vec();

        // complete the argument list with trailing defaults
        let mut args: SmallVec<[Node; 4]> = tt.args.clone();
        for &p in params.iter().skip(args.len()) {
            let default = self.ast.tplparams[p]
                .default
                .expect("arity check admitted a missing argument without default");
            args.push(default);
        }

        trace!(
            "instantiating template {} with {} args",
            self.ast.fmt_type(template),
            args.len()
        );

        let key = self.instance_key(template, &args);
        if let Some(key) = &key {
            if let Some(&cached) = self.instance_cache.get(key) {
                trace!("using existing template instance");
                return cached;
            }
        }

        let subst: HashMap<TplParamId, Node> =
            params.iter().copied().zip(args.iter().copied()).collect();
        let mut tr = Instantiator {
            subst: &subst,
            template_nest: self.template_nest,
        };
        let out = tr.visit(self.ast, Node::Type(template));
        let Node::Type(mut instance) = out else {
            return id;
        };

        if instance == template {
            // no placeholder was reachable; still a distinct instance
            instance = self.ast.clone_type(template);
        }

        let inst = &mut self.ast.types[instance];
        inst.flags.remove(NodeFlags::TEMPLATE);
        inst.flags.insert(NodeFlags::TEMPLATEI);
        inst.tid = None;
        match &mut inst.kind {
            TypeKind::Struct(st) => st.tpl = TplInfo::Args(args.to_vec()),
            TypeKind::Alias(a) => a.tpl = TplInfo::Args(args.to_vec()),
            _ => {}
        }

        // register before checking so recursive references find the instance
        if let Some(key) = key.clone() {
            self.instance_cache.insert(key, instance);
        }

        let checked = self.check_type(instance);
        if checked != instance {
            if let Some(key) = key {
                self.instance_cache.insert(key, checked);
            }
        }
        checked
    }

    /// Cache key for an instantiation; `None` when an argument is not a
    /// type (expression arguments are not memoized).
    fn instance_key(&mut self, template: TypeId, args: &[Node]) -> Option<InstanceKey> {
        let mut tids = Vec::with_capacity(args.len());
        for &arg in args {
            match arg {
                Node::Type(t) => tids.push(self.typeid(t)),
                Node::Expr(_) => return None,
            }
        }
        Some(InstanceKey(template, tids))
    }
}
