use crate::language::ast::{
    Ast, ExprId, ExprKind, Node, Stmt, TplInfo, TypeConsArgs, TypeId, TypeKind,
};

/// Node rewriting callback for [`transform_children`]. `visit` receives a
/// child node and returns its replacement (the same node for "no change").
/// A visitor that wants deep rewriting calls `transform_children` on the
/// nodes it keeps.
pub trait Transformer {
    fn visit(&mut self, ast: &mut Ast, n: Node) -> Node;
}

/// Applies `tr.visit` to every semantic child slot of `n`. When any child is
/// replaced with a distinct node, `n` is cloned and the clone's slots are
/// updated; otherwise `n` is returned as-is.
///
/// Semantic children are sub-expressions, sub-statements and component
/// types. The declared type of a local is a semantic child; the computed
/// type of any other expression kind is not visited.
pub fn transform_children<T: Transformer + ?Sized>(ast: &mut Ast, n: Node, tr: &mut T) -> Node {
    match n {
        Node::Expr(id) => Node::Expr(transform_expr_children(ast, id, tr)),
        Node::Type(id) => Node::Type(transform_type_children(ast, id, tr)),
    }
}

fn visit_expr<T: Transformer + ?Sized>(ast: &mut Ast, id: ExprId, tr: &mut T) -> ExprId {
    match tr.visit(ast, Node::Expr(id)) {
        Node::Expr(id) => id,
        Node::Type(_) => id, // an expression slot cannot hold a type
    }
}

fn visit_type<T: Transformer + ?Sized>(ast: &mut Ast, id: TypeId, tr: &mut T) -> TypeId {
    match tr.visit(ast, Node::Type(id)) {
        Node::Type(id) => id,
        Node::Expr(_) => id,
    }
}

fn transform_expr_children<T: Transformer + ?Sized>(
    ast: &mut Ast,
    id: ExprId,
    tr: &mut T,
) -> ExprId {
    let kind = ast.exprs[id].kind.clone();
    let mut changed = false;

    macro_rules! expr_slot {
        ($slot:expr) => {{
            let next = visit_expr(ast, $slot, tr);
            changed |= next != $slot;
            next
        }};
    }
    macro_rules! opt_expr_slot {
        ($slot:expr) => {
            match $slot {
                Some(e) => Some(expr_slot!(e)),
                None => None,
            }
        };
    }

    let new_kind = match kind {
        ExprKind::Id { .. }
        | ExprKind::Ns(_)
        | ExprKind::BoolLit { .. }
        | ExprKind::IntLit { .. }
        | ExprKind::FloatLit { .. }
        | ExprKind::StrLit { .. } => return id,

        ExprKind::Local(mut l) => {
            // the declared type is part of the local's structure
            let ty = ast.exprs[id].ty;
            let new_ty = visit_type(ast, ty, tr);
            changed |= new_ty != ty;
            l.init = opt_expr_slot!(l.init);
            if !changed {
                return id;
            }
            let new_id = ast.clone_expr(id);
            ast.exprs[new_id].kind = ExprKind::Local(l);
            ast.exprs[new_id].ty = new_ty;
            return new_id;
        }

        ExprKind::Fun(mut f) => {
            let ty = ast.exprs[id].ty;
            let new_ty = visit_type(ast, ty, tr);
            changed |= new_ty != ty;
            f.body = opt_expr_slot!(f.body);
            if !changed {
                return id;
            }
            let new_id = ast.clone_expr(id);
            ast.exprs[new_id].kind = ExprKind::Fun(f);
            ast.exprs[new_id].ty = new_ty;
            return new_id;
        }

        ExprKind::Block(mut b) => {
            for stmt in b.children.iter_mut() {
                match *stmt {
                    Stmt::Expr(e) => {
                        let next = expr_slot!(e);
                        *stmt = Stmt::Expr(next);
                    }
                    Stmt::Typedef(td) => {
                        let ty = ast.typedefs[td].ty;
                        let next = visit_type(ast, ty, tr);
                        if next != ty {
                            changed = true;
                            let new_td = ast.typedefs.alloc(ast.typedefs[td].clone());
                            ast.typedefs[new_td].ty = next;
                            *stmt = Stmt::Typedef(new_td);
                        }
                    }
                }
            }
            ExprKind::Block(b)
        }

        ExprKind::Call(mut c) => {
            c.recv = expr_slot!(c.recv);
            for arg in c.args.iter_mut() {
                *arg = expr_slot!(*arg);
            }
            ExprKind::Call(c)
        }

        ExprKind::TypeCons(args) => ExprKind::TypeCons(match args {
            TypeConsArgs::None => TypeConsArgs::None,
            TypeConsArgs::Value(e) => TypeConsArgs::Value(expr_slot!(e)),
            TypeConsArgs::Fields(mut fields) => {
                for f in fields.iter_mut() {
                    *f = expr_slot!(*f);
                }
                TypeConsArgs::Fields(fields)
            }
        }),

        ExprKind::Member { recv, name, target } => ExprKind::Member {
            recv: expr_slot!(recv),
            name,
            target,
        },

        ExprKind::Subscript(mut s) => {
            s.recv = expr_slot!(s.recv);
            s.index = expr_slot!(s.index);
            ExprKind::Subscript(s)
        }

        ExprKind::Prefix { op, expr } => ExprKind::Prefix {
            op,
            expr: expr_slot!(expr),
        },
        ExprKind::Postfix { op, expr } => ExprKind::Postfix {
            op,
            expr: expr_slot!(expr),
        },
        ExprKind::Deref { expr } => ExprKind::Deref {
            expr: expr_slot!(expr),
        },

        ExprKind::Binop { op, left, right } => ExprKind::Binop {
            op,
            left: expr_slot!(left),
            right: expr_slot!(right),
        },
        ExprKind::Assign { op, left, right } => ExprKind::Assign {
            op,
            left: expr_slot!(left),
            right: expr_slot!(right),
        },

        ExprKind::If(mut f) => {
            f.cond = expr_slot!(f.cond);
            f.then_block = expr_slot!(f.then_block);
            f.else_block = opt_expr_slot!(f.else_block);
            ExprKind::If(f)
        }

        ExprKind::For(mut f) => {
            f.start = opt_expr_slot!(f.start);
            f.cond = expr_slot!(f.cond);
            f.body = expr_slot!(f.body);
            f.end = opt_expr_slot!(f.end);
            ExprKind::For(f)
        }

        ExprKind::Return { value } => ExprKind::Return {
            value: opt_expr_slot!(value),
        },

        ExprKind::ArrayLit { mut values, end_loc } => {
            for v in values.iter_mut() {
                *v = expr_slot!(*v);
            }
            ExprKind::ArrayLit { values, end_loc }
        }
    };

    if !changed {
        return id;
    }
    let new_id = ast.clone_expr(id);
    ast.exprs[new_id].kind = new_kind;
    new_id
}

fn transform_type_children<T: Transformer + ?Sized>(
    ast: &mut Ast,
    id: TypeId,
    tr: &mut T,
) -> TypeId {
    let kind = ast.types[id].kind.clone();
    let mut changed = false;

    macro_rules! type_slot {
        ($slot:expr) => {{
            let next = visit_type(ast, $slot, tr);
            changed |= next != $slot;
            next
        }};
    }
    macro_rules! expr_slot {
        ($slot:expr) => {{
            let next = visit_expr(ast, $slot, tr);
            changed |= next != $slot;
            next
        }};
    }

    let new_kind = match kind {
        TypeKind::Prim(_) | TypeKind::Ns | TypeKind::Placeholder { .. } => return id,
        TypeKind::Unresolved { .. } => return id,

        TypeKind::Array(mut a) => {
            a.elem = type_slot!(a.elem);
            if let Some(e) = a.len_expr {
                a.len_expr = Some(expr_slot!(e));
            }
            TypeKind::Array(a)
        }

        TypeKind::Fun(mut f) => {
            for p in f.params.iter_mut() {
                *p = expr_slot!(*p);
            }
            f.result = type_slot!(f.result);
            TypeKind::Fun(f)
        }

        TypeKind::Ptr { elem } => TypeKind::Ptr {
            elem: type_slot!(elem),
        },
        TypeKind::Ref { elem } => TypeKind::Ref {
            elem: type_slot!(elem),
        },
        TypeKind::MutRef { elem } => TypeKind::MutRef {
            elem: type_slot!(elem),
        },
        TypeKind::Slice { elem } => TypeKind::Slice {
            elem: type_slot!(elem),
        },
        TypeKind::MutSlice { elem } => TypeKind::MutSlice {
            elem: type_slot!(elem),
        },
        TypeKind::Optional { elem } => TypeKind::Optional {
            elem: type_slot!(elem),
        },

        TypeKind::Struct(mut st) => {
            for f in st.fields.iter_mut() {
                *f = expr_slot!(*f);
            }
            if let TplInfo::Args(args) = &mut st.tpl {
                for a in args.iter_mut() {
                    let next = tr.visit(ast, *a);
                    changed |= next != *a;
                    *a = next;
                }
            }
            TypeKind::Struct(st)
        }

        TypeKind::Alias(mut a) => {
            a.elem = type_slot!(a.elem);
            TypeKind::Alias(a)
        }

        TypeKind::Template(mut t) => {
            t.recv = type_slot!(t.recv);
            for a in t.args.iter_mut() {
                let next = tr.visit(ast, *a);
                changed |= next != *a;
                *a = next;
            }
            TypeKind::Template(t)
        }
    };

    if !changed {
        return id;
    }
    let new_id = ast.clone_type(id);
    ast.types[new_id].kind = new_kind;
    new_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::ast::{ArrayType, PrimType};
    use crate::language::span::Loc;
    use crate::target::BuildTarget;

    struct Identity;
    impl Transformer for Identity {
        fn visit(&mut self, ast: &mut Ast, n: Node) -> Node {
            transform_children(ast, n, self)
        }
    }

    struct SwapInt {
        from: TypeId,
        to: TypeId,
    }
    impl Transformer for SwapInt {
        fn visit(&mut self, ast: &mut Ast, n: Node) -> Node {
            if n == Node::Type(self.from) {
                return Node::Type(self.to);
            }
            transform_children(ast, n, self)
        }
    }

    #[test]
    fn identity_walk_returns_same_node() {
        let mut ast = Ast::new(&BuildTarget::host());
        let int = ast.prim(PrimType::Int);
        let arr = ast.add_type(
            TypeKind::Array(ArrayType {
                elem: int,
                len: 3,
                len_expr: None,
                end_loc: Loc::UNKNOWN,
            }),
            Loc::UNKNOWN,
        );
        let opt = ast.add_type(TypeKind::Optional { elem: arr }, Loc::UNKNOWN);
        let out = transform_children(&mut ast, Node::Type(opt), &mut Identity);
        assert_eq!(out, Node::Type(opt));
    }

    #[test]
    fn replacement_clones_ancestors_only() {
        let mut ast = Ast::new(&BuildTarget::host());
        let int = ast.prim(PrimType::Int);
        let bool_t = ast.prim(PrimType::Bool);
        let arr = ast.add_type(
            TypeKind::Array(ArrayType {
                elem: int,
                len: 2,
                len_expr: None,
                end_loc: Loc::UNKNOWN,
            }),
            Loc::UNKNOWN,
        );
        let opt = ast.add_type(TypeKind::Optional { elem: arr }, Loc::UNKNOWN);

        let mut tr = SwapInt {
            from: int,
            to: bool_t,
        };
        let out = transform_children(&mut ast, Node::Type(opt), &mut tr);
        let Node::Type(new_opt) = out else {
            panic!("expected a type")
        };
        assert_ne!(new_opt, opt, "parent chain must be cloned");
        let TypeKind::Optional { elem: new_arr } = ast.types[new_opt].kind else {
            panic!("expected an optional type")
        };
        assert_ne!(new_arr, arr);
        let TypeKind::Array(ref a) = ast.types[new_arr].kind else {
            panic!("expected array")
        };
        assert_eq!(a.elem, bool_t);
        // the original tree is untouched
        let TypeKind::Array(ref orig) = ast.types[arr].kind else {
            panic!()
        };
        assert_eq!(orig.elem, int);
    }
}
