//! Type compatibility oracle.
//!
//! Four predicates over pairs of types:
//! - `compatible(x, y)`: a value of type x can be read as type y or vice
//!   versa (binary operands). Symmetric; references deref on both sides.
//! - `assignable(x, y)`: a value of type y can be assigned to a slot of
//!   type x. References deref on the source side only.
//! - `equivalent(x, y)`: x and y are the same type sans aliases and
//!   `int`/`uint` spelling.
//! - `convertible(dst, src)`: an explicit cast from src to dst is allowed.

use super::checker::Checker;
use crate::language::ast::{PrimType, TypeId, TypeKind};

impl Checker<'_> {
    /// Unwraps aliases, e.g. `MyMyT` => `MyT` => `T`.
    pub(super) fn unwrap_alias(&self, mut t: TypeId) -> TypeId {
        while let TypeKind::Alias(a) = &self.ast.types[t].kind {
            t = a.elem;
        }
        t
    }

    /// Unwraps optionals, refs and pointers, e.g. `?&T` => `&T` => `T`.
    pub(super) fn unwrap_ptr(&self, mut t: TypeId) -> TypeId {
        loop {
            match &self.ast.types[t].kind {
                TypeKind::Optional { elem }
                | TypeKind::Ref { elem }
                | TypeKind::MutRef { elem }
                | TypeKind::Ptr { elem } => t = *elem,
                _ => return t,
            }
        }
    }

    /// Unwraps refs, pointers and aliases, e.g. `&MyT` => `MyT` => `T`.
    pub(super) fn unwrap_ptr_and_alias(&self, mut t: TypeId) -> TypeId {
        loop {
            match &self.ast.types[t].kind {
                TypeKind::Ref { elem }
                | TypeKind::MutRef { elem }
                | TypeKind::Ptr { elem } => t = *elem,
                TypeKind::Alias(a) => t = a.elem,
                _ => return t,
            }
        }
    }

    /// Resolves aliases and the target-dependent `int`/`uint` spellings to a
    /// concrete type.
    pub(super) fn concrete(&self, mut t: TypeId) -> TypeId {
        loop {
            match &self.ast.types[t].kind {
                TypeKind::Alias(a) => t = a.elem,
                TypeKind::Prim(PrimType::Int) => t = self.int_type,
                TypeKind::Prim(PrimType::Uint) => t = self.uint_type,
                _ => return t,
            }
        }
    }

    fn is_ref(&self, t: TypeId) -> bool {
        matches!(
            self.ast.types[t].kind,
            TypeKind::Ref { .. } | TypeKind::MutRef { .. }
        )
    }

    pub(super) fn is_ptr_like(&self, t: TypeId) -> bool {
        matches!(
            self.ast.types[t].kind,
            TypeKind::Ptr { .. } | TypeKind::Ref { .. } | TypeKind::MutRef { .. }
        )
    }

    /// Reference or slice type.
    pub(super) fn is_ref_like(&self, t: TypeId) -> bool {
        matches!(
            self.ast.types[t].kind,
            TypeKind::Ref { .. }
                | TypeKind::MutRef { .. }
                | TypeKind::Slice { .. }
                | TypeKind::MutSlice { .. }
        )
    }

    /// A type is an owner iff it has a custom drop, transitively owns,
    /// is a raw pointer, or aliases an owner. Optional wrapping is
    /// transparent. Aliases of primitives are never owners.
    pub(super) fn is_owner(&self, t: TypeId) -> bool {
        use crate::language::ast::NodeFlags;
        let t = match self.ast.types[t].kind {
            TypeKind::Optional { elem } => elem,
            _ => t,
        };
        if self.ast.types[t]
            .flags
            .intersects(NodeFlags::DROP | NodeFlags::SUBOWNERS)
        {
            return true;
        }
        match &self.ast.types[t].kind {
            TypeKind::Ptr { .. } => true,
            TypeKind::Alias(a) => self.is_owner(a.elem),
            _ => false,
        }
    }

    /// Alias/`int`/`uint` unwrapping for the compatibility walk; dereferences
    /// one level of reference when `may_deref` allows it.
    fn compat_unwrap(&self, mut t: TypeId, mut may_deref: bool) -> TypeId {
        loop {
            match &self.ast.types[t].kind {
                TypeKind::Alias(a) => t = a.elem,
                TypeKind::Prim(PrimType::Int) => t = self.int_type,
                TypeKind::Prim(PrimType::Uint) => t = self.uint_type,
                TypeKind::Ref { elem } | TypeKind::MutRef { elem } if may_deref => {
                    may_deref = false;
                    t = *elem;
                }
                _ => return t,
            }
        }
    }

    fn type_compat(&self, x: TypeId, y: TypeId, assignment: bool) -> bool {
        if x == y {
            return true;
        }

        let x = self.compat_unwrap(x, !assignment);
        let y = self.compat_unwrap(y, !assignment);
        if x == y {
            return true;
        }

        match &self.ast.types[x].kind {
            TypeKind::Prim(p) if p.is_integer() => {
                // "T = &T" of non-owning types is allowed
                let y = if assignment {
                    self.compat_unwrap(y, true)
                } else {
                    y
                };
                x == y
            }

            TypeKind::Struct(_) => {
                // owner structs are move-only; plain assignment is rejected
                let y = if assignment {
                    self.compat_unwrap(y, true)
                } else {
                    y
                };
                x == y && !self.is_owner(x)
            }

            TypeKind::Ptr { elem: xe } => {
                // *T <= *T ; also &T-shaped sources deref through the walk
                match &self.ast.types[y].kind {
                    TypeKind::Ptr { elem: ye }
                    | TypeKind::Ref { elem: ye }
                    | TypeKind::MutRef { elem: ye } => self.type_compat(*xe, *ye, assignment),
                    _ => false,
                }
            }

            TypeKind::Optional { elem: xe } => {
                // ?T <= T ; ?T <= ?T
                let y = match self.ast.types[y].kind {
                    TypeKind::Optional { elem } => elem,
                    _ => y,
                };
                self.type_compat(*xe, y, assignment)
            }

            TypeKind::Ref { elem: xe } | TypeKind::MutRef { elem: xe } => {
                // &T    <= &T      mut&T <= mut&T
                // &T    <= mut&T   never mut&T <= &T
                // &T    <= *T      mut&T <= *T
                let x_mut = matches!(self.ast.types[x].kind, TypeKind::MutRef { .. });
                match &self.ast.types[y].kind {
                    TypeKind::Ptr { elem: ye } => self.type_compat(*xe, *ye, assignment),
                    TypeKind::Ref { elem: ye } => {
                        !x_mut && self.type_compat(*xe, *ye, assignment)
                    }
                    TypeKind::MutRef { elem: ye } => self.type_compat(*xe, *ye, assignment),
                    _ => false,
                }
            }

            TypeKind::Slice { elem: xe } | TypeKind::MutSlice { elem: xe } => {
                // &[T]    <= &[T] | mut&[T] | &[T N] | mut&[T N]
                // mut&[T] <= mut&[T] | mut&[T N]
                let x_mut = matches!(self.ast.types[x].kind, TypeKind::MutSlice { .. });
                match &self.ast.types[y].kind {
                    TypeKind::Slice { elem: ye } => {
                        !x_mut && self.type_compat(*xe, *ye, assignment)
                    }
                    TypeKind::MutSlice { elem: ye } => self.type_compat(*xe, *ye, assignment),
                    TypeKind::Ref { elem: ye } | TypeKind::MutRef { elem: ye } => {
                        let y_mut = matches!(self.ast.types[y].kind, TypeKind::MutRef { .. });
                        match &self.ast.types[*ye].kind {
                            TypeKind::Array(arr) => {
                                (y_mut || !x_mut)
                                    && self.type_compat(*xe, arr.elem, assignment)
                            }
                            _ => false,
                        }
                    }
                    _ => false,
                }
            }

            TypeKind::Array(xa) => match &self.ast.types[y].kind {
                TypeKind::Array(ya) => {
                    xa.len == ya.len && self.type_compat(xa.elem, ya.elem, assignment)
                }
                _ => false,
            },

            _ => false,
        }
    }

    /// Value of type x and y can be read interchangeably (e.g. "x + y").
    pub(super) fn compatible(&self, x: TypeId, y: TypeId) -> bool {
        self.type_compat(x, y, false)
    }

    /// Value of type y can be assigned to a slot of type x.
    pub(super) fn assignable(&self, x: TypeId, y: TypeId) -> bool {
        self.type_compat(x, y, true)
    }

    /// Same type after unwrapping aliases and `int`/`uint` normalization.
    pub(super) fn equivalent(&self, x: TypeId, y: TypeId) -> bool {
        x == y || self.concrete(x) == self.concrete(y)
    }

    /// Explicit cast from src to dst is permitted.
    pub(super) fn convertible(&self, dst: TypeId, src: TypeId) -> bool {
        let mut dst = self.unwrap_alias(dst);
        let mut src = self.unwrap_alias(src);
        if self.is_ref(dst) {
            dst = match self.ast.types[dst].kind {
                TypeKind::Ref { elem } | TypeKind::MutRef { elem } => elem,
                _ => dst,
            };
        }
        if self.is_ref(src) {
            src = match self.ast.types[src].kind {
                TypeKind::Ref { elem } | TypeKind::MutRef { elem } => elem,
                _ => src,
            };
        }
        dst == src
            || (self.ast.types[dst].kind.is_prim() && self.ast.types[src].kind.is_prim())
    }
}
