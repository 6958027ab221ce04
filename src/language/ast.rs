use la_arena::{Arena, Idx};
use smallvec::SmallVec;

use crate::language::span::Loc;
use crate::language::symbols::{Symbol, sym};
use crate::target::BuildTarget;

pub type ExprId = Idx<Expr>;
pub type TypeId = Idx<Type>;
pub type UnitId = Idx<Unit>;
pub type TypedefId = Idx<Typedef>;
pub type TplParamId = Idx<TplParam>;

/// Any AST node the resolver can bind a name to: an expression (function,
/// local, namespace value) or a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Node {
    Expr(ExprId),
    Type(TypeId),
}

/// Namespace owner of a declaration: the translation unit, a receiver type,
/// or an enclosing function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NsParent {
    Unit(UnitId),
    Type(TypeId),
    Expr(ExprId),
}

// —————————————————————————————————————————————————————————————————————————
// node flags

/// Per-node flag set. The low two bits hold visibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags(u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    /// Visible within the same source file.
    Unit = 0,
    /// Visible within the same package.
    Pkg = 1,
    /// Visible to other packages.
    Pub = 2,
}

impl NodeFlags {
    const VIS_MASK: u16 = 0b11;

    pub const NONE: NodeFlags = NodeFlags(0);
    /// Node has been visited by the checker.
    pub const CHECKED: NodeFlags = NodeFlags(1 << 2);
    /// Expression is used as an rvalue.
    pub const RVALUE: NodeFlags = NodeFlags(1 << 3);
    /// Type is flow-narrowed from an optional.
    pub const NARROWED: NodeFlags = NodeFlags(1 << 4);
    /// Has or contains an unresolved identifier.
    pub const UNKNOWN: NodeFlags = NodeFlags(1 << 5);
    /// Function has named parameters.
    pub const NAMEDPARAMS: NodeFlags = NodeFlags(1 << 6);
    /// Type has a custom `drop` function.
    pub const DROP: NodeFlags = NodeFlags(1 << 7);
    /// Type transitively contains owning values.
    pub const SUBOWNERS: NodeFlags = NodeFlags(1 << 8);
    /// Block ends with `return` or otherwise exits unconditionally.
    pub const EXIT: NodeFlags = NodeFlags(1 << 9);
    /// Expression is a compile-time constant.
    pub const CONST: NodeFlags = NodeFlags(1 << 10);
    /// Namespace is a package API.
    pub const PKGNS: NodeFlags = NodeFlags(1 << 11);
    /// Type is a generic template definition.
    pub const TEMPLATE: NodeFlags = NodeFlags(1 << 12);
    /// Type is an instantiated template.
    pub const TEMPLATEI: NodeFlags = NodeFlags(1 << 13);
    /// Scratch marks used by the narrowing pass.
    pub const MARK1: NodeFlags = NodeFlags(1 << 14);
    pub const MARK2: NodeFlags = NodeFlags(1 << 15);

    /// Flags that transfer from children to parents.
    pub const BUBBLE: NodeFlags = NodeFlags::UNKNOWN;

    pub fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: NodeFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: NodeFlags) {
        self.0 &= !other.0;
    }

    pub fn toggle(&mut self, other: NodeFlags) {
        self.0 ^= other.0;
    }

    pub fn set(&mut self, other: NodeFlags, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    pub fn vis(self) -> Visibility {
        match self.0 & Self::VIS_MASK {
            0 => Visibility::Unit,
            1 => Visibility::Pkg,
            _ => Visibility::Pub,
        }
    }

    pub fn set_vis(&mut self, vis: Visibility) {
        self.0 = (self.0 & !Self::VIS_MASK) | vis as u16;
    }

    /// Raises visibility to at least `min`.
    pub fn upgrade_vis(&mut self, min: Visibility) {
        if self.vis() < min {
            self.set_vis(min);
        }
    }

    pub fn union(self, other: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 | other.0)
    }

    pub fn intersection(self, other: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 & other.0)
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = NodeFlags;
    fn bitor(self, rhs: NodeFlags) -> NodeFlags {
        self.union(rhs)
    }
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Unit => "unit",
            Visibility::Pkg => "pkg",
            Visibility::Pub => "pub",
        }
    }
}

// —————————————————————————————————————————————————————————————————————————
// operators

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    LAnd,
    LOr,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    ShlAssign,
    ShrAssign,
    Not,
    Ref,
    MutRef,
    Inc,
    Dec,
}

impl Op {
    pub fn token(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "^",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::LAnd => "&&",
            Op::LOr => "||",
            Op::Eq => "==",
            Op::NotEq => "!=",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::LtEq => "<=",
            Op::GtEq => ">=",
            Op::Assign => "=",
            Op::AddAssign => "+=",
            Op::SubAssign => "-=",
            Op::MulAssign => "*=",
            Op::DivAssign => "/=",
            Op::ModAssign => "%=",
            Op::AndAssign => "&=",
            Op::OrAssign => "|=",
            Op::XorAssign => "^=",
            Op::ShlAssign => "<<=",
            Op::ShrAssign => ">>=",
            Op::Not => "!",
            Op::Ref => "&",
            Op::MutRef => "mut&",
            Op::Inc => "++",
            Op::Dec => "--",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Op::Eq | Op::NotEq | Op::Lt | Op::Gt | Op::LtEq | Op::GtEq
        )
    }

    pub fn is_assign(self) -> bool {
        matches!(
            self,
            Op::Assign
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
        )
    }
}

// —————————————————————————————————————————————————————————————————————————
// types

/// Primitive type tags, in canonical order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimType {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    Int,
    U8,
    U16,
    U32,
    U64,
    Uint,
    F32,
    F64,
    /// Must-resolve sentinel; only appears before a node is checked.
    Unknown,
}

pub const PRIM_COUNT: usize = PrimType::Unknown as usize + 1;

impl PrimType {
    pub const ALL: [PrimType; PRIM_COUNT] = [
        PrimType::Void,
        PrimType::Bool,
        PrimType::I8,
        PrimType::I16,
        PrimType::I32,
        PrimType::I64,
        PrimType::Int,
        PrimType::U8,
        PrimType::U16,
        PrimType::U32,
        PrimType::U64,
        PrimType::Uint,
        PrimType::F32,
        PrimType::F64,
        PrimType::Unknown,
    ];

    pub fn name(self) -> Symbol {
        match self {
            PrimType::Void => sym::VOID,
            PrimType::Bool => sym::BOOL,
            PrimType::I8 => sym::I8,
            PrimType::I16 => sym::I16,
            PrimType::I32 => sym::I32,
            PrimType::I64 => sym::I64,
            PrimType::Int => sym::INT,
            PrimType::U8 => sym::U8,
            PrimType::U16 => sym::U16,
            PrimType::U32 => sym::U32,
            PrimType::U64 => sym::U64,
            PrimType::Uint => sym::UINT,
            PrimType::F32 => sym::F32,
            PrimType::F64 => sym::F64,
            PrimType::Unknown => sym::UNKNOWN,
        }
    }

    pub fn size(self, target: &BuildTarget) -> u64 {
        match self {
            PrimType::Void | PrimType::Unknown => 0,
            PrimType::Bool | PrimType::I8 | PrimType::U8 => 1,
            PrimType::I16 | PrimType::U16 => 2,
            PrimType::I32 | PrimType::U32 | PrimType::F32 => 4,
            PrimType::I64 | PrimType::U64 | PrimType::F64 => 8,
            PrimType::Int | PrimType::Uint => target.int_size(),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PrimType::I8
                | PrimType::I16
                | PrimType::I32
                | PrimType::I64
                | PrimType::Int
                | PrimType::U8
                | PrimType::U16
                | PrimType::U32
                | PrimType::U64
                | PrimType::Uint
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimType::U8 | PrimType::U16 | PrimType::U32 | PrimType::U64 | PrimType::Uint
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimType::F32 | PrimType::F64)
    }
}

/// A generic type parameter of a template, possibly with a default.
#[derive(Clone, Debug)]
pub struct TplParam {
    pub name: Symbol,
    pub loc: Loc,
    pub default: Option<Node>,
}

/// Template bookkeeping of a user type: a definition carries parameters,
/// an instance carries the argument list it was expanded with.
#[derive(Clone, Debug, Default)]
pub enum TplInfo {
    #[default]
    None,
    Params(Vec<TplParamId>),
    Args(Vec<Node>),
}

impl TplInfo {
    pub fn params(&self) -> &[TplParamId] {
        match self {
            TplInfo::Params(p) => p,
            _ => &[],
        }
    }

    pub fn args(&self) -> &[Node] {
        match self {
            TplInfo::Args(a) => a,
            _ => &[],
        }
    }
}

#[derive(Clone, Debug)]
pub struct ArrayType {
    pub elem: TypeId,
    pub len: u64,
    pub len_expr: Option<ExprId>,
    pub end_loc: Loc,
}

#[derive(Clone, Debug)]
pub struct FunType {
    /// Parameter locals; a leading `this` parameter marks a method type.
    pub params: Vec<ExprId>,
    pub result: TypeId,
}

#[derive(Clone, Debug)]
pub struct StructType {
    /// None if anonymous.
    pub name: Option<Symbol>,
    /// Field locals in declaration order.
    pub fields: Vec<ExprId>,
    pub tpl: TplInfo,
    pub ns_parent: Option<NsParent>,
}

#[derive(Clone, Debug)]
pub struct AliasType {
    pub name: Symbol,
    pub elem: TypeId,
    pub tpl: TplInfo,
    pub ns_parent: Option<NsParent>,
}

/// Use of a template with arguments, e.g. `Foo<int>`. Replaced by the
/// instantiated type during checking.
#[derive(Clone, Debug)]
pub struct TemplateType {
    pub recv: TypeId,
    pub args: SmallVec<[Node; 4]>,
}

#[derive(Clone, Debug)]
pub enum TypeKind {
    Prim(PrimType),
    Array(ArrayType),
    Fun(FunType),
    Ptr { elem: TypeId },
    Ref { elem: TypeId },
    MutRef { elem: TypeId },
    Slice { elem: TypeId },
    MutSlice { elem: TypeId },
    Optional { elem: TypeId },
    Struct(StructType),
    Alias(AliasType),
    /// Namespace value type.
    Ns,
    Template(TemplateType),
    /// Generic parameter use inside a template body.
    Placeholder { param: TplParamId },
    /// Named type not yet resolved.
    Unresolved {
        name: Symbol,
        resolved: Option<TypeId>,
    },
}

impl TypeKind {
    pub fn is_prim(&self) -> bool {
        matches!(self, TypeKind::Prim(_))
    }

    pub fn prim(&self) -> Option<PrimType> {
        match self {
            TypeKind::Prim(p) => Some(*p),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Type {
    pub kind: TypeKind,
    pub flags: NodeFlags,
    pub nuse: u32,
    pub loc: Loc,
    pub size: u64,
    pub align: u8,
    /// Cached structural type-id; the interning key.
    pub tid: Option<Symbol>,
}

// —————————————————————————————————————————————————————————————————————————
// expressions

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalKind {
    Field,
    Param,
    Var,
    Let,
}

impl LocalKind {
    pub fn describe(self) -> &'static str {
        match self {
            LocalKind::Field => "field",
            LocalKind::Param => "parameter",
            LocalKind::Var => "var",
            LocalKind::Let => "let",
        }
    }
}

/// A named slot: struct field, function parameter, `var` or `let` binding.
/// Also reused for named call arguments (`name: value`).
#[derive(Clone, Debug)]
pub struct Local {
    pub kind: LocalKind,
    pub name: Symbol,
    pub name_loc: Loc,
    pub init: Option<ExprId>,
    /// Param only: the special `this` parameter, and whether it is `mut`.
    pub is_this: bool,
    pub is_mut: bool,
    /// Field only: memory offset in bytes, set during struct layout.
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct Fun {
    /// None if anonymous.
    pub name: Option<Symbol>,
    pub name_loc: Loc,
    /// None for prototypes.
    pub body: Option<ExprId>,
    /// Receiver type for type functions.
    pub recv: Option<TypeId>,
    pub params_loc: Loc,
    pub result_loc: Loc,
    pub ns_parent: Option<NsParent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stmt {
    Typedef(TypedefId),
    Expr(ExprId),
}

#[derive(Clone, Debug)]
pub struct Typedef {
    /// The defined struct or alias type.
    pub ty: TypeId,
    pub flags: NodeFlags,
    pub loc: Loc,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub children: Vec<Stmt>,
    pub end_loc: Loc,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub recv: ExprId,
    pub args: SmallVec<[ExprId; 4]>,
    pub args_end_loc: Loc,
}

/// Arguments of a type construction after `Call` lowering.
#[derive(Clone, Debug)]
pub enum TypeConsArgs {
    None,
    /// Primitive cast argument.
    Value(ExprId),
    /// Struct field values.
    Fields(SmallVec<[ExprId; 4]>),
}

#[derive(Clone, Debug)]
pub struct If {
    pub cond: ExprId,
    pub then_block: ExprId,
    pub else_block: Option<ExprId>,
}

#[derive(Clone, Debug)]
pub struct For {
    pub start: Option<ExprId>,
    pub cond: ExprId,
    pub body: ExprId,
    pub end: Option<ExprId>,
}

#[derive(Clone, Debug)]
pub struct Subscript {
    pub recv: ExprId,
    pub index: ExprId,
    /// Valid when the index is compile-time constant.
    pub index_val: u64,
    pub end_loc: Loc,
}

#[derive(Clone, Debug)]
pub struct NsMember {
    pub name: Symbol,
    pub node: Node,
}

#[derive(Clone, Debug)]
pub struct NsExpr {
    /// Package path symbol for package namespaces, otherwise the local name.
    pub name: Symbol,
    pub members: Vec<NsMember>,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Id {
        name: Symbol,
        /// Resolved declaration, set by the checker.
        target: Option<Node>,
    },
    Ns(NsExpr),
    Local(Local),
    Fun(Fun),
    Block(Block),
    Call(Call),
    TypeCons(TypeConsArgs),
    Member {
        recv: ExprId,
        name: Symbol,
        target: Option<ExprId>,
    },
    Subscript(Subscript),
    Prefix {
        op: Op,
        expr: ExprId,
    },
    Postfix {
        op: Op,
        expr: ExprId,
    },
    /// Implicit read through a reference, inserted by the checker.
    Deref {
        expr: ExprId,
    },
    Binop {
        op: Op,
        left: ExprId,
        right: ExprId,
    },
    Assign {
        op: Op,
        left: ExprId,
        right: ExprId,
    },
    If(If),
    For(For),
    Return {
        value: Option<ExprId>,
    },
    BoolLit {
        value: bool,
    },
    IntLit {
        value: u64,
    },
    FloatLit {
        value: f64,
    },
    StrLit {
        value: String,
    },
    ArrayLit {
        values: Vec<ExprId>,
        end_loc: Loc,
    },
}

impl ExprKind {
    pub fn is_local(&self) -> bool {
        matches!(self, ExprKind::Local(_))
    }

    pub fn as_local(&self) -> Option<&Local> {
        match self {
            ExprKind::Local(l) => Some(l),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub flags: NodeFlags,
    pub nuse: u32,
    pub loc: Loc,
    /// Type of the expression; the `unknown` primitive until checked.
    pub ty: TypeId,
}

// —————————————————————————————————————————————————————————————————————————
// units and imports

#[derive(Clone, Debug)]
pub struct ImportItem {
    /// Local name; `_` denotes a `*` import.
    pub name: Symbol,
    /// Original name for `orig as name` imports.
    pub orig_name: Option<Symbol>,
    pub loc: Loc,
    pub orig_name_loc: Loc,
}

#[derive(Clone, Debug)]
pub struct Import {
    pub path: Symbol,
    pub path_loc: Loc,
    pub loc: Loc,
    /// Local alias binding the whole package namespace; `_` if absent.
    pub name: Symbol,
    pub items: Vec<ImportItem>,
    /// The imported package's API namespace value, set by the loader.
    pub ns: Option<ExprId>,
}

/// One source file's parse result.
#[derive(Clone, Debug, Default)]
pub struct Unit {
    pub children: Vec<Stmt>,
    pub imports: Vec<Import>,
    pub srcfile: u32,
    pub flags: NodeFlags,
    pub loc: Loc,
}

// —————————————————————————————————————————————————————————————————————————
// the arena

/// All AST storage for a compilation. Nodes are appended during parsing and
/// checking, mutated in place, and never freed until the whole `Ast` drops
/// after the backend has consumed it.
pub struct Ast {
    pub exprs: Arena<Expr>,
    pub types: Arena<Type>,
    pub units: Arena<Unit>,
    pub typedefs: Arena<Typedef>,
    pub tplparams: Arena<TplParam>,
    prims: [TypeId; PRIM_COUNT],
    /// Singleton namespace value type.
    pub ns_type: TypeId,
    /// Builtin `&[u8]` slice type.
    pub u8_slice: TypeId,
    /// Builtin `str` alias (`type str = &[u8]`).
    pub str_type: TypeId,
}

impl Ast {
    pub fn new(target: &BuildTarget) -> Ast {
        let mut types = Arena::new();
        let prims = PrimType::ALL.map(|p| {
            let size = p.size(target);
            types.alloc(Type {
                kind: TypeKind::Prim(p),
                flags: NodeFlags::CHECKED,
                nuse: 0,
                loc: Loc::UNKNOWN,
                size,
                align: size.min(8) as u8,
                tid: None,
            })
        });
        let ns_type = types.alloc(Type {
            kind: TypeKind::Ns,
            flags: NodeFlags::CHECKED,
            nuse: 0,
            loc: Loc::UNKNOWN,
            size: 0,
            align: 0,
            tid: None,
        });
        let u8_elem = prims[PrimType::U8 as usize];
        let u8_slice = types.alloc(Type {
            kind: TypeKind::Slice { elem: u8_elem },
            flags: NodeFlags::CHECKED,
            nuse: 0,
            loc: Loc::UNKNOWN,
            size: target.ptr_size() * 2,
            align: target.ptr_size() as u8,
            tid: None,
        });
        let str_type = types.alloc(Type {
            kind: TypeKind::Alias(AliasType {
                name: sym::STR,
                elem: u8_slice,
                tpl: TplInfo::None,
                ns_parent: None,
            }),
            flags: NodeFlags::CHECKED,
            nuse: 0,
            loc: Loc::UNKNOWN,
            size: target.ptr_size() * 2,
            align: target.ptr_size() as u8,
            tid: None,
        });
        Ast {
            exprs: Arena::new(),
            types,
            units: Arena::new(),
            typedefs: Arena::new(),
            tplparams: Arena::new(),
            prims,
            ns_type,
            u8_slice,
            str_type,
        }
    }

    pub fn prim(&self, p: PrimType) -> TypeId {
        self.prims[p as usize]
    }

    pub fn unknown(&self) -> TypeId {
        self.prim(PrimType::Unknown)
    }

    pub fn void(&self) -> TypeId {
        self.prim(PrimType::Void)
    }

    pub fn bool_type(&self) -> TypeId {
        self.prim(PrimType::Bool)
    }

    pub fn add_expr(&mut self, kind: ExprKind, loc: Loc) -> ExprId {
        let ty = self.unknown();
        self.exprs.alloc(Expr {
            kind,
            flags: NodeFlags::NONE,
            nuse: 0,
            loc,
            ty,
        })
    }

    pub fn add_type(&mut self, kind: TypeKind, loc: Loc) -> TypeId {
        self.types.alloc(Type {
            kind,
            flags: NodeFlags::NONE,
            nuse: 0,
            loc,
            size: 0,
            align: 0,
            tid: None,
        })
    }

    /// Shallow node clone: the copy shares all children with the original.
    pub fn clone_expr(&mut self, id: ExprId) -> ExprId {
        let copy = self.exprs[id].clone();
        self.exprs.alloc(copy)
    }

    pub fn clone_type(&mut self, id: TypeId) -> TypeId {
        let copy = self.types[id].clone();
        self.types.alloc(copy)
    }

    // ——— generic node accessors ———

    pub fn flags(&self, n: Node) -> NodeFlags {
        match n {
            Node::Expr(id) => self.exprs[id].flags,
            Node::Type(id) => self.types[id].flags,
        }
    }

    pub fn flags_mut(&mut self, n: Node) -> &mut NodeFlags {
        match n {
            Node::Expr(id) => &mut self.exprs[id].flags,
            Node::Type(id) => &mut self.types[id].flags,
        }
    }

    pub fn loc(&self, n: Node) -> Loc {
        match n {
            Node::Expr(id) => self.exprs[id].loc,
            Node::Type(id) => self.types[id].loc,
        }
    }

    pub fn nuse(&self, n: Node) -> u32 {
        match n {
            Node::Expr(id) => self.exprs[id].nuse,
            Node::Type(id) => self.types[id].nuse,
        }
    }

    /// Bumps the use count, following identifier references.
    pub fn incuse(&mut self, n: Node) {
        let mut n = n;
        loop {
            match n {
                Node::Expr(id) => {
                    self.exprs[id].nuse += 1;
                    if let ExprKind::Id {
                        target: Some(t), ..
                    } = self.exprs[id].kind
                    {
                        n = t;
                        continue;
                    }
                }
                Node::Type(id) => self.types[id].nuse += 1,
            }
            return;
        }
    }

    /// Transfers the wrapped node's use count onto a wrapper created by the
    /// checker (deref, implicit return, reference type).
    pub fn transfer_nuse(&mut self, wrapper: Node, wrappee: Node) {
        let uses = self.nuse(wrappee);
        match wrapper {
            Node::Expr(id) => self.exprs[id].nuse = uses,
            Node::Type(id) => self.types[id].nuse = uses,
        }
        let w = match wrappee {
            Node::Expr(id) => &mut self.exprs[id].nuse,
            Node::Type(id) => &mut self.types[id].nuse,
        };
        *w -= (*w != 0) as u32;
    }

    /// Copies bubbling flags from a child to its parent.
    pub fn bubble_flags(&mut self, parent: Node, child: Node) {
        let up = self.flags(child).intersection(NodeFlags::BUBBLE);
        self.flags_mut(parent).insert(up);
    }

    /// Resolves an `Id` chain to its referenced declaration.
    pub fn unwrap_id(&self, n: Node) -> Node {
        let mut n = n;
        while let Node::Expr(id) = n {
            match self.exprs[id].kind {
                ExprKind::Id {
                    target: Some(t), ..
                } => n = t,
                _ => break,
            }
        }
        n
    }

    // ——— child enumeration (read-only) ———

    /// Collects the semantic children of an expression: sub-expressions and,
    /// for locals, the declared type. The computed type of other expression
    /// kinds is not a child.
    pub fn expr_children(&self, id: ExprId) -> SmallVec<[Node; 4]> {
        let mut out = SmallVec::new();
        match &self.exprs[id].kind {
            ExprKind::Id { .. }
            | ExprKind::BoolLit { .. }
            | ExprKind::IntLit { .. }
            | ExprKind::FloatLit { .. }
            | ExprKind::StrLit { .. }
            | ExprKind::Ns(_) => {}
            ExprKind::Local(l) => {
                out.push(Node::Type(self.exprs[id].ty));
                if let Some(init) = l.init {
                    out.push(Node::Expr(init));
                }
            }
            ExprKind::Fun(f) => {
                out.push(Node::Type(self.exprs[id].ty));
                if let Some(body) = f.body {
                    out.push(Node::Expr(body));
                }
            }
            ExprKind::Block(b) => {
                for &child in &b.children {
                    match child {
                        Stmt::Expr(e) => out.push(Node::Expr(e)),
                        Stmt::Typedef(td) => out.push(Node::Type(self.typedefs[td].ty)),
                    }
                }
            }
            ExprKind::Call(c) => {
                out.push(Node::Expr(c.recv));
                out.extend(c.args.iter().map(|&a| Node::Expr(a)));
            }
            ExprKind::TypeCons(args) => match args {
                TypeConsArgs::None => {}
                TypeConsArgs::Value(e) => out.push(Node::Expr(*e)),
                TypeConsArgs::Fields(fields) => {
                    out.extend(fields.iter().map(|&a| Node::Expr(a)))
                }
            },
            ExprKind::Member { recv, .. } => out.push(Node::Expr(*recv)),
            ExprKind::Subscript(s) => {
                out.push(Node::Expr(s.recv));
                out.push(Node::Expr(s.index));
            }
            ExprKind::Prefix { expr, .. }
            | ExprKind::Postfix { expr, .. }
            | ExprKind::Deref { expr } => out.push(Node::Expr(*expr)),
            ExprKind::Binop { left, right, .. } | ExprKind::Assign { left, right, .. } => {
                out.push(Node::Expr(*left));
                out.push(Node::Expr(*right));
            }
            ExprKind::If(f) => {
                out.push(Node::Expr(f.cond));
                out.push(Node::Expr(f.then_block));
                if let Some(e) = f.else_block {
                    out.push(Node::Expr(e));
                }
            }
            ExprKind::For(f) => {
                if let Some(e) = f.start {
                    out.push(Node::Expr(e));
                }
                out.push(Node::Expr(f.cond));
                out.push(Node::Expr(f.body));
                if let Some(e) = f.end {
                    out.push(Node::Expr(e));
                }
            }
            ExprKind::Return { value } => {
                if let Some(v) = value {
                    out.push(Node::Expr(*v));
                }
            }
            ExprKind::ArrayLit { values, .. } => {
                out.extend(values.iter().map(|&v| Node::Expr(v)));
            }
        }
        out
    }

    // ——— side-effect analysis ———

    /// True if constructing a value of type `t` has no side effects.
    pub fn type_cons_no_side_effects(&self, t: TypeId) -> bool {
        match &self.types[t].kind {
            TypeKind::Prim(_) => true,
            TypeKind::Ptr { elem }
            | TypeKind::Ref { elem }
            | TypeKind::MutRef { elem }
            | TypeKind::Slice { elem }
            | TypeKind::MutSlice { elem }
            | TypeKind::Optional { elem } => self.type_cons_no_side_effects(*elem),
            TypeKind::Array(a) => self.type_cons_no_side_effects(a.elem),
            TypeKind::Alias(a) => self.type_cons_no_side_effects(a.elem),
            _ => false,
        }
    }

    /// True if materializing `id` has no effect on any other code.
    pub fn expr_no_side_effects(&self, id: ExprId) -> bool {
        let e = &self.exprs[id];
        match &e.kind {
            ExprKind::Id { .. }
            | ExprKind::BoolLit { .. }
            | ExprKind::IntLit { .. }
            | ExprKind::FloatLit { .. }
            | ExprKind::StrLit { .. } => true,
            ExprKind::Member { recv, .. } => self.expr_no_side_effects(*recv),
            ExprKind::Local(l) => {
                self.type_cons_no_side_effects(e.ty)
                    && l.init.is_none_or(|init| self.expr_no_side_effects(init))
            }
            ExprKind::ArrayLit { values, .. } => {
                self.type_cons_no_side_effects(e.ty)
                    && values.iter().all(|&v| self.expr_no_side_effects(v))
            }
            ExprKind::Block(b) => b.children.iter().all(|&c| match c {
                Stmt::Expr(e) => self.expr_no_side_effects(e),
                Stmt::Typedef(_) => true,
            }),
            ExprKind::Binop { left, right, .. } => {
                self.expr_no_side_effects(*right) && self.expr_no_side_effects(*left)
            }
            ExprKind::Prefix { op, expr } | ExprKind::Postfix { op, expr } => {
                !matches!(op, Op::Inc | Op::Dec) && self.expr_no_side_effects(*expr)
            }
            ExprKind::Deref { expr } => self.expr_no_side_effects(*expr),
            ExprKind::If(f) => {
                self.expr_no_side_effects(f.cond)
                    && self.expr_no_side_effects(f.then_block)
                    && f.else_block.is_none_or(|e| self.expr_no_side_effects(e))
            }
            // removing a return changes control flow
            ExprKind::Return { .. } => false,
            ExprKind::Fun(f) => match f.body {
                Some(body) => self.expr_no_side_effects(body),
                None => false,
            },
            _ => false,
        }
    }

    // ——— formatting for diagnostics ———

    /// Short description of what kind of thing an expression is, resolving
    /// identifiers to their referents.
    pub fn describe_expr(&self, id: ExprId) -> &'static str {
        let mut id = id;
        while let ExprKind::Id {
            target: Some(Node::Expr(t)),
            ..
        } = self.exprs[id].kind
        {
            id = t;
        }
        match &self.exprs[id].kind {
            ExprKind::Id {
                target: Some(Node::Type(_)),
                ..
            } => "type",
            ExprKind::Id { .. } => "identifier",
            ExprKind::Ns(_) => "namespace",
            ExprKind::Local(l) => l.kind.describe(),
            ExprKind::Fun(_) => "function",
            ExprKind::Block(_) => "block",
            ExprKind::Call(_) => "function call",
            ExprKind::TypeCons(_) => "type construction",
            ExprKind::Member { .. } => "member access",
            ExprKind::Subscript(_) => "subscript",
            ExprKind::Binop { op, .. } if op.is_comparison() => "comparison",
            ExprKind::Binop { .. } => "operation",
            ExprKind::Assign { .. } => "assignment",
            ExprKind::Prefix { .. } | ExprKind::Postfix { .. } | ExprKind::Deref { .. } => {
                "operation"
            }
            ExprKind::If(_) => "if expression",
            ExprKind::For(_) => "for loop",
            ExprKind::Return { .. } => "return",
            ExprKind::BoolLit { .. }
            | ExprKind::IntLit { .. }
            | ExprKind::FloatLit { .. }
            | ExprKind::StrLit { .. }
            | ExprKind::ArrayLit { .. } => "literal",
        }
    }

    /// Source-like rendition of a type, for diagnostics.
    pub fn fmt_type(&self, id: TypeId) -> String {
        match &self.types[id].kind {
            TypeKind::Prim(p) => p.name().as_str().to_string(),
            TypeKind::Array(a) => {
                if a.len > 0 {
                    format!("[{} {}]", self.fmt_type(a.elem), a.len)
                } else {
                    format!("[{}]", self.fmt_type(a.elem))
                }
            }
            TypeKind::Fun(f) => {
                let params: Vec<String> = f
                    .params
                    .iter()
                    .map(|&p| match &self.exprs[p].kind {
                        ExprKind::Local(l) => {
                            format!("{} {}", l.name, self.fmt_type(self.exprs[p].ty))
                        }
                        _ => self.fmt_expr(p),
                    })
                    .collect();
                format!("fun({}) {}", params.join(", "), self.fmt_type(f.result))
            }
            TypeKind::Ptr { elem } => format!("*{}", self.fmt_type(*elem)),
            TypeKind::Ref { elem } => format!("&{}", self.fmt_type(*elem)),
            TypeKind::MutRef { elem } => format!("mut&{}", self.fmt_type(*elem)),
            TypeKind::Slice { elem } => format!("&[{}]", self.fmt_type(*elem)),
            TypeKind::MutSlice { elem } => format!("mut&[{}]", self.fmt_type(*elem)),
            TypeKind::Optional { elem } => format!("?{}", self.fmt_type(*elem)),
            TypeKind::Struct(st) => {
                let base = match st.name {
                    Some(name) => name.as_str().to_string(),
                    None => "struct".to_string(),
                };
                match &st.tpl {
                    TplInfo::Args(args) => {
                        let args: Vec<String> = args.iter().map(|&a| self.fmt_node(a)).collect();
                        format!("{}<{}>", base, args.join(","))
                    }
                    _ => base,
                }
            }
            TypeKind::Alias(a) => a.name.as_str().to_string(),
            TypeKind::Ns => "namespace".to_string(),
            TypeKind::Template(t) => {
                let args: Vec<String> = t.args.iter().map(|&a| self.fmt_node(a)).collect();
                format!("{}<{}>", self.fmt_type(t.recv), args.join(","))
            }
            TypeKind::Placeholder { param } => self.tplparams[*param].name.as_str().to_string(),
            TypeKind::Unresolved { name, .. } => name.as_str().to_string(),
        }
    }

    /// Source-like rendition of an expression, for diagnostics. Kept short:
    /// nested structure prints as its head form.
    pub fn fmt_expr(&self, id: ExprId) -> String {
        match &self.exprs[id].kind {
            ExprKind::Id { name, .. } => name.as_str().to_string(),
            ExprKind::Ns(ns) => ns.name.as_str().to_string(),
            ExprKind::Local(l) => l.name.as_str().to_string(),
            ExprKind::Fun(f) => match f.name {
                Some(name) => name.as_str().to_string(),
                None => "fun".to_string(),
            },
            ExprKind::Block(_) => "block".to_string(),
            ExprKind::Call(c) => format!("{}(...)", self.fmt_expr(c.recv)),
            ExprKind::TypeCons(_) => format!("{}(...)", self.fmt_type(self.exprs[id].ty)),
            ExprKind::Member { recv, name, .. } => {
                format!("{}.{}", self.fmt_expr(*recv), name)
            }
            ExprKind::Subscript(s) => {
                format!("{}[{}]", self.fmt_expr(s.recv), self.fmt_expr(s.index))
            }
            ExprKind::Prefix { op, expr } => format!("{}{}", op.token(), self.fmt_expr(*expr)),
            ExprKind::Postfix { op, expr } => format!("{}{}", self.fmt_expr(*expr), op.token()),
            ExprKind::Deref { expr } => format!("*{}", self.fmt_expr(*expr)),
            ExprKind::Binop { op, left, right } | ExprKind::Assign { op, left, right } => {
                format!(
                    "{} {} {}",
                    self.fmt_expr(*left),
                    op.token(),
                    self.fmt_expr(*right)
                )
            }
            ExprKind::If(_) => "if".to_string(),
            ExprKind::For(_) => "for".to_string(),
            ExprKind::Return { .. } => "return".to_string(),
            ExprKind::BoolLit { value } => value.to_string(),
            ExprKind::IntLit { value } => value.to_string(),
            ExprKind::FloatLit { value } => value.to_string(),
            ExprKind::StrLit { value } => format!("{:?}", value),
            ExprKind::ArrayLit { .. } => "[...]".to_string(),
        }
    }

    pub fn fmt_node(&self, n: Node) -> String {
        match n {
            Node::Expr(id) => self.fmt_expr(id),
            Node::Type(id) => self.fmt_type(id),
        }
    }
}
