//! Symbolic values and the arithmetic the engine performs on them.
//!
//! An [`SVal`] is the engine's abstraction of the run-time value of one
//! sub-expression on one explored path. Besides its shape every value carries
//! a [`Provenance`] tag recording whether it was produced by a `sizeof` or
//! `offsetof` expression; copies keep the tag, arithmetic drops it.

use std::fmt;
use std::rc::Rc;

use crate::ast::{BinaryOp, ExprId, UnaryOp, VarId};
use crate::types::{CType, IntKind, TypeContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

/// One activation of a function body; inlined calls get their own frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymExpr {
    Symbol(SymbolId),
    Int(i128),
    /// Initial contents of a region the analysis knows nothing about.
    RegionValue { region: MemRegion, offset: i128 },
    /// Contents of a region after it was invalidated with `parent`.
    Derived { parent: SymbolId, offset: i128 },
    Binary {
        op: BinaryOp,
        lhs: Rc<SymExpr>,
        rhs: Rc<SymExpr>,
    },
    Unary { op: UnaryOp, operand: Rc<SymExpr> },
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymExpr::Symbol(id) => write!(f, "$sym{}", id.0),
            SymExpr::Int(n) => write!(f, "{n}"),
            SymExpr::RegionValue { region, offset } => write!(f, "reg<{region}+{offset}>"),
            SymExpr::Derived { parent, offset } => write!(f, "derived<$sym{}+{offset}>", parent.0),
            SymExpr::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.as_str()),
            SymExpr::Unary { op, operand } => write!(f, "{op:?}({operand})"),
        }
    }
}

/// Memory a location can point into.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemRegion {
    /// A local or parameter of one frame.
    Var { var: VarId, frame: FrameId },
    Global(VarId),
    /// The object a symbolic pointer points to.
    Symbolic(Rc<SymExpr>),
    String(ExprId),
}

impl fmt::Display for MemRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemRegion::Var { var, frame } => write!(f, "var{}@{}", var.0, frame.0),
            MemRegion::Global(var) => write!(f, "global{}", var.0),
            MemRegion::Symbolic(sym) => write!(f, "*{sym}"),
            MemRegion::String(expr) => write!(f, "string{}", expr.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocOffset {
    Concrete(i128),
    Symbolic(Rc<SymExpr>),
}

impl LocOffset {
    fn as_sym(&self) -> Rc<SymExpr> {
        match self {
            LocOffset::Concrete(n) => Rc::new(SymExpr::Int(*n)),
            LocOffset::Symbolic(sym) => sym.clone(),
        }
    }
}

/// Where a value came from, as far as the bad-scaling check is concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Provenance {
    #[default]
    None,
    SizeOf,
    OffsetOf,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SValKind {
    Unknown,
    Undefined,
    Int(i128),
    Sym(Rc<SymExpr>),
    Loc { region: MemRegion, offset: LocOffset },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SVal {
    kind: SValKind,
    provenance: Provenance,
}

impl SVal {
    pub fn new(kind: SValKind) -> Self {
        Self {
            kind,
            provenance: Provenance::None,
        }
    }

    pub fn unknown() -> Self {
        Self::new(SValKind::Unknown)
    }

    pub fn undefined() -> Self {
        Self::new(SValKind::Undefined)
    }

    pub fn int(value: i128) -> Self {
        Self::new(SValKind::Int(value))
    }

    pub fn sym(expr: SymExpr) -> Self {
        match expr {
            SymExpr::Int(n) => Self::int(n),
            other => Self::new(SValKind::Sym(Rc::new(other))),
        }
    }

    pub fn loc(region: MemRegion, offset: i128) -> Self {
        Self::new(SValKind::Loc {
            region,
            offset: LocOffset::Concrete(offset),
        })
    }

    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn kind(&self) -> &SValKind {
        &self.kind
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Whether the value was computed by `sizeof`/`offsetof`, directly or
    /// through copies.
    pub fn is_from_size_or_offset(&self) -> bool {
        self.provenance != Provenance::None
    }

    pub fn as_int(&self) -> Option<i128> {
        match self.kind {
            SValKind::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_unknown_or_undef(&self) -> bool {
        matches!(self.kind, SValKind::Unknown | SValKind::Undefined)
    }

    /// Symbolic form of an integer-like value, if it has one.
    pub fn as_sym_expr(&self) -> Option<Rc<SymExpr>> {
        match &self.kind {
            SValKind::Int(n) => Some(Rc::new(SymExpr::Int(*n))),
            SValKind::Sym(sym) => Some(sym.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for SVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SValKind::Unknown => write!(f, "unknown")?,
            SValKind::Undefined => write!(f, "undef")?,
            SValKind::Int(n) => write!(f, "{n}")?,
            SValKind::Sym(sym) => write!(f, "{sym}")?,
            SValKind::Loc { region, offset } => match offset {
                LocOffset::Concrete(n) => write!(f, "&{region}+{n}")?,
                LocOffset::Symbolic(sym) => write!(f, "&{region}+{sym}")?,
            },
        }
        match self.provenance {
            Provenance::None => Ok(()),
            Provenance::SizeOf => write!(f, " [sizeof]"),
            Provenance::OffsetOf => write!(f, " [offsetof]"),
        }
    }
}

/// Hands out fresh symbols for parameters, call results and invalidations.
#[derive(Debug, Default)]
pub struct SymbolManager {
    next: u32,
}

impl SymbolManager {
    pub fn conjure(&mut self) -> SymbolId {
        let id = SymbolId(self.next);
        self.next += 1;
        id
    }

    /// A fresh value of type `ty`: a symbolic location for pointers, a symbol
    /// for integers, unknown for everything else.
    pub fn conjure_value(&mut self, ty: &CType) -> SVal {
        if ty.is_pointer() {
            let sym = SymExpr::Symbol(self.conjure());
            SVal::loc(MemRegion::Symbolic(Rc::new(sym)), 0)
        } else if ty.is_integer() {
            SVal::sym(SymExpr::Symbol(self.conjure()))
        } else {
            SVal::unknown()
        }
    }
}

/// Builds result values for operators and conversions.
pub struct SValBuilder<'a> {
    types: &'a TypeContext,
    propagate_through_arithmetic: bool,
}

impl<'a> SValBuilder<'a> {
    pub fn new(types: &'a TypeContext, propagate_through_arithmetic: bool) -> Self {
        Self {
            types,
            propagate_through_arithmetic,
        }
    }

    /// Conversion between scalar types. Conversions are value-preserving
    /// copies, so the provenance tag survives.
    pub fn cast(&self, value: SVal, to: &CType) -> SVal {
        let provenance = value.provenance;
        let converted = match (&value.kind, to) {
            (_, CType::Void) | (_, CType::Float(_)) => return SVal::unknown(),
            (SValKind::Int(n), CType::Int(IntKind::Bool)) => SVal::int(i128::from(*n != 0)),
            (SValKind::Int(n), CType::Int(kind)) => SVal::int(truncate(*n, self.types.target.int_size(*kind), kind.is_signed())),
            (SValKind::Sym(sym), CType::Pointer(_)) => SVal::new(SValKind::Loc {
                region: MemRegion::Symbolic(sym.clone()),
                offset: LocOffset::Concrete(0),
            }),
            (SValKind::Loc { region, offset }, CType::Int(_) | CType::Enum) => {
                match (region, offset) {
                    // Round-tripping a symbolic pointer through an integer keeps its symbol.
                    (MemRegion::Symbolic(sym), LocOffset::Concrete(0)) => {
                        SVal::new(SValKind::Sym(sym.clone()))
                    }
                    _ => value.clone(),
                }
            }
            _ => value.clone(),
        };
        converted.with_provenance(provenance)
    }

    fn arithmetic_provenance(&self, lhs: &SVal, rhs: &SVal) -> Provenance {
        if !self.propagate_through_arithmetic {
            return Provenance::None;
        }
        if lhs.is_from_size_or_offset() {
            lhs.provenance
        } else {
            rhs.provenance
        }
    }

    /// Size used to scale an integer added to a pointer of type `ptr_ty`.
    fn element_size(&self, ptr_ty: &CType) -> Option<i128> {
        let pointee = ptr_ty.pointee()?;
        if pointee.is_void() {
            // GNU extension: arithmetic on `void *` steps by one char.
            return Some(1);
        }
        self.types.size_in_chars(pointee).ok().map(i128::from)
    }

    /// Evaluate `lhs op rhs` given the operand types and the result type.
    pub fn eval_binop(
        &self,
        op: BinaryOp,
        (lhs, lhs_ty): (&SVal, &CType),
        (rhs, rhs_ty): (&SVal, &CType),
        result_ty: &CType,
    ) -> SVal {
        if matches!(lhs.kind, SValKind::Undefined) || matches!(rhs.kind, SValKind::Undefined) {
            return SVal::undefined();
        }
        let provenance = self.arithmetic_provenance(lhs, rhs);

        if op.is_additive() && lhs_ty.is_pointer() && rhs_ty.is_integer() {
            return self.pointer_offset(op, lhs, lhs_ty, rhs).with_provenance(provenance);
        }
        if op == BinaryOp::Add && lhs_ty.is_integer() && rhs_ty.is_pointer() {
            return self.pointer_offset(op, rhs, rhs_ty, lhs).with_provenance(provenance);
        }
        if op == BinaryOp::Sub && lhs_ty.is_pointer() && rhs_ty.is_pointer() {
            return self.pointer_difference(lhs, lhs_ty, rhs).with_provenance(provenance);
        }
        if op.is_comparison() && (lhs_ty.is_pointer() || rhs_ty.is_pointer()) {
            return self.compare_locations(op, lhs, rhs);
        }

        let value = match (&lhs.kind, &rhs.kind) {
            (SValKind::Int(l), SValKind::Int(r)) => match fold_int(op, *l, *r) {
                Some(n) => match result_ty {
                    CType::Int(kind) => SVal::int(truncate(
                        n,
                        self.types.target.int_size(*kind),
                        kind.is_signed(),
                    )),
                    _ => SVal::int(n),
                },
                None => SVal::unknown(),
            },
            (SValKind::Unknown, _) | (_, SValKind::Unknown) => SVal::unknown(),
            _ => match (lhs.as_sym_expr(), rhs.as_sym_expr()) {
                (Some(l), Some(r)) => simplify_binary(op, l, r),
                _ => SVal::unknown(),
            },
        };
        value.with_provenance(provenance)
    }

    fn pointer_offset(&self, op: BinaryOp, ptr: &SVal, ptr_ty: &CType, index: &SVal) -> SVal {
        let SValKind::Loc { region, offset } = &ptr.kind else {
            // Arithmetic on a null or unknown pointer yields nothing useful.
            return SVal::unknown();
        };
        let Some(size) = self.element_size(ptr_ty) else {
            return SVal::unknown();
        };
        let sign = if op == BinaryOp::Sub { -1 } else { 1 };

        let new_offset = match (offset, &index.kind) {
            (LocOffset::Concrete(base), SValKind::Int(n)) => {
                match n.checked_mul(size * sign).and_then(|d| base.checked_add(d)) {
                    Some(off) => LocOffset::Concrete(off),
                    None => return SVal::unknown(),
                }
            }
            (_, SValKind::Int(_) | SValKind::Sym(_)) => {
                let scaled = Rc::new(SymExpr::Binary {
                    op: BinaryOp::Mul,
                    lhs: sym_of(index),
                    rhs: Rc::new(SymExpr::Int(size * sign)),
                });
                LocOffset::Symbolic(Rc::new(SymExpr::Binary {
                    op: BinaryOp::Add,
                    lhs: offset.as_sym(),
                    rhs: scaled,
                }))
            }
            _ => return SVal::unknown(),
        };

        SVal::new(SValKind::Loc {
            region: region.clone(),
            offset: new_offset,
        })
    }

    fn pointer_difference(&self, lhs: &SVal, ptr_ty: &CType, rhs: &SVal) -> SVal {
        let (
            SValKind::Loc {
                region: lr,
                offset: LocOffset::Concrete(lo),
            },
            SValKind::Loc {
                region: rr,
                offset: LocOffset::Concrete(ro),
            },
        ) = (&lhs.kind, &rhs.kind)
        else {
            return SVal::unknown();
        };
        match self.element_size(ptr_ty) {
            Some(size) if lr == rr && size > 0 => SVal::int((lo - ro) / size),
            _ => SVal::unknown(),
        }
    }

    fn compare_locations(&self, op: BinaryOp, lhs: &SVal, rhs: &SVal) -> SVal {
        use SValKind::{Int, Loc};
        let symbolic_null_test = |ptr: &SVal| -> Option<Rc<SymExpr>> {
            match &ptr.kind {
                Loc {
                    region: MemRegion::Symbolic(sym),
                    offset: LocOffset::Concrete(0),
                } => Some(sym.clone()),
                _ => None,
            }
        };

        match (&lhs.kind, &rhs.kind) {
            (Int(l), Int(r)) => fold_int(op, *l, *r).map_or_else(SVal::unknown, SVal::int),
            (Loc { region: lr, offset: LocOffset::Concrete(lo) }, Loc { region: rr, offset: LocOffset::Concrete(ro) })
                if lr == rr =>
            {
                fold_int(op, *lo, *ro).map_or_else(SVal::unknown, SVal::int)
            }
            (Loc { .. }, Int(0)) | (Int(0), Loc { .. })
                if matches!(op, BinaryOp::Eq | BinaryOp::Ne) =>
            {
                let ptr = if matches!(lhs.kind, Loc { .. }) { lhs } else { rhs };
                match symbolic_null_test(ptr) {
                    Some(sym) => simplify_binary(op, sym, Rc::new(SymExpr::Int(0))),
                    // Addresses of variables and strings are never null.
                    None if matches!(ptr.kind, Loc { region: MemRegion::Symbolic(_), .. }) => SVal::unknown(),
                    None => SVal::int(i128::from(op == BinaryOp::Ne)),
                }
            }
            _ => SVal::unknown(),
        }
    }

    pub fn eval_unary(&self, op: UnaryOp, operand: &SVal, result_ty: &CType) -> SVal {
        let provenance = if self.propagate_through_arithmetic || op == UnaryOp::Plus {
            operand.provenance
        } else {
            Provenance::None
        };
        let value = match (&operand.kind, op) {
            (_, UnaryOp::Plus) => operand.clone(),
            (SValKind::Undefined, _) => SVal::undefined(),
            (SValKind::Int(n), UnaryOp::Neg) => n.checked_neg().map_or_else(SVal::unknown, SVal::int),
            (SValKind::Int(n), UnaryOp::BitNot) => match result_ty {
                CType::Int(kind) => SVal::int(truncate(!*n, self.types.target.int_size(*kind), kind.is_signed())),
                _ => SVal::int(!*n),
            },
            (SValKind::Int(n), UnaryOp::Not) => SVal::int(i128::from(*n == 0)),
            (SValKind::Sym(sym), UnaryOp::Neg | UnaryOp::BitNot | UnaryOp::Not) => {
                SVal::sym(SymExpr::Unary {
                    op,
                    operand: sym.clone(),
                })
            }
            (SValKind::Loc { region, offset: LocOffset::Concrete(0) }, UnaryOp::Not) => match region {
                MemRegion::Symbolic(sym) => SVal::sym(SymExpr::Unary {
                    op,
                    operand: sym.clone(),
                }),
                _ => SVal::int(0),
            },
            _ => SVal::unknown(),
        };
        value.with_provenance(provenance)
    }
}

fn sym_of(value: &SVal) -> Rc<SymExpr> {
    value
        .as_sym_expr()
        .unwrap_or_else(|| Rc::new(SymExpr::Int(0)))
}

fn simplify_binary(op: BinaryOp, lhs: Rc<SymExpr>, rhs: Rc<SymExpr>) -> SVal {
    match (op, rhs.as_ref()) {
        (BinaryOp::Add | BinaryOp::Sub | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr, SymExpr::Int(0))
        | (BinaryOp::Mul | BinaryOp::Div, SymExpr::Int(1)) => {
            return SVal::new(SValKind::Sym(lhs));
        }
        (BinaryOp::Mul | BinaryOp::BitAnd, SymExpr::Int(0)) => return SVal::int(0),
        _ => {}
    }
    SVal::sym(SymExpr::Binary { op, lhs, rhs })
}

pub(crate) fn fold_int(op: BinaryOp, l: i128, r: i128) -> Option<i128> {
    match op {
        BinaryOp::Add => l.checked_add(r),
        BinaryOp::Sub => l.checked_sub(r),
        BinaryOp::Mul => l.checked_mul(r),
        BinaryOp::Div => l.checked_div(r),
        BinaryOp::Rem => l.checked_rem(r),
        BinaryOp::Shl => u32::try_from(r).ok().and_then(|r| l.checked_shl(r)),
        BinaryOp::Shr => u32::try_from(r).ok().and_then(|r| l.checked_shr(r)),
        BinaryOp::BitAnd => Some(l & r),
        BinaryOp::BitOr => Some(l | r),
        BinaryOp::BitXor => Some(l ^ r),
        BinaryOp::Lt => Some(i128::from(l < r)),
        BinaryOp::Gt => Some(i128::from(l > r)),
        BinaryOp::Le => Some(i128::from(l <= r)),
        BinaryOp::Ge => Some(i128::from(l >= r)),
        BinaryOp::Eq => Some(i128::from(l == r)),
        BinaryOp::Ne => Some(i128::from(l != r)),
        BinaryOp::LogicalAnd => Some(i128::from(l != 0 && r != 0)),
        BinaryOp::LogicalOr => Some(i128::from(l != 0 || r != 0)),
        BinaryOp::Comma => Some(r),
        _ => None,
    }
}

/// Wrap `value` to an integer of `bytes` width.
fn truncate(value: i128, bytes: u64, signed: bool) -> i128 {
    let bits = (bytes * 8) as u32;
    if bits >= 128 {
        return value;
    }
    let mask = (1i128 << bits) - 1;
    let raw = value & mask;
    if signed && ((raw >> (bits - 1)) & 1) == 1 {
        raw - (1i128 << bits)
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_ptr() -> CType {
        CType::pointer_to(CType::Int(IntKind::Int))
    }

    fn ulong() -> CType {
        CType::Int(IntKind::ULong)
    }

    fn local(var: u32) -> MemRegion {
        MemRegion::Var {
            var: VarId(var),
            frame: FrameId(0),
        }
    }

    #[test]
    fn casts_keep_provenance() {
        let types = TypeContext::default();
        let builder = SValBuilder::new(&types, false);
        let size = SVal::int(4).with_provenance(Provenance::SizeOf);
        let as_int = builder.cast(size, &CType::Int(IntKind::Int));
        assert_eq!(as_int.as_int(), Some(4));
        assert!(as_int.is_from_size_or_offset());
    }

    #[test]
    fn arithmetic_drops_provenance_unless_configured() {
        let types = TypeContext::default();
        let size = SVal::int(4).with_provenance(Provenance::SizeOf);
        let two = SVal::int(2);

        let dropped = SValBuilder::new(&types, false).eval_binop(
            BinaryOp::Mul,
            (&size, &ulong()),
            (&two, &ulong()),
            &ulong(),
        );
        assert_eq!(dropped.as_int(), Some(8));
        assert!(!dropped.is_from_size_or_offset());

        let kept = SValBuilder::new(&types, true).eval_binop(
            BinaryOp::Mul,
            (&size, &ulong()),
            (&two, &ulong()),
            &ulong(),
        );
        assert_eq!(kept.provenance(), Provenance::SizeOf);
    }

    #[test]
    fn pointer_addition_scales_by_pointee_size() {
        let types = TypeContext::default();
        let builder = SValBuilder::new(&types, false);
        let p = SVal::loc(local(0), 0);
        let moved = builder.eval_binop(
            BinaryOp::Add,
            (&p, &int_ptr()),
            (&SVal::int(4), &ulong()),
            &int_ptr(),
        );
        assert_eq!(moved, SVal::loc(local(0), 16));

        let back = builder.eval_binop(
            BinaryOp::Sub,
            (&moved, &int_ptr()),
            (&p, &int_ptr()),
            &CType::Int(IntKind::Long),
        );
        assert_eq!(back.as_int(), Some(4));
    }

    #[test]
    fn symbolic_index_produces_symbolic_offset() {
        let types = TypeContext::default();
        let builder = SValBuilder::new(&types, false);
        let p = SVal::loc(local(1), 0);
        let n = SVal::sym(SymExpr::Symbol(SymbolId(7)));
        let moved = builder.eval_binop(BinaryOp::Add, (&p, &int_ptr()), (&n, &ulong()), &int_ptr());
        assert!(matches!(
            moved.kind(),
            SValKind::Loc {
                offset: LocOffset::Symbolic(_),
                ..
            }
        ));
    }

    #[test]
    fn address_of_local_is_not_null() {
        let types = TypeContext::default();
        let builder = SValBuilder::new(&types, false);
        let p = SVal::loc(local(0), 0);
        let int = CType::Int(IntKind::Int);
        let eq = builder.eval_binop(BinaryOp::Eq, (&p, &int_ptr()), (&SVal::int(0), &int), &int);
        assert_eq!(eq.as_int(), Some(0));
    }

    #[test]
    fn truncation_wraps_to_width() {
        assert_eq!(truncate(256, 1, false), 0);
        assert_eq!(truncate(255, 1, true), -1);
        assert_eq!(truncate(-1, 4, false), 0xffff_ffff);
    }
}
