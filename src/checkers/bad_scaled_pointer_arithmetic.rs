use crate::ast::{BinaryExpr, BinaryOp, Expr};
use crate::checker::{Checker, CheckerCategory, CheckerDescriptor};
use crate::engine::context::CheckerContext;
use crate::report::{BugReport, BugType};
use crate::types::PointeeScale;

// ============================================================================
// BadScaledPointerArithmetic
// ============================================================================

/// Flags `ptr + n` / `ptr - n` / `ptr += n` / `ptr -= n` where `n` holds a
/// value computed by `sizeof` or `offsetof` and the pointee is wider than one
/// char. Pointer arithmetic already scales by the element size, so the byte
/// count ends up multiplied twice.
pub struct BadScaledPointerArithmetic;

pub static BAD_SCALED_POINTER_ARITHMETIC: CheckerDescriptor = CheckerDescriptor {
    name: "bad_scaled_pointer_arithmetic",
    category: CheckerCategory::Suspicious,
    description: "Pointer arithmetic with an operand computed by sizeof or offsetof",
    explanation: "\
Adding an integer to a pointer advances it by that many elements, not bytes.
When the integer was produced by `sizeof` or `offsetof` it is already a byte
count, so the pointer moves `n * sizeof(*p)` bytes instead of `n`:

    int *p = buf;
    p = p + sizeof(int);        /* advances 16 bytes, not 4 */

The value is tracked along each execution path, so the finding also fires when
the byte count went through a variable or a function parameter first.
Pointers to one-char types (`char *`, `unsigned char *`) are not reported,
since scaling by one is the identity there. Pointers to incomplete or
variably sized types are reported because their scale cannot be proven.

Fix it by casting to `char *` before the arithmetic, or by dividing the byte
count by the element size.",
};

/// Shared by every report of this checker; the reporter deduplicates on it.
pub static BUG_TYPE: BugType = BugType {
    checker: &BAD_SCALED_POINTER_ARITHMETIC,
    name: "Badly scaled pointer arithmetic",
    category: "Suspicious operation",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarSide {
    Left,
    Right,
}

impl ScalarSide {
    fn as_str(self) -> &'static str {
        match self {
            ScalarSide::Left => "left",
            ScalarSide::Right => "right",
        }
    }
}

/// The pointer operand and the integer operand of a mixed additive
/// expression, or `None` for any other operand combination.
fn split_operands(expr: &BinaryExpr) -> Option<(&Expr, &Expr, ScalarSide)> {
    let (lhs, rhs) = (&*expr.lhs, &*expr.rhs);
    if lhs.ty.is_pointer() && rhs.ty.is_integer() {
        Some((lhs, rhs, ScalarSide::Right))
    } else if lhs.ty.is_integer() && rhs.ty.is_pointer() {
        Some((rhs, lhs, ScalarSide::Left))
    } else {
        None
    }
}

impl Checker for BadScaledPointerArithmetic {
    fn descriptor(&self) -> &'static CheckerDescriptor {
        &BAD_SCALED_POINTER_ARITHMETIC
    }

    fn check_pre_binary(&self, expr: &BinaryExpr, ctx: &mut CheckerContext<'_>) {
        if !matches!(
            expr.op,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::AddAssign | BinaryOp::SubAssign
        ) {
            return;
        }

        let Some((pointer, scalar, side)) = split_operands(expr) else {
            return;
        };

        if !ctx.sval(scalar).is_from_size_or_offset() {
            return;
        }

        // Scaling by one char changes nothing.
        if ctx.layout().classify_pointee(&pointer.ty) == PointeeScale::Byte {
            return;
        }

        let Some(node) = ctx.generate_non_fatal_error_node() else {
            return;
        };
        let message = format!(
            "In pointer arithmetic {} argument is calculated from a sizeof or offsetof expression",
            side.as_str()
        );
        ctx.emit_report(BugReport::new(&BUG_TYPE, message, node));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprId, ExprKind};
    use crate::diagnostics::Span;
    use crate::engine::context::testing::Harness;
    use crate::engine::state::{ProgramState, StateRef};
    use crate::engine::svals::{FrameId, Provenance, SVal};
    use crate::types::{ArraySize, CType, IntKind, RecordDecl, RecordKind};

    fn leaf(id: u32, ty: CType) -> Expr {
        Expr {
            id: ExprId(id),
            kind: ExprKind::Unsupported("operand".to_string()),
            ty,
            span: Span::default(),
        }
    }

    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> BinaryExpr {
        BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn ulong() -> CType {
        CType::Int(IntKind::ULong)
    }

    fn int_ptr() -> CType {
        CType::pointer_to(CType::Int(IntKind::Int))
    }

    fn tagged(id: u32, provenance: Provenance) -> StateRef {
        ProgramState::initial().bind_expr(
            FrameId(0),
            ExprId(id),
            SVal::int(4).with_provenance(provenance),
        )
    }

    fn messages(harness: Harness) -> Vec<String> {
        harness
            .reporter
            .finish(&Default::default(), &Default::default(), None)
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    fn run(harness: &mut Harness, expr: &BinaryExpr) {
        let mut ctx = harness.ctx(BAD_SCALED_POINTER_ARITHMETIC.name);
        BadScaledPointerArithmetic.check_pre_binary(expr, &mut ctx);
    }

    #[test]
    fn reports_right_operand_from_sizeof() {
        let expr = binary(BinaryOp::Add, leaf(1, int_ptr()), leaf(2, ulong()));
        let mut harness = Harness::new(tagged(2, Provenance::SizeOf));
        run(&mut harness, &expr);
        assert_eq!(
            messages(harness),
            ["In pointer arithmetic right argument is calculated from a sizeof or offsetof expression"]
        );
    }

    #[test]
    fn reports_left_operand_from_offsetof() {
        let expr = binary(BinaryOp::Add, leaf(1, ulong()), leaf(2, int_ptr()));
        let mut harness = Harness::new(tagged(1, Provenance::OffsetOf));
        run(&mut harness, &expr);
        let messages = messages(harness);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains(" left argument"));
    }

    #[test]
    fn compound_assignment_forms_are_checked() {
        for op in [BinaryOp::AddAssign, BinaryOp::SubAssign, BinaryOp::Sub] {
            let expr = binary(op, leaf(1, int_ptr()), leaf(2, ulong()));
            let mut harness = Harness::new(tagged(2, Provenance::SizeOf));
            run(&mut harness, &expr);
            assert_eq!(harness.reporter.len(), 1, "{op:?}");
        }
    }

    #[test]
    fn untagged_or_non_additive_operands_are_ignored() {
        let expr = binary(BinaryOp::Add, leaf(1, int_ptr()), leaf(2, ulong()));
        let mut harness = Harness::new(tagged(2, Provenance::None));
        run(&mut harness, &expr);
        assert!(harness.reporter.is_empty());

        let expr = binary(BinaryOp::Mul, leaf(1, ulong()), leaf(2, ulong()));
        let mut harness = Harness::new(tagged(2, Provenance::SizeOf));
        run(&mut harness, &expr);
        assert!(harness.reporter.is_empty());

        let expr = binary(BinaryOp::Sub, leaf(1, int_ptr()), leaf(2, int_ptr()));
        let mut harness = Harness::new(tagged(2, Provenance::SizeOf));
        run(&mut harness, &expr);
        assert!(harness.reporter.is_empty());
    }

    #[test]
    fn byte_sized_pointees_are_excluded() {
        for pointee in [CType::Int(IntKind::Char), CType::Int(IntKind::UChar)] {
            let expr = binary(BinaryOp::Add, leaf(1, CType::pointer_to(pointee)), leaf(2, ulong()));
            let mut harness = Harness::new(tagged(2, Provenance::SizeOf));
            run(&mut harness, &expr);
            assert!(harness.reporter.is_empty());
        }
    }

    #[test]
    fn unprovable_pointee_sizes_are_reported() {
        let opaque = RecordDecl {
            name: Some("opaque".to_string()),
            kind: RecordKind::Struct,
            fields: None,
        };
        let pointees = [
            None,
            Some(CType::Array(Box::new(CType::Int(IntKind::Char)), ArraySize::Variable)),
            Some(CType::Dependent("T".to_string())),
        ];
        for pointee in pointees {
            let mut harness = Harness::new(tagged(2, Provenance::SizeOf));
            let pointee = pointee.unwrap_or_else(|| CType::Record(harness.types.add_record(opaque.clone())));
            let expr = binary(BinaryOp::Add, leaf(1, CType::pointer_to(pointee.clone())), leaf(2, ulong()));
            run(&mut harness, &expr);
            assert_eq!(harness.reporter.len(), 1, "{pointee:?}");
        }
    }

    #[test]
    fn running_twice_reports_once() {
        let expr = binary(BinaryOp::Add, leaf(1, int_ptr()), leaf(2, ulong()));
        let mut harness = Harness::new(tagged(2, Provenance::SizeOf));
        run(&mut harness, &expr);
        run(&mut harness, &expr);
        assert_eq!(harness.reporter.len(), 1);
    }
}
