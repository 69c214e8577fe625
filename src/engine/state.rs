//! Immutable per-path program state.
//!
//! States are shared through [`StateRef`]; every update clones and returns a
//! new state, so the successors of a fork never observe each other.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ast::ExprId;
use crate::engine::svals::{FrameId, LocOffset, MemRegion, SVal, SValKind, SymExpr, SymbolId};

pub type StateRef = Rc<ProgramState>;

/// A concrete memory cell: a region plus a byte offset into it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Binding {
    pub region: MemRegion,
    pub offset: i128,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProgramState {
    /// Values of sub-expressions of the statement being evaluated.
    env: BTreeMap<(FrameId, ExprId), SVal>,
    store: BTreeMap<Binding, SVal>,
    /// Regions whose contents were invalidated; unbound reads derive from the symbol.
    defaults: BTreeMap<MemRegion, SymbolId>,
    /// Truth assumed for symbolic conditions on this path.
    constraints: BTreeMap<Rc<SymExpr>, bool>,
}

impl ProgramState {
    pub fn initial() -> StateRef {
        Rc::new(Self::default())
    }

    fn update(&self, f: impl FnOnce(&mut ProgramState)) -> StateRef {
        let mut next = self.clone();
        f(&mut next);
        Rc::new(next)
    }

    // ------------------------------------------------------------------
    // Environment
    // ------------------------------------------------------------------

    pub fn bind_expr(&self, frame: FrameId, expr: ExprId, value: SVal) -> StateRef {
        self.update(|s| {
            s.env.insert((frame, expr), value);
        })
    }

    pub fn expr_value(&self, frame: FrameId, expr: ExprId) -> Option<&SVal> {
        self.env.get(&(frame, expr))
    }

    /// Drop the sub-expression values of `frame` once a statement is done.
    pub fn clear_env(&self, frame: FrameId) -> StateRef {
        self.update(|s| s.env.retain(|(f, _), _| *f != frame))
    }

    // ------------------------------------------------------------------
    // Store
    // ------------------------------------------------------------------

    pub fn binding(&self, region: &MemRegion, offset: i128) -> Option<&SVal> {
        self.store.get(&Binding {
            region: region.clone(),
            offset,
        })
    }

    pub fn default_symbol(&self, region: &MemRegion) -> Option<SymbolId> {
        self.defaults.get(region).copied()
    }

    /// Store `value` at `loc`. Writes through unknown or null locations are
    /// dropped; writes at a symbolic offset invalidate the whole region with
    /// `fresh`.
    pub fn store(&self, loc: &SVal, value: SVal, fresh: impl FnOnce() -> SymbolId) -> StateRef {
        match loc.kind() {
            SValKind::Loc {
                region,
                offset: LocOffset::Concrete(offset),
            } => self.update(|s| {
                s.store.insert(
                    Binding {
                        region: region.clone(),
                        offset: *offset,
                    },
                    value,
                );
            }),
            SValKind::Loc { region, .. } => self.invalidate_region(region, fresh()),
            _ => Rc::new(self.clone()),
        }
    }

    pub fn invalidate_region(&self, region: &MemRegion, symbol: SymbolId) -> StateRef {
        self.update(|s| {
            s.store.retain(|binding, _| binding.region != *region);
            s.defaults.insert(region.clone(), symbol);
        })
    }

    /// Forget every binding and the default of `region`.
    pub fn clear_region(&self, region: &MemRegion) -> StateRef {
        self.update(|s| {
            s.store.retain(|binding, _| binding.region != *region);
            s.defaults.remove(region);
        })
    }

    /// Forget the bindings of `region` in `[start, start + len)`.
    pub fn clear_range(&self, region: &MemRegion, start: i128, len: i128) -> StateRef {
        self.update(|s| {
            s.store
                .retain(|binding, _| binding.region != *region || !(start..start + len).contains(&binding.offset));
        })
    }

    /// Copy the bindings of `source` in `[source_start, source_start + len)`
    /// to `dest` at `dest_start`, values and provenance unchanged. Cells of
    /// `dest` the copy does not bind fall back to `fresh`, when given.
    pub fn copy_range(
        &self,
        source: &MemRegion,
        source_start: i128,
        dest: &MemRegion,
        dest_start: i128,
        len: i128,
        fresh: Option<SymbolId>,
    ) -> StateRef {
        let copied: Vec<(i128, SVal)> = self
            .store
            .iter()
            .filter(|(binding, _)| {
                binding.region == *source && (source_start..source_start + len).contains(&binding.offset)
            })
            .map(|(binding, value)| (dest_start + (binding.offset - source_start), value.clone()))
            .collect();
        self.update(|s| {
            s.store.retain(|binding, _| {
                binding.region != *dest || !(dest_start..dest_start + len).contains(&binding.offset)
            });
            if let Some(symbol) = fresh {
                s.defaults.insert(dest.clone(), symbol);
            }
            for (offset, value) in copied {
                s.store.insert(
                    Binding {
                        region: dest.clone(),
                        offset,
                    },
                    value,
                );
            }
        })
    }

    /// Forget the locals and expression values of a finished frame. `keep`
    /// names a local that outlives the frame, such as a returned aggregate.
    pub fn pop_frame(&self, frame: FrameId, keep: Option<&MemRegion>) -> StateRef {
        self.update(|s| {
            s.env.retain(|(f, _), _| *f != frame);
            let is_local = |region: &MemRegion| {
                Some(region) != keep && matches!(region, MemRegion::Var { frame: f, .. } if *f == frame)
            };
            s.store.retain(|binding, _| !is_local(&binding.region));
            s.defaults.retain(|region, _| !is_local(region));
        })
    }

    // ------------------------------------------------------------------
    // Constraints
    // ------------------------------------------------------------------

    pub fn constraint(&self, sym: &SymExpr) -> Option<bool> {
        self.constraints.get(sym).copied()
    }

    /// Assume `cond` evaluates to `truth`. Returns `None` when the assumption
    /// contradicts what the path already knows.
    pub fn assume(self: &Rc<Self>, cond: &SVal, truth: bool) -> Option<StateRef> {
        match cond.kind() {
            SValKind::Int(n) => ((*n != 0) == truth).then(|| self.clone()),
            SValKind::Unknown | SValKind::Undefined => Some(self.clone()),
            SValKind::Loc {
                region: MemRegion::Symbolic(sym),
                offset: LocOffset::Concrete(0),
            } => self.assume_sym(sym.clone(), truth),
            // Offsets into symbolic regions may still be null; stay agnostic.
            SValKind::Loc {
                region: MemRegion::Symbolic(_),
                ..
            } => Some(self.clone()),
            SValKind::Loc { .. } => truth.then(|| self.clone()),
            SValKind::Sym(sym) => self.assume_sym(sym.clone(), truth),
        }
    }

    fn assume_sym(self: &Rc<Self>, sym: Rc<SymExpr>, truth: bool) -> Option<StateRef> {
        let (sym, truth) = normalize(sym, truth);
        if let SymExpr::Int(n) = sym.as_ref() {
            return ((*n != 0) == truth).then(|| self.clone());
        }
        match self.constraints.get(&sym) {
            Some(known) if *known == truth => Some(self.clone()),
            Some(_) => None,
            None => Some(self.update(|s| {
                s.constraints.insert(sym, truth);
            })),
        }
    }
}

/// Rewrite `!x`, `x != 0` and `x == 0` into a truth test of `x`.
fn normalize(mut sym: Rc<SymExpr>, mut truth: bool) -> (Rc<SymExpr>, bool) {
    use crate::ast::{BinaryOp, UnaryOp};
    loop {
        let next = match sym.as_ref() {
            SymExpr::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                truth = !truth;
                operand.clone()
            }
            SymExpr::Binary { op, lhs, rhs } if matches!(rhs.as_ref(), SymExpr::Int(0)) => match op {
                BinaryOp::Ne => lhs.clone(),
                BinaryOp::Eq => {
                    truth = !truth;
                    lhs.clone()
                }
                _ => return (sym, truth),
            },
            _ => return (sym, truth),
        };
        sym = next;
    }
}
