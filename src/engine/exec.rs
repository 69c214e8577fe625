//! The interpreter: statements and expressions evaluated per path.

use std::rc::Rc;

use crate::ast::{
    BinaryExpr, BinaryOp, CaseLabel, CastKind, Expr, ExprKind, FunctionDecl, InitItem, Stmt,
    StmtKind, Storage, SwitchCase, TranslationUnit, UnaryOp, VarId,
};
use crate::checker::Checker;
use crate::engine::AnalyzerOptions;
use crate::engine::context::CheckerContext;
use crate::engine::exploded::{ExplodedGraph, ProgramPoint};
use crate::engine::state::{ProgramState, StateRef};
use crate::engine::svals::{
    FrameId, LocOffset, MemRegion, Provenance, SVal, SValBuilder, SValKind, SymExpr,
    SymbolManager,
};
use crate::report::BugReporter;
use crate::trace_event;
use crate::types::CType;

type Paths = Vec<(StateRef, SVal)>;

#[derive(Debug, Clone)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(SVal),
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    id: FrameId,
    depth: usize,
}

/// Counters for one analysed entry function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionStats {
    pub nodes: usize,
    pub paths: usize,
    pub budget_exhausted: bool,
}

fn is_scalar(ty: &CType) -> bool {
    ty.is_arithmetic() || ty.is_pointer()
}

pub struct ExprEngine<'a> {
    tu: &'a TranslationUnit,
    checkers: &'a [Box<dyn Checker>],
    options: &'a AnalyzerOptions,
    reporter: &'a mut BugReporter,
    symbols: SymbolManager,
    graph: ExplodedGraph,
    next_frame: u32,
    steps: usize,
    budget_exhausted: bool,
    call_stack: Vec<&'a str>,
    entry: &'a str,
    entry_is_main: bool,
}

impl<'a> ExprEngine<'a> {
    pub fn new(
        tu: &'a TranslationUnit,
        checkers: &'a [Box<dyn Checker>],
        options: &'a AnalyzerOptions,
        reporter: &'a mut BugReporter,
    ) -> Self {
        Self {
            tu,
            checkers,
            options,
            reporter,
            symbols: SymbolManager::default(),
            graph: ExplodedGraph::new(),
            next_frame: 0,
            steps: 0,
            budget_exhausted: false,
            call_stack: Vec::new(),
            entry: "",
            entry_is_main: false,
        }
    }

    /// Explore every path through `function` with symbolic inputs.
    pub fn analyze_function(&mut self, function: &'a FunctionDecl) -> FunctionStats {
        self.graph.clear();
        self.steps = 0;
        self.budget_exhausted = false;
        self.entry = &function.name;
        self.entry_is_main = function.name == "main";

        let Some(body) = function.body.as_ref() else {
            return FunctionStats::default();
        };

        let tu = self.tu;
        let frame = self.new_frame(0);
        let mut state = ProgramState::initial();
        for &param in &function.params {
            let ty = &tu.var(param).ty;
            state = if is_scalar(ty) {
                let value = self.symbols.conjure_value(ty);
                self.bind_var(frame, param, value, &state)
            } else {
                let region = self.var_region(frame, param);
                state.invalidate_region(&region, self.symbols.conjure())
            };
        }

        let mut states = vec![state];
        if self.entry_is_main {
            states = self.init_globals(frame, states);
        }

        self.call_stack.push(&function.name);
        let mut paths = 0;
        for state in states {
            paths += self.exec_stmt(frame, body, state).len();
        }
        self.call_stack.pop();

        FunctionStats {
            nodes: self.graph.len(),
            paths,
            budget_exhausted: self.budget_exhausted,
        }
    }

    fn init_globals(&mut self, frame: Frame, mut states: Vec<StateRef>) -> Vec<StateRef> {
        let tu = self.tu;
        for decl in &tu.globals {
            let Some(init) = decl.init.as_ref() else {
                continue;
            };
            let mut next = Vec::new();
            for state in states {
                next.extend(self.init_var(frame, decl.var, init, state));
            }
            states = next;
        }
        states
    }

    /// Run the initialiser of `var`. Brace initialisers write each listed
    /// cell in order.
    fn init_var(&mut self, frame: Frame, var: VarId, init: &'a Expr, state: StateRef) -> Vec<StateRef> {
        let ExprKind::InitList(items) = &init.kind else {
            let mut out = Vec::new();
            for (state, value) in self.eval_full(frame, init, state) {
                out.push(self.bind_var(frame, var, value, &state));
            }
            return out;
        };

        let region = self.var_region(frame, var);
        let mut states = vec![state.clear_region(&region)];
        for InitItem { offset, value } in items {
            let loc = SVal::loc(region.clone(), i128::from(*offset));
            let mut next = Vec::new();
            for state in states {
                for (state, v) in self.eval(frame, value, state) {
                    next.push(self.store(&state, &loc, v, &value.ty));
                }
            }
            states = next;
        }
        states.into_iter().map(|s| s.clear_env(frame.id)).collect()
    }

    fn new_frame(&mut self, depth: usize) -> Frame {
        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        Frame { id, depth }
    }

    fn builder(&self) -> SValBuilder<'a> {
        SValBuilder::new(&self.tu.types, self.options.propagate_through_arithmetic)
    }

    /// Count one evaluation step; `false` once the budget is spent.
    fn tick(&mut self) -> bool {
        self.steps += 1;
        if self.steps <= self.options.max_steps {
            return true;
        }
        if !self.budget_exhausted {
            self.budget_exhausted = true;
            trace_event!(debug, function = self.entry, max_steps = self.options.max_steps, "step budget exhausted; dropping remaining paths");
        }
        false
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    fn var_region(&self, frame: Frame, var: VarId) -> MemRegion {
        match self.tu.var(var).storage {
            Storage::Global => MemRegion::Global(var),
            Storage::Local | Storage::Param => MemRegion::Var {
                var,
                frame: frame.id,
            },
        }
    }

    fn bind_var(&mut self, frame: Frame, var: VarId, value: SVal, state: &StateRef) -> StateRef {
        let tu = self.tu;
        let loc = SVal::loc(self.var_region(frame, var), 0);
        self.store(state, &loc, value, &tu.var(var).ty)
    }

    fn store(&mut self, state: &StateRef, loc: &SVal, value: SVal, ty: &CType) -> StateRef {
        if !is_scalar(ty) {
            return self.store_aggregate(state, loc, &value, ty);
        }
        let symbols = &mut self.symbols;
        state.store(loc, value, || symbols.conjure())
    }

    /// Store an aggregate. Its value is the location of the source object,
    /// whose cells are copied with their values unchanged.
    fn store_aggregate(&mut self, state: &StateRef, loc: &SVal, value: &SVal, ty: &CType) -> StateRef {
        let SValKind::Loc { region, offset } = loc.kind() else {
            return state.clone();
        };
        let (LocOffset::Concrete(offset), Ok(size)) = (offset, self.tu.types.size_in_chars(ty)) else {
            return state.invalidate_region(region, self.symbols.conjure());
        };
        let len = i128::from(size);
        match value.kind() {
            SValKind::Loc {
                region: source,
                offset: LocOffset::Concrete(source_offset),
            } => {
                // Cells the source never bound read as fresh symbols, unless
                // the source is a plain local whose unbound cells are undefined.
                let fresh = (!matches!(source, MemRegion::Var { .. })
                    || state.default_symbol(source).is_some())
                .then(|| self.symbols.conjure());
                state.copy_range(source, *source_offset, region, *offset, len, fresh)
            }
            SValKind::Undefined => state.clear_range(region, *offset, len),
            _ => state.invalidate_region(region, self.symbols.conjure()),
        }
    }

    fn typed_symbol(sym: SymExpr, ty: &CType) -> SVal {
        if ty.is_pointer() {
            SVal::loc(MemRegion::Symbolic(Rc::new(sym)), 0)
        } else if ty.is_integer() {
            SVal::sym(sym)
        } else {
            SVal::unknown()
        }
    }

    fn load(&self, state: &StateRef, loc: &SVal, ty: &CType) -> SVal {
        let SValKind::Loc {
            region,
            offset: LocOffset::Concrete(offset),
        } = loc.kind()
        else {
            return SVal::unknown();
        };
        if let Some(value) = state.binding(region, *offset) {
            return value.clone();
        }
        if let Some(parent) = state.default_symbol(region) {
            return Self::typed_symbol(
                SymExpr::Derived {
                    parent,
                    offset: *offset,
                },
                ty,
            );
        }
        match region {
            MemRegion::Var { .. } => SVal::undefined(),
            // Static storage is zero-initialised when the program starts in `main`.
            MemRegion::Global(_) if self.entry_is_main && is_scalar(ty) => SVal::int(0),
            MemRegion::Global(_) | MemRegion::Symbolic(_) => Self::typed_symbol(
                SymExpr::RegionValue {
                    region: region.clone(),
                    offset: *offset,
                },
                ty,
            ),
            MemRegion::String(_) => SVal::unknown(),
        }
    }

    /// Interpret a pointer value as a location; `None` for null.
    fn as_location(&self, value: SVal, pointer_ty: &CType) -> Option<SVal> {
        match value.kind() {
            SValKind::Int(0) => None,
            _ => Some(self.builder().cast(value, pointer_ty)),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_stmt(&mut self, frame: Frame, stmt: &'a Stmt, state: StateRef) -> Vec<(StateRef, Flow)> {
        match &stmt.kind {
            StmtKind::Compound(stmts) => self.exec_block(frame, stmts, state),
            StmtKind::Expr(expr) => self
                .eval_full(frame, expr, state)
                .into_iter()
                .map(|(state, _)| (state, Flow::Normal))
                .collect(),
            StmtKind::Decl(decls) => {
                let mut states = vec![state];
                for decl in decls {
                    let mut next = Vec::new();
                    for state in states {
                        match decl.init.as_ref() {
                            Some(init) => next.extend(self.init_var(frame, decl.var, init, state)),
                            // An uninitialised local starts out undefined; forget
                            // values from earlier iterations of an enclosing loop.
                            None => {
                                let loc = SVal::loc(self.var_region(frame, decl.var), 0);
                                let tu = self.tu;
                                let ty = &tu.var(decl.var).ty;
                                next.push(self.store(&state, &loc, SVal::undefined(), ty));
                            }
                        }
                    }
                    states = next;
                }
                states.into_iter().map(|s| (s, Flow::Normal)).collect()
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let mut out = Vec::new();
                for (state, value) in self.eval_full(frame, cond, state) {
                    if let Some(taken) = state.assume(&value, true) {
                        out.extend(self.exec_stmt(frame, then, taken));
                    }
                    if let Some(not_taken) = state.assume(&value, false) {
                        match otherwise {
                            Some(otherwise) => out.extend(self.exec_stmt(frame, otherwise, not_taken)),
                            None => out.push((not_taken, Flow::Normal)),
                        }
                    }
                }
                out
            }
            StmtKind::While { cond, body } => self.exec_loop(frame, Some(cond), body, None, true, state),
            StmtKind::DoWhile { body, cond } => self.exec_loop(frame, Some(cond), body, None, false, state),
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                let starts = match init {
                    Some(init) => self
                        .exec_stmt(frame, init, state)
                        .into_iter()
                        .map(|(s, _)| s)
                        .collect(),
                    None => vec![state],
                };
                let mut out = Vec::new();
                for start in starts {
                    out.extend(self.exec_loop(frame, cond.as_ref(), body, step.as_ref(), true, start));
                }
                out
            }
            StmtKind::Switch { cond, body, cases } => self.exec_switch(frame, cond, body, cases, state),
            StmtKind::Return(value) => match value {
                Some(expr) => self
                    .eval_full(frame, expr, state)
                    .into_iter()
                    .map(|(state, value)| (state, Flow::Return(value)))
                    .collect(),
                None => vec![(state, Flow::Return(SVal::unknown()))],
            },
            StmtKind::Break => vec![(state, Flow::Break)],
            StmtKind::Continue => vec![(state, Flow::Continue)],
            StmtKind::Empty => vec![(state, Flow::Normal)],
            StmtKind::Unsupported(_kind) => {
                trace_event!(trace, kind = %_kind, "skipping unsupported statement");
                vec![(state, Flow::Normal)]
            }
        }
    }

    fn exec_block(&mut self, frame: Frame, stmts: &'a [Stmt], state: StateRef) -> Vec<(StateRef, Flow)> {
        let mut live = vec![state];
        let mut done = Vec::new();
        for stmt in stmts {
            let mut next = Vec::new();
            for state in live {
                for (state, flow) in self.exec_stmt(frame, stmt, state) {
                    match flow {
                        Flow::Normal => next.push(state),
                        other => done.push((state, other)),
                    }
                }
            }
            live = next;
            if live.is_empty() {
                break;
            }
        }
        done.extend(live.into_iter().map(|s| (s, Flow::Normal)));
        done
    }

    /// Fork one path per `case` whose value the condition can equal, plus
    /// the `default` arm (or the fall-out path) where it equals none of them.
    fn exec_switch(
        &mut self,
        frame: Frame,
        cond: &'a Expr,
        body: &'a [Stmt],
        cases: &'a [SwitchCase],
        state: StateRef,
    ) -> Vec<(StateRef, Flow)> {
        let builder = self.builder();
        let result_ty = CType::Int(crate::types::IntKind::Int);
        let mut out = Vec::new();

        for (state, value) in self.eval_full(frame, cond, state) {
            let equals = |label: i128| {
                builder.eval_binop(
                    BinaryOp::Eq,
                    (&value, &cond.ty),
                    (&SVal::int(label), &cond.ty),
                    &result_ty,
                )
            };

            let mut entries = Vec::new();
            let mut unmatched = Some(state.clone());
            for case in cases {
                match case.label {
                    CaseLabel::Value(label) => {
                        let test = equals(label);
                        if let Some(taken) = state.assume(&test, true) {
                            entries.push((taken, case.start));
                        }
                        unmatched = unmatched.and_then(|s| s.assume(&test, false));
                    }
                    CaseLabel::Unknown => entries.push((state.clone(), case.start)),
                    CaseLabel::Default => {}
                }
            }
            if let Some(unmatched) = unmatched {
                match cases.iter().find(|c| c.label == CaseLabel::Default) {
                    Some(default) => entries.push((unmatched, default.start)),
                    None => out.push((unmatched, Flow::Normal)),
                }
            }

            for (state, start) in entries {
                for (state, flow) in self.exec_block(frame, &body[start..], state) {
                    match flow {
                        Flow::Break => out.push((state, Flow::Normal)),
                        other => out.push((state, other)),
                    }
                }
            }
        }
        out
    }

    /// Unroll a loop at most `loop_bound` times per path. Paths that would
    /// enter the body once more are dropped.
    fn exec_loop(
        &mut self,
        frame: Frame,
        cond: Option<&'a Expr>,
        body: &'a Stmt,
        step: Option<&'a Expr>,
        test_first: bool,
        state: StateRef,
    ) -> Vec<(StateRef, Flow)> {
        let mut exits = Vec::new();
        let mut current = vec![state];

        for iteration in 0..=self.options.loop_bound {
            let mut entering = Vec::new();
            for state in current {
                match cond {
                    Some(cond) if test_first || iteration > 0 => {
                        for (state, value) in self.eval_full(frame, cond, state) {
                            if let Some(exit) = state.assume(&value, false) {
                                exits.push((exit, Flow::Normal));
                            }
                            if let Some(enter) = state.assume(&value, true) {
                                entering.push(enter);
                            }
                        }
                    }
                    _ => entering.push(state),
                }
            }

            if iteration == self.options.loop_bound {
                if !entering.is_empty() {
                    trace_event!(trace, dropped = entering.len(), "loop bound reached");
                }
                break;
            }

            let mut next = Vec::new();
            for state in entering {
                for (state, flow) in self.exec_stmt(frame, body, state) {
                    match flow {
                        Flow::Normal | Flow::Continue => next.push(state),
                        Flow::Break => exits.push((state, Flow::Normal)),
                        Flow::Return(value) => exits.push((state, Flow::Return(value))),
                    }
                }
            }

            current = match step {
                Some(step) => {
                    let mut stepped = Vec::new();
                    for state in next {
                        stepped.extend(self.eval_full(frame, step, state).into_iter().map(|(s, _)| s));
                    }
                    stepped
                }
                None => next,
            };
            if current.is_empty() {
                break;
            }
        }

        exits
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Evaluate a full expression and drop its sub-expression bindings.
    fn eval_full(&mut self, frame: Frame, expr: &'a Expr, state: StateRef) -> Paths {
        self.eval(frame, expr, state)
            .into_iter()
            .map(|(state, value)| (state.clear_env(frame.id), value))
            .collect()
    }

    /// Evaluate `expr` as an rvalue and bind its value in the environment.
    fn eval(&mut self, frame: Frame, expr: &'a Expr, state: StateRef) -> Paths {
        if !self.tick() {
            return Vec::new();
        }
        self.eval_rvalue(frame, expr, state)
            .into_iter()
            .map(|(state, value)| (state.bind_expr(frame.id, expr.id, value.clone()), value))
            .collect()
    }

    fn eval_rvalue(&mut self, frame: Frame, expr: &'a Expr, state: StateRef) -> Paths {
        match &expr.kind {
            ExprKind::IntLiteral(n) => vec![(state, SVal::int(*n))],
            ExprKind::FloatLiteral(_)
            | ExprKind::StringLiteral(_)
            | ExprKind::FunctionRef(_)
            | ExprKind::InitList(_)
            | ExprKind::Unsupported(_) => vec![(state, SVal::unknown())],
            ExprKind::SizeOf { value, .. } => {
                let value = match value {
                    Some(n) => SVal::int(i128::from(*n)),
                    // Variably sized: the size is only known at run time.
                    None => self.symbols.conjure_value(&expr.ty),
                };
                vec![(state, value.with_provenance(Provenance::SizeOf))]
            }
            ExprKind::OffsetOf { value, .. } => {
                let value = match value {
                    Some(n) => SVal::int(i128::from(*n)),
                    None => self.symbols.conjure_value(&expr.ty),
                };
                vec![(state, value.with_provenance(Provenance::OffsetOf))]
            }
            ExprKind::AlignOf { value, .. } => {
                let value = value.map_or_else(SVal::unknown, |n| SVal::int(i128::from(n)));
                vec![(state, value)]
            }
            ExprKind::Paren(inner) => self.eval(frame, inner, state),
            ExprKind::Cast { kind, operand } => match kind {
                CastKind::ArrayToPointer => self.eval_lvalue(frame, operand, state),
                CastKind::FunctionToPointer => vec![(state, SVal::unknown())],
                CastKind::Implicit | CastKind::Explicit => {
                    let builder = self.builder();
                    self.eval(frame, operand, state)
                        .into_iter()
                        .map(|(state, value)| (state, builder.cast(value, &expr.ty)))
                        .collect()
                }
            },
            ExprKind::DeclRef(_) | ExprKind::Member { .. } | ExprKind::Subscript { .. } => {
                self.load_lvalue(frame, expr, state)
            }
            ExprKind::Unary { op, operand } => self.eval_unary(frame, expr, *op, operand, state),
            ExprKind::Binary(bin) => self.eval_binary(frame, expr, bin, state),
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let mut out = Vec::new();
                for (state, value) in self.eval(frame, cond, state) {
                    if let Some(taken) = state.assume(&value, true) {
                        out.extend(self.eval(frame, then, taken));
                    }
                    if let Some(not_taken) = state.assume(&value, false) {
                        out.extend(self.eval(frame, otherwise, not_taken));
                    }
                }
                out
            }
            ExprKind::Call { callee, args } => self.eval_call(frame, expr, callee.as_deref(), args, state),
        }
    }

    fn load_lvalue(&mut self, frame: Frame, expr: &'a Expr, state: StateRef) -> Paths {
        let paths = self.eval_lvalue(frame, expr, state);
        // Arrays and functions decay; an aggregate's value is its location.
        if matches!(expr.ty, CType::Array(..) | CType::Function { .. } | CType::Record(_)) {
            return paths;
        }
        paths
            .into_iter()
            .map(|(state, loc)| {
                let value = self.load(&state, &loc, &expr.ty);
                (state, value)
            })
            .collect()
    }

    /// Evaluate `expr` to the location it designates.
    fn eval_lvalue(&mut self, frame: Frame, expr: &'a Expr, state: StateRef) -> Paths {
        if !self.tick() {
            return Vec::new();
        }
        match &expr.kind {
            ExprKind::DeclRef(var) => vec![(state, SVal::loc(self.var_region(frame, *var), 0))],
            ExprKind::StringLiteral(_) => vec![(state, SVal::loc(MemRegion::String(expr.id), 0))],
            ExprKind::Paren(inner) => self.eval_lvalue(frame, inner, state),
            ExprKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => self.eval_pointee(frame, operand, state),
            ExprKind::Member { base, field, arrow } => {
                let (bases, record_ty) = if *arrow {
                    (
                        self.eval_pointee(frame, base, state),
                        base.ty.pointee().cloned().unwrap_or(CType::Unknown),
                    )
                } else {
                    (self.eval_lvalue(frame, base, state), base.ty.clone())
                };
                let offset = self.tu.types.field_offset(&record_ty, field).ok();
                bases
                    .into_iter()
                    .map(|(state, loc)| {
                        let loc = match (loc.kind(), offset) {
                            (
                                SValKind::Loc {
                                    region,
                                    offset: LocOffset::Concrete(base_offset),
                                },
                                Some(field_offset),
                            ) => SVal::loc(region.clone(), base_offset + i128::from(field_offset)),
                            _ => SVal::unknown(),
                        };
                        (state, loc)
                    })
                    .collect()
            }
            ExprKind::Subscript { base, index } => {
                let builder = self.builder();
                let mut out = Vec::new();
                for (state, base_value) in self.eval(frame, base, state) {
                    for (state, index_value) in self.eval(frame, index, state) {
                        let ptr_ty = if base.ty.is_pointer() { &base.ty } else { &index.ty };
                        let loc = builder.eval_binop(
                            BinaryOp::Add,
                            (&base_value, &base.ty),
                            (&index_value, &index.ty),
                            ptr_ty,
                        );
                        out.push((state, loc.with_provenance(Provenance::None)));
                    }
                }
                out
            }
            _ => self.eval(frame, expr, state),
        }
    }

    /// Evaluate a pointer operand and turn it into the pointee's location.
    /// Paths dereferencing a known null pointer end here.
    fn eval_pointee(&mut self, frame: Frame, pointer: &'a Expr, state: StateRef) -> Paths {
        let mut out = Vec::new();
        for (state, value) in self.eval(frame, pointer, state) {
            match self.as_location(value, &pointer.ty) {
                Some(loc) => out.push((state, loc)),
                None => trace_event!(trace, row = pointer.span.start.row, "null dereference ends path"),
            }
        }
        out
    }

    fn eval_unary(
        &mut self,
        frame: Frame,
        expr: &'a Expr,
        op: UnaryOp,
        operand: &'a Expr,
        state: StateRef,
    ) -> Paths {
        match op {
            UnaryOp::AddrOf => self.eval_lvalue(frame, operand, state),
            UnaryOp::Deref => self.load_lvalue(frame, expr, state),
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let builder = self.builder();
                let step_op = if matches!(op, UnaryOp::PreInc | UnaryOp::PostInc) {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                let one_ty = CType::Int(crate::types::IntKind::Int);
                let mut out = Vec::new();
                for (state, loc) in self.eval_lvalue(frame, operand, state) {
                    let old = self.load(&state, &loc, &operand.ty);
                    let new = builder.eval_binop(
                        step_op,
                        (&old, &operand.ty),
                        (&SVal::int(1), &one_ty),
                        &operand.ty,
                    );
                    let new = if operand.ty.is_pointer() {
                        new
                    } else {
                        builder.cast(new, &operand.ty)
                    };
                    let state = self.store(&state, &loc, new.clone(), &operand.ty);
                    let result = if matches!(op, UnaryOp::PostInc | UnaryOp::PostDec) {
                        old
                    } else {
                        new
                    };
                    out.push((state, result));
                }
                out
            }
            UnaryOp::Neg | UnaryOp::Plus | UnaryOp::Not | UnaryOp::BitNot => {
                let builder = self.builder();
                self.eval(frame, operand, state)
                    .into_iter()
                    .map(|(state, value)| (state, builder.eval_unary(op, &value, &expr.ty)))
                    .collect()
            }
        }
    }

    fn eval_binary(&mut self, frame: Frame, expr: &'a Expr, bin: &'a BinaryExpr, state: StateRef) -> Paths {
        let builder = self.builder();
        let mut out = Vec::new();

        match bin.op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let short_circuit = bin.op == BinaryOp::LogicalOr;
                for (state, lhs) in self.eval(frame, &bin.lhs, state) {
                    if let Some(done) = state.assume(&lhs, short_circuit) {
                        out.push((done, SVal::int(i128::from(short_circuit))));
                    }
                    let Some(rest) = state.assume(&lhs, !short_circuit) else {
                        continue;
                    };
                    for (state, rhs) in self.eval(frame, &bin.rhs, rest) {
                        if let Some(t) = state.assume(&rhs, true) {
                            out.push((t, SVal::int(1)));
                        }
                        if let Some(f) = state.assume(&rhs, false) {
                            out.push((f, SVal::int(0)));
                        }
                    }
                }
            }
            BinaryOp::Assign => {
                for (state, loc) in self.eval_lvalue(frame, &bin.lhs, state) {
                    for (state, value) in self.eval(frame, &bin.rhs, state) {
                        let state = state.bind_expr(frame.id, bin.lhs.id, loc.clone());
                        let Some(state) = self.run_pre_binary(frame, expr, bin, state) else {
                            continue;
                        };
                        let state = self.store(&state, &loc, value.clone(), &bin.lhs.ty);
                        out.push((state, value));
                    }
                }
            }
            op => match op.compound_base() {
                Some(base_op) => {
                    for (state, loc) in self.eval_lvalue(frame, &bin.lhs, state) {
                        for (state, rhs) in self.eval(frame, &bin.rhs, state) {
                            let old = self.load(&state, &loc, &bin.lhs.ty);
                            let state = state.bind_expr(frame.id, bin.lhs.id, old.clone());
                            let Some(state) = self.run_pre_binary(frame, expr, bin, state) else {
                                continue;
                            };
                            let new = builder.eval_binop(
                                base_op,
                                (&old, &bin.lhs.ty),
                                (&rhs, &bin.rhs.ty),
                                &bin.lhs.ty,
                            );
                            let new = if bin.lhs.ty.is_pointer() {
                                new
                            } else {
                                builder.cast(new, &bin.lhs.ty)
                            };
                            let state = self.store(&state, &loc, new.clone(), &bin.lhs.ty);
                            out.push((state, new));
                        }
                    }
                }
                None => {
                    for (state, lhs) in self.eval(frame, &bin.lhs, state) {
                        for (state, rhs) in self.eval(frame, &bin.rhs, state) {
                            let Some(state) = self.run_pre_binary(frame, expr, bin, state) else {
                                continue;
                            };
                            let value = if op == BinaryOp::Comma {
                                rhs
                            } else {
                                builder.eval_binop(op, (&lhs, &bin.lhs.ty), (&rhs, &bin.rhs.ty), &expr.ty)
                            };
                            out.push((state, value));
                        }
                    }
                }
            },
        }
        out
    }

    /// Run the pre-binary checker callbacks. Returns `None` when an equal
    /// node was already explored, which ends this path.
    fn run_pre_binary(
        &mut self,
        frame: Frame,
        expr: &'a Expr,
        bin: &'a BinaryExpr,
        state: StateRef,
    ) -> Option<StateRef> {
        let point = ProgramPoint::pre_expr(frame.id, expr.id);
        let Some(pred) = self.graph.add_node(point, state.clone(), expr.span, None) else {
            trace_event!(trace, row = expr.span.start.row, "path caches out");
            return None;
        };

        let checkers = self.checkers;
        for checker in checkers {
            let mut ctx = CheckerContext {
                graph: &mut self.graph,
                reporter: &mut *self.reporter,
                types: &self.tu.types,
                state: state.clone(),
                frame: frame.id,
                point,
                pred,
                span: expr.span,
                tag: checker.descriptor().name,
                entry: self.entry,
            };
            checker.check_pre_binary(bin, &mut ctx);
        }
        Some(state)
    }

    fn eval_call(
        &mut self,
        frame: Frame,
        expr: &'a Expr,
        callee: Option<&'a str>,
        args: &'a [Expr],
        state: StateRef,
    ) -> Paths {
        let mut evaluated: Vec<(StateRef, Vec<SVal>)> = vec![(state, Vec::new())];
        for arg in args {
            let mut next = Vec::new();
            for (state, values) in evaluated {
                for (state, value) in self.eval(frame, arg, state) {
                    let mut values = values.clone();
                    values.push(value);
                    next.push((state, values));
                }
            }
            evaluated = next;
        }

        let tu = self.tu;
        let definition = callee.and_then(|name| tu.function(name));
        let mut out = Vec::new();
        for (state, values) in evaluated {
            match definition {
                Some(function) if self.can_inline(function, frame) => {
                    out.extend(self.inline_call(frame, function, state, values));
                }
                _ => out.push(self.conjure_call_result(expr, state, args, &values)),
            }
        }
        out
    }

    fn can_inline(&self, function: &FunctionDecl, frame: Frame) -> bool {
        frame.depth < self.options.max_inline_depth
            && !self.call_stack.contains(&function.name.as_str())
    }

    fn inline_call(
        &mut self,
        caller: Frame,
        function: &'a FunctionDecl,
        state: StateRef,
        args: Vec<SVal>,
    ) -> Paths {
        let Some(body) = function.body.as_ref() else {
            return Vec::new();
        };
        let callee = self.new_frame(caller.depth + 1);
        let builder = self.builder();

        let tu = self.tu;
        let mut state = state;
        let mut args = args.into_iter();
        for &param in &function.params {
            let ty = &tu.var(param).ty;
            let value = match args.next() {
                Some(value) => builder.cast(value, ty),
                None => self.symbols.conjure_value(ty),
            };
            state = self.bind_var(callee, param, value, &state);
        }

        trace_event!(trace, callee = %function.name, depth = callee.depth, "inlining call");
        self.call_stack.push(&function.name);
        let outcomes = self.exec_stmt(callee, body, state);
        self.call_stack.pop();

        outcomes
            .into_iter()
            .map(|(state, flow)| {
                let value = match flow {
                    Flow::Return(value) => value,
                    _ if function.ret.is_void() => SVal::unknown(),
                    _ => SVal::undefined(),
                };
                // A returned aggregate lives on in the callee's object.
                let kept = match (value.kind(), &function.ret) {
                    (SValKind::Loc { region, .. }, CType::Record(_)) => Some(region.clone()),
                    _ => None,
                };
                (state.pop_frame(callee.id, kept.as_ref()), value)
            })
            .collect()
    }

    /// Result of a call whose body is not analysed: a fresh symbol, with
    /// every region reachable through a pointer argument invalidated.
    /// Aggregates passed by value are copies and stay untouched.
    fn conjure_call_result(
        &mut self,
        expr: &'a Expr,
        state: StateRef,
        arg_exprs: &[Expr],
        args: &[SVal],
    ) -> (StateRef, SVal) {
        let mut state = state;
        for (arg_expr, arg) in arg_exprs.iter().zip(args) {
            if let SValKind::Loc { region, .. } = arg.kind()
                && !matches!(region, MemRegion::String(_))
                && !matches!(arg_expr.ty, CType::Record(_))
            {
                state = state.invalidate_region(region, self.symbols.conjure());
            }
        }
        let value = self.symbols.conjure_value(&expr.ty);
        (state, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckerRegistry;
    use crate::parser::parse_source;
    use crate::sema::lower;

    fn lower_src(src: &str) -> TranslationUnit {
        let tree = parse_source(src).expect("parse");
        lower(&tree, src, Default::default()).expect("lower")
    }

    fn run(src: &str, options: AnalyzerOptions) -> Vec<FunctionStats> {
        let tu = lower_src(src);
        let registry = CheckerRegistry::new();
        let mut reporter = BugReporter::new();
        let mut engine = ExprEngine::new(&tu, registry.checkers(), &options, &mut reporter);
        tu.functions
            .iter()
            .filter(|f| f.body.is_some())
            .map(|f| engine.analyze_function(f))
            .collect()
    }

    #[test]
    fn branches_on_symbolic_conditions_fork() {
        let stats = run(
            "int f(int a) { int r = 0; if (a) { r = 1; } else { r = 2; } return r; }",
            AnalyzerOptions::default(),
        );
        assert_eq!(stats[0].paths, 2);
    }

    #[test]
    fn correlated_branches_prune_infeasible_paths() {
        let stats = run(
            "int f(int a) { int r = 0; if (a) r = 1; if (a) r = r + 1; else r = r + 2; return r; }",
            AnalyzerOptions::default(),
        );
        assert_eq!(stats[0].paths, 2);
    }

    #[test]
    fn loops_beyond_the_bound_are_dropped() {
        let src = "int f(void) { int i; for (i = 0; i < 10; i++) { } return i; }";
        let stats = run(src, AnalyzerOptions::default());
        assert_eq!(stats[0].paths, 0);

        let generous = AnalyzerOptions {
            loop_bound: 16,
            ..AnalyzerOptions::default()
        };
        assert_eq!(run(src, generous)[0].paths, 1);
    }

    #[test]
    fn step_budget_is_reported() {
        let options = AnalyzerOptions {
            max_steps: 3,
            ..AnalyzerOptions::default()
        };
        let stats = run("int f(int a) { int b = a + a + a + a; return b; }", options);
        assert!(stats[0].budget_exhausted);
        assert_eq!(stats[0].paths, 0);
    }
}
