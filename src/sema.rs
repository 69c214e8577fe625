//! Lowering from the tree-sitter C syntax tree to the typed [`crate::ast`].
//!
//! The lowering resolves declarations through lexical scopes, applies C
//! declarator rules, computes static types for every expression (including
//! array decay and the pointer-arithmetic result types) and folds `sizeof` /
//! `offsetof` to constants using the [`TypeContext`] layout. Constructs the
//! engine does not model lower to `Unsupported` nodes instead of failing.

use std::collections::HashMap;

use tree_sitter::{Node, Tree};

use crate::ast::{
    BinaryExpr, BinaryOp, CaseLabel, CastKind, Expr, ExprId, ExprKind, FunctionDecl, InitItem,
    LocalDecl, Stmt, StmtKind, Storage, SwitchCase, TranslationUnit, UnaryOp, VarDecl, VarId,
};
use crate::diagnostics::Span;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::parser::{count_error_nodes, node_text};
use crate::trace_event;
use crate::types::{
    ArraySize, CType, FieldDecl, FloatKind, IntKind, RecordDecl, RecordId, RecordKind,
    TargetLayout, TypeContext,
};

/// Cells an initialiser zero-fills at most; larger objects keep the rest unbound.
const MAX_ZERO_CELLS: usize = 256;

#[derive(Debug, Clone)]
enum Symbol {
    Var(VarId),
    Function(CType),
    Typedef(CType),
    EnumConst(i128),
}

/// Lower a parsed translation unit.
pub fn lower(tree: &Tree, source: &str, target: TargetLayout) -> AnalyzerResult<TranslationUnit> {
    crate::analyzer_ensure!(
        matches!(target.pointer_width, 4 | 8),
        "unsupported pointer width {}",
        target.pointer_width
    );
    let root = tree.root_node();
    if root.kind() != "translation_unit" {
        return Err(AnalyzerError::parse(format!(
            "unexpected root node `{}`",
            root.kind()
        )));
    }

    let errors = count_error_nodes(root);
    if errors > 0 {
        trace_event!(debug, errors, "source has syntax errors; lowering the parsed parts");
    }

    let mut lowerer = Lowerer::new(source, target);
    lowerer.lower_items(root);
    Ok(lowerer.finish())
}

struct Declared<'t> {
    name: Option<String>,
    ty: CType,
    params: Option<Node<'t>>,
}

struct Lowerer<'src> {
    source: &'src str,
    types: TypeContext,
    scopes: Vec<HashMap<String, Symbol>>,
    tags: Vec<HashMap<String, RecordId>>,
    vars: Vec<VarDecl>,
    globals: Vec<LocalDecl>,
    functions: Vec<FunctionDecl>,
    current_ret: Option<CType>,
    next_expr: u32,
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

fn span_of(node: Node<'_>) -> Span {
    Span::from_range(node.range())
}

impl<'src> Lowerer<'src> {
    fn new(source: &'src str, target: TargetLayout) -> Self {
        Self {
            source,
            types: TypeContext::new(target),
            scopes: vec![HashMap::new()],
            tags: vec![HashMap::new()],
            vars: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            current_ret: None,
            next_expr: 0,
        }
    }

    fn finish(self) -> TranslationUnit {
        TranslationUnit {
            types: self.types,
            vars: self.vars,
            globals: self.globals,
            functions: self.functions,
        }
    }

    fn text(&self, node: Node<'_>) -> &'src str {
        node_text(node, self.source)
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
        self.tags.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
        self.tags.pop();
    }

    fn declare(&mut self, name: &str, symbol: Symbol) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), symbol);
        }
    }

    fn declare_global(&mut self, name: &str, symbol: Symbol) {
        self.scopes[0].insert(name.to_string(), symbol);
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn lookup_typedef(&self, name: &str) -> Option<CType> {
        match self.lookup(name) {
            Some(Symbol::Typedef(ty)) => Some(ty.clone()),
            _ => None,
        }
    }

    fn lookup_tag(&self, name: &str) -> Option<RecordId> {
        self.tags.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn new_var(&mut self, name: &str, ty: CType, storage: Storage, span: Span) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarDecl {
            id,
            name: name.to_string(),
            ty,
            storage,
            span,
        });
        self.declare(name, Symbol::Var(id));
        id
    }

    // ------------------------------------------------------------------
    // Top-level items
    // ------------------------------------------------------------------

    fn lower_items(&mut self, node: Node<'_>) {
        for child in named_children(node) {
            match child.kind() {
                "function_definition" => self.lower_function(child),
                "declaration" => {
                    let decls = self.lower_declaration(child, Storage::Global);
                    self.globals.extend(decls);
                }
                "type_definition" => self.lower_typedef(child),
                "struct_specifier" | "union_specifier" | "enum_specifier" => {
                    self.resolve_type_specifier(child);
                }
                "preproc_if" | "preproc_ifdef" | "preproc_else" | "preproc_elif"
                | "linkage_specification" | "declaration_list" => self.lower_items(child),
                "ERROR" => {
                    trace_event!(trace, row = child.start_position().row + 1, "skipping ERROR node");
                }
                _ => {}
            }
        }
    }

    fn lower_function(&mut self, node: Node<'_>) {
        let base = self.declaration_base_type(node);
        let declared = self.apply_declarator(node.child_by_field_name("declarator"), base);
        let Some(name) = declared.name else {
            return;
        };
        let CType::Function { ret, .. } = &declared.ty else {
            return;
        };
        let ret = (**ret).clone();
        self.declare_global(&name, Symbol::Function(declared.ty.clone()));

        self.push_scope();
        let params = declared
            .params
            .map(|list| self.declare_params(list))
            .unwrap_or_default();
        self.current_ret = Some(ret.clone());
        let body = node
            .child_by_field_name("body")
            .map(|body| self.lower_stmt(body));
        self.current_ret = None;
        self.pop_scope();

        self.functions.push(FunctionDecl {
            name,
            ret,
            params,
            body,
            span: span_of(node),
        });
    }

    fn declare_params(&mut self, list: Node<'_>) -> Vec<VarId> {
        let mut params = Vec::new();
        for param in named_children(list) {
            if param.kind() != "parameter_declaration" {
                continue;
            }
            let base = self.declaration_base_type(param);
            let declared = self.apply_declarator(param.child_by_field_name("declarator"), base);
            if let Some(name) = declared.name {
                let ty = adjust_param_type(declared.ty);
                params.push(self.new_var(&name, ty, Storage::Param, span_of(param)));
            }
        }
        params
    }

    fn lower_typedef(&mut self, node: Node<'_>) {
        let base = self.declaration_base_type(node);
        for declarator in field_children(node, "declarator") {
            let declared = self.apply_declarator(Some(declarator), base.clone());
            if let Some(name) = declared.name {
                self.declare(&name, Symbol::Typedef(declared.ty));
            }
        }
    }

    /// Variables declared by a `declaration` node, with their initialisers.
    fn lower_declaration(&mut self, node: Node<'_>, storage: Storage) -> Vec<LocalDecl> {
        let base = self.declaration_base_type(node);
        let mut decls = Vec::new();

        for declarator in field_children(node, "declarator") {
            let (target, value) = if declarator.kind() == "init_declarator" {
                (
                    declarator.child_by_field_name("declarator"),
                    declarator.child_by_field_name("value"),
                )
            } else {
                (Some(declarator), None)
            };

            let declared = self.apply_declarator(target, base.clone());
            let Some(name) = declared.name else {
                continue;
            };
            if matches!(declared.ty, CType::Function { .. }) {
                self.declare_global(&name, Symbol::Function(declared.ty));
                continue;
            }

            let var = self.new_var(&name, declared.ty.clone(), storage, span_of(declarator));
            let init = value.map(|value| {
                if value.kind() == "initializer_list" {
                    self.lower_init_list(value, &declared.ty)
                } else {
                    let expr = self.lower_expr(value);
                    self.implicit_cast(expr, &declared.ty)
                }
            });
            decls.push(LocalDecl { var, init });
        }

        decls
    }

    // ------------------------------------------------------------------
    // Types and declarators
    // ------------------------------------------------------------------

    fn declaration_base_type(&mut self, node: Node<'_>) -> CType {
        match node.child_by_field_name("type") {
            Some(spec) => self.resolve_type_specifier(spec),
            None => CType::Int(IntKind::Int),
        }
    }

    fn resolve_type_specifier(&mut self, node: Node<'_>) -> CType {
        match node.kind() {
            "primitive_type" => primitive_type(self.text(node), &self.types.target),
            "sized_type_specifier" => sized_type(self.text(node)),
            "type_identifier" => {
                let name = self.text(node);
                if let Some(ty) = self.lookup_typedef(name) {
                    return ty;
                }
                // `_Bool` and the fixed-width names parse as identifiers.
                match primitive_type(name, &self.types.target) {
                    CType::Unknown => {
                        trace_event!(trace, name, "unknown type name");
                        CType::Unknown
                    }
                    ty => ty,
                }
            }
            "struct_specifier" => self.resolve_record(node, RecordKind::Struct),
            "union_specifier" => self.resolve_record(node, RecordKind::Union),
            "enum_specifier" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.lower_enumerators(body);
                }
                CType::Enum
            }
            _ => CType::Unknown,
        }
    }

    fn resolve_record(&mut self, node: Node<'_>, kind: RecordKind) -> CType {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string());
        let body = node.child_by_field_name("body");

        let id = match name.as_deref() {
            Some(n) if body.is_some() => {
                // A definition completes a forward declaration from the same scope.
                let forward = self
                    .tags
                    .last()
                    .and_then(|scope| scope.get(n).copied())
                    .filter(|id| self.types.record(*id).fields.is_none());
                match forward {
                    Some(id) => id,
                    None => self.declare_tag(Some(n.to_string()), kind),
                }
            }
            Some(n) => match self.lookup_tag(n) {
                Some(id) => id,
                None => self.declare_tag(Some(n.to_string()), kind),
            },
            None => self.declare_tag(None, kind),
        };

        if let Some(body) = body {
            let fields = self.lower_fields(body);
            self.types.complete_record(id, fields);
        }
        CType::Record(id)
    }

    fn declare_tag(&mut self, name: Option<String>, kind: RecordKind) -> RecordId {
        let id = self.types.add_record(RecordDecl {
            name: name.clone(),
            kind,
            fields: None,
        });
        if let (Some(name), Some(scope)) = (name, self.tags.last_mut()) {
            scope.insert(name, id);
        }
        id
    }

    fn lower_fields(&mut self, body: Node<'_>) -> Vec<FieldDecl> {
        let mut fields = Vec::new();
        for member in named_children(body) {
            if member.kind() != "field_declaration" {
                continue;
            }
            let base = self.declaration_base_type(member);
            let declarators = field_children(member, "declarator");
            if declarators.is_empty() {
                // Anonymous struct/union member: keeps the layout right.
                fields.push(FieldDecl {
                    name: String::new(),
                    ty: base,
                });
                continue;
            }
            for declarator in declarators {
                let declared = self.apply_declarator(Some(declarator), base.clone());
                fields.push(FieldDecl {
                    name: declared.name.unwrap_or_default(),
                    ty: declared.ty,
                });
            }
        }
        fields
    }

    fn lower_enumerators(&mut self, body: Node<'_>) {
        let mut next = 0i128;
        for enumerator in named_children(body) {
            if enumerator.kind() != "enumerator" {
                continue;
            }
            let Some(name) = enumerator.child_by_field_name("name") else {
                continue;
            };
            let name = self.text(name).to_string();
            if let Some(value) = enumerator.child_by_field_name("value") {
                let expr = self.lower_expr(value);
                next = fold(&expr).unwrap_or(next);
            }
            self.declare(&name, Symbol::EnumConst(next));
            next += 1;
        }
    }

    /// Apply a (possibly abstract) declarator to `base`, outermost first.
    fn apply_declarator<'t>(&mut self, node: Option<Node<'t>>, base: CType) -> Declared<'t> {
        let Some(node) = node else {
            return Declared {
                name: None,
                ty: base,
                params: None,
            };
        };

        match node.kind() {
            "identifier" | "field_identifier" | "type_identifier" => Declared {
                name: Some(self.text(node).to_string()),
                ty: base,
                params: None,
            },
            "pointer_declarator" | "abstract_pointer_declarator" => {
                self.apply_declarator(node.child_by_field_name("declarator"), CType::pointer_to(base))
            }
            "array_declarator" | "abstract_array_declarator" => {
                let size = self.array_size(node.child_by_field_name("size"));
                self.apply_declarator(
                    node.child_by_field_name("declarator"),
                    CType::Array(Box::new(base), size),
                )
            }
            "function_declarator" | "abstract_function_declarator" => {
                let params_node = node.child_by_field_name("parameters");
                let (params, variadic) = params_node
                    .map(|list| self.param_types(list))
                    .unwrap_or_default();
                let ty = CType::Function {
                    ret: Box::new(base),
                    params,
                    variadic,
                };
                let mut declared = self.apply_declarator(node.child_by_field_name("declarator"), ty);
                if declared.params.is_none() {
                    declared.params = params_node;
                }
                declared
            }
            "init_declarator" => self.apply_declarator(node.child_by_field_name("declarator"), base),
            "parenthesized_declarator" | "attributed_declarator" | "abstract_parenthesized_declarator" => {
                let inner = named_children(node)
                    .into_iter()
                    .find(|child| !child.kind().contains("attribute"));
                self.apply_declarator(inner, base)
            }
            _ => Declared {
                name: None,
                ty: base,
                params: None,
            },
        }
    }

    fn array_size(&mut self, size: Option<Node<'_>>) -> ArraySize {
        let Some(size) = size else {
            return ArraySize::Incomplete;
        };
        if self.text(size).trim() == "*" {
            return ArraySize::Variable;
        }
        let expr = self.lower_expr(size);
        match fold(&expr) {
            Some(n) if n >= 0 => ArraySize::Constant(n as u64),
            _ => ArraySize::Variable,
        }
    }

    fn param_types(&mut self, list: Node<'_>) -> (Vec<CType>, bool) {
        let mut params = Vec::new();
        let mut variadic = false;
        for param in named_children(list) {
            match param.kind() {
                "parameter_declaration" => {
                    let base = self.declaration_base_type(param);
                    let declared =
                        self.apply_declarator(param.child_by_field_name("declarator"), base);
                    params.push(adjust_param_type(declared.ty));
                }
                "variadic_parameter" => variadic = true,
                _ => {}
            }
        }
        if self.text(list).contains("...") {
            variadic = true;
        }
        // `f(void)` declares no parameters.
        if params.len() == 1 && params[0].is_void() {
            params.clear();
        }
        (params, variadic)
    }

    fn resolve_type_descriptor(&mut self, node: Node<'_>) -> CType {
        let base = self.declaration_base_type(node);
        self.apply_declarator(node.child_by_field_name("declarator"), base).ty
    }

    /// `sizeof(x)` may parse as a type descriptor naming `x`; resolve it to
    /// the variable's type when `x` is a variable in scope.
    fn type_descriptor_as_variable(&self, node: Node<'_>) -> Option<CType> {
        if node.child_by_field_name("declarator").is_some() {
            return None;
        }
        let spec = node.child_by_field_name("type")?;
        if spec.kind() != "type_identifier" {
            return None;
        }
        match self.lookup(self.text(spec)) {
            Some(Symbol::Var(id)) => Some(self.vars[id.0 as usize].ty.clone()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_stmt(&mut self, node: Node<'_>) -> Stmt {
        let span = span_of(node);
        let kind = match node.kind() {
            "compound_statement" => {
                self.push_scope();
                let stmts = named_children(node)
                    .into_iter()
                    .map(|child| self.lower_stmt(child))
                    .collect();
                self.pop_scope();
                StmtKind::Compound(stmts)
            }
            "declaration" => StmtKind::Decl(self.lower_declaration(node, Storage::Local)),
            "expression_statement" => match named_children(node).first() {
                Some(expr) => StmtKind::Expr(self.lower_expr(*expr)),
                None => StmtKind::Empty,
            },
            "if_statement" => {
                let cond = self.lower_condition(node);
                let then = Box::new(self.lower_child_stmt(node, "consequence"));
                let otherwise = node.child_by_field_name("alternative").map(|alt| {
                    let alt = if alt.kind() == "else_clause" {
                        named_children(alt).first().copied().unwrap_or(alt)
                    } else {
                        alt
                    };
                    Box::new(self.lower_stmt(alt))
                });
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            "while_statement" => {
                let cond = self.lower_condition(node);
                let body = Box::new(self.lower_child_stmt(node, "body"));
                StmtKind::While { cond, body }
            }
            "do_statement" => {
                let body = Box::new(self.lower_child_stmt(node, "body"));
                let cond = self.lower_condition(node);
                StmtKind::DoWhile { body, cond }
            }
            "for_statement" => {
                self.push_scope();
                let init = node.child_by_field_name("initializer").map(|init| {
                    if init.kind() == "declaration" {
                        Box::new(Stmt {
                            kind: StmtKind::Decl(self.lower_declaration(init, Storage::Local)),
                            span: span_of(init),
                        })
                    } else {
                        Box::new(Stmt {
                            kind: StmtKind::Expr(self.lower_expr(init)),
                            span: span_of(init),
                        })
                    }
                });
                let cond = node
                    .child_by_field_name("condition")
                    .map(|c| self.lower_expr(c));
                let step = node
                    .child_by_field_name("update")
                    .map(|u| self.lower_expr(u));
                let body = Box::new(self.lower_child_stmt(node, "body"));
                self.pop_scope();
                StmtKind::For {
                    init,
                    cond,
                    step,
                    body,
                }
            }
            "return_statement" => {
                let value = named_children(node).first().map(|value| {
                    let expr = self.lower_expr(*value);
                    match self.current_ret.clone() {
                        Some(ret) => self.implicit_cast(expr, &ret),
                        None => expr,
                    }
                });
                StmtKind::Return(value)
            }
            "switch_statement" => {
                let cond = self.lower_condition(node);
                let (body, cases) = match node.child_by_field_name("body") {
                    Some(body) => self.lower_switch_body(body),
                    None => (Vec::new(), Vec::new()),
                };
                StmtKind::Switch { cond, body, cases }
            }
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            "labeled_statement" => {
                return match named_children(node).last() {
                    Some(inner) if inner.kind() != "statement_identifier" => self.lower_stmt(*inner),
                    _ => Stmt {
                        kind: StmtKind::Empty,
                        span,
                    },
                };
            }
            "type_definition" => {
                self.lower_typedef(node);
                StmtKind::Empty
            }
            "struct_specifier" | "union_specifier" | "enum_specifier" => {
                self.resolve_type_specifier(node);
                StmtKind::Empty
            }
            other => StmtKind::Unsupported(other.to_string()),
        };
        Stmt { kind, span }
    }

    /// Flatten a switch body into one statement list and the position of
    /// each `case`/`default` label in it.
    fn lower_switch_body(&mut self, body: Node<'_>) -> (Vec<Stmt>, Vec<SwitchCase>) {
        let children = if body.kind() == "compound_statement" {
            named_children(body)
        } else {
            vec![body]
        };

        self.push_scope();
        let mut stmts = Vec::new();
        let mut cases = Vec::new();
        for child in children {
            if child.kind() != "case_statement" {
                stmts.push(self.lower_stmt(child));
                continue;
            }
            let value = child.child_by_field_name("value");
            let label = match value {
                Some(value) => {
                    let expr = self.lower_expr(value);
                    fold(&expr).map_or(CaseLabel::Unknown, CaseLabel::Value)
                }
                None => CaseLabel::Default,
            };
            cases.push(SwitchCase {
                label,
                start: stmts.len(),
            });
            for stmt in named_children(child) {
                if Some(stmt) != value {
                    stmts.push(self.lower_stmt(stmt));
                }
            }
        }
        self.pop_scope();
        (stmts, cases)
    }

    fn lower_child_stmt(&mut self, node: Node<'_>, field: &str) -> Stmt {
        match node.child_by_field_name(field) {
            Some(child) => self.lower_stmt(child),
            None => Stmt {
                kind: StmtKind::Empty,
                span: span_of(node),
            },
        }
    }

    fn lower_condition(&mut self, node: Node<'_>) -> Expr {
        match node.child_by_field_name("condition") {
            Some(cond) if cond.kind() == "condition_clause" => {
                let inner = cond
                    .child_by_field_name("value")
                    .or_else(|| named_children(cond).first().copied());
                self.lower_opt_expr(inner, cond)
            }
            other => self.lower_opt_expr(other, node),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    // ------------------------------------------------------------------
    // Initialisers
    // ------------------------------------------------------------------

    /// Lower a brace initialiser for an object of type `ty` to the list of
    /// cells it writes, zeros included.
    fn lower_init_list(&mut self, node: Node<'_>, ty: &CType) -> Expr {
        let mut items = Vec::new();
        self.flatten_init_list(node, ty, 0, &mut items);

        let mut cells = Vec::new();
        self.scalar_cells(ty, 0, &mut cells);
        let span = span_of(node);
        for (cell_ty, offset) in cells {
            if !self.covers(&items, offset) {
                let zero = self.mk(ExprKind::IntLiteral(0), cell_ty, span);
                items.push(InitItem {
                    offset,
                    value: zero,
                });
            }
        }
        self.mk(ExprKind::InitList(items), ty.clone(), span)
    }

    fn flatten_init_list(&mut self, list: Node<'_>, ty: &CType, base: u64, items: &mut Vec<InitItem>) {
        let mut next = 0usize;
        for child in named_children(list) {
            let (slot, value) = if child.kind() == "initializer_pair" {
                let mut slot = Some((ty.clone(), base));
                for (depth, designator) in field_children(child, "designator").into_iter().enumerate() {
                    let Some((outer, outer_base)) = slot else {
                        break;
                    };
                    slot = self
                        .designated_slot(&outer, outer_base, designator)
                        .map(|(inner, offset, index)| {
                            if depth == 0 {
                                next = index + 1;
                            }
                            (inner, offset)
                        });
                }
                (slot, child.child_by_field_name("value"))
            } else {
                let slot = self.positional_slot(ty, base, next);
                next += 1;
                (slot, Some(child))
            };
            if let (Some((slot_ty, offset)), Some(value)) = (slot, value) {
                self.init_slot(value, &slot_ty, offset, items);
            }
        }
    }

    fn init_slot(&mut self, value: Node<'_>, ty: &CType, offset: u64, items: &mut Vec<InitItem>) {
        if value.kind() == "initializer_list" {
            self.flatten_init_list(value, ty, offset, items);
            return;
        }
        let expr = self.lower_expr(value);
        let (ty, offset) = if is_aggregate(ty) && expr.ty != *ty {
            // Elided braces: a scalar starts the sub-object.
            if !expr.ty.is_arithmetic() {
                return;
            }
            match self.first_scalar(ty, offset) {
                Some(slot) => slot,
                None => return,
            }
        } else {
            (ty.clone(), offset)
        };
        let value = self.implicit_cast(expr, &ty);
        items.push(InitItem { offset, value });
    }

    /// The `index`-th sub-object of `ty` in initialisation order.
    fn positional_slot(&self, ty: &CType, base: u64, index: usize) -> Option<(CType, u64)> {
        match ty {
            CType::Record(id) => {
                let decl = self.types.record(*id);
                if decl.kind == RecordKind::Union && index > 0 {
                    return None;
                }
                let field = decl.fields.as_ref()?.get(index)?;
                let offset = self.types.field_offset(ty, &field.name).ok()?;
                Some((field.ty.clone(), base + offset))
            }
            CType::Array(elem, size) => {
                let in_bounds = match size {
                    ArraySize::Constant(n) => (index as u64) < *n,
                    ArraySize::Incomplete => true,
                    _ => false,
                };
                let elem_size = self.types.size_in_chars(elem).ok()?;
                in_bounds.then(|| (elem.as_ref().clone(), base + index as u64 * elem_size))
            }
            _ => (index == 0).then(|| (ty.clone(), base)),
        }
    }

    /// Resolve one `.field` or `[index]` designator. Returns the sub-object
    /// and its position, from which positional initialisation continues.
    fn designated_slot(&mut self, ty: &CType, base: u64, designator: Node<'_>) -> Option<(CType, u64, usize)> {
        match designator.kind() {
            "field_designator" | "field_identifier" => {
                let name_node = if designator.kind() == "field_identifier" {
                    designator
                } else {
                    *named_children(designator).first()?
                };
                let name = self.text(name_node);
                let CType::Record(id) = ty else {
                    return None;
                };
                let index = self
                    .types
                    .record(*id)
                    .fields
                    .as_ref()?
                    .iter()
                    .position(|f| f.name == name)?;
                let field_ty = self.types.field_type(ty, name)?;
                let offset = self.types.field_offset(ty, name).ok()?;
                Some((field_ty, base + offset, index))
            }
            "subscript_designator" => {
                let index_node = *named_children(designator).first()?;
                let index = self.lower_expr(index_node);
                let index = usize::try_from(fold(&index)?).ok()?;
                let (elem, offset) = self.positional_slot(ty, base, index)?;
                Some((elem, offset, index))
            }
            _ => None,
        }
    }

    fn first_scalar(&self, ty: &CType, base: u64) -> Option<(CType, u64)> {
        let (inner, offset) = self.positional_slot(ty, base, 0)?;
        if is_aggregate(&inner) {
            self.first_scalar(&inner, offset)
        } else {
            Some((inner, offset))
        }
    }

    /// Scalar cells of `ty` in layout order; a union contributes its first
    /// member only.
    fn scalar_cells(&self, ty: &CType, base: u64, out: &mut Vec<(CType, u64)>) {
        if out.len() >= MAX_ZERO_CELLS {
            return;
        }
        match ty {
            CType::Record(_) | CType::Array(_, ArraySize::Constant(_)) => {
                let mut index = 0;
                while let Some((inner, offset)) = self.positional_slot(ty, base, index) {
                    self.scalar_cells(&inner, offset, out);
                    if out.len() >= MAX_ZERO_CELLS {
                        return;
                    }
                    index += 1;
                }
            }
            ty if ty.is_arithmetic() || ty.is_pointer() => out.push((ty.clone(), base)),
            _ => {}
        }
    }

    /// Whether an explicit item already writes the cell at `offset`.
    fn covers(&self, items: &[InitItem], offset: u64) -> bool {
        items.iter().any(|item| {
            let len = self.types.size_in_chars(&item.value.ty).unwrap_or(1).max(1);
            (item.offset..item.offset + len).contains(&offset)
        })
    }

    fn mk(&mut self, kind: ExprKind, ty: CType, span: Span) -> Expr {
        let id = ExprId(self.next_expr);
        self.next_expr += 1;
        Expr { id, kind, ty, span }
    }

    fn unsupported(&mut self, what: &str, node: Node<'_>) -> Expr {
        self.mk(
            ExprKind::Unsupported(what.to_string()),
            CType::Unknown,
            span_of(node),
        )
    }

    fn lower_opt_expr(&mut self, node: Option<Node<'_>>, parent: Node<'_>) -> Expr {
        match node {
            Some(node) => self.lower_expr(node),
            None => self.unsupported("missing operand", parent),
        }
    }

    fn lower_field(&mut self, node: Node<'_>, field: &str) -> Expr {
        let child = node.child_by_field_name(field);
        self.lower_opt_expr(child, node)
    }

    /// Array-to-pointer / function-to-pointer conversion for rvalue uses.
    fn decay(&mut self, expr: Expr) -> Expr {
        let kind = match expr.ty {
            CType::Array(..) => CastKind::ArrayToPointer,
            CType::Function { .. } => CastKind::FunctionToPointer,
            _ => return expr,
        };
        let ty = expr.ty.decay();
        let span = expr.span;
        self.mk(
            ExprKind::Cast {
                kind,
                operand: Box::new(expr),
            },
            ty,
            span,
        )
    }

    fn implicit_cast(&mut self, expr: Expr, to: &CType) -> Expr {
        let expr = self.decay(expr);
        let scalar = |ty: &CType| ty.is_arithmetic() || ty.is_pointer();
        if expr.ty == *to || !scalar(to) || !scalar(&expr.ty) {
            return expr;
        }
        let span = expr.span;
        self.mk(
            ExprKind::Cast {
                kind: CastKind::Implicit,
                operand: Box::new(expr),
            },
            to.clone(),
            span,
        )
    }

    fn lower_rvalue(&mut self, node: Node<'_>, field: &str) -> Expr {
        let expr = self.lower_field(node, field);
        self.decay(expr)
    }

    fn lower_expr(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        match node.kind() {
            "number_literal" => {
                let (kind, ty) = parse_number(self.text(node), &self.types.target);
                self.mk(kind, ty, span)
            }
            "char_literal" => {
                let value = char_value(self.text(node));
                self.mk(ExprKind::IntLiteral(value), CType::Int(IntKind::Int), span)
            }
            "string_literal" | "concatenated_string" | "raw_string_literal" => {
                let text = self.text(node).to_string();
                let len = string_len(&text);
                self.mk(
                    ExprKind::StringLiteral(text),
                    CType::Array(Box::new(CType::Int(IntKind::Char)), ArraySize::Constant(len + 1)),
                    span,
                )
            }
            "true" | "false" => {
                let value = i128::from(node.kind() == "true");
                self.mk(ExprKind::IntLiteral(value), CType::Int(IntKind::Bool), span)
            }
            "null" => self.mk(ExprKind::IntLiteral(0), CType::pointer_to(CType::Void), span),
            "identifier" => self.lower_identifier(node),
            "parenthesized_expression" => {
                let inner = named_children(node).first().copied();
                let inner = self.lower_opt_expr(inner, node);
                let ty = inner.ty.clone();
                self.mk(ExprKind::Paren(Box::new(inner)), ty, span)
            }
            "binary_expression" | "comma_expression" => self.lower_binary(node),
            "assignment_expression" => self.lower_assignment(node),
            "unary_expression" => self.lower_unary(node),
            "pointer_expression" => self.lower_pointer_expr(node),
            "update_expression" => self.lower_update(node),
            "cast_expression" => {
                let ty = match node.child_by_field_name("type") {
                    Some(t) => self.resolve_type_descriptor(t),
                    None => CType::Unknown,
                };
                let operand = self.lower_rvalue(node, "value");
                self.mk(
                    ExprKind::Cast {
                        kind: CastKind::Explicit,
                        operand: Box::new(operand),
                    },
                    ty,
                    span,
                )
            }
            "sizeof_expression" => self.lower_sizeof(node),
            "alignof_expression" => {
                let operand = match node.child_by_field_name("type") {
                    Some(t) => self.resolve_type_descriptor(t),
                    None => CType::Unknown,
                };
                let value = self.types.align_of(&operand).ok();
                let ty = self.types.target.size_type();
                self.mk(ExprKind::AlignOf { operand, value }, ty, span)
            }
            "offsetof_expression" => {
                let record = match node.child_by_field_name("type") {
                    Some(t) => self.resolve_type_descriptor(t),
                    None => CType::Unknown,
                };
                let member = node
                    .child_by_field_name("member")
                    .map(|m| self.text(m).to_string())
                    .unwrap_or_default();
                self.mk_offsetof(record, member, span)
            }
            "call_expression" => self.lower_call(node),
            "conditional_expression" => self.lower_conditional(node),
            "subscript_expression" => {
                let base = self.lower_rvalue(node, "argument");
                let index = match node.child_by_field_name("index") {
                    Some(index) => {
                        let index = self.lower_expr(index);
                        self.decay(index)
                    }
                    None => self.lower_rvalue(node, "indices"),
                };
                let ty = base
                    .ty
                    .pointee()
                    .or_else(|| index.ty.pointee())
                    .cloned()
                    .unwrap_or(CType::Unknown);
                self.mk(
                    ExprKind::Subscript {
                        base: Box::new(base),
                        index: Box::new(index),
                    },
                    ty,
                    span,
                )
            }
            "field_expression" => self.lower_member(node),
            other => {
                trace_event!(trace, kind = other, "unsupported expression");
                self.unsupported(other, node)
            }
        }
    }

    fn lower_identifier(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let name = self.text(node);
        match self.lookup(name).cloned() {
            Some(Symbol::Var(id)) => {
                let ty = self.vars[id.0 as usize].ty.clone();
                self.mk(ExprKind::DeclRef(id), ty, span)
            }
            Some(Symbol::EnumConst(value)) => {
                self.mk(ExprKind::IntLiteral(value), CType::Int(IntKind::Int), span)
            }
            Some(Symbol::Function(ty)) => self.mk(ExprKind::FunctionRef(name.to_string()), ty, span),
            Some(Symbol::Typedef(_)) => self.unsupported("type name in expression", node),
            None if name == "NULL" => {
                self.mk(ExprKind::IntLiteral(0), CType::pointer_to(CType::Void), span)
            }
            None => self.unsupported("undeclared identifier", node),
        }
    }

    fn operator_text(&self, node: Node<'_>) -> &'src str {
        node.child_by_field_name("operator")
            .map(|op| self.text(op))
            .unwrap_or(",")
    }

    fn lower_binary(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let Some(op) = BinaryOp::from_token(self.operator_text(node)) else {
            return self.unsupported("binary operator", node);
        };
        let lhs = self.lower_rvalue(node, "left");
        let rhs = self.lower_rvalue(node, "right");
        let ty = binary_result_type(op, &lhs.ty, &rhs.ty, &self.types.target);
        self.mk(
            ExprKind::Binary(BinaryExpr {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }),
            ty,
            span,
        )
    }

    fn lower_assignment(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let Some(op) = BinaryOp::from_token(self.operator_text(node)).filter(BinaryOp::is_assignment)
        else {
            return self.unsupported("assignment operator", node);
        };
        let lhs = self.lower_field(node, "left");
        let rhs = self.lower_rvalue(node, "right");
        let rhs = if op == BinaryOp::Assign {
            self.implicit_cast(rhs, &lhs.ty)
        } else {
            rhs
        };
        let ty = lhs.ty.clone();
        self.mk(
            ExprKind::Binary(BinaryExpr {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }),
            ty,
            span,
        )
    }

    fn lower_unary(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let op = match self.operator_text(node) {
            "-" => UnaryOp::Neg,
            "+" => UnaryOp::Plus,
            "!" => UnaryOp::Not,
            "~" => UnaryOp::BitNot,
            _ => return self.unsupported("unary operator", node),
        };
        let operand = self.lower_rvalue(node, "argument");
        let ty = match op {
            UnaryOp::Not => CType::Int(IntKind::Int),
            _ => CType::usual_arithmetic(&operand.ty, &operand.ty),
        };
        self.mk(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            span,
        )
    }

    fn lower_pointer_expr(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let (op, operand, ty) = match self.operator_text(node) {
            "*" => {
                let operand = self.lower_rvalue(node, "argument");
                let ty = operand.ty.pointee().cloned().unwrap_or(CType::Unknown);
                (UnaryOp::Deref, operand, ty)
            }
            "&" => {
                let operand = self.lower_field(node, "argument");
                let ty = CType::pointer_to(operand.ty.clone());
                (UnaryOp::AddrOf, operand, ty)
            }
            _ => return self.unsupported("pointer operator", node),
        };
        self.mk(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            span,
        )
    }

    fn lower_update(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let prefix = node
            .child(0)
            .is_some_and(|first| !first.is_named() && matches!(self.text(first), "++" | "--"));
        let op = match (self.operator_text(node), prefix) {
            ("++", true) => UnaryOp::PreInc,
            ("--", true) => UnaryOp::PreDec,
            ("++", false) => UnaryOp::PostInc,
            ("--", false) => UnaryOp::PostDec,
            _ => return self.unsupported("update operator", node),
        };
        let operand = self.lower_field(node, "argument");
        let ty = operand.ty.clone();
        self.mk(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            span,
        )
    }

    fn lower_sizeof(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let operand = if let Some(ty_node) = node.child_by_field_name("type") {
            match self.type_descriptor_as_variable(ty_node) {
                Some(var_ty) => var_ty,
                None => self.resolve_type_descriptor(ty_node),
            }
        } else if let Some(value) = node.child_by_field_name("value") {
            // The operand is not evaluated; only its type matters.
            self.lower_expr(value).ty
        } else {
            CType::Unknown
        };
        let value = self.types.size_in_chars(&operand).ok();
        let ty = self.types.target.size_type();
        self.mk(ExprKind::SizeOf { operand, value }, ty, span)
    }

    fn mk_offsetof(&mut self, record: CType, member: String, span: Span) -> Expr {
        let value = self.types.field_offset(&record, &member).ok();
        let ty = self.types.target.size_type();
        self.mk(
            ExprKind::OffsetOf {
                record,
                member,
                value,
            },
            ty,
            span,
        )
    }

    /// `offsetof(T, m)` spelled through a macro the grammar sees as a call.
    fn lower_offsetof_call(&mut self, node: Node<'_>, args: Option<Node<'_>>) -> Expr {
        let span = span_of(node);
        let text = args.map(|a| self.text(a)).unwrap_or("");
        let inner = text
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')');
        let Some((ty_text, member)) = inner.rsplit_once(',') else {
            return self.unsupported("offsetof", node);
        };
        let record = self.resolve_type_text(ty_text.trim());
        self.mk_offsetof(record, member.trim().to_string(), span)
    }

    fn resolve_type_text(&mut self, text: &str) -> CType {
        let words: Vec<&str> = text.split_whitespace().collect();
        match words.as_slice() {
            [keyword @ ("struct" | "union"), name] => match self.lookup_tag(name) {
                Some(id) => CType::Record(id),
                None => {
                    let kind = if *keyword == "struct" {
                        RecordKind::Struct
                    } else {
                        RecordKind::Union
                    };
                    CType::Record(self.declare_tag(Some((*name).to_string()), kind))
                }
            },
            [name] => self.lookup_typedef(name).unwrap_or(CType::Unknown),
            _ => CType::Unknown,
        }
    }

    fn lower_call(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let function = node.child_by_field_name("function");
        let args_node = node.child_by_field_name("arguments");

        let callee_name = function
            .filter(|f| f.kind() == "identifier")
            .map(|f| self.text(f));
        if let Some("offsetof" | "__builtin_offsetof") = callee_name {
            if self.lookup("offsetof").is_none() {
                return self.lower_offsetof_call(node, args_node);
            }
        }

        let (callee, fn_ty) = match callee_name {
            Some(name) => match self.lookup(name).cloned() {
                Some(Symbol::Function(ty)) => (Some(name.to_string()), ty),
                Some(Symbol::Var(id)) => (None, self.vars[id.0 as usize].ty.clone()),
                // Implicit declaration: `int name()`.
                _ => (
                    Some(name.to_string()),
                    CType::Function {
                        ret: Box::new(CType::Int(IntKind::Int)),
                        params: Vec::new(),
                        variadic: true,
                    },
                ),
            },
            None => {
                let expr = self.lower_opt_expr(function, node);
                (None, expr.ty)
            }
        };
        let fn_ty = match fn_ty {
            CType::Pointer(inner) => *inner,
            other => other,
        };
        let (ret, params) = match fn_ty {
            CType::Function { ret, params, .. } => (*ret, params),
            _ => (CType::Unknown, Vec::new()),
        };

        let mut args = Vec::new();
        for (index, arg) in args_node.map(named_children).unwrap_or_default().into_iter().enumerate() {
            let expr = self.lower_expr(arg);
            let expr = match params.get(index) {
                Some(param) => self.implicit_cast(expr, param),
                None => self.decay(expr),
            };
            args.push(expr);
        }

        self.mk(ExprKind::Call { callee, args }, ret, span)
    }

    fn lower_conditional(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let cond = self.lower_rvalue(node, "condition");
        let then = self.lower_rvalue(node, "consequence");
        let otherwise = self.lower_rvalue(node, "alternative");
        let ty = if then.ty.is_pointer() {
            then.ty.clone()
        } else if otherwise.ty.is_pointer() {
            otherwise.ty.clone()
        } else if then.ty.is_arithmetic() && otherwise.ty.is_arithmetic() {
            CType::usual_arithmetic(&then.ty, &otherwise.ty)
        } else {
            then.ty.clone()
        };
        self.mk(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            ty,
            span,
        )
    }

    fn lower_member(&mut self, node: Node<'_>) -> Expr {
        let span = span_of(node);
        let arrow = node
            .child_by_field_name("operator")
            .map(|op| self.text(op) == "->")
            .unwrap_or_else(|| self.text(node).contains("->"));
        let base = if arrow {
            self.lower_rvalue(node, "argument")
        } else {
            self.lower_field(node, "argument")
        };
        let field = node
            .child_by_field_name("field")
            .map(|f| self.text(f).to_string())
            .unwrap_or_default();
        let record_ty = if arrow {
            base.ty.pointee().cloned().unwrap_or(CType::Unknown)
        } else {
            base.ty.clone()
        };
        let ty = self
            .types
            .field_type(&record_ty, &field)
            .unwrap_or(CType::Unknown);
        self.mk(
            ExprKind::Member {
                base: Box::new(base),
                field,
                arrow,
            },
            ty,
            span,
        )
    }
}

fn adjust_param_type(ty: CType) -> CType {
    match ty {
        CType::Array(..) | CType::Function { .. } => ty.decay(),
        other => other,
    }
}

fn binary_result_type(op: BinaryOp, lhs: &CType, rhs: &CType, target: &TargetLayout) -> CType {
    match op {
        BinaryOp::Add if lhs.is_pointer() && rhs.is_integer() => lhs.clone(),
        BinaryOp::Add if lhs.is_integer() && rhs.is_pointer() => rhs.clone(),
        BinaryOp::Sub if lhs.is_pointer() && rhs.is_pointer() => target.ptrdiff_type(),
        BinaryOp::Sub if lhs.is_pointer() && rhs.is_integer() => lhs.clone(),
        _ if op.is_comparison() || op.is_logical() => CType::Int(IntKind::Int),
        BinaryOp::Shl | BinaryOp::Shr => CType::usual_arithmetic(lhs, lhs),
        BinaryOp::Comma => rhs.clone(),
        _ => CType::usual_arithmetic(lhs, rhs),
    }
}

fn is_aggregate(ty: &CType) -> bool {
    matches!(ty, CType::Record(_) | CType::Array(..))
}

fn primitive_type(text: &str, target: &TargetLayout) -> CType {
    match text {
        "void" => CType::Void,
        "char" => CType::Int(IntKind::Char),
        "int" => CType::Int(IntKind::Int),
        "float" => CType::Float(FloatKind::Float),
        "double" => CType::Float(FloatKind::Double),
        "bool" | "_Bool" => CType::Int(IntKind::Bool),
        "size_t" | "uintptr_t" => target.size_type(),
        "ssize_t" | "ptrdiff_t" | "intptr_t" => target.ptrdiff_type(),
        "int8_t" => CType::Int(IntKind::SChar),
        "uint8_t" | "char8_t" => CType::Int(IntKind::UChar),
        "int16_t" => CType::Int(IntKind::Short),
        "uint16_t" | "char16_t" => CType::Int(IntKind::UShort),
        "int32_t" | "wchar_t" => CType::Int(IntKind::Int),
        "uint32_t" | "char32_t" => CType::Int(IntKind::UInt),
        "int64_t" => CType::Int(IntKind::LongLong),
        "uint64_t" => CType::Int(IntKind::ULongLong),
        _ => CType::Unknown,
    }
}

fn sized_type(text: &str) -> CType {
    let mut unsigned = false;
    let mut signed = false;
    let mut longs = 0usize;
    let mut short = false;
    let mut base = None;
    for word in text.split_whitespace() {
        match word {
            "unsigned" => unsigned = true,
            "signed" => signed = true,
            "long" => longs += 1,
            "short" => short = true,
            "const" | "volatile" => {}
            other => base = Some(other),
        }
    }

    let kind = match base {
        Some("char") if unsigned => IntKind::UChar,
        Some("char") if signed => IntKind::SChar,
        Some("char") => IntKind::Char,
        Some("double") if longs > 0 => return CType::Float(FloatKind::LongDouble),
        Some("double") => return CType::Float(FloatKind::Double),
        Some("float") => return CType::Float(FloatKind::Float),
        _ if short => IntKind::Short,
        _ if longs >= 2 => IntKind::LongLong,
        _ if longs == 1 => IntKind::Long,
        _ => IntKind::Int,
    };
    let kind = match (unsigned, kind) {
        (true, IntKind::Short) => IntKind::UShort,
        (true, IntKind::Int) => IntKind::UInt,
        (true, IntKind::Long) => IntKind::ULong,
        (true, IntKind::LongLong) => IntKind::ULongLong,
        (_, kind) => kind,
    };
    CType::Int(kind)
}

fn parse_number(text: &str, target: &TargetLayout) -> (ExprKind, CType) {
    let cleaned: String = text.chars().filter(|c| *c != '\'').collect();
    let lower = cleaned.to_ascii_lowercase();
    let is_hex = lower.starts_with("0x");
    let is_float = if is_hex {
        lower.contains('.') || lower.contains('p')
    } else {
        lower.contains('.') || lower.contains('e')
    };

    if is_float {
        let digits = lower.trim_end_matches(['f', 'l']);
        let value = digits.parse::<f64>().unwrap_or(0.0);
        let kind = if lower.ends_with('f') {
            FloatKind::Float
        } else {
            FloatKind::Double
        };
        return (ExprKind::FloatLiteral(value), CType::Float(kind));
    }

    let digits = lower.trim_end_matches(['u', 'l']);
    let suffix = &lower[digits.len()..];
    let unsigned = suffix.contains('u');
    let longs = suffix.matches('l').count();

    let value = if let Some(hex) = digits.strip_prefix("0x") {
        i128::from_str_radix(hex, 16)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        i128::from_str_radix(bin, 2)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i128::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<i128>()
    }
    .unwrap_or(0);

    let long_bits = target.int_size(IntKind::Long) * 8;
    let kind = match (unsigned, longs) {
        (false, 0) if value <= i128::from(i32::MAX) => IntKind::Int,
        (true, 0) if value <= i128::from(u32::MAX) => IntKind::UInt,
        (false, 0 | 1) if value < (1i128 << (long_bits - 1)) => IntKind::Long,
        (true, 0 | 1) if value < (1i128 << long_bits) => IntKind::ULong,
        (false, _) => IntKind::LongLong,
        (true, _) => IntKind::ULongLong,
    };
    (ExprKind::IntLiteral(value), CType::Int(kind))
}

fn char_value(text: &str) -> i128 {
    let body = text
        .trim_start_matches(['L', 'u', 'U', '8'])
        .trim_start_matches('\'')
        .trim_end_matches('\'');
    let mut chars = body.chars();
    match chars.next() {
        Some('\\') => {
            let rest: String = chars.collect();
            match rest.chars().next() {
                Some('n') => 10,
                Some('t') => 9,
                Some('r') => 13,
                Some('a') => 7,
                Some('b') => 8,
                Some('f') => 12,
                Some('v') => 11,
                Some('x') => i128::from_str_radix(&rest[1..], 16).unwrap_or(0),
                Some(c) if c.is_digit(8) => i128::from_str_radix(&rest, 8).unwrap_or(0),
                Some(c) => c as i128,
                None => 0,
            }
        }
        Some(c) => c as i128,
        None => 0,
    }
}

fn string_len(text: &str) -> u64 {
    let mut len = 0u64;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if !in_string {
            in_string = c == '"';
            continue;
        }
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                len += 1;
            }
            '"' => in_string = false,
            _ => len += 1,
        }
    }
    len
}

/// Constant-fold an integer constant expression.
pub(crate) fn fold(expr: &Expr) -> Option<i128> {
    match &expr.kind {
        ExprKind::IntLiteral(v) => Some(*v),
        ExprKind::Paren(inner) => fold(inner),
        ExprKind::Cast { operand, .. } if expr.ty.is_integer() => fold(operand),
        ExprKind::SizeOf { value, .. } | ExprKind::AlignOf { value, .. } => {
            value.map(i128::from)
        }
        ExprKind::OffsetOf { value, .. } => value.map(i128::from),
        ExprKind::Unary { op, operand } => {
            let v = fold(operand)?;
            match op {
                UnaryOp::Neg => v.checked_neg(),
                UnaryOp::Plus => Some(v),
                UnaryOp::BitNot => Some(!v),
                UnaryOp::Not => Some(i128::from(v == 0)),
                _ => None,
            }
        }
        ExprKind::Binary(bin) => {
            let l = fold(&bin.lhs)?;
            let r = fold(&bin.rhs)?;
            match bin.op {
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
                _ => None,
            }
        }
        ExprKind::Conditional {
            cond,
            then,
            otherwise,
        } => {
            if fold(cond)? != 0 {
                fold(then)
            } else {
                fold(otherwise)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn lower_src(src: &str) -> TranslationUnit {
        let tree = parse_source(src).expect("parse");
        lower(&tree, src, TargetLayout::default()).expect("lower")
    }

    fn first_binary(stmt: &Stmt) -> Option<&Expr> {
        fn in_expr(e: &Expr) -> Option<&Expr> {
            match &e.kind {
                ExprKind::Binary(bin) if bin.op.is_additive() => Some(e),
                ExprKind::Binary(bin) => in_expr(&bin.lhs).or_else(|| in_expr(&bin.rhs)),
                ExprKind::Paren(inner) | ExprKind::Cast { operand: inner, .. } => in_expr(inner),
                _ => None,
            }
        }
        match &stmt.kind {
            StmtKind::Compound(stmts) => stmts.iter().find_map(first_binary),
            StmtKind::Expr(e) => in_expr(e),
            StmtKind::Decl(decls) => decls.iter().filter_map(|d| d.init.as_ref()).find_map(in_expr),
            _ => None,
        }
    }

    #[test]
    fn pointer_plus_sizeof_is_typed() {
        let tu = lower_src("void f(void) { int *p; p = p + sizeof(int); }");
        let body = tu.functions[0].body.as_ref().expect("body");
        let add = first_binary(body).expect("additive expression");
        let bin = add.as_binary().expect("binary");
        assert!(bin.lhs.ty.is_pointer());
        assert!(bin.rhs.ty.is_integer());
        assert!(matches!(bin.rhs.kind, ExprKind::SizeOf { value: Some(4), .. }));
        assert!(add.ty.is_pointer());
    }

    #[test]
    fn struct_layout_feeds_offsetof_and_sizeof() {
        let tu = lower_src(
            "struct S { char c; double d; };\n\
             unsigned long f(void) { return sizeof(struct S); }\n",
        );
        let s = CType::Record(RecordId(0));
        assert_eq!(tu.types.size_in_chars(&s), Ok(16));
        assert_eq!(tu.types.field_offset(&s, "d"), Ok(8));
    }

    #[test]
    fn typedefs_and_arrays_resolve() {
        let tu = lower_src(
            "typedef unsigned char byte;\n\
             void f(void) { byte buf[8]; byte *q = buf; int n = 3; int vla[n]; }\n",
        );
        let ty_of = |name: &str| {
            tu.vars
                .iter()
                .find(|v| v.name == name)
                .map(|v| v.ty.clone())
                .expect("var")
        };
        assert_eq!(
            ty_of("buf"),
            CType::Array(Box::new(CType::Int(IntKind::UChar)), ArraySize::Constant(8))
        );
        assert_eq!(ty_of("q"), CType::pointer_to(CType::Int(IntKind::UChar)));
        assert_eq!(
            ty_of("vla"),
            CType::Array(Box::new(CType::Int(IntKind::Int)), ArraySize::Variable)
        );
    }

    #[test]
    fn params_are_declared_with_adjusted_types() {
        let tu = lower_src("int g(int a[], long n) { return a[0] + n; }");
        let f = &tu.functions[0];
        assert_eq!(f.params.len(), 2);
        assert_eq!(tu.var(f.params[0]).ty, CType::pointer_to(CType::Int(IntKind::Int)));
        assert_eq!(tu.var(f.params[1]).storage, Storage::Param);
    }

    #[test]
    fn number_literals_pick_types_from_suffixes() {
        let target = TargetLayout::default();
        assert!(matches!(parse_number("0x10", &target), (ExprKind::IntLiteral(16), CType::Int(IntKind::Int))));
        assert!(matches!(parse_number("8UL", &target), (ExprKind::IntLiteral(8), CType::Int(IntKind::ULong))));
        assert!(matches!(parse_number("010", &target), (ExprKind::IntLiteral(8), _)));
        assert!(matches!(parse_number("1.5f", &target), (ExprKind::FloatLiteral(_), CType::Float(FloatKind::Float))));
    }

    #[test]
    fn bool_spelled_as_identifier_is_one_char() {
        let tu = lower_src("void f(_Bool *p) { }");
        let p = tu.var(tu.functions[0].params[0]);
        assert_eq!(p.ty, CType::pointer_to(CType::Int(IntKind::Bool)));
        assert_eq!(tu.types.classify_pointee(&p.ty), crate::types::PointeeScale::Byte);
    }

    #[test]
    fn switch_labels_index_into_one_body() {
        let tu = lower_src(
            "void f(int c) { switch (c) { case 1: c = 2; case 1 + 1: break; default: c = 0; } }",
        );
        let body = tu.functions[0].body.as_ref().expect("body");
        let StmtKind::Compound(stmts) = &body.kind else {
            panic!("compound body");
        };
        let StmtKind::Switch { body, cases, .. } = &stmts[0].kind else {
            panic!("switch, got {:?}", stmts[0].kind);
        };
        assert_eq!(body.len(), 3);
        let labels: Vec<(CaseLabel, usize)> = cases.iter().map(|c| (c.label, c.start)).collect();
        assert_eq!(
            labels,
            [(CaseLabel::Value(1), 0), (CaseLabel::Value(2), 1), (CaseLabel::Default, 2)]
        );
    }

    #[test]
    fn brace_initialisers_flatten_to_cells() {
        let tu = lower_src(
            "struct P { int k; unsigned long n; int z[2]; };
             void f(void) { struct P q = { .n = sizeof(int), 5 }; }
",
        );
        let body = tu.functions[0].body.as_ref().expect("body");
        let StmtKind::Compound(stmts) = &body.kind else {
            panic!("compound body");
        };
        let StmtKind::Decl(decls) = &stmts[0].kind else {
            panic!("declaration");
        };
        let Some(Expr {
            kind: ExprKind::InitList(items),
            ..
        }) = &decls[0].init
        else {
            panic!("initializer list");
        };
        let mut cells: Vec<(u64, Option<i128>)> = items.iter().map(|i| (i.offset, fold(&i.value))).collect();
        cells.sort();
        // `.n` at 8, then positional `5` lands in `z[0]`; `k` and `z[1]` are zeroed.
        assert_eq!(cells, [(0, Some(0)), (8, Some(4)), (16, Some(5)), (20, Some(0))]);
    }

    #[test]
    fn char_literals_decode_escapes() {
        assert_eq!(char_value("'a'"), 97);
        assert_eq!(char_value("'\\n'"), 10);
        assert_eq!(char_value("'\\x41'"), 65);
        assert_eq!(char_value("'\\0'"), 0);
    }
}
