//! Resolved AST for the Sable semantic core.
//!
//! The parser front end produces these nodes with names left symbolic;
//! the analyzer and evaluator walk them directly. Node ids key the
//! per-expression analysis memo, so `deep_clone_code` (used when an
//! invocation entry specializes an overload body) assigns fresh ids to
//! every cloned node.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::env::EnvPtr;
use crate::objects::{IdentifierPtr, Object};
use crate::span::Span;

pub type NodeId = u64;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

pub fn fresh_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

//
// expressions
//

pub type ExprPtr = Rc<Expr>;
pub type ExprListPtr = Rc<ExprList>;

#[derive(Debug)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> ExprPtr {
        Rc::new(Self {
            id: fresh_node_id(),
            span,
            kind,
        })
    }

    pub fn synthetic(kind: ExprKind) -> ExprPtr {
        Self::new(kind, Span::default())
    }
}

/// A list of expressions with its own node id, so multi-value analysis
/// results can be memoized on the list as well as on single expressions.
#[derive(Debug)]
pub struct ExprList {
    pub id: NodeId,
    pub exprs: Vec<ExprPtr>,
}

impl ExprList {
    pub fn new(exprs: Vec<ExprPtr>) -> ExprListPtr {
        Rc::new(Self {
            id: fresh_node_id(),
            exprs,
        })
    }

    pub fn empty() -> ExprListPtr {
        Self::new(Vec::new())
    }

    pub fn single(expr: ExprPtr) -> ExprListPtr {
        Self::new(vec![expr])
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }
}

#[derive(Debug)]
pub enum ExprKind {
    BoolLiteral(bool),
    IntLiteral {
        value: String,
        suffix: Option<String>,
    },
    FloatLiteral {
        value: String,
        suffix: Option<String>,
    },
    /// String literals are compile-time objects: analysis lifts them to
    /// `Static[identifier]`.
    StringLiteral(String),
    NameRef(IdentifierPtr),
    Tuple(ExprListPtr),
    Paren(ExprListPtr),
    Indexing {
        expr: ExprPtr,
        args: ExprListPtr,
    },
    Call {
        expr: ExprPtr,
        args: ExprListPtr,
    },
    FieldRef {
        expr: ExprPtr,
        name: IdentifierPtr,
    },
    /// `x.0`, `x.1`: tuple element projection with a literal index.
    StaticIndexing {
        expr: ExprPtr,
        index: u64,
    },
    AddressOf(ExprPtr),
    Dereference(ExprPtr),
    And {
        left: ExprPtr,
        right: ExprPtr,
    },
    Or {
        left: ExprPtr,
        right: ExprPtr,
    },
    Lambda(Rc<Lambda>),
    Unpack(ExprPtr),
    /// `#expr`: evaluate statically and lift the result into the type
    /// system via `Static`.
    StaticExpr(ExprPtr),
    /// `*expr` in call-argument position: marks a dispatch position.
    DispatchExpr(ExprPtr),
    /// `eval(...)`: strings evaluated at compile time, parsed through the
    /// front-end hook, then analyzed in place.
    EvalExpr(ExprListPtr),
    /// An expression paired with the environment it must resolve in;
    /// produced by `foreign_expr` when AST fragments cross scopes.
    Foreign {
        env: EnvPtr,
        expr: ExprPtr,
    },
    /// A compiler object injected into expression position.
    ObjectExpr(Object),
}

/// A lambda literal. Conversion to an anonymous procedure happens once,
/// at first analysis; the converted procedure and the free-variable
/// census are cached here.
#[derive(Debug)]
pub struct Lambda {
    pub formal_args: Vec<FormalArgPtr>,
    pub has_var_arg: bool,
    pub body: StmtPtr,
    pub converted: RefCell<Option<Object>>,
    pub captured: RefCell<Vec<String>>,
}

//
// statements
//

pub type StmtPtr = Rc<Statement>;

#[derive(Debug)]
pub struct Statement {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

impl Statement {
    pub fn new(kind: StmtKind, span: Span) -> StmtPtr {
        Rc::new(Self {
            id: fresh_node_id(),
            span,
            kind,
        })
    }

    pub fn synthetic(kind: StmtKind) -> StmtPtr {
        Self::new(kind, Span::default())
    }
}

#[derive(Debug)]
pub enum StmtKind {
    Block(Vec<StmtPtr>),
    Label(IdentifierPtr),
    Goto(IdentifierPtr),
    Return {
        kind: ReturnKind,
        values: ExprListPtr,
    },
    If {
        condition: ExprPtr,
        then_part: StmtPtr,
        else_part: Option<StmtPtr>,
    },
    While {
        condition: ExprPtr,
        body: StmtPtr,
    },
    Break,
    Continue,
    ExprStatement(ExprPtr),
    Binding(Rc<Binding>),
    Assignment {
        left: ExprPtr,
        right: ExprPtr,
    },
    /// `static for x in values { ... }`: the body is cloned per static
    /// value and analyzed/evaluated with `x` bound to each in turn.
    StaticFor {
        variable: IdentifierPtr,
        values: ExprListPtr,
        body: StmtPtr,
        clones: RefCell<Vec<StmtPtr>>,
        clones_initialized: Cell<bool>,
    },
    Throw(Option<ExprPtr>),
    /// Compile-time execution has no exceptions: only the try block is
    /// analyzed and evaluated.
    Try {
        try_block: StmtPtr,
        catch_block: Option<StmtPtr>,
    },
    StaticAssert {
        condition: ExprPtr,
        message: ExprListPtr,
    },
    Unreachable,
    EvalStatement(ExprListPtr),
    Foreign {
        env: EnvPtr,
        statement: StmtPtr,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnKind {
    Value,
    Ref,
    Forward,
}

//
// bindings and formal arguments
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    Var,
    Ref,
    Forward,
    Alias,
}

#[derive(Debug)]
pub struct Binding {
    pub kind: BindingKind,
    pub pattern_vars: Vec<PatternVar>,
    pub predicate: Option<ExprPtr>,
    pub args: Vec<FormalArgPtr>,
    pub has_var_arg: bool,
    pub values: ExprListPtr,
}

#[derive(Debug, Clone)]
pub struct PatternVar {
    pub name: IdentifierPtr,
    pub is_multi: bool,
}

impl PatternVar {
    pub fn single(name: IdentifierPtr) -> Self {
        Self {
            name,
            is_multi: false,
        }
    }

    pub fn multi(name: IdentifierPtr) -> Self {
        Self {
            name,
            is_multi: true,
        }
    }
}

/// Per-value tag distinguishing lvalues from rvalues, and the matching
/// per-parameter policy. `Forward` is a parameter-side policy only: it
/// accepts either tempness and preserves it through the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueTempness {
    DontCare,
    LValue,
    RValue,
    Forward,
}

pub type FormalArgPtr = Rc<FormalArg>;

#[derive(Debug)]
pub struct FormalArg {
    pub name: IdentifierPtr,
    pub type_expr: Option<ExprPtr>,
    pub tempness: ValueTempness,
    pub var_arg: bool,
    pub span: Span,
}

impl FormalArg {
    pub fn new(name: IdentifierPtr, type_expr: Option<ExprPtr>) -> FormalArgPtr {
        Rc::new(Self {
            name,
            type_expr,
            tempness: ValueTempness::DontCare,
            var_arg: false,
            span: Span::default(),
        })
    }

    pub fn with_tempness(
        name: IdentifierPtr,
        type_expr: Option<ExprPtr>,
        tempness: ValueTempness,
    ) -> FormalArgPtr {
        Rc::new(Self {
            name,
            type_expr,
            tempness,
            var_arg: false,
            span: Span::default(),
        })
    }

    pub fn var_arg(name: IdentifierPtr, type_expr: Option<ExprPtr>) -> FormalArgPtr {
        Rc::new(Self {
            name,
            type_expr,
            tempness: ValueTempness::DontCare,
            var_arg: true,
            span: Span::default(),
        })
    }
}

//
// code
//

pub type CodePtr = Rc<Code>;

/// The body of one overload: pattern variables, an optional predicate,
/// formal arguments, optional declared return specs, and the statement
/// body.
#[derive(Debug)]
pub struct Code {
    pub span: Span,
    pub pattern_vars: Vec<PatternVar>,
    pub predicate: Option<ExprPtr>,
    pub formal_args: Vec<FormalArgPtr>,
    pub has_var_arg: bool,
    pub return_specs_declared: bool,
    pub return_specs: Vec<ReturnSpec>,
    pub var_return_spec: Option<ReturnSpec>,
    pub body: Option<StmtPtr>,
}

#[derive(Debug)]
pub struct ReturnSpec {
    pub type_expr: ExprPtr,
    pub name: Option<IdentifierPtr>,
}

impl Code {
    pub fn new(
        pattern_vars: Vec<PatternVar>,
        predicate: Option<ExprPtr>,
        formal_args: Vec<FormalArgPtr>,
        body: Option<StmtPtr>,
    ) -> CodePtr {
        let has_var_arg = formal_args.iter().any(|a| a.var_arg);
        Rc::new(Self {
            span: Span::default(),
            pattern_vars,
            predicate,
            formal_args,
            has_var_arg,
            return_specs_declared: false,
            return_specs: Vec::new(),
            var_return_spec: None,
            body,
        })
    }

    pub fn with_return_specs(
        pattern_vars: Vec<PatternVar>,
        predicate: Option<ExprPtr>,
        formal_args: Vec<FormalArgPtr>,
        return_specs: Vec<ReturnSpec>,
        var_return_spec: Option<ReturnSpec>,
        body: Option<StmtPtr>,
    ) -> CodePtr {
        let has_var_arg = formal_args.iter().any(|a| a.var_arg);
        Rc::new(Self {
            span: Span::default(),
            pattern_vars,
            predicate,
            formal_args,
            has_var_arg,
            return_specs_declared: true,
            return_specs,
            var_return_spec,
            body,
        })
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn has_return_specs(&self) -> bool {
        self.return_specs_declared
    }
}

//
// deep cloning
//
// Invocation entries own a private copy of the matched overload's body so
// each specialization desugars and memoizes independently. Object and
// foreign-environment payloads are shared; every node gets a fresh id.

pub fn deep_clone_code(code: &Code) -> CodePtr {
    Rc::new(Code {
        span: code.span,
        pattern_vars: code.pattern_vars.clone(),
        predicate: code.predicate.as_ref().map(deep_clone_expr),
        formal_args: code.formal_args.clone(),
        has_var_arg: code.has_var_arg,
        return_specs_declared: code.return_specs_declared,
        return_specs: code.return_specs.iter().map(deep_clone_return_spec).collect(),
        var_return_spec: code.var_return_spec.as_ref().map(deep_clone_return_spec),
        body: code.body.as_ref().map(deep_clone_statement),
    })
}

fn deep_clone_return_spec(spec: &ReturnSpec) -> ReturnSpec {
    ReturnSpec {
        type_expr: deep_clone_expr(&spec.type_expr),
        name: spec.name.clone(),
    }
}

pub fn deep_clone_expr(expr: &ExprPtr) -> ExprPtr {
    let kind = match &expr.kind {
        ExprKind::BoolLiteral(v) => ExprKind::BoolLiteral(*v),
        ExprKind::IntLiteral { value, suffix } => ExprKind::IntLiteral {
            value: value.clone(),
            suffix: suffix.clone(),
        },
        ExprKind::FloatLiteral { value, suffix } => ExprKind::FloatLiteral {
            value: value.clone(),
            suffix: suffix.clone(),
        },
        ExprKind::StringLiteral(s) => ExprKind::StringLiteral(s.clone()),
        ExprKind::NameRef(name) => ExprKind::NameRef(name.clone()),
        ExprKind::Tuple(args) => ExprKind::Tuple(deep_clone_expr_list(args)),
        ExprKind::Paren(args) => ExprKind::Paren(deep_clone_expr_list(args)),
        ExprKind::Indexing { expr, args } => ExprKind::Indexing {
            expr: deep_clone_expr(expr),
            args: deep_clone_expr_list(args),
        },
        ExprKind::Call { expr, args } => ExprKind::Call {
            expr: deep_clone_expr(expr),
            args: deep_clone_expr_list(args),
        },
        ExprKind::FieldRef { expr, name } => ExprKind::FieldRef {
            expr: deep_clone_expr(expr),
            name: name.clone(),
        },
        ExprKind::StaticIndexing { expr, index } => ExprKind::StaticIndexing {
            expr: deep_clone_expr(expr),
            index: *index,
        },
        ExprKind::AddressOf(e) => ExprKind::AddressOf(deep_clone_expr(e)),
        ExprKind::Dereference(e) => ExprKind::Dereference(deep_clone_expr(e)),
        ExprKind::And { left, right } => ExprKind::And {
            left: deep_clone_expr(left),
            right: deep_clone_expr(right),
        },
        ExprKind::Or { left, right } => ExprKind::Or {
            left: deep_clone_expr(left),
            right: deep_clone_expr(right),
        },
        ExprKind::Lambda(l) => ExprKind::Lambda(Rc::new(Lambda {
            formal_args: l.formal_args.clone(),
            has_var_arg: l.has_var_arg,
            body: deep_clone_statement(&l.body),
            converted: RefCell::new(None),
            captured: RefCell::new(Vec::new()),
        })),
        ExprKind::Unpack(e) => ExprKind::Unpack(deep_clone_expr(e)),
        ExprKind::StaticExpr(e) => ExprKind::StaticExpr(deep_clone_expr(e)),
        ExprKind::DispatchExpr(e) => ExprKind::DispatchExpr(deep_clone_expr(e)),
        ExprKind::EvalExpr(args) => ExprKind::EvalExpr(deep_clone_expr_list(args)),
        ExprKind::Foreign { env, expr } => ExprKind::Foreign {
            env: env.clone(),
            expr: deep_clone_expr(expr),
        },
        ExprKind::ObjectExpr(obj) => ExprKind::ObjectExpr(obj.clone()),
    };
    Expr::new(kind, expr.span)
}

pub fn deep_clone_expr_list(list: &ExprListPtr) -> ExprListPtr {
    ExprList::new(list.exprs.iter().map(deep_clone_expr).collect())
}

pub fn deep_clone_statement(stmt: &StmtPtr) -> StmtPtr {
    let kind = match &stmt.kind {
        StmtKind::Block(stmts) => {
            StmtKind::Block(stmts.iter().map(deep_clone_statement).collect())
        }
        StmtKind::Label(name) => StmtKind::Label(name.clone()),
        StmtKind::Goto(name) => StmtKind::Goto(name.clone()),
        StmtKind::Return { kind, values } => StmtKind::Return {
            kind: *kind,
            values: deep_clone_expr_list(values),
        },
        StmtKind::If {
            condition,
            then_part,
            else_part,
        } => StmtKind::If {
            condition: deep_clone_expr(condition),
            then_part: deep_clone_statement(then_part),
            else_part: else_part.as_ref().map(deep_clone_statement),
        },
        StmtKind::While { condition, body } => StmtKind::While {
            condition: deep_clone_expr(condition),
            body: deep_clone_statement(body),
        },
        StmtKind::Break => StmtKind::Break,
        StmtKind::Continue => StmtKind::Continue,
        StmtKind::ExprStatement(e) => StmtKind::ExprStatement(deep_clone_expr(e)),
        StmtKind::Binding(b) => StmtKind::Binding(Rc::new(Binding {
            kind: b.kind,
            pattern_vars: b.pattern_vars.clone(),
            predicate: b.predicate.as_ref().map(deep_clone_expr),
            args: b.args.clone(),
            has_var_arg: b.has_var_arg,
            values: deep_clone_expr_list(&b.values),
        })),
        StmtKind::Assignment { left, right } => StmtKind::Assignment {
            left: deep_clone_expr(left),
            right: deep_clone_expr(right),
        },
        StmtKind::StaticFor {
            variable,
            values,
            body,
            ..
        } => StmtKind::StaticFor {
            variable: variable.clone(),
            values: deep_clone_expr_list(values),
            body: deep_clone_statement(body),
            clones: RefCell::new(Vec::new()),
            clones_initialized: Cell::new(false),
        },
        StmtKind::Throw(e) => StmtKind::Throw(e.as_ref().map(deep_clone_expr)),
        StmtKind::Try {
            try_block,
            catch_block,
        } => StmtKind::Try {
            try_block: deep_clone_statement(try_block),
            catch_block: catch_block.as_ref().map(deep_clone_statement),
        },
        StmtKind::StaticAssert { condition, message } => StmtKind::StaticAssert {
            condition: deep_clone_expr(condition),
            message: deep_clone_expr_list(message),
        },
        StmtKind::Unreachable => StmtKind::Unreachable,
        StmtKind::EvalStatement(args) => StmtKind::EvalStatement(deep_clone_expr_list(args)),
        StmtKind::Foreign { env, statement } => StmtKind::Foreign {
            env: env.clone(),
            statement: deep_clone_statement(statement),
        },
    };
    Statement::new(kind, stmt.span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Identifier;

    #[test]
    fn test_fresh_node_ids_are_unique() {
        let a = fresh_node_id();
        let b = fresh_node_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_deep_clone_assigns_fresh_ids() {
        let x = Expr::synthetic(ExprKind::NameRef(Identifier::get("x")));
        let call = Expr::synthetic(ExprKind::Call {
            expr: x.clone(),
            args: ExprList::single(Expr::synthetic(ExprKind::BoolLiteral(true))),
        });
        let cloned = deep_clone_expr(&call);
        assert_ne!(call.id, cloned.id);
        match (&call.kind, &cloned.kind) {
            (ExprKind::Call { expr: a, .. }, ExprKind::Call { expr: b, .. }) => {
                assert_ne!(a.id, b.id);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_code_var_arg_detection() {
        let args = vec![
            FormalArg::new(Identifier::get("x"), None),
            FormalArg::var_arg(Identifier::get("rest"), None),
        ];
        let code = Code::new(Vec::new(), None, args, None);
        assert!(code.has_var_arg);
    }
}
