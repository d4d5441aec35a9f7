//! Syntax tree for agent scripts.

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<FnDef>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&FnDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { name: String, value: Expr, line: usize },
    Assign { name: String, value: Expr, line: usize },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    For { var: String, iter: Expr, body: Vec<Stmt> },
    Return(Option<Expr>),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident { name: String, line: usize },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Field { target: Box<Expr>, name: String },
    Index { target: Box<Expr>, index: Box<Expr> },
    Call { name: String, args: Vec<Expr>, line: usize },
}

/// Depth-first visit of every expression nested in `stmts`, in source order.
pub fn walk_stmts<'a>(stmts: &'a [Stmt], visit: &mut dyn FnMut(&'a Expr)) {
    for stmt in stmts {
        match stmt {
            Stmt::Let { value, .. } | Stmt::Assign { value, .. } => walk_expr(value, visit),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                walk_expr(cond, visit);
                walk_stmts(then_branch, visit);
                if let Some(other) = else_branch {
                    walk_stmts(other, visit);
                }
            }
            Stmt::While { cond, body } => {
                walk_expr(cond, visit);
                walk_stmts(body, visit);
            }
            Stmt::For { iter, body, .. } => {
                walk_expr(iter, visit);
                walk_stmts(body, visit);
            }
            Stmt::Return(Some(e)) | Stmt::Expr(e) => walk_expr(e, visit),
            Stmt::Return(None) => {}
        }
    }
}

pub fn walk_expr<'a>(expr: &'a Expr, visit: &mut dyn FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::Array(items) => items.iter().for_each(|e| walk_expr(e, visit)),
        Expr::Object(fields) => fields.iter().for_each(|(_, e)| walk_expr(e, visit)),
        Expr::Unary { expr, .. } => walk_expr(expr, visit),
        Expr::Binary { lhs, rhs, .. } | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            walk_expr(lhs, visit);
            walk_expr(rhs, visit);
        }
        Expr::Field { target, .. } => walk_expr(target, visit),
        Expr::Index { target, index } => {
            walk_expr(target, visit);
            walk_expr(index, visit);
        }
        Expr::Call { args, .. } => args.iter().for_each(|e| walk_expr(e, visit)),
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::Ident { .. } => {}
    }
}
