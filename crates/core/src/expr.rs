use crate::diag::Reporter;
use crate::symbol::{SymbolKind, Symbols};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Complement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

/// Expression tree as parsed. Evaluation happens once, when the expression
/// reaches a directive; whatever cannot be computed then becomes a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(i32),
    Symbol(String),
    /// `@`, the current program counter.
    Pc,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Values a fold can observe: symbol values and the current PC, both of
/// which may be unknown until link time.
pub trait EvalEnv {
    fn symbol_value(&self, name: &str) -> Option<i32>;
    fn pc_value(&self) -> Option<i32>;
}

/// An expression together with its folded value, if it has one.
#[derive(Debug, Clone)]
pub struct Expression {
    pub expr: Expr,
    known: Option<i32>,
}

impl Expression {
    /// Fold `expr` as far as the environment allows.
    pub fn resolve(expr: Expr, env: &dyn EvalEnv, diag: &mut Reporter) -> Self {
        let known = fold(&expr, env, diag);
        Self { expr, known }
    }

    pub fn constant(value: i32) -> Self {
        Self {
            expr: Expr::Number(value),
            known: Some(value),
        }
    }

    pub fn is_known(&self) -> bool {
        self.known.is_some()
    }

    /// The folded value. Only meaningful when [`is_known`](Self::is_known)
    /// holds; unknown expressions read as 0, the placeholder that patches
    /// overwrite at link time.
    pub fn value(&self) -> i32 {
        self.known.unwrap_or(0)
    }

    /// The referenced symbol, when the expression is exactly one symbol.
    pub fn symbol_of(&self) -> Option<&str> {
        match &self.expr {
            Expr::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_pc(&self) -> bool {
        matches!(self.expr, Expr::Pc)
    }

    /// Whether the difference between this expression and the current PC is
    /// a compile-time constant: the expression must be a single label (or
    /// `@` itself) belonging to `pc_section`.
    pub fn is_diff_constant(&self, symbols: &Symbols, pc_section: Option<usize>) -> bool {
        if self.is_pc() {
            return true;
        }
        let Some(name) = self.symbol_of() else {
            return false;
        };
        match symbols.get(name).map(|sym| &sym.kind) {
            Some(SymbolKind::Label { section, .. }) => pc_section == Some(*section),
            _ => false,
        }
    }
}

fn fold(expr: &Expr, env: &dyn EvalEnv, diag: &mut Reporter) -> Option<i32> {
    match expr {
        Expr::Number(value) => Some(*value),
        Expr::Symbol(name) => env.symbol_value(name),
        Expr::Pc => env.pc_value(),
        Expr::Unary(op, inner) => {
            let inner = fold(inner, env, diag)?;
            Some(match op {
                UnaryOp::Neg => inner.wrapping_neg(),
                UnaryOp::Complement => !inner,
            })
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = fold(lhs, env, diag);
            let rhs = fold(rhs, env, diag);
            let (lhs, rhs) = (lhs?, rhs?);
            Some(match op {
                BinaryOp::Add => lhs.wrapping_add(rhs),
                BinaryOp::Sub => lhs.wrapping_sub(rhs),
                BinaryOp::Mul => lhs.wrapping_mul(rhs),
                BinaryOp::Div => {
                    if rhs == 0 {
                        diag.error("Division by zero");
                        0
                    } else {
                        lhs.wrapping_div(rhs)
                    }
                }
                BinaryOp::Mod => {
                    if rhs == 0 {
                        diag.error("Modulo by zero");
                        0
                    } else {
                        lhs.wrapping_rem(rhs)
                    }
                }
                BinaryOp::Shl => shift_checked(lhs, rhs, diag, |a, b| a.wrapping_shl(b)),
                BinaryOp::Shr => shift_checked(lhs, rhs, diag, |a, b| a.wrapping_shr(b)),
                BinaryOp::And => lhs & rhs,
                BinaryOp::Or => lhs | rhs,
                BinaryOp::Xor => lhs ^ rhs,
            })
        }
    }
}

fn shift_checked(lhs: i32, rhs: i32, diag: &mut Reporter, op: impl Fn(i32, u32) -> i32) -> i32 {
    if !(0..=31).contains(&rhs) {
        diag.error(format!("Shift amount must be between 0 and 31, not {rhs}"));
        return 0;
    }
    op(lhs, rhs as u32)
}
