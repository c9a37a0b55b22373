use std::ops::{Add, Div, Mul};

/// Symbolic extent/stride/offset expression.
///
/// Expressions are kept in a canonical form (every constructor simplifies), so two
/// expressions are equal iff they are structurally equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    Const(i64),
    Var(String),
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub const ZERO: Expr = Expr::Const(0);
    pub const ONE: Expr = Expr::Const(1);

    pub fn var(name: &str) -> Self {
        Self::Var(name.to_string())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(0))
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Const(1))
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn simplify(self) -> Self {
        match self {
            Expr::Add(lhs, rhs) => {
                let mut terms = Vec::new();
                let mut constant = 0;
                collect_terms(lhs.simplify(), &mut terms, &mut constant);
                collect_terms(rhs.simplify(), &mut terms, &mut constant);
                terms.sort();
                let mut iter = terms.into_iter();
                let Some(first) = iter.next() else {
                    return Expr::Const(constant);
                };
                let sum = iter.fold(first, |acc, t| Expr::Add(Box::new(acc), Box::new(t)));
                if constant == 0 {
                    sum
                } else {
                    Expr::Add(Box::new(sum), Box::new(Expr::Const(constant)))
                }
            }
            Expr::Mul(lhs, rhs) => {
                let mut factors = Vec::new();
                let mut coefficient = 1;
                collect_factors(lhs.simplify(), &mut factors, &mut coefficient);
                collect_factors(rhs.simplify(), &mut factors, &mut coefficient);
                if coefficient == 0 {
                    return Expr::Const(0);
                }
                factors.sort();
                let mut iter = factors.into_iter();
                let Some(first) = iter.next() else {
                    return Expr::Const(coefficient);
                };
                let product = iter.fold(first, |acc, f| Expr::Mul(Box::new(acc), Box::new(f)));
                if coefficient == 1 {
                    product
                } else {
                    Expr::Mul(Box::new(Expr::Const(coefficient)), Box::new(product))
                }
            }
            Expr::Div(lhs, rhs) => {
                let lhs = lhs.simplify();
                let rhs = rhs.simplify();
                match (lhs, rhs) {
                    (e, Expr::Const(1)) => e,
                    (Expr::Const(0), r) if !r.is_zero() => Expr::Const(0),
                    (Expr::Const(l), Expr::Const(r)) if r != 0 && l % r == 0 => Expr::Const(l / r),
                    (l, r) if l == r && !r.is_zero() => Expr::Const(1),
                    (l, r) => match cancel_factor(&l, &r) {
                        Some(quotient) => quotient,
                        None => Expr::Div(Box::new(l), Box::new(r)),
                    },
                }
            }
            e => e,
        }
    }

    /// Floor division of two constant expressions.
    pub fn div_floor(&self, rhs: &Expr) -> Option<i64> {
        match (self.as_const()?, rhs.as_const()?) {
            (_, 0) => None,
            (l, r) => Some(l.div_euclid(r)),
        }
    }
}

fn collect_terms(e: Expr, terms: &mut Vec<Expr>, constant: &mut i64) {
    match e {
        Expr::Add(l, r) => {
            collect_terms(*l, terms, constant);
            collect_terms(*r, terms, constant);
        }
        Expr::Const(c) => *constant += c,
        e => terms.push(e),
    }
}

fn collect_factors(e: Expr, factors: &mut Vec<Expr>, coefficient: &mut i64) {
    match e {
        Expr::Mul(l, r) => {
            collect_factors(*l, factors, coefficient);
            collect_factors(*r, factors, coefficient);
        }
        Expr::Const(c) => *coefficient *= c,
        e => factors.push(e),
    }
}

// (a * b) / b -> a
fn cancel_factor(lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    let mut factors = Vec::new();
    let mut coefficient = 1;
    collect_factors(lhs.clone(), &mut factors, &mut coefficient);
    if let Expr::Const(r) = rhs {
        if *r != 0 && coefficient % r == 0 {
            let rest = factors.into_iter().fold(Expr::Const(coefficient / r), |a, f| a * f);
            return Some(rest);
        }
        return None;
    }
    let pos = factors.iter().position(|f| f == rhs)?;
    factors.remove(pos);
    Some(factors.into_iter().fold(Expr::Const(coefficient), |a, f| a * f))
}

impl<T: Into<Expr>> Add<T> for Expr {
    type Output = Expr;

    fn add(self, rhs: T) -> Expr {
        Expr::Add(Box::new(self), Box::new(rhs.into())).simplify()
    }
}

impl<T: Into<Expr>> Mul<T> for Expr {
    type Output = Expr;

    fn mul(self, rhs: T) -> Expr {
        Expr::Mul(Box::new(self), Box::new(rhs.into())).simplify()
    }
}

impl<T: Into<Expr>> Div<T> for Expr {
    type Output = Expr;

    fn div(self, rhs: T) -> Expr {
        Expr::Div(Box::new(self), Box::new(rhs.into())).simplify()
    }
}

impl From<i64> for Expr {
    fn from(c: i64) -> Self {
        Expr::Const(c)
    }
}

impl From<i32> for Expr {
    fn from(c: i32) -> Self {
        Expr::Const(c as i64)
    }
}

impl From<usize> for Expr {
    fn from(c: usize) -> Self {
        Expr::Const(c as i64)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::var(name)
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Add(l, r) => write!(f, "({l} + {r})"),
            Expr::Mul(l, r) => write!(f, "({l} * {r})"),
            Expr::Div(l, r) => write!(f, "({l} / {r})"),
        }
    }
}
