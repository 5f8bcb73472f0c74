//! Small expression tree used to derive the pendulum equations of motion.
//!
//! The tree only knows the operations the Lagrangian of a rigid planar
//! linkage needs: sums, products, quotients, integer powers and the two
//! circular functions. Every constructor folds constants and drops neutral
//! elements so that differentiated expressions stay compact.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Symbols that may appear in a pendulum expression.
///
/// `Alpha1`/`Alpha2` stand for the angular accelerations; they only appear
/// while the Euler–Lagrange equations are being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    Time,
    M1,
    M2,
    L1,
    L2,
    G,
    Theta1,
    Theta2,
    Omega1,
    Omega2,
    Alpha1,
    Alpha2,
}

impl Symbol {
    pub const COUNT: usize = 12;

    pub const ALL: [Symbol; Symbol::COUNT] = [
        Symbol::Time,
        Symbol::M1,
        Symbol::M2,
        Symbol::L1,
        Symbol::L2,
        Symbol::G,
        Symbol::Theta1,
        Symbol::Theta2,
        Symbol::Omega1,
        Symbol::Omega2,
        Symbol::Alpha1,
        Symbol::Alpha2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Symbol::Time => "t",
            Symbol::M1 => "m1",
            Symbol::M2 => "m2",
            Symbol::L1 => "l1",
            Symbol::L2 => "l2",
            Symbol::G => "g",
            Symbol::Theta1 => "theta1",
            Symbol::Theta2 => "theta2",
            Symbol::Omega1 => "omega1",
            Symbol::Omega2 => "omega2",
            Symbol::Alpha1 => "alpha1",
            Symbol::Alpha2 => "alpha2",
        }
    }

    /// The symbol holding this symbol's rate of change along a trajectory,
    /// if it varies with time at all.
    pub fn rate(self) -> Option<Symbol> {
        match self {
            Symbol::Theta1 => Some(Symbol::Omega1),
            Symbol::Theta2 => Some(Symbol::Omega2),
            Symbol::Omega1 => Some(Symbol::Alpha1),
            Symbol::Omega2 => Some(Symbol::Alpha2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Symbol(Symbol),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Powi(Box<Expr>, i32),
    Sin(Box<Expr>),
    Cos(Box<Expr>),
}

impl Expr {
    pub fn number(value: f64) -> Expr {
        Expr::Number(value)
    }

    pub fn symbol(symbol: Symbol) -> Expr {
        Expr::Symbol(symbol)
    }

    pub fn zero() -> Expr {
        Expr::Number(0.0)
    }

    pub fn one() -> Expr {
        Expr::Number(1.0)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Number(v) if *v == 0.0)
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Number(v) if *v == 1.0)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn sum(lhs: Expr, rhs: Expr) -> Expr {
        match (lhs, rhs) {
            (Expr::Number(a), Expr::Number(b)) => Expr::Number(a + b),
            (lhs, rhs) if lhs.is_zero() => rhs,
            (lhs, rhs) if rhs.is_zero() => lhs,
            (lhs, Expr::Neg(inner)) => Expr::difference(lhs, *inner),
            (Expr::Neg(inner), rhs) => Expr::difference(rhs, *inner),
            (lhs, rhs) => Expr::Add(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn difference(lhs: Expr, rhs: Expr) -> Expr {
        match (lhs, rhs) {
            (Expr::Number(a), Expr::Number(b)) => Expr::Number(a - b),
            (lhs, rhs) if rhs.is_zero() => lhs,
            (lhs, rhs) if lhs.is_zero() => Expr::negate(rhs),
            (lhs, rhs) if lhs == rhs => Expr::zero(),
            (lhs, Expr::Neg(inner)) => Expr::sum(lhs, *inner),
            (lhs, rhs) => Expr::Sub(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn product(lhs: Expr, rhs: Expr) -> Expr {
        match (lhs, rhs) {
            (Expr::Number(a), Expr::Number(b)) => Expr::Number(a * b),
            (lhs, rhs) if lhs.is_zero() || rhs.is_zero() => Expr::zero(),
            (lhs, rhs) if lhs.is_one() => rhs,
            (lhs, rhs) if rhs.is_one() => lhs,
            (Expr::Number(a), rhs) if a == -1.0 => Expr::negate(rhs),
            (Expr::Neg(a), Expr::Neg(b)) => Expr::product(*a, *b),
            (Expr::Neg(a), rhs) => Expr::negate(Expr::product(*a, rhs)),
            (lhs, Expr::Neg(b)) => Expr::negate(Expr::product(lhs, *b)),
            // keep numeric coefficients on the left so they can merge
            (lhs, Expr::Number(b)) => Expr::product(Expr::Number(b), lhs),
            (Expr::Number(a), Expr::Mul(inner_lhs, inner_rhs)) => match inner_lhs.as_number() {
                Some(b) => Expr::product(Expr::Number(a * b), *inner_rhs),
                None => Expr::Mul(
                    Box::new(Expr::Number(a)),
                    Box::new(Expr::Mul(inner_lhs, inner_rhs)),
                ),
            },
            (lhs, rhs) => Expr::Mul(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn quotient(lhs: Expr, rhs: Expr) -> Expr {
        match (lhs, rhs) {
            (Expr::Number(a), Expr::Number(b)) if b != 0.0 => Expr::Number(a / b),
            (lhs, rhs) if lhs.is_zero() && !rhs.is_zero() => Expr::zero(),
            (lhs, rhs) if rhs.is_one() => lhs,
            (Expr::Neg(a), Expr::Neg(b)) => Expr::quotient(*a, *b),
            (Expr::Neg(a), rhs) => Expr::negate(Expr::quotient(*a, rhs)),
            (lhs, rhs) => Expr::Div(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn negate(expr: Expr) -> Expr {
        match expr {
            Expr::Number(v) => Expr::Number(-v),
            Expr::Neg(inner) => *inner,
            Expr::Sub(a, b) => Expr::Sub(b, a),
            other => Expr::Neg(Box::new(other)),
        }
    }

    pub fn powi(self, exponent: i32) -> Expr {
        match (self, exponent) {
            (_, 0) => Expr::one(),
            (base, 1) => base,
            (Expr::Number(v), n) => Expr::Number(v.powi(n)),
            (Expr::Powi(base, m), n) => Expr::Powi(base, m * n),
            (Expr::Neg(base), n) if n % 2 == 0 => Expr::Powi(base, n),
            (base, n) => Expr::Powi(Box::new(base), n),
        }
    }

    pub fn sin(self) -> Expr {
        match self {
            Expr::Number(v) => Expr::Number(v.sin()),
            Expr::Neg(inner) => Expr::negate(inner.sin()),
            other => Expr::Sin(Box::new(other)),
        }
    }

    pub fn cos(self) -> Expr {
        match self {
            Expr::Number(v) => Expr::Number(v.cos()),
            Expr::Neg(inner) => inner.cos(),
            other => Expr::Cos(Box::new(other)),
        }
    }

    /// Partial derivative with respect to `symbol`, every other symbol held fixed.
    pub fn diff(&self, symbol: Symbol) -> Expr {
        match self {
            Expr::Number(_) => Expr::zero(),
            Expr::Symbol(s) => {
                if *s == symbol {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Expr::Add(a, b) => a.diff(symbol) + b.diff(symbol),
            Expr::Sub(a, b) => a.diff(symbol) - b.diff(symbol),
            Expr::Mul(a, b) => {
                a.diff(symbol) * (**b).clone() + (**a).clone() * b.diff(symbol)
            }
            Expr::Div(a, b) => {
                let da = a.diff(symbol);
                let db = b.diff(symbol);
                if db.is_zero() {
                    da / (**b).clone()
                } else {
                    (da * (**b).clone() - (**a).clone() * db) / (**b).clone().powi(2)
                }
            }
            Expr::Neg(a) => -a.diff(symbol),
            Expr::Powi(a, n) => {
                Expr::number(*n as f64) * (**a).clone().powi(n - 1) * a.diff(symbol)
            }
            Expr::Sin(a) => (**a).clone().cos() * a.diff(symbol),
            Expr::Cos(a) => -((**a).clone().sin() * a.diff(symbol)),
        }
    }

    /// Total derivative along a trajectory, applying the chain rule through
    /// every symbol that carries a rate (angles and angular velocities).
    pub fn time_derivative(&self) -> Expr {
        let mut total = self.diff(Symbol::Time);
        for symbol in Symbol::ALL {
            if let Some(rate) = symbol.rate() {
                let partial = self.diff(symbol);
                if !partial.is_zero() {
                    total = total + partial * Expr::symbol(rate);
                }
            }
        }
        total
    }

    pub fn substitute(&self, symbol: Symbol, value: &Expr) -> Expr {
        match self {
            Expr::Number(v) => Expr::Number(*v),
            Expr::Symbol(s) => {
                if *s == symbol {
                    value.clone()
                } else {
                    Expr::Symbol(*s)
                }
            }
            Expr::Add(a, b) => a.substitute(symbol, value) + b.substitute(symbol, value),
            Expr::Sub(a, b) => a.substitute(symbol, value) - b.substitute(symbol, value),
            Expr::Mul(a, b) => a.substitute(symbol, value) * b.substitute(symbol, value),
            Expr::Div(a, b) => a.substitute(symbol, value) / b.substitute(symbol, value),
            Expr::Neg(a) => -a.substitute(symbol, value),
            Expr::Powi(a, n) => a.substitute(symbol, value).powi(*n),
            Expr::Sin(a) => a.substitute(symbol, value).sin(),
            Expr::Cos(a) => a.substitute(symbol, value).cos(),
        }
    }

    pub fn contains(&self, symbol: Symbol) -> bool {
        match self {
            Expr::Number(_) => false,
            Expr::Symbol(s) => *s == symbol,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.contains(symbol) || b.contains(symbol)
            }
            Expr::Neg(a) | Expr::Powi(a, _) | Expr::Sin(a) | Expr::Cos(a) => a.contains(symbol),
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            Expr::Number(_) | Expr::Symbol(_) => 1,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                1 + a.node_count() + b.node_count()
            }
            Expr::Neg(a) | Expr::Powi(a, _) | Expr::Sin(a) | Expr::Cos(a) => 1 + a.node_count(),
        }
    }

    /// Tree-walking evaluation. Slow; the compiled form in
    /// `equation_engine` is what the integrator uses.
    pub fn eval(&self, lookup: &dyn Fn(Symbol) -> f64) -> f64 {
        match self {
            Expr::Number(v) => *v,
            Expr::Symbol(s) => lookup(*s),
            Expr::Add(a, b) => a.eval(lookup) + b.eval(lookup),
            Expr::Sub(a, b) => a.eval(lookup) - b.eval(lookup),
            Expr::Mul(a, b) => a.eval(lookup) * b.eval(lookup),
            Expr::Div(a, b) => a.eval(lookup) / b.eval(lookup),
            Expr::Neg(a) => -a.eval(lookup),
            Expr::Powi(a, n) => a.eval(lookup).powi(*n),
            Expr::Sin(a) => a.eval(lookup).sin(),
            Expr::Cos(a) => a.eval(lookup).cos(),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Add(..) | Expr::Sub(..) => 1,
            Expr::Mul(..) | Expr::Div(..) => 2,
            Expr::Neg(..) => 3,
            Expr::Powi(..) => 4,
            Expr::Number(v) if *v < 0.0 => 3,
            _ => 5,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(v) => write!(f, "{v}"),
            Expr::Symbol(s) => f.write_str(s.name()),
            Expr::Add(a, b) => {
                a.fmt_child(f, 1)?;
                f.write_str(" + ")?;
                b.fmt_child(f, 1)
            }
            Expr::Sub(a, b) => {
                a.fmt_child(f, 1)?;
                f.write_str(" - ")?;
                b.fmt_child(f, 2)
            }
            Expr::Mul(a, b) => {
                a.fmt_child(f, 2)?;
                f.write_str("*")?;
                b.fmt_child(f, 3)
            }
            Expr::Div(a, b) => {
                a.fmt_child(f, 2)?;
                f.write_str("/")?;
                b.fmt_child(f, 3)
            }
            Expr::Neg(a) => {
                f.write_str("-")?;
                a.fmt_child(f, 3)
            }
            Expr::Powi(a, n) => {
                a.fmt_child(f, 5)?;
                write!(f, "^{n}")
            }
            Expr::Sin(a) => write!(f, "sin({a})"),
            Expr::Cos(a) => write!(f, "cos({a})"),
        }
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::sum(self, rhs)
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::difference(self, rhs)
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product(self, rhs)
    }
}

impl Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::quotient(self, rhs)
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::negate(self)
    }
}

impl From<Symbol> for Expr {
    fn from(symbol: Symbol) -> Self {
        Expr::Symbol(symbol)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Number(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Expr, Symbol};

    fn x() -> Expr {
        Expr::symbol(Symbol::Theta1)
    }

    fn lookup(theta1: f64) -> impl Fn(Symbol) -> f64 {
        move |s| match s {
            Symbol::Theta1 => theta1,
            Symbol::Omega1 => 2.0,
            _ => 1.0,
        }
    }

    #[test]
    fn constructors_fold_neutral_elements() {
        assert_eq!(x() + Expr::zero(), x());
        assert_eq!(Expr::one() * x(), x());
        assert_eq!(Expr::zero() * x(), Expr::zero());
        assert_eq!(x() - x(), Expr::zero());
        assert_eq!(-(-x()), x());
        assert_eq!(Expr::number(2.0) * Expr::number(3.0), Expr::number(6.0));
        assert_eq!(x().powi(1), x());
        assert_eq!(x().powi(0), Expr::one());
        assert_eq!((-x()).cos(), x().cos());
    }

    #[test]
    fn numeric_coefficients_merge() {
        let expr = Expr::number(2.0) * (Expr::number(3.0) * x());
        assert_eq!(expr, Expr::number(6.0) * x());
        let expr = x() * Expr::number(0.5);
        assert_eq!(expr, Expr::number(0.5) * x());
    }

    #[test]
    fn diff_applies_chain_rule_to_trig() {
        let expr = (Expr::number(3.0) * x()).sin();
        let d = expr.diff(Symbol::Theta1);
        let value = d.eval(&lookup(0.4));
        assert!((value - 3.0 * (1.2_f64).cos()).abs() < 1e-14);
    }

    #[test]
    fn diff_of_other_symbol_is_zero() {
        let expr = x().cos() * Expr::symbol(Symbol::L1);
        assert!(expr.diff(Symbol::Theta2).is_zero());
    }

    #[test]
    fn time_derivative_uses_angular_rates() {
        // d/dt cos(theta1) = -sin(theta1) * omega1
        let expr = x().cos();
        let rate = expr.time_derivative();
        assert!(rate.contains(Symbol::Omega1));
        let value = rate.eval(&lookup(0.3));
        assert!((value + 0.3_f64.sin() * 2.0).abs() < 1e-14);
    }

    #[test]
    fn substitute_replaces_and_simplifies() {
        let expr = Expr::symbol(Symbol::Alpha1) * Expr::symbol(Symbol::M1) + x();
        let replaced = expr.substitute(Symbol::Alpha1, &Expr::zero());
        assert_eq!(replaced, x());
        assert!(!replaced.contains(Symbol::Alpha1));
    }

    #[test]
    fn display_respects_precedence() {
        let expr = (x() + Expr::symbol(Symbol::Theta2)) * Expr::symbol(Symbol::L1);
        assert_eq!(expr.to_string(), "(theta1 + theta2)*l1");
        let expr = x() - (Expr::symbol(Symbol::Theta2) - Expr::symbol(Symbol::L1));
        assert_eq!(expr.to_string(), "theta1 - (theta2 - l1)");
    }
}

#[cfg(test)]
mod proptests {
    use super::{Expr, Symbol};
    use proptest::prelude::*;

    fn sample_expression() -> Expr {
        let theta = Expr::symbol(Symbol::Theta1);
        let omega = Expr::symbol(Symbol::Omega1);
        (theta.clone().sin() * omega.clone().powi(2) + theta.clone().cos())
            / (Expr::number(2.0) + theta.sin().powi(2))
    }

    proptest! {
        #[test]
        fn diff_matches_central_difference(theta in -6.0_f64..6.0, omega in -4.0_f64..4.0) {
            let expr = sample_expression();
            let derivative = expr.diff(Symbol::Theta1);
            let at = |th: f64| move |s: Symbol| match s {
                Symbol::Theta1 => th,
                Symbol::Omega1 => omega,
                _ => 0.0,
            };
            let h = 1e-6;
            let numeric = (expr.eval(&at(theta + h)) - expr.eval(&at(theta - h))) / (2.0 * h);
            let analytic = derivative.eval(&at(theta));
            prop_assert!((numeric - analytic).abs() < 1e-5 * (1.0 + analytic.abs()));
        }
    }
}
