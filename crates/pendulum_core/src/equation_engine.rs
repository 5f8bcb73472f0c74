use crate::error::{PendulumError, PendulumResult};
use crate::mechanics::{PhysicalParameters, State};
use crate::symbolic::{Expr, Symbol};
use crate::traits::Scalar;

/// Number of arguments every compiled evaluator takes:
/// `(t, m1, m2, l1, l2, g, theta1, theta2, omega1, omega2)`.
pub const ARITY: usize = 10;

/// Argument order of compiled evaluators.
pub const ARGUMENT_SYMBOLS: [Symbol; ARITY] = [
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
];

/// Packs a time, a parameter set and a state into evaluator argument order.
pub fn arguments(t: f64, params: &PhysicalParameters, state: &State) -> [f64; ARITY] {
    [
        t,
        params.m1,
        params.m2,
        params.l1,
        params.l2,
        params.g,
        state.theta1,
        state.theta2,
        state.omega1,
        state.omega2,
    ]
}

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant.
    LoadConst(f64),
    /// Pushes the argument at the given index (see [`ARGUMENT_SYMBOLS`]).
    LoadArg(usize),
    /// Pops (b, a), pushes a + b.
    Add,
    /// Pops (b, a), pushes a - b.
    Sub,
    /// Pops (b, a), pushes a * b.
    Mul,
    /// Pops (b, a), pushes a / b.
    Div,
    /// Pops a, pushes a^n.
    Powi(i32),
    Sin,
    Cos,
    Neg,
}

/// A compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    /// Deepest stack the program reaches.
    fn max_depth(&self) -> usize {
        let mut depth = 0usize;
        let mut max = 0usize;
        for op in &self.ops {
            match op {
                OpCode::LoadConst(_) | OpCode::LoadArg(_) => depth += 1,
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    depth = depth.saturating_sub(1)
                }
                OpCode::Powi(_) | OpCode::Sin | OpCode::Cos | OpCode::Neg => {}
            }
            max = max.max(depth);
        }
        max
    }
}

/// Stack-based virtual machine.
///
/// The VM is stateless; `execute` receives the bytecode, the argument vector
/// and a scratch stack. Returns `None` only for malformed bytecode, which the
/// [`Compiler`] never emits.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, args: &[T], stack: &mut Vec<T>) -> Option<T> {
        stack.clear();

        for op in &bytecode.ops {
            match op {
                OpCode::LoadConst(val) => stack.push(T::from_f64(*val)?),
                OpCode::LoadArg(idx) => stack.push(*args.get(*idx)?),
                OpCode::Add => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let b = stack.pop()?;
                    let a = stack.pop()?;
                    stack.push(a / b);
                }
                OpCode::Powi(n) => {
                    let a = stack.pop()?;
                    stack.push(a.powi(*n));
                }
                OpCode::Sin => {
                    let a = stack.pop()?;
                    stack.push(a.sin());
                }
                OpCode::Cos => {
                    let a = stack.pop()?;
                    stack.push(a.cos());
                }
                OpCode::Neg => {
                    let a = stack.pop()?;
                    stack.push(-a);
                }
            }
        }

        stack.pop()
    }
}

/// A pure numeric evaluator produced from one symbolic expression.
///
/// Holds only immutable bytecode, so it is `Send + Sync` and may be called
/// from any number of threads at once.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    bytecode: Bytecode,
    stack_depth: usize,
}

impl CompiledExpression {
    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    /// Evaluates with a caller-provided scratch stack; the hot path for the
    /// integrator.
    pub fn evaluate_with<T: Scalar>(&self, args: &[T], stack: &mut Vec<T>) -> T {
        VM::execute(&self.bytecode, args, stack).unwrap_or_else(T::nan)
    }

    pub fn evaluate(&self, args: &[f64; ARITY]) -> f64 {
        let mut stack = Vec::with_capacity(self.stack_depth);
        self.evaluate_with(args, &mut stack)
    }

    pub fn evaluate_at(&self, t: f64, params: &PhysicalParameters, state: &State) -> f64 {
        self.evaluate(&arguments(t, params, state))
    }

    /// Elementwise evaluation over a whole trajectory, parameters broadcast.
    pub fn evaluate_batch(
        &self,
        times: &[f64],
        params: &PhysicalParameters,
        states: &[State],
    ) -> Vec<f64> {
        let mut stack = Vec::with_capacity(self.stack_depth);
        times
            .iter()
            .zip(states)
            .map(|(&t, state)| self.evaluate_with(&arguments(t, params, state), &mut stack))
            .collect()
    }
}

/// Compiles symbolic expressions into [`Bytecode`], mapping each symbol to
/// its position in [`ARGUMENT_SYMBOLS`].
pub struct Compiler {
    slots: [Option<usize>; Symbol::COUNT],
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut slots = [None; Symbol::COUNT];
        for (index, symbol) in ARGUMENT_SYMBOLS.iter().enumerate() {
            slots[*symbol as usize] = Some(index);
        }
        Self { slots }
    }

    pub fn compile(&self, expr: &Expr) -> PendulumResult<CompiledExpression> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        let bytecode = Bytecode { ops };
        let stack_depth = bytecode.max_depth();
        Ok(CompiledExpression {
            bytecode,
            stack_depth,
        })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> PendulumResult<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Symbol(symbol) => {
                let slot = self.slots[*symbol as usize].ok_or(PendulumError::Compile {
                    symbol: symbol.name(),
                })?;
                ops.push(OpCode::LoadArg(slot));
            }
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                self.compile_recursive(a, ops)?;
                self.compile_recursive(b, ops)?;
                ops.push(match expr {
                    Expr::Add(..) => OpCode::Add,
                    Expr::Sub(..) => OpCode::Sub,
                    Expr::Mul(..) => OpCode::Mul,
                    _ => OpCode::Div,
                });
            }
            Expr::Neg(a) => {
                self.compile_recursive(a, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Powi(a, n) => {
                self.compile_recursive(a, ops)?;
                ops.push(OpCode::Powi(*n));
            }
            Expr::Sin(a) => {
                self.compile_recursive(a, ops)?;
                ops.push(OpCode::Sin);
            }
            Expr::Cos(a) => {
                self.compile_recursive(a, ops)?;
                ops.push(OpCode::Cos);
            }
        }
        Ok(())
    }
}
