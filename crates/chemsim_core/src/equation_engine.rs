//! Equations written as text, e.g. `"1 + k*X^2*Y - b*X - d*X"`, compiled to
//! bytecode for a small stack machine and exposed as a [`VectorField`].

use crate::traits::VectorField;
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Unexpected character '{0}'")]
    UnexpectedCharacter(char),

    #[error("Malformed number '{0}'")]
    MalformedNumber(String),

    #[error("Unexpected token {found} at position {position}")]
    UnexpectedToken { found: String, position: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Expected ')'")]
    UnclosedParen,

    #[error("Unknown variable or parameter: {0}")]
    UnknownSymbol(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Expression nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Expected {expected} {what}, got {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Equation {index} ({name}): {source}")]
    InEquation {
        index: usize,
        name: String,
        #[source]
        source: Box<ExpressionError>,
    },
}

/// OpCodes for the stack machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant.
    LoadConst(f64),
    /// Pushes a state variable by index.
    LoadVar(usize),
    /// Pushes a parameter by index.
    LoadParam(usize),
    /// Pushes the current time.
    LoadTime,
    /// Pops b, a; pushes a + b.
    Add,
    /// Pops b, a; pushes a - b.
    Sub,
    /// Pops b, a; pushes a * b.
    Mul,
    /// Pops b, a; pushes a / b.
    Div,
    /// Pops b, a; pushes a ^ b.
    Pow,
    /// Pops a; pushes -a.
    Neg,
    Sin,
    Cos,
    Exp,
    Ln,
    Sqrt,
}

/// A compiled expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based virtual machine. Stateless; the caller supplies the stack so
/// repeated evaluation does not allocate.
pub struct VM;

impl VM {
    pub fn execute(
        bytecode: &Bytecode,
        t: f64,
        vars: &[f64],
        params: &[f64],
        stack: &mut Vec<f64>,
    ) -> f64 {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(val),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::LoadTime => stack.push(t),
                OpCode::Add => binary(stack, |a, b| a + b),
                OpCode::Sub => binary(stack, |a, b| a - b),
                OpCode::Mul => binary(stack, |a, b| a * b),
                OpCode::Div => binary(stack, |a, b| a / b),
                OpCode::Pow => binary(stack, pow),
                OpCode::Neg => unary(stack, |a| -a),
                OpCode::Sin => unary(stack, f64::sin),
                OpCode::Cos => unary(stack, f64::cos),
                OpCode::Exp => unary(stack, f64::exp),
                OpCode::Ln => unary(stack, f64::ln),
                OpCode::Sqrt => unary(stack, f64::sqrt),
            }
        }

        // Compiled bytecode always leaves exactly one value; anything else
        // evaluates to NaN and surfaces downstream as a non-finite state.
        stack.pop().unwrap_or(f64::NAN)
    }
}

fn binary(stack: &mut Vec<f64>, op: impl Fn(f64, f64) -> f64) {
    let b = stack.pop().unwrap_or(f64::NAN);
    let a = stack.pop().unwrap_or(f64::NAN);
    stack.push(op(a, b));
}

fn unary(stack: &mut Vec<f64>, op: impl Fn(f64) -> f64) {
    let a = stack.pop().unwrap_or(f64::NAN);
    stack.push(op(a));
}

/// Small integer exponents are expanded to multiplication so that `X^2`
/// stays exact for negative X.
fn pow(a: f64, b: f64) -> f64 {
    if b.fract() == 0.0 && b.abs() <= i32::MAX as f64 {
        a.powi(b as i32)
    } else {
        a.powf(b)
    }
}

// --- AST & Parser ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Symbol(String),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
}

/// Resolves names in an [`Expr`] and emits [`Bytecode`].
///
/// Lookup order is state variables, then parameters, then `t` for time.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, ExpressionError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), ExpressionError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Symbol(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if name == "t" {
                    ops.push(OpCode::LoadTime);
                } else {
                    return Err(ExpressionError::UnknownSymbol(name.clone()));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Pow => OpCode::Pow,
                });
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                let op = match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "exp" => OpCode::Exp,
                    "ln" => OpCode::Ln,
                    "sqrt" => OpCode::Sqrt,
                    _ => return Err(ExpressionError::UnknownFunction(func.clone())),
                };
                self.compile_recursive(arg, ops)?;
                ops.push(op);
            }
        }
        Ok(())
    }
}

/// Parses a string expression into an AST.
///
/// Precedence from loosest to tightest: `+ -`, `* /`, unary `-`, `^`
/// (right-associative), so `-X^2` is `-(X^2)`.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_sum()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::UnexpectedToken {
            found: format!("{:?}", token),
            position: parser.pos,
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent only when digits follow; `2e` is the number 2 followed by `e`.
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse()
                .map_err(|_| ExpressionError::MalformedNumber(text.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Identifier(chars[start..i].iter().collect()));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(ExpressionError::UnexpectedCharacter(other)),
            });
            i += 1;
        }
    }
    Ok(tokens)
}

/// Parentheses, function calls and unary minus all recurse; past this depth
/// the parser gives up instead of exhausting the stack.
const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<T, ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(ExpressionError::NestingTooDeep { limit: MAX_NESTING });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_sum(&mut self) -> Result<Expr, ExpressionError> {
        self.nested(Self::parse_sum_inner)
    }

    fn parse_sum_inner(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, ExpressionError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            // right-associative, and allows a signed exponent: X^-1
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), BinaryOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.pos;
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_sum()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Symbol(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_sum()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(ExpressionError::UnexpectedToken {
                found: format!("{:?}", token),
                position,
            }),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(ExpressionError::UnclosedParen),
        }
    }
}

// --- EquationSystem ---

/// A [`VectorField`] with one compiled expression per state variable.
#[derive(Debug)]
pub struct EquationSystem {
    pub equations: Vec<Bytecode>,
    pub params: Vec<f64>,
    pub var_names: Vec<String>,
    pub param_names: Vec<String>,
    // Scratch stack reused across evaluations. Makes the system !Sync; build
    // one per thread to integrate in parallel.
    stack: RefCell<Vec<f64>>,
}

impl EquationSystem {
    pub fn new(
        equations: Vec<Bytecode>,
        params: Vec<f64>,
        var_names: Vec<String>,
        param_names: Vec<String>,
    ) -> Self {
        Self {
            equations,
            params,
            var_names,
            param_names,
            stack: RefCell::new(Vec::with_capacity(64)),
        }
    }

    /// Parses and compiles one equation per variable, `equations[i]` giving
    /// d(var_names[i])/dt.
    pub fn compile(
        var_names: &[String],
        param_names: &[String],
        params: &[f64],
        equations: &[String],
    ) -> Result<Self, ExpressionError> {
        if equations.len() != var_names.len() {
            return Err(ExpressionError::CountMismatch {
                what: "equations",
                expected: var_names.len(),
                actual: equations.len(),
            });
        }
        if params.len() != param_names.len() {
            return Err(ExpressionError::CountMismatch {
                what: "parameter values",
                expected: param_names.len(),
                actual: params.len(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for name in var_names.iter().chain(param_names) {
            if !seen.insert(name.as_str()) {
                return Err(ExpressionError::DuplicateName(name.clone()));
            }
        }

        let compiler = Compiler::new(var_names, param_names);
        let bytecodes = equations
            .iter()
            .enumerate()
            .map(|(index, source)| {
                parse(source)
                    .and_then(|expr| compiler.compile(&expr))
                    .map_err(|err| ExpressionError::InEquation {
                        index,
                        name: var_names[index].clone(),
                        source: Box::new(err),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(
            bytecodes,
            params.to_vec(),
            var_names.to_vec(),
            param_names.to_vec(),
        ))
    }

    pub fn var_index(&self, name: &str) -> Option<usize> {
        self.var_names.iter().position(|n| n == name)
    }
}

impl VectorField for EquationSystem {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let mut stack = self.stack.borrow_mut();
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, t, x, &self.params, &mut stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, Compiler, EquationSystem, ExpressionError, VM};
    use crate::traits::VectorField;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eval(source: &str, vars: &[f64]) -> f64 {
        let compiler = Compiler::new(&names(&["x", "y"]), &names(&["k"]));
        let code = compiler.compile(&parse(source).unwrap()).unwrap();
        VM::execute(&code, 0.5, vars, &[10.0], &mut Vec::new())
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", &[0.0, 0.0]), 7.0);
        assert_eq!(eval("2 ^ 3 ^ 2", &[0.0, 0.0]), 512.0);
        assert_eq!(eval("-x^2", &[3.0, 0.0]), -9.0);
        assert_eq!(eval("(1 + 2) * 3", &[0.0, 0.0]), 9.0);
        assert_eq!(eval("8 / 4 / 2", &[0.0, 0.0]), 1.0);
        assert_eq!(eval("x^-1", &[4.0, 0.0]), 0.25);
    }

    #[test]
    fn symbols_parameters_time_and_functions() {
        assert_eq!(eval("k * x + y", &[2.0, 1.0]), 21.0);
        assert_eq!(eval("t", &[0.0, 0.0]), 0.5);
        assert!((eval("exp(ln(x)) + sqrt(y)", &[2.0, 9.0]) - 5.0).abs() < 1e-12);
        assert_eq!(eval("sin(0) + cos(0)", &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn scientific_notation_literals() {
        assert_eq!(eval("2e-2 * 100", &[0.0, 0.0]), 2.0);
        assert_eq!(eval("1.5E+1", &[0.0, 0.0]), 15.0);
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert_eq!(parse("1 +"), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(parse("(1 + 2"), Err(ExpressionError::UnclosedParen));
        assert_eq!(parse("1 $ 2"), Err(ExpressionError::UnexpectedCharacter('$')));
        assert!(matches!(
            parse("x y"),
            Err(ExpressionError::UnexpectedToken { position: 1, .. })
        ));
        assert!(matches!(
            parse("1..2"),
            Err(ExpressionError::MalformedNumber(_))
        ));
    }

    #[test]
    fn exponent_needs_digits() {
        assert!(matches!(
            parse("2e"),
            Err(ExpressionError::UnexpectedToken { position: 1, .. })
        ));
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let limit = ExpressionError::NestingTooDeep { limit: 256 };
        assert_eq!(parse(&"(".repeat(10_000)), Err(limit.clone()));
        assert_eq!(
            parse(&format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000))),
            Err(limit.clone())
        );
        assert_eq!(parse(&format!("{}x", "-".repeat(10_000))), Err(limit.clone()));
        assert_eq!(
            parse(&format!("{}1{}", "sin(".repeat(5_000), ")".repeat(5_000))),
            Err(limit)
        );

        let shallow = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(eval(&shallow, &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn unknown_names_are_compile_errors() {
        let compiler = Compiler::new(&names(&["x"]), &[]);
        assert_eq!(
            compiler.compile(&parse("x + z").unwrap()),
            Err(ExpressionError::UnknownSymbol("z".into()))
        );
        assert_eq!(
            compiler.compile(&parse("tan(x)").unwrap()),
            Err(ExpressionError::UnknownFunction("tan".into()))
        );
    }

    #[test]
    fn equation_system_evaluates_each_component() {
        let system = EquationSystem::compile(
            &names(&["X", "Y"]),
            &names(&["k"]),
            &[0.02],
            &names(&["1 + k*X^2*Y - 2*X - 0.04*X", "2*X - k*X^2*Y"]),
        )
        .unwrap();
        assert_eq!(system.dimension(), 2);
        assert_eq!(system.var_index("Y"), Some(1));

        let mut out = [0.0; 2];
        system.apply(0.0, &[25.0, 4.0], &mut out);
        assert!(out[0].abs() < 1e-12);
        assert!(out[1].abs() < 1e-12);
    }

    #[test]
    fn equation_system_reports_which_equation_failed() {
        let err = EquationSystem::compile(
            &names(&["X", "Y"]),
            &[],
            &[],
            &names(&["X", "Y * q"]),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            ExpressionError::InEquation {
                index: 1,
                name: "Y".into(),
                source: Box::new(ExpressionError::UnknownSymbol("q".into())),
            }
        );
        assert!(err.to_string().contains("Unknown variable or parameter: q"));
    }

    #[test]
    fn equation_system_checks_counts_and_names() {
        assert!(matches!(
            EquationSystem::compile(&names(&["X", "Y"]), &[], &[], &names(&["X"])),
            Err(ExpressionError::CountMismatch { what: "equations", .. })
        ));
        assert!(matches!(
            EquationSystem::compile(&names(&["X"]), &names(&["a"]), &[], &names(&["a"])),
            Err(ExpressionError::CountMismatch { what: "parameter values", .. })
        ));
        assert_eq!(
            EquationSystem::compile(&names(&["X"]), &names(&["X"]), &[1.0], &names(&["X"]))
                .err(),
            Some(ExpressionError::DuplicateName("X".into()))
        );
    }
}
