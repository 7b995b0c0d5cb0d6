// expr.rs — Time-dependence expressions: AST, parser, evaluation
//
// Parses the coefficient expression attached to a Hamiltonian term into a
// small AST. The AST is used for two things: validation (every referenced
// name must be a channel, a free variable, `t`, or a known constant /
// function) and in-process evaluation by the reference executor. The
// generated kernel still receives the original expression text.
//
// Grammar (Python-compatible subset):
//   expr    := product (('+' | '-') product)*
//   product := unary (('*' | '/') unary)*
//   unary   := ('-' | '+') unary | power
//   power   := atom ('**' unary)?
//   atom    := NUMBER | IMAG | path ('(' args ')')? | '(' expr ')'
//   path    := IDENT ('.' IDENT)*
//
// Preconditions: none.
// Postconditions: returns an AST plus any errors (lex + parse).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use num_complex::Complex64;

use crate::lexer::{Span, Token};

// ── AST ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Real(f64),
    /// Imaginary literal; the value is the imaginary part.
    Imag(f64),
    /// Possibly dotted name, e.g. `D0` or `np.pi`.
    Name(String),
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

fn to_span(span: SimpleSpan) -> Span {
    Span {
        start: span.start(),
        end: span.end(),
    }
}

impl Expr {
    fn new(kind: ExprKind, span: SimpleSpan) -> Self {
        Expr {
            kind,
            span: to_span(span),
        }
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        let span = Span {
            start: lhs.span.start,
            end: rhs.span.end,
        };
        Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        }
    }

    /// Every plain name (not a call target) in evaluation order.
    pub fn names(&self) -> Vec<(&str, Span)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let ExprKind::Name(name) = &e.kind {
                out.push((name.as_str(), e.span));
            }
        });
        out
    }

    /// Every call target with its argument count.
    pub fn calls(&self) -> Vec<(&str, usize, Span)> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let ExprKind::Call { func, args } = &e.kind {
                out.push((func.as_str(), args.len(), e.span));
            }
        });
        out
    }

    fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Real(_) | ExprKind::Imag(_) | ExprKind::Name(_) => {}
            ExprKind::Call { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
            ExprKind::Neg(inner) => inner.walk(f),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
        }
    }

    /// Evaluate with `lookup` resolving names that are not built-in constants.
    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<Complex64>) -> Result<Complex64, EvalError> {
        match &self.kind {
            ExprKind::Real(v) => Ok(Complex64::new(*v, 0.0)),
            ExprKind::Imag(v) => Ok(Complex64::new(0.0, *v)),
            ExprKind::Name(name) => {
                if let Some(c) = builtin_constant(name) {
                    return Ok(Complex64::new(c, 0.0));
                }
                lookup(name).ok_or_else(|| EvalError::UnknownName(name.clone()))
            }
            ExprKind::Call { func, args } => {
                let builtin = Builtin::lookup(func)
                    .ok_or_else(|| EvalError::UnknownFunction(func.clone()))?;
                if args.len() != 1 {
                    return Err(EvalError::Arity {
                        func: func.clone(),
                        found: args.len(),
                    });
                }
                Ok(builtin.apply(args[0].eval(lookup)?))
            }
            ExprKind::Neg(inner) => Ok(-inner.eval(lookup)?),
            ExprKind::Binary { op, lhs, rhs } => {
                let a = lhs.eval(lookup)?;
                let b = rhs.eval(lookup)?;
                Ok(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Pow => pow(a, b),
                })
            }
        }
    }

    /// Evaluate against a name → value map.
    pub fn eval_with(&self, env: &HashMap<String, Complex64>) -> Result<Complex64, EvalError> {
        self.eval(&|name| env.get(name).copied())
    }
}

fn pow(base: Complex64, exp: Complex64) -> Complex64 {
    if exp.im == 0.0 {
        if exp.re.fract() == 0.0 && exp.re.abs() <= i32::MAX as f64 {
            base.powi(exp.re as i32)
        } else {
            base.powf(exp.re)
        }
    } else {
        base.powc(exp)
    }
}

// ── Built-ins ───────────────────────────────────────────────────────────────

fn strip_namespace(name: &str) -> &str {
    name.strip_prefix("np.")
        .or_else(|| name.strip_prefix("numpy."))
        .unwrap_or(name)
}

/// Value of a built-in constant name (`pi`, `np.pi`).
pub fn builtin_constant(name: &str) -> Option<f64> {
    match strip_namespace(name) {
        "pi" => Some(PI),
        _ => None,
    }
}

/// Single-argument functions available to expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Exp,
    Sin,
    Cos,
    Tan,
    Sqrt,
    Log,
    Abs,
    Conj,
    Real,
    Imag,
    Erf,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        // cimported into the kernel directly; numpy has no `erf`.
        if name == "erf" {
            return Some(Builtin::Erf);
        }
        Some(match strip_namespace(name) {
            "exp" => Builtin::Exp,
            "sin" => Builtin::Sin,
            "cos" => Builtin::Cos,
            "tan" => Builtin::Tan,
            "sqrt" => Builtin::Sqrt,
            "log" => Builtin::Log,
            "abs" => Builtin::Abs,
            "conj" | "conjugate" => Builtin::Conj,
            "real" => Builtin::Real,
            "imag" => Builtin::Imag,
            _ => return None,
        })
    }

    fn apply(self, z: Complex64) -> Complex64 {
        match self {
            Builtin::Exp => z.exp(),
            Builtin::Sin => z.sin(),
            Builtin::Cos => z.cos(),
            Builtin::Tan => z.tan(),
            Builtin::Sqrt => z.sqrt(),
            Builtin::Log => z.ln(),
            Builtin::Abs => Complex64::new(z.norm(), 0.0),
            Builtin::Conj => z.conj(),
            Builtin::Real => Complex64::new(z.re, 0.0),
            Builtin::Imag => Complex64::new(z.im, 0.0),
            Builtin::Erf => erf(z),
        }
    }
}

/// Error function. Maclaurin series near the imaginary axis and inside
/// |z| <= 3; elsewhere the Laplace continued fraction for erfc in the right
/// half-plane, extended by oddness.
fn erf(z: Complex64) -> Complex64 {
    const SERIES_RADIUS: f64 = 3.0;
    const CF_DEPTH: u32 = 80;
    let two_over_sqrt_pi = 2.0 / PI.sqrt();

    if z.norm() <= SERIES_RADIUS || z.re.abs() < 0.5 {
        // sum_n (-1)^n z^(2n+1) / (n! (2n+1))
        let z2 = z * z;
        let mut power = z;
        let mut sum = z;
        for n in 1..1000u32 {
            power = -power * z2 / f64::from(n);
            let term = power / f64::from(2 * n + 1);
            sum += term;
            if term.norm() <= 1e-17 * sum.norm() {
                break;
            }
        }
        return sum * two_over_sqrt_pi;
    }

    let (w, sign) = if z.re < 0.0 { (-z, -1.0) } else { (z, 1.0) };
    let mut f = w;
    for k in (1..=CF_DEPTH).rev() {
        f = w + (f64::from(k) / 2.0) / f;
    }
    let erfc = (-w * w).exp() / (PI.sqrt() * f);
    (Complex64::new(1.0, 0.0) - erfc) * sign
}

/// Evaluation failure. Validation rules these out before codegen; the
/// executor can still hit them with a model that skipped validation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    UnknownName(String),
    UnknownFunction(String),
    Arity { func: String, found: usize },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnknownName(n) => write!(f, "unknown identifier '{}'", n),
            EvalError::UnknownFunction(n) => write!(f, "unknown function '{}'", n),
            EvalError::Arity { func, found } => {
                write!(f, "'{}' takes 1 argument, {} given", func, found)
            }
        }
    }
}

impl std::error::Error for EvalError {}

// ── Parser ──────────────────────────────────────────────────────────────────

/// Byte range of a parse error within the expression text.
pub fn error_span(err: &Rich<'static, Token, SimpleSpan>) -> Span {
    to_span(*err.span())
}

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub expr: Option<Expr>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an expression string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let (expr, parse_errors) = expr_parser()
        .then_ignore(end())
        .parse(stream)
        .into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    // A lex error drops characters; the surviving tokens may still parse,
    // but the result would not describe the text the kernel receives.
    let expr = if all_errors.is_empty() { expr } else { None };

    ParseResult {
        expr,
        errors: all_errors,
    }
}

fn expr_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(|expr| {
        // ── Literals ──

        let literal = select! {
            Token::Number(n) => ExprKind::Real(n),
            Token::Imag(n) => ExprKind::Imag(n),
        }
        .map_with(|kind, e| Expr::new(kind, e.span()));

        // ── Names and calls ──

        let path = select! { Token::Ident(name) => name }
            .separated_by(just(Token::Dot))
            .at_least(1)
            .collect::<Vec<String>>()
            .map(|parts| parts.join("."));

        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let name_or_call = path.then(args.or_not()).map_with(|(name, args), e| {
            let kind = match args {
                Some(args) => ExprKind::Call { func: name, args },
                None => ExprKind::Name(name),
            };
            Expr::new(kind, e.span())
        });

        let parens = expr.delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = literal.or(name_or_call).or(parens);

        // ── Unary / power ──
        //
        // `-x**2` is `-(x**2)` and `2**-1` is legal, as in Python.

        let unary = recursive(|unary| {
            let power = atom
                .then(just(Token::StarStar).ignore_then(unary.clone()).or_not())
                .map(|(base, exp)| match exp {
                    Some(exp) => Expr::binary(BinOp::Pow, base, exp),
                    None => base,
                });

            let neg = just(Token::Minus)
                .ignore_then(unary.clone())
                .map_with(|operand, e| Expr::new(ExprKind::Neg(Box::new(operand)), e.span()));

            let pos = just(Token::Plus).ignore_then(unary);

            neg.or(pos).or(power)
        });

        // ── Binary operators ──

        let product = unary.clone().foldl(
            choice((
                just(Token::Star).to(BinOp::Mul),
                just(Token::Slash).to(BinOp::Div),
            ))
            .then(unary)
            .repeated(),
            |lhs, (op, rhs)| Expr::binary(op, lhs, rhs),
        );

        product.clone().foldl(
            choice((
                just(Token::Plus).to(BinOp::Add),
                just(Token::Minus).to(BinOp::Sub),
            ))
            .then(product)
            .repeated(),
            |lhs, (op, rhs)| Expr::binary(op, lhs, rhs),
        )
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Expr {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.expr.expect("expected expression")
    }

    fn eval_ok(source: &str, env: &[(&str, Complex64)]) -> Complex64 {
        let env: HashMap<String, Complex64> =
            env.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        parse_ok(source).eval_with(&env).unwrap()
    }

    fn close(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < 1e-12
    }

    #[test]
    fn single_name() {
        let e = parse_ok("D0");
        assert_eq!(e.kind, ExprKind::Name("D0".into()));
        assert_eq!(e.span, Span { start: 0, end: 2 });
    }

    #[test]
    fn precedence_mul_over_add() {
        let v = eval_ok("1 + 2 * 3", &[]);
        assert!(close(v, Complex64::new(7.0, 0.0)));
    }

    #[test]
    fn left_associative_sub_and_div() {
        assert!(close(eval_ok("10 - 4 - 3", &[]), Complex64::new(3.0, 0.0)));
        assert!(close(eval_ok("12 / 3 / 2", &[]), Complex64::new(2.0, 0.0)));
    }

    #[test]
    fn power_binds_tighter_than_negation() {
        assert!(close(eval_ok("-2**2", &[]), Complex64::new(-4.0, 0.0)));
        assert!(close(eval_ok("2**-1", &[]), Complex64::new(0.5, 0.0)));
    }

    #[test]
    fn imaginary_literal_and_exp() {
        let v = eval_ok("np.exp(1j*np.pi)", &[]);
        assert!(close(v, Complex64::new(-1.0, 0.0)));
    }

    #[test]
    fn channel_times_variable() {
        let v = eval_ok(
            "omega * D0",
            &[
                ("omega", Complex64::new(2.0, 0.0)),
                ("D0", Complex64::new(0.5, 0.5)),
            ],
        );
        assert!(close(v, Complex64::new(1.0, 1.0)));
    }

    #[test]
    fn conj_and_abs() {
        let z = Complex64::new(3.0, 4.0);
        assert!(close(eval_ok("conj(z)", &[("z", z)]), Complex64::new(3.0, -4.0)));
        assert!(close(eval_ok("abs(z)", &[("z", z)]), Complex64::new(5.0, 0.0)));
    }

    #[test]
    fn erf_values() {
        let at = |x: f64| eval_ok("erf(x)", &[("x", Complex64::new(x, 0.0))]);
        assert!(close(at(0.0), Complex64::new(0.0, 0.0)));
        assert!(close(at(0.5), Complex64::new(0.5204998778130465, 0.0)));
        assert!(close(at(1.0), Complex64::new(0.8427007929497149, 0.0)));
        assert!(close(at(2.0), Complex64::new(0.9953222650189527, 0.0)));
        assert!(close(at(4.0), Complex64::new(0.9999999845827421, 0.0)));
        assert!(close(at(-1.0), -at(1.0)));
        assert!(close(at(-4.0), -at(4.0)));
    }

    #[test]
    fn bare_dot_literals_evaluate() {
        let v = eval_ok(".5*t + 1. - .25j", &[("t", Complex64::new(2.0, 0.0))]);
        assert!(close(v, Complex64::new(2.0, -0.25)));
    }

    #[test]
    fn erf_is_not_a_numpy_function() {
        assert_eq!(Builtin::lookup("erf"), Some(Builtin::Erf));
        assert_eq!(Builtin::lookup("np.erf"), None);
    }

    #[test]
    fn names_and_calls_are_collected() {
        let e = parse_ok("np.exp(-1j*w*t) * D0 + sin(U0)");
        let names: Vec<&str> = e.names().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["w", "t", "D0", "U0"]);
        let calls: Vec<&str> = e.calls().into_iter().map(|(n, _, _)| n).collect();
        assert_eq!(calls, vec!["np.exp", "sin"]);
    }

    #[test]
    fn name_span_points_into_source() {
        let src = "2 * foo";
        let e = parse_ok(src);
        let (name, span) = e.names()[0];
        assert_eq!(name, "foo");
        assert_eq!(&src[span.start..span.end], "foo");
    }

    #[test]
    fn syntax_error_reported() {
        let result = parse("D0 *");
        assert!(!result.errors.is_empty());
        assert!(result.expr.is_none());
    }

    #[test]
    fn unbalanced_paren_reported() {
        assert!(!parse("(D0 + 1").errors.is_empty());
    }

    #[test]
    fn lex_error_rejects_expression() {
        let result = parse("D0 ? 2");
        assert!(!result.errors.is_empty());
        assert!(result.expr.is_none());
    }

    #[test]
    fn unknown_name_fails_evaluation() {
        let e = parse_ok("missing + 1");
        assert_eq!(
            e.eval_with(&HashMap::new()),
            Err(EvalError::UnknownName("missing".into()))
        );
    }

    #[test]
    fn wrong_arity_fails_evaluation() {
        let e = parse_ok("exp(1, 2)");
        assert_eq!(
            e.eval_with(&HashMap::new()),
            Err(EvalError::Arity {
                func: "exp".into(),
                found: 2
            })
        );
    }
}
