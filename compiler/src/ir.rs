//! Kernel IR – what the generated right-hand-side function computes.
//!
//! `KernelIr` is a self-contained, pre-resolved description of one kernel:
//! the positional argument contract and an ordered list of typed statements
//! (declare, evaluate channel, assign coefficient, accumulate, guarded
//! accumulate, return). Backends lower it to source text without consulting
//! the model; the reference executor runs it directly.
//!
//! Building the IR is deterministic: the same model and options always give
//! an equal `KernelIr`.

use std::collections::HashSet;
use std::fmt;

use crate::diag::{codes, Diagnostic, Loc};
use crate::expr::Expr;
use crate::model::OpSystem;
use crate::validate::ValidatedModel;

// ── Signature ──────────────────────────────────────────────────────────────

/// Type of one kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Double,
    Complex,
    ComplexArray,
    DoubleArray,
    IntArray,
    UIntArray,
    ByteArray,
}

/// What an argument carries. Indices refer to the model's term / channel /
/// variable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRole {
    Time,
    State,
    TermData(usize),
    TermIndices(usize),
    TermIndptr(usize),
    PulseArray,
    PulseIndices,
    ChannelPulses(usize),
    ChannelFc(usize),
    FreeVar(usize),
    Register,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelArg {
    pub name: String,
    pub ty: ArgType,
    pub role: ArgRole,
}

/// The fixed positional argument contract of a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub args: Vec<KernelArg>,
}

impl Signature {
    /// Contract order: `t`, `vec`, per-term CSR triples, the two global pulse
    /// tables, per-channel sample pairs, free variables, `register`.
    pub fn for_model(name: &str, model: &OpSystem) -> Self {
        let mut args = Vec::with_capacity(expected_arity(
            model.terms.len(),
            model.channels.len(),
            model.vars.len(),
        ));
        let mut push = |name: String, ty: ArgType, role: ArgRole| {
            args.push(KernelArg { name, ty, role });
        };

        push("t".into(), ArgType::Double, ArgRole::Time);
        push("vec".into(), ArgType::ComplexArray, ArgRole::State);
        for k in 0..model.terms.len() {
            push(format!("data{k}"), ArgType::ComplexArray, ArgRole::TermData(k));
            push(format!("idx{k}"), ArgType::IntArray, ArgRole::TermIndices(k));
            push(format!("ptr{k}"), ArgType::IntArray, ArgRole::TermIndptr(k));
        }
        push("pulse_array".into(), ArgType::ComplexArray, ArgRole::PulseArray);
        push("pulse_indices".into(), ArgType::UIntArray, ArgRole::PulseIndices);
        for (c, ch) in model.channels.iter().enumerate() {
            push(pulses_arg(&ch.name), ArgType::DoubleArray, ArgRole::ChannelPulses(c));
            push(fc_arg(&ch.name), ArgType::DoubleArray, ArgRole::ChannelFc(c));
        }
        for (v, var) in model.vars.iter().enumerate() {
            push(var.name.clone(), ArgType::Complex, ArgRole::FreeVar(v));
        }
        push("register".into(), ArgType::ByteArray, ArgRole::Register);

        Signature {
            name: name.to_string(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.args.iter().position(|a| a.name == name)
    }
}

/// `2 + 3×terms + 2 + 2×channels + vars + 1`.
pub fn expected_arity(terms: usize, channels: usize, vars: usize) -> usize {
    2 + 3 * terms + 2 + 2 * channels + vars + 1
}

fn pulses_arg(channel: &str) -> String {
    format!("{channel}_pulses")
}

fn fc_arg(channel: &str) -> String {
    format!("{channel}_fc")
}

fn coeff_local(term: usize) -> String {
    format!("td{term}")
}

// ── Statements ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalType {
    /// Loop index placeholder.
    Index,
    /// Row count of the state vector.
    RowCount,
    /// Heap buffer of `num_rows` complex values, zero-initialized.
    ComplexBuffer,
    Complex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDecl {
    pub name: String,
    pub ty: LocalType,
}

/// Scale applied to one term's product.
#[derive(Debug, Clone, PartialEq)]
pub enum Coeff {
    One,
    Local(String),
}

/// `out += coeff * (M_term · vec)` over the term's CSR arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulate {
    pub term: usize,
    pub data: String,
    pub indices: String,
    pub indptr: String,
    pub coeff: Coeff,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare(LocalDecl),
    /// `local = channel_value(t, index, pulses, pulse_array, pulse_indices, fc, register)`
    EvalChannel {
        local: String,
        channel_index: u32,
        pulses: String,
        fc: String,
    },
    /// `local = <expression>`; `source` is the text handed to the backend.
    AssignCoeff {
        local: String,
        term: usize,
        source: String,
        expr: Expr,
    },
    /// Accumulate only when `|coeff| > tolerance`.
    GuardedAccumulate {
        tolerance: f64,
        acc: Accumulate,
    },
    Accumulate(Accumulate),
    Return,
}

// ── Top-level ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct KernelIr {
    pub signature: Signature,
    pub body: Vec<Stmt>,
    /// Global sample step of the model the kernel was built for.
    pub dt: f64,
    pub tolerance: f64,
}

impl KernelIr {
    /// Term indices in accumulation order.
    pub fn accumulation_order(&self) -> Vec<usize> {
        self.body
            .iter()
            .filter_map(|s| match s {
                Stmt::Accumulate(acc) | Stmt::GuardedAccumulate { acc, .. } => Some(acc.term),
                _ => None,
            })
            .collect()
    }

    pub fn locals(&self) -> impl Iterator<Item = &LocalDecl> {
        self.body.iter().filter_map(|s| match s {
            Stmt::Declare(d) => Some(d),
            _ => None,
        })
    }
}

/// Build the kernel IR for a validated model.
///
/// Fails only if a time-dependent term has no parsed expression, which
/// validation reports first.
pub fn build_ir(
    model: &OpSystem,
    validated: &ValidatedModel,
    function_name: &str,
) -> Result<KernelIr, Diagnostic> {
    let signature = Signature::for_model(function_name, model);
    let mut body = Vec::new();

    // ── Locals ──
    let mut declare = |name: String, ty: LocalType| body.push(Stmt::Declare(LocalDecl { name, ty }));
    declare("row".into(), LocalType::Index);
    declare("num_rows".into(), LocalType::RowCount);
    declare("out".into(), LocalType::ComplexBuffer);
    for ch in &model.channels {
        declare(ch.name.clone(), LocalType::Complex);
    }
    for (i, term) in model.terms.iter().enumerate() {
        if term.time_dependence().is_some() {
            declare(coeff_local(i), LocalType::Complex);
        }
    }

    // ── Channels, all of them, before any accumulation ──
    for ch in &model.channels {
        body.push(Stmt::EvalChannel {
            local: ch.name.clone(),
            channel_index: ch.index,
            pulses: pulses_arg(&ch.name),
            fc: fc_arg(&ch.name),
        });
    }

    // ── Terms in model order ──
    for (i, term) in model.terms.iter().enumerate() {
        let mut acc = Accumulate {
            term: i,
            data: format!("data{i}"),
            indices: format!("idx{i}"),
            indptr: format!("ptr{i}"),
            coeff: Coeff::One,
        };
        match term.time_dependence() {
            Some(source) => {
                let expr = validated
                    .coeffs
                    .get(i)
                    .and_then(Option::as_ref)
                    .ok_or_else(|| {
                        Diagnostic::error(Loc::Term(i), "time-dependence expression was not parsed")
                            .with_code(codes::E0600)
                    })?;
                let local = coeff_local(i);
                body.push(Stmt::AssignCoeff {
                    local: local.clone(),
                    term: i,
                    source: source.trim().to_string(),
                    expr: expr.clone(),
                });
                acc.coeff = Coeff::Local(local);
                body.push(Stmt::GuardedAccumulate {
                    tolerance: validated.tolerance,
                    acc,
                });
            }
            None => body.push(Stmt::Accumulate(acc)),
        }
    }

    body.push(Stmt::Return);

    Ok(KernelIr {
        signature,
        body,
        dt: model.dt,
        tolerance: validated.tolerance,
    })
}

// ── Verification ───────────────────────────────────────────────────────────

/// Postconditions of `build_ir`.
#[derive(Debug, Clone)]
pub struct IrCert {
    /// K1: argument count equals `2 + 3T + 2 + 2C + V + 1`.
    pub k1_arity: bool,
    /// K2: argument and local names are pairwise distinct.
    pub k2_unique_names: bool,
    /// K3: every name a statement reads is an argument or an earlier local.
    pub k3_names_declared: bool,
    /// K4: each term accumulated once, in model order, guarded iff time-dependent.
    pub k4_terms_in_order: bool,
    /// K5: every channel is evaluated before the first accumulation.
    pub k5_channels_first: bool,
    /// K6: exactly one `Return`, as the last statement.
    pub k6_single_return: bool,
}

impl crate::pass::StageCert for IrCert {
    fn all_pass(&self) -> bool {
        self.k1_arity
            && self.k2_unique_names
            && self.k3_names_declared
            && self.k4_terms_in_order
            && self.k5_channels_first
            && self.k6_single_return
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("K1_arity", self.k1_arity),
            ("K2_unique_names", self.k2_unique_names),
            ("K3_names_declared", self.k3_names_declared),
            ("K4_terms_in_order", self.k4_terms_in_order),
            ("K5_channels_first", self.k5_channels_first),
            ("K6_single_return", self.k6_single_return),
        ]
    }
}

/// Verify IR postconditions against the model it was built from.
pub fn verify_ir(ir: &KernelIr, model: &OpSystem) -> IrCert {
    IrCert {
        k1_arity: ir.signature.arity()
            == expected_arity(model.terms.len(), model.channels.len(), model.vars.len()),
        k2_unique_names: verify_unique_names(ir),
        k3_names_declared: verify_names_declared(ir),
        k4_terms_in_order: verify_terms_in_order(ir, model),
        k5_channels_first: verify_channels_first(ir, model),
        k6_single_return: matches!(ir.body.last(), Some(Stmt::Return))
            && ir.body.iter().filter(|s| matches!(s, Stmt::Return)).count() == 1,
    }
}

fn verify_unique_names(ir: &KernelIr) -> bool {
    let mut seen = HashSet::new();
    ir.signature
        .args
        .iter()
        .map(|a| a.name.as_str())
        .chain(ir.locals().map(|d| d.name.as_str()))
        .all(|n| seen.insert(n))
}

fn verify_names_declared(ir: &KernelIr) -> bool {
    let mut known: HashSet<&str> = ir.signature.args.iter().map(|a| a.name.as_str()).collect();
    for stmt in &ir.body {
        let reads: Vec<&str> = match stmt {
            Stmt::Declare(d) => {
                known.insert(d.name.as_str());
                continue;
            }
            Stmt::EvalChannel {
                local, pulses, fc, ..
            } => vec![
                "t",
                local.as_str(),
                pulses.as_str(),
                "pulse_array",
                "pulse_indices",
                fc.as_str(),
                "register",
            ],
            Stmt::AssignCoeff { local, expr, .. } => {
                let mut names: Vec<&str> = expr
                    .names()
                    .into_iter()
                    .map(|(n, _)| n)
                    .filter(|n| crate::expr::builtin_constant(n).is_none())
                    .collect();
                names.push(local);
                names
            }
            Stmt::Accumulate(acc) | Stmt::GuardedAccumulate { acc, .. } => {
                let mut names = vec![
                    acc.data.as_str(),
                    acc.indices.as_str(),
                    acc.indptr.as_str(),
                    "vec",
                    "out",
                    "num_rows",
                ];
                if let Coeff::Local(l) = &acc.coeff {
                    names.push(l);
                }
                names
            }
            Stmt::Return => vec!["out", "num_rows"],
        };
        if !reads.iter().all(|n| known.contains(n)) {
            return false;
        }
    }
    true
}

fn verify_terms_in_order(ir: &KernelIr, model: &OpSystem) -> bool {
    let expected: Vec<usize> = (0..model.terms.len()).collect();
    if ir.accumulation_order() != expected {
        return false;
    }
    ir.body.iter().all(|s| match s {
        Stmt::Accumulate(acc) => {
            acc.coeff == Coeff::One && model.terms[acc.term].time_dependence().is_none()
        }
        Stmt::GuardedAccumulate { acc, .. } => {
            matches!(acc.coeff, Coeff::Local(_))
                && model.terms[acc.term].time_dependence().is_some()
        }
        _ => true,
    })
}

fn verify_channels_first(ir: &KernelIr, model: &OpSystem) -> bool {
    let first_acc = ir
        .body
        .iter()
        .position(|s| matches!(s, Stmt::Accumulate(_) | Stmt::GuardedAccumulate { .. }))
        .unwrap_or(ir.body.len());
    let evaluated: Vec<&str> = ir.body[..first_acc]
        .iter()
        .filter_map(|s| match s {
            Stmt::EvalChannel { local, .. } => Some(local.as_str()),
            _ => None,
        })
        .collect();
    let expected: Vec<&str> = model.channels.iter().map(|c| c.name.as_str()).collect();
    evaluated == expected
}

// ── Textual dump ───────────────────────────────────────────────────────────

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArgType::Double => "f64",
            ArgType::Complex => "c128",
            ArgType::ComplexArray => "[c128]",
            ArgType::DoubleArray => "[f64]",
            ArgType::IntArray => "[i32]",
            ArgType::UIntArray => "[u32]",
            ArgType::ByteArray => "[u8]",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Coeff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coeff::One => f.write_str("1.0"),
            Coeff::Local(l) => f.write_str(l),
        }
    }
}

impl fmt::Display for Accumulate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out += {} * csr({}, {}, {}) . vec",
            self.coeff, self.data, self.indices, self.indptr
        )
    }
}

impl fmt::Display for KernelIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kernel {} (dt = {}) {{", self.signature.name, self.dt)?;
        for (i, arg) in self.signature.args.iter().enumerate() {
            writeln!(f, "  arg {:>3} {}: {}", i, arg.name, arg.ty)?;
        }
        for stmt in &self.body {
            match stmt {
                Stmt::Declare(d) => {
                    let init = match d.ty {
                        LocalType::Index => "index",
                        LocalType::RowCount => "index = len(vec)",
                        LocalType::ComplexBuffer => "[c128; num_rows] = 0",
                        LocalType::Complex => "c128",
                    };
                    writeln!(f, "  let {}: {}", d.name, init)?;
                }
                Stmt::EvalChannel {
                    local,
                    channel_index,
                    pulses,
                    fc,
                } => writeln!(
                    f,
                    "  {} = channel_value(t, {}, {}, pulse_array, pulse_indices, {}, register)",
                    local, channel_index, pulses, fc
                )?,
                Stmt::AssignCoeff { local, source, .. } => {
                    writeln!(f, "  {} = `{}`", local, source)?
                }
                Stmt::GuardedAccumulate { tolerance, acc } => {
                    writeln!(f, "  if |{}| > {:e}: {}", acc.coeff, tolerance, acc)?
                }
                Stmt::Accumulate(acc) => writeln!(f, "  {}", acc)?,
                Stmt::Return => writeln!(f, "  return out[..num_rows]")?,
            }
        }
        writeln!(f, "}}")
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
