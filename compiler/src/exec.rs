// exec.rs — Reference executor for kernel IR
//
// Runs a `KernelIr` in-process against positional arguments, calling the two
// runtime primitives through `KernelPrimitives`. `ReferencePrimitives`
// implements them in plain Rust: CSR scaled accumulation and a sampled
// channel evaluator (piecewise-constant envelopes, register-conditioned
// entries, accumulated frame-change phase).
//
// The executor follows the generated kernel statement by statement, so any
// contract property of the emitted source can be checked here without a
// native toolchain.
//
// Preconditions: the IR passed `ir::verify_ir`.
// Postconditions: returns a freshly allocated output of length `len(vec)`.
// Failure modes: argument count or type mismatches against the signature and
//                expression evaluation failures produce `ExecError`. Array
//                lengths are not validated; out-of-range reads contribute zero.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use num_complex::Complex64;

use crate::expr::EvalError;
use crate::ir::{Accumulate, ArgRole, ArgType, Coeff, KernelIr, LocalType, Signature, Stmt};
use crate::model::OpSystem;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

// ── Primitives ─────────────────────────────────────────────────────────────

/// Inputs of one `channel_value` call.
#[derive(Debug, Clone, Copy)]
pub struct ChannelCall<'a> {
    pub t: f64,
    pub channel_index: u32,
    /// Flattened `[start, stop, pulse_id, cond_register]` quadruples.
    pub envelope: &'a [f64],
    pub pulse_array: &'a [Complex64],
    pub pulse_indices: &'a [u32],
    /// Flattened `[time, phase, cond_register]` triples, sorted by time.
    pub fc: &'a [f64],
    pub register: &'a [u8],
}

/// A borrowed CSR matrix.
#[derive(Debug, Clone, Copy)]
pub struct CsrView<'a> {
    pub data: &'a [Complex64],
    pub indices: &'a [i32],
    pub indptr: &'a [i32],
}

/// The two runtime primitives a kernel calls.
pub trait KernelPrimitives {
    fn channel_value(&self, call: ChannelCall<'_>) -> Complex64;

    /// `out[..num_rows] += scale * (M · vec)`.
    fn spmvpy(
        &self,
        m: CsrView<'_>,
        vec: &[Complex64],
        scale: Complex64,
        out: &mut [Complex64],
        num_rows: usize,
    );
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferencePrimitives;

impl KernelPrimitives for ReferencePrimitives {
    fn channel_value(&self, call: ChannelCall<'_>) -> Complex64 {
        channel_value(call)
    }

    fn spmvpy(
        &self,
        m: CsrView<'_>,
        vec: &[Complex64],
        scale: Complex64,
        out: &mut [Complex64],
        num_rows: usize,
    ) {
        spmvpy(m, vec, scale, out, num_rows)
    }
}

fn condition_holds(cond: f64, register: &[u8]) -> bool {
    cond < 0.0 || register.get(cond as usize).is_some_and(|&bit| bit != 0)
}

/// Sampled channel value at `t`.
///
/// The first envelope entry with `start <= t < stop` whose condition holds
/// selects pulse `pulse_id`; its samples `pulse_array[pulse_indices[id]..
/// pulse_indices[id + 1]]` are spread evenly over `[start, stop)`. A nonzero
/// value is then rotated by the summed phase of every frame change with
/// `time <= t` whose condition holds. `channel_index` does not affect the
/// sampled value.
pub fn channel_value(call: ChannelCall<'_>) -> Complex64 {
    let t = call.t;
    let mut out = ZERO;
    for entry in call.envelope.chunks_exact(4) {
        let (start, stop, pulse_id, cond) = (entry[0], entry[1], entry[2], entry[3]);
        if !(t >= start && t < stop) || !condition_holds(cond, call.register) {
            continue;
        }
        let pid = pulse_id as usize;
        let (Some(&first), Some(&last)) =
            (call.pulse_indices.get(pid), call.pulse_indices.get(pid + 1))
        else {
            break;
        };
        let (first, last) = (first as usize, last as usize);
        if last > first {
            let len = last - first;
            let offset = (((t - start) / (stop - start)) * len as f64).floor() as usize;
            out = call
                .pulse_array
                .get(first + offset.min(len - 1))
                .copied()
                .unwrap_or(ZERO);
        }
        break;
    }

    if out != ZERO {
        let mut phase = 0.0;
        for entry in call.fc.chunks_exact(3) {
            if t < entry[0] {
                break;
            }
            if condition_holds(entry[2], call.register) {
                phase += entry[1];
            }
        }
        if phase != 0.0 {
            out *= Complex64::new(0.0, phase).exp();
        }
    }
    out
}

/// Reference CSR accumulation. Rows past `indptr` and out-of-range column
/// indices contribute nothing.
pub fn spmvpy(
    m: CsrView<'_>,
    vec: &[Complex64],
    scale: Complex64,
    out: &mut [Complex64],
    num_rows: usize,
) {
    for (row, acc) in out.iter_mut().enumerate().take(num_rows) {
        let (Some(&start), Some(&end)) = (m.indptr.get(row), m.indptr.get(row + 1)) else {
            break;
        };
        let mut dot = ZERO;
        for k in start.max(0) as usize..end.max(0) as usize {
            let (Some(&v), Some(&col)) = (m.data.get(k), m.indices.get(k)) else {
                break;
            };
            if let Some(&x) = usize::try_from(col).ok().and_then(|c| vec.get(c)) {
                dot += v * x;
            }
        }
        *acc += scale * dot;
    }
}

// ── Arguments ──────────────────────────────────────────────────────────────

/// One positional kernel argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Double(f64),
    Complex(Complex64),
    ComplexArray(Vec<Complex64>),
    DoubleArray(Vec<f64>),
    IntArray(Vec<i32>),
    UIntArray(Vec<u32>),
    ByteArray(Vec<u8>),
}

impl ArgValue {
    pub fn ty(&self) -> ArgType {
        match self {
            ArgValue::Double(_) => ArgType::Double,
            ArgValue::Complex(_) => ArgType::Complex,
            ArgValue::ComplexArray(_) => ArgType::ComplexArray,
            ArgValue::DoubleArray(_) => ArgType::DoubleArray,
            ArgValue::IntArray(_) => ArgType::IntArray,
            ArgValue::UIntArray(_) => ArgType::UIntArray,
            ArgValue::ByteArray(_) => ArgType::ByteArray,
        }
    }
}

/// Envelope and frame-change samples for one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSamples {
    pub envelope: Vec<f64>,
    pub fc: Vec<f64>,
}

/// Per-call inputs that are not part of the model.
#[derive(Debug, Clone, Default)]
pub struct RuntimeInputs {
    pub t: f64,
    pub state: Vec<Complex64>,
    pub pulse_array: Vec<Complex64>,
    pub pulse_indices: Vec<u32>,
    /// Missing channels get empty sample arrays.
    pub channels: HashMap<String, ChannelSamples>,
    pub vars: HashMap<String, Complex64>,
    pub register: Vec<u8>,
}

impl RuntimeInputs {
    pub fn new(t: f64, state: Vec<Complex64>) -> Self {
        RuntimeInputs {
            t,
            state,
            ..RuntimeInputs::default()
        }
    }

    pub fn with_pulses(mut self, pulse_array: Vec<Complex64>, pulse_indices: Vec<u32>) -> Self {
        self.pulse_array = pulse_array;
        self.pulse_indices = pulse_indices;
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, samples: ChannelSamples) -> Self {
        self.channels.insert(name.into(), samples);
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: Complex64) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn with_register(mut self, register: Vec<u8>) -> Self {
        self.register = register;
        self
    }
}

/// Positional argument list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelArgs {
    pub values: Vec<ArgValue>,
}

impl KernelArgs {
    pub fn positional(values: Vec<ArgValue>) -> Self {
        KernelArgs { values }
    }

    /// Assemble arguments in contract order from the model's matrices and
    /// the per-call inputs.
    pub fn for_model(
        model: &OpSystem,
        signature: &Signature,
        inputs: &RuntimeInputs,
    ) -> Result<Self, ExecError> {
        let mut values = Vec::with_capacity(signature.arity());
        for arg in &signature.args {
            let value = match arg.role {
                ArgRole::Time => ArgValue::Double(inputs.t),
                ArgRole::State => ArgValue::ComplexArray(inputs.state.clone()),
                ArgRole::TermData(k) => ArgValue::ComplexArray(term(model, k)?.data.clone()),
                ArgRole::TermIndices(k) => ArgValue::IntArray(term(model, k)?.indices.clone()),
                ArgRole::TermIndptr(k) => ArgValue::IntArray(term(model, k)?.indptr.clone()),
                ArgRole::PulseArray => ArgValue::ComplexArray(inputs.pulse_array.clone()),
                ArgRole::PulseIndices => ArgValue::UIntArray(inputs.pulse_indices.clone()),
                ArgRole::ChannelPulses(c) => {
                    ArgValue::DoubleArray(samples(model, inputs, c)?.envelope)
                }
                ArgRole::ChannelFc(c) => ArgValue::DoubleArray(samples(model, inputs, c)?.fc),
                ArgRole::FreeVar(v) => {
                    let name = &model
                        .vars
                        .get(v)
                        .ok_or_else(|| ExecError::Unbound(arg.name.clone()))?
                        .name;
                    let value = inputs
                        .vars
                        .get(name)
                        .ok_or_else(|| ExecError::MissingVar(name.clone()))?;
                    ArgValue::Complex(*value)
                }
                ArgRole::Register => ArgValue::ByteArray(inputs.register.clone()),
            };
            values.push(value);
        }
        Ok(KernelArgs { values })
    }
}

fn term(model: &OpSystem, k: usize) -> Result<&crate::model::CsrMatrix, ExecError> {
    model
        .terms
        .get(k)
        .map(|t| &t.matrix)
        .ok_or_else(|| ExecError::Unbound(format!("data{k}")))
}

fn samples(model: &OpSystem, inputs: &RuntimeInputs, c: usize) -> Result<ChannelSamples, ExecError> {
    let ch = model
        .channels
        .get(c)
        .ok_or_else(|| ExecError::Unbound(format!("channel #{c}")))?;
    Ok(inputs.channels.get(&ch.name).cloned().unwrap_or_default())
}

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ExecError {
    Arity {
        expected: usize,
        found: usize,
    },
    ArgType {
        position: usize,
        name: String,
        expected: ArgType,
        found: ArgType,
    },
    MissingVar(String),
    /// A statement read a name with no binding of the needed type.
    Unbound(String),
    Eval {
        term: usize,
        source: EvalError,
    },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Arity { expected, found } => {
                write!(f, "kernel takes {} arguments, {} given", expected, found)
            }
            ExecError::ArgType {
                position,
                name,
                expected,
                found,
            } => write!(
                f,
                "argument {} (`{}`) must be {}, got {}",
                position, name, expected, found
            ),
            ExecError::MissingVar(name) => write!(f, "no value for free variable `{}`", name),
            ExecError::Unbound(name) => write!(f, "`{}` is not bound", name),
            ExecError::Eval { term, source } => {
                write!(f, "term {} coefficient: {}", term, source)
            }
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::Eval { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ── Executor ───────────────────────────────────────────────────────────────

struct Frame<'k> {
    args: HashMap<&'k str, &'k ArgValue>,
    locals: HashMap<&'k str, Complex64>,
    num_rows: usize,
    out: Vec<Complex64>,
}

macro_rules! arg_accessor {
    ($fn_name:ident, $variant:ident, $t:ty) => {
        fn $fn_name(&self, name: &str) -> Result<&'k $t, ExecError> {
            match self.args.get(name).copied() {
                Some(ArgValue::$variant(v)) => Ok(v),
                _ => Err(ExecError::Unbound(name.to_string())),
            }
        }
    };
}

impl<'k> Frame<'k> {
    arg_accessor!(complex_array, ComplexArray, Vec<Complex64>);
    arg_accessor!(double_array, DoubleArray, Vec<f64>);
    arg_accessor!(int_array, IntArray, Vec<i32>);
    arg_accessor!(uint_array, UIntArray, Vec<u32>);
    arg_accessor!(byte_array, ByteArray, Vec<u8>);

    fn time(&self) -> Result<f64, ExecError> {
        match self.args.get("t").copied() {
            Some(ArgValue::Double(t)) => Ok(*t),
            _ => Err(ExecError::Unbound("t".into())),
        }
    }

    /// Scalar visible to coefficient expressions.
    fn scalar(&self, name: &str) -> Option<Complex64> {
        if let Some(z) = self.locals.get(name) {
            return Some(*z);
        }
        match self.args.get(name).copied() {
            Some(ArgValue::Complex(z)) => Some(*z),
            Some(ArgValue::Double(x)) => Some(Complex64::new(*x, 0.0)),
            _ => None,
        }
    }

    fn coeff(&self, coeff: &Coeff) -> Result<Complex64, ExecError> {
        match coeff {
            Coeff::One => Ok(ONE),
            Coeff::Local(name) => self
                .locals
                .get(name.as_str())
                .copied()
                .ok_or_else(|| ExecError::Unbound(name.clone())),
        }
    }

    fn accumulate(
        &mut self,
        acc: &Accumulate,
        scale: Complex64,
        prims: &dyn KernelPrimitives,
    ) -> Result<(), ExecError> {
        let m = CsrView {
            data: self.complex_array(&acc.data)?,
            indices: self.int_array(&acc.indices)?,
            indptr: self.int_array(&acc.indptr)?,
        };
        let vec = self.complex_array("vec")?;
        prims.spmvpy(m, vec, scale, &mut self.out, self.num_rows);
        Ok(())
    }
}

/// Check `args` against the signature: count first, then each position's type.
pub fn bind_args(signature: &Signature, args: &KernelArgs) -> Result<(), ExecError> {
    if args.values.len() != signature.arity() {
        return Err(ExecError::Arity {
            expected: signature.arity(),
            found: args.values.len(),
        });
    }
    for (position, (param, value)) in signature.args.iter().zip(&args.values).enumerate() {
        if param.ty != value.ty() {
            return Err(ExecError::ArgType {
                position,
                name: param.name.clone(),
                expected: param.ty,
                found: value.ty(),
            });
        }
    }
    Ok(())
}

/// Run one kernel invocation.
pub fn execute(
    ir: &KernelIr,
    args: &KernelArgs,
    prims: &dyn KernelPrimitives,
) -> Result<Vec<Complex64>, ExecError> {
    bind_args(&ir.signature, args)?;
    let mut frame = Frame {
        args: ir
            .signature
            .args
            .iter()
            .map(|a| a.name.as_str())
            .zip(args.values.iter())
            .collect(),
        locals: HashMap::new(),
        num_rows: 0,
        out: Vec::new(),
    };

    for stmt in &ir.body {
        match stmt {
            Stmt::Declare(d) => match d.ty {
                LocalType::Index => {}
                LocalType::RowCount => frame.num_rows = frame.complex_array("vec")?.len(),
                LocalType::ComplexBuffer => frame.out = vec![ZERO; frame.num_rows],
                LocalType::Complex => {
                    frame.locals.insert(d.name.as_str(), ZERO);
                }
            },
            Stmt::EvalChannel {
                local,
                channel_index,
                pulses,
                fc,
            } => {
                let value = prims.channel_value(ChannelCall {
                    t: frame.time()?,
                    channel_index: *channel_index,
                    envelope: frame.double_array(pulses)?,
                    pulse_array: frame.complex_array("pulse_array")?,
                    pulse_indices: frame.uint_array("pulse_indices")?,
                    fc: frame.double_array(fc)?,
                    register: frame.byte_array("register")?,
                });
                frame.locals.insert(local.as_str(), value);
            }
            Stmt::AssignCoeff {
                local, term, expr, ..
            } => {
                let value = expr
                    .eval(&|name: &str| frame.scalar(name))
                    .map_err(|source| ExecError::Eval {
                        term: *term,
                        source,
                    })?;
                frame.locals.insert(local.as_str(), value);
            }
            Stmt::GuardedAccumulate { tolerance, acc } => {
                let scale = frame.coeff(&acc.coeff)?;
                if scale.norm() > *tolerance {
                    frame.accumulate(acc, scale, prims)?;
                }
            }
            Stmt::Accumulate(acc) => {
                let scale = frame.coeff(&acc.coeff)?;
                frame.accumulate(acc, scale, prims)?;
            }
            Stmt::Return => break,
        }
    }
    Ok(frame.out)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build_ir;
    use crate::model::{CsrMatrix, HamiltonianTerm};
    use crate::validate::validate;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn compile(model: &OpSystem) -> KernelIr {
        let v = validate(model, "f", None);
        assert!(v.diagnostics.iter().all(|d| !d.is_error()), "{:?}", v.diagnostics);
        build_ir(model, &v.validated, "f").unwrap()
    }

    fn run(model: &OpSystem, inputs: &RuntimeInputs) -> Vec<Complex64> {
        let ir = compile(model);
        let args = KernelArgs::for_model(model, &ir.signature, inputs).unwrap();
        execute(&ir, &args, &ReferencePrimitives).unwrap()
    }

    #[test]
    fn spmvpy_accumulates_scaled_product() {
        let m = CsrMatrix::from_dense(&[vec![c(1.0, 0.0), c(2.0, 0.0)], vec![c(0.0, 0.0), c(0.0, 1.0)]]);
        let mut out = vec![c(1.0, 0.0), c(1.0, 0.0)];
        spmvpy(
            CsrView {
                data: &m.data,
                indices: &m.indices,
                indptr: &m.indptr,
            },
            &[c(1.0, 0.0), c(1.0, 0.0)],
            c(2.0, 0.0),
            &mut out,
            2,
        );
        assert_eq!(out, vec![c(7.0, 0.0), c(1.0, 2.0)]);
    }

    #[test]
    fn spmvpy_zero_length_matrix_is_noop() {
        let mut out = vec![c(3.0, 0.0)];
        spmvpy(
            CsrView {
                data: &[],
                indices: &[],
                indptr: &[],
            },
            &[c(1.0, 0.0)],
            ONE,
            &mut out,
            1,
        );
        assert_eq!(out, vec![c(3.0, 0.0)]);
    }

    fn call<'a>(t: f64, envelope: &'a [f64], samples: &'a [Complex64], fc: &'a [f64], register: &'a [u8]) -> ChannelCall<'a> {
        ChannelCall {
            t,
            channel_index: 0,
            envelope,
            pulse_array: samples,
            pulse_indices: &[0, 4],
            fc,
            register,
        }
    }

    const SAMPLES: [Complex64; 4] = [
        Complex64::new(0.1, 0.0),
        Complex64::new(0.2, 0.0),
        Complex64::new(0.3, 0.0),
        Complex64::new(0.4, 0.0),
    ];

    #[test]
    fn channel_value_samples_piecewise_constant() {
        let env = [0.0, 4.0, 0.0, -1.0];
        assert_eq!(channel_value(call(0.0, &env, &SAMPLES, &[], &[])), c(0.1, 0.0));
        assert_eq!(channel_value(call(2.5, &env, &SAMPLES, &[], &[])), c(0.3, 0.0));
        assert_eq!(channel_value(call(3.99, &env, &SAMPLES, &[], &[])), c(0.4, 0.0));
        assert_eq!(channel_value(call(4.0, &env, &SAMPLES, &[], &[])), ZERO);
        assert_eq!(channel_value(call(-1.0, &env, &SAMPLES, &[], &[])), ZERO);
    }

    #[test]
    fn channel_value_respects_register_condition() {
        let env = [0.0, 4.0, 0.0, 1.0];
        assert_eq!(channel_value(call(1.0, &env, &SAMPLES, &[], &[1, 0])), ZERO);
        assert_eq!(channel_value(call(1.0, &env, &SAMPLES, &[], &[0, 1])), c(0.2, 0.0));
    }

    #[test]
    fn channel_value_applies_frame_changes_up_to_t() {
        let env = [0.0, 4.0, 0.0, -1.0];
        let half_pi = std::f64::consts::FRAC_PI_2;
        let fc = [1.0, half_pi, -1.0, 3.0, half_pi, -1.0];
        let z = channel_value(call(2.0, &env, &SAMPLES, &fc, &[]));
        assert!((z - c(0.0, 0.3)).norm() < 1e-12, "{z}");
        let z = channel_value(call(3.5, &env, &SAMPLES, &fc, &[]));
        assert!((z - c(-0.4, 0.0)).norm() < 1e-12, "{z}");
    }

    #[test]
    fn zero_terms_give_zero_vector() {
        let model = OpSystem::new(1.0);
        let out = run(&model, &RuntimeInputs::new(0.3, vec![c(1.0, 0.0); 3]));
        assert_eq!(out, vec![ZERO; 3]);
    }

    #[test]
    fn constant_term_gives_matrix_product() {
        let m = CsrMatrix::from_dense(&[vec![ZERO, ONE], vec![ONE, ZERO]]);
        let model = OpSystem::new(1.0).with_term(HamiltonianTerm::constant(m));
        for t in [0.0, 1.5, -2.0] {
            let out = run(&model, &RuntimeInputs::new(t, vec![c(1.0, 0.0), c(0.0, 2.0)]));
            assert_eq!(out, vec![c(0.0, 2.0), c(1.0, 0.0)]);
        }
    }

    #[test]
    fn coefficient_uses_vars_and_time() {
        let model = OpSystem::new(1.0)
            .with_term(HamiltonianTerm::driven(CsrMatrix::identity(1), "a * t"))
            .with_var("a");
        let inputs = RuntimeInputs::new(2.0, vec![ONE]).with_var("a", c(0.0, 1.5));
        assert_eq!(run(&model, &inputs), vec![c(0.0, 3.0)]);
    }

    #[test]
    fn guard_skips_small_coefficients() {
        let model = OpSystem::new(1.0)
            .with_term(HamiltonianTerm::driven(CsrMatrix::identity(1), "a"))
            .with_var("a")
            .with_coeff_tolerance(1e-3);
        let small = RuntimeInputs::new(0.0, vec![ONE]).with_var("a", c(1e-3, 0.0));
        assert_eq!(run(&model, &small), vec![ZERO]);
        let large = RuntimeInputs::new(0.0, vec![ONE]).with_var("a", c(2e-3, 0.0));
        assert_eq!(run(&model, &large), vec![c(2e-3, 0.0)]);
    }

    #[test]
    fn channel_drives_coefficient() {
        let model = OpSystem::new(1.0)
            .with_term(HamiltonianTerm::driven(CsrMatrix::identity(1), "D0"))
            .with_channel("D0", 0);
        let inputs = RuntimeInputs::new(1.0, vec![ONE])
            .with_pulses(SAMPLES.to_vec(), vec![0, 4])
            .with_channel(
                "D0",
                ChannelSamples {
                    envelope: vec![0.0, 4.0, 0.0, -1.0],
                    fc: vec![],
                },
            );
        assert_eq!(run(&model, &inputs), vec![c(0.2, 0.0)]);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let model = OpSystem::new(1.0);
        let ir = compile(&model);
        let err = execute(&ir, &KernelArgs::positional(vec![ArgValue::Double(0.0)]), &ReferencePrimitives)
            .unwrap_err();
        assert_eq!(err, ExecError::Arity { expected: 5, found: 1 });
    }

    #[test]
    fn wrong_type_names_position() {
        let model = OpSystem::new(1.0);
        let ir = compile(&model);
        let args = KernelArgs::positional(vec![
            ArgValue::Double(0.0),
            ArgValue::DoubleArray(vec![]),
            ArgValue::ComplexArray(vec![]),
            ArgValue::UIntArray(vec![]),
            ArgValue::ByteArray(vec![]),
        ]);
        match execute(&ir, &args, &ReferencePrimitives) {
            Err(ExecError::ArgType { position, name, .. }) => {
                assert_eq!(position, 1);
                assert_eq!(name, "vec");
            }
            other => panic!("expected type error, got {other:?}"),
        }
    }

    #[test]
    fn missing_var_is_reported() {
        let model = OpSystem::new(1.0)
            .with_term(HamiltonianTerm::driven(CsrMatrix::identity(1), "a"))
            .with_var("a");
        let ir = compile(&model);
        let err = KernelArgs::for_model(&model, &ir.signature, &RuntimeInputs::new(0.0, vec![ONE]))
            .unwrap_err();
        assert_eq!(err, ExecError::MissingVar("a".into()));
    }
}
