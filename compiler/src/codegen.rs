// codegen.rs — Cython source generation for right-hand-side kernels
//
// Lowers a verified `KernelIr` to the text of one Cython module: a fixed
// preamble importing the two runtime primitives, a directive block, and one
// function whose header follows the positional argument contract. Statement
// order comes from the IR; this module only decides spelling and layout.
//
// Preconditions: the IR passed `ir::verify_ir`.
// Postconditions: returns `CodegenResult` with the generated lines, tagged
//                 with the caller's generation tag.
// Failure modes: an unbalanced indentation sequence or a line break inside an
//                emitted line produces E0601 and no generated kernel.
// Side effects: none.

use crate::diag::{codes, Diagnostic, Loc};
use crate::id::GenerationTag;
use crate::ir::{Accumulate, ArgRole, ArgType, KernelArg, KernelIr, LocalType, Signature, Stmt};
use crate::writer::{CodeWriter, WriteError};

/// Default base name of the persisted module source.
pub const DEFAULT_FILENAME: &str = "rhs.pyx";

/// Name of the generated function unless overridden.
pub const DEFAULT_FUNCTION_NAME: &str = "cy_td_ode_rhs";

/// Default path of the complex-math helper include.
pub const DEFAULT_COMPLEX_MATH_INCLUDE: &str = "complex_math.pxi";

/// Prefix of the preamble line carrying the module name. It is the only line
/// that differs between two generations of the same model.
pub const MODULE_LINE_PREFIX: &str = "# kernel module: ";

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CodegenOptions {
    /// Guard tolerance override; the model's own value or
    /// `model::DEFAULT_COEFF_TOLERANCE` applies when absent.
    pub tolerance: Option<f64>,
    pub complex_math_include: String,
    pub function_name: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            tolerance: None,
            complex_math_include: DEFAULT_COMPLEX_MATH_INCLUDE.to_string(),
            function_name: DEFAULT_FUNCTION_NAME.to_string(),
        }
    }
}

/// An emitted kernel: ordered source lines plus the argument contract.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKernel {
    pub tag: GenerationTag,
    pub module_name: String,
    pub signature: Signature,
    pub lines: Vec<String>,
}

impl GeneratedKernel {
    /// The module text, newline-terminated.
    pub fn source(&self) -> String {
        let mut s = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            s.push_str(line);
            s.push('\n');
        }
        s
    }

    /// File name the module must be persisted under for the Cython module
    /// name to match `module_name`.
    pub fn file_name(&self) -> String {
        format!("{}.pyx", self.module_name)
    }

    /// Source lines without the module-name line; equal across generations
    /// of the same model.
    pub fn body_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|l| !l.starts_with(MODULE_LINE_PREFIX))
    }
}

#[derive(Debug)]
pub struct CodegenResult {
    pub generated: Option<GeneratedKernel>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn codegen(ir: &KernelIr, tag: GenerationTag, options: &CodegenOptions) -> CodegenResult {
    let mut ctx = CodegenCtx::new(ir, options);
    let emitted = ctx.emit_all(tag).and_then(|()| ctx.out.finish());
    match emitted {
        Ok(lines) => CodegenResult {
            generated: Some(GeneratedKernel {
                tag,
                module_name: tag.module_name(),
                signature: ir.signature.clone(),
                lines,
            }),
            diagnostics: Vec::new(),
        },
        Err(e) => CodegenResult {
            generated: None,
            diagnostics: vec![Diagnostic::error(Loc::Model, e.to_string())
                .with_code(codes::E0601)
                .with_hint("internal emitter error; no source was produced")],
        },
    }
}

/// Spelling of an argument type in a Cython signature.
pub fn cython_type(ty: ArgType) -> &'static str {
    match ty {
        ArgType::Double => "double",
        ArgType::Complex => "complex",
        ArgType::ComplexArray => "complex[::1]",
        ArgType::DoubleArray => "double[::1]",
        ArgType::IntArray => "int[::1]",
        ArgType::UIntArray => "unsigned int[::1]",
        ArgType::ByteArray => "unsigned char[::1]",
    }
}

/// Body of a single-quoted Cython string literal. Control characters are
/// rejected by validation; backslash and quote are escaped here.
fn quote_include(path: &str) -> String {
    path.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Float literal accepted by both Python and C (`1e-15`, `5e-1`).
fn float_literal(v: f64) -> String {
    format!("{:e}", v)
}

// ── Internal context ────────────────────────────────────────────────────────

struct CodegenCtx<'a> {
    ir: &'a KernelIr,
    options: &'a CodegenOptions,
    out: CodeWriter,
}

impl<'a> CodegenCtx<'a> {
    fn new(ir: &'a KernelIr, options: &'a CodegenOptions) -> Self {
        CodegenCtx {
            ir,
            options,
            out: CodeWriter::default(),
        }
    }

    // ── Top-level emit ──────────────────────────────────────────────────

    fn emit_all(&mut self, tag: GenerationTag) -> Result<(), WriteError> {
        self.emit_preamble(tag);
        self.emit_directives();
        self.emit_header()?;
        self.out.indent();
        self.emit_body()?;
        self.out.dedent()
    }

    // ── Phase 1: Preamble ───────────────────────────────────────────────

    fn emit_preamble(&mut self, tag: GenerationTag) {
        self.out.line("#!python");
        self.out.line("#cython: language_level=3");
        self.out.line("# Generated by rhsc. Do not edit.");
        self.out
            .line(format!("{}{}", MODULE_LINE_PREFIX, tag.module_name()));
        self.out.blank();
        self.out.block(
            "import numpy as np\n\
             cimport numpy as np\n\
             cimport cython\n\
             np.import_array()\n\
             cdef extern from \"numpy/arrayobject.h\" nogil:\n    \
             void* PyDataMem_NEW_ZEROED(size_t size, size_t elsize)\n    \
             void PyArray_ENABLEFLAGS(np.ndarray arr, int flags)\n\
             \n\
             from qutip.cy.spmatfuncs cimport spmvpy\n\
             from qutip.cy.math cimport erf\n\
             from libc.math cimport pi\n\
             \n\
             from openpulse.cython.channel_value cimport channel_value\n",
        );
        self.out.blank();
        self.out
            .line(format!("include '{}'", quote_include(&self.options.complex_math_include)));
        self.out.blank();
    }

    // ── Phase 2: Directives ─────────────────────────────────────────────

    fn emit_directives(&mut self) {
        self.out.line("@cython.cdivision(True)");
        self.out.line("@cython.boundscheck(False)");
        self.out.line("@cython.wraparound(False)");
    }

    // ── Phase 3: Function header ────────────────────────────────────────

    /// One continuation line per argument, except that a term's CSR triple
    /// shares a line.
    fn emit_header(&mut self) -> Result<(), WriteError> {
        let ir = self.ir;
        let sig = &ir.signature;
        self.out.line(format!("def {}(", sig.name));

        let groups = group_args(&sig.args);
        self.out.indent();
        self.out.indent();
        for (i, group) in groups.iter().enumerate() {
            let text = group
                .iter()
                .map(|a| format!("{} {}", cython_type(a.ty), a.name))
                .collect::<Vec<_>>()
                .join(", ");
            let end = if i + 1 == groups.len() { "):" } else { "," };
            self.out.line(format!("{}{}", text, end));
        }
        self.out.dedent()?;
        self.out.dedent()
    }

    // ── Phase 4: Body ───────────────────────────────────────────────────

    fn emit_body(&mut self) -> Result<(), WriteError> {
        let ir = self.ir;
        let mut section = Section::Start;
        for stmt in &ir.body {
            section = self.enter_section(section, stmt);
            match stmt {
                Stmt::Declare(d) => self.emit_declare(&d.name, d.ty),
                Stmt::EvalChannel {
                    local,
                    channel_index,
                    pulses,
                    fc,
                } => self.out.line(format!(
                    "{} = channel_value(t, {}, {}, pulse_array, pulse_indices, {}, register)",
                    local, channel_index, pulses, fc
                )),
                Stmt::AssignCoeff { local, source, .. } => {
                    self.out.line(format!("{} = {}", local, source))
                }
                Stmt::GuardedAccumulate { tolerance, acc } => {
                    self.out.line(format!(
                        "if abs({}) > {}:",
                        acc.coeff,
                        float_literal(*tolerance)
                    ));
                    self.out.indent();
                    self.out.line(spmv_call(acc));
                    self.out.dedent()?;
                }
                Stmt::Accumulate(acc) => self.out.line(spmv_call(acc)),
                Stmt::Return => self.emit_return(),
            }
        }
        Ok(())
    }

    /// Blank lines and section comments between statement groups.
    fn enter_section(&mut self, current: Section, stmt: &Stmt) -> Section {
        let next = match stmt {
            Stmt::Declare(d) if matches!(d.ty, LocalType::Complex) => Section::ComplexLocals,
            Stmt::Declare(_) => Section::Locals,
            Stmt::EvalChannel { .. } => Section::Channels,
            Stmt::AssignCoeff { .. } | Stmt::GuardedAccumulate { .. } | Stmt::Accumulate(_) => {
                Section::Terms
            }
            Stmt::Return => Section::Return,
        };
        if next == current {
            return current;
        }
        self.out.blank();
        match next {
            Section::Channels => self
                .out
                .line("# Compute complex channel values at time `t`"),
            Section::Terms => self.out.line("# Eval the time-dependent terms and do SPMV."),
            Section::Return => self
                .out
                .line("# Convert to NumPy array, grab ownership, and return."),
            Section::Start | Section::Locals | Section::ComplexLocals => {}
        }
        next
    }

    fn emit_declare(&mut self, name: &str, ty: LocalType) {
        match ty {
            LocalType::Index => self.out.line(format!("cdef size_t {}", name)),
            LocalType::RowCount => self
                .out
                .line(format!("cdef unsigned int {} = vec.shape[0]", name)),
            LocalType::ComplexBuffer => self.out.line(format!(
                "cdef double complex * {} = <complex *>PyDataMem_NEW_ZEROED(num_rows, sizeof(complex))",
                name
            )),
            LocalType::Complex => self.out.line(format!("cdef double complex {}", name)),
        }
    }

    fn emit_return(&mut self) {
        self.out.line("cdef np.npy_intp dims = num_rows");
        self.out.line(
            "cdef np.ndarray[complex, ndim=1, mode='c'] arr_out = \
             np.PyArray_SimpleNewFromData(1, &dims, np.NPY_COMPLEX128, out)",
        );
        self.out.line("PyArray_ENABLEFLAGS(arr_out, np.NPY_OWNDATA)");
        self.out.line("return arr_out");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Start,
    Locals,
    ComplexLocals,
    Channels,
    Terms,
    Return,
}

fn group_args(args: &[KernelArg]) -> Vec<Vec<&KernelArg>> {
    let mut groups: Vec<Vec<&KernelArg>> = Vec::new();
    for arg in args {
        match arg.role {
            ArgRole::TermIndices(_) | ArgRole::TermIndptr(_) => match groups.last_mut() {
                Some(last) => last.push(arg),
                None => groups.push(vec![arg]),
            },
            _ => groups.push(vec![arg]),
        }
    }
    groups
}

fn spmv_call(acc: &Accumulate) -> String {
    format!(
        "spmvpy(&{}[0], &{}[0], &{}[0], &vec[0], {}, &out[0], num_rows)",
        acc.data, acc.indices, acc.indptr, acc.coeff
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────
