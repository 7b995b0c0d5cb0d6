// validate.rs — Model validation before any emission
//
// Channel and free-variable names and the kernel function name are spliced
// into generated source as identifiers, so every name is checked against an
// allow-list of characters, the reserved kernel identifiers, target-language
// keywords and every other generated argument/local name. The complex-math
// include path is spliced into a string literal and may not hold control
// characters. Term matrices are checked for
// CSR well-formedness and matching dimensions; time-dependence expressions
// are parsed and their names resolved.
//
// Preconditions: none.
// Postconditions: if no error diagnostics, every identifier the emitter will
//                 write is unique and legal, and every term expression parses.
// Failure modes: errors name the offending term index / channel / variable.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::diag::{codes, Diagnostic, Loc};
use crate::expr::{self, builtin_constant, Builtin, Expr};
use crate::model::{CsrMatrix, OpSystem};

/// Kernel-local and fixed argument names.
pub const RESERVED_LOCALS: &[&str] = &["t", "vec", "out", "row", "num_rows", "register"];

/// Names of fixed arguments, primitives, and other identifiers the preamble
/// or epilogue brings into scope.
const RESERVED_FIXED: &[&str] = &[
    "pulse_array",
    "pulse_indices",
    "channel_value",
    "spmvpy",
    "erf",
    "np",
    "cython",
    "pi",
    "dims",
    "arr_out",
    "PyDataMem_NEW_ZEROED",
    "PyArray_ENABLEFLAGS",
];

/// Python and Cython keywords plus C type names usable in `cdef`.
const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield", "cdef", "cpdef", "cimport", "ctypedef", "struct", "union",
    "enum", "extern", "inline", "include", "nogil", "gil", "public", "readonly", "DEF", "IF",
    "ELIF", "ELSE", "print", "exec", "int", "long", "short", "char", "float", "double",
    "complex", "unsigned", "signed", "void", "size_t", "object", "bint", "const", "sizeof",
    "NULL",
];

/// Per-term argument/local prefixes: `td<i>`, `data<i>`, `idx<i>`, `ptr<i>`.
const INDEXED_PREFIXES: &[&str] = &["td", "data", "idx", "ptr"];

// ── Public types ────────────────────────────────────────────────────────────

/// Validated model artifacts consumed by the IR builder.
#[derive(Debug, Clone)]
pub struct ValidatedModel {
    /// Parsed expression per term; `None` for time-independent terms.
    pub coeffs: Vec<Option<Expr>>,
    /// Resolved guard tolerance.
    pub tolerance: f64,
}

#[derive(Debug)]
pub struct ValidateResult {
    pub validated: ValidatedModel,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Identifier rules ────────────────────────────────────────────────────────

/// `[A-Za-z_][A-Za-z0-9_]*`, ASCII only.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn indexed_reserved(name: &str) -> bool {
    INDEXED_PREFIXES.iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Why `name` cannot be used as a channel or variable name, if it cannot.
pub fn reserved_reason(name: &str, function_name: &str) -> Option<&'static str> {
    if name == function_name {
        Some("fixed kernel identifier")
    } else {
        kernel_name_reason(name)
    }
}

/// Why `name` clashes with an identifier every kernel defines, if it does.
fn kernel_name_reason(name: &str) -> Option<&'static str> {
    if RESERVED_LOCALS.contains(&name) {
        Some("kernel-local identifier")
    } else if RESERVED_FIXED.contains(&name) {
        Some("fixed kernel identifier")
    } else if indexed_reserved(name) {
        Some("per-term kernel identifier")
    } else if KEYWORDS.contains(&name) {
        Some("target-language keyword")
    } else if Builtin::lookup(name).is_some() {
        Some("built-in function name")
    } else {
        None
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Validate `model` for emission of a kernel called `function_name`.
///
/// `tolerance_override` takes precedence over the model's own tolerance.
pub fn validate(
    model: &OpSystem,
    function_name: &str,
    tolerance_override: Option<f64>,
) -> ValidateResult {
    let mut diags = Vec::new();

    check_settings(model, tolerance_override, &mut diags);
    check_function_name(function_name, &mut diags);
    check_names(model, function_name, &mut diags);
    check_matrices(model, &mut diags);
    let coeffs = check_expressions(model, &mut diags);

    let tolerance = tolerance_override
        .or(model.coeff_tolerance)
        .unwrap_or(crate::model::DEFAULT_COEFF_TOLERANCE);

    ValidateResult {
        validated: ValidatedModel { coeffs, tolerance },
        diagnostics: diags,
    }
}

fn check_settings(model: &OpSystem, tolerance_override: Option<f64>, diags: &mut Vec<Diagnostic>) {
    if !(model.dt.is_finite() && model.dt > 0.0) {
        diags.push(
            Diagnostic::error(Loc::Model, format!("sample step dt must be positive, got {}", model.dt))
                .with_code(codes::E0401),
        );
    }
    if let Some(tol) = tolerance_override.or(model.coeff_tolerance) {
        if !(tol.is_finite() && tol >= 0.0) {
            diags.push(
                Diagnostic::error(
                    Loc::Model,
                    format!("coefficient tolerance must be finite and non-negative, got {}", tol),
                )
                .with_code(codes::E0400),
            );
        }
    }
}

fn check_function_name(function_name: &str, diags: &mut Vec<Diagnostic>) {
    if !is_identifier(function_name) {
        diags.push(
            Diagnostic::error(
                Loc::Model,
                format!("kernel function name `{}` is not a valid identifier", function_name.escape_debug()),
            )
            .with_code(codes::E0100)
            .with_hint("names must match [A-Za-z_][A-Za-z0-9_]*"),
        );
    } else if let Some(reason) = kernel_name_reason(function_name) {
        diags.push(
            Diagnostic::error(
                Loc::Model,
                format!("kernel function name `{}` is reserved ({})", function_name, reason),
            )
            .with_code(codes::E0101),
        );
    }
}

/// Check the path written into the kernel's `include` directive.
pub fn check_include_path(path: &str) -> Option<Diagnostic> {
    let problem = if path.is_empty() {
        "complex-math include path is empty".to_string()
    } else if let Some(c) = path.chars().find(|c| c.is_control()) {
        format!(
            "complex-math include path `{}` contains control character {:?}",
            path.escape_debug(),
            c
        )
    } else {
        return None;
    };
    Some(
        Diagnostic::error(Loc::Model, problem)
            .with_code(codes::E0402)
            .with_hint("the path is written into a single-line string literal"),
    )
}

fn check_names(model: &OpSystem, function_name: &str, diags: &mut Vec<Diagnostic>) {
    // Generated identifier → model element that produces it.
    let mut owners: HashMap<String, Loc> = HashMap::new();

    let mut claim = |name: String, owner: Loc, diags: &mut Vec<Diagnostic>| {
        if let Some(first) = owners.get(&name) {
            diags.push(
                Diagnostic::error(owner.clone(), format!("generated name `{}` is already taken", name))
                    .with_code(codes::E0102)
                    .with_related(first.clone(), format!("`{}` first generated here", name)),
            );
        } else {
            owners.insert(name, owner);
        }
    };

    let check_one = |name: &str, loc: Loc, diags: &mut Vec<Diagnostic>| -> bool {
        if !is_identifier(name) {
            diags.push(
                Diagnostic::error(loc, format!("`{}` is not a valid identifier", name))
                    .with_code(codes::E0100)
                    .with_hint("names must match [A-Za-z_][A-Za-z0-9_]*"),
            );
            return false;
        }
        if let Some(reason) = reserved_reason(name, function_name) {
            diags.push(
                Diagnostic::error(loc, format!("`{}` is reserved ({})", name, reason))
                    .with_code(codes::E0101),
            );
            return false;
        }
        true
    };

    for ch in &model.channels {
        let loc = Loc::Channel(ch.name.clone());
        if check_one(&ch.name, loc.clone(), diags) {
            claim(ch.name.clone(), loc.clone(), diags);
            claim(format!("{}_pulses", ch.name), loc.clone(), diags);
            claim(format!("{}_fc", ch.name), loc, diags);
        }
    }
    for var in &model.vars {
        let loc = Loc::FreeVar(var.name.clone());
        if check_one(&var.name, loc.clone(), diags) {
            claim(var.name.clone(), loc, diags);
        }
    }

    let mut seen_index: HashMap<u32, &str> = HashMap::new();
    for ch in &model.channels {
        if let Some(first) = seen_index.insert(ch.index, &ch.name) {
            diags.push(
                Diagnostic::warning(
                    Loc::Channel(ch.name.clone()),
                    format!("pulse index {} is shared with channel '{}'", ch.index, first),
                )
                .with_code(codes::W0101),
            );
        }
    }
}

fn csr_problem(m: &CsrMatrix) -> Option<String> {
    let [rows, cols] = m.shape;
    if rows != cols {
        return Some(format!("matrix is {}x{}, expected square", rows, cols));
    }
    if m.indptr.len() != rows + 1 {
        return Some(format!(
            "row pointer has {} entries, expected {}",
            m.indptr.len(),
            rows + 1
        ));
    }
    if m.indices.len() != m.data.len() {
        return Some(format!(
            "{} column indices for {} stored values",
            m.indices.len(),
            m.data.len()
        ));
    }
    if m.indptr[0] != 0 {
        return Some(format!("row pointer starts at {}, expected 0", m.indptr[0]));
    }
    if let Some(r) = m.indptr.windows(2).position(|w| w[1] < w[0]) {
        return Some(format!("row pointer decreases at row {}", r));
    }
    let last = m.indptr[rows];
    if last < 0 || last as usize != m.data.len() {
        return Some(format!(
            "row pointer ends at {}, expected {} stored values",
            last,
            m.data.len()
        ));
    }
    if let Some(&bad) = m.indices.iter().find(|&&c| c < 0 || c as usize >= cols) {
        return Some(format!("column index {} out of range 0..{}", bad, cols));
    }
    None
}

fn check_matrices(model: &OpSystem, diags: &mut Vec<Diagnostic>) {
    let Some(dim) = model.dim() else {
        return;
    };
    for (i, term) in model.terms.iter().enumerate() {
        if let Some(problem) = csr_problem(&term.matrix) {
            diags.push(Diagnostic::error(Loc::Term(i), problem).with_code(codes::E0200));
        } else if term.matrix.nrows() != dim {
            diags.push(
                Diagnostic::error(
                    Loc::Term(i),
                    format!("dimension {} differs from term 0 dimension {}", term.matrix.nrows(), dim),
                )
                .with_code(codes::E0201)
                .with_related(Loc::Term(0), "dimension set here"),
            );
        }
    }
}

fn check_expressions(model: &OpSystem, diags: &mut Vec<Diagnostic>) -> Vec<Option<Expr>> {
    let known: HashSet<&str> = std::iter::once("t")
        .chain(model.channels.iter().map(|c| c.name.as_str()))
        .chain(model.vars.iter().map(|v| v.name.as_str()))
        .collect();
    let mut referenced: HashSet<String> = HashSet::new();
    let mut coeffs = Vec::with_capacity(model.terms.len());

    for (i, term) in model.terms.iter().enumerate() {
        let Some(text) = term.time_dependence() else {
            coeffs.push(None);
            continue;
        };
        // Emitted verbatim as one source line.
        let lead = text.len() - text.trim_start().len();
        if let Some(pos) = text.trim().find(['\n', '\r']) {
            diags.push(
                Diagnostic::error(
                    Loc::Expr {
                        term: i,
                        range: lead + pos..lead + pos + 1,
                    },
                    "expression spans more than one line",
                )
                .with_code(codes::E0300),
            );
            coeffs.push(None);
            continue;
        }
        let parsed = expr::parse(text);
        for err in &parsed.errors {
            let span = expr::error_span(err);
            diags.push(
                Diagnostic::error(
                    Loc::Expr {
                        term: i,
                        range: span.start..span.end,
                    },
                    format!("invalid expression `{}`: {}", text, err),
                )
                .with_code(codes::E0300),
            );
        }
        let Some(e) = parsed.expr else {
            coeffs.push(None);
            continue;
        };

        for (name, span) in e.names() {
            if known.contains(name) {
                referenced.insert(name.to_string());
            } else if builtin_constant(name).is_none() {
                diags.push(
                    Diagnostic::error(
                        Loc::Expr {
                            term: i,
                            range: span.start..span.end,
                        },
                        format!("unknown identifier '{}'", name),
                    )
                    .with_code(codes::E0301)
                    .with_hint("expressions may reference `t`, channels, and free variables"),
                );
            }
        }
        for (func, argc, span) in e.calls() {
            let loc = Loc::Expr {
                term: i,
                range: span.start..span.end,
            };
            if Builtin::lookup(func).is_none() {
                diags.push(
                    Diagnostic::error(loc, format!("unknown function '{}'", func))
                        .with_code(codes::E0302),
                );
            } else if argc != 1 {
                diags.push(
                    Diagnostic::error(loc, format!("'{}' takes 1 argument, {} given", func, argc))
                        .with_code(codes::E0302),
                );
            }
        }
        coeffs.push(Some(e));
    }

    for ch in &model.channels {
        if !referenced.contains(&ch.name) {
            diags.push(
                Diagnostic::warning(
                    Loc::Channel(ch.name.clone()),
                    "channel is not referenced by any term; it is still evaluated every call",
                )
                .with_code(codes::W0100),
            );
        }
    }

    coeffs
}

// ── Tests ──
