// pipeline.rs — Compilation state, pass orchestration, provenance, persistence
//
// Holds all pass artifacts for one model and runs the minimal set of passes
// for a given terminal PassId. Persisting writes the emitted module
// atomically: a partially written file never appears at the destination.
//
// Preconditions: the model is loaded before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; I/O errors when persisting.
// Side effects: calls on_pass_complete after each pass; codegen allocates a
//               generation tag; persist writes one file.

use std::fmt;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codegen::{CodegenOptions, GeneratedKernel};
use crate::diag::{codes, has_errors, Diagnostic, Loc};
use crate::ir::{IrCert, KernelIr};
use crate::model::{ModelError, OpSystem};
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::validate::ValidatedModel;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for cache keys and reproducibility checks.
///
/// `model_fingerprint`: SHA-256 of `OpSystem::canonical_json()`.
/// `body_hash`: SHA-256 of the emitted source without the module-name line,
/// so it is equal across generations of the same model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub model_fingerprint: [u8; 32],
    pub body_hash: [u8; 32],
    pub generation: u64,
    pub module_name: String,
    pub compiler_version: &'static str,
}

#[derive(Serialize)]
struct ProvenanceJson<'a> {
    model_fingerprint: String,
    body_hash: String,
    generation: u64,
    module_name: &'a str,
    compiler_version: &'a str,
}

impl Provenance {
    pub fn model_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.model_fingerprint)
    }

    pub fn body_hash_hex(&self) -> String {
        bytes_to_hex(&self.body_hash)
    }

    /// Pretty JSON for `--emit build-info`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let view = ProvenanceJson {
            model_fingerprint: self.model_fingerprint_hex(),
            body_hash: self.body_hash_hex(),
            generation: self.generation,
            module_name: &self.module_name,
            compiler_version: self.compiler_version,
        };
        let mut json = serde_json::to_string_pretty(&view)?;
        json.push('\n');
        Ok(json)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(chunks: impl IntoIterator<Item = impl AsRef<[u8]>>) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.as_ref());
    }
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance for a model and the kernel generated from it.
pub fn compute_provenance(
    model: &OpSystem,
    kernel: &GeneratedKernel,
) -> Result<Provenance, ModelError> {
    let canonical = model.canonical_json()?;
    let model_fingerprint = sha256([canonical.as_bytes()]);
    let body_hash = sha256(kernel.body_lines().flat_map(|l| [l.as_bytes(), b"\n".as_slice()]));
    Ok(Provenance {
        model_fingerprint,
        body_hash,
        generation: kernel.tag.0,
        module_name: kernel.module_name.clone(),
        compiler_version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Compilation state ──────────────────────────────────────────────────────

/// Holds all artifacts for one model and accumulated diagnostics.
pub struct CompilationState {
    pub model: OpSystem,
    pub validated: Option<ValidatedModel>,
    pub ir: Option<KernelIr>,
    pub ir_cert: Option<IrCert>,
    pub generated: Option<GeneratedKernel>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
}

impl CompilationState {
    pub fn new(model: OpSystem) -> Self {
        Self {
            model,
            validated: None,
            ir: None,
            ir_cert: None,
            generated: None,
            diagnostics: Vec::new(),
            has_error: false,
        }
    }
}

// ── Error types ────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", descriptor(self.failing_pass).name)
    }
}

impl std::error::Error for PipelineError {}

/// Writing the emitted source failed. The destination is left untouched.
#[derive(Debug)]
pub struct PersistError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot write {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Failure of the one-shot `generate*` helpers.
#[derive(Debug)]
pub enum GenerateError {
    /// Generation stopped at `pass`; `diagnostics` holds everything reported.
    Rejected {
        pass: PassId,
        diagnostics: Vec<Diagnostic>,
    },
    Persist(PersistError),
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::Rejected { pass, diagnostics } => {
                write!(f, "{} failed", descriptor(*pass).name)?;
                for d in diagnostics.iter().filter(|d| d.is_error()) {
                    write!(f, "\n{}", d)?;
                }
                Ok(())
            }
            GenerateError::Persist(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GenerateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerateError::Persist(e) => Some(e),
            GenerateError::Rejected { .. } => None,
        }
    }
}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, log, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    for d in diags.iter().filter(|d| !d.is_error()) {
        warn!(pass = descriptor(pass_id).name, "{}", d);
    }
    state.diagnostics.extend(diags);
    debug!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Artifact a pass reads that an earlier pass should have produced.
fn missing_artifact(pass_id: PassId, what: &str) -> Diagnostic {
    Diagnostic::error(
        Loc::Model,
        format!("{}: {} not available", descriptor(pass_id).name, what),
    )
    .with_code(codes::E0600)
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
///
/// Preconditions: `state.model` is set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics; IR cert failure.
/// Side effects: calls `on_pass_complete` after each pass; `Codegen` takes the
///   next generation tag.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &CodegenOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let passes = required_passes(terminal);
    debug!(
        terms = state.model.terms.len(),
        channels = state.model.channels.len(),
        vars = state.model.vars.len(),
        passes = passes.len(),
        "running pipeline"
    );

    for &pass_id in &passes {
        let t = Instant::now();
        match pass_id {
            PassId::Validate => {
                let mut result = crate::validate::validate(
                    &state.model,
                    &options.function_name,
                    options.tolerance,
                );
                result
                    .diagnostics
                    .extend(crate::validate::check_include_path(&options.complex_math_include));
                state.validated = Some(result.validated);
                finish_pass(state, pass_id, result.diagnostics, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::BuildIr => {
                let built = match state.validated.as_ref() {
                    Some(validated) => {
                        crate::ir::build_ir(&state.model, validated, &options.function_name)
                    }
                    None => Err(missing_artifact(pass_id, "validated model")),
                };
                let diags = match built {
                    Ok(ir) => {
                        state.ir = Some(ir);
                        Vec::new()
                    }
                    Err(d) => vec![d],
                };
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::VerifyIr => {
                let diags = match state.ir.as_ref() {
                    Some(ir) => {
                        let cert = crate::ir::verify_ir(ir, &state.model);
                        let diags = if cert.all_pass() {
                            Vec::new()
                        } else {
                            vec![Diagnostic::error(
                                Loc::Model,
                                format!("IR verification failed: {}", cert.failed().join(", ")),
                            )
                            .with_code(codes::E0600)]
                        };
                        state.ir_cert = Some(cert);
                        diags
                    }
                    None => vec![missing_artifact(pass_id, "kernel IR")],
                };
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
            PassId::Codegen => {
                let diags = match state.ir.as_ref() {
                    Some(ir) => {
                        let tag = crate::id::next_generation();
                        let result = crate::codegen::codegen(ir, tag, options);
                        if let Some(kernel) = &result.generated {
                            info!(
                                module = %kernel.module_name,
                                lines = kernel.lines.len(),
                                "kernel generated"
                            );
                        }
                        state.generated = result.generated;
                        result.diagnostics
                    }
                    None => vec![missing_artifact(pass_id, "kernel IR")],
                };
                finish_pass(state, pass_id, diags, t.elapsed(), &mut on_pass_complete)?;
            }
        }
    }
    Ok(())
}

// ── Persistence ────────────────────────────────────────────────────────────

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_path_for(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| crate::codegen::DEFAULT_FILENAME.to_string());
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), n))
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.flush()?;
    file.sync_all()
}

/// Write `kernel`'s source to `path` atomically.
///
/// The source goes to a temporary file in the destination directory, which is
/// flushed, synced and renamed over `path`. On any failure the temporary file
/// is removed and `path` keeps its previous contents (or stays absent).
pub fn persist(kernel: &GeneratedKernel, path: &Path) -> Result<(), PersistError> {
    let tmp = temp_path_for(path);
    let result = write_synced(&tmp, kernel.source().as_bytes()).and_then(|()| fs::rename(&tmp, path));
    if let Err(source) = result {
        let _ = fs::remove_file(&tmp);
        return Err(PersistError {
            path: path.to_path_buf(),
            source,
        });
    }
    info!(path = %path.display(), module = %kernel.module_name, "kernel source written");
    Ok(())
}

// ── One-shot helpers ───────────────────────────────────────────────────────

/// Validate `model` and emit its kernel. Nothing is written.
pub fn generate(model: &OpSystem, options: &CodegenOptions) -> Result<GeneratedKernel, GenerateError> {
    let mut state = CompilationState::new(model.clone());
    let run = run_pipeline(&mut state, PassId::Codegen, options, |_, _| {});
    match (run, state.generated) {
        (Ok(()), Some(kernel)) => Ok(kernel),
        (Err(e), _) => Err(GenerateError::Rejected {
            pass: e.failing_pass,
            diagnostics: state.diagnostics,
        }),
        (Ok(()), None) => Err(GenerateError::Rejected {
            pass: PassId::Codegen,
            diagnostics: state.diagnostics,
        }),
    }
}

/// `generate`, then `persist` to `path`. Fails before touching the
/// filesystem if the model is rejected.
pub fn generate_to_file(
    model: &OpSystem,
    options: &CodegenOptions,
    path: &Path,
) -> Result<GeneratedKernel, GenerateError> {
    let kernel = generate(model, options)?;
    persist(&kernel, path).map_err(GenerateError::Persist)?;
    Ok(kernel)
}

/// `generate`, then `persist` into `dir` under `GeneratedKernel::file_name`,
/// so the Cython module name matches the generated one and earlier
/// generations in the same directory are left in place.
pub fn generate_into_dir(
    model: &OpSystem,
    options: &CodegenOptions,
    dir: &Path,
) -> Result<(GeneratedKernel, PathBuf), GenerateError> {
    let kernel = generate(model, options)?;
    let path = dir.join(kernel.file_name());
    persist(&kernel, &path).map_err(GenerateError::Persist)?;
    Ok((kernel, path))
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CsrMatrix, HamiltonianTerm};

    fn model() -> OpSystem {
        OpSystem::new(0.5)
            .with_term(HamiltonianTerm::driven(CsrMatrix::identity(2), "D0"))
            .with_channel("D0", 0)
    }

    fn run(model: OpSystem, terminal: PassId) -> (CompilationState, Vec<PassId>, Result<(), PipelineError>) {
        let mut state = CompilationState::new(model);
        let mut seen = Vec::new();
        let r = run_pipeline(&mut state, terminal, &CodegenOptions::default(), |p, _| seen.push(p));
        (state, seen, r)
    }

    #[test]
    fn full_pipeline_populates_all_artifacts() {
        let (state, seen, r) = run(model(), PassId::Codegen);
        assert!(r.is_ok());
        assert_eq!(seen, crate::pass::ALL_PASSES.to_vec());
        assert!(state.validated.is_some());
        assert!(state.ir.is_some());
        assert!(state.ir_cert.as_ref().is_some_and(|c| c.all_pass()));
        assert!(state.generated.is_some());
        assert!(!state.has_error);
    }

    #[test]
    fn validate_only_stops_early() {
        let (state, seen, r) = run(model(), PassId::Validate);
        assert!(r.is_ok());
        assert_eq!(seen, vec![PassId::Validate]);
        assert!(state.ir.is_none());
        assert!(state.generated.is_none());
    }

    #[test]
    fn invalid_model_fails_at_validate() {
        let bad = model().with_channel("vec", 1);
        let (state, seen, r) = run(bad, PassId::Codegen);
        assert_eq!(
            r,
            Err(PipelineError {
                failing_pass: PassId::Validate
            })
        );
        assert_eq!(seen, vec![PassId::Validate]);
        assert!(state.has_error);
        assert!(state.generated.is_none());
    }

    #[test]
    fn generate_returns_rejection_diagnostics() {
        match generate(&model().with_var("D0_fc"), &CodegenOptions::default()) {
            Err(GenerateError::Rejected { pass, diagnostics }) => {
                assert_eq!(pass, PassId::Validate);
                assert!(diagnostics.iter().any(|d| d.code == Some(codes::E0102)));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn provenance_body_hash_ignores_generation() {
        let m = model();
        let a = generate(&m, &CodegenOptions::default()).unwrap();
        let b = generate(&m, &CodegenOptions::default()).unwrap();
        let pa = compute_provenance(&m, &a).unwrap();
        let pb = compute_provenance(&m, &b).unwrap();
        assert_ne!(pa.generation, pb.generation);
        assert_eq!(pa.body_hash, pb.body_hash);
        assert_eq!(pa.model_fingerprint, pb.model_fingerprint);
        assert_eq!(pa.body_hash_hex().len(), 64);
    }

    #[test]
    fn provenance_json_fields() {
        let m = model();
        let k = generate(&m, &CodegenOptions::default()).unwrap();
        let json = compute_provenance(&m, &k).unwrap().to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["module_name"], k.module_name.as_str());
        assert_eq!(v["generation"], k.tag.0);
        assert_eq!(v["compiler_version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(v["model_fingerprint"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn persist_writes_source_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rhs.pyx");
        let k = generate_to_file(&model(), &CodegenOptions::default(), &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), k.source());
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn persist_failure_keeps_destination_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("rhs.pyx");
        let k = generate(&model(), &CodegenOptions::default()).unwrap();
        let err = persist(&k, &path).unwrap_err();
        assert_eq!(err.path, path);
        assert!(!path.exists());
    }

    #[test]
    fn generations_into_one_dir_keep_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let (a, path_a) = generate_into_dir(&model(), &CodegenOptions::default(), dir.path()).unwrap();
        let (b, path_b) = generate_into_dir(&model(), &CodegenOptions::default(), dir.path()).unwrap();
        assert_ne!(path_a, path_b);
        assert_eq!(path_a.file_stem().unwrap().to_str(), Some(a.module_name.as_str()));
        assert_eq!(path_b.file_name().unwrap().to_str(), Some(b.file_name().as_str()));
        assert_eq!(fs::read_to_string(&path_a).unwrap(), a.source());
        assert_eq!(fs::read_to_string(&path_b).unwrap(), b.source());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn bad_function_name_or_include_rejected_at_validate() {
        let bad_name = CodegenOptions {
            function_name: "spmvpy".into(),
            ..CodegenOptions::default()
        };
        let bad_include = CodegenOptions {
            complex_math_include: "a'\nimport os\n#".into(),
            ..CodegenOptions::default()
        };
        for (options, code) in [(bad_name, codes::E0101), (bad_include, codes::E0402)] {
            match generate(&model(), &options) {
                Err(GenerateError::Rejected { pass, diagnostics }) => {
                    assert_eq!(pass, PassId::Validate);
                    assert!(diagnostics.iter().any(|d| d.code == Some(code)), "{diagnostics:?}");
                }
                other => panic!("expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejected_model_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rhs.pyx");
        let bad = model().with_channel("out", 3);
        assert!(generate_to_file(&bad, &CodegenOptions::default(), &path).is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
