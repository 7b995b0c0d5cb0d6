// model.rs — Model description consumed by the kernel generator
//
// An `OpSystem` is the read-only input to every pass: an ordered list of
// Hamiltonian terms (CSR matrix + optional time-dependence expression), the
// control channels, the free variables, and the global sample step.
//
// Models are loaded from JSON. Complex values are `[re, im]` pairs.
//
// Preconditions: none.
// Postconditions: a loaded model is structurally deserialized, not validated
//                 (see `validate`).
// Failure modes: I/O and JSON errors produce `ModelError`.
// Side effects: `load` reads one file.

use std::fmt;
use std::path::{Path, PathBuf};

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Default guard tolerance below which a time-dependent term is skipped.
pub const DEFAULT_COEFF_TOLERANCE: f64 = 1e-15;

// ── Sparse matrix ───────────────────────────────────────────────────────────

/// Compressed sparse row matrix, 0-based, row-major.
///
/// `indptr` has `shape[0] + 1` entries; row `r` owns `data[indptr[r]..indptr[r + 1]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    pub shape: [usize; 2],
    pub data: Vec<Complex64>,
    pub indices: Vec<i32>,
    pub indptr: Vec<i32>,
}

impl CsrMatrix {
    /// An all-zero `rows × cols` matrix with no stored entries.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        CsrMatrix {
            shape: [rows, cols],
            data: Vec::new(),
            indices: Vec::new(),
            indptr: vec![0; rows + 1],
        }
    }

    pub fn identity(n: usize) -> Self {
        CsrMatrix {
            shape: [n, n],
            data: vec![Complex64::new(1.0, 0.0); n],
            indices: (0..n as i32).collect(),
            indptr: (0..=n as i32).collect(),
        }
    }

    /// Build from dense rows, dropping exact zeros.
    pub fn from_dense(rows: &[Vec<Complex64>]) -> Self {
        let ncols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::new();
        let mut indices = Vec::new();
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        indptr.push(0);
        for row in rows {
            for (col, v) in row.iter().enumerate() {
                if *v != Complex64::new(0.0, 0.0) {
                    data.push(*v);
                    indices.push(col as i32);
                }
            }
            indptr.push(data.len() as i32);
        }
        CsrMatrix {
            shape: [rows.len(), ncols],
            data,
            indices,
            indptr,
        }
    }

    pub fn nrows(&self) -> usize {
        self.shape[0]
    }

    pub fn ncols(&self) -> usize {
        self.shape[1]
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Dense product `self · v`. Assumes a structurally valid matrix.
    pub fn mul_vec(&self, v: &[Complex64]) -> Vec<Complex64> {
        let mut out = vec![Complex64::new(0.0, 0.0); self.nrows()];
        for (row, acc) in out.iter_mut().enumerate() {
            let start = self.indptr[row] as usize;
            let end = self.indptr[row + 1] as usize;
            for k in start..end {
                *acc += self.data[k] * v[self.indices[k] as usize];
            }
        }
        out
    }
}

// ── Model elements ──────────────────────────────────────────────────────────

/// One additive contribution to the Hamiltonian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HamiltonianTerm {
    pub matrix: CsrMatrix,
    /// Time-dependence expression; absent means coefficient 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub td: Option<String>,
}

impl HamiltonianTerm {
    pub fn constant(matrix: CsrMatrix) -> Self {
        HamiltonianTerm { matrix, td: None }
    }

    pub fn driven(matrix: CsrMatrix, td: impl Into<String>) -> Self {
        HamiltonianTerm {
            matrix,
            td: Some(td.into()),
        }
    }

    /// The expression, if the term is time-dependent. A blank expression
    /// counts as time-independent.
    pub fn time_dependence(&self) -> Option<&str> {
        self.td.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// A named control signal backed by the global pulse table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub index: u32,
}

/// A named complex scalar passed to the kernel by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeVariable {
    pub name: String,
}

/// The complete model description.
///
/// `channels` and `vars` keep insertion order; that order is the kernel's
/// argument order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSystem {
    #[serde(default)]
    pub terms: Vec<HamiltonianTerm>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub vars: Vec<FreeVariable>,
    pub dt: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coeff_tolerance: Option<f64>,
}

impl OpSystem {
    pub fn new(dt: f64) -> Self {
        OpSystem {
            terms: Vec::new(),
            channels: Vec::new(),
            vars: Vec::new(),
            dt,
            coeff_tolerance: None,
        }
    }

    pub fn with_term(mut self, term: HamiltonianTerm) -> Self {
        self.terms.push(term);
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, index: u32) -> Self {
        self.channels.push(Channel {
            name: name.into(),
            index,
        });
        self
    }

    pub fn with_var(mut self, name: impl Into<String>) -> Self {
        self.vars.push(FreeVariable { name: name.into() });
        self
    }

    pub fn with_coeff_tolerance(mut self, tolerance: f64) -> Self {
        self.coeff_tolerance = Some(tolerance);
        self
    }

    /// Number of rows of the state vector, taken from the first term.
    pub fn dim(&self) -> Option<usize> {
        self.terms.first().map(|t| t.matrix.nrows())
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Parse a model from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        serde_json::from_str(text).map_err(|source| ModelError::Parse { path: None, source })
    }

    /// Load a model from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ModelError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }

    /// Compact JSON with fixed field order, used for fingerprinting.
    pub fn canonical_json(&self) -> Result<String, ModelError> {
        serde_json::to_string(self).map_err(ModelError::Serialize)
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// Errors that can occur while loading or fingerprinting a model.
#[derive(Debug)]
pub enum ModelError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    /// The model could not be written back as canonical JSON.
    Serialize(serde_json::Error),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            ModelError::Parse {
                path: Some(path),
                source,
            } => write!(f, "{}: invalid model: {}", path.display(), source),
            ModelError::Parse { path: None, source } => write!(f, "invalid model: {}", source),
            ModelError::Serialize(source) => write!(f, "cannot serialize model: {}", source),
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Io { source, .. } => Some(source),
            ModelError::Parse { source, .. } => Some(source),
            ModelError::Serialize(source) => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn from_dense_drops_zeros() {
        let m = CsrMatrix::from_dense(&[
            vec![c(0.0, 0.0), c(1.0, 0.0)],
            vec![c(0.0, 2.0), c(0.0, 0.0)],
        ]);
        assert_eq!(m.shape, [2, 2]);
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.indices, vec![1, 0]);
        assert_eq!(m.indptr, vec![0, 1, 2]);
    }

    #[test]
    fn mul_vec_sigma_x() {
        let sx = CsrMatrix::from_dense(&[
            vec![c(0.0, 0.0), c(1.0, 0.0)],
            vec![c(1.0, 0.0), c(0.0, 0.0)],
        ]);
        let out = sx.mul_vec(&[c(1.0, 0.0), c(0.0, 3.0)]);
        assert_eq!(out, vec![c(0.0, 3.0), c(1.0, 0.0)]);
    }

    #[test]
    fn zeros_has_empty_rows() {
        let m = CsrMatrix::zeros(3, 3);
        assert_eq!(m.indptr, vec![0, 0, 0, 0]);
        assert_eq!(m.mul_vec(&[c(1.0, 0.0); 3]), vec![c(0.0, 0.0); 3]);
    }

    #[test]
    fn blank_td_is_time_independent() {
        let t = HamiltonianTerm::driven(CsrMatrix::identity(2), "   ");
        assert_eq!(t.time_dependence(), None);
        let t = HamiltonianTerm::driven(CsrMatrix::identity(2), "D0");
        assert_eq!(t.time_dependence(), Some("D0"));
    }

    #[test]
    fn parse_json_model() {
        let json = r#"{
            "terms": [
                {"matrix": {"shape": [2, 2], "data": [[1.0, 0.0], [1.0, 0.0]],
                            "indices": [1, 0], "indptr": [0, 1, 2]},
                 "td": "omega * D0"},
                {"matrix": {"shape": [2, 2], "data": [], "indices": [], "indptr": [0, 0, 0]}}
            ],
            "channels": [{"name": "D0", "index": 0}],
            "vars": [{"name": "omega"}],
            "dt": 0.25
        }"#;
        let model = OpSystem::from_json(json).unwrap();
        assert_eq!(model.terms.len(), 2);
        assert_eq!(model.terms[0].time_dependence(), Some("omega * D0"));
        assert_eq!(model.terms[1].td, None);
        assert_eq!(model.channels[0].name, "D0");
        assert_eq!(model.vars[0].name, "omega");
        assert_eq!(model.dim(), Some(2));
        assert_eq!(model.coeff_tolerance, None);
    }

    #[test]
    fn parse_error_is_reported() {
        let err = OpSystem::from_json("{\"terms\": []}").unwrap_err();
        assert!(format!("{err}").starts_with("invalid model:"));
    }

    #[test]
    fn serialize_error_is_not_reported_as_parse() {
        let mut keyed = std::collections::BTreeMap::new();
        keyed.insert(vec![1u8], 0u8);
        let source = serde_json::to_string(&keyed).unwrap_err();
        let err = ModelError::Serialize(source);
        let text = err.to_string();
        assert!(text.starts_with("cannot serialize model: "), "{text}");
        assert!(!text.contains("invalid model"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn canonical_json_accepts_non_finite_dt() {
        let json = OpSystem::new(f64::NAN).canonical_json().unwrap();
        assert!(json.contains("\"dt\":null"), "{json}");
    }

    #[test]
    fn canonical_json_is_stable() {
        let model = OpSystem::new(0.1)
            .with_term(HamiltonianTerm::driven(CsrMatrix::identity(2), "D0"))
            .with_channel("D0", 0);
        let a = model.canonical_json().unwrap();
        let b = model.clone().canonical_json().unwrap();
        assert_eq!(a, b);
        assert_eq!(OpSystem::from_json(&a).unwrap(), model);
    }
}
