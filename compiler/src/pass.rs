// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the generator's 4 passes (model loading is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each pass (model loading excluded — handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Validate,
    BuildIr,
    VerifyIr,
    Codegen,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Validated, // ValidatedModel
    Ir,        // KernelIr
    IrCert,    // IrCert
    Generated, // GeneratedKernel
}

/// A pass postcondition certificate: named obligations, each met or not.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the obligations that failed.
    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/log output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[],
            outputs: &[ArtifactId::Validated],
            invalidation_key: "model + function_name + tolerance",
            invariants: "identifiers legal and unique, CSR well-formed, expressions parsed",
        },
        PassId::BuildIr => PassDescriptor {
            name: "build_ir",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Ir],
            invalidation_key: "model + validated",
            invariants: "statements ordered: declare, channels, terms, return",
        },
        PassId::VerifyIr => PassDescriptor {
            name: "verify_ir",
            inputs: &[PassId::BuildIr],
            outputs: &[ArtifactId::IrCert],
            invalidation_key: "ir + model",
            invariants: "K1-K6 obligations hold",
        },
        PassId::Codegen => PassDescriptor {
            name: "codegen",
            inputs: &[PassId::VerifyIr],
            outputs: &[ArtifactId::Generated],
            invalidation_key: "ir + codegen_options + generation",
            invariants: "balanced indentation, one function per module",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 4 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Validate,
    PassId::BuildIr,
    PassId::VerifyIr,
    PassId::Codegen,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_codegen_includes_all() {
        assert_eq!(required_passes(PassId::Codegen), ALL_PASSES.to_vec());
    }

    #[test]
    fn required_passes_build_ir_skips_verification() {
        assert_eq!(
            required_passes(PassId::BuildIr),
            vec![PassId::Validate, PassId::BuildIr]
        );
    }

    #[test]
    fn required_passes_validate_is_minimal() {
        assert_eq!(required_passes(PassId::Validate), vec![PassId::Validate]);
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass).unwrap();
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep).unwrap();
                assert!(
                    dep_pos < self_pos,
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }

    struct Fixed(Vec<(&'static str, bool)>);

    impl StageCert for Fixed {
        fn all_pass(&self) -> bool {
            self.0.iter().all(|(_, ok)| *ok)
        }
        fn obligations(&self) -> Vec<(&'static str, bool)> {
            self.0.clone()
        }
    }

    #[test]
    fn failed_lists_unmet_obligations() {
        let cert = Fixed(vec![("A", true), ("B", false), ("C", false)]);
        assert!(!cert.all_pass());
        assert_eq!(cert.failed(), vec!["B", "C"]);
    }
}
