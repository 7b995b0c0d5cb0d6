// id.rs — Generation tags for emitted kernels
//
// Every kernel generation takes a tag from one process-wide counter. The
// counter starts at zero when the process starts and is never reset; tags are
// handed out with an atomic increment, so concurrent generations always get
// distinct tags. The module name a kernel is loaded under is derived from the
// process id and its tag, which keeps a freshly generated kernel from replacing
// one that an in-flight simulation still uses, including one generated by a
// concurrent process writing into the same directory.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Owned by the process; only `next_generation` touches it.
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Prefix of every generated module name.
pub const MODULE_PREFIX: &str = "rhs_kernel_";

/// Stable identifier of one kernel generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationTag(pub u64);

impl GenerationTag {
    /// Module name the generated source is compiled and loaded under:
    /// `rhs_kernel_<pid>_<tag>`.
    pub fn module_name(self) -> String {
        format!("{}{}_{}", MODULE_PREFIX, std::process::id(), self.0)
    }
}

impl fmt::Display for GenerationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Allocate the next generation tag. Monotonically increasing per process.
pub fn next_generation() -> GenerationTag {
    GenerationTag(GENERATION.fetch_add(1, Ordering::Relaxed))
}
