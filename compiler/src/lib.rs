// rhsc — Right-hand-side kernel compiler
//
// Library root. Passes: validate → build_ir → verify_ir → codegen.

pub mod codegen;
pub mod diag;
pub mod exec;
pub mod expr;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod model;
pub mod pass;
pub mod pipeline;
pub mod validate;
pub mod writer;

pub use codegen::{CodegenOptions, GeneratedKernel};
pub use model::OpSystem;
pub use pipeline::{generate, generate_into_dir, generate_to_file};
