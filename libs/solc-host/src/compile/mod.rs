pub mod input;
pub mod output;

pub use input::StandardInput;
pub use output::{normalize, CompileResult, ContractArtifact, Diagnostic, SourceLocation};
