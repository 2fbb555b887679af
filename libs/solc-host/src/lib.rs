#[cfg(feature = "node")]
#[macro_use]
extern crate napi_derive;

#[cfg(feature = "node")]
mod bindings;
pub mod compile;
pub mod host;
pub mod imports;
mod internal;
pub mod protocol;
pub mod storage;
pub mod worker;

#[cfg(feature = "node")]
pub use bindings::JsCompilerHost;
pub use compile::{normalize, CompileResult, ContractArtifact, Diagnostic, SourceLocation, StandardInput};
pub use host::CompilerHost;
pub use imports::{FetchError, HttpFetcher, ImportFailure, ImportResolver, Resolution, SourceFetcher};
pub use internal::config::{
  default_package_sources, EditorFeature, HostConfig, HostConfigOptions, PackageSource,
  ReadinessPolicy, RetryPolicy,
};
pub use internal::errors::{Error, Result};
pub use internal::solc::{parse_version, RegistryEntry, VersionRegistry};
pub use protocol::{Action, FaultCode, RequestData, ResponsePayload, WorkerMessage, WorkerResponse};
pub use storage::{ContractFile, ContractProject, ContractStorage, DirBlobStore, MemoryBlobStore};
