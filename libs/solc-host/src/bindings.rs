use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::host::CompilerHost;
use crate::internal::errors::{map_err_with_context, to_napi_result};

/// Node-facing compiler host. Configuration is read from `SOLC_HOST_*`.
#[napi(js_name = "CompilerHost")]
pub struct JsCompilerHost {
  inner: CompilerHost,
}

#[napi]
impl JsCompilerHost {
  #[napi(constructor)]
  pub fn new() -> napi::Result<Self> {
    let inner = to_napi_result(CompilerHost::from_env())?;
    Ok(Self { inner })
  }

  #[napi]
  pub async fn get_available_versions(&self) -> napi::Result<Vec<String>> {
    let host = self.inner.clone();
    to_napi_result(host.list_available_versions().await)
  }

  #[napi]
  pub async fn set_compiler_version(&self, version: String) -> napi::Result<()> {
    let host = self.inner.clone();
    to_napi_result(host.set_version(&version).await)
  }

  #[napi]
  pub fn get_current_version(&self) -> String {
    self.inner.current_version()
  }

  #[napi(ts_return_type = "Promise<CompileResult>")]
  pub async fn compile(&self, sources: HashMap<String, String>) -> napi::Result<Value> {
    let host = self.inner.clone();
    let sources: BTreeMap<String, String> = sources.into_iter().collect();
    let result = host.compile(sources).await;
    to_napi_result(map_err_with_context(
      serde_json::to_value(result),
      "Failed to serialise compile result",
    ))
  }

  #[napi]
  pub fn destroy(&self) {
    self.inner.destroy();
  }
}
