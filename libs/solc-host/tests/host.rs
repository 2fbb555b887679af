use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use solc_host::worker::{
  ContextEvent, ContextSpawner, EngineLoader, EngineModule, EventSink, ExecutionContext,
  ModuleStatus, ThreadSpawner,
};
use solc_host::{
  Action, CompilerHost, Error, FetchError, HostConfig, ReadinessPolicy, RegistryEntry,
  ResponsePayload, Result, SourceFetcher, WorkerMessage, WorkerResponse,
};
use tokio::time::Instant;

const OWNABLE: &str = "@openzeppelin/contracts/access/Ownable.sol";
const OWNABLE_URL: &str =
  "https://raw.githubusercontent.com/OpenZeppelin/openzeppelin-contracts/v5.0.0/contracts/access/Ownable.sol";
const CONTEXT_URL: &str =
  "https://raw.githubusercontent.com/OpenZeppelin/openzeppelin-contracts/v5.0.0/contracts/utils/Context.sol";
const CRASH_MARKER: &str = "// crash-engine";

// -----------------------------------------------------------------------------
// Fake engine: a tiny standard-JSON "compiler"
// -----------------------------------------------------------------------------

fn compile_standard_json(input: &str) -> String {
  let declaration =
    Regex::new(r"(abstract\s+)?(contract|interface|library)\s+(\w+)").unwrap();
  let document: Value = serde_json::from_str(input).unwrap();
  let sources = document["sources"].as_object().cloned().unwrap_or_default();

  let mut errors = Vec::new();
  let mut contracts = Map::new();

  for (path, source) in &sources {
    let content = source["content"].as_str().unwrap_or_default();
    if content.contains(CRASH_MARKER) {
      panic!("engine aborted");
    }
    if !content.contains("SPDX-License-Identifier") {
      errors.push(json!({
        "severity": "warning",
        "message": "SPDX license identifier not provided in source file.",
        "sourceLocation": { "file": path, "start": -1, "end": -1 }
      }));
    }
    if content.matches('{').count() != content.matches('}').count() {
      let end = content.len();
      errors.push(json!({
        "severity": "error",
        "formattedMessage": format!("ParserError: Expected '}}' but got end of source\n --> {path}"),
        "message": "Expected '}' but got end of source",
        "sourceLocation": { "file": path, "start": end, "end": end }
      }));
      continue;
    }

    let mut file_contracts = Map::new();
    for captures in declaration.captures_iter(content) {
      let name = &captures[3];
      let deployable = captures.get(1).is_none() && &captures[2] != "interface";
      let (bytecode, deployed) = if deployable {
        (
          format!("60806040{}", hex::encode(name)),
          format!("6080{}", hex::encode(name)),
        )
      } else {
        (String::new(), String::new())
      };
      file_contracts.insert(
        name.to_string(),
        json!({
          "abi": [],
          "evm": {
            "bytecode": { "object": bytecode },
            "deployedBytecode": { "object": deployed },
            "methodIdentifiers": {}
          }
        }),
      );
    }
    contracts.insert(path.clone(), Value::Object(file_contracts));
  }

  let has_errors = errors.iter().any(|error| error["severity"] == "error");
  if has_errors {
    json!({ "errors": errors, "sources": {} }).to_string()
  } else {
    json!({ "errors": errors, "contracts": contracts }).to_string()
  }
}

struct FakeModule {
  version: String,
  inputs: Arc<Mutex<Vec<String>>>,
}

impl EngineModule for FakeModule {
  fn status(&self) -> ModuleStatus {
    ModuleStatus::Ready
  }

  fn invoke(&self, symbol: &str, input: &str, _flag: i32) -> Option<std::result::Result<String, String>> {
    match symbol {
      "solidity_compile" => {
        self.inputs.lock().unwrap().push(input.to_string());
        Some(Ok(compile_standard_json(input)))
      }
      "solidity_version" => Some(Ok(self.version.clone())),
      _ => None,
    }
  }
}

#[derive(Default)]
struct FakeLoader {
  imports: Mutex<Vec<String>>,
  inputs: Arc<Mutex<Vec<String>>>,
}

impl FakeLoader {
  fn imported(&self) -> Vec<String> {
    self.imports.lock().unwrap().clone()
  }

  fn last_input(&self) -> Value {
    let inputs = self.inputs.lock().unwrap();
    serde_json::from_str(inputs.last().unwrap()).unwrap()
  }
}

impl EngineLoader for FakeLoader {
  fn import_script(&self, entry: &RegistryEntry) -> Result<Box<dyn EngineModule>> {
    self.imports.lock().unwrap().push(entry.version.clone());
    Ok(Box::new(FakeModule {
      version: entry.version.clone(),
      inputs: self.inputs.clone(),
    }))
  }
}

// -----------------------------------------------------------------------------
// Fake fetcher and scripted contexts
// -----------------------------------------------------------------------------

#[derive(Default)]
struct CountingFetcher {
  bodies: HashMap<String, String>,
  calls: Mutex<Vec<String>>,
}

impl CountingFetcher {
  fn serving(pages: &[(&str, &str)]) -> Self {
    Self {
      bodies: pages
        .iter()
        .map(|(url, body)| (url.to_string(), body.to_string()))
        .collect(),
      calls: Mutex::new(Vec::new()),
    }
  }

  fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl SourceFetcher for CountingFetcher {
  async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
    self.calls.lock().unwrap().push(url.to_string());
    self.bodies.get(url).cloned().ok_or(FetchError::Status {
      status: 404,
      reason: "Not Found".into(),
    })
  }
}

/// Serves `body` for every URL after `delay`.
struct SlowFetcher {
  delay: Duration,
  body: String,
}

#[async_trait]
impl SourceFetcher for SlowFetcher {
  async fn fetch(&self, _url: &str) -> std::result::Result<String, FetchError> {
    tokio::time::sleep(self.delay).await;
    Ok(self.body.clone())
  }
}

/// Answers version loads and listings immediately and never answers compiles.
struct SilentCompileContext {
  events: EventSink,
}

impl ExecutionContext for SilentCompileContext {
  fn post_message(&self, message: WorkerMessage) -> Result<()> {
    let response = match message.action {
      Action::LoadCompiler => WorkerResponse::ok(message.id, None),
      Action::GetVersions => WorkerResponse::ok(
        message.id,
        Some(ResponsePayload::List(vec!["0.8.26".into()])),
      ),
      Action::Compile => return Ok(()),
    };
    self
      .events
      .send(ContextEvent::Message(response))
      .map_err(|_| Error::ContextUnavailable("host went away".into()))
  }

  fn terminate(&self) {}
}

#[derive(Default)]
struct SilentSpawner {
  spawned: AtomicUsize,
}

impl ContextSpawner for SilentSpawner {
  fn spawn(&self, events: EventSink) -> Result<Box<dyn ExecutionContext>> {
    self.spawned.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(SilentCompileContext { events }))
  }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn test_config() -> HostConfig {
  HostConfig {
    readiness: ReadinessPolicy {
      interval: Duration::from_millis(1),
      max_attempts: 10,
    },
    ..HostConfig::default()
  }
}

fn threaded_host(loader: Arc<FakeLoader>, fetcher: Arc<CountingFetcher>) -> CompilerHost {
  let config = test_config();
  let spawner = Arc::new(ThreadSpawner::new(&config, loader));
  CompilerHost::new(config, spawner, fetcher)
}

fn sources(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
  entries
    .iter()
    .map(|(path, content)| (path.to_string(), content.to_string()))
    .collect()
}

// -----------------------------------------------------------------------------
// Compilation
// -----------------------------------------------------------------------------

#[tokio::test]
async fn simple_contract_compiles_on_the_default_version() {
  let loader = Arc::new(FakeLoader::default());
  let host = threaded_host(loader.clone(), Arc::new(CountingFetcher::default()));

  let result = host.compile(sources(&[("A.sol", "contract A {}")])).await;

  assert!(result.success, "{:?}", result.errors);
  let artifact = result.contract("A").expect("contract A");
  assert!(!artifact.bytecode.is_empty());
  assert!(!artifact.deployed_bytecode.is_empty());
  assert!(hex::decode(&artifact.bytecode).is_ok());
  assert!(hex::decode(&artifact.deployed_bytecode).is_ok());
  assert!(result.diagnostics().iter().all(|diagnostic| !diagnostic.is_error()));
  assert_eq!(loader.imported(), vec!["0.8.26"]);
  assert_eq!(host.current_version(), "0.8.26");

  let input = loader.last_input();
  assert_eq!(input["settings"]["evmVersion"], "paris");
  assert_eq!(input["sources"]["A.sol"]["content"], "contract A {}");
  host.destroy();
}

#[tokio::test]
async fn syntax_error_yields_diagnostics_and_no_contracts() {
  let host = threaded_host(Arc::new(FakeLoader::default()), Arc::new(CountingFetcher::default()));

  let result = host
    .compile(sources(&[
      ("A.sol", "// SPDX-License-Identifier: MIT\ncontract A {"),
      ("B.sol", "// SPDX-License-Identifier: MIT\ncontract B {}"),
    ]))
    .await;

  assert!(!result.success);
  assert!(result.contracts.is_none());
  let error = result
    .diagnostics()
    .iter()
    .find(|diagnostic| diagnostic.is_error())
    .expect("error diagnostic");
  assert!(error.formatted_message.starts_with("ParserError"));
  assert_eq!(error.source_location.as_ref().unwrap().file, "A.sol");
  host.destroy();
}

#[tokio::test]
async fn abstract_and_interface_contracts_are_not_artifacts() {
  let host = threaded_host(Arc::new(FakeLoader::default()), Arc::new(CountingFetcher::default()));

  let result = host
    .compile(sources(&[(
      "Token.sol",
      "// SPDX-License-Identifier: MIT\ninterface IToken {}\nabstract contract Base {}\ncontract Token is Base {}",
    )]))
    .await;

  assert!(result.success);
  let contracts = result.contracts.as_ref().unwrap();
  assert_eq!(contracts.keys().collect::<Vec<_>>(), vec!["Token"]);
  host.destroy();
}

#[tokio::test]
async fn openzeppelin_import_is_fetched_once_per_host() {
  let loader = Arc::new(FakeLoader::default());
  let fetcher = Arc::new(CountingFetcher::serving(&[
    (
      OWNABLE_URL,
      "// SPDX-License-Identifier: MIT\nimport {Context} from \"../utils/Context.sol\";\nimport \"@openzeppelin/contracts/utils/Context.sol\";\nabstract contract Ownable is Context {}",
    ),
    (CONTEXT_URL, "// SPDX-License-Identifier: MIT\nabstract contract Context {}"),
  ]));
  let host = threaded_host(loader.clone(), fetcher.clone());
  let token = sources(&[(
    "Token.sol",
    "// SPDX-License-Identifier: MIT\nimport \"@openzeppelin/contracts/access/Ownable.sol\";\ncontract Token is Ownable {}",
  )]);

  let first = host.compile(token.clone()).await;
  assert!(first.success, "{:?}", first.errors);
  assert_eq!(fetcher.calls(), vec![OWNABLE_URL, CONTEXT_URL]);
  assert!(loader.last_input()["sources"][OWNABLE]["content"]
    .as_str()
    .unwrap()
    .contains("abstract contract Ownable"));
  assert_eq!(first.contracts.as_ref().unwrap().len(), 1);

  let second = host.compile(token).await;
  assert_eq!(second, first);
  assert_eq!(fetcher.calls().len(), 2);
  host.destroy();
}

#[tokio::test]
async fn unresolvable_import_is_left_to_the_compiler() {
  let loader = Arc::new(FakeLoader::default());
  let fetcher = Arc::new(CountingFetcher::default());
  let config = HostConfig {
    fetch: solc_host::RetryPolicy {
      attempts: 1,
      backoff_unit: Duration::from_millis(1),
    },
    ..test_config()
  };
  let spawner = Arc::new(ThreadSpawner::new(&config, loader.clone()));
  let host = CompilerHost::new(config, spawner, fetcher.clone());

  let result = host
    .compile(sources(&[(
      "A.sol",
      "// SPDX-License-Identifier: MIT\nimport \"@openzeppelin/contracts/access/Ownable.sol\";\ncontract A {}",
    )]))
    .await;

  assert_eq!(fetcher.calls(), vec![OWNABLE_URL]);
  assert!(loader.last_input()["sources"].get(OWNABLE).is_none());
  assert!(result.success);
  host.destroy();
}

// -----------------------------------------------------------------------------
// Versions
// -----------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_version_leaves_current_version_alone() {
  let loader = Arc::new(FakeLoader::default());
  let host = threaded_host(loader.clone(), Arc::new(CountingFetcher::default()));

  let err = host.set_version("9.9.9").await.unwrap_err();
  assert_eq!(
    err.to_string(),
    "Version 9.9.9 not supported. Available versions: 0.8.26, 0.8.25, 0.8.24, 0.8.20, 0.8.19"
  );
  assert_eq!(host.current_version(), "0.8.26");
  assert!(loader.imported().is_empty());
}

#[tokio::test]
async fn switching_versions_reloads_the_engine() {
  let loader = Arc::new(FakeLoader::default());
  let host = threaded_host(loader.clone(), Arc::new(CountingFetcher::default()));

  host.set_version("v0.8.20").await.unwrap();
  assert_eq!(host.current_version(), "0.8.20");
  assert_eq!(loader.imported(), vec!["0.8.26", "0.8.20"]);

  host.set_version("0.8.20").await.unwrap();
  assert_eq!(loader.imported().len(), 2);

  let result = host.compile(sources(&[("A.sol", "contract A {}")])).await;
  assert!(result.success);
  assert_eq!(loader.imported().len(), 2);
  host.destroy();
}

#[tokio::test]
async fn version_list_is_cached_until_destroy() {
  let host = threaded_host(Arc::new(FakeLoader::default()), Arc::new(CountingFetcher::default()));
  assert_eq!(host.cached_versions(), None);

  let versions = host.list_available_versions().await.unwrap();
  assert_eq!(versions, vec!["0.8.26", "0.8.25", "0.8.24", "0.8.20", "0.8.19"]);
  assert_eq!(host.cached_versions(), Some(versions));

  host.destroy();
  assert_eq!(host.cached_versions(), None);
}

// -----------------------------------------------------------------------------
// Lifecycle
// -----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unanswered_compile_times_out_after_the_request_window() {
  let spawner = Arc::new(SilentSpawner::default());
  let host = CompilerHost::new(HostConfig::default(), spawner, Arc::new(CountingFetcher::default()));

  let started = Instant::now();
  let result = host.compile(sources(&[("A.sol", "contract A {}")])).await;
  let elapsed = started.elapsed();

  assert!(elapsed >= Duration::from_secs(30));
  assert!(elapsed < Duration::from_secs(31));
  assert_eq!(
    result.diagnostics()[0].formatted_message,
    "Compilation failed: Worker timeout for action: compile"
  );
  assert_eq!(host.pending_requests(), 0);
  assert!(host.is_initialized());
}

#[tokio::test]
async fn destroy_settles_every_pending_call() {
  let spawner = Arc::new(SilentSpawner::default());
  let host = CompilerHost::new(test_config(), spawner.clone(), Arc::new(CountingFetcher::default()));

  let calls: Vec<_> = (0..3)
    .map(|_| {
      let host = host.clone();
      tokio::spawn(async move { host.compile(sources(&[("A.sol", "contract A {}")])).await })
    })
    .collect();

  for _ in 0..200 {
    if host.pending_requests() == 3 {
      break;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  assert_eq!(host.pending_requests(), 3);

  host.destroy();
  for call in calls {
    let result = call.await.unwrap();
    assert!(!result.success);
    assert_eq!(
      result.diagnostics()[0].formatted_message,
      "Compilation failed: Compiler destroyed"
    );
  }
  assert_eq!(host.pending_requests(), 0);
  assert!(!host.is_initialized());

  let versions = host.list_available_versions().await.unwrap();
  assert_eq!(versions, vec!["0.8.26"]);
  assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn destroy_fails_a_compile_still_resolving_imports() {
  let spawner = Arc::new(SilentSpawner::default());
  let fetcher = Arc::new(SlowFetcher {
    delay: Duration::from_millis(300),
    body: "// SPDX-License-Identifier: MIT\nabstract contract Ownable {}".into(),
  });
  let host = CompilerHost::new(test_config(), spawner.clone(), fetcher);

  let call = {
    let host = host.clone();
    tokio::spawn(async move {
      host
        .compile(sources(&[(
          "A.sol",
          "import \"@openzeppelin/contracts/access/Ownable.sol\";\ncontract A is Ownable {}",
        )]))
        .await
    })
  };
  tokio::time::sleep(Duration::from_millis(100)).await;
  assert!(host.is_initialized());
  host.destroy();

  let result = call.await.unwrap();
  assert!(!result.success);
  assert_eq!(
    result.diagnostics()[0].formatted_message,
    "Compilation failed: Compiler destroyed"
  );
  assert!(!host.is_initialized());
  assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
  assert!(host.resolver().cache().is_empty());
  assert_eq!(host.pending_requests(), 0);
}

#[tokio::test]
async fn crashed_worker_is_replaced_on_next_call() {
  let loader = Arc::new(FakeLoader::default());
  let host = threaded_host(loader.clone(), Arc::new(CountingFetcher::default()));

  let crashed = host
    .compile(sources(&[("A.sol", "// crash-engine\ncontract A {}")]))
    .await;
  assert!(!crashed.success);
  assert_eq!(
    crashed.diagnostics()[0].formatted_message,
    "Compilation failed: Worker crashed: engine aborted"
  );
  assert!(!host.is_initialized());

  let recovered = host.compile(sources(&[("A.sol", "contract A {}")])).await;
  assert!(recovered.success);
  assert_eq!(loader.imported(), vec!["0.8.26", "0.8.26"]);
  host.destroy();
}
