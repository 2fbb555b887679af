use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `import "x";`, `import 'x';` and `import {A, B} from "x";`.
static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r#"import\s+(?:"([^"]+)"|'([^']+)'|\{[^}]+\}\s+from\s+(?:"([^"]+)"|'([^']+)'))"#,
  )
  .expect("import pattern is valid")
});

const RELATIVE_PARENT: &str = "..";

/// Known relative imports inside the OpenZeppelin packages and their canonical form.
/// Anything not listed here is treated as locally resolvable and skipped.
const RELATIVE_MAPPINGS: [(&str, &str); 15] = [
  ("../utils/ContextUpgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/ContextUpgradeable.sol"),
  ("../../utils/ContextUpgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/ContextUpgradeable.sol"),
  ("../../../utils/ContextUpgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/ContextUpgradeable.sol"),
  ("../utils/introspection/ERC165Upgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/introspection/ERC165Upgradeable.sol"),
  ("../utils/PausableUpgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/PausableUpgradeable.sol"),
  ("../../../utils/PausableUpgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/PausableUpgradeable.sol"),
  ("../utils/cryptography/EIP712Upgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/cryptography/EIP712Upgradeable.sol"),
  ("../../../utils/cryptography/EIP712Upgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/cryptography/EIP712Upgradeable.sol"),
  ("../utils/NoncesUpgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/NoncesUpgradeable.sol"),
  ("../../../utils/NoncesUpgradeable.sol", "@openzeppelin/contracts-upgradeable/utils/NoncesUpgradeable.sol"),
  ("../beacon/IBeacon.sol", "@openzeppelin/contracts/proxy/beacon/IBeacon.sol"),
  ("../../utils/Address.sol", "@openzeppelin/contracts/utils/Address.sol"),
  ("../../utils/StorageSlot.sol", "@openzeppelin/contracts/utils/StorageSlot.sol"),
  ("../utils/Initializable.sol", "@openzeppelin/contracts-upgradeable/proxy/utils/Initializable.sol"),
  ("../../proxy/utils/Initializable.sol", "@openzeppelin/contracts-upgradeable/proxy/utils/Initializable.sol"),
];

pub fn canonical_relative(path: &str) -> Option<&'static str> {
  RELATIVE_MAPPINGS
    .iter()
    .find(|(relative, _)| *relative == path)
    .map(|(_, canonical)| *canonical)
}

/// Every literal path argument of an import statement, in source order.
pub fn import_literals(content: &str) -> impl Iterator<Item = &str> {
  IMPORT_RE.captures_iter(content).filter_map(|captures| {
    (1..=4)
      .find_map(|group| captures.get(group))
      .map(|path| path.as_str())
  })
}

/// Canonical external imports referenced by `content`.
///
/// Keeps paths under `namespace` as-is. Relative-parent paths are only
/// considered when the file itself mentions the namespace and are rewritten
/// through the static mapping table.
pub fn extract_imports(content: &str, namespace: &str) -> Vec<String> {
  let mentions_namespace = content.contains(namespace);
  let mut imports = Vec::new();

  for path in import_literals(content) {
    if path.starts_with(namespace) {
      imports.push(path.to_string());
    } else if path.starts_with(RELATIVE_PARENT) && mentions_namespace {
      if let Some(canonical) = canonical_relative(path) {
        imports.push(canonical.to_string());
      }
    }
  }

  imports
}
