//! Versioned cache generation names.
//!
//! Each deployment owns one static and one dynamic generation, both derived
//! from a single version string. Older generations carrying the same prefix
//! are garbage-collected on activation.

/// Prefix shared by every generation this worker manages. Activation only
/// deletes names carrying this prefix, so caches owned by other tools are
/// left alone.
pub const CACHE_PREFIX: &str = "mt103-";

/// The current static and dynamic generation names for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
  pub static_name: String,
  pub dynamic_name: String,
}

impl Generations {
  pub fn for_version(version: &str) -> Self {
    Self {
      static_name: format!("{CACHE_PREFIX}static-{version}"),
      dynamic_name: format!("{CACHE_PREFIX}dynamic-{version}"),
    }
  }

  /// Whether a generation name belongs to this worker's naming scheme.
  pub fn is_ours(&self, name: &str) -> bool {
    name.starts_with(CACHE_PREFIX)
  }

  /// Whether a generation name is one of the two current generations.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_names_for_version() {
    let generations = Generations::for_version("v1");

    assert_eq!(generations.static_name, "mt103-static-v1");
    assert_eq!(generations.dynamic_name, "mt103-dynamic-v1");
  }

  #[test]
  fn test_ownership_and_currency() {
    let generations = Generations::for_version("v2");

    assert!(generations.is_ours("mt103-static-v1"));
    assert!(generations.is_ours("mt103-dynamic-v2"));
    assert!(!generations.is_ours("other-app-v1"));

    assert!(generations.is_current("mt103-static-v2"));
    assert!(generations.is_current("mt103-dynamic-v2"));
    assert!(!generations.is_current("mt103-static-v1"));
  }
}
