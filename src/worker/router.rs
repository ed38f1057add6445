//! Request classification against an ordered rule table.

use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::cache::RequestKey;

use super::fetch::FetchRequest;

/// How long a runtime-cached API response stays fresh when no rule says
/// otherwise: one day.
pub const DEFAULT_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// URL pattern a rule matches against.
#[derive(Debug, Clone, Copy)]
pub enum Pattern {
  /// Path starts with the given prefix
  PathPrefix(&'static str),
  /// Path ends in one of the given extensions
  Extension(&'static [&'static str]),
}

impl Pattern {
  fn matches(&self, url: &Url) -> bool {
    match self {
      Pattern::PathPrefix(prefix) => url.path().starts_with(prefix),
      Pattern::Extension(extensions) => match url.path().rsplit_once('.') {
        Some((_, ext)) => {
          let ext = ext.to_lowercase();
          extensions.contains(&ext.as_str())
        }
        None => false,
      },
    }
  }
}

/// Strategy a rule dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleStrategy {
  NetworkFirst,
  RuntimeFresh,
}

/// One row of the routing table.
#[derive(Debug, Clone, Copy)]
pub struct RouteRule {
  pub role: &'static str,
  pub pattern: Pattern,
  pub strategy: RuleStrategy,
  pub max_age_secs: Option<i64>,
}

/// Routing rules, checked top to bottom; first match wins. Static assets are
/// matched exactly against the configured asset list before this table is
/// consulted.
pub const ROUTE_RULES: &[RouteRule] = &[
  RouteRule {
    role: "api",
    pattern: Pattern::PathPrefix("/api/"),
    strategy: RuleStrategy::NetworkFirst,
    max_age_secs: None,
  },
  RouteRule {
    role: "fonts",
    pattern: Pattern::Extension(&["woff", "woff2", "ttf", "eot"]),
    strategy: RuleStrategy::RuntimeFresh,
    max_age_secs: Some(30 * 24 * 60 * 60),
  },
  RouteRule {
    role: "images",
    pattern: Pattern::Extension(&["png", "jpg", "jpeg", "svg", "gif", "webp"]),
    strategy: RuleStrategy::RuntimeFresh,
    max_age_secs: Some(7 * 24 * 60 * 60),
  },
];

/// The strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted: forwarded untouched, no cache involvement
  Passthrough,
  CacheFirst,
  NetworkFirst,
  Runtime { max_age_secs: i64 },
  Default,
}

/// Classifies requests by method, scheme, the static asset list, and the
/// rule table.
pub struct Router {
  static_assets: HashSet<String>,
}

impl Router {
  pub fn new(assets: &[Url]) -> Self {
    let static_assets = assets
      .iter()
      .map(|url| RequestKey::get(url).url().to_string())
      .collect();

    Self { static_assets }
  }

  pub fn classify(&self, request: &FetchRequest) -> Route {
    if request.method != "GET" {
      return Route::Passthrough;
    }
    if !matches!(request.url.scheme(), "http" | "https") {
      return Route::Passthrough;
    }

    let normalized = request.cache_key();
    if self.static_assets.contains(normalized.url()) {
      return Route::CacheFirst;
    }

    for rule in ROUTE_RULES {
      if rule.pattern.matches(&request.url) {
        debug!(role = rule.role, url = %request.url, "matched routing rule");
        return match rule.strategy {
          RuleStrategy::NetworkFirst => Route::NetworkFirst,
          RuleStrategy::RuntimeFresh => Route::Runtime {
            max_age_secs: rule.max_age_secs.unwrap_or(DEFAULT_MAX_AGE_SECS),
          },
        };
      }
    }

    Route::Default
  }
}
