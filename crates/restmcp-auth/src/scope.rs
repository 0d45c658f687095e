//! Scope requirement engine
//!
//! Maps tool names to required scopes via glob patterns (`*` and `?`) and
//! evaluates a token's scopes against them. All comparisons are
//! case-insensitive.
//!
//! The scopes required for a tool are the union of:
//!
//! 1. the default-required scopes,
//! 2. every scope declared by a registered OAuth provider (opt-in),
//! 3. the scopes of every requirement whose pattern matches the tool.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::registry::OAuthProviderRegistry;

/// Scopes required for tools matching `pattern`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRequirement {
    /// Tool name glob, `*` matches any run and `?` a single character
    pub pattern: String,
    /// Scopes that must all be present
    #[serde(default)]
    pub required_scopes: Vec<String>,
    /// At least one of these must be present, when non-empty
    #[serde(default)]
    pub any_of_scopes: Vec<String>,
}

impl ScopeRequirement {
    /// Requirement with only mandatory scopes
    pub fn new(pattern: impl Into<String>, required_scopes: &[&str]) -> Self {
        Self {
            pattern: pattern.into(),
            required_scopes: required_scopes.iter().map(|s| s.to_string()).collect(),
            any_of_scopes: Vec::new(),
        }
    }

    /// Add alternative scopes of which one must be present
    pub fn with_any_of(mut self, scopes: &[&str]) -> Self {
        self.any_of_scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Outcome of checking a token's scopes for one tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeCheck {
    /// Every scope the tool requires
    pub required: Vec<String>,
    /// Required scopes the token lacks
    pub missing: Vec<String>,
    /// Alternatives of any-of groups the token satisfies none of
    pub unmet_any_of: Vec<String>,
}

impl ScopeCheck {
    /// Whether the token may call the tool
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty() && self.unmet_any_of.is_empty()
    }

    /// Scopes to advertise in an `insufficient_scope` challenge
    pub fn challenge_scopes(&self) -> Vec<String> {
        let mut scopes = self.missing.clone();
        push_unique(&mut scopes, self.unmet_any_of.iter());
        scopes
    }
}

#[derive(Debug, Clone)]
struct CompiledRequirement {
    requirement: ScopeRequirement,
    matcher: Regex,
}

/// Evaluates tool calls against configured scope requirements
#[derive(Debug, Clone)]
pub struct ScopeRequirementEngine {
    default_required: Vec<String>,
    requirements: Vec<CompiledRequirement>,
    provider_scopes: Option<Arc<OAuthProviderRegistry>>,
}

/// Translate a tool glob into an anchored, case-insensitive regex.
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] for an empty pattern or one that
/// does not compile.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(AuthError::configuration("scope pattern must not be empty"));
    }
    let body = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    RegexBuilder::new(&format!("^{}$", body))
        .case_insensitive(true)
        .build()
        .map_err(|e| AuthError::configuration(format!("invalid scope pattern '{}': {}", pattern, e)))
}

impl ScopeRequirementEngine {
    /// Compile requirements.
    ///
    /// # Errors
    ///
    /// Fails if any pattern does not compile.
    pub fn new(default_required: Vec<String>, requirements: Vec<ScopeRequirement>) -> Result<Self> {
        let requirements = requirements
            .into_iter()
            .map(|requirement| {
                Ok(CompiledRequirement {
                    matcher: glob_to_regex(&requirement.pattern)?,
                    requirement,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            default_required,
            requirements,
            provider_scopes: None,
        })
    }

    /// Also require the scopes declared by every provider in `registry`
    pub fn include_provider_scopes(mut self, registry: Arc<OAuthProviderRegistry>) -> Self {
        self.provider_scopes = Some(registry);
        self
    }

    /// Check `token_scopes` against everything `tool_name` requires.
    ///
    /// Every missing scope is reported, not just the first.
    pub fn validate_scopes_for_tool(&self, tool_name: &str, token_scopes: &[String]) -> ScopeCheck {
        self.check(Some(tool_name), token_scopes)
    }

    /// Check only the default and provider scopes, for requests that do not
    /// name a tool
    pub fn validate_base_scopes(&self, token_scopes: &[String]) -> ScopeCheck {
        self.check(None, token_scopes)
    }

    fn check(&self, tool_name: Option<&str>, token_scopes: &[String]) -> ScopeCheck {
        let mut required = self.default_required.clone();
        if let Some(registry) = &self.provider_scopes {
            push_unique(&mut required, registry.declared_scopes().iter());
        }

        let matching = self
            .requirements
            .iter()
            .filter(|c| tool_name.is_some_and(|tool| c.matcher.is_match(tool)));

        let mut unmet_any_of = Vec::new();
        for compiled in matching {
            push_unique(&mut required, compiled.requirement.required_scopes.iter());

            let any_of = &compiled.requirement.any_of_scopes;
            if !any_of.is_empty() && !any_of.iter().any(|s| contains_ci(token_scopes, s)) {
                push_unique(&mut unmet_any_of, any_of.iter());
            }
        }

        let missing = required
            .iter()
            .filter(|scope| !contains_ci(token_scopes, scope))
            .cloned()
            .collect();

        ScopeCheck {
            required,
            missing,
            unmet_any_of,
        }
    }

    /// Every scope this engine knows of, for `scopes_supported`
    pub fn known_scopes(&self) -> Vec<String> {
        let mut scopes = self.default_required.clone();
        if let Some(registry) = &self.provider_scopes {
            push_unique(&mut scopes, registry.declared_scopes().iter());
        }
        for compiled in &self.requirements {
            push_unique(&mut scopes, compiled.requirement.required_scopes.iter());
            push_unique(&mut scopes, compiled.requirement.any_of_scopes.iter());
        }
        scopes
    }
}

fn contains_ci(scopes: &[String], scope: &str) -> bool {
    scopes.iter().any(|s| s.eq_ignore_ascii_case(scope))
}

fn push_unique<'a>(into: &mut Vec<String>, scopes: impl Iterator<Item = &'a String>) {
    for scope in scopes {
        if !contains_ci(into, scope) {
            into.push(scope.clone());
        }
    }
}
