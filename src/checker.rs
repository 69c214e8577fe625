use crate::ast::BinaryExpr;
use crate::engine::AnalyzerOptions;
use crate::engine::context::CheckerContext;
use crate::level::Level;
use anyhow::{Result, anyhow};
use std::collections::{HashMap, HashSet};

// ============================================================================
// Checker Categories
// ============================================================================

/// High-level categories used to group checkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckerCategory {
    Suspicious,
}

impl CheckerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckerCategory::Suspicious => "suspicious",
        }
    }
}

/// Static metadata describing a checker.
#[derive(Debug)]
pub struct CheckerDescriptor {
    pub name: &'static str,
    pub category: CheckerCategory,
    pub description: &'static str,
    /// Longer text printed by `explain`.
    pub explanation: &'static str,
}

/// A path-sensitive checker driven by the symbolic engine.
///
/// Callbacks run once per (node, explored path) and must not keep state
/// between invocations.
pub trait Checker: Send + Sync {
    fn descriptor(&self) -> &'static CheckerDescriptor;

    /// Whether the checker takes part in a run with `options`.
    fn should_register(&self, _options: &AnalyzerOptions) -> bool {
        true
    }

    /// Called for every binary operator once both operands are evaluated.
    fn check_pre_binary(&self, _expr: &BinaryExpr, _ctx: &mut CheckerContext<'_>) {}
}

/// Per-checker configuration derived from `scaled-ptr-check.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckerSettings {
    levels: HashMap<String, Level>,
}

impl CheckerSettings {
    #[must_use]
    pub fn with_config_levels(mut self, levels: HashMap<String, Level>) -> Self {
        self.levels.extend(levels);
        self
    }

    #[must_use]
    pub fn disable(mut self, disabled: impl IntoIterator<Item = String>) -> Self {
        for name in disabled {
            self.levels.insert(name, Level::Allow);
        }
        self
    }

    #[must_use]
    pub fn with_level(mut self, name: &str, level: Level) -> Self {
        self.levels.insert(name.to_string(), level);
        self
    }

    pub fn level_for(&self, checker_name: &str) -> Level {
        self.levels.get(checker_name).copied().unwrap_or_default()
    }
}

/// Names of every built-in checker.
pub fn all_known_checkers() -> HashSet<&'static str> {
    CheckerRegistry::default_checkers()
        .descriptors()
        .map(|d| d.name)
        .collect()
}

/// Registry of checkers taking part in a run.
#[derive(Default)]
pub struct CheckerRegistry {
    checkers: Vec<Box<dyn Checker>>,
}

impl CheckerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_checker(mut self, checker: impl Checker + 'static) -> Self {
        self.checkers.push(Box::new(checker));
        self
    }

    /// Register `checker` unless it opts out for `options`.
    pub fn register(&mut self, checker: Box<dyn Checker>, options: &AnalyzerOptions) -> bool {
        if !checker.should_register(options) {
            return false;
        }
        self.checkers.push(checker);
        true
    }

    pub fn checkers(&self) -> &[Box<dyn Checker>] {
        &self.checkers
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &'static CheckerDescriptor> + '_ {
        self.checkers.iter().map(|c| c.descriptor())
    }

    pub fn find_descriptor(&self, name: &str) -> Option<&'static CheckerDescriptor> {
        self.descriptors().find(|d| d.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    #[must_use = "registry should be used to create an engine"]
    pub fn default_checkers() -> Self {
        crate::checkers::builtin()
            .into_iter()
            .fold(Self::new(), |mut reg, checker| {
                reg.checkers.push(checker);
                reg
            })
    }

    /// Built-in checkers filtered by name and by `should_register`.
    ///
    /// # Errors
    ///
    /// Returns error if any checker name in `only`, `skip`, or `disabled` is unknown.
    pub fn default_checkers_filtered(
        only: &[String],
        skip: &[String],
        disabled: &[String],
        options: &AnalyzerOptions,
    ) -> Result<Self> {
        let known = all_known_checkers();
        for n in only.iter().chain(skip.iter()).chain(disabled.iter()) {
            if !known.contains(n.as_str()) {
                return Err(anyhow!("unknown checker: {n}"));
            }
        }

        let only_set: Option<HashSet<&str>> = if only.is_empty() {
            None
        } else {
            Some(only.iter().map(String::as_str).collect())
        };
        let skip_set: HashSet<&str> = skip
            .iter()
            .chain(disabled.iter())
            .map(String::as_str)
            .collect();

        let mut reg = Self::new();
        for checker in crate::checkers::builtin() {
            let name = checker.descriptor().name;
            if let Some(ref only) = only_set
                && !only.contains(name)
            {
                continue;
            }
            if skip_set.contains(name) {
                continue;
            }
            reg.register(checker, options);
        }

        Ok(reg)
    }
}
