//! In-memory formula registry.
//!
//! Built once per run from the loader and read-only afterwards; workers share
//! it through an `Arc`.

use crate::error::{KegError, Result};
use crate::formula::Formula;
use std::collections::BTreeMap;

/// Minimum Jaro-Winkler similarity for a "did you mean" suggestion
const SUGGESTION_THRESHOLD: f64 = 0.85;

#[derive(Debug, Default)]
pub struct Registry {
    formulae: BTreeMap<String, Formula>,
}

impl Registry {
    /// Build a registry, rejecting duplicate names
    pub fn new(formulae: impl IntoIterator<Item = Formula>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for formula in formulae {
            let name = formula.name.clone();
            if map.insert(name.clone(), formula).is_some() {
                return Err(KegError::Parse {
                    formula: name,
                    message: "defined more than once".to_string(),
                });
            }
        }
        Ok(Self { formulae: map })
    }

    pub fn lookup(&self, name: &str) -> Result<&Formula> {
        self.formulae.get(name).ok_or_else(|| KegError::FormulaNotFound {
            name: name.to_string(),
            required_by: None,
            suggestion: self.suggest(name),
        })
    }

    /// All formulae, sorted by name
    pub fn all(&self) -> impl Iterator<Item = &Formula> {
        self.formulae.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formulae.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.formulae.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty()
    }

    /// Check that every non-external dependency names a known formula.
    ///
    /// Edges are checked regardless of platform: a dangling edge is a broken
    /// formula even if this machine would never follow it.
    pub fn validate(&self) -> Result<()> {
        for formula in self.formulae.values() {
            for dep in formula.dependencies.iter().filter(|d| !d.external) {
                if !self.contains(&dep.name) {
                    return Err(KegError::FormulaNotFound {
                        name: dep.name.clone(),
                        required_by: Some(formula.name.clone()),
                        suggestion: self.suggest(&dep.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Closest known name to `name`, if any is close enough
    pub fn suggest(&self, name: &str) -> Option<String> {
        self.formulae
            .keys()
            .map(|k| (k, strsim::jaro_winkler(name, k)))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k.clone())
    }
}
