//! Field validators.
//!
//! Validators run during a mutation's `check()` step, after the value has
//! passed the field kind's own acceptance test. Pattern validators share a
//! process-wide cache of compiled expressions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use entgraph_core::Value;
use regex::Regex;

/// Compiled patterns, keyed by source text.
struct PatternCache {
    compiled: RwLock<HashMap<String, Regex>>,
}

impl PatternCache {
    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let compiled = self.compiled.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = compiled.get(pattern) {
                return Ok(regex.clone());
            }
        }
        let regex = Regex::new(pattern)?;
        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn pattern_cache() -> &'static PatternCache {
    static CACHE: OnceLock<PatternCache> = OnceLock::new();
    CACHE.get_or_init(|| PatternCache {
        compiled: RwLock::new(HashMap::new()),
    })
}

/// True when `value` matches `pattern`. An invalid pattern never matches.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match pattern_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid validator pattern, treating as non-match"
            );
            false
        }
    }
}

type CustomCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// A single value check attached to a field.
#[derive(Clone)]
pub enum Validator {
    /// String is not empty.
    NotEmpty,
    /// String or bytes length is at least `n`.
    MinLen(usize),
    /// String or bytes length is at most `n`.
    MaxLen(usize),
    /// Numeric value lies within `[min, max]`.
    Range { min: f64, max: f64 },
    /// Numeric value is strictly positive.
    Positive,
    /// String matches a regular expression.
    Matches(String),
    /// Arbitrary check.
    Custom(CustomCheck),
}

impl Validator {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Validator::Custom(Arc::new(check))
    }

    /// Run the check. NULL values are not validated.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        let len = || {
            value
                .as_str()
                .map(|s| s.chars().count())
                .or_else(|| value.as_bytes().map(<[u8]>::len))
        };
        match self {
            Validator::NotEmpty => match len() {
                Some(0) => Err("value is empty".to_string()),
                _ => Ok(()),
            },
            Validator::MinLen(n) => match len() {
                Some(l) if l < *n => Err(format!("length {l} is shorter than {n}")),
                _ => Ok(()),
            },
            Validator::MaxLen(n) => match len() {
                Some(l) if l > *n => Err(format!("length {l} exceeds {n}")),
                _ => Ok(()),
            },
            Validator::Range { min, max } => match value.as_f64() {
                Some(v) if v < *min || v > *max => {
                    Err(format!("value {v} out of range [{min}, {max}]"))
                }
                _ => Ok(()),
            },
            Validator::Positive => match value.as_f64() {
                Some(v) if v <= 0.0 => Err(format!("value {v} is not positive")),
                _ => Ok(()),
            },
            Validator::Matches(pattern) => match value.as_str() {
                Some(s) if !matches_pattern(s, pattern) => {
                    Err(format!("value {s:?} does not match {pattern:?}"))
                }
                _ => Ok(()),
            },
            Validator::Custom(check) => check(value),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::NotEmpty => f.write_str("NotEmpty"),
            Validator::MinLen(n) => write!(f, "MinLen({n})"),
            Validator::MaxLen(n) => write!(f, "MaxLen({n})"),
            Validator::Range { min, max } => write!(f, "Range({min}, {max})"),
            Validator::Positive => f.write_str("Positive"),
            Validator::Matches(p) => write!(f, "Matches({p:?})"),
            Validator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
