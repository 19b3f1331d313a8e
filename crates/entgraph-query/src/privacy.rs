//! Privacy rules evaluated before reads reach the driver.

use std::fmt;
use std::sync::Arc;

use entgraph_core::{Cx, Error, PrivacyError};

use crate::interceptor::QueryState;

/// Outcome of one privacy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Stop evaluating and let the operation through.
    Allow,
    /// Stop evaluating and reject with the reason.
    Deny(String),
    /// Defer to the next rule.
    Skip,
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny(reason.into())
    }
}

/// Evaluate decisions in order: the first non-`Skip` wins; all `Skip` allows.
pub fn evaluate<I>(decisions: I) -> Result<(), Error>
where
    I: IntoIterator<Item = Decision>,
{
    for decision in decisions {
        match decision {
            Decision::Skip => continue,
            Decision::Allow => return Ok(()),
            Decision::Deny(reason) => return Err(Error::Privacy(PrivacyError { reason })),
        }
    }
    Ok(())
}

pub type QueryRule = Arc<dyn Fn(&Cx, &QueryState) -> Decision + Send + Sync>;

/// Ordered read rules for one entity type.
#[derive(Clone, Default)]
pub struct QueryPolicy {
    rules: Vec<QueryRule>,
}

impl QueryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Cx, &QueryState) -> Decision + Send + Sync + 'static,
    {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn eval(&self, cx: &Cx, state: &QueryState) -> Result<(), Error> {
        evaluate(self.rules.iter().map(|rule| rule(cx, state)))
    }
}

impl fmt::Debug for QueryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPolicy")
            .field("rules", &self.rules.len())
            .finish()
    }
}
