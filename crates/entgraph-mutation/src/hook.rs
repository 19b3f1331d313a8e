//! Hooks and mutation policies.
//!
//! A [`Mutator`] performs a mutation; a [`Hook`] wraps one mutator in
//! another. Hooks registered `[A, B]` compose to `A(B(base))`: `A` sees the
//! mutation first and `B` runs nearest the write. A type's
//! [`MutationPolicy`] wraps the base mutator directly, so it evaluates after
//! every hook has had its turn and before anything reaches the driver.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use entgraph_core::{Cx, Error, Outcome};
use entgraph_query::{Decision, Entity, evaluate};

use crate::mutation::{Mutation, Op};

/// What a mutator returns.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationValue {
    /// The created or updated node.
    Node(Entity),
    /// Affected row count of a multi-row update or delete.
    Affected(u64),
}

pub type Mutator = Arc<dyn Fn(&Cx, &mut Mutation) -> Outcome<MutationValue, Error> + Send + Sync>;

pub type Hook = Arc<dyn Fn(Mutator) -> Mutator + Send + Sync>;

/// A hook from a function that receives the next mutator.
pub fn hook<F>(f: F) -> Hook
where
    F: Fn(&Cx, &mut Mutation, &Mutator) -> Outcome<MutationValue, Error> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Mutator| {
        let f = Arc::clone(&f);
        let mutator: Mutator =
            Arc::new(move |cx: &Cx, m: &mut Mutation| f(cx, m, &next));
        mutator
    })
}

/// Apply `inner` only when `cond` holds for the mutation.
pub fn when<C>(inner: Hook, cond: C) -> Hook
where
    C: Fn(&Mutation) -> bool + Send + Sync + 'static,
{
    let cond = Arc::new(cond);
    Arc::new(move |next: Mutator| {
        let wrapped = inner(Arc::clone(&next));
        let cond = Arc::clone(&cond);
        let mutator: Mutator = Arc::new(move |cx: &Cx, m: &mut Mutation| {
            if cond(m) { wrapped(cx, m) } else { next(cx, m) }
        });
        mutator
    })
}

/// Apply `inner` only for the given operations.
pub fn on(inner: Hook, ops: &[Op]) -> Hook {
    let ops = ops.to_vec();
    when(inner, move |m| m.op().is_any(&ops))
}

/// Apply `inner` for every operation except the given ones.
pub fn unless(inner: Hook, ops: &[Op]) -> Hook {
    let ops = ops.to_vec();
    when(inner, move |m| !m.op().is_any(&ops))
}

/// Reject the given operations outright.
pub fn reject(ops: &[Op]) -> Hook {
    let ops = ops.to_vec();
    hook(move |cx, m, next| {
        if m.op().is_any(&ops) {
            return Outcome::Err(Error::Custom(format!(
                "{} operation is not allowed on {}",
                m.op(),
                m.type_name()
            )));
        }
        next(cx, m)
    })
}

pub type MutationRule = Arc<dyn Fn(&Cx, &Mutation) -> Decision + Send + Sync>;

/// Ordered write rules for one entity type.
#[derive(Clone, Default)]
pub struct MutationPolicy {
    rules: Vec<MutationRule>,
}

impl MutationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Cx, &Mutation) -> Decision + Send + Sync + 'static,
    {
        self.rules.push(Arc::new(rule));
        self
    }

    /// A rule that only votes on the given operations and skips the rest.
    pub fn rule_on<F>(self, ops: &[Op], rule: F) -> Self
    where
        F: Fn(&Cx, &Mutation) -> Decision + Send + Sync + 'static,
    {
        let ops = ops.to_vec();
        self.rule(move |cx, m| {
            if m.op().is_any(&ops) {
                rule(cx, m)
            } else {
                Decision::Skip
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn eval(&self, cx: &Cx, m: &Mutation) -> Result<(), Error> {
        evaluate(self.rules.iter().map(|rule| rule(cx, m)))
    }
}

impl fmt::Debug for MutationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationPolicy")
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Hooks and write policies per entity type.
#[derive(Clone, Default)]
pub struct HookRegistry {
    global: Vec<Hook>,
    by_type: HashMap<String, Vec<Hook>>,
    policies: HashMap<String, MutationPolicy>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for every type. Global hooks wrap type-specific ones.
    pub fn hook_all(mut self, hook: Hook) -> Self {
        self.global.push(hook);
        self
    }

    pub fn hook(mut self, type_name: impl Into<String>, hook: Hook) -> Self {
        self.by_type.entry(type_name.into()).or_default().push(hook);
        self
    }

    pub fn policy(mut self, type_name: impl Into<String>, policy: MutationPolicy) -> Self {
        self.policies.insert(type_name.into(), policy);
        self
    }

    pub fn policy_for(&self, type_name: &str) -> Option<&MutationPolicy> {
        self.policies.get(type_name)
    }

    pub fn chain_len(&self, type_name: &str) -> usize {
        self.global.len() + self.by_type.get(type_name).map_or(0, Vec::len)
    }

    /// Fold the chain for `type_name` around `base`.
    pub fn compose(&self, type_name: &str, base: Mutator) -> Mutator {
        let mut mutator = match self.policies.get(type_name) {
            Some(policy) if !policy.is_empty() => with_policy(policy.clone(), base),
            _ => base,
        };
        let chain: Vec<&Hook> = self
            .global
            .iter()
            .chain(self.by_type.get(type_name).into_iter().flatten())
            .collect();
        tracing::debug!(type_name, hooks = chain.len(), "Composing mutation chain");
        for hook in chain.into_iter().rev() {
            mutator = hook(mutator);
        }
        mutator
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("global", &self.global.len())
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn with_policy(policy: MutationPolicy, next: Mutator) -> Mutator {
    Arc::new(move |cx: &Cx, m: &mut Mutation| {
        if let Err(e) = policy.eval(cx, m) {
            tracing::debug!(type_name = m.type_name(), op = %m.op(), "Mutation denied by policy");
            return Outcome::Err(e);
        }
        next(cx, m)
    })
}
