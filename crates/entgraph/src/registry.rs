//! Everything that wraps the pipelines of one client.

use std::sync::Arc;

use entgraph_mutation::{Hook, HookRegistry, MutationPolicy};
use entgraph_query::{Interceptor, InterceptorRegistry, QueryPolicy};

/// Hooks, interceptors and privacy policies, per entity type or global.
///
/// A registry is assembled once and handed to [`Client::new`](crate::Client::new);
/// there is no process-wide hook state. Registration order is execution
/// order: entries registered `[A, B]` run as `A(B(base))`, global entries
/// wrap type-specific ones and policies sit innermost.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    hooks: HookRegistry,
    interceptors: InterceptorRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mutation hook for every entity type.
    pub fn hook_all(mut self, hook: Hook) -> Self {
        self.hooks = self.hooks.hook_all(hook);
        self
    }

    pub fn hook(mut self, type_name: impl Into<String>, hook: Hook) -> Self {
        self.hooks = self.hooks.hook(type_name, hook);
        self
    }

    /// Write rules for `type_name`.
    pub fn mutation_policy(mut self, type_name: impl Into<String>, policy: MutationPolicy) -> Self {
        self.hooks = self.hooks.policy(type_name, policy);
        self
    }

    /// A query interceptor for every entity type.
    pub fn intercept_all(mut self, interceptor: Interceptor) -> Self {
        self.interceptors = self.interceptors.intercept_all(interceptor);
        self
    }

    pub fn intercept(mut self, type_name: impl Into<String>, interceptor: Interceptor) -> Self {
        self.interceptors = self.interceptors.intercept(type_name, interceptor);
        self
    }

    /// Read rules for `type_name`.
    pub fn query_policy(mut self, type_name: impl Into<String>, policy: QueryPolicy) -> Self {
        self.interceptors = self.interceptors.policy(type_name, policy);
        self
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    pub(crate) fn into_parts(self) -> (Arc<HookRegistry>, Arc<InterceptorRegistry>) {
        (Arc::new(self.hooks), Arc::new(self.interceptors))
    }
}
