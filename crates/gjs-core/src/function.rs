//! Function descriptors: the uniform abstraction this crate layers over raw
//! Gearman jobs.
//!
//! Polymorphism here is by descriptor lookup, not by trait-object
//! inheritance — a [`FunctionDescriptor`] is a plain value with a factory
//! closure, and every attribute has an explicit default. A fresh
//! [`FunctionInstance`] is created from the factory for every attempt, so
//! no state can leak between attempts or between jobs.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::Dict;
use crate::error::JobResult;
use crate::progress::ProgressSink;
use crate::queue::Priority;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// The object a descriptor's factory produces: one instance per attempt.
pub trait FunctionInstance: Send {
    fn run(&mut self, args: Option<&Dict>, progress: &dyn ProgressSink) -> JobResult<Option<Dict>>;
}

/// Blanket impl so a plain closure can act as a [`FunctionInstance`] for
/// functions with no per-attempt state of their own.
impl<F> FunctionInstance for F
where
    F: FnMut(Option<&Dict>, &dyn ProgressSink) -> JobResult<Option<Dict>> + Send,
{
    fn run(&mut self, args: Option<&Dict>, progress: &dyn ProgressSink) -> JobResult<Option<Dict>> {
        self(args, progress)
    }
}

type InstanceFactory = Arc<dyn Fn() -> Box<dyn FunctionInstance> + Send + Sync>;

/// A registered function's full attribute set, built with the `with_*`
/// builder methods below.
#[derive(Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub timeout: Duration,
    pub retries: u32,
    pub unique: bool,
    pub priority: Priority,
    pub notify_on_failure: bool,
    factory: InstanceFactory,
}

impl FunctionDescriptor {
    /// Builds a descriptor with spec-default attributes: a 300s timeout, no
    /// retries, non-unique, normal priority, no failure notification.
    pub fn new<Fac, Inst>(name: impl Into<String>, factory: Fac) -> Self
    where
        Fac: Fn() -> Inst + Send + Sync + 'static,
        Inst: FunctionInstance + 'static,
    {
        Self {
            name: name.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: 0,
            unique: false,
            priority: Priority::Normal,
            notify_on_failure: false,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn FunctionInstance>),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_notify_on_failure(mut self, notify: bool) -> Self {
        self.notify_on_failure = notify;
        self
    }

    /// Total attempts this descriptor allows: `retries + 1`.
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Produces a fresh instance for one attempt.
    pub fn instantiate(&self) -> Box<dyn FunctionInstance> {
        (self.factory)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let d = FunctionDescriptor::new("Noop", || |_: Option<&Dict>, _: &dyn ProgressSink| Ok(None));
        assert_eq!(d.timeout, Duration::from_secs(300));
        assert_eq!(d.retries, 0);
        assert!(!d.unique);
        assert_eq!(d.priority, Priority::Normal);
        assert!(!d.notify_on_failure);
        assert_eq!(d.max_attempts(), 1);
    }

    #[test]
    fn builder_overrides_stick() {
        let d = FunctionDescriptor::new("Add", || |_: Option<&Dict>, _: &dyn ProgressSink| Ok(None))
            .with_retries(3)
            .with_unique(true)
            .with_priority(Priority::High);
        assert_eq!(d.max_attempts(), 4);
        assert!(d.unique);
        assert_eq!(d.priority, Priority::High);
    }

    #[test]
    fn each_instantiate_call_is_independent() {
        let d = FunctionDescriptor::new("Counter", || {
            let mut count = 0;
            move |_: Option<&Dict>, _: &dyn ProgressSink| {
                count += 1;
                Ok(Some(Dict::from([(
                    "count".to_string(),
                    crate::codec::Value::Int(count),
                )])))
            }
        });

        let mut a = d.instantiate();
        let mut b = d.instantiate();
        let r1 = a.run(None, &crate::progress::NoopProgressSink).unwrap();
        let r2 = b.run(None, &crate::progress::NoopProgressSink).unwrap();
        // Both start from a fresh closure-local `count`, so both report 1,
        // not 1 and 2 — proving no state leaked between instances.
        assert_eq!(r1, r2);
    }
}
