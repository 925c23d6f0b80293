//! The request-scoped context: key/value bags visible to handlers and their
//! callbacks without explicit plumbing.
//!
//! Two lifetimes are offered. Global values live for the whole process and
//! are set once, typically at broker construction. Local values live inside
//! the task-local bag that the dispatch pipeline opens per message with
//! [`isolated`]; concurrent dispatches never see each other's locals.
//!
//! Before a handler runs, the dispatch pipeline publishes the current
//! [`MessageInfo`](crate::message::MessageInfo) under `message` and the
//! subscription key under `subscription`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock, RwLock};

/// A string-keyed bag of type-erased shared values.
type Bag = HashMap<String, Arc<dyn Any + Send + Sync>>;

tokio::task_local! {
    /// The task-local bag. Only present inside [`isolated`] scopes.
    static LOCALS: RefCell<Bag>;
}

/// The process-wide bag.
static GLOBALS: OnceLock<RwLock<Bag>> = OnceLock::new();

/// Lazily initializes and returns the global bag.
fn globals() -> &'static RwLock<Bag> {
    GLOBALS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Stores a process-wide value under the given key, replacing any previous
/// value.
pub fn set_global(key: impl Into<String>, value: impl Any + Send + Sync) {
    globals()
        .write()
        .expect("global context lock poisoned")
        .insert(key.into(), Arc::new(value));
}

/// Retrieves a process-wide value by key, downcast to `V`.
///
/// Returns `None` when the key is absent or holds a different type.
pub fn global<V: Any + Send + Sync>(key: &str) -> Option<Arc<V>> {
    let bag = globals().read().expect("global context lock poisoned");
    bag.get(key).cloned().and_then(|v| v.downcast::<V>().ok())
}

/// Stores a value in the current task-local bag.
///
/// Outside an [`isolated`] scope this is a no-op: there is no bag to write
/// to, and values must not leak across dispatches.
pub fn set_local(key: impl Into<String>, value: impl Any + Send + Sync) {
    let key = key.into();
    let _ = LOCALS.try_with(|bag| {
        bag.borrow_mut().insert(key, Arc::new(value));
    });
}

/// Retrieves a task-local value by key, downcast to `V`.
///
/// Returns `None` outside an [`isolated`] scope, when the key is absent, or
/// when it holds a different type.
pub fn local<V: Any + Send + Sync>(key: &str) -> Option<Arc<V>> {
    LOCALS
        .try_with(|bag| bag.borrow().get(key).cloned())
        .ok()
        .flatten()
        .and_then(|v| v.downcast::<V>().ok())
}

/// Runs the future with `key` bound to `value` in the task-local bag,
/// restoring the previous binding (or absence) afterwards.
///
/// Restoration happens whether the future resolves to success or failure.
/// If the task panics, the whole bag is torn down with it. Outside an
/// [`isolated`] scope the future simply runs with no binding.
pub async fn scope<V, F>(key: &str, value: V, fut: F) -> F::Output
where
    V: Any + Send + Sync,
    F: Future,
{
    let key = key.to_string();
    let previous = LOCALS
        .try_with(|bag| {
            bag.borrow_mut()
                .insert(key.clone(), Arc::new(value) as Arc<dyn Any + Send + Sync>)
        })
        .ok()
        .flatten();

    let output = fut.await;

    let _ = LOCALS.try_with(|bag| {
        let mut bag = bag.borrow_mut();
        match previous {
            Some(previous) => bag.insert(key, previous),
            None => bag.remove(&key),
        }
    });

    output
}

/// Runs the future with a fresh, empty task-local bag.
///
/// The dispatch pipeline wraps every message dispatch in this, which is what
/// isolates scoped values between concurrent dispatches.
pub async fn isolated<F: Future>(fut: F) -> F::Output {
    LOCALS.scope(RefCell::new(HashMap::new()), fut).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locals_are_isolated_between_tasks() {
        let first = tokio::spawn(isolated(async {
            set_local("who", "first".to_string());
            tokio::task::yield_now().await;
            local::<String>("who").map(|v| v.as_str().to_string())
        }));
        let second = tokio::spawn(isolated(async {
            set_local("who", "second".to_string());
            tokio::task::yield_now().await;
            local::<String>("who").map(|v| v.as_str().to_string())
        }));

        assert_eq!(first.await.unwrap().as_deref(), Some("first"));
        assert_eq!(second.await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn scope_restores_previous_value_on_exit() {
        isolated(async {
            set_local("key", 1u32);
            let inner = scope("key", 2u32, async { local::<u32>("key").map(|v| *v) }).await;
            assert_eq!(inner, Some(2));
            assert_eq!(local::<u32>("key").map(|v| *v), Some(1));
        })
        .await;
    }

    #[tokio::test]
    async fn scope_removes_value_that_was_not_set_before() {
        isolated(async {
            scope("fresh", 7u32, async {}).await;
            assert!(local::<u32>("fresh").is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn locals_are_invisible_outside_a_scope() {
        set_local("orphan", 1u32);
        assert!(local::<u32>("orphan").is_none());
    }

    #[test]
    fn globals_live_for_the_process() {
        set_global("answer", 42u32);
        assert_eq!(global::<u32>("answer").map(|v| *v), Some(42));
        assert!(global::<String>("answer").is_none());
    }
}
