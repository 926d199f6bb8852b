//! Named completion barriers used to order stage actions.
//!
//! `Depends` is the only state shared between stage tasks during a run. A
//! stage waits on the keys it needs and completes the keys it owns; nothing
//! else ever sees the underlying set. There is no precomputed plan: the
//! ordering emerges from the keys each stage waits on.
//!
//! ```no_run
//! use convoy::depends::Depends;
//!
//! # async fn example() {
//! let deps = Depends::new();
//! deps.complete(["db"]);
//! deps.wait(["db"]).await; // returns immediately
//! # }
//! ```

use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;

/// Key signalled when `dependent` has been torn down, releasing `stage`.
///
/// Teardown uses one key per dependency edge so that a stage with several
/// dependents is only released after all of them are gone.
pub fn teardown_key(stage: &str, dependent: &str) -> String {
    format!("{}<-{}", stage, dependent)
}

/// Completion map shared by all stage tasks of one run.
#[derive(Debug)]
pub struct Depends {
    done: watch::Sender<HashSet<String>>,
}

impl Default for Depends {
    fn default() -> Self {
        Self::new()
    }
}

impl Depends {
    /// Create an empty map where no key is complete.
    pub fn new() -> Self {
        let (done, _) = watch::channel(HashSet::new());
        Self { done }
    }

    /// Block until every key has been completed.
    ///
    /// Returns immediately when `keys` is empty or all keys are already done.
    pub async fn wait<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.wait_all(&keys).await;
    }

    /// Like [`Depends::wait`], but gives up after `deadline`.
    ///
    /// On timeout the keys that were still outstanding are returned.
    pub async fn wait_timeout<I, S>(
        &self,
        keys: I,
        deadline: Option<Duration>,
    ) -> Result<(), Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let Some(deadline) = deadline else {
            self.wait_all(&keys).await;
            return Ok(());
        };

        match tokio::time::timeout(deadline, self.wait_all(&keys)).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.pending(&keys)),
        }
    }

    async fn wait_all(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let mut rx = self.done.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx
            .wait_for(|done| keys.iter().all(|k| done.contains(k)))
            .await;
    }

    /// Mark keys as complete and release every waiter now satisfied.
    ///
    /// Completing a key twice is a no-op.
    pub fn complete<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.done.send_if_modified(|done| {
            let mut changed = false;
            for key in keys {
                changed |= done.insert(key.into());
            }
            changed
        });
    }

    /// Check whether a single key has been completed.
    pub fn is_complete(&self, key: &str) -> bool {
        self.done.borrow().contains(key)
    }

    /// Return the subset of `keys` that is not yet complete.
    pub fn pending(&self, keys: &[String]) -> Vec<String> {
        let done = self.done.borrow();
        keys.iter().filter(|k| !done.contains(*k)).cloned().collect()
    }

    /// Complete `keys` when the returned guard is dropped.
    ///
    /// Take the guard before any fallible step so that every exit path,
    /// including an early `?` return or a panic, signals dependents.
    pub fn guard<I, S>(&self, keys: I) -> CompletionGuard<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CompletionGuard {
            depends: self,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// Completes a fixed set of keys on drop.
#[must_use = "dropping the guard immediately completes its keys"]
pub struct CompletionGuard<'a> {
    depends: &'a Depends,
    keys: Vec<String>,
}

impl CompletionGuard<'_> {
    /// Keys this guard will complete.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.depends.complete(self.keys.drain(..));
    }
}
