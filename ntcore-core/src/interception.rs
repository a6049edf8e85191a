//! Wrapper registry for framework entry points.
//!
//! Each `(module, method)` pair is wrapped at most once per process. A
//! [`Patch`] keeps the original implementation callable and runs the capture
//! hook after it, only when a run was supplied and only when the original
//! succeeded. Capture failures are logged and discarded: the caller always
//! gets the original result back.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex};
use tracing::{debug, warn};

use crate::args::CallArgs;
use crate::error::{ModelError, NtcoreError};
use crate::experiment::Experiment;

/// The original implementation of an entry point.
pub type Original<M, T> = fn(&mut M, &CallArgs) -> Result<T, ModelError>;

/// Capture hook run after a successful original call.
pub type Hook<M, T> = fn(&mut M, &CallArgs, &T, &mut Experiment) -> Result<(), NtcoreError>;

/// Replacement that controls the original call itself.
pub type Around<M, T> =
    fn(Original<M, T>, &mut M, CallArgs, Option<&mut Experiment>) -> Result<T, ModelError>;

/// Identifies a wrapped entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchTarget {
    pub module: String,
    pub method: String,
}

impl PatchTarget {
    pub fn new(module: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
        }
    }

    /// Target keyed by a Rust model type.
    pub fn of<M: ?Sized>(method: impl Into<String>) -> Self {
        Self::new(std::any::type_name::<M>(), method)
    }
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.method)
    }
}

enum Replacement<M, T> {
    After(Hook<M, T>),
    Around(Around<M, T>),
}

/// An installed replacement for one entry point.
pub struct Patch<M, T> {
    target: PatchTarget,
    original: Original<M, T>,
    replacement: Replacement<M, T>,
}

impl<M, T> Patch<M, T> {
    /// Standard replacement: original call, then `hook` on success.
    pub fn after(target: PatchTarget, original: Original<M, T>, hook: Hook<M, T>) -> Self {
        Self {
            target,
            original,
            replacement: Replacement::After(hook),
        }
    }

    /// Replacement that wraps the original call.
    pub fn around(target: PatchTarget, original: Original<M, T>, around: Around<M, T>) -> Self {
        Self {
            target,
            original,
            replacement: Replacement::Around(around),
        }
    }

    pub fn target(&self) -> &PatchTarget {
        &self.target
    }

    /// The unwrapped implementation.
    pub fn original(&self) -> Original<M, T> {
        self.original
    }

    /// Invoke the entry point with an optional run.
    pub fn call(
        &self,
        model: &mut M,
        args: CallArgs,
        experiment: Option<&mut Experiment>,
    ) -> Result<T, ModelError> {
        match &self.replacement {
            Replacement::Around(around) => around(self.original, model, args, experiment),
            Replacement::After(hook) => {
                let output = (self.original)(model, &args)?;
                if let Some(run) = experiment {
                    if let Err(err) = hook(model, &args, &output, run) {
                        warn!(
                            target_method = %self.target,
                            run_id = %run.id(),
                            error = %err,
                            "Failed to record experiment, training result is unaffected"
                        );
                    }
                }
                Ok(output)
            }
        }
    }
}

impl<M, T> fmt::Debug for Patch<M, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch").field("target", &self.target).finish()
    }
}

/// Process-wide set of wrapped entry points.
pub struct PatchRegistry {
    patches: Mutex<HashMap<PatchTarget, Arc<dyn Any + Send + Sync>>>,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self {
            patches: Mutex::new(HashMap::new()),
        }
    }

    /// Install a patch. Installing an already wrapped target is a no-op and
    /// returns the patch that is already in place.
    pub fn install<M, T>(&self, patch: Patch<M, T>) -> Arc<Patch<M, T>>
    where
        M: 'static,
        T: 'static,
    {
        let mut patches = self.patches.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = patches.get(&patch.target) {
            if let Ok(existing) = Arc::clone(existing).downcast::<Patch<M, T>>() {
                debug!(target_method = %patch.target, "Entry point already wrapped");
                return existing;
            }
            warn!(
                target_method = %patch.target,
                "Entry point wrapped with a different signature, keeping the first wrapper"
            );
            return Arc::new(patch);
        }

        debug!(target_method = %patch.target, "Wrapping entry point");
        let target = patch.target.clone();
        let patch = Arc::new(patch);
        patches.insert(target, patch.clone() as Arc<dyn Any + Send + Sync>);
        patch
    }

    /// The installed patch for `target`, if any.
    pub fn get<M, T>(&self, target: &PatchTarget) -> Option<Arc<Patch<M, T>>>
    where
        M: 'static,
        T: 'static,
    {
        let patches = self.patches.lock().unwrap_or_else(|e| e.into_inner());
        patches
            .get(target)
            .and_then(|p| Arc::clone(p).downcast::<Patch<M, T>>().ok())
    }

    pub fn is_patched(&self, target: &PatchTarget) -> bool {
        self.patches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(target)
    }

    pub fn targets(&self) -> Vec<PatchTarget> {
        let mut targets: Vec<_> = self
            .patches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        targets.sort();
        targets
    }

    pub fn len(&self) -> usize {
        self.patches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: LazyLock<PatchRegistry> = LazyLock::new(PatchRegistry::new);

/// The process-wide registry used by the framework integrations.
pub fn registry() -> &'static PatchRegistry {
    &REGISTRY
}
