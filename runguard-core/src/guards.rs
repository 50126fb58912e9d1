// runguard-core/src/guards.rs

use serde::Serialize;
use std::fmt;

/// Outcome of evaluating a spec's guards against the live system.
///
/// Each flag is `true` when that guard *permits* execution. An absent guard
/// always permits. Built fresh for every evaluation and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuardState {
    pub creates: bool,
    pub onlyif: bool,
    pub unless: bool,
}

impl GuardState {
    /// The state of a spec without any guards.
    pub fn permit_all() -> Self {
        GuardState {
            creates: true,
            onlyif: true,
            unless: true,
        }
    }

    pub fn permits_run(&self) -> bool {
        self.creates & self.onlyif & self.unless
    }

    /// Names of the guards currently blocking execution.
    pub fn blocking(&self) -> Vec<&'static str> {
        [
            ("creates", self.creates),
            ("onlyif", self.onlyif),
            ("unless", self.unless),
        ]
        .into_iter()
        .filter(|(_, permits)| !permits)
        .map(|(name, _)| name)
        .collect()
    }
}

impl Default for GuardState {
    fn default() -> Self {
        Self::permit_all()
    }
}

impl fmt::Display for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "creates={} onlyif={} unless={}",
            self.creates, self.onlyif, self.unless
        )
    }
}
