// runguard-core/src/lib.rs

#![doc = include_str!("../../README.md")]

pub mod errors;
pub mod guards;
pub mod io;
pub mod reconciler;
pub mod spec;


pub use errors::{Result, RunError};
pub use guards::GuardState;
pub use io::{CommandOutput, ExecIo, PosixIo, split_command_line};
pub use reconciler::{AVAILABILITY_PROBE, Change, Changes, CommandReconciler, EXECUTE_CHANGE};
pub use spec::{CommandSpec, ResourceFile};
