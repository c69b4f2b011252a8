//! Process lifecycle for the long-running `run` command.

pub mod pid;
pub mod shutdown;
