#![forbid(unsafe_code)]

pub mod defaults;
pub mod exec;
pub mod handoff;
pub mod plan;
pub mod report;
pub mod sequence;
pub mod supervisor;
pub mod vcs;
