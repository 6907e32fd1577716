//! Outer surfaces: how run results leave the process.

pub mod report;
