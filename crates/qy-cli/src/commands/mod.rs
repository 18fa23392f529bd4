//! CLI command implementations

pub(crate) mod clean;
pub(crate) mod common;
pub(crate) mod compile;
pub(crate) mod execute;
pub(crate) mod ls;
pub(crate) mod parse;
pub(crate) mod retry;
