//! Domain model module declarations.

pub mod descriptor;
pub mod message;
pub mod namespace;
