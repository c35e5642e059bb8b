//! dbt-opiner engine
//!
//! This crate implements:
//! - The `Opinion` contract and the built-in opinion catalog
//! - Declarative custom opinions loaded from TOML definition files
//! - The `OpinionsPack` registry and the `Linter` (suppression, dedup, exit status)
//! - Audit statistics

pub mod audit;
pub mod custom;
pub mod linter;
pub mod opinion;
pub mod opinions;
pub mod pack;

#[cfg(test)]
mod test_support;

pub use audit::{Audit, AuditKind, AuditTable};
pub use custom::{CustomOpinion, OpinionError};
pub use linter::Linter;
pub use opinion::{Evaluation, Opinion, OpinionBox, OpinionMeta};
pub use opinions::{builtin_codes, BuiltinOpinion, BUILTIN_OPINIONS};
pub use pack::{OpinionsPack, PackError};
