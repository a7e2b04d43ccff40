//! Analysis stages: one external tool per node, metrics persisted per
//! work record.

pub mod cvsanaly;
pub mod linguist;
pub mod pdepend;
pub mod phploc;
