//! Data models

mod account;
mod certificate;
mod enrollment;
mod revocation;

pub use account::*;
pub use certificate::*;
pub use enrollment::*;
pub use revocation::*;
