mod compare;
pub mod error;
mod name;
mod version;

pub use crate::compare::compare;
pub use crate::name::{is_valid_name, normalize};
pub use crate::version::{PreRelease, PreReleaseTag, Version};
