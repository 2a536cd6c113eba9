pub mod domtree;
pub mod verify;

pub use domtree::DomTree;
pub use verify::{VerifyError, verify_function, verify_module};
