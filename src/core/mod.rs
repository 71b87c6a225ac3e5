pub mod cache;
pub mod rewrite;
pub mod target;
pub mod transform;

pub use cache::ResponseCache;
pub use rewrite::RewriteContext;
pub use target::{TargetError, resolve_target};
pub use transform::{ContentKind, TransformOutcome};
