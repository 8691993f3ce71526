//! Capability tags shared by the classifier, provider descriptors and the
//! selection policy.
//!
//! Tags are plain strings so providers configured in the settings store can
//! carry tags this crate does not know about.

/// Provider can reason about security findings
pub const SECURITY: &str = "security";
/// General debugging help
pub const DEBUGGING: &str = "debugging";
/// Preferred for critical and security problems
pub const HIGH_ASSURANCE: &str = "high-assurance";
/// Preferred for performance problems
pub const OPTIMIZATION: &str = "optimization";
/// Preferred for dependency and build problems
pub const FAST_ITERATION: &str = "fast-iteration";
