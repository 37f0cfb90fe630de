/// Semantic version baked into the build.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build type, replaceable at compile time with `PKIAAS_TAG` (for example a commit hash).
pub const TAG: &str = match option_env!("PKIAAS_TAG") {
    Some(tag) => tag,
    None => "beta",
};

/// User-visible aggregation of version and tag, `0.8.9-beta`.
pub fn full_version_name() -> String {
    format!("{VERSION}-{TAG}")
}
