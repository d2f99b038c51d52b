//! Build metadata baked in by `build.rs`, shown by `gerrit-cl --version`.

const BUILD_ID: &str = match option_env!("GERRIT_CL_BUILD_ID") {
    Some(id) => id,
    None => "unknown build",
};
const BUILD_TIME: &str = match option_env!("GERRIT_CL_BUILD_TIME") {
    Some(time) => time,
    None => "unknown time",
};
const GIT_LABEL: &str = match option_env!("GERRIT_CL_BUILD_GIT") {
    Some(label) => label,
    None => "unknown git",
};

/// Full build identifier, e.g. "v0.1.0-3-g8a4f1d2 | 2026-10-05 15:47:12 UTC".
pub fn build_id() -> &'static str {
    BUILD_ID
}

pub fn build_timestamp() -> &'static str {
    BUILD_TIME
}

/// Tag or commit detected at build time.
pub fn git_label() -> &'static str {
    GIT_LABEL
}

/// One-line banner for `package` at `version`.
pub fn formatted_banner(package: &str, version: &str) -> String {
    format!("{} {} ({})", package, version, build_id())
}
