/// Application name used for directory names under XDG/AppData roots.
pub const APP_NAME: &str = "pinbuild";

/// Length of the truncated hash used for store directory names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default spec file looked up when no path is given.
pub const DEFAULT_SPEC_FILE: &str = "pinbuild.toml";

/// `SOURCE_DATE_EPOCH` exported to every native process.
/// 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

/// Number of trailing output lines kept on errors.
pub const OUTPUT_TAIL_LINES: usize = 40;
