//! elFinder connector wire names.
//!
//! Parameter and field names are part of the protocol contract with the
//! browser client and must match verbatim.

/// Protocol version reported by `open` with `init=1`
pub const API_VERSION: &str = "2.1";

/// Identifier prefix of the single local volume
pub const VOLUME_ID: &str = "l1_";

/// Request parameters
pub mod param {
    pub const CMD: &str = "cmd";
    pub const TARGET: &str = "target";
    pub const TARGETS: &str = "targets[]";
    pub const NAME: &str = "name";
    pub const DST: &str = "dst";
    pub const SRC: &str = "src";
    pub const CUT: &str = "cut";
    pub const INIT: &str = "init";
    pub const TREE: &str = "tree";
    pub const UPLOAD: &str = "upload[]";
    pub const UPLOAD_PATH: &str = "upload_path[]";
    pub const OVERWRITE: &str = "overwrite";
    pub const Q: &str = "q";
    pub const MIMES: &str = "mimes[]";
    pub const CONTENT: &str = "content";
    pub const TYPE: &str = "type";
    pub const MODE: &str = "mode";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const X: &str = "x";
    pub const Y: &str = "y";
    pub const DEGREE: &str = "degree";
    pub const MAKEDIR: &str = "makedir";
    pub const DOWNLOAD: &str = "download";
    pub const INTERSECT: &str = "intersect[]";
    pub const DIRS: &str = "dirs[]";
}

/// Response envelope fields
pub mod field {
    pub const CWD: &str = "cwd";
    pub const FILES: &str = "files";
    pub const TREE: &str = "tree";
    pub const ADDED: &str = "added";
    pub const REMOVED: &str = "removed";
    pub const CHANGED: &str = "changed";
    pub const ERROR: &str = "error";
    pub const WARNING: &str = "warning";
    pub const FAILED: &str = "failed";
    pub const API: &str = "api";
    pub const OPTIONS: &str = "options";
    pub const UPL_MAX_SIZE: &str = "uplMaxSize";
    pub const UPL_MAX_FILE: &str = "uplMaxFile";
    pub const NET_DRIVERS: &str = "netDrivers";
    pub const LIST: &str = "list";
    pub const CONTENT: &str = "content";
    pub const DIM: &str = "dim";
    pub const SIZE: &str = "size";
    pub const FILE_CNT: &str = "fileCnt";
    pub const DIR_CNT: &str = "dirCnt";
    pub const SIZES: &str = "sizes";
    pub const HASHES: &str = "hashes";
}

/// Mime type the client expects for directories
pub const MIME_DIRECTORY: &str = "directory";

/// Mime type for symlinks that are dangling or leave the volume
pub const MIME_BROKEN_LINK: &str = "symlink-broken";

/// Interpret a protocol flag value ("1", "true", "on")
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "on" | "yes")
}
