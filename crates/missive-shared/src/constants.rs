/// Maximum message text length in Unicode scalar values (~100 words).
pub const MAX_TEXT_CHARS: usize = 500;

/// Maximum inline image size in bytes (20 MiB).
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Maximum file attachment size in bytes (100 MiB).
pub const MAX_FILE_BYTES: usize = 100 * 1024 * 1024;

/// Messages older than this many days are removed by the retention sweep.
pub const RETENTION_DAYS: i64 = 7;

/// Default HTTP API port (server).
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// URL prefix under which stored blobs are served.
pub const FILES_URL_PREFIX: &str = "/api/files";
