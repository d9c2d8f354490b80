/// Names of the metrics the storage layer records.
///
/// Nothing here installs a recorder; embedders that want these exported
/// install one of their own before starting the service.
pub struct Metrics;

impl Metrics {
    /// Counter of facade operations, labelled by `op`.
    pub const OPERATIONS: &str = "hoard_vfs_operations_total";
    /// Counter of failed facade operations, labelled by `op` and `kind`.
    pub const OPERATION_ERRORS: &str = "hoard_vfs_operation_errors_total";
    /// Histogram of facade operation latency in seconds, labelled by `op`.
    pub const OPERATION_DURATION: &str = "hoard_vfs_operation_duration_seconds";
    /// Counter of bytes read through the facade.
    pub const BYTES_READ: &str = "hoard_vfs_read_bytes_total";
    /// Counter of bytes written through the facade.
    pub const BYTES_WRITTEN: &str = "hoard_vfs_written_bytes_total";
    /// Counter of copies and renames that had to go through the generic
    /// read-then-write path, labelled by `op`.
    pub const FALLBACKS: &str = "hoard_vfs_fallbacks_total";
}
