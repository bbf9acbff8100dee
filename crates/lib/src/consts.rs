//! Well-known names shared across the crate.

pub const APP_NAME: &str = "claimbind";

/// Finalizer placed on managed resources so that direct deletion is observed
/// and the reclaim policy can be honored before the object disappears.
pub const RECLAIM_FINALIZER: &str = "finalizer.claimbind.io/reclaim";

/// Annotation marking a portable class as the default for its claim kind.
pub const DEFAULT_CLASS_ANNOTATION: &str = "claimbind.io/is-default-class";

/// Capacity of the store's watch channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;

pub const ENV_PARALLELISM: &str = "CLAIMBIND_PARALLELISM";
pub const ENV_BIND_ATTEMPTS: &str = "CLAIMBIND_BIND_ATTEMPTS";
pub const ENV_BACKOFF_BASE: &str = "CLAIMBIND_BACKOFF_BASE";
pub const ENV_BACKOFF_MAX: &str = "CLAIMBIND_BACKOFF_MAX";
pub const ENV_RESOURCE_WAIT: &str = "CLAIMBIND_RESOURCE_WAIT";
pub const ENV_MAX_ROUNDS: &str = "CLAIMBIND_MAX_ROUNDS";

/// Namespace holding connection secrets of cluster-scoped managed resources.
pub const MANAGED_SECRET_NAMESPACE: &str = "claimbind-system";
