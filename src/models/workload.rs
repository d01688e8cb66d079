/// Annotation and label keys Heimdall persists on platform objects. This is
/// the entirety of Heimdall's durable state; there is no sidecar store.
pub mod annotations {
    /// Label. Presence (value is ignored) marks a workload as monitored.
    pub const MONITORED: &str = "heimdall.monitored";
    /// Annotation. RFC822Z timestamp of the last completed check.
    pub const LAST_CHECKED: &str = "heimdall.lastcheck";
    /// Annotation. Comma-joined content digests observed at the last check.
    pub const IMAGES_CHECKED: &str = "heimdall.imageschecked";
}

/// Time format used for `LAST_CHECKED`: RFC822 with numeric zone offset,
/// e.g. `"27 Jul 26 10:04 +0000"`.
pub const TIME_FORMAT: &str = "%d %b %y %H:%M %z";

pub const DEFAULT_RECHECK_MINUTES: u64 = 30;
