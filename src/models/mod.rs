pub mod catalog;
pub mod image;
pub mod monitor;
pub mod report;
pub mod workload;

pub use catalog::{CatalogueTag, Cve, TagType};
pub use image::{ClusterImage, ImageReference, ImageStreamTagRef, PodAndContainerRef};
pub use monitor::{ImageMonitor, ImageMonitorSpec, ImageMonitorStatus};
pub use report::ReportResult;
