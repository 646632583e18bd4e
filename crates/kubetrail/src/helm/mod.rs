//! Helm release tracking.

pub mod decode;
pub mod deployment;
pub mod repository;
pub mod resolver;
pub mod secrets;

pub use decode::{decode_release, DecodeError};
pub use deployment::{extract_values, HelmReleaseInfo};
pub use repository::{ChartIndexProbe, ChartSource, HttpIndexProbe, NoProbe, RepositoryLocator};
pub use resolver::HelmResolver;
pub use secrets::{latest_releases, HelmReleaseSecret};
