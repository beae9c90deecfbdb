//! Deployment backends for sitepush.
//!
//! Provides deployer implementations:
//! - Netlify (zip upload to the deploy API, then poll until ready)

pub mod archive;
pub mod netlify;
pub mod policy;

pub use archive::{ArchivePayload, build_archive};
pub use netlify::{DEFAULT_API_URL, NetlifyDeployer};
pub use policy::DeployPolicy;
pub use sitepush_core::deployer::{
    DeployOutcome, DeployProgress, DeployState, DeployStatus, Deployer,
};
