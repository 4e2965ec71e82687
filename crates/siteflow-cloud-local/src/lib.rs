//! SiteFlow local control plane
//!
//! A file-backed stand-in for the S3 and CloudFront control planes.
//! Objects live in a JSON store (`.siteflow/cloud.json` by default) so
//! `site plan` and `site apply` can be exercised without an account.
//!
//! ## Supported resource types
//! - `s3-bucket`
//! - `s3-bucket-website`
//! - `s3-bucket-public-access-block`
//! - `s3-bucket-policy`
//! - `cloudfront-origin-access-identity`
//! - `cloudfront-distribution`

pub mod catalog;
pub mod error;
pub mod plane;
pub mod store;

pub use error::{LocalError, Result};
pub use plane::{DEFAULT_REGION, DEFAULT_STORE_FILE, LocalControlPlane};
