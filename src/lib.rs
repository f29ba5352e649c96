// ABOUTME: Library root for cnab-oci - bundle image fixup against OCI registries.
// ABOUTME: The cnab-oci binary is in main.rs.

pub mod bundle;
pub mod config;
pub mod error;
pub mod image_client;
pub mod registry;
pub mod remotes;
pub mod types;
