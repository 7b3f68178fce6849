//! AWS SDK configuration
//!
//! Credentials come from the default provider chain (env, profile, IRSA,
//! instance metadata). Nothing is read from code or config files here.

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::debug;

/// Load the shared SDK configuration.
///
/// An explicit region wins; otherwise the default chain is used, falling back
/// to `us-east-1`.
pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
    let chain = match region {
        Some(r) => RegionProviderChain::first_try(Region::new(r.to_string())),
        None => RegionProviderChain::default_provider(),
    }
    .or_else(Region::new("us-east-1"));

    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(chain)
        .load()
        .await;

    debug!(region = ?config.region(), "Loaded AWS SDK configuration");
    config
}

/// Error codes that mean "the thing is already gone"
pub fn is_not_found_code(code: Option<&str>) -> bool {
    matches!(
        code.unwrap_or(""),
        "NoSuchEntity" | "NoSuchBucketPolicy" | "ResourceNotFoundException" | "NotFound"
    )
}
