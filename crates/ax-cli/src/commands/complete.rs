//! `allocx complete`: shell completion predictions

use ax_core::config::ClientConfig;

use crate::api::ApiClient;
use crate::exec::resolve::predict_allocation_ids;

/// Print every allocation id starting with `prefix`, one per line.
///
/// Failures print nothing; completion must never break the shell.
pub async fn complete_allocations(config: &ClientConfig, prefix: &str) {
    let client = ApiClient::from_config(config);
    for id in predict_allocation_ids(&client, prefix).await {
        println!("{}", id);
    }
}
