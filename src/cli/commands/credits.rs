//! Credit lookup command.

use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::output::{format_credits_pretty, to_json};
use crate::service::OfflineSync;

/// Show a customer's credits.
///
/// # Errors
///
/// Returns the token or remote error when online, the fetch fails, and
/// nothing is cached for the customer.
pub async fn credits(
    service: &OfflineSync,
    customer_id: &str,
    refresh: bool,
    format: OutputFormat,
) -> Result<String, SyncError> {
    let lookup = service.customer_credits(customer_id, refresh).await?;

    match format {
        OutputFormat::Json => to_json(&lookup),
        OutputFormat::Pretty => Ok(format_credits_pretty(&lookup)),
    }
}
