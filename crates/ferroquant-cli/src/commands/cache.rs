use ferroquant_agent::{AnalyticsService, ServiceError};
use ferroquant_core::Envelope;
use serde_json::{json, Map, Value};

use crate::cli::{CacheArgs, CacheCommand, InvalidateArgs};
use crate::error::CliError;

use super::local_envelope;

pub async fn run(args: &CacheArgs, service: &AnalyticsService) -> Result<Envelope<Value>, CliError> {
    match &args.command {
        CacheCommand::Stats => match service.cache().stats().await {
            Ok(stats) => local_envelope(serde_json::to_value(stats)?, Vec::new()),
            Err(error) => local_envelope(
                Value::Null,
                ServiceError::CacheUnavailable(error.to_string()).envelope_errors("cache_stats"),
            ),
        },
        CacheCommand::Invalidate(invalidate) => Ok(service
            .call("invalidate_cache", invalidate_input(invalidate))
            .await),
        CacheCommand::Purge => Ok(service
            .call("invalidate_cache", json!({ "purge_expired": true }))
            .await),
    }
}

fn invalidate_input(args: &InvalidateArgs) -> Value {
    let mut input = Map::new();
    if let Some(key) = &args.key {
        input.insert(String::from("key"), json!(key));
    }
    if let Some(prefix) = &args.prefix {
        input.insert(String::from("prefix"), json!(prefix));
    }
    if let Some(kind) = args.kind {
        input.insert(String::from("kind"), json!(kind.as_str()));
    }
    Value::Object(input)
}
