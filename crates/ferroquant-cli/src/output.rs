use ferroquant_core::Envelope;
use serde_json::Value;

use crate::cli::OutputFormat;
use crate::error::CliError;

pub fn render(envelope: &Envelope<Value>, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => println!("{}", to_json(envelope, pretty)?),
        OutputFormat::Table => print!("{}", to_table(envelope)?),
    }
    Ok(())
}

fn to_json(envelope: &Envelope<Value>, pretty: bool) -> Result<String, CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    Ok(payload)
}

fn to_table(envelope: &Envelope<Value>) -> Result<String, CliError> {
    let meta = &envelope.meta;
    let mut out = String::new();
    out.push_str(&format!("request_id  : {}\n", meta.request_id));
    if let Some(trace_id) = &meta.trace_id {
        out.push_str(&format!("trace_id    : {trace_id}\n"));
    }
    out.push_str(&format!("schema      : {}\n", meta.schema_version));
    out.push_str(&format!("generated_at: {}\n", meta.generated_at));
    out.push_str(&format!(
        "sources     : {}\n",
        meta.source_chain
            .iter()
            .map(|source| source.as_str())
            .collect::<Vec<_>>()
            .join(",")
    ));
    out.push_str(&format!("latency_ms  : {}\n", meta.latency_ms));
    out.push_str(&format!("cache_hit   : {}\n", meta.cache_hit));
    out.push_str(&format!("stale       : {}\n", meta.stale));

    if !meta.warnings.is_empty() {
        out.push_str("warnings:\n");
        for warning in &meta.warnings {
            out.push_str(&format!("  - {warning}\n"));
        }
    }

    out.push_str("data:\n");
    for line in serde_json::to_string_pretty(&envelope.data)?.lines() {
        out.push_str(&format!("  {line}\n"));
    }

    if !envelope.errors.is_empty() {
        out.push_str("errors:\n");
        for error in &envelope.errors {
            match &error.input_path {
                Some(path) => out.push_str(&format!("  - {} at {path}: {}\n", error.code, error.message)),
                None => out.push_str(&format!("  - {}: {}\n", error.code, error.message)),
            }
        }
    }

    Ok(out)
}
