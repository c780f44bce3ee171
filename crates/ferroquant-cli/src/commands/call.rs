use std::fs;
use std::io::{self, Read};

use serde_json::Value;

use crate::cli::CallArgs;
use crate::error::CliError;

pub fn read_input(args: &CallArgs) -> Result<Value, CliError> {
    let raw = match (&args.input, &args.input_file) {
        (Some(inline), _) if inline != "-" => inline.clone(),
        (_, Some(path)) => fs::read_to_string(path)?,
        _ => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    parse_input(&raw)
}

fn parse_input(raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw)
        .map_err(|error| CliError::Command(format!("tool input is not valid JSON: {error}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_inline_input() {
        let args = CallArgs {
            tool: String::from("build_curve"),
            input: Some(String::from(r#"{"pillars":[]}"#)),
            input_file: None,
        };
        assert_eq!(read_input(&args).unwrap(), json!({ "pillars": [] }));
    }

    #[test]
    fn invalid_json_is_a_command_error() {
        let error = parse_input("{pillars").unwrap_err();
        assert!(matches!(error, CliError::Command(_)));
        assert_eq!(error.exit_code(), 2);
    }
}
