//! JSON output for CLI commands
//!
//! One JSON object per command, UTF-8, newline-terminated.

use std::io::Write;

use serde_json::Value;

use super::errors::CliResult;

/// Write a success response
pub fn write_response<W: Write>(out: &mut W, data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });
    serde_json::to_writer(&mut *out, &response)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Write an error response
pub fn write_error<W: Write>(out: &mut W, code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });
    serde_json::to_writer(&mut *out, &response)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_shape() {
        let mut out = Vec::new();
        write_response(&mut out, json!([1, 2])).unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, json!({"status": "ok", "data": [1, 2]}));
    }

    #[test]
    fn test_error_shape() {
        let mut out = Vec::new();
        write_error(&mut out, "CHRONO_CLI_IO_ERROR", "boom").unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("\n"));
    }
}
