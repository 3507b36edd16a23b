//! Header line of the line-oriented (NDJSON) variant.
//!
//! ```text
//! {"yardl":{"version":1,"schema":<schema JSON object>}}\n
//! ```
//! Unlike the binary header the schema is compared as a JSON value, and only
//! against the current schema: there is no previous-schema fallback here.

use std::io::{BufRead, Write};

use serde_json::{json, Value as Json};
use tracing::debug;

use crate::error::{Result, YardlError};

/// The version number carried in the NDJSON header.
pub const NDJSON_FORMAT_VERSION: u32 = 1;

/// Writes the header line for `schema` (a JSON document) followed by `\n`.
pub fn write_ndjson_header<W: Write>(out: &mut W, schema: &str) -> Result<()> {
    let schema: Json = serde_json::from_str(schema)
        .map_err(|e| YardlError::InvalidSchema(format!("schema is not valid JSON: {e}")))?;
    let header = json!({ "yardl": { "version": NDJSON_FORMAT_VERSION, "schema": schema } });

    serde_json::to_writer(&mut *out, &header).map_err(std::io::Error::from)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Reads the header line and returns the embedded schema value.
///
/// # Errors
///
/// - [`YardlError::Format`] when the line is missing, is not JSON, or lacks the
///   `yardl`, `version` or `schema` keys.
/// - [`YardlError::UnsupportedVersion`] when `version` is not
///   [`NDJSON_FORMAT_VERSION`].
pub fn read_ndjson_header<R: BufRead>(input: &mut R) -> Result<Json> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(YardlError::Format("missing NDJSON header line".to_string()));
    }

    let mut header: Json = serde_json::from_str(line.trim_end())
        .map_err(|e| YardlError::Format(format!("NDJSON header is not valid JSON: {e}")))?;
    let yardl = header
        .get_mut("yardl")
        .ok_or_else(|| YardlError::Format("NDJSON header has no 'yardl' key".to_string()))?;

    let version = yardl
        .get("version")
        .ok_or_else(|| YardlError::Format("NDJSON header has no version".to_string()))?;
    if !version.is_number() {
        return Err(YardlError::Format(format!(
            "NDJSON header version {version} is not a number"
        )));
    }
    if version.as_f64() != Some(f64::from(NDJSON_FORMAT_VERSION)) {
        let reported = version
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(u32::MAX);
        return Err(YardlError::UnsupportedVersion(reported));
    }

    let schema = yardl
        .get_mut("schema")
        .map(Json::take)
        .ok_or_else(|| YardlError::Format("NDJSON header has no schema".to_string()))?;
    debug!("read NDJSON header");
    Ok(schema)
}

/// Reads the header line and requires its schema to be deep-equal to
/// `expected_schema`.
pub fn read_and_validate_ndjson_header<R: BufRead>(
    input: &mut R,
    protocol: &str,
    expected_schema: &str,
) -> Result<()> {
    let expected: Json = serde_json::from_str(expected_schema)
        .map_err(|e| YardlError::InvalidSchema(format!("schema is not valid JSON: {e}")))?;
    let actual = read_ndjson_header(input)?;
    if actual != expected {
        return Err(YardlError::SchemaMismatch {
            protocol: protocol.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{"protocol":{"name":"P","sequence":[]},"types":null}"#;

    #[test]
    fn test_header_line_shape() {
        let mut out = Vec::new();
        write_ndjson_header(&mut out, SCHEMA).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 1);
        let parsed: Json = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed["yardl"]["version"], 1);
        assert_eq!(parsed["yardl"]["schema"]["protocol"]["name"], "P");
    }

    #[test]
    fn test_validate_accepts_reformatted_schema() {
        // Arrange: same JSON value, different whitespace
        let line = "{\"yardl\":{\"version\":1,\"schema\":{ \"protocol\" : {\"name\":\"P\",\"sequence\":[]}, \"types\":null }}}\n";

        // Act
        let result = read_and_validate_ndjson_header(&mut line.as_bytes(), "P", SCHEMA);

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_rejects_different_schema() {
        let mut out = Vec::new();
        write_ndjson_header(&mut out, r#"{"protocol":{"name":"Q","sequence":[]},"types":null}"#)
            .unwrap();

        let result = read_and_validate_ndjson_header(&mut out.as_slice(), "P", SCHEMA);

        assert!(matches!(result, Err(YardlError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_missing_keys_are_format_errors() {
        for line in [
            "not json\n",
            "{}\n",
            "{\"yardl\":{\"schema\":{}}}\n",
            "{\"yardl\":{\"version\":1}}\n",
            "",
        ] {
            let result = read_ndjson_header(&mut line.as_bytes());
            assert!(matches!(result, Err(YardlError::Format(_))), "line {line:?}");
        }
    }

    #[test]
    fn test_wrong_version_is_unsupported() {
        let line = "{\"yardl\":{\"version\":2,\"schema\":{}}}\n";

        let result = read_ndjson_header(&mut line.as_bytes());

        assert!(matches!(result, Err(YardlError::UnsupportedVersion(2))));
    }

    #[test]
    fn test_any_other_number_is_an_unsupported_version() {
        for version in ["-1", "2.5", "0"] {
            // Arrange
            let line = format!("{{\"yardl\":{{\"version\":{version},\"schema\":{{}}}}}}\n");

            // Act
            let result = read_ndjson_header(&mut line.as_bytes());

            // Assert
            assert!(
                matches!(result, Err(YardlError::UnsupportedVersion(_))),
                "version {version}: {result:?}"
            );
        }
    }

    #[test]
    fn test_non_numeric_version_is_a_format_error() {
        let line = "{\"yardl\":{\"version\":\"1\",\"schema\":{}}}\n";

        let result = read_ndjson_header(&mut line.as_bytes());

        assert!(matches!(result, Err(YardlError::Format(_))));
    }

    #[test]
    fn test_integral_float_version_is_accepted() {
        let line = "{\"yardl\":{\"version\":1.0,\"schema\":{}}}\n";

        let schema = read_ndjson_header(&mut line.as_bytes()).unwrap();

        assert_eq!(schema, json!({}));
    }

    #[test]
    fn test_body_lines_are_left_unread() {
        let mut input = "{\"yardl\":{\"version\":1,\"schema\":{}}}\n{\"data\":1}\n".as_bytes();

        read_ndjson_header(&mut input).unwrap();

        assert_eq!(input, b"{\"data\":1}\n");
    }
}
