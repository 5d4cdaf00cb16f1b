//! Small helpers shared by the XML decoders.

use std::collections::HashMap;

use quick_xml::events::BytesStart;
use quick_xml::Reader;

use crate::domain::errors::{CoverError, CoverResult, ReportPosition};
use crate::domain::models::CoverageFormat;

pub(super) fn malformed_at(
    format: CoverageFormat,
    offset: u64,
    message: impl Into<String>,
) -> CoverError {
    CoverError::MalformedReport {
        format,
        position: ReportPosition::Byte(offset),
        message: message.into(),
    }
}

/// Decode every attribute of `element` into owned strings.
pub(super) fn attributes(
    format: CoverageFormat,
    reader: &Reader<&[u8]>,
    element: &BytesStart<'_>,
) -> CoverResult<HashMap<String, String>> {
    let offset = reader.buffer_position();
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| malformed_at(format, offset, e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| malformed_at(format, offset, e.to_string()))?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

/// Parse a required numeric attribute.
pub(super) fn required_u64(
    format: CoverageFormat,
    offset: u64,
    attrs: &HashMap<String, String>,
    element: &str,
    name: &str,
) -> CoverResult<u64> {
    let raw = attrs.get(name).ok_or_else(|| {
        malformed_at(
            format,
            offset,
            format!("<{element}> is missing the `{name}` attribute"),
        )
    })?;
    raw.trim().parse().map_err(|_| {
        malformed_at(
            format,
            offset,
            format!("<{element}> attribute `{name}` is not a non-negative integer: {raw:?}"),
        )
    })
}

/// Parse an optional numeric attribute, defaulting to 0 when absent.
pub(super) fn optional_u64(
    format: CoverageFormat,
    offset: u64,
    attrs: &HashMap<String, String>,
    element: &str,
    name: &str,
) -> CoverResult<u64> {
    if attrs.contains_key(name) {
        required_u64(format, offset, attrs, element, name)
    } else {
        Ok(0)
    }
}
