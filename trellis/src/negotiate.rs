//! Per-request selection of wire encodings.
//!
//! The request's `Content-Type` picks the unmarshaler; the `Accept` header
//! picks the marshaler through standard weighted negotiation. When no
//! `Accept` is present the response reuses the request's own encoding rather
//! than the server's first preference, so a client speaking one encoding in
//! both directions works without ever setting `Accept`.

use http::header::{HeaderMap, ACCEPT, CONTENT_TYPE};

use crate::codec::MediaType;

/// Why encoding selection failed. `Malformed` (a header that cannot be
/// parsed at all) is deliberately distinct from the well-formed-but-unusable
/// variants, which echo the offending value so it can be reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiateError {
    /// The named header is missing or cannot be parsed.
    #[error("missing or malformed {0} header")]
    Malformed(&'static str),

    /// The supplied content type is well-formed but not supported.
    #[error("unsupported media type {0:?}")]
    Unsupported(String),

    /// No supported media type satisfies the accept preferences.
    #[error("no acceptable media type in {0:?}")]
    NotAcceptable(String),
}

/// Selects the encoding used to read request messages, from `Content-Type`.
pub fn unmarshaler_for(headers: &HeaderMap) -> Result<MediaType, NegotiateError> {
    let value = headers
        .get(CONTENT_TYPE)
        .ok_or(NegotiateError::Malformed("content-type"))?;
    let value = value
        .to_str()
        .map_err(|_| NegotiateError::Malformed("content-type"))?;
    let essence = media_essence(value).ok_or(NegotiateError::Malformed("content-type"))?;
    MediaType::from_name(&essence).ok_or(NegotiateError::Unsupported(essence))
}

/// Selects the encoding used to write response messages.
///
/// `fallback` is the request's own media type; it wins whenever the request
/// carries no `Accept` header at all.
pub fn marshaler_for(
    headers: &HeaderMap,
    fallback: MediaType,
) -> Result<MediaType, NegotiateError> {
    let Some(value) = headers.get(ACCEPT) else {
        return Ok(fallback);
    };
    let value = value
        .to_str()
        .map_err(|_| NegotiateError::Malformed("accept"))?;
    negotiate(value)
}

/// The `type/subtype` of a media type value, with parameters stripped,
/// whitespace trimmed and case folded. `None` if the shape is not
/// `type/subtype`.
fn media_essence(value: &str) -> Option<String> {
    let essence = value.split(';').next().unwrap_or("").trim();
    let (ty, subtype) = essence.split_once('/')?;
    if ty.is_empty() || subtype.is_empty() || subtype.contains('/') {
        return None;
    }
    Some(essence.to_ascii_lowercase())
}

/// One parsed `Accept` entry: a possibly-wildcarded range and its weight in
/// thousandths (q-values carry at most three decimals).
struct AcceptRange {
    ty: String,
    subtype: String,
    weight: u16,
}

impl AcceptRange {
    /// How specifically this range matches `media`: exact beats subtype
    /// wildcard beats full wildcard. `None` when it does not match.
    fn specificity(&self, media: MediaType) -> Option<u8> {
        let (ty, subtype) = media
            .as_str()
            .split_once('/')
            .expect("supported media type names are type/subtype");
        match (self.ty.as_str(), self.subtype.as_str()) {
            (t, s) if t == ty && s == subtype => Some(2),
            (t, "*") if t == ty => Some(1),
            ("*", "*") => Some(0),
            _ => None,
        }
    }
}

fn negotiate(header: &str) -> Result<MediaType, NegotiateError> {
    let mut ranges = Vec::new();
    for entry in header.split(',') {
        if entry.trim().is_empty() {
            continue;
        }
        ranges.push(parse_range(entry)?);
    }
    if ranges.is_empty() {
        return Err(NegotiateError::Malformed("accept"));
    }

    // Highest weight wins; ties fall back to the server preference order.
    let mut best: Option<(u16, MediaType)> = None;
    for media in MediaType::SUPPORTED {
        let weight = ranges
            .iter()
            .filter_map(|range| range.specificity(media).map(|s| (s, range.weight)))
            .max_by_key(|(specificity, _)| *specificity)
            .map(|(_, weight)| weight);
        match (weight, &best) {
            (Some(weight), _) if weight == 0 => {}
            (Some(weight), Some((best_weight, _))) if weight <= *best_weight => {}
            (Some(weight), _) => best = Some((weight, media)),
            (None, _) => {}
        }
    }
    best.map(|(_, media)| media)
        .ok_or_else(|| NegotiateError::NotAcceptable(header.to_owned()))
}

fn parse_range(entry: &str) -> Result<AcceptRange, NegotiateError> {
    let mut parts = entry.split(';');
    let essence = parts.next().unwrap_or("").trim();
    let (ty, subtype) = essence
        .split_once('/')
        .ok_or(NegotiateError::Malformed("accept"))?;
    let (ty, subtype) = (ty.trim(), subtype.trim());
    if ty.is_empty() || subtype.is_empty() || (ty == "*" && subtype != "*") {
        return Err(NegotiateError::Malformed("accept"));
    }

    let mut weight = 1000;
    for param in parts {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")) {
            weight = parse_weight(value).ok_or(NegotiateError::Malformed("accept"))?;
        }
        // Other media-type parameters do not affect matching.
    }

    Ok(AcceptRange {
        ty: ty.to_ascii_lowercase(),
        subtype: subtype.to_ascii_lowercase(),
        weight,
    })
}

/// Parses an RFC 7231 qvalue ("1", "0.5", "0.125") into thousandths.
fn parse_weight(value: &str) -> Option<u16> {
    let (int, frac) = match value.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (value, ""),
    };
    if frac.len() > 3 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let base = match int {
        "0" => 0,
        "1" => 1000,
        _ => return None,
    };
    let mut thousandths = 0;
    for (i, digit) in frac.chars().enumerate() {
        thousandths += digit.to_digit(10).unwrap() as u16 * 10u16.pow(2 - i as u32);
    }
    if base == 1000 && thousandths != 0 {
        return None;
    }
    Some(base + thousandths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn content_type_selects_exactly_one_supported_entry() {
        for media in MediaType::SUPPORTED {
            let map = headers(&[("content-type", media.as_str())]);
            assert_eq!(unmarshaler_for(&map).unwrap(), media);
        }
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let map = headers(&[("content-type", "application/json; charset=utf-8")]);
        assert_eq!(unmarshaler_for(&map).unwrap(), MediaType::Json);
    }

    #[test]
    fn missing_content_type_is_malformed_not_unsupported() {
        let map = HeaderMap::new();
        assert_eq!(
            unmarshaler_for(&map),
            Err(NegotiateError::Malformed("content-type"))
        );
    }

    #[test]
    fn unsupported_content_type_surfaces_the_raw_type() {
        let map = headers(&[("content-type", "application/xml")]);
        assert_eq!(
            unmarshaler_for(&map),
            Err(NegotiateError::Unsupported("application/xml".into()))
        );
    }

    #[test]
    fn garbage_content_type_is_malformed() {
        let map = headers(&[("content-type", "not a media type")]);
        assert_eq!(
            unmarshaler_for(&map),
            Err(NegotiateError::Malformed("content-type"))
        );
    }

    #[test]
    fn absent_accept_falls_back_to_the_request_encoding() {
        let map = HeaderMap::new();
        assert_eq!(marshaler_for(&map, MediaType::Json).unwrap(), MediaType::Json);
        assert_eq!(marshaler_for(&map, MediaType::Text).unwrap(), MediaType::Text);
    }

    #[test]
    fn weights_order_the_choice() {
        let map = headers(&[("accept", "text/plain;q=0.5, application/json;q=0.9")]);
        assert_eq!(
            marshaler_for(&map, MediaType::Protobuf).unwrap(),
            MediaType::Json
        );
    }

    #[test]
    fn equal_weights_fall_back_to_server_preference() {
        let map = headers(&[("accept", "text/plain, application/protobuf")]);
        assert_eq!(
            marshaler_for(&map, MediaType::Json).unwrap(),
            MediaType::Protobuf
        );
    }

    #[test]
    fn wildcards_match() {
        let map = headers(&[("accept", "application/*")]);
        assert_eq!(
            marshaler_for(&map, MediaType::Text).unwrap(),
            MediaType::Protobuf
        );

        let map = headers(&[("accept", "*/*;q=0.1, text/plain")]);
        assert_eq!(marshaler_for(&map, MediaType::Json).unwrap(), MediaType::Text);
    }

    #[test]
    fn zero_weight_excludes_a_type() {
        let map = headers(&[("accept", "application/json;q=0, text/plain;q=0.1")]);
        assert_eq!(marshaler_for(&map, MediaType::Json).unwrap(), MediaType::Text);
    }

    #[test]
    fn nothing_acceptable_reports_the_header() {
        let map = headers(&[("accept", "application/xml")]);
        assert_eq!(
            marshaler_for(&map, MediaType::Json),
            Err(NegotiateError::NotAcceptable("application/xml".into()))
        );
    }

    #[test]
    fn malformed_accept_is_distinct_from_not_acceptable() {
        let map = headers(&[("accept", "application/json;q=nope")]);
        assert_eq!(
            marshaler_for(&map, MediaType::Json),
            Err(NegotiateError::Malformed("accept"))
        );

        let map = headers(&[("accept", "garbage")]);
        assert_eq!(
            marshaler_for(&map, MediaType::Json),
            Err(NegotiateError::Malformed("accept"))
        );
    }
}
