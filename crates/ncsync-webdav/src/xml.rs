use std::time::{Duration, UNIX_EPOCH};

use ncsync_core::Timestamp;
use percent_encoding::percent_decode_str;

use crate::error::WebDavError;

/// PROPFIND request body enumerating the properties spec.md §4.C requires.
pub const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:getetag/>
    <d:getcontenttype/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>
"#;

/// One `<response>` from a multistatus document, after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// Percent-decoded, forward-slash path as returned in `<href>`.
    pub href: String,
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<Timestamp>,
    pub etag: String,
}

/// Parses a `207 Multi-Status` body. Only `<response>` blocks whose
/// `<propstat><status>` contains `200 OK` are kept (spec.md §4.C).
pub fn parse_multistatus(xml: &str) -> Result<Vec<RemoteEntry>, WebDavError> {
    let doc = roxmltree::Document::parse(xml)?;

    let mut out = Vec::new();
    for response in doc
        .descendants()
        .filter(|n| n.is_element() && local_name(n.tag_name().name()) == "response")
    {
        let Some(href) = response
            .children()
            .find(|n| n.is_element() && local_name(n.tag_name().name()) == "href")
            .and_then(|n| n.text())
            .map(decode_href)
        else {
            continue;
        };

        let mut is_directory = false;
        let mut size = 0u64;
        let mut modified = None;
        let mut etag = String::new();

        for propstat in response
            .children()
            .filter(|n| n.is_element() && local_name(n.tag_name().name()) == "propstat")
        {
            let status = propstat
                .children()
                .find(|n| n.is_element() && local_name(n.tag_name().name()) == "status")
                .and_then(|n| n.text())
                .unwrap_or("");
            if !status.contains("200") {
                continue;
            }

            let Some(prop) = propstat
                .children()
                .find(|n| n.is_element() && local_name(n.tag_name().name()) == "prop")
            else {
                continue;
            };

            if let Some(resourcetype) = prop
                .children()
                .find(|n| n.is_element() && local_name(n.tag_name().name()) == "resourcetype")
            {
                is_directory = resourcetype
                    .children()
                    .any(|n| n.is_element() && local_name(n.tag_name().name()) == "collection");
            }

            if let Some(v) = text_of(prop, "getcontentlength") {
                size = v.parse().unwrap_or(0);
            }

            if let Some(v) = text_of(prop, "getlastmodified") {
                modified = parse_webdav_timestamp(&v);
            }

            if let Some(v) = text_of(prop, "getetag") {
                etag = v;
            }
        }

        let name = basename(&href);
        out.push(RemoteEntry {
            href,
            name,
            is_directory,
            size,
            modified,
            etag,
        });
    }

    Ok(out)
}

fn text_of<'a>(node: roxmltree::Node<'a, 'a>, name: &str) -> Option<String> {
    node.children()
        .find(|n| n.is_element() && local_name(n.tag_name().name()) == name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Multistatus responses may use any namespace prefix for `DAV:` (spec.md
/// §4.C: "tolerant of namespace prefixes"); `roxmltree` already strips the
/// prefix from `tag_name().name()`, so this is effectively an identity
/// projection kept for clarity at call sites.
fn local_name(name: &str) -> &str {
    name
}

fn decode_href(raw: &str) -> String {
    let raw = raw.trim();
    let path = if let Some(idx) = raw.find("://") {
        raw[idx + 3..].find('/').map(|i| &raw[idx + 3 + i..]).unwrap_or(raw)
    } else {
        raw
    };
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

fn basename(href: &str) -> String {
    let trimmed = href.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// Parses a WebDAV `getlastmodified` (or `Retry-After` HTTP-date) value
/// against RFC 1123, a day-without-leading-zero variant, and RFC 3339
/// (spec.md §4.C). `httpdate` only accepts strict IMF-fixdate, so the two
/// fallbacks go through `chrono`.
pub fn parse_webdav_timestamp(value: &str) -> Option<Timestamp> {
    if let Ok(t) = httpdate::parse_http_date(value)
        && let Ok(d) = t.duration_since(UNIX_EPOCH)
    {
        return Some(Timestamp::from_unix_millis(d.as_millis() as i64));
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(Timestamp::from_unix_millis(dt.timestamp_millis()));
    }

    // RFC 1123 with a single-digit day ("Mon, 2 Jan 2026 ..."), which
    // `httpdate` rejects because IMF-fixdate requires zero-padding. No
    // offset is present in the source text, so parse as naive and assume
    // UTC (the `GMT` literal the format always carries).
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT") {
        return Some(Timestamp::from_unix_millis(naive.and_utc().timestamp_millis()));
    }

    None
}

pub fn duration_since_now(target: std::time::SystemTime) -> Duration {
    target
        .duration_since(std::time::SystemTime::now())
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTISTATUS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/remote.php/dav/files/alice/Documents/</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype><D:collection/></D:resourcetype>
        <D:getlastmodified>Mon, 12 Jan 2026 10:00:00 GMT</D:getlastmodified>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/remote.php/dav/files/alice/Documents/a.txt</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype/>
        <D:getcontentlength>12</D:getcontentlength>
        <D:getetag>"abc123"</D:getetag>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/remote.php/dav/files/alice/Documents/stale.txt</D:href>
    <D:propstat>
      <D:prop><D:getcontentlength>999</D:getcontentlength></D:prop>
      <D:status>HTTP/1.1 404 Not Found</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

    #[test]
    fn parses_directory_and_file_entries() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_directory);
        assert!(entries[0].modified.is_some());
        assert_eq!(entries[1].name, "a.txt");
        assert_eq!(entries[1].size, 12);
        assert_eq!(entries[1].etag, "\"abc123\"");
    }

    #[test]
    fn skips_non_200_propstat() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert!(entries.iter().all(|e| e.name != "stale.txt" || e.size != 999));
    }

    #[test]
    fn parses_rfc1123_rfc3339_and_single_digit_day_variants() {
        assert!(parse_webdav_timestamp("Mon, 12 Jan 2026 10:00:00 GMT").is_some());
        assert!(parse_webdav_timestamp("Mon, 2 Jan 2026 10:00:00 GMT").is_some());
        assert!(parse_webdav_timestamp("2026-01-12T10:00:00Z").is_some());
        assert!(parse_webdav_timestamp("not a timestamp").is_none());
    }
}
