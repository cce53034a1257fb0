//! Extraction of capture timestamps from image EXIF headers

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::types::{PipelineError, PipelineResult};

/// Returns the earliest of the capture timestamp found in the file and the
/// previously known timestamp.
///
/// Files without usable EXIF data (or files that aren't images at all) are
/// ignored and the previous timestamp is returned as-is. The returned value
/// is an RFC 3339 string.
pub fn get_first_timestamp(file_path: &Path, timestamp: Option<&str>) -> Option<String> {
    let mut first_stamp = timestamp.and_then(parse_iso_timestamp);

    match file_timestamp(file_path) {
        Ok(Some(cur_stamp)) => {
            if first_stamp.map_or(true, |first| cur_stamp < first) {
                first_stamp = Some(cur_stamp);
            }
        }
        Ok(None) => {}
        Err(err) => {
            log::debug!(
                "Exception caught getting timestamp from file: '{}'",
                file_path.display()
            );
            log::debug!("    {}", err);
        }
    }

    match first_stamp {
        Some(stamp) => Some(stamp.to_rfc3339()),
        None => timestamp.map(str::to_string),
    }
}

/// Reads the EXIF origin timestamp from the file, adjusted for the UTC
/// offset when one is recorded
fn file_timestamp(file_path: &Path) -> PipelineResult<Option<DateTime<FixedOffset>>> {
    let file = File::open(file_path)?;
    let mut reader = BufReader::new(file);
    let exif = ::exif::Reader::new()
        .read_from_container(&mut reader)
        .map_err(|err| PipelineError::Metadata(err.to_string()))?;

    let Some(stamp) = ascii_field(&exif, ::exif::Tag::DateTimeOriginal) else {
        return Ok(None);
    };
    let offset = ascii_field(&exif, ::exif::Tag::OffsetTimeOriginal)
        .or_else(|| ascii_field(&exif, ::exif::Tag::OffsetTime));

    Ok(parse_exif_timestamp(&stamp, offset.as_deref()))
}

fn ascii_field(exif: &::exif::Exif, tag: ::exif::Tag) -> Option<String> {
    let field = exif.get_field(tag, ::exif::In::PRIMARY)?;
    match &field.value {
        ::exif::Value::Ascii(values) => values
            .first()
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(convert_and_clean_tag),
        _ => None,
    }
}

/// Cleans up an EXIF string value. Values that are empty, or consist only of
/// separators and sign characters (cameras write those for unknown offsets),
/// count as absent.
fn convert_and_clean_tag(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.replace([':', '+', '-'], "").trim().is_empty() {
        return None;
    }
    Some(value.to_string())
}

/// Parses an EXIF "YYYY:MM:DD HH:MM:SS" timestamp; a missing offset is
/// treated as UTC
fn parse_exif_timestamp(stamp: &str, offset: Option<&str>) -> Option<DateTime<FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    let offset = match offset {
        Some(offset) => parse_utc_offset(offset)?,
        None => FixedOffset::east_opt(0)?,
    };
    offset.from_local_datetime(&naive).single()
}

/// Parses a "+HH:MM" or "+HHMM" style UTC offset
fn parse_utc_offset(offset: &str) -> Option<FixedOffset> {
    let cleaned = offset.replace(':', "");
    if cleaned.len() != 5 {
        return None;
    }
    let sign = match &cleaned[..1] {
        "+" => 1,
        "-" => -1,
        _ => return None,
    };
    let hours: i32 = cleaned[1..3].parse().ok()?;
    let minutes: i32 = cleaned[3..5].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_iso_timestamp(stamp: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .or_else(|| parse_exif_timestamp(stamp, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_and_clean_tag() {
        assert_eq!(
            convert_and_clean_tag(" 2020:05:04 10:45:30 "),
            Some("2020:05:04 10:45:30".to_string())
        );
        assert_eq!(convert_and_clean_tag(""), None);
        assert_eq!(convert_and_clean_tag("   "), None);
        assert_eq!(convert_and_clean_tag(" : : : "), None);
        assert_eq!(convert_and_clean_tag("+-::"), None);
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+07:00"), FixedOffset::east_opt(7 * 3600));
        assert_eq!(parse_utc_offset("-0330"), FixedOffset::east_opt(-(3 * 3600 + 30 * 60)));
        assert_eq!(parse_utc_offset("0700"), None);
        assert_eq!(parse_utc_offset("+7"), None);
    }

    #[test]
    fn test_parse_exif_timestamp() {
        let stamp = parse_exif_timestamp("2020:05:04 10:45:30", None).unwrap();
        assert_eq!(stamp.to_rfc3339(), "2020-05-04T10:45:30+00:00");

        let stamp = parse_exif_timestamp("2020:05:04 10:45:30", Some("-07:00")).unwrap();
        assert_eq!(stamp.to_rfc3339(), "2020-05-04T10:45:30-07:00");
    }

    #[test]
    fn test_parse_iso_timestamp() {
        assert!(parse_iso_timestamp("2020-05-04T10:45:30+00:00").is_some());
        assert!(parse_iso_timestamp("2020-05-04T10:45:30").is_some());
        assert!(parse_iso_timestamp("not a timestamp").is_none());
    }

    #[test]
    fn test_get_first_timestamp_keeps_known_value() {
        // A file with no EXIF data can't improve on the known timestamp
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_an_image.txt");
        std::fs::write(&path, "plain text").unwrap();

        let stamp = get_first_timestamp(&path, Some("2020-05-04T10:45:30+00:00"));
        assert_eq!(stamp, Some("2020-05-04T10:45:30+00:00".to_string()));
    }

    #[test]
    fn test_get_first_timestamp_missing_file_and_timestamp() {
        assert_eq!(get_first_timestamp(Path::new("no_such_image.jpg"), None), None);
    }
}
