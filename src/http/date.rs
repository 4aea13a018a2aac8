//! HTTP-date formatting and parsing.
//!
//! Dates are emitted in RFC 1123 form (`Sun, 06 Nov 1994 08:49:37 GMT`).
//! Parsing also accepts the RFC 850 and ANSI C `asctime()` forms that
//! RFC 2616 §3.3.1 obligates clients to accept.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const RFC_1123: &[FormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] \
     [hour]:[minute]:[second] GMT"
);

const ASCTIME: &[FormatItem<'_>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:space] \
     [hour]:[minute]:[second] [year]"
);

// RFC 1123 with the weekday stripped, for reparsing normalized RFC 850
// input.
const DAY_MONTH_YEAR: &[FormatItem<'_>] = format_description!(
    "[day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Format a timestamp as an RFC 1123 HTTP-date.
pub fn format_http_date(date: OffsetDateTime) -> String {
    // The description contains no unformattable components.
    date.format(RFC_1123).unwrap_or_default()
}

/// Parse an HTTP-date in any of the three supported forms. All HTTP dates
/// are GMT.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    for format in [RFC_1123, ASCTIME] {
        if let Ok(parsed) = PrimitiveDateTime::parse(value, format) {
            return Some(parsed.assume_utc());
        }
    }
    parse_rfc850(value)
}

// RFC 850 (`Sunday, 06-Nov-94 08:49:37 GMT`) carries a full weekday and a
// two-digit year: 70-99 mean 19xx, the rest 20xx. Normalized here and
// reparsed so the month name and time share the RFC 1123 code path.
fn parse_rfc850(value: &str) -> Option<OffsetDateTime> {
    let rest = value.split_once(", ")?.1;
    let (date, time) = rest.split_once(' ')?;
    let mut parts = date.splitn(3, '-');
    let day = parts.next()?;
    let month = parts.next()?;
    let year: u16 = parts.next()?.parse().ok()?;
    if year > 99 {
        return None;
    }
    let year = if year >= 70 { 1900 + year } else { 2000 + year };
    let rebuilt = format!("{day} {month} {year} {time}");
    PrimitiveDateTime::parse(&rebuilt, DAY_MONTH_YEAR)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Milliseconds since the Unix epoch, the unit of cache age arithmetic.
pub fn unix_millis(date: OffsetDateTime) -> i64 {
    (date.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn now_millis() -> i64 {
    unix_millis(OffsetDateTime::now_utc())
}

pub fn from_unix_millis(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
