//! Date strings used on the FTN wire and in local message text.

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn local_from_unix(daten: u32) -> DateTime<Local> {
    Local
        .timestamp_opt(i64::from(daten), 0)
        .single()
        .unwrap_or_else(Local::now)
}

/// Format a local timestamp as an FTS-0001 date: `DD Mon YY  HH:MM:SS`.
pub fn format_fido_date(dt: &DateTime<Local>) -> String {
    format!(
        "{:02} {} {:02}  {:02}:{:02}:{:02}",
        dt.day(),
        MONTHS[dt.month0() as usize],
        dt.year().rem_euclid(100),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

/// Unix seconds to an FTS-0001 date string.
pub fn daten_to_fido(daten: u32) -> String {
    format_fido_date(&local_from_unix(daten))
}

/// Parse an FTN date string into a local timestamp.
///
/// Accepts the FTS-0001 form (`01 Jan 86  02:34:56`) and the SEAdog form
/// (`Mon  1 Jan 86 02:34`). Two-digit years below 80 are taken as 20xx.
pub fn parse_fido_date(text: &str) -> Option<DateTime<Local>> {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.first().map_or(false, |t| t.chars().all(|c| c.is_ascii_alphabetic())) {
        tokens.remove(0);
    }
    if tokens.len() < 4 {
        return None;
    }
    let day: u32 = tokens[0].parse().ok()?;
    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(tokens[1]))? as u32
        + 1;
    let year_raw: i32 = tokens[2].parse().ok()?;
    let year = match year_raw {
        0..=79 => 2000 + year_raw,
        80..=99 => 1900 + year_raw,
        _ => year_raw,
    };
    let mut hms = tokens[3].split(':').map(|p| p.parse::<u32>());
    let hour = hms.next()?.ok()?;
    let minute = hms.next()?.ok()?;
    let second = match hms.next() {
        Some(s) => s.ok()?,
        None => 0,
    };
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Local.from_local_datetime(&naive).earliest()
}

/// Parse an FTN date string into unix seconds, or `None` when it cannot be read.
pub fn fido_to_daten(text: &str) -> Option<u32> {
    parse_fido_date(text).and_then(|dt| u32::try_from(dt.timestamp()).ok())
}

/// Date line used in local message text, e.g. `Mon Jan 04 17:02:11 2016`.
pub fn daten_to_local_time(daten: u32) -> String {
    local_from_unix(daten).format("%a %b %d %H:%M:%S %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_fts1_dates() {
        let dt = Local.with_ymd_and_hms(2016, 1, 4, 7, 2, 9).unwrap();
        let s = format_fido_date(&dt);
        assert_eq!(s, "04 Jan 16  07:02:09");
        assert_eq!(s.len(), 19);
    }

    #[test]
    fn parses_both_date_styles() {
        let a = parse_fido_date("04 Jan 16  07:02:09").unwrap();
        assert_eq!((a.year(), a.month(), a.day()), (2016, 1, 4));
        assert_eq!((a.hour(), a.minute(), a.second()), (7, 2, 9));

        let b = parse_fido_date("Mon  4 Jan 16 07:02").unwrap();
        assert_eq!((b.year(), b.hour(), b.minute(), b.second()), (2016, 7, 2, 0));

        let c = parse_fido_date("31 Dec 89  23:59:59").unwrap();
        assert_eq!(c.year(), 1989);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_fido_date("").is_none());
        assert!(parse_fido_date("yesterday").is_none());
        assert!(parse_fido_date("40 Jan 16  07:02:09").is_none());
        assert!(parse_fido_date("04 Foo 16  07:02:09").is_none());
    }

    #[test]
    fn daten_round_trips_through_fido_format() {
        let daten = Local
            .with_ymd_and_hms(2019, 6, 15, 12, 30, 45)
            .unwrap()
            .timestamp() as u32;
        assert_eq!(fido_to_daten(&daten_to_fido(daten)), Some(daten));
    }
}
