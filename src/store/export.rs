use super::session::SessionInfo;
use super::TagRecord;
use chrono::{DateTime, SecondsFormat, Utc};

pub const CSV_HEADER: &str = "code,matched,ts";

/// Render records as CSV: `code,matched,ts` with ISO-8601 UTC timestamps
pub fn records_to_csv(records: &[TagRecord]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + records.len() * 48);
    out.push_str(CSV_HEADER);
    out.push('\n');

    let rows: Vec<String> = records
        .iter()
        .map(|r| format!("{},{},{}", r.code, r.matched, iso_timestamp(r.recorded_at)))
        .collect();
    out.push_str(&rows.join("\n"));
    out
}

pub fn iso_timestamp(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `bagtag_<date>_<flight>.csv`
pub fn export_file_name(session: &SessionInfo) -> String {
    format!("bagtag_{}_{}.csv", session.date, session.flight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionId;

    fn record(code: &str, ts: i64, matched: bool) -> TagRecord {
        TagRecord {
            code: code.to_string(),
            recorded_at: ts,
            matched,
            matched_at: matched.then_some(ts + 1000),
            note: None,
        }
    }

    #[test]
    fn test_csv_layout() {
        let csv = records_to_csv(&[
            record("0123456784", 1_710_000_000_000, true),
            record("4006381333931", 1_710_000_000_500, false),
        ]);

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "code,matched,ts");
        assert_eq!(lines[1], "0123456784,true,2024-03-09T16:00:00.000Z");
        assert_eq!(lines[2], "4006381333931,false,2024-03-09T16:00:00.500Z");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_empty_export_is_header_only() {
        assert_eq!(records_to_csv(&[]), "code,matched,ts\n");
    }

    #[test]
    fn test_file_name() {
        let session = SessionInfo {
            id: SessionId::from_raw("20240309_BA117"),
            flight: "BA117".to_string(),
            date: "2024-03-09".to_string(),
            opened_at: 0,
        };
        assert_eq!(export_file_name(&session), "bagtag_2024-03-09_BA117.csv");
    }
}
