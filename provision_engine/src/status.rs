//! Parsing of the tunnel daemon's live status report.
//!
//! The report is semi-structured text the daemon rewrites periodically;
//! parsing is deliberately lenient. A corrupt row must never block
//! discovery of the remaining sessions, and a missing report file means
//! "no sessions", not an error, so the dashboard always renders.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Header line opening the client-list section.
const CLIENT_SECTION_HEADER: &str = "Common Name,";

/// Marker line opening the routing-table section; client rows stop here.
const ROUTING_TABLE_MARKER: &str = "ROUTING TABLE";

/// Timestamp format the daemon writes in client rows.
const CONNECTED_SINCE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One currently connected client, reconstructed from the status report.
///
/// Never persisted; it exists only for the lifetime of the tunnel
/// session and disappears from the next parse once the daemon drops it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    /// Certificate common name as the daemon reports it
    pub common_name: String,
    /// Source address of the client as observed by the daemon
    pub real_address: String,
    /// Cumulative bytes received from the client
    pub bytes_received: u64,
    /// Cumulative bytes sent to the client
    pub bytes_sent: u64,
    /// Session start time as written by the daemon
    pub connected_since: String,
    /// Session start time, when the raw field parses
    pub connected_at: Option<NaiveDateTime>,
}

/// Result of one parse of the status report.
///
/// `skipped_rows` counts client rows dropped for having too few fields,
/// so degradation is observable rather than silent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub sessions: Vec<SessionRecord>,
    pub skipped_rows: usize,
}

/// Parse a status report into per-client session records.
///
/// Single forward pass with two states: outside the client section
/// (initial and terminal) and inside it. The client-list header enters
/// the section, the routing-table marker leaves it and ends the scan.
/// Rows need at least five comma-separated fields; malformed byte
/// counters default to zero.
pub fn parse_status(text: &str) -> StatusReport {
    let mut report = StatusReport::default();
    let mut in_client_section = false;

    for line in text.lines() {
        if line.starts_with(CLIENT_SECTION_HEADER) {
            in_client_section = true;
            continue;
        }

        if line.starts_with(ROUTING_TABLE_MARKER) {
            break;
        }

        if !in_client_section || line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 5 {
            report.skipped_rows += 1;
            continue;
        }

        let connected_since = fields[4].trim().to_string();
        report.sessions.push(SessionRecord {
            common_name: fields[0].to_string(),
            real_address: fields[1].to_string(),
            bytes_received: fields[2].trim().parse().unwrap_or(0),
            bytes_sent: fields[3].trim().parse().unwrap_or(0),
            connected_at: NaiveDateTime::parse_from_str(
                &connected_since,
                CONNECTED_SINCE_FORMAT,
            )
            .ok(),
            connected_since,
        });
    }

    report
}

/// Read and parse the status report at `path`.
///
/// An absent or unreadable file yields an empty report; "no status
/// file" and "no active sessions" are treated identically.
pub async fn read_status(path: &Path) -> StatusReport {
    match fs::read_to_string(path).await {
        Ok(text) => parse_status(&text),
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                warn!(file = %path.display(), "failed to read status report: {err}");
            }
            StatusReport::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
OpenVPN CLIENT LIST
Updated,2024-01-01 10:05:00
Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since
client_1,203.0.113.5:52811,1024,2048,2024-01-01 10:00:00
client_2,198.51.100.9:40122,512,4096,2024-01-01 09:55:12
ROUTING TABLE
Virtual Address,Common Name,Real Address,Last Ref
10.8.0.2,client_1,203.0.113.5:52811,2024-01-01 10:04:58
GLOBAL STATS
Max bcast/mcast queue length,0
END
";

    #[test]
    fn parses_client_rows_between_markers() {
        let report = parse_status(SAMPLE);

        assert_eq!(report.sessions.len(), 2);
        assert_eq!(report.skipped_rows, 0);

        let first = &report.sessions[0];
        assert_eq!(first.common_name, "client_1");
        assert_eq!(first.real_address, "203.0.113.5:52811");
        assert_eq!(first.bytes_received, 1024);
        assert_eq!(first.bytes_sent, 2048);
        assert_eq!(first.connected_since, "2024-01-01 10:00:00");
        assert!(first.connected_at.is_some());
    }

    #[test]
    fn routing_rows_are_not_sessions() {
        let report = parse_status(SAMPLE);
        assert!(report
            .sessions
            .iter()
            .all(|s| !s.common_name.starts_with("10.8.0.")));
    }

    #[test]
    fn short_rows_are_counted_and_skipped() {
        let text = "\
Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since
alice,203.0.113.5,1024,2048,2024-01-01 10:00:00
bob,198.51.100.9,99
carol,192.0.2.77,10,20,2024-01-02 08:00:00
ROUTING TABLE
";
        let report = parse_status(text);
        assert_eq!(report.sessions.len(), 2);
        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.sessions[0].common_name, "alice");
        assert_eq!(report.sessions[1].common_name, "carol");
    }

    #[test]
    fn malformed_counters_default_to_zero() {
        let text = "\
Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since
alice,203.0.113.5,not-a-number,-7,2024-01-01 10:00:00
ROUTING TABLE
";
        let report = parse_status(text);
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.sessions[0].bytes_received, 0);
        assert_eq!(report.sessions[0].bytes_sent, 0);
    }

    #[test]
    fn unparsable_timestamp_is_kept_raw() {
        let text = "\
Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since
alice,203.0.113.5,1,2,sometime yesterday
ROUTING TABLE
";
        let report = parse_status(text);
        assert_eq!(report.sessions[0].connected_since, "sometime yesterday");
        assert!(report.sessions[0].connected_at.is_none());
    }

    #[test]
    fn empty_input_is_empty_report() {
        let report = parse_status("");
        assert!(report.sessions.is_empty());
        assert_eq!(report.skipped_rows, 0);
    }

    #[test]
    fn text_without_markers_is_empty_report() {
        let report = parse_status("nothing to see here\njust noise\n");
        assert!(report.sessions.is_empty());
        assert_eq!(report.skipped_rows, 0);
    }

    #[test]
    fn rows_with_extra_fields_are_accepted() {
        let text = "\
Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since
alice,203.0.113.5,1,2,2024-01-01 10:00:00,extra,fields
ROUTING TABLE
";
        let report = parse_status(text);
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.sessions[0].bytes_received, 1);
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = read_status(&dir.path().join("absent.log")).await;
        assert!(report.sessions.is_empty());
    }

    #[tokio::test]
    async fn file_contents_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.log");
        std::fs::write(&path, SAMPLE).unwrap();

        let report = read_status(&path).await;
        assert_eq!(report.sessions.len(), 2);
    }
}
