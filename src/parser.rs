use regex::Regex;
use tracing::debug;

/// One telemetry fragment extracted from a single rsyslog line.
///
/// Managed devices split each telemetry report into numbered chunks before
/// handing them to the syslog relay, so a fragment carries both the identity
/// of the report it belongs to (`source_id`, `report_index`) and the position
/// of its payload within the reassembled body (`chunk_id` of `chunk_total`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Send time reported by the device, kept verbatim.
    pub timestamp: String,
    /// Device name taken from the line's app-name field.
    pub source_id: String,
    /// Which logical report this fragment belongs to, scoped to `source_id`.
    pub report_index: u64,
    /// Declared number of chunks for the report; the most recent observation wins.
    pub chunk_total: u64,
    /// Position of `payload` within the assembled byte sequence.
    pub chunk_id: u64,
    /// Verbatim substring of the final report body.
    pub payload: String,
}

/// Parses relay-formatted rsyslog lines into [`Fragment`]s.
///
/// The expected shape is
/// `<timestamp> <hostname> <appname>: #<tag>#:<index>-<total>-<chunk>: <message>`
/// where the message is the remainder of the line taken verbatim. Lines that
/// do not match are rejected without interrupting the caller.
pub struct LineParser {
    pattern: Regex,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        let pattern = Regex::new(
            r"(?x)
            ^
            (?P<timestamp>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d+[+-]\d{2}:\d{2})
            \s+
            (?P<hostname>[A-Za-z0-9.-]+)
            \s+
            (?P<appname>[A-Za-z0-9-]+):
            \s*
            \#[A-Za-z]+\#:
            (?P<index>\d+)-(?P<total>\d+)-(?P<chunk>\d+):
            [\x20\t]?
            (?P<message>.*)
            $",
        )
        .expect("fragment line pattern is a valid regex");
        Self { pattern }
    }

    /// Parse one line, returning `None` for anything that does not match the
    /// relay format. Rejections are logged at DEBUG; they are expected in
    /// shared syslog files and must never stop the pipeline.
    pub fn parse_line(&self, line: &str) -> Option<Fragment> {
        let Some(captures) = self.pattern.captures(line) else {
            debug!(line = %line_preview(line, 256), "line does not match fragment format; skipping");
            return None;
        };

        let report_index = parse_number(&captures, "index")?;
        let chunk_total = parse_number(&captures, "total")?;
        let chunk_id = parse_number(&captures, "chunk")?;

        Some(Fragment {
            timestamp: captures["timestamp"].to_string(),
            source_id: captures["appname"].to_string(),
            report_index,
            chunk_total,
            chunk_id,
            payload: captures["message"].to_string(),
        })
    }
}

fn parse_number(captures: &regex::Captures<'_>, field: &str) -> Option<u64> {
    match captures[field].parse() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!(field, value = &captures[field], "fragment field out of range; skipping line");
            None
        }
    }
}

/// Truncated rendering of a line for log output.
fn line_preview(line: &str, limit: usize) -> String {
    let mut preview = String::new();
    for (idx, ch) in line.chars().enumerate() {
        if idx >= limit {
            preview.push('…');
            break;
        }
        preview.push(ch);
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> LineParser {
        LineParser::new()
    }

    #[test]
    fn parses_all_fields_of_a_well_formed_line() {
        let line = "2024-03-01T09:15:22.481-06:00 rsyslog-host idrac-7XYZ: #Telemetry#:12-3-0: {\"Id\":\"PowerMetrics\"";
        let fragment = parser().parse_line(line).expect("line should parse");
        assert_eq!(fragment.timestamp, "2024-03-01T09:15:22.481-06:00");
        assert_eq!(fragment.source_id, "idrac-7XYZ");
        assert_eq!(fragment.report_index, 12);
        assert_eq!(fragment.chunk_total, 3);
        assert_eq!(fragment.chunk_id, 0);
        assert_eq!(fragment.payload, "{\"Id\":\"PowerMetrics\"");
    }

    #[test]
    fn message_is_taken_verbatim_including_colons_and_braces() {
        let line = "2024-03-01T09:15:22.481-06:00 host dev-1: #Tag#:1-1-0: \"Timestamp\":\"2024-03-01T09:15:22\",\"Values\":{}}";
        let fragment = parser().parse_line(line).expect("line should parse");
        assert_eq!(
            fragment.payload,
            "\"Timestamp\":\"2024-03-01T09:15:22\",\"Values\":{}}"
        );
    }

    #[test]
    fn accepts_positive_timezone_offsets() {
        let line = "2024-03-01T09:15:22.481+05:30 host dev-1: #Tag#:1-1-0: body";
        assert!(parser().parse_line(line).is_some());
    }

    #[test]
    fn rejects_lines_without_the_context_tag() {
        let line = "2024-03-01T09:15:22.481-06:00 host dev-1: plain syslog message";
        assert_eq!(parser().parse_line(line), None);
    }

    #[test]
    fn rejects_non_numeric_chunk_fields() {
        let line = "2024-03-01T09:15:22.481-06:00 host dev-1: #Tag#:one-2-3: body";
        assert_eq!(parser().parse_line(line), None);
    }

    #[test]
    fn rejects_numeric_fields_that_overflow() {
        let line = "2024-03-01T09:15:22.481-06:00 host dev-1: #Tag#:99999999999999999999999-1-0: body";
        assert_eq!(parser().parse_line(line), None);
    }

    #[test]
    fn rejects_timestamps_without_fractional_seconds() {
        let line = "2024-03-01T09:15:22-06:00 host dev-1: #Tag#:1-1-0: body";
        assert_eq!(parser().parse_line(line), None);
    }

    #[test]
    fn rejects_empty_and_garbage_lines() {
        assert_eq!(parser().parse_line(""), None);
        assert_eq!(parser().parse_line("not a syslog line at all"), None);
    }

    #[test]
    fn empty_message_yields_empty_payload() {
        let line = "2024-03-01T09:15:22.481-06:00 host dev-1: #Tag#:1-1-0: ";
        let fragment = parser().parse_line(line).expect("line should parse");
        assert_eq!(fragment.payload, "");
    }
}
