//! CSV upload parsing.
//!
//! Two shapes are accepted. A file whose first cell is an absolute URL has no
//! header and lists one URL per line. Anything else must start with a header
//! naming either a `url` column (direct mode) or timestamp columns.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, Trim};
use url::Url;

use super::ResolveError;
use crate::jobs::{FailureReason, InputMode, Rejection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Url {
        line: usize,
        url: String,
        name: Option<String>,
    },
    Timestamp {
        line: usize,
        raw: String,
        at: DateTime<Utc>,
        orbit: Option<u32>,
    },
    Rejected(Rejection),
}

impl Row {
    fn rejected(line: usize, source: &str, message: impl std::fmt::Display) -> Self {
        Row::Rejected(Rejection {
            line,
            source: source.to_string(),
            reason: FailureReason::InvalidRow(format!("line {line}: {message}")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInput {
    pub mode: InputMode,
    /// One entry per data row, in file order.
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampColumns {
    Combined(usize),
    Split { date: usize, time: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Bare,
    Direct {
        url: usize,
        name: Option<usize>,
    },
    Timestamp {
        columns: TimestampColumns,
        orbit: Option<usize>,
    },
}

impl Layout {
    fn from_header(fields: &[String]) -> Result<Self, ResolveError> {
        let names: Vec<String> = fields.iter().map(|f| f.to_ascii_lowercase()).collect();
        let find = |wanted: &str| names.iter().position(|name| name == wanted);

        if let Some(url) = find("url") {
            return Ok(Layout::Direct {
                url,
                name: find("name"),
            });
        }

        let orbit = find("absolute_orbit");
        if let Some(column) = find("datetime") {
            return Ok(Layout::Timestamp {
                columns: TimestampColumns::Combined(column),
                orbit,
            });
        }
        if let Some(date) = find("yyyy-mm-dd") {
            return Ok(Layout::Timestamp {
                columns: TimestampColumns::Split {
                    date,
                    time: find("hh:mm:ss.sss"),
                },
                orbit,
            });
        }

        Err(ResolveError::MalformedInput(format!(
            "header must name a `url` or `datetime` column, found: {}",
            names.join(", ")
        )))
    }

    fn mode(self) -> InputMode {
        match self {
            Layout::Bare | Layout::Direct { .. } => InputMode::Direct,
            Layout::Timestamp { .. } => InputMode::Timestamp,
        }
    }

    fn row(self, record: Record) -> Row {
        let Record { line, fields } = record;
        let fields = match fields {
            Ok(fields) => fields,
            Err(message) => return Row::rejected(line, "", message),
        };
        if is_blank(&fields) {
            return Row::rejected(line, "", "blank row");
        }
        let cell = |index: usize| fields.get(index).map(String::as_str).unwrap_or("");

        match self {
            Layout::Bare => url_row(line, cell(0), None),
            Layout::Direct { url, name } => {
                let name = name.map(cell).filter(|n| !n.is_empty());
                url_row(line, cell(url), name)
            }
            Layout::Timestamp { columns, orbit } => {
                let text = match columns {
                    TimestampColumns::Combined(column) => cell(column).to_string(),
                    TimestampColumns::Split { date, time } => {
                        match time.map(cell).filter(|t| !t.is_empty()) {
                            Some(time) => format!("{}T{}", cell(date), time),
                            None => cell(date).to_string(),
                        }
                    }
                };
                match parse_timestamp(&text) {
                    Some(at) => Row::Timestamp {
                        line,
                        raw: text,
                        at,
                        orbit: orbit.and_then(|column| parse_orbit(cell(column))),
                    },
                    None if text.is_empty() => Row::rejected(line, "", "missing timestamp"),
                    None => Row::rejected(line, &text, "unrecognised timestamp"),
                }
            }
        }
    }
}

fn url_row(line: usize, url: &str, name: Option<&str>) -> Row {
    if url.is_empty() {
        Row::rejected(line, url, "missing URL")
    } else if is_absolute_url(url) {
        Row::Url {
            line,
            url: url.to_string(),
            name: name.map(str::to_owned),
        }
    } else {
        Row::rejected(line, url, "not an absolute http(s) URL")
    }
}

/// One record as read by the CSV reader; a quoted cell may span lines.
struct Record {
    /// Line on which the record starts.
    line: usize,
    fields: Result<Vec<String>, String>,
}

impl Record {
    fn is_blank(&self) -> bool {
        self.fields.as_ref().is_ok_and(|fields| is_blank(fields))
    }
}

fn is_blank(fields: &[String]) -> bool {
    fields.iter().all(String::is_empty)
}

/// Parses an upload. Blank records before the header and at the end of the
/// file are ignored; blank records between rows are rejected. Empty lines
/// are skipped by the reader itself.
pub fn parse(input: &[u8]) -> Result<ParsedInput, ResolveError> {
    let text = std::str::from_utf8(input)
        .map_err(|e| ResolveError::MalformedInput(format!("CSV is not valid UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut records: Vec<Record> = Vec::new();
    for result in reader.records() {
        let fallback = records.last().map_or(1, |record| record.line + 1);
        records.push(match result {
            Ok(record) => Record {
                line: record.position().map_or(fallback, |p| p.line() as usize),
                fields: Ok(record.iter().map(str::to_owned).collect()),
            },
            Err(err) => Record {
                line: err.position().map_or(fallback, |p| p.line() as usize),
                fields: Err(err.to_string()),
            },
        });
    }
    while records.last().is_some_and(Record::is_blank) {
        records.pop();
    }
    let start = records
        .iter()
        .position(|record| !record.is_blank())
        .unwrap_or(records.len());
    let mut records = records.split_off(start).into_iter();

    let Some(first) = records.next() else {
        return Err(ResolveError::MalformedInput("CSV is empty".to_string()));
    };
    let header = first
        .fields
        .as_ref()
        .map_err(|e| ResolveError::MalformedInput(format!("line {}: {e}", first.line)))?;

    let layout = if header.first().is_some_and(|cell| is_absolute_url(cell)) {
        Layout::Bare
    } else {
        Layout::from_header(header)?
    };

    let mut rows = Vec::with_capacity(records.len() + 1);
    if layout == Layout::Bare {
        rows.push(layout.row(first));
    }
    rows.extend(records.map(|record| layout.row(record)));

    Ok(ParsedInput {
        mode: layout.mode(),
        rows,
    })
}

pub fn is_absolute_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// Accepts RFC 3339 and the common naive layouts; naive values are UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];

    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn parse_orbit(cell: &str) -> Option<u32> {
    cell.parse::<u32>()
        .ok()
        .or_else(|| cell.strip_suffix(".0").and_then(|whole| whole.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rejections(parsed: &ParsedInput) -> Vec<&Rejection> {
        parsed
            .rows
            .iter()
            .filter_map(|row| match row {
                Row::Rejected(rejection) => Some(rejection),
                _ => None,
            })
            .collect()
    }

    fn urls(parsed: &ParsedInput) -> Vec<&str> {
        parsed
            .rows
            .iter()
            .filter_map(|row| match row {
                Row::Url { url, .. } => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_headerless_url_list() {
        let parsed = parse(b"https://x/a.pdf\nhttps://x/b.pdf\n").unwrap();

        assert_eq!(parsed.mode, InputMode::Direct);
        assert_eq!(urls(&parsed), vec!["https://x/a.pdf", "https://x/b.pdf"]);
    }

    #[test]
    fn test_header_with_url_and_name() {
        let parsed = parse(b"name,url\nreport,https://x/a.pdf\n,https://x/b.pdf\n").unwrap();

        assert_eq!(
            parsed.rows[0],
            Row::Url {
                line: 2,
                url: "https://x/a.pdf".into(),
                name: Some("report".into()),
            }
        );
        assert_eq!(
            parsed.rows[1],
            Row::Url {
                line: 3,
                url: "https://x/b.pdf".into(),
                name: None,
            }
        );
    }

    #[test]
    fn test_header_only_has_no_rows() {
        let parsed = parse(b"name,url\n").unwrap();

        assert_eq!(parsed.mode, InputMode::Direct);
        assert!(parsed.rows.is_empty());
    }

    #[test]
    fn test_every_data_row_is_accounted_for() {
        let input = b"URL\nhttps://x/a.pdf\n  \nftp://x/b\nnot a url\n\n https://x/c.pdf \n\n  \n";
        let parsed = parse(input).unwrap();

        assert_eq!(parsed.rows.len(), 5);
        assert_eq!(urls(&parsed), vec!["https://x/a.pdf", "https://x/c.pdf"]);
        let rejected = rejections(&parsed);
        assert_eq!(rejected.len(), 3);
        assert_eq!(rejected[0].line, 3);
        assert_eq!(rejected[0].source, "");
        assert_eq!(rejected[1].source, "ftp://x/b");
        assert!(matches!(rejected[2].reason, FailureReason::InvalidRow(_)));
    }

    #[test]
    fn test_quoted_cell_may_span_lines() {
        let parsed = parse(b"name,url\n\"Annual\nreport\",https://x/a.pdf\nplain,https://x/b.pdf\n").unwrap();

        assert_eq!(parsed.rows.len(), 2);
        assert!(rejections(&parsed).is_empty());
        assert_eq!(
            parsed.rows[0],
            Row::Url {
                line: 2,
                url: "https://x/a.pdf".into(),
                name: Some("Annual\nreport".into()),
            }
        );
        assert!(matches!(&parsed.rows[1], Row::Url { name: Some(name), .. } if name == "plain"));
    }

    #[test]
    fn test_bom_and_crlf_are_handled() {
        let parsed = parse("\u{feff}url\r\nhttps://x/a.pdf\r\n".as_bytes()).unwrap();

        assert_eq!(urls(&parsed), vec!["https://x/a.pdf"]);
    }

    #[test]
    fn test_empty_and_blank_input_is_malformed() {
        assert!(matches!(parse(b""), Err(ResolveError::MalformedInput(_))));
        assert!(matches!(parse(b"\n  \n"), Err(ResolveError::MalformedInput(_))));
    }

    #[test]
    fn test_non_utf8_is_malformed() {
        assert!(matches!(parse(&[0xff, 0xfe, 0x00]), Err(ResolveError::MalformedInput(_))));
    }

    #[test]
    fn test_unknown_header_is_malformed() {
        let err = parse(b"foo,bar\n1,2\n").unwrap_err();
        assert!(err.to_string().contains("foo, bar"));
    }

    #[test]
    fn test_datetime_column() {
        let parsed = parse(b"datetime\n2024-08-10T12:30:00Z\n2024-08-10 12:30\nyesterday\n").unwrap();

        assert_eq!(parsed.mode, InputMode::Timestamp);
        let expected = Utc.with_ymd_and_hms(2024, 8, 10, 12, 30, 0).unwrap();
        assert!(matches!(&parsed.rows[0], Row::Timestamp { at, .. } if *at == expected));
        assert!(matches!(&parsed.rows[1], Row::Timestamp { at, .. } if *at == expected));
        assert!(matches!(&parsed.rows[2], Row::Rejected(r) if r.source == "yesterday"));
    }

    #[test]
    fn test_split_date_time_columns_with_orbit() {
        let parsed = parse(b"yyyy-mm-dd,hh:mm:ss.sss,Absolute_Orbit\n2024-08-10,12:30:00.500,1234\n").unwrap();

        assert_eq!(parsed.mode, InputMode::Timestamp);
        match &parsed.rows[0] {
            Row::Timestamp { at, orbit, raw, .. } => {
                assert_eq!(raw, "2024-08-10T12:30:00.500");
                assert_eq!(at.timestamp_subsec_millis(), 500);
                assert_eq!(*orbit, Some(1234));
            }
            other => panic!("unexpected row: {other:?}"),
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let noon = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T12:00:00+00:00"), Some(noon));
        assert_eq!(parse_timestamp("2024-01-02T14:00:00+02:00"), Some(noon));
        assert_eq!(parse_timestamp("2024-01-02T12:00:00"), Some(noon));
        assert_eq!(parse_timestamp("2024-01-02 12:00:00.000"), Some(noon));
        assert_eq!(
            parse_timestamp("2024-01-02"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("02/01/2024"), None);
    }

    #[test]
    fn test_orbit_accepts_float_notation() {
        assert_eq!(parse_orbit("42"), Some(42));
        assert_eq!(parse_orbit("42.0"), Some(42));
        assert_eq!(parse_orbit(""), None);
        assert_eq!(parse_orbit("x"), None);
    }

    #[test]
    fn test_is_absolute_url() {
        assert!(is_absolute_url("https://x/a.pdf"));
        assert!(is_absolute_url("http://127.0.0.1:8080/a"));
        assert!(!is_absolute_url("ftp://x/a"));
        assert!(!is_absolute_url("/relative/path"));
        assert!(!is_absolute_url("url"));
    }
}
