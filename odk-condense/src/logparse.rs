//! Instance log parser
//!
//! Turns the lines of an instance's `log.txt` into a lazy stream of [`Event`]s,
//! in file order. Each line is tab-separated:
//!
//! ```text
//! timestamp<TAB>code<TAB>xpath<TAB>value
//! ```
//!
//! `xpath` and `value` may be absent. An optional first line starting with `#`
//! carries the log version (`... v1.0`).
//!
//! ## Event tokens
//! - `EP` / `LP`: enter / leave a prompt
//! - `CC`: constraint contravened
//! - `SW`: swipe
//! - `oR` / `oP`: app resumed / paused
//! - `SF`: save form
//! - `rS`: relation self-destruct
//!
//! Anything else that looks like a token is kept as [`EventKind::Other`].
//! Answer changes are not logged directly; they are derived from the value
//! column and emitted right after the row that revealed them.
//!
//! Malformed lines are skipped with a warning. Only I/O failures (including
//! invalid UTF-8) end the stream with an error.

use crate::types::{CondenseError, Event, EventKind, Millis, Result};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Xpaths that mark the beginning or end of the questionnaire rather than a prompt
const BOOKEND_XPATHS: [&str; 4] = ["uC", "BF", "FF", "null"];

/// Codes that mark the beginning or end of the questionnaire
const BOOKEND_CODES: [&str; 2] = ["BF", "FF"];

/// Instance log parser
pub struct LogParser;

impl LogParser {
    /// Open a log file and return a stream over its events
    ///
    /// `instance` is only used to prefix diagnostics.
    pub fn parse(path: &Path, instance: &str) -> Result<EventStream<BufReader<File>>> {
        log::debug!("[{}] Parsing log file: {:?}", instance, path);

        let file = File::open(path).map_err(|e| {
            CondenseError::LogReadError(format!("Failed to open {:?}: {}", path, e))
        })?;

        Self::from_reader(BufReader::new(file), instance)
    }

    /// Build a stream over any buffered reader
    ///
    /// The first line is read eagerly to pick up the log version.
    pub fn from_reader<R: BufRead>(reader: R, instance: &str) -> Result<EventStream<R>> {
        let mut lines = reader.lines();
        let mut version = None;
        let mut held_line = None;
        let mut line_no = 0;

        if let Some(first) = lines.next() {
            let first = first.map_err(|e| {
                CondenseError::LogReadError(format!("Unreadable first line: {}", e))
            })?;
            if first.starts_with('#') {
                version = parse_version(&first);
                line_no = 1;
            } else {
                held_line = Some(first);
            }
        }

        if version.is_none() {
            log::warn!("[{}] No logging version in first line", instance);
        }

        Ok(EventStream {
            lines,
            held_line,
            line_no,
            instance: instance.to_string(),
            version,
            pending: VecDeque::new(),
            values: HashMap::new(),
            skipped_lines: 0,
        })
    }
}

/// Lazy iterator over the events of one log
pub struct EventStream<R> {
    lines: Lines<R>,
    held_line: Option<String>,
    line_no: usize,
    instance: String,
    version: Option<String>,
    pending: VecDeque<Event>,
    /// Last value seen per xpath, for deriving answer changes
    values: HashMap<String, String>,
    skipped_lines: usize,
}

impl<R: BufRead> EventStream<R> {
    /// Log version from the header line, e.g. `v1.0`
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Number of malformed lines skipped so far
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    fn next_line(&mut self) -> Option<std::io::Result<String>> {
        if let Some(line) = self.held_line.take() {
            return Some(Ok(line));
        }
        self.lines.next()
    }

    /// Parse one line into zero, one or two events (the row plus a derived answer change)
    fn process_line(&mut self, raw: &str) {
        let line = raw.trim_end_matches('\r');
        let line_no = self.line_no;

        let row = match LogRow::parse(line) {
            Ok(row) => row,
            Err(reason) => {
                log::warn!("[{}] {} at line {}", self.instance, reason, line_no);
                self.skipped_lines += 1;
                return;
            }
        };

        let prompt = if BOOKEND_CODES.contains(&row.code.as_str()) {
            None
        } else {
            prompt_from_xpath(&row.xpath)
        };

        let kind = match classify(&row.code, prompt.clone()) {
            Some(kind) => kind,
            None => {
                log::warn!(
                    "[{}] Event {} without a prompt at line {}",
                    self.instance,
                    row.code,
                    line_no
                );
                self.skipped_lines += 1;
                return;
            }
        };

        self.pending.push_back(Event {
            timestamp: row.timestamp,
            line: line_no,
            kind,
        });

        if let Some(prompt) = prompt {
            if self.value_changed(&row.xpath, &row.value) {
                self.pending.push_back(Event {
                    timestamp: row.timestamp,
                    line: line_no,
                    kind: EventKind::AnswerChange {
                        prompt,
                        value: row.value,
                    },
                });
            }
        }
    }

    /// Record the value for an xpath; true for a first non-empty value or a later difference
    fn value_changed(&mut self, xpath: &str, value: &str) -> bool {
        match self.values.get(xpath) {
            Some(previous) if previous == value => false,
            Some(_) => {
                self.values.insert(xpath.to_string(), value.to_string());
                true
            }
            None => {
                self.values.insert(xpath.to_string(), value.to_string());
                !value.is_empty()
            }
        }
    }
}

impl<R: BufRead> Iterator for EventStream<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }

            let line = match self.next_line()? {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(CondenseError::LogReadError(format!(
                        "Unreadable line {}: {}",
                        self.line_no + 1,
                        e
                    ))))
                }
            };
            self.line_no += 1;
            self.process_line(&line);
        }
    }
}

/// One syntactically valid log row
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogRow {
    timestamp: Millis,
    code: String,
    xpath: String,
    value: String,
}

impl LogRow {
    fn parse(line: &str) -> std::result::Result<Self, &'static str> {
        if line.trim().is_empty() {
            return Err("Empty line");
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 || fields.len() > 4 {
            return Err("Line with incorrect length");
        }

        let timestamp = fields[0];
        if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err("Incorrectly formatted timestamp");
        }
        let timestamp = timestamp
            .parse::<Millis>()
            .map_err(|_| "Timestamp out of range")?;

        let code = fields[1];
        if code.chars().count() != 2 || !code.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err("Incorrectly formatted event code");
        }

        Ok(Self {
            timestamp,
            code: code.to_string(),
            xpath: fields.get(2).copied().unwrap_or_default().to_string(),
            value: fields.get(3).copied().unwrap_or_default().to_string(),
        })
    }
}

/// Map an event token to its kind; `None` when a prompt is required but absent
fn classify(code: &str, prompt: Option<String>) -> Option<EventKind> {
    let kind = match code {
        "EP" => EventKind::EnterPrompt { prompt: prompt? },
        "LP" => EventKind::ExitPrompt { prompt: prompt? },
        "CC" => EventKind::ConstraintViolation { prompt: prompt? },
        "SW" => EventKind::Swipe { prompt },
        "oR" => EventKind::Resume,
        "oP" => EventKind::Pause,
        "SF" => EventKind::SaveForm,
        "rS" => EventKind::RelationSelfDestruct,
        other => EventKind::Other {
            code: other.to_string(),
            prompt,
        },
    };
    Some(kind)
}

/// Reduce an xpath to its prompt name
///
/// `/HHQ/hh_member[2]/age[1]` becomes `age`. Xpaths not ending in `[1]` are
/// kept whole. Empty and bookend xpaths have no prompt.
pub fn prompt_from_xpath(xpath: &str) -> Option<String> {
    if xpath.is_empty() || BOOKEND_XPATHS.contains(&xpath) {
        return None;
    }
    let name = xpath
        .strip_suffix("[1]")
        .map(|rest| rest.rsplit('/').next().unwrap_or(rest))
        .filter(|name| !name.is_empty() && !name.contains(&['[', ']'][..]));
    Some(name.unwrap_or(xpath).to_string())
}

/// Extract a trailing `vN.N` version stamp from a header line
pub fn parse_version(line: &str) -> Option<String> {
    let line = line.trim_end();
    let start = line.len().checked_sub(4)?;
    let tail = line.get(start..)?;
    let bytes = tail.as_bytes();
    let is_version = bytes[0] == b'v'
        && bytes[1].is_ascii_digit()
        && bytes[2] == b'.'
        && bytes[3].is_ascii_digit();
    is_version.then(|| tail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn events(log: &str) -> (Vec<Event>, Option<String>, usize) {
        let mut stream = LogParser::from_reader(Cursor::new(log.to_string()), "test").unwrap();
        let events: Vec<Event> = stream.by_ref().map(|e| e.unwrap()).collect();
        (events, stream.version().map(str::to_string), stream.skipped_lines())
    }

    #[test]
    fn test_parse_version_header() {
        let log = "# ODK Collect log v1.0\n\
                   1500000000000\tEP\t/HHQ/name[1]\t\n";
        let (events, version, skipped) = events(log);
        assert_eq!(version.as_deref(), Some("v1.0"));
        assert_eq!(skipped, 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line, 2);
        assert_eq!(
            events[0].kind,
            EventKind::EnterPrompt { prompt: "name".to_string() }
        );
    }

    #[test]
    fn test_missing_version_keeps_first_line() {
        let (events, version, _) = events("1500000000000\toR\tnull\t\n");
        assert!(version.is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line, 1);
        assert_eq!(events[0].kind, EventKind::Resume);
    }

    #[test]
    fn test_token_table() {
        let log = "# log v2.1\n\
                   1000\tEP\t/F/a[1]\t\n\
                   1001\tCC\t/F/a[1]\t\n\
                   1002\tSW\t\t\n\
                   1003\tLP\t/F/a[1]\t\n\
                   1004\toP\t/F/a[1]\t\n\
                   1005\tSF\tnull\t\n\
                   1006\trS\t/F/rel[1]\t\n\
                   1007\tBF\tBF\t\n\
                   1008\tXX\t/F/b[1]\t\n";
        let (events, _, skipped) = events(log);
        assert_eq!(skipped, 0);
        let kinds: Vec<EventKind> = events.into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::EnterPrompt { prompt: "a".to_string() },
                EventKind::ConstraintViolation { prompt: "a".to_string() },
                EventKind::Swipe { prompt: None },
                EventKind::ExitPrompt { prompt: "a".to_string() },
                EventKind::Pause,
                EventKind::SaveForm,
                EventKind::RelationSelfDestruct,
                EventKind::Other { code: "BF".to_string(), prompt: None },
                EventKind::Other { code: "XX".to_string(), prompt: Some("b".to_string()) },
            ]
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let log = "# v1.0\n\
                   \n\
                   notatime\tEP\t/F/a[1]\t\n\
                   1000\tEPX\t/F/a[1]\t\n\
                   1000\tEP\t/F/a[1]\t\textra\n\
                   1000\tEP\t\t\n\
                   1500\tCC\tnull\tx\n\
                   2000\tEP\t/F/b[1]\t\n";
        let (events, _, skipped) = events(log);
        assert_eq!(skipped, 6);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line, 8);
    }

    #[test]
    fn test_answer_changes_derived_from_values() {
        let log = "# v1.0\n\
                   1000\tEP\t/F/age[1]\t\n\
                   2000\tLP\t/F/age[1]\t23\n\
                   3000\tEP\t/F/age[1]\t23\n\
                   4000\tLP\t/F/age[1]\t32\n\
                   5000\tEP\t/F/sex[1]\tmale\n";
        let (events, _, _) = events(log);
        let changes: Vec<(usize, String, String)> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::AnswerChange { prompt, value } => {
                    Some((e.line, prompt.clone(), value.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                (3, "age".to_string(), "23".to_string()),
                (5, "age".to_string(), "32".to_string()),
                (6, "sex".to_string(), "male".to_string()),
            ]
        );
        // The derived event follows its row and shares its timestamp
        let idx = events.iter().position(|e| e.line == 3).unwrap();
        assert!(matches!(events[idx].kind, EventKind::ExitPrompt { .. }));
        assert_eq!(events[idx + 1].timestamp, events[idx].timestamp);
    }

    #[test]
    fn test_events_keep_file_order() {
        let log = "3000\tEP\t/F/a[1]\t\n1000\tEP\t/F/b[1]\t\n2000\tEP\t/F/c[1]\t\n";
        let (events, _, _) = events(log);
        let stamps: Vec<Millis> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![3000, 1000, 2000]);
    }

    #[test]
    fn test_crlf_lines() {
        let (events, version, skipped) = events("# v1.1\r\n1000\tEP\t/F/a[1]\t\r\n");
        assert_eq!(version.as_deref(), Some("v1.1"));
        assert_eq!(skipped, 0);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let mut bytes = b"# v1.0\n1000\tEP\t/F/a[1]\t\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        let stream = LogParser::from_reader(Cursor::new(bytes), "test").unwrap();
        let results: Vec<Result<Event>> = stream.collect();
        assert!(results[0].is_ok());
        assert!(matches!(results.last(), Some(Err(CondenseError::LogReadError(_)))));
    }

    #[test]
    fn test_empty_log() {
        let (events, version, skipped) = events("");
        assert!(events.is_empty());
        assert!(version.is_none());
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_prompt_from_xpath() {
        assert_eq!(prompt_from_xpath("/HHQ/hh_member[2]/age[1]").as_deref(), Some("age"));
        assert_eq!(prompt_from_xpath("name[1]").as_deref(), Some("name"));
        assert_eq!(prompt_from_xpath("/HHQ/group[2]").as_deref(), Some("/HHQ/group[2]"));
        assert_eq!(prompt_from_xpath("null"), None);
        assert_eq!(prompt_from_xpath(""), None);
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("# something v1.0").as_deref(), Some("v1.0"));
        assert_eq!(parse_version("# something v10"), None);
        assert_eq!(parse_version("#"), None);
    }

    #[test]
    fn test_missing_file() {
        let result = LogParser::parse(Path::new("does/not/exist/log.txt"), "test");
        assert!(matches!(result, Err(CondenseError::LogReadError(_))));
    }
}
