//! Submission document reader
//!
//! Reads an instance's `submission.xml` with `quick-xml`: the form identity from
//! the root element's `id` / `version` attributes, and the text of requested
//! tags. Tags are matched by local name, so `<h:province>` answers a request
//! for `province`.

use crate::types::{CondenseError, Result};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::path::Path;

/// Form identity declared by the submission's root element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionHeader {
    /// Root element local name (e.g. `data`)
    pub root: String,
    /// `id` attribute, the form id
    pub form_id: Option<String>,
    /// `version` attribute
    pub version: Option<String>,
}

/// A well-formed submission document
#[derive(Debug, Clone)]
pub struct SubmissionDocument {
    text: String,
    header: SubmissionHeader,
}

impl SubmissionDocument {
    /// Read and parse a submission file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CondenseError::XmlParseError(format!("Failed to read {:?}: {}", path, e))
        })?;
        Self::parse(text)
    }

    /// Parse submission text
    ///
    /// The whole document is checked for well-formedness here, so later
    /// extraction never sees a broken document.
    pub fn parse(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let header = read_header(&text)?;
        Ok(Self { text, header })
    }

    pub fn header(&self) -> &SubmissionHeader {
        &self.header
    }

    /// Form id from the root element, if declared
    pub fn form_id(&self) -> Option<&str> {
        self.header.form_id.as_deref()
    }

    /// Extract the requested tags
    ///
    /// Every requested tag gets an entry; tags absent from the document map
    /// to `missing_marker`.
    pub fn extract(&self, tags: &[String], missing_marker: &str) -> Result<BTreeMap<String, String>> {
        let found = extract_first(&self.text, tags)?;
        Ok(tags
            .iter()
            .map(|tag| {
                let value = found
                    .get(local_part(tag))
                    .cloned()
                    .unwrap_or_else(|| missing_marker.to_string());
                (tag.clone(), value)
            })
            .collect())
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn xml_error(reader: &Reader<&[u8]>, e: impl std::fmt::Display) -> CondenseError {
    CondenseError::XmlParseError(format!("{} at byte {}", e, reader.buffer_position()))
}

/// Walk the whole document, returning the root element's identity
fn read_header(xml: &str) -> Result<SubmissionHeader> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut header: Option<SubmissionHeader> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                if header.is_none() {
                    header = Some(header_from(&e)?);
                }
                depth += 1;
            }
            Ok(XmlEvent::Empty(e)) => {
                if header.is_none() {
                    header = Some(header_from(&e)?);
                }
            }
            Ok(XmlEvent::End(_)) => depth = depth.saturating_sub(1),
            Ok(XmlEvent::Text(t)) => {
                t.unescape().map_err(|e| xml_error(&reader, e))?;
            }
            Ok(XmlEvent::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_error(&reader, e)),
        }
    }

    if depth != 0 {
        return Err(CondenseError::XmlParseError(format!(
            "{} unclosed element(s) at end of document",
            depth
        )));
    }

    header.ok_or_else(|| CondenseError::XmlParseError("No root element".to_string()))
}

fn header_from(root: &BytesStart<'_>) -> Result<SubmissionHeader> {
    let mut header = SubmissionHeader {
        root: local_name(root),
        ..Default::default()
    };
    for attr in root.attributes().flatten() {
        let value = attr
            .unescape_value()
            .map_err(|e| CondenseError::XmlParseError(format!("Bad root attribute: {}", e)))?
            .into_owned();
        match attr.key.local_name().as_ref() {
            b"id" => header.form_id = Some(value),
            b"version" => header.version = Some(value),
            _ => {}
        }
    }
    Ok(header)
}

/// An element whose text is being collected
struct Capture {
    name: String,
    depth: usize,
    text: String,
}

/// Text of the first element matching each requested tag, keyed by local name
fn extract_first(xml: &str, tags: &[String]) -> Result<BTreeMap<String, String>> {
    let wanted: Vec<&str> = tags.iter().map(|t| local_part(t)).collect();
    let mut found: BTreeMap<String, String> = BTreeMap::new();
    if wanted.is_empty() {
        return Ok(found);
    }

    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut active: Vec<Capture> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                for capture in active.iter_mut() {
                    capture.depth += 1;
                }
                let name = local_name(&e);
                let fresh = wanted.contains(&name.as_str())
                    && !found.contains_key(&name)
                    && !active.iter().any(|c| c.name == name);
                if fresh {
                    active.push(Capture {
                        name,
                        depth: 1,
                        text: String::new(),
                    });
                }
            }
            Ok(XmlEvent::Empty(e)) => {
                let name = local_name(&e);
                let fresh = wanted.contains(&name.as_str())
                    && !found.contains_key(&name)
                    && !active.iter().any(|c| c.name == name);
                if fresh {
                    found.insert(name, String::new());
                }
            }
            Ok(XmlEvent::Text(t)) => {
                if !active.is_empty() {
                    let text = t.unescape().map_err(|e| xml_error(&reader, e))?;
                    for capture in active.iter_mut() {
                        capture.text.push_str(&text);
                    }
                }
            }
            Ok(XmlEvent::CData(c)) => {
                let raw = c.into_inner();
                let text = String::from_utf8_lossy(&raw);
                for capture in active.iter_mut() {
                    capture.text.push_str(&text);
                }
            }
            Ok(XmlEvent::End(_)) => {
                for capture in active.iter_mut() {
                    capture.depth -= 1;
                }
                let (done, open): (Vec<Capture>, Vec<Capture>) =
                    active.drain(..).partition(|c| c.depth == 0);
                active = open;
                for capture in done {
                    found.insert(capture.name, capture.text.trim().to_string());
                }
            }
            Ok(XmlEvent::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(xml_error(&reader, e)),
        }
    }

    Ok(found)
}
