//! JaCoCo XML decoder.
//!
//! Only the `<counter>` elements directly inside `<sourcefile>` are read;
//! class, method, package and report counters repeat the same totals at other
//! granularities. Entries are keyed `package/path/File.java`.

use std::collections::BTreeSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::xml::{attributes, malformed_at, optional_u64, required_u64};
use crate::domain::errors::CoverResult;
use crate::domain::models::{
    checked_sum, CounterOverflow, CoverageFormat, CoverageSnapshot, FileCoverage,
};

const FORMAT: CoverageFormat = CoverageFormat::Jacoco;

struct SourceFileCounts {
    key: String,
    line: Option<(u64, u64)>,
    branch: Option<(u64, u64)>,
    missed: BTreeSet<u32>,
}

impl SourceFileCounts {
    fn counter(&mut self, reader: &Reader<&[u8]>, element: &BytesStart<'_>) -> CoverResult<()> {
        let offset = reader.buffer_position();
        let attrs = attributes(FORMAT, reader, element)?;
        let missed = required_u64(FORMAT, offset, &attrs, "counter", "missed")?;
        let covered = required_u64(FORMAT, offset, &attrs, "counter", "covered")?;
        let (slot, name) = match attrs.get("type").map(String::as_str) {
            Some("LINE") => (&mut self.line, "line"),
            Some("BRANCH") => (&mut self.branch, "branch"),
            _ => return Ok(()),
        };
        let overflow = |e: CounterOverflow| malformed_at(FORMAT, offset, e.to_string());
        let (prev_covered, prev_total) = slot.unwrap_or((0, 0));
        let total = checked_sum(covered, missed, name)
            .and_then(|total| checked_sum(prev_total, total, name))
            .map_err(overflow)?;
        let covered = checked_sum(prev_covered, covered, name).map_err(overflow)?;
        *slot = Some((covered, total));
        Ok(())
    }

    fn line(&mut self, reader: &Reader<&[u8]>, element: &BytesStart<'_>) -> CoverResult<()> {
        let offset = reader.buffer_position();
        let attrs = attributes(FORMAT, reader, element)?;
        let nr = required_u64(FORMAT, offset, &attrs, "line", "nr")?;
        let missed_instructions = optional_u64(FORMAT, offset, &attrs, "line", "mi")?;
        let covered_instructions = optional_u64(FORMAT, offset, &attrs, "line", "ci")?;
        if covered_instructions == 0 && missed_instructions > 0 {
            self.missed.insert(u32::try_from(nr).unwrap_or(u32::MAX));
        }
        Ok(())
    }

    fn finish(self, offset: u64, snapshot: &mut CoverageSnapshot) -> CoverResult<()> {
        let (covered_lines, total_lines) = self.line.unwrap_or((0, 0));
        let (covered_branches, total_branches) = self.branch.unwrap_or((0, 0));
        let coverage = FileCoverage::new(covered_lines, total_lines, covered_branches, total_branches)
            .map_err(|violation| malformed_at(FORMAT, offset, format!("{}: {violation}", self.key)))?
            .with_missed_lines(self.missed);
        let key = self.key;
        snapshot
            .merge_file(key.clone(), coverage)
            .map_err(|e| malformed_at(FORMAT, offset, format!("{key}: {e}")))
    }
}

fn source_key(package: &str, file: &str) -> String {
    let package = package.trim_matches('/');
    if package.is_empty() {
        file.to_string()
    } else {
        format!("{}/{file}", package.replace('.', "/"))
    }
}

pub fn decode(bytes: &[u8]) -> CoverResult<CoverageSnapshot> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut snapshot = CoverageSnapshot::new();
    let mut saw_root = false;
    let mut package = String::new();
    let mut source: Option<SourceFileCounts> = None;

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| malformed_at(FORMAT, reader.error_position(), e.to_string()))?;
        let (element, self_closing) = match event {
            Event::Start(ref e) => (e, false),
            Event::Empty(ref e) => (e, true),
            Event::End(ref e) => {
                match e.name().as_ref() {
                    b"sourcefile" => {
                        if let Some(counts) = source.take() {
                            counts.finish(reader.buffer_position(), &mut snapshot)?;
                        }
                    }
                    b"package" => package.clear(),
                    _ => {}
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        match element.name().as_ref() {
            b"report" => saw_root = true,
            b"package" if !self_closing => {
                let attrs = attributes(FORMAT, &reader, element)?;
                package = attrs.get("name").cloned().unwrap_or_default();
            }
            b"sourcefile" => {
                let attrs = attributes(FORMAT, &reader, element)?;
                let name = attrs.get("name").ok_or_else(|| {
                    malformed_at(
                        FORMAT,
                        reader.buffer_position(),
                        "<sourcefile> is missing the `name` attribute",
                    )
                })?;
                let counts = SourceFileCounts {
                    key: source_key(&package, name),
                    line: None,
                    branch: None,
                    missed: BTreeSet::new(),
                };
                if self_closing {
                    counts.finish(reader.buffer_position(), &mut snapshot)?;
                } else {
                    source = Some(counts);
                }
            }
            b"counter" => {
                if let Some(counts) = source.as_mut() {
                    counts.counter(&reader, element)?;
                }
            }
            b"line" => {
                if let Some(counts) = source.as_mut() {
                    counts.line(&reader, element)?;
                }
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(malformed_at(FORMAT, 0, "no <report> root element"));
    }
    Ok(snapshot)
}
