//! Cobertura XML decoder.
//!
//! Each `<class filename="...">` contributes its `<lines><line .../></lines>`
//! entries. Lines repeated under `<methods>` are skipped so they are not
//! counted twice. Several classes may share a filename (one per Python
//! module, or nested classes in JVM reports); their counts are summed. A
//! `<class>` nested inside another is counted on its own and the outer
//! class resumes when it closes.

use std::collections::BTreeSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::xml::{attributes, malformed_at, required_u64};
use crate::domain::errors::CoverResult;
use crate::domain::models::{
    checked_sum, CounterOverflow, CoverageFormat, CoverageSnapshot, FileCoverage,
};

const FORMAT: CoverageFormat = CoverageFormat::Cobertura;

#[derive(Default)]
struct ClassCounts {
    filename: String,
    covered_lines: u64,
    total_lines: u64,
    covered_branches: u64,
    total_branches: u64,
    missed: BTreeSet<u32>,
}

impl ClassCounts {
    fn start(reader: &Reader<&[u8]>, element: &BytesStart<'_>) -> CoverResult<Self> {
        let attrs = attributes(FORMAT, reader, element)?;
        let filename = attrs.get("filename").cloned().ok_or_else(|| {
            malformed_at(
                FORMAT,
                reader.buffer_position(),
                "<class> is missing the `filename` attribute",
            )
        })?;
        Ok(Self {
            filename,
            ..Self::default()
        })
    }

    fn line(&mut self, reader: &Reader<&[u8]>, element: &BytesStart<'_>) -> CoverResult<()> {
        let offset = reader.buffer_position();
        let attrs = attributes(FORMAT, reader, element)?;
        let number = required_u64(FORMAT, offset, &attrs, "line", "number")?;
        let hits = required_u64(FORMAT, offset, &attrs, "line", "hits")?;

        self.total_lines += 1;
        if hits > 0 {
            self.covered_lines += 1;
        } else {
            self.missed.insert(u32::try_from(number).unwrap_or(u32::MAX));
        }

        let is_branch = attrs
            .get("branch")
            .is_some_and(|b| b.eq_ignore_ascii_case("true"));
        if is_branch {
            if let Some(condition) = attrs.get("condition-coverage") {
                let (covered, total) = parse_condition_coverage(condition).ok_or_else(|| {
                    malformed_at(
                        FORMAT,
                        offset,
                        format!("unreadable condition-coverage {condition:?}"),
                    )
                })?;
                let filename = &self.filename;
                let overflow =
                    |e: CounterOverflow| malformed_at(FORMAT, offset, format!("{filename}: {e}"));
                self.covered_branches =
                    checked_sum(self.covered_branches, covered, "branch").map_err(overflow)?;
                self.total_branches =
                    checked_sum(self.total_branches, total, "branch").map_err(overflow)?;
            }
        }
        Ok(())
    }

    fn finish(self, offset: u64, snapshot: &mut CoverageSnapshot) -> CoverResult<()> {
        let coverage = FileCoverage::new(
            self.covered_lines,
            self.total_lines,
            self.covered_branches,
            self.total_branches,
        )
        .map_err(|violation| {
            malformed_at(FORMAT, offset, format!("{}: {violation}", self.filename))
        })?
        .with_missed_lines(self.missed);
        let filename = self.filename;
        snapshot
            .merge_file(filename.clone(), coverage)
            .map_err(|e| malformed_at(FORMAT, offset, format!("{filename}: {e}")))
    }
}

/// `"50% (1/2)"` -> `(1, 2)`.
fn parse_condition_coverage(raw: &str) -> Option<(u64, u64)> {
    let inner = raw.split_once('(')?.1.split_once(')')?.0;
    let (covered, total) = inner.split_once('/')?;
    Some((covered.trim().parse().ok()?, total.trim().parse().ok()?))
}

pub fn decode(bytes: &[u8]) -> CoverResult<CoverageSnapshot> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut snapshot = CoverageSnapshot::new();
    let mut saw_root = false;
    let mut classes: Vec<ClassCounts> = Vec::new();
    let mut methods_depth = 0usize;

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| malformed_at(FORMAT, reader.error_position(), e.to_string()))?;
        match event {
            Event::Start(ref e) => match e.name().as_ref() {
                b"coverage" => saw_root = true,
                b"class" => classes.push(ClassCounts::start(&reader, e)?),
                b"methods" => methods_depth += 1,
                b"line" if methods_depth == 0 => {
                    if let Some(counts) = classes.last_mut() {
                        counts.line(&reader, e)?;
                    }
                }
                _ => {}
            },
            Event::Empty(ref e) => match e.name().as_ref() {
                b"coverage" => saw_root = true,
                b"class" => {
                    ClassCounts::start(&reader, e)?
                        .finish(reader.buffer_position(), &mut snapshot)?;
                }
                b"line" if methods_depth == 0 => {
                    if let Some(counts) = classes.last_mut() {
                        counts.line(&reader, e)?;
                    }
                }
                _ => {}
            },
            Event::End(ref e) => match e.name().as_ref() {
                b"class" => {
                    if let Some(counts) = classes.pop() {
                        counts.finish(reader.buffer_position(), &mut snapshot)?;
                    }
                }
                b"methods" => methods_depth = methods_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(malformed_at(FORMAT, 0, "no <coverage> root element"));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::CoverError;

    const REPORT: &str = r#"<?xml version="1.0" ?>
<coverage version="7.4" line-rate="0.5">
  <packages>
    <package name="app">
      <classes>
        <class name="calc.py" filename="app/calc.py">
          <methods>
            <method name="add"><lines><line number="2" hits="1"/></lines></method>
          </methods>
          <lines>
            <line number="1" hits="1"/>
            <line number="2" hits="1"/>
            <line number="3" hits="0" branch="true" condition-coverage="50% (1/2)"/>
            <line number="4" hits="0"/>
          </lines>
        </class>
        <class name="calc.py$Inner" filename="app/calc.py">
          <lines><line number="9" hits="3"/></lines>
        </class>
      </classes>
    </package>
  </packages>
</coverage>
"#;

    #[test]
    fn sums_classes_and_skips_method_lines() {
        let snapshot = decode(REPORT.as_bytes()).unwrap();
        let calc = snapshot.get("app/calc.py").unwrap();
        assert_eq!(calc.total_lines(), 5);
        assert_eq!(calc.covered_lines(), 3);
        assert_eq!(calc.covered_branches(), 1);
        assert_eq!(calc.total_branches(), 2);
        assert_eq!(calc.missed_lines().iter().copied().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn empty_class_is_zero_of_zero() {
        let xml = r#"<coverage><packages><package><classes>
            <class filename="empty.py"/>
        </classes></package></packages></coverage>"#;
        let snapshot = decode(xml.as_bytes()).unwrap();
        assert_eq!(snapshot.get("empty.py").unwrap().total_lines(), 0);
    }

    #[test]
    fn condition_covered_above_total_is_rejected() {
        let xml = r#"<coverage><class filename="a.py"><lines>
            <line number="1" hits="1" branch="true" condition-coverage="150% (3/2)"/>
        </lines></class></coverage>"#;
        assert!(matches!(
            decode(xml.as_bytes()),
            Err(CoverError::MalformedReport { format: CoverageFormat::Cobertura, .. })
        ));
    }

    #[test]
    fn nested_class_does_not_drop_outer_counts() {
        let xml = r#"<coverage><classes>
            <class filename="Outer.java"><lines>
                <line number="1" hits="1"/>
                <class filename="Outer.java"><lines><line number="5" hits="0"/></lines></class>
                <line number="2" hits="1"/>
            </lines></class>
        </classes></coverage>"#;
        let snapshot = decode(xml.as_bytes()).unwrap();
        let outer = snapshot.get("Outer.java").unwrap();
        assert_eq!(outer.total_lines(), 3);
        assert_eq!(outer.covered_lines(), 2);
    }

    #[test]
    fn branch_counter_overflow_is_malformed() {
        let max = u64::MAX;
        let xml = format!(
            r#"<coverage><class filename="a.py"><lines>
            <line number="1" hits="1" branch="true" condition-coverage="100% ({max}/{max})"/>
            <line number="2" hits="1" branch="true" condition-coverage="100% (1/1)"/>
        </lines></class></coverage>"#
        );
        let err = decode(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, CoverError::MalformedReport { .. }));
        assert!(err.to_string().contains("branch counter overflow"));
    }

    #[test]
    fn truncated_document_names_a_position() {
        let err = decode(b"<coverage><class filename=\"a.py\"><lines><line number=").unwrap_err();
        assert!(err.to_string().starts_with("malformed cobertura report at byte"));
    }

    #[test]
    fn missing_hits_is_malformed() {
        let xml = r#"<coverage><class filename="a.py"><lines><line number="1"/></lines></class></coverage>"#;
        let err = decode(xml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("`hits`"));
    }

    #[test]
    fn non_cobertura_document_is_rejected() {
        assert!(decode(b"<report name=\"jacoco\"/>").is_err());
    }
}
