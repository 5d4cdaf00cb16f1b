//! Property tests for the coverage decoders.

use std::collections::BTreeMap;
use std::path::Path;

use proptest::prelude::*;

use covergen::adapters::coverage::CoverageParser;
use covergen::domain::models::{CoverageFormat, CoverageScope};

/// Per-file line hit counts, keyed by line number.
fn files() -> impl Strategy<Value = BTreeMap<String, BTreeMap<u32, u64>>> {
    prop::collection::btree_map(
        "[a-z]{1,8}/[a-z]{1,8}\\.py",
        prop::collection::btree_map(1u32..500, 0u64..5, 0..40),
        1..5,
    )
}

fn lcov(files: &BTreeMap<String, BTreeMap<u32, u64>>) -> String {
    let mut out = String::from("TN:\n");
    for (path, lines) in files {
        out.push_str(&format!("SF:{path}\n"));
        for (line, hits) in lines {
            out.push_str(&format!("DA:{line},{hits}\n"));
        }
        out.push_str("end_of_record\n");
    }
    out
}

fn cobertura(files: &BTreeMap<String, BTreeMap<u32, u64>>) -> String {
    let mut out = String::from("<?xml version=\"1.0\" ?>\n<coverage><packages><package><classes>\n");
    for (path, lines) in files {
        out.push_str(&format!("<class filename=\"{path}\"><lines>\n"));
        for (line, hits) in lines {
            out.push_str(&format!("<line number=\"{line}\" hits=\"{hits}\"/>\n"));
        }
        out.push_str("</lines></class>\n");
    }
    out.push_str("</classes></package></packages></coverage>\n");
    out
}

fn expected(lines: &BTreeMap<u32, u64>) -> (u64, u64) {
    let covered = lines.values().filter(|hits| **hits > 0).count() as u64;
    (covered, lines.len() as u64)
}

proptest! {
    #[test]
    fn decoders_agree_and_respect_bounds(files in files()) {
        let from_lcov = CoverageParser::new(CoverageFormat::Lcov)
            .parse(lcov(&files).as_bytes())
            .unwrap();
        let from_cobertura = CoverageParser::new(CoverageFormat::Cobertura)
            .parse(cobertura(&files).as_bytes())
            .unwrap();

        for (path, lines) in &files {
            let (covered, total) = expected(lines);
            for snapshot in [&from_lcov, &from_cobertura] {
                let file = snapshot.get(path).unwrap();
                prop_assert_eq!(file.covered_lines(), covered);
                prop_assert_eq!(file.total_lines(), total);
                prop_assert!(file.covered_lines() <= file.total_lines());
                prop_assert_eq!(file.missed_lines().len() as u64, total - covered);
            }
        }

        let totals = from_lcov.totals();
        prop_assert!(totals.covered_lines() <= totals.total_lines());
        let global = from_lcov.measure(Path::new("unused.py"), CoverageScope::Global);
        prop_assert!((0.0..=100.0).contains(&global.percentage()));
    }

    #[test]
    fn decoding_is_deterministic(files in files()) {
        let report = lcov(&files);
        let parser = CoverageParser::new(CoverageFormat::Lcov);
        prop_assert_eq!(
            parser.parse(report.as_bytes()).unwrap(),
            parser.parse(report.as_bytes()).unwrap()
        );
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        for format in [
            CoverageFormat::Cobertura,
            CoverageFormat::Jacoco,
            CoverageFormat::JacocoCsv,
            CoverageFormat::Lcov,
            CoverageFormat::DiffCoverJson,
        ] {
            let _ = CoverageParser::new(format).parse(&bytes);
        }
    }
}
