//! Console rendering of step reports

use std::io::Write;

use bookstore_common::{BookstoreError, Result};
use bookstore_mongodb::{ReportSink, StepOutput, StepReport};
use bson::{Bson, Document as BsonDocument};
use serde_json::Value;

/// Writes each report as soon as it arrives
///
/// Documents are printed as pretty relaxed extended JSON, so `ObjectId`s show
/// up as `{"$oid": ...}` and numbers stay plain.
pub struct ConsoleSink<W: Write> {
    out: W,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, report: &StepReport, text: &str) -> Result<()> {
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(|e| {
                BookstoreError::Serialization(format!(
                    "Failed to write step {} ({}): {}",
                    report.position, report.label, e
                ))
            })
    }
}

impl<W: Write> ReportSink for ConsoleSink<W> {
    fn record(&mut self, report: &StepReport) -> Result<()> {
        let text = render(report)?;
        self.emit(report, &text)
    }
}

fn render(report: &StepReport) -> Result<String> {
    let label = &report.label;
    let text = match &report.output {
        StepOutput::Documents(docs) => {
            format!("{}:\n{}\n", label, pretty(documents_json(docs))?)
        }
        StepOutput::Pages(pages) => {
            let mut text = format!("{}:\n", label);
            for (number, page) in pages.iter().enumerate() {
                text.push_str(&format!(
                    "Page {}:\n{}\n",
                    number + 1,
                    pretty(documents_json(page))?
                ));
            }
            text
        }
        StepOutput::Updated { modified, .. } => format!("{}: {}\n", label, modified),
        StepOutput::Deleted(count) => format!("{}: {}\n", label, count),
        StepOutput::IndexCreated(name) => format!("{} ({})\n", label, name),
        StepOutput::Explain(stats) => {
            let json = Bson::Document(stats.clone()).into_relaxed_extjson();
            format!("{}:\n{}\n", label, pretty(json)?)
        }
    };
    Ok(text)
}

fn documents_json(docs: &[BsonDocument]) -> Value {
    Value::Array(
        docs.iter()
            .map(|doc| Bson::Document(doc.clone()).into_relaxed_extjson())
            .collect(),
    )
}

fn pretty(value: Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn report(label: &str, output: StepOutput) -> StepReport {
        StepReport {
            position: 1,
            total: 1,
            label: label.to_string(),
            output,
        }
    }

    fn rendered(report: &StepReport) -> String {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.record(report).unwrap();
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_documents_render_as_json_array() {
        let text = rendered(&report(
            "Books by Harper Lee",
            StepOutput::Documents(vec![doc! { "title": "Go Set a Watchman", "price": 16.99 }]),
        ));

        let (heading, body) = text.split_once('\n').unwrap();
        assert_eq!(heading, "Books by Harper Lee:");
        let parsed: Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([{ "title": "Go Set a Watchman", "price": 16.99 }])
        );
    }

    #[test]
    fn test_counts_render_inline() {
        assert_eq!(
            rendered(&report(
                "Updated The Great Gatsby Price",
                StepOutput::Updated { matched: 1, modified: 0 },
            )),
            "Updated The Great Gatsby Price: 0\n"
        );
        assert_eq!(
            rendered(&report("Deleted The Great Gatsby", StepOutput::Deleted(1))),
            "Deleted The Great Gatsby: 1\n"
        );
        assert_eq!(
            rendered(&report(
                "Index created on 'title'",
                StepOutput::IndexCreated("title_1".to_string()),
            )),
            "Index created on 'title' (title_1)\n"
        );
    }

    #[test]
    fn test_pages_are_numbered() {
        let text = rendered(&report(
            "Pagination",
            StepOutput::Pages(vec![vec![doc! { "n": 1 }], Vec::new()]),
        ));
        assert!(text.starts_with("Pagination:\nPage 1:\n"));
        assert!(text.contains("Page 2:\n[]"));
    }

    #[test]
    fn test_object_ids_use_extended_json() {
        let id = bson::oid::ObjectId::new();
        let text = rendered(&report(
            "Fiction Books",
            StepOutput::Documents(vec![doc! { "_id": id }]),
        ));
        assert!(text.contains("\"$oid\""));
        assert!(text.contains(&id.to_hex()));
    }

    #[test]
    fn test_explain_renders_pretty_stats() {
        let text = render(&report(
            "Performance Analysis with explain()",
            StepOutput::Explain(doc! { "executionSuccess": true, "nReturned": 1i64 }),
        ))
        .unwrap();
        assert_eq!(
            text,
            "Performance Analysis with explain():\n{\n  \"executionSuccess\": true,\n  \"nReturned\": 1\n}\n"
        );
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_an_error() {
        let mut sink = ConsoleSink::new(ClosedPipe);
        let err = sink
            .record(&report("Deleted The Great Gatsby", StepOutput::Deleted(1)))
            .unwrap_err();
        assert!(matches!(err, BookstoreError::Serialization(_)));
    }
}
