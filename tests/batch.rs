//! Integration tests for the batch runner.
//!
//! Poppler is never invoked: PDFs go through a canned `TextLayerExtractor`
//! keyed by file name, and EPUBs are assembled in-test with `zip::ZipWriter`.
//!
//! Run with:
//!   cargo test --test batch -- --nocapture

use doc2xml::pipeline::epub::EpubExtractor;
use doc2xml::pipeline::pdf::{PdfExtractor, PdfLayout};
use doc2xml::pipeline::sniff::sniff;
use doc2xml::pipeline::{DocumentExtractor, Extraction};
use doc2xml::{
    BatchConfig, BatchError, BatchProgressCallback, BatchRunner, BatchSummary, Block, Component,
    ConversionOutcome, DocBookOptions, DocumentFormat, ExtractionError, IntermediateNode,
    NormalizedDocument, OcrPolicy, OutcomeStatus, TextLayerExtractor,
};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ── Test helpers ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Layer {
    Markup(String),
    Fail,
    Slow(Duration),
}

/// Text layer answering from a table keyed by PDF file name.
#[derive(Default)]
struct CannedLayer {
    by_name: HashMap<String, Layer>,
    calls: AtomicUsize,
}

impl CannedLayer {
    fn with(mut self, name: &str, layer: Layer) -> Self {
        self.by_name.insert(name.to_string(), layer);
        self
    }
}

impl TextLayerExtractor for CannedLayer {
    fn extract_markup(&self, path: &Path) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        match self.by_name.get(&name) {
            Some(Layer::Markup(m)) => Ok(m.clone()),
            Some(Layer::Fail) => Err(ExtractionError::ToolFailed {
                program: "pdftohtml".into(),
                status: "exit status: 1".into(),
                stderr: "Syntax Error: Couldn't find trailer dictionary".into(),
            }),
            Some(Layer::Slow(d)) => {
                std::thread::sleep(*d);
                Ok(text_pdf(1))
            }
            None => Err(ExtractionError::MalformedMarkup {
                detail: format!("no canned markup for {name}"),
            }),
        }
    }
}

/// pdf2xml markup with `pages` text pages: a 24pt heading and two body lines.
fn text_pdf(pages: usize) -> String {
    let mut m = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE pdf2xml SYSTEM "pdf2xml.dtd">
<pdf2xml producer="poppler" version="24.02.0">
"#,
    );
    for n in 1..=pages {
        m.push_str(&format!(
            r##"<page number="{n}" position="absolute" top="0" left="0" height="1188" width="918">
	<fontspec id="0" size="24" family="Times" color="#000000"/>
	<fontspec id="1" size="11" family="Times" color="#000000"/>
<text top="60" left="108" width="300" height="27" font="0"><b>Page {n} Heading</b></text>
<text top="120" left="108" width="400" height="14" font="1">Body text of page {n} begins</text>
<text top="135" left="108" width="400" height="14" font="1">and continues on the next line.</text>
</page>
"##
        ));
    }
    m.push_str("</pdf2xml>\n");
    m
}

/// pdf2xml markup where every page is blank or nearly so.
fn scanned_pdf(pages: usize) -> String {
    let mut m = String::from("<pdf2xml>\n");
    for n in 1..=pages {
        m.push_str(&format!(
            r#"<page number="{n}"><image top="0" left="0" width="918" height="1188" src="p{n}.png"/><text top="1100" left="400" width="20" height="12" font="0">{n}</text></page>
"#
        ));
    }
    m.push_str("</pdf2xml>\n");
    m
}

fn write_pdf(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n1 0 obj\n<<>>\nendobj\n").unwrap();
}

const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Entries of an EPUB whose spine lists `spine` (chapter titles) in order.
fn epub_entries(title: &str, spine: &[&str]) -> Vec<(String, Vec<u8>)> {
    let manifest: String = spine
        .iter()
        .enumerate()
        .map(|(i, _)| {
            format!(
                r#"    <item id="c{i}" href="text/c{i}.xhtml" media-type="application/xhtml+xml"/>
"#
            )
        })
        .collect();
    let itemrefs: String = (0..spine.len())
        .map(|i| format!("    <itemref idref=\"c{i}\"/>\n"))
        .collect();
    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{title}</dc:title>
    <dc:creator>Ada Author</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine>
{itemrefs}  </spine>
</package>"#
    );

    let mut entries = vec![
        ("mimetype".to_string(), b"application/epub+zip".to_vec()),
        ("META-INF/container.xml".to_string(), CONTAINER.as_bytes().to_vec()),
        ("OEBPS/content.opf".to_string(), opf.into_bytes()),
    ];
    for (i, chapter) in spine.iter().enumerate() {
        let xhtml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{chapter}</title></head>
<body><h1>{chapter}</h1><p>The text of {chapter}.</p><p>Another paragraph.</p></body></html>"#
        );
        entries.push((format!("OEBPS/text/c{i}.xhtml"), xhtml.into_bytes()));
    }
    entries
}

fn zip_bytes(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(name.as_str(), opts).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn write_epub(dir: &Path, name: &str, entries: &[(String, Vec<u8>)]) {
    std::fs::write(dir.join(name), zip_bytes(entries)).unwrap();
}

fn fixed_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

/// Route library logs through the test harness; `RUST_LOG=doc2xml=debug`
/// shows the per-file state transitions.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(out: &Path, layer: CannedLayer) -> BatchConfig {
    init_tracing();
    BatchConfig::builder()
        .output_dir(out)
        .concurrency(3)
        .generated_at(fixed_time())
        .text_layer(Arc::new(layer))
        .build()
        .unwrap()
}

fn read_doc(path: &Path) -> NormalizedDocument {
    NormalizedDocument::from_xml(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn outcome<'a>(report: &'a doc2xml::BatchReport, name: &str) -> &'a ConversionOutcome {
    report
        .outcomes
        .iter()
        .find(|o| o.file_name() == name)
        .unwrap_or_else(|| panic!("no outcome for {name}"))
}

struct Dirs {
    _root: TempDir,
    input: PathBuf,
    output: PathBuf,
}

fn dirs() -> Dirs {
    let root = TempDir::new().unwrap();
    let input = root.path().join("input");
    let output = root.path().join("output");
    std::fs::create_dir(&input).unwrap();
    Dirs {
        input,
        output,
        _root: root,
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_pdf_has_one_section_per_page() {
    let d = dirs();
    write_pdf(&d.input, "paper.pdf");
    let layer = CannedLayer::default().with("paper.pdf", Layer::Markup(text_pdf(3)));

    let report = BatchRunner::new(config(&d.output, layer))
        .run_dir(&d.input)
        .await
        .unwrap();

    let o = outcome(&report, "paper.pdf");
    assert_eq!(o.status, OutcomeStatus::Success, "{o:?}");
    let doc = read_doc(&d.output.join("paper.xml"));
    assert_eq!(doc.format, DocumentFormat::Pdf);
    assert_eq!(doc.source, "paper.pdf");
    assert_eq!(doc.generated, fixed_time());
    assert_eq!(doc.sections.len(), 3);
    assert_eq!(doc.sections[1].title, "Page 2 Heading");
    assert_eq!(
        doc.sections[0].blocks[1],
        Block::Paragraph {
            text: "Body text of page 1 begins and continues on the next line.".into()
        }
    );
}

#[tokio::test]
async fn scanned_pdf_needs_ocr_and_writes_nothing() {
    let d = dirs();
    write_pdf(&d.input, "scan.pdf");
    let layer = CannedLayer::default().with("scan.pdf", Layer::Markup(scanned_pdf(4)));

    let report = BatchRunner::new(config(&d.output, layer))
        .run_dir(&d.input)
        .await
        .unwrap();

    let o = outcome(&report, "scan.pdf");
    assert_eq!(o.status, OutcomeStatus::NeedsOcr);
    assert_eq!(o.detail.as_deref(), Some("4 of 4 pages have no usable text layer"));
    assert!(!d.output.join("scan.xml").exists());
}

#[tokio::test]
async fn epub_sections_follow_the_spine_not_the_archive() {
    let d = dirs();
    let mut entries = epub_entries("Ordered", &["Alpha", "Beta", "Gamma"]);
    // archive order is the reverse of reading order; mimetype is no longer
    // first, so the .epub extension has to carry the detection
    entries.reverse();
    write_epub(&d.input, "book.epub", &entries);

    let report = BatchRunner::new(config(&d.output, CannedLayer::default()))
        .run_dir(&d.input)
        .await
        .unwrap();

    assert_eq!(outcome(&report, "book.epub").status, OutcomeStatus::Success);
    let doc = read_doc(&d.output.join("book.xml"));
    assert_eq!(doc.format, DocumentFormat::Epub);
    let titles: Vec<&str> = doc.sections.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["Alpha", "Beta", "Gamma"]);
    assert_eq!(doc.metadata.title.as_deref(), Some("Ordered"));
    assert_eq!(doc.metadata.creators, vec!["Ada Author".to_string()]);
}

#[tokio::test]
async fn written_xml_matches_the_normalized_shape() {
    let d = dirs();
    write_epub(&d.input, "a.epub", &epub_entries("A", &["One", "Two"]));
    write_pdf(&d.input, "b.pdf");
    let layer = CannedLayer::default().with("b.pdf", Layer::Markup(text_pdf(2)));

    BatchRunner::new(config(&d.output, layer))
        .run_dir(&d.input)
        .await
        .unwrap();

    // each chapter: heading + two paragraphs; each page: heading + one paragraph
    let epub = read_doc(&d.output.join("a.xml"));
    assert_eq!((epub.sections.len(), epub.block_count()), (2, 6));
    let pdf = read_doc(&d.output.join("b.xml"));
    assert_eq!((pdf.sections.len(), pdf.block_count()), (2, 4));
}

/// Two chapters of real-world XHTML habits: inline-led containers,
/// whitespace-only list items, rare entities, empty blocks, a self-closed
/// anchor and an image wrapped in a reopened inline element.
fn untidy_epub() -> Vec<(String, Vec<u8>)> {
    let mut entries = epub_entries("Untidy", &["One", "Two"]);
    let one = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>
<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>One</title></head><body>
<h1>One</h1>
<ul><li>
  <p>Nested item</p>
</li></ul>
<div><span>Lead</span> text after an inline</div>
<p>caf&eacute; &hearts;</p>
<p> \u{200B} </p>
</body></html>";
    let two = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>Two</title></head><body>
<h2>Two</h2>
<div><a id="p3"/>Anchor-led text.</div>
<h3>
</h3>
<img src="f.png" alt="figure"/>
</body></html>"#;
    entries[3].1 = one.as_bytes().to_vec();
    entries[4].1 = two.as_bytes().to_vec();
    entries
}

/// One page with two headings far apart and a stray invisible line, then a
/// plain page.
fn two_heading_pdf() -> String {
    let mut m = String::from(
        r##"<pdf2xml producer="poppler">
<page number="1" position="absolute" top="0" left="0" height="1188" width="918">
	<fontspec id="0" size="24" family="Times" color="#000000"/>
	<fontspec id="1" size="11" family="Times" color="#000000"/>
<text top="100" left="108" width="300" height="27" font="0">Part One</text>
<text top="600" left="108" width="300" height="27" font="0">Part Two</text>
<text top="650" left="108" width="400" height="14" font="1">Some body text here.</text>
<text top="900" left="108" width="10" height="14" font="1">"##,
    );
    m.push_str("\u{200B}\u{00AD}</text>\n</page>\n");
    m.push_str(
        r#"<page number="2" position="absolute" top="0" left="0" height="1188" width="918">
<text top="60" left="108" width="300" height="27" font="0">Closing</text>
<text top="120" left="108" width="400" height="14" font="1">Last words of the report.</text>
</page>
</pdf2xml>
"#,
    );
    m
}

fn tree_of(extraction: Extraction) -> IntermediateNode {
    match extraction {
        Extraction::Document { tree, .. } => tree,
        other => panic!("expected a document, got {other:?}"),
    }
}

#[tokio::test]
async fn written_xml_keeps_the_extracted_structure_of_untidy_input() {
    let d = dirs();
    write_epub(&d.input, "book.epub", &untidy_epub());
    write_pdf(&d.input, "report.pdf");
    let layer = CannedLayer::default().with("report.pdf", Layer::Markup(two_heading_pdf()));

    let report = BatchRunner::new(config(&d.output, layer))
        .run_dir(&d.input)
        .await
        .unwrap();
    assert_eq!(report.summary().succeeded, 2, "{report:?}");

    let epub_tree = tree_of(
        EpubExtractor
            .extract(&sniff(&d.input.join("book.epub")))
            .unwrap(),
    );
    let epub = read_doc(&d.output.join("book.xml"));
    assert_eq!(epub_tree.structure_counts(), (2, 7));
    assert_eq!((epub.sections.len(), epub.block_count()), (2, 7));
    assert_eq!(
        epub.sections[0].blocks[1..],
        [
            Block::Paragraph { text: "Nested item".into() },
            Block::Paragraph { text: "Lead text after an inline".into() },
            Block::Paragraph { text: "café ♥".into() },
        ]
    );

    let pdf_tree = tree_of(
        PdfExtractor::new(
            Arc::new(CannedLayer::default()),
            PdfLayout::default(),
            OcrPolicy::default(),
        )
        .extract_from_markup(&two_heading_pdf())
        .unwrap(),
    );
    let pdf = read_doc(&d.output.join("report.xml"));
    assert_eq!(pdf_tree.structure_counts(), (2, 5));
    assert_eq!((pdf.sections.len(), pdf.block_count()), (2, 5));
    assert_eq!(pdf.sections[0].title, "Part One");
    assert_eq!(
        pdf.sections[0].blocks[1],
        Block::Heading { level: 1, text: "Part Two".into() }
    );
}

// ── Failures stay per file ───────────────────────────────────────────────────

#[tokio::test]
async fn every_input_gets_exactly_one_row() {
    let d = dirs();
    write_pdf(&d.input, "a.pdf");
    write_epub(&d.input, "b.epub", &epub_entries("B", &["Only"]));
    std::fs::write(d.input.join("c.txt"), "plain text is not a document").unwrap();
    write_pdf(&d.input, "d.pdf");
    std::fs::write(d.input.join("e.pdf"), b"").unwrap();
    write_pdf(&d.input, "f.pdf");
    let layer = CannedLayer::default()
        .with("a.pdf", Layer::Markup(text_pdf(1)))
        .with("d.pdf", Layer::Fail)
        .with("f.pdf", Layer::Markup(scanned_pdf(2)));

    let report = BatchRunner::new(config(&d.output, layer))
        .run_dir(&d.input)
        .await
        .unwrap();

    let statuses: Vec<(String, OutcomeStatus)> = report
        .outcomes
        .iter()
        .map(|o| (o.file_name(), o.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("a.pdf".to_string(), OutcomeStatus::Success),
            ("b.epub".to_string(), OutcomeStatus::Success),
            ("c.txt".to_string(), OutcomeStatus::Error),
            ("d.pdf".to_string(), OutcomeStatus::Error),
            ("e.pdf".to_string(), OutcomeStatus::Error),
            ("f.pdf".to_string(), OutcomeStatus::NeedsOcr),
        ]
    );
    assert_eq!(outcome(&report, "c.txt").component, Some(Component::FormatSniffer));
    assert_eq!(outcome(&report, "d.pdf").component, Some(Component::PdfExtractor));
    assert!(outcome(&report, "e.pdf").report_detail().contains("file is empty"));

    let s = report.summary();
    assert_eq!((s.total, s.succeeded, s.needs_ocr, s.failed), (6, 2, 1, 3));

    let csv = std::fs::read_to_string(d.output.join("batch_report.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 7, "{csv}");
    assert_eq!(lines[0], "file,status,detail");
    assert!(lines[4].starts_with("d.pdf,ERROR,PdfExtractor: text-layer tool 'pdftohtml' failed"));
    assert_eq!(lines[6], "f.pdf,NEEDS_OCR,");
}

#[tokio::test]
async fn corrupt_epub_is_reported_and_later_files_still_run() {
    let d = dirs();
    let good = zip_bytes(&epub_entries("Fine", &["Ch"]));
    // keeps the local header (so it sniffs as EPUB) but loses the central directory
    std::fs::write(d.input.join("a-broken.epub"), &good[..good.len() / 2]).unwrap();
    std::fs::write(d.input.join("b-notzip.epub"), "just text").unwrap();
    write_pdf(&d.input, "z.pdf");
    let layer = CannedLayer::default().with("z.pdf", Layer::Markup(text_pdf(1)));

    let report = BatchRunner::new(config(&d.output, layer))
        .run_dir(&d.input)
        .await
        .unwrap();

    let broken = outcome(&report, "a-broken.epub");
    assert_eq!(broken.status, OutcomeStatus::Error);
    assert_eq!(broken.component, Some(Component::EpubExtractor));
    assert!(broken.report_detail().contains("corrupt"), "{broken:?}");

    let notzip = outcome(&report, "b-notzip.epub");
    assert_eq!(notzip.status, OutcomeStatus::Error);
    assert!(notzip.report_detail().contains("corrupt"), "{notzip:?}");

    assert_eq!(outcome(&report, "z.pdf").status, OutcomeStatus::Success);
}

#[tokio::test]
async fn slow_text_layer_times_out() {
    let d = dirs();
    write_pdf(&d.input, "slow.pdf");
    write_pdf(&d.input, "quick.pdf");
    let layer = CannedLayer::default()
        .with("slow.pdf", Layer::Slow(Duration::from_secs(4)))
        .with("quick.pdf", Layer::Markup(text_pdf(1)));
    let config = BatchConfig::builder()
        .output_dir(&d.output)
        .tool_timeout_secs(1)
        .text_layer(Arc::new(layer))
        .build()
        .unwrap();

    let report = BatchRunner::new(config).run_dir(&d.input).await.unwrap();

    let slow = outcome(&report, "slow.pdf");
    assert_eq!(slow.status, OutcomeStatus::Error);
    assert!(slow.report_detail().contains("timed out after 1s"), "{slow:?}");
    assert_eq!(outcome(&report, "quick.pdf").status, OutcomeStatus::Success);
}

// ── Output naming and determinism ────────────────────────────────────────────

#[tokio::test]
async fn stem_collisions_get_distinct_outputs() {
    let d = dirs();
    write_epub(&d.input, "a.epub", &epub_entries("From EPUB", &["E"]));
    write_pdf(&d.input, "a.pdf");
    let layer = CannedLayer::default().with("a.pdf", Layer::Markup(text_pdf(1)));

    let report = BatchRunner::new(config(&d.output, layer))
        .run_dir(&d.input)
        .await
        .unwrap();

    assert_eq!(
        outcome(&report, "a.epub").output.as_deref(),
        Some(d.output.join("a.xml").as_path())
    );
    assert_eq!(
        outcome(&report, "a.pdf").output.as_deref(),
        Some(d.output.join("a.pdf.xml").as_path())
    );
    assert_eq!(read_doc(&d.output.join("a.xml")).format, DocumentFormat::Epub);
    assert_eq!(read_doc(&d.output.join("a.pdf.xml")).format, DocumentFormat::Pdf);
}

#[tokio::test]
async fn rerun_is_byte_identical_with_a_fixed_timestamp() {
    let d = dirs();
    write_epub(&d.input, "a.epub", &epub_entries("Same", &["One", "Two"]));
    write_pdf(&d.input, "b.pdf");
    write_pdf(&d.input, "c.pdf");
    let layer = || {
        CannedLayer::default()
            .with("b.pdf", Layer::Markup(text_pdf(2)))
            .with("c.pdf", Layer::Fail)
    };

    let first = BatchRunner::new(config(&d.output, layer()))
        .run_dir(&d.input)
        .await
        .unwrap();
    let xml_a = std::fs::read(d.output.join("a.xml")).unwrap();
    let xml_b = std::fs::read(d.output.join("b.xml")).unwrap();

    let second = BatchRunner::new(config(&d.output, layer()))
        .run_dir(&d.input)
        .await
        .unwrap();

    assert_eq!(std::fs::read(d.output.join("a.xml")).unwrap(), xml_a);
    assert_eq!(std::fs::read(d.output.join("b.xml")).unwrap(), xml_b);
    let statuses = |r: &doc2xml::BatchReport| {
        r.outcomes
            .iter()
            .map(|o| (o.file_name(), o.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(statuses(&first), statuses(&second));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_batch_still_reports_every_file() {
    let d = dirs();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        write_pdf(&d.input, name);
    }
    let layer = Arc::new(
        CannedLayer::default()
            .with("a.pdf", Layer::Markup(text_pdf(1)))
            .with("b.pdf", Layer::Markup(text_pdf(1)))
            .with("c.pdf", Layer::Markup(text_pdf(1))),
    );
    let config = BatchConfig::builder()
        .output_dir(&d.output)
        .text_layer(layer.clone())
        .build()
        .unwrap();
    let runner = BatchRunner::new(config);
    let inputs = doc2xml::pipeline::input::discover_inputs(&d.input).await.unwrap();

    // shutdown is already requested when the batch starts
    let report = runner.run_until(inputs, async {}).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.len(), 3);
    for o in &report.outcomes {
        assert_eq!(o.status, OutcomeStatus::Error);
        assert_eq!(o.component, Some(Component::BatchRunner));
        assert_eq!(o.detail.as_deref(), Some("batch cancelled before extraction"));
    }
    assert_eq!(layer.calls.load(Ordering::SeqCst), 0);

    let csv = std::fs::read_to_string(d.output.join("batch_report.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4);
    let xml_files = std::fs::read_dir(&d.output)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .is_some_and(|x| x == "xml")
        })
        .count();
    assert_eq!(xml_files, 0);
}

// ── Progress, DocBook, fatal errors ──────────────────────────────────────────

#[derive(Default)]
struct Counting {
    total: AtomicUsize,
    started: AtomicUsize,
    completed: AtomicUsize,
    summaries: AtomicUsize,
}

impl BatchProgressCallback for Counting {
    fn on_batch_start(&self, total_files: usize) {
        self.total.store(total_files, Ordering::SeqCst);
    }
    fn on_file_start(&self, _index: usize, _path: &Path) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_complete(&self, _outcome: &ConversionOutcome) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, summary: &BatchSummary) {
        assert_eq!(summary.total, self.completed.load(Ordering::SeqCst));
        self.summaries.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_file() {
    let d = dirs();
    write_pdf(&d.input, "a.pdf");
    write_epub(&d.input, "b.epub", &epub_entries("B", &["Only"]));
    std::fs::write(d.input.join("c.bin"), [0u8, 1, 2, 3]).unwrap();
    let counting = Arc::new(Counting::default());
    let config = BatchConfig::builder()
        .output_dir(&d.output)
        .text_layer(Arc::new(
            CannedLayer::default().with("a.pdf", Layer::Markup(text_pdf(1))),
        ))
        .progress_callback(counting.clone())
        .build()
        .unwrap();

    BatchRunner::new(config).run_dir(&d.input).await.unwrap();

    assert_eq!(counting.total.load(Ordering::SeqCst), 3);
    assert_eq!(counting.started.load(Ordering::SeqCst), 3);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 3);
    assert_eq!(counting.summaries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn docbook_export_writes_a_book_per_file() {
    let d = dirs();
    write_epub(&d.input, "novel.epub", &epub_entries("A Novel", &["First", "Second"]));
    let config = BatchConfig::builder()
        .output_dir(&d.output)
        .docbook(DocBookOptions {
            isbn: Some("978-1-23-456789-7".into()),
            ..Default::default()
        })
        .build()
        .unwrap();

    let report = BatchRunner::new(config).run_dir(&d.input).await.unwrap();
    assert_eq!(outcome(&report, "novel.epub").status, OutcomeStatus::Success);

    let book_dir = d.output.join("novel");
    let book = std::fs::read_to_string(book_dir.join("book.xml")).unwrap();
    assert!(book.contains("<!ENTITY ch0000 SYSTEM \"ch0000.xml\">"));
    assert!(book.contains("&ch0001;"));
    assert!(book.contains("<title>A Novel</title>"));
    assert!(book.contains("<author>Ada Author</author>"));
    assert!(book.contains("<isbn>978-1-23-456789-7</isbn>"));
    let ch = std::fs::read_to_string(book_dir.join("ch0001.xml")).unwrap();
    assert!(ch.contains("<title>Second</title>"));
    assert!(ch.contains("<para>The text of Second.</para>"));
}

#[tokio::test]
async fn missing_input_directory_is_fatal() {
    let d = dirs();
    let err = BatchRunner::new(config(&d.output, CannedLayer::default()))
        .run_dir(&d.input.join("absent"))
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::InputDirNotFound { .. }));
}

#[tokio::test]
async fn unusable_output_directory_is_fatal() {
    let d = dirs();
    write_pdf(&d.input, "a.pdf");
    let blocker = d.input.join("a.pdf");
    let err = BatchRunner::new(config(&blocker.join("out"), CannedLayer::default()))
        .run_dir(&d.input)
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::OutputDirUnavailable { .. }));
}

#[tokio::test]
async fn empty_input_directory_writes_a_header_only_report() {
    let d = dirs();
    let report = BatchRunner::new(config(&d.output, CannedLayer::default()))
        .run_dir(&d.input)
        .await
        .unwrap();
    assert!(report.is_empty());
    let csv = std::fs::read_to_string(d.output.join("batch_report.csv")).unwrap();
    assert_eq!(csv, "file,status,detail\n");
}
