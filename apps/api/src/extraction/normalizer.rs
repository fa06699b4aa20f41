//! Document Normalizer — named byte blobs in, plain text per document out.
//!
//! Dispatch is by filename suffix. Zip archives fan out into their `.docx` and
//! `.pdf` entries; every other entry is skipped. A document that cannot be read
//! becomes a `ParseFailure` and never reaches the completion service.
//!
//! Unpacking and text extraction are separate steps so the caller can isolate
//! each leaf document's decoder run.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::{debug, warn};

use crate::extraction::models::{
    Document, DocumentFormat, ExtractedText, FailureReason, ParseFailure,
};

const DOCX_BODY_PART: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read docx: {0}")]
    Docx(String),

    #[error("Failed to read pdf: {0}")]
    Pdf(String),

    #[error("Failed to read zip archive: {0}")]
    Archive(String),
}

/// The text-extraction capability: one blob of a known format to plain text.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8], format: DocumentFormat) -> Result<String, NormalizeError>;
}

/// Default extractor: `quick-xml` over the docx container, `pdf-extract` for pdfs.
pub struct NativeTextExtractor;

impl TextExtractor for NativeTextExtractor {
    fn extract_text(&self, bytes: &[u8], format: DocumentFormat) -> Result<String, NormalizeError> {
        match format {
            DocumentFormat::Docx => docx_text(bytes),
            DocumentFormat::Pdf => pdf_text(bytes),
            DocumentFormat::Zip => Err(NormalizeError::UnsupportedFormat(
                "nested archive".to_string(),
            )),
        }
    }
}

/// Leaf documents (`.docx`/`.pdf`) found in one upload, plus a failure per
/// unreadable upload or archive entry.
#[derive(Debug, Default)]
pub struct UnpackedUpload {
    pub documents: Vec<Document>,
    pub failures: Vec<ParseFailure>,
}

/// Splits one upload into leaf documents. A zip fans out into its `.docx` and
/// `.pdf` entries, each named by its archive-relative path. Never fails as a whole.
pub fn unpack(upload: Document) -> UnpackedUpload {
    let mut unpacked = UnpackedUpload::default();
    match upload.format() {
        Some(DocumentFormat::Zip) => expand_archive(&upload, &mut unpacked),
        Some(_) => unpacked.documents.push(upload),
        None => {
            let err = NormalizeError::UnsupportedFormat(upload.id.clone());
            warn!("{err}");
            unpacked.failures.push(ParseFailure::new(
                upload.id,
                FailureReason::UnsupportedFormat,
                err.to_string(),
            ));
        }
    }
    unpacked
}

/// Plain text of one leaf document.
pub fn extract(document: &Document, extractor: &dyn TextExtractor) -> Result<ExtractedText, ParseFailure> {
    let result = match document.format() {
        Some(format @ (DocumentFormat::Docx | DocumentFormat::Pdf)) => {
            extractor.extract_text(&document.raw_bytes, format)
        }
        _ => Err(NormalizeError::UnsupportedFormat(document.id.clone())),
    };

    match result {
        Ok(text) => {
            debug!("Extracted {} chars from {}", text.len(), document.id);
            Ok(ExtractedText {
                document_id: document.id.clone(),
                text,
            })
        }
        Err(e) => {
            warn!("Text extraction failed for {}: {e}", document.id);
            Err(ParseFailure::new(
                document.id.as_str(),
                FailureReason::UnsupportedFormat,
                e.to_string(),
            ))
        }
    }
}

fn expand_archive(upload: &Document, unpacked: &mut UnpackedUpload) {
    let mut archive = match zip::ZipArchive::new(Cursor::new(upload.raw_bytes.as_slice())) {
        Ok(a) => a,
        Err(e) => {
            let err = NormalizeError::Archive(e.to_string());
            warn!("{}: {err}", upload.id);
            unpacked.failures.push(ParseFailure::new(
                upload.id.as_str(),
                FailureReason::UnsupportedFormat,
                err.to_string(),
            ));
            return;
        }
    };

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                let err = NormalizeError::Archive(e.to_string());
                warn!("{}: entry {i}: {err}", upload.id);
                unpacked.failures.push(ParseFailure::new(
                    format!("{}#{i}", upload.id),
                    FailureReason::UnsupportedFormat,
                    err.to_string(),
                ));
                continue;
            }
        };

        let name = entry.name().to_string();
        if entry.is_dir() || is_resource_fork(&name) {
            continue;
        }
        if !matches!(
            DocumentFormat::from_name(&name),
            Some(DocumentFormat::Docx | DocumentFormat::Pdf)
        ) {
            debug!("Skipping archive entry {name}");
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        if let Err(e) = entry.read_to_end(&mut bytes) {
            let err = NormalizeError::Archive(e.to_string());
            warn!("{name}: {err}");
            unpacked
                .failures
                .push(ParseFailure::new(name, FailureReason::UnsupportedFormat, err.to_string()));
            continue;
        }
        unpacked.documents.push(Document::new(name, bytes));
    }
}

/// macOS archive metadata (`__MACOSX/`, `._name`) carries the suffix but no document.
fn is_resource_fork(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || name
            .rsplit('/')
            .next()
            .is_some_and(|base| base.starts_with("._"))
}

/// Paragraph texts of the docx body, newline separated.
fn docx_text(bytes: &[u8]) -> Result<String, NormalizeError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| NormalizeError::Docx(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY_PART)
        .map_err(|e| NormalizeError::Docx(format!("{DOCX_BODY_PART}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| NormalizeError::Docx(e.to_string()))?;

    let mut reader = Reader::from_str(&xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_text_run = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                b"w:p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                let text = t
                    .unescape()
                    .map_err(|e| NormalizeError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(NormalizeError::Docx(format!(
                    "XML error at position {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
    }

    Ok(paragraphs.join("\n"))
}

/// Page texts in order, newline separated. Pages without a text layer yield "".
fn pdf_text(bytes: &[u8]) -> Result<String, NormalizeError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| NormalizeError::Pdf(e.to_string()))?;
    Ok(pages.join("\n"))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use super::*;

    pub(crate) fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub(crate) fn make_docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{p}</w:t></w:r></w:p>"))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body>{body}</w:body></w:document>"
        );
        make_zip(&[(DOCX_BODY_PART, xml.as_bytes())])
    }

    /// Single-page PDF with one line of Helvetica text, built with lopdf.
    pub(crate) fn make_pdf(text: &str) -> Vec<u8> {
        make_pdf_pages(&[text])
    }

    /// One page per entry; an empty entry gets an empty content stream.
    pub(crate) fn make_pdf_pages(pages: &[&str]) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document as PdfDocument, Object, ObjectId, Stream};

        let mut doc = PdfDocument::with_version("1.4");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = if text.is_empty() {
                String::new()
            } else {
                format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET")
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id: ObjectId = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// Unpacks and extracts every upload in order, collecting texts and failures.
    fn normalize_all(
        uploads: Vec<Document>,
        extractor: &dyn TextExtractor,
    ) -> (Vec<ExtractedText>, Vec<ParseFailure>) {
        let mut texts = Vec::new();
        let mut failures = Vec::new();
        for upload in uploads {
            let unpacked = unpack(upload);
            failures.extend(unpacked.failures);
            for document in &unpacked.documents {
                match extract(document, extractor) {
                    Ok(text) => texts.push(text),
                    Err(failure) => failures.push(failure),
                }
            }
        }
        (texts, failures)
    }

    /// Returns canned text per format so dispatch can be tested without real files.
    struct FakeExtractor;

    impl TextExtractor for FakeExtractor {
        fn extract_text(&self, bytes: &[u8], format: DocumentFormat) -> Result<String, NormalizeError> {
            match format {
                DocumentFormat::Pdf => Ok(format!("pdf:{}", String::from_utf8_lossy(bytes))),
                DocumentFormat::Docx => Ok(format!("docx:{}", String::from_utf8_lossy(bytes))),
                DocumentFormat::Zip => Err(NormalizeError::UnsupportedFormat("zip".to_string())),
            }
        }
    }

    #[test]
    fn test_zip_fan_out_skips_other_entries() {
        let archive = make_zip(&[
            ("a.pdf", &b"A"[..]),
            ("b.docx", &b"B"[..]),
            ("notes.txt", &b"ignore me"[..]),
        ]);
        let (texts, failures) = normalize_all(vec![Document::new("resumes.zip", archive)], &FakeExtractor);

        let ids: Vec<_> = texts.iter().map(|t| t.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a.pdf", "b.docx"]);
        assert_eq!(texts[0].text, "pdf:A");
        assert_eq!(texts[1].text, "docx:B");
        assert!(failures.is_empty());
    }

    #[test]
    fn test_zip_entries_keep_archive_relative_paths() {
        let archive = make_zip(&[
            ("team/jane.pdf", &b"J"[..]),
            ("__MACOSX/team/._jane.pdf", &b"junk"[..]),
            ("team/nested.zip", &b"PK"[..]),
        ]);
        let unpacked = unpack(Document::new("batch.zip", archive));
        assert_eq!(unpacked.documents.len(), 1);
        assert_eq!(unpacked.documents[0].id, "team/jane.pdf");
        assert_eq!(unpacked.documents[0].raw_bytes, b"J");
        assert!(unpacked.failures.is_empty());
    }

    #[test]
    fn test_leaf_upload_unpacks_to_itself() {
        let unpacked = unpack(Document::new("cv.PDF", b"X".to_vec()));
        assert_eq!(unpacked.documents.len(), 1);
        assert_eq!(unpacked.documents[0].id, "cv.PDF");
    }

    #[test]
    fn test_unsupported_suffix_fails_only_that_document() {
        let (texts, failures) = normalize_all(
            vec![
                Document::new("cover.txt", b"hello".to_vec()),
                Document::new("cv.pdf", b"X".to_vec()),
            ],
            &FakeExtractor,
        );
        assert_eq!(texts.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].document_id, "cover.txt");
        assert_eq!(failures[0].reason, FailureReason::UnsupportedFormat);
    }

    #[test]
    fn test_corrupt_archive_is_a_failure() {
        let unpacked = unpack(Document::new("broken.zip", b"not a zip".to_vec()));
        assert!(unpacked.documents.is_empty());
        assert_eq!(unpacked.failures[0].document_id, "broken.zip");
    }

    #[test]
    fn test_extract_refuses_archives() {
        let failure = extract(&Document::new("inner.zip", b"PK".to_vec()), &FakeExtractor).unwrap_err();
        assert_eq!(failure.document_id, "inner.zip");
        assert_eq!(failure.reason, FailureReason::UnsupportedFormat);
    }

    #[test]
    fn test_docx_paragraphs_joined_by_newline() {
        let docx = make_docx(&["Ada Lovelace", "ada@example.com", "Skills: Rust &amp; SQL"]);
        let text = NativeTextExtractor
            .extract_text(&docx, DocumentFormat::Docx)
            .unwrap();
        assert_eq!(text, "Ada Lovelace\nada@example.com\nSkills: Rust & SQL");
    }

    #[test]
    fn test_docx_without_body_part_fails() {
        let not_docx = make_zip(&[("readme.txt", &b"hi"[..])]);
        let err = NativeTextExtractor
            .extract_text(&not_docx, DocumentFormat::Docx)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Docx(_)));
    }

    #[test]
    fn test_pdf_text_is_extracted() {
        let pdf = make_pdf("Grace Hopper");
        let text = NativeTextExtractor.extract_text(&pdf, DocumentFormat::Pdf).unwrap();
        assert!(
            text.contains("Grace") || text.contains("Hopper"),
            "Expected extracted text to mention the name, got: {text}"
        );
    }

    #[test]
    fn test_pdf_blank_page_is_tolerated() {
        let pdf = make_pdf_pages(&["", "Grace Hopper"]);
        let text = NativeTextExtractor.extract_text(&pdf, DocumentFormat::Pdf).unwrap();
        assert!(text.contains("Grace Hopper"), "got: {text:?}");
        // The blank page contributes nothing ahead of the second page's text.
        let before = &text[..text.find("Grace").unwrap()];
        assert!(before.trim().is_empty(), "got: {text:?}");
    }

    #[test]
    fn test_pdf_pages_keep_order() {
        let pdf = make_pdf_pages(&["Alan Turing", "", "Grace Hopper"]);
        let text = NativeTextExtractor.extract_text(&pdf, DocumentFormat::Pdf).unwrap();
        let alan = text.find("Alan").expect("first page text");
        let grace = text.find("Grace").expect("last page text");
        assert!(alan < grace, "got: {text:?}");
    }

    #[test]
    fn test_garbage_pdf_fails() {
        let err = NativeTextExtractor
            .extract_text(b"definitely not a pdf", DocumentFormat::Pdf)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Pdf(_)));
    }

    #[test]
    fn test_native_extractor_over_real_archive() {
        let archive = make_zip(&[
            ("a.pdf", make_pdf("Alan Turing").as_slice()),
            ("b.docx", make_docx(&["Barbara Liskov"]).as_slice()),
            ("notes.txt", &b"skip"[..]),
        ]);
        let (texts, failures) = normalize_all(vec![Document::new("cvs.zip", archive)], &NativeTextExtractor);
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[1].text, "Barbara Liskov");
        assert!(failures.is_empty());
    }
}
