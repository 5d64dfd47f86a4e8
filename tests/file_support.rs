//! Integration tests for multi-format file support (§4.3 "Multi-format text
//! extraction"): PDF, DOCX, PPTX, and XLSX bytes extracted and fed through
//! the chunker end to end.

use odras_rag_core::chunk::chunk_text;
use odras_rag_core::config::ChunkingConfig;
use odras_rag_core::extract::{extract_text, MIME_DOCX, MIME_PDF, MIME_PPTX, MIME_XLSX};

fn test_chunking_config() -> ChunkingConfig {
    ChunkingConfig { min_tokens: 4, target_tokens: 40, max_tokens: 80, overlap_ratio: 0.15 }
}

/// Minimal valid PDF containing the text "spec test phrase". Body then xref
/// with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (spec test phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default()).unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn minimal_pptx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("ppt/slides/slide1.xml", zip::write::SimpleFileOptions::default()).unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn minimal_xlsx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("xl/sharedStrings.xml", zip::write::SimpleFileOptions::default()).unwrap();
        let shared = format!(
            "<?xml version=\"1.0\"?><sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" count=\"1\" uniqueCount=\"1\"><si><t>{}</t></si></sst>",
            phrase
        );
        zip.write_all(shared.as_bytes()).unwrap();

        zip.start_file("xl/worksheets/sheet1.xml", zip::write::SimpleFileOptions::default()).unwrap();
        let sheet = r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c></row></sheetData></worksheet>"#;
        zip.write_all(sheet.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[test]
fn pdf_text_is_extracted_and_chunked() {
    let bytes = minimal_pdf_with_phrase();
    let text = extract_text(&bytes, MIME_PDF).expect("pdf extraction should succeed");
    assert!(text.contains("spec test phrase"));

    let chunks = chunk_text(&text, &test_chunking_config(), None);
    assert!(!chunks.is_empty());
    assert!(chunks.iter().any(|c| c.content.contains("spec test phrase")));
}

#[test]
fn docx_text_is_extracted_and_chunked() {
    let bytes = minimal_docx_with_text("office test phrase");
    let text = extract_text(&bytes, MIME_DOCX).expect("docx extraction should succeed");
    assert_eq!(text, "office test phrase");

    let chunks = chunk_text(&text, &test_chunking_config(), None);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "office test phrase");
}

#[test]
fn pptx_text_is_extracted() {
    let bytes = minimal_pptx_with_text("slide test phrase");
    let text = extract_text(&bytes, MIME_PPTX).expect("pptx extraction should succeed");
    assert_eq!(text, "slide test phrase");
}

#[test]
fn xlsx_text_is_extracted_via_shared_strings() {
    let bytes = minimal_xlsx_with_text("cell test phrase");
    let text = extract_text(&bytes, MIME_XLSX).expect("xlsx extraction should succeed");
    assert_eq!(text, "cell test phrase");
}

#[test]
fn corrupt_pdf_returns_an_error_rather_than_panicking() {
    let result = extract_text(b"not a valid pdf", MIME_PDF);
    assert!(result.is_err());
}

#[test]
fn corrupt_docx_returns_an_error_rather_than_panicking() {
    let result = extract_text(b"not a zip file at all", MIME_DOCX);
    assert!(result.is_err());
}

#[test]
fn unknown_content_type_is_rejected() {
    let result = extract_text(b"plain bytes", "application/octet-stream");
    assert!(result.is_err());
}
