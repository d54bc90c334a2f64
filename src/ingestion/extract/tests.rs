use super::*;
use std::fmt::Write;

/// Single-page PDF showing each of `lines` in Helvetica
pub(crate) fn minimal_pdf(lines: &[&str]) -> Vec<u8> {
    let mut stream = String::from("BT /F1 12 Tf 72 720 Td 14 TL\n");
    for line in lines {
        writeln!(stream, "({line}) Tj T*").expect("should format content stream");
    }
    stream.push_str("ET");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
         /Resources << /Font << /F1 5 0 R >> >> >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{stream}\nendstream", stream.len()),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, object) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{object}\nendobj\n", index + 1).as_bytes());
    }

    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    pdf
}

#[test]
fn content_type_gate() {
    assert_eq!(
        DocumentKind::from_content_type("text/plain"),
        Some(DocumentKind::PlainText)
    );
    assert_eq!(
        DocumentKind::from_content_type("text/plain; charset=utf-8"),
        Some(DocumentKind::PlainText)
    );
    assert_eq!(
        DocumentKind::from_content_type("text/markdown"),
        Some(DocumentKind::PlainText)
    );
    assert_eq!(
        DocumentKind::from_content_type("TEXT/CSV"),
        Some(DocumentKind::Csv)
    );
    assert_eq!(
        DocumentKind::from_content_type("application/csv"),
        Some(DocumentKind::Csv)
    );
    assert_eq!(
        DocumentKind::from_content_type("application/pdf"),
        Some(DocumentKind::Pdf)
    );
    assert_eq!(DocumentKind::from_content_type("application/json"), None);
}

#[test]
fn plain_text_without_header() {
    let document = extract(b"  Quarterly report body.\n", DocumentKind::PlainText, false)
        .expect("should extract");

    assert_eq!(document.sections, vec!["Quarterly report body."]);
    assert!(document.source_url.is_none());
    assert!(document.metadata_text().is_none());
}

#[test]
fn plain_text_header_is_stripped() {
    let content = "<metadata>\nTitle: Annual filing\nURL: https://example.com/filing\n</metadata>\n\nThe filing body.";

    let document =
        extract(content.as_bytes(), DocumentKind::PlainText, false).expect("should extract");

    assert_eq!(document.sections, vec!["The filing body."]);
    assert_eq!(
        document.source_url.as_deref(),
        Some("https://example.com/filing")
    );
    let header = document
        .metadata
        .get("header")
        .and_then(Value::as_str)
        .expect("header should be kept");
    assert!(header.starts_with("Title: Annual filing"));
    assert!(!document.sections[0].contains("<metadata>"));
}

#[test]
fn unterminated_header_is_plain_text() {
    let content = "<metadata>\nTitle: broken\nbody continues";

    let document =
        extract(content.as_bytes(), DocumentKind::PlainText, false).expect("should extract");

    assert_eq!(document.sections.len(), 1);
    assert!(document.sections[0].starts_with("<metadata>"));
    assert!(document.metadata.is_empty());
}

#[test]
fn header_only_document_is_empty() {
    let content = "<metadata>URL: https://example.com</metadata>   \n";

    let document =
        extract(content.as_bytes(), DocumentKind::PlainText, false).expect("should extract");

    assert!(document.is_empty());
    assert_eq!(document.source_url.as_deref(), Some("https://example.com"));
}

#[test]
fn whitespace_document_is_empty() {
    let document =
        extract(b" \n\t ", DocumentKind::PlainText, false).expect("should extract");
    assert!(document.is_empty());
    assert!(document.sections.is_empty());
}

#[test]
fn invalid_utf8_is_an_extraction_error() {
    let result = extract(&[0xff, 0xfe, 0x00], DocumentKind::PlainText, false);
    assert!(matches!(result, Err(IngestError::Extraction(_))));
}

#[test]
fn pdf_text_layer_is_extracted() {
    let pdf = minimal_pdf(&["Quarterly revenue grew in the north", "Costs stayed flat"]);

    let document = extract(&pdf, DocumentKind::Pdf, false).expect("should extract");

    assert_eq!(document.sections.len(), 1);
    let text = &document.sections[0];
    assert!(text.contains("Quarterly revenue"), "extracted {text:?}");
    assert!(text.contains("Costs stayed flat"), "extracted {text:?}");
    assert!(document.source_url.is_none());
}

#[test]
fn pdf_without_text_is_empty() {
    let document = extract(&minimal_pdf(&[]), DocumentKind::Pdf, false).expect("should extract");

    assert!(document.is_empty());
}

#[test]
fn malformed_pdf_is_an_extraction_error() {
    let result = extract(b"%PDF-1.4 truncated", DocumentKind::Pdf, false);

    assert!(matches!(result, Err(IngestError::Extraction(_))));
}

#[test]
fn csv_rows_become_sections() {
    let content = "name,role\nAda,engineer\nGrace,admiral\n";

    let document = extract(content.as_bytes(), DocumentKind::Csv, false).expect("should extract");

    assert_eq!(
        document.sections,
        vec!["name: Ada\nrole: engineer", "name: Grace\nrole: admiral"]
    );
}

#[test]
fn csv_rows_can_be_concatenated() {
    let content = "name,role\nAda,engineer\nGrace,admiral\n";

    let document = extract(content.as_bytes(), DocumentKind::Csv, true).expect("should extract");

    assert_eq!(
        document.sections,
        vec!["name: Ada\nrole: engineer\nname: Grace\nrole: admiral"]
    );
}

#[test]
fn csv_ragged_rows_are_tolerated() {
    let content = "name,role,team\nAda,engineer\n";

    let document = extract(content.as_bytes(), DocumentKind::Csv, false).expect("should extract");

    assert_eq!(document.sections, vec!["name: Ada\nrole: engineer"]);
}

#[test]
fn csv_header_only_is_empty() {
    let document = extract(b"name,role\n", DocumentKind::Csv, true).expect("should extract");
    assert!(document.is_empty());
}

#[test]
fn sidecar_merges_without_overriding() {
    let content = "<metadata>URL: https://example.com/a</metadata>Body";
    let mut document =
        extract(content.as_bytes(), DocumentKind::PlainText, false).expect("should extract");

    document.merge_sidecar(
        br#"{"source_url": "https://other.example.com", "department": "finance"}"#,
    );

    assert_eq!(
        document.source_url.as_deref(),
        Some("https://example.com/a")
    );
    assert_eq!(
        document.metadata.get("department"),
        Some(&Value::String("finance".to_string()))
    );
    assert_eq!(
        document.metadata.get("source_url"),
        Some(&Value::String("https://example.com/a".to_string()))
    );
}

#[test]
fn sidecar_supplies_source_url() {
    let mut document =
        extract(b"Body", DocumentKind::PlainText, false).expect("should extract");

    document.merge_sidecar(br#"{"source_url": "https://example.com/b"}"#);

    assert_eq!(
        document.source_url.as_deref(),
        Some("https://example.com/b")
    );
    assert!(document.metadata_text().is_some());
}

#[test]
fn invalid_sidecar_is_ignored() {
    let mut document =
        extract(b"Body", DocumentKind::PlainText, false).expect("should extract");

    document.merge_sidecar(b"not json");
    document.merge_sidecar(b"[1, 2, 3]");

    assert!(document.metadata.is_empty());
    assert!(document.source_url.is_none());
}

#[test]
fn sidecar_keys() {
    assert_eq!(
        sidecar_location("reports/a.txt"),
        "reports/a.txt.metadata.json"
    );
    assert!(is_sidecar("reports/a.txt.metadata.json"));
    assert!(!is_sidecar("reports/a.txt"));
}
