//! Text-export filters over a document's lines (SPEC_FULL.md §4.10,
//! grounded in `original_source/src/convert.py`). Pure functions; callers
//! request a snapshot from the engine and write the result to
//! `<path>.<ext>` themselves.

pub fn to_html(lines: &[String]) -> String {
    let body: String = lines.iter().map(|l| format!("<p>{}</p>", escape_html(l))).collect();
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n    <meta charset=\"UTF-8\">\n    <title>Generated HTML</title>\n</head>\n<body>\n    {body}\n</body>\n</html>\n"
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn to_rtf(lines: &[String]) -> String {
    let mut body = String::new();
    for line in lines {
        let safe = line.replace('\\', r"\\").replace('{', r"\{").replace('}', r"\}");
        body.push_str(&safe);
        body.push_str(r"\par");
        body.push('\n');
    }
    format!("{{\\rtf1\\ansi\\deff0\n{body}}}")
}

/// A deliberately minimal single-page PDF: one fixed Helvetica 12pt
/// `BT .. ET` block per line, 20pt line pitch starting at y=700. Does not
/// handle paging, wrapping, or non-ASCII glyphs.
pub fn to_pdf(lines: &[String]) -> Vec<u8> {
    let mut content_lines = Vec::new();
    let mut y = 700i64;
    for line in lines {
        content_lines.push("BT".to_string());
        content_lines.push("/F1 12 Tf".to_string());
        content_lines.push(format!("20 {y} Td"));
        content_lines.push(format!("({line}) Tj"));
        content_lines.push("ET".to_string());
        y -= 20;
    }
    let content = content_lines.join("\n");
    let content_bytes = content.as_bytes();

    let body = vec![
        "%PDF-1.4".to_string(),
        "1 0 obj".to_string(),
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "endobj".to_string(),
        "2 0 obj".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "endobj".to_string(),
        "3 0 obj".to_string(),
        "<< /Type /Page /Parent 2 0 R /Contents 4 0 R /Resources << /Font << /F1 << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> >> >> >>".to_string(),
        "endobj".to_string(),
        "4 0 obj".to_string(),
        format!("<< /Length {} >>", content_bytes.len()),
        "stream".to_string(),
        content.clone(),
        "endstream".to_string(),
        "endobj".to_string(),
    ];
    let body_joined = body.join("\n");
    let xref_position = body_joined.as_bytes().len();

    let xref_and_trailer = vec![
        "xref".to_string(),
        "0 5".to_string(),
        "0000000000 65535 f".to_string(),
        "0000000010 00000 n".to_string(),
        "0000000050 00000 n".to_string(),
        "0000000100 00000 n".to_string(),
        "0000000200 00000 n".to_string(),
        "trailer".to_string(),
        "<< /Size 5 /Root 1 0 R >>".to_string(),
        "startxref".to_string(),
        xref_position.to_string(),
        "%%EOF".to_string(),
    ];

    let mut full = body;
    full.extend(xref_and_trailer);
    full.join("\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escapes_angle_brackets_and_wraps_each_line_in_a_paragraph() {
        let out = to_html(&["a < b".to_string(), "plain".to_string()]);
        assert!(out.contains("<p>a &lt; b</p>"));
        assert!(out.contains("<p>plain</p>"));
    }

    #[test]
    fn rtf_escapes_braces_and_backslashes() {
        let out = to_rtf(&["a{b}\\c".to_string()]);
        assert!(out.starts_with("{\\rtf1\\ansi\\deff0"));
        assert!(out.contains(r"a\{b\}\\c\par"));
        assert!(out.ends_with('}'));
    }

    #[test]
    fn pdf_contains_one_text_block_per_line() {
        let bytes = to_pdf(&["first".to_string(), "second".to_string()]);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.matches("BT").count(), 2);
        assert!(text.contains("(first) Tj"));
        assert!(text.contains("(second) Tj"));
    }
}
