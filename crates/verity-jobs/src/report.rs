//! PDF report rendering.
//!
//! Produces a plain text PDF 1.4 document using the standard Helvetica
//! fonts, so no font embedding is required. Layout is a single column that
//! flows onto as many A4 pages as needed.

use std::fmt::Write as _;

use verity_core::{Error, ImageResult, Label, ReportArtifact, ReportRenderer, Result};
use verity_inference::round_percent;

const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const MARGIN: u32 = 56;
const WRAP_COLUMNS: usize = 90;

const DISCLAIMER: &str = "Disclaimer: These images were analyzed using an AI-based system. \
AI predictions are probabilistic and may contain inaccuracies. \
This report should not be considered as definitive proof.";

/// Share of images labelled AI generated, as a percentage with 2 decimals.
pub fn ai_percentage(results: &[ImageResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let ai = results
        .iter()
        .filter(|r| r.prediction.label == Label::AiGenerated)
        .count();
    round_percent(ai as f32 / results.len() as f32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
    Italic,
}

impl Font {
    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
        }
    }
}

struct Line {
    font: Font,
    size: u32,
    text: String,
    /// Extra space above the line.
    gap: u32,
}

impl Line {
    fn new(font: Font, size: u32, text: impl Into<String>) -> Self {
        Self {
            font,
            size,
            text: text.into(),
            gap: 0,
        }
    }

    fn after_gap(mut self, gap: u32) -> Self {
        self.gap = gap;
        self
    }
}

/// Renders detection results as a PDF report.
///
/// The layout is text only: no distribution chart and no per-image thumbnails.
#[derive(Debug, Clone)]
pub struct PdfReportRenderer {
    title: String,
}

impl Default for PdfReportRenderer {
    fn default() -> Self {
        Self {
            title: "AI Image Detection Report".to_string(),
        }
    }
}

impl PdfReportRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    fn lines(&self, results: &[ImageResult]) -> Vec<Line> {
        let mut lines = vec![
            Line::new(Font::Bold, 20, self.title.clone()),
            Line::new(
                Font::Bold,
                14,
                format!(
                    "Total AI Generated Images: {:.2}%",
                    ai_percentage(results)
                ),
            )
            .after_gap(12),
            Line::new(Font::Bold, 14, "Individual Image Analysis").after_gap(18),
        ];

        for (idx, result) in results.iter().enumerate() {
            lines.push(
                Line::new(Font::Bold, 11, format!("Image {}: {}", idx + 1, result.image))
                    .after_gap(8),
            );
            lines.push(Line::new(
                Font::Regular,
                11,
                format!("Prediction: {}", result.prediction.label),
            ));
            lines.push(Line::new(
                Font::Regular,
                11,
                format!("Confidence: {:.2}%", result.prediction.confidence),
            ));
        }

        for (i, chunk) in wrap(DISCLAIMER, WRAP_COLUMNS).into_iter().enumerate() {
            let line = Line::new(Font::Italic, 10, chunk);
            lines.push(if i == 0 { line.after_gap(24) } else { line });
        }
        lines
    }
}

impl ReportRenderer for PdfReportRenderer {
    fn render(&self, results: &[ImageResult]) -> Result<ReportArtifact> {
        if results.is_empty() {
            return Err(Error::Render("Cannot render a report without results".to_string()));
        }
        let pages = paginate(self.lines(results));
        Ok(ReportArtifact {
            content_type: "application/pdf".to_string(),
            bytes: write_pdf(&pages)?,
        })
    }
}

/// Greedy word wrap.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Assign baselines, starting a new page when the bottom margin is reached.
fn paginate(lines: Vec<Line>) -> Vec<Vec<(u32, Line)>> {
    let mut pages = vec![Vec::new()];
    let mut y = PAGE_HEIGHT - MARGIN;
    for line in lines {
        let advance = line.gap + line.size + line.size / 3;
        if y < MARGIN + advance {
            pages.push(Vec::new());
            y = PAGE_HEIGHT - MARGIN;
        }
        y -= advance;
        if let Some(page) = pages.last_mut() {
            page.push((y, line));
        }
    }
    pages
}

/// Escape a string for a PDF literal; non-ASCII becomes `?`.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn content_stream(page: &[(u32, Line)]) -> Result<String> {
    let mut stream = String::new();
    for (y, line) in page {
        writeln!(
            stream,
            "BT /{} {} Tf {} {} Td ({}) Tj ET",
            line.font.resource(),
            line.size,
            MARGIN,
            y,
            escape(&line.text)
        )
        .map_err(|e| Error::Render(e.to_string()))?;
    }
    Ok(stream)
}

fn write_pdf(pages: &[Vec<(u32, Line)>]) -> Result<Vec<u8>> {
    // 1 catalog, 2 page tree, 3-5 fonts, then a (page, content) pair per page.
    let first_page_obj = 6;
    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", first_page_obj + 2 * i))
        .collect();

    let mut objects: Vec<String> = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>".to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Oblique >>".to_string(),
    ];
    for (i, page) in pages.iter().enumerate() {
        let content_obj = first_page_obj + 2 * i + 1;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R /F3 5 0 R >> >> \
             /Contents {} 0 R >>",
            PAGE_WIDTH, PAGE_HEIGHT, content_obj
        ));
        let stream = content_stream(page)?;
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}endstream",
            stream.len(),
            stream
        ));
    }

    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_offset = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        // Entries are exactly 20 bytes including the two-byte line end.
        writeln!(xref, "{:010} 00000 n ", offset).map_err(|e| Error::Render(e.to_string()))?;
    }
    write!(
        xref,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    )
    .map_err(|e| Error::Render(e.to_string()))?;
    out.extend_from_slice(xref.as_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_core::Prediction;

    fn result(image: &str, label: Label, confidence: f32) -> ImageResult {
        ImageResult {
            image: image.to_string(),
            prediction: Prediction { label, confidence },
        }
    }

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn test_ai_percentage() {
        let results = vec![
            result("a.png", Label::AiGenerated, 91.0),
            result("b.png", Label::Real, 80.0),
            result("c.png", Label::AiGenerated, 55.5),
        ];
        assert_eq!(ai_percentage(&results), 66.67);
        assert_eq!(ai_percentage(&[]), 0.0);
    }

    #[test]
    fn test_render_contains_rows_in_order() {
        let artifact = PdfReportRenderer::new()
            .render(&[
                result("a.png", Label::AiGenerated, 93.12),
                result("b.png", Label::Real, 75.0),
            ])
            .unwrap();
        assert_eq!(artifact.content_type, "application/pdf");

        let pdf = text(&artifact.bytes);
        assert!(pdf.starts_with("%PDF-1.4\n"));
        assert!(pdf.ends_with("%%EOF\n"));
        assert!(pdf.contains("(AI Image Detection Report)"));
        assert!(pdf.contains("(Total AI Generated Images: 50.00%)"));
        let first = pdf.find("(Image 1: a.png)").unwrap();
        let second = pdf.find("(Image 2: b.png)").unwrap();
        assert!(first < second);
        assert!(pdf.contains("(Confidence: 93.12%)"));
        assert!(pdf.contains("(Prediction: Real)"));
        assert!(pdf.contains("Disclaimer"));
    }

    #[test]
    fn test_xref_offsets_point_at_objects() {
        let artifact = PdfReportRenderer::new()
            .render(&[result("a.png", Label::Real, 60.0)])
            .unwrap();
        let pdf = text(&artifact.bytes);

        let start = pdf.rfind("startxref\n").unwrap() + "startxref\n".len();
        let xref_offset: usize = pdf[start..].lines().next().unwrap().parse().unwrap();
        assert!(pdf[xref_offset..].starts_with("xref\n"));

        let entries: Vec<&str> = pdf[xref_offset..].lines().skip(3).take(7).collect();
        for (i, entry) in entries.iter().enumerate() {
            let offset: usize = entry[..10].parse().unwrap();
            assert!(pdf[offset..].starts_with(&format!("{} 0 obj", i + 1)));
        }
    }

    #[test]
    fn test_many_images_flow_onto_more_pages() {
        let results: Vec<ImageResult> = (0..60)
            .map(|i| result(&format!("img{}.png", i), Label::Real, 70.0))
            .collect();
        let pdf = text(&PdfReportRenderer::new().render(&results).unwrap().bytes);
        assert!(!pdf.contains("/Count 1 "));
        assert!(pdf.contains("(Image 60: img59.png)"));
    }

    #[test]
    fn test_custom_title() {
        let artifact = PdfReportRenderer::new()
            .with_title("Batch (7) Review")
            .render(&[result("a.png", Label::Real, 60.0)])
            .unwrap();
        assert!(text(&artifact.bytes).contains("(Batch \\(7\\) Review)"));
    }

    #[test]
    fn test_empty_results_rejected() {
        assert!(matches!(
            PdfReportRenderer::new().render(&[]),
            Err(Error::Render(_))
        ));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a(b)\\c"), "a\\(b\\)\\\\c");
        assert_eq!(escape("caf\u{e9}"), "caf?");
    }
}
