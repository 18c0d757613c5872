//! PDF back end for the report, built on `genpdf`.

use cppdoc_core::config::ReportConfig;
use cppdoc_core::error::ReportError;
use cppdoc_core::report::{Block, ReportRenderer};
use genpdf::elements::{Break, PageBreak, Paragraph, Text};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::style::{Style, StyledString};
use genpdf::{Alignment, Document, Scale, SimplePageDecorator};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MARGIN_MM: i32 = 30;
/// A4 minus both margins.
const PRINTABLE_WIDTH_MM: f64 = 210.0 - 2.0 * MARGIN_MM as f64;
const PRINTABLE_HEIGHT_MM: f64 = 297.0 - 2.0 * MARGIN_MM as f64;
/// genpdf places images at 300 dpi unless told otherwise.
const IMAGE_DPI: f64 = 300.0;
const CODE_FONT_SIZE: u8 = 8;
/// Columns that fit the printable width at `CODE_FONT_SIZE` in a mono font.
const CODE_COLUMNS: usize = 88;

/// Renders report blocks to an A4 PDF.
pub struct PdfRenderer {
    config: ReportConfig,
}

impl PdfRenderer {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    fn find_family(&self, family: &str) -> Option<FontFamily<FontData>> {
        self.config.font_dirs.iter().find_map(|dir| {
            genpdf::fonts::from_files(dir, family, None)
                .inspect(|_| debug!(dir = %dir.display(), family, "Font family loaded"))
                .ok()
        })
    }

    fn body_font(&self) -> Result<FontFamily<FontData>, ReportError> {
        self.find_family(&self.config.font_family)
            .ok_or_else(|| ReportError::FontNotFound {
                searched: format!(
                    "{} in {}",
                    self.config.font_family,
                    self.config
                        .font_dirs
                        .iter()
                        .map(|d| d.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
    }

    fn document(&self) -> Result<(Document, Style), ReportError> {
        let mut doc = Document::new(self.body_font()?);
        doc.set_title(&self.config.title);
        doc.set_font_size(11);

        let mut decorator = SimplePageDecorator::new();
        decorator.set_margins(MARGIN_MM);
        doc.set_page_decorator(decorator);

        let mut code = Style::new().with_font_size(CODE_FONT_SIZE);
        match self.find_family(&self.config.code_font_family) {
            Some(mono) => code = code.with_font_family(doc.add_font_family(mono)),
            None => warn!(
                family = %self.config.code_font_family,
                "Monospace font not found, listings use the body font"
            ),
        }
        Ok((doc, code))
    }

    fn image_width_mm(&self, max_width_mm: f64) -> f64 {
        max_width_mm.min(self.config.max_image_width_mm).min(PRINTABLE_WIDTH_MM)
    }
}

impl ReportRenderer for PdfRenderer {
    fn name(&self) -> &str {
        "genpdf"
    }

    fn render(&self, blocks: &[Block], target: &Path) -> Result<(), ReportError> {
        let (mut doc, code_style) = self.document()?;

        for block in blocks {
            match block {
                Block::Title(text) => {
                    doc.push(
                        Paragraph::new(StyledString::new(
                            text.clone(),
                            Style::new().bold().with_font_size(18),
                        ))
                        .aligned(Alignment::Center),
                    );
                    doc.push(Break::new(1));
                }
                Block::Subtitle(text) => {
                    doc.push(
                        Paragraph::new(StyledString::new(
                            text.clone(),
                            Style::new().italic().with_font_size(13),
                        ))
                        .aligned(Alignment::Center),
                    );
                    doc.push(Break::new(1));
                }
                Block::Heading(text) => {
                    doc.push(Paragraph::new(StyledString::new(
                        text.clone(),
                        Style::new().bold().with_font_size(16),
                    )));
                    doc.push(Break::new(0.5));
                }
                Block::Subheading(text) => {
                    doc.push(Break::new(0.5));
                    doc.push(Paragraph::new(StyledString::new(
                        text.clone(),
                        Style::new().bold().with_font_size(13),
                    )));
                    doc.push(Break::new(0.3));
                }
                Block::Paragraph(text) => {
                    doc.push(Paragraph::new(text.as_str()));
                    doc.push(Break::new(0.5));
                }
                Block::Code(text) => {
                    for line in code_lines(text) {
                        doc.push(Text::new(StyledString::new(line, code_style)));
                    }
                    doc.push(Break::new(0.5));
                }
                Block::Fields(rows) => {
                    for (label, value) in rows {
                        let mut row = Paragraph::default();
                        row.push_styled(format!("{label}: "), Style::new().bold());
                        row.push(value.as_str());
                        doc.push(row);
                    }
                    doc.push(Break::new(0.5));
                }
                Block::Image { path, max_width_mm } => {
                    match prepare_image(path, self.image_width_mm(*max_width_mm)) {
                        Ok(image) => {
                            doc.push(image.with_alignment(Alignment::Center));
                        }
                        Err(e) => {
                            warn!(image = %path.display(), error = %e, "Image left out of the report");
                            doc.push(placeholder("The screenshot could not be embedded."));
                        }
                    }
                    doc.push(Break::new(0.5));
                }
                Block::Placeholder(text) => {
                    doc.push(placeholder(text));
                    doc.push(Break::new(0.5));
                }
                Block::PageBreak => doc.push(PageBreak::new()),
                Block::Spacer => doc.push(Break::new(1)),
            }
        }

        doc.render_to_file(target)
            .map_err(|e| ReportError::Render {
                path: target.to_path_buf(),
                message: e.to_string(),
            })
    }
}

fn placeholder(text: &str) -> Paragraph {
    Paragraph::new(StyledString::new(text.to_string(), Style::new().italic()))
}

/// Split a listing into printable lines, hard-wrapping long ones. Blank
/// lines become a single space so they keep their height.
fn code_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            out.push(" ".to_string());
            continue;
        }
        out.extend(chars.chunks(CODE_COLUMNS).map(|c| c.iter().collect::<String>()));
    }
    out
}

/// `<dir>/<stem>_rgb.jpg`, next to the original.
fn rgb_copy_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    path.with_file_name(format!("{stem}_rgb.jpg"))
}

/// Scale factor that makes an image `width_px` wide fit `width_mm`, shrunk
/// further when the result would not fit on one page.
fn fit_scale(width_px: u32, height_px: u32, width_mm: f64) -> f64 {
    let px_to_mm = 25.4 / IMAGE_DPI;
    let natural_w = f64::from(width_px) * px_to_mm;
    let natural_h = f64::from(height_px) * px_to_mm;
    if natural_w <= 0.0 || natural_h <= 0.0 {
        return 1.0;
    }
    let scale = width_mm / natural_w;
    let max_h = PRINTABLE_HEIGHT_MM * 0.9;
    if natural_h * scale > max_h {
        max_h / natural_h
    } else {
        scale
    }
}

/// genpdf rejects images with an alpha channel, so every screenshot is
/// re-encoded as an RGB JPEG before embedding.
fn prepare_image(path: &Path, width_mm: f64) -> Result<genpdf::elements::Image, String> {
    let decoded = image::open(path).map_err(|e| e.to_string())?;
    let rgb = decoded.to_rgb8();
    let (width_px, height_px) = rgb.dimensions();
    let copy = rgb_copy_path(path);
    rgb.save_with_format(&copy, ImageFormat::Jpeg)
        .map_err(|e| e.to_string())?;

    let scale = fit_scale(width_px, height_px, width_mm);
    let image = genpdf::elements::Image::from_path(&copy).map_err(|e| e.to_string())?;
    Ok(image.with_scale(Scale::new(scale, scale)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_code_lines_wrap_and_keep_blank_lines() {
        let long = "x".repeat(CODE_COLUMNS + 5);
        let lines = code_lines(&format!("int a;\n\n{long}"));
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], " ");
        assert_eq!(lines[2].len(), CODE_COLUMNS);
        assert_eq!(lines[3], "xxxxx");
    }

    #[test]
    fn test_rgb_copy_path_keeps_stem() {
        assert_eq!(
            rgb_copy_path(Path::new("/scratch/screenshot_hello.png")),
            PathBuf::from("/scratch/screenshot_hello_rgb.jpg")
        );
    }

    #[test]
    fn test_fit_scale() {
        // 1181 px at 300 dpi is 100 mm wide
        let scale = fit_scale(1181, 500, 150.0);
        assert!((scale - 1.5).abs() < 0.01, "{scale}");
        // very tall images are limited by the page height
        let tall = fit_scale(100, 10_000, 150.0);
        let height_mm = 10_000.0 * 25.4 / IMAGE_DPI * tall;
        assert!(height_mm <= PRINTABLE_HEIGHT_MM);
        assert_eq!(fit_scale(0, 10, 150.0), 1.0);
    }

    #[test]
    fn test_prepare_image_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("screenshot_a.png");
        image::RgbaImage::from_pixel(40, 20, image::Rgba([10, 20, 30, 128]))
            .save_with_format(&png, ImageFormat::Png)
            .unwrap();
        prepare_image(&png, 100.0).unwrap();
        let copy = image::open(dir.path().join("screenshot_a_rgb.jpg")).unwrap();
        assert!(!copy.color().has_alpha());
        assert_eq!((copy.width(), copy.height()), (40, 20));
    }

    #[test]
    fn test_prepare_image_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("screenshot_b.jpg");
        std::fs::write(&bogus, b"scripted capture").unwrap();
        assert!(prepare_image(&bogus, 100.0).is_err());
    }

    #[test]
    fn test_missing_font_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = PdfRenderer::new(ReportConfig {
            font_dirs: vec![dir.path().to_path_buf()],
            font_family: "NoSuchFamily".into(),
            ..Default::default()
        });
        let err = renderer
            .render(&[Block::Title("x".into())], &dir.path().join("r.pdf"))
            .unwrap_err();
        assert!(matches!(err, ReportError::FontNotFound { .. }));
        assert!(err.to_string().contains("NoSuchFamily"));
    }

    // Rendering needs a TrueType family on the machine; skipped otherwise.
    #[test]
    fn test_render_full_document_when_fonts_available() {
        let renderer = PdfRenderer::new(ReportConfig::default());
        if renderer.body_font().is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("screenshot_hello.png");
        image::RgbImage::from_pixel(300, 120, image::Rgb([0, 0, 0]))
            .save_with_format(&png, ImageFormat::Png)
            .unwrap();
        let blocks = vec![
            Block::Title("C++ Program Collection".into()),
            Block::Fields(vec![("Programs".into(), "1".into())]),
            Block::PageBreak,
            Block::Heading("Program: hello".into()),
            Block::Code("int main() {\n    return 0;\n}".into()),
            Block::Image {
                path: png,
                max_width_mm: 180.0,
            },
            Block::Placeholder("No screenshot".into()),
            Block::Spacer,
        ];
        let target = dir.path().join("report.pdf");
        renderer.render(&blocks, &target).unwrap();
        let bytes = std::fs::read(&target).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
