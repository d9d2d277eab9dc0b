use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use lopdf::Object;
use printpdf::{Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Pt, RawImage, XObjectTransform};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

const POINTS_PER_INCH: f64 = 72.0;
const INCHES_PER_METER: f64 = 0.0254;

/// Physical layout of one output page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpec {
    pub image: PathBuf,
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: f64,
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Page size in points for an image of `width_px`×`height_px` at `dpi`.
pub fn page_size(width_px: u32, height_px: u32, dpi: f64) -> (f64, f64) {
    let px_to_pt = POINTS_PER_INCH / dpi;
    (width_px as f64 * px_to_pt, height_px as f64 * px_to_pt)
}

/// Pixel size and embedded density of a PNG, `None` density when the file has no usable `pHYs`.
fn read_png_header(path: &Path) -> Result<(u32, u32, Option<f64>)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = png::Decoder::new(BufReader::new(file))
        .read_info()
        .with_context(|| format!("Failed to read PNG header of {}", path.display()))?;
    let info = reader.info();

    let dpi = info
        .pixel_dims
        .as_ref()
        .filter(|dims| dims.unit == png::Unit::Meter && dims.xppu > 0)
        .map(|dims| dims.xppu as f64 * INCHES_PER_METER);

    Ok((info.width, info.height, dpi))
}

/// Embedded density of the image, or `fallback` when it has none.
///
/// The capture device scale factor is not taken into account.
pub fn image_dpi(path: &Path, fallback: f64) -> Result<f64> {
    let (_, _, dpi) = read_png_header(path)?;
    Ok(dpi.unwrap_or(fallback))
}

/// One page per image, in the given order. Any unreadable image aborts the whole plan.
pub fn plan_pages(images: &[PathBuf], fallback_dpi: f64) -> Result<Vec<PageSpec>> {
    images
        .iter()
        .map(|image| {
            let (width_px, height_px, dpi) = read_png_header(image)?;
            let dpi = dpi.unwrap_or(fallback_dpi);
            let (width_pt, height_pt) = page_size(width_px, height_px, dpi);
            Ok(PageSpec {
                image: image.clone(),
                width_px,
                height_px,
                dpi,
                width_pt,
                height_pt,
            })
        })
        .collect()
}

/// Writes a PDF with one page per image, each page exactly the size of its image.
pub fn merge_images_to_pdf(
    images: &[PathBuf],
    out: &Path,
    fallback_dpi: f64,
) -> Result<Vec<PageSpec>> {
    let specs = plan_pages(images, fallback_dpi)?;

    let title = out
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Report");
    let mut doc = PdfDocument::new(title);
    let mut warnings = Vec::new();
    let mut pages = Vec::with_capacity(specs.len());

    for spec in &specs {
        let bytes = std::fs::read(&spec.image)
            .with_context(|| format!("Failed to read {}", spec.image.display()))?;
        let raw = RawImage::decode_from_bytes(&bytes, &mut warnings)
            .map_err(|e| anyhow!("Failed to decode {}: {}", spec.image.display(), e))?;
        let image_id = doc.add_image(&raw);

        debug!(
            "Page {}x{}pt from {} at {} dpi",
            spec.width_pt,
            spec.height_pt,
            spec.image.display(),
            spec.dpi
        );

        // At the page's own dpi the image covers the page exactly from the origin.
        let ops = vec![Op::UseXobject {
            id: image_id,
            transform: XObjectTransform {
                dpi: Some(spec.dpi as f32),
                ..Default::default()
            },
        }];
        pages.push(PdfPage::new(
            Mm::from(Pt(spec.width_pt as f32)),
            Mm::from(Pt(spec.height_pt as f32)),
            ops,
        ));
    }

    let bytes = doc
        .with_pages(pages)
        .save(&PdfSaveOptions::default(), &mut warnings);
    for warning in &warnings {
        warn!("PDF: {:?}", warning);
    }
    let bytes = set_exact_page_boxes(&bytes, &specs)?;

    std::fs::write(out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    info!("Wrote {} pages to {}", specs.len(), out.display());

    Ok(specs)
}

/// Rewrites every page box with the planned real-valued size.
///
/// printpdf serializes page boxes as whole points, which would leave a 791.25pt image on a
/// 791pt page.
fn set_exact_page_boxes(pdf: &[u8], specs: &[PageSpec]) -> Result<Vec<u8>> {
    let mut doc = lopdf::Document::load_mem(pdf).context("Failed to reload generated PDF")?;
    let pages = doc.get_pages();
    if pages.len() != specs.len() {
        return Err(anyhow!(
            "Generated PDF has {} pages, expected {}",
            pages.len(),
            specs.len()
        ));
    }

    for (page_id, spec) in pages.values().zip(specs) {
        let page_box = || -> Object {
            vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(spec.width_pt as f32),
                Object::Real(spec.height_pt as f32),
            ]
            .into()
        };
        let page = doc
            .get_dictionary_mut(*page_id)
            .context("Page object is not a dictionary")?;
        page.set("MediaBox", page_box());
        page.set("CropBox", page_box());
        page.set("TrimBox", page_box());
    }

    let mut out = Vec::with_capacity(pdf.len());
    doc.save_to(&mut out).context("Failed to serialize PDF")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    /// PNG with a `pHYs` chunk, written through the `png` encoder.
    fn write_png_with_density(path: &Path, width: u32, height: u32, pixels_per_meter: u32) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: pixels_per_meter,
            yppu: pixels_per_meter,
            unit: png::Unit::Meter,
        }));
        let mut writer = encoder.write_header().unwrap();
        writer
            .write_image_data(&vec![255u8; (width * height * 3) as usize])
            .unwrap();
    }

    #[test]
    fn page_size_at_96_dpi_is_three_quarters() {
        assert_eq!(page_size(1780, 1055, 96.0), (1335.0, 791.25));
        assert_eq!(page_size(3840, 2400, 96.0), (2880.0, 1800.0));
    }

    #[test]
    fn page_size_at_72_dpi_is_one_to_one() {
        assert_eq!(page_size(640, 480, 72.0), (640.0, 480.0));
    }

    #[test]
    fn missing_density_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        write_png(&path, 10, 10);
        assert_eq!(image_dpi(&path, 96.0).unwrap(), 96.0);
    }

    #[test]
    fn embedded_density_wins_over_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dense.png");
        // Not rounded: 7559 px/m is 191.9986 dpi.
        write_png_with_density(&path, 20, 10, 7559);
        let dpi = image_dpi(&path, 96.0).unwrap();
        assert!((dpi - 7559.0 * 0.0254).abs() < 1e-9, "dpi was {dpi}");
        assert!(dpi < 192.0);
    }

    #[test]
    fn zero_density_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.png");
        write_png_with_density(&path, 20, 10, 0);
        assert_eq!(image_dpi(&path, 96.0).unwrap(), 96.0);
    }

    #[test]
    fn plan_keeps_image_order_and_own_dpi() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("tab_01_a.png");
        let second = dir.path().join("tab_02_b.png");
        write_png(&first, 400, 200);
        write_png_with_density(&second, 144, 72, 5669); // ~144 dpi

        let specs = plan_pages(&[first.clone(), second.clone()], 96.0).unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].image, first);
        assert_eq!((specs[0].width_pt, specs[0].height_pt), (300.0, 150.0));
        assert_eq!(specs[1].image, second);
        assert!((specs[1].width_pt - 72.0).abs() < 0.01);
        assert!((specs[1].height_pt - 36.0).abs() < 0.01);
    }

    #[test]
    fn unreadable_image_aborts_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        let bad = dir.path().join("bad.png");
        write_png(&good, 8, 8);
        std::fs::write(&bad, b"garbage").unwrap();
        let out = dir.path().join("out.pdf");

        assert!(merge_images_to_pdf(&[good, bad], &out, 96.0).is_err());
        assert!(!out.exists());
    }

    fn numbers(objects: &[Object]) -> Vec<f32> {
        objects.iter().map(|o| o.as_float().unwrap()).collect()
    }

    #[test]
    fn written_pages_match_image_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let images: Vec<PathBuf> = [(1780, 1055), (3840, 2255), (333, 77)]
            .iter()
            .enumerate()
            .map(|(i, (w, h))| {
                let path = dir.path().join(format!("tab_0{}_x.png", i + 1));
                write_png(&path, *w, *h);
                path
            })
            .collect();
        let out = dir.path().join("report.pdf");

        merge_images_to_pdf(&images, &out, 96.0).unwrap();

        let doc = lopdf::Document::load(&out).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 3);

        let expected = [(1335.0, 791.25), (2880.0, 1691.25), (249.75, 57.75)];
        for (page_id, (w, h)) in pages.values().zip(expected) {
            let page = doc.get_dictionary(*page_id).unwrap();
            let media_box = numbers(page.get(b"MediaBox").unwrap().as_array().unwrap());
            assert_eq!(media_box, [0.0, 0.0, w, h]);

            let content =
                lopdf::content::Content::decode(&doc.get_page_content(*page_id).unwrap()).unwrap();
            let placed = content
                .operations
                .iter()
                .filter(|op| op.operator == "cm")
                .map(|op| numbers(&op.operands))
                .any(|m| (m[0] - w).abs() < 0.01 && (m[3] - h).abs() < 0.01);
            assert!(placed, "image on page is not scaled to {w}x{h}");
        }
    }

    #[test]
    fn merged_document_is_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let images: Vec<PathBuf> = (1..=3)
            .map(|i| {
                let path = dir.path().join(format!("tab_0{i}_x.png"));
                write_png(&path, 40 * i, 30);
                path
            })
            .collect();
        let out = dir.path().join("report.pdf");

        let specs = merge_images_to_pdf(&images, &out, 96.0).unwrap();

        assert_eq!(specs.len(), 3);
        assert_eq!(specs[2].width_pt, 90.0);
        let bytes = std::fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }
}
