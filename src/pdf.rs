use crate::canvas::{Command, Document};
use crate::error::Result;
use crate::font::{BuiltinFont, encode_win_ansi};
use crate::types::{Pt, Rect};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat, dictionary};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const PRODUCER: &str = "postbook";

/// Writes `document` to `path` as a PDF with `title` in its info dictionary.
pub fn write_pdf(document: &Document, title: &str, path: &Path) -> Result<()> {
    let mut pdf = build_pdf(document, title)?;
    pdf.save(path)?;
    debug!("wrote {} pages to {}", document.page_count(), path.display());
    Ok(())
}

pub fn document_to_pdf(document: &Document, title: &str) -> Result<Vec<u8>> {
    let mut pdf = build_pdf(document, title)?;
    let mut bytes = Vec::new();
    pdf.save_to(&mut bytes)?;
    Ok(bytes)
}

/// Builds the object graph: one shared resource dictionary with the two
/// built-in fonts and every embeddable image, one content stream per page,
/// and link annotations resolved against the anchors on all pages.
pub fn build_pdf(document: &Document, title: &str) -> Result<lopdf::Document> {
    let mut pdf = lopdf::Document::with_version("1.7");
    let pages_id = pdf.new_object_id();
    let resources_id = pdf.new_object_id();
    let page_ids: Vec<ObjectId> = document.pages.iter().map(|_| pdf.new_object_id()).collect();

    let page_width = document.page_size.width.to_f32();
    let page_height = document.page_size.height.to_f32();

    let mut fonts = Dictionary::new();
    for font in BuiltinFont::ALL {
        let font_id = pdf.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(font.resource_key(), font_id);
    }

    let anchors = collect_anchors(document);
    let mut images = ImageRegistry::default();

    for (page, &page_id) in document.pages.iter().zip(&page_ids) {
        let mut writer = PageWriter::new(page_height);
        let mut annots: Vec<Object> = Vec::new();
        for command in &page.commands {
            match command {
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    path,
                } => {
                    if let Some(name) = images.ensure(&mut pdf, path) {
                        writer.draw_image(&name, *x, *y, *width, *height);
                    }
                }
                Command::Link { rect, target } => match anchors.get(target.as_str()) {
                    Some(&(index, top)) => {
                        let dest = vec![
                            Object::Reference(page_ids[index]),
                            "FitH".into(),
                            (page_height - top.to_f32()).into(),
                        ];
                        let annot_id =
                            pdf.add_object(link_annotation(*rect, dest, page_height));
                        annots.push(annot_id.into());
                    }
                    None => debug!("link target '{target}' has no anchor"),
                },
                other => writer.apply(other),
            }
        }

        let content = Content {
            operations: writer.finish(),
        };
        let content_id = pdf.add_object(Stream::new(dictionary! {}, content.encode()?));
        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), page_width.into(), page_height.into()],
            "Contents" => content_id,
            "Resources" => resources_id,
        };
        if !annots.is_empty() {
            page_dict.set("Annots", annots);
        }
        pdf.objects.insert(page_id, Object::Dictionary(page_dict));
    }

    let mut resources = dictionary! { "Font" => fonts };
    if !images.xobjects.is_empty() {
        resources.set("XObject", images.xobjects);
    }
    pdf.objects
        .insert(resources_id, Object::Dictionary(resources));

    let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let catalog_id = pdf.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    pdf.trailer.set("Root", catalog_id);
    let info_id = pdf.add_object(dictionary! {
        "Title" => text_string(title),
        "Producer" => Object::string_literal(PRODUCER),
    });
    pdf.trailer.set("Info", info_id);

    pdf.compress();
    Ok(pdf)
}

/// First occurrence of each anchor: page index and y-down top edge.
fn collect_anchors(document: &Document) -> HashMap<&str, (usize, Pt)> {
    let mut anchors = HashMap::new();
    for (index, page) in document.pages.iter().enumerate() {
        for command in &page.commands {
            if let Command::Anchor { name, y, .. } = command {
                anchors.entry(name.as_str()).or_insert((index, *y));
            }
        }
    }
    anchors
}

fn link_annotation(rect: Rect, dest: Vec<Object>, page_height: f32) -> Dictionary {
    let x0 = rect.x.to_f32();
    let x1 = (rect.x + rect.width).to_f32();
    let y0 = page_height - (rect.y + rect.height).to_f32();
    let y1 = page_height - rect.y.to_f32();
    dictionary! {
        "Type" => "Annot",
        "Subtype" => "Link",
        "Rect" => vec![x0.into(), y0.into(), x1.into(), y1.into()],
        "Border" => vec![0.into(), 0.into(), 0.into()],
        "Dest" => dest,
    }
}

/// PDF text string: literal for ASCII, UTF-16BE with a byte-order mark
/// otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TextState {
    font: BuiltinFont,
    font_size: Pt,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: BuiltinFont::Helvetica,
            font_size: Pt::from_f32(12.0),
        }
    }
}

/// Translates canvas commands into content-stream operators, flipping y.
struct PageWriter {
    page_height: f32,
    operations: Vec<Operation>,
    state: TextState,
    saved: Vec<TextState>,
}

impl PageWriter {
    fn new(page_height: f32) -> Self {
        Self {
            page_height,
            operations: Vec::new(),
            state: TextState::default(),
            saved: Vec::new(),
        }
    }

    fn op(&mut self, operator: &str, operands: Vec<Object>) {
        self.operations.push(Operation::new(operator, operands));
    }

    fn apply(&mut self, command: &Command) {
        match command {
            Command::SaveState => {
                self.saved.push(self.state);
                self.op("q", vec![]);
            }
            Command::RestoreState => {
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                    self.op("Q", vec![]);
                }
            }
            Command::SetFillColor(color) => {
                self.op("rg", vec![color.r.into(), color.g.into(), color.b.into()]);
            }
            Command::SetFont(font) => self.state.font = *font,
            Command::SetFontSize(size) => self.state.font_size = *size,
            Command::DrawString { x, y, text } => self.draw_string(*x, *y, text),
            Command::DrawImage { .. }
            | Command::Anchor { .. }
            | Command::Link { .. }
            | Command::Meta { .. } => {}
        }
    }

    fn draw_string(&mut self, x: Pt, y: Pt, text: &str) {
        if text.is_empty() {
            return;
        }
        let TextState { font, font_size } = self.state;
        self.op("BT", vec![]);
        self.op(
            "Tf",
            vec![font.resource_key().into(), font_size.to_f32().into()],
        );
        self.op(
            "Td",
            vec![x.to_f32().into(), (self.page_height - y.to_f32()).into()],
        );
        self.op(
            "Tj",
            vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
        );
        self.op("ET", vec![]);
    }

    fn draw_image(&mut self, name: &str, x: Pt, y: Pt, width: Pt, height: Pt) {
        let bottom = self.page_height - (y + height).to_f32();
        self.op("q", vec![]);
        self.op(
            "cm",
            vec![
                width.to_f32().into(),
                0.into(),
                0.into(),
                height.to_f32().into(),
                x.to_f32().into(),
                bottom.into(),
            ],
        );
        self.op("Do", vec![Object::Name(name.as_bytes().to_vec())]);
        self.op("Q", vec![]);
    }

    fn finish(self) -> Vec<Operation> {
        self.operations
    }
}

/// Image XObjects keyed by source path. A file that cannot be decoded is
/// remembered as missing and its draws are skipped.
#[derive(Default)]
struct ImageRegistry {
    names: HashMap<PathBuf, Option<String>>,
    xobjects: Dictionary,
}

impl ImageRegistry {
    fn ensure(&mut self, pdf: &mut lopdf::Document, path: &Path) -> Option<String> {
        if let Some(known) = self.names.get(path) {
            return known.clone();
        }
        let name = match load_image(path) {
            Ok(image) => {
                let name = format!("Im{}", self.xobjects.len() + 1);
                let smask = image
                    .alpha
                    .map(|alpha| pdf.add_object(alpha_stream(image.width, image.height, alpha)));
                let mut dict = dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => image.width as i64,
                    "Height" => image.height as i64,
                    "ColorSpace" => image.color_space,
                    "BitsPerComponent" => 8,
                };
                if let Some(smask) = smask {
                    dict.set("SMask", smask);
                }
                let stream = match image.encoding {
                    ImageEncoding::Jpeg => {
                        dict.set("Filter", "DCTDecode");
                        Stream::new(dict, image.data).with_compression(false)
                    }
                    ImageEncoding::Raw => Stream::new(dict, image.data),
                };
                let id = pdf.add_object(stream);
                self.xobjects.set(name.as_str(), id);
                Some(name)
            }
            Err(err) => {
                warn!("Warning: Could not embed image {}: {err}", path.display());
                None
            }
        };
        self.names.insert(path.to_path_buf(), name.clone());
        name
    }
}

enum ImageEncoding {
    /// Original JPEG bytes passed through.
    Jpeg,
    /// Uncompressed samples; compressed with the rest of the document.
    Raw,
}

struct ImageData {
    width: u32,
    height: u32,
    color_space: &'static str,
    encoding: ImageEncoding,
    data: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

fn load_image(path: &Path) -> Result<ImageData> {
    let bytes = std::fs::read(path)?;
    let decoded = image::load_from_memory(&bytes)?;
    let (width, height) = (decoded.width(), decoded.height());
    let is_jpeg = matches!(image::guess_format(&bytes), Ok(image::ImageFormat::Jpeg));

    // The decoder converts CMYK to RGB, so the stored component count decides
    // whether the original stream can be embedded as is.
    let passthrough = if is_jpeg {
        match jpeg_components(&bytes) {
            Some(1) => Some("DeviceGray"),
            Some(3) => Some("DeviceRGB"),
            _ => None,
        }
    } else {
        None
    };
    if let Some(color_space) = passthrough {
        return Ok(ImageData {
            width,
            height,
            color_space,
            encoding: ImageEncoding::Jpeg,
            data: bytes,
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    let mut alpha = Vec::with_capacity(width as usize * height as usize);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }
    let has_alpha = alpha.iter().any(|&a| a != u8::MAX);
    Ok(ImageData {
        width,
        height,
        color_space: "DeviceRGB",
        encoding: ImageEncoding::Raw,
        data: rgb,
        alpha: has_alpha.then_some(alpha),
    })
}

/// Component count from the JPEG frame header, if one is found.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        match marker {
            0xFF => {
                pos += 1;
                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_frame = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            // length(2) precision(1) height(2) width(2) components(1)
            return bytes.get(pos + 9).copied();
        }
        pos += 2 + len;
    }
    None
}

fn alpha_stream(width: u32, height: u32, alpha: Vec<u8>) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        alpha,
    )
}

/// Text drawn on one page, in content order. Used to inspect written files.
pub fn page_strings(pdf: &lopdf::Document, page_id: ObjectId) -> Result<Vec<Vec<u8>>> {
    let content = Content::decode(&pdf.get_page_content(page_id)?)?;
    Ok(content
        .operations
        .into_iter()
        .filter(|op| op.operator == "Tj")
        .filter_map(|op| match op.operands.into_iter().next() {
            Some(Object::String(bytes, _)) => Some(bytes),
            _ => None,
        })
        .collect())
}
