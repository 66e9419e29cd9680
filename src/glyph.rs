use crate::font;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use unicode_general_category::{GeneralCategory, get_general_category};
use unicode_normalization::UnicodeNormalization;

/// Side of the square box an inline glyph image occupies, in points.
pub const GLYPH_SIZE: f32 = 14.0;
/// Baseline shift of inline glyph images; negative drops below the baseline.
pub const GLYPH_VALIGN: f32 = -2.0;

/// Renderable text: literal runs and rasterized glyph images in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Glyph(PathBuf),
}

static SEQUENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        // tag flags: black flag + tag characters
        r"\x{1F3F4}[\x{E0000}-\x{E007F}]+",
        // ZWJ joined sequences, each part with optional skin tone and selector
        r"|[^\x00-\x7F][\x{1F3FB}-\x{1F3FF}]?[\x{FE0E}\x{FE0F}]?",
        r"(?:\x{200D}[^\x00-\x7F][\x{1F3FB}-\x{1F3FF}]?[\x{FE0E}\x{FE0F}]?)+",
        // keycaps
        r"|[0-9#*]\x{FE0F}?\x{20E3}",
        // regional indicator pairs
        r"|[\x{1F1E0}-\x{1F1FF}]{2}",
        r"|[^\x00-\x7F][\x{1F3FB}-\x{1F3FF}]?\x{FE0F}?",
    ))
    .expect("glyph sequence pattern is valid")
});

const HELPER_SOURCE: &str = r#"import AppKit
import Foundation

let args = CommandLine.arguments
guard args.count >= 3 else { exit(1) }
let text = args[1]
let outPath = args[2]
let size = CGFloat(args.count >= 4 ? (Double(args[3]) ?? 64) : 64)

let attrs: [NSAttributedString.Key: Any] = [.font: NSFont.systemFont(ofSize: size)]
let line = CTLineCreateWithAttributedString(NSAttributedString(string: text, attributes: attrs))
let bounds = CTLineGetBoundsWithOptions(line, .useGlyphPathBounds)

let width = Int(ceil(bounds.width)) + 8
let height = Int(ceil(bounds.height)) + 8
guard width > 8 && height > 8 else { exit(1) }

guard let ctx = CGContext(data: nil, width: width, height: height,
    bitsPerComponent: 8, bytesPerRow: width * 4,
    space: CGColorSpaceCreateDeviceRGB(),
    bitmapInfo: CGImageAlphaInfo.premultipliedLast.rawValue) else { exit(1) }

ctx.textPosition = CGPoint(x: 4 - bounds.origin.x, y: 4 - bounds.origin.y)
CTLineDraw(line, ctx)

guard let image = ctx.makeImage() else { exit(1) }
let rep = NSBitmapImageRep(cgImage: image)
guard let png = rep.representation(using: .png, properties: [:]) else { exit(1) }
do { try png.write(to: URL(fileURLWithPath: outPath)) } catch { exit(1) }
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterizerConfig {
    /// Interpreter that runs the helper script. `None` disables rasterizing.
    pub command: Option<String>,
    pub timeout: Duration,
    pub size_px: u32,
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        let command = if cfg!(target_os = "macos") {
            Some("swift".to_string())
        } else {
            None
        };
        Self {
            command,
            timeout: Duration::from_secs(15),
            size_px: 64,
        }
    }
}

/// Turns a character sequence into a small PNG.
pub trait GlyphRasterizer: Send + Sync {
    /// One-time setup inside the renderer's private directory.
    fn prepare(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    fn rasterize(&self, sequence: &str, output: &Path) -> io::Result<()>;
}

/// Runs the CoreText helper script through an external interpreter.
pub struct HelperRasterizer {
    program: String,
    timeout: Duration,
    size_px: u32,
    script: OnceLock<PathBuf>,
}

impl HelperRasterizer {
    pub fn new(program: impl Into<String>, timeout: Duration, size_px: u32) -> Self {
        Self {
            program: program.into(),
            timeout,
            size_px,
            script: OnceLock::new(),
        }
    }
}

impl GlyphRasterizer for HelperRasterizer {
    fn prepare(&self, dir: &Path) -> io::Result<()> {
        let path = dir.join("render_glyph.swift");
        fs::write(&path, HELPER_SOURCE)?;
        let _ = self.script.set(path);
        Ok(())
    }

    fn rasterize(&self, sequence: &str, output: &Path) -> io::Result<()> {
        let script = self
            .script
            .get()
            .ok_or_else(|| io::Error::other("helper script not prepared"))?;
        let mut child = Command::new(&self.program)
            .arg(script)
            .arg(sequence)
            .arg(output)
            .arg(self.size_px.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() && output.exists() {
                    return Ok(());
                }
                return Err(io::Error::other(format!("helper exited with {status}")));
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("helper timed out after {:?}", self.timeout),
                ));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

#[derive(Default)]
struct CacheState {
    dir: Option<PathBuf>,
    init_failed: bool,
    images: HashMap<String, Option<PathBuf>>,
}

/// Replaces characters the standard fonts cannot draw with cached glyph
/// images.
///
/// Build one per process and share it; the cache and its scratch directory
/// live as long as the renderer and are never invalidated.
pub struct GlyphFallbackRenderer {
    rasterizer: Option<Box<dyn GlyphRasterizer>>,
    state: Mutex<CacheState>,
}

impl GlyphFallbackRenderer {
    pub fn new(config: &RasterizerConfig) -> Self {
        let rasterizer = config.command.as_ref().map(|program| {
            Box::new(HelperRasterizer::new(
                program.clone(),
                config.timeout,
                config.size_px,
            )) as Box<dyn GlyphRasterizer>
        });
        Self::with_rasterizer(rasterizer)
    }

    pub fn with_rasterizer(rasterizer: Option<Box<dyn GlyphRasterizer>>) -> Self {
        Self {
            rasterizer,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Renderer that drops every unsupported glyph.
    pub fn disabled() -> Self {
        Self::with_rasterizer(None)
    }

    /// Creates the scratch directory and prepares the rasterizer. Safe to call
    /// repeatedly; returns the directory when rasterizing is available.
    pub fn ensure_initialized(&self) -> Option<PathBuf> {
        let rasterizer = self.rasterizer.as_ref()?;
        let mut state = self.state.lock().ok()?;
        if let Some(dir) = &state.dir {
            return Some(dir.clone());
        }
        if state.init_failed {
            return None;
        }
        let prepared = tempfile::Builder::new()
            .prefix("glyph_render_")
            .tempdir()
            .map(|dir| dir.keep())
            .and_then(|dir| rasterizer.prepare(&dir).map(|_| dir));
        match prepared {
            Ok(dir) => {
                debug!("glyph cache directory: {}", dir.display());
                state.dir = Some(dir.clone());
                Some(dir)
            }
            Err(err) => {
                warn!("Warning: glyph rasterizer unavailable: {err}");
                state.init_failed = true;
                None
            }
        }
    }

    /// Splits `text` into literal runs and glyph images.
    pub fn process(&self, text: &str) -> Vec<Inline> {
        let mut out: Vec<Inline> = Vec::new();
        let mut last_end = 0;
        for m in SEQUENCE_RE.find_iter(text) {
            if m.start() > last_end {
                push_literal(&mut out, &text[last_end..m.start()]);
            }
            last_end = m.end();
            let seq = m.as_str();
            match classify(seq) {
                Classified::Literal(literal) => push_literal(&mut out, &literal),
                Classified::Raster => {
                    if let Some(path) = self.render(seq) {
                        out.push(Inline::Glyph(path));
                    }
                }
            }
        }
        if last_end < text.len() {
            push_literal(&mut out, &text[last_end..]);
        }
        out
    }

    /// Cached rasterization; failures are cached too and yield `None`.
    fn render(&self, sequence: &str) -> Option<PathBuf> {
        if let Ok(state) = self.state.lock() {
            if let Some(cached) = state.images.get(sequence) {
                return cached.clone();
            }
        }
        let rendered = self.rasterize_uncached(sequence);
        if let Ok(mut state) = self.state.lock() {
            state.images.insert(sequence.to_string(), rendered.clone());
        }
        rendered
    }

    fn rasterize_uncached(&self, sequence: &str) -> Option<PathBuf> {
        let dir = self.ensure_initialized()?;
        let rasterizer = self.rasterizer.as_ref()?;
        let digest = Sha256::digest(sequence.as_bytes());
        let name: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        let output = dir.join(format!("glyph_{name}.png"));
        match rasterizer.rasterize(sequence, &output) {
            Ok(()) => Some(output),
            Err(err) => {
                debug!("could not rasterize {sequence:?}: {err}");
                None
            }
        }
    }

}

enum Classified {
    Literal(String),
    Raster,
}

// Greek alpha..omega in code order; the capital block has a hole where
// final sigma sits in the small block.
const GREEK_NAMES: [&str; 25] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
    "lamda", "mu", "nu", "xi", "omicron", "pi", "rho", "final sigma", "sigma", "tau", "upsilon",
    "phi", "chi", "psi", "omega",
];

fn greek_name(ch: char) -> Option<&'static str> {
    let code = ch as u32;
    let index = match code {
        0x0391..=0x03A9 => code - 0x0391,
        0x03B1..=0x03C9 => code - 0x03B1,
        _ => {
            return match ch {
                '\u{2207}' => Some("nabla"),
                '\u{2202}' => Some("partial differential"),
                _ => None,
            };
        }
    };
    GREEK_NAMES.get(index as usize).copied()
}

/// Maps a mathematical alphanumeric symbol to plain text: styled Latin
/// letters and digits to themselves, styled Greek to the letter's name.
fn plain_math(ch: char) -> Option<String> {
    if !(0x1D400..=0x1D7FF).contains(&(ch as u32)) {
        return None;
    }
    let mut decomposed = std::iter::once(ch).nfkd();
    let plain = decomposed.next()?;
    if decomposed.next().is_some() {
        return None;
    }
    if font::supports_char(plain) {
        return Some(plain.to_string());
    }
    greek_name(plain).map(str::to_string)
}

/// Text the standard fonts can draw in place of `ch`, if any. Marks and
/// format characters vanish, other spaces become plain ones, and accented
/// letters outside WinAnsi fall back to their base letter.
fn literal_form(ch: char) -> Option<String> {
    if font::supports_char(ch) {
        return Some(ch.to_string());
    }
    if (ch as u32) > 0xFFFF {
        return None;
    }
    match get_general_category(ch) {
        GeneralCategory::Control
        | GeneralCategory::Format
        | GeneralCategory::NonspacingMark
        | GeneralCategory::SpacingMark
        | GeneralCategory::EnclosingMark => Some(String::new()),
        GeneralCategory::SpaceSeparator
        | GeneralCategory::LineSeparator
        | GeneralCategory::ParagraphSeparator => Some(" ".to_string()),
        _ => base_letter(ch).map(|base| base.to_string()),
    }
}

fn base_letter(ch: char) -> Option<char> {
    let mut decomposed = std::iter::once(ch).nfkd();
    let base = decomposed.next()?;
    let marks_only = decomposed.all(|c| {
        matches!(
            get_general_category(c),
            GeneralCategory::NonspacingMark
                | GeneralCategory::SpacingMark
                | GeneralCategory::EnclosingMark
        )
    });
    (base != ch && marks_only && font::supports_char(base)).then_some(base)
}

/// Everything the fonts cannot draw and that has no plain stand-in is
/// rasterized, letters from other scripts included.
fn classify(seq: &str) -> Classified {
    let mut chars = seq.chars();
    let Some(first) = chars.next() else {
        return Classified::Literal(String::new());
    };
    let rest: Vec<char> = chars.collect();
    if rest.is_empty() {
        if let Some(literal) = literal_form(first) {
            return Classified::Literal(literal);
        }
    }
    if rest.iter().all(|c| matches!(c, '\u{FE0E}' | '\u{FE0F}')) {
        if let Some(plain) = plain_math(first) {
            return Classified::Literal(plain);
        }
    }
    Classified::Raster
}

fn push_literal(out: &mut Vec<Inline>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Inline::Text(last)) = out.last_mut() {
        last.push_str(text);
        return;
    }
    out.push(Inline::Text(text.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRasterizer {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl GlyphRasterizer for FakeRasterizer {
        fn rasterize(&self, _sequence: &str, output: &Path) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(io::Error::other("no helper"));
            }
            fs::write(output, b"png")
        }
    }

    fn fake(fail: bool) -> (GlyphFallbackRenderer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = GlyphFallbackRenderer::with_rasterizer(Some(Box::new(FakeRasterizer {
            calls: calls.clone(),
            fail,
        })));
        (renderer, calls)
    }

    fn glyph_count(inlines: &[Inline]) -> usize {
        inlines
            .iter()
            .filter(|i| matches!(i, Inline::Glyph(_)))
            .count()
    }

    #[test]
    fn supported_text_passes_through_unchanged() {
        let renderer = GlyphFallbackRenderer::disabled();
        let text = "Fish & chips <b> café — “quoted”";
        let inlines = renderer.process(text);
        assert_eq!(inlines, vec![Inline::Text(text.to_string())]);
    }

    #[test]
    fn letters_outside_win_ansi_are_rasterized() {
        let (renderer, calls) = fake(false);
        let inlines = renderer.process("Ωmega да");
        assert_eq!(glyph_count(&inlines), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(inlines[1], Inline::Text("mega ".to_string()));
    }

    #[test]
    fn accented_letters_fall_back_to_their_base_letter() {
        let renderer = GlyphFallbackRenderer::disabled();
        // o with double acute, zero width space, em space
        assert_eq!(
            renderer.process("Erd\u{151}s\u{200B}a\u{2003}b"),
            vec![Inline::Text("Erdosa b".to_string())]
        );
    }

    #[test]
    fn math_styled_greek_becomes_letter_names() {
        let (renderer, calls) = fake(false);
        // bold capital alpha, italic small pi, bold nabla
        let inlines = renderer.process("\u{1D6A8} \u{1D70B} \u{1D6C1}");
        assert_eq!(inlines, vec![Inline::Text("alpha pi nabla".to_string())]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn math_styled_letters_map_to_ascii() {
        let renderer = GlyphFallbackRenderer::disabled();
        // bold capital H, italic small i, bold digit seven
        let inlines = renderer.process("\u{1D407}\u{1D456} \u{1D7D5}");
        assert_eq!(inlines, vec![Inline::Text("Hi 7".to_string())]);
    }

    #[test]
    fn emoji_are_rasterized_once_per_sequence() {
        let (renderer, calls) = fake(false);
        let inlines = renderer.process("a \u{1F600} b \u{1F600} c");
        assert_eq!(glyph_count(&inlines), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second use hits the cache");
        assert_eq!(inlines[0], Inline::Text("a ".to_string()));
        assert!(renderer.ensure_initialized().is_some());
    }

    #[test]
    fn joined_sequences_are_atomic() {
        let (renderer, calls) = fake(false);
        // family: man ZWJ woman ZWJ girl
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";
        // flag: regional indicators U and S
        let flag = "\u{1F1FA}\u{1F1F8}";
        let keycap = "1\u{FE0F}\u{20E3}";
        let inlines = renderer.process(&format!("{family}{flag}{keycap}"));
        assert_eq!(glyph_count(&inlines), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failed_rasterization_drops_the_glyph_silently() {
        let (renderer, calls) = fake(true);
        let inlines = renderer.process("ok \u{2764}\u{FE0F} \u{2764}\u{FE0F}");
        assert_eq!(inlines, vec![Inline::Text("ok  ".to_string())]);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "failures are cached");
    }

    #[test]
    fn disabled_renderer_omits_symbols() {
        let renderer = GlyphFallbackRenderer::disabled();
        assert_eq!(
            renderer.process("x\u{2713}y"),
            vec![Inline::Text("xy".to_string())]
        );
        assert!(renderer.ensure_initialized().is_none());
    }
}
