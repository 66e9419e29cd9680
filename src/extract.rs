use crate::post::ContentBlock;
use kuchiki::iter::NodeEdge;
use kuchiki::traits::TendrilSink;
use once_cell::sync::Lazy;
use regex::Regex;

// Publication chrome removed before parsing. Each pattern is bounded by the
// nearest closing tag(s) of its container.
static CHROME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?s)<div[^>]*class="[^"]*subscription-widget[^"]*"[^>]*>.*?</div>\s*</div>\s*</div>"#,
        r#"(?s)<form[^>]*class="[^"]*subscription[^"]*"[^>]*>.*?</form>"#,
        r#"(?s)<div[^>]*class="[^"]*(?:preamble|paywall|subscribe-widget)[^"]*"[^>]*>.*?</div>"#,
        r#"(?s)<div[^>]*class="[^"]*button-wrapper[^"]*"[^>]*>.*?</div>"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("chrome pattern is valid"))
    .collect()
});

const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "form", "template"];
const CHROME_CLASS_MARKERS: &[&str] = &["subscription-widget", "paywall", "preamble"];

pub const DEFAULT_FOOTER_MARKERS: &[&str] = &[
    "PreviousNext",
    "Discussion about this post",
    "CommentsRestacks",
    "Ready for more?",
    "TopLatestDiscussions",
];

/// Trailing page-navigation text cut from the last text block.
#[derive(Debug, Clone, PartialEq)]
pub struct FooterRule {
    /// Checked in order; the first marker found wins.
    pub markers: Vec<String>,
    /// Only this final share of the block's characters is searched.
    pub tail_fraction: f64,
}

impl Default for FooterRule {
    fn default() -> Self {
        Self {
            markers: DEFAULT_FOOTER_MARKERS.iter().map(|m| m.to_string()).collect(),
            tail_fraction: 0.15,
        }
    }
}

impl FooterRule {
    /// Returns `text` cut at the first marker found in its tail, if any.
    pub fn strip<'a>(&self, text: &'a str) -> &'a str {
        let char_count = text.chars().count();
        let keep = ((char_count as f64) * (1.0 - self.tail_fraction)).floor() as usize;
        let start = text
            .char_indices()
            .nth(keep)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        for marker in &self.markers {
            if let Some(pos) = text[start..].find(marker.as_str()) {
                return text[..start + pos].trim_end();
            }
        }
        text
    }
}

/// Turns post body markup into ordered text and image blocks.
///
/// Image blocks carry the `src` attribute unchanged; the fetcher replaces it
/// with a staged local path.
#[derive(Debug, Clone, Default)]
pub struct HtmlContentExtractor {
    footer: FooterRule,
}

impl HtmlContentExtractor {
    pub fn new(footer: FooterRule) -> Self {
        Self { footer }
    }

    pub fn extract(&self, markup: &str) -> Vec<ContentBlock> {
        let cleaned = strip_chrome(markup);
        let document = kuchiki::parse_html().one(cleaned);

        let mut blocks = Vec::new();
        let mut buf = String::new();
        let mut skip = 0usize;
        for edge in document.traverse() {
            match edge {
                NodeEdge::Start(node) => {
                    if let Some(element) = node.as_element() {
                        let tag: &str = &element.name.local;
                        let attrs = element.attributes.borrow();
                        if skip > 0 || is_skipped(tag, attrs.get("class")) {
                            skip += 1;
                            continue;
                        }
                        match tag {
                            "img" => {
                                let src = attrs.get("src").unwrap_or("").trim();
                                if !src.is_empty() && !src.starts_with("data:") {
                                    flush_text(&mut buf, &mut blocks);
                                    blocks.push(ContentBlock::image(src));
                                }
                            }
                            "br" => buf.push('\n'),
                            "p" | "h1" | "h2" | "h3" | "h4" => buf.push_str("\n\n"),
                            _ => {}
                        }
                    } else if skip == 0 {
                        if let Some(text) = node.as_text() {
                            buf.push_str(&text.borrow());
                        }
                    }
                }
                NodeEdge::End(node) => {
                    let Some(element) = node.as_element() else {
                        continue;
                    };
                    if skip > 0 {
                        skip -= 1;
                        continue;
                    }
                    let tag: &str = &element.name.local;
                    if matches!(tag, "p" | "div" | "li" | "h1" | "h2" | "h3" | "h4") {
                        buf.push('\n');
                    }
                }
            }
        }
        flush_text(&mut buf, &mut blocks);
        self.strip_footer(&mut blocks);
        blocks
    }

    fn strip_footer(&self, blocks: &mut Vec<ContentBlock>) {
        let Some(idx) = blocks.iter().rposition(|b| b.as_text().is_some()) else {
            return;
        };
        let Some(text) = blocks[idx].as_text() else {
            return;
        };
        let stripped = self.footer.strip(text);
        if stripped.is_empty() {
            blocks.remove(idx);
        } else if stripped.len() != text.len() {
            blocks[idx] = ContentBlock::text(stripped);
        }
    }
}

pub fn strip_chrome(markup: &str) -> String {
    CHROME_PATTERNS
        .iter()
        .fold(markup.to_string(), |html, re| re.replace_all(&html, "").into_owned())
}

fn is_skipped(tag: &str, class: Option<&str>) -> bool {
    if SKIP_TAGS.contains(&tag) {
        return true;
    }
    tag == "div"
        && class.is_some_and(|class| CHROME_CLASS_MARKERS.iter().any(|m| class.contains(m)))
}

fn flush_text(buf: &mut String, blocks: &mut Vec<ContentBlock>) {
    let text = buf.trim();
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }
    buf.clear();
}
