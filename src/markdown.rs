//! Assistant Markdown to an HTML fragment that is safe to inject.
//!
//! Input is escaped before any markup is produced, so every tag in the output
//! comes from one of the passes below. Code is lifted out early into a stash
//! and put back last, which keeps later passes from rewriting it.

use lazy_static::lazy_static;
use regex::{ Captures, Regex };

lazy_static! {
    static ref FENCED_CODE: Regex = Regex::new(r"```(\w*)\n?([\s\S]*?)```").unwrap();
    static ref INLINE_CODE: Regex = Regex::new(r"`([^`\n]+)`").unwrap();
    static ref BOLD_STARS: Regex = Regex::new(r"\*\*(.+?)\*\*").unwrap();
    static ref BOLD_UNDERSCORES: Regex = Regex::new(r"\b__(.+?)__\b").unwrap();
    static ref ITALIC_STAR: Regex = Regex::new(r"\*([^\s*](?:[^*\n]*?[^\s*])?)\*").unwrap();
    static ref ITALIC_UNDERSCORE: Regex = Regex::new(r"\b_([^\s_](?:[^_\n]*?[^\s_])?)_\b").unwrap();
    static ref H3: Regex = Regex::new(r"(?m)^### (.+)$").unwrap();
    static ref H2: Regex = Regex::new(r"(?m)^## (.+)$").unwrap();
    static ref H1: Regex = Regex::new(r"(?m)^# (.+)$").unwrap();
    static ref BLOCKQUOTE: Regex = Regex::new(r"(?m)^&gt; (.+)$").unwrap();
    static ref RULE: Regex = Regex::new(r"(?m)^-{3,}[ \t]*$").unwrap();
    static ref UNORDERED_ITEM: Regex = Regex::new(r"^[-*+] (.+)$").unwrap();
    static ref ORDERED_ITEM: Regex = Regex::new(r"^\d+\. (.+)$").unwrap();
    static ref LINK: Regex = Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap();
    static ref URL_SCHEME: Regex = Regex::new(r"^([a-zA-Z][a-zA-Z0-9+.\-]*):").unwrap();
    static ref PLACEHOLDER: Regex = Regex::new(r"\x00([BIU])(\d+)\x00").unwrap();
}

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

const BLOCK_PREFIXES: [&str; 9] = [
    "<h1>",
    "<h2>",
    "<h3>",
    "<blockquote>",
    "<hr>",
    "<ul>",
    "<ol>",
    "<div",
    "\u{0}B",
];

/// Rendered code and raw link targets lifted out of the text while the other passes run.
#[derive(Default)]
struct Stash {
    blocks: Vec<String>,
    inline: Vec<String>,
    urls: Vec<String>,
}

impl Stash {
    fn block(&mut self, html: String) -> String {
        self.blocks.push(html);
        format!("\u{0}B{}\u{0}", self.blocks.len() - 1)
    }

    fn inline(&mut self, html: String) -> String {
        self.inline.push(html);
        format!("\u{0}I{}\u{0}", self.inline.len() - 1)
    }

    fn url(&mut self, url: &str) -> String {
        self.urls.push(url.to_string());
        format!("\u{0}U{}\u{0}", self.urls.len() - 1)
    }

    fn slot(&self, kind: &str, index: &str) -> Option<&String> {
        let index: usize = index.parse().ok()?;
        match kind {
            "B" => self.blocks.get(index),
            "I" => self.inline.get(index),
            _ => self.urls.get(index),
        }
    }

    fn restore(&self, text: &str) -> String {
        PLACEHOLDER.replace_all(text, |caps: &Captures| {
            self.slot(&caps[1], &caps[2]).cloned().unwrap_or_default()
        }).into_owned()
    }
}

type Pass = fn(&str, &mut Stash) -> String;

/// Applied in order after escaping.
const PASSES: [(&str, Pass); 10] = [
    ("fenced_code", fenced_code),
    ("inline_code", inline_code),
    ("link_targets", link_targets),
    ("emphasis", emphasis),
    ("headers", headers),
    ("blockquotes", blockquotes),
    ("horizontal_rules", horizontal_rules),
    ("lists", lists),
    ("links", links),
    ("paragraphs", paragraphs),
];

/// Renders assistant text. Empty or whitespace-only input yields an empty string.
pub fn render(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n").replace('\0', "");
    let mut stash = Stash::default();
    let mut text = escape_html(&normalized);
    for (_name, pass) in PASSES.iter() {
        text = pass(&text, &mut stash);
    }
    stash.restore(&text)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn fenced_code(text: &str, stash: &mut Stash) -> String {
    FENCED_CODE.replace_all(text, |caps: &Captures| {
        let index = stash.blocks.len();
        let lang = if caps[1].is_empty() { "code" } else { &caps[1] };
        let code = caps[2].trim_end_matches('\n');
        let html = format!(
            "<div class=\"code-block\"><div class=\"code-header\"><span class=\"code-lang\">{lang}</span><button class=\"btn-copy-code\" data-target=\"code-block-{index}\">Copy</button></div><pre id=\"code-block-{index}\"><code>{code}</code></pre></div>"
        );
        format!("\n\n{}\n\n", stash.block(html))
    }).into_owned()
}

fn inline_code(text: &str, stash: &mut Stash) -> String {
    INLINE_CODE.replace_all(text, |caps: &Captures| {
        stash.inline(format!("<code>{}</code>", &caps[1]))
    }).into_owned()
}

/// Keeps `_` and `*` inside URLs away from the emphasis pass until `links` runs.
fn link_targets(text: &str, stash: &mut Stash) -> String {
    LINK.replace_all(text, |caps: &Captures| {
        format!("[{}]({})", &caps[1], stash.url(&caps[2]))
    }).into_owned()
}

fn emphasis(text: &str, _stash: &mut Stash) -> String {
    let text = BOLD_STARS.replace_all(text, "<strong>$1</strong>");
    let text = BOLD_UNDERSCORES.replace_all(&text, "<strong>$1</strong>");
    let text = ITALIC_STAR.replace_all(&text, "<em>$1</em>");
    ITALIC_UNDERSCORE.replace_all(&text, "<em>$1</em>").into_owned()
}

fn headers(text: &str, _stash: &mut Stash) -> String {
    let text = H3.replace_all(text, "<h3>$1</h3>");
    let text = H2.replace_all(&text, "<h2>$1</h2>");
    H1.replace_all(&text, "<h1>$1</h1>").into_owned()
}

fn blockquotes(text: &str, _stash: &mut Stash) -> String {
    BLOCKQUOTE.replace_all(text, "<blockquote>$1</blockquote>").into_owned()
}

fn horizontal_rules(text: &str, _stash: &mut Stash) -> String {
    RULE.replace_all(text, "<hr>").into_owned()
}

#[derive(Clone, Copy, PartialEq)]
enum ListKind {
    Unordered,
    Ordered,
}

fn flush_list(out: &mut Vec<String>, kind: Option<ListKind>, items: &mut Vec<String>) {
    let tag = match kind {
        Some(ListKind::Unordered) => "ul",
        Some(ListKind::Ordered) => "ol",
        None => return,
    };
    let body: String = items.drain(..).map(|item| format!("<li>{}</li>", item)).collect();
    out.push(format!("<{tag}>{body}</{tag}>"));
}

fn lists(text: &str, _stash: &mut Stash) -> String {
    let mut out = Vec::new();
    let mut kind: Option<ListKind> = None;
    let mut items = Vec::new();

    for line in text.split('\n') {
        let item = if let Some(caps) = UNORDERED_ITEM.captures(line) {
            Some((ListKind::Unordered, caps[1].to_string()))
        } else {
            ORDERED_ITEM.captures(line).map(|caps| (ListKind::Ordered, caps[1].to_string()))
        };

        match item {
            Some((item_kind, content)) => {
                if kind != Some(item_kind) {
                    flush_list(&mut out, kind, &mut items);
                    kind = Some(item_kind);
                }
                items.push(content);
            }
            None => {
                flush_list(&mut out, kind.take(), &mut items);
                out.push(line.to_string());
            }
        }
    }
    flush_list(&mut out, kind, &mut items);

    out.join("\n")
}

fn is_safe_url(url: &str) -> bool {
    match URL_SCHEME.captures(url) {
        Some(caps) => {
            let scheme = caps[1].to_ascii_lowercase();
            ALLOWED_SCHEMES.contains(&scheme.as_str())
        }
        None => true,
    }
}

fn links(text: &str, stash: &mut Stash) -> String {
    LINK.replace_all(text, |caps: &Captures| {
        let label = &caps[1];
        let url = stash.restore(&caps[2]);
        if is_safe_url(&url) {
            format!("<a href=\"{url}\" target=\"_blank\" rel=\"noopener noreferrer\">{label}</a>")
        } else {
            label.to_string()
        }
    }).into_owned()
}

fn is_block_line(line: &str) -> bool {
    BLOCK_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

fn flush_paragraph(run: &mut Vec<&str>, out: &mut Vec<String>) {
    if !run.is_empty() {
        out.push(format!("<p>{}</p>", run.join("<br>")));
        run.clear();
    }
}

fn paragraphs(text: &str, _stash: &mut Stash) -> String {
    let mut out = Vec::new();
    let mut run: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            flush_paragraph(&mut run, &mut out);
        } else if is_block_line(line) {
            flush_paragraph(&mut run, &mut out);
            out.push(line.to_string());
        } else {
            run.push(line);
        }
    }
    flush_paragraph(&mut run, &mut out);

    out.join("\n")
}
