//! Markdown to HTML conversion.
//!
//! The output is trusted and embedded unescaped, so raw HTML in articles
//! (custom classes on code blocks, figures, ...) survives.

use std::{borrow::Cow, collections::HashSet, sync::LazyLock};

use pulldown_cmark::{
    CowStr, Event, HeadingLevel, LinkType, Options, Parser, Tag, TagEnd, html::push_html,
};
use regex::{Captures, Regex};

static LATEX_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\$+(.+?)\$+").expect("valid latex span pattern"));

static AROUND_EQUALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*=\s*").expect("valid equals pattern"));

static BARE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'()\[\]]+"#).expect("valid url pattern")
});

/// Features toggled per document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Prepend a table of contents built from the headings.
    pub toc: bool,
    /// Enable `[^1]` style footnotes.
    pub footnotes: bool,
    /// Protect `$...$` and `$$...$$` spans from Markdown escaping.
    pub latex: bool,
}

impl RenderOptions {
    /// Options used for articles.
    #[must_use]
    pub const fn article(toc: bool) -> Self {
        Self {
            toc,
            footnotes: true,
            latex: true,
        }
    }

    /// Options used for the about page.
    #[must_use]
    pub const fn page() -> Self {
        Self {
            toc: false,
            footnotes: false,
            latex: false,
        }
    }
}

/// Render Markdown to HTML.
#[must_use]
pub fn render(markdown: &str, options: RenderOptions) -> String {
    let source = if options.latex {
        escape_latex(markdown)
    } else {
        Cow::Borrowed(markdown)
    };

    let mut extensions = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_SMART_PUNCTUATION
        | Options::ENABLE_HEADING_ATTRIBUTES;
    if options.footnotes {
        extensions |= Options::ENABLE_FOOTNOTES;
    }

    let events = autolink(Parser::new_ext(&source, extensions));
    let (events, headings) = assign_heading_ids(events);

    let mut html = String::new();
    if options.toc && !headings.is_empty() {
        html.push_str("<nav class=\"toc\">\n");
        push_html(&mut html, toc_events(&headings).into_iter());
        html.push_str("</nav>\n");
    }
    push_html(&mut html, events.into_iter());
    html
}

/// Escape the contents of LaTeX spans so that Markdown leaves them intact.
///
/// Inside every `$...$` span: `_` becomes `\_`, `\\` becomes `\\\\`, and
/// whitespace around `=` is removed so a line cannot turn into a setext header.
#[must_use]
pub fn escape_latex(input: &str) -> Cow<'_, str> {
    LATEX_SPAN.replace_all(input, |captures: &Captures<'_>| escape_latex_span(&captures[0]))
}

fn escape_latex_span(span: &str) -> String {
    let escaped = span.replace('_', "\\_").replace("\\\\", "\\\\\\\\");
    AROUND_EQUALS.replace_all(&escaped, "=").into_owned()
}

// Turns bare http(s) URLs in plain text into links.
// The parser may split one run of text into several events, so runs are joined first.
fn autolink<'a>(events: impl Iterator<Item = Event<'a>>) -> Vec<Event<'a>> {
    let mut output = Vec::new();
    let mut pending: Option<String> = None;
    let mut link_depth = 0usize;
    let mut in_code_block = false;

    for event in events {
        if let Event::Text(text) = &event {
            if link_depth == 0 && !in_code_block {
                pending.get_or_insert_with(String::new).push_str(text);
                continue;
            }
        }
        if let Some(text) = pending.take() {
            push_text(text, &mut output);
        }
        match &event {
            Event::Start(Tag::Link { .. } | Tag::Image { .. }) => link_depth += 1,
            Event::End(TagEnd::Link | TagEnd::Image) => link_depth = link_depth.saturating_sub(1),
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            _ => {}
        }
        output.push(event);
    }
    if let Some(text) = pending {
        push_text(text, &mut output);
    }
    output
}

fn push_text(text: String, output: &mut Vec<Event<'_>>) {
    if BARE_URL.is_match(&text) {
        split_urls(&text, output);
    } else {
        output.push(Event::Text(text.into()));
    }
}

fn split_urls(text: &str, output: &mut Vec<Event<'_>>) {
    let mut last = 0;
    for found in BARE_URL.find_iter(text) {
        let url = found
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if url.len() <= "https://".len() {
            continue;
        }
        if found.start() > last {
            output.push(Event::Text(text[last..found.start()].to_string().into()));
        }
        output.push(Event::Start(Tag::Link {
            link_type: LinkType::Autolink,
            dest_url: url.to_string().into(),
            title: CowStr::Borrowed(""),
            id: CowStr::Borrowed(""),
        }));
        output.push(Event::Text(url.to_string().into()));
        output.push(Event::End(TagEnd::Link));
        last = found.start() + url.len();
    }
    if last < text.len() {
        output.push(Event::Text(text[last..].to_string().into()));
    }
}

#[derive(Debug, Clone)]
struct Heading {
    level: usize,
    id: String,
    text: String,
}

// Gives every heading an id: the explicit `{#id}` if present, else the slug of its text.
fn assign_heading_ids(events: Vec<Event<'_>>) -> (Vec<Event<'_>>, Vec<Heading>) {
    let mut output = Vec::with_capacity(events.len());
    let mut headings = Vec::new();
    let mut used: HashSet<String> = HashSet::new();
    let mut events = events.into_iter();

    while let Some(event) = events.next() {
        let Event::Start(Tag::Heading {
            level,
            id,
            classes,
            attrs,
        }) = event
        else {
            output.push(event);
            continue;
        };

        let mut inner = Vec::new();
        let mut text = String::new();
        for event in events.by_ref() {
            match &event {
                Event::End(TagEnd::Heading(_)) => break,
                Event::Text(content) | Event::Code(content) => text.push_str(content),
                _ => {}
            }
            inner.push(event);
        }

        let base = match id {
            Some(id) => id.to_string(),
            None => slug::slugify(&text),
        };
        let base = if base.is_empty() {
            "section".to_string()
        } else {
            base
        };
        let mut unique = base.clone();
        let mut suffix = 0;
        while used.contains(&unique) {
            suffix += 1;
            unique = format!("{base}-{suffix}");
        }
        used.insert(unique.clone());

        headings.push(Heading {
            level: heading_depth(level),
            id: unique.clone(),
            text,
        });
        output.push(Event::Start(Tag::Heading {
            level,
            id: Some(unique.into()),
            classes,
            attrs,
        }));
        output.extend(inner);
        output.push(Event::End(TagEnd::Heading(level)));
    }

    (output, headings)
}

const fn heading_depth(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

// Nested list of links to the headings, shallowest heading level at the top.
// A list only ever opens one level below the current one.
fn toc_events(headings: &[Heading]) -> Vec<Event<'static>> {
    let top = headings.iter().map(|heading| heading.level).min().unwrap_or(1);
    let mut events = Vec::new();
    let mut depth = 0usize;

    for heading in headings {
        let target = (heading.level - top + 1).min(depth + 1);
        if depth >= target {
            events.push(Event::End(TagEnd::Item));
            while depth > target {
                events.push(Event::End(TagEnd::List(false)));
                events.push(Event::End(TagEnd::Item));
                depth -= 1;
            }
        }
        while depth < target {
            events.push(Event::Start(Tag::List(None)));
            depth += 1;
        }
        events.push(Event::Start(Tag::Item));
        events.push(Event::Start(Tag::Link {
            link_type: LinkType::Inline,
            dest_url: format!("#{}", heading.id).into(),
            title: CowStr::Borrowed(""),
            id: CowStr::Borrowed(""),
        }));
        events.push(Event::Text(heading.text.clone().into()));
        events.push(Event::End(TagEnd::Link));
    }

    if depth > 0 {
        events.push(Event::End(TagEnd::Item));
        while depth > 1 {
            events.push(Event::End(TagEnd::List(false)));
            events.push(Event::End(TagEnd::Item));
            depth -= 1;
        }
        events.push(Event::End(TagEnd::List(false)));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_only_inside_math() {
        let input = "snake_case $a_b = c$ and $$x \\\\ y$$ done_here";
        let escaped = escape_latex(input);
        assert_eq!(escaped, "snake_case $a\\_b=c$ and $$x \\\\\\\\ y$$ done_here");
    }

    #[test]
    fn math_span_is_non_greedy_and_multiline() {
        let input = "$a_1$ text_x $$\nb_2\n$$";
        assert_eq!(escape_latex(input), "$a\\_1$ text_x $$\nb\\_2\n$$");
    }

    #[test]
    fn underscores_in_math_survive_rendering() {
        let html = render("Inline $x_1 + y_2$ math", RenderOptions::article(false));
        assert!(html.contains("$x_1 + y_2$"), "{html}");
    }

    #[test]
    fn renders_tables_and_strikethrough() {
        let html = render(
            "| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~",
            RenderOptions::article(false),
        );
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>gone</del>"));
    }

    #[test]
    fn fenced_code_keeps_language_class() {
        let html = render("```rust\nfn main() {}\n```", RenderOptions::article(false));
        assert!(html.contains("<code class=\"language-rust\">"));
    }

    #[test]
    fn headings_get_unique_ids() {
        let html = render("# Intro\n\n## Intro\n\n## Custom {#mine}", RenderOptions::page());
        assert!(html.contains("<h1 id=\"intro\">Intro</h1>"), "{html}");
        assert!(html.contains("<h2 id=\"intro-1\">Intro</h2>"), "{html}");
        assert!(html.contains("<h2 id=\"mine\">Custom</h2>"), "{html}");
    }

    #[test]
    fn generated_ids_do_not_collide_with_real_slugs() {
        let html = render("# Intro\n\n# Intro\n\n# Intro 1", RenderOptions::page());
        assert!(html.contains("<h1 id=\"intro\">Intro</h1>"), "{html}");
        assert!(html.contains("<h1 id=\"intro-1\">Intro</h1>"), "{html}");
        assert!(html.contains("<h1 id=\"intro-1-1\">Intro 1</h1>"), "{html}");

        let html = render("# Intro 1\n\n# Intro\n\n# Intro", RenderOptions::page());
        assert!(html.contains("<h1 id=\"intro-1\">Intro 1</h1>"), "{html}");
        assert!(html.contains("<h1 id=\"intro-2\">Intro</h1>"), "{html}");
    }

    #[test]
    fn bare_urls_become_links() {
        let html = render("See https://example.com/page. Thanks", RenderOptions::page());
        assert!(
            html.contains("<a href=\"https://example.com/page\">https://example.com/page</a>."),
            "{html}"
        );
    }

    #[test]
    fn urls_inside_links_and_code_are_left_alone() {
        let html = render(
            "[site](https://example.com)\n\n```\nhttps://example.com\n```",
            RenderOptions::page(),
        );
        assert_eq!(html.matches("<a ").count(), 1, "{html}");
    }

    #[test]
    fn toc_only_when_requested() {
        let markdown = "# One\n\n## Two\n\n# Three";
        assert!(!render(markdown, RenderOptions::article(false)).contains("class=\"toc\""));

        let html = render(markdown, RenderOptions::article(true));
        assert!(html.starts_with("<nav class=\"toc\">"), "{html}");
        assert!(html.contains("<a href=\"#two\">Two</a>"), "{html}");
        assert!(html.contains("<a href=\"#three\">Three</a>"), "{html}");
    }

    #[test]
    fn toc_is_balanced_when_headings_climb() {
        for markdown in ["## Two\n\n# One", "### Deep\n\n# Top\n\n### Deeper"] {
            let html = render(markdown, RenderOptions::article(true));
            let toc = &html[..html.find("</nav>").unwrap()];
            assert_eq!(toc.matches("<ul>").count(), toc.matches("</ul>").count(), "{toc}");
            assert_eq!(toc.matches("<li>").count(), toc.matches("</li>").count(), "{toc}");
            assert!(!toc.contains("<ul>\n<ul>"), "{toc}");
        }
    }

    #[test]
    fn footnotes_depend_on_options() {
        let markdown = "Claim[^1]\n\n[^1]: Source";
        assert!(render(markdown, RenderOptions::article(false)).contains("footnote"));
        assert!(!render(markdown, RenderOptions::page()).contains("footnote-definition"));
    }

    #[test]
    fn smart_punctuation() {
        let html = render("\"quoted\" -- dash", RenderOptions::page());
        assert!(html.contains('“'), "{html}");
        assert!(html.contains('–'), "{html}");
    }

    #[test]
    fn raw_html_passes_through() {
        let html = render("<div class=\"custom\">x</div>", RenderOptions::page());
        assert!(html.contains("<div class=\"custom\">x</div>"));
    }
}
