use crate::model::ResultSet;
use askama::Template;
use std::fmt::Write as _;
use tracing::warn;

pub const NO_RESULTS_TEXT: &str = "No results found";
pub const NO_RESULTS_MARKUP: &str = r#"<span class="dropdown-item disabled">No results found</span>"#;

/// Renders the dropdown contents for a result set.
///
/// Categories appear in payload order; empty categories are skipped entirely.
/// When no category has items the output is the disabled placeholder entry.
pub fn render_dropdown(results: &ResultSet) -> String {
    let sections: Vec<SectionBlock<'_>> = results
        .non_empty()
        .map(|(name, category)| SectionBlock {
            heading: name.to_uppercase(),
            links: category
                .list
                .iter()
                .map(|item| LinkBlock {
                    href: attribute_escape(&category.href(item)),
                    text: &item.text,
                })
                .collect(),
        })
        .collect();
    if sections.is_empty() {
        return NO_RESULTS_MARKUP.to_string();
    }
    DropdownTemplate { sections }
        .render()
        .unwrap_or_else(|err| {
            warn!(error = %err, "failed to render suggestion dropdown");
            NO_RESULTS_MARKUP.to_string()
        })
}

/// Markdown rendition of the dropdown for terminal output.
pub fn render_markdown(results: &ResultSet) -> String {
    let mut out = String::new();
    for (name, category) in results.non_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "## {}", name.to_uppercase());
        for item in &category.list {
            let _ = writeln!(
                out,
                "- [{}]({})",
                markdown_escape(&item.text),
                category.href(item)
            );
        }
    }
    if out.is_empty() {
        out.push('_');
        out.push_str(NO_RESULTS_TEXT);
        out.push_str("_\n");
    }
    out
}

fn attribute_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn markdown_escape(input: &str) -> String {
    input.replace('[', "\\[").replace(']', "\\]")
}

struct SectionBlock<'a> {
    heading: String,
    links: Vec<LinkBlock<'a>>,
}

struct LinkBlock<'a> {
    href: String,
    text: &'a str,
}

#[derive(Template)]
#[template(
    source = r#"{% for section in sections -%}
<h6 class="dropdown-header text-uppercase">{{ section.heading }}</h6>
{% for link in section.links -%}
<a class="dropdown-item" href="{{ link.href|safe }}">{{ link.text }}</a>
{% endfor -%}
{% endfor -%}"#,
    ext = "html"
)]
struct DropdownTemplate<'a> {
    sections: Vec<SectionBlock<'a>>,
}
