use linkify::{LinkFinder, LinkKind};

const BULLET_MARKERS: [&str; 3] = ["- ", "* ", "• "];

/// Renders a plain text newsletter body into a self contained HTML email.
///
/// Blank lines separate paragraphs, lines starting with a bullet marker are grouped into lists,
/// lines starting with `#` become section headers and URLs become links. All text is escaped.
pub fn build_newsletter_html(title: &str, body: &str) -> String {
    let title = escape_html(title);
    let mut blocks = Blocks::default();

    for line in body.lines() {
        let line = line.trim();

        if line.is_empty() {
            blocks.close();
        } else if let Some(header) = header_text(line) {
            blocks.close();
            blocks
                .html
                .push(format!(r#"<h2 style="{}">{}</h2>"#, H2_STYLE, linkify_text(header)));
        } else if let Some(item) = bullet_text(line) {
            blocks.close_paragraph();
            blocks.list.push(linkify_text(item));
        } else {
            blocks.close_list();
            blocks.paragraph.push(linkify_text(line));
        }
    }
    blocks.close();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
  </head>
  <body style="{body_style}">
    <div style="{container_style}">
      <h1 style="{h1_style}">{title}</h1>
      {content}
    </div>
  </body>
</html>
"#,
        title = title,
        body_style = BODY_STYLE,
        container_style = CONTAINER_STYLE,
        h1_style = H1_STYLE,
        content = blocks.html.join("\n      "),
    )
}

const BODY_STYLE: &str = "margin:0;padding:0;background:#f6f7f9;";
const CONTAINER_STYLE: &str = "max-width:640px;margin:0 auto;padding:24px;background:#ffffff;font-family:Arial,Helvetica,sans-serif;color:#1f2933;line-height:1.5;";
const H1_STYLE: &str = "font-size:22px;margin:0 0 16px;";
const H2_STYLE: &str = "font-size:17px;margin:24px 0 8px;";

#[derive(Default)]
struct Blocks {
    html: Vec<String>,
    paragraph: Vec<String>,
    list: Vec<String>,
}

impl Blocks {
    fn close_paragraph(&mut self) {
        if !self.paragraph.is_empty() {
            self.html
                .push(format!("<p>{}</p>", self.paragraph.join("<br>")));
            self.paragraph.clear();
        }
    }

    fn close_list(&mut self) {
        if !self.list.is_empty() {
            let items: String = self
                .list
                .iter()
                .map(|item| format!("<li>{}</li>", item))
                .collect();
            self.html.push(format!("<ul>{}</ul>", items));
            self.list.clear();
        }
    }

    fn close(&mut self) {
        self.close_paragraph();
        self.close_list();
    }
}

fn header_text(line: &str) -> Option<&str> {
    let header = line.trim_start_matches('#');

    if header.len() == line.len() {
        return None;
    }

    Some(header.trim()).filter(|header| !header.is_empty())
}

fn bullet_text(line: &str) -> Option<&str> {
    BULLET_MARKERS
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .map(str::trim)
}

/// Escapes the text and wraps every URL in an anchor.
fn linkify_text(text: &str) -> String {
    let mut finder = LinkFinder::new();
    finder.kinds(&[LinkKind::Url]);

    finder
        .spans(text)
        .map(|span| match span.kind() {
            Some(LinkKind::Url) => {
                let url = escape_html(span.as_str());
                format!(r#"<a href="{}" style="color:#2563eb;">{}</a>"#, url, url)
            }
            _ => escape_html(span.as_str()),
        })
        .collect()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }

    escaped
}
