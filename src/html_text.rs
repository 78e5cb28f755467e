use scraper::{Html, Node};

const SKIPPED_TAGS: &[&str] = &["script", "style", "head", "img", "title"];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "tr", "table", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "section",
    "article", "header", "footer", "blockquote", "pre",
];

/// Renders an HTML email body as line-oriented plain text.
///
/// Whitespace inside text collapses to single spaces, so line structure comes
/// only from block elements, table rows and `<br>`. Table cells are separated
/// by a single space, images and scripts are elided, and anchors contribute
/// their text without the href. The extraction patterns anchor on this line
/// structure (`...\s*\n`), so the output always ends with a newline.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::new();
    // (node, children_done) stack; the marker entry emits the separator that
    // belongs after the element's content.
    let mut stack = vec![(doc.tree.root(), false)];
    while let Some((node, children_done)) = stack.pop() {
        if children_done {
            if let Node::Element(el) = node.value() {
                let name = el.name();
                if BLOCK_TAGS.contains(&name) {
                    end_line(&mut out);
                } else if name == "td" || name == "th" {
                    end_cell(&mut out);
                }
            }
            continue;
        }
        match node.value() {
            Node::Text(text) => push_collapsed(&mut out, text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    end_line(&mut out);
                    continue;
                }
                stack.push((node, true));
                let children: Vec<_> = node.children().collect();
                for child in children.into_iter().rev() {
                    stack.push((child, false));
                }
            }
            _ => {
                let children: Vec<_> = node.children().collect();
                for child in children.into_iter().rev() {
                    stack.push((child, false));
                }
            }
        }
    }
    end_line(&mut out);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Appends text with whitespace runs (including source-formatting newlines)
/// collapsed to single spaces.
fn push_collapsed(out: &mut String, text: &str) {
    let mut last_was_space = out.is_empty() || out.ends_with(' ') || out.ends_with('\n');
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
}

fn end_line(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn end_cell(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') && !out.ends_with(' ') {
        out.push(' ');
    }
}
