#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use comrak::{Options, markdown_to_html};

/// A grader comment as written in a grade document.
#[derive(Debug, Clone)]
pub enum Comment {
    /// `comment = "..."`: Markdown or an already rendered HTML fragment.
    Text(String),
    /// `comments = [...]`: plain-text entries, one paragraph block each.
    Paragraphs(Vec<String>),
}

impl Comment {
    /// Renders the comment into the single HTML block sent to Canvas.
    pub fn to_html(&self) -> String {
        match self {
            Comment::Text(text) if is_html_fragment(text) => text.trim().to_string(),
            Comment::Text(text) => render_markdown(text),
            Comment::Paragraphs(entries) => entries
                .iter()
                .filter(|entry| !entry.trim().is_empty())
                .map(|entry| render_markdown(entry))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// True when there is nothing to post.
    pub fn is_blank(&self) -> bool {
        match self {
            Comment::Text(text) => text.trim().is_empty(),
            Comment::Paragraphs(entries) => entries.iter().all(|e| e.trim().is_empty()),
        }
    }
}

impl PartialEq for Comment {
    fn eq(&self, other: &Self) -> bool {
        self.to_html() == other.to_html()
    }
}

impl From<&str> for Comment {
    fn from(text: &str) -> Self {
        Comment::Text(text.to_string())
    }
}

/// Renders Markdown to HTML with raw HTML escaped rather than passed through.
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::default();
    options.render.escape = true;
    markdown_to_html(text.trim(), &options).trim().to_string()
}

/// Heuristic for text that was rendered on the download path already.
fn is_html_fragment(text: &str) -> bool {
    let text = text.trim();
    text.starts_with('<') && text.ends_with('>')
}
