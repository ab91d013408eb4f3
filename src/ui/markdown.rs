use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const ITALIC: &str = "\x1b[3m";
const RESET: &str = "\x1b[0m";

/// Render markdown to ANSI-styled terminal text. Applied only on full
/// renders; streaming updates show the raw text.
pub fn format_markdown(content: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(content, options);

    let mut out = String::new();
    let mut in_code_block = false;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { .. }) => out.push_str(BOLD),
            Event::End(TagEnd::Heading(_)) => {
                out.push_str(RESET);
                out.push('\n');
            }
            Event::Start(Tag::Strong) => out.push_str(BOLD),
            Event::End(TagEnd::Strong) => out.push_str(RESET),
            Event::Start(Tag::Emphasis) => out.push_str(ITALIC),
            Event::End(TagEnd::Emphasis) => out.push_str(RESET),
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                let lang = match &kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => lang.as_ref(),
                    _ => "",
                };
                out.push_str(DIM);
                out.push_str("┌── ");
                out.push_str(if lang.is_empty() { "code" } else { lang });
                out.push('\n');
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push_str("└──");
                out.push_str(RESET);
                out.push('\n');
            }
            Event::Start(Tag::Item) => out.push_str("  • "),
            Event::End(TagEnd::Item) => out.push('\n'),
            Event::End(TagEnd::Paragraph) => out.push_str("\n\n"),
            Event::Text(text) => {
                if in_code_block {
                    for line in text.lines() {
                        out.push_str("│ ");
                        out.push_str(line);
                        out.push('\n');
                    }
                } else {
                    out.push_str(&text);
                }
            }
            Event::Code(code) => {
                out.push_str(DIM);
                out.push('`');
                out.push_str(&code);
                out.push('`');
                out.push_str(RESET);
            }
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => out.push_str("────────\n"),
            _ => {}
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(format_markdown("hello"), "hello");
    }

    #[test]
    fn code_blocks_are_boxed_with_language() {
        let rendered = format_markdown("```rust\nfn main() {}\n```");
        assert!(rendered.contains("┌── rust"));
        assert!(rendered.contains("│ fn main() {}"));
    }

    #[test]
    fn emphasis_is_styled() {
        let rendered = format_markdown("**bold** and *soft*");
        assert!(rendered.contains(BOLD));
        assert!(rendered.contains(ITALIC));
    }
}
