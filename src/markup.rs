use once_cell::sync::Lazy;
use regex::Regex;

static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static REF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<ref[^>/]*/>|<ref[^>]*>.*?</ref>").unwrap());

static FILE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\[(?:File|Image):[^|\]]+(?:\|[^\]]*)*\]\]").unwrap());

static LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^|\]]+?)(?:\|([^\]]+))?\]\]").unwrap());

static EXTERNAL_LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[https?://\S+?(?:\s+([^\]]+))?\]").unwrap());

static HEADING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^={2,}\s*(.+?)\s*={2,}\s*$").unwrap());

static BLANK_RUN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// True when the revision body is a redirect stub rather than content.
pub fn is_redirect_text(text: &str) -> bool {
    let head = text.trim_start();
    head.len() >= 9 && head[..9].eq_ignore_ascii_case("#redirect")
}

/// Reduces wikitext to plain prose suitable for chunking and embedding:
/// templates, comments, refs, and file embeds are dropped; wikilinks and
/// external links collapse to their display text; heading and quote markup
/// is removed while heading text is kept in place.
pub fn clean_wikitext(text: &str) -> String {
    let text = COMMENT_REGEX.replace_all(text, "");
    let text = strip_templates(&text);
    let text = REF_REGEX.replace_all(&text, "");
    let text = FILE_REGEX.replace_all(&text, "");
    let text = LINK_REGEX.replace_all(&text, |caps: &regex::Captures<'_>| {
        caps.get(2)
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    });
    let text = EXTERNAL_LINK_REGEX.replace_all(&text, |caps: &regex::Captures<'_>| {
        caps.get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    });
    let text = HEADING_REGEX.replace_all(&text, "$1");
    let text = text.replace("'''''", "").replace("'''", "").replace("''", "");
    let text = BLANK_RUN_REGEX.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Removes `{{…}}` templates, including nested ones. Unclosed templates
/// swallow the rest of the text rather than looping.
fn strip_templates(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut run_start = 0;

    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'{' && bytes[i + 1] == b'{' {
            if run_start < i {
                result.push_str(&text[run_start..i]);
            }
            let mut depth: i32 = 0;
            while i + 1 < bytes.len() {
                if bytes[i] == b'{' && bytes[i + 1] == b'{' {
                    depth += 1;
                    i += 2;
                } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            run_start = i;
        } else {
            i += 1;
        }
    }

    if run_start < bytes.len() {
        result.push_str(&text[run_start..]);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_detection() {
        assert!(is_redirect_text("#REDIRECT [[Other page]]"));
        assert!(is_redirect_text("  #redirect [[Other page]]"));
        assert!(!is_redirect_text("Not a redirect. #REDIRECT later."));
        assert!(!is_redirect_text(""));
    }

    #[test]
    fn templates_are_removed() {
        let cleaned = clean_wikitext("{{Infobox number|name=G}}\nGraham's number is large.");
        assert_eq!(cleaned, "Graham's number is large.");
    }

    #[test]
    fn nested_templates_are_removed() {
        let cleaned = clean_wikitext("{{outer {{inner}} rest}}kept");
        assert_eq!(cleaned, "kept");
    }

    #[test]
    fn unclosed_template_does_not_hang() {
        let cleaned = clean_wikitext("before {{unclosed forever");
        assert_eq!(cleaned, "before");
    }

    #[test]
    fn wikilinks_collapse_to_labels() {
        assert_eq!(
            clean_wikitext("See [[Graham's number]] and [[TREE sequence|the TREE function]]."),
            "See Graham's number and the TREE function."
        );
    }

    #[test]
    fn file_embeds_are_dropped() {
        let cleaned = clean_wikitext("Intro. [[File:Diagram.svg|thumb|A diagram]] Outro.");
        assert_eq!(cleaned, "Intro.  Outro.");
    }

    #[test]
    fn external_links_keep_display_text() {
        assert_eq!(
            clean_wikitext("[https://example.org the source] and [https://example.org/bare]"),
            "the source and"
        );
    }

    #[test]
    fn heading_markup_is_removed_text_kept() {
        let cleaned = clean_wikitext("Intro.\n\n== History ==\nIt began.");
        assert_eq!(cleaned, "Intro.\n\nHistory\nIt began.");
    }

    #[test]
    fn refs_and_comments_are_dropped() {
        let cleaned =
            clean_wikitext("Fact.<ref>Citation</ref> More.<ref name=\"a\"/> <!-- hidden -->");
        assert_eq!(cleaned, "Fact. More.");
    }

    #[test]
    fn quote_markup_is_removed() {
        assert_eq!(clean_wikitext("'''Bold''' and ''italic''."), "Bold and italic.");
    }

    #[test]
    fn blank_runs_collapse() {
        let cleaned = clean_wikitext("a\n\n\n\nb");
        assert_eq!(cleaned, "a\n\nb");
    }
}
