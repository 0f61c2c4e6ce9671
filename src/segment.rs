/// Character class used for script-run segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Hiragana,
    Katakana,
    Kanji,
    Latin,
    Digit,
    Other,
}

fn classify(c: char) -> CharClass {
    match c {
        '\u{3041}'..='\u{3096}' => CharClass::Hiragana,
        '\u{30A1}'..='\u{30F6}' => CharClass::Katakana,
        '\u{4E00}'..='\u{9FAF}' => CharClass::Kanji,
        'A'..='Z' | 'a'..='z' => CharClass::Latin,
        '0'..='9' => CharClass::Digit,
        _ => CharClass::Other,
    }
}

/// Splits text into runs of the same script class.
///
/// Scripts without whitespace word boundaries (Japanese in particular)
/// embed poorly as one unbroken string; grouping characters into
/// script-class runs approximates word segmentation well enough for the
/// embedding model's tokenizer to work with.
pub fn segment(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_class: Option<CharClass> = None;

    for c in text.chars() {
        let class = classify(c);
        match current_class {
            Some(prev) if prev == class => current.push(c),
            _ => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                current.push(c);
                current_class = Some(class);
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Space-joined form of [`segment`], the shape embedding tokenizers expect.
pub fn to_wakati(text: &str) -> String {
    segment(text).join(" ")
}
