//! Term matching shared by the detector and the classifier.
//!
//! Messages are normalised with [`flowpilot_kernel::normalize`] before they
//! reach these helpers; terms are lowercased on the fly.

/// Whether `c` belongs to a script written without spaces between words.
fn is_unspaced(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // hiragana, katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{AC00}'..='\u{D7AF}' // hangul syllables
        | '\u{0E00}'..='\u{0E7F}' // thai
        | '\u{F900}'..='\u{FAFF}' // CJK compatibility
    )
}

/// A word character of a spaced script.
fn is_spaced_word_char(c: char) -> bool {
    (c.is_alphanumeric() || c == '_') && !is_unspaced(c)
}

/// Whether `text` is written in a spaced script.
pub(crate) fn is_spaced(text: &str) -> bool {
    !text.chars().any(is_unspaced)
}

/// Returns `true` when `term` occurs in the normalised message.
///
/// Terms in unspaced scripts match as plain substrings.  Terms in spaced
/// scripts must start at a word boundary, so `flow` matches `flows` but not
/// `overflow`.
pub(crate) fn term_present(message: &str, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return false;
    }
    if !is_spaced(&term) {
        return message.contains(&term);
    }
    message.match_indices(&term).any(|(start, _)| {
        message[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_spaced_word_char(c))
    })
}

/// Returns `true` when `term` occurs in the normalised message as a whole
/// word.
///
/// Like [`term_present`], but spaced-script terms must also end at a word
/// boundary, so `fix` matches `fix it` but not `fixture`.  Letters of
/// unspaced scripts count as boundaries, so `plc` still matches inside
/// `创建一个plc流程`.
pub(crate) fn word_present(message: &str, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return false;
    }
    if !is_spaced(&term) {
        return message.contains(&term);
    }
    message.match_indices(&term).any(|(start, matched)| {
        let end = start + matched.len();
        let before_ok = message[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_spaced_word_char(c));
        let after_ok = message[end..]
            .chars()
            .next()
            .is_none_or(|c| !is_spaced_word_char(c));
        before_ok && after_ok
    })
}

/// Replace `{placeholder}` slots with spaces.
pub(crate) fn strip_placeholders(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut depth = 0usize;
    for c in template.chars() {
        match c {
            '{' => {
                depth += 1;
                out.push(' ');
            }
            '}' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaced_terms_need_a_leading_boundary() {
        assert!(term_present("create two flows", "flow"));
        assert!(!term_present("stack overflow", "flow"));
        assert!(term_present("read the plc registers", "PLC"));
    }

    #[test]
    fn latin_terms_match_inside_cjk_text() {
        assert!(term_present("创建一个plc流程", "plc"));
        assert!(term_present("plc是什么", "plc"));
    }

    #[test]
    fn unspaced_terms_match_as_substrings() {
        assert!(term_present("创建一个温度监控流程", "流程"));
        assert!(!term_present("创建一个温度监控流程", "工作流"));
    }

    #[test]
    fn whole_words_need_both_boundaries() {
        assert!(word_present("please fix it", "fix"));
        assert!(!word_present("update the fixture", "fix"));
        assert!(!word_present("listen on port 1880", "list"));
        assert!(!word_present("the written docs", "write"));
        assert!(word_present("创建一个plc流程", "plc"));
        assert!(word_present("how do i start", "how do i"));
        assert!(word_present("配置串口参数", "配置"));
    }

    #[test]
    fn placeholders_are_removed() {
        assert_eq!(strip_placeholders("create a {type} flow"), "create a   flow");
        assert_eq!(strip_placeholders("创建{类型}流程"), "创建 流程");
    }
}
