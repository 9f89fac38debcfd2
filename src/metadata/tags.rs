//! Prompt → tag normalization shared by both parsers.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;

/// `<lora:NAME>` or `<lora:NAME:weight>` prompt token.
pub(crate) static LORA_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<lora:([^:>]+)(?::[^>]*)?>").expect("LoRA token pattern is valid")
});

/// Segment separators in a prompt.
static SEGMENT_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,\n]+").expect("segment pattern is valid"));

// private-use code points standing in for `\(` and `\)`
const ESCAPED_OPEN: &str = "\u{E000}";
const ESCAPED_CLOSE: &str = "\u{E001}";

/// Remove every `<lora:...>` token from `text`.
pub fn strip_lora_tokens(text: &str) -> Cow<'_, str> {
    LORA_TOKEN.replace_all(text, "")
}

/// LoRA names referenced in `prompt`, in order of first appearance.
pub fn lora_names(prompt: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in LORA_TOKEN.captures_iter(prompt) {
        let name = caps[1].trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Normalize a single prompt tag.
///
/// Weighting brackets are stripped (escaped parentheses survive), anything
/// from the first colon on is dropped, underscores become spaces and the
/// result is lowercased and trimmed. Returns `None` for empty results.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let escaped = raw
        .trim()
        .replace("\\(", ESCAPED_OPEN)
        .replace("\\)", ESCAPED_CLOSE);
    let unbracketed: String = escaped
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '[' | ']' | '{' | '}'))
        .collect();
    let restored = unbracketed
        .replace(ESCAPED_OPEN, "\\(")
        .replace(ESCAPED_CLOSE, "\\)");

    let unweighted = match restored.find(':') {
        Some(pos) => &restored[..pos],
        None => restored.as_str(),
    };

    let tag = unweighted.replace('_', " ").to_lowercase();
    let tag = tag.trim();
    (!tag.is_empty()).then(|| tag.to_string())
}

/// Tags for every comma/newline separated segment of `prompt`.
pub fn prompt_tags(prompt: &str) -> BTreeSet<String> {
    SEGMENT_SPLIT
        .split(prompt)
        .filter_map(|segment| normalize_tag(&strip_lora_tokens(segment)))
        .collect()
}

/// `model:<name>`, or `None` for a blank name.
pub fn model_tag(name: &str) -> Option<String> {
    synthetic_tag("model", name)
}

/// `lora:<name>`, or `None` for a blank name.
pub fn lora_tag(name: &str) -> Option<String> {
    synthetic_tag("lora", name)
}

fn synthetic_tag(kind: &str, name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    (!name.is_empty()).then(|| format!("{}:{}", kind, name))
}

/// Full tag set of a parsed image: prompt tags plus one synthetic tag per
/// checkpoint and LoRA.
pub fn build_tags(positive: &str, checkpoint: &str, loras: &[String]) -> BTreeSet<String> {
    let mut tags = prompt_tags(positive);
    tags.extend(model_tag(checkpoint));
    tags.extend(loras.iter().filter_map(|lora| lora_tag(lora)));
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_prompt_with_lora_and_model() {
        let tags = build_tags("a cat, <lora:sketch:0.8>", "myModel", &["sketch".to_string()]);
        assert_eq!(tags, set(&["a cat", "model:mymodel", "lora:sketch"]));
    }

    #[test]
    fn test_weighting_syntax() {
        assert_eq!(normalize_tag("(masterpiece:1.2)").as_deref(), Some("masterpiece"));
        assert_eq!(normalize_tag("[[blue_sky]]").as_deref(), Some("blue sky"));
        assert_eq!(normalize_tag("{Best Quality}").as_deref(), Some("best quality"));
        assert_eq!(normalize_tag("cat:0.5").as_deref(), Some("cat"));
    }

    #[test]
    fn test_escaped_parentheses_survive() {
        assert_eq!(
            normalize_tag("Artist \\(Style\\)").as_deref(),
            Some("artist \\(style\\)")
        );
        assert_eq!(
            normalize_tag("((artist \\(style\\):1.3))").as_deref(),
            Some("artist \\(style\\)")
        );
    }

    #[test]
    fn test_empty_segments_dropped() {
        let tags = prompt_tags("a cat,, ,\n\n(  ), [:1.2], dog\n");
        assert_eq!(tags, set(&["a cat", "dog"]));
    }

    #[test]
    fn test_duplicates_collapse() {
        let tags = prompt_tags("Cat, cat , (cat:1.1), CAT");
        assert_eq!(tags, set(&["cat"]));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let prompt = "(Masterpiece:1.2), blue_sky, Artist \\(Style\\), [night], <lora:x:1> glow";
        for tag in prompt_tags(prompt) {
            assert_eq!(normalize_tag(&tag).as_deref(), Some(tag.as_str()));
            assert_eq!(tag, tag.trim());
            assert_eq!(tag, tag.to_lowercase());
        }
    }

    #[test]
    fn test_lora_names_in_order() {
        let names = lora_names("<lora:b:1>, x, <lora:a:0.5>, <lora:b:0.2>, <lora:plain>");
        assert_eq!(names, vec!["b", "a", "plain"]);
    }

    #[test]
    fn test_blank_synthetic_tags_skipped() {
        assert_eq!(model_tag("  "), None);
        assert_eq!(lora_tag(" Detail "), Some("lora:detail".to_string()));
        assert_eq!(build_tags("", "", &[]), BTreeSet::new());
    }
}
