//! Parser for the delimited "parameters" text block:
//!
//! ```text
//! positive prompt text
//! Negative prompt: negative prompt text
//! Steps: 20, Sampler: Euler a, CFG scale: 7, Seed: 12345, Model: model_name
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use super::tags::lora_names;

const NEGATIVE_MARKER: &str = "Negative prompt:";
const SETTINGS_MARKER: &str = "Steps:";

/// `Model: NAME` entry in the settings line.
static MODEL_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|,)\s*Model:\s*([^,\n]+)").expect("model pattern is valid")
});

/// Result of parsing a parameter block. Every field may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterText {
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub model: Option<String>,
    pub loras: Vec<String>,
    /// The generation-settings tail, verbatim.
    pub settings: String,
}

/// Split `text` into prompts and settings. Never fails: missing sections
/// come back empty.
pub fn parse(text: &str) -> ParameterText {
    let (head, settings) = match settings_start(text) {
        Some(pos) => (&text[..pos], text[pos..].trim()),
        None => (text, ""),
    };

    let (positive, negative) = match head.find(NEGATIVE_MARKER) {
        Some(pos) => (&head[..pos], &head[pos + NEGATIVE_MARKER.len()..]),
        None => (head, ""),
    };

    let model = MODEL_ENTRY
        .captures(settings)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty());

    ParameterText {
        positive_prompt: positive.trim().to_string(),
        negative_prompt: negative.trim().to_string(),
        model,
        loras: lora_names(positive),
        settings: settings.to_string(),
    }
}

/// Byte offset of the settings line: the last line starting with `Steps:`.
fn settings_start(text: &str) -> Option<usize> {
    if let Some(pos) = text.rfind(&format!("\n{}", SETTINGS_MARKER)) {
        return Some(pos + 1);
    }
    text.starts_with(SETTINGS_MARKER).then_some(0)
}
