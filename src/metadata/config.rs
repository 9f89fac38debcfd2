use serde::{Deserialize, Serialize};

/// Node-type name lists and constants that drive workflow parsing.
///
/// Role lists are matched case-insensitively as substrings of a node's
/// `type`; the block-list is matched exactly and wins over every role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub sampler_types: Vec<String>,
    pub checkpoint_types: Vec<String>,
    pub encoder_types: Vec<String>,
    pub lora_types: Vec<String>,
    pub block_list: Vec<String>,
    /// `Node name for S&R` of the legacy encoder whose prompts sit one
    /// widget slot further along.
    pub legacy_encoder_name: String,
    /// Node `mode` value meaning "bypassed".
    pub bypass_mode: i64,
    /// File extensions stripped from checkpoint and LoRA names.
    pub model_suffixes: Vec<String>,
    /// Text-chunk keyword holding the workflow graph JSON.
    pub graph_key: String,
    /// Text-chunk keyword holding the parameter text block.
    pub parameters_key: String,
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            sampler_types: strings(&["KSampler"]),
            checkpoint_types: strings(&["CheckpointLoader"]),
            encoder_types: strings(&["CLIPTextEncode", "CLIP"]),
            lora_types: strings(&["LoraLoader"]),
            block_list: strings(&[
                "CLIPSetLastLayer",
                "CLIPLoader",
                "DualCLIPLoader",
                "TripleCLIPLoader",
                "CLIPMergeSimple",
                "CLIPVisionLoader",
                "CLIPVisionEncode",
            ]),
            legacy_encoder_name: "workflow/CLIP".to_string(),
            bypass_mode: 4,
            model_suffixes: strings(&[".safetensors", ".ckpt", ".pt"]),
            graph_key: "workflow".to_string(),
            parameters_key: "parameters".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ExtractorConfig =
            serde_json::from_str(r#"{"sampler_types": ["KSampler", "SamplerCustom"]}"#).unwrap();
        assert_eq!(config.sampler_types, vec!["KSampler", "SamplerCustom"]);
        assert_eq!(config.bypass_mode, 4);
        assert_eq!(config.graph_key, "workflow");
        assert!(config.block_list.iter().any(|b| b == "CLIPSetLastLayer"));
    }
}
