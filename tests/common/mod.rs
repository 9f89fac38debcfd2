#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Signature (8) + IHDR chunk (4 + 4 + 13 + 4).
const AFTER_IHDR: usize = 33;

/// A small valid PNG with `chunks` stored as tEXt right after IHDR.
pub fn png_with_text(chunks: &[(&str, &str)]) -> Vec<u8> {
    let mut plain = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(24, 16, Rgb([200, 120, 40])))
        .write_to(&mut Cursor::new(&mut plain), ImageFormat::Png)
        .unwrap();

    let mut out = plain[..AFTER_IHDR].to_vec();
    for (keyword, text) in chunks {
        out.extend(text_chunk(keyword, text));
    }
    out.extend_from_slice(&plain[AFTER_IHDR..]);
    out
}

fn text_chunk(keyword: &str, text: &str) -> Vec<u8> {
    let mut data = keyword.as_bytes().to_vec();
    data.push(0);
    data.extend_from_slice(text.as_bytes());

    let mut crc = flate2::Crc::new();
    crc.update(b"tEXt");
    crc.update(&data);

    let mut chunk = (data.len() as u32).to_be_bytes().to_vec();
    chunk.extend_from_slice(b"tEXt");
    chunk.extend_from_slice(&data);
    chunk.extend_from_slice(&crc.sum().to_be_bytes());
    chunk
}

pub fn write_png(dir: &Path, name: &str, chunks: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, png_with_text(chunks)).unwrap();
    path.canonicalize().unwrap()
}

/// ComfyUI workflow: sampler 3 fed by encoders 5 (positive) and 7 (negative),
/// a checkpoint loader and one active plus one bypassed LoRA loader.
pub fn comfy_workflow(positive: &str, negative: &str) -> String {
    let workflow: Value = json!({
        "nodes": [
            {
                "id": 3,
                "type": "KSampler",
                "mode": 0,
                "inputs": [
                    {"name": "model", "type": "MODEL", "link": 1},
                    {"name": "positive", "type": "CONDITIONING", "link": 10},
                    {"name": "negative", "type": "CONDITIONING", "link": 11}
                ],
                "widgets_values": [7, "fixed", 25, 6.5, "dpmpp_2m", "karras", 1.0]
            },
            {"id": 4, "type": "CheckpointLoaderSimple", "mode": 0, "widgets_values": ["dreamshaper_8.safetensors"]},
            {"id": 5, "type": "CLIPTextEncode", "mode": 0, "widgets_values": [positive]},
            {"id": 7, "type": "CLIPTextEncode", "mode": 0, "widgets_values": [negative]},
            {"id": 8, "type": "CLIPSetLastLayer", "mode": 0, "widgets_values": [-2]},
            {"id": 9, "type": "LoraLoader", "mode": 0, "widgets_values": ["film_grain.safetensors", 0.7, 0.7]},
            {"id": 12, "type": "LoraLoader", "mode": 4, "widgets_values": ["muted.safetensors", 1.0, 1.0]}
        ],
        "links": [
            [1, 4, 0, 3, 0, "MODEL"],
            [10, 5, 0, 3, 1, "CONDITIONING"],
            [11, 7, 0, 3, 2, "CONDITIONING"]
        ]
    });
    workflow.to_string()
}
