// src/style.rs
//! Topic-derived visual consistency and the prompts handed to the writer.

use crate::workflow::state::TaskConfig;
use sha2::{Digest, Sha256};

/// Seed shared by every image of a task. Same topic, same seed.
pub fn style_seed(topic: &str) -> u32 {
    let digest = hex::encode(Sha256::digest(topic.as_bytes()));
    // 8 hex digits always fit in a u32
    let head = u32::from_str_radix(&digest[..8], 16).unwrap_or(0);
    head % (1 << 31)
}

const PALETTE: &str = "#FF6B6B #4ECDC4 #FFE66D #F7F7F7 #1A1A1A";

const MINIMALIST_SUFFIX: &str = "minimal line art, stick figures with black line limbs, \
flat design, single-color background, clean composition, high saturation blocks of color";

fn composition_for(emotion: &str) -> &'static str {
    match emotion.to_lowercase().as_str() {
        "confused" | "puzzled" => "diagonal",
        "shocked" | "awe" => "frame",
        "tender" | "gentle" => "negative space",
        "heavy" | "somber" => "rule of thirds",
        _ => "center symmetry",
    }
}

/// Append the composition, palette and line-art directives to a scene prompt.
pub fn stylize_prompt(base_prompt: &str, emotion: &str) -> String {
    format!(
        "{},\n{} composition, colors: {}, {}",
        base_prompt.trim(),
        composition_for(emotion),
        PALETTE,
        MINIMALIST_SUFFIX
    )
}

pub const WRITER_SYSTEM_PROMPT: &str = r#"You write short-form philosophy explainer video scripts.

Output JSON only, in exactly this shape:
{
  "scenes": [
    {
      "id": 1,
      "text": "narration line",
      "type": "hook|theory|science|analogy|twist|sublime",
      "duration": 2.0,
      "emotion": "confused|insight|shocked|tender|heavy|resonant",
      "image_prompt": "what the frame shows"
    }
  ]
}

Rules:
- 3 to 6 scenes, each line 2-3 seconds when read aloud
- every line must be visual
- ids are unique integers starting at 1
- no filler phrases"#;

pub fn writer_prompt(config: &TaskConfig) -> String {
    format!(
        "Topic: {}\nStyle: {}\nTheme: {}\n\nWrite the scene list for this video.",
        config.topic,
        config.style,
        config.theme.as_deref().unwrap_or("any")
    )
}
