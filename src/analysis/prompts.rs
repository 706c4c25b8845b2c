//! Embedded prompt templates
//!
//! Templates use `@name@` placeholders filled per guild at suite
//! initialization.

pub const ANALYZE_CHAT: &str = include_str!("../../prompts/analyze_chat.txt");
pub const ANALYZE_IMAGES: &str = include_str!("../../prompts/analyze_images.txt");
pub const CORRECT: &str = include_str!("../../prompts/correct.txt");
pub const FIELD_NAMES: &str = include_str!("../../prompts/field_names.txt");
pub const FIX_JSON: &str = include_str!("../../prompts/fix_json.txt");
pub const FORMAT_JSON: &str = include_str!("../../prompts/format_json.txt");

/// Fill `@name@` placeholders in a template
#[must_use]
pub fn fill(template: &str, substitutions: &[(&str, &str)]) -> String {
    substitutions
        .iter()
        .fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("@{name}@"), value)
        })
}
