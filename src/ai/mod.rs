mod gemini;

pub use gemini::GeminiService;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::export::ExportPreset;

/// The Adobe Stock main categories the model is asked to choose from.
/// Shutterstock export remaps these through a fixed table; see
/// [`crate::export::map_shutterstock_category`].
pub const ADOBE_CATEGORIES: &[&str] = &[
    "Animals",
    "Buildings and Architecture",
    "Business",
    "Drinks",
    "The Environment",
    "States of Mind",
    "Food",
    "Graphic Resources",
    "Hobbies and Leisure",
    "Industry",
    "Landscape",
    "Lifestyle",
    "People",
    "Plants and Flowers",
    "Culture and Religion",
    "Science",
    "Social Issues",
    "Sports",
    "Technology",
    "Transport",
    "Travel",
];

/// Keyword lists shorter than the target are padded with this term.
pub const FILLER_KEYWORD: &str = "stock";

/// Absolute title cap applied after the model responds, regardless of the
/// requested range. Titles are never padded below it.
pub const TITLE_HARD_CAP: usize = 200;

/// Per-batch processing constraints, immutable for the duration of a batch.
#[derive(Debug, Clone, Copy)]
pub struct Constraints {
    pub platform: ExportPreset,
    pub title_min: usize,
    pub title_max: usize,
    pub keyword_min: usize,
    pub keyword_max: usize,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            platform: ExportPreset::AdobeStock,
            title_min: 70,
            title_max: 200,
            keyword_min: 25,
            keyword_max: 49,
        }
    }
}

impl Constraints {
    pub fn from_config(processing: &crate::config::ProcessingConfig) -> Self {
        Self {
            platform: processing.platform,
            title_min: processing.title_min,
            title_max: processing.title_max,
            keyword_min: processing.keyword_min,
            keyword_max: processing.keyword_max,
        }
    }

    /// The count keyword lists are padded or truncated to.
    pub fn keyword_target(&self) -> usize {
        self.keyword_max.max(1)
    }
}

/// Metadata exactly as the model returned it, before post-processing.
/// Missing fields default to empty rather than failing the parse.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Post-processed metadata for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMetadata {
    pub title: String,
    /// One of [`ADOBE_CATEGORIES`] when the model cooperates; not validated
    /// here — platform mapping happens at export time.
    pub category: String,
    /// Lowercase single-word keywords, most relevant first, exactly the
    /// target count long.
    pub keywords: Vec<String>,
    /// Character count of `title`, kept alongside it for counters and export.
    pub title_length: usize,
}

/// Trait for multimodal vision services that produce stock metadata.
///
/// The library ships with [`GeminiService`]; tests substitute scripted
/// implementations.
#[async_trait::async_trait]
pub trait AiService: Send + Sync {
    /// The display name of this service (e.g., "Gemini").
    fn name(&self) -> &str;

    /// Analyze a base64-encoded image and return the raw structured metadata.
    ///
    /// * `image_base64` — the image bytes encoded as base64
    /// * `prompt` — the instruction text (use [`build_prompt`])
    /// * `mime_type` — the MIME type of the image (e.g., `"image/jpeg"`)
    async fn analyze(
        &self,
        image_base64: &str,
        prompt: &str,
        mime_type: &str,
    ) -> Result<RawMetadata>;
}

/// Build the instruction text embedding the batch constraints and the
/// expected JSON shape.
pub fn build_prompt(constraints: &Constraints) -> String {
    format!(
        r#"You are an expert at creating stock photography metadata for {platform}. Analyze this image and create an SEO-optimized title, category, and tags.

TITLE REQUIREMENTS:
- Length: {title_min}-{title_max} characters
- Descriptive, specific, and keyword-rich
- Natural language, not just keywords
- Include key visual elements, colors, concepts
- NO special characters except hyphens and spaces

CATEGORY:
- Choose ONE category from Adobe Stock's main categories: {categories}

TAGS:
- Count: {keyword_min}-{keyword_max} keywords
- Single words in lowercase, ordered most relevant first
- Mix of specific and broad terms
- Include: main subject, colors, composition, mood, style, industry/use case
- Prioritize searchable terms over obscure descriptions

Return ONLY valid JSON in this exact format (no markdown, no code blocks):
{{"title": "string", "category": "string", "tags": ["string"]}}"#,
        platform = constraints.platform.name(),
        title_min = constraints.title_min,
        title_max = constraints.title_max,
        categories = ADOBE_CATEGORIES.join(", "),
        keyword_min = constraints.keyword_min,
        keyword_max = constraints.keyword_max,
    )
}

/// Apply the fixed post-processing policy to a raw model response.
///
/// - title: trimmed, truncated to the first [`TITLE_HARD_CAP`] characters if
///   longer; accepted as-is below the requested minimum.
/// - tags: lowercased and trimmed, padded with [`FILLER_KEYWORD`] up to the
///   target count or truncated beyond it, original order preserved.
/// - category: trimmed only.
pub fn post_process(raw: RawMetadata, keyword_target: usize) -> StockMetadata {
    let mut title = raw.title.trim().to_string();
    if title.chars().count() > TITLE_HARD_CAP {
        title = title.chars().take(TITLE_HARD_CAP).collect();
    }

    let target = keyword_target.max(1);
    let mut keywords: Vec<String> = raw
        .tags
        .iter()
        .map(|tag| tag.to_lowercase().trim().to_string())
        .collect();
    if keywords.len() > target {
        keywords.truncate(target);
    } else {
        while keywords.len() < target {
            keywords.push(FILLER_KEYWORD.to_string());
        }
    }

    let title_length = title.chars().count();
    StockMetadata {
        title,
        category: raw.category.trim().to_string(),
        keywords,
        title_length,
    }
}

/// Parse raw model response text into [`RawMetadata`].
///
/// Handles common model quirks: markdown code fences, surrounding prose, and
/// trailing commas. Tries several extraction strategies before failing.
pub fn parse_ai_response(text: &str) -> Result<RawMetadata> {
    log::debug!("Raw model response:\n{text}");

    for candidate in extract_json_candidates(text.trim()) {
        if let Ok(raw) = serde_json::from_str::<RawMetadata>(&candidate) {
            return Ok(raw);
        }

        let fixed = fix_trailing_commas(&candidate);
        if let Ok(raw) = serde_json::from_str::<RawMetadata>(&fixed) {
            return Ok(raw);
        }
    }

    Err(Error::ModelRequest(
        "Could not parse model response as JSON".to_string(),
    ))
}

/// Extract possible JSON object strings from model response text.
fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    // Strategy 1: strip markdown code fences (```json ... ``` or ``` ... ```)
    if text.contains("```") {
        let stripped = text
            .lines()
            .skip_while(|l| !l.trim().starts_with("```"))
            .skip(1)
            .take_while(|l| !l.trim().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n");
        if !stripped.is_empty() {
            candidates.push(stripped);
        }
    }

    // Strategy 2: outermost { ... }, tolerating prose around it
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            candidates.push(text[start..=end].to_string());
        }
    }

    // Strategy 3: the whole text as-is
    candidates.push(text.to_string());

    candidates
}

/// Remove trailing commas before `}` or `]` (a common model quirk), leaving
/// commas inside string values untouched.
fn fix_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            result.push(c);
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            result.push(c);
            continue;
        }
        if !in_string && c == ',' {
            let rest: String = chars.clone().collect();
            let trimmed = rest.trim_start();
            if trimmed.starts_with('}') || trimmed.starts_with(']') {
                continue;
            }
        }
        result.push(c);
    }
    result
}
