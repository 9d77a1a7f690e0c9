//! Platform export presets and CSV/JSON rendering.
//!
//! Rendering is a pure transform of already-materialized metadata: the same
//! list of successful outcomes and the same preset always produce
//! byte-identical output. Category remapping for Shutterstock is kept as an
//! exhaustive lookup table, not inference.

use serde::{Deserialize, Serialize};

use crate::batch::Outcome;

/// Named column/escaping/category-mapping configuration for one target
/// platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPreset {
    AdobeStock,
    Shutterstock,
    Freepik,
}

impl ExportPreset {
    /// Parse a platform identifier from a request. Unknown values fall back
    /// to Adobe Stock.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "shutterstock" => Self::Shutterstock,
            "freepik" => Self::Freepik,
            _ => Self::AdobeStock,
        }
    }

    /// Human-readable platform name, used in prompts and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AdobeStock => "Adobe Stock",
            Self::Shutterstock => "Shutterstock",
            Self::Freepik => "Freepik",
        }
    }

    /// Column delimiter. Freepik uses semicolons; everything else commas.
    pub fn delimiter(&self) -> char {
        match self {
            Self::Freepik => ';',
            _ => ',',
        }
    }

    /// Fixed header row for this preset.
    pub fn headers(&self) -> &'static [&'static str] {
        match self {
            Self::AdobeStock => &["Filename", "Title", "Keywords", "Category", "Title Length"],
            Self::Shutterstock => &[
                "Filename",
                "Description",
                "Keywords",
                "Categories",
                "Illustration",
                "Mature Content",
                "Editorial",
            ],
            Self::Freepik => &["Filename", "Title", "Keywords"],
        }
    }

    /// Suggested download filename for the rendered CSV.
    pub fn export_filename(&self) -> &'static str {
        match self {
            Self::AdobeStock => "adobe_stock_metadata.csv",
            Self::Shutterstock => "shutterstock_metadata.csv",
            Self::Freepik => "freepik_metadata.csv",
        }
    }
}

/// Adobe Stock → Shutterstock category vocabulary. Exhaustive over the
/// categories the prompt offers; anything else maps to the fallback.
const SHUTTERSTOCK_CATEGORY_MAP: &[(&str, &str)] = &[
    ("Animals", "Animals/Wildlife"),
    ("Buildings and Architecture", "Buildings/Landmarks"),
    ("Business", "Business/Finance"),
    ("Drinks", "Food and Drink"),
    ("The Environment", "Nature"),
    ("States of Mind", "People"),
    ("Food", "Food and Drink"),
    ("Graphic Resources", "Backgrounds/Textures"),
    ("Hobbies and Leisure", "Parks/Outdoor"),
    ("Industry", "Industrial"),
    ("Landscape", "Nature"),
    ("Lifestyle", "People"),
    ("People", "People"),
    ("Plants and Flowers", "Nature"),
    ("Culture and Religion", "Religion"),
    ("Science", "Science"),
    ("Social Issues", "Miscellaneous"),
    ("Sports", "Sports/Recreation"),
    ("Technology", "Technology"),
    ("Transport", "Transportation"),
    ("Travel", "Parks/Outdoor"),
];

const SHUTTERSTOCK_FALLBACK_CATEGORY: &str = "Miscellaneous";

/// Remap an Adobe Stock category to Shutterstock's controlled vocabulary.
pub fn map_shutterstock_category(adobe_category: &str) -> &'static str {
    SHUTTERSTOCK_CATEGORY_MAP
        .iter()
        .find(|(adobe, _)| *adobe == adobe_category)
        .map(|(_, shutterstock)| *shutterstock)
        .unwrap_or(SHUTTERSTOCK_FALLBACK_CATEGORY)
}

/// Freepik caps titles at 100 characters; longer titles are cut to 97 with
/// an ellipsis.
fn freepik_title(title: &str) -> String {
    if title.chars().count() > 100 {
        let truncated: String = title.chars().take(97).collect();
        format!("{truncated}...")
    } else {
        title.to_string()
    }
}

/// Quote a field only when it contains the delimiter, a quote, or a newline;
/// internal quotes are doubled.
fn escape_field(field: &str, delimiter: char) -> String {
    if field.contains(delimiter) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render the delimited export table for the successful outcomes, in order.
///
/// Failed outcomes contribute no rows. An empty (or all-failed) batch still
/// yields the header row.
pub fn render_csv(outcomes: &[Outcome], preset: ExportPreset) -> String {
    let delimiter = preset.delimiter();
    let mut lines = Vec::with_capacity(outcomes.len() + 1);

    lines.push(
        preset
            .headers()
            .iter()
            .map(|h| escape_field(h, delimiter))
            .collect::<Vec<_>>()
            .join(&delimiter.to_string()),
    );

    for outcome in outcomes {
        let Outcome::Success { filename, metadata } = outcome else {
            continue;
        };

        let keywords = metadata.keywords.join(",");
        let row: Vec<String> = match preset {
            ExportPreset::AdobeStock => vec![
                filename.clone(),
                metadata.title.clone(),
                keywords,
                metadata.category.clone(),
                metadata.title_length.to_string(),
            ],
            ExportPreset::Shutterstock => vec![
                filename.clone(),
                metadata.title.clone(),
                keywords,
                map_shutterstock_category(&metadata.category).to_string(),
                "No".to_string(),
                "No".to_string(),
                "No".to_string(),
            ],
            ExportPreset::Freepik => vec![filename.clone(), freepik_title(&metadata.title), keywords],
        };

        lines.push(
            row.iter()
                .map(|f| escape_field(f, delimiter))
                .collect::<Vec<_>>()
                .join(&delimiter.to_string()),
        );
    }

    lines.join("\n")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportRecord<'a> {
    filename: &'a str,
    title: &'a str,
    keywords: &'a [String],
    category: &'a str,
    title_length: usize,
}

/// Render the successful outcomes as a pretty-printed JSON record array.
pub fn render_json(outcomes: &[Outcome]) -> serde_json::Result<String> {
    let records: Vec<ExportRecord> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            Outcome::Success { filename, metadata } => Some(ExportRecord {
                filename,
                title: &metadata.title,
                keywords: &metadata.keywords,
                category: &metadata.category,
                title_length: metadata.title_length,
            }),
            Outcome::Failure { .. } => None,
        })
        .collect();

    serde_json::to_string_pretty(&records)
}
