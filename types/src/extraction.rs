//! Document extraction result shapes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOptions {
    #[serde(default)]
    pub include_tables: bool,
    #[serde(default)]
    pub include_images: bool,
    /// Upper bound on extracted pages or sheets, if the format has them.
    #[serde(default)]
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSection {
    pub heading: Option<String>,
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub caption: Option<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedImage {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub title: Option<String>,
    pub author: Option<String>,
    pub sections: Vec<ExtractedSection>,
    pub tables: Vec<ExtractedTable>,
    pub images: Vec<ExtractedImage>,
    pub full_text: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
