//! Serde shapes of `.tmLanguage` plists and `.tmLanguage.json` files

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGrammar {
    pub scope_name: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    pub first_line_match: Option<String>,
    #[serde(default)]
    pub patterns: Vec<RawPattern>,
    #[serde(default)]
    pub repository: HashMap<String, RawPattern>,
    #[serde(default)]
    pub injections: BTreeMap<String, RawPattern>,
    pub injection_selector: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub hide_from_user: bool,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPattern {
    pub name: Option<String>,
    pub content_name: Option<String>,
    #[serde(rename = "match")]
    pub match_: Option<String>,
    pub begin: Option<String>,
    pub end: Option<String>,
    #[serde(rename = "while")]
    pub while_: Option<String>,
    pub include: Option<String>,
    #[serde(default)]
    pub captures: RawCaptures,
    #[serde(default)]
    pub begin_captures: RawCaptures,
    #[serde(default)]
    pub end_captures: RawCaptures,
    #[serde(default)]
    pub patterns: Vec<RawPattern>,
    #[serde(default, deserialize_with = "flag")]
    pub apply_end_pattern_last: bool,
    #[serde(default, deserialize_with = "flag")]
    pub disabled: bool,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawCapture {
    pub name: Option<String>,
}

/// Capture scopes keyed by group number as written ("1", "2", ...)
pub type RawCaptures = HashMap<String, RawCapture>;

/// Plists write flags as `<integer>1</integer>` or `<true/>`, JSON as
/// `1` or `true`
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
        Flag::Str(s) => matches!(s.as_str(), "1" | "true" | "YES"),
    })
}
