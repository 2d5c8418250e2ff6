use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Bucket used for tasks whose section id does not resolve to a section.
pub const NO_SECTION_LABEL: &str = "no section";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub section_id: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl Task {
    /// Completion time in UTC, `None` when missing or malformed.
    pub fn completed_at_utc(&self) -> Option<DateTime<Utc>> {
        self.completed_at.as_deref().and_then(parse_timestamp)
    }
}

/// One fetch cycle's worth of data. The three task lists are always
/// replaced together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sections: Vec<Section>,
    pub active_tasks: Vec<Task>,
    pub completed_tasks: Vec<Task>,
    pub all_completed: Vec<Task>,
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn section_name(&self, section_id: Option<&str>) -> Option<&str> {
        let section_id = section_id?;
        self.sections
            .iter()
            .find(|section| section.id == section_id)
            .map(|section| section.name.as_str())
    }

    pub fn resolved_section_name(&self, section_id: Option<&str>) -> &str {
        self.section_name(section_id).unwrap_or(NO_SECTION_LABEL)
    }
}

/// On-disk form of the last successful snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub timestamp: DateTime<Utc>,
    pub data: Snapshot,
}

/// Parses ISO-8601 timestamps as returned by Todoist. Offset-less values are
/// read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawId>::deserialize(deserializer)?;
    Ok(raw.map(String::from).filter(|id| !id.is_empty()))
}
