//! Authority routing tables: the single source of truth for which office an
//! issue goes to, embedded into audit prompts and used for local routing.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory file: {0}")]
    Io(#[from] std::io::Error),
    #[error("directory JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("directory is missing category \"{0}\"")]
    MissingCategory(&'static str),
    #[error("category \"{0}\" has an empty default contact")]
    EmptyDefault(String),
    #[error("routing map has no \"default\" handle")]
    MissingDefaultHandle,
}

// --- Categories ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCategory {
    #[serde(rename = "GHMC (Roads & Garbage)")]
    RoadsAndGarbage,
    #[serde(rename = "HMWSSB (Water & Sewage)")]
    WaterAndSewage,
    #[serde(rename = "TSSPDCL (Electricity)")]
    Electricity,
    #[serde(rename = "Traffic Police")]
    Traffic,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 4] = [
        IssueCategory::RoadsAndGarbage,
        IssueCategory::WaterAndSewage,
        IssueCategory::Electricity,
        IssueCategory::Traffic,
    ];

    /// Directory key, also the display name of the routed office.
    pub fn label(self) -> &'static str {
        match self {
            IssueCategory::RoadsAndGarbage => "GHMC (Roads & Garbage)",
            IssueCategory::WaterAndSewage => "HMWSSB (Water & Sewage)",
            IssueCategory::Electricity => "TSSPDCL (Electricity)",
            IssueCategory::Traffic => "Traffic Police",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label.trim())
    }

    /// Best-effort category from free text such as an issue or office name.
    /// Exact labels win; otherwise the first keyword group that matches.
    pub fn infer(text: &str) -> Option<Self> {
        if let Some(c) = Self::from_label(text) {
            return Some(c);
        }
        let lower = text.to_lowercase();
        let groups: [(IssueCategory, &[&str]); 4] = [
            (IssueCategory::Traffic, &["traffic", "signal"]),
            (
                IssueCategory::Electricity,
                &["tsspdcl", "electric", "wire", "wiring", "pole", "power", "transformer"],
            ),
            (
                IssueCategory::WaterAndSewage,
                &["hmwssb", "water", "leak", "drain", "sewage", "sewer", "pipe", "manhole"],
            ),
            (
                IssueCategory::RoadsAndGarbage,
                &["ghmc", "pothole", "road", "garbage", "trash", "waste", "debris"],
            ),
        ];
        groups
            .into_iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|(c, _)| c)
    }
}

// --- Authority directory ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorityEntry {
    pub default: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub zones: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency: Option<String>,
}

impl AuthorityEntry {
    fn new(default: &str) -> Self {
        Self {
            default: default.to_string(),
            zones: BTreeMap::new(),
            emergency: None,
        }
    }

    fn zone(mut self, location: &str, contact: &str) -> Self {
        self.zones.insert(location.to_string(), contact.to_string());
        self
    }

    fn with_emergency(mut self, contact: &str) -> Self {
        self.emergency = Some(contact.to_string());
        self
    }

    /// Exact, case-sensitive zone match, else the default contact.
    pub fn contact_for(&self, location: &str) -> &str {
        self.zones
            .get(location)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

/// Category label → contact routing. Serializes to the same JSON object the
/// model sees in its instructions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AuthorityDirectory {
    entries: BTreeMap<String, AuthorityEntry>,
}

impl AuthorityDirectory {
    /// Hyderabad civic authority database (2025-26).
    pub fn builtin() -> Self {
        let entries = [
            (
                IssueCategory::RoadsAndGarbage,
                AuthorityEntry::new("commissioner-ghmc@gov.in")
                    .zone("Secunderabad Station", "zc_secunderabad@ghmc.gov.in")
                    .zone("Kukatpally", "zc_kukatpally@ghmc.gov.in")
                    .zone("LB Nagar", "zc_lbnagar@ghmc.gov.in")
                    .zone("Charminar", "zc_charminar@ghmc.gov.in")
                    .zone("Anurag University", "commissioner.ghatkesar@gmail.com")
                    .zone("Ghatkesar", "commissioner.ghatkesar@gmail.com"),
            ),
            (
                IssueCategory::WaterAndSewage,
                AuthorityEntry::new("customer-support@hmwssb.in").with_emergency("md@hmwssb.in"),
            ),
            (
                IssueCategory::Electricity,
                AuthorityEntry::new("customerservice@tssouthernpower.com")
                    .zone("Secunderabad Station", "se_secunderabad@tssouthernpower.com")
                    .zone("Cyber City", "se_cybercity@tssouthernpower.com")
                    .zone("Anurag University", "ae_ghatkesar@tssouthernpower.com")
                    .zone("Ghatkesar", "ae_ghatkesar@tssouthernpower.com"),
            ),
            (IssueCategory::Traffic, AuthorityEntry::new("trf.hyd@gmail.com")),
        ]
        .into_iter()
        .map(|(c, e)| (c.label().to_string(), e))
        .collect();
        Self { entries }
    }

    /// Parse and validate a directory. Every canonical category must be
    /// present and every entry needs a non-empty default.
    pub fn from_json(raw: &str) -> Result<Self, DirectoryError> {
        let dir: AuthorityDirectory = serde_json::from_str(raw)?;
        for category in IssueCategory::ALL {
            if !dir.entries.contains_key(category.label()) {
                return Err(DirectoryError::MissingCategory(category.label()));
            }
        }
        if let Some((label, _)) = dir.entries.iter().find(|(_, e)| e.default.trim().is_empty()) {
            return Err(DirectoryError::EmptyDefault(label.clone()));
        }
        Ok(dir)
    }

    pub fn from_file(path: &Path) -> Result<Self, DirectoryError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn entry(&self, label: &str) -> Option<&AuthorityEntry> {
        self.entries.get(label)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn resolve(&self, category: IssueCategory, location: &str) -> Option<&str> {
        self.resolve_label(category.label(), location)
    }

    pub fn resolve_label(&self, label: &str, location: &str) -> Option<&str> {
        self.entry(label).map(|e| e.contact_for(location))
    }

    pub fn emergency(&self, category: IssueCategory) -> Option<&str> {
        self.entry(category.label())
            .and_then(|e| e.emergency.as_deref())
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// --- Social routing map ---

/// Location → social handle, with a mandatory fallback handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct RoutingMap {
    handles: BTreeMap<String, String>,
    default: String,
}

impl RoutingMap {
    pub fn builtin() -> Self {
        let handles = [
            ("Anurag University", "@GhatkesarMuncipal"),
            ("Uppal X Roads", "@GHMCOnline"),
            ("Secunderabad Station", "@SCB_India"),
            ("Ghatkesar", "@GhatkesarMuncipal"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            handles,
            default: "@GHMCOnline".to_string(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, DirectoryError> {
        let map: BTreeMap<String, String> = serde_json::from_str(raw)?;
        Self::try_from(map)
    }

    pub fn from_file(path: &Path) -> Result<Self, DirectoryError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn handle_for(&self, location: &str) -> &str {
        self.handles
            .get(location)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

impl TryFrom<BTreeMap<String, String>> for RoutingMap {
    type Error = DirectoryError;

    fn try_from(mut map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let default = map
            .remove("default")
            .filter(|d| !d.trim().is_empty())
            .ok_or(DirectoryError::MissingDefaultHandle)?;
        Ok(Self {
            handles: map,
            default,
        })
    }
}

impl From<RoutingMap> for BTreeMap<String, String> {
    fn from(map: RoutingMap) -> Self {
        let mut out = map.handles;
        out.insert("default".to_string(), map.default);
        out
    }
}

// --- Process-wide tables ---

static DIRECTORY: Lazy<AuthorityDirectory> = Lazy::new(|| {
    load_or_builtin("directory.json", AuthorityDirectory::from_file, AuthorityDirectory::builtin)
});

static ROUTING: Lazy<RoutingMap> =
    Lazy::new(|| load_or_builtin("routing.json", RoutingMap::from_file, RoutingMap::builtin));

fn load_or_builtin<T>(
    file: &str,
    load: fn(&Path) -> Result<T, DirectoryError>,
    builtin: fn() -> T,
) -> T {
    let path = crate::data_dir().join(file);
    if !path.exists() {
        return builtin();
    }
    match load(&path) {
        Ok(table) => {
            tracing::info!(path = %path.display(), "loaded routing table override");
            table
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "falling back to built-in table");
            builtin()
        }
    }
}

/// Authority directory for this process: `<data dir>/directory.json` when
/// present and valid, else the built-in table. Loaded once.
pub fn directory() -> &'static AuthorityDirectory {
    &DIRECTORY
}

/// Social routing map for this process, loaded once like [`directory`].
pub fn routing() -> &'static RoutingMap {
    &ROUTING
}

// --- Locations ---

/// Sentinel entry that switches the location picker to manual entry.
pub const OTHER_LOCATION: &str = "Other (Type Manually)";

pub const LOCATIONS: &[&str] = &[
    "Anurag University", "Abids", "Adikmet", "Afzal Gunj", "Amberpet", "Ameerpet", "Attapur",
    "Bachupally", "Balanagar", "Banjara Hills", "Begumpet", "Bowenpally",
    "Chanda Nagar", "Charminar", "Chintal", "Cyber Towers",
    "Dilsukhnagar", "Domalguda",
    "Ecil X Roads", "Erragadda",
    "Film Nagar",
    "Gachibowli", "Ghatkesar", "Golconda", "Gudimalkapur",
    "Habsiguda", "Hafeezpet", "Hasmathpet", "Himayatnagar", "Hitech City",
    "JBS (Jubilee Bus Station)", "Jedimetla", "Jubilee Hills",
    "Kacheguda", "Kukatpally", "Kompally", "Kothapet", "Koti",
    "Lakdikapul", "LB Nagar", "Lingampally",
    "Madhapur", "Madinaguda", "Malakpet", "Malkajgiri", "Manikonda", "Marredpally",
    "Masab Tank", "Medchal", "Mehdipatnam", "Miyapur", "Moosapet",
    "Nagole", "Nampally", "Narayanguda", "Nizampet",
    "Old City", "Osmania University",
    "Panjagutta", "Paradise", "Patancheru", "Pragathi Nagar", "Punjagutta",
    "Raidurg", "Ramanthapur", "Ramnagar", "RTC X Roads",
    "Sainikpuri", "Sanathnagar", "Santosh Nagar", "Secunderabad Station", "Serilingampally",
    "Shaikpet", "Shamshabad", "Somajiguda", "SR Nagar",
    "Tarnaka", "Tolichowki",
    "Uppal", "Uppal X Roads",
    "Vanasthalipuram",
    "Warasiguda",
    "Yousufguda",
];

/// Case-insensitive substring search over the picker entries, sentinel last.
pub fn filter_locations(query: &str) -> Vec<&'static str> {
    let q = query.trim().to_lowercase();
    LOCATIONS
        .iter()
        .copied()
        .chain(std::iter::once(OTHER_LOCATION))
        .filter(|loc| loc.to_lowercase().contains(&q))
        .collect()
}

/// What the user picked in the location selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationChoice {
    Listed(String),
    /// Manual entry; the typed text is supplied at resolve time.
    Other,
}

impl LocationChoice {
    /// `None` for an empty selection.
    pub fn from_selection(selection: &str) -> Option<Self> {
        let selection = selection.trim();
        if selection.is_empty() {
            None
        } else if selection == OTHER_LOCATION {
            Some(LocationChoice::Other)
        } else {
            Some(LocationChoice::Listed(selection.to_string()))
        }
    }

    /// Final location string, or `None` when manual entry is selected but blank.
    pub fn resolve(&self, manual: &str) -> Option<String> {
        match self {
            LocationChoice::Listed(name) => Some(name.clone()),
            LocationChoice::Other => {
                let manual = manual.trim();
                (!manual.is_empty()).then(|| manual.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_override_beats_default() {
        let dir = AuthorityDirectory::builtin();
        assert_eq!(
            dir.resolve_label("GHMC (Roads & Garbage)", "Anurag University"),
            Some("commissioner.ghatkesar@gmail.com")
        );
        assert_eq!(
            dir.resolve(IssueCategory::RoadsAndGarbage, "Uppal X Roads"),
            Some("commissioner-ghmc@gov.in")
        );
        assert_eq!(
            dir.resolve(IssueCategory::Electricity, "Anurag University"),
            Some("ae_ghatkesar@tssouthernpower.com")
        );
    }

    #[test]
    fn zone_match_is_case_sensitive() {
        let dir = AuthorityDirectory::builtin();
        assert_eq!(
            dir.resolve(IssueCategory::RoadsAndGarbage, "anurag university"),
            Some("commissioner-ghmc@gov.in")
        );
    }

    #[test]
    fn unknown_category_resolves_to_none() {
        let dir = AuthorityDirectory::builtin();
        assert_eq!(dir.resolve_label("Parks Department", "Uppal"), None);
    }

    #[test]
    fn water_has_emergency_contact() {
        let dir = AuthorityDirectory::builtin();
        assert_eq!(dir.emergency(IssueCategory::WaterAndSewage), Some("md@hmwssb.in"));
        assert_eq!(dir.emergency(IssueCategory::Traffic), None);
    }

    #[test]
    fn builtin_round_trips_through_validation() {
        let dir = AuthorityDirectory::builtin();
        let json = dir.to_pretty_json();
        assert!(json.contains("\"GHMC (Roads & Garbage)\""));
        assert!(json.contains("\"zones\""));
        assert_eq!(AuthorityDirectory::from_json(&json).unwrap(), dir);
    }

    #[test]
    fn entry_without_default_is_rejected() {
        let raw = r#"{
            "GHMC (Roads & Garbage)": {"zones": {"Uppal": "a@b"}},
            "HMWSSB (Water & Sewage)": {"default": "w@x"},
            "TSSPDCL (Electricity)": {"default": "e@x"},
            "Traffic Police": {"default": "t@x"}
        }"#;
        assert!(matches!(
            AuthorityDirectory::from_json(raw),
            Err(DirectoryError::Json(_))
        ));
    }

    #[test]
    fn directory_missing_category_is_rejected() {
        let raw = r#"{"GHMC (Roads & Garbage)": {"default": "g@x"}}"#;
        assert!(matches!(
            AuthorityDirectory::from_json(raw),
            Err(DirectoryError::MissingCategory("HMWSSB (Water & Sewage)"))
        ));
    }

    #[test]
    fn routing_handle_falls_back_to_default() {
        let map = RoutingMap::builtin();
        assert_eq!(map.handle_for("Secunderabad Station"), "@SCB_India");
        assert_eq!(map.handle_for("Gachibowli"), "@GHMCOnline");
    }

    #[test]
    fn routing_map_requires_default() {
        assert!(matches!(
            RoutingMap::from_json(r#"{"Uppal": "@x"}"#),
            Err(DirectoryError::MissingDefaultHandle)
        ));
        let map = RoutingMap::from_json(r#"{"Uppal": "@x", "default": "@d"}"#).unwrap();
        assert_eq!(map.handle_for("Uppal"), "@x");
        assert_eq!(map.handle_for("Abids"), "@d");
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["default"], "@d");
    }

    #[test]
    fn infer_category_from_free_text() {
        assert_eq!(
            IssueCategory::infer("GHMC (Roads & Garbage)"),
            Some(IssueCategory::RoadsAndGarbage)
        );
        assert_eq!(IssueCategory::infer("Large Pothole"), Some(IssueCategory::RoadsAndGarbage));
        assert_eq!(IssueCategory::infer("Water Leak"), Some(IssueCategory::WaterAndSewage));
        assert_eq!(IssueCategory::infer("Exposed Wiring"), Some(IssueCategory::Electricity));
        assert_eq!(IssueCategory::infer("Broken traffic signal"), Some(IssueCategory::Traffic));
        assert_eq!(IssueCategory::infer("Sunset"), None);
    }

    #[test]
    fn category_serializes_as_label() {
        let json = serde_json::to_string(&IssueCategory::Electricity).unwrap();
        assert_eq!(json, "\"TSSPDCL (Electricity)\"");
    }

    #[test]
    fn location_choice_resolves_manual_entry() {
        assert_eq!(LocationChoice::from_selection("  "), None);
        let listed = LocationChoice::from_selection("Uppal X Roads").unwrap();
        assert_eq!(listed.resolve("ignored"), Some("Uppal X Roads".to_string()));

        let other = LocationChoice::from_selection(OTHER_LOCATION).unwrap();
        assert_eq!(other, LocationChoice::Other);
        assert_eq!(other.resolve("   "), None);
        assert_eq!(
            other.resolve(" Near Main Gate, Street No. 4 "),
            Some("Near Main Gate, Street No. 4".to_string())
        );
    }

    #[test]
    fn filter_is_case_insensitive_and_keeps_sentinel() {
        let hits = filter_locations("uppal");
        assert_eq!(hits, vec!["Uppal", "Uppal X Roads"]);
        assert_eq!(filter_locations("").last(), Some(&OTHER_LOCATION));
        assert!(filter_locations("other").contains(&OTHER_LOCATION));
    }

    #[test]
    fn categories_list_every_label() {
        let dir = AuthorityDirectory::builtin();
        let mut labels: Vec<&str> = IssueCategory::ALL.iter().map(|c| c.label()).collect();
        labels.sort_unstable();
        assert_eq!(dir.categories().collect::<Vec<_>>(), labels);
        assert_eq!(dir.entry("Traffic Police").unwrap().default, "trf.hyd@gmail.com");
        assert!(dir.entry("Parks").is_none());
    }
}
