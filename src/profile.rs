use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AgriError;

/// A farmer's identity and farm attributes, keyed by phone number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub phone: String,
    #[serde(default)]
    pub name: String,
    /// Six digit postal (PIN) code.
    pub location: String,
    #[serde(default, with = "crop_field")]
    pub crop: Option<Crop>,
    /// Acres.
    pub farm_area: f64,
    #[serde(default)]
    pub sms_alerts: bool,
    #[serde(default)]
    pub active: bool,
}

impl Profile {
    /// Label to show for the profile: its name, or the phone number
    /// when no name was given.
    pub fn display_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() {
            &self.phone
        } else {
            name
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Crop {
    Wheat,
    Rice,
    Corn,
    Tomato,
    Potato,
    Cotton,
    Sugarcane,
    Onion,
    Other,
}

impl Crop {
    pub const ALL: [Crop; 9] = [
        Crop::Wheat,
        Crop::Rice,
        Crop::Corn,
        Crop::Tomato,
        Crop::Potato,
        Crop::Cotton,
        Crop::Sugarcane,
        Crop::Onion,
        Crop::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Crop::Wheat => "wheat",
            Crop::Rice => "rice",
            Crop::Corn => "corn",
            Crop::Tomato => "tomato",
            Crop::Potato => "potato",
            Crop::Cotton => "cotton",
            Crop::Sugarcane => "sugarcane",
            Crop::Onion => "onion",
            Crop::Other => "other",
        }
    }
}

impl fmt::Display for Crop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Crop {
    type Err = AgriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Crop::ALL
            .into_iter()
            .find(|crop| crop.as_str() == lowered)
            .ok_or_else(|| {
                AgriError::shape("profile", format!("unknown crop `{s}`"))
            })
    }
}

/// The empty string stands for "no crop" on the wire.
mod crop_field {
    use super::Crop;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(
        crop: &Option<Crop>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match crop {
            Some(crop) => crop.serialize(serializer),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Crop>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => Crop::from_str(value)
                .map(Some)
                .map_err(de::Error::custom),
        }
    }
}

/// What the backend did with a submitted draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveAction {
    Created,
    Updated,
    #[serde(rename = "none")]
    Unchanged,
}

impl SaveAction {
    pub fn title(&self) -> &'static str {
        match self {
            SaveAction::Created => "Profile Created!",
            SaveAction::Updated => "Profile Updated!",
            SaveAction::Unchanged => "No Update Needed",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            SaveAction::Created => "Your profile has been saved successfully",
            SaveAction::Updated => "Your profile changes have been saved",
            SaveAction::Unchanged => {
                "No changes were detected in your profile"
            }
        }
    }
}

/// Known profiles in insertion order, looked up by phone.
///
/// Once settled, a non-empty collection has exactly one active member.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileCollection {
    profiles: Vec<Profile>,
}

impl ProfileCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from a backend listing, settling the active
    /// flag when the listing leaves it ambiguous.
    pub fn from_listing(profiles: Vec<Profile>) -> Self {
        let mut collection = Self { profiles };
        collection.dedup_phones();
        collection.settle_active();
        collection
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Profile> {
        self.profiles.iter()
    }

    pub fn get(&self, phone: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.phone == phone)
    }

    pub fn contains(&self, phone: &str) -> bool {
        self.get(phone).is_some()
    }

    pub fn active(&self) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.active)
    }

    pub fn active_phone(&self) -> Option<&str> {
        self.active().map(|p| p.phone.as_str())
    }

    pub fn active_count(&self) -> usize {
        self.profiles.iter().filter(|p| p.active).count()
    }

    /// Mark `phone` as the only active profile. Returns `false` and
    /// changes nothing when no such profile exists.
    pub fn set_active(&mut self, phone: &str) -> bool {
        if !self.contains(phone) {
            return false;
        }
        for profile in &mut self.profiles {
            profile.active = profile.phone == phone;
        }
        true
    }

    /// Insert a new profile or replace the one with the same phone.
    /// A replaced profile keeps its active flag unless `activate` is set.
    pub fn upsert(&mut self, mut profile: Profile, activate: bool) {
        let phone = profile.phone.clone();
        match self.profiles.iter_mut().find(|p| p.phone == phone) {
            Some(existing) => {
                profile.active = existing.active;
                *existing = profile;
            }
            None => {
                profile.active = false;
                self.profiles.push(profile);
            }
        }
        if activate {
            self.set_active(&phone);
        }
        self.settle_active();
    }

    fn dedup_phones(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let before = self.profiles.len();
        self.profiles.retain(|p| seen.insert(p.phone.clone()));
        if self.profiles.len() != before {
            log::warn!(
                "listing contained {} duplicate phone entries, kept the first of each",
                before - self.profiles.len()
            );
        }
    }

    fn settle_active(&mut self) {
        match self.active_count() {
            1 => {}
            0 => {
                if let Some(first) = self.profiles.first_mut() {
                    log::warn!(
                        "no profile is marked active, treating {} as active",
                        first.phone
                    );
                    first.active = true;
                }
            }
            n => {
                log::warn!(
                    "{} profiles are marked active, keeping the first",
                    n
                );
                let mut kept = false;
                for profile in &mut self.profiles {
                    if profile.active && !kept {
                        kept = true;
                    } else {
                        profile.active = false;
                    }
                }
            }
        }
    }
}

impl<'a> IntoIterator for &'a ProfileCollection {
    type Item = &'a Profile;
    type IntoIter = std::slice::Iter<'a, Profile>;

    fn into_iter(self) -> Self::IntoIter {
        self.profiles.iter()
    }
}
