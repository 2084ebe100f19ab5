//! Locale negotiation: which display language the backend should answer
//! in, and how every outbound request carries it.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::api::{ApiRequest, LocalizedRequest};
use crate::storage::{PreferenceStore, LANGUAGE_KEY, LANGUAGE_SELECTED_KEY};
use crate::AgriError;

pub const LANG_QUERY_PARAM: &str = "lang";
pub const LANGUAGE_HEADER: &str = "X-Language";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Hi,
    Mr,
}

impl Locale {
    /// In the order the selector offers them.
    pub const ALL: [Locale; 3] = [Locale::En, Locale::Hi, Locale::Mr];

    pub fn code(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Hi => "hi",
            Locale::Mr => "mr",
        }
    }

    /// Name of the language in that language.
    pub fn native_name(&self) -> &'static str {
        match self {
            Locale::En => "English",
            Locale::Hi => "हिंदी",
            Locale::Mr => "मराठी",
        }
    }

    /// Match a platform language tag such as `hi-IN`, `mr_IN.UTF-8`
    /// or `EN` on its primary subtag.
    pub fn from_platform_hint(hint: &str) -> Option<Locale> {
        let primary = hint
            .split(|c| c == '-' || c == '_' || c == '.' || c == '@')
            .next()?;
        primary.parse().ok()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = AgriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Locale::ALL
            .into_iter()
            .find(|locale| locale.code() == lowered)
            .ok_or_else(|| {
                AgriError::Config(format!("unsupported locale `{s}`"))
            })
    }
}

/// Holds the selected locale for the session, mirrors it to persisted
/// preferences and stamps it onto outbound requests.
pub struct LocaleNegotiator {
    current: RwLock<Locale>,
    preferences: Arc<dyn PreferenceStore>,
}

impl LocaleNegotiator {
    /// Initial locale: the persisted choice, else the platform hint,
    /// else English. Unreadable preferences count as absent.
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        platform_hint: Option<&str>,
    ) -> Self {
        let persisted = match preferences.get(LANGUAGE_KEY) {
            Ok(value) => value.and_then(|code| code.parse::<Locale>().ok()),
            Err(e) => {
                log::warn!("could not read persisted locale: {}", e);
                None
            }
        };
        let locale = persisted
            .or_else(|| platform_hint.and_then(Locale::from_platform_hint))
            .unwrap_or_default();
        log::info!("session locale is {}", locale);

        Self {
            current: RwLock::new(locale),
            preferences,
        }
    }

    pub fn get(&self) -> Locale {
        *self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Select a locale by code. Unsupported codes are ignored. A failure
    /// to persist is logged; the session still switches language.
    pub fn set(&self, code: &str) {
        let Ok(locale) = code.parse::<Locale>() else {
            log::debug!("ignoring unsupported locale code {:?}", code);
            return;
        };
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = locale;

        let persisted = self
            .preferences
            .set(LANGUAGE_KEY, locale.code())
            .and_then(|_| self.preferences.set(LANGUAGE_SELECTED_KEY, "true"));
        if let Err(e) = persisted {
            log::error!("could not persist locale {}: {}", locale, e);
        }
        log::info!("locale set to {}", locale);
    }

    /// Whether the first-run locale selector should be shown.
    pub fn needs_selection(&self) -> bool {
        match self.preferences.get(LANGUAGE_SELECTED_KEY) {
            Ok(flag) => flag.as_deref() != Some("true"),
            Err(e) => {
                log::warn!("could not read locale selection flag: {}", e);
                true
            }
        }
    }

    /// Stamp the current locale onto `request` as the `lang` query
    /// parameter and the `X-Language` header, replacing earlier values
    /// of those two and leaving everything else as it was.
    pub fn decorate(&self, mut request: ApiRequest) -> LocalizedRequest {
        let locale = self.get();
        request.set_query(LANG_QUERY_PARAM, locale.code());
        request.set_header(LANGUAGE_HEADER, locale.code());
        LocalizedRequest::new(request, locale)
    }
}
