//! Profile-scoped payloads. Each is only meaningful for the profile that
//! was active when it was fetched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::{parse, Envelope};
use crate::Result;

/// A payload the backend computes for the active profile.
pub trait DependentResource:
    Clone + fmt::Debug + Send + Sync + 'static
{
    /// Used in logs and error reasons.
    const NAME: &'static str;
    const PATH: &'static str;

    /// Parse a 2xx body. Anything that does not match the expected shape
    /// is a [`ShapeMismatch`](crate::AgriError::ShapeMismatch).
    fn parse(body: &[u8]) -> Result<Self>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationPlan {
    pub water_needed_mm: f64,
    pub water_needed_liters: f64,
    pub rationale: String,
    #[serde(default)]
    pub weather_summary: BTreeMap<String, f64>,
    #[serde(default)]
    pub weather_weekly: Vec<WeatherDay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDay {
    pub date: String,
    #[serde(rename = "temperature_C")]
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub rainfall_mm: f64,
    pub sunlight_hours: f64,
    #[serde(default)]
    pub day_name: Option<String>,
    #[serde(default)]
    pub irrigation_mm: Option<f64>,
}

impl DependentResource for IrrigationPlan {
    const NAME: &'static str = "irrigation plan";
    const PATH: &'static str = "/irrigation/";

    fn parse(body: &[u8]) -> Result<Self> {
        parse(Self::NAME, body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    /// The profile the backend forecast for, as it sent it.
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
    pub forecast: Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub summary: ForecastSummary,
    pub yield_forecast: Vec<MonthlyYield>,
    pub risk_factors: Vec<RiskFactor>,
    #[serde(default)]
    pub market_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub expected_yield_qtl: f64,
    pub expected_income_inr: f64,
    pub harvest_date_label: String,
    pub risk_level: String,
    pub overall_risk_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyYield {
    pub month: String,
    #[serde(rename = "yield")]
    pub yield_qtl: f64,
    pub income: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub factor: String,
    pub risk: f64,
}

impl DependentResource for ForecastReport {
    const NAME: &'static str = "forecast";
    const PATH: &'static str = "/forecast/";

    fn parse(body: &[u8]) -> Result<Self> {
        parse::<Envelope<Self>>(Self::NAME, body)?.into_data(Self::NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorDashboard {
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
    pub recommendations: Vec<CropRecommendation>,
    pub pest_alerts: Vec<PestAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropRecommendation {
    pub crop: String,
    pub score: f64,
    pub rationale: String,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

/// `pest` and `disease` are absent on informational alerts such as
/// "no dataset available".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PestAlert {
    #[serde(default)]
    pub pest: Option<String>,
    #[serde(default)]
    pub disease: Option<String>,
    pub risk: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl DependentResource for AdvisorDashboard {
    const NAME: &'static str = "advisor dashboard";
    const PATH: &'static str = "/agri-advisor/dashboard";

    fn parse(body: &[u8]) -> Result<Self> {
        parse(Self::NAME, body)
    }
}
