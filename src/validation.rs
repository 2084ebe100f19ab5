//! Local rule checks run on a profile draft before anything is sent
//! to the backend.
//!
//! Rules are checked in a fixed order and the first violation wins.

use thiserror::Error;

use crate::profile::Profile;

pub const POSTAL_CODE_LENGTH: usize = 6;

/// The rule a draft violated. The message is what the user sees.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter your phone number before saving")]
    MissingPhone,
    #[error("Please enter a valid 6-digit Indian PIN code")]
    InvalidPostalCode,
    #[error("Please enter a valid farm size greater than 0")]
    InvalidFarmArea,
}

impl ValidationError {
    /// Short title shown above the message.
    pub fn title(&self) -> &'static str {
        match self {
            ValidationError::MissingPhone => "Phone number required",
            ValidationError::InvalidPostalCode => "Invalid PIN Code",
            ValidationError::InvalidFarmArea => "Invalid Farm Area",
        }
    }
}

pub fn validate(draft: &Profile) -> Result<(), ValidationError> {
    if draft.phone.trim().is_empty() {
        return Err(ValidationError::MissingPhone);
    }
    if !is_postal_code(&draft.location) {
        return Err(ValidationError::InvalidPostalCode);
    }
    // NaN must fail as well, hence no `<= 0.0`
    if !(draft.farm_area > 0.0) {
        return Err(ValidationError::InvalidFarmArea);
    }
    Ok(())
}

pub fn is_postal_code(value: &str) -> bool {
    value.len() == POSTAL_CODE_LENGTH
        && value.bytes().all(|b| b.is_ascii_digit())
}

/// Whether `value` may stand in the location field while the user is
/// still typing: up to six digits, possibly none.
pub fn accepts_location_input(value: &str) -> bool {
    value.len() <= POSTAL_CODE_LENGTH
        && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn draft() -> Profile {
        Profile {
            phone: "9876543210".to_owned(),
            location: "411001".to_owned(),
            farm_area: 2.5,
            ..Profile::default()
        }
    }

    #[test]
    fn valid_draft_passes() {
        assert_eq!(validate(&draft()), Ok(()));
    }

    #[rstest]
    #[case("12345", Err(ValidationError::InvalidPostalCode))]
    #[case("123456", Ok(()))]
    #[case("1234567", Err(ValidationError::InvalidPostalCode))]
    #[case("12a456", Err(ValidationError::InvalidPostalCode))]
    #[case("", Err(ValidationError::InvalidPostalCode))]
    #[case("１２３４５６", Err(ValidationError::InvalidPostalCode))]
    fn postal_code_rule(
        #[case] location: &str,
        #[case] expected: Result<(), ValidationError>,
    ) {
        let profile = Profile {
            location: location.to_owned(),
            ..draft()
        };
        assert_eq!(validate(&profile), expected);
    }

    #[rstest]
    #[case(0.0, Err(ValidationError::InvalidFarmArea))]
    #[case(-1.0, Err(ValidationError::InvalidFarmArea))]
    #[case(f64::NAN, Err(ValidationError::InvalidFarmArea))]
    #[case(2.5, Ok(()))]
    fn farm_area_rule(
        #[case] farm_area: f64,
        #[case] expected: Result<(), ValidationError>,
    ) {
        let profile = Profile {
            farm_area,
            ..draft()
        };
        assert_eq!(validate(&profile), expected);
    }

    #[test]
    fn first_violation_wins() {
        let profile = Profile {
            phone: "  ".to_owned(),
            location: "12".to_owned(),
            farm_area: 0.0,
            ..Profile::default()
        };
        assert_eq!(validate(&profile), Err(ValidationError::MissingPhone));

        let profile = Profile {
            location: "12".to_owned(),
            farm_area: 0.0,
            ..draft()
        };
        assert_eq!(
            validate(&profile),
            Err(ValidationError::InvalidPostalCode)
        );
    }

    #[test]
    fn location_input_filter() {
        assert!(accepts_location_input(""));
        assert!(accepts_location_input("411"));
        assert!(accepts_location_input("411001"));
        assert!(!accepts_location_input("4110012"));
        assert!(!accepts_location_input("41a"));
    }
}
