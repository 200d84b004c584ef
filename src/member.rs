// Member data model - applicant input, member records, member IDs
//
// ApplicantInput is what the registration form hands over. MemberRecord is
// what gets stored once payment is confirmed; it is never edited afterwards.

use crate::error::FieldError;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// MINISTRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ministry {
    #[serde(rename = "Choir")]
    Choir,
    #[serde(rename = "Altar Server")]
    AltarServer,
    #[serde(rename = "Board of Lector")]
    BoardOfLector,
    /// Catholic Men Organization
    #[serde(rename = "CMO")]
    Cmo,
    /// Catholic Women Organization
    #[serde(rename = "CWO")]
    Cwo,
    #[serde(rename = "St. Vincent de Paul")]
    StVincentDePaul,
    #[serde(rename = "Legion of Mary")]
    LegionOfMary,
    #[serde(rename = "Youth Ministry")]
    YouthMinistry,
    #[serde(rename = "Catechist")]
    Catechist,
    #[serde(rename = "Usher")]
    Usher,
    #[serde(rename = "Parish Council")]
    ParishCouncil,
    /// Free text supplied in `ApplicantInput::custom_ministry`
    #[serde(rename = "Other")]
    Other,
}

impl Ministry {
    pub const ALL: [Ministry; 12] = [
        Ministry::Choir,
        Ministry::AltarServer,
        Ministry::BoardOfLector,
        Ministry::Cmo,
        Ministry::Cwo,
        Ministry::StVincentDePaul,
        Ministry::LegionOfMary,
        Ministry::YouthMinistry,
        Ministry::Catechist,
        Ministry::Usher,
        Ministry::ParishCouncil,
        Ministry::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ministry::Choir => "Choir",
            Ministry::AltarServer => "Altar Server",
            Ministry::BoardOfLector => "Board of Lector",
            Ministry::Cmo => "CMO",
            Ministry::Cwo => "CWO",
            Ministry::StVincentDePaul => "St. Vincent de Paul",
            Ministry::LegionOfMary => "Legion of Mary",
            Ministry::YouthMinistry => "Youth Ministry",
            Ministry::Catechist => "Catechist",
            Ministry::Usher => "Usher",
            Ministry::ParishCouncil => "Parish Council",
            Ministry::Other => "Other",
        }
    }
}

impl FromStr for Ministry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ministry::ALL
            .iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("Unknown ministry: {}", s))
    }
}

// ============================================================================
// SACRAMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SacramentStatus {
    #[serde(rename = "Communicant")]
    Communicant,
    #[serde(rename = "Baptized Only")]
    BaptizedOnly,
    #[serde(rename = "None")]
    None,
}

impl SacramentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SacramentStatus::Communicant => "Communicant",
            SacramentStatus::BaptizedOnly => "Baptized Only",
            SacramentStatus::None => "None",
        }
    }
}

impl FromStr for SacramentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "communicant" => Ok(SacramentStatus::Communicant),
            "baptized only" | "baptized-only" | "baptized" => Ok(SacramentStatus::BaptizedOnly),
            "none" => Ok(SacramentStatus::None),
            other => Err(format!("Unknown sacrament status: {}", other)),
        }
    }
}

// ============================================================================
// PAYMENT METHOD
// ============================================================================

/// Payment method tag. Method-specific details (card number, mobile number,
/// bank account) are collected by the payment form and are not checked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Mobile,
    Bank,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Mobile => "mobile",
            PaymentMethod::Bank => "bank",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "Credit Card",
            PaymentMethod::Mobile => "Mobile Money",
            PaymentMethod::Bank => "Bank Transfer",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "mobile" => Ok(PaymentMethod::Mobile),
            "bank" => Ok(PaymentMethod::Bank),
            other => Err(format!("Unknown payment method: {}", other)),
        }
    }
}

// ============================================================================
// APPLICANT INPUT
// ============================================================================

/// Completed registration form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantInput {
    pub full_name: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: String,
    pub phone_number: String,
    pub email_address: String,
    pub ministry: Option<Ministry>,
    #[serde(default)]
    pub custom_ministry: String,
    pub sacrament_status: Option<SacramentStatus>,
    pub years_in_faith: Option<u32>,
    /// Reference to the uploaded passport photo
    #[serde(default)]
    pub photo: Option<String>,
    /// Reference to the uploaded payment screenshot
    #[serde(default)]
    pub payment_proof: Option<String>,
}

impl ApplicantInput {
    /// Check every required field; returns all failures at once
    pub fn validate(&self, require_photo: bool) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        let required = [
            ("full_name", &self.full_name),
            ("date_of_birth", &self.date_of_birth),
            ("phone_number", &self.phone_number),
            ("email_address", &self.email_address),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push(FieldError::new(field, "Required field is empty"));
            }
        }

        if !self.date_of_birth.trim().is_empty()
            && NaiveDate::parse_from_str(self.date_of_birth.trim(), "%Y-%m-%d").is_err()
        {
            errors.push(FieldError::new("date_of_birth", "Expected a date as YYYY-MM-DD"));
        }

        if !self.email_address.trim().is_empty() && !self.email_address.contains('@') {
            errors.push(FieldError::new("email_address", "Not an email address"));
        }

        match self.ministry {
            None => errors.push(FieldError::new("ministry", "Required field is empty")),
            Some(Ministry::Other) if self.custom_ministry.trim().is_empty() => {
                errors.push(FieldError::new(
                    "custom_ministry",
                    "Please specify your ministry/domain",
                ));
            }
            Some(_) => {}
        }

        if self.sacrament_status.is_none() {
            errors.push(FieldError::new("sacrament_status", "Required field is empty"));
        }

        if self.years_in_faith.is_none() {
            errors.push(FieldError::new("years_in_faith", "Required field is empty"));
        }

        if require_photo && self.photo.as_deref().map_or(true, |p| p.trim().is_empty()) {
            errors.push(FieldError::new("photo", "Please upload your passport photo"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Ministry name as it appears on the member record
    pub fn resolved_ministry(&self) -> String {
        match self.ministry {
            Some(Ministry::Other) => self.custom_ministry.trim().to_string(),
            Some(m) => m.as_str().to_string(),
            None => String::new(),
        }
    }
}

// ============================================================================
// MEMBER ID
// ============================================================================

/// `PREFIX-NNNN`: the allocator sequence, zero-padded to at least four digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn format(prefix: &str, sequence: u64) -> Self {
        MemberId(format!("{}-{:04}", prefix, sequence))
    }

    /// Embedded sequence number, if the ID is well formed
    pub fn sequence(&self) -> Option<u64> {
        self.0.rsplit_once('-').and_then(|(_, n)| n.parse().ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        MemberId(s.to_string())
    }
}

// ============================================================================
// MEMBER RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub id: MemberId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub dob: String,
    pub ministry: String,
    pub status: SacramentStatus,
    pub years_in_faith: u32,
    pub payment_method: PaymentMethod,
    pub registered_at: DateTime<Utc>,
}

impl MemberRecord {
    /// Build the record for a validated applicant
    pub fn from_applicant(
        id: MemberId,
        applicant: &ApplicantInput,
        payment_method: PaymentMethod,
        registered_at: DateTime<Utc>,
    ) -> Self {
        MemberRecord {
            id,
            name: applicant.full_name.trim().to_string(),
            email: applicant.email_address.trim().to_string(),
            phone: applicant.phone_number.trim().to_string(),
            dob: applicant.date_of_birth.trim().to_string(),
            ministry: applicant.resolved_ministry(),
            status: applicant.sacrament_status.unwrap_or(SacramentStatus::None),
            years_in_faith: applicant.years_in_faith.unwrap_or(0),
            payment_method,
            registered_at,
        }
    }

    /// ISO-8601 registration timestamp handed to the admin notification
    pub fn registered_at_iso(&self) -> String {
        self.registered_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn applicant(name: &str) -> ApplicantInput {
        ApplicantInput {
            full_name: name.to_string(),
            date_of_birth: "1990-05-12".to_string(),
            phone_number: "+233 20 000 0000".to_string(),
            email_address: format!("{}@example.org", name.to_lowercase().replace(' ', ".")),
            ministry: Some(Ministry::Choir),
            custom_ministry: String::new(),
            sacrament_status: Some(SacramentStatus::Communicant),
            years_in_faith: Some(12),
            photo: Some("uploads/passport.jpg".to_string()),
            payment_proof: None,
        }
    }
}
