use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub role: String,
    pub linkedin_url: Option<String>,
    pub country: String,
    /// Stored fields this version doesn't model, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    pub description: String,
    pub website_url: Option<String>,
    pub linkedin_url: Option<String>,
    pub icon_urls: Vec<String>,
    pub contacts: Vec<Contact>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationStatus {
    Applied,
    Screening,
    Interviewing,
    Offer,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 6] = [
        Self::Applied,
        Self::Screening,
        Self::Interviewing,
        Self::Offer,
        Self::Rejected,
        Self::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Screening => "screening",
            Self::Interviewing => "interviewing",
            Self::Offer => "offer",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown status '{s}' (expected one of: applied, screening, interviewing, offer, rejected, withdrawn)"
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationMethod {
    ColdEmail,
    Referral,
    JobBoard,
    Linkedin,
    Other,
}

impl ApplicationMethod {
    pub const ALL: [ApplicationMethod; 5] = [
        Self::ColdEmail,
        Self::Referral,
        Self::JobBoard,
        Self::Linkedin,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdEmail => "cold-email",
            Self::Referral => "referral",
            Self::JobBoard => "job-board",
            Self::Linkedin => "linkedin",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ApplicationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown method '{s}' (expected one of: cold-email, referral, job-board, linkedin, other)"
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub position: String,
    pub company: String,
    pub company_id: String,
    pub status: ApplicationStatus,
    pub relevant_url: Option<String>,
    pub method: ApplicationMethod,
    pub salary: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// --- Inputs ---
//
// `Option<Option<_>>` on update inputs: outer `None` leaves the field alone,
// `Some(None)` clears it.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateCompanyInput {
    pub name: String,
    pub description: String,
    pub website_url: Option<String>,
    pub linkedin_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateCompanyInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub website_url: Option<Option<String>>,
    pub linkedin_url: Option<Option<String>>,
    pub icon_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateContactInput {
    pub name: String,
    pub role: String,
    pub linkedin_url: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateContactInput {
    pub name: Option<String>,
    pub role: Option<String>,
    pub linkedin_url: Option<Option<String>>,
    pub country: Option<String>,
}

impl UpdateContactInput {
    pub fn apply_to(&self, contact: &mut Contact) {
        if let Some(name) = &self.name {
            contact.name = name.clone();
        }
        if let Some(role) = &self.role {
            contact.role = role.clone();
        }
        if let Some(linkedin_url) = &self.linkedin_url {
            contact.linkedin_url = linkedin_url.clone();
        }
        if let Some(country) = &self.country {
            contact.country = country.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateApplicationInput {
    pub position: String,
    pub company: String,
    pub status: ApplicationStatus,
    pub relevant_url: Option<String>,
    pub method: ApplicationMethod,
    pub salary: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateApplicationInput {
    pub position: Option<String>,
    pub company: Option<String>,
    pub status: Option<ApplicationStatus>,
    pub relevant_url: Option<Option<String>>,
    pub method: Option<ApplicationMethod>,
    pub salary: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

impl UpdateApplicationInput {
    /// Overlays the supplied fields. `company_id` and timestamps are the caller's job.
    pub fn apply_to(&self, application: &mut Application) {
        if let Some(position) = &self.position {
            application.position = position.clone();
        }
        if let Some(company) = &self.company {
            application.company = company.clone();
        }
        if let Some(status) = self.status {
            application.status = status;
        }
        if let Some(relevant_url) = &self.relevant_url {
            application.relevant_url = relevant_url.clone();
        }
        if let Some(method) = self.method {
            application.method = method;
        }
        if let Some(salary) = &self.salary {
            application.salary = salary.clone();
        }
        if let Some(notes) = &self.notes {
            application.notes = notes.clone();
        }
    }
}
