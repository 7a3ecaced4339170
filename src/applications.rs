use log::debug;
use serde_json::Map;
use std::sync::Arc;

use crate::clock::{Clock, IdGenerator, stamp_after};
use crate::codec::CollectionCodec;
use crate::companies::{CompanyService, compare_names};
use crate::error::{ServiceError, ServiceResult, StorageError};
use crate::models::{
    Application, ApplicationMethod, ApplicationStatus, CreateApplicationInput,
    UpdateApplicationInput,
};
use crate::store::KeyValueStore;

pub const STORAGE_KEY: &str = "jobes-applications";

/// Placeholder `companyId` shown until the real company is resolved.
pub const PENDING_COMPANY_ID: &str = "pending";

fn default_applications(now: String) -> Vec<Application> {
    vec![Application {
        id: "app-silver-swe".to_string(),
        position: "Software Engineer".to_string(),
        company: "Silver.dev".to_string(),
        company_id: "silver-default".to_string(),
        status: ApplicationStatus::Applied,
        relevant_url: Some("https://silver.dev/careers".to_string()),
        method: ApplicationMethod::JobBoard,
        salary: Some("$120,000".to_string()),
        notes: Some(
            "Great opportunity to work with top US startups. Remote-friendly position.".to_string(),
        ),
        created_at: now.clone(),
        updated_at: now,
        extra: Map::new(),
    }]
}

/// Builds a new application record. `company_id` is whatever the caller resolved
/// (or the pending placeholder for optimistic display).
pub fn new_application(
    id: String,
    input: CreateApplicationInput,
    company_id: String,
    now: String,
) -> Application {
    Application {
        id,
        position: input.position,
        company: input.company,
        company_id,
        status: input.status,
        relevant_url: input.relevant_url,
        method: input.method,
        salary: input.salary,
        notes: input.notes,
        created_at: now.clone(),
        updated_at: now,
        extra: Map::new(),
    }
}

/// Merges an update over an application, keeping its `company_id`.
pub fn merge_application(
    existing: &Application,
    input: &UpdateApplicationInput,
    now: String,
) -> Application {
    let mut application = existing.clone();
    input.apply_to(&mut application);
    application.updated_at = stamp_after(now, &existing.updated_at);
    application
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationSortColumn {
    Position,
    Company,
    Status,
    CreatedAt,
    UpdatedAt,
}

impl std::str::FromStr for ApplicationSortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "position" => Ok(Self::Position),
            "company" => Ok(Self::Company),
            "status" => Ok(Self::Status),
            "created" | "created-at" => Ok(Self::CreatedAt),
            "updated" | "updated-at" => Ok(Self::UpdatedAt),
            _ => Err(format!(
                "unknown sort column '{s}' (expected position, company, status, created, updated)"
            )),
        }
    }
}

pub fn sort_applications(
    applications: &mut [Application],
    column: ApplicationSortColumn,
    descending: bool,
) {
    applications.sort_by(|a, b| {
        let ord = match column {
            ApplicationSortColumn::Position => compare_names(&a.position, &b.position),
            ApplicationSortColumn::Company => compare_names(&a.company, &b.company),
            // Pipeline order, not alphabetical.
            ApplicationSortColumn::Status => a.status.cmp(&b.status),
            ApplicationSortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
            ApplicationSortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        };
        if descending { ord.reverse() } else { ord }
    });
}

pub struct ApplicationService {
    codec: CollectionCodec<Application>,
    companies: Arc<CompanyService>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl ApplicationService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        companies: Arc<CompanyService>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let seed_clock = clock.clone();
        Self {
            codec: CollectionCodec::new(store, STORAGE_KEY, move || {
                default_applications(seed_clock.now())
            }),
            companies,
            clock,
            ids,
        }
    }

    pub fn list(&self) -> ServiceResult<Vec<Application>> {
        Ok(self.codec.load()?)
    }

    pub fn get(&self, id: &str) -> ServiceResult<Application> {
        self.codec
            .load()?
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| ServiceError::ApplicationNotFound(id.to_string()))
    }

    /// Resolves the company first, which may write a new company before the
    /// application itself is saved.
    pub fn create(&self, input: CreateApplicationInput) -> ServiceResult<Application> {
        let mut applications = self.codec.load()?;
        let company = self.companies.find_or_create_by_name(&input.company)?;
        let application =
            new_application(self.ids.next_id(), input, company.id, self.clock.now());
        applications.push(application.clone());
        self.codec.save(&applications)?;
        debug!(
            "created application {} ({} at {})",
            application.id, application.position, application.company
        );
        Ok(application)
    }

    pub fn update(&self, id: &str, input: UpdateApplicationInput) -> ServiceResult<Application> {
        let mut applications = self.codec.load()?;
        let index = Self::position(&applications, id)?;
        let existing = &applications[index];

        let company_id = match input.company.as_deref() {
            Some(name) if !name.is_empty() && name != existing.company => {
                self.companies.find_or_create_by_name(name)?.id
            }
            _ => existing.company_id.clone(),
        };

        let mut updated = merge_application(existing, &input, self.clock.now());
        updated.company_id = company_id;
        applications[index] = updated.clone();
        self.codec.save(&applications)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> ServiceResult<()> {
        let mut applications = self.codec.load()?;
        let index = Self::position(&applications, id)?;
        applications.remove(index);
        self.codec.save(&applications)?;
        debug!("deleted application {}", id);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.codec.clear()
    }

    fn position(applications: &[Application], id: &str) -> ServiceResult<usize> {
        applications
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| ServiceError::ApplicationNotFound(id.to_string()))
    }
}
