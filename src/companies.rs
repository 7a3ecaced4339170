use log::debug;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::clock::{Clock, IdGenerator, stamp_after};
use crate::codec::{CURRENT_VERSION, CollectionCodec, Migration};
use crate::error::{ServiceError, ServiceResult, StorageError};
use crate::models::{
    Company, Contact, CreateCompanyInput, CreateContactInput, UpdateCompanyInput,
    UpdateContactInput,
};
use crate::store::KeyValueStore;

pub const STORAGE_KEY: &str = "jobes-companies";

fn default_companies(now: String) -> Vec<Company> {
    vec![
        Company {
            id: "jobes-default".to_string(),
            name: "Jobes".to_string(),
            description: "Your personal job tracker dashboard. Manage job opportunities, professional contacts, and application progress all in one place.".to_string(),
            website_url: Some("https://jobes.app".to_string()),
            linkedin_url: None,
            icon_urls: vec!["https://jobes.app/favicon.ico".to_string()],
            contacts: vec![],
            created_at: now.clone(),
            updated_at: now.clone(),
            extra: Map::new(),
        },
        Company {
            id: "silver-default".to_string(),
            name: "Silver.dev".to_string(),
            description: "Silver is a recruiting agency helping top US startups acquire the best LatAm talent.".to_string(),
            website_url: Some("https://silver.dev".to_string()),
            linkedin_url: Some("https://linkedin.com/company/silver-dev".to_string()),
            icon_urls: vec!["https://silver.dev/favicon.ico".to_string()],
            contacts: vec![],
            created_at: now.clone(),
            updated_at: now,
            extra: Map::new(),
        },
    ]
}

/// v0 -> v1: companies stored before icons existed get them derived from
/// their website. Records are otherwise left as they are.
fn add_icon_urls(mut value: Value) -> Result<Value, StorageError> {
    let companies = value
        .as_array_mut()
        .ok_or_else(|| StorageError::read("company collection is not an array"))?;
    for company in companies.iter_mut().filter_map(Value::as_object_mut) {
        if !company.contains_key("iconUrls") {
            let website = company.get("websiteUrl").and_then(Value::as_str);
            company.insert("iconUrls".to_string(), json!(build_icon_urls(website)));
        }
        if !company.contains_key("contacts") {
            company.insert("contacts".to_string(), json!([]));
        }
    }
    Ok(value)
}

/// Candidate icon locations for a company website. Pure string construction;
/// nothing is fetched. A URL without a scheme is read as `https://`.
pub fn build_icon_urls(website_url: Option<&str>) -> Vec<String> {
    let Some(url) = website_url.map(str::trim).filter(|u| !u.is_empty()) else {
        return vec![];
    };

    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => ("http", rest),
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("https") => ("https", rest),
        Some(_) => return vec![],
        None => ("https", url),
    };

    let Some(host) = extract_host(rest) else {
        return vec![];
    };
    let base = format!("{scheme}://{host}");

    vec![
        format!("{base}/favicon.ico"),
        format!("{base}/favicon.png"),
        format!("{base}/apple-touch-icon.png"),
        format!("https://www.google.com/s2/favicons?domain={host}&sz=64"),
    ]
}

// Authority up to the first path/query/fragment delimiter, minus userinfo and port.
fn extract_host(rest: &str) -> Option<String> {
    let authority = rest
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => host_port,
    };
    // Internationalized labels are kept as typed rather than punycode-encoded.
    let valid = !host.is_empty()
        && !host.starts_with('.')
        && host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '.');
    valid.then(|| host.to_lowercase())
}

/// Applies an update to a company. Icons: explicit override, else rebuilt
/// from a supplied website, else kept.
pub fn merge_company(existing: &Company, input: &UpdateCompanyInput, now: String) -> Company {
    let mut company = existing.clone();
    if let Some(name) = &input.name {
        company.name = name.clone();
    }
    if let Some(description) = &input.description {
        company.description = description.clone();
    }
    if let Some(website_url) = &input.website_url {
        company.website_url = website_url.clone();
    }
    if let Some(linkedin_url) = &input.linkedin_url {
        company.linkedin_url = linkedin_url.clone();
    }
    company.icon_urls = match (&input.icon_urls, &input.website_url) {
        (Some(icons), _) => icons.clone(),
        (None, Some(website_url)) => build_icon_urls(website_url.as_deref()),
        (None, None) => existing.icon_urls.clone(),
    };
    company.updated_at = stamp_after(now, &existing.updated_at);
    company
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanySortColumn {
    Name,
    Contacts,
    CreatedAt,
    UpdatedAt,
}

impl std::str::FromStr for CompanySortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "contacts" => Ok(Self::Contacts),
            "created" | "created-at" => Ok(Self::CreatedAt),
            "updated" | "updated-at" => Ok(Self::UpdatedAt),
            _ => Err(format!(
                "unknown sort column '{s}' (expected name, contacts, created, updated)"
            )),
        }
    }
}

/// Orders a listing for display; storage order is untouched.
pub fn sort_companies(companies: &mut [Company], column: CompanySortColumn, descending: bool) {
    companies.sort_by(|a, b| {
        let ord = match column {
            CompanySortColumn::Name => compare_names(&a.name, &b.name),
            CompanySortColumn::Contacts => a.contacts.len().cmp(&b.contacts.len()),
            CompanySortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
            CompanySortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        };
        if descending { ord.reverse() } else { ord }
    });
}

pub struct CompanyService {
    codec: CollectionCodec<Company>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl CompanyService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let seed_clock = clock.clone();
        let codec = CollectionCodec::new(store, STORAGE_KEY, move || {
            default_companies(seed_clock.now())
        })
        .with_migrations(CURRENT_VERSION, [(0, add_icon_urls as Migration)]);
        Self { codec, clock, ids }
    }

    pub fn list(&self) -> ServiceResult<Vec<Company>> {
        Ok(self.codec.load()?)
    }

    pub fn get(&self, id: &str) -> ServiceResult<Company> {
        self.codec
            .load()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ServiceError::CompanyNotFound(id.to_string()))
    }

    pub fn create(&self, input: CreateCompanyInput) -> ServiceResult<Company> {
        let mut companies = self.codec.load()?;
        let now = self.clock.now();
        let company = Company {
            id: self.ids.next_id(),
            icon_urls: build_icon_urls(input.website_url.as_deref()),
            name: input.name,
            description: input.description,
            website_url: input.website_url,
            linkedin_url: input.linkedin_url,
            contacts: vec![],
            created_at: now.clone(),
            updated_at: now,
            extra: Map::new(),
        };
        companies.push(company.clone());
        self.codec.save(&companies)?;
        debug!("created company {} ({})", company.id, company.name);
        Ok(company)
    }

    pub fn update(&self, id: &str, input: UpdateCompanyInput) -> ServiceResult<Company> {
        let mut companies = self.codec.load()?;
        let index = Self::position(&companies, id)?;
        let updated = merge_company(&companies[index], &input, self.clock.now());
        companies[index] = updated.clone();
        self.codec.save(&companies)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> ServiceResult<()> {
        let mut companies = self.codec.load()?;
        let index = Self::position(&companies, id)?;
        companies.remove(index);
        self.codec.save(&companies)?;
        debug!("deleted company {}", id);
        Ok(())
    }

    /// Exact, case-sensitive name lookup; creates a bare company when nothing matches.
    pub fn find_or_create_by_name(&self, name: &str) -> ServiceResult<Company> {
        if let Some(existing) = self.codec.load()?.into_iter().find(|c| c.name == name) {
            return Ok(existing);
        }
        self.create(CreateCompanyInput {
            name: name.to_string(),
            ..Default::default()
        })
    }

    // --- Contacts ---

    pub fn add_contact(&self, company_id: &str, input: CreateContactInput) -> ServiceResult<Contact> {
        let mut companies = self.codec.load()?;
        let index = Self::position(&companies, company_id)?;
        let contact = Contact {
            id: self.ids.next_id(),
            name: input.name,
            role: input.role,
            linkedin_url: input.linkedin_url,
            country: input.country,
            extra: Map::new(),
        };
        let company = &mut companies[index];
        company.contacts.push(contact.clone());
        company.updated_at = stamp_after(self.clock.now(), &company.updated_at);
        self.codec.save(&companies)?;
        Ok(contact)
    }

    pub fn update_contact(
        &self,
        company_id: &str,
        contact_id: &str,
        input: UpdateContactInput,
    ) -> ServiceResult<Contact> {
        let mut companies = self.codec.load()?;
        let index = Self::position(&companies, company_id)?;
        let company = &mut companies[index];
        let contact = company
            .contacts
            .iter_mut()
            .find(|c| c.id == contact_id)
            .ok_or_else(|| ServiceError::ContactNotFound(contact_id.to_string()))?;
        input.apply_to(contact);
        let updated = contact.clone();
        company.updated_at = stamp_after(self.clock.now(), &company.updated_at);
        self.codec.save(&companies)?;
        Ok(updated)
    }

    pub fn remove_contact(&self, company_id: &str, contact_id: &str) -> ServiceResult<()> {
        let mut companies = self.codec.load()?;
        let index = Self::position(&companies, company_id)?;
        let company = &mut companies[index];
        let contact_index = company
            .contacts
            .iter()
            .position(|c| c.id == contact_id)
            .ok_or_else(|| ServiceError::ContactNotFound(contact_id.to_string()))?;
        company.contacts.remove(contact_index);
        company.updated_at = stamp_after(self.clock.now(), &company.updated_at);
        self.codec.save(&companies)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.codec.clear()
    }

    fn position(companies: &[Company], id: &str) -> ServiceResult<usize> {
        companies
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ServiceError::CompanyNotFound(id.to_string()))
    }
}

/// Case-insensitive name comparison used by listings.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}
