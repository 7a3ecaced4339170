use serde_json::Map;
use std::sync::Arc;

use crate::applications::{
    ApplicationService, PENDING_COMPANY_ID, merge_application, new_application,
};
use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator, stamp_after};
use crate::companies::{CompanyService, build_icon_urls, merge_company};
use crate::error::StorageError;
use crate::models::{
    Application, Company, Contact, CreateApplicationInput, CreateCompanyInput,
    CreateContactInput, UpdateApplicationInput, UpdateCompanyInput, UpdateContactInput,
};
use crate::query::{MutationKeys, QueryCache, QueryError, keys};
use crate::store::KeyValueStore;

/// Cache-backed reads and optimistic mutations over both services.
pub struct QueryClient {
    cache: QueryCache,
    companies: Arc<CompanyService>,
    applications: Arc<ApplicationService>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl QueryClient {
    pub fn new(
        companies: Arc<CompanyService>,
        applications: Arc<ApplicationService>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            cache: QueryCache::new(),
            companies,
            applications,
            clock,
            ids,
        }
    }

    /// Wires both services over one store with the system clock and UUIDs.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);
        let companies = Arc::new(CompanyService::new(store.clone(), clock.clone(), ids.clone()));
        let applications = Arc::new(ApplicationService::new(
            store,
            companies.clone(),
            clock.clone(),
            ids.clone(),
        ));
        Self::new(companies, applications, clock, ids)
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    // --- Reads ---

    pub async fn companies(&self) -> Result<Vec<Company>, QueryError> {
        self.cache
            .fetch_query(keys::company_list(), || async { self.companies.list() })
            .await
    }

    pub async fn company(&self, id: &str) -> Result<Company, QueryError> {
        self.cache
            .fetch_query(keys::company_detail(id), || async { self.companies.get(id) })
            .await
    }

    pub async fn applications(&self) -> Result<Vec<Application>, QueryError> {
        self.cache
            .fetch_query(keys::application_list(), || async {
                self.applications.list()
            })
            .await
    }

    pub async fn application(&self, id: &str) -> Result<Application, QueryError> {
        self.cache
            .fetch_query(keys::application_detail(id), || async {
                self.applications.get(id)
            })
            .await
    }

    // --- Company mutations ---

    pub async fn create_company(&self, input: CreateCompanyInput) -> Result<Company, QueryError> {
        let list = [keys::company_list()];
        let now = self.clock.now();
        let optimistic = Company {
            id: self.ids.next_id(),
            name: input.name.clone(),
            description: input.description.clone(),
            website_url: input.website_url.clone(),
            linkedin_url: input.linkedin_url.clone(),
            icon_urls: build_icon_urls(input.website_url.as_deref()),
            contacts: vec![],
            created_at: now.clone(),
            updated_at: now,
            extra: Map::new(),
        };

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &list,
                    invalidate: &list,
                },
                |cache| cache.snapshot(&list),
                |cache| {
                    let mut companies: Vec<Company> =
                        cache.get_query_data(&list[0]).unwrap_or_default();
                    companies.push(optimistic);
                    cache.set_query_data(&list[0], companies);
                },
                || async move { self.companies.create(input) },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    pub async fn update_company(
        &self,
        id: &str,
        input: UpdateCompanyInput,
    ) -> Result<Company, QueryError> {
        let touched = [keys::company_list(), keys::company_detail(id)];
        let now = self.clock.now();

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &touched,
                    invalidate: &touched,
                },
                |cache| cache.snapshot(&touched),
                |cache| {
                    cache.update_query_data::<Vec<Company>>(&touched[0], |companies| {
                        companies
                            .into_iter()
                            .map(|c| {
                                if c.id == id {
                                    merge_company(&c, &input, now.clone())
                                } else {
                                    c
                                }
                            })
                            .collect()
                    });
                    cache.update_query_data::<Company>(&touched[1], |c| {
                        merge_company(&c, &input, now.clone())
                    });
                },
                || async { self.companies.update(id, input.clone()) },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    pub async fn delete_company(&self, id: &str) -> Result<(), QueryError> {
        let touched = [keys::company_list(), keys::company_detail(id)];

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &touched,
                    invalidate: &touched,
                },
                |cache| cache.snapshot(&touched),
                |cache| {
                    cache.update_query_data::<Vec<Company>>(&touched[0], |companies| {
                        companies.into_iter().filter(|c| c.id != id).collect()
                    });
                    cache.remove_query(&touched[1]);
                },
                || async { self.companies.delete(id) },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    // --- Contact mutations ---

    /// Applies `f` to one company in the cached list and in its cached detail view.
    fn patch_company(&self, company_id: &str, now: &str, f: impl Fn(&mut Company)) {
        let edit = |mut company: Company| {
            f(&mut company);
            company.updated_at = stamp_after(now.to_string(), &company.updated_at);
            company
        };
        self.cache
            .update_query_data::<Vec<Company>>(&keys::company_list(), |companies| {
                companies
                    .into_iter()
                    .map(|c| if c.id == company_id { edit(c) } else { c })
                    .collect()
            });
        self.cache
            .update_query_data::<Company>(&keys::company_detail(company_id), edit);
    }

    pub async fn add_contact(
        &self,
        company_id: &str,
        input: CreateContactInput,
    ) -> Result<Contact, QueryError> {
        let touched = [keys::company_list(), keys::company_detail(company_id)];
        let now = self.clock.now();
        let optimistic = Contact {
            id: self.ids.next_id(),
            name: input.name.clone(),
            role: input.role.clone(),
            linkedin_url: input.linkedin_url.clone(),
            country: input.country.clone(),
            extra: Map::new(),
        };

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &touched,
                    invalidate: &touched,
                },
                |cache| cache.snapshot(&touched),
                |_| {
                    self.patch_company(company_id, &now, |company| {
                        company.contacts.push(optimistic.clone())
                    })
                },
                || async move { self.companies.add_contact(company_id, input) },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    pub async fn update_contact(
        &self,
        company_id: &str,
        contact_id: &str,
        input: UpdateContactInput,
    ) -> Result<Contact, QueryError> {
        let touched = [keys::company_list(), keys::company_detail(company_id)];
        let now = self.clock.now();

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &touched,
                    invalidate: &touched,
                },
                |cache| cache.snapshot(&touched),
                |_| {
                    self.patch_company(company_id, &now, |company| {
                        for contact in company.contacts.iter_mut().filter(|c| c.id == contact_id) {
                            input.apply_to(contact);
                        }
                    })
                },
                || async {
                    self.companies
                        .update_contact(company_id, contact_id, input.clone())
                },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    pub async fn remove_contact(&self, company_id: &str, contact_id: &str) -> Result<(), QueryError> {
        let touched = [keys::company_list(), keys::company_detail(company_id)];
        let now = self.clock.now();

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &touched,
                    invalidate: &touched,
                },
                |cache| cache.snapshot(&touched),
                |_| {
                    self.patch_company(company_id, &now, |company| {
                        company.contacts.retain(|c| c.id != contact_id)
                    })
                },
                || async { self.companies.remove_contact(company_id, contact_id) },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    // --- Application mutations ---
    //
    // Creating or renaming an application's company can create a Company, so
    // these also invalidate the company list.

    pub async fn create_application(
        &self,
        input: CreateApplicationInput,
    ) -> Result<Application, QueryError> {
        let list = [keys::application_list()];
        let invalidate = [keys::application_list(), keys::company_list()];
        let optimistic = new_application(
            self.ids.next_id(),
            input.clone(),
            PENDING_COMPANY_ID.to_string(),
            self.clock.now(),
        );

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &list,
                    invalidate: &invalidate,
                },
                |cache| cache.snapshot(&list),
                |cache| {
                    let mut applications: Vec<Application> =
                        cache.get_query_data(&list[0]).unwrap_or_default();
                    applications.push(optimistic);
                    cache.set_query_data(&list[0], applications);
                },
                || async move { self.applications.create(input) },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    pub async fn update_application(
        &self,
        id: &str,
        input: UpdateApplicationInput,
    ) -> Result<Application, QueryError> {
        let touched = [keys::application_list(), keys::application_detail(id)];
        let invalidate = [
            keys::application_list(),
            keys::application_detail(id),
            keys::company_list(),
        ];
        let now = self.clock.now();

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &touched,
                    invalidate: &invalidate,
                },
                |cache| cache.snapshot(&touched),
                |cache| {
                    cache.update_query_data::<Vec<Application>>(&touched[0], |applications| {
                        applications
                            .into_iter()
                            .map(|a| {
                                if a.id == id {
                                    merge_application(&a, &input, now.clone())
                                } else {
                                    a
                                }
                            })
                            .collect()
                    });
                    cache.update_query_data::<Application>(&touched[1], |a| {
                        merge_application(&a, &input, now.clone())
                    });
                },
                || async { self.applications.update(id, input.clone()) },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    pub async fn delete_application(&self, id: &str) -> Result<(), QueryError> {
        let touched = [keys::application_list(), keys::application_detail(id)];

        self.cache
            .mutate(
                MutationKeys {
                    cancel: &touched,
                    invalidate: &touched,
                },
                |cache| cache.snapshot(&touched),
                |cache| {
                    cache.update_query_data::<Vec<Application>>(&touched[0], |applications| {
                        applications.into_iter().filter(|a| a.id != id).collect()
                    });
                    cache.remove_query(&touched[1]);
                },
                || async { self.applications.delete(id) },
                |cache, snapshot| cache.restore(snapshot),
            )
            .await
    }

    /// Drops both collections from storage and every cached query; the next
    /// read seeds afresh.
    pub fn reset(&self) -> Result<(), StorageError> {
        self.companies.clear()?;
        self.applications.clear()?;
        self.cache.invalidate_queries(&keys::companies());
        self.cache.invalidate_queries(&keys::applications());
        Ok(())
    }
}
