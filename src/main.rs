use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::{Color, Colorize};
use log::{Level, LevelFilter};

use jobes::applications::{ApplicationSortColumn, sort_applications};
use jobes::client::QueryClient;
use jobes::companies::{CompanySortColumn, sort_companies};
use jobes::config::{Config, StoreKind};
use jobes::models::{
    Application, ApplicationMethod, ApplicationStatus, Company, CreateApplicationInput,
    CreateCompanyInput, CreateContactInput, UpdateApplicationInput, UpdateCompanyInput,
    UpdateContactInput,
};

#[derive(Parser)]
#[command(name = "jobes")]
#[command(about = "Job search tracker - companies, contacts and applications")]
struct Cli {
    /// Path to the database file
    #[arg(long, global = true, env = "JOBES_DB")]
    db: Option<PathBuf>,

    /// Storage backend
    #[arg(long, global = true, value_enum, default_value = "sqlite")]
    store: StoreKind,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true, env = "JOBES_LOG", default_value = "warn")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage companies
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Manage a company's contacts
    Contact {
        #[command(subcommand)]
        command: ContactCommands,
    },

    /// Manage applications
    App {
        #[command(subcommand)]
        command: AppCommands,
    },

    /// Drop all stored data; the next command starts from the defaults
    Reset,
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// List companies
    List {
        /// Sort column (name, contacts, created, updated)
        #[arg(short, long, default_value = "name")]
        sort: CompanySortColumn,

        /// Sort descending
        #[arg(long)]
        desc: bool,
    },

    /// Show company details, contacts and applications
    Show {
        /// Company ID
        id: String,
    },

    /// Add a company
    Add {
        /// Company name
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Website, used to derive the company icons
        #[arg(short, long)]
        website: Option<String>,

        #[arg(short, long)]
        linkedin: Option<String>,
    },

    /// Edit a company
    Edit {
        /// Company ID
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long, conflicts_with = "clear_website")]
        website: Option<String>,

        /// Remove the website
        #[arg(long)]
        clear_website: bool,

        #[arg(short, long, conflicts_with = "clear_linkedin")]
        linkedin: Option<String>,

        /// Remove the LinkedIn URL
        #[arg(long)]
        clear_linkedin: bool,
    },

    /// Remove a company
    Rm {
        /// Company ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ContactCommands {
    /// Add a contact to a company
    Add {
        /// Company ID
        company_id: String,

        /// Contact name
        name: String,

        #[arg(short, long, default_value = "")]
        role: String,

        #[arg(short, long, default_value = "")]
        country: String,

        #[arg(short, long)]
        linkedin: Option<String>,
    },

    /// Edit a contact
    Edit {
        /// Company ID
        company_id: String,

        /// Contact ID
        contact_id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        role: Option<String>,

        #[arg(short, long)]
        country: Option<String>,

        #[arg(short, long, conflicts_with = "clear_linkedin")]
        linkedin: Option<String>,

        /// Remove the LinkedIn URL
        #[arg(long)]
        clear_linkedin: bool,
    },

    /// Remove a contact
    Rm {
        /// Company ID
        company_id: String,

        /// Contact ID
        contact_id: String,
    },
}

#[derive(Subcommand)]
enum AppCommands {
    /// List applications
    List {
        /// Filter by status (applied, screening, interviewing, offer, rejected, withdrawn)
        #[arg(long)]
        status: Option<ApplicationStatus>,

        /// Sort column (position, company, status, created, updated)
        #[arg(short, long, default_value = "updated")]
        sort: ApplicationSortColumn,

        /// Sort descending
        #[arg(long)]
        desc: bool,
    },

    /// Show application details
    Show {
        /// Application ID
        id: String,
    },

    /// Add an application; the company is created if it doesn't exist yet
    Add {
        /// Position title
        position: String,

        /// Company name
        #[arg(short, long)]
        company: String,

        #[arg(long, default_value = "applied")]
        status: ApplicationStatus,

        /// How you applied (cold-email, referral, job-board, linkedin, other)
        #[arg(short, long, default_value = "other")]
        method: ApplicationMethod,

        /// Job posting URL
        #[arg(short, long)]
        url: Option<String>,

        #[arg(long)]
        salary: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Edit an application
    Edit {
        /// Application ID
        id: String,

        #[arg(short, long)]
        position: Option<String>,

        /// Move to another company by name
        #[arg(short, long)]
        company: Option<String>,

        #[arg(long)]
        status: Option<ApplicationStatus>,

        #[arg(short, long)]
        method: Option<ApplicationMethod>,

        #[arg(short, long, conflicts_with = "clear_url")]
        url: Option<String>,

        #[arg(long)]
        clear_url: bool,

        #[arg(long, conflicts_with = "clear_salary")]
        salary: Option<String>,

        #[arg(long)]
        clear_salary: bool,

        #[arg(short, long, conflicts_with = "clear_notes")]
        notes: Option<String>,

        #[arg(long)]
        clear_notes: bool,
    },

    /// Move an application to a new status
    Status {
        /// Application ID
        id: String,

        /// New status
        status: ApplicationStatus,
    },

    /// Remove an application
    Rm {
        /// Application ID
        id: String,
    },
}

fn setup_logging(level: LevelFilter) -> Result<()> {
    fern::Dispatch::new()
        .format(move |out, message, record| {
            let level = record.level();
            let color = match level {
                Level::Error => Color::Red,
                Level::Warn => Color::Yellow,
                Level::Info => Color::Blue,
                Level::Debug => Color::Magenta,
                Level::Trace => Color::Green,
            };
            out.finish(format_args!(
                "{} {}",
                (level.to_string().to_lowercase() + ":").color(color),
                message
            ))
        })
        .level(level)
        .chain(io::stderr())
        .apply()
        .context("Failed to initialize logging")
}

/// `Some(None)` clears the field, `None` leaves it untouched.
fn nullable(value: Option<String>, clear: bool) -> Option<Option<String>> {
    if clear { Some(None) } else { value.map(Some) }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_wrapped(label: &str, text: &str) {
    println!("\n--- {} ---", label);
    for line in textwrap::wrap(text, 78) {
        println!("{}", line);
    }
}

fn print_company(company: &Company, applications: &[Application]) {
    println!("Company {}", company.id);
    println!("Name: {}", company.name);
    if let Some(website) = &company.website_url {
        println!("Website: {}", website);
    }
    if let Some(linkedin) = &company.linkedin_url {
        println!("LinkedIn: {}", linkedin);
    }
    if let Some(icon) = company.icon_urls.first() {
        println!("Icon: {}", icon);
    }
    println!("Created: {}", company.created_at);
    println!("Updated: {}", company.updated_at);
    if !company.description.is_empty() {
        print_wrapped("Description", &company.description);
    }

    println!("\nContacts ({}):", company.contacts.len());
    for contact in &company.contacts {
        let mut line = format!("  {} - {}", contact.id, contact.name);
        if !contact.role.is_empty() {
            line.push_str(&format!(", {}", contact.role));
        }
        if !contact.country.is_empty() {
            line.push_str(&format!(" ({})", contact.country));
        }
        println!("{}", line);
        if let Some(linkedin) = &contact.linkedin_url {
            println!("      {}", linkedin);
        }
    }

    println!("\nApplications ({}):", applications.len());
    for app in applications {
        println!("  {} - {} ({})", app.id, app.position, app.status);
    }
}

fn print_application(app: &Application, company: Option<&Company>) {
    println!("Application {}", app.id);
    println!("Position: {}", app.position);
    match company {
        Some(company) => println!("Company: {} ({})", company.name, company.id),
        None => println!("Company: {} (company removed)", app.company),
    }
    println!("Status: {}", app.status);
    println!("Method: {}", app.method);
    if let Some(url) = &app.relevant_url {
        println!("URL: {}", url);
    }
    if let Some(salary) = &app.salary {
        println!("Salary: {}", salary);
    }
    println!("Created: {}", app.created_at);
    println!("Updated: {}", app.updated_at);
    if let Some(notes) = &app.notes {
        print_wrapped("Notes", notes);
    }
}

async fn run_company(client: &QueryClient, command: CompanyCommands) -> Result<()> {
    match command {
        CompanyCommands::List { sort, desc } => {
            let mut companies = client.companies().await?;
            if companies.is_empty() {
                println!("No companies found.");
            } else {
                sort_companies(&mut companies, sort, desc);
                println!("{:<38} {:<24} {:>8} {:<30}", "ID", "NAME", "CONTACTS", "WEBSITE");
                println!("{}", "-".repeat(103));
                for company in companies {
                    println!(
                        "{:<38} {:<24} {:>8} {:<30}",
                        truncate(&company.id, 38),
                        truncate(&company.name, 24),
                        company.contacts.len(),
                        truncate(&company.website_url.unwrap_or_default(), 30)
                    );
                }
            }
        }

        CompanyCommands::Show { id } => {
            let company = client.company(&id).await?;
            let applications: Vec<Application> = client
                .applications()
                .await?
                .into_iter()
                .filter(|a| a.company_id == company.id)
                .collect();
            print_company(&company, &applications);
        }

        CompanyCommands::Add {
            name,
            description,
            website,
            linkedin,
        } => {
            let company = client
                .create_company(CreateCompanyInput {
                    name,
                    description,
                    website_url: website,
                    linkedin_url: linkedin,
                })
                .await?;
            println!("Added company '{}' ({})", company.name, company.id);
        }

        CompanyCommands::Edit {
            id,
            name,
            description,
            website,
            clear_website,
            linkedin,
            clear_linkedin,
        } => {
            let company = client
                .update_company(
                    &id,
                    UpdateCompanyInput {
                        name,
                        description,
                        website_url: nullable(website, clear_website),
                        linkedin_url: nullable(linkedin, clear_linkedin),
                        icon_urls: None,
                    },
                )
                .await?;
            println!("Updated company '{}'", company.name);
        }

        CompanyCommands::Rm { id } => {
            client.delete_company(&id).await?;
            println!("Removed company {}", id);
        }
    }
    Ok(())
}

async fn run_contact(client: &QueryClient, command: ContactCommands) -> Result<()> {
    match command {
        ContactCommands::Add {
            company_id,
            name,
            role,
            country,
            linkedin,
        } => {
            let contact = client
                .add_contact(
                    &company_id,
                    CreateContactInput {
                        name,
                        role,
                        linkedin_url: linkedin,
                        country,
                    },
                )
                .await?;
            println!("Added contact '{}' ({})", contact.name, contact.id);
        }

        ContactCommands::Edit {
            company_id,
            contact_id,
            name,
            role,
            country,
            linkedin,
            clear_linkedin,
        } => {
            let contact = client
                .update_contact(
                    &company_id,
                    &contact_id,
                    UpdateContactInput {
                        name,
                        role,
                        linkedin_url: nullable(linkedin, clear_linkedin),
                        country,
                    },
                )
                .await?;
            println!("Updated contact '{}'", contact.name);
        }

        ContactCommands::Rm {
            company_id,
            contact_id,
        } => {
            client.remove_contact(&company_id, &contact_id).await?;
            println!("Removed contact {}", contact_id);
        }
    }
    Ok(())
}

async fn run_app(client: &QueryClient, command: AppCommands) -> Result<()> {
    match command {
        AppCommands::List { status, sort, desc } => {
            let mut applications: Vec<Application> = client
                .applications()
                .await?
                .into_iter()
                .filter(|a| status.is_none_or(|s| a.status == s))
                .collect();
            if applications.is_empty() {
                println!("No applications found.");
            } else {
                sort_applications(&mut applications, sort, desc);
                println!(
                    "{:<38} {:<13} {:<28} {:<20} {:<11}",
                    "ID", "STATUS", "POSITION", "COMPANY", "METHOD"
                );
                println!("{}", "-".repeat(114));
                for app in applications {
                    println!(
                        "{:<38} {:<13} {:<28} {:<20} {:<11}",
                        truncate(&app.id, 38),
                        app.status.as_str(),
                        truncate(&app.position, 28),
                        truncate(&app.company, 20),
                        app.method.as_str()
                    );
                }
            }
        }

        AppCommands::Show { id } => {
            let app = client.application(&id).await?;
            let company = client.company(&app.company_id).await.ok();
            print_application(&app, company.as_ref());
        }

        AppCommands::Add {
            position,
            company,
            status,
            method,
            url,
            salary,
            notes,
        } => {
            let app = client
                .create_application(CreateApplicationInput {
                    position,
                    company,
                    status,
                    relevant_url: url,
                    method,
                    salary,
                    notes,
                })
                .await?;
            println!(
                "Added application '{}' at {} ({})",
                app.position, app.company, app.id
            );
        }

        AppCommands::Edit {
            id,
            position,
            company,
            status,
            method,
            url,
            clear_url,
            salary,
            clear_salary,
            notes,
            clear_notes,
        } => {
            let app = client
                .update_application(
                    &id,
                    UpdateApplicationInput {
                        position,
                        company,
                        status,
                        relevant_url: nullable(url, clear_url),
                        method,
                        salary: nullable(salary, clear_salary),
                        notes: nullable(notes, clear_notes),
                    },
                )
                .await?;
            println!("Updated application '{}'", app.position);
        }

        AppCommands::Status { id, status } => {
            let app = client
                .update_application(
                    &id,
                    UpdateApplicationInput {
                        status: Some(status),
                        ..Default::default()
                    },
                )
                .await?;
            println!("Application '{}' is now {}", app.position, app.status);
        }

        AppCommands::Rm { id } => {
            client.delete_application(&id).await?;
            println!("Removed application {}", id);
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level)?;

    let config = Config::new(cli.store, cli.db);
    let store = config
        .open_store()
        .with_context(|| format!("Failed to open store at {}", config.db_path.display()))?;
    log::debug!("using {:?} store at {}", config.store, config.db_path.display());
    let client = QueryClient::open(store);

    match cli.command {
        Commands::Company { command } => run_company(&client, command).await?,
        Commands::Contact { command } => run_contact(&client, command).await?,
        Commands::App { command } => run_app(&client, command).await?,
        Commands::Reset => {
            client.reset()?;
            println!("All data cleared. Defaults will be restored on next use.");
        }
    }

    Ok(())
}
