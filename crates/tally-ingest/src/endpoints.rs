//! Endpoint catalogue
//!
//! The built-in catalogue covers the accounting resources ingested by default.
//! A TOML file replaces it entirely:
//!
//! ```toml
//! [[endpoints]]
//! name = "invoices"
//! url = "https://api.xero.com/api.xro/2.0/Invoices"
//!
//! [[endpoints]]
//! name = "organisation"
//! url = "https://api.xero.com/api.xro/2.0/Organisation"
//! payload_field = "Organisations"
//! ```

use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tally_common::types::EndpointDescriptor;

/// Default source API base URL
pub const DEFAULT_API_BASE: &str = "https://api.xero.com/api.xro/2.0/";

/// `(name, path under the API base, payload field)`
const CATALOGUE: &[(&str, &str, &str)] = &[
    ("accounts", "Accounts", "Accounts"),
    ("bank_transactions", "BankTransactions", "BankTransactions"),
    ("bank_transfers", "BankTransfers", "BankTransfers"),
    ("batch_payments", "BatchPayments", "BatchPayments"),
    ("branding_themes", "BrandingThemes", "BrandingThemes"),
    ("budgets", "Budgets", "Budgets"),
    ("contact_groups", "ContactGroups", "ContactGroups"),
    ("contacts", "Contacts", "Contacts"),
    ("credit_notes", "CreditNotes", "CreditNotes"),
    ("currencies", "Currencies", "Currencies"),
    ("employees", "Employees", "Employees"),
    ("invoices", "Invoices", "Invoices"),
    ("items", "Items", "Items"),
    ("journals", "Journals", "Journals"),
    ("linked_transactions", "LinkedTransactions", "LinkedTransactions"),
    ("manual_journals", "ManualJournals", "ManualJournals"),
    ("organisation", "Organisation", "Organisations"),
    ("overpayments", "Overpayments", "Overpayments"),
    ("payment_services", "PaymentServices", "PaymentServices"),
    ("payments", "Payments", "Payments"),
    ("prepayments", "Prepayments", "Prepayments"),
    ("purchase_orders", "PurchaseOrders", "PurchaseOrders"),
    ("quotes", "Quotes", "Quotes"),
    ("repeating_invoices", "RepeatingInvoices", "RepeatingInvoices"),
    ("reports__balance_sheet", "Reports/BalanceSheet", "Reports"),
    ("reports__bank_summary", "Reports/BankSummary", "Reports"),
    ("reports__budget_summary", "Reports/BudgetSummary", "Reports"),
    ("reports__executive_summary", "Reports/ExecutiveSummary", "Reports"),
    ("reports__trial_balance", "Reports/TrialBalance", "Reports"),
    ("tax_rates", "TaxRates", "TaxRates"),
    ("tracking_categories", "TrackingCategories", "TrackingCategories"),
    ("users", "Users", "Users"),
];

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// The built-in catalogue rooted at `base`
pub fn default_catalogue(base: &str) -> Vec<EndpointDescriptor> {
    CATALOGUE
        .iter()
        .map(|(name, path, field)| {
            EndpointDescriptor::new(*name, join_url(base, path)).with_payload_field(*field)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogueFile {
    endpoints: Vec<CatalogueEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogueEntry {
    name: String,
    /// Absolute URL, or a path joined onto the API base
    url: String,
    #[serde(default)]
    payload_field: Option<String>,
}

/// Parse a TOML catalogue. Relative URLs are joined onto `base`.
pub fn parse_catalogue(text: &str, base: &str) -> Result<Vec<EndpointDescriptor>> {
    let file: CatalogueFile = toml::from_str(text)
        .map_err(|e| IngestError::config(format!("Invalid endpoint catalogue: {}", e)))?;

    let endpoints: Vec<_> = file
        .endpoints
        .into_iter()
        .map(|entry| {
            let url = if entry.url.starts_with("http://") || entry.url.starts_with("https://") {
                entry.url
            } else {
                join_url(base, &entry.url)
            };
            let endpoint = EndpointDescriptor::new(entry.name, url);
            match entry.payload_field {
                Some(field) => endpoint.with_payload_field(field),
                None => endpoint,
            }
        })
        .collect();

    validate(&endpoints)?;
    Ok(endpoints)
}

pub fn load_catalogue(path: &Path, base: &str) -> Result<Vec<EndpointDescriptor>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        IngestError::config(format!("Cannot read endpoint catalogue {}: {}", path.display(), e))
    })?;
    parse_catalogue(&text, base)
}

/// Names must be non-empty and unique
pub fn validate(endpoints: &[EndpointDescriptor]) -> Result<()> {
    if endpoints.is_empty() {
        return Err(IngestError::config("Endpoint catalogue is empty"));
    }

    let mut seen = HashSet::new();
    for endpoint in endpoints {
        if endpoint.name.trim().is_empty() {
            return Err(IngestError::config(format!(
                "Endpoint with URL {} has an empty name",
                endpoint.url
            )));
        }
        if !seen.insert(endpoint.name.as_str()) {
            return Err(IngestError::config(format!(
                "Duplicate endpoint name '{}'",
                endpoint.name
            )));
        }
    }
    Ok(())
}

/// Restrict the catalogue to `names`, keeping catalogue order.
/// An empty selection keeps everything.
pub fn select(catalogue: &[EndpointDescriptor], names: &[String]) -> Result<Vec<EndpointDescriptor>> {
    if names.is_empty() {
        return Ok(catalogue.to_vec());
    }

    let known: HashSet<&str> = catalogue.iter().map(|e| e.name.as_str()).collect();
    let unknown: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| !known.contains(name))
        .collect();
    if !unknown.is_empty() {
        return Err(IngestError::config(format!(
            "Unknown endpoint(s): {}",
            unknown.join(", ")
        )));
    }

    Ok(catalogue
        .iter()
        .filter(|e| names.iter().any(|n| n == &e.name))
        .cloned()
        .collect())
}
