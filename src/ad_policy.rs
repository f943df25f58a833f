//! Ad-level policy data: one row per ad and policy topic entry.

use crate::api_client::AdsApi;
use crate::error::Error;
use crate::gaql::strip_comments;
use crate::report::{extract_field, lookup, Cell, Report};
use chrono::NaiveDate;
use log::{error, info};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Output columns with the API field each one is read from.
const AD_POLICY_FIELDS: [(&str, &str); 12] = [
    ("customer_id", "customer.id"),
    ("customer_descriptive_name", "customer.descriptive_name"),
    ("campaign_id", "campaign.id"),
    ("campaign_name", "campaign.name"),
    ("campaign_status", "campaign.status"),
    ("campaign_primary_status", "campaign.primary_status"),
    ("ad_group_id", "ad_group.id"),
    ("ad_group_name", "ad_group.name"),
    ("ad_group_status", "ad_group.status"),
    ("ad_id", "ad_group_ad.ad.id"),
    ("ad_group_ad_status", "ad_group_ad.status"),
    (
        "policy_summary_approval_status",
        "ad_group_ad.policy_summary.approval_status",
    ),
];

const TOPIC_COLUMN: &str = "ad_policy_summary_policy_topic_entry_topic";
const TYPE_COLUMN: &str = "ad_policy_summary_policy_topic_entry_type";
const REVIEW_STATUS_COLUMN: &str = "ad_policy_summary_review_status";
const POLICY_TOPIC_ENTRIES_FIELD: &str = "ad_group_ad.policy_summary.policy_topic_entries";
const REVIEW_STATUS_FIELD: &str = "ad_group_ad.policy_summary.review_status";

/// Reads a query file with its comments removed.
pub fn load_gaql_query(path: impl AsRef<Path>) -> Result<String, Error> {
    info!("Loading Google Ads Query Language query.");
    let raw = fs::read_to_string(path)?;
    Ok(strip_comments(&raw))
}

/// Collects every customer's result rows.
///
/// A customer whose request fails is logged and left out.
pub async fn fetch_data_from_accounts_stream(
    api: &dyn AdsApi,
    customer_ids: &[i64],
    query: &str,
) -> Vec<Value> {
    let mut all_results = Vec::new();

    for customer_id in customer_ids {
        match api.search_stream(*customer_id, query).await {
            Ok(rows) => all_results.extend(rows),
            Err(err) => error!("Error fetching data for customer {}: {}", customer_id, err),
        }
    }

    all_results
}

/// Flattens ad rows into one row per policy topic entry.
///
/// Ads without topic entries still produce one row, with null topic and type.
pub fn process_ads_policy_data(rows: &[Value], today: NaiveDate) -> Report {
    let event_date = today.format("%Y-%m-%d").to_string();

    let mut report = Report::new().with_column("event_date", Vec::new());
    for (column, _) in AD_POLICY_FIELDS {
        report.set_column(column, Vec::new());
    }
    for column in [TOPIC_COLUMN, TYPE_COLUMN, REVIEW_STATUS_COLUMN] {
        report.set_column(column, Vec::new());
    }

    for row in rows {
        let shared: Vec<Cell> = AD_POLICY_FIELDS
            .iter()
            .map(|(_, field)| extract_field(row, field, None))
            .collect();
        let review_status = extract_field(row, REVIEW_STATUS_FIELD, None);

        let entries: Vec<(Cell, Cell)> = match lookup(row, POLICY_TOPIC_ENTRIES_FIELD) {
            Some(Value::Array(entries)) if !entries.is_empty() => entries
                .iter()
                .map(|entry| {
                    (
                        extract_field(entry, "topic", None),
                        extract_field(entry, "type", None),
                    )
                })
                .collect(),
            _ => vec![(Cell::Null, Cell::Null)],
        };

        for (topic, entry_type) in entries {
            let mut cells = Vec::with_capacity(AD_POLICY_FIELDS.len() + 4);
            cells.push(Cell::Text(event_date.clone()));
            cells.extend(shared.iter().cloned());
            cells.push(topic);
            cells.push(entry_type);
            cells.push(review_status.clone());
            report.push_row(cells);
        }
    }

    report
}
