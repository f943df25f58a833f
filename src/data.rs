use crate::error::Error;
use crate::report::{Cell, Report};
use datafusion::arrow::array::RecordBatch;
use datafusion::functions_aggregate::count::count;
use datafusion::prelude::{ident, lit, DataFrame, SessionContext};
use log::info;

pub const TIME_SERIES_DATE_COLUMN: &str = "event_date";
pub const CUSTOMER_ID_COLUMN: &str = "customer_id";
pub const CAMPAIGN_ID_COLUMN: &str = "campaign_id";
pub const AD_GROUP_ID_COLUMN: &str = "ad_group_id";
pub const ASSET_TOPICS_COLUMN: &str = "asset_policy_summary_policy_topic_entries_topics";
pub const ASSET_LEVEL_COLUMN: &str = "asset_level";
pub const COUNTS_COLUMN: &str = "counts";

pub const GROUP_BY_ASSET_POLICY_COLUMNS: [&str; 10] = [
    TIME_SERIES_DATE_COLUMN,
    CUSTOMER_ID_COLUMN,
    "customer_descriptive_name",
    "asset_id",
    "asset_source",
    "asset_type",
    "asset_policy_summary_review_status",
    ASSET_TOPICS_COLUMN,
    "asset_policy_summary_approval_status",
    ASSET_LEVEL_COLUMN,
];

/// The level of the account hierarchy an asset is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetLevel {
    AdGroup,
    Campaign,
    Account,
}

impl AssetLevel {
    /// Derives the level from which id columns the report carries.
    pub fn of(report: &Report) -> Self {
        match (
            report.has_column(AD_GROUP_ID_COLUMN),
            report.has_column(CAMPAIGN_ID_COLUMN),
        ) {
            (true, true) => AssetLevel::AdGroup,
            (_, true) => AssetLevel::Campaign,
            _ => AssetLevel::Account,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetLevel::AdGroup => "Ad Group",
            AssetLevel::Campaign => "Campaign",
            AssetLevel::Account => "Account",
        }
    }
}

/// Combines account, campaign and ad group asset reports into one policy table.
///
/// Reports without rows, or whose first `customer_id` is `0`, are skipped. Every other
/// report gets an `asset_level` column, its policy topics flattened into text, and is
/// reduced to one row per [`GROUP_BY_ASSET_POLICY_COLUMNS`] group with a `counts` column.
/// Per-report results keep the input order.
///
/// # Arguments
/// * `ctx` - A reference to the [`SessionContext`] for DataFrame operations
/// * `reports` - The asset reports to combine
///
/// # Returns
/// A Result containing either the combined [`DataFrame`] or an [`Error`]
pub async fn combine_assets_reports(
    ctx: &SessionContext,
    reports: Vec<Report>,
) -> Result<DataFrame, Error> {
    info!("Combining {} asset reports", reports.len());

    let mut combined: Vec<RecordBatch> = Vec::new();

    for mut report in reports {
        if is_placeholder(&report)? {
            continue;
        }

        let level = AssetLevel::of(&report);
        let rows = report.num_rows();
        report.set_column(ASSET_LEVEL_COLUMN, vec![Cell::from(level.as_str()); rows]);

        for column in GROUP_BY_ASSET_POLICY_COLUMNS {
            if !report.has_column(column) {
                return Err(Error::MissingColumn {
                    column: column.to_string(),
                });
            }
        }

        if let Some(topics) = report.column_mut(ASSET_TOPICS_COLUMN) {
            for cell in topics.iter_mut() {
                *cell = std::mem::replace(cell, Cell::Null).flatten_list();
            }
        }

        let df = ctx.read_batch(report.to_record_batch()?)?;
        let counted = count_groups(df, &GROUP_BY_ASSET_POLICY_COLUMNS)?;
        combined.extend(counted.collect().await?);
    }

    Ok(ctx.read_batches(combined)?)
}

/// Rolls a report up into the number of rows per (`event_date`, `variable_column`).
///
/// # Arguments
/// * `df` - The report to roll up
/// * `variable_column` - The column counted per day
///
/// # Returns
/// A Result containing either the time series [`DataFrame`] or an [`Error`]
pub fn extract_time_series(df: DataFrame, variable_column: &str) -> Result<DataFrame, Error> {
    info!("Creating time series of {}", variable_column);
    count_groups(df, &[TIME_SERIES_DATE_COLUMN, variable_column])
}

/// Counts rows per group, ordered by the group columns.
///
/// Rows with a null in any group column do not belong to a group.
fn count_groups(df: DataFrame, group_columns: &[&str]) -> Result<DataFrame, Error> {
    let complete_rows = group_columns
        .iter()
        .map(|name| ident(*name).is_not_null())
        .reduce(|all, next| all.and(next));

    let df = match complete_rows {
        Some(predicate) => df.filter(predicate)?,
        None => df,
    };

    let counted = df
        .aggregate(
            group_columns.iter().map(|name| ident(*name)).collect(),
            vec![count(lit(1)).alias(COUNTS_COLUMN)],
        )?
        .sort(
            group_columns
                .iter()
                .map(|name| ident(*name).sort(true, false))
                .collect(),
        )?;

    Ok(counted)
}

/// Whether the report holds no data, i.e. it is empty or starts with customer `0`.
fn is_placeholder(report: &Report) -> Result<bool, Error> {
    if report.is_empty() {
        return Ok(true);
    }

    let customer_ids = report
        .column(CUSTOMER_ID_COLUMN)
        .ok_or_else(|| Error::MissingColumn {
            column: CUSTOMER_ID_COLUMN.to_string(),
        })?;

    Ok(matches!(customer_ids.first(), Some(Cell::Int(0))))
}
