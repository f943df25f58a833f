use crate::api_client::AdsApi;
use crate::data::{combine_assets_reports, extract_time_series};
use crate::error::Error;
use crate::gaql::GaqlQuery;
use crate::report::{Cell, Report};
use crate::report_config::ReportConfig;
use chrono::NaiveDate;
use datafusion::prelude::{DataFrame, SessionContext};
use log::info;
use std::path::Path;

const OCID_MAPPING_QUERY: &str = "SELECT customer.id AS account_id, \
     metrics.optimization_score_url AS url FROM customer LIMIT 1";

/// Runs one query against every customer and concatenates the results.
pub async fn fetch_report(
    api: &dyn AdsApi,
    query: &GaqlQuery,
    customer_ids: &[i64],
) -> Result<Report, Error> {
    let mut rows = Vec::new();
    for customer_id in customer_ids {
        rows.extend(api.search_stream(*customer_id, query.api_query()).await?);
    }

    Ok(Report::from_api_rows(query, &rows))
}

/// Runs a configured report and shapes it for writing.
///
/// # Arguments
/// * `ctx` - The session context used to build the result [`DataFrame`]
/// * `api` - The Ads API the queries run against
/// * `report_config` - Which report to run
/// * `customer_ids` - The accounts to report on
/// * `gaql_dir` - Directory holding the report's query files
/// * `today` - Value of the `{{ today }}` query placeholder
///
/// # Returns
/// A Result containing either the report as a [`DataFrame`] or an [`Error`]
pub async fn run_report(
    ctx: &SessionContext,
    api: &dyn AdsApi,
    report_config: &ReportConfig,
    customer_ids: &[i64],
    gaql_dir: &Path,
    today: NaiveDate,
) -> Result<DataFrame, Error> {
    info!("Running report for {}", report_config.table_name);

    let df = if report_config.is_builtin {
        let name = report_config.builtin_query_name.as_deref().unwrap_or_default();
        let report = run_builtin_query(api, name, customer_ids).await?;
        ctx.read_batch(report.to_record_batch()?)?
    } else if report_config.is_asset_report {
        let mut reports = Vec::with_capacity(report_config.gaql_filenames.len());
        for filename in &report_config.gaql_filenames {
            info!("Running query for: {}", filename);
            let query = GaqlQuery::from_file(gaql_dir.join(filename), today)?;
            reports.push(fetch_report(api, &query, customer_ids).await?);
        }
        combine_assets_reports(ctx, reports).await?
    } else {
        let filename = report_config
            .gaql_filenames
            .first()
            .ok_or_else(|| Error::InvalidReportConfig {
                table_name: report_config.table_name.clone(),
                message: "no GAQL file configured".to_string(),
            })?;
        info!("Running query for: {}", filename);
        let query = GaqlQuery::from_file(gaql_dir.join(filename), today)?;
        let report = fetch_report(api, &query, customer_ids).await?;
        ctx.read_batch(report.to_record_batch()?)?
    };

    match &report_config.time_series_variable_column {
        Some(column) => extract_time_series(df, column),
        None => Ok(df),
    }
}

/// Runs one of the built-in reports by name.
pub async fn run_builtin_query(
    api: &dyn AdsApi,
    name: &str,
    customer_ids: &[i64],
) -> Result<Report, Error> {
    info!("Running built-in query: {}", name);
    match name {
        "ocid_mapping" => ocid_mapping(api, customer_ids).await,
        _ => Err(Error::UnknownBuiltinQuery {
            name: name.to_string(),
        }),
    }
}

/// Maps every account to the `ocid` found in its optimization score URL, `"0"` if none.
async fn ocid_mapping(api: &dyn AdsApi, customer_ids: &[i64]) -> Result<Report, Error> {
    let query = GaqlQuery::parse(OCID_MAPPING_QUERY)?;
    let mut mapping = Report::new()
        .with_column("account_id", Vec::with_capacity(customer_ids.len()))
        .with_column("ocid", Vec::with_capacity(customer_ids.len()));

    for customer_id in customer_ids {
        let rows = api.search_stream(*customer_id, query.api_query()).await?;
        let report = Report::from_api_rows(&query, &rows);

        let account_id = match (rows.is_empty(), report.column("account_id")) {
            (false, Some([first, ..])) => first.clone(),
            _ => Cell::Int(*customer_id),
        };
        let ocid = report
            .column("url")
            .and_then(|urls| {
                urls.iter().find_map(|url| match url {
                    Cell::Text(url) => extract_ocid(url),
                    _ => None,
                })
            })
            .unwrap_or_else(|| "0".to_string());

        mapping.push_row(vec![account_id, Cell::Text(ocid)]);
    }

    Ok(mapping)
}

/// Returns the word characters following the first `ocid=` in `url`.
fn extract_ocid(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("ocid=")?;
    let ocid: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!ocid.is_empty()).then_some(ocid)
}
