use crate::records::{Record, int_field, str_field};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// One sold SKU, in stock-register order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkuSales {
    /// "<product_name> - <size>"
    pub product: String,

    /// Units sold
    pub quantity: i64,
}

/// Everything the dashboard page renders
///
/// Built either by [`aggregate`] from four freshly fetched tables, or by
/// [`DashboardContext::failed`] when any of those fetches did not happen.
/// There is no in-between: a partial read never leaks partial numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardContext {
    /// Set only on the failure path; all other fields are then defaults
    pub error_message: Option<String>,

    /// First row of the P/L worksheet, verbatim
    pub pnl_metrics: Record,

    /// `Date` cell of the P/L row, or "N/A"
    pub latest_update: String,

    /// `Total Expense` cell of the P/L row, 0 if absent or unparsable
    pub total_expense: i64,

    /// Number of stock-register rows
    pub total_products: usize,

    /// Rows where current stock sits below the reorder level
    pub low_stock_count: usize,

    /// Sum of units-sold times unit-price over the stock register
    pub total_sales_value: i64,

    /// Sum of the total_purchase column
    pub total_purchase_value: i64,

    /// Distinct non-empty customer names across the order worksheet
    pub total_customers: usize,

    /// SKUs with at least one sale, stock-register order preserved
    pub sales_sku_wise: Vec<SkuSales>,

    /// Count per dispatch status actually seen. Note the asymmetry: the
    /// default (error) shape pre-seeds Delivered/Returned/Pending at zero,
    /// while aggregating zero dispatch rows yields an empty map. That
    /// mirrors the shape the pages have always been given; do not merge
    /// the two without flagging it.
    pub dispatch_status: BTreeMap<String, i64>,
}

impl Default for DashboardContext {
    fn default() -> Self {
        let mut dispatch_status = BTreeMap::new();
        for status in ["Delivered", "Returned", "Pending"] {
            dispatch_status.insert(status.to_string(), 0);
        }

        DashboardContext {
            error_message: None,
            pnl_metrics: Record::new(),
            latest_update: "N/A".to_string(),
            total_expense: 0,
            total_products: 0,
            low_stock_count: 0,
            total_sales_value: 0,
            total_purchase_value: 0,
            total_customers: 0,
            sales_sku_wise: Vec::new(),
            dispatch_status,
        }
    }
}

impl DashboardContext {
    /// The single error state: one message, every metric at its default.
    pub fn failed(message: impl Into<String>) -> Self {
        DashboardContext {
            error_message: Some(message.into()),
            ..DashboardContext::default()
        }
    }
}

/// Aggregate the four source tables into dashboard metrics
///
/// Pure and deterministic: same rows in, same context out. Integer cells
/// follow the fail-soft policy of [`int_field`], so one malformed cell
/// degrades one metric to 0 and nothing more.
///
/// # Arguments
/// * `pnl` - P/L rows; only the first is meaningful
/// * `stock` - Stock-register rows, one per SKU
/// * `orders` - Customer-order rows
/// * `dispatch` - Dispatch rows with a `current_status` column
pub fn aggregate(
    pnl: &[Record],
    stock: &[Record],
    orders: &[Record],
    dispatch: &[Record],
) -> DashboardContext {
    let mut context = DashboardContext::default();
    // The pre-seeded statuses belong to the error shape only.
    context.dispatch_status.clear();

    context.pnl_metrics = pnl.first().cloned().unwrap_or_default();
    context.latest_update = str_field(&context.pnl_metrics, "Date", "N/A");
    context.total_expense = int_field(&context.pnl_metrics, "Total Expense");

    context.total_products = stock.len();
    for record in stock {
        let units_sold = int_field(record, "sale_stock");
        context.total_sales_value += units_sold * int_field(record, "sale_price");
        context.total_purchase_value += int_field(record, "total_purchase");

        if int_field(record, "current_stock") < int_field(record, "reorder_level") {
            context.low_stock_count += 1;
        }

        if units_sold > 0 {
            context.sales_sku_wise.push(SkuSales {
                product: format!(
                    "{} - {}",
                    str_field(record, "product_name", "Unknown"),
                    str_field(record, "size", "")
                ),
                quantity: units_sold,
            });
        }
    }

    let unique_customers: HashSet<String> = orders
        .iter()
        .map(|record| str_field(record, "customer_name", ""))
        .filter(|name| !name.is_empty())
        .collect();
    context.total_customers = unique_customers.len();

    for record in dispatch {
        let status = str_field(record, "current_status", "Unknown");
        *context.dispatch_status.entry(status).or_insert(0) += 1;
    }

    context
}
