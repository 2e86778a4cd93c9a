use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// One row of an external table: column name to cell value. Cells arrive
/// as strings or numbers, never anything richer.
pub type Record = serde_json::Map<String, Value>;

/// Display title of the spreadsheet this business runs on.
pub const SHEET_NAME: &str = "Nestle Water Distribution Original";

/// Worksheet holding the single profit/loss summary row.
pub const SHEET_PNL: &str = "P/L";

/// Worksheet holding one row per product/size SKU.
pub const SHEET_STOCK: &str = "Stock Register";

/// Worksheet holding customer order rows.
pub const SHEET_CUSTOMER_ORDER: &str = "Customer Order";

/// Worksheet holding dispatch rows with a free-form status column.
pub const SHEET_DISPATCH: &str = "Dispatch";

const CREDENTIALS_ENV_VAR: &str = "GOOGLE_SHEETS_CREDENTIALS";
const CREDENTIALS_FILE: &str = "credential.json";
const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Errors raised at the record-source boundary
///
/// Everything past this boundary (aggregation, rendering) is infallible;
/// handlers collapse any of these into one human-readable page message.
#[derive(Debug, Error)]
pub enum RecordSourceError {
    /// The client never initialized; permanent for the process lifetime.
    #[error("Google Sheets connection failed at startup.")]
    ConnectionUnavailable,

    /// The named spreadsheet does not exist or is not shared with us.
    #[error("spreadsheet '{0}' not found")]
    SpreadsheetNotFound(String),

    /// The spreadsheet exists but the named worksheet does not.
    #[error("worksheet '{0}' not found")]
    WorksheetNotFound(String),

    /// Transport or API failure on the read itself.
    #[error("sheets request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with something we could not interpret.
    #[error("malformed response from sheets API: {0}")]
    MalformedResponse(String),
}

/// Service credential for the spreadsheet API
///
/// Supplied as a JSON blob in the `GOOGLE_SHEETS_CREDENTIALS` environment
/// variable, or failing that a local `credential.json`. Only the fields the
/// read-only queries need are parsed; anything else in the blob is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceCredential {
    /// API key, sent as a query parameter when present
    #[serde(default)]
    pub api_key: Option<String>,

    /// OAuth access token, sent as a bearer header when present
    #[serde(default)]
    pub access_token: Option<String>,

    /// Id of the spreadsheet to open; may instead come from
    /// `WATERDESK_SPREADSHEET_ID`
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

impl ServiceCredential {
    /// Parse a credential from its JSON form.
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let credential: ServiceCredential = serde_json::from_str(raw)
            .map_err(|e| format!("invalid credential JSON: {e}"))?;

        if credential.api_key.is_none() && credential.access_token.is_none() {
            return Err("credential JSON has neither api_key nor access_token".to_string());
        }

        Ok(credential)
    }
}

/// Read-only client for the named spreadsheet.
pub struct SheetsClient {
    http: reqwest::Client,
    credential: ServiceCredential,
    spreadsheet_id: String,
}

static CLIENT: OnceLock<Option<SheetsClient>> = OnceLock::new();

/// Initialize the shared record-source client
///
/// Called once at startup. On any failure the client is latched as
/// permanently unavailable; there is no retry and every dependent handler
/// sees [`RecordSourceError::ConnectionUnavailable`] from then on.
pub fn init_client() {
    let state = match SheetsClient::from_environment() {
        Ok(client) => {
            log::info!(
                "record source ready: '{SHEET_NAME}' (spreadsheet {})",
                client.spreadsheet_id
            );
            Some(client)
        }
        Err(reason) => {
            log::error!("failed to initialize Google Sheets client: {reason}");
            None
        }
    };

    let _ = CLIENT.set(state);
}

/// Get the shared client, or the permanent-unavailable error.
pub fn client() -> Result<&'static SheetsClient, RecordSourceError> {
    match CLIENT.get() {
        Some(Some(client)) => Ok(client),
        _ => Err(RecordSourceError::ConnectionUnavailable),
    }
}

impl SheetsClient {
    /// Build a client from the process environment
    ///
    /// Credential resolution order is the environment variable first, then
    /// the local credential file. The spreadsheet id comes from the
    /// credential blob or `WATERDESK_SPREADSHEET_ID`.
    pub fn from_environment() -> Result<Self, String> {
        let credential = load_credential()?;

        let spreadsheet_id = credential
            .spreadsheet_id
            .clone()
            .or_else(|| env::var("WATERDESK_SPREADSHEET_ID").ok())
            .ok_or_else(|| {
                "no spreadsheet id: set it in the credential JSON or WATERDESK_SPREADSHEET_ID"
                    .to_string()
            })?;

        Ok(SheetsClient {
            http: reqwest::Client::new(),
            credential,
            spreadsheet_id,
        })
    }

    /// Fetch all records of one worksheet
    ///
    /// The first row is taken as the header and every following row is
    /// zipped against it. Short rows are padded with empty cells and extra
    /// cells beyond the header are dropped.
    ///
    /// # Arguments
    /// * `worksheet` - Worksheet title, e.g. [`SHEET_STOCK`]
    ///
    /// # Returns
    /// * `Result<Vec<Record>, RecordSourceError>` - All rows, or why not
    pub async fn worksheet_records(
        &self,
        worksheet: &str,
    ) -> Result<Vec<Record>, RecordSourceError> {
        let url = format!(
            "{SHEETS_API_BASE}/{}/values/{}",
            self.spreadsheet_id,
            urlencoding::encode(worksheet)
        );

        let mut request = self.http.get(&url);
        if let Some(key) = &self.credential.api_key {
            request = request.query(&[("key", key)]);
        }
        if let Some(token) = &self.credential.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(RecordSourceError::SpreadsheetNotFound(
                SHEET_NAME.to_string(),
            )),
            // The values API answers 400 for a range naming a worksheet
            // that does not exist.
            StatusCode::BAD_REQUEST => Err(RecordSourceError::WorksheetNotFound(
                worksheet.to_string(),
            )),
            _ => {
                let body: ValuesResponse = response.error_for_status()?.json().await?;
                Ok(zip_records(body.values))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn load_credential() -> Result<ServiceCredential, String> {
    if let Ok(raw) = env::var(CREDENTIALS_ENV_VAR) {
        return ServiceCredential::from_json(&raw);
    }

    if Path::new(CREDENTIALS_FILE).exists() {
        return read_credential_file(CREDENTIALS_FILE);
    }

    Err(format!(
        "credentials not found: neither {CREDENTIALS_ENV_VAR} nor {CREDENTIALS_FILE} is present"
    ))
}

fn read_credential_file(path: impl AsRef<Path>) -> Result<ServiceCredential, String> {
    let raw = fs::read_to_string(path.as_ref())
        .map_err(|e| format!("failed to read credential file: {e}"))?;
    ServiceCredential::from_json(&raw)
}

/// Zip a header row over data rows into records.
pub fn zip_records(mut values: Vec<Vec<Value>>) -> Vec<Record> {
    if values.is_empty() {
        return Vec::new();
    }

    let headers: Vec<String> = values
        .remove(0)
        .into_iter()
        .map(|cell| match cell {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect();

    values
        .into_iter()
        .map(|row| {
            let mut record = Record::new();
            for (index, header) in headers.iter().enumerate() {
                let cell = row
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                record.insert(header.clone(), cell);
            }
            record
        })
        .collect()
}

/// Read a field as an integer, defaulting to 0
///
/// Cells come back untyped; a missing field, a non-numeric string, or any
/// other surprise degrades that one value to 0 rather than failing the
/// page it feeds.
pub fn int_field(record: &Record, name: &str) -> i64 {
    match record.get(name) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Read a field as a string, with a caller-chosen default for absence.
pub fn str_field(record: &Record, name: &str, default: &str) -> String {
    match record.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn rows(raw: Value) -> Vec<Vec<Value>> {
        raw.as_array()
            .unwrap()
            .iter()
            .map(|row| row.as_array().unwrap().clone())
            .collect()
    }

    #[test]
    fn zip_records_pairs_headers_with_cells() {
        let records = zip_records(rows(json!([
            ["product_name", "size", "sale_price"],
            ["Pure Life", "500ml", "50"],
            ["Pure Life", "1500ml", "120"],
        ])));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["product_name"], json!("Pure Life"));
        assert_eq!(records[1]["sale_price"], json!("120"));
    }

    #[test]
    fn zip_records_pads_short_rows_and_drops_extras() {
        let records = zip_records(rows(json!([
            ["a", "b"],
            ["1"],
            ["1", "2", "3"],
        ])));

        assert_eq!(records[0]["b"], json!(""));
        assert_eq!(records[1].len(), 2);
        assert!(!records[1].contains_key("3"));
    }

    #[test]
    fn zip_records_of_nothing_is_empty() {
        assert!(zip_records(Vec::new()).is_empty());
        // A header with no data rows is also no records.
        assert!(zip_records(rows(json!([["a", "b"]]))).is_empty());
    }

    #[test]
    fn int_field_defaults_to_zero_on_anything_odd() {
        let record = zip_records(rows(json!([
            ["n", "s", "junk"],
            [7, "42", "N/A"],
        ])))
        .remove(0);

        assert_eq!(int_field(&record, "n"), 7);
        assert_eq!(int_field(&record, "s"), 42);
        assert_eq!(int_field(&record, "junk"), 0);
        assert_eq!(int_field(&record, "missing"), 0);
    }

    #[test]
    fn str_field_uses_default_only_for_absence() {
        let record = zip_records(rows(json!([["name", "blank"], ["Pure Life", ""]]))).remove(0);

        assert_eq!(str_field(&record, "name", "Unknown"), "Pure Life");
        assert_eq!(str_field(&record, "blank", "Unknown"), "");
        assert_eq!(str_field(&record, "missing", "Unknown"), "Unknown");
    }

    #[test]
    fn credential_parses_from_json() {
        let credential =
            ServiceCredential::from_json(r#"{"api_key":"k","spreadsheet_id":"s123"}"#).unwrap();
        assert_eq!(credential.api_key.as_deref(), Some("k"));
        assert_eq!(credential.spreadsheet_id.as_deref(), Some("s123"));

        assert!(ServiceCredential::from_json("{").is_err());
        assert!(ServiceCredential::from_json("{}").is_err());
    }

    #[test]
    fn credential_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"access_token":"t"}}"#).unwrap();

        let credential = read_credential_file(file.path()).unwrap();
        assert_eq!(credential.access_token.as_deref(), Some("t"));

        assert!(read_credential_file("/definitely/not/here.json").is_err());
    }

    #[test]
    fn connection_unavailable_has_the_page_facing_message() {
        assert_eq!(
            RecordSourceError::ConnectionUnavailable.to_string(),
            "Google Sheets connection failed at startup."
        );
    }
}
