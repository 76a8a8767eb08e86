use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use si_ledger::read_queries::{
    charges_query, parse_part, parse_scheme, parse_view, scheme_charges_query, summaries_query,
    ChargesQueryRequest, SchemeChargesQueryRequest, SummariesQueryRequest,
};
use si_ledger::{
    export_part_charges, export_scheme_charges, inspect_status_at_path,
    query_admin_db_stats_at_path, BatchFile, LedgerConfig, LedgerError, PeriodService,
    PeriodStore, SqliteLedger,
};
use std::env;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    case: Option<AdapterCaseMeta>,
    endpoint: AdapterEndpoint,
    #[serde(default)]
    query: Value,
    #[serde(default)]
    dataset: AdapterDataset,
}

#[derive(Debug, Deserialize)]
struct AdapterCaseMeta {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterEndpoint {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AdapterDataset {
    db_path: Option<String>,
    upload_root: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

#[derive(Debug)]
enum AdapterFailure {
    Protocol(String),
    UnsupportedEndpoint(String),
    Ledger(LedgerError),
}

impl From<LedgerError> for AdapterFailure {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl AdapterFailure {
    fn into_response(self) -> AdapterResponse {
        let (category, message, error_type) = match self {
            Self::Protocol(message) => ("ADAPTER_PROTOCOL_ERROR", message, "AdapterError"),
            Self::UnsupportedEndpoint(path) => (
                "UNSUPPORTED_ENDPOINT",
                format!("unsupported endpoint path: {path}"),
                "AdapterError",
            ),
            Self::Ledger(err) => (err.category(), err.to_string(), "LedgerError"),
        };
        AdapterResponse::Error {
            error: AdapterErrorBody {
                category: category.to_string(),
                message,
                error_type: error_type.to_string(),
            },
        }
    }
}

type AdapterResult<T> = Result<T, AdapterFailure>;

#[derive(Debug, Deserialize)]
struct PeriodQuery {
    period_id: i64,
}

#[derive(Debug, Deserialize)]
struct CreatePeriodQuery {
    year_month: String,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    period_id: i64,
    path: PathBuf,
    scheme: String,
    part: String,
}

#[derive(Debug, Deserialize)]
struct UploadBatchQuery {
    period_id: i64,
    files: Vec<BatchFile>,
}

#[derive(Debug, Deserialize)]
struct AdjustmentUploadQuery {
    period_id: i64,
    path: PathBuf,
    scheme: Option<String>,
    part: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdjustmentBatchQuery {
    period_id: i64,
    paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct AdjustmentDirQuery {
    period_id: i64,
    dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RosterUploadQuery {
    period_id: i64,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ExportChargesQuery {
    period_id: i64,
    part: String,
    view: Option<String>,
    out_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ExportSchemeQuery {
    period_id: i64,
    scheme: String,
    part: String,
    view: Option<String>,
    out_dir: PathBuf,
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn read_stdin_json() -> AdapterResult<Value> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| AdapterFailure::Protocol(format!("读取 stdin 失败: {e}")))?;
    if raw.trim().is_empty() {
        return Err(AdapterFailure::Protocol("empty stdin request".to_string()));
    }
    serde_json::from_str::<Value>(&raw)
        .map_err(|e| AdapterFailure::Protocol(format!("invalid JSON request: {e}")))
}

fn query_as<T: for<'de> Deserialize<'de>>(query: Value, path: &str) -> AdapterResult<T> {
    serde_json::from_value(query)
        .map_err(|e| AdapterFailure::Protocol(format!("request.query invalid for {path}: {e}")))
}

fn to_payload<T: Serialize>(value: T) -> AdapterResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| AdapterFailure::Protocol(format!("serialize payload failed: {e}")))
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn resolve_config(dataset: &AdapterDataset) -> AdapterResult<LedgerConfig> {
    let mut config = LedgerConfig::from_env()?;
    if let Some(db_path) = non_empty(dataset.db_path.as_deref()) {
        config.db_path = PathBuf::from(db_path);
    }
    if let Some(upload_root) = non_empty(dataset.upload_root.as_deref()) {
        config.upload_root = PathBuf::from(upload_root);
    }
    Ok(config)
}

fn dispatch(req: AdapterRequest, config: &LedgerConfig) -> AdapterResult<Value> {
    if req.schema_version != 1 {
        return Err(AdapterFailure::Protocol(format!(
            "unsupported schema_version: {}",
            req.schema_version
        )));
    }
    let path = non_empty(req.endpoint.path.as_deref())
        .ok_or_else(|| AdapterFailure::Protocol("request.endpoint.path missing".to_string()))?;
    let path = path.as_str();

    match path {
        "/api/admin/db-status" => return to_payload(inspect_status_at_path(&config.db_path)?),
        "/api/admin/db-stats" => {
            return to_payload(query_admin_db_stats_at_path(&config.db_path)?)
        }
        _ => {}
    }

    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| {
                AdapterFailure::Ledger(LedgerError::Io {
                    context: format!("创建数据库目录失败: {}", parent.to_string_lossy()),
                    source,
                })
            })?;
        }
    }
    let service = PeriodService::new(SqliteLedger::open(&config.db_path)?, &config.upload_root);
    let store = service.store();
    let query = req.query;

    match path {
        "/api/periods/list" => to_payload(store.list_periods()?),
        "/api/periods/create" => {
            let q: CreatePeriodQuery = query_as(query, path)?;
            to_payload(service.create_period(&q.year_month)?)
        }
        "/api/periods/get" => {
            let q: PeriodQuery = query_as(query, path)?;
            to_payload(store.load_period(q.period_id)?)
        }
        "/api/periods/delete" => {
            let q: PeriodQuery = query_as(query, path)?;
            service.delete_period(q.period_id)?;
            Ok(json!({ "deleted": q.period_id }))
        }
        "/api/periods/files" => {
            let q: PeriodQuery = query_as(query, path)?;
            store.load_period(q.period_id)?;
            to_payload(store.list_source_files(q.period_id)?)
        }
        "/api/periods/upload" => {
            let q: UploadQuery = query_as(query, path)?;
            let scheme = parse_scheme(&q.scheme)?;
            let part = parse_part(&q.part)?;
            to_payload(service.ingest_contribution_file(q.period_id, &q.path, scheme, part)?)
        }
        "/api/periods/upload-batch" => {
            let q: UploadBatchQuery = query_as(query, path)?;
            to_payload(service.ingest_batch(q.period_id, &q.files)?)
        }
        "/api/periods/adjustments/upload" => {
            let q: AdjustmentUploadQuery = query_as(query, path)?;
            let target = match (q.scheme.as_deref(), q.part.as_deref()) {
                (Some(scheme), Some(part)) => Some((parse_scheme(scheme)?, parse_part(part)?)),
                (None, None) => None,
                _ => {
                    return Err(AdapterFailure::Protocol(
                        "request.query scheme 与 part 需同时提供".to_string(),
                    ))
                }
            };
            to_payload(service.ingest_adjustment_file(q.period_id, &q.path, target)?)
        }
        "/api/periods/adjustments/upload-batch" => {
            let q: AdjustmentBatchQuery = query_as(query, path)?;
            to_payload(service.ingest_adjustment_batch(q.period_id, &q.paths)?)
        }
        "/api/periods/adjustments/upload-dir" => {
            let q: AdjustmentDirQuery = query_as(query, path)?;
            to_payload(service.ingest_adjustment_dir(q.period_id, &q.dir)?)
        }
        "/api/periods/roster" => {
            let q: PeriodQuery = query_as(query, path)?;
            store.load_period(q.period_id)?;
            to_payload(store.load_roster(q.period_id)?)
        }
        "/api/periods/roster/upload" => {
            let q: RosterUploadQuery = query_as(query, path)?;
            to_payload(service.ingest_roster(q.period_id, &q.path)?)
        }
        "/api/periods/roster/import-latest" => {
            let q: PeriodQuery = query_as(query, path)?;
            to_payload(service.import_latest_roster(q.period_id)?)
        }
        "/api/periods/process" => {
            let q: PeriodQuery = query_as(query, path)?;
            to_payload(service.process_period(q.period_id)?)
        }
        "/api/periods/process-adjustments" => {
            let q: PeriodQuery = query_as(query, path)?;
            to_payload(service.process_adjustments(q.period_id)?)
        }
        "/api/periods/reset" => {
            let q: PeriodQuery = query_as(query, path)?;
            to_payload(service.reset_period(q.period_id)?)
        }
        "/api/periods/clear-files" => {
            let q: PeriodQuery = query_as(query, path)?;
            service.clear_files(q.period_id)?;
            Ok(json!({ "cleared": "normal", "period_id": q.period_id }))
        }
        "/api/periods/clear-adjustments" => {
            let q: PeriodQuery = query_as(query, path)?;
            service.clear_adjustments(q.period_id)?;
            Ok(json!({ "cleared": "adjustment", "period_id": q.period_id }))
        }
        "/api/periods/summaries" => {
            let q: SummariesQueryRequest = query_as(query, path)?;
            to_payload(summaries_query(store, q)?)
        }
        "/api/periods/charges" => {
            let q: ChargesQueryRequest = query_as(query, path)?;
            to_payload(charges_query(store, q)?)
        }
        "/api/periods/charges/scheme" => {
            let q: SchemeChargesQueryRequest = query_as(query, path)?;
            to_payload(scheme_charges_query(store, q)?)
        }
        "/api/periods/charges/export" => {
            let q: ExportChargesQuery = query_as(query, path)?;
            let part = parse_part(&q.part)?;
            let view = parse_view(q.view)?;
            to_payload(export_part_charges(store, q.period_id, part, view, &q.out_dir)?)
        }
        "/api/periods/charges/scheme/export" => {
            let q: ExportSchemeQuery = query_as(query, path)?;
            let scheme = parse_scheme(&q.scheme)?;
            let part = parse_part(&q.part)?;
            let view = parse_view(q.view)?;
            to_payload(export_scheme_charges(
                store,
                q.period_id,
                scheme,
                part,
                view,
                &q.out_dir,
            )?)
        }
        _ => Err(AdapterFailure::UnsupportedEndpoint(path.to_string())),
    }
}

fn init_tracing(filter: &str, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter))
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(verbose: bool) -> AdapterResult<Value> {
    let raw = read_stdin_json()?;
    let req = serde_json::from_value::<AdapterRequest>(raw)
        .map_err(|e| AdapterFailure::Protocol(format!("request root invalid: {e}")))?;
    let config = resolve_config(&req.dataset)?;
    init_tracing(&config.log_filter, verbose);

    if let Some(case_id) = req.case.as_ref().and_then(|c| c.id.as_deref()) {
        debug!(case = case_id, "adapter request");
    }
    debug!(
        endpoint = req.endpoint.path.as_deref().unwrap_or_default(),
        db = %config.db_path.display(),
        "dispatching"
    );
    dispatch(req, &config)
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");
    let verbose = parse_bool_flag(&args, "--verbose");

    let resp = match run(verbose) {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(failure) => failure.into_response(),
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}
