use std::fs::OpenOptions;
use std::io::Write;
use chrono::{DateTime, Utc};

// one line per request, appended to the ledger file
pub fn format_entry(
    timestamp: DateTime<Utc>,
    mode: &str,
    model: &str,
    tokens: u64,
) -> String {

    format!(
        "{} | {:6} | {:30} | {:8} tokens\n",
        timestamp.format("%Y-%m-%d %H:%M:%S"), mode, model, tokens
    )

}

pub fn log_request(
    mode: &str,
    model: &str,
    tokens: u64,
) {

    let log_entry = format_entry(Utc::now(), mode, model, tokens);

    // Use /app/requests.log in Docker, ./requests.log locally
    let log_path = std::env::var("LOG_PATH")
        .unwrap_or_else(|_| "./requests.log".to_string());

    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        if let Err(err) = file.write_all(log_entry.as_bytes()) {
            tracing::warn!(path = %log_path, error = %err, "failed to write request log");
        }
    } else {
        tracing::warn!(path = %log_path, "failed to open request log");
    }
}
