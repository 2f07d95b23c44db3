use reqwest::StatusCode;

use rc_core::types::IncidentDescriptor;

use super::{api_client, friendly_error};

/// Run the `submit` subcommand: ask the daemon to start an investigation.
/// Returns the investigation id.
pub async fn run(api_url: &str, incident: &IncidentDescriptor) -> anyhow::Result<String> {
    incident.validate()?;

    let resp = api_client()
        .post(format!("{api_url}/investigate"))
        .json(incident)
        .send()
        .await
        .map_err(friendly_error)?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    let message = body["error"].as_str().unwrap_or("").to_string();

    match status {
        StatusCode::ACCEPTED => {
            let id = body["investigation_id"].as_str().unwrap_or("unknown").to_string();
            println!("Investigation started: {id}");
            println!("(poll with `rootcause status`)");
            Ok(id)
        }
        StatusCode::CONFLICT => {
            anyhow::bail!("An investigation is already running; try again once it finishes")
        }
        StatusCode::BAD_REQUEST => anyhow::bail!("Daemon rejected the incident: {message}"),
        other => anyhow::bail!("Failed to submit investigation (HTTP {other}) {message}"),
    }
}
