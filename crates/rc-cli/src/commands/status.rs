use super::{api_client, friendly_error};

/// Run the `status` subcommand: fetch and print the daemon's investigation
/// state.
pub async fn run(api_url: &str) -> anyhow::Result<()> {
    print!("{}", fetch(api_url).await?);
    Ok(())
}

async fn fetch(api_url: &str) -> anyhow::Result<String> {
    let resp = api_client()
        .get(format!("{api_url}/status"))
        .send()
        .await
        .map_err(friendly_error)?;

    if !resp.status().is_success() {
        anyhow::bail!("Failed to fetch status (HTTP {})", resp.status());
    }
    let status: serde_json::Value = resp.json().await.map_err(friendly_error)?;
    Ok(render(&status))
}

fn render(status: &serde_json::Value) -> String {
    let field = |name: &str| status[name].as_str().unwrap_or("-").to_string();

    let mut out = String::new();
    out.push_str(&format!("Status:          {}\n", field("status")));
    out.push_str(&format!("Investigation:   {}\n", field("investigation_id")));
    out.push_str(&format!("Started:         {}\n", field("started_at")));
    out.push_str(&format!("Finished:        {}\n", field("finished_at")));
    if let Some(result) = status["result"].as_str() {
        out.push_str(&format!("{}\n{result}\n", "-".repeat(40)));
    }
    out
}
