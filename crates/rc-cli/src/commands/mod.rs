pub mod run;
pub mod status;
pub mod submit;
pub mod tools;

/// Build a reqwest client for talking to the daemon.
pub fn api_client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Map common reqwest errors to user-friendly messages.
pub fn friendly_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_connect() {
        anyhow::anyhow!(
            "Could not connect to the rootcause daemon. Is it running?\n  \
             (hint: start it with `rootcause-daemon` or check --api-url)"
        )
    } else if err.is_timeout() {
        anyhow::anyhow!("Request timed out. The daemon may be overloaded.")
    } else {
        anyhow::anyhow!("API request failed: {err}")
    }
}
