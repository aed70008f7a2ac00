//! Build a heatmap layer from your Strava activities.
//! Run with: cargo run --example fetch_heatmap -- [CODE_OR_REDIRECT_URL] [OUTPUT.json]
//!
//! Needs STRAVA_CLIENT_ID, STRAVA_CLIENT_SECRET and STRAVA_REDIRECT_URI.
//! Tokens are kept in STRAVA_TOKEN_FILE (default: strava_tokens.json).

use std::env;
use std::fs::File;
use std::io::BufWriter;

use strava_heatmap::{
    authorization_code_from_redirect, authorize_url, FetchConfig, FileCredentialStore,
    HeatmapApp, JsonRenderer, OAuthConfig, Status, StravaClient,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let code = match args.first() {
        Some(arg) if arg.starts_with("http://") || arg.starts_with("https://") => {
            authorization_code_from_redirect(arg)?
        }
        Some(arg) => Some(arg.clone()),
        None => None,
    };
    let output = args.get(1).cloned().unwrap_or_else(|| "heatmap.json".to_string());

    let oauth = OAuthConfig::from_env()?;
    let fetch = FetchConfig {
        max_pages: env::var("STRAVA_MAX_PAGES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        ..FetchConfig::default()
    };
    let token_file = env::var("STRAVA_TOKEN_FILE").unwrap_or_else(|_| "strava_tokens.json".to_string());

    let client = StravaClient::new(oauth.clone(), fetch)?;
    let mut app = HeatmapApp::new(client.clone(), FileCredentialStore::new(token_file), client);

    let mut renderer = JsonRenderer::new(BufWriter::new(File::create(&output)?));
    let status = app.run(code.as_deref(), &mut renderer).await;
    println!("{}", status);

    match status {
        Status::NotAuthorized => {
            println!("Authorize at: {}", authorize_url(&oauth)?);
            println!("Then rerun with the redirect URL or the code.");
        }
        Status::AuthorizedCached | Status::AuthorizedFresh => {
            println!("Heatmap layer written to {}", output);
        }
        Status::Error(_) => std::process::exit(1),
    }

    Ok(())
}
