use std::sync::Arc;

use anyhow::{Context, Result};
use engine_logging::engine_info;
use harvester_engine::{
    ensure_output_dir, ApiClient, Capabilities, CredentialProvider, EnvCredentials,
    FileResultSink, HttpBrowser, HttpResultSink, HttpWorkSource, ResultSink,
};

use crate::settings::AppSettings;

/// Builds the HTTP-backed capabilities described by the settings.
pub fn capabilities(settings: &AppSettings) -> Result<Capabilities> {
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(EnvCredentials::new(settings.token_env.clone()));
    let http = settings.http_settings();

    let work_api = ApiClient::new(&settings.work_source_url, &http, Arc::clone(&credentials))
        .with_context(|| format!("invalid work_source_url {:?}", settings.work_source_url))?;
    let browser_api = ApiClient::new(&settings.browser_url, &http, Arc::clone(&credentials))
        .with_context(|| format!("invalid browser_url {:?}", settings.browser_url))?;
    let browser = Arc::new(HttpBrowser::new(browser_api));

    let sink: Arc<dyn ResultSink> = match &settings.upload_url {
        Some(url) => {
            let api = ApiClient::new(url, &http, Arc::clone(&credentials))
                .with_context(|| format!("invalid upload_url {url:?}"))?;
            engine_info!("uploading products to {}", url);
            Arc::new(HttpResultSink::new(api))
        }
        None => {
            ensure_output_dir(&settings.output_dir).with_context(|| {
                format!("cannot use output_dir {}", settings.output_dir.display())
            })?;
            engine_info!("writing products to {}", settings.output_dir.display());
            Arc::new(FileResultSink::new(settings.output_dir.clone()))
        }
    };

    Ok(Capabilities {
        work_source: Arc::new(HttpWorkSource::new(work_api)),
        contexts: browser.clone(),
        bridge: browser,
        sink,
        credentials,
    })
}
