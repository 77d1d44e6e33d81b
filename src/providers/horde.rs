//! Community worker-pool provider: submit a job, poll until it is done,
//! then fetch the results.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use super::models::ModelCatalog;
use super::resolve_seed;
use crate::classify::{extract_json_message, ErrorKind};
use crate::config::HordeSettings;
use crate::store::SettingsStore;
use crate::types::{GenerationOutcome, GenerationSuccess, Provider, ProviderFailure, StatusReporter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CLIENT_AGENT: &str = concat!("novel-illustrator:", env!("CARGO_PKG_VERSION"), ":cli");

/// Job state returned by `/generate/check/{id}`.
///
/// Missing fields take the values of [`JobCheck::default`]; a body without
/// `is_possible` is treated as still servable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobCheck {
    pub finished: u32,
    pub processing: u32,
    pub waiting: u32,
    pub done: bool,
    pub faulted: bool,
    pub wait_time: u64,
    pub queue_position: u64,
    pub is_possible: bool,
}

impl Default for JobCheck {
    fn default() -> Self {
        Self {
            finished: 0,
            processing: 0,
            waiting: 0,
            done: false,
            faulted: false,
            wait_time: 0,
            queue_position: 0,
            is_possible: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct JobStatus {
    faulted: bool,
    generations: Vec<Generation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Generation {
    img: String,
    model: String,
}

/// The job payload. The negative prompt travels in its own field here and
/// is joined onto the prompt with the `###` separator the API expects.
pub fn build_payload(settings: &HordeSettings, prompt: &str, negative: Option<&str>, seed: i64) -> Value {
    let full_prompt = match negative {
        Some(neg) => format!("{} ### {}", prompt, neg),
        None => prompt.to_string(),
    };
    json!({
        "prompt": full_prompt,
        "params": {
            "sampler_name": settings.sampler,
            "cfg_scale": settings.cfg_scale,
            "steps": settings.steps,
            "width": settings.width,
            "height": settings.height,
            "seed": seed.to_string(),
            "karras": settings.karras,
            "post_processing": settings.post_processing,
            "n": 1,
        },
        "nsfw": settings.nsfw,
        "censor_nsfw": !settings.nsfw,
        "models": [settings.model],
        "r2": true,
        "shared": false,
    })
}

/// Human status line for a pending job.
pub fn status_text(check: &JobCheck, elapsed: Duration) -> String {
    if check.processing > 0 {
        format!("AI Horde: generating ({}s elapsed)", elapsed.as_secs())
    } else if check.queue_position > 0 {
        format!(
            "AI Horde: queue position {}, est. wait {}s",
            check.queue_position, check.wait_time
        )
    } else {
        format!("AI Horde: waiting for a worker (est. {}s)", check.wait_time)
    }
}

/// Poll `check` every `interval` until the job is done.
///
/// Individual poll failures are logged and retried on the next tick; only
/// a faulted or impossible job, or the `max_wait` ceiling, ends the wait
/// early with an error message.
pub async fn wait_for_job<F, Fut>(
    mut check: F,
    interval: Duration,
    max_wait: Duration,
    status: &StatusReporter,
) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobCheck, String>>,
{
    let start = Instant::now();
    loop {
        tokio::time::sleep(interval).await;
        let elapsed = start.elapsed();
        if elapsed >= max_wait {
            return Err(format!(
                "AI Horde job timed out after {} minutes without finishing",
                max_wait.as_secs() / 60
            ));
        }

        let job = match check().await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, "AI Horde status check failed, will retry");
                continue;
            }
        };

        if job.faulted {
            return Err("AI Horde job faulted on the worker".to_string());
        }
        if !job.is_possible && !job.done {
            return Err(
                "No AI Horde workers can serve this request. Try a different model or smaller size."
                    .to_string(),
            );
        }
        if job.done {
            return Ok(());
        }

        let text = status_text(&job, elapsed);
        tracing::debug!(status = %text, "AI Horde poll");
        status.report(&text);
    }
}

/// Whether a rejection message is about the requested model.
fn mentions_model(message: &str) -> bool {
    message.to_lowercase().contains("model")
}

pub async fn generate<S: SettingsStore>(
    http: &Client,
    settings: &HordeSettings,
    negative: Option<&str>,
    prompt: &str,
    status: &StatusReporter,
    catalog: &ModelCatalog<S>,
) -> GenerationOutcome {
    let endpoint = settings.endpoint.trim_end_matches('/');
    let api_key = match settings.api_key.trim() {
        "" => crate::config::ANONYMOUS_HORDE_KEY,
        key => key,
    };
    let payload = build_payload(settings, prompt, negative, resolve_seed(settings.seed));

    let job_id = match submit(http, endpoint, api_key, &payload).await {
        Ok(id) => id,
        Err(message) => {
            if mentions_model(&message) {
                if let Err(e) = catalog.invalidate(Provider::AiHorde).await {
                    tracing::warn!(error = %e, "failed to invalidate AI Horde model cache");
                }
                return GenerationOutcome::Failure(
                    ProviderFailure::new(message).with_kind(ErrorKind::ModelUnavailable),
                );
            }
            return GenerationOutcome::Failure(ProviderFailure::new(message));
        }
    };
    tracing::info!(job_id = %job_id, model = %settings.model, "AI Horde job submitted");
    status.report("AI Horde: job submitted, waiting for a worker");

    let check_url = format!("{}/generate/check/{}", endpoint, job_id);
    let check_url = check_url.as_str();
    let waited = wait_for_job(
        move || fetch_check(http, check_url),
        settings.poll_interval,
        settings.max_wait,
        status,
    )
    .await;
    if let Err(message) = waited {
        return GenerationOutcome::Failure(ProviderFailure::new(message));
    }

    let status_url = format!("{}/generate/status/{}", endpoint, job_id);
    match fetch_results(http, &status_url).await {
        Ok(job) => collect_results(job, &settings.model),
        Err(message) => GenerationOutcome::Failure(ProviderFailure::new(message)),
    }
}

async fn submit(http: &Client, endpoint: &str, api_key: &str, payload: &Value) -> Result<String, String> {
    let resp = http
        .post(format!("{}/generate/async", endpoint))
        .header("apikey", api_key)
        .header("Client-Agent", CLIENT_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .json(payload)
        .send()
        .await
        .map_err(|e| request_error("submit the AI Horde job", &e))?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        let detail = extract_json_message(&text).unwrap_or_else(|| text.trim().to_string());
        return Err(format!(
            "AI Horde rejected the job (HTTP {}): {}",
            status.as_u16(),
            detail
        ));
    }

    let json: Value = serde_json::from_str(&text)
        .map_err(|e| format!("AI Horde returned an unreadable job response: {}", e))?;
    json.get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            let detail = json.get("message").and_then(Value::as_str).unwrap_or("no job id returned");
            format!("AI Horde did not accept the job: {}", detail)
        })
}

async fn fetch_check(http: &Client, url: &str) -> Result<JobCheck, String> {
    let resp = http
        .get(url)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(|e| request_error("check the AI Horde job", &e))?;
    if !resp.status().is_success() {
        return Err(format!("AI Horde status check failed with HTTP {}", resp.status().as_u16()));
    }
    resp.json::<JobCheck>()
        .await
        .map_err(|e| format!("Unreadable AI Horde status: {}", e))
}

async fn fetch_results(http: &Client, url: &str) -> Result<JobStatus, String> {
    let resp = http
        .get(url)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .map_err(|e| request_error("fetch the AI Horde results", &e))?;
    if !resp.status().is_success() {
        return Err(format!("AI Horde result fetch failed with HTTP {}", resp.status().as_u16()));
    }
    resp.json::<JobStatus>()
        .await
        .map_err(|e| format!("Unreadable AI Horde results: {}", e))
}

fn collect_results(job: JobStatus, fallback_model: &str) -> GenerationOutcome {
    if job.faulted {
        return GenerationOutcome::Failure(ProviderFailure::new("AI Horde job faulted on the worker"));
    }
    let urls: Vec<String> = job
        .generations
        .iter()
        .filter(|g| !g.img.is_empty())
        .map(|g| image_url(&g.img))
        .collect();
    if urls.is_empty() {
        return GenerationOutcome::Failure(ProviderFailure::new(
            "AI Horde finished the job but returned no images",
        ));
    }
    let model = job
        .generations
        .iter()
        .map(|g| g.model.as_str())
        .find(|m| !m.is_empty())
        .unwrap_or(fallback_model)
        .to_string();

    GenerationOutcome::Success(GenerationSuccess {
        display_urls: urls,
        persistent_urls: None,
        provider_name: Provider::AiHorde.display_name().to_string(),
        model,
    })
}

/// Results are R2 download links, or inline base64 WebP for older workers.
fn image_url(img: &str) -> String {
    if img.starts_with("http://") || img.starts_with("https://") {
        img.to_string()
    } else {
        format!("data:image/webp;base64,{}", img)
    }
}

fn request_error(action: &str, e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("Could not {}: request timed out", action)
    } else {
        format!("Could not {}: {}", action, e)
    }
}
