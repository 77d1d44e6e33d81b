use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::Result;
use crate::store::SettingsStore;
use crate::types::Provider;

/// Setting keys. The namespace is flat; every key maps to one JSON value.
pub mod keys {
    pub const SELECTED_PROVIDER: &str = "selectedProvider";

    pub const MAIN_STYLE: &str = "mainPromptStyle";
    pub const SUB_STYLE: &str = "subPromptStyle";
    pub const CUSTOM_STYLE_ENABLED: &str = "useCustomStyle";
    pub const CUSTOM_STYLE_TEXT: &str = "customStyleText";

    pub const ENHANCEMENT_ENABLED: &str = "enablePromptEnhancement";
    pub const ENHANCEMENT_API_KEY: &str = "enhancementApiKey";
    pub const ENHANCEMENT_MODEL: &str = "enhancementModel";
    pub const ENHANCEMENT_FALLBACK_MODELS: &str = "enhancementFallbackModels";
    pub const ENHANCEMENT_TEMPLATE: &str = "enhancementTemplate";
    pub const ENHANCEMENT_MAX_RETRIES: &str = "enhancementMaxRetriesPerModel";
    pub const ENHANCEMENT_RETRY_DELAY_MS: &str = "enhancementRetryDelay";
    pub const ENHANCEMENT_ALWAYS_FALLBACK: &str = "enhancementAlwaysFallback";
    pub const ENHANCEMENT_OVERRIDE_PROVIDER: &str = "enhancementOverrideProvider";
    pub const ENHANCEMENT_ENDPOINT: &str = "enhancementEndpoint";

    pub const NEGATIVE_PROMPT_ENABLED: &str = "enableNegativePrompt";
    pub const NEGATIVE_PROMPT_TEXT: &str = "globalNegativePrompt";

    pub const POLLINATIONS_MODEL: &str = "pollinationsModel";
    pub const POLLINATIONS_WIDTH: &str = "pollinationsWidth";
    pub const POLLINATIONS_HEIGHT: &str = "pollinationsHeight";
    pub const POLLINATIONS_SEED: &str = "pollinationsSeed";
    pub const POLLINATIONS_ENHANCE: &str = "pollinationsEnhance";
    pub const POLLINATIONS_SAFE: &str = "pollinationsSafe";
    pub const POLLINATIONS_NOLOGO: &str = "pollinationsNologo";
    pub const POLLINATIONS_PRIVATE: &str = "pollinationsPrivate";
    pub const POLLINATIONS_TOKEN: &str = "pollinationsToken";
    pub const POLLINATIONS_ENDPOINT: &str = "pollinationsEndpoint";

    pub const HORDE_API_KEY: &str = "aiHordeApiKey";
    pub const HORDE_MODEL: &str = "aiHordeModel";
    pub const HORDE_SAMPLER: &str = "aiHordeSampler";
    pub const HORDE_CFG_SCALE: &str = "aiHordeCfgScale";
    pub const HORDE_STEPS: &str = "aiHordeSteps";
    pub const HORDE_WIDTH: &str = "aiHordeWidth";
    pub const HORDE_HEIGHT: &str = "aiHordeHeight";
    pub const HORDE_SEED: &str = "aiHordeSeed";
    pub const HORDE_POST_PROCESSING: &str = "aiHordePostProcessing";
    pub const HORDE_KARRAS: &str = "aiHordeKarras";
    pub const HORDE_NSFW: &str = "aiHordeNsfw";
    pub const HORDE_ENDPOINT: &str = "aiHordeEndpoint";

    pub const GOOGLE_API_KEY: &str = "googleApiKey";
    pub const GOOGLE_MODEL: &str = "googleModel";
    pub const GOOGLE_SAMPLE_COUNT: &str = "googleSampleCount";
    pub const GOOGLE_ASPECT_RATIO: &str = "googleAspectRatio";
    pub const GOOGLE_PERSON_GENERATION: &str = "googlePersonGeneration";
    pub const GOOGLE_IMAGE_SIZE: &str = "googleImageSize";
    pub const GOOGLE_ENDPOINT: &str = "googleEndpoint";

    pub const OPENAI_PROFILES: &str = "openAIProfiles";
    pub const OPENAI_DEFAULT_PROFILE: &str = "openAIDefaultProfile";
}

pub const DEFAULT_ENHANCEMENT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_POLLINATIONS_ENDPOINT: &str = "https://image.pollinations.ai";
pub const DEFAULT_HORDE_ENDPOINT: &str = "https://aihorde.net/api/v2";
pub const DEFAULT_GOOGLE_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Anonymous AI Horde key; gets the lowest queue priority.
pub const ANONYMOUS_HORDE_KEY: &str = "0000000000";

/// Style prefix settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleSettings {
    /// Main style name, `"None"` for no style.
    pub main_style: String,
    /// Literal sub-style text, `"none"` for the synthesized main-style prefix.
    pub sub_style: String,
    pub custom_style_enabled: bool,
    pub custom_style_text: String,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            main_style: "None".to_string(),
            sub_style: "none".to_string(),
            custom_style_enabled: false,
            custom_style_text: String::new(),
        }
    }
}

impl StyleSettings {
    pub fn with_main_style(mut self, main: impl Into<String>) -> Self {
        self.main_style = main.into();
        self
    }

    pub fn with_sub_style(mut self, sub: impl Into<String>) -> Self {
        self.sub_style = sub.into();
        self
    }

    pub fn with_custom_style(mut self, text: impl Into<String>) -> Self {
        self.custom_style_enabled = true;
        self.custom_style_text = text.into();
        self
    }

    /// The custom style text when the override is on and non-blank.
    pub fn active_custom_style(&self) -> Option<&str> {
        let text = self.custom_style_text.trim();
        (self.custom_style_enabled && !text.is_empty()).then_some(text)
    }

    pub fn has_main_style(&self) -> bool {
        let main = self.main_style.trim();
        !main.is_empty() && !main.eq_ignore_ascii_case("none")
    }

    pub fn has_sub_style(&self) -> bool {
        let sub = self.sub_style.trim();
        !sub.is_empty() && !sub.eq_ignore_ascii_case("none")
    }
}

/// AI prompt enhancement settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancementSettings {
    pub enabled: bool,
    pub api_key: String,
    pub model: String,
    pub fallback_models: Vec<String>,
    /// User override of the instruction template; blank means the built-in one.
    pub template: String,
    pub max_retries_per_model: u32,
    pub retry_delay: Duration,
    /// Return a locally boosted prompt instead of failing when every model fails.
    pub always_fallback: bool,
    /// Enhance even when the provider has its own built-in enhancement.
    pub override_provider_priority: bool,
    pub endpoint: String,
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
}

impl Default for EnhancementSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            model: "gemini-2.0-flash".to_string(),
            fallback_models: vec![
                "gemini-1.5-flash".to_string(),
                "gemini-1.5-flash-8b".to_string(),
            ],
            template: String::new(),
            max_retries_per_model: 2,
            retry_delay: Duration::from_millis(1000),
            always_fallback: true,
            override_provider_priority: false,
            endpoint: DEFAULT_ENHANCEMENT_ENDPOINT.to_string(),
            primary_timeout: Duration::from_secs(45),
            fallback_timeout: Duration::from_secs(30),
        }
    }
}

impl EnhancementSettings {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_fallback_models(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries_per_model = retries;
        self
    }

    pub fn with_always_fallback(mut self, enabled: bool) -> Self {
        self.always_fallback = enabled;
        self
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Global negative prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NegativePromptSettings {
    pub enabled: bool,
    pub text: String,
}

impl NegativePromptSettings {
    /// The negative text when enabled and non-blank.
    pub fn active_text(&self) -> Option<&str> {
        let text = self.text.trim();
        (self.enabled && !text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollinationsSettings {
    pub model: String,
    pub width: u32,
    pub height: u32,
    /// `-1` draws a random seed per request.
    pub seed: i64,
    pub enhance: bool,
    pub safe: bool,
    pub nologo: bool,
    pub private: bool,
    pub token: String,
    pub endpoint: String,
}

impl Default for PollinationsSettings {
    fn default() -> Self {
        Self {
            model: "flux".to_string(),
            width: 1024,
            height: 1024,
            seed: -1,
            enhance: false,
            safe: false,
            nologo: true,
            private: true,
            token: String::new(),
            endpoint: DEFAULT_POLLINATIONS_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HordeSettings {
    pub api_key: String,
    pub model: String,
    pub sampler: String,
    pub cfg_scale: f64,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub post_processing: Vec<String>,
    pub karras: bool,
    pub nsfw: bool,
    pub endpoint: String,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for HordeSettings {
    fn default() -> Self {
        Self {
            api_key: ANONYMOUS_HORDE_KEY.to_string(),
            model: "stable_diffusion".to_string(),
            sampler: "k_euler_a".to_string(),
            cfg_scale: 7.0,
            steps: 25,
            width: 512,
            height: 512,
            seed: -1,
            post_processing: Vec::new(),
            karras: true,
            nsfw: false,
            endpoint: DEFAULT_HORDE_ENDPOINT.to_string(),
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoogleSettings {
    pub api_key: String,
    pub model: String,
    pub sample_count: u32,
    pub aspect_ratio: String,
    pub person_generation: String,
    pub image_size: String,
    pub endpoint: String,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "imagen-4.0-generate-001".to_string(),
            sample_count: 1,
            aspect_ratio: "1:1".to_string(),
            person_generation: "allow_adult".to_string(),
            image_size: "1K".to_string(),
            endpoint: DEFAULT_GOOGLE_ENDPOINT.to_string(),
        }
    }
}

/// One user-configured OpenAI-compatible endpoint. Profiles are identified
/// by their base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiProfile {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_size")]
    pub size: String,
    #[serde(default = "default_openai_count")]
    pub count: u32,
    #[serde(default = "default_openai_response_format")]
    pub response_format: String,
}

fn default_openai_model() -> String {
    "dall-e-3".to_string()
}

fn default_openai_size() -> String {
    "1024x1024".to_string()
}

fn default_openai_count() -> u32 {
    1
}

fn default_openai_response_format() -> String {
    "b64_json".to_string()
}

impl OpenAiProfile {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: default_openai_model(),
            size: default_openai_size(),
            count: default_openai_count(),
            response_format: default_openai_response_format(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenAiCompatSettings {
    pub profiles: Vec<OpenAiProfile>,
    /// Base URL of the profile used when a request names none.
    pub default_profile: String,
}

impl OpenAiCompatSettings {
    /// Resolve the active profile: the explicit override if given, else the
    /// configured default. Matching is by base URL, ignoring trailing slashes.
    pub fn resolve(&self, override_id: Option<&str>) -> Option<&OpenAiProfile> {
        let wanted = override_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&self.default_profile);
        let wanted = wanted.trim().trim_end_matches('/');
        if wanted.is_empty() {
            return None;
        }
        self.profiles
            .iter()
            .find(|p| p.base_url.trim().trim_end_matches('/') == wanted)
    }
}

/// Typed snapshot of every setting the core reads.
///
/// Load a fresh snapshot with [`Settings::load`] at the start of each
/// operation so live edits take effect on the next request.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub provider: Provider,
    pub style: StyleSettings,
    pub enhancement: EnhancementSettings,
    pub negative: NegativePromptSettings,
    pub pollinations: PollinationsSettings,
    pub horde: HordeSettings,
    pub google: GoogleSettings,
    pub openai: OpenAiCompatSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: Provider::Pollinations,
            style: StyleSettings::default(),
            enhancement: EnhancementSettings::default(),
            negative: NegativePromptSettings::default(),
            pollinations: PollinationsSettings::default(),
            horde: HordeSettings::default(),
            google: GoogleSettings::default(),
            openai: OpenAiCompatSettings::default(),
        }
    }
}

impl Settings {
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_style(mut self, style: StyleSettings) -> Self {
        self.style = style;
        self
    }

    pub fn with_enhancement(mut self, enhancement: EnhancementSettings) -> Self {
        self.enhancement = enhancement;
        self
    }

    pub fn with_negative_prompt(mut self, text: impl Into<String>) -> Self {
        self.negative = NegativePromptSettings {
            enabled: true,
            text: text.into(),
        };
        self
    }

    /// Read every setting from `store`, falling back to defaults for missing
    /// or mistyped values.
    pub async fn load<S: SettingsStore>(store: &S) -> Result<Self> {
        let values = store.snapshot().await?;
        let d = Settings::default();

        let provider = match read::<String>(&values, keys::SELECTED_PROVIDER, String::new()) {
            s if s.is_empty() => d.provider,
            s => Provider::parse(&s).unwrap_or_else(|| {
                tracing::warn!(value = %s, "unknown provider in settings, using default");
                d.provider
            }),
        };

        let style = StyleSettings {
            main_style: read(&values, keys::MAIN_STYLE, d.style.main_style),
            sub_style: read(&values, keys::SUB_STYLE, d.style.sub_style),
            custom_style_enabled: read(&values, keys::CUSTOM_STYLE_ENABLED, d.style.custom_style_enabled),
            custom_style_text: read(&values, keys::CUSTOM_STYLE_TEXT, d.style.custom_style_text),
        };

        let e = d.enhancement;
        let retry_delay_ms: u64 =
            read(&values, keys::ENHANCEMENT_RETRY_DELAY_MS, e.retry_delay.as_millis() as u64);
        let enhancement = EnhancementSettings {
            enabled: read(&values, keys::ENHANCEMENT_ENABLED, e.enabled),
            api_key: read(&values, keys::ENHANCEMENT_API_KEY, e.api_key),
            model: read(&values, keys::ENHANCEMENT_MODEL, e.model),
            fallback_models: read_list(&values, keys::ENHANCEMENT_FALLBACK_MODELS, e.fallback_models),
            template: read(&values, keys::ENHANCEMENT_TEMPLATE, e.template),
            max_retries_per_model: read(&values, keys::ENHANCEMENT_MAX_RETRIES, e.max_retries_per_model),
            retry_delay: Duration::from_millis(retry_delay_ms),
            always_fallback: read(&values, keys::ENHANCEMENT_ALWAYS_FALLBACK, e.always_fallback),
            override_provider_priority: read(&values, keys::ENHANCEMENT_OVERRIDE_PROVIDER, e.override_provider_priority),
            endpoint: read(&values, keys::ENHANCEMENT_ENDPOINT, e.endpoint),
            primary_timeout: e.primary_timeout,
            fallback_timeout: e.fallback_timeout,
        };

        let negative = NegativePromptSettings {
            enabled: read(&values, keys::NEGATIVE_PROMPT_ENABLED, false),
            text: read(&values, keys::NEGATIVE_PROMPT_TEXT, String::new()),
        };

        let p = d.pollinations;
        let pollinations = PollinationsSettings {
            model: read(&values, keys::POLLINATIONS_MODEL, p.model),
            width: read(&values, keys::POLLINATIONS_WIDTH, p.width),
            height: read(&values, keys::POLLINATIONS_HEIGHT, p.height),
            seed: read_seed(&values, keys::POLLINATIONS_SEED),
            enhance: read(&values, keys::POLLINATIONS_ENHANCE, p.enhance),
            safe: read(&values, keys::POLLINATIONS_SAFE, p.safe),
            nologo: read(&values, keys::POLLINATIONS_NOLOGO, p.nologo),
            private: read(&values, keys::POLLINATIONS_PRIVATE, p.private),
            token: read(&values, keys::POLLINATIONS_TOKEN, p.token),
            endpoint: read(&values, keys::POLLINATIONS_ENDPOINT, p.endpoint),
        };

        let h = d.horde;
        let horde = HordeSettings {
            api_key: read(&values, keys::HORDE_API_KEY, h.api_key),
            model: read(&values, keys::HORDE_MODEL, h.model),
            sampler: read(&values, keys::HORDE_SAMPLER, h.sampler),
            cfg_scale: read(&values, keys::HORDE_CFG_SCALE, h.cfg_scale),
            steps: read(&values, keys::HORDE_STEPS, h.steps),
            width: read(&values, keys::HORDE_WIDTH, h.width),
            height: read(&values, keys::HORDE_HEIGHT, h.height),
            seed: read_seed(&values, keys::HORDE_SEED),
            post_processing: read_list(&values, keys::HORDE_POST_PROCESSING, h.post_processing),
            karras: read(&values, keys::HORDE_KARRAS, h.karras),
            nsfw: read(&values, keys::HORDE_NSFW, h.nsfw),
            endpoint: read(&values, keys::HORDE_ENDPOINT, h.endpoint),
            poll_interval: h.poll_interval,
            max_wait: h.max_wait,
        };

        let g = d.google;
        let google = GoogleSettings {
            api_key: read(&values, keys::GOOGLE_API_KEY, g.api_key),
            model: read(&values, keys::GOOGLE_MODEL, g.model),
            sample_count: read(&values, keys::GOOGLE_SAMPLE_COUNT, g.sample_count),
            aspect_ratio: read(&values, keys::GOOGLE_ASPECT_RATIO, g.aspect_ratio),
            person_generation: read(&values, keys::GOOGLE_PERSON_GENERATION, g.person_generation),
            image_size: read(&values, keys::GOOGLE_IMAGE_SIZE, g.image_size),
            endpoint: read(&values, keys::GOOGLE_ENDPOINT, g.endpoint),
        };

        let openai = OpenAiCompatSettings {
            profiles: read(&values, keys::OPENAI_PROFILES, Vec::new()),
            default_profile: read(&values, keys::OPENAI_DEFAULT_PROFILE, String::new()),
        };

        Ok(Settings {
            provider,
            style,
            enhancement,
            negative,
            pollinations,
            horde,
            google,
            openai,
        })
    }
}

/// Read one typed value, keeping `default` when absent or mistyped.
fn read<T: DeserializeOwned>(values: &Map<String, Value>, key: &str, default: T) -> T {
    match values.get(key) {
        None | Some(Value::Null) => default,
        Some(value) => match T::deserialize(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring mistyped setting");
                default
            }
        },
    }
}

/// Lists may be stored either as a JSON array or a comma-separated string.
fn read_list(values: &Map<String, Value>, key: &str, default: Vec<String>) -> Vec<String> {
    match values.get(key) {
        Some(Value::String(s)) => split_list(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default,
    }
}

/// Seeds may be stored as a number or a string; blank means random (`-1`).
fn read_seed(values: &Map<String, Value>, key: &str) -> i64 {
    match values.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}

/// Split a comma-separated list, trimming entries and dropping blanks.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}
