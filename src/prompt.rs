use crate::config::{Settings, StyleSettings};
use crate::enhance::{Enhancer, TextGenerator};
use crate::types::Provider;

/// Separator appended to every style prefix.
const STYLE_SEPARATOR: &str = ", ";

/// Output of [`compose`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub prompt: String,
    /// Whether AI enhancement rewrote the prompt.
    pub enhanced: bool,
    /// Non-fatal problem to surface briefly (e.g. enhancement failed).
    pub warning: Option<String>,
}

/// Whether `provider` does its own prompt enhancement, which normally takes
/// priority over ours. Only the free provider can, and only with its
/// enhance flag set.
pub fn provider_has_builtin_enhancement(provider: Provider, settings: &Settings) -> bool {
    provider == Provider::Pollinations && settings.pollinations.enhance
}

/// Whether [`compose`] would call the enhancement engine for `provider`.
pub fn should_enhance(provider: Provider, settings: &Settings) -> bool {
    let e = &settings.enhancement;
    e.enabled
        && (!provider_has_builtin_enhancement(provider, settings) || e.override_provider_priority)
        && e.has_api_key()
}

/// Style prefix for the configured style, including its trailing separator.
/// Empty when no style applies.
pub fn style_prefix(style: &StyleSettings) -> String {
    if let Some(custom) = style.active_custom_style() {
        return with_separator(custom);
    }
    if !style.has_main_style() {
        return String::new();
    }
    if style.has_sub_style() {
        with_separator(style.sub_style.trim())
    } else {
        format!("{} style{}", style.main_style.trim(), STYLE_SEPARATOR)
    }
}

fn with_separator(text: &str) -> String {
    let base = text.trim_end_matches(|c: char| c == ',' || c.is_whitespace());
    format!("{}{}", base, STYLE_SEPARATOR)
}

/// Append the global negative prompt inline, unless the destination takes it
/// as a separate field.
pub fn apply_negative_prompt(prompt: &str, provider: Provider, settings: &Settings) -> String {
    match settings.negative.active_text() {
        Some(negative) if !provider.accepts_negative_field() => {
            format!("{}, negative prompt: {}", prompt, negative)
        }
        _ => prompt.to_string(),
    }
}

/// Build the final prompt for the selected provider from raw selected text.
///
/// Order: style prefix, optional AI enhancement, optional inline negative
/// prompt. Enhancement failure keeps the pre-enhancement prompt and sets
/// [`ComposedPrompt::warning`].
pub async fn compose<T: TextGenerator>(
    selection: &str,
    settings: &Settings,
    enhancer: &Enhancer<T>,
) -> ComposedPrompt {
    let provider = settings.provider;
    let mut working = format!("{}{}", style_prefix(&settings.style), selection.trim());
    let mut enhanced = false;
    let mut warning = None;

    if should_enhance(provider, settings) {
        match enhancer.enhance(&working, settings).await {
            Ok(rewritten) => {
                working = rewritten;
                enhanced = true;
            }
            Err(e) => {
                tracing::warn!(error = %e, "prompt enhancement failed, using original prompt");
                warning = Some(format!("Prompt enhancement failed, using original prompt: {}", e));
            }
        }
    }

    ComposedPrompt {
        prompt: apply_negative_prompt(&working, provider, settings),
        enhanced,
        warning,
    }
}

/// Whitespace cleanup applied by adapters right before transmission:
/// runs of three or more newlines collapse to two, and the ends are trimmed.
pub fn normalize_prompt(prompt: &str) -> String {
    let unix = prompt.replace("\r\n", "\n");
    let mut out = String::with_capacity(unix.len());
    let mut newlines = 0;
    for c in unix.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(c);
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnhancementSettings;
    use crate::error::EnhanceError;
    use crate::enhance::TextRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        reply: Result<String, EnhanceError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(reply: Result<String, EnhanceError>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TextGenerator for Scripted {
        async fn generate_text(&self, _request: &TextRequest<'_>) -> Result<String, EnhanceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn enhancing(settings: Settings) -> Settings {
        let mut enhancement = EnhancementSettings::default()
            .with_enabled(true)
            .with_api_key("key")
            .with_max_retries(1)
            .with_always_fallback(false);
        enhancement.retry_delay = std::time::Duration::ZERO;
        settings.with_enhancement(enhancement)
    }

    #[tokio::test]
    async fn test_main_style_prefix() {
        let settings = Settings::default().with_style(StyleSettings::default().with_main_style("Anime"));
        let enhancer = Enhancer::new(Scripted::new(Ok(String::new())));
        let out = compose("a cat", &settings, &enhancer).await;
        assert_eq!(out.prompt, "Anime style, a cat");
        assert!(!out.enhanced);
        assert!(out.warning.is_none());
    }

    #[test]
    fn test_sub_style_literal_text() {
        let style = StyleSettings::default()
            .with_main_style("Anime")
            .with_sub_style("Studio Ghibli style, soft watercolor");
        assert_eq!(style_prefix(&style), "Studio Ghibli style, soft watercolor, ");
    }

    #[test]
    fn test_custom_style_overrides_main_style() {
        let style = StyleSettings::default()
            .with_main_style("Anime")
            .with_custom_style("oil painting,  ");
        assert_eq!(style_prefix(&style), "oil painting, ");
    }

    #[test]
    fn test_no_style_means_no_prefix() {
        assert_eq!(style_prefix(&StyleSettings::default()), "");
    }

    #[tokio::test]
    async fn test_negative_prompt_appended_inline() {
        let settings = Settings::default()
            .with_provider(Provider::Pollinations)
            .with_negative_prompt("blurry");
        let enhancer = Enhancer::new(Scripted::new(Ok(String::new())));
        let out = compose("a cat", &settings, &enhancer).await;
        assert!(out.prompt.ends_with(", negative prompt: blurry"));
    }

    #[tokio::test]
    async fn test_negative_prompt_not_inlined_for_horde() {
        let settings = Settings::default()
            .with_provider(Provider::AiHorde)
            .with_negative_prompt("blurry");
        let enhancer = Enhancer::new(Scripted::new(Ok(String::new())));
        let out = compose("a cat", &settings, &enhancer).await;
        assert_eq!(out.prompt, "a cat");
    }

    #[tokio::test]
    async fn test_enhancement_replaces_prompt() {
        let settings = enhancing(Settings::default().with_provider(Provider::Google));
        let enhancer = Enhancer::new(Scripted::new(Ok("\"a majestic cat\"".into())));
        let out = compose("a cat", &settings, &enhancer).await;
        assert_eq!(out.prompt, "a majestic cat");
        assert!(out.enhanced);
    }

    #[tokio::test]
    async fn test_enhancement_failure_keeps_prompt_and_warns() {
        let settings = enhancing(
            Settings::default()
                .with_provider(Provider::Google)
                .with_style(StyleSettings::default().with_main_style("Anime"))
                .with_negative_prompt("blurry"),
        );
        let enhancer = Enhancer::new(Scripted::new(Err(EnhanceError::EmptyResponse)));
        let out = compose("a cat", &settings, &enhancer).await;
        assert_eq!(out.prompt, "Anime style, a cat, negative prompt: blurry");
        assert!(!out.enhanced);
        assert!(out.warning.unwrap().contains("enhancement failed"));
    }

    #[tokio::test]
    async fn test_builtin_enhancement_takes_priority() {
        let mut settings = enhancing(Settings::default().with_provider(Provider::Pollinations));
        settings.pollinations.enhance = true;
        let enhancer = Enhancer::new(Scripted::new(Ok("rewritten".into())));

        let out = compose("a cat", &settings, &enhancer).await;
        assert_eq!(out.prompt, "a cat");
        assert_eq!(enhancer.generator().calls.load(Ordering::SeqCst), 0);

        settings.enhancement.override_provider_priority = true;
        let out = compose("a cat", &settings, &enhancer).await;
        assert_eq!(out.prompt, "rewritten");
    }

    #[test]
    fn test_enhancement_needs_api_key() {
        let mut settings = enhancing(Settings::default());
        assert!(should_enhance(Provider::Google, &settings));
        settings.enhancement.api_key = "  ".into();
        assert!(!should_enhance(Provider::Google, &settings));
    }

    #[test]
    fn test_builtin_enhancement_predicate() {
        let mut settings = Settings::default();
        assert!(!provider_has_builtin_enhancement(Provider::Pollinations, &settings));
        settings.pollinations.enhance = true;
        assert!(provider_has_builtin_enhancement(Provider::Pollinations, &settings));
        assert!(!provider_has_builtin_enhancement(Provider::AiHorde, &settings));
    }

    #[test]
    fn test_normalize_prompt() {
        assert_eq!(normalize_prompt("  a\n\n\n\nb\r\n\r\n\r\nc\nd  "), "a\n\nb\n\nc\nd");
        assert_eq!(normalize_prompt("\n\nplain\n"), "plain");
    }
}
