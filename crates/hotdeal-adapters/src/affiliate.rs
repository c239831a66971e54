use async_trait::async_trait;
use serde::Deserialize;
use url::form_urlencoded;

use crate::AdapterError;

/// Maps an original purchase URL to its affiliate counterpart.
#[async_trait]
pub trait AffiliateTransformer: Send + Sync {
    async fn transform(&self, url: &str) -> Result<String, AdapterError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct AffiliateTemplateConfig {
    /// Deep-link template; `{url}` is replaced by the percent-encoded original.
    pub template: String,
    /// Merchant domains the program accepts. Empty accepts every domain.
    #[serde(default)]
    pub domains: Vec<String>,
}

/// Deep-link style transformer: wraps the original URL in a tracking template.
#[derive(Debug, Clone)]
pub struct TemplateAffiliateTransformer {
    template: String,
    domains: Vec<String>,
}

impl TemplateAffiliateTransformer {
    pub fn new(config: AffiliateTemplateConfig) -> Result<Self, AdapterError> {
        if !config.template.contains("{url}") {
            return Err(AdapterError::Message(format!(
                "affiliate template `{}` has no {{url}} placeholder",
                config.template
            )));
        }
        Ok(Self {
            template: config.template,
            domains: config
                .domains
                .into_iter()
                .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    fn accepts(&self, host: &str) -> bool {
        self.domains.is_empty()
            || self
                .domains
                .iter()
                .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

#[async_trait]
impl AffiliateTransformer for TemplateAffiliateTransformer {
    async fn transform(&self, url: &str) -> Result<String, AdapterError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| AdapterError::Message(format!("unparseable url {url}: {e}")))?;
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        if !self.accepts(&host) {
            return Err(AdapterError::Message(format!(
                "domain {host} is not in the affiliate program"
            )));
        }
        let encoded: String = form_urlencoded::byte_serialize(url.as_bytes()).collect();
        Ok(self.template.replace("{url}", &encoded))
    }
}
