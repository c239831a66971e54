//! Purchase-link ledger. Original links are written once per (deal, url);
//! affiliate links are only ever added next to them, never in their place.

use chrono::{DateTime, Utc};
use hotdeal_core::DealId;
use hotdeal_storage::{StoreResult, StoreTx};

/// Lowercased host without a leading `www.`.
pub fn link_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Resolve a scraped purchase href against the page it came from. Only http(s) links qualify.
pub fn resolve_purchase_url(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let resolved = match url::Url::parse(href) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => url::Url::parse(page_url).ok()?.join(href).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Returns `false` when the link was already on record.
pub async fn record_original(
    tx: &mut dyn StoreTx,
    deal_id: DealId,
    url: &str,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let domain = link_domain(url).unwrap_or_default();
    tx.insert_purchase_link(deal_id, url, &domain, false, now).await
}

pub async fn record_affiliate(
    tx: &mut dyn StoreTx,
    deal_id: DealId,
    url: &str,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let domain = link_domain(url).unwrap_or_default();
    tx.insert_purchase_link(deal_id, url, &domain, true, now).await
}
