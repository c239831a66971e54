//! Text normalization for scraped deal fields: title, price, shipping, sold-out.

use hotdeal_core::ShippingType;
use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\[【]([^\]】]*)[\]】]\s*").expect("valid regex"));
static TRAILING_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[(（]([^()（）]*)[)）]\s*$").expect("valid regex"));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").expect("valid regex"));
static PRICE_OR_SHIPPING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d[\d,]*\s*원|\d{1,3}(,\d{3})+|무료|무배|배송|택배|착불|free|\$\s*\d)")
        .expect("valid regex")
});
static CONDITIONAL_FREE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(와우|멤버십|멤버쉽|회원\s*무료|스마일클럽|유니버스클럽|이상\s*무료|이상\s*무배|조건부|\d[\d,]*\s*원?\s*이상)")
        .expect("valid regex")
});
static FREE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(무료|무배|free\s*shipping|^free$)").expect("valid regex"));
static PAID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(유료|착불|유배|별도)").expect("valid regex"));
static TRAILING_WON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d[\d,]*)\s*원\s*$").expect("valid regex"));
// A bare 마감 also appears in "마감임박" and "오늘 마감", which are still on sale.
static SOLD_OUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(품절|매진|종료된|(딜|판매|행사)\s*(종료|마감)|마감\s*(되었|됐|됨|완료)|[\[【]\s*마감\s*[\]】]|sold\s*out)",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TitleParts {
    pub title: String,
    /// Text of the leading bracket, usually the shop.
    pub shop_prefix: Option<String>,
    /// Stripped trailing parentheticals, left to right.
    pub trailing: Vec<String>,
}

impl TitleParts {
    /// Trailing "price/shipping" segments split on `/`: (price part, shipping part).
    pub fn price_hint(&self) -> Option<&str> {
        self.trailing
            .iter()
            .find_map(|t| t.split('/').next().filter(|p| NUMBER.is_match(p)))
            .map(str::trim)
    }

    pub fn shipping_hint(&self) -> Option<&str> {
        self.trailing
            .iter()
            .find_map(|t| t.split_once('/').map(|(_, ship)| ship.trim()))
            .filter(|s| !s.is_empty())
    }
}

/// Strip one leading bracketed prefix, then trailing price/shipping parentheticals.
pub fn normalize_title(raw: &str) -> TitleParts {
    let mut title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut shop_prefix = None;

    if let Some(caps) = LEADING_BRACKET.captures(&title) {
        let prefix = caps[1].trim().to_string();
        let end = caps.get(0).map_or(0, |m| m.end());
        title = title[end..].to_string();
        if !prefix.is_empty() {
            shop_prefix = Some(prefix);
        }
    }

    let mut trailing = Vec::new();
    while let Some(caps) = TRAILING_PAREN.captures(&title) {
        let inner = caps[1].trim().to_string();
        if !PRICE_OR_SHIPPING.is_match(&inner) {
            break;
        }
        let start = caps.get(0).map_or(title.len(), |m| m.start());
        title.truncate(start);
        trailing.insert(0, inner);
    }

    TitleParts {
        title: title.trim().to_string(),
        shop_prefix,
        trailing,
    }
}

/// Value of a `\d[\d,]*` token; saturates at `i64::MAX`.
fn digits_value(token: &str) -> i64 {
    token
        .bytes()
        .filter(u8::is_ascii_digit)
        .fold(0i64, |acc, b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        })
}

fn parse_number(text: &str) -> Option<i64> {
    NUMBER.find(text).map(|token| digits_value(token.as_str()))
}

fn is_range_mark(c: char) -> bool {
    matches!(c, '~' | '～' | '〜')
}

/// First embedded number; for ranges "A~B" the smaller parsed endpoint.
pub fn parse_price(text: &str) -> Option<i64> {
    if let Some((low, high)) = text.split_once(is_range_mark) {
        return match (parse_number(low), parse_number(high)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    parse_number(text)
}

pub fn classify_shipping(text: &str) -> ShippingType {
    let text = text.trim();
    if text.is_empty() {
        return ShippingType::Unknown;
    }
    if CONDITIONAL_FREE.is_match(text) {
        return ShippingType::Unknown;
    }
    if FREE.is_match(text) {
        return ShippingType::Free;
    }
    if PAID.is_match(text) {
        return ShippingType::Paid;
    }
    if let Some(caps) = TRAILING_WON.captures(text) {
        return match digits_value(&caps[1]) {
            0 => ShippingType::Free,
            _ => ShippingType::Paid,
        };
    }
    ShippingType::Unknown
}

pub fn is_sold_out<'a>(texts: impl IntoIterator<Item = &'a str>) -> bool {
    texts.into_iter().any(|t| SOLD_OUT.is_match(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_loses_shop_prefix_and_price_tail() {
        let parts = normalize_title("[쿠팡] 로지텍 G304 무선 마우스 (19,900원/무료)");
        assert_eq!(parts.title, "로지텍 G304 무선 마우스");
        assert_eq!(parts.shop_prefix.as_deref(), Some("쿠팡"));
        assert_eq!(parts.price_hint(), Some("19,900원"));
        assert_eq!(parts.shipping_hint(), Some("무료"));
    }

    #[test]
    fn descriptive_parentheticals_survive() {
        let parts = normalize_title("[G마켓] 신라면 (40봉) (25,900원) (무배)");
        assert_eq!(parts.title, "신라면 (40봉)");
        assert_eq!(parts.trailing, vec!["25,900원".to_string(), "무배".to_string()]);
        assert_eq!(normalize_title("   ").title, "");
    }

    #[test]
    fn prices() {
        assert_eq!(parse_price("19,900원"), Some(19900));
        assert_eq!(parse_price("10000~15000"), Some(10000));
        assert_eq!(parse_price("15,000원 ~ 9,900원"), Some(9900));
        assert_eq!(parse_price("~ 12,000원"), Some(12000));
        assert_eq!(parse_price("가격 미정"), None);
    }

    #[test]
    fn full_width_range_marks() {
        assert_eq!(parse_price("15,000원～9,900원"), Some(9900));
        assert_eq!(parse_price("12000〜8000"), Some(8000));
        assert_eq!(parse_price("～ 5,500원"), Some(5500));
    }

    #[test]
    fn oversized_price_saturates() {
        assert_eq!(parse_price("99999999999999999999원"), Some(i64::MAX));
        assert_eq!(parse_price("99999999999999999999~1,000"), Some(1000));
        assert_eq!(classify_shipping("배송비 99999999999999999999원"), ShippingType::Paid);
    }

    #[test]
    fn shipping() {
        assert_eq!(classify_shipping("무료배송"), ShippingType::Free);
        assert_eq!(classify_shipping("배송비 3000원"), ShippingType::Paid);
        assert_eq!(classify_shipping("배송비 0원"), ShippingType::Free);
        assert_eq!(classify_shipping("와우회원 무료"), ShippingType::Unknown);
        assert_eq!(classify_shipping("멤버십 무료배송"), ShippingType::Unknown);
        assert_eq!(classify_shipping("19,800원 이상 무료"), ShippingType::Unknown);
        assert_eq!(classify_shipping("착불"), ShippingType::Paid);
        assert_eq!(classify_shipping("택배"), ShippingType::Unknown);
        assert_eq!(classify_shipping(""), ShippingType::Unknown);
    }

    #[test]
    fn sold_out_keywords() {
        assert!(is_sold_out(["[품절] 에어팟 프로"]));
        assert!(is_sold_out(["에어팟", "이 딜은 종료된 딜입니다"]));
        assert!(!is_sold_out(["에어팟 프로 2세대", "재고 넉넉"]));
        assert!(is_sold_out(["[마감] 에어팟 프로"]));
        assert!(is_sold_out(["에어팟", "딜 마감되었습니다"]));
        assert!(is_sold_out(["판매종료"]));
    }

    #[test]
    fn closing_soon_is_not_sold_out() {
        assert!(!is_sold_out(["[마감임박] 에어팟 프로"]));
        assert!(!is_sold_out(["에어팟", "오늘 마감, 서두르세요"]));
        assert!(!is_sold_out(["마감세일 특가"]));
    }
}
