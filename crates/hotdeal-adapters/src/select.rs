use scraper::{ElementRef, Html, Selector};

use crate::AdapterError;

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub(crate) fn element_text(element: ElementRef<'_>) -> Option<String> {
    text_or_none(&element.text().collect::<String>())
}

pub(crate) fn first_text_in(
    scope: ElementRef<'_>,
    selector: Option<&str>,
) -> Result<Option<String>, AdapterError> {
    let Some(selector) = selector else {
        return Ok(None);
    };
    let sel = parse_selector(selector)?;
    Ok(scope.select(&sel).next().and_then(element_text))
}

pub(crate) fn first_attr_in(
    scope: ElementRef<'_>,
    selector: Option<&str>,
    attr: &str,
) -> Result<Option<String>, AdapterError> {
    let Some(selector) = selector else {
        return Ok(None);
    };
    let sel = parse_selector(selector)?;
    Ok(scope
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(text_or_none))
}

pub(crate) fn first_text(document: &Html, selector: Option<&str>) -> Result<Option<String>, AdapterError> {
    first_text_in(document.root_element(), selector)
}

pub(crate) fn first_attr(
    document: &Html,
    selector: Option<&str>,
    attr: &str,
) -> Result<Option<String>, AdapterError> {
    first_attr_in(document.root_element(), selector, attr)
}

pub(crate) fn all_attrs(
    document: &Html,
    selector: Option<&str>,
    attr: &str,
) -> Result<Vec<String>, AdapterError> {
    let Some(selector) = selector else {
        return Ok(Vec::new());
    };
    let sel = parse_selector(selector)?;
    Ok(document
        .select(&sel)
        .filter_map(|n| n.value().attr(attr))
        .filter_map(text_or_none)
        .collect())
}

/// Reads the first integer in a counter label such as "조회 1,234" or "추천: 12".
pub(crate) fn parse_count(text: &str) -> Option<i64> {
    let mut digits = String::new();
    let mut started = false;
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            started = true;
        } else if ch == ',' && started {
            continue;
        } else if started {
            break;
        }
    }
    digits.parse().ok()
}

/// Resolve `href` against `base`, keeping absolute links as they are.
pub(crate) fn absolutize(base: &str, href: &str) -> Option<String> {
    let base = url::Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_read_first_number_with_separators() {
        assert_eq!(parse_count("조회 1,234"), Some(1234));
        assert_eq!(parse_count("추천: 12 / 반대 3"), Some(12));
        assert_eq!(parse_count("없음"), None);
    }

    #[test]
    fn relative_links_resolve_against_page() {
        assert_eq!(
            absolutize("https://www.ppomppu.co.kr/zboard/zboard.php?id=ppomppu", "view.php?no=7"),
            Some("https://www.ppomppu.co.kr/zboard/view.php?no=7".to_string())
        );
        assert_eq!(
            absolutize("https://a.example/x", "https://b.example/y"),
            Some("https://b.example/y".to_string())
        );
    }
}
