//! DOM helpers for the static engine
//!
//! `scraper::Html` is not `Send`, so documents are kept as source text and
//! parsed inside these synchronous helpers, never across an `.await`.

use crate::render::RenderError;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;

/// HTTP method of a form submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMethod {
    Get,
    Post,
}

/// A navigation triggered by clicking an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNavigation {
    pub method: FormMethod,
    pub url: Url,
    /// Url-encoded body for POST submissions
    pub form: Option<Vec<(String, String)>>,
}

fn parse_selector(selector: &str) -> Result<Selector, RenderError> {
    Selector::parse(selector).map_err(|_| RenderError::Selector(selector.to_string()))
}

/// Returns `attribute` of every element matching `selector`
///
/// Elements without the attribute are skipped.
pub fn select_attribute(
    html: &str,
    selector: &str,
    attribute: &str,
) -> Result<Vec<String>, RenderError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .filter_map(|element| element.value().attr(attribute))
        .map(|value| value.to_string())
        .collect())
}

/// Returns true if at least one element matches `selector`
pub fn has_match(html: &str, selector: &str) -> Result<bool, RenderError> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}

/// Works out what clicking the first element matching `selector` does
///
/// Links navigate to their `href`. Anything inside a `<form>` (or the form
/// itself) submits that form, using the values typed into `typed` fields
/// (selector -> value) in place of the document's own.
pub fn plan_click(
    html: &str,
    page_url: &Url,
    selector: &str,
    typed: &[(String, String)],
) -> Result<PlannedNavigation, RenderError> {
    let target_selector = parse_selector(selector)?;
    let document = Html::parse_document(html);

    let target = document
        .select(&target_selector)
        .next()
        .ok_or_else(|| RenderError::NoMatch(selector.to_string()))?;

    if target.value().name() == "a" {
        let href = target
            .value()
            .attr("href")
            .ok_or_else(|| RenderError::Session(format!("'{}' has no href", selector)))?;
        let url = page_url
            .join(href)
            .map_err(|e| RenderError::Session(format!("Bad href '{}': {}", href, e)))?;
        return Ok(PlannedNavigation {
            method: FormMethod::Get,
            url,
            form: None,
        });
    }

    let form = enclosing_form(target)
        .ok_or_else(|| RenderError::Session(format!("'{}' is not inside a form", selector)))?;

    // Typed values, keyed by the node they were typed into
    let mut overrides = HashMap::new();
    for (field_selector, value) in typed {
        let field_selector = parse_selector(field_selector)?;
        for element in document.select(&field_selector) {
            overrides.insert(element.id(), value.clone());
        }
    }

    let fields_selector = parse_selector("input[name], textarea[name], select[name]")?;
    let mut pairs = Vec::new();
    for field in form.select(&fields_selector) {
        let element = field.value();
        let Some(name) = element.attr("name") else {
            continue;
        };
        let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();

        let is_button = matches!(kind.as_str(), "submit" | "button" | "image" | "reset");
        if is_button && field.id() != target.id() {
            continue;
        }
        if kind == "file" {
            continue;
        }
        if matches!(kind.as_str(), "checkbox" | "radio")
            && element.attr("checked").is_none()
            && !overrides.contains_key(&field.id())
        {
            continue;
        }

        let value = match overrides.get(&field.id()) {
            Some(value) => value.clone(),
            None if element.name() == "textarea" => field.text().collect(),
            None if element.name() == "select" => selected_option(field).unwrap_or_default(),
            None => element.attr("value").unwrap_or_default().to_string(),
        };
        pairs.push((name.to_string(), value));
    }

    // A named <button> contributes its own value when it is the submitter
    if target.value().name() == "button" {
        if let Some(name) = target.value().attr("name") {
            let value = target.value().attr("value").unwrap_or_default();
            pairs.push((name.to_string(), value.to_string()));
        }
    }

    let action = form.value().attr("action").unwrap_or_default();
    let mut url = if action.trim().is_empty() {
        page_url.clone()
    } else {
        page_url
            .join(action)
            .map_err(|e| RenderError::Session(format!("Bad form action '{}': {}", action, e)))?
    };
    url.set_fragment(None);

    let method = match form.value().attr("method") {
        Some(m) if m.eq_ignore_ascii_case("post") => FormMethod::Post,
        _ => FormMethod::Get,
    };

    match method {
        FormMethod::Get => {
            if pairs.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(&pairs);
            }
            Ok(PlannedNavigation {
                method,
                url,
                form: None,
            })
        }
        FormMethod::Post => Ok(PlannedNavigation {
            method,
            url,
            form: Some(pairs),
        }),
    }
}

fn enclosing_form(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    if element.value().name() == "form" {
        return Some(element);
    }

    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "form")
}

fn selected_option(select: ElementRef<'_>) -> Option<String> {
    let options = Selector::parse("option").ok()?;
    let mut first = None;

    for option in select.select(&options) {
        let value = option
            .value()
            .attr("value")
            .map(|v| v.to_string())
            .unwrap_or_else(|| option.text().collect::<String>().trim().to_string());
        if option.value().attr("selected").is_some() {
            return Some(value);
        }
        first.get_or_insert(value);
    }

    first
}
