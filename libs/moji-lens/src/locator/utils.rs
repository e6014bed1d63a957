use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

use crate::common::{CandidateKind, ImageCandidate};
use crate::injector::ANNOTATION_CLASS;
use crate::page::{Document, ElementData};

pub const MIN_IMAGE_SIZE: f64 = 20.0;

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"url\(["']?(.+?)["']?\)"#).unwrap());

pub fn extract_css_url(value: &str) -> Option<&str> {
    CSS_URL_RE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn is_big_enough(el: &ElementData, min_size: f64) -> bool {
    el.rect.width >= min_size && el.rect.height >= min_size
}

fn resolve_url(base: Option<&Url>, raw: &str) -> String {
    match base.and_then(|b| b.join(raw).ok()) {
        Some(resolved) => resolved.to_string(),
        None => raw.to_string(),
    }
}

pub fn collect_image_candidates(doc: &Document, min_size: f64) -> Vec<ImageCandidate> {
    let base = doc.url().and_then(|u| Url::parse(u).ok());
    let elements = doc.elements();
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for key in &elements {
        let Some(el) = doc.element(*key) else { continue };
        if !el.is("img") {
            continue;
        }
        let Some(src) = el.attr("src").filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        if !is_big_enough(el, min_size) {
            continue;
        }
        let url = resolve_url(base.as_ref(), src.trim());
        if !seen.insert(url.clone()) {
            continue;
        }
        results.push(ImageCandidate {
            element: *key,
            url,
            kind: CandidateKind::Img,
        });
    }

    for key in &elements {
        let Some(el) = doc.element(*key) else { continue };
        if el.has_class(ANNOTATION_CLASS) {
            continue;
        }
        let bg = el.style.background_image.trim();
        if bg.is_empty() || bg == "none" {
            continue;
        }
        let Some(raw) = extract_css_url(bg) else {
            log::trace!("Skipping unparsable background-image: {}", bg);
            continue;
        };
        if !is_big_enough(el, min_size) {
            continue;
        }
        let url = resolve_url(base.as_ref(), raw);
        if !seen.insert(url.clone()) {
            continue;
        }
        results.push(ImageCandidate {
            element: *key,
            url,
            kind: CandidateKind::Background,
        });
    }

    log::debug!(
        "Located {} image candidates on {}",
        results.len(),
        doc.url().unwrap_or("<unknown page>")
    );
    results
}
