use crate::page::{Document, ElementData, NodeKey, PageError, Position};

pub const ANNOTATION_CLASS: &str = "__jis-ocr-text";
pub const INSET_CLASS: &str = "__jis-ocr-inset";
pub const STYLES_ID: &str = "__jis-styles";

const HIGHLIGHT_CSS: &str = r#"
      .__jis-ocr-text {
        font: 10px/1.4 -apple-system, sans-serif !important;
        color: #555 !important;
        background: #fffbe6 !important;
        border-left: 2px solid #f0c000 !important;
        padding: 2px 5px !important;
        margin: 2px 0 !important;
        max-width: 100% !important;
        word-break: break-all !important;
        opacity: 0.85 !important;
      }
      .__jis-ocr-text::before {
        content: "OCR" !important;
        font: bold 8px/1 monospace !important;
        color: #b08800 !important;
        background: #f0e4b0 !important;
        padding: 0 3px !important;
        border-radius: 2px !important;
        margin-right: 4px !important;
        vertical-align: middle !important;
      }
      .__jis-ocr-inset {
        position: absolute !important;
        bottom: 0 !important;
        left: 0 !important;
        right: 0 !important;
        margin: 0 !important;
        border-left: none !important;
        border-radius: 0 !important;
        opacity: 0.9 !important;
        font-size: 9px !important;
        text-indent: 0 !important;
        padding: 1px 3px !important;
        z-index: 1 !important;
        pointer-events: none !important;
      }
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// New element right after the source element
    Sibling,
    /// Overlay appended inside the source element
    Inset,
}

/// OCR text with every whitespace character removed.
pub fn clean_text(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Whether the element is floated or laid out by a flex/grid parent.
pub fn is_in_flow_layout(doc: &Document, key: NodeKey) -> bool {
    let Some(el) = doc.element(key) else {
        return false;
    };
    if el.style.float != crate::page::Float::None {
        return true;
    }
    doc.parent(key)
        .and_then(|p| doc.element(p))
        .map(|parent| parent.style.display.is_flex_or_grid())
        .unwrap_or(false)
}

pub fn placement_for(doc: &Document, key: NodeKey) -> Option<Placement> {
    let el = doc.element(key)?;
    if !el.is("img") && is_in_flow_layout(doc, key) {
        Some(Placement::Inset)
    } else {
        Some(Placement::Sibling)
    }
}

/// Add the annotation stylesheet to the page head, once.
pub fn inject_highlight_styles(doc: &mut Document) -> Result<(), PageError> {
    if doc.find_by_id(STYLES_ID).is_some() {
        return Ok(());
    }
    let target = doc.find_first("head").unwrap_or_else(|| doc.root());
    let style = doc.append_element(target, ElementData::new("style").with_attr("id", STYLES_ID))?;
    doc.append_text(style, HIGHLIGHT_CSS)?;
    Ok(())
}

fn annotation(classes: &str, url: &str) -> ElementData {
    ElementData::new("div")
        .with_attr("class", classes)
        .with_attr("data-source-url", url)
}

fn make_relative(el: &mut ElementData) {
    el.style.position = Position::Relative;
    let inline = match el.attr("style").map(str::trim) {
        Some(existing) if !existing.is_empty() => {
            format!("{}; position: relative", existing.trim_end_matches(';'))
        }
        _ => "position: relative".to_string(),
    };
    el.set_attr("style", &inline);
}

/// Insert (or replace) the annotation for `key`.
///
/// Fails with [`PageError::StaleNode`] when the element left the document
/// since it was located.
pub fn inject_ocr_text(
    doc: &mut Document,
    key: NodeKey,
    text: &str,
    url: &str,
) -> Result<Placement, PageError> {
    let placement = placement_for(doc, key).ok_or(PageError::StaleNode)?;
    inject_highlight_styles(doc)?;

    let clean = clean_text(text);

    match placement {
        Placement::Inset => {
            if let Some(existing) = doc.find_descendant_with_class(key, ANNOTATION_CLASS) {
                doc.remove(existing);
            }
            if let Some(el) = doc.element_mut(key) {
                if el.style.position == Position::Static {
                    make_relative(el);
                }
            }
            let classes = format!("{} {}", ANNOTATION_CLASS, INSET_CLASS);
            let div = doc.append_element(key, annotation(&classes, url))?;
            doc.append_text(div, &clean)?;
        }
        Placement::Sibling => {
            if let Some(next) = doc.next_element_sibling(key) {
                if doc.element(next).map(|e| e.has_class(ANNOTATION_CLASS)).unwrap_or(false) {
                    doc.remove(next);
                }
            }
            let div = doc.insert_after(key, annotation(ANNOTATION_CLASS, url))?;
            doc.append_text(div, &clean)?;
        }
    }

    log::trace!("Injected {:?} annotation for {}", placement, url);
    Ok(placement)
}
