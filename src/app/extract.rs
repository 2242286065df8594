const TITLE_BLOCK_SELECTOR: &str = "div[class=\"cont-block-title\"]";
const NAME_SELECTOR: &str = "span[class=\"blue\"]";
const FEATURE_SELECTOR: &str = "div[class=\"m-s-f3\"]";
const PRICE_SPAN_SELECTOR: &str = "div[id^=\"price_\"][class*=\"desc-big-price\"] > span";
const RELATED_LINK_SELECTOR: &str = "div[class=\"m-c-f1\"] a";
const SECTION_HEADER_SELECTOR: &str = "div[class=\"h2 h2-slice\"]";
const PRODUCT_LINK_SELECTOR: &str = "a[class*=\"model-short-title\"]";

/// Turns one rendered product page into a [`ProductRecord`].
///
/// Only the product name is mandatory; every other region degrades to empty or `None`.
fn extract_product(html: &str, numeric_fields: &[String]) -> Result<ProductRecord, ParseError> {
    let doc = Html::parse_document(html);

    let name = extract_name(&doc).ok_or(ParseError::MissingField("name"))?;
    let characteristics = extract_characteristics(&doc, numeric_fields);
    let (min_price, max_price) = extract_price_info(&doc);
    let related_links = extract_related_links(&doc);
    let headers = extract_headers(&doc);

    let extraction_metadata = ExtractionMetadata {
        total_characteristics: characteristics.len(),
        has_price_info: min_price.is_some() || max_price.is_some(),
        total_links: related_links.len(),
        total_headers: headers.len(),
    };

    Ok(ProductRecord {
        name,
        characteristics,
        min_price,
        max_price,
        related_links,
        headers,
        extraction_metadata,
    })
}

fn extract_name(doc: &Html) -> Option<String> {
    let block_sel = Selector::parse(TITLE_BLOCK_SELECTOR).ok()?;
    let name_sel = Selector::parse(NAME_SELECTOR).ok()?;

    let block = doc.select(&block_sel).next()?;
    let name = block.select(&name_sel).next()?;
    let text = clean_text(&name.text().collect::<String>());
    if text.is_empty() { None } else { Some(text) }
}

fn extract_characteristics(doc: &Html, numeric_fields: &[String]) -> Characteristics {
    let mut characteristics = Characteristics::default();
    let selector = match Selector::parse(FEATURE_SELECTOR) {
        Ok(s) => s,
        Err(_) => return characteristics,
    };

    for el in doc.select(&selector) {
        let title = el.value().attr("title").unwrap_or_default().trim();
        if let Some((label, raw_value)) = title.split_once(':') {
            let key = label.trim();
            let numeric = numeric_fields.iter().any(|f| f == key);
            characteristics.insert(key.to_string(), normalize(Some(raw_value.trim()), numeric));
        } else if !title.is_empty() {
            let rendered = el.text().collect::<String>();
            characteristics.insert(title.to_string(), normalize(Some(rendered.trim()), false));
        }
    }

    characteristics
}

fn extract_price_info(doc: &Html) -> (Option<Number>, Option<Number>) {
    let selector = match Selector::parse(PRICE_SPAN_SELECTOR) {
        Ok(s) => s,
        Err(_) => return (None, None),
    };

    let mut spans = doc.select(&selector);
    let mut next_price = || spans.next().and_then(|span| clean_number(&leading_text(span)));
    let min_price = next_price();
    let max_price = next_price();
    (min_price, max_price)
}

fn extract_related_links(doc: &Html) -> Vec<String> {
    let selector = match Selector::parse(RELATED_LINK_SELECTOR) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    doc.select(&selector)
        .map(|a| a.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

fn extract_headers(doc: &Html) -> Vec<String> {
    let selector = match Selector::parse(SECTION_HEADER_SELECTOR) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    doc.select(&selector)
        .filter_map(|el| {
            let text = leading_text(el);
            if text.is_empty() {
                None
            } else {
                Some(text.trim().to_string())
            }
        })
        .collect()
}

/// Text nodes that precede the element's first non-text child.
fn leading_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            _ => break,
        }
    }
    out
}

/// Product page URLs linked from one catalog listing page, resolved against `base`.
fn extract_product_links(html: &str, base: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let selector = match Selector::parse(PRODUCT_LINK_SELECTOR) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    doc.select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_href(base, href.trim()))
        .collect()
}

fn resolve_href(base: &Url, href: &str) -> Option<String> {
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("mailto:")
        || href.starts_with("javascript:")
    {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod extract_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TREK_X1: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/trek_x1.html"));

    fn fields(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn page(body: &str) -> String {
        format!(
            r#"<html><body><div class="cont-block-title"><span class="blue">Widget</span></div>{body}</body></html>"#
        )
    }

    #[test]
    fn trek_fixture_end_to_end() {
        let record = extract_product(TREK_X1, &fields(&["Diagonal"])).unwrap();

        assert_eq!(record.name, "Trek X1");
        assert_eq!(record.min_price, Some(Number::Int(1999)));
        assert_eq!(record.max_price, None);
        assert_eq!(record.headers, vec!["Opis", "Specyfikacja"]);
        assert_eq!(record.related_links, vec!["Trek", "Rowery"]);
        assert_eq!(record.characteristics.len(), 3);
        let numeric = record
            .characteristics
            .0
            .iter()
            .filter(|(_, v)| matches!(v, Some(CleanValue::Number(_))))
            .count();
        assert_eq!(numeric, 1);
        assert_eq!(
            record.characteristics.get("Diagonal"),
            Some(&Some(CleanValue::Number(Number::Int(29))))
        );
        assert_eq!(
            record.characteristics.get("Hamulce"),
            Some(&Some(CleanValue::Text("hydrauliczne tarczowe".into())))
        );
        assert_eq!(
            record.extraction_metadata,
            ExtractionMetadata {
                total_characteristics: 3,
                has_price_info: true,
                total_links: 2,
                total_headers: 2,
            }
        );
    }

    #[test]
    fn missing_name_is_the_only_fatal_condition() {
        let html = r#"<html><body><div class="m-s-f3" title="Rama: stal"></div></body></html>"#;
        let err = extract_product(html, &[]).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("name")));

        let no_emphasis = r#"<div class="cont-block-title"><span>Trek</span></div>"#;
        assert!(extract_product(no_emphasis, &[]).is_err());

        let blank = r#"<div class="cont-block-title"><span class="blue">  </span></div>"#;
        assert!(extract_product(blank, &[]).is_err());
    }

    #[test]
    fn bare_page_degrades_to_empty_fields() {
        let record = extract_product(&page(""), &[]).unwrap();
        assert_eq!(record.name, "Widget");
        assert!(record.headers.is_empty());
        assert!(record.related_links.is_empty());
        assert!(!record.extraction_metadata.has_price_info);
        assert_eq!(record.extraction_metadata.total_characteristics, 0);
    }

    #[test]
    fn price_spans_fill_min_then_max() {
        let none = extract_product(&page(r#"<div id="price_1" class="desc-big-price"></div>"#), &[])
            .unwrap();
        assert_eq!((none.min_price, none.max_price), (None, None));

        let one = extract_product(
            &page(r#"<div id="price_1" class="desc-big-price"><span>1 200 zł</span></div>"#),
            &[],
        )
        .unwrap();
        assert_eq!((one.min_price, one.max_price), (Some(Number::Int(1200)), None));

        let two = extract_product(
            &page(
                r#"<div id="price_1" class="ib desc-big-price"><span>1200</span> – <span>1499,99</span></div>"#,
            ),
            &[],
        )
        .unwrap();
        assert_eq!(
            (two.min_price, two.max_price),
            (Some(Number::Int(1200)), Some(Number::Float(1499.99)))
        );
    }

    #[test]
    fn price_container_needs_both_id_prefix_and_class() {
        let html = page(
            r#"<div id="cost_1" class="desc-big-price"><span>10</span></div>
               <div id="price_2" class="desc-small-price"><span>20</span></div>
               <div id="price_3" class="desc-big-price"><b><span>30</span></b></div>"#,
        );
        let record = extract_product(&html, &[]).unwrap();
        assert_eq!(record.min_price, None);
    }

    #[test]
    fn characteristics_follow_title_rules() {
        let html = page(
            r#"<div class="m-s-f3" title="Частота: 144 Гц">x</div>
               <div class="m-s-f3" title="Matryca: IPS: matowa">x</div>
               <div class="m-s-f3" title="Złącza"> HDMI&nbsp;2.1 </div>
               <div class="m-s-f3">no title</div>
               <div class="m-s-f3 wide" title="Ignored: yes">x</div>
               <div class="m-s-f3" title="Частота: 165 Гц">x</div>"#,
        );
        let record = extract_product(&html, &fields(&["Частота"])).unwrap();
        assert_eq!(
            record.characteristics.keys().collect::<Vec<_>>(),
            vec!["Частота", "Matryca", "Złącza"]
        );
        assert_eq!(
            record.characteristics.get("Частота"),
            Some(&Some(CleanValue::Number(Number::Int(165))))
        );
        assert_eq!(
            record.characteristics.get("Matryca"),
            Some(&Some(CleanValue::Text("IPS: matowa".into())))
        );
        assert_eq!(
            record.characteristics.get("Złącza"),
            Some(&Some(CleanValue::Text("HDMI 2.1".into())))
        );
    }

    #[test]
    fn empty_characteristic_value_is_null() {
        let html = page(r#"<div class="m-s-f3" title="Waga:"></div>"#);
        let record = extract_product(&html, &[]).unwrap();
        assert_eq!(record.characteristics.get("Waga"), Some(&None));
        assert_eq!(record.extraction_metadata.total_characteristics, 1);
    }

    #[test]
    fn headers_use_direct_text_only() {
        let html = page(
            r#"<div class="h2 h2-slice"> Opis <span>ignored</span></div>
               <div class="h2 h2-slice"><span>only nested</span></div>
               <div class="h2 h2-slice">Opinie</div>"#,
        );
        let record = extract_product(&html, &[]).unwrap();
        assert_eq!(record.headers, vec!["Opis", "Opinie"]);
    }

    #[test]
    fn whitespace_only_header_text_is_kept_as_empty() {
        let html = page(
            "<div class=\"h2 h2-slice\">\n   <span>Opis</span></div>\
             <div class=\"h2 h2-slice\">   </div>\
             <div class=\"h2 h2-slice\">Opinie</div>",
        );
        let record = extract_product(&html, &[]).unwrap();
        assert_eq!(record.headers, vec!["", "", "Opinie"]);
        assert_eq!(record.extraction_metadata.total_headers, 3);
    }

    #[test]
    fn related_links_keep_order_and_duplicates() {
        let html = page(
            r#"<div class="m-c-f1"><a>Trek</a><p><a> Rowery </a></p><a></a><a>Trek</a></div>
               <div class="other"><a>Outside</a></div>"#,
        );
        let record = extract_product(&html, &[]).unwrap();
        assert_eq!(record.related_links, vec!["Trek", "Rowery", "Trek"]);
    }

    #[test]
    fn catalog_links_resolve_against_base() {
        let base = Url::parse("https://e-katalog.pl").unwrap();
        let html = r##"
            <a class="model-short-title no-u" href="/TREK-X1.htm">Trek X1</a>
            <a class="model-short-title" href="https://e-katalog.pl/KROSS-A2.htm">Kross</a>
            <a class="model-short-title" href="#top">skip</a>
            <a class="other" href="/ignored.htm">ignored</a>
        "##;
        assert_eq!(
            extract_product_links(html, &base),
            vec![
                "https://e-katalog.pl/TREK-X1.htm",
                "https://e-katalog.pl/KROSS-A2.htm"
            ]
        );
    }
}
