//! Per-page header/footer generators.
//!
//! The engine asks for a band's contents once per physical page. Instead of shipping code
//! across the process boundary, a generator is plain data: either the built-in footer or a
//! pre-rendered fragment with page placeholders, evaluated here when the engine calls back.

use chrono::{Local, NaiveDateTime};
use serde_json::Value;

use super::compiler::TemplateCompiler;
use super::RenderError;

/// Replaced with `pageNum + offset`.
pub const PAGE_NUMBER_TOKEN: &str = "#pageNum#";
/// Replaced with the total page count.
pub const PAGE_COUNT_TOKEN: &str = "#numPages#";

const FOOTER_STYLE: &str = "font-size: 8px; font-weight: normal;";

#[derive(Debug, Clone, PartialEq)]
pub enum FooterGenerator {
    /// Centered page counter and right-aligned print timestamp.
    Default,
    /// Static fragment with page placeholders.
    Template { fragment: String, offset: i64 },
}

impl FooterGenerator {
    /// Wrap an already rendered fragment. Line breaks are dropped so the fragment stays a
    /// single line on the wire.
    pub fn from_fragment(fragment: &str, page_number_offset: Option<i64>) -> Self {
        FooterGenerator::Template {
            fragment: fragment.chars().filter(|c| !matches!(c, '\r' | '\n')).collect(),
            offset: page_number_offset.unwrap_or(0),
        }
    }

    /// Contents for page `page_num` (1-based) of `num_pages`.
    pub fn render(&self, page_num: u32, num_pages: u32) -> String {
        self.render_at(page_num, num_pages, Local::now().naive_local())
    }

    pub fn render_at(&self, page_num: u32, num_pages: u32, now: NaiveDateTime) -> String {
        match self {
            FooterGenerator::Default => format!(
                "<h6 style=\"text-align: center; {FOOTER_STYLE}\">Pagina {page_num} / {num_pages}</h6>\
                 <h6 style=\"text-align: right; {FOOTER_STYLE}\">Întocmit la data de: {}</h6>",
                now.format("%-d-%-m-%Y %-H:%M")
            ),
            FooterGenerator::Template { fragment, offset } => fragment
                .replace(PAGE_NUMBER_TOKEN, &(i64::from(page_num) + offset).to_string())
                .replace(PAGE_COUNT_TOKEN, &num_pages.to_string()),
        }
    }
}

/// Build the footer generator of a request: the built-in footer when no template is given,
/// otherwise the template rendered against the request data.
pub fn make_footer_generator(
    compiler: &TemplateCompiler,
    footer_template: Option<&str>,
    data: &Value,
    page_number_offset: Option<i64>,
) -> Result<FooterGenerator, RenderError> {
    match footer_template {
        None => Ok(FooterGenerator::Default),
        Some(template) => {
            let fragment = compiler.compile(template, data)?;
            Ok(FooterGenerator::from_fragment(&fragment, page_number_offset))
        }
    }
}
