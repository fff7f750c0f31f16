use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use utoipa::ToSchema;

use super::footer::FooterGenerator;
use super::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }
}

/// Paper formats understood by the rendering engine.
///
/// Names are matched case-insensitively, in request bodies as in `REPORT_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String")]
pub enum PageFormat {
    A3,
    A4,
    A5,
    Legal,
    Letter,
    Tabloid,
}

impl PageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A3 => "A3",
            Self::A4 => "A4",
            Self::A5 => "A5",
            Self::Legal => "Legal",
            Self::Letter => "Letter",
            Self::Tabloid => "Tabloid",
        }
    }
}

impl FromStr for PageFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "a3" => Ok(Self::A3),
            "a4" => Ok(Self::A4),
            "a5" => Ok(Self::A5),
            "legal" => Ok(Self::Legal),
            "letter" => Ok(Self::Letter),
            "tabloid" => Ok(Self::Tabloid),
            other => Err(format!("unknown page size '{other}'")),
        }
    }
}

impl TryFrom<String> for PageFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page settings of the `template` entry option.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateOptions {
    pub content: Option<String>,
    pub orientation: Option<Orientation>,
    pub page_size: Option<PageFormat>,
    #[serde(default, rename = "disable_footer", alias = "disableFooter")]
    pub disable_footer: bool,
    pub margin: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

/// Options accepted by the render entry point.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub template: Option<TemplateOptions>,
    /// Markup painted verbatim instead of compiling `template.content`.
    pub render_html: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
    pub header_template: Option<String>,
    /// Footer markup; `#pageNum#` is replaced with the page number plus `pageNumberOffset`.
    pub footer_content: Option<String>,
    pub page_number_offset: Option<i64>,
    pub footer_height: Option<String>,
    /// Download name used by the HTTP layer.
    pub name: Option<String>,
}

/// Base page configuration selected by orientation.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePreset {
    pub page_size: PageFormat,
    pub orientation: Orientation,
    pub margin: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagePresets {
    pub portrait: PagePreset,
    pub landscape: PagePreset,
    pub footer_height: String,
}

impl PagePresets {
    pub fn new(page_size: PageFormat, margin: impl Into<String>, footer_height: impl Into<String>) -> Self {
        let margin = margin.into();
        Self {
            portrait: PagePreset {
                page_size,
                orientation: Orientation::Portrait,
                margin: margin.clone(),
            },
            landscape: PagePreset {
                page_size,
                orientation: Orientation::Landscape,
                margin,
            },
            footer_height: footer_height.into(),
        }
    }

    pub fn for_orientation(&self, orientation: Orientation) -> &PagePreset {
        match orientation {
            Orientation::Portrait => &self.portrait,
            Orientation::Landscape => &self.landscape,
        }
    }
}

impl Default for PagePresets {
    fn default() -> Self {
        Self::new(PageFormat::A4, "1cm", "1cm")
    }
}

/// Resolved page configuration of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOptions {
    pub page_size: PageFormat,
    pub orientation: Orientation,
    pub margin: String,
    pub disable_footer: bool,
    pub footer_height: String,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl PageOptions {
    /// Start from the orientation preset (portrait when unset), then apply explicit overrides.
    pub fn resolve(
        template: Option<&TemplateOptions>,
        footer_height: Option<&str>,
        presets: &PagePresets,
    ) -> Self {
        let orientation = template.and_then(|t| t.orientation).unwrap_or_default();
        let preset = presets.for_orientation(orientation);

        PageOptions {
            page_size: template.and_then(|t| t.page_size).unwrap_or(preset.page_size),
            orientation: preset.orientation,
            margin: template
                .and_then(|t| non_empty(t.margin.as_deref()))
                .unwrap_or(preset.margin.as_str())
                .to_string(),
            disable_footer: template.map(|t| t.disable_footer).unwrap_or(false),
            footer_height: non_empty(footer_height)
                .unwrap_or(presets.footer_height.as_str())
                .to_string(),
            width: template.and_then(|t| t.width),
            height: template.and_then(|t| t.height),
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.width,
            height: self.height,
        }
    }
}

/// A validated, immutable render request.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub template_content: Option<String>,
    pub rendered_html: Option<String>,
    pub data_context: Value,
    pub page_options: PageOptions,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub page_number_offset: Option<i64>,
    pub name: Option<String>,
}

impl RenderRequest {
    /// Build a request from entry options, failing when there is nothing to render.
    pub fn from_options(options: RenderOptions, presets: &PagePresets) -> Result<Self, RenderError> {
        let page_options = PageOptions::resolve(
            options.template.as_ref(),
            options.footer_height.as_deref(),
            presets,
        );

        let request = RenderRequest {
            template_content: options
                .template
                .and_then(|t| t.content)
                .filter(|c| !c.is_empty()),
            rendered_html: options.render_html.filter(|h| !h.is_empty()),
            data_context: options.data,
            page_options,
            header_template: options.header_template.filter(|h| !h.is_empty()),
            footer_template: options.footer_content.filter(|f| !f.is_empty()),
            page_number_offset: options.page_number_offset,
            name: options.name,
        };

        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        let has_template = self
            .template_content
            .as_deref()
            .is_some_and(|c| !c.is_empty());

        if self.rendered_html.is_none() && !has_template {
            return Err(RenderError::Validation(
                "No template provided in option object".to_string(),
            ));
        }
        Ok(())
    }
}

/// A header or footer band painted on every page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBand {
    pub height: String,
    pub contents: FooterGenerator,
}

/// Page geometry plus the per-page bands, as handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperSize {
    pub format: PageFormat,
    pub orientation: Orientation,
    pub margin: String,
    pub header: Option<PageBand>,
    pub footer: Option<PageBand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Viewport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// A successfully exported document.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub path: PathBuf,
    /// The markup that was painted, kept for diagnostics.
    pub html: String,
    pub created_at: DateTime<Utc>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(json: Value) -> RenderOptions {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_missing_template_and_html_is_rejected() {
        let result = RenderRequest::from_options(options(json!({"data": {}})), &PagePresets::default());
        assert!(matches!(result, Err(RenderError::Validation(_))));

        let result = RenderRequest::from_options(
            options(json!({"template": {"content": ""}})),
            &PagePresets::default(),
        );
        assert!(matches!(result, Err(RenderError::Validation(_))));
    }

    #[test]
    fn test_render_html_without_template_is_accepted() {
        let request =
            RenderRequest::from_options(options(json!({"renderHtml": "<p>x</p>"})), &PagePresets::default())
                .unwrap();
        assert_eq!(request.rendered_html.as_deref(), Some("<p>x</p>"));
        assert_eq!(request.page_options.orientation, Orientation::Portrait);
    }

    #[test]
    fn test_orientation_selects_preset_and_page_size_overrides() {
        let request = RenderRequest::from_options(
            options(json!({
                "template": {"content": "x", "orientation": "landscape", "pageSize": "Letter"},
                "footerHeight": "2cm"
            })),
            &PagePresets::default(),
        )
        .unwrap();

        let page = &request.page_options;
        assert_eq!(page.orientation, Orientation::Landscape);
        assert_eq!(page.page_size, PageFormat::Letter);
        assert_eq!(page.margin, "1cm");
        assert_eq!(page.footer_height, "2cm");
    }

    #[test]
    fn test_page_size_override_does_not_leak_into_presets() {
        let presets = PagePresets::default();
        let _ = RenderRequest::from_options(
            options(json!({"template": {"content": "x", "pageSize": "A3"}})),
            &presets,
        )
        .unwrap();
        let next = RenderRequest::from_options(options(json!({"template": {"content": "x"}})), &presets)
            .unwrap();
        assert_eq!(next.page_options.page_size, PageFormat::A4);
    }

    #[test]
    fn test_disable_footer_flag_is_read() {
        let request = RenderRequest::from_options(
            options(json!({"template": {"content": "x", "disable_footer": true}})),
            &PagePresets::default(),
        )
        .unwrap();
        assert!(request.page_options.disable_footer);
    }

    #[test]
    fn test_page_format_from_str() {
        assert_eq!("letter".parse::<PageFormat>(), Ok(PageFormat::Letter));
        assert!("B7".parse::<PageFormat>().is_err());
    }

    #[test]
    fn test_page_size_in_request_is_case_insensitive() {
        let request = RenderRequest::from_options(
            options(json!({ "template": { "content": "<p></p>", "pageSize": "a4" } })),
            &PagePresets::new(PageFormat::Letter, "1cm", "1cm"),
        )
        .unwrap();
        assert_eq!(request.page_options.page_size, PageFormat::A4);

        let format: PageFormat = serde_json::from_value(json!("tabloid")).unwrap();
        assert_eq!(format, PageFormat::Tabloid);
        assert!(serde_json::from_value::<PageFormat>(json!("B7")).is_err());
        assert_eq!(serde_json::to_value(PageFormat::Legal).unwrap(), json!("Legal"));
    }
}
