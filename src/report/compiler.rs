//! Template compiler - binds the helper table and a data context into markup.

use handlebars::Handlebars;
use serde_json::Value;

use super::helpers;
use super::RenderError;

/// Compiles report templates into markup.
///
/// Built once and shared by every request; compiling does not mutate the registry.
pub struct TemplateCompiler {
    registry: Handlebars<'static>,
}

impl TemplateCompiler {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        helpers::register_all(&mut registry);
        Self { registry }
    }

    /// Evaluate `template` against `data`.
    ///
    /// Fails with `RenderError::Template` on malformed syntax or a refused `for` loop.
    /// Missing fields and bad helper input render as empty output.
    pub fn compile(&self, template: &str, data: &Value) -> Result<String, RenderError> {
        Ok(self.registry.render_template(template, data)?)
    }
}

impl Default for TemplateCompiler {
    fn default() -> Self {
        Self::new()
    }
}
