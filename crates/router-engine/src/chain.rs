//! Fallback model chains.

/// A client-requested model string parsed into ordered options.
///
/// The wire request carries a single pipe-delimited field
/// (`"qwen3|gemma3|llama3.1-8b"`); each option is trimmed and tried in order
/// against every backend's known capabilities. A string with no pipe yields a
/// single-element chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    options: Vec<String>,
}

impl FallbackChain {
    /// Parse a model string into its fallback options.
    #[must_use]
    pub fn parse(model: &str) -> Self {
        Self {
            options: model.split('|').map(|option| option.trim().to_string()).collect(),
        }
    }

    /// The options in request order.
    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }
}
