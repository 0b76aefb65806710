use std::error::Error;
use std::fmt;
use std::fs;
use std::str::FromStr;
use log::info;

/// Built-in instruction used by [`PromptStyle::Formatted`]. `{prompt}` is replaced
/// with the user's text.
pub const DEFAULT_FORMAT_TEMPLATE: &str = "Give me a quick, easy, short response to this question: {prompt}\n\
Respond in markdown without mentioning markdown, and start with the direct answer rather than an explanation. \
Put code in fenced blocks starting on a new line and never use single backticks. \
Use # for headings (# for h1, ## for h2 and so on), plain text for paragraphs, *italic*, **bold** and ***bold italic*** for emphasis, \
- for bullet points and 1. for numbered lists. \
Start tables on a new line with | and separate columns with |. \
Use > for block quotes, [text](url) for links and ![placeholder](url) for images. \
Do not use any other formatting syntax.";

#[derive(Debug)]
pub enum PromptError {
    MissingPlaceholder(String),
    IoError(std::io::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::MissingPlaceholder(path) =>
                write!(f, "Prompt template '{}' has no {{prompt}} placeholder", path),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

/// Whether the session handler rewrites the prompt before it goes upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptStyle {
    #[default]
    Verbatim,
    Formatted,
}

impl FromStr for PromptStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "verbatim" => Ok(PromptStyle::Verbatim),
            "formatted" => Ok(PromptStyle::Formatted),
            other => Err(format!("Unsupported prompt style: {}", other)),
        }
    }
}

impl fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptStyle::Verbatim => f.write_str("verbatim"),
            PromptStyle::Formatted => f.write_str("formatted"),
        }
    }
}

/// Prompt augmentation applied once per session, server side.
#[derive(Debug, Clone)]
pub struct PromptPolicy {
    pub style: PromptStyle,
    pub template: String,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self {
            style: PromptStyle::Verbatim,
            template: DEFAULT_FORMAT_TEMPLATE.to_string(),
        }
    }
}

impl PromptPolicy {
    pub fn new(style: PromptStyle) -> Self {
        Self { style, ..Self::default() }
    }

    pub fn with_template(mut self, template: String) -> Self {
        self.template = template;
        self
    }

    /// Text sent upstream for `prompt`. History keeps the prompt as typed.
    pub fn apply(&self, prompt: &str) -> String {
        match self.style {
            PromptStyle::Verbatim => prompt.to_string(),
            PromptStyle::Formatted => self.template.replace("{prompt}", prompt),
        }
    }
}

pub fn load_template(path: &str) -> Result<String, PromptError> {
    let template = fs::read_to_string(path)?;
    if !template.contains("{prompt}") {
        return Err(PromptError::MissingPlaceholder(path.to_string()));
    }
    info!("Loaded prompt template from {}", path);
    Ok(template)
}
