mod engine;
mod resolver;
mod types;

pub use engine::{interpolate, TemplateEngine};
pub use resolver::TemplateResolver;
pub use types::{
    MessageTemplate, RenderedButton, RenderedMessage, ResolvedTemplate, TemplateButton,
    TemplateError, TemplateResult, TemplateSource,
};
