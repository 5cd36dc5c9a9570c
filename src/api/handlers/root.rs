//! HTML landing page

use axum::extract::State;
use axum::response::Html;
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};

use crate::api::server::AppState;
use crate::config::Config;
use crate::error::{Result, ShroudError};

/// Operator-supplied landing page content
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LandingContent {
    #[serde(default)]
    description: String,
    #[serde(default)]
    sections: Vec<LandingSection>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LandingSection {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

/// Render the landing page once at startup from the configured JSON
pub fn render_landing(config: &Config) -> Result<String> {
    let content: LandingContent = serde_json::from_str(&config.landing_page).map_err(|e| {
        ShroudError::InvalidConfig(format!("SHROUD_LANDING_PAGE must be valid JSON: {e}"))
    })?;

    let mut jinja = Environment::new();
    jinja
        .add_template("landing", include_str!("../../../templates/landing.html"))
        .map_err(|e| ShroudError::Internal(format!("failed to load landing template: {e}")))?;
    let template = jinja
        .get_template("landing")
        .map_err(|e| ShroudError::Internal(format!("failed to load landing template: {e}")))?;

    template
        .render(context! {
            title => "Shroud",
            description => content.description,
            sections => content.sections,
            version => env!("CARGO_PKG_VERSION"),
        })
        .map_err(|e| ShroudError::Internal(format!("failed to render landing page: {e}")))
}

/// Serve the prerendered landing page
pub async fn landing(State(state): State<AppState>) -> Html<String> {
    Html(state.landing_html.clone())
}
