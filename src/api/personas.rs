//! Persona listing

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::persona::PersonaConfig;

/// Persona info for API responses
#[derive(Debug, Serialize)]
pub struct PersonaInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&PersonaConfig> for PersonaInfo {
    fn from(p: &PersonaConfig) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
        }
    }
}

/// Response for listing all personas
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaListResponse {
    pub personas: Vec<PersonaInfo>,
    pub active_id: String,
}

/// Build personas router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", get(list_personas)).with_state(state)
}

/// List all loaded personas, sorted by name
async fn list_personas(State(state): State<Arc<ApiState>>) -> Json<PersonaListResponse> {
    let mut personas: Vec<PersonaInfo> = state
        .session
        .personas()
        .iter()
        .map(PersonaInfo::from)
        .collect();
    personas.sort_by(|a, b| a.name.cmp(&b.name));

    Json(PersonaListResponse {
        personas,
        active_id: state.session.status().persona,
    })
}
