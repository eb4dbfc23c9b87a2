//! State Feed -- read-only view of the incident store for dashboards.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::EngineError;
use crate::incident::{Incident, IncidentFilter, IncidentStatus, IncidentStore};

#[derive(Clone)]
pub struct StateFeed {
    store: Arc<IncidentStore>,
}

impl StateFeed {
    pub fn new(store: Arc<IncidentStore>) -> Self {
        Self { store }
    }

    /// Incidents matching `status_filter` (all if empty), newest first.
    pub fn list_incidents(&self, status_filter: &[IncidentStatus]) -> Vec<Incident> {
        let filter = if status_filter.is_empty() {
            IncidentFilter::all()
        } else {
            IncidentFilter {
                statuses: Some(status_filter.to_vec()),
                target: None,
            }
        };
        let mut incidents: Vec<Incident> = self.store.list(filter).collect();
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        incidents
    }

    pub fn get_incident(&self, id: Uuid) -> Result<Incident, EngineError> {
        Ok(self.store.get(id)?)
    }
}
