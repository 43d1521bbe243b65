// Decision recorder
//
// Persists classifier output immutably before the action coordinator acts on
// it. The repository exposes no update for decisions; this type is the only
// writer on the analysis path.

use anyhow::Result;
use uuid::Uuid;

use faultline_core::{Classification, Decision, DecisionKind};
use faultline_storage::{CreateDecision, Database};

#[derive(Clone)]
pub struct DecisionRecorder {
    db: Database,
}

impl DecisionRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a classification for an incident. Confidence is clamped into
    /// `[0, 1]` before it reaches the audit trail.
    pub async fn record_classification(
        &self,
        incident_id: Uuid,
        classification: Classification,
    ) -> Result<Decision> {
        let classification = classification.clamped();
        let row = self
            .db
            .insert_decision(CreateDecision {
                incident_id,
                kind: DecisionKind::Classification,
                category: classification.category,
                recommended: classification.recommended,
                reasoning: classification.reasoning,
                confidence: classification.confidence,
                model_tag: classification.model_tag,
            })
            .await?;

        Ok(row.into())
    }
}
