// Classifier implementations
//
// The core consumes only the Classifier trait; these are the swappable
// backends. The rule-table classifier is the default, the HTTP classifier
// fronts an external analysis service, and the static classifier pins
// outcomes in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use faultline_core::{
    Classification, Classifier, ClassifierError, Event, Incident, Recommendation, RulesTable,
};

/// Invoke a classifier under a deadline, collapsing timeout and failure into
/// the documented escalate fallback. The pipeline never sees an error here.
pub async fn classify_with_timeout(
    classifier: &dyn Classifier,
    incident: &Incident,
    recent_events: &[Event],
    timeout: Duration,
) -> Classification {
    match tokio::time::timeout(timeout, classifier.classify(incident, recent_events)).await {
        Ok(Ok(classification)) => classification.clamped(),
        Ok(Err(e)) => {
            warn!(incident_id = %incident.id, error = %e, "classifier failed");
            Classification::classifier_timeout(classifier.model_tag())
        }
        Err(_) => {
            warn!(incident_id = %incident.id, "classifier timed out");
            Classification::classifier_timeout(classifier.model_tag())
        }
    }
}

/// Deterministic classifier over the rules table.
///
/// Retryable codes recommend retry; non-retryable codes recommend
/// escalation. Good enough to run the whole pipeline without any external
/// analysis plane.
pub struct RuleBasedClassifier {
    rules: Arc<RulesTable>,
    model_tag: String,
}

impl RuleBasedClassifier {
    pub fn new(rules: Arc<RulesTable>) -> Self {
        Self {
            rules,
            model_tag: "rules-v1".to_string(),
        }
    }
}

#[async_trait]
impl Classifier for RuleBasedClassifier {
    async fn classify(
        &self,
        incident: &Incident,
        _recent_events: &[Event],
    ) -> Result<Classification, ClassifierError> {
        let error_code = incident
            .metadata
            .get("error_code")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let rule = self.rules.lookup(&error_code);
        let classification = if rule.retryable {
            Classification {
                category: error_code.clone(),
                confidence: 0.75,
                recommended: Recommendation::Retry,
                reasoning: format!("error code '{error_code}' is retryable per rules table"),
                model_tag: self.model_tag.clone(),
            }
        } else {
            Classification {
                category: error_code.clone(),
                confidence: 0.9,
                recommended: Recommendation::Escalate,
                reasoning: format!("error code '{error_code}' is not retryable per rules table"),
                model_tag: self.model_tag.clone(),
            }
        };

        Ok(classification)
    }

    fn model_tag(&self) -> &str {
        &self.model_tag
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    incident: &'a Incident,
    recent_events: &'a [Event],
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    category: String,
    confidence: f64,
    recommended: Recommendation,
    reasoning: String,
    model_tag: Option<String>,
}

/// Classifier fronting an external analysis service over HTTP.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    model_tag: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, model_tag: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model_tag: model_tag.into(),
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        incident: &Incident,
        recent_events: &[Event],
    ) -> Result<Classification, ClassifierError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest {
                incident,
                recent_events,
            })
            .send()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClassifierError::Transport(format!(
                "classifier returned status {}",
                response.status()
            )));
        }

        let body: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        Ok(Classification {
            category: body.category,
            confidence: body.confidence,
            recommended: body.recommended,
            reasoning: body.reasoning,
            model_tag: body.model_tag.unwrap_or_else(|| self.model_tag.clone()),
        }
        .clamped())
    }

    fn model_tag(&self) -> &str {
        &self.model_tag
    }
}

/// Test classifier returning a fixed classification.
pub struct StaticClassifier {
    classification: Classification,
}

impl StaticClassifier {
    pub fn new(classification: Classification) -> Self {
        Self { classification }
    }

    /// A static classifier that always recommends retry.
    pub fn recommending_retry() -> Self {
        Self::new(Classification {
            category: "transient".to_string(),
            confidence: 0.8,
            recommended: Recommendation::Retry,
            reasoning: "static test classifier".to_string(),
            model_tag: "static-test".to_string(),
        })
    }
}

#[async_trait]
impl Classifier for StaticClassifier {
    async fn classify(
        &self,
        _incident: &Incident,
        _recent_events: &[Event],
    ) -> Result<Classification, ClassifierError> {
        Ok(self.classification.clone())
    }

    fn model_tag(&self) -> &str {
        &self.classification.model_tag
    }
}

/// Test classifier that never answers; exercises the timeout fallback.
pub struct HangingClassifier;

#[async_trait]
impl Classifier for HangingClassifier {
    async fn classify(
        &self,
        _incident: &Incident,
        _recent_events: &[Event],
    ) -> Result<Classification, ClassifierError> {
        std::future::pending().await
    }

    fn model_tag(&self) -> &str {
        "hanging-test"
    }
}
