use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::db::SessionStore;
use crate::error::{CoachError, Result};
use crate::models::{Dimension, PeerComparison, RoleVariant, TimeWindow};

/// Compares a rep's persisted scores against peers evaluated under the same
/// role. Never triggers analysis.
#[derive(Clone)]
pub struct ComparisonEngine {
    sessions: Arc<dyn SessionStore>,
}

impl ComparisonEngine {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// `dimension = None` compares overall scores. Each rep contributes the
    /// mean of their sessions in the window.
    pub async fn compare_peers(
        &self,
        rep_email: &str,
        dimension: Option<Dimension>,
        role: RoleVariant,
        window: TimeWindow,
    ) -> Result<PeerComparison> {
        let rep_email = normalize_email(rep_email)?;

        let mut per_rep: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for summary in self.sessions.list_evaluations(role, &window).await? {
            if summary.role_variant != role || !window.contains(summary.evaluated_at) {
                continue;
            }
            if let Some(score) = summary.score_for(dimension) {
                per_rep
                    .entry(summary.rep_email.to_lowercase())
                    .or_default()
                    .push(score);
            }
        }

        let rep_score = per_rep.remove(&rep_email).map(|scores| round2(mean(&scores)));
        let peers: Vec<f64> = per_rep.values().map(|scores| mean(scores)).collect();

        debug!(
            rep_email = %rep_email,
            role = %role,
            dimension = ?dimension,
            peers = peers.len(),
            "Comparing against peers"
        );

        if peers.is_empty() {
            return Ok(PeerComparison::no_peers(
                &rep_email, dimension, role, rep_score, window,
            ));
        }

        let percentile = rep_score.map(|score| {
            let below = peers.iter().filter(|&&p| p < score).count() as f64;
            let tied = peers.iter().filter(|&&p| p == score).count() as f64;
            round2((below + tied / 2.0) / peers.len() as f64 * 100.0)
        });

        Ok(PeerComparison {
            rep_email,
            dimension,
            role_variant: role,
            rep_score,
            peer_average: Some(round2(mean(&peers))),
            percentile,
            sample_size: peers.len(),
            window,
        })
    }

    /// Compare within the role the rep was most recently evaluated as.
    pub async fn compare_peers_for_rep(
        &self,
        rep_email: &str,
        dimension: Option<Dimension>,
        window: TimeWindow,
    ) -> Result<PeerComparison> {
        let email = normalize_email(rep_email)?;
        let role = self
            .sessions
            .latest_role_for_rep(&email)
            .await?
            .ok_or_else(|| CoachError::NotFound(format!("no evaluations for {email}")))?;

        self.compare_peers(&email, dimension, role, window).await
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(CoachError::Validation(format!(
            "invalid rep email: {email:?}"
        )));
    }
    Ok(email)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::StaticSessions;
    use crate::models::SessionSummary;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn session(rep: &str, role: RoleVariant, overall: f64, discovery: Option<f64>, days_ago: i64) -> SessionSummary {
        SessionSummary {
            call_id: format!("{rep}-{days_ago}"),
            rep_email: rep.to_string(),
            role_variant: role,
            overall_score: Some(overall),
            dimension_scores: discovery
                .map(|score| BTreeMap::from([(Dimension::Discovery, score)]))
                .unwrap_or_default(),
            evaluated_at: Utc::now() - Duration::days(days_ago),
        }
    }

    fn engine(summaries: Vec<SessionSummary>) -> ComparisonEngine {
        ComparisonEngine::new(Arc::new(StaticSessions::with_summaries(summaries)))
    }

    #[tokio::test]
    async fn test_percentile_against_same_role_peers() {
        let engine = engine(vec![
            session("ana@acme.io", RoleVariant::Ae, 80.0, None, 1),
            session("ana@acme.io", RoleVariant::Ae, 70.0, None, 2),
            session("bo@acme.io", RoleVariant::Ae, 60.0, None, 1),
            session("cy@acme.io", RoleVariant::Ae, 75.0, None, 1),
            session("di@acme.io", RoleVariant::Ae, 90.0, None, 3),
            // Different role, ignored.
            session("ed@acme.io", RoleVariant::Se, 10.0, None, 1),
        ]);

        let comparison = engine
            .compare_peers("Ana@Acme.io", None, RoleVariant::Ae, TimeWindow::last_days(30))
            .await
            .unwrap();

        assert_eq!(comparison.rep_score, Some(75.0));
        assert_eq!(comparison.sample_size, 3);
        assert_eq!(comparison.peer_average, Some(75.0));
        // One peer below, one tied, one above.
        assert_eq!(comparison.percentile, Some(50.0));
    }

    #[tokio::test]
    async fn test_dimension_comparison_skips_missing_scores() {
        let engine = engine(vec![
            session("ana@acme.io", RoleVariant::Ae, 80.0, Some(90.0), 1),
            session("bo@acme.io", RoleVariant::Ae, 60.0, Some(50.0), 1),
            session("cy@acme.io", RoleVariant::Ae, 75.0, None, 1),
        ]);

        let comparison = engine
            .compare_peers(
                "ana@acme.io",
                Some(Dimension::Discovery),
                RoleVariant::Ae,
                TimeWindow::last_days(30),
            )
            .await
            .unwrap();

        assert_eq!(comparison.sample_size, 1);
        assert_eq!(comparison.percentile, Some(100.0));
    }

    #[tokio::test]
    async fn test_no_peers_in_window() {
        let engine = engine(vec![
            session("ana@acme.io", RoleVariant::Ae, 80.0, None, 1),
            session("bo@acme.io", RoleVariant::Ae, 60.0, None, 90),
        ]);

        let comparison = engine
            .compare_peers("ana@acme.io", None, RoleVariant::Ae, TimeWindow::last_days(30))
            .await
            .unwrap();

        assert!(!comparison.has_peers());
        assert_eq!(comparison.rep_score, Some(80.0));
        assert_eq!(comparison.percentile, None);
    }

    #[tokio::test]
    async fn test_compare_for_rep_uses_latest_role() {
        let engine = engine(vec![
            session("ana@acme.io", RoleVariant::Ae, 80.0, None, 10),
            session("ana@acme.io", RoleVariant::Se, 65.0, None, 1),
            session("bo@acme.io", RoleVariant::Se, 70.0, None, 1),
        ]);

        let comparison = engine
            .compare_peers_for_rep("ana@acme.io", None, TimeWindow::last_days(30))
            .await
            .unwrap();

        assert_eq!(comparison.role_variant, RoleVariant::Se);
        assert_eq!(comparison.rep_score, Some(65.0));
        assert_eq!(comparison.percentile, Some(0.0));
    }

    #[tokio::test]
    async fn test_unknown_rep_and_bad_email() {
        let engine = engine(vec![]);

        let err = engine
            .compare_peers_for_rep("nobody@acme.io", None, TimeWindow::last_days(30))
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::NotFound(_)));

        let err = engine
            .compare_peers("not-an-email", None, RoleVariant::Ae, TimeWindow::last_days(30))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
