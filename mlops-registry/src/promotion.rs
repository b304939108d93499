//! Promotion workflow
//!
//! Combines the query layer, the selector and the mutator into one decision
//! and records its result in the champion side-file. Two policies exist:
//!
//! - **Challenger** (default): the best freshly trained run must strictly
//!   beat the running Production champion to replace it. A losing challenger
//!   is tagged `challenger=True`.
//! - **Ranking**: every registered version competes; the best is promoted
//!   and the runner-up tagged as challenger.
//!
//! Either way a single champion is kept across all prefixed models, and a
//! re-run against unchanged registry state changes nothing.

use crate::client::ModelRegistry;
use crate::mutator;
use crate::query::{candidate_versions, current_champion, find_version_for_run, run_score, score_versions};
use crate::selector::{challenge, select_scored, ChallengeOutcome, Scored};
use mlops_common::config::{Config, PromotionPolicy};
use mlops_common::model::{CHAMPION_TAG, TAG_TRUE};
use mlops_common::records::{load_latest_runs, ChampionStore};
use mlops_common::{ChampionRecord, ModelVersion, Result, Stage};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// A scored model version taking part in a promotion decision
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub model: String,
    pub version: u64,
    pub run_id: String,
    pub score: f64,
    pub stage: Stage,
}

impl Candidate {
    pub fn record(&self) -> ChampionRecord {
        ChampionRecord {
            name: self.model.clone(),
            version: self.version,
            run_id: Some(self.run_id.clone()),
            score: Some(self.score),
        }
    }

    fn same_version(&self, other: &Candidate) -> bool {
        self.model == other.model && self.version == other.version
    }
}

impl From<Scored<ModelVersion>> for Candidate {
    fn from(scored: Scored<ModelVersion>) -> Self {
        Self {
            model: scored.item.name,
            version: scored.item.version,
            run_id: scored.item.run_id,
            score: scored.score,
            stage: scored.item.current_stage,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} ({:.4})", self.model, self.version, self.score)
    }
}

/// What a promotion run decided
#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    /// A new champion was moved to Production
    Promoted {
        champion: Candidate,
        previous: Option<Candidate>,
    },
    /// The running champion kept its place
    Retained {
        champion: Candidate,
        challenger: Option<Candidate>,
    },
    /// No eligible candidate and no running champion; nothing was written
    NoChampion,
}

impl PromotionOutcome {
    /// Champion after the decision
    pub fn champion(&self) -> Option<&Candidate> {
        match self {
            PromotionOutcome::Promoted { champion, .. } | PromotionOutcome::Retained { champion, .. } => {
                Some(champion)
            }
            PromotionOutcome::NoChampion => None,
        }
    }
}

/// Runs promotion decisions against a registry
pub struct Promoter<'a, R: ModelRegistry + ?Sized> {
    registry: &'a R,
    prefix: String,
    metric: String,
    policy: PromotionPolicy,
    champion_store: ChampionStore,
    latest_runs_path: PathBuf,
}

impl<'a, R: ModelRegistry + ?Sized> Promoter<'a, R> {
    pub fn new(registry: &'a R, config: &Config) -> Self {
        Self {
            registry,
            prefix: config.registry.model_prefix.clone(),
            metric: config.promotion.metric.clone(),
            policy: config.promotion.policy,
            champion_store: ChampionStore::new(config.state.champion_path()),
            latest_runs_path: config.state.latest_runs_path(),
        }
    }

    pub fn with_policy(mut self, policy: PromotionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> PromotionPolicy {
        self.policy
    }

    pub fn champion_store(&self) -> &ChampionStore {
        &self.champion_store
    }

    pub async fn run(&self) -> Result<PromotionOutcome> {
        info!(policy = %self.policy, prefix = %self.prefix, metric = %self.metric, "Starting promotion");
        let outcome = match self.policy {
            PromotionPolicy::Challenger => self.run_challenger().await?,
            PromotionPolicy::Ranking => self.run_ranking().await?,
        };

        match outcome.champion() {
            Some(champion) => {
                self.champion_store.save(&champion.record())?;
                info!(
                    champion = %champion,
                    path = %self.champion_store.path().display(),
                    "Champion record written"
                );
            }
            None => warn!("No champion found; champion record left untouched"),
        }
        Ok(outcome)
    }

    async fn run_challenger(&self) -> Result<PromotionOutcome> {
        let pool = self.challenger_pool().await?;
        let best = select_scored(pool).champion;
        let current = current_champion(self.registry, &self.prefix, &self.metric).await?;

        match challenge(current, best) {
            ChallengeOutcome::Promote { challenger, defending } => {
                let champion = Candidate::from(challenger);
                let previous = defending.map(Candidate::from);
                info!(
                    challenger = %champion,
                    defending = ?previous.as_ref().map(|p| p.to_string()),
                    "Challenger beats champion"
                );
                self.crown(&champion).await?;
                Ok(PromotionOutcome::Promoted { champion, previous })
            }
            ChallengeOutcome::Retain { champion, challenger } => {
                let champion = Candidate::from(champion);
                let challenger = challenger.map(Candidate::from);
                info!(
                    champion = %champion,
                    challenger = ?challenger.as_ref().map(|c| c.to_string()),
                    "Champion retained"
                );
                self.ensure_champion_tag(&champion).await?;
                if let Some(challenger) = challenger.as_ref().filter(|c| !c.same_version(&champion)) {
                    mutator::tag_challenger(self.registry, &challenger.model, challenger.version).await?;
                }
                Ok(PromotionOutcome::Retained { champion, challenger })
            }
            ChallengeOutcome::NoCandidates => Ok(PromotionOutcome::NoChampion),
        }
    }

    async fn run_ranking(&self) -> Result<PromotionOutcome> {
        let versions = candidate_versions(self.registry, &self.prefix).await?;
        let scored = score_versions(self.registry, versions, &self.metric).await?;
        let selection = select_scored(scored);

        let Some(best) = selection.champion else {
            return Ok(PromotionOutcome::NoChampion);
        };
        let champion = Candidate::from(best);
        let challenger = selection.challenger.map(Candidate::from);
        let previous = current_champion(self.registry, &self.prefix, &self.metric)
            .await?
            .map(Candidate::from);

        self.crown(&champion).await?;
        if let Some(challenger) = &challenger {
            mutator::tag_challenger(self.registry, &challenger.model, challenger.version).await?;
        }

        match previous {
            Some(previous) if previous.same_version(&champion) => {
                info!(champion = %champion, "Ranking confirms running champion");
                Ok(PromotionOutcome::Retained { champion, challenger })
            }
            previous => {
                info!(champion = %champion, "Ranking selects new champion");
                Ok(PromotionOutcome::Promoted { champion, previous })
            }
        }
    }

    /// Versions registered from the runs named in the latest-runs side-file
    async fn challenger_pool(&self) -> Result<Vec<(ModelVersion, Option<f64>)>> {
        let latest = load_latest_runs(&self.latest_runs_path)?;
        if latest.is_empty() {
            warn!(path = %self.latest_runs_path.display(), "No latest runs recorded");
        }

        let mut pool = Vec::with_capacity(latest.len());
        for (short_name, run_id) in &latest {
            let model_name = format!("{}{}", self.prefix, short_name);
            let Some(version) = find_version_for_run(self.registry, &model_name, run_id).await? else {
                warn!(model = %model_name, run_id = %run_id, "Run is not registered, skipping");
                continue;
            };
            let score = run_score(self.registry, run_id, &self.metric).await?;
            pool.push((version, score));
        }
        Ok(pool)
    }

    /// Promote `champion` and retire Production versions of every other
    /// prefixed model
    async fn crown(&self, champion: &Candidate) -> Result<()> {
        mutator::promote(self.registry, &champion.model, champion.version).await?;

        let rivals: Vec<ModelVersion> = candidate_versions(self.registry, &self.prefix)
            .await?
            .into_iter()
            .filter(|v| v.name != champion.model && v.current_stage == Stage::Production)
            .collect();
        for rival in rivals {
            mutator::retire(self.registry, &rival.name, rival.version).await?;
        }
        Ok(())
    }

    async fn ensure_champion_tag(&self, champion: &Candidate) -> Result<()> {
        let tagged = self
            .registry
            .list_versions(&champion.model)
            .await?
            .iter()
            .any(|v| v.version == champion.version && v.is_champion());
        if !tagged {
            self.registry
                .set_version_tag(&champion.model, champion.version, CHAMPION_TAG, TAG_TRUE)
                .await?;
        }
        Ok(())
    }
}
