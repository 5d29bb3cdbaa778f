//! Duplicate resolver: decides whether a report is new or confirms an open issue.
//!
//! # Protocol
//!
//! For each attempt (bounded by `concurrency.max_commit_attempts`):
//!
//! 1. validate the submission (no side effects on failure)
//! 2. classify it outside any section; failures degrade to `(Unknown, Medium)`
//! 3. enter the store's exclusive section keyed by the section keys of
//!    `(location, radius)`; a timeout counts as a conflict
//! 4. look up open issues within the radius, score, decide and commit
//! 5. release the section, then award points
//!
//! Awards are requested again whenever a retried report or confirmation finds
//! its write already in place, so a ledger failure after the commit is
//! repaired by retrying the call.
//!
//! Two reports within `radius` of each other always share a section key,
//! so their lookup-and-commit steps never interleave. Reports in unrelated
//! areas hold disjoint keys and proceed in parallel.

use crate::similarity::{Descriptor, ScoreBreakdown, score};
use civic_core::classify::{Classification, Classifier, classify_or_default};
use civic_core::config::{
    ConcurrencyConfig, ConfigError, EscalationConfig, MatchConfig, ProjectConfig,
};
use civic_core::error::{EngineError, StoreError, ValidationError};
use civic_core::geo::{self, Point, haversine_meters};
use civic_core::ledger::Ledger;
use civic_core::lock::SectionGuard;
use civic_core::model::{
    Actor, Category, EventKind, InvalidTransition, Issue, IssueId, NewIssue, Priority, Status,
    Submission, UserId,
};
use civic_core::store::{ConfirmWrite, IssueStore, follow_merges};
use civic_core::validate::validate_submission;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tracing::{debug, info, instrument, warn};

/// Cooperative cancellation for an in-flight submission.
///
/// Checked before entering the exclusive section and again right before the
/// commit. Once the commit starts the submission runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// How a submission was resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// No open issue scored at or above the ambiguous threshold.
    New { issue: Issue },
    /// The best candidate scored at or above the confirm threshold.
    Confirms {
        issue_id: IssueId,
        score: f64,
        /// False when the reporter had already confirmed (or filed) the issue.
        newly_added: bool,
    },
    /// Created as new, soft-linked to the closest candidate.
    Ambiguous {
        issue: Issue,
        closest: IssueId,
        score: f64,
    },
}

impl Resolution {
    /// The issue the submission ended up attached to.
    #[must_use]
    pub const fn issue_id(&self) -> IssueId {
        match self {
            Self::New { issue } | Self::Ambiguous { issue, .. } => issue.id,
            Self::Confirms { issue_id, .. } => *issue_id,
        }
    }
}

/// An open issue near a location together with its similarity breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub issue: Issue,
    pub breakdown: ScoreBreakdown,
}

/// Result of an explicit confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation {
    pub issue: Issue,
    /// Set when the requested issue had been merged and the confirmation was redirected.
    pub redirected_from: Option<IssueId>,
    pub newly_added: bool,
}

/// Result of merging a duplicate into its target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub target: Issue,
    pub merged: IssueId,
    /// Users who became confirmers of the target through the merge.
    pub moved: Vec<UserId>,
}

enum Decision {
    New,
    Confirm { issue: Issue, score: f64 },
    Ambiguous { closest: IssueId, score: f64 },
}

enum Committed {
    Done {
        resolution: Resolution,
        award: Option<(UserId, IssueId, EventKind)>,
    },
    Conflict,
}

#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn IssueStore>,
    ledger: Ledger,
    classifier: Arc<dyn Classifier>,
    matching: MatchConfig,
    escalation: EscalationConfig,
    concurrency: ConcurrencyConfig,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("matching", &self.matching)
            .field("escalation", &self.escalation)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Build a resolver from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid matching, escalation or concurrency value.
    pub fn new(
        store: Arc<dyn IssueStore>,
        ledger: Ledger,
        classifier: Arc<dyn Classifier>,
        config: &ProjectConfig,
    ) -> Result<Self, ConfigError> {
        config.matching.validate()?;
        config.escalation.validate()?;
        config.concurrency.validate()?;
        Ok(Self {
            store,
            ledger,
            classifier,
            matching: config.matching.clone(),
            escalation: config.escalation,
            concurrency: config.concurrency,
        })
    }

    #[must_use]
    pub const fn matching(&self) -> &MatchConfig {
        &self.matching
    }

    fn section_keys(&self, points: &[Point]) -> Result<Vec<String>, EngineError> {
        let mut keys = BTreeSet::new();
        for point in points {
            let cells = geo::section_keys(*point, self.matching.radius_meters)
                .map_err(|e| ValidationError::new("location", e.to_string()))?;
            keys.extend(cells);
        }
        Ok(keys.into_iter().collect())
    }

    /// Enter the section, mapping a timeout to `None` so callers can retry.
    fn try_enter(&self, keys: &[String], attempt: u32) -> Result<Option<SectionGuard>, EngineError> {
        match self
            .store
            .enter_section(keys, self.concurrency.section_timeout())
        {
            Ok(guard) => Ok(Some(guard)),
            Err(StoreError::Lock(err)) if err.is_timeout() => {
                warn!(attempt, error = %err, "exclusive section busy");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open issues within the radius of `location`, best match first.
    ///
    /// Ties are broken by earliest creation, then lowest id. Candidates beyond
    /// the radius are dropped even if the store returned them.
    ///
    /// # Errors
    ///
    /// Propagates store read failures.
    pub fn candidates(
        &self,
        location: Point,
        text: &str,
        category: Category,
    ) -> Result<Vec<ScoredCandidate>, EngineError> {
        let radius = self.matching.radius_meters;
        let mut scored: Vec<ScoredCandidate> = self
            .store
            .open_near(location, radius, None)?
            .into_iter()
            .filter_map(|issue| {
                let distance = haversine_meters(location, issue.location);
                if distance > radius || !issue.status.is_open() {
                    return None;
                }
                let candidate_text = issue.match_text();
                let breakdown = score(
                    &self.matching,
                    Descriptor {
                        text: &candidate_text,
                        category: issue.category,
                    },
                    Descriptor { text, category },
                    distance,
                );
                Some(ScoredCandidate { issue, breakdown })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.breakdown
                .total
                .total_cmp(&a.breakdown.total)
                .then_with(|| a.issue.created_at.cmp(&b.issue.created_at))
                .then_with(|| a.issue.id.cmp(&b.issue.id))
        });
        Ok(scored)
    }

    fn decide(
        &self,
        submission: &Submission,
        category: Category,
    ) -> Result<Decision, EngineError> {
        let candidates = self.candidates(
            submission.location,
            &submission.match_text(),
            category,
        )?;
        for candidate in &candidates {
            debug!(
                candidate = %candidate.issue.id,
                total = candidate.breakdown.total,
                distance_m = candidate.breakdown.distance_meters,
                text = candidate.breakdown.text,
                category = candidate.breakdown.category,
                "scored candidate"
            );
        }

        let Some(best) = candidates.into_iter().next() else {
            return Ok(Decision::New);
        };
        let score = best.breakdown.total;
        Ok(if score >= self.matching.confirm_threshold {
            Decision::Confirm {
                issue: best.issue,
                score,
            }
        } else if score >= self.matching.ambiguous_threshold {
            Decision::Ambiguous {
                closest: best.issue.id,
                score,
            }
        } else {
            Decision::New
        })
    }

    /// Raise priority once per tier boundary crossed between the two confirmer counts.
    fn escalate(&self, issue_id: IssueId, before: usize, after: usize) -> Result<(), EngineError> {
        let crossed = (before + 1..=after)
            .filter(|count| self.escalation.escalates_at(*count))
            .count();
        if crossed == 0 {
            return Ok(());
        }

        let Some(issue) = self.store.get_issue(issue_id)? else {
            return Err(EngineError::NotFound(issue_id));
        };
        let target = (0..crossed).fold(issue.priority, |p, _| {
            p.escalated(self.escalation.max_priority)
        });
        let stored = self.store.raise_priority(issue_id, target)?;
        if stored > issue.priority {
            info!(issue = %issue_id, from = %issue.priority, to = %stored, "priority escalated");
        }
        Ok(())
    }

    /// Add `user` as a confirmer of `issue`, read inside the section, and
    /// escalate on a tier crossing.
    ///
    /// Returns whether the user was newly added and the award they are owed,
    /// or `None` when the issue is no longer open. The award is owed on every
    /// call so a retry after a failed ledger write still pays; the ledger
    /// records it once.
    fn add_confirmer(
        &self,
        issue: &Issue,
        user: &UserId,
    ) -> Result<Option<(bool, EventKind)>, EngineError> {
        Ok(Some(match self.store.add_confirmer(issue.id, user)? {
            ConfirmWrite::Added => {
                let before = issue.confirmer_ids.len();
                self.escalate(issue.id, before, before + 1)?;
                (true, EventKind::Confirm)
            }
            ConfirmWrite::AlreadyPresent => (false, EventKind::Confirm),
            ConfirmWrite::IsReporter => (false, EventKind::Submit),
            ConfirmWrite::NotOpen => return Ok(None),
        }))
    }

    fn commit(
        &self,
        decision: Decision,
        submission: &Submission,
        classification: Classification,
        actor: &Actor,
    ) -> Result<Committed, EngineError> {
        let create = |possible_duplicate_of| NewIssue {
            title: submission.title.clone(),
            description: submission.description.clone(),
            location: submission.location,
            image_ref: submission.image_ref.clone(),
            category: classification.category,
            priority: classification.priority,
            reporter_id: actor.user_id.clone(),
            possible_duplicate_of,
        };

        match decision {
            Decision::New => {
                let issue = self.store.create_issue(&create(None))?;
                info!(issue = %issue.id, category = %issue.category, "new issue created");
                Ok(Committed::Done {
                    award: Some((actor.user_id.clone(), issue.id, EventKind::Submit)),
                    resolution: Resolution::New { issue },
                })
            }
            Decision::Ambiguous { closest, score } => {
                let issue = self.store.create_issue(&create(Some(closest)))?;
                info!(issue = %issue.id, %closest, score, "ambiguous report created as new issue");
                Ok(Committed::Done {
                    award: Some((actor.user_id.clone(), issue.id, EventKind::Submit)),
                    resolution: Resolution::Ambiguous {
                        issue,
                        closest,
                        score,
                    },
                })
            }
            Decision::Confirm { issue, score } => {
                let Some((newly_added, kind)) = self.add_confirmer(&issue, &actor.user_id)? else {
                    return Ok(Committed::Conflict);
                };
                info!(issue = %issue.id, score, newly_added, "report confirms existing issue");
                Ok(Committed::Done {
                    award: Some((actor.user_id.clone(), issue.id, kind)),
                    resolution: Resolution::Confirms {
                        issue_id: issue.id,
                        score,
                        newly_added,
                    },
                })
            }
        }
    }

    /// Resolve a citizen report.
    ///
    /// # Errors
    ///
    /// `Validation` for malformed reports; `Conflict` once every attempt
    /// lost its race; `Store` for persistence failures.
    pub fn submit(&self, submission: &Submission, actor: &Actor) -> Result<Resolution, EngineError> {
        self.submit_with_cancel(submission, actor, &CancelToken::default())
    }

    /// [`submit`](Self::submit) with cooperative cancellation.
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit), plus `Cancelled` when `cancel` fired
    /// before the commit; nothing is persisted in that case.
    #[instrument(skip_all, fields(reporter = %actor.user_id))]
    pub fn submit_with_cancel(
        &self,
        submission: &Submission,
        actor: &Actor,
        cancel: &CancelToken,
    ) -> Result<Resolution, EngineError> {
        let submission = validate_submission(submission)?;
        let classification = classify_or_default(
            self.classifier.as_ref(),
            &submission.title,
            &submission.description,
        );
        let keys = self.section_keys(&[submission.location])?;
        let attempts = self.concurrency.max_commit_attempts;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let Some(section) = self.try_enter(&keys, attempt)? else {
                continue;
            };

            let decision = self.decide(&submission, classification.category)?;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            match self.commit(decision, &submission, classification, actor)? {
                Committed::Done { resolution, award } => {
                    section.release();
                    if let Some((user, issue, kind)) = award {
                        self.ledger.award(&user, issue, kind)?;
                    }
                    return Ok(resolution);
                }
                Committed::Conflict => {
                    warn!(attempt, "candidate closed before commit; retrying");
                }
            }
        }

        Err(EngineError::Conflict { attempts })
    }

    /// Confirm a known issue directly. Merged issues redirect to their target.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids; `Validation` when the issue is no longer open.
    #[instrument(skip(self, actor), fields(user = %actor.user_id))]
    pub fn confirm(&self, issue_id: IssueId, actor: &Actor) -> Result<Confirmation, EngineError> {
        let attempts = self.concurrency.max_commit_attempts;
        for attempt in 1..=attempts {
            let target = follow_merges(self.store.as_ref(), issue_id)?;
            if !target.status.is_open() {
                return Err(ValidationError::new(
                    "issue",
                    format!("{} is {} and no longer accepts confirmations", target.id, target.status),
                )
                .into());
            }

            let keys = self.section_keys(&[target.location])?;
            let Some(section) = self.try_enter(&keys, attempt)? else {
                continue;
            };

            // The confirmer count may have moved while waiting for the section.
            let target = self.load(target.id)?;
            let Some((newly_added, kind)) = self.add_confirmer(&target, &actor.user_id)? else {
                warn!(attempt, issue = %target.id, "issue left open states; re-reading");
                continue;
            };
            section.release();

            self.ledger.award(&actor.user_id, target.id, kind)?;
            info!(issue = %target.id, requested = %issue_id, newly_added, "issue confirmed");
            let issue = self
                .store
                .get_issue(target.id)?
                .ok_or(EngineError::NotFound(target.id))?;
            return Ok(Confirmation {
                redirected_from: (issue.id != issue_id).then_some(issue_id),
                issue,
                newly_added,
            });
        }

        Err(EngineError::Conflict { attempts })
    }

    /// Merge the open issue `duplicate_id` into the open issue `target_id`.
    ///
    /// # Errors
    ///
    /// `Validation` when both ids are equal; `InvalidTransition` when either
    /// issue is not open; `Conflict` when the section stayed busy.
    #[instrument(skip(self))]
    pub fn merge(
        &self,
        duplicate_id: IssueId,
        target_id: IssueId,
    ) -> Result<MergeOutcome, EngineError> {
        if duplicate_id == target_id {
            return Err(ValidationError::new("target", "an issue cannot be merged into itself").into());
        }

        let attempts = self.concurrency.max_commit_attempts;
        for attempt in 1..=attempts {
            let duplicate = self.load(duplicate_id)?;
            let target = self.load(target_id)?;
            let keys = self.section_keys(&[duplicate.location, target.location])?;
            let Some(section) = self.try_enter(&keys, attempt)? else {
                continue;
            };

            // Re-read under the section; both must still be open.
            let duplicate = self.load(duplicate_id)?;
            let target = self.load(target_id)?;
            duplicate.status.can_transition_to(Status::Merged)?;
            if !target.status.is_open() {
                return Err(InvalidTransition {
                    from: duplicate.status,
                    to: Status::Merged,
                    reason: "merge target is not open",
                }
                .into());
            }

            let moved = self.merge_locked(&duplicate, &target)?;
            section.release();

            for user in &moved {
                self.ledger.award(user, target.id, EventKind::Confirm)?;
            }
            info!(duplicate = %duplicate_id, target = %target_id, moved = moved.len(), "issues merged");
            return Ok(MergeOutcome {
                target: self.load(target_id)?,
                merged: duplicate_id,
                moved,
            });
        }

        Err(EngineError::Conflict { attempts })
    }

    fn merge_locked(&self, duplicate: &Issue, target: &Issue) -> Result<Vec<UserId>, EngineError> {
        if !self.store.mark_merged(duplicate.id, target.id)? {
            return Err(InvalidTransition {
                from: duplicate.status,
                to: Status::Merged,
                reason: "duplicate left the open states during merge",
            }
            .into());
        }

        let mut moved = Vec::new();
        for user in std::iter::once(&duplicate.reporter_id).chain(&duplicate.confirmer_ids) {
            if self.store.add_confirmer(target.id, user)? == ConfirmWrite::Added {
                moved.push(user.clone());
            }
        }

        if !target.category.is_known() && duplicate.category.is_known() {
            self.store.set_category(target.id, duplicate.category)?;
        }
        let combined: Priority = target.priority.max(duplicate.priority);
        self.store.raise_priority(target.id, combined)?;

        let before = target.confirmer_ids.len();
        self.escalate(target.id, before, before + moved.len())?;
        Ok(moved)
    }

    fn load(&self, id: IssueId) -> Result<Issue, EngineError> {
        self.store.get_issue(id)?.ok_or(EngineError::NotFound(id))
    }

    /// Re-score an open issue against older open neighbours and merge it into
    /// the best one when that clears the confirm threshold.
    ///
    /// Returns `None` when the issue is not open or nothing matched.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, plus anything [`merge`](Self::merge) returns.
    #[instrument(skip(self))]
    pub fn reconcile(&self, issue_id: IssueId) -> Result<Option<MergeOutcome>, EngineError> {
        let issue = self.load(issue_id)?;
        if !issue.status.is_open() {
            return Ok(None);
        }

        let best = self
            .candidates(issue.location, &issue.match_text(), issue.category)?
            .into_iter()
            .filter(|c| is_older(&c.issue, &issue))
            .find(|c| c.breakdown.total >= self.matching.confirm_threshold);

        match best {
            Some(candidate) => {
                debug!(issue = %issue_id, target = %candidate.issue.id, total = candidate.breakdown.total, "reconcile match");
                self.merge(issue_id, candidate.issue.id).map(Some)
            }
            None => Ok(None),
        }
    }
}

fn is_older(candidate: &Issue, issue: &Issue) -> bool {
    match candidate.created_at.cmp(&issue.created_at) {
        Ordering::Less => true,
        Ordering::Equal => candidate.id < issue.id,
        Ordering::Greater => false,
    }
}
