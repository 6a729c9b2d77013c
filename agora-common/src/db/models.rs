//! Database models and status enums

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deliberation lifecycle phase
///
/// Phases advance monotonically with two exceptions: `Accumulating` re-enters
/// `Voting` when a challenge round starts, and an external authority may
/// reopen `Submission` while still in `Submission`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DeliberationPhase {
    Submission,
    Voting,
    Accumulating,
    Completed,
}

impl DeliberationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliberationPhase::Submission => "submission",
            DeliberationPhase::Voting => "voting",
            DeliberationPhase::Accumulating => "accumulating",
            DeliberationPhase::Completed => "completed",
        }
    }
}

impl fmt::Display for DeliberationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliberationPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "submission" => Ok(DeliberationPhase::Submission),
            "voting" => Ok(DeliberationPhase::Voting),
            "accumulating" => Ok(DeliberationPhase::Accumulating),
            "completed" => Ok(DeliberationPhase::Completed),
            other => Err(Error::InvalidInput(format!(
                "Unknown deliberation phase: {}",
                other
            ))),
        }
    }
}

/// Idea status
///
/// One-way flow per tier: `Submitted` → (`Pending` | `InVoting`) →
/// (`Advancing` | `Eliminated`), terminating in `Winner` or `Eliminated`.
/// `Defending` is held only by a champion during an active challenge round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum IdeaStatus {
    Submitted,
    Pending,
    InVoting,
    Advancing,
    Winner,
    Eliminated,
    Defending,
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdeaStatus::Submitted => "submitted",
            IdeaStatus::Pending => "pending",
            IdeaStatus::InVoting => "in_voting",
            IdeaStatus::Advancing => "advancing",
            IdeaStatus::Winner => "winner",
            IdeaStatus::Eliminated => "eliminated",
            IdeaStatus::Defending => "defending",
        }
    }
}

impl fmt::Display for IdeaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cell status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CellStatus {
    Deliberating,
    Voting,
    Completed,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Deliberating => "deliberating",
            CellStatus::Voting => "voting",
            CellStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seat state within a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ParticipationStatus {
    Active,
    Voted,
}

impl ParticipationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Active => "active",
            ParticipationStatus::Voted => "voted",
        }
    }
}

/// Revision proposal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RevisionStatus {
    Pending,
    Approved,
    Rejected,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionStatus::Pending => "pending",
            RevisionStatus::Approved => "approved",
            RevisionStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deliberation {
    pub guid: String,
    pub question: String,
    pub phase: DeliberationPhase,
    pub current_tier: i64,
    pub cell_size: i64,
    pub vote_budget: i64,
    pub discussion_seconds: i64,
    pub voting_seconds: i64,
    pub continuous_flow: bool,
    pub accumulation_enabled: bool,
    pub submissions_open: bool,
    pub challenge_round: i64,
    pub champion_idea_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Idea {
    pub guid: String,
    pub deliberation_id: String,
    pub author_id: String,
    pub text: String,
    pub status: IdeaStatus,
    pub tier_reached: i64,
    pub total_points: i64,
    pub loss_count: i64,
    pub is_champion: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliberationMember {
    pub deliberation_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cell {
    pub guid: String,
    pub deliberation_id: String,
    pub tier: i64,
    pub batch: i64,
    pub status: CellStatus,
    pub discussion_ends_at: Option<DateTime<Utc>>,
    pub voting_ends_at: Option<DateTime<Utc>>,
    pub winner_idea_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CellParticipation {
    pub cell_id: String,
    pub user_id: String,
    pub status: ParticipationStatus,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub cell_id: String,
    pub user_id: String,
    pub idea_id: String,
    pub points: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdeaRevision {
    pub guid: String,
    pub idea_id: String,
    pub cell_id: String,
    pub proposed_by: String,
    pub text: String,
    pub status: RevisionStatus,
    pub required_approvals: i64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdeaRevisionVote {
    pub revision_id: String,
    pub user_id: String,
    pub approve: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_round_trip() {
        for phase in [
            DeliberationPhase::Submission,
            DeliberationPhase::Voting,
            DeliberationPhase::Accumulating,
            DeliberationPhase::Completed,
        ] {
            let parsed: DeliberationPhase = phase.as_str().parse().unwrap();
            assert_eq!(parsed, phase);
        }
        assert!("paused".parse::<DeliberationPhase>().is_err());
    }

    #[test]
    fn test_status_strings_match_schema_checks() {
        assert_eq!(IdeaStatus::InVoting.as_str(), "in_voting");
        assert_eq!(CellStatus::Deliberating.as_str(), "deliberating");
        assert_eq!(ParticipationStatus::Voted.as_str(), "voted");
        assert_eq!(RevisionStatus::Rejected.as_str(), "rejected");
    }
}
