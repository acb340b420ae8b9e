//! Per-user aggregates computed over recorded matches.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use uuid::Uuid;

use super::types::{GameFormat, Match};
use crate::db::UserSummary;

/// Win/loss record for one format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FormatRecord {
    pub matches_played: u32,
    pub wins: u32,
    pub losses: u32,
}

/// Registered opponent plus how often the pairing happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpponentStat {
    pub opponent: UserSummary,
    pub count: u32,
}

/// Record against one guest name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestRecord {
    pub guest_name: String,
    pub wins: u32,
    pub losses: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    pub matches_played: u32,
    pub wins: u32,
    pub losses: u32,
    /// Percentage, one decimal place.
    pub win_pct: f64,
    /// Whole seconds per turn across matches with a turn count.
    pub avg_turn_seconds: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_format: BTreeMap<GameFormat, FormatRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_often_beat: Option<OpponentStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_often_beats_you: Option<OpponentStat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub guest_head_to_head: Vec<GuestRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeadToHeadRecord {
    pub total: u32,
    pub wins: u32,
    pub losses: u32,
    /// Shared matches neither of the two won.
    pub co_losses: u32,
}

impl HeadToHeadRecord {
    fn record(&mut self, my_place: i32, their_place: i32) {
        self.total += 1;
        if my_place == 1 {
            self.wins += 1;
        } else if their_place == 1 {
            self.losses += 1;
        } else {
            self.co_losses += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeadToHead {
    pub opponent: UserSummary,
    #[serde(flatten)]
    pub overall: HeadToHeadRecord,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_format: BTreeMap<GameFormat, HeadToHeadRecord>,
}

/// Aggregates over every match `user_id` played that has a winner.
pub fn summarize(user_id: Uuid, matches: &[Match]) -> StatsSummary {
    let mut summary = StatsSummary::default();
    let mut beat: HashMap<Uuid, (UserSummary, u32)> = HashMap::new();
    let mut beaten_by: HashMap<Uuid, (UserSummary, u32)> = HashMap::new();
    let mut guests: BTreeMap<String, GuestRecord> = BTreeMap::new();
    let (mut turn_seconds, mut turns) = (0_i64, 0_i64);

    for m in matches {
        let (Some(my_place), Some(winner)) = (m.place_of(user_id), m.winner()) else {
            continue;
        };
        let won = my_place == 1;

        summary.matches_played += 1;
        let by_format = summary.by_format.entry(m.format).or_default();
        by_format.matches_played += 1;
        if won {
            summary.wins += 1;
            by_format.wins += 1;
        } else {
            summary.losses += 1;
            by_format.losses += 1;
        }

        if m.turn_count > 0 {
            turn_seconds += i64::from(m.total_duration_seconds);
            turns += i64::from(m.turn_count);
        }

        if won {
            for user in m.players.iter().filter_map(|p| p.user.as_ref()) {
                if user.id != user_id {
                    bump(&mut beat, user);
                }
            }
        } else if let Some(user) = winner.user.as_ref() {
            bump(&mut beaten_by, user);
        }

        for p in m.players.iter().filter(|p| p.user.is_none()) {
            let Some(name) = p.guest_name.as_deref() else {
                continue;
            };
            let record = guests
                .entry(name.to_string())
                .or_insert_with(|| GuestRecord {
                    guest_name: name.to_string(),
                    wins: 0,
                    losses: 0,
                });
            if won {
                record.wins += 1;
            } else if p.place == 1 {
                record.losses += 1;
            }
        }
    }

    if summary.matches_played > 0 {
        let pct = f64::from(summary.wins) * 100.0 / f64::from(summary.matches_played);
        summary.win_pct = (pct * 10.0).round() / 10.0;
    }
    if turns > 0 {
        summary.avg_turn_seconds = u32::try_from(turn_seconds / turns).unwrap_or(u32::MAX);
    }
    summary.most_often_beat = top_opponent(beat);
    summary.most_often_beats_you = top_opponent(beaten_by);
    summary.guest_head_to_head = guests.into_values().collect();
    summary
}

/// Record between `user_id` and `opponent` over the matches both played.
pub fn head_to_head(user_id: Uuid, opponent: UserSummary, matches: &[Match]) -> HeadToHead {
    let mut overall = HeadToHeadRecord::default();
    let mut by_format: BTreeMap<GameFormat, HeadToHeadRecord> = BTreeMap::new();

    for m in matches {
        let (Some(mine), Some(theirs)) = (m.place_of(user_id), m.place_of(opponent.id)) else {
            continue;
        };
        overall.record(mine, theirs);
        by_format.entry(m.format).or_default().record(mine, theirs);
    }

    HeadToHead {
        opponent,
        overall,
        by_format,
    }
}

fn bump(counts: &mut HashMap<Uuid, (UserSummary, u32)>, user: &UserSummary) {
    counts
        .entry(user.id)
        .or_insert_with(|| (user.clone(), 0))
        .1 += 1;
}

/// Highest count wins; ties go to the alphabetically first username.
fn top_opponent(counts: HashMap<Uuid, (UserSummary, u32)>) -> Option<OpponentStat> {
    counts
        .into_values()
        .max_by(|(a, a_count), (b, b_count)| {
            a_count
                .cmp(b_count)
                .then_with(|| b.username.cmp(&a.username))
        })
        .map(|(opponent, count)| OpponentStat { opponent, count })
}
