use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Context;
use futures_util::future::join_all;
use tracing::warn;

use crate::oracle::{DistanceOracle, RosterProvider};
use crate::types::{
    AssignedCyno, AvailableCyno, Candidate, CharacterId, ClaimedBy, ColorCode, Jumps, SystemId,
    TargetAssignments, TargetRequest,
};

/// How many candidates an unlocked target may claim. A locked target claims
/// at most one.
const CLAIMS_PER_TARGET: usize = 2;

/// The only error that escapes `compute_assignments`. Everything else
/// (oracle failures, no route, unknown locations, empty pools) degrades into
/// the result data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("target system {0} requested more than once")]
    DuplicateTarget(SystemId),
    #[error("target {system} locks character {character} but also excludes it")]
    LockedAndExcluded {
        system: SystemId,
        character: CharacterId,
    },
}

#[derive(Debug, Clone)]
struct Claim {
    system_id: SystemId,
    system_name: String,
    priority: u32,
}

/// Assign candidates to targets in strict priority order.
///
/// Each target claims its closest eligible candidates; a claim removes the
/// candidate from every later target's pool. Locked targets bypass ranking
/// and claim exactly their pinned candidate, if it is still free. The claim
/// map lives only for this pass.
pub async fn compute_assignments<O: DistanceOracle>(
    targets: &[TargetRequest],
    roster: &[Candidate],
    oracle: &O,
) -> Result<BTreeMap<SystemId, TargetAssignments>, ValidationError> {
    let mut out = BTreeMap::new();
    if targets.is_empty() {
        return Ok(out);
    }
    validate(targets)?;

    let mut order: Vec<&TargetRequest> = targets.iter().collect();
    // Stable: equal priorities keep their input order.
    order.sort_by_key(|t| t.priority);

    let mut claims: HashMap<CharacterId, Claim> = HashMap::new();

    for target in order {
        // Claims made by higher-priority targets are final before this
        // target's fan-out starts.
        let pool: Vec<&Candidate> = roster
            .iter()
            .filter(|c| c.eligible())
            .filter(|c| !target.excluded_characters.contains(&c.character_id))
            .filter(|c| !claims.contains_key(&c.character_id))
            .filter(|c| {
                target
                    .locked_character
                    .is_none_or(|locked| c.character_id == locked)
            })
            .collect();

        let mut ranked = rank_by_distance(&pool, target.system_id, oracle).await;
        ranked.sort_by_key(|(_, jumps)| jumps.sort_key());

        let take = if target.locked_character.is_some() {
            1
        } else {
            CLAIMS_PER_TARGET
        };

        let mut available = Vec::new();
        for (candidate, jumps) in ranked.into_iter().take(take) {
            claims.insert(
                candidate.character_id,
                Claim {
                    system_id: target.system_id,
                    system_name: target.system_name.clone(),
                    priority: target.priority,
                },
            );
            available.push(AvailableCyno {
                character_id: candidate.character_id,
                character_name: candidate.character_name.clone(),
                current_system: candidate.system_name.clone(),
                ship_name: candidate.ship_name.clone(),
                jumps,
                color_code: ColorCode::for_jumps(jumps),
                is_locked: target.locked_character == Some(candidate.character_id),
            });
        }

        out.insert(
            target.system_id,
            TargetAssignments {
                system_id: target.system_id,
                priority: target.priority,
                available,
                assigned: Vec::new(),
            },
        );
    }

    // Busy-elsewhere rows, from the finished claim map: every claimed
    // candidate whose claiming target is a different one.
    for target in targets {
        let Some(entry) = out.get_mut(&target.system_id) else {
            continue;
        };
        for candidate in roster {
            let Some(claim) = claims.get(&candidate.character_id) else {
                continue;
            };
            if claim.system_id == target.system_id {
                continue;
            }
            if entry
                .available
                .iter()
                .any(|a| a.character_id == candidate.character_id)
            {
                continue;
            }
            entry.assigned.push(AssignedCyno {
                character_id: candidate.character_id,
                character_name: candidate.character_name.clone(),
                current_system: candidate.system_name.clone(),
                ship_name: candidate.ship_name.clone(),
                jumps: Jumps::Unreachable,
                color_code: ColorCode::Grey,
                assigned_to: ClaimedBy {
                    priority: claim.priority,
                    system_id: claim.system_id,
                    system_name: claim.system_name.clone(),
                },
            });
        }
    }

    Ok(out)
}

/// Fetch the roster from the provider and run one assignment pass over it.
pub async fn run_search<P, O>(
    provider: &P,
    oracle: &O,
    targets: &[TargetRequest],
) -> anyhow::Result<BTreeMap<SystemId, TargetAssignments>>
where
    P: RosterProvider,
    O: DistanceOracle,
{
    let roster = provider.roster().await.context("roster fetch failed")?;
    Ok(compute_assignments(targets, &roster, oracle).await?)
}

fn validate(targets: &[TargetRequest]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for target in targets {
        if !seen.insert(target.system_id) {
            return Err(ValidationError::DuplicateTarget(target.system_id));
        }
        if let Some(locked) = target.locked_character
            && target.excluded_characters.contains(&locked)
        {
            return Err(ValidationError::LockedAndExcluded {
                system: target.system_id,
                character: locked,
            });
        }
    }
    Ok(())
}

/// Query the oracle for every pool candidate concurrently. One failing or
/// routeless query degrades to `Unreachable` for that candidate alone; a
/// candidate without a known location never reaches the oracle. Preserves
/// pool (roster) order, so the later stable sort breaks jump ties by it.
async fn rank_by_distance<'a, O: DistanceOracle>(
    pool: &[&'a Candidate],
    dest: SystemId,
    oracle: &O,
) -> Vec<(&'a Candidate, Jumps)> {
    let queries = pool.iter().map(|candidate| {
        let candidate = *candidate;
        async move {
            let jumps = match candidate.system_id {
                None => Jumps::Unreachable,
                Some(origin) => match oracle.jumps(origin, dest).await {
                    Ok(Some(n)) => Jumps::Reachable(n),
                    Ok(None) => Jumps::Unreachable,
                    Err(e) => {
                        warn!(
                            character = %candidate.character_id,
                            origin = %origin,
                            dest = %dest,
                            err = %e,
                            "distance query failed; treating as unreachable"
                        );
                        Jumps::Unreachable
                    }
                },
            };
            (candidate, jumps)
        }
    });
    join_all(queries).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory oracle over a fixed jump table. Missing pairs have no
    /// route; pairs in `fail` error out. Counts every query.
    struct FakeOracle {
        table: HashMap<(SystemId, SystemId), u32>,
        fail: HashSet<(SystemId, SystemId)>,
        calls: Mutex<usize>,
    }

    impl FakeOracle {
        fn new(entries: &[(u32, u32, u32)]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|&(o, d, j)| ((SystemId(o), SystemId(d)), j))
                    .collect(),
                fail: HashSet::new(),
                calls: Mutex::new(0),
            }
        }

        fn failing(mut self, origin: u32, dest: u32) -> Self {
            self.fail.insert((SystemId(origin), SystemId(dest)));
            self
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl DistanceOracle for FakeOracle {
        async fn jumps(&self, origin: SystemId, dest: SystemId) -> anyhow::Result<Option<u32>> {
            *self.calls.lock().unwrap() += 1;
            if self.fail.contains(&(origin, dest)) {
                anyhow::bail!("route service unavailable");
            }
            Ok(self.table.get(&(origin, dest)).copied())
        }
    }

    fn candidate(id: u64, system: Option<u32>) -> Candidate {
        Candidate {
            character_id: CharacterId(id),
            character_name: format!("Pilot {id}"),
            system_id: system.map(SystemId),
            system_name: system.map_or_else(String::new, |s| format!("System {s}")),
            ship_name: "Venture".to_string(),
            cyno_skill_level: 4,
            is_auth_valid: true,
        }
    }

    fn target(system: u32, priority: u32) -> TargetRequest {
        TargetRequest {
            system_id: SystemId(system),
            system_name: format!("System {system}"),
            priority,
            locked_character: None,
            excluded_characters: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn ranks_by_jumps_and_caps_at_two() {
        // C1 at 3 jumps, C2 at 7, C3 unreachable. Top-2 cap keeps C1+C2.
        let oracle = FakeOracle::new(&[(10, 1, 3), (20, 1, 7)]);
        let roster = vec![
            candidate(1, Some(10)),
            candidate(2, Some(20)),
            candidate(3, Some(30)),
        ];
        let targets = vec![target(1, 1)];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();
        let r = &results[&SystemId(1)];

        assert_eq!(r.available.len(), 2);
        assert_eq!(r.available[0].character_id, CharacterId(1));
        assert_eq!(r.available[0].jumps, Jumps::Reachable(3));
        assert_eq!(r.available[0].color_code, ColorCode::Green);
        assert_eq!(r.available[1].character_id, CharacterId(2));
        assert_eq!(r.available[1].jumps, Jumps::Reachable(7));
        assert!(r.assigned.is_empty());
    }

    #[tokio::test]
    async fn priority_precedence_over_shared_candidate() {
        let oracle = FakeOracle::new(&[(10, 1, 2), (10, 2, 2)]);
        let roster = vec![candidate(1, Some(10))];
        // Priority 2 listed first; sorting must still resolve system 1 first.
        let targets = vec![target(2, 2), target(1, 1)];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();

        let first = &results[&SystemId(1)];
        assert_eq!(first.available.len(), 1);
        assert_eq!(first.available[0].character_id, CharacterId(1));
        assert!(first.assigned.is_empty());

        let second = &results[&SystemId(2)];
        assert!(second.available.is_empty());
        assert_eq!(second.assigned.len(), 1);
        let busy = &second.assigned[0];
        assert_eq!(busy.character_id, CharacterId(1));
        assert_eq!(busy.jumps, Jumps::Unreachable);
        assert_eq!(busy.color_code, ColorCode::Grey);
        assert_eq!(busy.assigned_to.system_id, SystemId(1));
        assert_eq!(busy.assigned_to.priority, 1);
    }

    #[tokio::test]
    async fn lock_restricts_pool_and_blocks_other_targets() {
        let oracle = FakeOracle::new(&[(10, 1, 1), (20, 1, 5), (10, 2, 1), (20, 2, 5)]);
        let roster = vec![candidate(1, Some(10)), candidate(2, Some(20))];

        let mut locked = target(1, 1);
        locked.locked_character = Some(CharacterId(2));
        let targets = vec![locked, target(2, 2)];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();

        // Locked target gets exactly the pinned candidate, even though
        // candidate 1 is closer; the jump count is still reported.
        let first = &results[&SystemId(1)];
        assert_eq!(first.available.len(), 1);
        assert_eq!(first.available[0].character_id, CharacterId(2));
        assert_eq!(first.available[0].jumps, Jumps::Reachable(5));
        assert!(first.available[0].is_locked);

        // Busy rows come from the finished claim map, so the priority-1
        // target also sees candidate 1 claimed by the later target.
        assert_eq!(first.assigned.len(), 1);
        assert_eq!(first.assigned[0].character_id, CharacterId(1));
        assert_eq!(first.assigned[0].assigned_to.system_id, SystemId(2));
        assert_eq!(first.assigned[0].assigned_to.priority, 2);

        // The pinned candidate is out of the pool for everyone else.
        let second = &results[&SystemId(2)];
        assert_eq!(second.available.len(), 1);
        assert_eq!(second.available[0].character_id, CharacterId(1));
        assert!(
            second
                .assigned
                .iter()
                .any(|a| a.character_id == CharacterId(2)
                    && a.assigned_to.system_id == SystemId(1))
        );
    }

    #[tokio::test]
    async fn locked_candidate_claimed_earlier_yields_nothing() {
        let oracle = FakeOracle::new(&[(10, 1, 1), (10, 2, 1)]);
        let roster = vec![candidate(1, Some(10))];

        let mut locked = target(2, 2);
        locked.locked_character = Some(CharacterId(1));
        let targets = vec![target(1, 1), locked];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();

        assert_eq!(results[&SystemId(1)].available.len(), 1);
        let second = &results[&SystemId(2)];
        assert!(second.available.is_empty());
        assert_eq!(second.assigned.len(), 1);
        assert_eq!(second.assigned[0].assigned_to.system_id, SystemId(1));
    }

    #[tokio::test]
    async fn exclusion_is_per_target() {
        let oracle = FakeOracle::new(&[(10, 1, 1), (20, 1, 9), (10, 2, 1)]);
        let roster = vec![candidate(1, Some(10)), candidate(2, Some(20))];

        let mut excluding = target(1, 1);
        excluding.excluded_characters.insert(CharacterId(1));
        let targets = vec![excluding, target(2, 2)];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();

        // Excluded for system 1 even though closest...
        let first = &results[&SystemId(1)];
        assert_eq!(first.available.len(), 1);
        assert_eq!(first.available[0].character_id, CharacterId(2));

        // ...but still claimable by system 2.
        let second = &results[&SystemId(2)];
        assert_eq!(second.available.len(), 1);
        assert_eq!(second.available[0].character_id, CharacterId(1));
    }

    #[tokio::test]
    async fn oracle_failure_degrades_to_unreachable() {
        // Candidate 1's query errors; candidate 2's finds no route;
        // candidate 3 has a long but finite route. Finite sorts first.
        let oracle = FakeOracle::new(&[(30, 1, 42)]).failing(10, 1);
        let roster = vec![
            candidate(1, Some(10)),
            candidate(2, Some(20)),
            candidate(3, Some(30)),
        ];
        let targets = vec![target(1, 1)];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();
        let r = &results[&SystemId(1)];

        assert_eq!(r.available.len(), 2);
        assert_eq!(r.available[0].character_id, CharacterId(3));
        assert_eq!(r.available[0].jumps, Jumps::Reachable(42));
        assert_eq!(r.available[0].color_code, ColorCode::Red);
        // Ties between the two unreachables break by roster order.
        assert_eq!(r.available[1].character_id, CharacterId(1));
        assert_eq!(r.available[1].jumps, Jumps::Unreachable);
    }

    #[tokio::test]
    async fn unknown_location_skips_the_oracle() {
        let oracle = FakeOracle::new(&[(10, 1, 3)]);
        let roster = vec![candidate(1, Some(10)), candidate(2, None)];
        let targets = vec![target(1, 1)];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();
        let r = &results[&SystemId(1)];

        assert_eq!(r.available.len(), 2);
        assert_eq!(r.available[1].character_id, CharacterId(2));
        assert_eq!(r.available[1].jumps, Jumps::Unreachable);
        // Only candidate 1 was worth a query.
        assert_eq!(oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_targets_short_circuit() {
        let oracle = FakeOracle::new(&[(10, 1, 3)]);
        let roster = vec![candidate(1, Some(10))];

        let results = compute_assignments(&[], &roster, &oracle).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_roster_yields_empty_availability() {
        let oracle = FakeOracle::new(&[]);
        let targets = vec![target(1, 1), target(2, 2)];

        let results = compute_assignments(&targets, &[], &oracle).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| r.available.is_empty()));
        assert!(results.values().all(|r| r.assigned.is_empty()));
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn ineligible_candidates_never_enter_the_pool() {
        let oracle = FakeOracle::new(&[(10, 1, 1), (20, 1, 2), (30, 1, 3)]);
        let mut no_skill = candidate(1, Some(10));
        no_skill.cyno_skill_level = 0;
        let mut bad_auth = candidate(2, Some(20));
        bad_auth.is_auth_valid = false;
        let roster = vec![no_skill, bad_auth, candidate(3, Some(30))];
        let targets = vec![target(1, 1)];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();
        let r = &results[&SystemId(1)];
        assert_eq!(r.available.len(), 1);
        assert_eq!(r.available[0].character_id, CharacterId(3));
    }

    #[tokio::test]
    async fn duplicate_priorities_resolve_in_input_order() {
        let oracle = FakeOracle::new(&[(10, 1, 1), (10, 2, 1)]);
        let roster = vec![candidate(1, Some(10))];
        let targets = vec![target(2, 1), target(1, 1)];

        let results = compute_assignments(&targets, &roster, &oracle)
            .await
            .unwrap();

        // System 2 came first in the input, so it wins the tie.
        assert_eq!(results[&SystemId(2)].available.len(), 1);
        assert!(results[&SystemId(1)].available.is_empty());
        assert_eq!(results[&SystemId(1)].assigned.len(), 1);
    }

    #[tokio::test]
    async fn validation_rejects_malformed_targets() {
        let oracle = FakeOracle::new(&[]);
        let roster = vec![candidate(1, Some(10))];

        let dup = vec![target(1, 1), target(1, 2)];
        assert_eq!(
            compute_assignments(&dup, &roster, &oracle).await,
            Err(ValidationError::DuplicateTarget(SystemId(1)))
        );

        let mut bad = target(1, 1);
        bad.locked_character = Some(CharacterId(7));
        bad.excluded_characters.insert(CharacterId(7));
        assert_eq!(
            compute_assignments(&[bad], &roster, &oracle).await,
            Err(ValidationError::LockedAndExcluded {
                system: SystemId(1),
                character: CharacterId(7),
            })
        );
        // Nothing was computed before the failure.
        assert_eq!(oracle.call_count(), 0);
    }

    struct FixedRoster(Vec<Candidate>);

    impl RosterProvider for FixedRoster {
        async fn roster(&self) -> anyhow::Result<Vec<Candidate>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn run_search_feeds_provider_roster_through() {
        let oracle = FakeOracle::new(&[(10, 1, 4)]);
        let provider = FixedRoster(vec![candidate(1, Some(10))]);
        let targets = vec![target(1, 1)];

        let results = run_search(&provider, &oracle, &targets).await.unwrap();
        assert_eq!(results[&SystemId(1)].available.len(), 1);
        assert_eq!(
            results[&SystemId(1)].available[0].jumps,
            Jumps::Reachable(4)
        );
    }
}
