use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use solana_sdk::pubkey::Pubkey;

use crate::config::DiscoveryConfig;
use crate::table::AddressLookupTable;

/// Hard cap on the number of distinct accounts per query, fixed by the
/// 64-bit coverage mask.
pub const MAX_QUERY_ACCOUNTS: usize = 64;

/// Cap on tables returned by a cover; a table reference costs 32 bytes plus
/// an index, so more than one table per two accounts can never pay off.
pub const MAX_COVER_TABLES: usize = MAX_QUERY_ACCOUNTS / 2;

type PartitionTables = Arc<Vec<Arc<AddressLookupTable>>>;

/// A table with its score against the current query's account set. Ordered
/// by score descending; ties keep their encounter order under stable sorts.
#[derive(Debug, Clone)]
struct ScoredTable {
    score: u32,
    table: Arc<AddressLookupTable>,
}

impl PartialEq for ScoredTable {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for ScoredTable {}

impl PartialOrd for ScoredTable {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredTable {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.score.cmp(&self.score)
    }
}

/// Sharded in-memory index of lookup tables.
///
/// Partitions are replaced wholesale by the fetcher; `all_tables` is a flat
/// view over every populated partition, sorted by unique-account count
/// descending, republished after refreshes. Readers clone the published
/// `Arc`, so reads between publishes observe the same array identity.
#[derive(Debug)]
pub struct TableIndex {
    partitions: Vec<RwLock<Option<PartitionTables>>>,
    all_tables: RwLock<PartitionTables>,
    num_partitions_per_query: usize,
    top_tables_per_partition: usize,
    min_score: u32,
}

impl TableIndex {
    pub fn new(config: &DiscoveryConfig) -> Self {
        let partitions = (0..config.num_partitions).map(|_| RwLock::new(None)).collect();
        Self {
            partitions,
            all_tables: RwLock::new(Arc::new(Vec::new())),
            num_partitions_per_query: config.num_partitions_per_query.max(1),
            top_tables_per_partition: config.top_tables_per_partition.max(1),
            min_score: config.min_score,
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Atomically replaces one partition's tables.
    pub fn store_partition(&self, partition: usize, tables: Vec<Arc<AddressLookupTable>>) {
        let mut slot = self.partitions[partition]
            .write()
            .expect("partition lock poisoned");
        *slot = Some(Arc::new(tables));
    }

    pub fn partition_tables(&self, partition: usize) -> Option<PartitionTables> {
        self.partitions[partition]
            .read()
            .expect("partition lock poisoned")
            .clone()
    }

    /// Number of partitions that have been populated at least once.
    pub fn populated_count(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.read().expect("partition lock poisoned").is_some())
            .count()
    }

    /// Republishes the flat `all_tables` view from the current partitions,
    /// sorted by unique-account count descending.
    pub fn join_partitions(&self) {
        let mut all: Vec<Arc<AddressLookupTable>> = self
            .partitions
            .iter()
            .filter_map(|p| p.read().expect("partition lock poisoned").clone())
            .flat_map(|tables| tables.iter().cloned().collect::<Vec<_>>())
            .collect();
        all.sort_by(|a, b| b.num_unique_accounts().cmp(&a.num_unique_accounts()));
        *self.all_tables.write().expect("all_tables lock poisoned") = Arc::new(all);
    }

    /// The published flat view. Stable identity between publishes.
    pub fn all_tables(&self) -> PartitionTables {
        self.all_tables
            .read()
            .expect("all_tables lock poisoned")
            .clone()
    }

    /// Finds a near-minimal set of tables covering the queried accounts:
    /// every account except at most one is contained in some returned table,
    /// and every returned table covers at least two previously-uncovered
    /// accounts. Returns `None` when no table clears that bar.
    ///
    /// Accounts beyond [`MAX_QUERY_ACCOUNTS`] are ignored; callers build
    /// query sets at or under the cap.
    pub fn find_optimal_tables(
        &self,
        distinct_accounts: &HashSet<Pubkey>,
    ) -> Option<Vec<Arc<AddressLookupTable>>> {
        let all = self.all_tables();
        if all.is_empty() || distinct_accounts.is_empty() {
            return None;
        }
        let accounts: Vec<Pubkey> = distinct_accounts
            .iter()
            .copied()
            .take(MAX_QUERY_ACCOUNTS)
            .collect();

        let window = (all.len() / self.num_partitions_per_query).max(1);
        let starts: Vec<usize> = (0..all.len()).step_by(window).collect();
        let windows: Vec<Vec<ScoredTable>> = starts
            .par_iter()
            .map(|&start| {
                rank_tables(
                    &all[start..(start + window).min(all.len())],
                    &accounts,
                    self.min_score,
                    self.top_tables_per_partition,
                )
            })
            .collect();

        let mut merged: Vec<ScoredTable> = windows.into_iter().flatten().collect();
        merged.sort();

        cover_accounts(&merged, &accounts)
    }

    /// Scans every partition for the table with the given address.
    pub fn scan_for_table(&self, address: &Pubkey) -> Option<Arc<AddressLookupTable>> {
        (0..self.partitions.len())
            .into_par_iter()
            .find_map_any(|partition| {
                let tables = self.partition_tables(partition)?;
                tables.iter().find(|t| t.address() == address).cloned()
            })
    }
}

fn score_table(table: &AddressLookupTable, accounts: &[Pubkey]) -> u32 {
    accounts.iter().filter(|a| table.contains(a)).count() as u32
}

/// Scores one window of tables, keeping the top `limit` by score.
///
/// Fill phase first; once the buffer is full it is kept sorted descending
/// and new entries shift lower scores down, with the buffered minimum
/// giving an O(1) reject for the common case.
fn rank_tables(
    tables: &[Arc<AddressLookupTable>],
    accounts: &[Pubkey],
    min_score: u32,
    limit: usize,
) -> Vec<ScoredTable> {
    let mut ranked: Vec<ScoredTable> = Vec::with_capacity(limit);
    let mut buffered_min = u32::MAX;

    let mut iter = tables.iter();
    for table in iter.by_ref() {
        let score = score_table(table, accounts);
        if score > min_score {
            buffered_min = buffered_min.min(score);
            ranked.push(ScoredTable {
                score,
                table: table.clone(),
            });
            if ranked.len() == limit {
                break;
            }
        }
    }
    if ranked.len() < limit {
        return ranked;
    }

    ranked.sort();
    for table in iter {
        let score = score_table(table, accounts);
        if score > buffered_min {
            let mut i = limit - 1;
            while i > 0 && ranked[i - 1].score < score {
                ranked[i] = ranked[i - 1].clone();
                i -= 1;
            }
            ranked[i] = ScoredTable {
                score,
                table: table.clone(),
            };
            buffered_min = ranked[limit - 1].score;
        }
    }
    ranked
}

/// Greedy cover over the score-ordered candidates.
///
/// A 64-bit mask tracks the accounts still uncovered. Per candidate, the
/// first match is recorded but its bit is left set until the table is
/// accepted; a candidate whose only contribution is that single account is
/// skipped and the running total rolled back. Covering all but one account
/// ends the walk early: one inline account is cheaper than another table
/// reference.
fn cover_accounts(
    candidates: &[ScoredTable],
    accounts: &[Pubkey],
) -> Option<Vec<Arc<AddressLookupTable>>> {
    let num_accounts = accounts.len();
    let break_out = num_accounts - 1;

    let mut selected: Vec<Arc<AddressLookupTable>> = Vec::new();
    let mut mask: u64 = u64::MAX >> (64 - num_accounts as u32);
    let mut total_found: usize = 0;
    let mut from = 0usize;
    let mut to = 64 - mask.leading_zeros() as usize;

    for candidate in candidates.iter().take(MAX_COVER_TABLES) {
        let table = &candidate.table;
        let mut num_removed = 0u32;
        let mut first_bit = 0u64;
        for a in from..to {
            let bit = 1u64 << a;
            if mask & bit == bit && table.contains(&accounts[a]) {
                total_found += 1;
                if total_found == break_out {
                    selected.push(table.clone());
                    return Some(selected);
                }
                num_removed += 1;
                if num_removed > 1 {
                    mask ^= bit;
                } else {
                    first_bit = bit;
                }
            }
        }

        if num_removed > 1 {
            selected.push(table.clone());
            mask ^= first_bit;
            from = mask.trailing_zeros() as usize;
            to = 64usize.saturating_sub(mask.leading_zeros() as usize);
        } else if num_removed == 1 {
            // a table referencing one account costs more than it saves
            total_found -= 1;
        }
    }
    if selected.is_empty() {
        None
    } else {
        Some(selected)
    }
}
