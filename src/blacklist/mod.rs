// Tiered suppression registry: position, symbol+direction, symbol, global
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::models::Direction;
use crate::notify::Notifier;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlacklistEntry {
    pub till: DateTime<Utc>,
    pub reason: String,
}

/// Which tier an active block came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlacklistTier {
    Global,
    Symbol(String),
    SymbolDirection(String, Direction),
    Position(i64),
}

impl fmt::Display for BlacklistTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlacklistTier::Global => write!(f, "global"),
            BlacklistTier::Symbol(symbol) => write!(f, "symbol {}", symbol),
            BlacklistTier::SymbolDirection(symbol, direction) => {
                write!(f, "{} {}", symbol, direction)
            }
            BlacklistTier::Position(id) => write!(f, "position #{}", id),
        }
    }
}

/// An active block found by [`Blacklist::check_grid`]
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub tier: BlacklistTier,
    pub till: DateTime<Utc>,
    pub reason: String,
}

/// Serializable copy of every tier, for hydrating a store at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlacklistSnapshot {
    pub global: Option<BlacklistEntry>,
    pub by_symbol: BTreeMap<String, BlacklistEntry>,
    pub by_symbol_direction: BTreeMap<String, BlacklistEntry>,
    pub by_position: BTreeMap<i64, BlacklistEntry>,
}

#[derive(Debug, Default)]
struct Tiers {
    global: Option<BlacklistEntry>,
    by_symbol: HashMap<String, BlacklistEntry>,
    by_symbol_direction: HashMap<String, BlacklistEntry>,
    by_position: HashMap<i64, BlacklistEntry>,
}

pub fn symbol_direction_key(symbol: &str, direction: Direction) -> String {
    format!("{}:{}", symbol, direction)
}

/// `now + duration`, saturating at the latest representable instant
fn expiry(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(duration).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Insert or extend an entry. The stored `till` only ever moves forward; the
/// reason is always replaced by the latest one.
fn extend_entry(slot: &mut Option<BlacklistEntry>, till: DateTime<Utc>, reason: &str) -> DateTime<Utc> {
    match slot {
        Some(entry) => {
            entry.till = entry.till.max(till);
            entry.reason = reason.to_string();
            entry.till
        }
        None => {
            *slot = Some(BlacklistEntry {
                till,
                reason: reason.to_string(),
            });
            till
        }
    }
}

fn extend_keyed<K: Eq + Hash>(
    map: &mut HashMap<K, BlacklistEntry>,
    key: K,
    till: DateTime<Utc>,
    reason: &str,
) -> DateTime<Utc> {
    let mut slot = map.remove(&key);
    let result = extend_entry(&mut slot, till, reason);
    if let Some(entry) = slot {
        map.insert(key, entry);
    }
    result
}

/// Lookup with lazy eviction: an expired entry is deleted and reported as absent
fn active_keyed<K: Eq + Hash>(
    map: &mut HashMap<K, BlacklistEntry>,
    key: &K,
    now: DateTime<Utc>,
) -> Option<BlacklistEntry> {
    match map.get(key) {
        Some(entry) if now < entry.till => Some(entry.clone()),
        Some(_) => {
            map.remove(key);
            None
        }
        None => None,
    }
}

fn active_global(slot: &mut Option<BlacklistEntry>, now: DateTime<Utc>) -> Option<BlacklistEntry> {
    match slot {
        Some(entry) if now < entry.till => Some(entry.clone()),
        Some(_) => {
            *slot = None;
            None
        }
        None => None,
    }
}

/// Thread-safe blacklist shared between the tick and ad-hoc lookups
pub struct Blacklist {
    tiers: Mutex<Tiers>,
    notifier: Arc<dyn Notifier>,
}

impl Blacklist {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            tiers: Mutex::new(Tiers::default()),
            notifier,
        }
    }

    /// Rebuild a store from a snapshot, dropping entries that expired meanwhile
    pub fn from_snapshot(snapshot: BlacklistSnapshot, notifier: Arc<dyn Notifier>, now: DateTime<Utc>) -> Self {
        let alive = |entry: &BlacklistEntry| now < entry.till;
        let tiers = Tiers {
            global: snapshot.global.filter(alive),
            by_symbol: snapshot.by_symbol.into_iter().filter(|(_, e)| alive(e)).collect(),
            by_symbol_direction: snapshot
                .by_symbol_direction
                .into_iter()
                .filter(|(_, e)| alive(e))
                .collect(),
            by_position: snapshot.by_position.into_iter().filter(|(_, e)| alive(e)).collect(),
        };

        tracing::info!(
            "Restored blacklist: {} symbols, {} symbol+directions, {} positions, global={}",
            tiers.by_symbol.len(),
            tiers.by_symbol_direction.len(),
            tiers.by_position.len(),
            tiers.global.is_some()
        );

        Self {
            tiers: Mutex::new(tiers),
            notifier,
        }
    }

    fn tiers(&self) -> std::sync::MutexGuard<'_, Tiers> {
        self.tiers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn audit(&self, scope: &str, till: DateTime<Utc>, reason: &str) {
        self.notifier.action(&format!(
            "Blacklisted {} until {}: {}",
            scope,
            till.format("%Y-%m-%d %H:%M:%S"),
            reason
        ));
    }

    // ------------------------------------------------------------------
    // Additions
    // ------------------------------------------------------------------

    pub fn add_global(&self, duration: Duration, reason: &str) -> DateTime<Utc> {
        self.add_global_at(duration, reason, Utc::now())
    }

    pub fn add_global_at(&self, duration: Duration, reason: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let till = {
            let mut tiers = self.tiers();
            extend_entry(&mut tiers.global, expiry(now, duration), reason)
        };
        self.audit("all trading", till, reason);
        till
    }

    pub fn add_by_position(&self, position_id: i64, duration: Duration, reason: &str) -> DateTime<Utc> {
        self.add_by_position_at(position_id, duration, reason, Utc::now())
    }

    pub fn add_by_position_at(
        &self,
        position_id: i64,
        duration: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let till = {
            let mut tiers = self.tiers();
            extend_keyed(&mut tiers.by_position, position_id, expiry(now, duration), reason)
        };
        self.audit(&format!("position #{}", position_id), till, reason);
        till
    }

    pub fn add_by_symbol_direction(
        &self,
        symbol: &str,
        direction: Direction,
        duration: Duration,
        reason: &str,
    ) -> DateTime<Utc> {
        self.add_by_symbol_direction_at(symbol, direction, duration, reason, Utc::now())
    }

    pub fn add_by_symbol_direction_at(
        &self,
        symbol: &str,
        direction: Direction,
        duration: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let key = symbol_direction_key(symbol, direction);
        let till = {
            let mut tiers = self.tiers();
            extend_keyed(&mut tiers.by_symbol_direction, key, expiry(now, duration), reason)
        };
        self.audit(&format!("{} {}", symbol, direction), till, reason);
        till
    }

    pub fn add_by_symbol(&self, symbol: &str, duration: Duration, reason: &str) -> DateTime<Utc> {
        self.add_by_symbol_at(symbol, duration, reason, Utc::now())
    }

    pub fn add_by_symbol_at(
        &self,
        symbol: &str,
        duration: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let till = {
            let mut tiers = self.tiers();
            extend_keyed(&mut tiers.by_symbol, symbol.to_string(), expiry(now, duration), reason)
        };
        self.audit(&format!("symbol {}", symbol), till, reason);
        till
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_blocked_global(&self) -> (bool, Option<DateTime<Utc>>) {
        self.is_blocked_global_at(Utc::now())
    }

    pub fn is_blocked_global_at(&self, now: DateTime<Utc>) -> (bool, Option<DateTime<Utc>>) {
        let mut tiers = self.tiers();
        blocked(active_global(&mut tiers.global, now))
    }

    pub fn is_blocked_by_position(&self, position_id: i64) -> (bool, Option<DateTime<Utc>>) {
        self.is_blocked_by_position_at(position_id, Utc::now())
    }

    pub fn is_blocked_by_position_at(&self, position_id: i64, now: DateTime<Utc>) -> (bool, Option<DateTime<Utc>>) {
        let mut tiers = self.tiers();
        blocked(active_keyed(&mut tiers.by_position, &position_id, now))
    }

    pub fn is_blocked_by_symbol_direction(&self, symbol: &str, direction: Direction) -> (bool, Option<DateTime<Utc>>) {
        self.is_blocked_by_symbol_direction_at(symbol, direction, Utc::now())
    }

    pub fn is_blocked_by_symbol_direction_at(
        &self,
        symbol: &str,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> (bool, Option<DateTime<Utc>>) {
        let key = symbol_direction_key(symbol, direction);
        let mut tiers = self.tiers();
        blocked(active_keyed(&mut tiers.by_symbol_direction, &key, now))
    }

    pub fn is_blocked_by_symbol(&self, symbol: &str) -> (bool, Option<DateTime<Utc>>) {
        self.is_blocked_by_symbol_at(symbol, Utc::now())
    }

    pub fn is_blocked_by_symbol_at(&self, symbol: &str, now: DateTime<Utc>) -> (bool, Option<DateTime<Utc>>) {
        let mut tiers = self.tiers();
        blocked(active_keyed(&mut tiers.by_symbol, &symbol.to_string(), now))
    }

    /// First active block covering a grid, checked from the widest tier down
    pub fn check_grid(
        &self,
        position_id: i64,
        symbol: &str,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> Option<Block> {
        let mut tiers = self.tiers();

        if let Some(entry) = active_global(&mut tiers.global, now) {
            return Some(block(BlacklistTier::Global, entry));
        }
        if let Some(entry) = active_keyed(&mut tiers.by_symbol, &symbol.to_string(), now) {
            return Some(block(BlacklistTier::Symbol(symbol.to_string()), entry));
        }
        let key = symbol_direction_key(symbol, direction);
        if let Some(entry) = active_keyed(&mut tiers.by_symbol_direction, &key, now) {
            return Some(block(
                BlacklistTier::SymbolDirection(symbol.to_string(), direction),
                entry,
            ));
        }
        if let Some(entry) = active_keyed(&mut tiers.by_position, &position_id, now) {
            return Some(block(BlacklistTier::Position(position_id), entry));
        }
        None
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut tiers = self.tiers();
        let before = tiers.by_position.len()
            + tiers.by_symbol.len()
            + tiers.by_symbol_direction.len()
            + usize::from(tiers.global.is_some());

        tiers.by_position.retain(|_, e| now < e.till);
        tiers.by_symbol.retain(|_, e| now < e.till);
        tiers.by_symbol_direction.retain(|_, e| now < e.till);
        active_global(&mut tiers.global, now);

        let after = tiers.by_position.len()
            + tiers.by_symbol.len()
            + tiers.by_symbol_direction.len()
            + usize::from(tiers.global.is_some());
        before - after
    }

    /// Number of stored entries across all tiers, expired ones included
    pub fn len(&self) -> usize {
        let tiers = self.tiers();
        tiers.by_position.len()
            + tiers.by_symbol.len()
            + tiers.by_symbol_direction.len()
            + usize::from(tiers.global.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BlacklistSnapshot {
        let tiers = self.tiers();
        BlacklistSnapshot {
            global: tiers.global.clone(),
            by_symbol: tiers.by_symbol.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            by_symbol_direction: tiers
                .by_symbol_direction
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            by_position: tiers.by_position.iter().map(|(k, v)| (*k, v.clone())).collect(),
        }
    }
}

fn blocked(entry: Option<BlacklistEntry>) -> (bool, Option<DateTime<Utc>>) {
    match entry {
        Some(entry) => (true, Some(entry.till)),
        None => (false, None),
    }
}

fn block(tier: BlacklistTier, entry: BlacklistEntry) -> Block {
    Block {
        tier,
        till: entry.till,
        reason: entry.reason,
    }
}
