//! # FMT Groups
//!
//! An FMT group is the subset of a MODCOD table usable on a carriers group.
//! It is parsed from a textual spec (`"1-3;5"` style) and kept ordered by
//! ascending required Es/N0 so that robustness lookups are a single scan.

use crate::error::DvbError;
use crate::fmt::definition::FmtDefinitionTable;
use crate::types::FmtId;
use std::fmt;
use std::sync::Arc;

/// A set of MODCOD ids qualified for one carriers group.
#[derive(Debug, Clone)]
pub struct FmtGroup {
    id: u32,
    /// (fmt id, required Es/N0), sorted by ascending Es/N0.
    fmt_ids: Vec<(FmtId, f64)>,
    modcod_def: Arc<FmtDefinitionTable>,
}

impl FmtGroup {
    /// Parse a group spec. The grammar is `range(';' range)*` where
    /// `range := N | N-M`. Every id must exist in `modcod_def`.
    pub fn new(
        id: u32,
        ids: &str,
        modcod_def: Arc<FmtDefinitionTable>,
    ) -> Result<Self, DvbError> {
        let mut group = FmtGroup {
            id,
            fmt_ids: Vec::new(),
            modcod_def,
        };
        group.parse(ids)?;
        Ok(group)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn parse(&mut self, ids: &str) -> Result<(), DvbError> {
        for token in ids.split(';') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let mut bounds = token.splitn(2, '-');
            let first = bounds
                .next()
                .and_then(|v| v.trim().parse::<FmtId>().ok())
                .ok_or_else(|| {
                    DvbError::ConfigInvalid(format!("invalid FMT group token: {token}"))
                })?;
            let last = match bounds.next() {
                Some(v) => v.trim().parse::<FmtId>().map_err(|_| {
                    DvbError::ConfigInvalid(format!("invalid FMT group token: {token}"))
                })?,
                None => first,
            };
            let (lo, hi) = if first <= last {
                (first, last)
            } else {
                (last, first)
            };
            for fmt_id in lo..=hi {
                self.insert(fmt_id)?;
            }
        }
        if self.fmt_ids.is_empty() {
            return Err(DvbError::ConfigInvalid(format!(
                "empty FMT group spec: {ids}"
            )));
        }
        self.fmt_ids
            .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    fn insert(&mut self, fmt_id: FmtId) -> Result<(), DvbError> {
        if self.fmt_ids.iter().any(|(id, _)| *id == fmt_id) {
            return Ok(());
        }
        let es_n0 = self.modcod_def.required_es_n0(fmt_id)?;
        self.fmt_ids.push((fmt_id, es_n0));
        Ok(())
    }

    /// Ids ordered by ascending required Es/N0 (most robust first).
    pub fn fmt_ids(&self) -> Vec<FmtId> {
        self.fmt_ids.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.fmt_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fmt_ids.is_empty()
    }

    pub fn contains(&self, fmt_id: FmtId) -> bool {
        self.fmt_ids.iter().any(|(id, _)| *id == fmt_id)
    }

    /// The least robust id of the group.
    pub fn max_fmt_id(&self) -> FmtId {
        // The group is never empty after a successful parse.
        self.fmt_ids.last().map(|(id, _)| *id).unwrap_or(0)
    }

    /// The most robust id of the group.
    pub fn min_fmt_id(&self) -> FmtId {
        self.fmt_ids.first().map(|(id, _)| *id).unwrap_or(0)
    }

    /// Return the id of the group whose Es/N0 requirement is the largest one
    /// not exceeding the requirement of `fmt_id`. Falls back to the most
    /// robust id of the group when every member is more demanding.
    pub fn get_nearest(&self, fmt_id: FmtId) -> Result<FmtId, DvbError> {
        let desired = self.modcod_def.required_es_n0(fmt_id)?;
        for (id, es_n0) in self.fmt_ids.iter().rev() {
            if *es_n0 <= desired {
                return Ok(*id);
            }
        }
        Ok(self.min_fmt_id())
    }

    pub fn modcod_definitions(&self) -> &Arc<FmtDefinitionTable> {
        &self.modcod_def
    }
}

impl fmt::Display for FmtGroup {
    /// Format the group back to its textual grammar. Consecutive numeric ids
    /// are compressed to `N-M` ranges; parsing the output yields the same
    /// id set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<FmtId> = self.fmt_ids();
        ids.sort_unstable();
        let mut first = true;
        let mut i = 0;
        while i < ids.len() {
            let start = ids[i];
            let mut end = start;
            while i + 1 < ids.len() && ids[i + 1] == end + 1 {
                end = ids[i + 1];
                i += 1;
            }
            if !first {
                write!(f, ";")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
            first = false;
            i += 1;
        }
        Ok(())
    }
}
