// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link/network/transport addressing with partial-information merging.

use crate::error::MergeConflict;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// (mac, ip, port) triple. `None` means "not observed yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetInfo {
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub port: Option<String>,
}

/// Destination addresses keyed by IP.
pub type NetInfoMap = BTreeMap<String, NetInfo>;

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl NetInfo {
    /// Build from raw decoded strings; empty strings are treated as unknown.
    pub fn new(mac: &str, ip: &str, port: &str) -> Self {
        Self {
            mac: non_empty(mac),
            ip: non_empty(ip),
            port: non_empty(port),
        }
    }

    /// Locator-derived info (no link layer).
    pub fn locator(ip: &str, port: &str) -> Self {
        Self::new("", ip, port)
    }

    /// Map key for destination tables.
    pub fn key(&self) -> String {
        self.ip.clone().unwrap_or_default()
    }

    /// Fill unknown fields from `update`, then check that every field
    /// `update` knows agrees with ours.
    pub fn merge(&mut self, update: &NetInfo) -> Result<(), MergeConflict> {
        fill(&mut self.mac, &update.mac);
        fill(&mut self.ip, &update.ip);
        fill(&mut self.port, &update.port);

        if disagrees(&self.mac, &update.mac)
            || disagrees(&self.ip, &update.ip)
            || disagrees(&self.port, &update.port)
        {
            return Err(MergeConflict::NetInfo {
                ip: self.key(),
                existing: self.clone(),
                update: update.clone(),
            });
        }
        Ok(())
    }
}

fn fill(existing: &mut Option<String>, update: &Option<String>) {
    if existing.is_none() {
        existing.clone_from(update);
    }
}

fn disagrees(existing: &Option<String>, update: &Option<String>) -> bool {
    matches!((existing, update), (Some(e), Some(u)) if e != u)
}

/// Insert `info` under its IP, or merge into the entry already there.
pub fn create_or_merge(map: &mut NetInfoMap, info: &NetInfo) -> Result<(), MergeConflict> {
    match map.get_mut(&info.key()) {
        Some(existing) => existing.merge(info),
        None => {
            map.insert(info.key(), info.clone());
            Ok(())
        }
    }
}

impl fmt::Display for NetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "( {}, {}, {} )",
            self.mac.as_deref().unwrap_or(""),
            self.ip.as_deref().unwrap_or(""),
            self.port.as_deref().unwrap_or("")
        )
    }
}

/// Render a destination table as `[ (..), (..) ]`.
pub struct DisplayMap<'a>(pub &'a NetInfoMap);

impl fmt::Display for DisplayMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[ ")?;
        for (i, info) in self.0.values().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", info)?;
        }
        f.write_str(" ]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_fills_unknown_fields() {
        let mut existing = NetInfo::locator("10.0.0.1", "7411");
        existing
            .merge(&NetInfo::new("01:00:5e:00:00:01", "10.0.0.1", ""))
            .unwrap();
        assert_eq!(existing.mac.as_deref(), Some("01:00:5e:00:00:01"));
        assert_eq!(existing.port.as_deref(), Some("7411"));
    }

    #[test]
    fn test_merge_same_twice_never_conflicts() {
        let info = NetInfo::new("aa:bb:cc:dd:ee:ff", "10.0.0.1", "7411");
        let mut existing = info.clone();
        existing.merge(&info).unwrap();
        existing.merge(&info).unwrap();
        assert_eq!(existing, info);
    }

    #[test]
    fn test_merge_conflict_keeps_existing() {
        let mut existing = NetInfo::locator("10.0.0.1", "7411");
        let err = existing
            .merge(&NetInfo::locator("10.0.0.1", "7413"))
            .unwrap_err();
        assert!(matches!(err, MergeConflict::NetInfo { .. }));
        assert_eq!(existing.port.as_deref(), Some("7411"));
    }

    #[test]
    fn test_create_or_merge_keys_by_ip() {
        let mut map = NetInfoMap::new();
        create_or_merge(&mut map, &NetInfo::locator("10.0.0.1", "7411")).unwrap();
        create_or_merge(&mut map, &NetInfo::locator("239.255.0.1", "7400")).unwrap();
        create_or_merge(&mut map, &NetInfo::new("00:11:22:33:44:55", "10.0.0.1", "")).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map["10.0.0.1"].mac.as_deref(),
            Some("00:11:22:33:44:55")
        );
        assert_eq!(
            DisplayMap(&map).to_string(),
            "[ ( 00:11:22:33:44:55, 10.0.0.1, 7411 ), ( , 239.255.0.1, 7400 ) ]"
        );
    }
}
