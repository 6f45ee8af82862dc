//! Duplicate translation detection.
//!
//! Three rules run over the translation set, each a single pass over entries
//! sorted by its key:
//!
//! 1. **Exact model duplicates**: `kind = model` entries sharing
//!    `(lang, module, name, record id)`.
//! 2. **Exact view duplicates**: `kind = view` entries with record id 0
//!    sharing `(lang, module, name, source)`. The lowest id survives.
//! 3. **Conflicting duplicates**: remaining `kind = model` entries sharing
//!    `(lang, name, record id)` across modules, excluding the registry's own
//!    meta-models.
//!
//! A row flagged by an earlier rule is never reported again by a later one.
//! When values differ and the tie-break is [`TieBreak::Manual`], nothing is
//! deleted and the rows are reported for an operator decision.

use crate::model::{TranslationEntry, TranslationKind};
use common::TieBreak;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateRule {
    ExactModel,
    ExactView,
    Conflicting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    Delete,
    ManualFixRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateFinding {
    pub entry: TranslationEntry,
    /// Row the entry duplicates
    pub kept_id: i64,
    pub rule: DuplicateRule,
    pub resolution: Resolution,
}

impl DuplicateFinding {
    pub fn message(&self) -> String {
        format!(
            "Double translation {} for ID {} ({:?})",
            self.entry.describe(),
            self.kept_id,
            self.rule
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateReport {
    pub findings: Vec<DuplicateFinding>,
}

impl DuplicateReport {
    pub fn deletions(&self) -> impl Iterator<Item = &DuplicateFinding> {
        self.findings
            .iter()
            .filter(|f| f.resolution == Resolution::Delete)
    }

    pub fn manual(&self) -> impl Iterator<Item = &DuplicateFinding> {
        self.findings
            .iter()
            .filter(|f| f.resolution == Resolution::ManualFixRequired)
    }

    pub fn deletion_ids(&self) -> Vec<i64> {
        self.deletions().map(|f| f.entry.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    tie_break: TieBreak,
    meta_model_prefix: String,
}

type ModelKey<'a> = (&'a str, Option<&'a str>, &'a str, Option<i64>);
type ViewKey<'a> = (&'a str, Option<&'a str>, &'a str, Option<&'a str>);
type ConflictKey<'a> = (&'a str, &'a str, Option<i64>);

fn model_key(e: &TranslationEntry) -> ModelKey<'_> {
    (e.lang.as_str(), e.module.as_deref(), e.name.as_str(), e.record_id)
}

fn view_key(e: &TranslationEntry) -> ViewKey<'_> {
    (e.lang.as_str(), e.module.as_deref(), e.name.as_str(), e.source.as_deref())
}

fn conflict_key(e: &TranslationEntry) -> ConflictKey<'_> {
    (e.lang.as_str(), e.name.as_str(), e.record_id)
}

impl DuplicateDetector {
    pub fn new(tie_break: TieBreak, meta_model_prefix: impl Into<String>) -> Self {
        Self {
            tie_break,
            meta_model_prefix: meta_model_prefix.into(),
        }
    }

    /// Run all rules over `entries`, any kinds mixed.
    pub fn detect(&self, entries: &[TranslationEntry]) -> DuplicateReport {
        let mut findings = Vec::new();
        self.exact_model(entries, &mut findings);
        self.exact_view(entries, &mut findings);
        self.conflicting(entries, &mut findings);

        let mut seen = HashSet::new();
        findings.retain(|f| seen.insert(f.entry.id));

        DuplicateReport { findings }
    }

    fn exact_model(&self, entries: &[TranslationEntry], out: &mut Vec<DuplicateFinding>) {
        let mut sorted: Vec<&TranslationEntry> = entries
            .iter()
            .filter(|e| e.kind == TranslationKind::Model)
            .collect();
        sorted.sort_by(|a, b| model_key(a).cmp(&model_key(b)).then(a.id.cmp(&b.id)));

        for group in sorted.chunk_by(|a, b| model_key(a) == model_key(b)) {
            if group.len() < 2 {
                continue;
            }
            let values_differ = group.iter().any(|e| e.value != group[0].value);
            let resolution = if values_differ && self.tie_break == TieBreak::Manual {
                Resolution::ManualFixRequired
            } else {
                Resolution::Delete
            };
            self.flag_group(group, DuplicateRule::ExactModel, resolution, out);
        }
    }

    fn exact_view(&self, entries: &[TranslationEntry], out: &mut Vec<DuplicateFinding>) {
        let mut sorted: Vec<&TranslationEntry> = entries
            .iter()
            .filter(|e| e.kind == TranslationKind::View && e.record_id.unwrap_or_default() == 0)
            .collect();
        sorted.sort_by(|a, b| view_key(a).cmp(&view_key(b)).then(a.id.cmp(&b.id)));

        for group in sorted.chunk_by(|a, b| view_key(a) == view_key(b)) {
            let Some((kept, rest)) = group.split_first() else {
                continue;
            };
            for entry in rest {
                out.push(DuplicateFinding {
                    entry: (*entry).clone(),
                    kept_id: kept.id,
                    rule: DuplicateRule::ExactView,
                    resolution: Resolution::Delete,
                });
            }
        }
    }

    fn conflicting(&self, entries: &[TranslationEntry], out: &mut Vec<DuplicateFinding>) {
        let flagged: HashSet<i64> = out.iter().map(|f| f.entry.id).collect();
        let mut sorted: Vec<&TranslationEntry> = entries
            .iter()
            .filter(|e| e.kind == TranslationKind::Model)
            .filter(|e| !flagged.contains(&e.id))
            .filter(|e| !e.name.starts_with(&self.meta_model_prefix))
            .collect();
        sorted.sort_by(|a, b| conflict_key(a).cmp(&conflict_key(b)).then(a.id.cmp(&b.id)));

        let resolution = match self.tie_break {
            TieBreak::Manual => Resolution::ManualFixRequired,
            TieBreak::KeepLowestId | TieBreak::KeepHighestId => Resolution::Delete,
        };
        for group in sorted.chunk_by(|a, b| conflict_key(a) == conflict_key(b)) {
            if group.len() > 1 {
                self.flag_group(group, DuplicateRule::Conflicting, resolution, out);
            }
        }
    }

    /// Flag every entry of an id-sorted group except the tie-break winner.
    fn flag_group(
        &self,
        group: &[&TranslationEntry],
        rule: DuplicateRule,
        resolution: Resolution,
        out: &mut Vec<DuplicateFinding>,
    ) {
        let kept = match (self.tie_break, resolution) {
            (TieBreak::KeepHighestId, Resolution::Delete) => group[group.len() - 1],
            _ => group[0],
        };
        for entry in group.iter().filter(|e| e.id != kept.id) {
            out.push(DuplicateFinding {
                entry: (*entry).clone(),
                kept_id: kept.id,
                rule,
                resolution,
            });
        }
    }
}
