//! Operator reports and batch maintenance.
//!
//! The check report clusters persisted fingerprints through the band
//! index, the compare report clusters AI keyword sets, and the rebuild
//! and audit operations keep stored rows honest. Batch work is
//! best-effort per item: one bad row logs and counts, never aborts.

use std::collections::HashMap;

use echocave_core::{band_keys, candidate_pairs, phash, sanitize, similarity, simhash, UnionFind};
use tracing::warn;

use crate::ai::{jaccard, keyword_set};
use crate::error::Result;
use crate::model::{Element, HashKind, HashRecord, MetaRecord, SubmissionStatus};
use crate::similarity::is_image_file;
use crate::store::{BlobStore, HashStore, MetaStore, SubmissionStore};

/// Similarity clusters among all persisted fingerprints.
pub async fn check_report(
    hashes: &dyn HashStore,
    text_threshold: f64,
    image_threshold: f64,
) -> Result<String> {
    let records = hashes.all().await?;
    Ok(render_check(&records, text_threshold, image_threshold))
}

/// Cluster fingerprint records and render the report.
pub fn render_check(records: &[HashRecord], text_threshold: f64, image_threshold: f64) -> String {
    let indexed: Vec<(u64, &HashRecord)> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (index as u64, record))
        .collect();
    let pairs = candidate_pairs(&indexed, |(index, record)| {
        (*index, band_keys(record.kind.as_str(), &record.hash))
    });

    // Confirmed edges between distinct cave ids, best similarity per pair.
    let mut edges: HashMap<HashKind, HashMap<(u32, u32), f64>> = HashMap::new();
    for (a, b) in pairs {
        let left = &records[a as usize];
        let right = &records[b as usize];
        if left.cave_id == right.cave_id || left.kind != right.kind {
            continue;
        }
        let threshold = match left.kind {
            HashKind::Text => text_threshold,
            HashKind::Image => image_threshold,
        };
        let pct = similarity(&left.hash, &right.hash);
        if pct < threshold {
            continue;
        }
        let key = (
            left.cave_id.min(right.cave_id),
            left.cave_id.max(right.cave_id),
        );
        let entry = edges.entry(left.kind).or_default().entry(key).or_insert(pct);
        if pct > *entry {
            *entry = pct;
        }
    }

    let mut sections = Vec::new();
    let mut total = 0usize;
    for (kind, label) in [(HashKind::Text, "文本"), (HashKind::Image, "图片")] {
        let Some(kind_edges) = edges.get(&kind) else {
            continue;
        };
        let clusters = cluster_edges(kind_edges);
        if clusters.is_empty() {
            continue;
        }
        total += clusters.len();
        let mut lines = vec![format!("{label}相似 {} 组:", clusters.len())];
        for (members, pair_pcts) in clusters {
            let ids: Vec<String> = members.iter().map(|id| id.to_string()).collect();
            let pcts: Vec<String> = pair_pcts.iter().map(|p| format!("{p:.2}%")).collect();
            lines.push(format!("  ({}) {}", ids.join(", "), pcts.join("/")));
        }
        sections.push(lines.join("\n"));
    }

    if total == 0 {
        return "回声洞查重报告\n未发现相似条目".to_string();
    }
    format!(
        "回声洞查重报告\n{}\n共 {total} 组",
        sections.join("\n")
    )
}

/// Keyword-overlap clusters among AI meta records.
pub fn render_compare(metas: &[MetaRecord], jaccard_threshold: f64) -> String {
    let token_sets: Vec<_> = metas.iter().map(keyword_set).collect();
    let indexed: Vec<u64> = (0..metas.len() as u64).collect();
    let pairs = candidate_pairs(&indexed, |index| {
        (*index, token_sets[*index as usize].iter().cloned().collect())
    });

    let mut edges: HashMap<(u32, u32), f64> = HashMap::new();
    for (a, b) in pairs {
        let left = &metas[a as usize];
        let right = &metas[b as usize];
        if left.cave_id == right.cave_id {
            continue;
        }
        let pct = jaccard(&token_sets[a as usize], &token_sets[b as usize]);
        if pct < jaccard_threshold {
            continue;
        }
        let key = (
            left.cave_id.min(right.cave_id),
            left.cave_id.max(right.cave_id),
        );
        let entry = edges.entry(key).or_insert(pct);
        if pct > *entry {
            *entry = pct;
        }
    }

    let clusters = cluster_edges(&edges);
    if clusters.is_empty() {
        return "回声洞关键词对比\n未发现重叠条目".to_string();
    }
    let mut lines = vec![format!(
        "回声洞关键词对比\n关键词重叠 {} 组:",
        clusters.len()
    )];
    for (members, pair_pcts) in &clusters {
        let ids: Vec<String> = members.iter().map(|id| id.to_string()).collect();
        let pcts: Vec<String> = pair_pcts.iter().map(|p| format!("{p:.2}%")).collect();
        lines.push(format!("  ({}) {}", ids.join(", "), pcts.join("/")));
    }
    lines.push(format!("共 {} 组", clusters.len()));
    lines.join("\n")
}

/// Union confirmed edges into clusters; each cluster carries its
/// contributing pair similarities sorted descending.
fn cluster_edges(edges: &HashMap<(u32, u32), f64>) -> Vec<(Vec<u32>, Vec<f64>)> {
    let mut uf = UnionFind::new();
    let mut ids = Vec::new();
    for &(a, b) in edges.keys() {
        uf.union(u64::from(a), u64::from(b));
        ids.push(u64::from(a));
        ids.push(u64::from(b));
    }
    uf.clusters(&ids)
        .into_iter()
        .map(|members| {
            let members: Vec<u32> = members.into_iter().map(|id| id as u32).collect();
            let mut pcts: Vec<f64> = edges
                .iter()
                .filter(|((a, b), _)| members.contains(a) && members.contains(b))
                .map(|(_, &pct)| pct)
                .collect();
            pcts.sort_by(|a, b| b.total_cmp(a));
            (members, pcts)
        })
        .collect()
}

/// Outcome counters for a batch rebuild.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    pub rebuilt: usize,
    pub failed: usize,
}

/// Recompute every active submission's fingerprints from stored content.
///
/// Per-item best-effort: a submission whose media cannot be read or
/// hashed is counted and skipped.
pub async fn rebuild_hashes(
    submissions: &dyn SubmissionStore,
    blobs: &dyn BlobStore,
    hashes: &dyn HashStore,
) -> Result<RebuildSummary> {
    let mut summary = RebuildSummary::default();
    for submission in submissions.by_status(SubmissionStatus::Active).await? {
        match recompute(&submission, blobs).await {
            Ok(records) => {
                hashes.remove_for(submission.id).await?;
                if !records.is_empty() {
                    hashes.upsert(&records).await?;
                }
                summary.rebuilt += 1;
            }
            Err(err) => {
                warn!(cave_id = submission.id, error = %err, "rebuild skipped one entry");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

async fn recompute(
    submission: &crate::model::Submission,
    blobs: &dyn BlobStore,
) -> Result<Vec<HashRecord>> {
    let mut records = Vec::new();
    let text_hash = simhash(&submission.joined_text());
    if !text_hash.is_empty() {
        records.push(HashRecord {
            cave_id: submission.id,
            hash: text_hash,
            kind: HashKind::Text,
        });
    }
    for file in submission.media_files() {
        if !is_image_file(file) {
            continue;
        }
        let bytes = blobs.read(file).await?;
        let hash = phash(sanitize(&bytes))?;
        let record = HashRecord {
            cave_id: submission.id,
            hash,
            kind: HashKind::Image,
        };
        if !records.contains(&record) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Outcome counters for a batch meta refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Run AI analysis for every active submission that has no meta row yet.
///
/// Per-item best-effort: unreadable media or a failing model counts and
/// moves on. Submissions the model declines to analyze are skipped.
pub async fn refresh_meta(
    submissions: &dyn SubmissionStore,
    blobs: &dyn BlobStore,
    metas: &dyn MetaStore,
    ai: &crate::ai::AiModerator,
) -> Result<RefreshSummary> {
    let mut summary = RefreshSummary::default();
    'entries: for submission in submissions.by_status(SubmissionStatus::Active).await? {
        if metas.get(submission.id).await?.is_some() {
            continue;
        }
        let mut buffers = HashMap::new();
        for file in submission.media_files() {
            if !is_image_file(file) {
                continue;
            }
            match blobs.read(file).await {
                Ok(bytes) => {
                    buffers.insert(file.to_string(), bytes);
                }
                Err(err) => {
                    warn!(cave_id = submission.id, file = %file, error = %err, "meta refresh skipped one entry");
                    summary.failed += 1;
                    continue 'entries;
                }
            }
        }
        match ai.analyze(&submission, &buffers).await {
            Ok(Some(meta)) => {
                metas.upsert(&meta).await?;
                summary.refreshed += 1;
            }
            Ok(None) => summary.skipped += 1,
            Err(err) => {
                warn!(cave_id = submission.id, error = %err, "meta refresh analysis failed");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Structured parts of a stored media file name:
/// `ID-INDEX_CHANNELID-USERID_TIMESTAMP.EXTENSION`.
///
/// The separator after ID and after CHANNELID may be `-` or `_`; legacy
/// uploads used both. The rebuilt name always uses `-`.
#[derive(Debug, PartialEq, Eq)]
struct MediaName<'a> {
    id: u32,
    id_text: &'a str,
    index: &'a str,
    channel_id: &'a str,
    user_id: &'a str,
    timestamp: &'a str,
    extension: &'a str,
}

fn parse_media_name(name: &str) -> Option<MediaName<'_>> {
    let (stem, extension) = name.split_once('.')?;
    if extension.is_empty() {
        return None;
    }
    let (id_text, rest) = take_digits(stem)?;
    let rest = strip_id_sep(rest)?;
    let (index, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix('_')?;
    let (channel_id, rest) = take_digits(rest)?;
    let rest = strip_id_sep(rest)?;
    let (user_id, rest) = take_digits(rest)?;
    let timestamp = rest.strip_prefix('_')?;
    if timestamp.is_empty() {
        return None;
    }
    let id = id_text.parse().ok()?;
    Some(MediaName {
        id,
        id_text,
        index,
        channel_id,
        user_id,
        timestamp,
        extension,
    })
}

fn take_digits(s: &str) -> Option<(&str, &str)> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    (end > 0).then(|| s.split_at(end))
}

fn strip_id_sep(s: &str) -> Option<&str> {
    s.strip_prefix('-').or_else(|| s.strip_prefix('_'))
}

/// Outcome of a media rename repair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FixSummary {
    /// Executed renames, `(old, new)`.
    pub renamed: Vec<(String, String)>,
    /// Files already carrying the correct channel and user ids.
    pub correct: usize,
    /// Files whose embedded id has no live submission.
    pub unmatched: Vec<String>,
    /// Files whose name does not follow the expected shape; ignored.
    pub unrecognized: Vec<String>,
    /// Renames skipped or failed.
    pub failed: usize,
}

/// Rename stored media whose embedded channel/user ids disagree with the
/// owning submission, and keep element references in step.
///
/// The submission row is the source of truth; a file named for the wrong
/// channel or user is moved to the corrected name. Per-item best-effort:
/// an occupied target name or a failing rename counts and moves on.
pub async fn fix_media_names(
    submissions: &dyn SubmissionStore,
    blobs: &dyn BlobStore,
) -> Result<FixSummary> {
    let mut owners: HashMap<u32, (String, String)> = HashMap::new();
    let mut summary = FixSummary::default();
    for status in [
        SubmissionStatus::Active,
        SubmissionStatus::Pending,
        SubmissionStatus::Preload,
    ] {
        for submission in submissions.by_status(status).await? {
            owners.insert(
                submission.id,
                (submission.channel_id.clone(), submission.user_id.clone()),
            );
        }
    }

    for name in blobs.list().await? {
        let Some(parts) = parse_media_name(&name) else {
            summary.unrecognized.push(name);
            continue;
        };
        let Some((channel_id, user_id)) = owners.get(&parts.id) else {
            summary.unmatched.push(name);
            continue;
        };
        if parts.channel_id == channel_id && parts.user_id == user_id {
            summary.correct += 1;
            continue;
        }
        let new_name = format!(
            "{}-{}_{}-{}_{}.{}",
            parts.id_text, parts.index, channel_id, user_id, parts.timestamp, parts.extension
        );
        if blobs.exists(&new_name).await? {
            warn!(from = %name, to = %new_name, "rename target occupied, skipping");
            summary.failed += 1;
            continue;
        }
        let owner_id = parts.id;
        if let Err(err) = blobs.rename(&name, &new_name).await {
            warn!(from = %name, to = %new_name, error = %err, "rename failed");
            summary.failed += 1;
            continue;
        }
        if let Err(err) = retarget_elements(submissions, owner_id, &name, &new_name).await {
            warn!(cave_id = owner_id, error = %err, "element retarget failed after rename");
        }
        summary.renamed.push((name, new_name));
    }
    Ok(summary)
}

/// Point the owning submission's media elements at the renamed file.
async fn retarget_elements(
    submissions: &dyn SubmissionStore,
    id: u32,
    old: &str,
    new: &str,
) -> Result<()> {
    let Some(mut row) = submissions.get(id).await? else {
        return Ok(());
    };
    let mut touched = false;
    for element in &mut row.elements {
        if let Element::Media { file } = element {
            if file == old {
                *file = new.to_string();
                touched = true;
            }
        }
    }
    if touched {
        submissions.upsert(&row).await?;
    }
    Ok(())
}

/// Referenced-versus-stored media comparison.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MediaAudit {
    /// Referenced by a live submission but absent from the blob store.
    pub missing: Vec<String>,
    /// Stored but referenced by no live submission.
    pub orphaned: Vec<String>,
}

/// Compare the files live submissions reference against the blob store.
pub async fn audit_media(
    submissions: &dyn SubmissionStore,
    blobs: &dyn BlobStore,
) -> Result<MediaAudit> {
    let mut referenced = std::collections::HashSet::new();
    for status in [
        SubmissionStatus::Active,
        SubmissionStatus::Pending,
        SubmissionStatus::Preload,
    ] {
        for submission in submissions.by_status(status).await? {
            for file in submission.media_files() {
                referenced.insert(file.to_string());
            }
        }
    }
    let stored: std::collections::HashSet<String> = blobs.list().await?.into_iter().collect();

    let mut missing: Vec<String> = referenced.difference(&stored).cloned().collect();
    let mut orphaned: Vec<String> = stored.difference(&referenced).cloned().collect();
    missing.sort();
    orphaned.sort();
    Ok(MediaAudit { missing, orphaned })
}
