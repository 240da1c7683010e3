//! Reassembly of segmented downloads
//!
//! Sweeps an output tree for `{base}_part{N}.{ext}` files, joins each complete
//! group into `{base}.mp4` and removes the parts. A group with a missing index,
//! or whose join cannot be verified, keeps its parts untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;

use crate::core::error::{Error, Result};
use crate::core::source::MERGED_EXTENSION;

const PART_MARKER: &str = "_part";
const LIST_SUFFIX: &str = "_file_list.txt";

/// How parts are joined
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConcatMethod {
    /// Byte-for-byte concatenation, in part order
    #[default]
    Bytes,

    /// ffmpeg's concat demuxer with stream copy
    Ffmpeg { program: PathBuf },
}

/// Part files sharing one base name in one folder, ordered by index
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentGroup {
    pub folder: PathBuf,
    pub base: String,
    pub parts: Vec<(usize, PathBuf)>,
}

impl SegmentGroup {
    pub fn output_path(&self) -> PathBuf {
        self.folder.join(format!("{}.{}", self.base, MERGED_EXTENSION))
    }

    fn list_path(&self) -> PathBuf {
        self.folder.join(format!("{}{}", self.base, LIST_SUFFIX))
    }

    /// First index absent from `0..count`, or `count` itself when there are
    /// more parts than that
    fn first_gap(&self, count: usize) -> Option<usize> {
        let gap = self
            .parts
            .iter()
            .enumerate()
            .find(|(position, (index, _))| position != index)
            .map(|(position, _)| position);
        match gap {
            Some(position) => Some(position),
            None if self.parts.len() < count => Some(self.parts.len()),
            None if self.parts.len() > count => Some(count),
            None => None,
        }
    }

    fn key(&self) -> (PathBuf, String) {
        (self.folder.clone(), self.base.clone())
    }
}

/// What the current batch knows about the groups a sweep will find
#[derive(Debug, Clone, Default)]
pub struct MergeScope {
    /// Groups with a part that failed to download; never joined
    excluded: HashSet<(PathBuf, String)>,

    /// Exact part count of groups resolved in this batch
    expected: HashMap<(PathBuf, String), usize>,
}

impl MergeScope {
    pub fn exclude(&mut self, folder: impl Into<PathBuf>, base: impl Into<String>) {
        self.excluded.insert((folder.into(), base.into()));
    }

    pub fn expect_parts(&mut self, folder: impl Into<PathBuf>, base: impl Into<String>, count: usize) {
        self.expected.insert((folder.into(), base.into()), count);
    }
}

/// Outcome of one sweep
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Artifacts produced
    pub merged: Vec<PathBuf>,

    /// Groups left as parts, with the reason
    pub failed: Vec<(String, Error)>,
}

/// Splits `Name_part3.ts` into `("Name", 3)`; `None` for anything else
pub fn parse_part_name(file_name: &str) -> Option<(&str, usize)> {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    let marker = stem.rfind(PART_MARKER)?;
    let (base, rest) = (&stem[..marker], &stem[marker + PART_MARKER.len()..]);
    if base.is_empty() || rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok().map(|index| (base, index))
}

/// Find every part group below `root`, singletons included
pub async fn find_segment_groups(root: &Path) -> Result<Vec<SegmentGroup>> {
    let mut groups = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(folder) = pending.pop() {
        let mut by_base: BTreeMap<String, Vec<(usize, PathBuf)>> = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&folder).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((base, index)) = parse_part_name(name) {
                by_base
                    .entry(base.to_string())
                    .or_default()
                    .push((index, entry.path()));
            }
        }

        for (base, mut parts) in by_base {
            debug!("Group {} contains {} parts", base, parts.len());
            parts.sort_by_key(|(index, _)| *index);
            groups.push(SegmentGroup {
                folder: folder.clone(),
                base,
                parts,
            });
        }
    }

    groups.sort_by(|a, b| (&a.folder, &a.base).cmp(&(&b.folder, &b.base)));
    Ok(groups)
}

/// Quote a path for an ffmpeg concat list
fn concat_list_entry(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// Inverse of [`concat_list_entry`]
fn parse_concat_list(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("file '")?.strip_suffix('\''))
        .map(|quoted| PathBuf::from(quoted.replace("'\\''", "'")))
        .collect()
}

async fn write_concat_list(group: &SegmentGroup) -> Result<PathBuf> {
    let list_path = group.list_path();
    let mut list = String::new();
    for (_, part) in &group.parts {
        list.push_str(&concat_list_entry(part));
        list.push('\n');
    }
    tokio::fs::write(&list_path, list).await?;
    Ok(list_path)
}

/// Append the listed files to `output` and check nothing went missing
async fn concat_bytes(list_path: &Path, output: &Path) -> std::result::Result<(), String> {
    let list = tokio::fs::read_to_string(list_path)
        .await
        .map_err(|e| format!("cannot read part list: {e}"))?;
    let parts = parse_concat_list(&list);

    let mut out = tokio::fs::File::create(output)
        .await
        .map_err(|e| format!("cannot create {}: {e}", output.display()))?;
    let mut expected = 0u64;

    for part in &parts {
        let mut input = tokio::fs::File::open(part)
            .await
            .map_err(|e| format!("cannot open {}: {e}", part.display()))?;
        expected += tokio::io::copy(&mut input, &mut out)
            .await
            .map_err(|e| format!("cannot copy {}: {e}", part.display()))?;
    }
    out.flush().await.map_err(|e| e.to_string())?;
    drop(out);

    let on_disk: u64 = {
        let mut total = 0;
        for part in &parts {
            total += tokio::fs::metadata(part)
                .await
                .map_err(|e| e.to_string())?
                .len();
        }
        total
    };
    let written = tokio::fs::metadata(output)
        .await
        .map_err(|e| e.to_string())?
        .len();

    if written != expected || written != on_disk {
        return Err(format!(
            "wrote {written} bytes, expected {on_disk} from {} parts",
            parts.len()
        ));
    }
    Ok(())
}

async fn concat_ffmpeg(
    program: &Path,
    list_path: &Path,
    output: &Path,
) -> std::result::Result<(), String> {
    let result = tokio::process::Command::new(program)
        .arg("-y")
        .args(["-loglevel", "error"])
        .args(["-f", "concat", "-safe", "0", "-i"])
        .arg(list_path)
        .args(["-bsf:a", "aac_adtstoasc", "-c", "copy"])
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| format!("cannot run {}: {e}", program.display()))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(format!("ffmpeg exited with {}: {}", result.status, stderr.trim()));
    }

    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err("ffmpeg reported success but produced no output".to_string()),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

/// Joins part files into single artifacts
#[derive(Debug, Clone, Default)]
pub struct SegmentMerger {
    method: ConcatMethod,
}

impl SegmentMerger {
    pub fn new(method: ConcatMethod) -> Self {
        Self { method }
    }

    /// Merge every complete multi-part group found below `root`
    pub async fn merge_tree(&self, root: &Path) -> Result<MergeReport> {
        self.merge_tree_scoped(root, &MergeScope::default()).await
    }

    /// Merge the groups below `root`, honouring what `scope` knows about them.
    ///
    /// Groups of unknown origin are joined only when they hold two or more
    /// parts numbered `0..N` without gaps. A group expected to hold exactly
    /// one part is renamed into place.
    pub async fn merge_tree_scoped(&self, root: &Path, scope: &MergeScope) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        if !tokio::fs::try_exists(root).await? {
            return Ok(report);
        }

        for group in find_segment_groups(root).await? {
            let key = group.key();
            if scope.excluded.contains(&key) {
                info!("{} has failed parts, leaving them for the next run", group.base);
                continue;
            }

            let expected = scope.expected.get(&key).copied();
            if expected.is_none() && group.parts.len() < 2 {
                debug!("{} does not require processing", group.base);
                continue;
            }

            let count = expected.unwrap_or(group.parts.len());
            if let Some(missing) = group.first_gap(count) {
                let err = Error::MergeFailed {
                    group: group.folder.join(&group.base).display().to_string(),
                    reason: format!("part {missing} of {count} is missing or unexpected"),
                };
                error!("{}", err);
                report.failed.push((group.base.clone(), err));
                continue;
            }

            let joined = if group.parts.len() == 1 {
                self.promote_single(&group).await
            } else {
                self.merge_group(&group).await
            };
            match joined {
                Ok(output) => report.merged.push(output),
                Err(err) => {
                    error!("{}", err);
                    report.failed.push((group.base.clone(), err));
                }
            }
        }
        Ok(report)
    }

    /// Rename the only part of a one-segment stream to its final name
    async fn promote_single(&self, group: &SegmentGroup) -> Result<PathBuf> {
        let output = group.output_path();
        let (_, part) = &group.parts[0];
        if tokio::fs::try_exists(&output).await? {
            return Err(Error::MergeFailed {
                group: group.folder.join(&group.base).display().to_string(),
                reason: format!("{} already exists", output.display()),
            });
        }
        tokio::fs::rename(part, &output).await?;
        info!("Renamed single part {} to {}", part.display(), output.display());
        Ok(output)
    }

    /// Join one group; parts are deleted only after the join is verified
    pub async fn merge_group(&self, group: &SegmentGroup) -> Result<PathBuf> {
        let output = group.output_path();
        let failed = |reason: String| Error::MergeFailed {
            group: group.folder.join(&group.base).display().to_string(),
            reason,
        };

        if tokio::fs::try_exists(&output).await? {
            return Err(failed(format!("{} already exists", output.display())));
        }

        let list_path = write_concat_list(group).await?;
        debug!("Joining {} parts listed in {}", group.parts.len(), list_path.display());

        let joined = match &self.method {
            ConcatMethod::Bytes => concat_bytes(&list_path, &output).await,
            ConcatMethod::Ffmpeg { program } => concat_ffmpeg(program, &list_path, &output).await,
        };
        remove_quietly(&list_path).await;

        if let Err(reason) = joined {
            remove_quietly(&output).await;
            return Err(failed(reason));
        }

        for (_, part) in &group.parts {
            remove_quietly(part).await;
        }
        info!("Merged {} parts into {}", group.parts.len(), output.display());
        Ok(output)
    }
}
