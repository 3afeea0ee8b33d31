//! Name-similarity grouping of sibling albums
//!
//! Album names are cleaned of volume/chapter numbering and bracketed tags,
//! then compared pairwise with a blend of sequence similarity, word overlap
//! and substring containment. Clusters are grown single-link from a seed in
//! input order: each still-ungrouped album becomes a seed and pulls in every
//! later ungrouped album that scores against *the seed* above the threshold.
//! The result can therefore depend on input order when A~B and B~C but not
//! A~C.

use crate::album::{Album, Collection, CollectionKind, LibraryEntry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Prefix of the virtual path given to smart collections.
pub const SMART_COLLECTION_PREFIX: &str = "[smart] ";

const SEQUENCE_WEIGHT: f64 = 0.6;
const JACCARD_WEIGHT: f64 = 0.4;
const CONTAINMENT_BOOST: f64 = 0.2;
const MIN_CONTAINED_CHARS: usize = 3;

static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)|\{[^}]*\}|【[^】]*】").unwrap());

static NUMBERING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:v(?:ol(?:ume)?)?|ch(?:apter)?|ep(?:isode)?|part|pt|no|book|issue)\.?\s*\d+(?:\.\d+)?|#\s*\d+",
    )
    .unwrap()
});

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[_\-.]+").unwrap());

static NUMBERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    pub enabled: bool,
    /// Minimum score for two albums to share a group
    pub threshold: f64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.6,
        }
    }
}

/// Strip bracketed tags, volume/chapter/episode markers and bare numbers,
/// keeping the original casing of what remains.
pub fn clean_name(name: &str) -> String {
    // Underscores are word characters to the regex engine, so split on them first
    let cleaned = name.replace('_', " ");
    let cleaned = BRACKETED.replace_all(&cleaned, " ");
    let cleaned = NUMBERING.replace_all(&cleaned, " ");
    let cleaned = SEPARATORS.replace_all(&cleaned, " ");
    let cleaned = NUMBERS.replace_all(&cleaned, " ");
    WHITESPACE.replace_all(&cleaned, " ").trim().to_string()
}

/// Similarity of two raw album names in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    score_cleaned(&clean_name(a).to_lowercase(), &clean_name(b).to_lowercase())
}

/// Score two already cleaned, lowercased names.
fn score_cleaned(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut score = SEQUENCE_WEIGHT * sequence_ratio(a, b) + JACCARD_WEIGHT * word_jaccard(a, b);

    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if shorter.chars().count() >= MIN_CONTAINED_CHARS && longer.contains(shorter) {
        score += CONTAINMENT_BOOST;
    }

    score.min(1.0)
}

/// Ratcliff/Obershelp ratio: `2 * matched / (len(a) + len(b))`, where
/// matches are found by recursively taking the longest common substring.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (start_a, start_b, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

/// Earliest longest common run as `(start in a, start in b, length)`.
fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    if a.is_empty() || b.is_empty() {
        return best;
    }

    let mut previous = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut current = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                let run = previous[j] + 1;
                current[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        previous = current;
    }
    best
}

fn word_jaccard(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / union as f64
}

/// Cluster `names` into groups of indices.
///
/// Groups come out in seed order and list their members in input order, so
/// the first index of each group is its seed.
pub fn cluster<S: AsRef<str>>(names: &[S], threshold: f64) -> Vec<Vec<usize>> {
    let cleaned: Vec<String> = names
        .iter()
        .map(|name| clean_name(name.as_ref()).to_lowercase())
        .collect();

    let mut assigned = vec![false; cleaned.len()];
    let mut groups = Vec::new();

    for seed in 0..cleaned.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut group = vec![seed];

        for other in seed + 1..cleaned.len() {
            if !assigned[other] && score_cleaned(&cleaned[seed], &cleaned[other]) >= threshold {
                assigned[other] = true;
                group.push(other);
            }
        }
        groups.push(group);
    }

    groups
}

/// Name for a smart collection: the words every member shares, in the first
/// member's order and casing, or else the first member's cleaned name with a
/// generic suffix.
pub fn collection_name(albums: &[Album]) -> String {
    let Some(first) = albums.first() else {
        return String::new();
    };
    let first_cleaned = clean_name(&first.name);

    let member_words: Vec<HashSet<String>> = albums
        .iter()
        .map(|album| {
            clean_name(&album.name)
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect()
        })
        .collect();

    let mut seen = HashSet::new();
    let common: Vec<&str> = first_cleaned
        .split_whitespace()
        .filter(|word| {
            let lower = word.to_lowercase();
            member_words.iter().all(|words| words.contains(&lower)) && seen.insert(lower)
        })
        .collect();

    if !common.is_empty() {
        return common.join(" ");
    }
    if first_cleaned.is_empty() {
        format!("{} Collection", first.name)
    } else {
        format!("{} Collection", first_cleaned)
    }
}

/// Group sibling albums by name. Groups of one stay plain albums; larger
/// groups become smart collections placed where their first member was.
pub fn group_albums(albums: Vec<Album>, root: &Path, threshold: f64) -> Vec<LibraryEntry> {
    group_indexed(albums, root, threshold)
        .into_iter()
        .map(|(_, entry)| entry)
        .collect()
}

/// Like [`group_albums`], paired with the input index of each group's seed.
pub(crate) fn group_indexed(
    albums: Vec<Album>,
    root: &Path,
    threshold: f64,
) -> Vec<(usize, LibraryEntry)> {
    let groups = cluster(
        &albums.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        threshold,
    );
    let mut slots: Vec<Option<Album>> = albums.into_iter().map(Some).collect();
    let mut taken = HashSet::new();

    let mut entries = Vec::with_capacity(groups.len());
    for members in groups {
        let seed = members[0];
        let mut group: Vec<Album> = members
            .iter()
            .filter_map(|&index| slots[index].take())
            .collect();

        let entry = if group.len() == 1 {
            group.pop().map(LibraryEntry::Album)
        } else {
            let collection = smart_collection_in(group, root, &mut taken);
            log::debug!(
                "grouped {} albums into \"{}\"",
                collection.album_count,
                collection.name
            );
            Some(LibraryEntry::Collection(collection))
        };
        if let Some(entry) = entry {
            entries.push((seed, entry));
        }
    }
    entries
}

/// Wrap a group of similar albums into a smart collection under `root`.
pub fn smart_collection(albums: Vec<Album>, root: &Path) -> Collection {
    smart_collection_in(albums, root, &mut HashSet::new())
}

fn smart_collection_in(albums: Vec<Album>, root: &Path, taken: &mut HashSet<PathBuf>) -> Collection {
    let name = collection_name(&albums);
    let seed = albums.first().map(|album| album.name.as_str()).unwrap_or_default();
    let path = smart_path(root, &name, seed, taken);
    Collection::new(path, name, CollectionKind::Smart, albums)
}

/// Virtual path `<root>/[smart] <name>`. If that is already used by another
/// smart collection or by a real entry on disk, the seed album's folder name
/// is appended, then a counter.
fn smart_path(root: &Path, name: &str, seed: &str, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let is_free =
        |path: &PathBuf, taken: &HashSet<PathBuf>| !taken.contains(path) && path.symlink_metadata().is_err();

    let mut path = root.join(format!("{}{}", SMART_COLLECTION_PREFIX, name));
    if !is_free(&path, taken) {
        let base = format!("{}{} ({})", SMART_COLLECTION_PREFIX, name, seed);
        path = root.join(&base);
        let mut counter = 2;
        while !is_free(&path, taken) {
            path = root.join(format!("{} {}", base, counter));
            counter += 1;
        }
    }

    taken.insert(path.clone());
    path
}
