//! Inspect command implementation.

use super::{open_depot, CliResult, OutputFormat};
use reposync_core::{Depot, ObjectId, ObjectKind, RepoId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Depot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Depot path.
    pub path: String,
    /// Known repos.
    pub repos: Vec<RepoStats>,
    /// Objects whose repo no longer exists.
    pub orphaned: ObjectCounts,
    /// All stored objects.
    pub total: ObjectCounts,
}

/// Statistics for a single repo.
#[derive(Debug, Serialize)]
pub struct RepoStats {
    /// Repo id.
    pub id: RepoId,
    /// Whether content is encrypted client-side.
    pub encrypted: bool,
    /// Branches and their heads.
    pub branches: Vec<BranchStats>,
    /// Stored objects.
    pub objects: ObjectCounts,
}

/// A branch and its head.
#[derive(Debug, Serialize)]
pub struct BranchStats {
    /// Branch name.
    pub name: String,
    /// Head commit, if any.
    pub head: Option<ObjectId>,
}

/// Object counts by kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObjectCounts {
    /// Blocks.
    pub blocks: u64,
    /// Fs-objects.
    pub fs_objects: u64,
    /// Commits.
    pub commits: u64,
    /// Stored bytes over all kinds.
    pub bytes: u64,
}

impl ObjectCounts {
    fn add(&mut self, kind: ObjectKind, len: u64) {
        match kind {
            ObjectKind::Block => self.blocks += 1,
            ObjectKind::Fs => self.fs_objects += 1,
            ObjectKind::Commit => self.commits += 1,
        }
        self.bytes += len;
    }

    /// Number of objects over all kinds.
    pub fn objects(&self) -> u64 {
        self.blocks + self.fs_objects + self.commits
    }
}

/// Collects statistics for `depot`.
pub fn collect(depot: &Depot, path: &Path) -> CliResult<InspectResult> {
    let mut per_repo: BTreeMap<RepoId, ObjectCounts> = BTreeMap::new();
    let mut total = ObjectCounts::default();
    for kind in ObjectKind::ALL {
        for object in depot.objects().list(kind, None)? {
            per_repo.entry(object.repo).or_default().add(kind, object.len);
            total.add(kind, object.len);
        }
    }

    let mut repos = Vec::new();
    for info in depot.repos().list() {
        let branches = depot
            .branches()
            .list(info.id)
            .into_iter()
            .map(|b| BranchStats {
                name: b.name,
                head: b.head,
            })
            .collect();
        repos.push(RepoStats {
            id: info.id,
            encrypted: info.encrypted,
            branches,
            objects: per_repo.remove(&info.id).unwrap_or_default(),
        });
    }

    let mut orphaned = ObjectCounts::default();
    for counts in per_repo.values() {
        orphaned.blocks += counts.blocks;
        orphaned.fs_objects += counts.fs_objects;
        orphaned.commits += counts.commits;
        orphaned.bytes += counts.bytes;
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        repos,
        orphaned,
        total,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let depot = open_depot(path)?;
    let result = collect(&depot, path)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text(&result),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Depot: {}", result.path);
    println!();
    println!("Repos: {}", result.repos.len());
    for repo in &result.repos {
        println!();
        println!(
            "  {}{}",
            repo.id,
            if repo.encrypted { " (encrypted)" } else { "" }
        );
        for branch in &repo.branches {
            let head = branch
                .head
                .map(|h| h.short())
                .unwrap_or_else(|| "-".to_string());
            println!("    {:<24} {}", branch.name, head);
        }
        print_counts("    ", &repo.objects);
    }
    println!();
    if result.orphaned.objects() > 0 {
        println!("Orphaned objects:");
        print_counts("  ", &result.orphaned);
    }
    println!("Total:");
    print_counts("  ", &result.total);
}

fn print_counts(indent: &str, counts: &ObjectCounts) {
    println!(
        "{indent}{} commits, {} fs-objects, {} blocks ({} bytes)",
        counts.commits, counts.fs_objects, counts.blocks, counts.bytes
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_testkit::{files, RepoBuilder, TestDepot};

    #[test]
    fn counts_objects_per_repo() {
        let depot = TestDepot::memory();
        let mut repo = RepoBuilder::create(&depot).with_block_size(4);
        let head = repo.commit("master", &files(&[("a", b"12345678"), ("b", b"xy")]));
        let other = RepoBuilder::create(&depot);

        let result = collect(&depot, Path::new("mem")).unwrap();
        assert_eq!(result.repos.len(), 2);

        let stats = result.repos.iter().find(|r| r.id == repo.repo()).unwrap();
        assert_eq!(stats.objects.commits, 1);
        // root, a, b
        assert_eq!(stats.objects.fs_objects, 3);
        assert_eq!(stats.objects.blocks, 3);
        assert_eq!(stats.branches.len(), 1);
        assert_eq!(stats.branches[0].head, Some(head));

        let empty = result.repos.iter().find(|r| r.id == other.repo()).unwrap();
        assert_eq!(empty.objects, ObjectCounts::default());
        assert_eq!(empty.branches[0].head, None);

        assert_eq!(result.total.objects(), 7);
        assert_eq!(result.orphaned.objects(), 0);
    }

    #[test]
    fn deleted_repo_objects_are_orphaned() {
        let depot = TestDepot::memory();
        let mut repo = RepoBuilder::create(&depot);
        repo.commit("master", &files(&[("a", b"gone")]));
        depot.delete_repo(repo.repo()).unwrap();

        let result = collect(&depot, Path::new("mem")).unwrap();
        assert!(result.repos.is_empty());
        assert_eq!(result.orphaned.commits, 1);
        assert_eq!(result.orphaned, result.total);
    }

    #[test]
    fn json_output_names_fields() {
        let depot = TestDepot::memory();
        RepoBuilder::create(&depot);
        let result = collect(&depot, Path::new("mem")).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["repos"][0]["branches"][0]["name"], "master");
        assert_eq!(json["total"]["blocks"], 0);
    }
}
